use std::fmt::{Display, Write};

use crate::{
    grammar::{Grammar, RuleHandle},
    rule::ComponentKind,
};

/// Writes the expression a node and its `next` chain stand for.
fn display_chain(grammar: &Grammar, handle: RuleHandle, buf: &mut dyn Write) -> std::fmt::Result {
    let mut current = Some(handle);
    let mut first = true;
    while let Some(handle) = current {
        let Some(node) = grammar.get_rule(handle) else {
            break;
        };
        if !first {
            buf.write_char(' ')?;
        }
        first = false;

        if node.inverted {
            buf.write_char('~')?;
        }
        match node.component_kind {
            ComponentKind::Composite | ComponentKind::Atom => {
                buf.write_str(if node.lookahead { "(?!" } else { "(" })?;
                display_alternatives(grammar, handle, buf)?;
                buf.write_char(')')?;
            }
            _ => buf.write_str(&node.value)?,
        }
        write!(buf, "{}", node.quantifier)?;

        current = node.next;
    }
    Ok(())
}

fn display_alternatives(
    grammar: &Grammar,
    handle: RuleHandle,
    buf: &mut dyn Write,
) -> std::fmt::Result {
    let rule = grammar.rule(handle);
    for (i, &alternative) in rule.children.iter().enumerate() {
        if i > 0 {
            buf.write_str(" | ")?;
        }
        display_chain(grammar, alternative, buf)?;
    }
    Ok(())
}

fn quoted<'a>(tags: impl Iterator<Item = &'a str>) -> String {
    tags.map(|t| format!("{t:?}")).collect::<Vec<_>>().join(", ")
}

impl Grammar {
    /// Writes one top-level rule the way it could be declared in a grammar document.
    pub fn display_rule_into(&self, handle: RuleHandle, buf: &mut dyn Write) -> std::fmt::Result {
        let rule = self.rule(handle);
        if rule.options.fragment {
            buf.write_str("fragment ")?;
        }
        write!(buf, "{}", rule.id)?;

        let mut attributes = Vec::new();
        if rule.order != crate::rule::GrammarRule::DEFAULT_ORDER {
            attributes.push(format!("\"order\": {}", rule.order));
        }
        if !rule.categories.is_empty() {
            let categories = quoted(rule.categories.iter().map(|c| &**c));
            attributes.push(format!("\"categories\": [{categories}]"));
        }
        let options = rule.options.tags();
        let options: Vec<_> = options
            .iter()
            .map(|o| &**o)
            .filter(|&o| o != "fragment")
            .collect();
        if !options.is_empty() {
            let options = quoted(options.into_iter());
            attributes.push(format!("\"options\": [{options}]"));
        }
        if !attributes.is_empty() {
            write!(buf, " {{ {} }}", attributes.join(", "))?;
        }

        buf.write_str(": ")?;
        display_alternatives(self, handle, buf)?;
        if let Some(command) = &rule.command {
            write!(buf, " {command}")?;
        }
        buf.write_str(";")
    }

    pub fn display_rules_into(&self, buf: &mut dyn Write) -> std::fmt::Result {
        if let Some(name) = self.name() {
            writeln!(buf, "grammar {name};")?;
        }
        if let Some(parent) = self.parent() {
            writeln!(buf, "import {parent};")?;
        }
        for (handle, _) in self.top_level() {
            self.display_rule_into(handle, buf)?;
            buf.write_char('\n')?;
        }
        Ok(())
    }

    pub fn display_rule(&self, handle: RuleHandle) -> RuleDisplay<'_> {
        RuleDisplay(self, Some(handle))
    }

    pub fn display_rules(&self) -> RuleDisplay<'_> {
        RuleDisplay(self, None)
    }
}

#[derive(Clone, Copy)]
pub struct RuleDisplay<'a>(&'a Grammar, Option<RuleHandle>);

impl Display for RuleDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.1 {
            Some(handle) => self.0.display_rule_into(handle, f),
            None => self.0.display_rules_into(f),
        }
    }
}

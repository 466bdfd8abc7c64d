use std::collections::HashSet;

use crate::{
    error::ErrorAccumulator,
    grammar::{Grammar, RuleHandle},
    rule::{ComponentKind, GrammarRule, RcString, RuleKind},
    span::Span,
};

/// Resolves every reference atom to the rule currently registered under its id.
///
/// Runs over inherited nodes as well, so rules of a parent grammar see overrides made by the
/// child. References to unknown ids are pointed at a shared placeholder that never matches.
pub(crate) fn link_references(grammar: &mut Grammar, err: &ErrorAccumulator) {
    let mut cx = ResolveCx {
        placeholder: None,
        reported: HashSet::new(),
    };

    let handles: Vec<RuleHandle> = grammar
        .iter()
        .filter(|(_, rule)| rule.component_kind.is_reference())
        .map(|(handle, _)| handle)
        .collect();

    for handle in handles {
        cx.link(grammar, handle, err);
    }
}

struct ResolveCx {
    placeholder: Option<RuleHandle>,
    reported: HashSet<(RcString, RcString)>,
}

impl ResolveCx {
    fn link(&mut self, grammar: &mut Grammar, handle: RuleHandle, err: &ErrorAccumulator) {
        let node = grammar.rule(handle);
        let (owner, name) = (node.id.clone(), node.value.clone());
        let owner_kind = node.rule_kind;

        let Some(target) = grammar.lookup(&name) else {
            if self.reported.insert((owner.clone(), name.clone())) {
                err.warning(Some(&*owner), Span::empty(), format!("Unknown rule `{name}`"));
            }
            let placeholder = self.placeholder(grammar);
            grammar.rule_mut(handle).target = Some(placeholder);
            return;
        };

        let target_kind = grammar.rule(target).rule_kind;
        match (owner_kind.is_lexer(), target_kind) {
            (true, RuleKind::ParserRule) => {
                if self.reported.insert((owner.clone(), name.clone())) {
                    err.warning(
                        Some(&*owner),
                        Span::empty(),
                        format!("Lexer rule refers to parser rule `{name}`"),
                    );
                }
            }
            (false, RuleKind::LexerFragment) if owner_kind != RuleKind::Unknown => {
                if self.reported.insert((owner.clone(), name.clone())) {
                    err.warning(
                        Some(&*owner),
                        Span::empty(),
                        format!("Fragment `{name}` is only usable from lexer rules"),
                    );
                }
            }
            _ => {}
        }

        let node = grammar.rule_mut(handle);
        node.target = Some(target);
        node.component_kind = match target_kind {
            RuleKind::LexerFragment => ComponentKind::LexerFragment,
            RuleKind::LexerRule => ComponentKind::LexerRule,
            _ => node.component_kind,
        };
    }

    fn placeholder(&mut self, grammar: &mut Grammar) -> RuleHandle {
        *self.placeholder.get_or_insert_with(|| {
            let rule = GrammarRule::new(
                "<unknown>".into(),
                ComponentKind::Composite,
                RuleKind::Unknown,
            );
            grammar.push_detached(rule)
        })
    }
}

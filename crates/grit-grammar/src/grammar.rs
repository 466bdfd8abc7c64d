use std::collections::{HashMap, HashSet};

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::{
    check,
    compile::{self, CompiledRule},
    error::{CompileError, Diagnostic, ErrorAccumulator, Severity},
    quantifier::Quantifier,
    resolve,
    rule::{ComponentKind, GrammarRule, Pattern, RcString, RuleKind, RuleOptions},
    span::Span,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RuleHandle(u32);

entity_impl! { RuleHandle }

impl RuleHandle {
    pub fn id(self, grammar: &Grammar) -> &RcString {
        &grammar.rules[self].id
    }
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Maximum of a range quantifier written without one, such as `{2,}`.
    pub open_range_cap: usize,
    /// Id of the rule that matches a single character nothing else matched.
    pub unmatched_rule: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            open_range_cap: Quantifier::DEFAULT_OPEN_RANGE_CAP,
            unmatched_rule: "UNMATCHED".to_owned(),
        }
    }
}

/// One rule as handed over by whatever read the grammar.
#[derive(Clone, Default, Debug)]
pub struct RuleDefinition {
    pub id: String,
    pub body: String,
    pub order: Option<i64>,
    pub categories: Vec<String>,
    pub options: Vec<String>,
}

impl RuleDefinition {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> RuleDefinition {
        RuleDefinition {
            id: id.into(),
            body: body.into(),
            ..Default::default()
        }
    }
    pub fn order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }
    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }
}

/// The compiled rules of one grammar.
///
/// All nodes live in one arena, the synthetic root's children are the top-level rules in
/// declaration order and `index` maps their ids to them.
#[derive(Clone, Debug)]
pub struct Grammar {
    name: Option<RcString>,
    parent: Option<RcString>,
    rules: PrimaryMap<RuleHandle, GrammarRule>,
    root: RuleHandle,
    unmatched: RuleHandle,
    index: HashMap<RcString, RuleHandle>,
    lexer_rules: Vec<RuleHandle>,
    parser_rules: Vec<RuleHandle>,
    options: CompileOptions,
    diagnostics: Vec<Diagnostic>,
}

impl Grammar {
    fn new(options: CompileOptions) -> Grammar {
        let mut rules = PrimaryMap::new();

        let root = rules.push(GrammarRule::new(
            "<root>".into(),
            ComponentKind::Composite,
            RuleKind::Unknown,
        ));

        let mut unmatched = GrammarRule::new(
            options.unmatched_rule.as_str().into(),
            ComponentKind::Expression,
            RuleKind::LexerRule,
        );
        unmatched.value = ".".into();
        unmatched.pattern = Some(Pattern::new("(?s:.)").expect("single character pattern"));
        let unmatched = rules.push(unmatched);

        Grammar {
            name: None,
            parent: None,
            rules,
            root,
            unmatched,
            index: HashMap::new(),
            lexer_rules: Vec::new(),
            parser_rules: Vec::new(),
            options,
            diagnostics: Vec::new(),
        }
    }

    /// Compiles definitions in order, rules with recoverable errors are left out.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = RuleDefinition>,
    ) -> Result<Grammar, CompileError> {
        let mut builder = GrammarBuilder::new();
        builder.compile_all(definitions)?;
        Ok(builder.build())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }
    pub fn root(&self) -> RuleHandle {
        self.root
    }
    /// The rule tried after every lexer rule, it matches any single character.
    pub fn unmatched(&self) -> RuleHandle {
        self.unmatched
    }
    pub fn get_rule(&self, handle: RuleHandle) -> Option<&GrammarRule> {
        self.rules.get(handle)
    }
    #[track_caller]
    pub fn rule(&self, handle: RuleHandle) -> &GrammarRule {
        &self.rules[handle]
    }
    pub(crate) fn rule_mut(&mut self, handle: RuleHandle) -> &mut GrammarRule {
        &mut self.rules[handle]
    }
    /// Adds a rule that is neither indexed nor a child of the root.
    pub(crate) fn push_detached(&mut self, rule: GrammarRule) -> RuleHandle {
        self.rules.push(rule)
    }
    pub fn lookup(&self, id: &str) -> Option<RuleHandle> {
        self.index.get(id).copied()
    }
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }
    /// Top-level rules in declaration order.
    pub fn top_level(&self) -> impl Iterator<Item = (RuleHandle, &GrammarRule)> + '_ {
        self.rules[self.root]
            .children
            .iter()
            .map(|&handle| (handle, &self.rules[handle]))
    }
    /// Lexer rules tried at every position, sorted by `order`.
    pub fn lexer_rules(&self) -> &[RuleHandle] {
        &self.lexer_rules
    }
    /// Parser rules tried at every position, sorted by `order`.
    pub fn parser_rules(&self) -> &[RuleHandle] {
        &self.parser_rules
    }
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
    /// Whether some rule had to be left out of the grammar.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
    pub fn len(&self) -> usize {
        self.rules.len()
    }
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
    pub fn iter(&self) -> cranelift_entity::Iter<'_, RuleHandle, GrammarRule> {
        self.rules.iter()
    }
}

pub struct GrammarBuilder {
    grammar: Grammar,
    /// Ids defined by this builder, as opposed to inherited ones.
    own: HashSet<RcString>,
    err: ErrorAccumulator,
}

impl GrammarBuilder {
    pub fn new() -> GrammarBuilder {
        Self::with_options(CompileOptions::default())
    }

    pub fn with_options(options: CompileOptions) -> GrammarBuilder {
        GrammarBuilder {
            grammar: Grammar::new(options),
            own: HashSet::new(),
            err: ErrorAccumulator::new(),
        }
    }

    /// Starts from the rules of `parent`, rules compiled afterwards take precedence over its own.
    pub fn extending(parent: &Grammar) -> GrammarBuilder {
        let mut grammar = parent.clone();
        grammar.parent = parent.name.clone();
        grammar.name = None;
        grammar.diagnostics.clear();
        GrammarBuilder {
            grammar,
            own: HashSet::new(),
            err: ErrorAccumulator::new(),
        }
    }

    pub fn named(mut self, name: &str) -> GrammarBuilder {
        self.grammar.name = Some(name.into());
        self
    }

    pub fn set_name(&mut self, name: &str) {
        self.grammar.name = Some(name.into());
    }

    pub fn errors(&self) -> &ErrorAccumulator {
        &self.err
    }

    pub fn compile(&mut self, definition: RuleDefinition) -> Result<RuleHandle, CompileError> {
        let RuleDefinition {
            id,
            body,
            order,
            categories,
            options,
        } = definition;

        if id.is_empty() {
            return Err(CompileError::Syntax {
                rule: id,
                offset: 0,
                message: "Rule id must not be empty",
            });
        }

        let id: RcString = id.into();
        let mut kind = RuleKind::from_id(&id);
        let mut options = RuleOptions::from_tags(kind, &id, &options, &self.err);
        if options.fragment && kind.is_lexer() {
            kind = RuleKind::LexerFragment;
        }

        let base = self.grammar.rules.next_key();
        let compiled = compile::compile_rule(
            &id,
            kind,
            &body,
            base,
            self.grammar.options.open_range_cap,
            &self.err,
        )
        .map_err(|e| {
            if e.is_recoverable() {
                let span = e.offset().map_or(Span::new(0, body.len()), Span::at);
                self.err
                    .error(Some(&*id), span, format!("{e}, skipping this rule"));
            }
            e
        })?;

        if check::is_fatally_recursive(&compiled) {
            self.err.error(
                Some(&*id),
                Span::new(0, body.len()),
                "Rule recurses into itself without consuming input, skipping this rule",
            );
            return Err(CompileError::FatalRecursion {
                rule: id.to_string(),
            });
        }

        let CompiledRule { nodes, command, .. } = compiled;
        if matches!(&command, Some(c) if &*c.name == "skip") {
            options.skip = true;
        }

        for node in nodes {
            self.grammar.rules.push(node);
        }

        let head = &mut self.grammar.rules[base];
        head.order = order.unwrap_or(GrammarRule::DEFAULT_ORDER);
        head.categories = categories.into_iter().map(RcString::from).collect();
        head.options = options;
        head.command = command;

        self.insert(id, base);
        Ok(base)
    }

    /// Compiles every definition, stopping at the first error that is not recoverable.
    pub fn compile_all(
        &mut self,
        definitions: impl IntoIterator<Item = RuleDefinition>,
    ) -> Result<(), CompileError> {
        for definition in definitions {
            match self.compile(definition) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn insert(&mut self, id: RcString, handle: RuleHandle) {
        let grammar = &mut self.grammar;
        match grammar.index.insert(id.clone(), handle) {
            Some(previous) => {
                if self.own.contains(&id) {
                    self.err.warning(
                        Some(&*id),
                        Span::empty(),
                        "Rule is defined more than once, the last definition wins",
                    );
                } else {
                    log::debug!("rule `{id}` overrides the inherited definition");
                }
                let children = &mut grammar.rules[grammar.root].children;
                match children.iter_mut().find(|child| **child == previous) {
                    Some(slot) => *slot = handle,
                    None => children.push(handle),
                }
            }
            None => grammar.rules[grammar.root].children.push(handle),
        }
        self.own.insert(id);
    }

    /// Links references, sorts the candidate rules and checks for left recursion.
    pub fn build(self) -> Grammar {
        let GrammarBuilder {
            mut grammar, err, ..
        } = self;

        resolve::link_references(&mut grammar, &err);

        let mut lexer_rules = Vec::new();
        let mut parser_rules = Vec::new();
        for (handle, rule) in grammar.top_level() {
            if rule.options.omit {
                continue;
            }
            match rule.rule_kind {
                RuleKind::LexerRule => lexer_rules.push(handle),
                RuleKind::ParserRule => parser_rules.push(handle),
                RuleKind::LexerFragment | RuleKind::Unknown => {}
            }
        }
        // stable, rules with equal order keep declaration order
        lexer_rules.sort_by_key(|&handle| grammar.rules[handle].order);
        parser_rules.sort_by_key(|&handle| grammar.rules[handle].order);
        grammar.lexer_rules = lexer_rules;
        grammar.parser_rules = parser_rules;

        check::check_left_recursion(&grammar, &err);

        grammar.diagnostics = err.take();
        grammar
    }
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar(rules: &[(&str, &str)]) -> Grammar {
        Grammar::from_definitions(
            rules
                .iter()
                .map(|&(id, body)| RuleDefinition::new(id, body)),
        )
        .unwrap()
    }

    #[test]
    fn test_index_and_root() {
        let g = grammar(&[("NUM", "[0-9]+"), ("WS", "' '+"), ("sum", "NUM '+' NUM")]);
        let ids: Vec<_> = g.top_level().map(|(_, rule)| rule.id.to_string()).collect();
        assert_eq!(ids, vec!["NUM", "WS", "sum"]);
        assert_eq!(g.lexer_rules().len(), 2);
        assert_eq!(g.parser_rules().len(), 1);
        assert!(g.contains("sum"));
        assert!(!g.contains("UNMATCHED"));
        assert_eq!(g.rule(g.unmatched()).id.as_ref(), "UNMATCHED");
    }

    #[test]
    fn test_fatal_recursion_is_dropped() {
        let mut builder = GrammarBuilder::new();
        let result = builder.compile_all([
            RuleDefinition::new("A", "A ;"),
            RuleDefinition::new("B", "'b'"),
            RuleDefinition::new("C", "(C | C)"),
        ]);
        assert!(result.is_ok());
        let g = builder.build();
        assert!(!g.contains("A"));
        assert!(!g.contains("C"));
        assert!(g.contains("B"));
        assert_eq!(g.diagnostics().len(), 2);
        assert!(g.has_errors());
        let dropped = &g.diagnostics()[0];
        assert_eq!(dropped.severity, Severity::Error);
        assert_eq!(dropped.rule.as_deref(), Some("A"));
        assert_eq!(dropped.span, Span::new(0, 3));
    }

    #[test]
    fn test_empty_rule_points_at_body() {
        let mut builder = GrammarBuilder::new();
        builder
            .compile_all([RuleDefinition::new("E", "  ;"), RuleDefinition::new("F", "'f'")])
            .unwrap();
        let g = builder.build();
        assert!(!g.contains("E"));
        assert_eq!(g.diagnostics()[0].span, Span::new(0, 3));

        let clean = grammar(&[("F", "'f'")]);
        assert!(!clean.has_errors());
    }

    #[test]
    fn test_escapable_recursion_is_kept() {
        let g = grammar(&[("list", "item list | item"), ("item", "'x'"), ("A", "A | 'a'")]);
        assert!(g.contains("list"));
        assert!(g.contains("A"));
    }

    #[test]
    fn test_structural_error_aborts() {
        let result = Grammar::from_definitions([
            RuleDefinition::new("ok", "'a'"),
            RuleDefinition::new("bad", "('a'"),
        ]);
        assert!(matches!(
            result,
            Err(CompileError::UnmatchedParenthesis { .. })
        ));
    }

    #[test]
    fn test_order_sorts_candidates() {
        let g = Grammar::from_definitions([
            RuleDefinition::new("ID", "[a-z]+"),
            RuleDefinition::new("KW", "'if'").order(1),
            RuleDefinition::new("SP", "' '").option("omit"),
            RuleDefinition::new("DIGIT", "[0-9]").option("fragment"),
        ])
        .unwrap();
        let candidates: Vec<_> = g
            .lexer_rules()
            .iter()
            .map(|&h| h.id(&g).to_string())
            .collect();
        assert_eq!(candidates, vec!["KW", "ID"]);
        assert_eq!(g.rule(g.lookup("DIGIT").unwrap()).rule_kind, RuleKind::LexerFragment);
    }

    #[test]
    fn test_skip_command() {
        let g = grammar(&[("WS", "[ \\t]+ -> skip")]);
        let ws = g.rule(g.lookup("WS").unwrap());
        assert!(ws.options.skip);
        assert_eq!(ws.command.as_ref().unwrap().name.as_ref(), "skip");
    }

    #[test]
    fn test_inheritance_overrides() {
        let mut parent = GrammarBuilder::new().named("Base");
        parent
            .compile_all([
                RuleDefinition::new("ID", "[a-z]+"),
                RuleDefinition::new("pair", "ID ID"),
            ])
            .unwrap();
        let parent = parent.build();

        let mut child = GrammarBuilder::extending(&parent).named("Child");
        child.compile(RuleDefinition::new("ID", "[A-Z]+")).unwrap();
        child.compile(RuleDefinition::new("NUM", "[0-9]+")).unwrap();
        let child = child.build();

        assert_eq!(child.parent(), Some("Base"));
        assert_eq!(child.name(), Some("Child"));
        let ids: Vec<_> = child.top_level().map(|(_, r)| r.id.to_string()).collect();
        assert_eq!(ids, vec!["ID", "pair", "NUM"]);

        // the inherited rule now refers to the overriding definition
        let id = child.lookup("ID").unwrap();
        let pair = child.rule(child.lookup("pair").unwrap());
        let first = child.rule(pair.children[0]);
        assert_eq!(first.target, Some(id));
        assert_ne!(parent.lookup("ID"), Some(id));
        assert!(child.diagnostics().is_empty());
    }
}

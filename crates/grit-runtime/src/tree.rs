use std::{
    fmt::{Display, Write},
    rc::Weak,
};

use grit_grammar::{Grammar, RuleHandle, Span};

use crate::token::{StreamData, Token, TokenParts};

/// Storage for the units a syntax tree matched.
pub trait Units: Default + Clone {
    fn append(&mut self, other: &Self);
    fn write_units(&self, buf: &mut dyn Write) -> std::fmt::Result;
}

impl Units for String {
    fn append(&mut self, other: &Self) {
        self.push_str(other);
    }
    fn write_units(&self, buf: &mut dyn Write) -> std::fmt::Result {
        write!(buf, "{self:?}")
    }
}

impl Units for Vec<Token> {
    fn append(&mut self, other: &Self) {
        self.extend_from_slice(other);
    }
    fn write_units(&self, buf: &mut dyn Write) -> std::fmt::Result {
        buf.write_char('[')?;
        for (i, token) in self.iter().enumerate() {
            if i > 0 {
                buf.write_char(' ')?;
            }
            write!(buf, "{:?}", token.value())?;
        }
        buf.write_char(']')
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MatchState {
    #[default]
    Pending,
    Resolved,
    Deferred,
}

/// Record of one matching attempt of `rule` starting at `start`.
///
/// Positions are stream positions: byte offsets for lexer trees, token indices for parser trees.
#[derive(Clone, Debug)]
pub struct SyntaxTree<B> {
    rule: Option<RuleHandle>,
    units: B,
    start: usize,
    end: usize,
    state: MatchState,
    children: Vec<SyntaxTree<B>>,
}

pub type LexerTree = SyntaxTree<String>;
pub type ParserTree = SyntaxTree<Vec<Token>>;

impl<B: Units> SyntaxTree<B> {
    pub fn new(rule: Option<RuleHandle>, start: usize) -> SyntaxTree<B> {
        SyntaxTree {
            rule,
            units: B::default(),
            start,
            end: start,
            state: MatchState::Pending,
            children: Vec::new(),
        }
    }

    /// An attempt that failed before consuming anything.
    pub fn deferred(rule: Option<RuleHandle>, start: usize) -> SyntaxTree<B> {
        let mut tree = SyntaxTree::new(rule, start);
        tree.defer();
        tree
    }

    pub fn rule(&self) -> Option<RuleHandle> {
        self.rule
    }
    pub fn units(&self) -> &B {
        &self.units
    }
    pub fn start(&self) -> usize {
        self.start
    }
    pub fn end(&self) -> usize {
        self.end
    }
    /// Number of stream positions consumed.
    pub fn len(&self) -> usize {
        self.end - self.start
    }
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
    pub fn state(&self) -> MatchState {
        self.state
    }
    pub fn children(&self) -> &[SyntaxTree<B>] {
        &self.children
    }

    /// Marks the attempt as matched, the state can only be set once.
    pub fn resolve(&mut self) {
        self.settle(MatchState::Resolved);
    }
    /// Marks the attempt as failed, the state can only be set once.
    pub fn defer(&mut self) {
        self.settle(MatchState::Deferred);
    }
    fn settle(&mut self, state: MatchState) {
        debug_assert_eq!(
            self.state,
            MatchState::Pending,
            "Match state was already settled"
        );
        if self.state == MatchState::Pending {
            self.state = state;
        }
    }

    pub fn matches(&self) -> bool {
        self.state == MatchState::Resolved
    }
    /// Matched and consumed at least one unit.
    pub fn absolute_match(&self) -> bool {
        self.matches() && !self.is_empty()
    }

    /// Appends a finished sub-attempt that starts where this one currently ends.
    pub(crate) fn absorb(&mut self, child: SyntaxTree<B>) {
        debug_assert_eq!(child.start, self.end);
        self.units.append(&child.units);
        self.end = child.end;
        self.children.push(child);
    }
    /// Like [`SyntaxTree::absorb`], but a child without children of its own only contributes units.
    pub(crate) fn merge(&mut self, child: SyntaxTree<B>) {
        match child.children.is_empty() {
            true => self.consume(child.units, child.end),
            false => self.absorb(child),
        }
    }
    /// Consumes units up to `to` without a sub-attempt.
    pub(crate) fn consume(&mut self, units: B, to: usize) {
        self.units.append(&units);
        self.end = to;
    }
    /// Moves the end without consuming units, used by the parser to step over skipped tokens.
    pub(crate) fn extend_to(&mut self, end: usize) {
        self.end = self.end.max(end);
    }

    pub fn display_into(
        &self,
        buf: &mut dyn Write,
        grammar: &Grammar,
        indent: usize,
    ) -> std::fmt::Result {
        for _ in 0..indent {
            buf.write_str("  ")?;
        }
        match self.rule.and_then(|rule| grammar.get_rule(rule)) {
            Some(rule) => write!(buf, "{} <{}>", rule.id, rule.component_kind)?,
            None => buf.write_str("<none>")?,
        }
        write!(buf, " {}..{} ", self.start, self.end)?;
        self.units.write_units(buf)?;
        if self.state != MatchState::Resolved {
            write!(buf, " ({:?})", self.state)?;
        }
        buf.write_char('\n')?;

        for child in &self.children {
            child.display_into(buf, grammar, indent + 1)?;
        }
        Ok(())
    }

    pub fn display<'a>(&'a self, grammar: &'a Grammar) -> TreeDisplay<'a, B> {
        TreeDisplay(self, grammar)
    }
}

impl SyntaxTree<String> {
    /// The matched characters.
    pub fn value(&self) -> &str {
        &self.units
    }

    /// Turns a matched top-level lexer attempt into a token.
    ///
    /// `base_offset` is added to the tree positions to make the token span absolute.
    pub(crate) fn generate_token(
        &self,
        grammar: &Grammar,
        base_offset: usize,
        stream: Weak<StreamData>,
    ) -> Option<Token> {
        let handle = self.rule?;
        let rule = grammar.get_rule(handle)?;
        let parts = TokenParts {
            value: self.units.as_str().into(),
            lexer_rule: handle,
            lexer_id: rule.id.clone(),
            span: Span::new(self.start, self.end).shifted(base_offset),
            unmatched: handle == grammar.unmatched(),
            categories: rule.categories.clone().into(),
            options: rule.options.tags().into(),
        };
        Some(Token::new(parts, stream))
    }
}

impl SyntaxTree<Vec<Token>> {
    pub fn tokens(&self) -> &[Token] {
        &self.units
    }

    /// Text span covered by the matched tokens.
    pub fn source_span(&self) -> Option<Span> {
        let first = self.units.first()?;
        let last = self.units.last()?;
        Some(first.span().join(last.span()))
    }
}

#[derive(Clone, Copy)]
pub struct TreeDisplay<'a, B>(&'a SyntaxTree<B>, &'a Grammar);
impl<B: Units> Display for TreeDisplay<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.display_into(f, self.1, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_set_once() {
        let mut tree = LexerTree::new(None, 3);
        assert_eq!(tree.state(), MatchState::Pending);
        assert!(!tree.matches());
        tree.resolve();
        assert!(tree.matches());
        // resolved but empty
        assert!(!tree.absolute_match());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already settled")]
    fn test_double_settle_panics_in_debug() {
        let mut tree = LexerTree::new(None, 0);
        tree.defer();
        tree.resolve();
    }

    #[test]
    fn test_absorb() {
        let mut parent = LexerTree::new(None, 0);
        let mut child = LexerTree::new(None, 0);
        child.consume("ab".to_owned(), 2);
        child.resolve();
        parent.absorb(child);

        let mut second = LexerTree::new(None, 2);
        second.consume("c".to_owned(), 3);
        second.resolve();
        parent.absorb(second);
        parent.resolve();

        assert_eq!(parent.value(), "abc");
        assert_eq!((parent.start(), parent.end()), (0, 3));
        assert_eq!(parent.children().len(), 2);
        assert!(parent.absolute_match());
    }
}

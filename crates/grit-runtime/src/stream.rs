use grit_grammar::{rule::Pattern, GrammarRule};

use crate::{token::Token, tree::Units};

/// How a reference atom is evaluated against a stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reference {
    /// Match the referenced rule's body at the position.
    Recurse,
    /// The reference stands for a single unit, which either is or is not what it names.
    Unit(bool),
}

/// A sequence of units the matcher walks, positions are offsets into it.
pub trait Stream {
    type Buffer: Units;

    /// Position just past the last unit.
    fn end(&self) -> usize;
    /// Position of the unit following the one at `pos`.
    fn advance(&self, pos: usize) -> usize;
    /// Appends the units in `from..to` to `buffer`.
    fn extend(&self, buffer: &mut Self::Buffer, from: usize, to: usize);
    /// End of the match of `pattern` at `pos`, matches are never empty.
    fn match_pattern(&self, pattern: &Pattern, pos: usize) -> Option<usize>;
    /// Whether a `$`-anchored expression may stop at `pos`.
    fn ends_anchor(&self, pos: usize) -> bool;
    fn reference(&self, target: &GrammarRule, pos: usize) -> Reference;
}

/// Characters of a string, positions are byte offsets.
#[derive(Clone, Copy)]
pub struct CharStream<'a> {
    text: &'a str,
}

impl<'a> CharStream<'a> {
    pub fn new(text: &'a str) -> CharStream<'a> {
        Self { text }
    }
    pub fn text(&self) -> &'a str {
        self.text
    }
}

impl Stream for CharStream<'_> {
    type Buffer = String;

    fn end(&self) -> usize {
        self.text.len()
    }
    fn advance(&self, pos: usize) -> usize {
        match self.text[pos..].chars().next() {
            Some(c) => pos + c.len_utf8(),
            None => pos,
        }
    }
    fn extend(&self, buffer: &mut String, from: usize, to: usize) {
        buffer.push_str(&self.text[from..to]);
    }
    fn match_pattern(&self, pattern: &Pattern, pos: usize) -> Option<usize> {
        pattern.match_prefix(&self.text[pos..]).map(|len| pos + len)
    }
    fn ends_anchor(&self, pos: usize) -> bool {
        pos == self.text.len()
    }
    fn reference(&self, _target: &GrammarRule, _pos: usize) -> Reference {
        Reference::Recurse
    }
}

/// Already lexed tokens, positions are token indices.
#[derive(Clone, Copy)]
pub struct TokenSlice<'a> {
    tokens: &'a [Token],
}

impl<'a> TokenSlice<'a> {
    pub fn new(tokens: &'a [Token]) -> TokenSlice<'a> {
        Self { tokens }
    }
}

impl Stream for TokenSlice<'_> {
    type Buffer = Vec<Token>;

    fn end(&self) -> usize {
        self.tokens.len()
    }
    fn advance(&self, pos: usize) -> usize {
        (pos + 1).min(self.tokens.len())
    }
    fn extend(&self, buffer: &mut Vec<Token>, from: usize, to: usize) {
        buffer.extend_from_slice(&self.tokens[from..to]);
    }
    /// A literal or expression must match the whole token text.
    fn match_pattern(&self, pattern: &Pattern, pos: usize) -> Option<usize> {
        let token = self.tokens.get(pos)?;
        pattern.is_exact(token.value()).then_some(pos + 1)
    }
    /// Expressions always match up to the end of a token's text.
    fn ends_anchor(&self, _pos: usize) -> bool {
        true
    }
    /// Lexer rules are matched by the rule that produced the token, parser rules by recursion.
    fn reference(&self, target: &GrammarRule, pos: usize) -> Reference {
        if !target.rule_kind.is_lexer() {
            return Reference::Recurse;
        }
        let hit = self
            .tokens
            .get(pos)
            .is_some_and(|token| token.lexer_id() == &*target.id);
        Reference::Unit(hit)
    }
}

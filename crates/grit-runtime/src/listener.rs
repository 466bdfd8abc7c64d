use std::fmt::Display;

use grit_grammar::{RuleHandle, Span};

use crate::{
    token::Token,
    tree::{LexerTree, ParserTree},
};

/// Callbacks invoked synchronously while text is lexed and parsed.
///
/// Every method does nothing by default.
pub trait Listener {
    /// A lexer rule produced a token, skipped matches are not reported.
    fn did_generate_token(&mut self, _token: &Token, _tree: &LexerTree) {}
    /// No lexer rule matched, `token` is the single character that was consumed instead.
    fn did_not_match(&mut self, _token: &Token) {}
    /// A parser rule matched at the top level.
    fn did_generate_tree(&mut self, _tree: &ParserTree) {}
    /// No parser rule matched at this token.
    fn did_skip_token(&mut self, _token: &Token) {}
    /// A lexer and parser pass starts over `text`, which begins at absolute `offset`.
    fn did_enter_block(&mut self, _text: &str, _offset: usize, _depth: usize) {}
}

impl Listener for () {}

#[derive(Clone, Debug)]
pub enum Event {
    GeneratedToken(Token),
    Unmatched(Token),
    GeneratedTree {
        rule: Option<RuleHandle>,
        tokens: Vec<Token>,
    },
    SkippedToken(Token),
    EnteredBlock {
        offset: usize,
        len: usize,
        depth: usize,
    },
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::GeneratedToken(token) => write!(f, "token {token}"),
            Event::Unmatched(token) => write!(f, "unmatched {token}"),
            Event::GeneratedTree { tokens, .. } => {
                let span = match (tokens.first(), tokens.last()) {
                    (Some(first), Some(last)) => first.span().join(last.span()),
                    _ => Span::empty(),
                };
                write!(f, "tree of {} tokens ({span})", tokens.len())
            }
            Event::SkippedToken(token) => write!(f, "skipped {token}"),
            Event::EnteredBlock { offset, len, depth } => {
                write!(f, "block at {offset} of {len} bytes, depth {depth}")
            }
        }
    }
}

/// Records every notification in order.
#[derive(Clone, Default, Debug)]
pub struct EventLog {
    pub events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> EventLog {
        Self::default()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }
}

impl Listener for EventLog {
    fn did_generate_token(&mut self, token: &Token, _tree: &LexerTree) {
        self.events.push(Event::GeneratedToken(token.clone()));
    }
    fn did_not_match(&mut self, token: &Token) {
        self.events.push(Event::Unmatched(token.clone()));
    }
    fn did_generate_tree(&mut self, tree: &ParserTree) {
        self.events.push(Event::GeneratedTree {
            rule: tree.rule(),
            tokens: tree.tokens().to_vec(),
        });
    }
    fn did_skip_token(&mut self, token: &Token) {
        self.events.push(Event::SkippedToken(token.clone()));
    }
    fn did_enter_block(&mut self, text: &str, offset: usize, depth: usize) {
        self.events.push(Event::EnteredBlock {
            offset,
            len: text.len(),
            depth,
        });
    }
}

use std::{
    cell::Cell,
    fmt::Display,
    rc::{Rc, Weak},
};

use grit_grammar::{RcString, RuleHandle, Span};

#[derive(Debug)]
struct TokenData {
    value: RcString,
    lexer_rule: RuleHandle,
    lexer_id: RcString,
    parser_rule: Cell<Option<RuleHandle>>,
    span: Span,
    unmatched: bool,
    categories: Rc<[RcString]>,
    options: Rc<[RcString]>,
    stream: Weak<StreamData>,
}

/// One lexed unit of text.
///
/// Clones share their data, so the parser rule stamped on a token during parsing is visible
/// through every copy held by syntax trees.
#[derive(Clone, Debug)]
pub struct Token(Rc<TokenData>);

pub(crate) struct TokenParts {
    pub value: RcString,
    pub lexer_rule: RuleHandle,
    pub lexer_id: RcString,
    pub span: Span,
    pub unmatched: bool,
    pub categories: Rc<[RcString]>,
    pub options: Rc<[RcString]>,
}

impl Token {
    pub(crate) fn new(parts: TokenParts, stream: Weak<StreamData>) -> Token {
        let TokenParts {
            value,
            lexer_rule,
            lexer_id,
            span,
            unmatched,
            categories,
            options,
        } = parts;
        Token(Rc::new(TokenData {
            value,
            lexer_rule,
            lexer_id,
            parser_rule: Cell::new(None),
            span,
            unmatched,
            categories,
            options,
            stream,
        }))
    }

    pub fn value(&self) -> &str {
        &self.0.value
    }
    pub fn lexer_rule(&self) -> RuleHandle {
        self.0.lexer_rule
    }
    /// Id of the lexer rule that produced this token.
    pub fn lexer_id(&self) -> &str {
        &self.0.lexer_id
    }
    /// The top-level parser rule this token was consumed by, if any.
    pub fn parser_rule(&self) -> Option<RuleHandle> {
        self.0.parser_rule.get()
    }
    pub(crate) fn set_parser_rule(&self, rule: RuleHandle) {
        self.0.parser_rule.set(Some(rule));
    }
    /// Absolute byte offsets into the text of the outermost pass.
    pub fn span(&self) -> Span {
        self.0.span
    }
    pub fn start(&self) -> usize {
        self.0.span.start()
    }
    pub fn end(&self) -> usize {
        self.0.span.end()
    }
    pub fn len(&self) -> usize {
        self.0.span.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.span.is_empty()
    }
    /// Whether the token is a character no lexer rule matched.
    pub fn is_unmatched(&self) -> bool {
        self.0.unmatched
    }
    pub fn categories(&self) -> &[RcString] {
        &self.0.categories
    }
    pub fn options(&self) -> &[RcString] {
        &self.0.options
    }
    pub fn has_category(&self, category: &str) -> bool {
        self.categories().iter().any(|c| &**c == category)
    }
    pub fn has_option(&self, option: &str) -> bool {
        self.options().iter().any(|o| &**o == option)
    }
    /// The stream this token belongs to, `None` while it is still being produced.
    pub fn stream(&self) -> Option<TokenStream> {
        self.0.stream.upgrade().map(TokenStream)
    }
    pub fn ptr_eq(&self, other: &Token) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} ({},{})",
            self.lexer_id(),
            self.value(),
            self.start(),
            self.end()
        )
    }
}

#[derive(Debug)]
pub(crate) struct StreamData {
    pub text: RcString,
    pub base_offset: usize,
    pub tokens: Vec<Token>,
    pub trivia: Vec<Token>,
}

/// Output of one lexer pass.
///
/// Skipped matches are kept apart from the tokens as trivia, together they cover the whole text.
#[derive(Clone, Debug)]
pub struct TokenStream(Rc<StreamData>);

impl TokenStream {
    pub(crate) fn new_cyclic(build: impl FnOnce(&Weak<StreamData>) -> StreamData) -> TokenStream {
        TokenStream(Rc::new_cyclic(build))
    }

    /// The text this pass was run on.
    pub fn text(&self) -> &str {
        &self.0.text
    }
    /// Absolute offset of [`TokenStream::text`] in the outermost text.
    pub fn base_offset(&self) -> usize {
        self.0.base_offset
    }
    pub fn tokens(&self) -> &[Token] {
        &self.0.tokens
    }
    pub fn trivia(&self) -> &[Token] {
        &self.0.trivia
    }
    pub fn len(&self) -> usize {
        self.0.tokens.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.tokens.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<&Token> {
        self.0.tokens.get(index)
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.0.tokens.iter()
    }
    /// Tokens and trivia merged in text order.
    pub fn all(&self) -> Vec<Token> {
        let mut all: Vec<Token> = self
            .0
            .tokens
            .iter()
            .chain(self.0.trivia.iter())
            .cloned()
            .collect();
        all.sort_by_key(|token| token.start());
        all
    }
    pub fn ptr_eq(&self, other: &TokenStream) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn display_into(&self, buf: &mut dyn std::fmt::Write, print_trivia: bool) -> std::fmt::Result {
        let tokens = match print_trivia {
            true => self.all(),
            false => self.0.tokens.clone(),
        };
        for token in tokens {
            writeln!(buf, "{token}")?;
        }
        Ok(())
    }

    pub fn display(&self, print_trivia: bool) -> TokensDisplay<'_> {
        TokensDisplay(self, print_trivia)
    }
}

impl<'a> IntoIterator for &'a TokenStream {
    type Item = &'a Token;
    type IntoIter = std::slice::Iter<'a, Token>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Clone, Copy)]
pub struct TokensDisplay<'a>(&'a TokenStream, bool);
impl Display for TokensDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.display_into(f, self.1)
    }
}

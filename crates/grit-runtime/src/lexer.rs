use grit_grammar::Grammar;

use crate::{
    listener::Listener,
    matcher::Matcher,
    stream::{CharStream, Stream},
    token::{StreamData, TokenStream},
    tree::LexerTree,
};

/// Splits text into tokens using the top-level lexer rules of a grammar.
pub struct Lexer<'g> {
    grammar: &'g Grammar,
    matcher: Matcher<'g>,
}

impl<'g> Lexer<'g> {
    pub fn new(grammar: &'g Grammar) -> Lexer<'g> {
        Lexer {
            grammar,
            matcher: Matcher::new(grammar),
        }
    }

    pub fn grammar(&self) -> &'g Grammar {
        self.grammar
    }

    pub fn tokenize(&mut self, text: &str) -> TokenStream {
        self.tokenize_with(text, 0, &mut ())
    }

    /// Tokenizes `text`, whose first byte is at `base_offset` in some enclosing text.
    ///
    /// Every position is covered by exactly one token or trivia entry, a character no rule
    /// matches becomes a token of the unmatched rule.
    pub fn tokenize_with(
        &mut self,
        text: &str,
        base_offset: usize,
        listener: &mut dyn Listener,
    ) -> TokenStream {
        let grammar = self.grammar;
        let stream = CharStream::new(text);

        TokenStream::new_cyclic(|weak| {
            let mut tokens = Vec::new();
            let mut trivia = Vec::new();

            let mut pos = 0;
            while pos < stream.end() {
                let tree = self
                    .match_candidates(&stream, pos)
                    .unwrap_or_else(|| unmatched_char(grammar, &stream, pos));

                let Some(token) = tree.generate_token(grammar, base_offset, weak.clone()) else {
                    pos = stream.advance(pos);
                    continue;
                };
                pos = tree.end();

                if token.is_unmatched() {
                    log::debug!("no lexer rule matched at {}", token.start());
                    listener.did_not_match(&token);
                    tokens.push(token);
                } else if grammar.rule(token.lexer_rule()).options.skip {
                    trivia.push(token);
                } else {
                    listener.did_generate_token(&token, &tree);
                    tokens.push(token);
                }
            }

            StreamData {
                text: text.into(),
                base_offset,
                tokens,
                trivia,
            }
        })
    }

    /// First rule in priority order that consumes input at `pos`, the unmatched rule last.
    fn match_candidates(&mut self, stream: &CharStream, pos: usize) -> Option<LexerTree> {
        let grammar = self.grammar;
        grammar
            .lexer_rules()
            .iter()
            .copied()
            .chain(std::iter::once(grammar.unmatched()))
            .map(|rule| self.matcher.match_rule(stream, rule, pos))
            .find(LexerTree::absolute_match)
    }

    /// Matches a single rule at `offset`, whether or not it is a top-level candidate.
    pub fn tokenize_rule(&mut self, text: &str, id: &str, offset: usize) -> LexerTree {
        match self.grammar.lookup(id) {
            Some(rule) => self.matcher.match_rule(&CharStream::new(text), rule, offset),
            None => LexerTree::deferred(None, offset),
        }
    }
}

fn unmatched_char(grammar: &Grammar, stream: &CharStream, pos: usize) -> LexerTree {
    let end = stream.advance(pos);
    let mut value = String::new();
    stream.extend(&mut value, pos, end);

    let mut tree = LexerTree::new(Some(grammar.unmatched()), pos);
    tree.consume(value, end);
    tree.resolve();
    tree
}

use grit_grammar::{Grammar, RuleHandle};

use crate::{
    listener::Listener,
    matcher::Matcher,
    stream::{Stream, TokenSlice},
    token::TokenStream,
    tree::ParserTree,
};

/// Groups the tokens of a [`TokenStream`] using the top-level parser rules of a grammar.
pub struct Parser<'g> {
    grammar: &'g Grammar,
    matcher: Matcher<'g>,
}

impl<'g> Parser<'g> {
    pub fn new(grammar: &'g Grammar) -> Parser<'g> {
        Parser {
            grammar,
            matcher: Matcher::new(grammar),
        }
    }

    pub fn grammar(&self) -> &'g Grammar {
        self.grammar
    }

    pub fn parse(&mut self, stream: &TokenStream) -> ParserTree {
        self.parse_with(stream, &mut ())
    }

    /// Returns a tree of the grammar root whose children are the top-level matches in order.
    ///
    /// Tokens no rule starts at are reported to the listener and stepped over, so the cursor
    /// only ever moves forward.
    pub fn parse_with(&mut self, stream: &TokenStream, listener: &mut dyn Listener) -> ParserTree {
        let tokens = TokenSlice::new(stream.tokens());
        let mut root = ParserTree::new(Some(self.grammar.root()), 0);

        let mut pos = 0;
        while pos < tokens.end() {
            match self.match_candidates(&tokens, pos) {
                Some((rule, tree)) => {
                    for token in tree.tokens() {
                        token.set_parser_rule(rule);
                    }
                    listener.did_generate_tree(&tree);
                    pos = tree.end();
                    root.absorb(tree);
                }
                None => {
                    if let Some(token) = stream.get(pos) {
                        log::debug!("no parser rule matched at token {pos}: {token}");
                        listener.did_skip_token(token);
                    }
                    pos += 1;
                    root.extend_to(pos);
                }
            }
        }

        root.resolve();
        root
    }

    fn match_candidates(
        &mut self,
        tokens: &TokenSlice,
        pos: usize,
    ) -> Option<(RuleHandle, ParserTree)> {
        let grammar = self.grammar;
        grammar.parser_rules().iter().find_map(|&rule| {
            let tree = self.matcher.match_rule(tokens, rule, pos);
            tree.absolute_match().then_some((rule, tree))
        })
    }

    /// Matches a single rule at token index `offset`.
    pub fn parse_rule(&mut self, stream: &TokenStream, id: &str, offset: usize) -> ParserTree {
        match self.grammar.lookup(id) {
            Some(rule) => {
                self.matcher
                    .match_rule(&TokenSlice::new(stream.tokens()), rule, offset)
            }
            None => ParserTree::deferred(None, offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use grit_grammar::{Grammar, RuleDefinition};

    use super::*;
    use crate::{
        lexer::Lexer,
        listener::{Event, EventLog},
    };

    fn grammar(rules: &[(&str, &str)]) -> Grammar {
        Grammar::from_definitions(
            rules
                .iter()
                .map(|&(id, body)| RuleDefinition::new(id, body)),
        )
        .unwrap()
    }

    fn top_level(grammar: &Grammar, tree: &ParserTree) -> Vec<(String, String)> {
        tree.children()
            .iter()
            .map(|child| {
                let id = child.rule().unwrap().id(grammar).to_string();
                let text: Vec<_> = child.tokens().iter().map(|t| t.value()).collect();
                (id, text.join(" "))
            })
            .collect()
    }

    const ARITHMETIC: &[(&str, &str)] = &[
        ("NUM", "[0-9]+"),
        ("OP", "[-+*/]"),
        ("WS", "' '+ -> skip"),
        ("SEMI", "';'"),
        ("stmt", "expr SEMI"),
        ("expr", "NUM (OP NUM)*"),
    ];

    #[test]
    fn test_statements() {
        let g = grammar(ARITHMETIC);
        let stream = Lexer::new(&g).tokenize("1 + 2; 3;");
        let tree = Parser::new(&g).parse(&stream);

        assert!(tree.matches());
        assert_eq!(
            top_level(&g, &tree),
            vec![
                ("stmt".to_owned(), "1 + 2 ;".to_owned()),
                ("stmt".to_owned(), "3 ;".to_owned())
            ]
        );

        let stmt = g.lookup("stmt").unwrap();
        assert!(stream.iter().all(|t| t.parser_rule() == Some(stmt)));
        assert_eq!(tree.source_span().map(|s| (s.start(), s.end())), Some((0, 9)));
    }

    #[test]
    fn test_skipped_tokens() {
        let g = grammar(ARITHMETIC);
        let stream = Lexer::new(&g).tokenize("; 4 ; +");
        let mut log = EventLog::new();
        let tree = Parser::new(&g).parse_with(&stream, &mut log);

        let skipped: Vec<_> = log
            .iter()
            .filter_map(|event| match event {
                Event::SkippedToken(token) => Some(token.value().to_owned()),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![";", "+"]);
        assert_eq!(tree.children().len(), 1);
        assert_eq!((tree.start(), tree.end()), (0, stream.len()));
        assert!(stream.tokens()[0].parser_rule().is_none());
    }

    #[test]
    fn test_left_recursion_guard() {
        let g = grammar(&[
            ("NUM", "[0-9]+"),
            ("PLUS", "'+'"),
            ("sum", "sum PLUS NUM | NUM"),
        ]);
        assert!(g
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("left recursion")));

        let stream = Lexer::new(&g).tokenize("1+2");
        let tree = Parser::new(&g).parse(&stream);
        // the recursive alternative fails, every number matches on its own
        let texts: Vec<_> = top_level(&g, &tree).into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["1", "2"]);
    }

    #[test]
    fn test_literals_match_whole_tokens() {
        let g = grammar(&[("ID", "[a-z]+"), ("WS", "' ' -> skip"), ("kw", "'let' ID")]);
        let stream = Lexer::new(&g).tokenize("letter x let y");
        let tree = Parser::new(&g).parse(&stream);
        assert_eq!(
            top_level(&g, &tree),
            vec![("kw".to_owned(), "let y".to_owned())]
        );
    }

    #[test]
    fn test_inverted_token_reference() {
        let g = grammar(&[
            ("ID", "[a-z]+"),
            ("SEMI", "';'"),
            ("WS", "' ' -> skip"),
            ("stmt", "~SEMI+ SEMI"),
        ]);
        let stream = Lexer::new(&g).tokenize("a b c; d;");
        let tree = Parser::new(&g).parse(&stream);
        let texts: Vec<_> = top_level(&g, &tree).into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["a b c ;", "d ;"]);
    }

    #[test]
    fn test_parse_rule() {
        let g = grammar(ARITHMETIC);
        let stream = Lexer::new(&g).tokenize("; 1 + 2");
        let mut parser = Parser::new(&g);
        let tree = parser.parse_rule(&stream, "expr", 1);
        assert!(tree.absolute_match());
        assert_eq!(tree.tokens().len(), 3);
        assert!(!parser.parse_rule(&stream, "expr", 0).matches());
    }
}

//! Property-based tests for the lexer and parser passes
//!
//! Whatever the input and whatever the lexer rules, lexing has to cover the text without gaps or
//! overlaps and parsing has to move strictly forward through the tokens.

use grit_runtime::{
    grit_grammar::{Grammar, RuleDefinition},
    Lexer, Parser, SyntaxEngine,
};
use proptest::prelude::*;

fn arithmetic() -> Grammar {
    Grammar::from_definitions([
        RuleDefinition::new("NUM", "[0-9]+ ('.' [0-9]+)?"),
        RuleDefinition::new("ID", "[a-z_] [a-z0-9_]*"),
        RuleDefinition::new("OP", "[-+*/=]"),
        RuleDefinition::new("WS", "[ \\t\\n]+ -> skip"),
        RuleDefinition::new("BLOCK", "'{' ~'}'* '}'").option("retokenize"),
        RuleDefinition::new("assign", "ID '=' expr ';'"),
        RuleDefinition::new("expr", "term (OP term)*"),
        RuleDefinition::new("term", "NUM | ID | BLOCK"),
    ])
    .unwrap()
}

#[cfg(test)]
mod proptest_tests {
    use super::*;

    /// Text made mostly of things the grammar knows, with some noise in between
    fn source_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                // Numbers
                "[0-9]{1,4}(\\.[0-9]{1,2})?",
                // Identifiers
                "[a-z_][a-z0-9_]{0,5}",
                // Operators and statement ends
                "[-+*/=;]",
                // Whitespace
                "[ \\t\\n]{1,3}",
                // Blocks
                "\\{[a-z0-9 +]{0,6}\\}",
                // Anything else, including multibyte characters
                "[#@!é→]",
            ],
            0..24,
        )
        .prop_map(|parts| parts.concat())
    }

    /// Lexer rule bodies the generated grammars pick from
    const LEXER_BODIES: &[&str] = &[
        "[0-9]+",
        "[a-z_] [a-z0-9_]*",
        "[-+*/=;]",
        "[ \\t\\n]+",
        "'{' ~'}'* '}'",
        "~[a-z]+",
        "'a'*? 'b'",
        "[a-z]+$",
        "'x' (?!'y')",
        ".",
    ];

    /// Any subset of the lexer rules, including none at all, each one possibly skipped
    fn lexer_rules_strategy() -> impl Strategy<Value = Vec<RuleDefinition>> {
        let all: Vec<usize> = (0..LEXER_BODIES.len()).collect();
        (
            prop::sample::subsequence(all, 0..=LEXER_BODIES.len()),
            prop::collection::vec(any::<bool>(), LEXER_BODIES.len()),
        )
            .prop_map(|(picked, skipped)| {
                picked
                    .into_iter()
                    .map(|i| {
                        let rule = RuleDefinition::new(format!("R{i}"), LEXER_BODIES[i]);
                        match skipped[i] {
                            true => rule.option("skip"),
                            false => rule,
                        }
                    })
                    .collect()
            })
    }

    fn check_tiling(grammar: &Grammar, input: &str) -> Result<(), TestCaseError> {
        let stream = Lexer::new(grammar).tokenize(input);

        let mut expected_start = 0;
        for token in stream.all() {
            prop_assert_eq!(token.start(), expected_start);
            prop_assert!(token.end() > token.start());
            prop_assert_eq!(token.value(), &input[token.start()..token.end()]);
            expected_start = token.end();
        }
        prop_assert_eq!(expected_start, input.len());
        Ok(())
    }

    proptest! {
        #[test]
        fn test_tokens_and_trivia_tile_the_input(input in source_strategy()) {
            check_tiling(&arithmetic(), &input)?;
        }

        #[test]
        fn test_any_lexer_rules_tile_the_input(
            rules in lexer_rules_strategy(),
            input in source_strategy(),
        ) {
            let grammar = Grammar::from_definitions(rules).unwrap();
            check_tiling(&grammar, &input)?;
        }

        #[test]
        fn test_grammar_without_rules_tiles_the_input(input in source_strategy()) {
            let grammar = Grammar::from_definitions(Vec::<RuleDefinition>::new()).unwrap();
            check_tiling(&grammar, &input)?;
            let stream = Lexer::new(&grammar).tokenize(&input);
            prop_assert!(stream.tokens().iter().all(|t| t.lexer_id() == "UNMATCHED"));
        }

        #[test]
        fn test_skip_rules_alone_tile_the_input(input in source_strategy()) {
            let grammar = Grammar::from_definitions([
                RuleDefinition::new("WS", "[ \\t\\n]+").option("skip"),
                RuleDefinition::new("NUM", "[0-9]+").option("skip"),
            ])
            .unwrap();
            check_tiling(&grammar, &input)?;
            let stream = Lexer::new(&grammar).tokenize(&input);
            prop_assert!(stream.trivia().iter().all(|t| t.lexer_id() != "UNMATCHED"));
        }

        #[test]
        fn test_parse_moves_forward(input in source_strategy()) {
            let grammar = arithmetic();
            let stream = Lexer::new(&grammar).tokenize(&input);
            let tree = Parser::new(&grammar).parse(&stream);

            let mut previous_end = 0;
            for child in tree.children() {
                prop_assert!(child.start() >= previous_end);
                prop_assert!(child.end() > child.start());
                previous_end = child.end();
            }
            prop_assert_eq!(tree.end(), stream.len());
        }

        #[test]
        fn test_nested_blocks_stay_inside_their_token(input in source_strategy()) {
            let grammar = arithmetic();
            let block = SyntaxEngine::new(&grammar).process(&input);

            for nested in block.walk().into_iter().skip(1) {
                let end = nested.offset + nested.text().len();
                prop_assert_eq!(&input[nested.offset..end], nested.text());
                for token in &nested.tokens {
                    prop_assert!(token.start() >= nested.offset && token.end() <= end);
                }
            }
        }
    }
}

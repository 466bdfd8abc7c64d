//! Runs compiled grammars: one interpreter walks the rule tree over characters to produce tokens
//! and over tokens to produce syntax trees.

pub mod engine;
pub mod lexer;
pub mod listener;
pub mod matcher;
pub mod parser;
pub mod stream;
pub mod token;
pub mod tree;

pub use engine::{strip_delimiters, Block, EngineOptions, SyntaxEngine};
pub use lexer::Lexer;
pub use listener::{Event, EventLog, Listener};
pub use matcher::Matcher;
pub use parser::Parser;
pub use token::{Token, TokenStream};
pub use tree::{LexerTree, MatchState, ParserTree, SyntaxTree};

pub use grit_grammar;

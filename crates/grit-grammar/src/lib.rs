//! Grammar rules compiled from a compact EBNF-like notation into an arena of rule nodes.

pub mod check;
pub mod display;
pub mod error;
pub mod grammar;
pub mod literal;
pub mod loader;
pub mod quantifier;
pub mod rule;
pub mod span;

mod compile;
mod resolve;

pub use error::{CompileError, Diagnostic, ErrorAccumulator, Severity};
pub use grammar::{CompileOptions, Grammar, GrammarBuilder, RuleDefinition, RuleHandle};
pub use loader::{GrammarLoader, GrammarSource, LoadError, SearchPaths};
pub use quantifier::Quantifier;
pub use rule::{Command, ComponentKind, GrammarRule, RcString, RuleKind, RuleOptions};
pub use span::Span;

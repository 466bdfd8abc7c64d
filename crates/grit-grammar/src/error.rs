use std::{borrow::Cow, cell::RefCell, fmt::Display};

use thiserror::Error;

use crate::span::Span;

pub type Message = Cow<'static, str>;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Severity {
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

/// A problem found while building a grammar that did not stop the build.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Id of the rule the problem was found in, if any.
    pub rule: Option<String>,
    /// Offset into the rule body.
    pub span: Span,
    pub message: Message,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.rule {
            Some(rule) => write!(f, "{}: {rule}@{}: {}", self.severity, self.span, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[derive(Default, Debug)]
pub struct ErrorAccumulator {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn warning(&self, rule: Option<&str>, span: Span, message: impl Into<Message>) {
        self.push(Severity::Warning, rule, span, message.into());
    }
    pub fn error(&self, rule: Option<&str>, span: Span, message: impl Into<Message>) {
        self.push(Severity::Error, rule, span, message.into());
    }
    fn push(&self, severity: Severity, rule: Option<&str>, span: Span, message: Message) {
        let diagnostic = Diagnostic {
            severity,
            rule: rule.map(str::to_owned),
            span,
            message,
        };
        match severity {
            Severity::Warning => log::warn!("{diagnostic}"),
            Severity::Error => log::error!("{diagnostic}"),
        }
        self.diagnostics.borrow_mut().push(diagnostic);
    }
    pub fn get(&self) -> std::cell::Ref<'_, Vec<Diagnostic>> {
        self.diagnostics.borrow()
    }
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.borrow_mut())
    }
}

/// Failure to turn a rule definition or grammar document into rules.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unmatched parenthesis in rule `{rule}` at offset {offset}")]
    UnmatchedParenthesis { rule: String, offset: usize },
    #[error("unterminated literal in rule `{rule}` at offset {offset}")]
    UnterminatedLiteral { rule: String, offset: usize },
    #[error("unterminated character class in rule `{rule}` at offset {offset}")]
    UnterminatedClass { rule: String, offset: usize },
    #[error("invalid expression `{pattern}` in rule `{rule}`")]
    InvalidExpression {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("{message} in rule `{rule}` at offset {offset}")]
    Syntax {
        rule: String,
        offset: usize,
        message: &'static str,
    },
    #[error("rule `{rule}` has an empty definition")]
    EmptyRule { rule: String },
    #[error("rule `{rule}` recurses into itself without consuming input")]
    FatalRecursion { rule: String },
    #[error("grammar document is missing its `grammar <name>;` header")]
    MissingHeader,
    #[error("malformed declaration on line {line}: {message}")]
    MalformedDeclaration { line: usize, message: &'static str },
    #[error("invalid attributes for rule `{rule}`")]
    InvalidAttributes {
        rule: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CompileError {
    /// Recoverable errors only drop the offending rule, the rest of the grammar still builds.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CompileError::FatalRecursion { .. } | CompileError::EmptyRule { .. }
        )
    }

    /// Offset into the rule body the error points at, if it points anywhere.
    pub fn offset(&self) -> Option<usize> {
        match self {
            CompileError::UnmatchedParenthesis { offset, .. }
            | CompileError::UnterminatedLiteral { offset, .. }
            | CompileError::UnterminatedClass { offset, .. }
            | CompileError::Syntax { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

#[test]
fn test_accumulator() {
    let err = ErrorAccumulator::new();
    err.warning(Some("Num"), Span::new(1, 2), "Unknown option `loud`");
    err.error(None, Span::empty(), format!("{} went wrong", 2));
    assert_eq!(err.get()[0].to_string(), "warning: Num@1..2: Unknown option `loud`");
    assert_eq!(err.get()[1].severity, Severity::Error);
    assert_eq!(err.get()[1].to_string(), "error: 2 went wrong");

    let taken = err.take();
    assert_eq!(taken.len(), 2);
    assert!(err.get().is_empty());
}

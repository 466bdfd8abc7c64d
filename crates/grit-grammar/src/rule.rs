use std::{fmt::Display, rc::Rc};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{error::ErrorAccumulator, grammar::RuleHandle, quantifier::Quantifier, span::Span};

pub type RcString = Rc<str>;

/// What a single rule node stands for.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ComponentKind {
    Atom,
    /// Ordered alternatives, the head of each alternative is in `children`.
    Composite,
    Expression,
    Literal,
    LexerRule,
    LexerFragment,
    ParserRule,
}

impl ComponentKind {
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            ComponentKind::LexerRule | ComponentKind::LexerFragment | ComponentKind::ParserRule
        )
    }
    pub fn is_pattern(self) -> bool {
        matches!(self, ComponentKind::Expression | ComponentKind::Literal)
    }
}

impl Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ComponentKind::Atom => "Atom",
            ComponentKind::Composite => "Composite",
            ComponentKind::Expression => "Expression",
            ComponentKind::Literal => "Literal",
            ComponentKind::LexerRule => "LexerRule",
            ComponentKind::LexerFragment => "LexerFragment",
            ComponentKind::ParserRule => "ParserRule",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RuleKind {
    LexerRule,
    LexerFragment,
    ParserRule,
    Unknown,
}

impl RuleKind {
    /// Uppercase-leading ids name lexer rules, everything else is a parser rule.
    pub fn from_id(id: &str) -> RuleKind {
        match id.chars().next() {
            Some(c) if c.is_uppercase() => RuleKind::LexerRule,
            _ => RuleKind::ParserRule,
        }
    }
    pub fn is_lexer(self) -> bool {
        matches!(self, RuleKind::LexerRule | RuleKind::LexerFragment)
    }
    pub fn is_parser(self) -> bool {
        matches!(self, RuleKind::ParserRule)
    }
}

impl Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleKind::LexerRule => "lexer",
            RuleKind::LexerFragment => "fragment",
            RuleKind::ParserRule => "parser",
            RuleKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct RuleOptions {
    /// Consume the match without emitting a token.
    pub skip: bool,
    /// Never tried as a top-level candidate.
    pub omit: bool,
    /// Tokens of this rule are lexed and parsed again without their delimiters.
    pub retokenize: bool,
    /// Only usable from other lexer rules.
    pub fragment: bool,
    /// Options without a built-in meaning, kept for the embedding application.
    pub extra: Vec<RcString>,
}

impl RuleOptions {
    pub fn from_tags<S: AsRef<str>>(
        kind: RuleKind,
        rule: &str,
        tags: &[S],
        err: &ErrorAccumulator,
    ) -> RuleOptions {
        let mut result = RuleOptions::default();

        for tag in tags {
            let tag = tag.as_ref();
            let set = |field: &mut bool| match field {
                true => err.warning(Some(rule), Span::empty(), format!("Duplicate option `{tag}`")),
                false => *field = true,
            };
            let expect_lexer = || {
                if !kind.is_lexer() {
                    err.warning(
                        Some(rule),
                        Span::empty(),
                        format!("Option `{tag}` is not supported in {kind} rules"),
                    )
                }
            };

            match tag {
                "skip" => {
                    set(&mut result.skip);
                    expect_lexer();
                }
                "retokenize" => {
                    set(&mut result.retokenize);
                    expect_lexer();
                }
                "fragment" => {
                    set(&mut result.fragment);
                    expect_lexer();
                }
                "omit" => set(&mut result.omit),
                "" => {}
                other => {
                    err.warning(Some(rule), Span::empty(), format!("Unknown option `{other}`"));
                    result.extra.push(other.into());
                }
            }
        }

        result
    }

    pub fn contains(&self, name: &str) -> bool {
        match name {
            "skip" => self.skip,
            "omit" => self.omit,
            "retokenize" => self.retokenize,
            "fragment" => self.fragment,
            other => self.extra.iter().any(|e| &**e == other),
        }
    }

    pub fn tags(&self) -> Vec<RcString> {
        let flags = [
            (self.skip, "skip"),
            (self.omit, "omit"),
            (self.retokenize, "retokenize"),
            (self.fragment, "fragment"),
        ];
        flags
            .into_iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| RcString::from(name))
            .chain(self.extra.iter().cloned())
            .collect()
    }
}

static COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\w+)\s*(?:\((.*?)\))?\s*$").expect("command pattern"));

/// Post-match action attached to a rule with `-> name(params)`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Command {
    pub name: RcString,
    pub parameters: Vec<RcString>,
}

impl Command {
    pub fn parse(src: &str) -> Option<Command> {
        let captures = COMMAND.captures(src)?;
        let name = captures.get(1)?.as_str().into();
        let parameters = match captures.get(2) {
            Some(params) => params
                .as_str()
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(RcString::from)
                .collect(),
            None => Vec::new(),
        };
        Some(Command { name, parameters })
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "-> {}", self.name)?;
        if !self.parameters.is_empty() {
            write!(f, "({})", self.parameters.join(", "))?;
        }
        Ok(())
    }
}

/// Compiled form of a literal or expression atom.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: RcString,
    prefix: Regex,
    exact: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Pattern, regex::Error> {
        Ok(Pattern {
            source: source.into(),
            prefix: Regex::new(&format!("^(?:{source})"))?,
            exact: Regex::new(&format!("^(?:{source})$"))?,
        })
    }
    /// Regex body the pattern was built from.
    pub fn source(&self) -> &str {
        &self.source
    }
    /// Length of the non-empty match at the very start of `text`.
    pub fn match_prefix(&self, text: &str) -> Option<usize> {
        self.prefix
            .find(text)
            .map(|m| m.end())
            .filter(|&len| len > 0)
    }
    pub fn is_exact(&self, text: &str) -> bool {
        self.exact.is_match(text)
    }
}

/// One node of the rule tree.
///
/// A top-level rule is a [`ComponentKind::Composite`] whose `children` are the heads of its
/// alternatives, every alternative continues through `next`.
#[derive(Clone, Debug)]
pub struct GrammarRule {
    pub id: RcString,
    pub value: RcString,
    pub component_kind: ComponentKind,
    pub rule_kind: RuleKind,
    pub inverted: bool,
    /// A `$`-suffixed expression, the repetition has to end where the text does.
    pub anchored_end: bool,
    /// A `(?!...)` group, matches nothing where its alternatives fail and fails elsewhere.
    pub lookahead: bool,
    pub order: i64,
    pub categories: Vec<RcString>,
    pub options: RuleOptions,
    pub command: Option<Command>,
    pub quantifier: Quantifier,
    pub children: Vec<RuleHandle>,
    pub next: Option<RuleHandle>,
    pub prev: Option<RuleHandle>,
    pub root_ancestor: Option<RuleHandle>,
    pub pattern: Option<Pattern>,
    /// Rule a reference atom resolved to.
    pub target: Option<RuleHandle>,
}

impl GrammarRule {
    pub const DEFAULT_ORDER: i64 = i64::MAX;

    pub fn new(id: RcString, component_kind: ComponentKind, rule_kind: RuleKind) -> GrammarRule {
        GrammarRule {
            value: id.clone(),
            id,
            component_kind,
            rule_kind,
            inverted: false,
            anchored_end: false,
            lookahead: false,
            order: Self::DEFAULT_ORDER,
            categories: Vec::new(),
            options: RuleOptions::default(),
            command: None,
            quantifier: Quantifier::ONCE,
            children: Vec::new(),
            next: None,
            prev: None,
            root_ancestor: None,
            pattern: None,
            target: None,
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.root_ancestor.is_none()
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| &**c == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_kind_from_id() {
        assert_eq!(RuleKind::from_id("Number"), RuleKind::LexerRule);
        assert_eq!(RuleKind::from_id("expr"), RuleKind::ParserRule);
        assert_eq!(RuleKind::from_id("_hidden"), RuleKind::ParserRule);
        assert!(RuleKind::LexerFragment.is_lexer());
        assert!(!RuleKind::Unknown.is_parser());
    }

    #[test]
    fn test_options() {
        let err = ErrorAccumulator::new();
        let options =
            RuleOptions::from_tags(RuleKind::LexerRule, "WS", &["skip", "loud", "skip"], &err);
        assert!(options.skip);
        assert!(options.contains("loud"));
        assert!(!options.contains("omit"));
        assert_eq!(options.tags(), vec![RcString::from("skip"), RcString::from("loud")]);
        // unknown option and the duplicate
        assert_eq!(err.get().len(), 2);

        let err = ErrorAccumulator::new();
        let options = RuleOptions::from_tags(RuleKind::ParserRule, "stmt", &["retokenize"], &err);
        assert!(options.retokenize);
        assert!(err.get()[0].message.contains("not supported in parser rules"));
    }

    #[test]
    fn test_command() {
        let command = Command::parse(" emit ( a, b ,c) ").unwrap();
        assert_eq!(&*command.name, "emit");
        assert_eq!(command.parameters.len(), 3);
        assert_eq!(command.to_string(), "-> emit(a, b, c)");

        let bare = Command::parse("skip").unwrap();
        assert!(bare.parameters.is_empty());
        assert!(Command::parse("not a command").is_none());
    }

    #[test]
    fn test_pattern() {
        let pattern = Pattern::new("[0-9]+").unwrap();
        assert_eq!(pattern.match_prefix("12a"), Some(2));
        assert_eq!(pattern.match_prefix("a12"), None);
        assert!(pattern.is_exact("123"));
        assert!(!pattern.is_exact("12a"));

        let alternation = Pattern::new("a|ab").unwrap();
        assert!(alternation.is_exact("ab"));
    }
}

use std::{fmt::Display, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum QuantifierKind {
    Once,
    ZeroOrMore,
    OneOrMore,
    Optional,
    Range,
}

/// How many times a rule occurrence may repeat.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Quantifier {
    kind: QuantifierKind,
    min: usize,
    max: usize,
    lazy: bool,
}

static RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{\s*(\d+)?\s*(?:(,)\s*(\d+)?)?\s*\}(\?)?").expect("range quantifier pattern")
});

impl Quantifier {
    pub const UNBOUNDED: usize = usize::MAX;
    /// Upper bound of `{n,}` when no other cap is configured.
    pub const DEFAULT_OPEN_RANGE_CAP: usize = Self::UNBOUNDED;

    pub const ONCE: Quantifier = Quantifier::new(QuantifierKind::Once, 1, 1, false);
    pub const ZERO_OR_MORE: Quantifier =
        Quantifier::new(QuantifierKind::ZeroOrMore, 0, Self::UNBOUNDED, false);
    pub const ZERO_OR_MORE_LAZY: Quantifier =
        Quantifier::new(QuantifierKind::ZeroOrMore, 0, Self::UNBOUNDED, true);
    pub const ONE_OR_MORE: Quantifier =
        Quantifier::new(QuantifierKind::OneOrMore, 1, Self::UNBOUNDED, false);
    pub const ONE_OR_MORE_LAZY: Quantifier =
        Quantifier::new(QuantifierKind::OneOrMore, 1, Self::UNBOUNDED, true);
    pub const OPTIONAL: Quantifier = Quantifier::new(QuantifierKind::Optional, 0, 1, false);
    pub const OPTIONAL_LAZY: Quantifier = Quantifier::new(QuantifierKind::Optional, 0, 1, true);

    const fn new(kind: QuantifierKind, min: usize, max: usize, lazy: bool) -> Quantifier {
        Quantifier {
            kind,
            min,
            max,
            lazy,
        }
    }

    /// Returns `None` when `min > max`.
    pub const fn range(min: usize, max: usize, lazy: bool) -> Option<Quantifier> {
        if min > max {
            return None;
        }
        Some(Quantifier::new(QuantifierKind::Range, min, max, lazy))
    }

    pub fn kind(self) -> QuantifierKind {
        self.kind
    }
    pub fn min(self) -> usize {
        self.min
    }
    pub fn max(self) -> usize {
        self.max
    }
    pub fn is_optional(self) -> bool {
        self.min == 0
    }
    pub fn is_greedy(self) -> bool {
        self.min < self.max
    }
    pub fn is_lazy(self) -> bool {
        self.lazy
    }
    pub fn is_once(self) -> bool {
        self.min == 1 && self.max == 1
    }
    pub fn meets(self, count: usize) -> bool {
        self.min <= count && count <= self.max
    }

    /// Parses a quantifier at the start of `src`, returning it along with the number of bytes it took.
    pub fn parse(src: &str) -> Option<(Quantifier, usize)> {
        Self::parse_with_cap(src, Self::DEFAULT_OPEN_RANGE_CAP)
    }

    /// Like [`Quantifier::parse`], `open_range_cap` is used as the maximum of `{n,}`.
    pub fn parse_with_cap(src: &str, open_range_cap: usize) -> Option<(Quantifier, usize)> {
        let bytes = src.as_bytes();
        let lazy = bytes.get(1) == Some(&b'?');
        let symbol = |q: Quantifier, lazy_q: Quantifier| match lazy {
            true => Some((lazy_q, 2)),
            false => Some((q, 1)),
        };

        match bytes.first()? {
            b'*' => symbol(Self::ZERO_OR_MORE, Self::ZERO_OR_MORE_LAZY),
            b'+' => symbol(Self::ONE_OR_MORE, Self::ONE_OR_MORE_LAZY),
            b'?' => symbol(Self::OPTIONAL, Self::OPTIONAL_LAZY),
            b'{' => {
                let captures = RANGE.captures(src)?;
                let number = |i: usize| captures.get(i).map(|m| m.as_str().parse::<usize>());

                let min = match number(1) {
                    Some(parsed) => parsed.ok()?,
                    None => 0,
                };
                let has_comma = captures.get(2).is_some();
                if captures.get(1).is_none() && !has_comma {
                    // `{}`
                    return None;
                }
                let max = match (has_comma, number(3)) {
                    (false, _) => min,
                    (true, Some(parsed)) => parsed.ok()?,
                    (true, None) => open_range_cap.max(min),
                };
                let lazy = captures.get(4).is_some();
                let consumed = captures.get(0)?.end();
                Some((Self::range(min, max, lazy)?, consumed))
            }
            _ => None,
        }
    }
}

impl Default for Quantifier {
    fn default() -> Self {
        Self::ONCE
    }
}

impl Display for Quantifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            QuantifierKind::Once => return Ok(()),
            QuantifierKind::ZeroOrMore => f.write_str("*")?,
            QuantifierKind::OneOrMore => f.write_str("+")?,
            QuantifierKind::Optional => f.write_str("?")?,
            QuantifierKind::Range if self.min == self.max => write!(f, "{{{}}}", self.min)?,
            QuantifierKind::Range if self.max == Self::UNBOUNDED => write!(f, "{{{},}}", self.min)?,
            QuantifierKind::Range => write!(f, "{{{},{}}}", self.min, self.max)?,
        }
        if self.lazy {
            f.write_str("?")?;
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("invalid quantifier `{0}`")]
pub struct ParseQuantifierError(String);

impl FromStr for Quantifier {
    type Err = ParseQuantifierError;

    /// Parses the whole string, the empty string is [`Quantifier::ONCE`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::ONCE);
        }
        match Self::parse(s) {
            Some((quantifier, consumed)) if consumed == s.len() => Ok(quantifier),
            _ => Err(ParseQuantifierError(s.to_owned())),
        }
    }
}

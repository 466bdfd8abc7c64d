use crate::{error::ErrorAccumulator, span::Span};

#[derive(Clone)]
struct Chars<'a> {
    src: &'a str,
    inner: std::str::CharIndices<'a>,
}

impl<'a> Chars<'a> {
    fn new(src: &'a str) -> Chars<'a> {
        Self {
            src,
            inner: src.char_indices(),
        }
    }

    fn next(&mut self) -> Option<char> {
        self.inner.next().map(|(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.inner
            .clone()
            .next()
            .map(|(i, _)| i)
            .unwrap_or(self.src.len())
    }
}

/// Resolves escapes in the text between the quotes of a literal.
///
/// `body_offset` is where the text starts in the rule body, it is only used for diagnostics.
pub fn unescape_literal(
    src: &str,
    rule: &str,
    body_offset: usize,
    err: &ErrorAccumulator,
) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = Chars::new(src);

    loop {
        match chars.next() {
            Some('\\') => {
                let at = body_offset + chars.offset();
                let escaped = match chars.next() {
                    Some('\\') => '\\',
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('0') => '\0',
                    Some('\'') => '\'',
                    Some('"') => '"',
                    Some(c) => {
                        err.warning(
                            Some(rule),
                            Span::new(at, at + c.len_utf8()),
                            format!("Unknown character escape '{}'", c.escape_default()),
                        );
                        out.push('\\');
                        c
                    }
                    None => '\\',
                };
                out.push(escaped);
            }
            Some(normal) => out.push(normal),
            None => break,
        }
    }

    out
}

/// Finds the byte offset of the quote closing a literal whose opening quote is at `start`.
pub fn find_closing_quote(src: &[u8], start: usize) -> Option<usize> {
    debug_assert_eq!(src.get(start), Some(&b'\''));
    let mut i = start + 1;
    while let Some(&b) = src.get(i) {
        match b {
            b'\\' => i += 2,
            b'\'' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape() {
        let err = ErrorAccumulator::new();
        assert_eq!(unescape_literal(r"a\nb\t\\\'", "R", 0, &err), "a\nb\t\\'");
        assert!(err.get().is_empty());

        assert_eq!(unescape_literal(r"x\qy", "R", 4, &err), r"x\qy");
        let diagnostics = err.get();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].span, Span::new(6, 7));
    }

    #[test]
    fn test_closing_quote() {
        assert_eq!(find_closing_quote(br"'abc' x", 0), Some(4));
        assert_eq!(find_closing_quote(br"x '\'' y", 2), Some(5));
        assert_eq!(find_closing_quote(br"'abc", 0), None);
    }
}

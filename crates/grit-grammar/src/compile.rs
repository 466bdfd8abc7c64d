use std::collections::VecDeque;

use cranelift_entity::EntityRef;

use crate::{
    error::{CompileError, ErrorAccumulator},
    grammar::RuleHandle,
    literal::{find_closing_quote, unescape_literal},
    quantifier::Quantifier,
    rule::{Command, ComponentKind, GrammarRule, Pattern, RcString, RuleKind},
};

/// Nodes of one freshly compiled rule, not yet part of any grammar.
///
/// Handles are already final: the first node gets `base`, the rest follow in order.
pub(crate) struct CompiledRule {
    base: usize,
    pub(crate) nodes: Vec<GrammarRule>,
    pub(crate) command: Option<Command>,
}

impl CompiledRule {
    pub fn root(&self) -> RuleHandle {
        RuleHandle::new(self.base)
    }
    pub fn get(&self, handle: RuleHandle) -> Option<&GrammarRule> {
        let index = handle.index().checked_sub(self.base)?;
        self.nodes.get(index)
    }
}

/// Compiles the body of rule `id` into nodes numbered from `base`.
pub(crate) fn compile_rule(
    id: &RcString,
    kind: RuleKind,
    body: &str,
    base: RuleHandle,
    open_range_cap: usize,
    err: &ErrorAccumulator,
) -> Result<CompiledRule, CompileError> {
    let mut cx = RuleCompiler {
        id: id.clone(),
        kind,
        src: body,
        base: base.index(),
        nodes: Vec::new(),
        open_range_cap,
        err,
    };

    let (expression_end, command) = cx.split_body()?;
    if body[..expression_end].trim().is_empty() {
        return Err(CompileError::EmptyRule {
            rule: id.to_string(),
        });
    }

    let root = cx.alloc(ComponentKind::Composite);
    cx.compile_composite(root, 0, expression_end)?;

    Ok(CompiledRule {
        base: cx.base,
        nodes: cx.nodes,
        command,
    })
}

struct RuleCompiler<'a> {
    id: RcString,
    kind: RuleKind,
    src: &'a str,
    base: usize,
    nodes: Vec<GrammarRule>,
    open_range_cap: usize,
    err: &'a ErrorAccumulator,
}

type CompileResult<T> = Result<T, CompileError>;

impl<'a> RuleCompiler<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn syntax(&self, offset: usize, message: &'static str) -> CompileError {
        CompileError::Syntax {
            rule: self.id.to_string(),
            offset,
            message,
        }
    }

    fn alloc(&mut self, component_kind: ComponentKind) -> RuleHandle {
        let handle = RuleHandle::new(self.base + self.nodes.len());
        let mut rule = GrammarRule::new(self.id.clone(), component_kind, self.kind);
        if !self.nodes.is_empty() {
            rule.root_ancestor = Some(RuleHandle::new(self.base));
        }
        self.nodes.push(rule);
        handle
    }

    fn node(&mut self, handle: RuleHandle) -> &mut GrammarRule {
        &mut self.nodes[handle.index() - self.base]
    }

    fn skip_whitespace(&self, mut pos: usize, end: usize) -> usize {
        while pos < end && self.bytes()[pos].is_ascii_whitespace() {
            pos += 1;
        }
        pos
    }

    /// Returns the offset just past the literal starting at `pos`.
    fn skip_quoted(&self, pos: usize, end: usize) -> CompileResult<usize> {
        match find_closing_quote(self.bytes(), pos) {
            Some(close) if close < end => Ok(close + 1),
            _ => Err(CompileError::UnterminatedLiteral {
                rule: self.id.to_string(),
                offset: pos,
            }),
        }
    }

    /// Returns the offset just past the character class starting at `pos`.
    fn skip_class(&self, pos: usize, end: usize) -> CompileResult<usize> {
        let bytes = self.bytes();
        let mut i = pos + 1;
        if bytes.get(i) == Some(&b'^') {
            i += 1;
        }
        // a leading `]` is part of the class
        if bytes.get(i) == Some(&b']') {
            i += 1;
        }

        let mut depth = 0usize;
        while i < end {
            match bytes[i] {
                b'\\' => i += 1,
                b'[' => depth += 1,
                b']' if depth == 0 => return Ok(i + 1),
                b']' => depth -= 1,
                _ => {}
            }
            i += 1;
        }

        Err(CompileError::UnterminatedClass {
            rule: self.id.to_string(),
            offset: pos,
        })
    }

    /// Finds the first offset outside of literals, classes and groups that satisfies `pred`.
    fn find_top_level(
        &self,
        start: usize,
        end: usize,
        pred: impl Fn(usize) -> bool,
    ) -> CompileResult<Option<usize>> {
        let bytes = self.bytes();
        let mut depth = 0usize;
        let mut i = start;
        while i < end {
            match bytes[i] {
                b'\'' => {
                    i = self.skip_quoted(i, end)?;
                    continue;
                }
                b'[' => {
                    i = self.skip_class(i, end)?;
                    continue;
                }
                b'\\' => i += 1,
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ if depth == 0 && pred(i) => return Ok(Some(i)),
                _ => {}
            }
            i += 1;
        }
        Ok(None)
    }

    /// Splits off the `;` terminator and the `-> command` suffix.
    fn split_body(&self) -> CompileResult<(usize, Option<Command>)> {
        let bytes = self.bytes();
        let len = self.src.len();

        let mut end = len;
        if let Some(semicolon) = self.find_top_level(0, len, |i| bytes[i] == b';')? {
            let rest = self.skip_whitespace(semicolon + 1, len);
            if rest < len {
                return Err(self.syntax(rest, "Unexpected input after `;`"));
            }
            end = semicolon;
        }

        let arrow = self.find_top_level(0, end, |i| {
            bytes[i] == b'-' && bytes.get(i + 1) == Some(&b'>')
        })?;

        match arrow {
            Some(arrow) => {
                let command = Command::parse(&self.src[arrow + 2..end])
                    .ok_or_else(|| self.syntax(arrow, "Malformed command"))?;
                Ok((arrow, Some(command)))
            }
            None => Ok((end, None)),
        }
    }

    /// Compiles `start..end` as ordered alternatives of `composite`.
    fn compile_composite(
        &mut self,
        composite: RuleHandle,
        start: usize,
        end: usize,
    ) -> CompileResult<()> {
        // Alternatives split off while compiling a sequence wait here until
        // the current one is done, which keeps them in declaration order.
        let mut pending = VecDeque::from([start]);

        while let Some(at) = pending.pop_front() {
            let (head, branch) = self.compile_sequence(at, end)?;
            let Some(head) = head else {
                return Err(self.syntax(at, "Empty alternative"));
            };
            self.node(composite).children.push(head);
            if let Some(branch) = branch {
                pending.push_back(branch);
            }
        }

        Ok(())
    }

    /// Compiles atoms up to the next top-level `|`, chaining them through `next`/`prev`.
    ///
    /// Returns the head of the chain and the start of the following alternative, if any.
    fn compile_sequence(
        &mut self,
        start: usize,
        end: usize,
    ) -> CompileResult<(Option<RuleHandle>, Option<usize>)> {
        let mut pos = start;
        let mut head = None;
        let mut prev: Option<RuleHandle> = None;

        loop {
            pos = self.skip_whitespace(pos, end);
            if pos >= end {
                return Ok((head, None));
            }
            if self.bytes()[pos] == b'|' {
                return Ok((head, Some(pos + 1)));
            }

            let (atom, after) = self.compile_atom(pos, end)?;
            match prev {
                Some(prev) => {
                    self.node(prev).next = Some(atom);
                    self.node(atom).prev = Some(prev);
                }
                None => head = Some(atom),
            }
            prev = Some(atom);
            pos = after;
        }
    }

    fn compile_atom(&mut self, start: usize, end: usize) -> CompileResult<(RuleHandle, usize)> {
        let bytes = self.bytes();

        let mut pos = start;
        let inverted = bytes[pos] == b'~';
        if inverted {
            pos = self.skip_whitespace(pos + 1, end);
            if pos >= end {
                return Err(self.syntax(start, "Expected an atom after `~`"));
            }
        }

        let (handle, after) = match bytes[pos] {
            b'\'' => self.compile_literal(pos, end)?,
            b'^' | b'[' | b'.' => self.compile_expression_atom(pos, end)?,
            b'(' if self.src[pos..end].starts_with("(?!") => {
                if inverted {
                    return Err(self.syntax(start, "A lookahead cannot be inverted"));
                }
                self.compile_lookahead(pos, end)?
            }
            b'(' => self.compile_group(pos, end)?,
            b')' => {
                return Err(CompileError::UnmatchedParenthesis {
                    rule: self.id.to_string(),
                    offset: pos,
                })
            }
            b if b.is_ascii_alphabetic() || b == b'_' => self.compile_reference(pos, end),
            _ => return Err(self.syntax(pos, "Unexpected character")),
        };

        self.node(handle).inverted = inverted;
        let mut after = self.compile_quantifier(handle, after, end)?;

        // `[a-z]+$` anchors the whole repetition, same as `[a-z]$+`
        let node = self.node(handle);
        if node.component_kind == ComponentKind::Expression
            && !node.anchored_end
            && after < end
            && bytes[after] == b'$'
        {
            node.anchored_end = true;
            node.value = format!("{}$", node.value).into();
            after += 1;
        }
        Ok((handle, after))
    }

    /// `[...]` or `.`, optionally preceded by `^` and followed by `$`.
    ///
    /// Patterns are only ever tried at the cursor, so `^` always holds there. `$` is checked
    /// by the interpreter once the repetition is done.
    fn compile_expression_atom(
        &mut self,
        start: usize,
        end: usize,
    ) -> CompileResult<(RuleHandle, usize)> {
        let src = self.src;
        let bytes = self.bytes();

        let anchored_start = bytes[start] == b'^';
        let pos = if anchored_start { start + 1 } else { start };
        let (body, mut after) = match bytes.get(pos) {
            Some(b'[') if pos < end => {
                let close = self.skip_class(pos, end)?;
                (&src[pos..close], close)
            }
            Some(b'.') if pos < end => ("(?s:.)", pos + 1),
            _ => return Err(self.syntax(start, "Expected `[` or `.` after `^`")),
        };

        let anchored_end = after < end && bytes[after] == b'$';
        if anchored_end {
            after += 1;
        }

        let source = match anchored_start {
            true => format!("^{body}"),
            false => body.to_owned(),
        };
        let handle = self.compile_expression(&src[start..after], &source)?;
        self.node(handle).anchored_end = anchored_end;
        Ok((handle, after))
    }

    fn compile_quantifier(
        &mut self,
        handle: RuleHandle,
        pos: usize,
        end: usize,
    ) -> CompileResult<usize> {
        if pos >= end || !matches!(self.bytes()[pos], b'*' | b'+' | b'?' | b'{') {
            return Ok(pos);
        }
        match Quantifier::parse_with_cap(&self.src[pos..end], self.open_range_cap) {
            Some((quantifier, consumed)) => {
                self.node(handle).quantifier = quantifier;
                Ok(pos + consumed)
            }
            None => Err(self.syntax(pos, "Invalid quantifier")),
        }
    }

    fn compile_expression(&mut self, value: &str, source: &str) -> CompileResult<RuleHandle> {
        let pattern = Pattern::new(source).map_err(|e| CompileError::InvalidExpression {
            rule: self.id.to_string(),
            pattern: source.to_owned(),
            source: e,
        })?;
        let handle = self.alloc(ComponentKind::Expression);
        let node = self.node(handle);
        node.value = value.into();
        node.pattern = Some(pattern);
        Ok(handle)
    }

    /// `'text'` or a character range `'a'..'z'`.
    fn compile_literal(&mut self, pos: usize, end: usize) -> CompileResult<(RuleHandle, usize)> {
        let close = self.skip_quoted(pos, end)? - 1;
        let text = unescape_literal(&self.src[pos + 1..close], &self.id, pos + 1, self.err);
        if text.is_empty() {
            return Err(self.syntax(pos, "Empty literal"));
        }

        let mut after = close + 1;
        let look = self.skip_whitespace(after, end);
        let source = if self.src[look..end].starts_with("..") {
            let second = self.skip_whitespace(look + 2, end);
            if second >= end || self.bytes()[second] != b'\'' {
                return Err(self.syntax(second, "Expected a literal after `..`"));
            }
            let second_close = self.skip_quoted(second, end)? - 1;
            let upper = unescape_literal(
                &self.src[second + 1..second_close],
                &self.id,
                second + 1,
                self.err,
            );
            after = second_close + 1;

            let (Some(lo), Some(hi)) = (single_char(&text), single_char(&upper)) else {
                return Err(self.syntax(pos, "Character range bounds must be single characters"));
            };
            format!(
                "[{}-{}]",
                regex::escape(&lo.to_string()),
                regex::escape(&hi.to_string())
            )
        } else {
            regex::escape(&text)
        };

        let pattern = Pattern::new(&source).map_err(|e| CompileError::InvalidExpression {
            rule: self.id.to_string(),
            pattern: source.clone(),
            source: e,
        })?;
        let handle = self.alloc(ComponentKind::Literal);
        let value: RcString = self.src[pos..after].into();
        let node = self.node(handle);
        node.value = value;
        node.pattern = Some(pattern);
        Ok((handle, after))
    }

    fn closing_paren(&self, pos: usize, end: usize) -> CompileResult<usize> {
        let bytes = self.bytes();
        let mut depth = 0usize;
        let mut i = pos;
        while i < end {
            match bytes[i] {
                b'\'' => {
                    i = self.skip_quoted(i, end)?;
                    continue;
                }
                b'[' => {
                    i = self.skip_class(i, end)?;
                    continue;
                }
                b'\\' => i += 1,
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Err(CompileError::UnmatchedParenthesis {
            rule: self.id.to_string(),
            offset: pos,
        })
    }

    fn compile_group(&mut self, pos: usize, end: usize) -> CompileResult<(RuleHandle, usize)> {
        let close = self.closing_paren(pos, end)?;
        let inner = pos + 1;
        if self.src[inner..close].trim().is_empty() {
            return Err(self.syntax(pos, "Empty group"));
        }

        let handle = self.alloc(ComponentKind::Composite);
        let value: RcString = self.src[inner..close].trim().into();
        self.node(handle).value = value;
        self.compile_composite(handle, inner, close)?;
        Ok((handle, close + 1))
    }

    /// `(?! ... )`, a group that has to fail at the cursor and never consumes.
    fn compile_lookahead(&mut self, pos: usize, end: usize) -> CompileResult<(RuleHandle, usize)> {
        let close = self.closing_paren(pos, end)?;
        let inner = pos + 3;
        if self.src[inner..close].trim().is_empty() {
            return Err(self.syntax(pos, "Empty lookahead"));
        }

        let handle = self.alloc(ComponentKind::Composite);
        let value: RcString = self.src[inner..close].trim().into();
        let node = self.node(handle);
        node.value = value;
        node.lookahead = true;
        self.compile_composite(handle, inner, close)?;
        Ok((handle, close + 1))
    }

    fn compile_reference(&mut self, pos: usize, end: usize) -> (RuleHandle, usize) {
        let bytes = self.bytes();
        let mut after = pos;
        while after < end && (bytes[after].is_ascii_alphanumeric() || bytes[after] == b'_') {
            after += 1;
        }

        let src = self.src;
        let name = &src[pos..after];
        let component_kind = match RuleKind::from_id(name) {
            RuleKind::LexerRule => ComponentKind::LexerRule,
            _ => ComponentKind::ParserRule,
        };
        let handle = self.alloc(component_kind);
        self.node(handle).value = name.into();
        (handle, after)
    }
}

fn single_char(text: &str) -> Option<char> {
    let mut chars = text.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(body: &str) -> Result<CompiledRule, CompileError> {
        let err = ErrorAccumulator::new();
        compile_rule(
            &RcString::from("rule"),
            RuleKind::ParserRule,
            body,
            RuleHandle::new(0),
            Quantifier::DEFAULT_OPEN_RANGE_CAP,
            &err,
        )
    }

    fn alternatives(compiled: &CompiledRule, composite: RuleHandle) -> Vec<Vec<String>> {
        let composite = compiled.get(composite).unwrap();
        composite
            .children
            .iter()
            .map(|&head| {
                let mut chain = Vec::new();
                let mut current = Some(head);
                while let Some(handle) = current {
                    let node = compiled.get(handle).unwrap();
                    chain.push(format!("{}{}", node.value, node.quantifier));
                    current = node.next;
                }
                chain
            })
            .collect()
    }

    #[test]
    fn test_sequence_and_alternatives() {
        let compiled = compile("'a' B* | c? ('d' | 'e')+ | [0-9]").unwrap();
        assert_eq!(
            alternatives(&compiled, compiled.root()),
            vec![
                vec!["'a'".to_owned(), "B*".to_owned()],
                vec!["c?".to_owned(), "'d' | 'e'+".to_owned()],
                vec!["[0-9]".to_owned()],
            ]
        );
    }

    #[test]
    fn test_links() {
        let compiled = compile("a b c").unwrap();
        let root = compiled.get(compiled.root()).unwrap();
        assert!(root.root_ancestor.is_none());

        let a = root.children[0];
        let b = compiled.get(a).unwrap().next.unwrap();
        let c = compiled.get(b).unwrap().next.unwrap();
        assert_eq!(compiled.get(b).unwrap().prev, Some(a));
        assert_eq!(compiled.get(c).unwrap().prev, Some(b));
        assert_eq!(compiled.get(c).unwrap().next, None);
        assert_eq!(compiled.get(c).unwrap().root_ancestor, Some(compiled.root()));
    }

    #[test]
    fn test_group_alternatives_stay_in_order() {
        let compiled = compile("('x' | 'y') 'z' | 'w'").unwrap();
        let alts = alternatives(&compiled, compiled.root());
        assert_eq!(alts.len(), 2);
        assert_eq!(alts[1], vec!["'w'".to_owned()]);

        let group = compiled.get(compiled.root()).unwrap().children[0];
        assert_eq!(
            alternatives(&compiled, group),
            vec![vec!["'x'".to_owned()], vec!["'y'".to_owned()]]
        );
    }

    #[test]
    fn test_atom_kinds() {
        let compiled = compile("~'q' . [a-z] 'a'..'f' Num expr").unwrap();
        let kinds: Vec<_> = compiled.nodes.iter().skip(1).map(|n| n.component_kind).collect();
        assert_eq!(
            kinds,
            vec![
                ComponentKind::Literal,
                ComponentKind::Expression,
                ComponentKind::Expression,
                ComponentKind::Literal,
                ComponentKind::LexerRule,
                ComponentKind::ParserRule,
            ]
        );
        assert!(compiled.nodes[1].inverted);

        let range = compiled.nodes[4].pattern.as_ref().unwrap();
        assert_eq!(range.match_prefix("c"), Some(1));
        assert_eq!(range.match_prefix("g"), None);

        let dot = compiled.nodes[2].pattern.as_ref().unwrap();
        assert_eq!(dot.match_prefix("\n"), Some(1));
    }

    #[test]
    fn test_anchored_expressions() {
        for (body, value, anchored_end) in [
            ("^[a-z]+", "^[a-z]", false),
            ("[a-z]+$", "[a-z]$", true),
            ("[a-z]$+", "[a-z]$", true),
            ("^.", "^.", false),
            (".$", ".$", true),
        ] {
            let compiled = compile(body).unwrap();
            let atom = &compiled.nodes[1];
            assert_eq!(atom.component_kind, ComponentKind::Expression, "{body}");
            assert_eq!(&*atom.value, value, "{body}");
            assert_eq!(atom.anchored_end, anchored_end, "{body}");
        }

        let compiled = compile("^[a-z]").unwrap();
        let pattern = compiled.nodes[1].pattern.as_ref().unwrap();
        assert_eq!(pattern.match_prefix("ab"), Some(1));

        assert!(matches!(
            compile("^'a'"),
            Err(CompileError::Syntax {
                message: "Expected `[` or `.` after `^`",
                ..
            })
        ));
        assert!(matches!(
            compile("'a'$"),
            Err(CompileError::Syntax {
                message: "Unexpected character",
                ..
            })
        ));
    }

    #[test]
    fn test_lookahead() {
        let compiled = compile("'a' (?!'b' | 'c') .").unwrap();
        let alts = alternatives(&compiled, compiled.root());
        assert_eq!(alts[0].len(), 3);

        let lookahead = &compiled.nodes[2];
        assert!(lookahead.lookahead);
        assert_eq!(lookahead.component_kind, ComponentKind::Composite);
        assert_eq!(&*lookahead.value, "'b' | 'c'");
        assert_eq!(alternatives(&compiled, RuleHandle::new(2)).len(), 2);

        assert!(matches!(
            compile("~(?!'a')"),
            Err(CompileError::Syntax {
                message: "A lookahead cannot be inverted",
                ..
            })
        ));
        assert!(matches!(
            compile("(?! )"),
            Err(CompileError::Syntax {
                message: "Empty lookahead",
                ..
            })
        ));
    }

    #[test]
    fn test_literal_with_parens_and_bars() {
        let compiled = compile("'(' ( ')' | '|' ) ';'").unwrap();
        let alts = alternatives(&compiled, compiled.root());
        assert_eq!(alts.len(), 1);
        assert_eq!(alts[0].len(), 3);
    }

    #[test]
    fn test_command() {
        let compiled = compile("'a'+ -> push(mode, 2) ;").unwrap();
        let command = compiled.command.unwrap();
        assert_eq!(&*command.name, "push");
        assert_eq!(command.parameters.len(), 2);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            compile("('a' 'b'"),
            Err(CompileError::UnmatchedParenthesis { offset: 0, .. })
        ));
        assert!(matches!(
            compile("'a' )"),
            Err(CompileError::UnmatchedParenthesis { offset: 4, .. })
        ));
        assert!(matches!(
            compile("'abc"),
            Err(CompileError::UnterminatedLiteral { .. })
        ));
        assert!(matches!(
            compile("[a-z"),
            Err(CompileError::UnterminatedClass { .. })
        ));
        assert!(matches!(compile("   "), Err(CompileError::EmptyRule { .. })));
        assert!(matches!(
            compile("'a' |"),
            Err(CompileError::Syntax {
                message: "Empty alternative",
                ..
            })
        ));
        assert!(matches!(
            compile("'a'{5,1}"),
            Err(CompileError::Syntax {
                message: "Invalid quantifier",
                ..
            })
        ));
        assert!(matches!(
            compile("[z-a]"),
            Err(CompileError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn test_open_range_cap() {
        let err = ErrorAccumulator::new();
        let compiled = compile_rule(
            &RcString::from("R"),
            RuleKind::LexerRule,
            "'a'{2,}",
            RuleHandle::new(0),
            9,
            &err,
        )
        .unwrap();
        let atom = &compiled.nodes[1];
        assert_eq!((atom.quantifier.min(), atom.quantifier.max()), (2, 9));
    }
}

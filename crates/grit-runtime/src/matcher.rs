use grit_grammar::{ComponentKind, Grammar, GrammarRule, RuleHandle};

use crate::{
    stream::{Reference, Stream},
    tree::SyntaxTree,
};

/// Walks the rule tree of a grammar against a [`Stream`].
///
/// The same interpreter runs the lexer over characters and the parser over tokens, only the
/// stream decides what a unit is and how leaves are tested.
pub struct Matcher<'g> {
    grammar: &'g Grammar,
    /// References being matched, a rule entered again at the same position fails instead of
    /// recursing forever.
    active: Vec<(RuleHandle, usize)>,
    /// `next` of every chain step being matched, innermost last. Together they are what has to
    /// follow the current position, lazy repetitions stop once it does.
    pending: Vec<Option<RuleHandle>>,
}

impl<'g> Matcher<'g> {
    pub fn new(grammar: &'g Grammar) -> Matcher<'g> {
        Matcher {
            grammar,
            active: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn grammar(&self) -> &'g Grammar {
        self.grammar
    }

    /// Matches `rule` and its `next` chain at `pos`.
    pub fn match_rule<S: Stream>(
        &mut self,
        stream: &S,
        rule: RuleHandle,
        pos: usize,
    ) -> SyntaxTree<S::Buffer> {
        if self.grammar.get_rule(rule).is_none() {
            return SyntaxTree::deferred(None, pos);
        }
        if pos >= stream.end() {
            return SyntaxTree::deferred(Some(rule), pos);
        }
        if self.active.contains(&(rule, pos)) {
            log::trace!(
                "rule `{}` re-entered at {pos} without consuming input",
                rule.id(self.grammar)
            );
            return SyntaxTree::deferred(Some(rule), pos);
        }

        self.active.push((rule, pos));
        let tree = self.match_chain(stream, rule, pos);
        self.active.pop();
        tree
    }

    /// Each step of the chain continues where the previous one ended, the whole chain has to match.
    fn match_chain<S: Stream>(
        &mut self,
        stream: &S,
        head: RuleHandle,
        pos: usize,
    ) -> SyntaxTree<S::Buffer> {
        let grammar = self.grammar;

        let mut tree = SyntaxTree::new(Some(head), pos);
        let mut current = Some(head);
        while let Some(handle) = current {
            self.pending.push(grammar.rule(handle).next);
            let step = self.repeat(stream, handle, tree.end());
            self.pending.pop();
            if !step.matches() {
                tree.defer();
                return tree;
            }

            current = grammar.rule(handle).next;
            // a chain of one step is the step itself
            if current.is_none() && tree.children().is_empty() {
                return step;
            }
            tree.absorb(step);
        }

        tree.resolve();
        tree
    }

    fn repeat<S: Stream>(
        &mut self,
        stream: &S,
        handle: RuleHandle,
        pos: usize,
    ) -> SyntaxTree<S::Buffer> {
        let grammar = self.grammar;
        let rule = grammar.rule(handle);
        let quantifier = rule.quantifier;

        if rule.lookahead {
            // zero width, so it is checked once even at the end of input
            return match self.attempt(stream, handle, pos) {
                Some(tree) => tree,
                None if quantifier.is_optional() => leaf(stream, handle, pos, pos),
                None => SyntaxTree::deferred(Some(handle), pos),
            };
        }

        let accepts = |count: usize, end: usize| {
            quantifier.meets(count) && (!rule.anchored_end || stream.ends_anchor(end))
        };

        let mut step = SyntaxTree::new(Some(handle), pos);
        let mut count = 0;
        while count < quantifier.max() && step.end() < stream.end() {
            if quantifier.is_lazy()
                && accepts(count, step.end())
                && self.continuation_matches(stream, step.end())
            {
                break;
            }

            let Some(progress) = self.attempt(stream, handle, step.end()) else {
                break;
            };
            let empty = progress.is_empty();
            step.merge(progress);
            count += 1;

            if empty {
                // matching nothing again would not change anything
                count = count.max(quantifier.min());
                break;
            }
        }

        match accepts(count, step.end()) {
            true => step.resolve(),
            false => step.defer(),
        }
        step
    }

    /// Whether everything still pending matches from `pos` on, each part after the one before.
    fn continuation_matches<S: Stream>(&mut self, stream: &S, mut pos: usize) -> bool {
        let pending = std::mem::take(&mut self.pending);
        let mut satisfied = true;
        for (depth, next) in pending.iter().enumerate().rev() {
            let Some(next) = *next else {
                continue;
            };
            // a part is followed only by what encloses it
            self.pending = pending[..depth].to_vec();
            let tree = self.match_chain(stream, next, pos);
            if !tree.matches() {
                satisfied = false;
                break;
            }
            pos = tree.end();
        }
        self.pending = pending;
        satisfied
    }

    /// One repetition of `handle`, inversion applied.
    fn attempt<S: Stream>(
        &mut self,
        stream: &S,
        handle: RuleHandle,
        pos: usize,
    ) -> Option<SyntaxTree<S::Buffer>> {
        let grammar = self.grammar;
        let rule = grammar.rule(handle);
        if rule.lookahead {
            return match self.condition(stream, handle, rule, pos) {
                Some(_) => None,
                None => Some(leaf(stream, handle, pos, pos)),
            };
        }
        if !rule.inverted {
            return self.condition(stream, handle, rule, pos);
        }

        match self.condition(stream, handle, rule, pos) {
            Some(tree) if !tree.is_empty() => None,
            _ => {
                let end = stream.advance(pos);
                (end > pos).then(|| leaf(stream, handle, pos, end))
            }
        }
    }

    fn condition<S: Stream>(
        &mut self,
        stream: &S,
        handle: RuleHandle,
        rule: &'g GrammarRule,
        pos: usize,
    ) -> Option<SyntaxTree<S::Buffer>> {
        let grammar = self.grammar;
        match rule.component_kind {
            ComponentKind::Literal | ComponentKind::Expression => {
                let end = stream.match_pattern(rule.pattern.as_ref()?, pos)?;
                Some(leaf(stream, handle, pos, end))
            }
            ComponentKind::LexerRule | ComponentKind::LexerFragment | ComponentKind::ParserRule => {
                let target = rule.target?;
                match stream.reference(grammar.rule(target), pos) {
                    Reference::Unit(true) => Some(leaf(stream, handle, pos, stream.advance(pos))),
                    Reference::Unit(false) => None,
                    Reference::Recurse => {
                        let tree = self.match_rule(stream, target, pos);
                        tree.matches().then_some(tree)
                    }
                }
            }
            ComponentKind::Composite | ComponentKind::Atom => {
                // ordered choice, an alternative matching nothing is only taken if none consumes
                let mut fallback = None;
                for &alternative in &rule.children {
                    let tree = self.match_chain(stream, alternative, pos);
                    if tree.absolute_match() {
                        return Some(tree);
                    }
                    if tree.matches() && fallback.is_none() {
                        fallback = Some(tree);
                    }
                }
                fallback
            }
        }
    }
}

fn leaf<S: Stream>(stream: &S, handle: RuleHandle, from: usize, to: usize) -> SyntaxTree<S::Buffer> {
    let mut units = S::Buffer::default();
    stream.extend(&mut units, from, to);

    let mut tree = SyntaxTree::new(Some(handle), from);
    tree.consume(units, to);
    tree.resolve();
    tree
}

#[cfg(test)]
mod tests {
    use grit_grammar::{Grammar, RuleDefinition};

    use super::*;
    use crate::{stream::CharStream, tree::LexerTree};

    fn grammar(rules: &[(&str, &str)]) -> Grammar {
        Grammar::from_definitions(
            rules
                .iter()
                .map(|&(id, body)| RuleDefinition::new(id, body)),
        )
        .unwrap()
    }

    fn run(grammar: &Grammar, id: &str, text: &str) -> LexerTree {
        let rule = grammar.lookup(id).unwrap();
        Matcher::new(grammar).match_rule(&CharStream::new(text), rule, 0)
    }

    fn matched<'a>(grammar: &Grammar, id: &str, text: &'a str) -> Option<&'a str> {
        let tree = run(grammar, id, text);
        tree.matches().then(|| &text[..tree.end()])
    }

    #[test]
    fn test_inverted_repetition() {
        let g = grammar(&[("R", "~'a'*")]);
        assert_eq!(matched(&g, "R", "bbbaXX"), Some("bbb"));
        let tree = run(&g, "R", "bbbaXX");
        assert_eq!(tree.value(), "bbb");
        // zero repetitions are fine for `*`
        assert_eq!(matched(&g, "R", "abc"), Some(""));
    }

    #[test]
    fn test_inverted_group() {
        let g = grammar(&[("R", "~('a' | 'b')+")]);
        assert_eq!(matched(&g, "R", "xyzab"), Some("xyz"));
        assert_eq!(matched(&g, "R", "ab"), None);
    }

    #[test]
    fn test_ordered_choice() {
        let g = grammar(&[("R", "'a' | 'ab'"), ("S", "'ab' | 'a'")]);
        assert_eq!(matched(&g, "R", "ab"), Some("a"));
        assert_eq!(matched(&g, "S", "ab"), Some("ab"));
    }

    #[test]
    fn test_group_continuation() {
        let g = grammar(&[("R", "('a' | 'b')+ 'c'")]);
        assert_eq!(matched(&g, "R", "abbcd"), Some("abbc"));
        assert_eq!(matched(&g, "R", "abb"), None);
    }

    #[test]
    fn test_range_quantifier() {
        let g = grammar(&[("R", "'a'{2,3}")]);
        assert_eq!(matched(&g, "R", "aaaa"), Some("aaa"));
        assert_eq!(matched(&g, "R", "aab"), Some("aa"));
        assert_eq!(matched(&g, "R", "ab"), None);
    }

    #[test]
    fn test_lazy_stops_at_continuation() {
        let g = grammar(&[("R", "'a'*? 'a' 'b'?"), ("S", "'x'+?")]);
        assert_eq!(matched(&g, "R", "aaa"), Some("a"));
        // nothing follows, stop at the minimum
        assert_eq!(matched(&g, "S", "xxx"), Some("x"));
    }

    #[test]
    fn test_lazy_looks_past_its_group() {
        let g = grammar(&[
            ("G", "('a'*?) 'b'"),
            ("R", "A 'b'"),
            ("A", "'a'*?"),
            ("C", "'/*' .*? '*/'"),
        ]);
        assert_eq!(matched(&g, "G", "aab"), Some("aab"));
        assert_eq!(matched(&g, "R", "aabb"), Some("aab"));
        assert_eq!(matched(&g, "C", "/* x */ y */"), Some("/* x */"));
        // on its own the rule still stops as early as it can
        assert_eq!(matched(&g, "A", "aaa"), Some(""));
    }

    #[test]
    fn test_anchored_expressions() {
        let g = grammar(&[
            ("TAIL", "[a-z]+$"),
            ("HEAD", "^[a-z]+"),
            ("FIRST", "^."),
            ("LAST", ".$"),
            ("LAZY", "[a-z]+?$"),
        ]);
        assert_eq!(matched(&g, "TAIL", "abc"), Some("abc"));
        assert_eq!(matched(&g, "TAIL", "abc1"), None);
        assert_eq!(matched(&g, "HEAD", "abc1"), Some("abc"));
        assert_eq!(matched(&g, "FIRST", "xy"), Some("x"));
        assert_eq!(matched(&g, "LAST", "x"), Some("x"));
        assert_eq!(matched(&g, "LAST", "xy"), None);
        assert_eq!(matched(&g, "LAZY", "abc"), Some("abc"));
    }

    #[test]
    fn test_lookahead() {
        let g = grammar(&[
            ("KW", "'if' (?![a-z0-9_])"),
            ("ID", "(?!'if' ' ') [a-z]+"),
        ]);
        assert_eq!(matched(&g, "KW", "if x"), Some("if"));
        assert_eq!(matched(&g, "KW", "iffy"), None);
        // nothing left to look at is not a match of the inner group
        assert_eq!(matched(&g, "KW", "if"), Some("if"));
        assert_eq!(matched(&g, "ID", "iffy"), Some("iffy"));
        assert_eq!(matched(&g, "ID", "if x"), None);

        let tree = run(&g, "KW", "if x");
        assert_eq!(tree.value(), "if");
    }

    #[test]
    fn test_optional_at_end_of_input() {
        let g = grammar(&[("R", "'a' 'b'? 'c'*")]);
        assert_eq!(matched(&g, "R", "a"), Some("a"));
        assert_eq!(matched(&g, "R", "abcc"), Some("abcc"));
    }

    #[test]
    fn test_fragments_and_references() {
        let g = Grammar::from_definitions([
            RuleDefinition::new("DIGIT", "[0-9]").option("fragment"),
            RuleDefinition::new("NUM", "DIGIT+ ('.' DIGIT+)?"),
        ])
        .unwrap();
        assert_eq!(matched(&g, "NUM", "12.5x"), Some("12.5"));
        assert_eq!(matched(&g, "NUM", "12.x"), Some("12"));
    }

    #[test]
    fn test_left_recursion_terminates() {
        let g = grammar(&[("A", "A 'x' | 'y'")]);
        assert_eq!(matched(&g, "A", "yx"), Some("y"));
    }

    #[test]
    fn test_unresolved_cases() {
        let g = grammar(&[("R", "'a'"), ("S", "MISSING 'a'")]);
        let rule = g.lookup("R").unwrap();
        let mut matcher = Matcher::new(&g);

        let tree: LexerTree = matcher.match_rule(&CharStream::new("a"), rule, 1);
        assert!(!tree.matches());
        assert!(tree.is_empty());

        assert_eq!(matched(&g, "S", "a"), None);
    }

    #[test]
    fn test_tree_mirrors_rules() {
        let g = grammar(&[("R", "'a' ('b' | 'c')")]);
        let tree = run(&g, "R", "ac");
        assert!(tree.absolute_match());
        assert_eq!(tree.rule(), g.lookup("R"));

        // umbrella -> alternative chain -> [literal, group]
        let chain = &tree.children()[0];
        assert_eq!(chain.children().len(), 2);
        assert_eq!(chain.children()[1].value(), "c");
        assert_eq!(chain.children()[1].span().start(), 1);
    }
}

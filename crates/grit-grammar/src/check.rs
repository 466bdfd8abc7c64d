use cranelift_entity::{EntitySet, SecondaryMap};

use crate::{
    compile::CompiledRule,
    error::ErrorAccumulator,
    grammar::{Grammar, RuleHandle},
    rule::{ComponentKind, GrammarRule},
    span::Span,
};

/// Whether every alternative of a freshly compiled rule is nothing but a call to itself.
///
/// Such a rule can never consume input, groups whose alternatives are all such calls count too.
pub(crate) fn is_fatally_recursive(rule: &CompiledRule) -> bool {
    let Some(root) = rule.get(rule.root()) else {
        return false;
    };
    let id = root.id.clone();

    fn only_self_calls(rule: &CompiledRule, handle: RuleHandle, id: &str) -> bool {
        let Some(composite) = rule.get(handle) else {
            return false;
        };
        !composite.children.is_empty()
            && composite.children.iter().all(|&alternative| {
                let Some(node) = rule.get(alternative) else {
                    return false;
                };
                if node.next.is_some() || node.inverted {
                    return false;
                }
                match node.component_kind {
                    kind if kind.is_reference() => &*node.value == id,
                    ComponentKind::Composite => only_self_calls(rule, alternative, id),
                    _ => false,
                }
            })
    }

    only_self_calls(rule, rule.root(), &id)
}

/// Warns about rules that can reach themselves without consuming any input.
///
/// Matching still terminates because the interpreter refuses to re-enter a rule at the same
/// position, but such a rule can never match through its recursive alternative.
pub fn check_left_recursion(grammar: &Grammar, err: &ErrorAccumulator) {
    let mut prefix_rules: SecondaryMap<RuleHandle, Vec<RuleHandle>> = SecondaryMap::new();
    let mut nullable = Nullable::default();

    for (handle, _) in grammar.top_level() {
        let mut rules = Vec::new();
        collect_prefix_rules(grammar, handle, &mut nullable, &mut rules);
        prefix_rules[handle] = rules;
    }

    let mut visited = EntitySet::new();
    let mut reported = EntitySet::new();
    let mut stack = Vec::new();
    for (handle, _) in grammar.top_level() {
        find_prefix_cycles(
            handle,
            &prefix_rules,
            &mut visited,
            &mut reported,
            &mut stack,
            grammar,
            err,
        );
    }
}

/// Collects the rules referenced by the chain starting at `handle` before it is guaranteed to
/// have consumed input, returns whether it is guaranteed to.
fn collect_prefix_rules(
    grammar: &Grammar,
    handle: RuleHandle,
    nullable: &mut Nullable,
    rules: &mut Vec<RuleHandle>,
) -> bool {
    let mut current = Some(handle);
    while let Some(handle) = current {
        let Some(node) = grammar.get_rule(handle) else {
            return false;
        };

        let advances = match node.component_kind {
            ComponentKind::Composite | ComponentKind::Atom => {
                let mut all = !node.children.is_empty();
                for &child in &node.children {
                    all &= collect_prefix_rules(grammar, child, nullable, rules);
                }
                (all || node.inverted) && !node.lookahead
            }
            kind if kind.is_reference() => match node.target {
                Some(target) => {
                    if !rules.contains(&target) {
                        rules.push(target);
                    }
                    node.inverted || !nullable.rule(grammar, target)
                }
                None => true,
            },
            _ => true,
        };

        if advances && !node.quantifier.is_optional() {
            return true;
        }
        current = node.next;
    }
    false
}

/// Remembers which top-level rules can match without consuming input.
#[derive(Default)]
struct Nullable {
    known: SecondaryMap<RuleHandle, Option<bool>>,
}

impl Nullable {
    fn rule(&mut self, grammar: &Grammar, handle: RuleHandle) -> bool {
        if let Some(known) = self.known[handle] {
            return known;
        }
        // a rule reached again while it is being answered is taken to consume
        self.known[handle] = Some(false);
        let nullable = self.chain(grammar, handle);
        self.known[handle] = Some(nullable);
        nullable
    }

    fn chain(&mut self, grammar: &Grammar, handle: RuleHandle) -> bool {
        let mut current = Some(handle);
        while let Some(handle) = current {
            let Some(node) = grammar.get_rule(handle) else {
                return false;
            };
            if !node.quantifier.is_optional() && !self.node(grammar, node) {
                return false;
            }
            current = node.next;
        }
        true
    }

    fn node(&mut self, grammar: &Grammar, node: &GrammarRule) -> bool {
        if node.lookahead {
            return true;
        }
        if node.inverted {
            return false;
        }
        match node.component_kind {
            ComponentKind::Composite | ComponentKind::Atom => node
                .children
                .iter()
                .any(|&alternative| self.chain(grammar, alternative)),
            kind if kind.is_reference() => node
                .target
                .is_some_and(|target| self.rule(grammar, target)),
            _ => false,
        }
    }
}

fn find_prefix_cycles(
    handle: RuleHandle,

    prefix_rules: &SecondaryMap<RuleHandle, Vec<RuleHandle>>,
    visited: &mut EntitySet<RuleHandle>,
    reported: &mut EntitySet<RuleHandle>,
    stack: &mut Vec<RuleHandle>,

    grammar: &Grammar,
    err: &ErrorAccumulator,
) {
    if let Some(pos) = stack.iter().position(|&rule| rule == handle) {
        //      /pos
        // A -> B -> C -> D
        //      ↑________|
        if !reported.contains(handle) {
            reported.insert(handle);
            let path = stack[pos..]
                .iter()
                .chain(std::iter::once(&handle))
                .map(|&h| h.id(grammar).to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            err.warning(
                Some(&**handle.id(grammar)),
                Span::empty(),
                format!("Detected left recursion: {path}"),
            );
        }
        return;
    }

    if visited.contains(handle) {
        return;
    }
    visited.insert(handle);

    stack.push(handle);
    for &next in &prefix_rules[handle] {
        find_prefix_cycles(next, prefix_rules, visited, reported, stack, grammar, err);
    }
    stack.pop();
}

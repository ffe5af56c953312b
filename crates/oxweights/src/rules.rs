//! Declarative reordering of archive entries.
//!
//! Source ecosystems serialize layers in their own traversal order (batch norm before
//! or after its convolution, shortcut branch first or last). A rule table per model
//! family relocates individual entries so the flattened list lines up with the target
//! model's canonical variable order.

use std::fmt;
use std::ops::Range;

use glob::Pattern;
use tracing::debug;

use crate::error::{Result, ZooError};
use crate::weights::Named;

/// How a rule finds the entry it moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// First entry with exactly this name.
    Name(String),
    /// The single entry whose name matches a glob pattern.
    Pattern(Pattern),
}

impl Anchor {
    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(Anchor::Pattern(Pattern::new(pattern)?))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Anchor::Name(name) => name,
            Anchor::Pattern(pattern) => pattern.as_str(),
        }
    }

    fn locate<T: Named>(&self, items: &[T]) -> Result<usize> {
        match self {
            Anchor::Name(name) => items
                .iter()
                .position(|item| item.name() == name.as_str())
                .ok_or_else(|| ZooError::MissingAnchor(name.clone())),
            Anchor::Pattern(pattern) => {
                let mut hits = items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| pattern.matches(item.name()))
                    .map(|(i, _)| i);
                let first = hits
                    .next()
                    .ok_or_else(|| ZooError::MissingAnchor(pattern.as_str().to_string()))?;
                let extra = hits.count();
                if extra > 0 {
                    return Err(ZooError::AmbiguousAnchor {
                        anchor: pattern.as_str().to_string(),
                        matches: extra + 1,
                    });
                }
                Ok(first)
            }
        }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Move the anchored entry by `offset` positions (negative moves it earlier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRule {
    pub anchor: Anchor,
    pub offset: isize,
}

impl MoveRule {
    pub fn new(name: impl Into<String>, offset: isize) -> Self {
        Self {
            anchor: Anchor::Name(name.into()),
            offset,
        }
    }

    pub fn matching(pattern: &str, offset: isize) -> Result<Self> {
        Ok(Self {
            anchor: Anchor::pattern(pattern)?,
            offset,
        })
    }

    pub fn with_offset(mut self, offset: isize) -> Self {
        self.offset = offset;
        self
    }
}

/// Rule patterns repeated over a block index range.
///
/// Each pattern may contain `{i}`, replaced by every index in turn. Expansion is
/// index-major: all patterns for the first index, then all for the next.
#[derive(Debug, Clone)]
pub struct RuleTemplate {
    indices: Range<usize>,
    patterns: Vec<(String, isize)>,
}

impl RuleTemplate {
    pub fn new(indices: Range<usize>) -> Self {
        Self {
            indices,
            patterns: Vec::new(),
        }
    }

    pub fn rule(mut self, pattern: impl Into<String>, offset: isize) -> Self {
        self.patterns.push((pattern.into(), offset));
        self
    }

    pub fn expand(&self) -> Vec<MoveRule> {
        self.indices
            .clone()
            .flat_map(|i| {
                self.patterns
                    .iter()
                    .map(move |(pattern, offset)| {
                        MoveRule::new(pattern.replace("{i}", &i.to_string()), *offset)
                    })
            })
            .collect()
    }
}

/// Apply `rules` in order, each against the list as left by the previous one.
///
/// A destination outside the list is a broken rule table and fails the whole call;
/// nothing is clamped.
pub fn apply<T: Named>(mut items: Vec<T>, rules: &[MoveRule]) -> Result<Vec<T>> {
    for rule in rules {
        let from = rule.anchor.locate(&items)?;
        let to = from as isize + rule.offset;
        if to < 0 || to as usize >= items.len() {
            return Err(ZooError::MoveOutOfRange {
                anchor: rule.anchor.to_string(),
                from,
                to,
                len: items.len(),
            });
        }
        let item = items.remove(from);
        items.insert(to as usize, item);
        debug!("moved \"{}\" from {from} to {to}", rule.anchor);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(items: &[&'static str]) -> Vec<&'static str> {
        items.to_vec()
    }

    #[test]
    fn moves_entry_earlier() {
        let out = apply(names(&["a", "b", "c", "d"]), &[MoveRule::new("d", -2)]).unwrap();
        assert_eq!(out, ["a", "d", "b", "c"]);
    }

    #[test]
    fn moves_entry_later() {
        let out = apply(names(&["a", "b", "c", "d"]), &[MoveRule::new("a", 3)]).unwrap();
        assert_eq!(out, ["b", "c", "d", "a"]);
    }

    #[test]
    fn rules_see_the_current_order() {
        // The second rule is written against the list after the first has run.
        let rules = [MoveRule::new("c", -2), MoveRule::new("a", 1)];
        let out = apply(names(&["a", "b", "c"]), &rules).unwrap();
        assert_eq!(out, ["c", "b", "a"]);
    }

    #[test]
    fn out_of_range_is_fatal() {
        let err = apply(names(&["a", "b"]), &[MoveRule::new("a", -1)]).unwrap_err();
        assert!(matches!(err, ZooError::MoveOutOfRange { from: 0, to: -1, len: 2, .. }));

        let err = apply(names(&["a", "b"]), &[MoveRule::new("b", 1)]).unwrap_err();
        assert!(matches!(err, ZooError::MoveOutOfRange { from: 1, to: 2, .. }));
    }

    #[test]
    fn missing_anchor_is_fatal() {
        let err = apply(names(&["a"]), &[MoveRule::new("z", 0)]).unwrap_err();
        assert!(matches!(err, ZooError::MissingAnchor(ref a) if a == "z"));
    }

    #[test]
    fn pattern_anchor_must_be_unique() {
        let rule = MoveRule::matching("*.bias", -1).unwrap();
        let out = apply(names(&["x.weight", "x.bias"]), std::slice::from_ref(&rule)).unwrap();
        assert_eq!(out, ["x.bias", "x.weight"]);

        let err = apply(names(&["x.bias", "y.bias"]), &[rule]).unwrap_err();
        assert!(matches!(err, ZooError::AmbiguousAnchor { matches: 2, .. }));
    }

    #[test]
    fn same_anchor_twice_applies_both_moves() {
        let rules = [MoveRule::new("a", 2), MoveRule::new("a", -1)];
        let out = apply(names(&["a", "b", "c"]), &rules).unwrap();
        assert_eq!(out, ["b", "a", "c"]);
    }

    #[test]
    fn template_expands_index_major() {
        let rules = RuleTemplate::new(2..4)
            .rule("bn{i}a_branch2c", -1)
            .rule("res{i}a_branch1", -6)
            .expand();
        let flat: Vec<_> = rules.iter().map(|r| (r.anchor.as_str(), r.offset)).collect();
        assert_eq!(
            flat,
            [
                ("bn2a_branch2c", -1),
                ("res2a_branch1", -6),
                ("bn3a_branch2c", -1),
                ("res3a_branch1", -6),
            ]
        );
    }

    #[test]
    fn empty_rules_are_identity() {
        let out = apply(names(&["a", "b"]), &[]).unwrap();
        assert_eq!(out, ["a", "b"]);
    }

    proptest! {
        #[test]
        fn move_then_move_back_is_identity(
            len in 2usize..40,
            picks in prop::collection::vec((0usize..1000, -50isize..50), 1..8),
        ) {
            let original: Vec<String> = (0..len).map(|i| format!("w{i}")).collect();
            let mut rules = Vec::new();
            let mut state = original.clone();
            for (pick, shift) in picks {
                let from = pick % len;
                let to = (from as isize + shift).clamp(0, len as isize - 1);
                let rule = MoveRule::new(state[from].clone(), to - from as isize);
                state = apply(state, std::slice::from_ref(&rule)).unwrap();
                rules.push(rule);
            }
            // Undo in reverse order: each entry now sits at its destination.
            let undo: Vec<MoveRule> = rules
                .iter()
                .rev()
                .map(|r| r.clone().with_offset(-r.offset))
                .collect();
            rules.extend(undo);
            prop_assert_eq!(apply(original.clone(), &rules).unwrap(), original);
        }
    }
}

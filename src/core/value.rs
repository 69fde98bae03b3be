//! State values: the user-facing shape of a configuration.
//!
//! A [`StateValue`] is either a leaf identifier or a mapping from child
//! region name to a nested value. Equality is structural. Values are what
//! callers pattern-match against; the interpreter works internally on the
//! canonical [`StateTree`](crate::core::tree::StateTree) form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A leaf state name or a mapping from region key to nested value.
///
/// # Example
///
/// ```rust
/// use lattice::StateValue;
///
/// let leaf: StateValue = "green".into();
/// assert_eq!(leaf, StateValue::Leaf("green".to_string()));
///
/// // Dotted shorthand nests from the left.
/// let nested: StateValue = "traffic.green".into();
/// assert_eq!(nested.to_strings("."), vec!["traffic", "traffic.green"]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// An atomic or final state, named by its key among its siblings.
    Leaf(String),
    /// A compound or parallel state: one entry per active child region.
    Branch(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// A leaf value.
    pub fn leaf(key: impl Into<String>) -> Self {
        StateValue::Leaf(key.into())
    }

    /// A branch value from `(key, child)` pairs.
    pub fn branch<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<StateValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        StateValue::Branch(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Parse a dotted path: `"a.b.c"` becomes `{a: {b: "c"}}`.
    pub fn parse(path: &str) -> Self {
        let mut segments = path.split('.').rev();
        let Some(last) = segments.next() else {
            return StateValue::Leaf(String::new());
        };
        let mut value = StateValue::Leaf(last.to_string());
        for segment in segments {
            let mut map = BTreeMap::new();
            map.insert(segment.to_string(), value);
            value = StateValue::Branch(map);
        }
        value
    }

    /// Every path from the root to every active node, joined by `delim`.
    /// Includes intermediate nodes, so `{a: "b"}` yields `["a", "a.b"]`.
    pub fn to_strings(&self, delim: &str) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths(delim, "", &mut paths);
        paths
    }

    fn collect_paths(&self, delim: &str, prefix: &str, out: &mut Vec<String>) {
        let join = |key: &str| {
            if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}{delim}{key}")
            }
        };
        match self {
            StateValue::Leaf(key) => out.push(join(key)),
            StateValue::Branch(children) => {
                for (key, child) in children {
                    let path = join(key);
                    out.push(path.clone());
                    child.collect_paths(delim, &path, out);
                }
            }
        }
    }

    /// True iff every path active in `self` is also active in `other`.
    /// Used to test a (possibly partial) pattern against a full value:
    /// `"a"` matches `{a: "b"}`, but `{a: "c"}` does not.
    pub fn matches(&self, other: &StateValue) -> bool {
        match (self, other) {
            (StateValue::Leaf(a), StateValue::Leaf(b)) => a == b,
            (StateValue::Leaf(a), StateValue::Branch(children)) => children.contains_key(a),
            (StateValue::Branch(_), StateValue::Leaf(_)) => false,
            (StateValue::Branch(wanted), StateValue::Branch(children)) => {
                wanted.iter().all(|(key, sub)| match children.get(key) {
                    Some(child) => sub.matches(child),
                    None => false,
                })
            }
        }
    }
}

impl From<&str> for StateValue {
    fn from(path: &str) -> Self {
        StateValue::parse(path)
    }
}

impl From<String> for StateValue {
    fn from(path: String) -> Self {
        StateValue::parse(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_segment_is_leaf() {
        assert_eq!(StateValue::parse("green"), StateValue::leaf("green"));
    }

    #[test]
    fn parse_nests_from_the_left() {
        let value = StateValue::parse("a.b.c");
        assert_eq!(
            value,
            StateValue::branch([("a", StateValue::branch([("b", StateValue::leaf("c"))]))]),
        );
    }

    #[test]
    fn to_strings_enumerates_intermediate_paths() {
        let value = StateValue::branch([
            ("left", StateValue::leaf("on")),
            ("right", StateValue::leaf("off")),
        ]);
        assert_eq!(
            value.to_strings("."),
            vec!["left", "left.on", "right", "right.off"],
        );
    }

    #[test]
    fn leaf_pattern_matches_branch_with_that_key() {
        let full: StateValue = "red.walk".into();
        assert!(StateValue::leaf("red").matches(&full));
        assert!(StateValue::parse("red.walk").matches(&full));
        assert!(!StateValue::parse("red.wait").matches(&full));
        assert!(!StateValue::leaf("green").matches(&full));
    }

    #[test]
    fn branch_pattern_requires_every_listed_region() {
        let full = StateValue::branch([
            ("upload", StateValue::leaf("idle")),
            ("download", StateValue::leaf("pending")),
        ]);
        let partial = StateValue::branch([("upload", StateValue::leaf("idle"))]);
        assert!(partial.matches(&full));

        let wrong = StateValue::branch([("upload", StateValue::leaf("pending"))]);
        assert!(!wrong.matches(&full));
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(StateValue::parse("a.b"), StateValue::parse("a.b"));
        assert_ne!(StateValue::parse("a.b"), StateValue::parse("a.c"));
    }

    #[test]
    fn value_roundtrips_through_serde() {
        let value = StateValue::branch([("a", StateValue::leaf("b"))]);
        let json = serde_json::to_string(&value).expect("serializes");
        assert_eq!(json, r#"{"a":"b"}"#);
        let back: StateValue = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back, value);
    }
}

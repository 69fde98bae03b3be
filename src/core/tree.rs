//! State trees: the canonical form of an active configuration.
//!
//! A [`StateTree`] records, for each active node, its active child trees:
//! none for atomic states, exactly one for compound states, all regions
//! for parallel states. Transitions are computed against trees; the
//! user-facing [`StateValue`](crate::StateValue) is derived from them, so
//! two states of the same machine have equal values exactly when their
//! trees are structurally equal.

use crate::core::machine::Machine;
use crate::core::node::{NodeId, NodeKind};
use crate::core::value::StateValue;
use std::collections::BTreeMap;

/// An active node and its active children, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateTree {
    pub(crate) node: NodeId,
    pub(crate) children: Vec<StateTree>,
}

impl StateTree {
    pub(crate) fn leaf(node: NodeId) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    /// All active nodes, preorder (parents before children, regions in
    /// declaration order).
    pub(crate) fn nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_nodes(&mut out);
        out
    }

    fn collect_nodes(&self, out: &mut Vec<NodeId>) {
        out.push(self.node);
        for child in &self.children {
            child.collect_nodes(out);
        }
    }

    /// The active leaves, in declaration order.
    pub(crate) fn leaves(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<NodeId>) {
        if self.children.is_empty() {
            out.push(self.node);
        } else {
            for child in &self.children {
                child.collect_leaves(out);
            }
        }
    }

    /// Collect the nodes of `set` in post-order (children before parents,
    /// regions in declaration order). This is the exit-action order.
    pub(crate) fn postorder_filtered(
        &self,
        set: &std::collections::HashSet<NodeId>,
        out: &mut Vec<NodeId>,
    ) {
        for child in &self.children {
            child.postorder_filtered(set, out);
        }
        if set.contains(&self.node) {
            out.push(self.node);
        }
    }

    /// Find the subtree rooted at `id`, if that node is active.
    pub(crate) fn subtree(&self, id: NodeId) -> Option<&StateTree> {
        if self.node == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.subtree(id))
    }

    /// True iff every path active in `parent` is also active in `child`.
    pub fn matches(parent: &StateTree, child: &StateTree) -> bool {
        if parent.node != child.node {
            return false;
        }
        parent.children.iter().all(|wanted| {
            child
                .children
                .iter()
                .any(|candidate| StateTree::matches(wanted, candidate))
        })
    }

    /// The user-facing value of this tree.
    pub fn value<C>(&self, machine: &Machine<C>) -> StateValue {
        if self.children.is_empty() {
            StateValue::Leaf(machine.node(self.node).key.clone())
        } else {
            self.child_value(machine)
        }
    }

    /// The value describing this tree's active descendants, keyed under
    /// this node's children. Also used for history snapshots.
    pub(crate) fn child_value<C>(&self, machine: &Machine<C>) -> StateValue {
        if machine.node(self.node).kind == NodeKind::Parallel {
            let mut regions = BTreeMap::new();
            for region in &self.children {
                let key = machine.node(region.node).key.clone();
                let value = if region.children.is_empty() {
                    StateValue::Branch(BTreeMap::new())
                } else {
                    region.child_value(machine)
                };
                regions.insert(key, value);
            }
            StateValue::Branch(regions)
        } else {
            match self.children.first() {
                None => StateValue::Branch(BTreeMap::new()),
                Some(child) => {
                    let key = machine.node(child.node).key.clone();
                    if child.children.is_empty() {
                        StateValue::Leaf(key)
                    } else {
                        let mut map = BTreeMap::new();
                        map.insert(key, child.child_value(machine));
                        StateValue::Branch(map)
                    }
                }
            }
        }
    }

    /// Every path from the root to every active node, joined by `delim`.
    pub fn to_strings<C>(&self, machine: &Machine<C>, delim: &str) -> Vec<String> {
        self.nodes()
            .into_iter()
            .filter(|&id| id != machine.root())
            .map(|id| machine.node(id).path.join(delim))
            .collect()
    }

    /// Merge two trees of the same machine, preferring `b` where both
    /// specify an active child. Used to splice a transition's result into
    /// the untouched sibling regions of a parallel state.
    pub fn combine<C>(a: &StateTree, b: &StateTree, machine: &Machine<C>) -> StateTree {
        if a.node != b.node {
            return b.clone();
        }
        let node = machine.node(a.node);
        let mut children = Vec::new();
        if node.kind == NodeKind::Parallel {
            for &region in &node.children {
                let in_a = a.children.iter().find(|t| t.node == region);
                let in_b = b.children.iter().find(|t| t.node == region);
                match (in_a, in_b) {
                    (Some(x), Some(y)) => children.push(StateTree::combine(x, y, machine)),
                    (Some(x), None) => children.push(x.clone()),
                    (None, Some(y)) => children.push(y.clone()),
                    (None, None) => {}
                }
            }
        } else {
            match (a.children.first(), b.children.first()) {
                (_, Some(preferred)) => {
                    let merged = match a.children.iter().find(|t| t.node == preferred.node) {
                        Some(existing) => StateTree::combine(existing, preferred, machine),
                        None => preferred.clone(),
                    };
                    children.push(merged);
                }
                (Some(kept), None) => children.push(kept.clone()),
                (None, None) => {}
            }
        }
        StateTree {
            node: a.node,
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MachineDef, StateDef};
    use crate::core::machine::MachineOptions;

    fn word_machine() -> Machine<()> {
        // A parallel machine with two independent formatting regions.
        MachineDef::new("word")
            .context(())
            .parallel()
            .state(
                "bold",
                StateDef::new()
                    .initial("off")
                    .state("on", StateDef::new().on("TOGGLE_BOLD", "off"))
                    .state("off", StateDef::new().on("TOGGLE_BOLD", "on")),
            )
            .state(
                "underline",
                StateDef::new()
                    .initial("off")
                    .state("on", StateDef::new().on("TOGGLE_UNDERLINE", "off"))
                    .state("off", StateDef::new().on("TOGGLE_UNDERLINE", "on")),
            )
            .build(MachineOptions::default())
            .expect("definition is valid")
    }

    #[test]
    fn resolve_fills_defaults_from_initial() {
        let machine = word_machine();
        let tree = machine.initial_config();
        assert_eq!(
            tree.value(&machine),
            StateValue::branch([
                ("bold", StateValue::leaf("off")),
                ("underline", StateValue::leaf("off")),
            ]),
        );
    }

    #[test]
    fn resolve_rejects_unknown_keys() {
        let machine = word_machine();
        let err = machine
            .tree_from_value(&StateValue::branch([("bold", StateValue::leaf("dotted"))]))
            .unwrap_err();
        assert!(err.to_string().contains("dotted"));
    }

    #[test]
    fn to_strings_enumerates_active_paths() {
        let machine = word_machine();
        let tree = machine.initial_config();
        assert_eq!(
            tree.to_strings(&machine, "."),
            vec!["bold", "bold.off", "underline", "underline.off"],
        );
    }

    #[test]
    fn matches_accepts_partial_trees() {
        let machine = word_machine();
        let full = machine.initial_config();
        let partial = machine
            .tree_from_value(&StateValue::branch([("bold", StateValue::leaf("off"))]))
            .expect("valid value");
        // A partial tree resolves missing regions to defaults, so here the
        // two are equal; matches is reflexive on equal trees.
        assert!(StateTree::matches(&partial, &full));
        assert!(StateTree::matches(&full, &full));
    }

    #[test]
    fn combine_prefers_the_second_tree() {
        let machine = word_machine();
        let a = machine.initial_config();
        let b = machine
            .tree_from_value(&StateValue::branch([("bold", StateValue::leaf("on"))]))
            .expect("valid value");
        let merged = StateTree::combine(&a, &b, &machine);
        assert_eq!(
            merged.value(&machine),
            StateValue::branch([
                ("bold", StateValue::leaf("on")),
                ("underline", StateValue::leaf("off")),
            ]),
        );
    }

    #[test]
    fn equal_values_mean_equal_trees() {
        let machine = word_machine();
        let a = machine.initial_config();
        let b = machine
            .tree_from_value(&a.value(&machine))
            .expect("roundtrips");
        assert_eq!(a, b);
    }
}

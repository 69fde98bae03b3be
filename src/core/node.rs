//! State nodes: the immutable tree a machine is compiled into.
//!
//! Nodes live in a flat table owned by the [`Machine`](crate::Machine),
//! indexed by [`NodeId`] in document (preorder) order. Child-to-parent
//! navigation goes through the table rather than cyclic references, and
//! comparing two `NodeId`s compares document order for free.

use crate::core::action::{Action, ActivityDef, InvokeSpec};
use crate::core::guard::Guard;
use indexmap::IndexMap;

/// Index into the machine's node table. Ordering is document order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub(crate) usize);

/// What kind of state a node is.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeKind {
    /// A leaf state.
    Atomic,
    /// A state with children, exactly one active at a time.
    Compound,
    /// A state with children, all active simultaneously.
    Parallel,
    /// A terminal child; entering it completes the parent.
    Final,
    /// A pseudo-state that re-enters the parent's last recorded child
    /// configuration.
    History,
}

/// One node of the compiled machine.
pub struct StateNode<C> {
    pub(crate) id: String,
    pub(crate) key: String,
    pub(crate) path: Vec<String>,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) child_keys: IndexMap<String, NodeId>,
    pub(crate) initial: Option<NodeId>,
    pub(crate) on: IndexMap<String, Vec<Transition<C>>>,
    pub(crate) entry: Vec<Action<C>>,
    pub(crate) exit: Vec<Action<C>>,
    pub(crate) activities: Vec<ActivityDef<C>>,
    pub(crate) invoke: Option<InvokeSpec<C>>,
    pub(crate) has_history_child: bool,
}

impl<C> StateNode<C> {
    /// Globally unique id within the machine.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Local name among siblings.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Keys from the root down to this node.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }
}

impl<C> Clone for StateNode<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            key: self.key.clone(),
            path: self.path.clone(),
            kind: self.kind,
            parent: self.parent,
            children: self.children.clone(),
            child_keys: self.child_keys.clone(),
            initial: self.initial,
            on: self.on.clone(),
            entry: self.entry.clone(),
            exit: self.exit.clone(),
            activities: self.activities.clone(),
            invoke: self.invoke.clone(),
            has_history_child: self.has_history_child,
        }
    }
}

/// A compiled transition: resolved targets, guard, actions.
pub struct Transition<C> {
    /// Global declaration order; unique within the machine.
    pub(crate) ord: usize,
    pub(crate) event: String,
    pub(crate) source: NodeId,
    /// Empty for targetless transitions (actions only, no exit/entry).
    pub(crate) targets: Vec<NodeId>,
    pub(crate) cond: Option<Guard<C>>,
    pub(crate) actions: Vec<Action<C>>,
    pub(crate) internal: bool,
}

impl<C> Transition<C> {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }
}

impl<C> Clone for Transition<C> {
    fn clone(&self) -> Self {
        Self {
            ord: self.ord,
            event: self.event.clone(),
            source: self.source,
            targets: self.targets.clone(),
            cond: self.cond.clone(),
            actions: self.actions.clone(),
            internal: self.internal,
        }
    }
}

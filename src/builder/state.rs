//! Builders for state definitions and invocations.

use crate::builder::transition::TransitionDef;
use crate::core::action::{Action, ActivityDef, AssignFn, DelayExpr, Disposer};
use crate::core::event::Event;
use crate::core::machine::Machine;
use crate::core::node::NodeKind;
use indexmap::IndexMap;
use std::sync::Arc;

/// Definition of one state node, built fluently and compiled by
/// [`Machine::new`](crate::Machine::new).
///
/// # Example
///
/// ```rust
/// use lattice::{MachineDef, MachineOptions, StateDef};
///
/// let machine = MachineDef::new("light")
///     .context(())
///     .initial("green")
///     .state("green", StateDef::new().on("TIMER", "yellow"))
///     .state("yellow", StateDef::new().on("TIMER", "red"))
///     .state("red", StateDef::new().on("TIMER", "green"))
///     .build(MachineOptions::default())
///     .unwrap();
/// assert!(machine.initial_state().matches("green"));
/// ```
pub struct StateDef<C> {
    pub(crate) kind: Option<NodeKind>,
    pub(crate) id: Option<String>,
    pub(crate) initial: Option<String>,
    pub(crate) states: IndexMap<String, StateDef<C>>,
    pub(crate) on: IndexMap<String, Vec<TransitionDef<C>>>,
    pub(crate) entry: Vec<Action<C>>,
    pub(crate) exit: Vec<Action<C>>,
    pub(crate) after: Vec<(DelayExpr<C>, TransitionDef<C>)>,
    pub(crate) activities: Vec<ActivityDef<C>>,
    pub(crate) invoke: Option<InvokeBuilder<C>>,
}

impl<C> StateDef<C> {
    /// An atomic state; becomes compound once children are added.
    pub fn new() -> Self {
        Self::with_kind(None)
    }

    /// A final state: entering it completes the parent.
    pub fn final_state() -> Self {
        Self::with_kind(Some(NodeKind::Final))
    }

    /// A parallel state: all child regions are active simultaneously.
    pub fn parallel() -> Self {
        Self::with_kind(Some(NodeKind::Parallel))
    }

    /// A history pseudo-state: targeting it re-enters the parent's last
    /// recorded child configuration, or the parent's `initial` when no
    /// record exists.
    pub fn history() -> Self {
        Self::with_kind(Some(NodeKind::History))
    }

    fn with_kind(kind: Option<NodeKind>) -> Self {
        Self {
            kind,
            id: None,
            initial: None,
            states: IndexMap::new(),
            on: IndexMap::new(),
            entry: Vec::new(),
            exit: Vec::new(),
            after: Vec::new(),
            activities: Vec::new(),
            invoke: None,
        }
    }

    /// Custom global id, registered in the machine's id index so absolute
    /// targets (`#id`) can reference it.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Key of the initial child. Required for compound states.
    pub fn initial(mut self, key: impl Into<String>) -> Self {
        self.initial = Some(key.into());
        self
    }

    /// Add a child state.
    pub fn state(mut self, key: impl Into<String>, def: StateDef<C>) -> Self {
        self.states.insert(key.into(), def);
        self
    }

    /// Register a transition for an event. Calling `on` repeatedly with
    /// the same event appends candidates, tried in declaration order.
    pub fn on(mut self, event: impl Into<String>, transition: impl Into<TransitionDef<C>>) -> Self {
        self.on
            .entry(event.into())
            .or_insert_with(Vec::new)
            .push(transition.into());
        self
    }

    /// Append an entry action.
    pub fn entry(mut self, action: impl Into<Action<C>>) -> Self {
        self.entry.push(action.into());
        self
    }

    /// Append an exit action.
    pub fn exit(mut self, action: impl Into<Action<C>>) -> Self {
        self.exit.push(action.into());
        self
    }

    /// Transition after a fixed delay in this state. Compiled into an
    /// entry action that schedules a delayed send and an exit action that
    /// cancels it.
    pub fn after(mut self, delay_ms: u64, transition: impl Into<TransitionDef<C>>) -> Self {
        self.after
            .push((DelayExpr::Fixed(delay_ms), transition.into()));
        self
    }

    /// [`StateDef::after`] with a context-dependent delay.
    pub fn after_with<F>(mut self, delay: F, transition: impl Into<TransitionDef<C>>) -> Self
    where
        F: Fn(&C, &Event) -> u64 + Send + Sync + 'static,
    {
        self.after
            .push((DelayExpr::Computed(Arc::new(delay)), transition.into()));
        self
    }

    /// Run a named activity while this state is active. Resolved against
    /// the machine's activity map.
    pub fn activity(mut self, name: impl Into<String>) -> Self {
        self.activities.push(ActivityDef {
            id: name.into(),
            start: None,
        });
        self
    }

    /// Run an inline activity while this state is active. The factory
    /// returns the disposer called on exit.
    pub fn activity_with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&C) -> Disposer + Send + Sync + 'static,
    {
        self.activities.push(ActivityDef {
            id: name.into(),
            start: Some(Arc::new(factory)),
        });
        self
    }

    /// Invoke a child machine while this state is active.
    pub fn invoke(mut self, invoke: InvokeBuilder<C>) -> Self {
        self.invoke = Some(invoke);
        self
    }
}

impl<C> Default for StateDef<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Definition of an invoked child machine.
pub struct InvokeBuilder<C> {
    pub(crate) id: Option<String>,
    pub(crate) machine: Arc<Machine<C>>,
    pub(crate) data: Option<AssignFn<C>>,
    pub(crate) auto_forward: bool,
    pub(crate) on_done: Option<TransitionDef<C>>,
}

impl<C> InvokeBuilder<C> {
    /// Invoke `machine` while the enclosing state is active. The invoke id
    /// defaults to the child machine's id.
    pub fn new(machine: Arc<Machine<C>>) -> Self {
        Self {
            id: None,
            machine,
            data: None,
            auto_forward: false,
            on_done: None,
        }
    }

    /// Explicit invoke id; also names the `done.invoke.<id>` event.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Seed the child's context from the parent's context and the
    /// triggering event.
    pub fn data<F>(mut self, seed: F) -> Self
    where
        F: Fn(&C, &Event) -> C + Send + Sync + 'static,
    {
        self.data = Some(Arc::new(seed));
        self
    }

    /// Forward every event the parent receives to the child.
    pub fn auto_forward(mut self) -> Self {
        self.auto_forward = true;
        self
    }

    /// Transition to take when the child reaches a top-level final state.
    pub fn on_done(mut self, transition: impl Into<TransitionDef<C>>) -> Self {
        self.on_done = Some(transition.into());
        self
    }
}

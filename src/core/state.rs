//! The immutable state value produced by each transition.

use crate::core::action::Action;
use crate::core::event::Event;
use crate::core::tree::StateTree;
use crate::core::value::StateValue;
use std::collections::HashMap;
use std::fmt;

/// Recorded last-active child configuration per compound state id, used to
/// resolve history targets.
pub type HistoryValue = HashMap<String, StateValue>;

/// One step's result: the configuration, the context after assigns, and
/// the side-effects left to execute.
///
/// States are immutable once returned. Assign actions are already applied
/// to [`context`](State::context) and are not present in
/// [`actions`](State::actions).
pub struct State<C> {
    /// The active configuration, in user-facing shape.
    pub value: StateValue,
    /// Extended state after this step's assigns.
    pub context: C,
    /// The event that produced this state.
    pub event: Event,
    /// Side-effects to execute, in order (exit, transition, entry).
    pub actions: Vec<Action<C>>,
    /// Activity id to running flag. Stopped activities stay present as
    /// `false` so observers can see them wind down.
    pub activities: HashMap<String, bool>,
    /// Per-compound-state record of the last active child configuration.
    pub history_value: HistoryValue,
    /// Whether any transition fired for the event.
    pub changed: bool,
    /// Whether the machine's root configuration is final.
    pub done: bool,
    pub(crate) tree: StateTree,
    pub(crate) history: Option<Box<State<C>>>,
}

impl<C> State<C> {
    /// True iff every path in `pattern` is active in this state.
    ///
    /// ```rust
    /// use lattice::{MachineDef, MachineOptions, StateDef};
    ///
    /// let machine = MachineDef::new("toggle")
    ///     .context(())
    ///     .initial("off")
    ///     .state("off", StateDef::new().on("FLIP", "on"))
    ///     .state("on", StateDef::new().on("FLIP", "off"))
    ///     .build(MachineOptions::default())
    ///     .unwrap();
    ///
    /// let state = machine.initial_state();
    /// assert!(state.matches("off"));
    /// assert!(!state.matches("on"));
    /// ```
    pub fn matches(&self, pattern: impl Into<StateValue>) -> bool {
        pattern.into().matches(&self.value)
    }

    /// Every active path, dot-joined.
    pub fn to_strings(&self) -> Vec<String> {
        self.value.to_strings(".")
    }

    /// The state this step transitioned from, when there was one.
    pub fn history(&self) -> Option<&State<C>> {
        self.history.as_deref()
    }

    /// Names of the surfaced actions, in execution order. Convenient for
    /// asserting on a step's effects.
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(Action::name).collect()
    }

    pub(crate) fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// Clone with the back-link dropped, so committed states do not chain
    /// their entire lineage.
    pub(crate) fn without_history(&self) -> State<C>
    where
        C: Clone,
    {
        State {
            value: self.value.clone(),
            context: self.context.clone(),
            event: self.event.clone(),
            actions: self.actions.clone(),
            activities: self.activities.clone(),
            history_value: self.history_value.clone(),
            changed: self.changed,
            done: self.done,
            tree: self.tree.clone(),
            history: None,
        }
    }
}

impl<C: Clone> Clone for State<C> {
    fn clone(&self) -> Self {
        State {
            value: self.value.clone(),
            context: self.context.clone(),
            event: self.event.clone(),
            actions: self.actions.clone(),
            activities: self.activities.clone(),
            history_value: self.history_value.clone(),
            changed: self.changed,
            done: self.done,
            tree: self.tree.clone(),
            history: self.history.clone(),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for State<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("value", &self.value)
            .field("context", &self.context)
            .field("event", &self.event.name)
            .field("actions", &self.actions)
            .field("changed", &self.changed)
            .field("done", &self.done)
            .finish()
    }
}

//! Events delivered to statechart machines.
//!
//! An event is a name plus an optional JSON payload. A bare string converts
//! into a payload-less event, so `machine.transition(&state, "TIMER")` and
//! `machine.transition(&state, Event::new("TIMER"))` are equivalent.
//!
//! The prefixes `xstate.` and `done.` are reserved for events the runtime
//! raises itself: the initialization event, delayed-transition timers, and
//! completion notifications for compound states and invoked children.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the event that accompanies the initial state notification.
pub const INIT_EVENT: &str = "xstate.init";

/// Name of the transient ("null") event attempted whenever the machine
/// settles. Transitions registered under this name are eventless.
pub const NULL_EVENT: &str = "";

/// Wildcard event name: matches any non-transient event not handled by a
/// more specific entry.
pub const WILDCARD_EVENT: &str = "*";

/// An event: a name (the `type` in the wire shape) and a JSON payload.
///
/// # Example
///
/// ```rust
/// use lattice::Event;
/// use serde_json::json;
///
/// let plain = Event::new("TIMER");
/// assert_eq!(plain.name, "TIMER");
/// assert!(plain.payload.is_null());
///
/// let with_data = Event::with_payload("SUBMIT", json!({ "password": "foo" }));
/// assert_eq!(with_data.payload["password"], "foo");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The event type.
    #[serde(rename = "type")]
    pub name: String,
    /// Arbitrary payload carried alongside the name. `Null` when absent.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Event {
    /// Create a payload-less event.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Value::Null,
        }
    }

    /// Create an event carrying a JSON payload.
    pub fn with_payload(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// The initialization event delivered with the first observer
    /// notification after `start()`.
    pub fn init() -> Self {
        Self::new(INIT_EVENT)
    }

    /// The transient event used to drain eventless transitions.
    pub(crate) fn null() -> Self {
        Self::new(NULL_EVENT)
    }

    /// Completion event for a compound or parallel state, raised on the
    /// internal queue when the state's configuration reaches a final child.
    pub fn done_state(state_id: &str) -> Self {
        Self::new(format!("done.state.{state_id}"))
    }

    /// Completion event an invoked child sends to its parent when it
    /// reaches a top-level final state.
    pub fn done_invoke(invoke_id: &str) -> Self {
        Self::new(format!("done.invoke.{invoke_id}"))
    }

    /// True for the transient (empty) event.
    pub fn is_transient(&self) -> bool {
        self.name == NULL_EVENT
    }

    /// True for events under a reserved runtime prefix (`xstate.`, `done.`).
    pub fn is_reserved(&self) -> bool {
        self.name.starts_with("xstate.") || self.name.starts_with("done.")
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Name of the timer event compiled from an `after` entry. The delay tag
/// keeps distinct delays on the same state distinct; the state id keeps the
/// same delay on different states distinct.
pub(crate) fn after_event_name(delay_tag: &str, state_id: &str) -> String {
    format!("xstate.after({delay_tag})#{state_id}")
}

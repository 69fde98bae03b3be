//! Error kinds raised by machine construction and the pure transition
//! function. All failures are synchronous, at the point of misuse.

use thiserror::Error;

/// Invalid machine definitions, detected when the machine is constructed.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("duplicate state id '{0}' in machine definition")]
    DuplicateId(String),

    #[error("compound state '{0}' declares no initial child")]
    MissingInitial(String),

    #[error("state '{state}' declares unknown initial child '{initial}'")]
    UnknownInitial { state: String, initial: String },

    #[error("cannot resolve transition target '{target}' from state '{from_state}'")]
    UnknownTarget { from_state: String, target: String },

    #[error("history state '{0}' must be the child of a compound state")]
    OrphanHistory(String),

    #[error("machine '{0}' has no initial context. Call .context(..) before .build()")]
    MissingContext(String),
}

/// Failures of the pure transition function.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The supplied state value references a key that does not exist.
    #[error("invalid state value: no child '{key}' under '{parent}'")]
    InvalidStateValue { parent: String, key: String },

    /// The supplied state value has the wrong shape for the node it
    /// describes (e.g. a branch value against an atomic state).
    #[error("invalid state value: '{0}' does not describe a compound or parallel state")]
    ValueShape(String),

    /// A transition guard references a name with no implementation in the
    /// machine's guard map. Raised when the guard is evaluated.
    #[error("no guard implementation named '{0}'")]
    UnknownGuard(String),
}

/// Failure reported by a custom action executor.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ActionError(String);

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        ActionError(message.into())
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        ActionError::new(message)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        ActionError(message)
    }
}

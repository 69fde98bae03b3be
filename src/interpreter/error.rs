//! Interpreter error kinds.

use crate::core::error::{ActionError, TransitionError};
use thiserror::Error;

/// Failures surfaced by [`Interpreter`](crate::Interpreter) entry points.
#[derive(Debug, Error)]
pub enum InterpreterError {
    /// `send` was called before `start`.
    #[error("interpreter '{0}' has not been started; call start() before send()")]
    NotStarted(String),

    /// The pure transition function rejected the step.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A custom action executor failed. The interpreter stays at the last
    /// committed state.
    #[error("action '{action}' failed: {source}")]
    Action {
        action: String,
        #[source]
        source: ActionError,
    },

    /// Starting an invoked child failed.
    #[error("invoked child '{id}' failed: {source}")]
    Child {
        id: String,
        #[source]
        source: Box<InterpreterError>,
    },
}

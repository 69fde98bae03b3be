//! The imperative shell: driving machines over time.
//!
//! Everything stateful lives here: event queues, run-to-completion
//! macrosteps, delayed-event timers, activity lifecycles, observers, and
//! invoked child machines. The pure core never touches any of it.

pub mod clock;
pub mod error;
pub mod logger;
pub mod service;

pub use clock::{Clock, SimulatedClock, TimerCallback, TimerHandle, WallClock};
pub use error::InterpreterError;
pub use logger::{Logger, TracingLogger};
pub use service::{Interpreter, InterpreterOptions, Status};

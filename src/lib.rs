//! Lattice: a hierarchical statechart interpreter.
//!
//! Lattice executes Harel statecharts with SCXML-style semantics:
//! hierarchical and parallel states, guarded transitions, entry/exit
//! actions, extended state updated by `assign`, delayed events with
//! cancellation, activities, and invoked child machines.
//!
//! The crate is split into a pure core and an imperative shell. The core
//! answers "given this configuration and this event, what happens next":
//! [`Machine::transition`] is deterministic and free of I/O. The
//! [`Interpreter`] drives those transitions over time with
//! run-to-completion semantics, a [`Clock`] collaborator for delayed
//! events, and observer notification.
//!
//! # Example
//!
//! ```rust
//! use lattice::{Interpreter, InterpreterOptions, MachineDef, MachineOptions, SimulatedClock, StateDef};
//! use std::sync::Arc;
//!
//! let machine = MachineDef::new("light")
//!     .context(())
//!     .initial("green")
//!     .state("green", StateDef::new().after(1000, "yellow"))
//!     .state("yellow", StateDef::new().after(500, "red"))
//!     .state("red", StateDef::new().after(1000, "green"))
//!     .build(MachineOptions::default())
//!     .unwrap();
//!
//! let clock = Arc::new(SimulatedClock::new());
//! let service = Interpreter::with_options(
//!     Arc::new(machine),
//!     InterpreterOptions::default().clock(clock.clone()),
//! );
//! service.start().unwrap();
//! assert!(service.state().matches("green"));
//!
//! clock.increment(1000);
//! assert!(service.state().matches("yellow"));
//! clock.increment(500);
//! assert!(service.state().matches("red"));
//! ```

pub mod builder;
pub mod core;
pub mod interpreter;

/// Action constructor helpers (`assign`, `raise`, `send`, `log`, …).
pub use crate::core::action as actions;

pub use crate::builder::{InvokeBuilder, MachineDef, StateDef, TransitionDef};
pub use crate::core::action::Action;
pub use crate::core::error::{ActionError, DefinitionError, TransitionError};
pub use crate::core::event::Event;
pub use crate::core::guard::Guard;
pub use crate::core::machine::{Machine, MachineOptions};
pub use crate::core::state::{HistoryValue, State};
pub use crate::core::tree::StateTree;
pub use crate::core::value::StateValue;
pub use crate::interpreter::{
    Clock, Interpreter, InterpreterError, InterpreterOptions, Logger, SimulatedClock, Status,
    TracingLogger, WallClock,
};

//! Fluent builders producing the in-memory machine description.
//!
//! A machine is defined as data ([`MachineDef`] at the top, [`StateDef`]
//! per node, [`TransitionDef`] per transition) and compiled
//! by [`Machine::new`](crate::Machine::new) against a
//! [`MachineOptions`](crate::MachineOptions) map of named actions, guards,
//! and activities. Inline closures work everywhere a name does.

pub mod machine;
pub mod state;
pub mod transition;

pub use machine::MachineDef;
pub use state::{InvokeBuilder, StateDef};
pub use transition::TransitionDef;

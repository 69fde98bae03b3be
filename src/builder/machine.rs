//! Builder for machine definitions.

use crate::builder::state::StateDef;
use crate::builder::transition::TransitionDef;
use crate::core::error::DefinitionError;
use crate::core::machine::{Machine, MachineOptions};
use indexmap::IndexMap;

/// The validated in-memory description a [`Machine`] is compiled from.
///
/// # Example
///
/// ```rust
/// use lattice::{MachineDef, MachineOptions, StateDef};
///
/// #[derive(Clone)]
/// struct Ctx {
///     count: u32,
/// }
///
/// let machine = MachineDef::new("counter")
///     .context(Ctx { count: 0 })
///     .initial("idle")
///     .state("idle", StateDef::new().on("START", "running"))
///     .state("running", StateDef::new().on("STOP", "idle"))
///     .build(MachineOptions::default())
///     .unwrap();
/// assert_eq!(machine.id(), "counter");
/// ```
pub struct MachineDef<C> {
    pub(crate) id: String,
    pub(crate) initial: Option<String>,
    pub(crate) context: Option<C>,
    pub(crate) states: IndexMap<String, StateDef<C>>,
    pub(crate) on: IndexMap<String, Vec<TransitionDef<C>>>,
    pub(crate) parallel: bool,
}

impl<C> MachineDef<C> {
    /// Start a definition. The id names the machine and prefixes every
    /// auto-generated state id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            initial: None,
            context: None,
            states: IndexMap::new(),
            on: IndexMap::new(),
            parallel: false,
        }
    }

    /// Key of the initial top-level state (required unless the machine is
    /// parallel).
    pub fn initial(mut self, key: impl Into<String>) -> Self {
        self.initial = Some(key.into());
        self
    }

    /// The initial context (required).
    pub fn context(mut self, context: C) -> Self {
        self.context = Some(context);
        self
    }

    /// Add a top-level state.
    pub fn state(mut self, key: impl Into<String>, def: StateDef<C>) -> Self {
        self.states.insert(key.into(), def);
        self
    }

    /// Register a machine-level transition, consulted when no active state
    /// handles an event.
    pub fn on(mut self, event: impl Into<String>, transition: impl Into<TransitionDef<C>>) -> Self {
        self.on
            .entry(event.into())
            .or_insert_with(Vec::new)
            .push(transition.into());
        self
    }

    /// Make the top level parallel: every top-level state is a region.
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

impl<C: Clone + Send + Sync + 'static> MachineDef<C> {
    /// Compile against the implementation maps. Equivalent to
    /// [`Machine::new`].
    pub fn build(self, options: MachineOptions<C>) -> Result<Machine<C>, DefinitionError> {
        Machine::new(self, options)
    }
}

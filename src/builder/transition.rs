//! Builder for transition definitions.

use crate::core::action::Action;
use crate::core::event::Event;
use crate::core::guard::Guard;

/// An unresolved transition: target paths, guard, actions.
///
/// Targets may be sibling keys (`"yellow"`), descendants of the source
/// (`".child"`), or absolute ids (`"#machine.path.to.state"`). They are
/// resolved when the machine is built. A bare string converts into a
/// single-target transition, so `.on("TIMER", "yellow")` works directly.
pub struct TransitionDef<C> {
    pub(crate) targets: Vec<String>,
    pub(crate) cond: Option<Guard<C>>,
    pub(crate) actions: Vec<Action<C>>,
    pub(crate) internal: bool,
}

impl<C> TransitionDef<C> {
    /// A transition to a single target.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            targets: vec![target.into()],
            cond: None,
            actions: Vec::new(),
            internal: false,
        }
    }

    /// A transition with no target: actions fire, the configuration stays
    /// and no exit or entry actions run.
    pub fn targetless() -> Self {
        Self {
            targets: Vec::new(),
            cond: None,
            actions: Vec::new(),
            internal: false,
        }
    }

    /// Add another target (for entering several parallel regions at once).
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Guard the transition with an inline predicate.
    pub fn cond<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> bool + Send + Sync + 'static,
    {
        self.cond = Some(Guard::new(predicate));
        self
    }

    /// Guard the transition by name, resolved against the machine's guard
    /// map at construction.
    pub fn cond_named(mut self, name: impl Into<String>) -> Self {
        self.cond = Some(Guard::named(name));
        self
    }

    /// Guard the transition with a pre-built [`Guard`].
    pub fn guard(mut self, guard: Guard<C>) -> Self {
        self.cond = Some(guard);
        self
    }

    /// Append an action, in declaration order.
    pub fn action(mut self, action: impl Into<Action<C>>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Append several actions at once.
    pub fn actions<I, A>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Action<C>>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    /// Mark the transition internal: when the target is a descendant of
    /// the source, the source's exit and entry actions do not re-run.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

impl<C> From<&str> for TransitionDef<C> {
    fn from(target: &str) -> Self {
        TransitionDef::to(target)
    }
}

impl<C> From<String> for TransitionDef<C> {
    fn from(target: String) -> Self {
        TransitionDef::to(target)
    }
}

//! Guard predicates for controlling transitions.
//!
//! Guards are pure boolean functions over the extended state (context) and
//! the triggering event. A transition whose guard returns `false` is
//! skipped and the next candidate is tried.
//!
//! Guards referenced by name resolve against the machine's guard map at
//! construction. A name with no implementation stays unresolved and fails
//! when it is first evaluated, not when the machine is built, so
//! definitions remain loadable while their option maps are still being
//! filled in.

use crate::core::error::TransitionError;
use crate::core::event::Event;
use std::fmt;
use std::sync::Arc;

/// A guard predicate implementation.
pub type GuardFn<C> = Arc<dyn Fn(&C, &Event) -> bool + Send + Sync>;

/// Pure predicate that determines whether a transition may fire.
///
/// # Example
///
/// ```rust
/// use lattice::core::guard::Guard;
/// use lattice::Event;
///
/// #[derive(Clone)]
/// struct Ctx {
///     attempts: u32,
/// }
///
/// let under_limit = Guard::new(|ctx: &Ctx, _event: &Event| ctx.attempts < 3);
/// let event = Event::new("RETRY");
///
/// assert!(under_limit.check(&Ctx { attempts: 1 }, &event).unwrap());
/// assert!(!under_limit.check(&Ctx { attempts: 3 }, &event).unwrap());
/// ```
pub enum Guard<C> {
    /// A predicate ready to evaluate, optionally retaining the name it was
    /// resolved from.
    Predicate {
        name: Option<String>,
        check: GuardFn<C>,
    },
    /// A named guard with no implementation yet.
    Unresolved(String),
}

impl<C> Guard<C> {
    /// Create a guard from a pure predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> bool + Send + Sync + 'static,
    {
        Guard::Predicate {
            name: None,
            check: Arc::new(predicate),
        }
    }

    /// A reference to a guard by name, resolved against the machine's
    /// guard map at construction.
    pub fn named(name: impl Into<String>) -> Self {
        Guard::Unresolved(name.into())
    }

    /// The name this guard was declared or resolved under, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Guard::Predicate { name, .. } => name.as_deref(),
            Guard::Unresolved(name) => Some(name),
        }
    }

    /// Evaluate the guard. Unresolved names fail with
    /// [`TransitionError::UnknownGuard`].
    pub fn check(&self, context: &C, event: &Event) -> Result<bool, TransitionError> {
        match self {
            Guard::Predicate { check, .. } => Ok(check(context, event)),
            Guard::Unresolved(name) => Err(TransitionError::UnknownGuard(name.clone())),
        }
    }

    /// Replace an unresolved name with an implementation from the guard
    /// map, leaving it unresolved when the map has no entry.
    pub(crate) fn resolve_with(self, lookup: impl Fn(&str) -> Option<GuardFn<C>>) -> Self {
        match self {
            Guard::Unresolved(name) => match lookup(&name) {
                Some(check) => Guard::Predicate {
                    name: Some(name),
                    check,
                },
                None => Guard::Unresolved(name),
            },
            resolved => resolved,
        }
    }
}

impl<C> Clone for Guard<C> {
    fn clone(&self) -> Self {
        match self {
            Guard::Predicate { name, check } => Guard::Predicate {
                name: name.clone(),
                check: Arc::clone(check),
            },
            Guard::Unresolved(name) => Guard::Unresolved(name.clone()),
        }
    }
}

impl<C> fmt::Debug for Guard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Predicate { name, .. } => match name {
                Some(name) => write!(f, "Guard({name})"),
                None => write!(f, "Guard(<inline>)"),
            },
            Guard::Unresolved(name) => write!(f, "Guard(<unresolved: {name}>)"),
        }
    }
}

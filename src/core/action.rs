//! The action model: everything a transition can cause.
//!
//! Actions are tagged variants rather than bare callables, so the
//! interpreter can treat queue control (`raise`, `send`, `cancel`),
//! context updates (`assign`), and user side-effects (`log`, custom
//! executors, activities, invocations) differently. Name references are
//! resolved against the machine's action map once, at construction; an
//! unknown name keeps a `None` executor and is still surfaced on the
//! resulting [`State`](crate::core::state::State) so callers can inspect
//! it.
//!
//! Constructor helpers ([`assign`], [`raise`], [`send`], [`log`], …) are
//! the intended way to build actions inline in a machine definition.

use crate::core::error::ActionError;
use crate::core::event::Event;
use crate::core::machine::Machine;
use crate::core::value::StateValue;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Pure context updater: produces the next context from the current one.
pub type AssignFn<C> = Arc<dyn Fn(&C, &Event) -> C + Send + Sync>;

/// Executor of a custom action.
pub type ExecFn<C> =
    Arc<dyn Fn(&C, &Event, ActionMeta<'_>) -> Result<(), ActionError> + Send + Sync>;

/// Computes an event from the current context and triggering event.
pub type EventFn<C> = Arc<dyn Fn(&C, &Event) -> Event + Send + Sync>;

/// Computes a delay in milliseconds from the current context and event.
pub type DelayFn<C> = Arc<dyn Fn(&C, &Event) -> u64 + Send + Sync>;

/// Computes the value a `log` action emits.
pub type LogFn<C> = Arc<dyn Fn(&C, &Event) -> Value + Send + Sync>;

/// Computes a list of actions to splice in place of a `pure` action.
pub type PureFn<C> = Arc<dyn Fn(&C, &Event) -> Vec<Action<C>> + Send + Sync>;

/// Starts an activity and returns its disposer.
pub type ActivityFn<C> = Arc<dyn Fn(&C) -> Disposer + Send + Sync>;

/// Tears down a running activity; called on state exit or interpreter stop.
pub type Disposer = Box<dyn FnOnce() + Send>;

/// Context handed to custom action executors alongside context and event.
pub struct ActionMeta<'a> {
    /// The value of the state the action belongs to.
    pub state_value: &'a StateValue,
    /// The action's resolved name.
    pub action: &'a str,
}

/// An event to send: fixed at definition time or computed per send.
pub enum EventExpr<C> {
    Fixed(Event),
    Computed(EventFn<C>),
}

impl<C> EventExpr<C> {
    pub(crate) fn resolve(&self, context: &C, event: &Event) -> Event {
        match self {
            EventExpr::Fixed(fixed) => fixed.clone(),
            EventExpr::Computed(compute) => compute(context, event),
        }
    }
}

impl<C> Clone for EventExpr<C> {
    fn clone(&self) -> Self {
        match self {
            EventExpr::Fixed(event) => EventExpr::Fixed(event.clone()),
            EventExpr::Computed(compute) => EventExpr::Computed(Arc::clone(compute)),
        }
    }
}

/// A delay in milliseconds: fixed or computed from context.
pub enum DelayExpr<C> {
    Fixed(u64),
    Computed(DelayFn<C>),
}

impl<C> DelayExpr<C> {
    pub(crate) fn resolve(&self, context: &C, event: &Event) -> u64 {
        match self {
            DelayExpr::Fixed(ms) => *ms,
            DelayExpr::Computed(compute) => compute(context, event),
        }
    }

    /// Tag used to derive a unique timer event name for `after` entries.
    pub(crate) fn tag(&self, index: usize) -> String {
        match self {
            DelayExpr::Fixed(ms) => ms.to_string(),
            DelayExpr::Computed(_) => format!("fn_{index}"),
        }
    }
}

impl<C> Clone for DelayExpr<C> {
    fn clone(&self) -> Self {
        match self {
            DelayExpr::Fixed(ms) => DelayExpr::Fixed(*ms),
            DelayExpr::Computed(compute) => DelayExpr::Computed(Arc::clone(compute)),
        }
    }
}

/// Where a `send` action delivers its event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendTarget {
    /// The interpreter's own external queue.
    Own,
    /// The parent interpreter, when running as an invoked child.
    Parent,
    /// An invoked child, by invoke id.
    Child(String),
}

/// A `send` action: event, destination, optional delay, explicit id.
///
/// Built through the [`send`] / [`send_parent`] helpers, which double as a
/// fluent builder:
///
/// ```rust
/// use lattice::actions::send;
///
/// let spec = send::<()>("TIMER").delay(10).id("TIMER");
/// ```
pub struct SendSpec<C> {
    pub(crate) event: EventExpr<C>,
    pub(crate) target: SendTarget,
    pub(crate) delay: Option<DelayExpr<C>>,
    pub(crate) id: Option<String>,
}

impl<C> SendSpec<C> {
    /// Delay delivery by a fixed number of milliseconds.
    pub fn delay(mut self, ms: u64) -> Self {
        self.delay = Some(DelayExpr::Fixed(ms));
        self
    }

    /// Delay delivery by a context-dependent number of milliseconds.
    pub fn delay_with<F>(mut self, compute: F) -> Self
    where
        F: Fn(&C, &Event) -> u64 + Send + Sync + 'static,
    {
        self.delay = Some(DelayExpr::Computed(Arc::new(compute)));
        self
    }

    /// Explicit id for later cancellation. Defaults to the event name.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Deliver to an invoked child instead of this interpreter.
    pub fn to_child(mut self, invoke_id: impl Into<String>) -> Self {
        self.target = SendTarget::Child(invoke_id.into());
        self
    }
}

impl<C> Clone for SendSpec<C> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            target: self.target.clone(),
            delay: self.delay.clone(),
            id: self.id.clone(),
        }
    }
}

impl<C> From<SendSpec<C>> for Action<C> {
    fn from(spec: SendSpec<C>) -> Self {
        Action::Send(spec)
    }
}

/// A `log` action: expression plus optional label.
pub struct LogSpec<C> {
    pub(crate) label: Option<String>,
    pub(crate) expr: LogFn<C>,
}

impl<C> Clone for LogSpec<C> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            expr: Arc::clone(&self.expr),
        }
    }
}

/// An activity: a long-running side-effect bounded by a state.
pub struct ActivityDef<C> {
    pub(crate) id: String,
    pub(crate) start: Option<ActivityFn<C>>,
}

impl<C> ActivityDef<C> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<C> Clone for ActivityDef<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            start: self.start.as_ref().map(Arc::clone),
        }
    }
}

/// An invocation: a child machine whose lifetime is bounded by a state.
pub struct InvokeSpec<C> {
    pub(crate) id: String,
    pub(crate) machine: Arc<Machine<C>>,
    pub(crate) data: Option<AssignFn<C>>,
    pub(crate) auto_forward: bool,
}

impl<C> InvokeSpec<C> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<C> Clone for InvokeSpec<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            machine: Arc::clone(&self.machine),
            data: self.data.as_ref().map(Arc::clone),
            auto_forward: self.auto_forward,
        }
    }
}

/// A named action, with its executor when the name resolved.
pub struct CustomAction<C> {
    pub(crate) name: String,
    pub(crate) exec: Option<ExecFn<C>>,
}

impl<C> Clone for CustomAction<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            exec: self.exec.as_ref().map(Arc::clone),
        }
    }
}

/// Every action a transition, entry, or exit list can carry.
pub enum Action<C> {
    /// Stage a context update; applied before any side-effect of the step.
    Assign(AssignFn<C>),
    /// Enqueue an event on the internal queue.
    Raise(Event),
    /// Enqueue an event on an external queue, optionally delayed.
    Send(SendSpec<C>),
    /// Cancel a previously scheduled delayed send by id.
    Cancel(String),
    /// Emit a value through the logger.
    Log(LogSpec<C>),
    /// Start an activity on state entry.
    Start(ActivityDef<C>),
    /// Stop an activity or invoked child on state exit.
    Stop(String),
    /// Spawn an invoked child machine on state entry.
    Invoke(InvokeSpec<C>),
    /// Expand into a computed list of actions during the step.
    Pure(PureFn<C>),
    /// A user action, by name; `exec` is `None` when the name did not
    /// resolve against the machine's action map.
    Custom(CustomAction<C>),
}

impl<C> Action<C> {
    /// The action's name: built-in kinds use the `xstate.` namespace,
    /// custom actions use their declared name.
    pub fn name(&self) -> &str {
        match self {
            Action::Assign(_) => "xstate.assign",
            Action::Raise(_) => "xstate.raise",
            Action::Send(_) => "xstate.send",
            Action::Cancel(_) => "xstate.cancel",
            Action::Log(_) => "xstate.log",
            Action::Start(_) => "xstate.start",
            Action::Stop(_) => "xstate.stop",
            Action::Invoke(_) => "xstate.invoke",
            Action::Pure(_) => "xstate.pure",
            Action::Custom(custom) => &custom.name,
        }
    }
}

impl<C> Clone for Action<C> {
    fn clone(&self) -> Self {
        match self {
            Action::Assign(f) => Action::Assign(Arc::clone(f)),
            Action::Raise(event) => Action::Raise(event.clone()),
            Action::Send(spec) => Action::Send(spec.clone()),
            Action::Cancel(id) => Action::Cancel(id.clone()),
            Action::Log(spec) => Action::Log(spec.clone()),
            Action::Start(def) => Action::Start(def.clone()),
            Action::Stop(id) => Action::Stop(id.clone()),
            Action::Invoke(spec) => Action::Invoke(spec.clone()),
            Action::Pure(f) => Action::Pure(Arc::clone(f)),
            Action::Custom(custom) => Action::Custom(custom.clone()),
        }
    }
}

impl<C> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Raise(event) => write!(f, "Raise({})", event.name),
            Action::Cancel(id) => write!(f, "Cancel({id})"),
            Action::Start(def) => write!(f, "Start({})", def.id),
            Action::Stop(id) => write!(f, "Stop({id})"),
            Action::Invoke(spec) => write!(f, "Invoke({})", spec.id),
            Action::Custom(custom) => write!(f, "Custom({})", custom.name),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Stage a context update. Applied in declaration order before any
/// non-assign action of the step executes.
pub fn assign<C, F>(update: F) -> Action<C>
where
    F: Fn(&C, &Event) -> C + Send + Sync + 'static,
{
    Action::Assign(Arc::new(update))
}

/// Enqueue an event on the internal queue; internal events drain before
/// any further external event in the same macrostep.
pub fn raise<C>(event: impl Into<Event>) -> Action<C> {
    Action::Raise(event.into())
}

/// Send an event to this interpreter's external queue. Chain
/// [`SendSpec::delay`] / [`SendSpec::id`] for delayed, cancellable sends.
pub fn send<C>(event: impl Into<Event>) -> SendSpec<C> {
    SendSpec {
        event: EventExpr::Fixed(event.into()),
        target: SendTarget::Own,
        delay: None,
        id: None,
    }
}

/// Send an event computed from the current context and triggering event.
pub fn send_with<C, F>(compute: F) -> SendSpec<C>
where
    F: Fn(&C, &Event) -> Event + Send + Sync + 'static,
{
    SendSpec {
        event: EventExpr::Computed(Arc::new(compute)),
        target: SendTarget::Own,
        delay: None,
        id: None,
    }
}

/// Send a fixed event to the parent interpreter (from an invoked child).
pub fn send_parent<C>(event: impl Into<Event>) -> SendSpec<C> {
    SendSpec {
        event: EventExpr::Fixed(event.into()),
        target: SendTarget::Parent,
        delay: None,
        id: None,
    }
}

/// Send a computed event to the parent interpreter.
pub fn send_parent_with<C, F>(compute: F) -> SendSpec<C>
where
    F: Fn(&C, &Event) -> Event + Send + Sync + 'static,
{
    SendSpec {
        event: EventExpr::Computed(Arc::new(compute)),
        target: SendTarget::Parent,
        delay: None,
        id: None,
    }
}

/// Cancel a pending delayed send by id. Cancelling an unknown id is a
/// no-op.
pub fn cancel<C>(id: impl Into<String>) -> Action<C> {
    Action::Cancel(id.into())
}

/// Emit the value of an expression through the interpreter's logger.
pub fn log<C, F>(expr: F) -> Action<C>
where
    F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
{
    Action::Log(LogSpec {
        label: None,
        expr: Arc::new(expr),
    })
}

/// [`log`] with a label prefix.
pub fn log_labeled<C, F>(label: impl Into<String>, expr: F) -> Action<C>
where
    F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
{
    Action::Log(LogSpec {
        label: Some(label.into()),
        expr: Arc::new(expr),
    })
}

/// Reference an action by name. Resolved against the machine's action map
/// at construction; an unknown name is surfaced with a `None` executor.
pub fn action<C>(name: impl Into<String>) -> Action<C> {
    Action::Custom(CustomAction {
        name: name.into(),
        exec: None,
    })
}

/// An inline custom action with an executor.
pub fn custom<C, F>(name: impl Into<String>, exec: F) -> Action<C>
where
    F: Fn(&C, &Event, ActionMeta<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
{
    Action::Custom(CustomAction {
        name: name.into(),
        exec: Some(Arc::new(exec)),
    })
}

/// Expand into a computed list of actions, evaluated against the working
/// context mid-step.
pub fn pure<C, F>(compute: F) -> Action<C>
where
    F: Fn(&C, &Event) -> Vec<Action<C>> + Send + Sync + 'static,
{
    Action::Pure(Arc::new(compute))
}

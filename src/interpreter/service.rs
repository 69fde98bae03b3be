//! The stateful interpreter driving a machine over time.
//!
//! The interpreter is a cloneable handle over a lock-confined core, so
//! timer threads, observers, and invoked children can all feed it events.
//! User callbacks (actions, observers, activity factories, loggers)
//! always run with the lock released; re-entrant `send` calls enqueue and
//! return while the in-progress macrostep drains both queues.

use crate::core::action::{Action, ActionMeta, ActivityDef, Disposer, InvokeSpec, SendSpec, SendTarget};
use crate::core::error::TransitionError;
use crate::core::event::Event;
use crate::core::machine::Machine;
use crate::core::state::State;
use crate::interpreter::clock::{Clock, TimerCallback, TimerHandle, WallClock};
use crate::interpreter::error::InterpreterError;
use crate::interpreter::logger::{Logger, TracingLogger};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Interpreter lifecycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    NotStarted,
    Running,
    Stopped,
}

/// Configuration for [`Interpreter::with_options`].
pub struct InterpreterOptions {
    /// Externally-visible id; defaults to the machine's id.
    pub id: Option<String>,
    /// Timer collaborator; defaults to [`WallClock`].
    pub clock: Arc<dyn Clock>,
    /// Log sink; defaults to [`TracingLogger`].
    pub logger: Arc<dyn Logger>,
    /// When `false`, `log` and custom actions are deferred for a manual
    /// [`Interpreter::execute`] call. Queue control and lifecycle actions
    /// still run, and assigns always apply.
    pub execute: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            id: None,
            clock: Arc::new(WallClock::new()),
            logger: Arc::new(TracingLogger),
            execute: true,
        }
    }
}

impl InterpreterOptions {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }
}

type Listener<C> = Arc<dyn Fn(&State<C>, &Event) + Send + Sync>;

struct ChildRef<C> {
    service: Interpreter<C>,
    auto_forward: bool,
}

impl<C> Clone for ChildRef<C> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            auto_forward: self.auto_forward,
        }
    }
}

struct Core<C> {
    status: Status,
    state: Option<State<C>>,
    internal: VecDeque<Event>,
    external: VecDeque<Event>,
    processing: bool,
    timers: HashMap<String, TimerHandle>,
    activities: HashMap<String, Disposer>,
    children: HashMap<String, ChildRef<C>>,
    parent: Option<Weak<Shared<C>>>,
    transition_listeners: Vec<Listener<C>>,
    done_listeners: Vec<Listener<C>>,
}

struct Shared<C> {
    machine: Arc<Machine<C>>,
    id: String,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    execute_actions: bool,
    core: Mutex<Core<C>>,
}

/// A running statechart service.
///
/// # Example
///
/// ```rust
/// use lattice::{Interpreter, MachineDef, MachineOptions, StateDef};
/// use std::sync::Arc;
///
/// let machine = MachineDef::new("toggle")
///     .context(())
///     .initial("off")
///     .state("off", StateDef::new().on("FLIP", "on"))
///     .state("on", StateDef::new().on("FLIP", "off"))
///     .build(MachineOptions::default())
///     .unwrap();
///
/// let service = Interpreter::new(Arc::new(machine));
/// service.start().unwrap();
/// service.send("FLIP").unwrap();
/// assert!(service.state().matches("on"));
/// ```
pub struct Interpreter<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for Interpreter<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Clone + Send + Sync + 'static> Interpreter<C> {
    /// An interpreter with default options.
    pub fn new(machine: Arc<Machine<C>>) -> Self {
        Self::with_options(machine, InterpreterOptions::default())
    }

    pub fn with_options(machine: Arc<Machine<C>>, options: InterpreterOptions) -> Self {
        let id = options.id.unwrap_or_else(|| machine.id().to_string());
        Interpreter {
            shared: Arc::new(Shared {
                machine,
                id,
                clock: options.clock,
                logger: options.logger,
                execute_actions: options.execute,
                core: Mutex::new(Core {
                    status: Status::NotStarted,
                    state: None,
                    internal: VecDeque::new(),
                    external: VecDeque::new(),
                    processing: false,
                    timers: HashMap::new(),
                    activities: HashMap::new(),
                    children: HashMap::new(),
                    parent: None,
                    transition_listeners: Vec::new(),
                    done_listeners: Vec::new(),
                }),
            }),
        }
    }

    /// The interpreter's externally-visible id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The timer collaborator.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.shared.clock)
    }

    /// The machine this interpreter drives.
    pub fn machine(&self) -> Arc<Machine<C>> {
        Arc::clone(&self.shared.machine)
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// The machine's initial state.
    pub fn initial_state(&self) -> State<C> {
        self.shared.machine.initial_state()
    }

    /// The last committed state, or the initial state before `start`.
    pub fn state(&self) -> State<C> {
        let committed = { self.lock().state.clone() };
        committed.unwrap_or_else(|| self.shared.machine.initial_state())
    }

    /// Observe every step. The first notification after `start()` carries
    /// the initial state with the `xstate.init` event.
    pub fn on_transition<F>(&self, listener: F) -> &Self
    where
        F: Fn(&State<C>, &Event) + Send + Sync + 'static,
    {
        self.lock().transition_listeners.push(Arc::new(listener));
        self
    }

    /// Observe completion: fires once when a top-level final state is
    /// entered, right before the interpreter stops.
    pub fn on_done<F>(&self, listener: F) -> &Self
    where
        F: Fn(&State<C>, &Event) + Send + Sync + 'static,
    {
        self.lock().done_listeners.push(Arc::new(listener));
        self
    }

    /// Start the interpreter: commit the initial state, execute its entry
    /// actions, notify observers, and drain any resulting events.
    /// Idempotent while running.
    pub fn start(&self) -> Result<(), InterpreterError> {
        {
            let mut core = self.lock();
            if core.status == Status::Running {
                return Ok(());
            }
            core.status = Status::Running;
            core.internal.clear();
            core.external.clear();
            core.processing = true;
        }
        tracing::debug!(target: "lattice", id = %self.shared.id, "interpreter started");
        let initial = self.shared.machine.initial_state();
        let result = self.commit(initial).and_then(|()| self.drain());
        if result.is_err() {
            self.lock().processing = false;
        }
        result
    }

    /// Stop the interpreter: cancel pending timers, dispose activities,
    /// stop invoked children, and drop queued events. Idempotent.
    pub fn stop(&self) {
        let (timers, activities, children) = {
            let mut core = self.lock();
            if core.status == Status::Stopped {
                return;
            }
            core.status = Status::Stopped;
            core.internal.clear();
            core.external.clear();
            (
                std::mem::take(&mut core.timers),
                std::mem::take(&mut core.activities),
                std::mem::take(&mut core.children),
            )
        };
        for (_, handle) in timers {
            self.shared.clock.clear_timeout(handle);
        }
        for (_, disposer) in activities {
            disposer();
        }
        for (_, child) in children {
            child.service.stop();
        }
        tracing::debug!(target: "lattice", id = %self.shared.id, "interpreter stopped");
    }

    /// Send an event. Fails with [`InterpreterError::NotStarted`] before
    /// `start()`; events sent after `stop()` are silently dropped. When a
    /// macrostep is already in progress the event is queued and processed
    /// by the outer loop.
    pub fn send(&self, event: impl Into<Event>) -> Result<(), InterpreterError> {
        let event = event.into();
        {
            let mut core = self.lock();
            match core.status {
                Status::NotStarted => {
                    return Err(InterpreterError::NotStarted(self.shared.id.clone()))
                }
                Status::Stopped => {
                    tracing::debug!(
                        target: "lattice",
                        id = %self.shared.id,
                        event = %event.name,
                        "event dropped after stop"
                    );
                    return Ok(());
                }
                Status::Running => {}
            }
            core.external.push_back(event);
            if core.processing {
                return Ok(());
            }
            core.processing = true;
        }
        let result = self.drain();
        if result.is_err() {
            self.lock().processing = false;
        }
        result
    }

    /// Read-only preview: the state `event` would produce, without
    /// mutating the interpreter, its queues, or firing any action.
    pub fn next_state(&self, event: impl Into<Event>) -> Result<State<C>, TransitionError> {
        let current = self.state();
        self.shared.machine.transition(&current, event)
    }

    /// Run the deferred (`log` and custom) actions of a state. Intended
    /// for interpreters configured with `execute: false`.
    pub fn execute(&self, state: &State<C>) -> Result<(), InterpreterError> {
        for action in &state.actions {
            match action {
                Action::Log(spec) => {
                    let value = (spec.expr)(&state.context, &state.event);
                    self.shared.logger.log(spec.label.as_deref(), &value);
                }
                Action::Custom(custom) => match &custom.exec {
                    Some(exec) => exec(
                        &state.context,
                        &state.event,
                        ActionMeta {
                            state_value: &state.value,
                            action: &custom.name,
                        },
                    )
                    .map_err(|source| InterpreterError::Action {
                        action: custom.name.clone(),
                        source,
                    })?,
                    None => tracing::warn!(
                        target: "lattice",
                        id = %self.shared.id,
                        action = %custom.name,
                        "no implementation for action"
                    ),
                },
                _ => {}
            }
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Core<C>> {
        self.shared.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain both queues: internal events first, then external, until
    /// empty. Clears the processing flag on the way out.
    fn drain(&self) -> Result<(), InterpreterError> {
        loop {
            let event = {
                let mut core = self.lock();
                if core.status != Status::Running {
                    core.internal.clear();
                    core.external.clear();
                    core.processing = false;
                    return Ok(());
                }
                let next = match core.internal.pop_front() {
                    Some(event) => Some(event),
                    None => core.external.pop_front(),
                };
                match next {
                    Some(event) => event,
                    None => {
                        core.processing = false;
                        return Ok(());
                    }
                }
            };
            self.step(event)?;
        }
    }

    fn step(&self, event: Event) -> Result<(), InterpreterError> {
        if !event.is_reserved() && !event.is_transient() {
            let forwards: Vec<Interpreter<C>> = {
                self.lock()
                    .children
                    .values()
                    .filter(|child| child.auto_forward)
                    .map(|child| child.service.clone())
                    .collect()
            };
            for child in forwards {
                if let Err(err) = child.send(event.clone()) {
                    tracing::warn!(
                        target: "lattice",
                        id = %self.shared.id,
                        error = %err,
                        "auto-forward failed"
                    );
                }
            }
        }

        let current = match { self.lock().state.clone() } {
            Some(state) => state,
            None => self.shared.machine.initial_state(),
        };
        let next = self.shared.machine.transition(&current, event)?;
        self.commit(next)
    }

    /// Install a state, execute its actions, notify observers, then drain
    /// transient transitions and handle completion.
    fn commit(&self, state: State<C>) -> Result<(), InterpreterError> {
        let done = state.done;
        {
            let mut core = self.lock();
            if core.status != Status::Running {
                return Ok(());
            }
            core.state = Some(state.clone());
        }
        tracing::debug!(
            target: "lattice",
            id = %self.shared.id,
            value = ?state.value,
            event = %state.event.name,
            "state committed"
        );
        self.run_actions(&state)?;

        let listeners = { self.lock().transition_listeners.clone() };
        for listener in &listeners {
            listener(&state, &state.event);
        }

        if done {
            let listeners = { self.lock().done_listeners.clone() };
            for listener in &listeners {
                listener(&state, &state.event);
            }
            self.stop();
            return Ok(());
        }

        let next = self.shared.machine.transition(&state, Event::null())?;
        if next.changed {
            return self.commit(next);
        }
        Ok(())
    }

    fn run_actions(&self, state: &State<C>) -> Result<(), InterpreterError> {
        for action in &state.actions {
            self.run_action(action, state)?;
        }
        Ok(())
    }

    fn run_action(&self, action: &Action<C>, state: &State<C>) -> Result<(), InterpreterError> {
        match action {
            // Consumed by the pure transition; nothing left to execute.
            Action::Assign(_) | Action::Pure(_) => Ok(()),
            Action::Raise(event) => {
                self.lock().internal.push_back(event.clone());
                Ok(())
            }
            Action::Send(spec) => {
                self.run_send(spec, state);
                Ok(())
            }
            Action::Cancel(id) => {
                self.cancel_timer(id);
                Ok(())
            }
            Action::Log(spec) => {
                if self.shared.execute_actions {
                    let value = (spec.expr)(&state.context, &state.event);
                    self.shared.logger.log(spec.label.as_deref(), &value);
                }
                Ok(())
            }
            Action::Start(def) => {
                self.start_activity(def, state);
                Ok(())
            }
            Action::Stop(id) => {
                self.stop_unit(id);
                Ok(())
            }
            Action::Invoke(spec) => self.spawn_child(spec, state),
            Action::Custom(custom) => {
                if !self.shared.execute_actions {
                    return Ok(());
                }
                match &custom.exec {
                    Some(exec) => exec(
                        &state.context,
                        &state.event,
                        ActionMeta {
                            state_value: &state.value,
                            action: &custom.name,
                        },
                    )
                    .map_err(|source| InterpreterError::Action {
                        action: custom.name.clone(),
                        source,
                    }),
                    None => {
                        tracing::warn!(
                            target: "lattice",
                            id = %self.shared.id,
                            action = %custom.name,
                            "no implementation for action"
                        );
                        Ok(())
                    }
                }
            }
        }
    }

    fn run_send(&self, spec: &SendSpec<C>, state: &State<C>) {
        let event = spec.event.resolve(&state.context, &state.event);
        match &spec.delay {
            Some(delay) => {
                let delay_ms = delay.resolve(&state.context, &state.event);
                let send_id = spec.id.clone().unwrap_or_else(|| event.name.clone());
                let callback: TimerCallback = match &spec.target {
                    SendTarget::Own => {
                        let service = self.clone();
                        Box::new(move || service.send_logged(event))
                    }
                    SendTarget::Parent => {
                        let parent = { self.lock().parent.clone() };
                        Box::new(move || {
                            if let Some(shared) = parent.as_ref().and_then(Weak::upgrade) {
                                Interpreter { shared }.send_logged(event);
                            }
                        })
                    }
                    SendTarget::Child(child_id) => {
                        let child = {
                            self.lock()
                                .children
                                .get(child_id)
                                .map(|child| child.service.clone())
                        };
                        Box::new(move || {
                            if let Some(child) = child {
                                child.send_logged(event);
                            }
                        })
                    }
                };
                let handle = self.shared.clock.set_timeout(callback, delay_ms);
                let previous = self.lock().timers.insert(send_id, handle);
                if let Some(previous) = previous {
                    self.shared.clock.clear_timeout(previous);
                }
            }
            None => match &spec.target {
                SendTarget::Own => {
                    self.lock().external.push_back(event);
                }
                SendTarget::Parent => match self.parent_handle() {
                    Some(parent) => parent.send_logged(event),
                    None => tracing::warn!(
                        target: "lattice",
                        id = %self.shared.id,
                        event = %event.name,
                        "send_parent with no parent interpreter"
                    ),
                },
                SendTarget::Child(child_id) => {
                    let child = {
                        self.lock()
                            .children
                            .get(child_id)
                            .map(|child| child.service.clone())
                    };
                    match child {
                        Some(child) => child.send_logged(event),
                        None => tracing::warn!(
                            target: "lattice",
                            id = %self.shared.id,
                            child = %child_id,
                            "send to unknown invoked child"
                        ),
                    }
                }
            },
        }
    }

    fn send_logged(&self, event: Event) {
        if let Err(err) = self.send(event) {
            tracing::warn!(
                target: "lattice",
                id = %self.shared.id,
                error = %err,
                "event delivery failed"
            );
        }
    }

    /// Enqueue on the internal queue and kick a macrostep when idle. Used
    /// by invoked children reporting completion.
    fn send_internal(&self, event: Event) {
        {
            let mut core = self.lock();
            if core.status != Status::Running {
                return;
            }
            core.internal.push_back(event);
            if core.processing {
                return;
            }
            core.processing = true;
        }
        if let Err(err) = self.drain() {
            self.lock().processing = false;
            tracing::error!(
                target: "lattice",
                id = %self.shared.id,
                error = %err,
                "macrostep failed"
            );
        }
    }

    fn cancel_timer(&self, id: &str) {
        let handle = self.lock().timers.remove(id);
        if let Some(handle) = handle {
            self.shared.clock.clear_timeout(handle);
        }
    }

    fn start_activity(&self, def: &ActivityDef<C>, state: &State<C>) {
        let Some(factory) = &def.start else {
            tracing::warn!(
                target: "lattice",
                id = %self.shared.id,
                activity = %def.id,
                "no implementation for activity"
            );
            return;
        };
        let previous = self.lock().activities.remove(&def.id);
        if let Some(previous) = previous {
            previous();
        }
        let disposer = factory(&state.context);
        self.lock().activities.insert(def.id.clone(), disposer);
    }

    /// Tear down whatever unit (activity or invoked child) `id` names.
    fn stop_unit(&self, id: &str) {
        let disposer = self.lock().activities.remove(id);
        if let Some(disposer) = disposer {
            disposer();
        }
        let child = self.lock().children.remove(id);
        if let Some(child) = child {
            child.service.stop();
        }
    }

    fn spawn_child(&self, spec: &InvokeSpec<C>, state: &State<C>) -> Result<(), InterpreterError> {
        let seed = match &spec.data {
            Some(seed) => seed(&state.context, &state.event),
            None => spec.machine.context().clone(),
        };
        let child_machine = Arc::new(spec.machine.with_context(seed));
        let child = Interpreter::with_options(
            child_machine,
            InterpreterOptions {
                id: Some(spec.id.clone()),
                clock: Arc::clone(&self.shared.clock),
                logger: Arc::clone(&self.shared.logger),
                execute: self.shared.execute_actions,
            },
        );
        child.lock().parent = Some(Arc::downgrade(&self.shared));

        // Weak back-reference: the parent owns the child, never the
        // reverse.
        let parent = Arc::downgrade(&self.shared);
        let invoke_id = spec.id.clone();
        child.on_done(move |_state, _event| {
            if let Some(shared) = parent.upgrade() {
                let parent = Interpreter { shared };
                parent.remove_child(&invoke_id);
                parent.send_internal(Event::done_invoke(&invoke_id));
            }
        });

        self.lock().children.insert(
            spec.id.clone(),
            ChildRef {
                service: child.clone(),
                auto_forward: spec.auto_forward,
            },
        );
        tracing::debug!(
            target: "lattice",
            id = %self.shared.id,
            child = %spec.id,
            "invoking child machine"
        );
        child.start().map_err(|source| InterpreterError::Child {
            id: spec.id.clone(),
            source: Box::new(source),
        })
    }

    fn remove_child(&self, id: &str) {
        self.lock().children.remove(id);
    }

    fn parent_handle(&self) -> Option<Interpreter<C>> {
        let parent = { self.lock().parent.clone() };
        parent
            .and_then(|weak| weak.upgrade())
            .map(|shared| Interpreter { shared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MachineDef, StateDef, TransitionDef};
    use crate::core::action::raise;
    use crate::core::machine::MachineOptions;
    use std::sync::Mutex as StdMutex;

    fn toggle() -> Arc<Machine<()>> {
        Arc::new(
            MachineDef::new("toggle")
                .context(())
                .initial("off")
                .state("off", StateDef::new().on("FLIP", "on"))
                .state("on", StateDef::new().on("FLIP", "off"))
                .build(MachineOptions::default())
                .expect("definition is valid"),
        )
    }

    #[test]
    fn send_before_start_fails() {
        let service = Interpreter::new(toggle());
        let err = service.send("FLIP").unwrap_err();
        assert!(matches!(err, InterpreterError::NotStarted(id) if id == "toggle"));
    }

    #[test]
    fn start_is_idempotent() {
        let service = Interpreter::new(toggle());
        service.start().expect("starts");
        service.send("FLIP").expect("sends");
        service.start().expect("second start is a no-op");
        assert!(service.state().matches("on"));
    }

    #[test]
    fn first_notification_is_the_initial_state() {
        let service = Interpreter::new(toggle());
        let seen: Arc<StdMutex<Vec<(String, String)>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        service.on_transition(move |state, event| {
            let value = state.to_strings().join(",");
            sink.lock().unwrap().push((value, event.name.clone()));
        });
        service.start().expect("starts");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ("off".to_string(), "xstate.init".to_string()));
    }

    #[test]
    fn events_after_stop_are_dropped_silently() {
        let service = Interpreter::new(toggle());
        service.start().expect("starts");
        service.stop();
        let fired = Arc::new(StdMutex::new(0u32));
        let sink = Arc::clone(&fired);
        service.on_transition(move |_, _| *sink.lock().unwrap() += 1);
        service.send("FLIP").expect("send after stop is Ok");
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn raised_events_drain_before_external_ones() {
        let order: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let machine = Arc::new(
            MachineDef::new("queue")
                .context(())
                .initial("a")
                .state(
                    "a",
                    StateDef::new().on("GO", TransitionDef::to("b").action(raise("INNER"))),
                )
                .state(
                    "b",
                    StateDef::new().on("INNER", "c").on("OUTER", "dead_end"),
                )
                .state("c", StateDef::new().on("OUTER", "d"))
                .state("d", StateDef::new())
                .state("dead_end", StateDef::new())
                .build(MachineOptions::default())
                .expect("definition is valid"),
        );
        let service = Interpreter::new(machine);
        let sink = Arc::clone(&order);
        service.on_transition(move |state, _| {
            sink.lock().unwrap().push(state.to_strings().join(","));
        });
        service.start().expect("starts");
        // Re-entrant send from an observer would behave the same; here we
        // queue OUTER behind GO so INNER (raised) must beat it.
        {
            let mut core = service.lock();
            core.external.push_back(Event::new("GO"));
            core.external.push_back(Event::new("OUTER"));
            core.processing = true;
        }
        service.drain().expect("drains");
        assert_eq!(
            *order.lock().unwrap(),
            vec!["a", "b", "c", "d"],
        );
    }

    #[test]
    fn done_stops_the_interpreter() {
        let machine = Arc::new(
            MachineDef::new("once")
                .context(())
                .initial("working")
                .state("working", StateDef::new().on("FINISH", "finished"))
                .state("finished", StateDef::final_state())
                .build(MachineOptions::default())
                .expect("definition is valid"),
        );
        let service = Interpreter::new(machine);
        let done = Arc::new(StdMutex::new(false));
        let sink = Arc::clone(&done);
        service.on_done(move |state, _| {
            assert!(state.done);
            *sink.lock().unwrap() = true;
        });
        service.start().expect("starts");
        service.send("FINISH").expect("sends");
        assert!(*done.lock().unwrap());
        assert_eq!(service.status(), Status::Stopped);
    }

    #[test]
    fn next_state_previews_without_committing() {
        let service = Interpreter::new(toggle());
        service.start().expect("starts");
        let preview = service.next_state("FLIP").expect("previews");
        assert!(preview.matches("on"));
        assert!(service.state().matches("off"));
    }
}

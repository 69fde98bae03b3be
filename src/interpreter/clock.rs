//! Timer collaborators: wall-clock timers and a simulated clock for
//! deterministic tests.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Callback fired when a timer elapses.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Opaque handle identifying a scheduled timeout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TimerHandle(u64);

/// Scheduling collaborator the interpreter delegates delayed sends to.
pub trait Clock: Send + Sync {
    /// Schedule `callback` to fire after `delay_ms` milliseconds.
    fn set_timeout(&self, callback: TimerCallback, delay_ms: u64) -> TimerHandle;

    /// Cancel a scheduled timeout. Unknown handles are a no-op.
    fn clear_timeout(&self, handle: TimerHandle);

    /// Milliseconds since the clock's origin.
    fn now(&self) -> u64;
}

/// Real timers: one sleeper thread per pending timeout with an atomic
/// cancellation flag. The default clock.
pub struct WallClock {
    origin: Instant,
    next_handle: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, Arc<AtomicBool>>>>,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            next_handle: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Clock for WallClock {
    fn set_timeout(&self, callback: TimerCallback, delay_ms: u64) -> TimerHandle {
        let id = self.next_handle.fetch_add(1, AtomicOrdering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        locked(&self.pending).insert(id, Arc::clone(&cancelled));

        let pending = Arc::clone(&self.pending);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(delay_ms));
            locked(&pending).remove(&id);
            if !cancelled.load(AtomicOrdering::SeqCst) {
                callback();
            }
        });
        TimerHandle(id)
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        if let Some(cancelled) = locked(&self.pending).remove(&handle.0) {
            cancelled.store(true, AtomicOrdering::SeqCst);
        }
    }

    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

struct SimEntry {
    due: u64,
    seq: u64,
    handle: u64,
    callback: TimerCallback,
}

impl PartialEq for SimEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for SimEntry {}

impl PartialOrd for SimEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimEntry {
    // Reversed so the max-heap pops the earliest (due, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SimInner {
    now: u64,
    next_handle: u64,
    next_seq: u64,
    queue: BinaryHeap<SimEntry>,
    cancelled: HashSet<u64>,
}

/// Virtual time for deterministic tests. Nothing fires until
/// [`increment`](SimulatedClock::increment) advances the clock; due
/// callbacks then fire in `(due_time, scheduled_order)` order.
///
/// # Example
///
/// ```rust
/// use lattice::{Clock, SimulatedClock};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let clock = SimulatedClock::new();
/// let fired = Arc::new(AtomicU32::new(0));
/// let flag = Arc::clone(&fired);
/// clock.set_timeout(Box::new(move || { flag.fetch_add(1, Ordering::SeqCst); }), 10);
///
/// clock.increment(5);
/// assert_eq!(fired.load(Ordering::SeqCst), 0);
/// clock.increment(5);
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// ```
pub struct SimulatedClock {
    inner: Mutex<SimInner>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SimInner {
                now: 0,
                next_handle: 0,
                next_seq: 0,
                queue: BinaryHeap::new(),
                cancelled: HashSet::new(),
            }),
        }
    }

    /// Advance virtual time by `ms` and fire every callback whose due time
    /// has been reached. The clock's lock is released around each callback
    /// so callbacks may schedule or cancel further timeouts.
    pub fn increment(&self, ms: u64) {
        {
            let mut inner = locked(&self.inner);
            inner.now = inner.now.saturating_add(ms);
        }
        loop {
            let callback = {
                let mut inner = locked(&self.inner);
                let mut next = None;
                loop {
                    let due = match inner.queue.peek() {
                        Some(entry) => entry.due <= inner.now,
                        None => false,
                    };
                    if !due {
                        break;
                    }
                    let Some(entry) = inner.queue.pop() else {
                        break;
                    };
                    if inner.cancelled.remove(&entry.handle) {
                        continue;
                    }
                    next = Some(entry.callback);
                    break;
                }
                match next {
                    Some(callback) => callback,
                    None => break,
                }
            };
            callback();
        }
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimulatedClock {
    fn set_timeout(&self, callback: TimerCallback, delay_ms: u64) -> TimerHandle {
        let mut inner = locked(&self.inner);
        let handle = inner.next_handle;
        inner.next_handle += 1;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let due = inner.now.saturating_add(delay_ms);
        inner.queue.push(SimEntry {
            due,
            seq,
            handle,
            callback,
        });
        TimerHandle(handle)
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        locked(&self.inner).cancelled.insert(handle.0);
    }

    fn now(&self) -> u64 {
        locked(&self.inner).now
    }
}

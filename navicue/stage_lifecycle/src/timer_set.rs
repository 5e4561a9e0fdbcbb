use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Deferred one-shot work.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Registration-ordered timer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw sequence number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Returned on registration. Callers never have to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    id: TimerId,
    fire_at: Instant,
}

impl TimerHandle {
    /// Identifier of the timer.
    #[must_use]
    pub const fn id(&self) -> TimerId {
        self.id
    }

    /// Instant the timer is (or was) due.
    #[must_use]
    pub const fn fire_at(&self) -> Instant {
        self.fire_at
    }
}

/// A timer taken out of the set because it is due.
pub struct DueTimer {
    handle: TimerHandle,
    callback: TimerCallback,
}

impl fmt::Debug for DueTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DueTimer")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl DueTimer {
    /// Handle of the timer being fired.
    #[must_use]
    pub const fn handle(&self) -> TimerHandle {
        self.handle
    }

    /// Runs the callback.
    pub fn fire(self) {
        (self.callback)();
    }
}

/// Callbacks removed by [`TimerSet::cancel_all`]. They are released when
/// this value is dropped, so the caller can drop it outside any lock.
pub struct CancelledTimers {
    pending: BTreeMap<(Instant, TimerId), TimerCallback>,
}

impl fmt::Debug for CancelledTimers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelledTimers")
            .field("count", &self.pending.len())
            .finish()
    }
}

impl CancelledTimers {
    /// Number of timers that never fired.
    #[must_use]
    pub fn count(&self) -> usize {
        self.pending.len()
    }
}

/// Pending one-shot timers ordered by `(fire_at, registration order)`.
///
/// Once [`cancel_all`](Self::cancel_all) has run the set is closed and every
/// later registration is discarded.
#[derive(Default)]
pub struct TimerSet {
    pending: BTreeMap<(Instant, TimerId), TimerCallback>,
    next_id: u64,
    fired: u64,
    closed: bool,
}

impl fmt::Debug for TimerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerSet")
            .field("pending", &self.pending.len())
            .field("fired", &self.fired)
            .field("closed", &self.closed)
            .finish()
    }
}

impl TimerSet {
    /// Creates an empty, open set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` to be due at `fire_at`.
    ///
    /// A closed set still hands out a handle, but the callback is dropped and
    /// the handle is never pending.
    pub fn register(&mut self, fire_at: Instant, callback: TimerCallback) -> TimerHandle {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        if !self.closed {
            self.pending.insert((fire_at, id), callback);
        }
        TimerHandle { id, fire_at }
    }

    /// Earliest pending fire instant.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(fire_at, _)| *fire_at)
    }

    /// Removes the earliest timer if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<DueTimer> {
        let entry = self.pending.first_entry()?;
        let (fire_at, id) = *entry.key();
        if fire_at > now {
            return None;
        }
        let callback = entry.remove();
        self.fired += 1;
        Some(DueTimer {
            handle: TimerHandle { id, fire_at },
            callback,
        })
    }

    /// Whether the timer is still waiting to fire.
    #[must_use]
    pub fn is_pending(&self, handle: &TimerHandle) -> bool {
        self.pending.contains_key(&(handle.fire_at, handle.id))
    }

    /// Closes the set and removes every pending timer. Safe to repeat.
    pub fn cancel_all(&mut self) -> CancelledTimers {
        self.closed = true;
        CancelledTimers {
            pending: std::mem::take(&mut self.pending),
        }
    }

    /// Whether [`cancel_all`](Self::cancel_all) has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no timer is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of timers handed out by [`pop_due`](Self::pop_due).
    #[must_use]
    pub const fn fired(&self) -> u64 {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use parking_lot::Mutex;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> TimerCallback {
        let log = Arc::clone(log);
        Box::new(move || log.lock().push(name))
    }

    fn drain(set: &mut TimerSet, now: Instant) {
        while let Some(timer) = set.pop_due(now) {
            timer.fire();
        }
    }

    #[test]
    fn fires_in_deadline_then_registration_order() {
        let start = Instant::now();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = TimerSet::new();
        set.register(start + Duration::from_millis(300), recorder(&log, "late"));
        set.register(start + Duration::from_millis(100), recorder(&log, "first"));
        set.register(start + Duration::from_millis(100), recorder(&log, "second"));

        assert_eq!(set.next_deadline(), Some(start + Duration::from_millis(100)));
        drain(&mut set, start + Duration::from_millis(150));
        assert_eq!(*log.lock(), vec!["first", "second"]);

        drain(&mut set, start + Duration::from_millis(300));
        assert_eq!(*log.lock(), vec!["first", "second", "late"]);
        assert!(set.is_empty());
        assert_eq!(set.fired(), 3);
    }

    #[test]
    fn nothing_is_due_before_its_deadline() {
        let start = Instant::now();
        let mut set = TimerSet::new();
        let handle = set.register(start + Duration::from_millis(50), Box::new(|| {}));
        assert!(set.pop_due(start).is_none());
        assert!(set.is_pending(&handle));
    }

    #[test]
    fn cancel_all_drops_pending_and_closes() {
        let start = Instant::now();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut set = TimerSet::new();
        for delay in [10, 20, 30] {
            let calls = Arc::clone(&calls);
            set.register(
                start + Duration::from_millis(delay),
                Box::new(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        drain(&mut set, start + Duration::from_millis(10));
        let cancelled = set.cancel_all();
        assert_eq!(cancelled.count(), 2);
        drop(cancelled);

        let counter = Arc::clone(&calls);
        let late = set.register(
            start,
            Box::new(move || {
                counter.fetch_add(100, Ordering::SeqCst);
            }),
        );
        assert!(!set.is_pending(&late));
        drain(&mut set, start + Duration::from_secs(10));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(set.cancel_all().count(), 0);
        assert!(set.is_closed());
    }

    #[test]
    fn handles_carry_registration_order() {
        let start = Instant::now();
        let mut set = TimerSet::new();
        let a = set.register(start, Box::new(|| {}));
        let b = set.register(start, Box::new(|| {}));
        assert!(a.id() < b.id());
        assert_eq!(b.id().to_string(), "timer-1");
    }
}

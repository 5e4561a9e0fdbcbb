//! The stage controller owns one cue's stage value and all of its timers.
//!
//! Every controller runs a single driver task. The driver fires due timers
//! one at a time, earliest first, with ties broken by registration order.
//! Stage reads, stage writes and timer registration never wait on the driver.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use tokio::{
    runtime::Handle,
    sync::{watch, Notify},
    task::JoinHandle,
    time::{self, Instant},
};

use crate::{
    error::LifecycleError,
    stage::Stage,
    telemetry::LifecycleTelemetry,
    timer_set::{TimerHandle, TimerSet},
    timing::StageTiming,
};

type StageObserver = Arc<dyn Fn(StageChange) + Send + Sync>;

/// A stage transition delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageChange {
    /// Stage before the change.
    pub from: Stage,
    /// Stage after the change.
    pub to: Stage,
}

/// Outcome of tearing a controller down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    /// Timers that were still pending and will never fire.
    pub cancelled: usize,
    /// Timers that fired before teardown.
    pub fired: u64,
}

struct Shared {
    label: String,
    stage: watch::Sender<Stage>,
    timers: Mutex<TimerSet>,
    wake: Notify,
    // Held while a callback runs so teardown can wait out an in-flight one.
    firing: ReentrantMutex<()>,
    observers: Mutex<Vec<StageObserver>>,
    telemetry: Option<LifecycleTelemetry>,
}

/// Cloneable, non-owning view of a controller, meant to be captured by
/// timer callbacks and input handlers.
#[derive(Clone)]
pub struct StageHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageHandle")
            .field("label", &self.shared.label)
            .field("stage", &self.stage())
            .finish()
    }
}

impl StageHandle {
    /// Label used in logs and events.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Current stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.shared.stage.borrow()
    }

    /// Replaces the current stage. No ordering is enforced.
    ///
    /// Subscribers and observers are only notified when the value changes.
    pub fn set_stage(&self, stage: Stage) {
        let mut from = stage;
        let changed = self.shared.stage.send_if_modified(|current| {
            if *current == stage {
                return false;
            }
            from = *current;
            *current = stage;
            true
        });
        if !changed {
            return;
        }
        let change = StageChange { from, to: stage };
        tracing::debug!(cue = %self.shared.label, %from, to = %stage, "stage changed");
        let observers = self.shared.observers.lock().clone();
        for observer in observers {
            observer(change);
        }
        if let Some(tel) = &self.shared.telemetry {
            tel.stage_changed(&self.shared.label, change);
        }
    }

    /// Runs `callback` once after `delay`. The timer is cancelled on teardown
    /// if it has not fired yet.
    ///
    /// Teardown on another thread waits for a running callback to return, so
    /// a callback must not block on anything the tearing-down thread holds.
    pub fn add_timer<F>(&self, callback: F, delay: Duration) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let fire_at = Instant::now() + delay;
        let (handle, accepted) = {
            let mut timers = self.shared.timers.lock();
            let handle = timers.register(fire_at, Box::new(callback));
            (handle, !timers.is_closed())
        };
        if accepted {
            self.shared.wake.notify_one();
            tracing::trace!(cue = %self.shared.label, timer = %handle.id(), ?delay, "timer scheduled");
            if let Some(tel) = &self.shared.telemetry {
                tel.timer_scheduled(&self.shared.label, handle, delay);
            }
        } else {
            tracing::debug!(cue = %self.shared.label, timer = %handle.id(), "timer ignored after teardown");
        }
        handle
    }

    /// Whether the timer behind `handle` is still waiting to fire.
    #[must_use]
    pub fn is_pending(&self, handle: &TimerHandle) -> bool {
        self.shared.timers.lock().is_pending(handle)
    }

    /// Number of timers waiting to fire.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.shared.timers.lock().len()
    }

    /// Receiver that observes every stage change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Stage> {
        self.shared.stage.subscribe()
    }

    /// Registers a callback invoked synchronously on every stage change.
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(StageChange) + Send + Sync + 'static,
    {
        self.shared.observers.lock().push(Arc::new(observer));
    }

    /// Whether the owning controller has been torn down.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.shared.timers.lock().is_closed()
    }
}

/// Configures and starts a [`StageController`].
#[derive(Clone)]
pub struct StageControllerBuilder {
    timing: StageTiming,
    label: String,
    telemetry: Option<LifecycleTelemetry>,
    observers: Vec<StageObserver>,
}

impl fmt::Debug for StageControllerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageControllerBuilder")
            .field("timing", &self.timing)
            .field("label", &self.label)
            .field("telemetry", &self.telemetry)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl StageControllerBuilder {
    /// Starts from the given timing.
    #[must_use]
    pub fn new(timing: StageTiming) -> Self {
        Self {
            timing,
            label: "navicue".into(),
            telemetry: None,
            observers: Vec::new(),
        }
    }

    /// Label used in logs and events.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Attaches journal/event telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: LifecycleTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Registers an observer before the driver starts, so it cannot miss an
    /// early transition.
    #[must_use]
    pub fn observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(StageChange) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Creates the controller on the current tokio runtime and schedules the
    /// two automatic transitions.
    pub fn build(self) -> Result<StageController, LifecycleError> {
        let runtime = Handle::try_current().map_err(|_| LifecycleError::NoRuntime)?;
        let (stage, _) = watch::channel(Stage::Arriving);
        let shared = Arc::new(Shared {
            label: self.label,
            stage,
            timers: Mutex::new(TimerSet::new()),
            wake: Notify::new(),
            firing: ReentrantMutex::new(()),
            observers: Mutex::new(self.observers),
            telemetry: self.telemetry,
        });
        let driver = runtime.spawn(drive(Arc::clone(&shared)));
        let handle = StageHandle { shared };

        let auto = handle.clone();
        handle.add_timer(
            move || auto.set_stage(Stage::Present),
            self.timing.present_at,
        );
        let auto = handle.clone();
        handle.add_timer(move || auto.set_stage(Stage::Active), self.timing.active_at);

        Ok(StageController {
            handle,
            timing: self.timing,
            driver: Some(driver),
            report: None,
        })
    }
}

/// Owner of one cue's stage lifecycle.
///
/// Dropping the controller (or calling [`teardown`](Self::teardown)) cancels
/// every timer registered through it, including the two automatic ones.
pub struct StageController {
    handle: StageHandle,
    timing: StageTiming,
    driver: Option<JoinHandle<()>>,
    report: Option<TeardownReport>,
}

impl fmt::Debug for StageController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageController")
            .field("handle", &self.handle)
            .field("timing", &self.timing)
            .field("torn_down", &self.report.is_some())
            .finish()
    }
}

impl StageController {
    /// Creates a controller with the given timing.
    pub fn new(timing: StageTiming) -> Result<Self, LifecycleError> {
        StageControllerBuilder::new(timing).build()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder(timing: StageTiming) -> StageControllerBuilder {
        StageControllerBuilder::new(timing)
    }

    /// Timing captured at creation.
    #[must_use]
    pub const fn timing(&self) -> StageTiming {
        self.timing
    }

    /// Non-owning handle for callbacks.
    #[must_use]
    pub fn handle(&self) -> StageHandle {
        self.handle.clone()
    }

    /// Current stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.handle.stage()
    }

    /// See [`StageHandle::set_stage`].
    pub fn set_stage(&self, stage: Stage) {
        self.handle.set_stage(stage);
    }

    /// See [`StageHandle::add_timer`].
    pub fn add_timer<F>(&self, callback: F, delay: Duration) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.add_timer(callback, delay)
    }

    /// See [`StageHandle::subscribe`].
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Stage> {
        self.handle.subscribe()
    }

    /// See [`StageHandle::observe`].
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(StageChange) + Send + Sync + 'static,
    {
        self.handle.observe(observer);
    }

    /// Whether teardown already ran.
    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.report.is_some()
    }

    /// Cancels every pending timer and stops the driver. Repeated calls
    /// return the first report and do nothing else.
    ///
    /// When this returns, no timer callback of this controller is running or
    /// will run.
    pub fn teardown(&mut self) -> TeardownReport {
        if let Some(report) = self.report {
            return report;
        }
        let shared = &self.handle.shared;
        let (cancelled, fired) = {
            let mut timers = shared.timers.lock();
            (timers.cancel_all(), timers.fired())
        };
        let report = TeardownReport {
            cancelled: cancelled.count(),
            fired,
        };
        drop(cancelled);
        let observers = std::mem::take(&mut *shared.observers.lock());
        drop(observers);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        // Reentrant so a callback that tears down its own controller does not
        // deadlock.
        drop(shared.firing.lock());

        tracing::debug!(
            cue = %shared.label,
            cancelled = report.cancelled,
            fired = report.fired,
            "stage controller torn down"
        );
        if let Some(tel) = &shared.telemetry {
            tel.torn_down(&shared.label, report);
        }
        self.report = Some(report);
        report
    }

    /// Tears down and consumes the controller.
    pub fn dispose(mut self) -> TeardownReport {
        self.teardown()
    }
}

impl Drop for StageController {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn drive(shared: Arc<Shared>) {
    loop {
        let (next, closed) = {
            let timers = shared.timers.lock();
            (timers.next_deadline(), timers.is_closed())
        };
        if closed {
            break;
        }
        match next {
            Some(deadline) => {
                tokio::select! {
                    () = time::sleep_until(deadline) => {}
                    () = shared.wake.notified() => continue,
                }
            }
            None => {
                shared.wake.notified().await;
                continue;
            }
        }
        loop {
            let _firing = shared.firing.lock();
            let due = shared.timers.lock().pop_due(Instant::now());
            match due {
                Some(timer) => timer.fire(),
                None => break,
            }
        }
    }
}

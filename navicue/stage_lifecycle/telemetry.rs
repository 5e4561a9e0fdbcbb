use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use parking_lot::Mutex;
use shared_diagnostics::{
    DiagnosticLevel, DiagnosticLine, DiagnosticRecord, DiagnosticSink, JsonDiagnosticSink,
};
use shared_event_bus::{CueEvent, EventPublisher};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
};

use crate::{
    controller::{StageChange, TeardownReport},
    timer_set::TimerHandle,
};

/// Builder configuring lifecycle telemetry.
pub struct LifecycleTelemetryBuilder {
    module: String,
    diagnostics_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl LifecycleTelemetryBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            diagnostics_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines journal path.
    #[must_use]
    pub fn diagnostics_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.diagnostics_path = Some(path.into());
        self
    }

    /// Assigns the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Finalizes the builder, opening the journal if one was configured.
    pub fn build(self) -> Result<LifecycleTelemetry> {
        let journal = self
            .diagnostics_path
            .map(JsonDiagnosticSink::new)
            .transpose()?;
        Ok(LifecycleTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                journal,
                outbox: self.event_publisher.map(Outbox::new),
            }),
        })
    }
}

/// Journal and event hooks for stage controllers.
#[derive(Clone)]
pub struct LifecycleTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for LifecycleTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleTelemetry")
            .field("module", &self.inner.module)
            .field("journal", &self.inner.journal.is_some())
            .field("publisher", &self.inner.outbox.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    journal: Option<JsonDiagnosticSink>,
    outbox: Option<Outbox>,
}

enum OutboxMsg {
    Event(CueEvent),
    Flush(oneshot::Sender<()>),
}

// Events reach the publisher through one forwarding task, in call order.
struct Outbox {
    publisher: Arc<dyn EventPublisher>,
    sender: Mutex<Option<mpsc::UnboundedSender<OutboxMsg>>>,
}

impl Outbox {
    fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher,
            sender: Mutex::default(),
        }
    }

    /// Queues `msg`, starting the forwarder on the current runtime when none
    /// is alive. Returns `false` if there is no runtime to run it on.
    fn send(&self, msg: OutboxMsg) -> bool {
        let mut sender = self.sender.lock();
        let msg = match sender.as_ref() {
            Some(tx) => match tx.send(msg) {
                Ok(()) => return true,
                // The runtime that ran the forwarder is gone.
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };
        let Ok(handle) = Handle::try_current() else {
            return false;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(forward(Arc::clone(&self.publisher), rx));
        let sent = tx.send(msg).is_ok();
        *sender = Some(tx);
        sent
    }
}

async fn forward(
    publisher: Arc<dyn EventPublisher>,
    mut rx: mpsc::UnboundedReceiver<OutboxMsg>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            OutboxMsg::Event(event) => {
                if let Err(err) = publisher.publish(event).await {
                    tracing::warn!(error = ?err, "lifecycle event publish failed");
                }
            }
            OutboxMsg::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl LifecycleTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> LifecycleTelemetryBuilder {
        LifecycleTelemetryBuilder::new(module)
    }

    /// Module name stamped on journal entries.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Appends a line to the journal, if one is configured.
    pub fn record(&self, cue: &str, level: DiagnosticLevel, line: DiagnosticLine) -> Result<()> {
        if let Some(journal) = &self.inner.journal {
            let line = line.field("module", &self.inner.module);
            journal.emit(&DiagnosticRecord::new(cue, level, line))?;
        }
        Ok(())
    }

    /// Queues an event for the publisher without waiting for it. Events are
    /// published one at a time, in the order they were queued.
    pub fn publish(&self, event: CueEvent) {
        let Some(outbox) = &self.inner.outbox else {
            return;
        };
        let event_type = event.event_type.clone();
        if !outbox.send(OutboxMsg::Event(event)) {
            tracing::warn!(event = %event_type, "no runtime to publish lifecycle event");
        }
    }

    /// Resolves once every event queued before the call has been handed to
    /// the publisher.
    pub async fn flush(&self) {
        let Some(outbox) = &self.inner.outbox else {
            return;
        };
        let (done, waiter) = oneshot::channel();
        if outbox.send(OutboxMsg::Flush(done)) {
            let _ = waiter.await;
        }
    }

    pub(crate) fn stage_changed(&self, cue: &str, change: StageChange) {
        let line = DiagnosticLine::new("stage")
            .field("from", change.from)
            .field("to", change.to);
        self.record_quietly(cue, DiagnosticLevel::Debug, line);
        self.publish(CueEvent::stage_changed(
            cue,
            change.from.as_str(),
            change.to.as_str(),
        ));
    }

    pub(crate) fn timer_scheduled(&self, cue: &str, timer: TimerHandle, delay: Duration) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.publish(CueEvent::timer_scheduled(cue, timer.id().get(), delay_ms));
    }

    pub(crate) fn torn_down(&self, cue: &str, report: TeardownReport) {
        let line = DiagnosticLine::new("teardown")
            .field("cancelled", report.cancelled)
            .field("fired", report.fired);
        self.record_quietly(cue, DiagnosticLevel::Debug, line);
        self.publish(CueEvent::torn_down(cue, report.cancelled));
    }

    fn record_quietly(&self, cue: &str, level: DiagnosticLevel, line: DiagnosticLine) {
        if let Err(err) = self.record(cue, level, line) {
            tracing::warn!(error = ?err, "lifecycle journal write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared_event_bus::{MemoryEventBus, LIFECYCLE_TORN_DOWN, STAGE_CHANGED, TIMER_SCHEDULED};
    use tempfile::tempdir;

    use crate::{Stage, StageController, StageTiming};

    #[tokio::test(start_paused = true)]
    async fn journals_and_publishes_transitions() {
        let dir = tempdir().unwrap();
        let journal = dir.path().join("lifecycle.jsonl");
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = LifecycleTelemetry::builder("navicue.stage")
            .diagnostics_path(&journal)
            .event_publisher(bus.clone())
            .build()
            .unwrap();

        let controller = StageController::builder(StageTiming::from_millis(10, 20))
            .label("tap-ripple")
            .telemetry(telemetry.clone())
            .build()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(controller.stage(), Stage::Active);
        drop(controller);
        telemetry.flush().await;

        let changes = bus.events_of(STAGE_CHANGED);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].payload["to"], "active");
        assert_eq!(changes[1].cue, "tap-ripple");
        assert_eq!(bus.events_of(LIFECYCLE_TORN_DOWN).len(), 1);

        let content = std::fs::read_to_string(journal).unwrap();
        assert!(content.contains("\"tag\":\"stage\""));
        assert!(content.contains("\"tag\":\"teardown\""));
    }

    struct SlowFirstStage {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventPublisher for SlowFirstStage {
        async fn publish(&self, event: CueEvent) -> Result<()> {
            if event.event_type == STAGE_CHANGED && event.payload["to"] == "present" {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let label = match event.payload.get("to").and_then(|to| to.as_str()) {
                Some(to) => format!("{}:{to}", event.event_type),
                None => event.event_type,
            };
            self.seen.lock().push(label);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_publisher_keeps_event_order() {
        let publisher = Arc::new(SlowFirstStage {
            seen: Mutex::new(Vec::new()),
        });
        let telemetry = LifecycleTelemetry::builder("navicue.stage")
            .event_publisher(publisher.clone())
            .build()
            .unwrap();
        let controller = StageController::builder(StageTiming::from_millis(10, 12))
            .telemetry(telemetry.clone())
            .build()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(13)).await;
        drop(controller);
        telemetry.flush().await;

        assert_eq!(
            *publisher.seen.lock(),
            vec![
                TIMER_SCHEDULED.to_string(),
                TIMER_SCHEDULED.to_string(),
                format!("{STAGE_CHANGED}:present"),
                format!("{STAGE_CHANGED}:active"),
                LIFECYCLE_TORN_DOWN.to_string(),
            ]
        );
    }

    #[test]
    fn record_without_journal_is_a_no_op() {
        let telemetry = LifecycleTelemetry::builder("quiet").build().unwrap();
        telemetry
            .record("cue", DiagnosticLevel::Info, DiagnosticLine::new("noop"))
            .unwrap();
        telemetry.publish(CueEvent::mounted("cue"));
        assert_eq!(telemetry.module(), "quiet");
    }
}

//! A session is one mounted cue: its controller, its completion, and the
//! task that delivers stage changes and input to it.

use std::{fmt, sync::Arc};

use navicue_stage::{
    LifecycleTelemetry, Stage, StageChange, StageController, StageHandle, StageTiming,
    TeardownReport,
};
use shared_diagnostics::DiagnosticSink;
use shared_event_bus::CueEvent;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    cue::{CueContext, CueInput, NaviCue},
    error::RuntimeError,
    host::{Completion, HostContract},
};

type StageObserver = Arc<dyn Fn(StageChange) + Send + Sync>;

/// Mount-time knobs supplied by the runtime, not by the cue.
#[derive(Clone, Default)]
pub struct SessionOptions {
    timing: Option<StageTiming>,
    telemetry: Option<LifecycleTelemetry>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    observers: Vec<StageObserver>,
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("timing", &self.timing)
            .field("telemetry", &self.telemetry)
            .field("diagnostics", &self.diagnostics.is_some())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SessionOptions {
    /// Options that keep the cue's own timing and log nowhere.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the cue's timing.
    #[must_use]
    pub fn timing(mut self, timing: StageTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Attaches lifecycle telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: LifecycleTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Destination of the cue's diagnostic lines.
    #[must_use]
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Host callback for every stage change, registered before the
    /// controller starts so even a zero-delay transition reaches it.
    #[must_use]
    pub fn observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(StageChange) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }
}

enum SessionMsg {
    Enter(Stage),
    Input(CueInput),
}

/// One mounted cue. Unmounting, explicitly or by drop, cancels every timer
/// of the cue and disarms its completion.
pub struct CueSession {
    cue_id: String,
    controller: StageController,
    completion: Completion,
    inbox: mpsc::UnboundedSender<SessionMsg>,
    pump: Option<JoinHandle<()>>,
    report: Option<TeardownReport>,
}

impl fmt::Debug for CueSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CueSession")
            .field("cue", &self.cue_id)
            .field("stage", &self.stage())
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

impl CueSession {
    /// Mounts `cue` and starts its automatic stage progression.
    pub fn mount(
        cue: Box<dyn NaviCue>,
        host: HostContract,
        options: SessionOptions,
    ) -> Result<Self, RuntimeError> {
        let cue_id = cue.id().to_string();
        let timing = options.timing.unwrap_or_else(|| cue.timing());
        let (payload, on_complete) = host.into_parts();
        let (inbox, rx) = mpsc::unbounded_channel();

        // Queued before the controller exists so it is always delivered first.
        let _ = inbox.send(SessionMsg::Enter(Stage::Arriving));
        let stage_tx = inbox.clone();
        let mut builder = StageController::builder(timing)
            .label(cue_id.clone())
            .observer(move |change| {
                let _ = stage_tx.send(SessionMsg::Enter(change.to));
            });
        for observer in options.observers {
            builder = builder.observer(move |change| observer(change));
        }
        if let Some(tel) = options.telemetry.clone() {
            builder = builder.telemetry(tel);
        }
        let controller = builder.build()?;

        let completion = Completion::new(cue_id.clone(), on_complete, options.telemetry.clone());
        let context = CueContext::new(
            &cue_id,
            controller.handle(),
            completion.clone(),
            options.diagnostics,
            payload,
        );
        let pump = tokio::spawn(run_pump(cue, context, rx));

        tracing::info!(cue = %cue_id, ?timing, "cue mounted");
        if let Some(tel) = &options.telemetry {
            tel.publish(CueEvent::mounted(cue_id.clone()));
        }
        Ok(Self {
            cue_id,
            controller,
            completion,
            inbox,
            pump: Some(pump),
            report: None,
        })
    }

    /// Id of the mounted cue.
    #[must_use]
    pub fn cue_id(&self) -> &str {
        &self.cue_id
    }

    /// Current stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.controller.stage()
    }

    /// Receiver observing stage changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Stage> {
        self.controller.subscribe()
    }

    /// Non-owning controller handle.
    #[must_use]
    pub fn handle(&self) -> StageHandle {
        self.controller.handle()
    }

    /// Timing the controller was created with.
    #[must_use]
    pub const fn timing(&self) -> StageTiming {
        self.controller.timing()
    }

    /// Forwards a gesture to the cue.
    pub fn send_input(&self, input: CueInput) -> Result<(), RuntimeError> {
        if !self.is_mounted() {
            return Err(RuntimeError::Unmounted(self.cue_id.clone()));
        }
        tracing::debug!(cue = %self.cue_id, input = input.kind(), "input received");
        self.inbox
            .send(SessionMsg::Input(input))
            .map_err(|_| RuntimeError::Unmounted(self.cue_id.clone()))
    }

    /// Whether the host completion fired.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion.is_completed()
    }

    /// Waits for the host completion.
    pub async fn completed(&self) {
        self.completion.wait().await;
    }

    /// Whether the session is still mounted.
    #[must_use]
    pub const fn is_mounted(&self) -> bool {
        self.report.is_none()
    }

    /// Cancels every pending timer, stops input delivery, and disarms the
    /// completion. Repeated calls return the first report.
    pub fn unmount(&mut self) -> TeardownReport {
        if let Some(report) = self.report {
            return report;
        }
        self.completion.disarm();
        let report = self.controller.teardown();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        tracing::info!(
            cue = %self.cue_id,
            cancelled = report.cancelled,
            completed = self.is_complete(),
            "cue unmounted"
        );
        self.report = Some(report);
        report
    }
}

impl Drop for CueSession {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn run_pump(
    mut cue: Box<dyn NaviCue>,
    ctx: CueContext,
    mut rx: mpsc::UnboundedReceiver<SessionMsg>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            SessionMsg::Enter(stage) => cue.on_stage(stage, &ctx),
            SessionMsg::Input(input) => cue.on_input(input, &ctx),
        }
    }
}

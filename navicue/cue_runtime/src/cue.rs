use std::{fmt, sync::Arc, time::Duration};

use navicue_stage::{Stage, StageHandle, StageTiming, TimerHandle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_diagnostics::{DiagnosticLevel, DiagnosticLine, DiagnosticRecord, DiagnosticSink};

use crate::host::Completion;

/// User gesture delivered to a mounted cue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CueInput {
    /// Single tap at normalized coordinates.
    Tap {
        /// Horizontal position in `0.0..=1.0`.
        x: f32,
        /// Vertical position in `0.0..=1.0`.
        y: f32,
    },
    /// Drag by a normalized offset.
    Drag {
        /// Horizontal offset.
        dx: f32,
        /// Vertical offset.
        dy: f32,
    },
    /// Finger down for a hold gesture.
    HoldStart,
    /// Finger up after a hold gesture.
    HoldEnd,
    /// An explicit choice among the cue's options.
    Choose(String),
}

impl CueInput {
    /// Short name used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tap { .. } => "tap",
            Self::Drag { .. } => "drag",
            Self::HoldStart => "hold_start",
            Self::HoldEnd => "hold_end",
            Self::Choose(_) => "choose",
        }
    }
}

/// A single animated micro-interaction.
///
/// The runtime calls [`on_stage`](Self::on_stage) once with `arriving` right
/// after mount and then once per stage change, in order, interleaved with
/// [`on_input`](Self::on_input) in the order things happened.
pub trait NaviCue: Send + 'static {
    /// Stable identifier, also used as the log/event label.
    fn id(&self) -> &str;

    /// Auto-advance timing this cue wants unless configuration overrides it.
    fn timing(&self) -> StageTiming {
        StageTiming::default()
    }

    /// Reacts to entering `stage`.
    fn on_stage(&mut self, stage: Stage, ctx: &CueContext) {
        let _ = (stage, ctx);
    }

    /// Reacts to a user gesture.
    fn on_input(&mut self, input: CueInput, ctx: &CueContext);
}

/// Everything a cue may touch while mounted. Cheap to clone into timers.
#[derive(Clone)]
pub struct CueContext {
    cue: Arc<str>,
    stage: StageHandle,
    completion: Completion,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    payload: Arc<Value>,
}

impl fmt::Debug for CueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CueContext")
            .field("cue", &self.cue)
            .field("stage", &self.stage.stage())
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

impl CueContext {
    pub(crate) fn new(
        cue: &str,
        stage: StageHandle,
        completion: Completion,
        diagnostics: Option<Arc<dyn DiagnosticSink>>,
        payload: Value,
    ) -> Self {
        Self {
            cue: Arc::from(cue),
            stage,
            completion,
            diagnostics,
            payload: Arc::new(payload),
        }
    }

    /// Id of the mounted cue.
    #[must_use]
    pub fn cue_id(&self) -> &str {
        &self.cue
    }

    /// Host payload, `null` when none was supplied.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Current stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage.stage()
    }

    /// Sets the stage unconditionally.
    pub fn set_stage(&self, stage: Stage) {
        self.stage.set_stage(stage);
    }

    /// Underlying controller handle.
    #[must_use]
    pub const fn handle(&self) -> &StageHandle {
        &self.stage
    }

    /// Schedules `callback` on the cue's controller; cancelled on unmount.
    pub fn add_timer<F>(&self, callback: F, delay: Duration) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.stage.add_timer(callback, delay)
    }

    /// Moves to `stage` after `delay`.
    pub fn stage_after(&self, stage: Stage, delay: Duration) -> TimerHandle {
        let handle = self.stage.clone();
        self.stage.add_timer(move || handle.set_stage(stage), delay)
    }

    /// Moves to `afterglow` and completes after `delay`.
    pub fn finish_after(&self, delay: Duration) -> TimerHandle {
        let ctx = self.clone();
        self.stage.add_timer(move || ctx.finish(), delay)
    }

    /// Moves to `afterglow` and completes now.
    pub fn finish(&self) {
        self.set_stage(Stage::Afterglow);
        self.complete();
    }

    /// Invokes the host completion. Returns `false` if it already fired or
    /// the cue was unmounted.
    pub fn complete(&self) -> bool {
        self.completion.complete()
    }

    /// Whether the host completion fired.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion.is_completed()
    }

    /// Reports a meaningful moment on the diagnostic channel.
    pub fn emit(&self, line: DiagnosticLine) {
        self.emit_at(DiagnosticLevel::Info, line);
    }

    /// Reports something the cue tolerated but did not expect.
    pub fn warn(&self, line: DiagnosticLine) {
        self.emit_at(DiagnosticLevel::Warn, line);
    }

    fn emit_at(&self, level: DiagnosticLevel, line: DiagnosticLine) {
        tracing::info!(cue = %self.cue, ?level, "{line}");
        if let Some(sink) = &self.diagnostics {
            let record = DiagnosticRecord::new(self.cue.as_ref(), level, line);
            if let Err(err) = sink.emit(&record) {
                tracing::warn!(cue = %self.cue, error = ?err, "diagnostic sink failed");
            }
        }
    }
}

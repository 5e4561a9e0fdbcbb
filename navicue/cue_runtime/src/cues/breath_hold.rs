use std::time::Duration;

use navicue_stage::Stage;
use serde_json::Value;
use shared_diagnostics::DiagnosticLine;
use tokio::time::Instant;

use super::payload_u64;
use crate::cue::{CueContext, CueInput, NaviCue};

const DEFAULT_HOLD: Duration = Duration::from_millis(2000);
const AFTERGLOW_AFTER: Duration = Duration::from_millis(3000);

/// Asks for a sustained hold while `active`. Releasing early only resets it.
#[derive(Debug, Clone)]
pub struct BreathHold {
    threshold: Duration,
    hold_started: Option<Instant>,
    settled: bool,
}

impl BreathHold {
    /// Catalog id.
    pub const ID: &'static str = "breath-hold";

    /// Reads `hold_ms` (default 2000) from the payload.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let threshold =
            payload_u64(payload, "hold_ms").map_or(DEFAULT_HOLD, Duration::from_millis);
        Self {
            threshold,
            hold_started: None,
            settled: false,
        }
    }

    fn release(&mut self, ctx: &CueContext) {
        let Some(started) = self.hold_started.take() else {
            return;
        };
        let held = started.elapsed();
        let held_ms = u64::try_from(held.as_millis()).unwrap_or(u64::MAX);
        if held < self.threshold {
            ctx.warn(
                DiagnosticLine::new("hold")
                    .field("outcome", "released_early")
                    .field("held_ms", held_ms),
            );
            return;
        }
        self.settled = true;
        ctx.emit(
            DiagnosticLine::new("hold")
                .field("outcome", "held")
                .field("held_ms", held_ms),
        );
        ctx.set_stage(Stage::Resonant);
        ctx.finish_after(AFTERGLOW_AFTER);
    }
}

impl NaviCue for BreathHold {
    fn id(&self) -> &str {
        Self::ID
    }

    fn on_stage(&mut self, stage: Stage, ctx: &CueContext) {
        if stage == Stage::Active && !self.settled {
            let threshold_ms = u64::try_from(self.threshold.as_millis()).unwrap_or(u64::MAX);
            ctx.emit(DiagnosticLine::new("prompt").field("hold_ms", threshold_ms));
        }
    }

    fn on_input(&mut self, input: CueInput, ctx: &CueContext) {
        if self.settled || ctx.stage() != Stage::Active {
            return;
        }
        match input {
            CueInput::HoldStart => {
                self.hold_started = Some(Instant::now());
                tracing::debug!(cue = Self::ID, "hold started");
            }
            CueInput::HoldEnd => self.release(ctx),
            _ => {}
        }
    }
}

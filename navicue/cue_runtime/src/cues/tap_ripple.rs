use std::time::Duration;

use navicue_stage::Stage;
use serde_json::Value;
use shared_diagnostics::DiagnosticLine;

use super::payload_u64;
use crate::cue::{CueContext, CueInput, NaviCue};

const DEFAULT_TAPS: u32 = 3;
const RESONANT_AFTER: Duration = Duration::from_millis(1500);
const AFTERGLOW_AFTER: Duration = Duration::from_millis(2500);

/// Counts taps while `active`; enough taps settle the ripple.
#[derive(Debug, Clone)]
pub struct TapRipple {
    required: u32,
    taps: u32,
    settled: bool,
}

impl TapRipple {
    /// Catalog id.
    pub const ID: &'static str = "tap-ripple";

    /// Reads `taps` (default 3, clamped to `1..=99`) from the payload.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let required = payload_u64(payload, "taps")
            .and_then(|n| u32::try_from(n.clamp(1, 99)).ok())
            .unwrap_or(DEFAULT_TAPS);
        Self {
            required,
            taps: 0,
            settled: false,
        }
    }
}

impl NaviCue for TapRipple {
    fn id(&self) -> &str {
        Self::ID
    }

    fn on_stage(&mut self, stage: Stage, ctx: &CueContext) {
        if stage == Stage::Active && !self.settled {
            ctx.emit(DiagnosticLine::new("prompt").field("taps_needed", self.required));
        }
    }

    fn on_input(&mut self, input: CueInput, ctx: &CueContext) {
        let CueInput::Tap { x, y } = input else {
            return;
        };
        if self.settled || ctx.stage() != Stage::Active {
            return;
        }
        self.taps += 1;
        tracing::debug!(cue = Self::ID, taps = self.taps, x, y, "tap");
        if self.taps < self.required {
            return;
        }
        self.settled = true;
        ctx.emit(
            DiagnosticLine::new("ripple")
                .field("outcome", "settled")
                .field("taps", self.taps),
        );
        let next = ctx.clone();
        ctx.add_timer(
            move || {
                next.set_stage(Stage::Resonant);
                next.finish_after(AFTERGLOW_AFTER);
            },
            RESONANT_AFTER,
        );
    }
}

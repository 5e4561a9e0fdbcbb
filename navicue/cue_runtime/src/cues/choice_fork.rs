use std::time::Duration;

use navicue_stage::Stage;
use serde_json::Value;
use shared_diagnostics::DiagnosticLine;

use crate::cue::{CueContext, CueInput, NaviCue};

const DEFAULT_OPTIONS: [&str; 3] = ["calm", "curious", "steady"];
const AFTERGLOW_AFTER: Duration = Duration::from_millis(2000);

/// Offers a fixed set of options. Picking one jumps straight to `resonant`,
/// even before the cue reached `active`.
#[derive(Debug, Clone)]
pub struct ChoiceFork {
    options: Vec<String>,
    chosen: Option<String>,
}

impl ChoiceFork {
    /// Catalog id.
    pub const ID: &'static str = "choice-fork";

    /// Reads the `options` string array from the payload; falls back to
    /// `calm`, `curious`, `steady` when absent or empty.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let options: Vec<String> = payload
            .get("options")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let options = if options.is_empty() {
            DEFAULT_OPTIONS.iter().map(|s| (*s).to_owned()).collect()
        } else {
            options
        };
        Self {
            options,
            chosen: None,
        }
    }

    /// The option picked so far.
    #[must_use]
    pub fn chosen(&self) -> Option<&str> {
        self.chosen.as_deref()
    }
}

impl NaviCue for ChoiceFork {
    fn id(&self) -> &str {
        Self::ID
    }

    fn on_stage(&mut self, stage: Stage, ctx: &CueContext) {
        if self.chosen.is_some() && stage < Stage::Resonant {
            // An automatic advance landed after the choice; put the stage back.
            let target = if ctx.is_complete() {
                Stage::Afterglow
            } else {
                Stage::Resonant
            };
            ctx.set_stage(target);
            return;
        }
        if stage != Stage::Active || self.chosen.is_some() {
            return;
        }
        ctx.emit(DiagnosticLine::new("prompt").field("options", self.options.join(",")));
    }

    fn on_input(&mut self, input: CueInput, ctx: &CueContext) {
        let CueInput::Choose(option) = input else {
            return;
        };
        if self.chosen.is_some() || ctx.stage() > Stage::Active {
            return;
        }
        if !self.options.contains(&option) {
            ctx.warn(DiagnosticLine::new("choice").field("rejected", &option));
            return;
        }
        ctx.emit(DiagnosticLine::new("choice").field("picked", &option));
        self.chosen = Some(option);
        ctx.set_stage(Stage::Resonant);
        ctx.finish_after(AFTERGLOW_AFTER);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn payload_options_replace_defaults() {
        let fork = ChoiceFork::from_payload(&json!({ "options": ["left", "right", 3] }));
        assert_eq!(fork.options, vec!["left", "right"]);
        assert!(fork.chosen().is_none());

        let fallback = ChoiceFork::from_payload(&json!({ "options": [] }));
        assert_eq!(fallback.options, vec!["calm", "curious", "steady"]);
    }
}

//! Content-light cues covering the three interaction shapes real cues use:
//! counted taps, a timed hold, and an explicit choice.

mod breath_hold;
mod choice_fork;
mod tap_ripple;

pub use breath_hold::BreathHold;
pub use choice_fork::ChoiceFork;
pub use tap_ripple::TapRipple;

use serde_json::Value;

fn payload_u64(payload: &Value, key: &str) -> Option<u64> {
    payload.get(key).and_then(Value::as_u64)
}

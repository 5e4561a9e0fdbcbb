use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before `arriving → present`.
pub const DEFAULT_PRESENT_AT: Duration = Duration::from_millis(1200);
/// Default delay before `present → active`, measured from creation.
pub const DEFAULT_ACTIVE_AT: Duration = Duration::from_millis(3500);

/// Offsets, measured from controller creation, of the two automatic
/// transitions. Copied into the controller when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTiming {
    /// When the stage becomes `present`.
    #[serde(rename = "present_at_ms", with = "millis")]
    pub present_at: Duration,
    /// When the stage becomes `active`.
    #[serde(rename = "active_at_ms", with = "millis")]
    pub active_at: Duration,
}

impl Default for StageTiming {
    fn default() -> Self {
        Self {
            present_at: DEFAULT_PRESENT_AT,
            active_at: DEFAULT_ACTIVE_AT,
        }
    }
}

impl StageTiming {
    /// Timing from millisecond offsets.
    #[must_use]
    pub const fn from_millis(present_at_ms: u64, active_at_ms: u64) -> Self {
        Self {
            present_at: Duration::from_millis(present_at_ms),
            active_at: Duration::from_millis(active_at_ms),
        }
    }

    /// Replaces the `present` offset.
    #[must_use]
    pub fn with_present_at(mut self, present_at: Duration) -> Self {
        self.present_at = present_at;
        self
    }

    /// Replaces the `active` offset.
    #[must_use]
    pub fn with_active_at(mut self, active_at: Duration) -> Self {
        self.active_at = active_at;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cue_pacing() {
        let timing = StageTiming::default();
        assert_eq!(timing.present_at, Duration::from_millis(1200));
        assert_eq!(timing.active_at, Duration::from_millis(3500));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let timing: StageTiming = serde_json::from_str(r#"{ "active_at_ms": 900 }"#).unwrap();
        assert_eq!(timing.present_at, DEFAULT_PRESENT_AT);
        assert_eq!(timing.active_at, Duration::from_millis(900));
    }

    #[test]
    fn serializes_as_milliseconds() {
        let json = serde_json::to_value(StageTiming::from_millis(100, 300)).unwrap();
        assert_eq!(json["present_at_ms"], 100);
        assert_eq!(json["active_at_ms"], 300);
    }
}

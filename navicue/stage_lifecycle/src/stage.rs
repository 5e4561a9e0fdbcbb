use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::UnknownStage;

/// Phase of a cue's staged narrative.
///
/// The variants are totally ordered in narrative order. The controller does
/// not enforce that order; any stage may be set at any time.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Initial stage on mount.
    #[default]
    Arriving,
    /// Prompt is shown.
    Present,
    /// Waiting for, or handling, user interaction.
    Active,
    /// Insight after the interaction.
    Resonant,
    /// Terminal display state.
    Afterglow,
}

impl Stage {
    /// All stages in narrative order.
    pub const ALL: [Self; 5] = [
        Self::Arriving,
        Self::Present,
        Self::Active,
        Self::Resonant,
        Self::Afterglow,
    ];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Arriving => "arriving",
            Self::Present => "present",
            Self::Active => "active",
            Self::Resonant => "resonant",
            Self::Afterglow => "afterglow",
        }
    }

    /// Following stage in narrative order, `None` after `afterglow`.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Arriving => Some(Self::Present),
            Self::Present => Some(Self::Active),
            Self::Active => Some(Self::Resonant),
            Self::Resonant => Some(Self::Afterglow),
            Self::Afterglow => None,
        }
    }

    /// `afterglow` is terminal by convention.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Afterglow)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownStage(wanted.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered_by_narrative() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
        assert!(Stage::Arriving < Stage::Afterglow);
        assert_eq!(Stage::default(), Stage::Arriving);
    }

    #[test]
    fn next_walks_the_narrative() {
        let mut walked = vec![Stage::Arriving];
        while let Some(next) = walked.last().and_then(|s| s.next()) {
            walked.push(next);
        }
        assert_eq!(walked, Stage::ALL.to_vec());
        assert!(Stage::Afterglow.is_terminal());
        assert!(!Stage::Resonant.is_terminal());
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!(" Resonant ".parse::<Stage>().unwrap(), Stage::Resonant);
        let err = "sleeping".parse::<Stage>().unwrap_err();
        assert_eq!(err, UnknownStage("sleeping".into()));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Stage::Afterglow).unwrap();
        assert_eq!(json, "\"afterglow\"");
        let back: Stage = serde_json::from_str("\"present\"").unwrap();
        assert_eq!(back, Stage::Present);
    }
}

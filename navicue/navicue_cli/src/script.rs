//! Scripted input timelines: `tap@4000,hold@4000..6500,choose:calm@3600`.

use std::{str::FromStr, time::Duration};

use navicue_runtime::CueInput;
use thiserror::Error;

/// Rejected script entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseInputError {
    /// The entry has no `@<ms>` offset.
    #[error("`{0}` is missing an `@<ms>` offset")]
    MissingOffset(String),
    /// The offset is not a whole number of milliseconds.
    #[error("`{0}` has an invalid millisecond offset")]
    BadOffset(String),
    /// The gesture name is not one of `tap`, `hold`, `choose:<option>`.
    #[error("unknown gesture `{0}`")]
    UnknownGesture(String),
    /// `choose:` with nothing after it.
    #[error("`{0}` names no option")]
    EmptyChoice(String),
    /// A hold needs a `start..end` range.
    #[error("`{0}` needs a `<start>..<end>` range")]
    MissingRange(String),
    /// A hold that ends before it starts.
    #[error("hold ends at {end} ms before it starts at {start} ms")]
    InvertedHold {
        /// Start offset.
        start: u64,
        /// End offset.
        end: u64,
    },
}

/// One input delivered `at` after mount.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedInput {
    pub at: Duration,
    pub input: CueInput,
}

/// Inputs ordered by offset; entries with equal offsets keep script order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputScript {
    steps: Vec<ScriptedInput>,
}

impl InputScript {
    pub fn steps(&self) -> &[ScriptedInput] {
        &self.steps
    }
}

impl FromStr for InputScript {
    type Err = ParseInputError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut steps = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            parse_entry(entry, &mut steps)?;
        }
        steps.sort_by_key(|step| step.at);
        Ok(Self { steps })
    }
}

fn parse_entry(entry: &str, steps: &mut Vec<ScriptedInput>) -> Result<(), ParseInputError> {
    let (gesture, offset) = entry
        .rsplit_once('@')
        .ok_or_else(|| ParseInputError::MissingOffset(entry.to_owned()))?;
    let gesture = gesture.trim();
    let offset = offset.trim();

    if gesture == "hold" {
        let (start, end) = offset
            .split_once("..")
            .ok_or_else(|| ParseInputError::MissingRange(entry.to_owned()))?;
        let start = millis(entry, start)?;
        let end = millis(entry, end)?;
        if end < start {
            return Err(ParseInputError::InvertedHold { start, end });
        }
        steps.push(step(start, CueInput::HoldStart));
        steps.push(step(end, CueInput::HoldEnd));
        return Ok(());
    }

    let at = millis(entry, offset)?;
    let input = match gesture.split_once(':') {
        None if gesture == "tap" => CueInput::Tap { x: 0.5, y: 0.5 },
        Some(("choose", option)) => {
            let option = option.trim();
            if option.is_empty() {
                return Err(ParseInputError::EmptyChoice(entry.to_owned()));
            }
            CueInput::Choose(option.to_owned())
        }
        _ => return Err(ParseInputError::UnknownGesture(gesture.to_owned())),
    };
    steps.push(step(at, input));
    Ok(())
}

fn millis(entry: &str, raw: &str) -> Result<u64, ParseInputError> {
    raw.trim()
        .parse()
        .map_err(|_| ParseInputError::BadOffset(entry.to_owned()))
}

fn step(at_ms: u64, input: CueInput) -> ScriptedInput {
    ScriptedInput {
        at: Duration::from_millis(at_ms),
        input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(script: &InputScript) -> Vec<u64> {
        script
            .steps()
            .iter()
            .map(|step| u64::try_from(step.at.as_millis()).unwrap())
            .collect()
    }

    #[test]
    fn parses_and_orders_entries() {
        let script: InputScript = "tap@4000, hold@4000..6500,choose:calm@3600".parse().unwrap();
        assert_eq!(offsets(&script), vec![3600, 4000, 4000, 6500]);
        let inputs: Vec<_> = script.steps().iter().map(|s| s.input.clone()).collect();
        assert_eq!(
            inputs,
            vec![
                CueInput::Choose("calm".into()),
                CueInput::Tap { x: 0.5, y: 0.5 },
                CueInput::HoldStart,
                CueInput::HoldEnd,
            ]
        );
    }

    #[test]
    fn empty_script_is_allowed() {
        assert!("".parse::<InputScript>().unwrap().steps().is_empty());
        assert!(" , ".parse::<InputScript>().unwrap().steps().is_empty());
    }

    #[test]
    fn rejects_malformed_entries() {
        assert_eq!(
            "tap".parse::<InputScript>(),
            Err(ParseInputError::MissingOffset("tap".into()))
        );
        assert_eq!(
            "tap@soon".parse::<InputScript>(),
            Err(ParseInputError::BadOffset("tap@soon".into()))
        );
        assert_eq!(
            "wave@100".parse::<InputScript>(),
            Err(ParseInputError::UnknownGesture("wave".into()))
        );
        assert_eq!(
            "choose:@100".parse::<InputScript>(),
            Err(ParseInputError::EmptyChoice("choose:@100".into()))
        );
        assert_eq!(
            "hold@100".parse::<InputScript>(),
            Err(ParseInputError::MissingRange("hold@100".into()))
        );
        assert_eq!(
            "hold@500..100".parse::<InputScript>(),
            Err(ParseInputError::InvertedHold {
                start: 500,
                end: 100
            })
        );
    }
}

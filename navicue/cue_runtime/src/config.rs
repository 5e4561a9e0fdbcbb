use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use navicue_stage::StageTiming;
use serde::Deserialize;

/// Runtime settings read from a TOML document.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Timing applied to every cue unless a per-cue entry overrides it.
    pub timing: CueOverride,
    /// Diagnostic channel settings.
    pub diagnostics: DiagnosticsConfig,
    /// Lifecycle event settings.
    pub events: EventsConfig,
    /// Per-cue overrides keyed by cue id.
    pub cues: BTreeMap<String, CueOverride>,
    source_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timing: CueOverride::default(),
            diagnostics: DiagnosticsConfig::default(),
            events: EventsConfig::default(),
            cues: BTreeMap::new(),
            source_dir: PathBuf::from("."),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file. Relative paths inside it
    /// resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading runtime config {}", path.display()))?;
        let source_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::parse(&raw, source_dir).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses a TOML document; relative paths resolve against the working
    /// directory.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Self::parse(raw, PathBuf::from("."))
    }

    fn parse(raw: &str, source_dir: PathBuf) -> Result<Self> {
        let document: RuntimeConfigSerde = toml::from_str(raw)?;
        for (id, entry) in &document.cues {
            if id.trim().is_empty() {
                bail!("cue override with an empty id");
            }
            tracing::debug!(cue = %id, ?entry, "cue timing override");
        }
        let mut config = Self {
            timing: document.timing,
            diagnostics: document.diagnostics,
            events: document.events,
            cues: document.cues,
            source_dir,
        };
        if let Some(journal) = config.diagnostics.journal_path.take() {
            config.diagnostics.journal_path = Some(config.resolve_path(journal));
        }
        if let Some(log) = config.events.log_path.take() {
            config.events.log_path = Some(config.resolve_path(log));
        }
        Ok(config)
    }

    /// Effective timing for `cue_id`, starting from the cue's own `fallback`.
    #[must_use]
    pub fn timing_for(&self, cue_id: &str, fallback: StageTiming) -> StageTiming {
        let global = self.timing.apply(fallback);
        self.cues
            .get(cue_id)
            .map_or(global, |entry| entry.apply(global))
    }

    /// Whether any timing key is set for `cue_id`, globally or per cue.
    #[must_use]
    pub fn overrides_timing(&self, cue_id: &str) -> bool {
        !self.timing.is_empty() || self.cues.get(cue_id).is_some_and(|entry| !entry.is_empty())
    }

    /// Resolves a path relative to the configuration file.
    #[must_use]
    pub fn resolve_path(&self, candidate: impl AsRef<Path>) -> PathBuf {
        let candidate = candidate.as_ref();
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.source_dir.join(candidate)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuntimeConfigSerde {
    #[serde(default)]
    timing: CueOverride,
    #[serde(default)]
    diagnostics: DiagnosticsConfig,
    #[serde(default)]
    events: EventsConfig,
    #[serde(default)]
    cues: BTreeMap<String, CueOverride>,
}

/// Optional auto-advance offsets; unset keys keep the underlying value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CueOverride {
    /// Offset of `arriving → present` in milliseconds.
    #[serde(default)]
    pub present_at_ms: Option<u64>,
    /// Offset of `present → active` in milliseconds.
    #[serde(default)]
    pub active_at_ms: Option<u64>,
}

impl CueOverride {
    /// Applies the set keys on top of `base`.
    #[must_use]
    pub fn apply(self, base: StageTiming) -> StageTiming {
        let mut timing = base;
        if let Some(ms) = self.present_at_ms {
            timing = timing.with_present_at(Duration::from_millis(ms));
        }
        if let Some(ms) = self.active_at_ms {
            timing = timing.with_active_at(Duration::from_millis(ms));
        }
        timing
    }

    /// Whether no key is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.present_at_ms.is_none() && self.active_at_ms.is_none()
    }
}

/// Where diagnostic lines go.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// JSON-lines journal, if any.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    /// Echo plain lines to stdout.
    #[serde(default = "default_true")]
    pub echo_stdout: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            echo_stdout: default_true(),
        }
    }
}

/// Where lifecycle events go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    /// JSON-lines event log, if any.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert!(config.diagnostics.echo_stdout);
        assert!(config.diagnostics.journal_path.is_none());
        assert!(config.events.log_path.is_none());
        assert_eq!(
            config.timing_for("tap-ripple", StageTiming::default()),
            StageTiming::default()
        );
        assert!(!config.overrides_timing("tap-ripple"));
    }

    #[test]
    fn per_cue_keys_beat_global_keys() {
        let config = RuntimeConfig::from_toml_str(
            r#"
[timing]
present_at_ms = 1000

[cues.breath-hold]
active_at_ms = 2400
"#,
        )
        .unwrap();
        assert_eq!(
            config.timing_for("breath-hold", StageTiming::default()),
            StageTiming::from_millis(1000, 2400)
        );
        assert_eq!(
            config.timing_for("tap-ripple", StageTiming::from_millis(50, 60)),
            StageTiming::from_millis(1000, 60)
        );
        assert!(config.overrides_timing("choice-fork"));
    }

    #[test]
    fn loads_and_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("navicue.toml");
        fs::write(
            &config_path,
            r#"
[diagnostics]
journal_path = "logs/diagnostics.jsonl"
echo_stdout = false

[events]
log_path = "/var/tmp/events.jsonl"
"#,
        )
        .unwrap();
        let config = RuntimeConfig::load(&config_path).unwrap();
        assert!(!config.diagnostics.echo_stdout);
        assert_eq!(
            config.diagnostics.journal_path.as_deref(),
            Some(dir.path().join("logs/diagnostics.jsonl").as_path())
        );
        assert_eq!(
            config.events.log_path.as_deref(),
            Some(Path::new("/var/tmp/events.jsonl"))
        );
    }

    #[test]
    fn errors_name_the_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("broken.toml");
        fs::write(&config_path, "[timing]\npresent_at_ms = \"soon\"\n").unwrap();
        let err = RuntimeConfig::load(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));

        let missing = RuntimeConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(missing.to_string().contains("missing.toml"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(RuntimeConfig::from_toml_str("[timing]\npresent_ms = 5\n").is_err());
    }
}

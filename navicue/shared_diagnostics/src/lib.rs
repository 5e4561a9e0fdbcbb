#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Diagnostic side channel shared by cue implementations.
//!
//! Cues report meaningful moments (a confirmed choice, an early release) as
//! informal `tag key=value key=value` lines. The same line can be echoed to a
//! terminal, journaled as JSON, or captured in memory for assertions.

use std::{
    borrow::Cow,
    fmt,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity attached to a diagnostic record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiagnosticLevel {
    /// Fine-grained lifecycle detail.
    Debug,
    /// Semantically meaningful moment.
    Info,
    /// Something unexpected that the cue tolerated.
    Warn,
    /// Something the cue could not handle.
    Error,
}

/// One `tag key=value key=value` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLine {
    tag: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    fields: IndexMap<String, String>,
}

impl DiagnosticLine {
    /// Starts a line with the given tag and no fields.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            fields: IndexMap::new(),
        }
    }

    /// Appends (or replaces) a field. Insertion order is kept when rendering.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    /// Tag naming the moment being reported.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Looks up a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Iterates fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for DiagnosticLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)?;
        for (key, value) in &self.fields {
            write!(f, " {key}={}", quote(value))?;
        }
        Ok(())
    }
}

fn quote(value: &str) -> Cow<'_, str> {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '=' || c == '"');
    if needs_quotes {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        Cow::Owned(format!("\"{escaped}\""))
    } else {
        Cow::Borrowed(value)
    }
}

/// Journaled diagnostic with its origin and time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// Time the cue emitted the line.
    pub timestamp: DateTime<Utc>,
    /// Identifier of the emitting cue.
    pub cue: String,
    /// Severity.
    pub level: DiagnosticLevel,
    /// The line itself.
    #[serde(flatten)]
    pub line: DiagnosticLine,
}

impl DiagnosticRecord {
    /// Stamps a line with the current time.
    #[must_use]
    pub fn new(cue: impl Into<String>, level: DiagnosticLevel, line: DiagnosticLine) -> Self {
        Self {
            timestamp: Utc::now(),
            cue: cue.into(),
            level,
            line,
        }
    }
}

/// Destination for diagnostic records.
pub trait DiagnosticSink: Send + Sync {
    /// Writes one record.
    fn emit(&self, record: &DiagnosticRecord) -> Result<()>;
}

/// Append-only JSON-lines journal.
#[derive(Debug)]
pub struct JsonDiagnosticSink {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonDiagnosticSink {
    /// Creates or opens a journal at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiagnosticSink for JsonDiagnosticSink {
    fn emit(&self, record: &DiagnosticRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Writes the bare `tag key=value` text, one record per line.
#[derive(Debug)]
pub struct LineSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> LineSink<W> {
    /// Wraps an arbitrary writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl LineSink<io::Stdout> {
    /// Line sink bound to the process standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> DiagnosticSink for LineSink<W> {
    fn emit(&self, record: &DiagnosticRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", record.line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnosticSink {
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl MemoryDiagnosticSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record captured so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DiagnosticRecord> {
        self.records.lock().clone()
    }

    /// Rendered lines, in emission order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|record| record.line.to_string())
            .collect()
    }
}

impl DiagnosticSink for MemoryDiagnosticSink {
    fn emit(&self, record: &DiagnosticRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Forwards every record to several sinks. All sinks are attempted; the
/// first failure is returned.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl FanoutSink {
    /// Creates an empty fanout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of attached sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sink is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DiagnosticSink for FanoutSink {
    fn emit(&self, record: &DiagnosticRecord) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.emit(record) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn renders_tag_and_fields_in_order() {
        let line = DiagnosticLine::new("choice")
            .field("picked", "calm")
            .field("after_ms", 3600);
        assert_eq!(line.to_string(), "choice picked=calm after_ms=3600");
    }

    #[test]
    fn quotes_values_with_spaces_or_equals() {
        let line = DiagnosticLine::new("note")
            .field("text", "slow down")
            .field("expr", "a=b")
            .field("empty", "");
        assert_eq!(
            line.to_string(),
            r#"note text="slow down" expr="a=b" empty="""#
        );
    }

    #[test]
    fn journal_writes_json_lines() {
        let dir = tempdir().unwrap();
        let sink = JsonDiagnosticSink::new(dir.path().join("nested/diag.jsonl")).unwrap();
        sink.emit(&DiagnosticRecord::new(
            "choice-fork",
            DiagnosticLevel::Info,
            DiagnosticLine::new("choice").field("picked", "calm"),
        ))
        .unwrap();
        let content = fs::read_to_string(sink.path()).unwrap();
        assert!(content.contains("\"tag\":\"choice\""));
        assert!(content.contains("\"cue\":\"choice-fork\""));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn line_sink_writes_plain_text() {
        let sink = LineSink::new(Vec::new());
        sink.emit(&DiagnosticRecord::new(
            "tap-ripple",
            DiagnosticLevel::Info,
            DiagnosticLine::new("tap").field("count", 2),
        ))
        .unwrap();
        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(written, "tap count=2\n");
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(MemoryDiagnosticSink::new());
        let b = Arc::new(MemoryDiagnosticSink::new());
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());
        fanout
            .emit(&DiagnosticRecord::new(
                "cue",
                DiagnosticLevel::Debug,
                DiagnosticLine::new("ping"),
            ))
            .unwrap();
        assert_eq!(a.lines(), vec!["ping".to_string()]);
        assert_eq!(b.snapshot().len(), 1);
    }
}

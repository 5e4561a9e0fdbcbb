#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Mounts NaviCue cues, feeds them stage changes and user input, and
//! delivers the host's completion callback at most once per mount.

/// Id → constructor registry.
pub mod catalog;
/// Runtime configuration loaded from TOML.
pub mod config;
/// The `NaviCue` trait, inputs, and the context handed to cues.
pub mod cue;
/// Reference cues exercising tap, hold, and choice flows.
pub mod cues;
/// Error types.
pub mod error;
/// Host contract and one-shot completion.
pub mod host;
/// Mounted cue sessions.
pub mod session;

pub use catalog::{CueCatalog, CueFactory};
pub use config::{CueOverride, DiagnosticsConfig, EventsConfig, RuntimeConfig};
pub use cue::{CueContext, CueInput, NaviCue};
pub use error::RuntimeError;
pub use host::{Completion, CompletionCallback, HostContract};
pub use navicue_stage::{Stage, StageTiming};
pub use session::{CueSession, SessionOptions};

#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Stage lifecycle controller shared by every NaviCue cue.
//!
//! A cue moves through `arriving → present → active → resonant → afterglow`.
//! The controller advances the first two transitions on its own, lets the
//! owning cue set any stage at any time, and owns every timer the cue
//! schedules so that tearing the controller down cancels all of them.

/// Controller, handle, and teardown report.
pub mod controller;
/// Error types.
pub mod error;
/// The five cue stages.
pub mod stage;
/// Auto-advance timing options.
pub mod timing;
/// Ordered set of pending one-shot timers.
pub mod timer_set;

/// Journal and event-bus hooks for lifecycle transitions.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use controller::{
    StageChange, StageController, StageControllerBuilder, StageHandle, TeardownReport,
};
pub use error::{LifecycleError, UnknownStage};
pub use stage::Stage;
pub use telemetry::{LifecycleTelemetry, LifecycleTelemetryBuilder};
pub use timer_set::{CancelledTimers, DueTimer, TimerCallback, TimerHandle, TimerId, TimerSet};
pub use timing::StageTiming;

use thiserror::Error;

/// Errors surfaced while creating a stage controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Controllers schedule their timers on the ambient tokio runtime.
    #[error("stage controller must be created inside a tokio runtime")]
    NoRuntime,
}

/// A stage name that is not one of the five cue stages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown stage `{0}` (expected arriving, present, active, resonant or afterglow)")]
pub struct UnknownStage(pub String);

use navicue_stage::LifecycleError;
use thiserror::Error;

/// Errors surfaced by the cue runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The stage controller could not be created.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// No cue is registered under the requested id.
    #[error("unknown cue `{0}`")]
    UnknownCue(String),
    /// The session was already unmounted.
    #[error("cue session `{0}` is unmounted")]
    Unmounted(String),
}

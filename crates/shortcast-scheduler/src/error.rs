//! Error types for the scheduler.

use thiserror::Error;

/// Invalid configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Schedule hour outside 0-23.
    #[error("schedule hour must be between 0 and 23, got {0}")]
    HourOutOfRange(u32),

    /// Timezone name not in the IANA database.
    #[error("unknown timezone '{name}': {reason}")]
    InvalidTimezone { name: String, reason: String },

    /// Interval fallback must be positive.
    #[error("interval hours must be positive")]
    ZeroInterval,

    /// Interval fallback beyond the supported range.
    #[error("interval hours must be at most {max}, got {hours}")]
    IntervalTooLarge { hours: u32, max: u32 },

    /// Retry attempts must be at least one.
    #[error("retry attempts must be at least 1")]
    ZeroAttempts,

    /// Boolean value not recognised.
    #[error("invalid boolean value '{0}', expected 1/true/yes/on or 0/false/no/off")]
    InvalidBool(String),

    /// Pipeline manifest problem.
    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Errors building a pipeline from a manifest.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// IO error reading the manifest.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No steps declared.
    #[error("pipeline has no steps")]
    Empty,

    /// Two steps share a name.
    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    /// A step has no program to run.
    #[error("step '{0}' has an empty command")]
    EmptyCommand(String),

    /// A step has a zero timeout.
    #[error("step '{0}' has a zero timeout")]
    ZeroTimeout(String),
}

/// Errors persisting verification state.
#[derive(Debug, Error)]
pub enum StateError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Verification state could not be persisted.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// A run is already in progress.
    #[error("run already in progress: {0}")]
    RunInProgress(String),
}

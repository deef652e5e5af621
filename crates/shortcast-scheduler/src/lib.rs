//! Run orchestration and scheduling core for Shortcast.
//!
//! This crate decides when the content pipeline runs and whether it may run:
//! - Computes daily (fixed local hour) or interval triggers
//! - Runs a one-time first-boot verification with a failure cooldown
//! - Persists verification state across restarts
//! - Guards runs with a singleton lock and a memory/disk pre-flight check
//! - Retries only the remote upload step with exponential backoff

mod command;
mod config;
mod error;
mod executor;
mod guard;
mod lock;
mod pipeline;
mod retry;
mod scheduler;
mod state;
mod trigger;
mod types;

pub use command::CommandStep;
pub use config::{
    DEFAULT_TIMEZONE, DEFAULT_VERIFICATION_TOPIC, ExecutorConfig, FailedArtifactPolicy,
    MAX_INTERVAL_HOURS, ResourceThresholds, ScheduleConfig, parse_bool,
};
pub use error::{ConfigError, PipelineError, SchedulerError, StateError};
pub use executor::{JobExecutor, Progress};
pub use guard::{ResourceGuard, ResourceLevel, ResourceProbe, ResourceReport, SysinfoProbe};
pub use lock::{RunLock, RunLockGuard};
pub use pipeline::{
    Pipeline, PipelineManifest, PipelineStep, Step, StepContext, StepError, StepKind, StepOutput,
    StepSpec,
};
pub use retry::{RetryExhausted, RetryPolicy};
pub use scheduler::{Scheduler, should_run_verification};
pub use state::{STATE_FILE_NAME, VerificationStore};
pub use trigger::{Clock, SystemClock, compute_next_trigger};
pub use types::{
    ActiveRun, RunId, RunKind, RunPhase, RunRequest, RunResult, RunStatus, RunSummary,
    SchedulerStatus, StepOutcome, StepReport, VerificationState,
};

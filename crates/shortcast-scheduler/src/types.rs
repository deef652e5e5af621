//! Scheduler types.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a fresh run id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// First-boot pipeline check.
    Verification,
    /// Regular cadence trigger.
    Scheduled,
    /// Operator request.
    Manual,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Verification => "verification",
            RunKind::Scheduled => "scheduled",
            RunKind::Manual => "manual",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One activation of the pipeline. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub id: RunId,
    pub kind: RunKind,
    pub requested_at: DateTime<Utc>,
    /// Topic override for this run (verification runs use the verification topic).
    pub topic: Option<String>,
}

impl RunRequest {
    /// Create a request with a fresh id.
    pub fn new(kind: RunKind, requested_at: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            kind,
            requested_at,
            topic: None,
        }
    }

    /// Set the topic for this run.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// Resource guard refused the run before any step started.
    AbortedResource,
    /// Another run held the lock; this request was dropped.
    AbortedLock,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::AbortedResource => "aborted-resource",
            RunStatus::AbortedLock => "aborted-lock",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed { error: String },
}

/// Per-step record kept in the run result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    /// Attempts made (more than one only for retried remote steps).
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Outcome of a completed run. Produced exactly once per accepted request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub kind: RunKind,
    pub status: RunStatus,
    pub failed_step: Option<String>,
    pub error_detail: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Paths produced by the run, in creation order.
    pub artifact_paths: Vec<PathBuf>,
    pub steps: Vec<StepReport>,
}

impl RunResult {
    /// A result for a run that never reached its first step.
    pub fn aborted(
        request: &RunRequest,
        status: RunStatus,
        error_detail: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: request.id,
            kind: request.kind,
            status,
            failed_step: None,
            error_detail: error_detail.into(),
            started_at: at,
            finished_at: at,
            artifact_paths: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Durable record of first-boot verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationState {
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl VerificationState {
    /// Whether a verification failure happened less than `cooldown` before `now`.
    ///
    /// A failure timestamp in the future (clock moved backwards) counts as in cooldown.
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.last_failure_at {
            None => false,
            Some(failed_at) => match (now - failed_at).to_std() {
                Ok(elapsed) => elapsed < cooldown,
                Err(_) => true,
            },
        }
    }
}

/// Where the executor is within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    AcquiringLock,
    CheckingResources,
    RunningStep { index: usize, name: String },
    Succeeded,
    Failed,
    AbortedResource,
    AbortedLock,
    ReleasingLock,
    Terminal,
}

/// The run currently in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRun {
    pub run_id: RunId,
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub phase: RunPhase,
}

impl ActiveRun {
    /// Name of the step being executed, if any.
    pub fn current_step(&self) -> Option<&str> {
        match &self.phase {
            RunPhase::RunningStep { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Condensed view of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub kind: RunKind,
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    pub failed_step: Option<String>,
    pub error_detail: String,
}

impl From<&RunResult> for RunSummary {
    fn from(result: &RunResult) -> Self {
        Self {
            run_id: result.run_id,
            kind: result.kind,
            status: result.status,
            finished_at: result.finished_at,
            failed_step: result.failed_step.clone(),
            error_detail: result.error_detail.clone(),
        }
    }
}

/// Read-only scheduler status exposed to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Human-readable cadence, e.g. "daily at 12:00 (Asia/Kolkata)".
    pub schedule: String,
    pub next_trigger: Option<DateTime<Utc>>,
    pub last_run: Option<RunSummary>,
    pub active: Option<ActiveRun>,
    pub verification: VerificationState,
}

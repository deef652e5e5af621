//! Pipeline steps and the manifest that declares them.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{CommandStep, PipelineError, RunId, RunKind};

/// Why a step did not produce output.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid step output: {0}")]
    InvalidOutput(String),

    #[error("step panicked: {0}")]
    Panicked(String),
}

/// Everything a step can see about the run it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct StepContext {
    pub run_id: RunId,
    pub kind: RunKind,
    pub topic: Option<String>,
    /// Scratch directory owned by this run.
    pub work_dir: PathBuf,
    /// Outputs of the steps that already finished, keyed by step name.
    pub outputs: BTreeMap<String, Value>,
}

impl StepContext {
    pub fn output(&self, step: &str) -> Option<&Value> {
        self.outputs.get(step)
    }
}

/// What a successful step hands to the next one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub value: Value,
    /// Files or directories the step created; removed during cleanup.
    pub artifacts: Vec<PathBuf>,
}

impl StepOutput {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}

/// One unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError>;
}

/// Whether a step talks to an external service.
///
/// Only remote steps are retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    #[default]
    Local,
    Remote,
}

/// A step together with how the executor should treat it.
#[derive(Clone)]
pub struct PipelineStep {
    pub step: Arc<dyn Step>,
    pub kind: StepKind,
    pub timeout: Duration,
}

impl PipelineStep {
    pub fn local(step: impl Step + 'static, timeout: Duration) -> Self {
        Self {
            step: Arc::new(step),
            kind: StepKind::Local,
            timeout,
        }
    }

    pub fn remote(step: impl Step + 'static, timeout: Duration) -> Self {
        Self {
            step: Arc::new(step),
            kind: StepKind::Remote,
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.step.name()
    }
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("name", &self.name())
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Ordered list of steps executed once per run.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(PipelineStep::name).collect()
    }
}

/// One step as declared in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// JSON manifest describing the pipeline as external commands.
///
/// ```json
/// {"steps": [{"name": "assemble", "command": ["python", "assemble.py"]},
///            {"name": "upload", "command": ["./upload.sh"], "kind": "remote", "timeout_secs": 300}]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineManifest {
    pub steps: Vec<StepSpec>,
}

impl PipelineManifest {
    /// Read and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        let manifest = Self::from_json(&content)?;
        debug!(path = %path.display(), steps = manifest.steps.len(), "loaded pipeline manifest");
        Ok(manifest)
    }

    /// Parse and validate a manifest.
    pub fn from_json(content: &str) -> Result<Self, PipelineError> {
        let manifest: Self = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.steps.is_empty() {
            return Err(PipelineError::Empty);
        }

        let mut seen = HashSet::new();
        for spec in &self.steps {
            if !seen.insert(spec.name.as_str()) {
                return Err(PipelineError::DuplicateStep(spec.name.clone()));
            }
            if spec.command.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(PipelineError::EmptyCommand(spec.name.clone()));
            }
            if spec.timeout_secs == Some(0) {
                return Err(PipelineError::ZeroTimeout(spec.name.clone()));
            }
        }
        Ok(())
    }

    /// Build command steps, using `default_timeout` where a step sets none.
    pub fn into_pipeline(self, default_timeout: Duration) -> Result<Pipeline, PipelineError> {
        self.validate()?;

        let mut pipeline = Pipeline::new();
        for spec in self.steps {
            let timeout = spec
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout);
            if timeout.is_zero() {
                return Err(PipelineError::ZeroTimeout(spec.name));
            }
            let kind = spec.kind;
            let step = CommandStep::from_spec(spec)?;
            pipeline = pipeline.with_step(PipelineStep {
                step: Arc::new(step),
                kind,
                timeout,
            });
        }
        Ok(pipeline)
    }
}

//! Pipeline step backed by an external program.
//!
//! The program receives the JSON [`StepContext`] on stdin and may answer on
//! stdout with `{"output": ..., "artifacts": [...]}`. Any other non-empty
//! stdout is taken verbatim as a string output.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{PipelineError, Step, StepContext, StepError, StepOutput, StepSpec};

/// Maximum bytes of stderr kept in a failure message.
const STDERR_TAIL_BYTES: usize = 2000;

/// Runs one program per invocation.
#[derive(Debug, Clone)]
pub struct CommandStep {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandStep {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    pub fn from_spec(spec: StepSpec) -> Result<Self, PipelineError> {
        let mut command = spec.command.into_iter();
        let program = command
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| PipelineError::EmptyCommand(spec.name.clone()))?;
        Ok(Self::new(spec.name, program, command.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Step for CommandStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("SHORTCAST_RUN_ID", ctx.run_id.to_string())
            .env("SHORTCAST_RUN_KIND", ctx.kind.as_str())
            .env("SHORTCAST_WORK_DIR", &ctx.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must not leave the child behind
            .kill_on_drop(true);
        match &ctx.topic {
            Some(topic) => cmd.env("SHORTCAST_TOPIC", topic),
            None => cmd.env_remove("SHORTCAST_TOPIC"),
        };

        debug!(step = %self.name, program = %self.program, "spawning step command");
        let mut child = cmd.spawn()?;

        let input = serde_json::to_vec(ctx)
            .map_err(|e| StepError::Failed(format!("failed to encode step context: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            // Programs that ignore stdin may exit before we finish writing
            match stdin.write_all(&input).await {
                Ok(()) => stdin.shutdown().await.or_else(ignore_broken_pipe)?,
                Err(e) => ignore_broken_pipe(e)?,
            }
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            warn!(
                step = %self.name,
                exit_code = ?output.status.code(),
                stderr = %tail(&stderr),
                "step command failed"
            );
            let detail = match tail(&stderr) {
                "" => format!("exited with {}", output.status),
                stderr_tail => format!("exited with {}: {}", output.status, stderr_tail),
            };
            return Err(StepError::Failed(detail));
        }

        parse_stdout(&stdout)
    }
}

fn ignore_broken_pipe(e: std::io::Error) -> Result<(), std::io::Error> {
    if e.kind() == std::io::ErrorKind::BrokenPipe {
        Ok(())
    } else {
        Err(e)
    }
}

/// Structured answer from a step program.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandOutput {
    #[serde(default)]
    output: Value,
    #[serde(default)]
    artifacts: Vec<PathBuf>,
}

fn parse_stdout(stdout: &str) -> Result<StepOutput, StepError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(StepOutput::default());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) if map.contains_key("output") || map.contains_key("artifacts") => {
            let parsed: CommandOutput = serde_json::from_value(Value::Object(map))
                .map_err(|e| StepError::InvalidOutput(e.to_string()))?;
            Ok(StepOutput {
                value: parsed.output,
                artifacts: parsed.artifacts,
            })
        }
        _ => Ok(StepOutput::new(trimmed)),
    }
}

/// Last part of stderr, cut on a char boundary.
fn tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

//! Command-line and environment configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use shortcast_scheduler::{
    ConfigError, DEFAULT_TIMEZONE, DEFAULT_VERIFICATION_TOPIC, ExecutorConfig,
    FailedArtifactPolicy, JobExecutor, Pipeline, PipelineManifest, ResourceGuard,
    ResourceThresholds, RetryPolicy, RunLock, STATE_FILE_NAME, ScheduleConfig, Scheduler,
    SchedulerError, SystemClock, VerificationStore, parse_bool,
};

/// Parse boolean from environment variable, accepting common truthy values.
pub fn parse_bool_env(s: &str) -> Result<bool, String> {
    parse_bool(s).map_err(|e| e.to_string())
}

/// Settings shared by every command that builds the scheduler.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Daily local hour (0-23) to run at. Without it runs repeat every --interval-hours
    #[arg(long, env = "SHORTCAST_SCHEDULE_HOUR")]
    pub schedule_hour: Option<u32>,

    /// IANA timezone for --schedule-hour
    #[arg(long, env = "SHORTCAST_TIMEZONE", default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// Hours between runs when no fixed hour is set
    #[arg(long, env = "SHORTCAST_INTERVAL_HOURS", default_value_t = 12)]
    pub interval_hours: u32,

    /// Run a verification pass at startup.
    /// Accepts "1", "true", "yes", "on" or "0", "false", "no", "off".
    #[arg(long, env = "SHORTCAST_VERIFICATION", value_parser = parse_bool_env, default_value = "false")]
    pub verification: bool,

    /// Never verify again once a verification has succeeded
    #[arg(long, env = "SHORTCAST_VERIFICATION_RUN_ONCE", value_parser = parse_bool_env, default_value = "false")]
    pub verification_run_once: bool,

    /// Topic handed to verification runs
    #[arg(long, env = "SHORTCAST_VERIFICATION_TOPIC", default_value = DEFAULT_VERIFICATION_TOPIC)]
    pub verification_topic: String,

    /// Seconds to wait after a failed verification before trying again at boot
    #[arg(long, env = "SHORTCAST_VERIFICATION_COOLDOWN_SECS", default_value_t = 6 * 3600)]
    pub verification_cooldown_secs: u64,

    /// Attempts for remote (upload) steps
    #[arg(long, env = "SHORTCAST_UPLOAD_RETRIES", default_value_t = 3)]
    pub upload_retries: u32,

    /// Initial wait between upload attempts, doubled after each failure
    #[arg(long, env = "SHORTCAST_UPLOAD_RETRY_BACKOFF_SECS", default_value_t = 5)]
    pub upload_retry_backoff_secs: u64,

    /// Refuse to start a run below this much free memory
    #[arg(long, env = "SHORTCAST_MIN_FREE_MEMORY_MB", default_value_t = 100)]
    pub min_free_memory_mb: u64,

    /// Refuse to start a run below this much free disk under --work-dir
    #[arg(long, env = "SHORTCAST_MIN_FREE_DISK_MB", default_value_t = 100)]
    pub min_free_disk_mb: u64,

    /// Timeout for steps that do not set their own
    #[arg(long, env = "SHORTCAST_STEP_TIMEOUT_SECS", default_value_t = 600)]
    pub step_timeout_secs: u64,

    /// Pipeline manifest (JSON)
    #[arg(long, env = "SHORTCAST_PIPELINE", default_value = "pipeline.json")]
    pub pipeline: PathBuf,

    /// Directory under which each run gets its own scratch directory
    #[arg(long, env = "SHORTCAST_WORK_DIR", default_value = "output/shorts")]
    pub work_dir: PathBuf,

    /// Directory for persisted state (defaults to /data when present, else .)
    #[arg(long, env = "SHORTCAST_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Topic for scheduled and manual runs
    #[arg(long, env = "SHORTCAST_TOPIC")]
    pub topic: Option<String>,

    /// Keep artifacts of failed runs on disk
    #[arg(long, env = "SHORTCAST_RETAIN_FAILED_ARTIFACTS", value_parser = parse_bool_env, default_value = "false")]
    pub retain_failed_artifacts: bool,
}

impl Settings {
    pub fn schedule_config(&self) -> Result<ScheduleConfig, ConfigError> {
        Ok(
            ScheduleConfig::new(self.schedule_hour, &self.timezone, self.interval_hours)?
                .with_verification(
                    self.verification,
                    self.verification_run_once,
                    self.verification_topic.clone(),
                    Duration::from_secs(self.verification_cooldown_secs),
                ),
        )
    }

    pub fn executor_config(&self) -> Result<ExecutorConfig, ConfigError> {
        Ok(ExecutorConfig {
            retry: RetryPolicy::new(
                self.upload_retries,
                Duration::from_secs(self.upload_retry_backoff_secs),
            )?,
            resources: ResourceThresholds {
                min_free_memory_mb: self.min_free_memory_mb,
                min_free_disk_mb: self.min_free_disk_mb,
                disk_path: self.work_dir.clone(),
            },
            work_dir: self.work_dir.clone(),
            failed_artifacts: if self.retain_failed_artifacts {
                FailedArtifactPolicy::Retain
            } else {
                FailedArtifactPolicy::Delete
            },
            default_topic: self.topic.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn load_pipeline(&self) -> Result<Pipeline, ConfigError> {
        let manifest = PipelineManifest::load(&self.pipeline)?;
        Ok(manifest.into_pipeline(Duration::from_secs(self.step_timeout_secs))?)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(VerificationStore::default_dir)
            .join(STATE_FILE_NAME)
    }

    /// Validate everything and wire up a scheduler.
    pub async fn build_scheduler(&self) -> Result<Arc<Scheduler>, SchedulerError> {
        let schedule = self.schedule_config()?;
        let executor_config = self.executor_config()?;
        let pipeline = self.load_pipeline()?;
        let store = VerificationStore::load(self.state_path()).await?;

        let guard = ResourceGuard::new(executor_config.resources.clone());
        let executor = JobExecutor::new(pipeline, RunLock::new(), guard, executor_config);

        Ok(Arc::new(Scheduler::new(
            schedule,
            Arc::new(store),
            Arc::new(executor),
            Arc::new(SystemClock),
        )))
    }
}

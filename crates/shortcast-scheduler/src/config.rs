//! Validated, immutable configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, RetryPolicy};

/// Timezone used when none is configured.
pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";

/// Topic handed to verification runs when none is configured.
pub const DEFAULT_VERIFICATION_TOPIC: &str = "Verification Test - System Online";

/// Default interval between runs when no fixed hour is set.
const DEFAULT_INTERVAL_HOURS: u32 = 12;

/// Largest accepted interval (one year), so trigger arithmetic cannot overflow.
pub const MAX_INTERVAL_HOURS: u32 = 24 * 366;

/// Default cooldown after a failed verification (6 hours).
const DEFAULT_VERIFICATION_COOLDOWN_SECS: u64 = 6 * 3600;

/// Parse a boolean, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
pub fn parse_bool(s: &str) -> Result<bool, ConfigError> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool(s.to_string())),
    }
}

/// When runs happen and how first-boot verification behaves.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    fixed_hour: Option<u32>,
    timezone: Tz,
    interval_hours: u32,
    verification_enabled: bool,
    verification_run_once: bool,
    verification_topic: String,
    verification_cooldown: Duration,
}

impl ScheduleConfig {
    /// Build a schedule, failing fast on values that could never fire.
    ///
    /// Verification starts disabled; enable it with [`ScheduleConfig::with_verification`].
    pub fn new(
        fixed_hour: Option<u32>,
        timezone: &str,
        interval_hours: u32,
    ) -> Result<Self, ConfigError> {
        if let Some(hour) = fixed_hour
            && hour > 23
        {
            return Err(ConfigError::HourOutOfRange(hour));
        }
        // The interval only drives the schedule when no fixed hour is set
        if fixed_hour.is_none() {
            if interval_hours == 0 {
                return Err(ConfigError::ZeroInterval);
            }
            if interval_hours > MAX_INTERVAL_HOURS {
                return Err(ConfigError::IntervalTooLarge {
                    hours: interval_hours,
                    max: MAX_INTERVAL_HOURS,
                });
            }
        }
        let timezone = timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| ConfigError::InvalidTimezone {
                name: timezone.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            fixed_hour,
            timezone,
            interval_hours,
            verification_enabled: false,
            verification_run_once: false,
            verification_topic: DEFAULT_VERIFICATION_TOPIC.to_string(),
            verification_cooldown: Duration::from_secs(DEFAULT_VERIFICATION_COOLDOWN_SECS),
        })
    }

    /// Configure first-boot verification.
    pub fn with_verification(
        mut self,
        enabled: bool,
        run_once: bool,
        topic: impl Into<String>,
        cooldown: Duration,
    ) -> Self {
        self.verification_enabled = enabled;
        self.verification_run_once = run_once;
        self.verification_topic = topic.into();
        self.verification_cooldown = cooldown;
        self
    }

    pub fn fixed_hour(&self) -> Option<u32> {
        self.fixed_hour
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn interval_hours(&self) -> u32 {
        self.interval_hours
    }

    pub fn verification_enabled(&self) -> bool {
        self.verification_enabled
    }

    pub fn verification_run_once(&self) -> bool {
        self.verification_run_once
    }

    pub fn verification_topic(&self) -> &str {
        &self.verification_topic
    }

    pub fn verification_cooldown(&self) -> Duration {
        self.verification_cooldown
    }

    /// Human-readable cadence for logs and the status view.
    pub fn describe(&self) -> String {
        match self.fixed_hour {
            Some(hour) => format!("daily at {:02}:00 ({})", hour, self.timezone.name()),
            None => format!("every {} hours", self.interval_hours),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fixed_hour: None,
            timezone: Tz::Asia__Kolkata,
            interval_hours: DEFAULT_INTERVAL_HOURS,
            verification_enabled: false,
            verification_run_once: false,
            verification_topic: DEFAULT_VERIFICATION_TOPIC.to_string(),
            verification_cooldown: Duration::from_secs(DEFAULT_VERIFICATION_COOLDOWN_SECS),
        }
    }
}

/// What happens to artifacts of a run that did not succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedArtifactPolicy {
    /// Delete them, same as after a successful run.
    #[default]
    Delete,
    /// Keep them on disk for debugging.
    Retain,
}

/// Hard floors for the pre-flight resource check.
#[derive(Debug, Clone)]
pub struct ResourceThresholds {
    pub min_free_memory_mb: u64,
    pub min_free_disk_mb: u64,
    /// Path whose filesystem is checked for free space.
    pub disk_path: PathBuf,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            min_free_memory_mb: 100,
            min_free_disk_mb: 100,
            disk_path: PathBuf::from("."),
        }
    }
}

/// Settings for the job executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry: RetryPolicy,
    pub resources: ResourceThresholds,
    /// Each run writes under `<work_dir>/<run_id>`.
    pub work_dir: PathBuf,
    pub failed_artifacts: FailedArtifactPolicy,
    /// Topic for scheduled and manual runs; steps pick their own when unset.
    pub default_topic: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            resources: ResourceThresholds::default(),
            work_dir: PathBuf::from("output/shorts"),
            failed_artifacts: FailedArtifactPolicy::default(),
            default_topic: None,
        }
    }
}

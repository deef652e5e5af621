//! Process-lifecycle tests: state that must survive restarts, and a
//! manifest-built pipeline running real commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shortcast_scheduler::{
    Clock, ExecutorConfig, JobExecutor, Pipeline, PipelineManifest, PipelineStep, ResourceGuard,
    ResourceProbe, ResourceThresholds, RunKind, RunLock, RunStatus, STATE_FILE_NAME,
    ScheduleConfig, Scheduler, Step, StepContext, StepError, StepOutput, VerificationStore,
};
use tempfile::TempDir;

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

struct PlentyProbe;

impl ResourceProbe for PlentyProbe {
    fn free_memory_bytes(&self) -> Option<u64> {
        Some(8 * 1024 * 1024 * 1024)
    }

    fn free_disk_bytes(&self, _path: &Path) -> Option<u64> {
        Some(64 * 1024 * 1024 * 1024)
    }
}

struct Verify {
    calls: Arc<AtomicU32>,
    succeed: bool,
}

#[async_trait]
impl Step for Verify {
    fn name(&self) -> &str {
        "verify"
    }

    async fn run(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(StepOutput::default())
        } else {
            Err(StepError::Failed("upload rejected".to_string()))
        }
    }
}

fn guard() -> ResourceGuard {
    ResourceGuard::with_probe(ResourceThresholds::default(), Box::new(PlentyProbe))
}

fn verifying() -> ScheduleConfig {
    ScheduleConfig::new(Some(12), "Asia/Kolkata", 12)
        .unwrap()
        .with_verification(
            true,
            true,
            "Verification Test - System Online",
            Duration::from_secs(6 * 3600),
        )
}

/// Simulates one process start: fresh lock, store loaded from disk.
async fn boot_process(
    state_dir: &Path,
    work_dir: PathBuf,
    now: DateTime<Utc>,
    step: Verify,
) -> Arc<Scheduler> {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(now));
    let executor = JobExecutor::new(
        Pipeline::new().with_step(PipelineStep::local(step, Duration::from_secs(30))),
        RunLock::new(),
        guard(),
        ExecutorConfig {
            work_dir,
            ..Default::default()
        },
    )
    .with_clock(Arc::clone(&clock));
    let store = VerificationStore::load(state_dir.join(STATE_FILE_NAME))
        .await
        .unwrap();

    let scheduler = Arc::new(Scheduler::new(
        verifying(),
        Arc::new(store),
        Arc::new(executor),
        clock,
    ));
    scheduler.boot().await;
    scheduler
}

#[tokio::test]
async fn verification_runs_once_across_restarts() {
    let state = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let now = Utc::now();

    for boot in 0..3 {
        let step = Verify {
            calls: Arc::clone(&calls),
            succeed: true,
        };
        let scheduler = boot_process(
            state.path(),
            work.path().to_path_buf(),
            now + chrono::Duration::hours(boot),
            step,
        )
        .await;
        assert!(scheduler.status().await.verification.completed);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_verification_respects_cooldown_across_restarts() {
    let state = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let failed_at = Utc::now();

    let failing = Verify {
        calls: Arc::clone(&calls),
        succeed: false,
    };
    let first = boot_process(state.path(), work.path().to_path_buf(), failed_at, failing).await;
    let status = first.status().await;
    assert!(!status.verification.completed);
    assert_eq!(status.verification.last_failure_at, Some(failed_at));
    assert_eq!(status.last_run.unwrap().kind, RunKind::Verification);

    // Restart one minute later: still cooling down
    let step = Verify {
        calls: Arc::clone(&calls),
        succeed: true,
    };
    boot_process(
        state.path(),
        work.path().to_path_buf(),
        failed_at + chrono::Duration::minutes(1),
        step,
    )
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Restart seven hours later: verification runs and passes
    let step = Verify {
        calls: Arc::clone(&calls),
        succeed: true,
    };
    let later = boot_process(
        state.path(),
        work.path().to_path_buf(),
        failed_at + chrono::Duration::hours(7),
        step,
    )
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(later.status().await.verification.completed);
}

#[cfg(unix)]
#[tokio::test]
async fn manifest_pipeline_runs_commands_in_order() {
    let work = TempDir::new().unwrap();
    let manifest = PipelineManifest::from_json(
        r#"{
            "steps": [
                {"name": "idea", "command": ["sh", "-c", "echo '{\"output\": {\"title\": \"Octopus facts\"}}'"]},
                {"name": "assemble", "command": ["sh", "-c", "cat > \"$SHORTCAST_WORK_DIR/context.json\"; touch \"$SHORTCAST_WORK_DIR/short.mp4\"; echo \"{\\\"output\\\": \\\"ok\\\", \\\"artifacts\\\": [\\\"$SHORTCAST_WORK_DIR/short.mp4\\\"]}\""]},
                {"name": "upload", "command": ["sh", "-c", "test -f \"$SHORTCAST_WORK_DIR/short.mp4\" && echo uploaded"], "kind": "remote"}
            ]
        }"#,
    )
    .unwrap();
    let pipeline = manifest.into_pipeline(Duration::from_secs(30)).unwrap();

    let config = ExecutorConfig {
        work_dir: work.path().to_path_buf(),
        default_topic: Some("Octopus facts".to_string()),
        ..Default::default()
    };
    let executor = JobExecutor::new(pipeline, RunLock::new(), guard(), config);

    let result = executor
        .execute(shortcast_scheduler::RunRequest::new(
            RunKind::Manual,
            Utc::now(),
        ))
        .await;

    assert_eq!(result.status, RunStatus::Succeeded, "{}", result.error_detail);
    let names: Vec<_> = result.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["idea", "assemble", "upload"]);

    // Run directory and the reported video were both cleaned up
    let run_dir = work.path().join(result.run_id.to_string());
    assert_eq!(result.artifact_paths[0], run_dir);
    assert_eq!(result.artifact_paths[1], run_dir.join("short.mp4"));
    assert!(!run_dir.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn manifest_pipeline_failure_names_step() {
    let work = TempDir::new().unwrap();
    let pipeline = PipelineManifest::from_json(
        r#"{"steps": [
            {"name": "script", "command": ["sh", "-c", "echo ok"]},
            {"name": "speech", "command": ["sh", "-c", "echo 'tts: voice not found' >&2; exit 2"]}
        ]}"#,
    )
    .unwrap()
    .into_pipeline(Duration::from_secs(30))
    .unwrap();

    let executor = JobExecutor::new(
        pipeline,
        RunLock::new(),
        guard(),
        ExecutorConfig {
            work_dir: work.path().to_path_buf(),
            ..Default::default()
        },
    );
    let result = executor
        .execute(shortcast_scheduler::RunRequest::new(
            RunKind::Scheduled,
            Utc::now(),
        ))
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.failed_step.as_deref(), Some("speech"));
    assert!(result.error_detail.contains("tts: voice not found"));
}

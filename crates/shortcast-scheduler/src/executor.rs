//! Job executor: runs the pipeline once per request.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    ActiveRun, Clock, ExecutorConfig, FailedArtifactPolicy, Pipeline, PipelineStep, ResourceGuard,
    ResourceLevel, RetryExhausted, RunLock, RunLockGuard, RunPhase, RunRequest, RunResult, RunStatus,
    StepContext, StepError, StepKind, StepOutcome, StepOutput, StepReport, SystemClock,
};

/// Receiver for the run currently in flight (`None` when idle).
pub type Progress = watch::Receiver<Option<ActiveRun>>;

/// Counts from one cleanup pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct CleanupSummary {
    removed: usize,
    missing: usize,
    failed: usize,
}

/// Executes runs under the singleton lock and the resource guard.
pub struct JobExecutor {
    pipeline: Pipeline,
    lock: Arc<RunLock>,
    guard: ResourceGuard,
    config: ExecutorConfig,
    clock: Arc<dyn Clock>,
    progress: watch::Sender<Option<ActiveRun>>,
}

impl JobExecutor {
    pub fn new(
        pipeline: Pipeline,
        lock: Arc<RunLock>,
        guard: ResourceGuard,
        config: ExecutorConfig,
    ) -> Self {
        let (progress, _) = watch::channel(None);
        Self {
            pipeline,
            lock,
            guard,
            config,
            clock: Arc::new(SystemClock),
            progress,
        }
    }

    /// Use `clock` for run timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn lock(&self) -> &Arc<RunLock> {
        &self.lock
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn guard(&self) -> &ResourceGuard {
        &self.guard
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Subscribe to run progress.
    pub fn progress(&self) -> Progress {
        self.progress.subscribe()
    }

    /// The run currently holding the lock, if any.
    pub fn active(&self) -> Option<ActiveRun> {
        self.progress.borrow().clone()
    }

    /// Execute one run to completion.
    ///
    /// Never fails: every outcome, including lock contention and resource
    /// exhaustion, is reported through the returned [`RunResult`].
    #[tracing::instrument(skip(self, request), fields(run_id = %request.id, kind = %request.kind))]
    pub async fn execute(&self, request: RunRequest) -> RunResult {
        let started_at = self.clock.now();

        let Some(lock_guard) = self.lock.try_acquire(request.id) else {
            let holder = self
                .lock
                .holder()
                .map(|id| id.to_string())
                .unwrap_or_default();
            warn!(%holder, "another run is in progress, dropping request");
            return RunResult::aborted(
                &request,
                RunStatus::AbortedLock,
                format!("run {} already in progress", holder),
                started_at,
            );
        };
        // Progress is only written while holding the lock
        self.set_phase(&request, started_at, RunPhase::AcquiringLock);

        self.set_phase(&request, started_at, RunPhase::CheckingResources);
        let report = self.guard.check();
        if report.level == ResourceLevel::Abort {
            self.set_phase(&request, started_at, RunPhase::AbortedResource);
            error!(reasons = %report.summary(), "insufficient resources, run aborted");
            let result = RunResult::aborted(
                &request,
                RunStatus::AbortedResource,
                report.summary(),
                started_at,
            );
            self.finish(&request, started_at, lock_guard);
            return result;
        }

        let run_dir = self.config.work_dir.join(request.id.to_string());
        let mut artifacts: Vec<PathBuf> = Vec::new();
        let mut steps = Vec::with_capacity(self.pipeline.len());
        let mut failure: Option<(Option<String>, String)> = None;

        match tokio::fs::create_dir_all(&run_dir).await {
            Ok(()) => artifacts.push(run_dir.clone()),
            Err(e) => {
                error!(work_dir = %run_dir.display(), error = %e, "failed to create run directory");
                failure = Some((None, format!("failed to create {}: {}", run_dir.display(), e)));
            }
        }

        let mut ctx = StepContext {
            run_id: request.id,
            kind: request.kind,
            topic: request
                .topic
                .clone()
                .or_else(|| self.config.default_topic.clone()),
            work_dir: run_dir,
            outputs: BTreeMap::new(),
        };

        if failure.is_none() {
            for (index, step) in self.pipeline.steps().iter().enumerate() {
                let name = step.name().to_string();
                self.set_phase(
                    &request,
                    started_at,
                    RunPhase::RunningStep {
                        index,
                        name: name.clone(),
                    },
                );
                info!(step = %name, index, "step started");

                let step_started = Instant::now();
                let (outcome, attempts) = self.run_step(step, &ctx).await;
                let duration_ms = step_started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(output) => {
                        info!(step = %name, attempts, duration_ms, "step succeeded");
                        for path in output.artifacts {
                            if !artifacts.contains(&path) {
                                artifacts.push(path);
                            }
                        }
                        ctx.outputs.insert(name.clone(), output.value);
                        steps.push(StepReport {
                            name,
                            attempts,
                            duration_ms,
                            outcome: StepOutcome::Succeeded,
                        });
                    }
                    Err(e) => {
                        error!(step = %name, attempts, duration_ms, error = %e, "step failed");
                        let detail = e.to_string();
                        steps.push(StepReport {
                            name: name.clone(),
                            attempts,
                            duration_ms,
                            outcome: StepOutcome::Failed {
                                error: detail.clone(),
                            },
                        });
                        failure = Some((Some(name), detail));
                        break;
                    }
                }
            }
        }

        let (status, failed_step, error_detail) = match failure {
            None => (RunStatus::Succeeded, None, String::new()),
            Some((step, detail)) => (RunStatus::Failed, step, detail),
        };
        self.set_phase(
            &request,
            started_at,
            if status.is_success() {
                RunPhase::Succeeded
            } else {
                RunPhase::Failed
            },
        );

        if status.is_success() || self.config.failed_artifacts == FailedArtifactPolicy::Delete {
            cleanup(&artifacts).await;
        } else {
            info!(paths = ?artifacts, "keeping artifacts of failed run");
        }

        let result = RunResult {
            run_id: request.id,
            kind: request.kind,
            status,
            failed_step,
            error_detail,
            started_at,
            finished_at: self.clock.now(),
            artifact_paths: artifacts,
            steps,
        };

        match result.status {
            RunStatus::Succeeded => info!(
                duration_ms = result.duration().num_milliseconds(),
                "run succeeded"
            ),
            _ => warn!(
                failed_step = ?result.failed_step,
                error = %result.error_detail,
                "run failed"
            ),
        }

        self.finish(&request, started_at, lock_guard);
        result
    }

    /// Run one step, retrying only remote steps. Returns the outcome and attempts made.
    async fn run_step(
        &self,
        step: &PipelineStep,
        ctx: &StepContext,
    ) -> (Result<StepOutput, StepError>, u32) {
        match step.kind {
            StepKind::Local => (attempt(step, ctx).await, 1),
            StepKind::Remote => {
                match self
                    .config
                    .retry
                    .run(step.name(), |_| attempt(step, ctx))
                    .await
                {
                    Ok((output, attempts)) => (Ok(output), attempts),
                    Err(RetryExhausted { attempts, error }) => (Err(error), attempts),
                }
            }
        }
    }

    fn set_phase(&self, request: &RunRequest, started_at: DateTime<Utc>, phase: RunPhase) {
        debug!(?phase, "run phase");
        self.progress.send_replace(Some(ActiveRun {
            run_id: request.id,
            kind: request.kind,
            started_at,
            phase,
        }));
    }

    fn finish(
        &self,
        request: &RunRequest,
        started_at: DateTime<Utc>,
        lock_guard: RunLockGuard,
    ) {
        self.set_phase(request, started_at, RunPhase::ReleasingLock);
        drop(lock_guard);
        self.set_phase(request, started_at, RunPhase::Terminal);
        self.progress.send_replace(None);
    }
}

/// One timed attempt of a step. A panic inside the step is its failure.
async fn attempt(step: &PipelineStep, ctx: &StepContext) -> Result<StepOutput, StepError> {
    let fut = AssertUnwindSafe(step.step.run(ctx)).catch_unwind();
    match tokio::time::timeout(step.timeout, fut).await {
        Err(_) => Err(StepError::Timeout(step.timeout)),
        Ok(Err(panic)) => Err(StepError::Panicked(panic_message(panic.as_ref()))),
        Ok(Ok(result)) => result,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Delete every artifact path. Never fails; problems are logged.
async fn cleanup(paths: &[PathBuf]) -> CleanupSummary {
    let mut summary = CleanupSummary::default();

    for path in paths {
        let removed = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => summary.removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => summary.missing += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove artifact");
                summary.failed += 1;
            }
        }
    }

    info!(
        removed = summary.removed,
        missing = summary.missing,
        failed = summary.failed,
        "cleaned up run artifacts"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ResourceProbe, ResourceThresholds, RetryPolicy, RunKind, Step};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const MB: u64 = 1024 * 1024;

    struct FixedProbe {
        memory_mb: u64,
        disk_mb: u64,
    }

    impl ResourceProbe for FixedProbe {
        fn free_memory_bytes(&self) -> Option<u64> {
            Some(self.memory_mb * MB)
        }

        fn free_disk_bytes(&self, _path: &Path) -> Option<u64> {
            Some(self.disk_mb * MB)
        }
    }

    enum Behavior {
        Succeed,
        Fail,
        /// Fail this many times, then succeed.
        Flaky(u32),
        /// Write a file into the run directory and report it.
        WriteArtifact(&'static str),
        /// Fail unless the named step already produced output.
        RequireOutput(&'static str),
        Sleep(Duration),
        Panic,
        /// Wait until notified.
        Gate(Arc<Notify>),
    }

    struct TestStep {
        name: &'static str,
        calls: Arc<AtomicU32>,
        behavior: Behavior,
    }

    impl TestStep {
        fn new(name: &'static str, behavior: Behavior) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    name,
                    calls: Arc::clone(&calls),
                    behavior,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Step for TestStep {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match &self.behavior {
                Behavior::Succeed => Ok(StepOutput::new(json!({ "step": self.name }))),
                Behavior::Fail => Err(StepError::Failed(format!("{} broke", self.name))),
                Behavior::Flaky(failures) if call <= *failures => {
                    Err(StepError::Failed("503 from upload API".to_string()))
                }
                Behavior::Flaky(_) => Ok(StepOutput::new("video-id-123")),
                Behavior::WriteArtifact(file) => {
                    let path = ctx.work_dir.join(file);
                    std::fs::write(&path, b"data")?;
                    Ok(StepOutput::new(path.display().to_string()).with_artifact(path))
                }
                Behavior::RequireOutput(previous) => match ctx.output(previous) {
                    Some(value) => Ok(StepOutput::new(value.clone())),
                    None => Err(StepError::Failed(format!("missing output of {}", previous))),
                },
                Behavior::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(StepOutput::default())
                }
                Behavior::Panic => panic!("assembler exploded"),
                Behavior::Gate(notify) => {
                    notify.notified().await;
                    Ok(StepOutput::default())
                }
            }
        }
    }

    struct Harness {
        work: TempDir,
        lock: Arc<RunLock>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                work: tempfile::tempdir().unwrap(),
                lock: RunLock::new(),
            }
        }

        fn config(&self) -> ExecutorConfig {
            ExecutorConfig {
                retry: RetryPolicy::new(3, Duration::from_secs(1)).unwrap(),
                work_dir: self.work.path().to_path_buf(),
                ..Default::default()
            }
        }

        fn executor(&self, pipeline: Pipeline) -> JobExecutor {
            self.executor_with(pipeline, self.config(), 4096)
        }

        fn executor_with(
            &self,
            pipeline: Pipeline,
            config: ExecutorConfig,
            memory_mb: u64,
        ) -> JobExecutor {
            let guard = ResourceGuard::with_probe(
                ResourceThresholds {
                    min_free_memory_mb: 100,
                    min_free_disk_mb: 100,
                    disk_path: self.work.path().to_path_buf(),
                },
                Box::new(FixedProbe {
                    memory_mb,
                    disk_mb: 10_000,
                }),
            );
            JobExecutor::new(pipeline, Arc::clone(&self.lock), guard, config)
        }
    }

    fn request() -> RunRequest {
        RunRequest::new(RunKind::Scheduled, Utc::now())
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test]
    async fn test_successful_run_chains_outputs() {
        let harness = Harness::new();
        let (idea, _) = TestStep::new("idea", Behavior::Succeed);
        let (script, _) = TestStep::new("script", Behavior::RequireOutput("idea"));
        let pipeline = Pipeline::new()
            .with_step(PipelineStep::local(idea, secs(10)))
            .with_step(PipelineStep::local(script, secs(10)));

        let result = harness.executor(pipeline).execute(request()).await;

        assert_eq!(result.status, RunStatus::Succeeded);
        assert!(result.failed_step.is_none());
        assert!(result.error_detail.is_empty());
        let names: Vec<_> = result.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["idea", "script"]);
        assert!(result.steps.iter().all(|s| s.outcome == StepOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_success_cleans_up_artifacts() {
        let harness = Harness::new();
        let (assemble, _) = TestStep::new("assemble", Behavior::WriteArtifact("short.mp4"));
        let pipeline = Pipeline::new().with_step(PipelineStep::local(assemble, secs(10)));

        let result = harness.executor(pipeline).execute(request()).await;

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.artifact_paths.len(), 2);
        let run_dir = harness.work.path().join(result.run_id.to_string());
        assert_eq!(result.artifact_paths[0], run_dir);
        assert!(!run_dir.exists());
        assert!(!result.artifact_paths[1].exists());
    }

    #[tokio::test]
    async fn test_failure_deletes_artifacts_by_default() {
        let harness = Harness::new();
        let (assemble, _) = TestStep::new("assemble", Behavior::WriteArtifact("short.mp4"));
        let (caption, _) = TestStep::new("caption", Behavior::Fail);
        let pipeline = Pipeline::new()
            .with_step(PipelineStep::local(assemble, secs(10)))
            .with_step(PipelineStep::local(caption, secs(10)));

        let result = harness.executor(pipeline).execute(request()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failed_step.as_deref(), Some("caption"));
        assert_eq!(result.error_detail, "caption broke");
        assert!(result.artifact_paths.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_failure_retains_artifacts_when_configured() {
        let harness = Harness::new();
        let (assemble, _) = TestStep::new("assemble", Behavior::WriteArtifact("short.mp4"));
        let (caption, _) = TestStep::new("caption", Behavior::Fail);
        let pipeline = Pipeline::new()
            .with_step(PipelineStep::local(assemble, secs(10)))
            .with_step(PipelineStep::local(caption, secs(10)));
        let config = ExecutorConfig {
            failed_artifacts: FailedArtifactPolicy::Retain,
            ..harness.config()
        };

        let result = harness
            .executor_with(pipeline, config, 4096)
            .execute(request())
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.artifact_paths.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn test_failure_stops_later_steps() {
        let harness = Harness::new();
        let (first, _) = TestStep::new("speech", Behavior::Fail);
        let (second, second_calls) = TestStep::new("caption", Behavior::Succeed);
        let pipeline = Pipeline::new()
            .with_step(PipelineStep::local(first, secs(10)))
            .with_step(PipelineStep::local(second, secs(10)));

        let result = harness.executor(pipeline).execute(request()).await;

        assert_eq!(result.failed_step.as_deref(), Some("speech"));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_resource_abort_runs_no_steps() {
        let harness = Harness::new();
        let (step, calls) = TestStep::new("idea", Behavior::Succeed);
        let pipeline = Pipeline::new().with_step(PipelineStep::local(step, secs(10)));

        let result = harness
            .executor_with(pipeline, harness.config(), 50)
            .execute(request())
            .await;

        assert_eq!(result.status, RunStatus::AbortedResource);
        assert!(result.error_detail.contains("memory"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.steps.is_empty());
        assert!(!harness.lock.is_held());
        // Nothing was created on disk
        assert_eq!(std::fs::read_dir(harness.work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_lock_held_drops_request() {
        let harness = Harness::new();
        let (step, calls) = TestStep::new("idea", Behavior::Succeed);
        let executor =
            harness.executor(Pipeline::new().with_step(PipelineStep::local(step, secs(10))));

        let other = crate::RunId::new();
        let _held = harness.lock.try_acquire(other).unwrap();
        let result = executor.execute(request()).await;

        assert_eq!(result.status, RunStatus::AbortedLock);
        assert!(result.error_detail.contains(&other.to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(harness.lock.holder(), Some(other));
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_exclusive() {
        let harness = Harness::new();
        let gate = Arc::new(Notify::new());
        let (step, calls) = TestStep::new("assemble", Behavior::Gate(Arc::clone(&gate)));
        let executor = Arc::new(
            harness.executor(Pipeline::new().with_step(PipelineStep::local(step, secs(60)))),
        );
        let mut progress = executor.progress();

        let first = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(request()).await })
        };
        // Wait until the first run is inside its step
        progress
            .wait_for(|active| active.as_ref().and_then(|a| a.current_step()) == Some("assemble"))
            .await
            .unwrap();

        let second = executor.execute(request()).await;
        assert_eq!(second.status, RunStatus::AbortedLock);

        gate.notify_one();
        let first = first.await.unwrap();
        assert_eq!(first.status, RunStatus::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(executor.active().is_none());
        assert!(!harness.lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_step_retried_up_to_max() {
        let harness = Harness::new();
        let (upload, calls) = TestStep::new("upload", Behavior::Flaky(u32::MAX));
        let executor =
            harness.executor(Pipeline::new().with_step(PipelineStep::remote(upload, secs(30))));

        let result = executor.execute(request()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.steps[0].attempts, 3);
        assert_eq!(result.error_detail, "503 from upload API");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_step_recovers() {
        let harness = Harness::new();
        let (upload, calls) = TestStep::new("upload", Behavior::Flaky(2));
        let executor =
            harness.executor(Pipeline::new().with_step(PipelineStep::remote(upload, secs(30))));

        let result = executor.execute(request()).await;

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.steps[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_local_step_not_retried() {
        let harness = Harness::new();
        let (step, calls) = TestStep::new("thumbnail", Behavior::Flaky(1));
        let executor =
            harness.executor(Pipeline::new().with_step(PipelineStep::local(step, secs(30))));

        let result = executor.execute(request()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.steps[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_step() {
        let harness = Harness::new();
        let (step, _) = TestStep::new("assemble", Behavior::Sleep(secs(3600)));
        let executor =
            harness.executor(Pipeline::new().with_step(PipelineStep::local(step, secs(600))));

        let result = executor.execute(request()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failed_step.as_deref(), Some("assemble"));
        assert!(result.error_detail.contains("timed out after 600s"));
        assert!(!harness.lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_timeout_is_per_attempt() {
        let harness = Harness::new();
        let (upload, calls) = TestStep::new("upload", Behavior::Sleep(secs(3600)));
        let executor =
            harness.executor(Pipeline::new().with_step(PipelineStep::remote(upload, secs(10))));

        let result = executor.execute(request()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_step_is_failure() {
        let harness = Harness::new();
        let (step, _) = TestStep::new("assemble", Behavior::Panic);
        let executor =
            harness.executor(Pipeline::new().with_step(PipelineStep::local(step, secs(10))));

        let result = executor.execute(request()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error_detail.contains("assembler exploded"));
        assert!(!harness.lock.is_held());
        assert!(executor.active().is_none());
    }

    #[tokio::test]
    async fn test_default_topic_applies_when_request_has_none() {
        let harness = Harness::new();
        struct TopicStep;

        #[async_trait]
        impl Step for TopicStep {
            fn name(&self) -> &str {
                "topic"
            }

            async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
                Ok(StepOutput::new(ctx.topic.clone().unwrap_or_default()))
            }
        }

        struct EchoTopic;

        #[async_trait]
        impl Step for EchoTopic {
            fn name(&self) -> &str {
                "check"
            }

            async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
                match ctx.output("topic") {
                    Some(value) if value == "Deep sea creatures" => Ok(StepOutput::default()),
                    other => Err(StepError::Failed(format!("unexpected topic {:?}", other))),
                }
            }
        }

        let config = ExecutorConfig {
            default_topic: Some("Deep sea creatures".to_string()),
            ..harness.config()
        };
        let pipeline = Pipeline::new()
            .with_step(PipelineStep::local(TopicStep, secs(10)))
            .with_step(PipelineStep::local(EchoTopic, secs(10)));

        let result = harness
            .executor_with(pipeline, config, 4096)
            .execute(request())
            .await;
        assert_eq!(result.status, RunStatus::Succeeded, "{}", result.error_detail);
    }

    #[tokio::test]
    async fn test_cleanup_counts() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        let nested = dir.path().join("nested");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir_all(nested.join("deeper")).unwrap();

        let summary = cleanup(&[file, nested, dir.path().join("gone")]).await;

        assert_eq!(
            summary,
            CleanupSummary {
                removed: 2,
                missing: 1,
                failed: 0
            }
        );
    }
}

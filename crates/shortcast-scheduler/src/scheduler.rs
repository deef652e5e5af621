//! Scheduler: first-boot verification and the regular trigger loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    Clock, JobExecutor, RunId, RunKind, RunRequest, RunResult, RunSummary, ScheduleConfig,
    SchedulerError, SchedulerStatus, VerificationState, VerificationStore, compute_next_trigger,
};

/// Minimum sleep duration in seconds.
const MIN_SLEEP_SECS: u64 = 1;

/// Maximum sleep duration in seconds, so wall-clock jumps are noticed.
const MAX_SLEEP_SECS: u64 = 60;

/// Whether a verification run should happen now.
pub fn should_run_verification(
    config: &ScheduleConfig,
    state: &VerificationState,
    now: DateTime<Utc>,
) -> bool {
    config.verification_enabled()
        && !(state.completed && config.verification_run_once())
        && !state.in_cooldown(now, config.verification_cooldown())
}

#[derive(Debug, Default)]
struct Timeline {
    next_trigger: Option<DateTime<Utc>>,
    last_run: Option<RunSummary>,
}

/// Decides when runs happen and records their outcomes.
pub struct Scheduler {
    config: ScheduleConfig,
    store: Arc<VerificationStore>,
    executor: Arc<JobExecutor>,
    clock: Arc<dyn Clock>,
    timeline: RwLock<Timeline>,
}

impl Scheduler {
    pub fn new(
        config: ScheduleConfig,
        store: Arc<VerificationStore>,
        executor: Arc<JobExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            executor,
            clock,
            timeline: RwLock::new(Timeline::default()),
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.executor
    }

    /// Whether a run currently holds the lock.
    pub fn is_busy(&self) -> bool {
        self.executor.lock().is_held()
    }

    /// Run first-boot verification if it is due.
    ///
    /// Blocks until the verification run finishes. A failed verification is
    /// recorded for the cooldown and never returned as an error.
    #[tracing::instrument(skip(self))]
    pub async fn boot(&self) -> Option<RunResult> {
        let now = self.clock.now();
        let state = self.store.snapshot().await;

        if !should_run_verification(&self.config, &state, now) {
            if !self.config.verification_enabled() {
                info!("startup verification disabled");
            } else if state.completed && self.config.verification_run_once() {
                info!(completed_at = ?state.completed_at, "startup verification already completed");
            } else {
                info!(last_failure_at = ?state.last_failure_at, "startup verification in cooldown");
            }
            return None;
        }

        info!(topic = %self.config.verification_topic(), "running startup verification");
        let request = RunRequest::new(RunKind::Verification, now)
            .with_topic(self.config.verification_topic());
        let result = self.run_now(request).await;

        if result.status.is_success() {
            info!(run_id = %result.run_id, "startup verification passed");
        } else {
            warn!(
                run_id = %result.run_id,
                status = %result.status,
                failed_step = ?result.failed_step,
                error = %result.error_detail,
                cooldown_secs = self.config.verification_cooldown().as_secs(),
                "startup verification failed, continuing with regular schedule"
            );
        }
        Some(result)
    }

    /// Execute `request` inline and record its outcome.
    pub async fn run_now(&self, request: RunRequest) -> RunResult {
        let result = self.executor.execute(request).await;
        self.record(&result).await;
        result
    }

    /// Execute `request` on a spawned task.
    pub fn dispatch(self: &Arc<Self>, request: RunRequest) -> JoinHandle<RunResult> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_now(request).await })
    }

    /// Start a manual run in the background and return its id.
    ///
    /// Refuses while another run holds the lock. A run that starts between
    /// this check and lock acquisition ends as `aborted-lock`.
    pub fn trigger_manual(self: &Arc<Self>) -> Result<RunId, SchedulerError> {
        if let Some(holder) = self.executor.lock().holder() {
            return Err(SchedulerError::RunInProgress(holder.to_string()));
        }

        let request = RunRequest::new(RunKind::Manual, self.clock.now());
        let run_id = request.id;
        info!(%run_id, "manual run requested");

        let handle = self.dispatch(request);
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                error!(%run_id, error = %e, "manual run task failed");
            }
        });
        Ok(run_id)
    }

    /// Snapshot for operators.
    pub async fn status(&self) -> SchedulerStatus {
        let (next_trigger, last_run) = {
            let timeline = self.timeline.read().await;
            (timeline.next_trigger, timeline.last_run.clone())
        };
        SchedulerStatus {
            schedule: self.config.describe(),
            next_trigger,
            last_run,
            active: self.executor.active(),
            verification: self.store.snapshot().await,
        }
    }

    /// Wait until no run is in progress.
    pub async fn wait_idle(&self) {
        let mut progress = self.executor.progress();
        // Sender lives as long as the executor, which we hold
        let _ = progress.wait_for(Option::is_none).await;
    }

    async fn record(&self, result: &RunResult) {
        self.timeline.write().await.last_run = Some(RunSummary::from(result));

        if result.kind != RunKind::Verification {
            return;
        }

        let at = self.clock.now();
        let saved = if result.status.is_success() {
            self.store.record_success(at).await
        } else {
            self.store.record_failure(at).await
        };
        if let Err(e) = saved {
            error!(error = %e, path = %self.store.path().display(), "failed to persist verification state");
        }
    }

    /// Run the trigger loop until `shutdown_rx` flips to true.
    ///
    /// Runs that are still executing at shutdown are awaited before returning.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(schedule = %self.config.describe(), "scheduler starting");
        let mut in_flight: Vec<JoinHandle<RunResult>> = Vec::new();

        'triggers: loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let trigger = compute_next_trigger(self.clock.now(), &self.config);
            self.timeline.write().await.next_trigger = Some(trigger);
            info!(next_trigger = %trigger, "next run scheduled");

            loop {
                let now = self.clock.now();
                if now >= trigger {
                    break;
                }

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("scheduler received shutdown signal");
                            break 'triggers;
                        }
                    }
                    _ = sleep(sleep_duration(now, trigger)) => {}
                }
            }

            reap_finished(&mut in_flight).await;
            let request = RunRequest::new(RunKind::Scheduled, trigger);
            info!(run_id = %request.id, "dispatching scheduled run");
            in_flight.push(self.dispatch(request));
        }

        self.timeline.write().await.next_trigger = None;

        if !in_flight.is_empty() {
            info!(count = in_flight.len(), "waiting for in-flight runs");
        }
        for handle in in_flight {
            log_join(handle.await);
        }
        info!("scheduler shut down gracefully");
    }
}

/// Sleep until `trigger`, clamped to `[MIN_SLEEP_SECS, MAX_SLEEP_SECS]`.
fn sleep_duration(now: DateTime<Utc>, trigger: DateTime<Utc>) -> Duration {
    let millis = (trigger - now).num_milliseconds();
    let clamped = millis.clamp(
        (MIN_SLEEP_SECS * 1000) as i64,
        (MAX_SLEEP_SECS * 1000) as i64,
    );
    Duration::from_millis(clamped as u64)
}

async fn reap_finished(in_flight: &mut Vec<JoinHandle<RunResult>>) {
    let mut pending = Vec::with_capacity(in_flight.len());
    for handle in in_flight.drain(..) {
        if handle.is_finished() {
            log_join(handle.await);
        } else {
            pending.push(handle);
        }
    }
    *in_flight = pending;
}

fn log_join(joined: Result<RunResult, tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "run task failed");
    }
}

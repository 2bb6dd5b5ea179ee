use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hourglass_core::config::SchedulerConfig;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    executor::{ExecutorRegistry, TaskExecutor},
    lifecycle::RunOutcome,
    store::{timestamp_now, JobStore},
    types::Job,
};

/// An outcome the store could not accept yet. The job stays `running` until
/// it is recorded.
#[derive(Debug, Clone)]
struct UnrecordedOutcome {
    job_id: i64,
    outcome: RunOutcome,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

type Backlog = Arc<Mutex<Vec<UnrecordedOutcome>>>;

/// Drives job execution: polls the store for due jobs and runs each one on
/// its own task.
///
/// A job is claimed (moved to `running`) before its task is spawned, so the
/// same job never has two runs in flight. Jobs run concurrently with each
/// other and never block the polling loop.
pub struct SchedulerEngine {
    store: Arc<JobStore>,
    executors: Arc<ExecutorRegistry>,
    poll_interval: Duration,
    execution_timeout: Duration,
    backlog: Backlog,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<JobStore>,
        executors: Arc<ExecutorRegistry>,
        config: &SchedulerConfig,
    ) -> Self {
        Self::with_timing(
            store,
            executors,
            config.poll_interval(),
            config.execution_timeout(),
        )
    }

    pub fn with_timing(
        store: Arc<JobStore>,
        executors: Arc<ExecutorRegistry>,
        poll_interval: Duration,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executors,
            poll_interval,
            execution_timeout,
            backlog: Arc::default(),
        }
    }

    /// Fail every run a previous process left `running`.
    pub fn recover(&self) -> Result<usize> {
        let n = self.store.recover_interrupted(timestamp_now())?;
        if n > 0 {
            warn!(count = n, "interrupted runs marked failed on startup");
        }
        Ok(n)
    }

    /// Claim every job due at `now` and spawn its run into `runs`.
    ///
    /// Outcomes that failed to persist on an earlier tick are retried first.
    /// Returns the number of runs started.
    pub fn dispatch_due(&self, now: DateTime<Utc>, runs: &mut JoinSet<()>) -> Result<usize> {
        self.retry_unrecorded();
        let claimed = self.store.claim_due(now)?;
        let count = claimed.len();
        for job in claimed {
            let executor = self.executors.get(job.task_kind);
            let store = Arc::clone(&self.store);
            let backlog = Arc::clone(&self.backlog);
            let timeout = self.execution_timeout;
            info!(job_id = job.id, name = %job.name, job_type = %job.task_kind, "executing job");
            runs.spawn(run_job(store, backlog, executor, job, now, timeout));
        }
        Ok(count)
    }

    fn retry_unrecorded(&self) {
        let pending = match self.backlog.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => {
                error!("outcome backlog lock poisoned");
                return;
            }
        };
        for item in pending {
            record(&self.store, &self.backlog, item);
        }
    }

    /// Main event loop. Polls every `poll_interval` until `shutdown`
    /// broadcasts `true`, then waits for in-flight runs to be recorded.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            timeout_secs = self.execution_timeout.as_secs(),
            "scheduler engine started"
        );
        if let Err(e) = self.recover() {
            error!("startup recovery failed: {e}");
        }

        let mut runs = JoinSet::new();
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_due(timestamp_now(), &mut runs) {
                        error!("scheduler tick error: {e}");
                    }
                }
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        error!("job task aborted: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(in_flight = runs.len(), "scheduler engine shutting down");
                        break;
                    }
                }
            }
        }

        while let Some(joined) = runs.join_next().await {
            if let Err(e) = joined {
                error!("job task aborted: {e}");
            }
        }
        self.retry_unrecorded();
        info!("scheduler engine stopped");
    }
}

/// Execute one claimed job and record its outcome.
async fn run_job(
    store: Arc<JobStore>,
    backlog: Backlog,
    executor: Option<Arc<dyn TaskExecutor>>,
    job: Job,
    claimed_at: DateTime<Utc>,
    timeout: Duration,
) {
    let started_at = timestamp_now().max(claimed_at);
    let result = match executor {
        Some(executor) => {
            match tokio::time::timeout(timeout, executor.execute(job.id, &job.parameters)).await {
                Ok(result) => result,
                Err(_) => Err(SchedulerError::Timeout {
                    secs: timeout.as_secs(),
                }),
            }
        }
        None => Err(SchedulerError::Execution(format!(
            "no executor registered for job_type '{}'",
            job.task_kind
        ))),
    };
    let finished_at = timestamp_now().max(started_at);

    let outcome = match result {
        Ok(()) => RunOutcome::Succeeded,
        Err(e) => {
            warn!(job_id = job.id, "job run failed: {e}");
            RunOutcome::Failed(e.to_string())
        }
    };

    record(
        &store,
        &backlog,
        UnrecordedOutcome {
            job_id: job.id,
            outcome,
            started_at,
            finished_at,
        },
    );
}

/// Persist an outcome, queueing it for the next tick if the store refuses.
fn record(store: &JobStore, backlog: &Backlog, item: UnrecordedOutcome) {
    match store.record_outcome(
        item.job_id,
        item.outcome.clone(),
        item.started_at,
        item.finished_at,
    ) {
        Ok(updated) => info!(
            job_id = updated.id,
            status = %updated.status,
            next_run = ?updated.next_run_at,
            "job run recorded"
        ),
        Err(SchedulerError::NotFound { id }) => {
            info!(job_id = id, "job deleted while running; outcome discarded")
        }
        Err(e @ SchedulerError::Database(_)) => {
            warn!(job_id = item.job_id, "failed to record job outcome, retrying next tick: {e}");
            match backlog.lock() {
                Ok(mut queue) => queue.push(item),
                Err(_) => error!(
                    job_id = item.job_id,
                    "outcome backlog lock poisoned; job stays running until restart"
                ),
            }
        }
        Err(e) => error!(
            job_id = item.job_id,
            "failed to record job outcome; job stays running until restart: {e}"
        ),
    }
}

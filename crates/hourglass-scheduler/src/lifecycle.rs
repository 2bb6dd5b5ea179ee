//! Run-status transitions.
//!
//! ```text
//! pending ──┐
//! completed ├──> running ──> completed
//! failed ───┘            └─> failed
//! ```
//!
//! These functions are crate-private: the engine reaches them through
//! [`crate::store::JobStore`], and nothing else may change `status`.

use chrono::{DateTime, Utc};

use crate::types::{Job, JobStatus};

const UNKNOWN_FAILURE: &str = "execution failed without an error description";

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
}

/// `pending|completed|failed -> running`. Returns false, leaving the job
/// untouched, when it is not eligible at `now`.
pub(crate) fn begin_run(job: &mut Job, now: DateTime<Utc>) -> bool {
    if !job.is_due(now) {
        return false;
    }
    job.status = JobStatus::Running;
    job.updated_at = now;
    true
}

/// `running -> completed|failed`, recording the attempt that started at
/// `started_at` and ended at `finished_at`.
///
/// The next run is computed from the start of the attempt so an interval
/// keeps its cadence; if that instant has already passed by the time the run
/// finished, it is computed from `finished_at` instead. Missed occurrences
/// are never replayed.
pub(crate) fn finish_run(
    job: &mut Job,
    outcome: RunOutcome,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) {
    debug_assert_eq!(job.status, JobStatus::Running);

    match outcome {
        RunOutcome::Succeeded => {
            job.status = JobStatus::Completed;
            job.error_message = None;
        }
        RunOutcome::Failed(message) => {
            job.status = JobStatus::Failed;
            job.error_message = Some(non_empty(message));
        }
    }
    job.last_run_at = Some(started_at);
    job.next_run_at = match job.trigger.compute_next(started_at) {
        Some(next) if next > finished_at => Some(next),
        Some(_) => job.trigger.compute_next(finished_at),
        None => None,
    };
    job.updated_at = finished_at;
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        UNKNOWN_FAILURE.to_string()
    } else {
        message
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SchedulerError;
use crate::schedule::Trigger;

/// Selects which task executor runs a job. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Notification dispatch.
    Email,
    /// Numeric computation over the job parameters.
    Calculation,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Email => "email",
            TaskKind::Calculation => "calculation",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(TaskKind::Email),
            "calculation" => Ok(TaskKind::Calculation),
            other => Err(SchedulerError::Validation(format!(
                "unknown job_type '{other}' (expected email or calculation)"
            ))),
        }
    }
}

/// Run status of a job. Only the scheduler engine moves a job between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Awaiting its first or next run.
    Pending,
    /// Execution in progress.
    Running,
    /// Last run succeeded.
    Completed,
    /// Last run raised an error; see `error_message`.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Assigned by the store; never reused.
    pub id: i64,
    /// Human-readable label.
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "job_type")]
    pub task_kind: TaskKind,
    /// Flattened as `schedule_type` + `schedule_config`.
    #[serde(flatten)]
    pub trigger: Trigger,
    /// Passed verbatim to the task executor.
    pub parameters: Map<String, Value>,
    pub is_active: bool,
    /// Start time of the most recent execution attempt.
    #[serde(rename = "last_run")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// `None` when the trigger can never fire again.
    #[serde(rename = "next_run")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    /// Set only while `status == Failed`.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the engine should pick this job up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.status != JobStatus::Running
            && self.next_run_at.is_some_and(|next| next <= now)
    }

    /// Active, but the trigger will never fire again.
    pub fn is_dormant(&self) -> bool {
        self.is_active && self.next_run_at.is_none()
    }
}

/// Validated input for [`crate::store::JobStore::create`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub description: Option<String>,
    pub task_kind: TaskKind,
    pub trigger: Trigger,
    pub parameters: Map<String, Value>,
}

/// Partial update for [`crate::store::JobStore::update`]. `None` leaves a
/// field untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
    /// Must equal the stored kind; present so the store can reject changes.
    pub task_kind: Option<TaskKind>,
    /// Must keep the stored variant.
    pub trigger: Option<Trigger>,
    pub parameters: Option<Map<String, Value>>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.is_active.is_none()
            && self.task_kind.is_none()
            && self.trigger.is_none()
            && self.parameters.is_none()
    }
}

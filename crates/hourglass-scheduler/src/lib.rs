//! `hourglass-scheduler` - Tokio-based job scheduler with SQLite persistence.
//!
//! # Overview
//!
//! Jobs are persisted to a SQLite `jobs` table by [`store::JobStore`]. The
//! [`engine::SchedulerEngine`] polls the store, claims every job whose
//! `next_run` has arrived and runs it through the [`executor::TaskExecutor`]
//! registered for its `job_type`, then records the outcome and the next
//! scheduled time. [`service::JobService`] validates client input for the
//! HTTP layer.
//!
//! # Trigger variants
//!
//! | Variant     | Behaviour                                          |
//! |-------------|----------------------------------------------------|
//! | `Interval`  | Repeat every N seconds                             |
//! | `Cron`      | Five-field cron expression, evaluated in UTC       |
//! | `FixedDate` | Single fire at an absolute UTC instant             |

pub mod cron;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod schedule;
pub mod service;
pub mod store;
pub mod types;

pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use executor::{ExecutorRegistry, TaskExecutor};
pub use schedule::{ScheduleType, Trigger};
pub use service::{CreateJobRequest, JobService, UpdateJobRequest};
pub use store::JobStore;
pub use types::{Job, JobStatus, TaskKind};

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    lifecycle::{self, RunOutcome},
    schedule::{ScheduleType, Trigger},
    types::{Job, JobPatch, JobStatus, NewJob, TaskKind},
};

const SELECT_JOB: &str = "SELECT id, name, description, job_type, schedule_type, schedule_config,
        parameters, is_active, status, error_message, last_run, next_run,
        created_at, updated_at
 FROM jobs";

const INTERRUPTED: &str = "interrupted: the scheduler stopped before the run finished";

/// SQLite-backed job repository shared by the API surface and the engine.
///
/// Every operation runs under one connection lock, so each read-modify-write
/// on a record is atomic and concurrent writers to the same id serialize.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Insert a job. Status starts `pending`; `next_run` is computed now.
    pub fn create(&self, new: NewJob) -> Result<Job> {
        let conn = self.lock()?;
        let now = timestamp_now();
        let next_run_at = new.trigger.compute_next(now);
        let schedule_config = serde_json::to_string(&new.trigger.config())?;
        let parameters = serde_json::to_string(&new.parameters)?;

        conn.execute(
            "INSERT INTO jobs
             (name, description, job_type, schedule_type, schedule_config, parameters,
              is_active, status, error_message, last_run, next_run, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,1,'pending',NULL,NULL,?7,?8,?8)",
            rusqlite::params![
                new.name,
                new.description,
                new.task_kind.as_str(),
                new.trigger.schedule_type().as_str(),
                schedule_config,
                parameters,
                next_run_at.map(fmt_ts),
                fmt_ts(now),
            ],
        )?;
        let id = conn.last_insert_rowid();

        info!(job_id = id, name = %new.name, job_type = %new.task_kind, "job created");

        Ok(Job {
            id,
            name: new.name,
            description: new.description,
            task_kind: new.task_kind,
            trigger: new.trigger,
            parameters: new.parameters,
            is_active: true,
            last_run_at: None,
            next_run_at,
            status: JobStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, id: i64) -> Result<Job> {
        let conn = self.lock()?;
        fetch(&conn, id)
    }

    /// All jobs in creation order.
    pub fn list(&self) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        query_jobs(&conn, &format!("{SELECT_JOB} ORDER BY id"), [])
    }

    /// One page of [`list`](Self::list).
    pub fn list_page(&self, offset: u32, limit: u32) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        query_jobs(
            &conn,
            &format!("{SELECT_JOB} ORDER BY id LIMIT ?1 OFFSET ?2"),
            [limit, offset],
        )
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Apply `patch` to job `id` atomically.
    ///
    /// Rejects a different `task_kind` or trigger variant. `next_run` is
    /// recomputed from now when the trigger changes or the job is
    /// reactivated; run-status fields are never touched.
    pub fn update(&self, id: i64, patch: JobPatch) -> Result<Job> {
        let conn = self.lock()?;
        let mut job = fetch(&conn, id)?;

        if patch.task_kind.is_some_and(|kind| kind != job.task_kind) {
            return Err(SchedulerError::ImmutableField { field: "job_type" });
        }
        if patch
            .trigger
            .as_ref()
            .is_some_and(|t| t.schedule_type() != job.trigger.schedule_type())
        {
            return Err(SchedulerError::ImmutableField {
                field: "schedule_type",
            });
        }

        let now = timestamp_now();
        let reactivated = patch.is_active == Some(true) && !job.is_active;

        if let Some(name) = patch.name {
            job.name = name;
        }
        if let Some(description) = patch.description {
            job.description = description;
        }
        if let Some(is_active) = patch.is_active {
            job.is_active = is_active;
        }
        if let Some(parameters) = patch.parameters {
            job.parameters = parameters;
        }
        let trigger_changed = match patch.trigger {
            Some(trigger) if trigger != job.trigger => {
                job.trigger = trigger;
                true
            }
            _ => false,
        };
        if trigger_changed || reactivated {
            job.next_run_at = job.trigger.compute_next(now);
            debug!(job_id = id, next_run = ?job.next_run_at, "next run recomputed");
        }
        job.updated_at = now;

        write_job(&conn, &job)?;
        info!(job_id = id, "job updated");
        Ok(job)
    }

    /// Remove a job by ID. Returns `NotFound` if no row is deleted.
    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::NotFound { id });
        }
        info!(job_id = id, "job deleted");
        Ok(())
    }

    // --- engine-only transitions -------------------------------------------

    /// Move every job due at `now` to `running` and return them.
    ///
    /// Selection and the status change happen in one transaction under the
    /// lock, so a job is handed out at most once until its outcome is recorded.
    pub(crate) fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let candidates = query_jobs(
            &tx,
            &format!(
                "{SELECT_JOB}
                 WHERE is_active = 1 AND status != 'running'
                   AND next_run IS NOT NULL AND next_run <= ?1
                 ORDER BY next_run"
            ),
            [fmt_ts(now)],
        )?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for mut job in candidates {
            if !lifecycle::begin_run(&mut job, now) {
                continue;
            }
            tx.execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2, run_started_at = ?2 WHERE id = ?3",
                rusqlite::params![job.status.to_string(), fmt_ts(job.updated_at), job.id],
            )?;
            claimed.push(job);
        }
        tx.commit()?;
        Ok(claimed)
    }

    /// Apply the `running -> completed|failed` transition for job `id`.
    pub(crate) fn record_outcome(
        &self,
        id: i64,
        outcome: RunOutcome,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Result<Job> {
        let conn = self.lock()?;
        let mut job = fetch(&conn, id)?;
        if job.status != JobStatus::Running {
            warn!(job_id = id, status = %job.status, "outcome for a job that is not running ignored");
            return Ok(job);
        }
        lifecycle::finish_run(&mut job, outcome, started_at, finished_at);
        write_job(&conn, &job)?;
        Ok(job)
    }

    /// Fail every job left `running` by a previous process.
    pub(crate) fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let stuck = query_jobs(&tx, &format!("{SELECT_JOB} WHERE status = 'running'"), [])?;
        let count = stuck.len();
        for mut job in stuck {
            let claimed_at: Option<String> = tx.query_row(
                "SELECT run_started_at FROM jobs WHERE id = ?1",
                [job.id],
                |row| row.get(0),
            )?;
            let started_at = claimed_at
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(job.updated_at);
            lifecycle::finish_run(
                &mut job,
                RunOutcome::Failed(INTERRUPTED.to_string()),
                started_at,
                now,
            );
            write_job(&tx, &job)?;
        }
        tx.commit()?;
        Ok(count)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// Run raw SQL against the connection, for breaking the store in tests.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

/// Current time at the precision the store persists.
pub(crate) fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width UTC timestamps so text comparison in SQL matches time order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn fetch(conn: &Connection, id: i64) -> Result<Job> {
    conn.query_row(&format!("{SELECT_JOB} WHERE id = ?1"), [id], JobRow::from_row)
        .optional()?
        .ok_or(SchedulerError::NotFound { id })?
        .into_job()
}

/// Run a job query, skipping (and logging) rows that no longer decode.
fn query_jobs<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Job>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, JobRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match row.into_job() {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("skipping job row: {e}");
                None
            }
        })
        .collect())
}

fn write_job(conn: &Connection, job: &Job) -> Result<()> {
    conn.execute(
        "UPDATE jobs SET name=?1, description=?2, schedule_config=?3, parameters=?4,
                         is_active=?5, status=?6, error_message=?7, last_run=?8,
                         next_run=?9, updated_at=?10,
                         run_started_at = CASE WHEN ?6 = 'running' THEN run_started_at END
         WHERE id=?11",
        rusqlite::params![
            job.name,
            job.description,
            serde_json::to_string(&job.trigger.config())?,
            serde_json::to_string(&job.parameters)?,
            job.is_active,
            job.status.to_string(),
            job.error_message,
            job.last_run_at.map(fmt_ts),
            job.next_run_at.map(fmt_ts),
            fmt_ts(job.updated_at),
            job.id,
        ],
    )?;
    Ok(())
}

/// Raw column values of one `jobs` row.
struct JobRow {
    id: i64,
    name: String,
    description: Option<String>,
    job_type: String,
    schedule_type: String,
    schedule_config: String,
    parameters: String,
    is_active: bool,
    status: String,
    error_message: Option<String>,
    last_run: Option<String>,
    next_run: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            job_type: row.get(3)?,
            schedule_type: row.get(4)?,
            schedule_config: row.get(5)?,
            parameters: row.get(6)?,
            is_active: row.get(7)?,
            status: row.get(8)?,
            error_message: row.get(9)?,
            last_run: row.get(10)?,
            next_run: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let id = self.id;
        let corrupt = |reason: String| SchedulerError::CorruptRecord { id, reason };

        let task_kind: TaskKind = self.job_type.parse().map_err(|e| corrupt(format!("{e}")))?;
        let schedule_type: ScheduleType =
            self.schedule_type.parse().map_err(|e| corrupt(format!("{e}")))?;
        let config: Value =
            serde_json::from_str(&self.schedule_config).map_err(|e| corrupt(e.to_string()))?;
        let trigger =
            Trigger::from_config(schedule_type, &config).map_err(|e| corrupt(e.to_string()))?;
        let parameters: Map<String, Value> =
            serde_json::from_str(&self.parameters).map_err(|e| corrupt(e.to_string()))?;
        let status: JobStatus = self.status.parse().map_err(corrupt)?;

        let ts = |raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp '{raw}': {e}")))
        };

        Ok(Job {
            id,
            name: self.name,
            description: self.description,
            task_kind,
            trigger,
            parameters,
            is_active: self.is_active,
            last_run_at: self.last_run.as_deref().map(ts).transpose()?,
            next_run_at: self.next_run.as_deref().map(ts).transpose()?,
            status,
            error_message: self.error_message,
            created_at: ts(&self.created_at)?,
            updated_at: ts(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn new_job(name: &str, trigger: Trigger) -> NewJob {
        NewJob {
            name: name.to_string(),
            description: None,
            task_kind: TaskKind::Email,
            trigger,
            parameters: Map::new(),
        }
    }

    fn interval_job(store: &JobStore, name: &str) -> Job {
        store
            .create(new_job(name, Trigger::interval(60).unwrap()))
            .unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = JobStore::open_in_memory().unwrap();
        let mut new = new_job("backup", Trigger::cron("0 3 * * *").unwrap());
        new.description = Some("nightly".to_string());
        new.parameters = json!({"to": "ops@example.com"}).as_object().unwrap().clone();
        let created = store.create(new).unwrap();

        let fetched = store.get(created.id).unwrap();
        assert_eq!(fetched.name, "backup");
        assert_eq!(fetched.description.as_deref(), Some("nightly"));
        assert_eq!(fetched.trigger, created.trigger);
        assert_eq!(fetched.parameters["to"], "ops@example.com");
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.next_run_at, created.next_run_at);
        assert_eq!(fetched.created_at, created.created_at);
    }

    #[test]
    fn ids_are_never_reused() {
        let store = JobStore::open_in_memory().unwrap();
        let a = interval_job(&store, "a");
        let b = interval_job(&store, "b");
        store.delete(b.id).unwrap();
        let c = interval_job(&store, "c");
        assert!(c.id > b.id && b.id > a.id);
    }

    #[test]
    fn list_is_in_creation_order() {
        let store = JobStore::open_in_memory().unwrap();
        for name in ["first", "second", "third"] {
            interval_job(&store, name);
        }
        let names: Vec<String> = store.list().unwrap().into_iter().map(|j| j.name).collect();
        assert_eq!(names, ["first", "second", "third"]);

        let page: Vec<String> = store
            .list_page(1, 1)
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(page, ["second"]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn missing_ids_are_not_found() {
        let store = JobStore::open_in_memory().unwrap();
        assert!(matches!(store.get(9999), Err(SchedulerError::NotFound { id: 9999 })));
        assert!(matches!(store.delete(9999), Err(SchedulerError::NotFound { id: 9999 })));
        assert!(matches!(
            store.update(9999, JobPatch::default()),
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[test]
    fn update_rejects_variant_and_kind_changes() {
        let store = JobStore::open_in_memory().unwrap();
        let job = interval_job(&store, "daily");

        let err = store
            .update(
                job.id,
                JobPatch {
                    trigger: Some(Trigger::cron("* * * * *").unwrap()),
                    ..JobPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ImmutableField { field: "schedule_type" }));

        let err = store
            .update(
                job.id,
                JobPatch {
                    task_kind: Some(TaskKind::Calculation),
                    ..JobPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ImmutableField { field: "job_type" }));

        // Same kind is accepted as a no-op.
        let same = store
            .update(
                job.id,
                JobPatch {
                    task_kind: Some(TaskKind::Email),
                    ..JobPatch::default()
                },
            )
            .unwrap();
        assert_eq!(same.task_kind, TaskKind::Email);
        assert_eq!(store.get(job.id).unwrap().trigger, job.trigger);
    }

    #[test]
    fn trigger_change_recomputes_next_run() {
        let store = JobStore::open_in_memory().unwrap();
        let job = interval_job(&store, "poll");
        let updated = store
            .update(
                job.id,
                JobPatch {
                    trigger: Some(Trigger::interval(3600).unwrap()),
                    ..JobPatch::default()
                },
            )
            .unwrap();
        let next = updated.next_run_at.unwrap();
        let expected = updated.updated_at + Duration::seconds(3600);
        assert_eq!(next, expected);
    }

    #[test]
    fn field_update_leaves_schedule_and_status_alone() {
        let store = JobStore::open_in_memory().unwrap();
        let job = interval_job(&store, "poll");
        let updated = store
            .update(
                job.id,
                JobPatch {
                    name: Some("renamed".to_string()),
                    description: Some(Some("desc".to_string())),
                    ..JobPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.description.as_deref(), Some("desc"));
        assert_eq!(updated.next_run_at, job.next_run_at);
        assert_eq!(updated.status, JobStatus::Pending);
        assert!(updated.updated_at >= job.updated_at);
    }

    #[test]
    fn claim_marks_running_once() {
        let store = JobStore::open_in_memory().unwrap();
        let job = interval_job(&store, "tick");
        let due_at = job.next_run_at.unwrap();

        assert!(store.claim_due(due_at - Duration::seconds(1)).unwrap().is_empty());

        let claimed = store.claim_due(due_at).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, JobStatus::Running);
        assert_eq!(store.get(job.id).unwrap().status, JobStatus::Running);

        // Already running: a second tick must not hand it out again.
        assert!(store.claim_due(due_at + Duration::seconds(5)).unwrap().is_empty());
    }

    #[test]
    fn parallel_claims_hand_out_a_job_once() {
        let store = std::sync::Arc::new(JobStore::open_in_memory().unwrap());
        let job = interval_job(&store, "contended");
        let due_at = job.next_run_at.unwrap();
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                let barrier = std::sync::Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.claim_due(due_at).unwrap().len()
                })
            })
            .collect();
        let claimed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(claimed, 1);
    }

    #[test]
    fn inactive_jobs_are_never_claimed() {
        let store = JobStore::open_in_memory().unwrap();
        let job = interval_job(&store, "paused");
        store
            .update(
                job.id,
                JobPatch {
                    is_active: Some(false),
                    ..JobPatch::default()
                },
            )
            .unwrap();
        let far_future = Utc::now() + Duration::days(30);
        assert!(store.claim_due(far_future).unwrap().is_empty());
        assert_eq!(store.get(job.id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn outcome_after_delete_is_not_found() {
        let store = JobStore::open_in_memory().unwrap();
        let job = interval_job(&store, "gone");
        let due_at = job.next_run_at.unwrap();
        store.claim_due(due_at).unwrap();
        store.delete(job.id).unwrap();
        let err = store
            .record_outcome(job.id, RunOutcome::Succeeded, due_at, due_at)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound { .. }));
    }

    #[test]
    fn recovery_fails_interrupted_runs() {
        let store = JobStore::open_in_memory().unwrap();
        let job = interval_job(&store, "crashy");
        let due_at = job.next_run_at.unwrap();
        store.claim_due(due_at).unwrap();

        let restart = due_at + Duration::seconds(10);
        assert_eq!(store.recover_interrupted(restart).unwrap(), 1);

        let recovered = store.get(job.id).unwrap();
        assert_eq!(recovered.status, JobStatus::Failed);
        assert_eq!(recovered.error_message.as_deref(), Some(INTERRUPTED));
        assert!(recovered.next_run_at.unwrap() > restart);
        assert_eq!(store.recover_interrupted(restart).unwrap(), 0);
    }

    #[test]
    fn recovery_uses_claim_time_even_after_an_edit() {
        let store = JobStore::open_in_memory().unwrap();
        let job = interval_job(&store, "edited");
        let due_at = job.next_run_at.unwrap();
        store.claim_due(due_at).unwrap();

        let edited = store
            .update(
                job.id,
                JobPatch {
                    name: Some("edited while running".to_string()),
                    ..JobPatch::default()
                },
            )
            .unwrap();
        assert_ne!(edited.updated_at, due_at);
        assert_eq!(edited.status, JobStatus::Running);

        let restart = due_at + Duration::seconds(10);
        store.recover_interrupted(restart).unwrap();
        let recovered = store.get(job.id).unwrap();
        assert_eq!(recovered.last_run_at, Some(due_at));
        assert_eq!(recovered.name, "edited while running");
    }
}

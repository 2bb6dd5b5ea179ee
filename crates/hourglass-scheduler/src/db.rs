use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` table (idempotent) and an index on `next_run` so the
/// polling query stays cheap. `AUTOINCREMENT` guarantees that ids of deleted
/// jobs are never handed out again.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT    NOT NULL,
            description     TEXT,
            job_type        TEXT    NOT NULL,
            schedule_type   TEXT    NOT NULL,
            schedule_config TEXT    NOT NULL,   -- JSON object
            parameters      TEXT    NOT NULL DEFAULT '{}',
            is_active       INTEGER NOT NULL DEFAULT 1,
            status          TEXT    NOT NULL DEFAULT 'pending',
            error_message   TEXT,
            last_run        TEXT,               -- RFC 3339 (UTC, micros) or NULL
            next_run        TEXT,               -- RFC 3339 (UTC, micros) or NULL
            run_started_at  TEXT,               -- claim time while status = 'running'
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        -- Polling: SELECT … WHERE next_run <= ?
        CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs (next_run);
        ",
    )?;
    Ok(())
}

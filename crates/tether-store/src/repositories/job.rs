//! Job table access — the leased queue behind runs.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::Result;
use crate::types::{Job, JobState};
use crate::util::generate_id;

const JOB_COLUMNS: &str =
    "id, run_id, status, lease_owner, lease_expires_at, available_at, attempts, last_error";

/// Repository for the `jobs` table.
pub struct JobRepo;

impl JobRepo {
    /// Insert a queued job for a run.
    pub fn insert(conn: &Connection, run_id: &str, available_at: i64) -> Result<Job> {
        let id = generate_id("job");
        let _ = conn.execute(
            "INSERT INTO jobs (id, run_id, status, available_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, run_id, JobState::Queued.as_sql(), available_at],
        )?;
        Ok(Job {
            id,
            run_id: run_id.to_string(),
            status: JobState::Queued,
            lease_owner: None,
            lease_expires_at: None,
            available_at,
            attempts: 0,
            last_error: None,
        })
    }

    /// Get a job by id.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<Job>> {
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// Get the job belonging to a run.
    pub fn get_by_run(conn: &Connection, run_id: &str) -> Result<Option<Job>> {
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE run_id = ?1"),
            params![run_id],
            job_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// The oldest queued job eligible at `now_ms` (lease expired or absent).
    ///
    /// Read side of the lease; the flip happens in the store transaction.
    pub fn next_eligible(conn: &Connection, now_ms: i64) -> Result<Option<Job>> {
        conn.query_row(
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs \
                 WHERE status = 'queued' AND available_at <= ?1 \
                   AND (lease_expires_at IS NULL OR lease_expires_at <= ?1) \
                 ORDER BY available_at LIMIT 1"
            ),
            params![now_ms],
            job_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// Flip a queued job to leased. Returns false if it was taken meanwhile.
    pub fn lease(
        conn: &Connection,
        id: &str,
        owner: &str,
        now_ms: i64,
        lease_duration_ms: i64,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'leased', lease_owner = ?1, lease_expires_at = ?2, \
                             attempts = attempts + 1 \
             WHERE id = ?3 AND status = 'queued'",
            params![owner, now_ms + lease_duration_ms, id],
        )?;
        Ok(changed > 0)
    }

    /// Extend a held lease.
    pub fn renew_lease(
        conn: &Connection,
        id: &str,
        now_ms: i64,
        lease_duration_ms: i64,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE jobs SET lease_expires_at = ?1 WHERE id = ?2 AND status = 'leased'",
            params![now_ms + lease_duration_ms, id],
        )?;
        Ok(changed > 0)
    }

    /// Terminal success.
    pub fn complete(conn: &Connection, id: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'completed', lease_owner = NULL, lease_expires_at = NULL \
             WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }

    /// Terminal failure with a recorded error.
    pub fn fail(conn: &Connection, id: &str, error: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', last_error = ?1, \
                             lease_owner = NULL, lease_expires_at = NULL \
             WHERE id = ?2",
            params![error, id],
        )?;
        Ok(changed > 0)
    }

    /// Cancel the job of a run, clearing any lease.
    pub fn cancel_by_run(conn: &Connection, run_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'cancelled', lease_owner = NULL, lease_expires_at = NULL \
             WHERE run_id = ?1 AND status IN ('queued', 'leased')",
            params![run_id],
        )?;
        Ok(changed > 0)
    }

    /// Flip a leased job back to queued, immediately available.
    pub fn requeue_by_run(conn: &Connection, run_id: &str, now_ms: i64) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'queued', lease_owner = NULL, lease_expires_at = NULL, \
                             available_at = ?1 \
             WHERE run_id = ?2 AND status = 'leased'",
            params![now_ms, run_id],
        )?;
        Ok(changed > 0)
    }

    /// Push a job's availability into the future without releasing state
    /// changes elsewhere (used while the kill switch is on).
    pub fn defer(conn: &Connection, id: &str, available_at: i64) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'queued', lease_owner = NULL, lease_expires_at = NULL, \
                             available_at = ?1 \
             WHERE id = ?2 AND status = 'leased'",
            params![available_at, id],
        )?;
        Ok(changed > 0)
    }

    /// Number of queued jobs.
    pub fn count_queued(conn: &Connection) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = 'queued'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Job>> {
    let status: String = row.get(2)?;
    Ok(JobState::parse(&status).map(|status| Job {
        id: row.get_unwrap(0),
        run_id: row.get_unwrap(1),
        status,
        lease_owner: row.get_unwrap(3),
        lease_expires_at: row.get_unwrap(4),
        available_at: row.get_unwrap(5),
        attempts: row.get_unwrap(6),
        last_error: row.get_unwrap(7),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

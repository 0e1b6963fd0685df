//! Run table access.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::Result;
use crate::types::{Run, RunState, RunSummary};
use crate::util::generate_id;

const RUN_COLUMNS: &str = "id, project_id, session_id, idempotency_key, prompt, status, \
                           started_at, finished_at, summary_json, created_at";

/// Parameters for inserting a run.
pub struct InsertRunParams<'a> {
    pub project_id: &'a str,
    pub session_id: &'a str,
    pub idempotency_key: &'a str,
    pub prompt: &'a str,
    pub now_ms: i64,
}

/// Repository for the `runs` table.
pub struct RunRepo;

impl RunRepo {
    /// Insert a new queued run.
    pub fn insert(conn: &Connection, params: &InsertRunParams<'_>) -> Result<Run> {
        let id = generate_id("run");
        let _ = conn.execute(
            "INSERT INTO runs \
             (id, project_id, session_id, idempotency_key, prompt, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id,
                params.project_id,
                params.session_id,
                params.idempotency_key,
                params.prompt,
                RunState::Queued.as_sql(),
                params.now_ms,
            ],
        )?;
        Ok(Run {
            id,
            project_id: params.project_id.to_string(),
            session_id: params.session_id.to_string(),
            idempotency_key: params.idempotency_key.to_string(),
            prompt: params.prompt.to_string(),
            status: RunState::Queued,
            started_at: None,
            finished_at: None,
            summary_json: None,
            created_at: params.now_ms,
        })
    }

    /// Get a run by id.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<Run>> {
        conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
            params![id],
            run_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// Get a run by its idempotency key.
    pub fn get_by_idempotency_key(conn: &Connection, key: &str) -> Result<Option<Run>> {
        conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE idempotency_key = ?1"),
            params![key],
            run_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// The run occupying the session's single-flight slot, if any.
    pub fn find_active_by_session(conn: &Connection, session_id: &str) -> Result<Option<Run>> {
        conn.query_row(
            &format!(
                "SELECT {RUN_COLUMNS} FROM runs \
                 WHERE session_id = ?1 AND status IN ('queued', 'leased', 'in_flight') \
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![session_id],
            run_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// Runs of a session, newest first.
    pub fn list_by_session(conn: &Connection, session_id: &str, limit: u32) -> Result<Vec<Run>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE session_id = ?1 \
             ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![session_id, limit], run_from_row)?;
        collect(rows)
    }

    /// Most recent runs across all sessions.
    pub fn list_recent(conn: &Connection, limit: u32) -> Result<Vec<Run>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], run_from_row)?;
        collect(rows)
    }

    /// Set status from one of the transition helpers.
    pub fn set_status(conn: &Connection, id: &str, status: RunState) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE runs SET status = ?1 WHERE id = ?2",
            params![status.as_sql(), id],
        )?;
        Ok(changed > 0)
    }

    /// Flip to `in_flight` and record the start time.
    pub fn mark_in_flight(conn: &Connection, id: &str, now_ms: i64) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE runs SET status = 'in_flight', started_at = ?1 WHERE id = ?2",
            params![now_ms, id],
        )?;
        Ok(changed > 0)
    }

    /// Terminal transition with summary.
    pub fn finalize(
        conn: &Connection,
        id: &str,
        status: RunState,
        now_ms: i64,
        summary: &RunSummary,
    ) -> Result<bool> {
        let summary_json = serde_json::to_string(summary)?;
        let changed = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, summary_json = ?3 WHERE id = ?4",
            params![status.as_sql(), now_ms, summary_json, id],
        )?;
        Ok(changed > 0)
    }

    /// Flip to `cancelled` with a finish time.
    pub fn cancel(conn: &Connection, id: &str, now_ms: i64) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE runs SET status = 'cancelled', finished_at = ?1 \
             WHERE id = ?2 AND status IN ('queued', 'leased', 'in_flight')",
            params![now_ms, id],
        )?;
        Ok(changed > 0)
    }

    /// Flip to `abandoned`, but only from `in_flight` (idempotent under
    /// concurrent reconcilers).
    pub fn abandon_if_in_flight(conn: &Connection, id: &str, now_ms: i64) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE runs SET status = 'abandoned', finished_at = ?1 \
             WHERE id = ?2 AND status = 'in_flight'",
            params![now_ms, id],
        )?;
        Ok(changed > 0)
    }

    /// In-flight runs whose `started_at` is older than the cutoff.
    pub fn list_stale_in_flight(conn: &Connection, started_before_ms: i64) -> Result<Vec<Run>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs \
             WHERE status = 'in_flight' AND started_at IS NOT NULL AND started_at < ?1 \
             ORDER BY started_at"
        ))?;
        let rows = stmt.query_map(params![started_before_ms], run_from_row)?;
        collect(rows)
    }

    /// Count runs by status.
    pub fn count_by_status(conn: &Connection, status: RunState) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE status = ?1",
            params![status.as_sql()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<Result<Run>>>,
) -> Result<Vec<Run>> {
    let mut runs = Vec::new();
    for row in rows {
        runs.push(row??);
    }
    Ok(runs)
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Run>> {
    let status: String = row.get(5)?;
    Ok(RunState::parse(&status).map(|status| Run {
        id: row.get_unwrap(0),
        project_id: row.get_unwrap(1),
        session_id: row.get_unwrap(2),
        idempotency_key: row.get_unwrap(3),
        prompt: row.get_unwrap(4),
        status,
        started_at: row.get_unwrap(6),
        finished_at: row.get_unwrap(7),
        summary_json: row.get_unwrap(8),
        created_at: row.get_unwrap(9),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

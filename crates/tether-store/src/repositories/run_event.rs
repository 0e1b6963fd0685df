//! Run event table access — append-only, gap-free `seq` per run.

use rusqlite::{params, Connection, Row};

use crate::errors::Result;
use crate::types::RunEventRow;

/// Repository for the `run_events` table.
pub struct RunEventRepo;

impl RunEventRepo {
    /// Next sequence number for a run (`max + 1`, starting at 1).
    ///
    /// Must be called inside the same transaction as [`insert`] so two
    /// concurrent appends cannot observe the same maximum.
    ///
    /// [`insert`]: RunEventRepo::insert
    pub fn next_seq(conn: &Connection, run_id: &str) -> Result<i64> {
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM run_events WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(seq)
    }

    /// Insert one event row.
    pub fn insert(
        conn: &Connection,
        run_id: &str,
        seq: i64,
        event_type: &str,
        payload_json: &str,
        now_ms: i64,
    ) -> Result<RunEventRow> {
        let _ = conn.execute(
            "INSERT INTO run_events (run_id, seq, event_type, payload_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, seq, event_type, payload_json, now_ms],
        )?;
        Ok(RunEventRow {
            id: conn.last_insert_rowid(),
            run_id: run_id.to_string(),
            seq,
            event_type: event_type.to_string(),
            payload_json: payload_json.to_string(),
            created_at: now_ms,
        })
    }

    /// All events of a run, ordered by `seq`.
    pub fn list_by_run(conn: &Connection, run_id: &str) -> Result<Vec<RunEventRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, run_id, seq, event_type, payload_json, created_at \
             FROM run_events WHERE run_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![run_id], event_from_row)?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(rows)
    }

    /// Number of events persisted for a run.
    pub fn count(conn: &Connection, run_id: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM run_events WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Total events across all runs.
    pub fn count_all(conn: &Connection) -> Result<i64> {
        let count = conn.query_row("SELECT COUNT(*) FROM run_events", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<RunEventRow> {
    Ok(RunEventRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        seq: row.get(2)?,
        event_type: row.get(3)?,
        payload_json: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

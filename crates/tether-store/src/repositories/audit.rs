//! Audit trail table access. Append-only.

use rusqlite::{params, Connection, Row};

use crate::errors::Result;
use crate::types::{AuditDecision, AuditEntry};
use crate::util::now_ms;

/// Parameters for appending an audit entry.
pub struct AppendAuditParams<'a> {
    pub user_id: Option<i64>,
    pub chat_id: i64,
    pub command: &'a str,
    pub run_id: Option<&'a str>,
    pub decision: AuditDecision,
    pub reason: Option<&'a str>,
}

/// Repository for the `audit_log` table.
pub struct AuditRepo;

impl AuditRepo {
    /// Append one entry.
    pub fn append(conn: &Connection, params: &AppendAuditParams<'_>) -> Result<AuditEntry> {
        let now = now_ms();
        let _ = conn.execute(
            "INSERT INTO audit_log (user_id, chat_id, command, run_id, decision, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                params.user_id,
                params.chat_id,
                params.command,
                params.run_id,
                params.decision.as_sql(),
                params.reason,
                now,
            ],
        )?;
        Ok(AuditEntry {
            id: conn.last_insert_rowid(),
            user_id: params.user_id,
            chat_id: params.chat_id,
            command: params.command.to_string(),
            run_id: params.run_id.map(String::from),
            decision: params.decision,
            reason: params.reason.map(String::from),
            created_at: now,
        })
    }

    /// Most recent entries, newest first.
    pub fn list_recent(conn: &Connection, limit: u32) -> Result<Vec<AuditEntry>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, chat_id, command, run_id, decision, reason, created_at \
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], audit_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row??);
        }
        Ok(entries)
    }
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<Result<AuditEntry>> {
    let decision: String = row.get(5)?;
    Ok(AuditDecision::parse(&decision).map(|decision| AuditEntry {
        id: row.get_unwrap(0),
        user_id: row.get_unwrap(1),
        chat_id: row.get_unwrap(2),
        command: row.get_unwrap(3),
        run_id: row.get_unwrap(4),
        decision,
        reason: row.get_unwrap(6),
        created_at: row.get_unwrap(7),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::setup_conn;

    #[test]
    fn append_and_list() {
        let conn = setup_conn();
        let entry = AuditRepo::append(
            &conn,
            &AppendAuditParams {
                user_id: Some(42),
                chat_id: 100,
                command: "run",
                run_id: Some("run-1"),
                decision: AuditDecision::Allow,
                reason: None,
            },
        )
        .unwrap();
        assert_eq!(entry.decision, AuditDecision::Allow);

        let _ = AuditRepo::append(
            &conn,
            &AppendAuditParams {
                user_id: Some(77),
                chat_id: 100,
                command: "run",
                run_id: None,
                decision: AuditDecision::Deny,
                reason: Some("non-owner"),
            },
        )
        .unwrap();

        let entries = AuditRepo::list_recent(&conn, 10).unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first.
        assert_eq!(entries[0].decision, AuditDecision::Deny);
        assert_eq!(entries[0].reason.as_deref(), Some("non-owner"));
    }

    #[test]
    fn limit_respected() {
        let conn = setup_conn();
        for i in 0..5 {
            let _ = AuditRepo::append(
                &conn,
                &AppendAuditParams {
                    user_id: None,
                    chat_id: i,
                    command: "status",
                    run_id: None,
                    decision: AuditDecision::Allow,
                    reason: None,
                },
            )
            .unwrap();
        }
        assert_eq!(AuditRepo::list_recent(&conn, 3).unwrap().len(), 3);
    }
}

//! Inbound-update dedupe log. First writer wins by primary key.

use rusqlite::{params, Connection};

use crate::errors::Result;

/// Repository for the `inbox_updates` table.
pub struct InboxRepo;

impl InboxRepo {
    /// Record an inbound update. Returns `true` if this call inserted the
    /// row, `false` if the update id was already present (duplicate).
    pub fn insert(
        conn: &Connection,
        update_id: i64,
        chat_id: Option<i64>,
        payload_json: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO inbox_updates (update_id, chat_id, payload_json, received_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![update_id, chat_id, payload_json, now_ms],
        )?;
        Ok(changed > 0)
    }

    /// Delete dedupe rows older than the cutoff. Returns rows removed.
    pub fn prune(conn: &Connection, received_before_ms: i64) -> Result<usize> {
        let removed = conn.execute(
            "DELETE FROM inbox_updates WHERE received_at < ?1",
            params![received_before_ms],
        )?;
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::setup_conn;

    #[test]
    fn first_writer_wins() {
        let conn = setup_conn();
        assert!(InboxRepo::insert(&conn, 42, Some(100), "{}", 0).unwrap());
        assert!(!InboxRepo::insert(&conn, 42, Some(100), "{}", 1).unwrap());
        assert!(InboxRepo::insert(&conn, 43, Some(100), "{}", 2).unwrap());
    }

    #[test]
    fn prune_removes_old_rows() {
        let conn = setup_conn();
        let _ = InboxRepo::insert(&conn, 1, None, "{}", 100).unwrap();
        let _ = InboxRepo::insert(&conn, 2, None, "{}", 200).unwrap();
        assert_eq!(InboxRepo::prune(&conn, 150).unwrap(), 1);
        // Pruned ids can be reused — acceptable: providers do not reissue
        // update ids within the retention window.
        assert!(InboxRepo::insert(&conn, 1, None, "{}", 300).unwrap());
    }
}

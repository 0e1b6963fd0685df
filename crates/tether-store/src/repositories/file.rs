//! File provenance table access.

use rusqlite::{params, Connection, Row};

use crate::errors::Result;
use crate::types::{FileDirection, FileRecord};
use crate::util::{generate_id, now_ms};

/// Parameters for recording a file transfer.
pub struct InsertFileParams<'a> {
    pub chat_id: Option<&'a str>,
    pub direction: FileDirection,
    pub original_name: &'a str,
    pub stored_rel_path: &'a str,
    pub size_bytes: i64,
    pub sha256: &'a str,
}

/// Repository for the `files` table.
pub struct FileRepo;

impl FileRepo {
    /// Record one transfer.
    pub fn insert(conn: &Connection, params: &InsertFileParams<'_>) -> Result<FileRecord> {
        let id = generate_id("file");
        let now = now_ms();
        let _ = conn.execute(
            "INSERT INTO files \
             (id, chat_id, direction, original_name, stored_rel_path, size_bytes, sha256, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                id,
                params.chat_id,
                params.direction.as_sql(),
                params.original_name,
                params.stored_rel_path,
                params.size_bytes,
                params.sha256,
                now,
            ],
        )?;
        Ok(FileRecord {
            id,
            chat_id: params.chat_id.map(String::from),
            direction: params.direction,
            original_name: params.original_name.to_string(),
            stored_rel_path: params.stored_rel_path.to_string(),
            size_bytes: params.size_bytes,
            sha256: params.sha256.to_string(),
            created_at: now,
        })
    }

    /// Recent transfers, optionally filtered by direction, newest first.
    pub fn list(
        conn: &Connection,
        direction: Option<FileDirection>,
        limit: u32,
    ) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        match direction {
            Some(dir) => {
                let mut stmt = conn.prepare(
                    "SELECT id, chat_id, direction, original_name, stored_rel_path, size_bytes, \
                            sha256, created_at \
                     FROM files WHERE direction = ?1 ORDER BY created_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![dir.as_sql(), limit], file_from_row)?;
                for row in rows {
                    records.push(row??);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, chat_id, direction, original_name, stored_rel_path, size_bytes, \
                            sha256, created_at \
                     FROM files ORDER BY created_at DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], file_from_row)?;
                for row in rows {
                    records.push(row??);
                }
            }
        }
        Ok(records)
    }
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<Result<FileRecord>> {
    let direction: String = row.get(2)?;
    Ok(FileDirection::parse(&direction).map(|direction| FileRecord {
        id: row.get_unwrap(0),
        chat_id: row.get_unwrap(1),
        direction,
        original_name: row.get_unwrap(3),
        stored_rel_path: row.get_unwrap(4),
        size_bytes: row.get_unwrap(5),
        sha256: row.get_unwrap(6),
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

    fn upload(conn: &Connection, name: &str) -> FileRecord {
        FileRepo::insert(
            conn,
            &InsertFileParams {
                chat_id: Some("chat-1"),
                direction: FileDirection::Upload,
                original_name: name,
                stored_rel_path: &format!("files/chat-1/{name}"),
                size_bytes: 128,
                sha256: "deadbeef",
            },
        )
        .unwrap()
    }

    #[test]
    fn insert_returns_record() {
        let conn = setup_conn();
        let record = upload(&conn, "notes.txt");
        assert!(record.id.starts_with("file-"));
        assert_eq!(record.direction, FileDirection::Upload);
    }

    #[test]
    fn list_filters_by_direction() {
        let conn = setup_conn();
        let _ = upload(&conn, "a.txt");
        let _ = FileRepo::insert(
            &conn,
            &InsertFileParams {
                chat_id: None,
                direction: FileDirection::Download,
                original_name: "out.bin",
                stored_rel_path: "files/out.bin",
                size_bytes: 64,
                sha256: "cafe",
            },
        )
        .unwrap();

        assert_eq!(FileRepo::list(&conn, None, 10).unwrap().len(), 2);
        assert_eq!(
            FileRepo::list(&conn, Some(FileDirection::Upload), 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            FileRepo::list(&conn, Some(FileDirection::Download), 10)
                .unwrap()
                .len(),
            1
        );
    }
}

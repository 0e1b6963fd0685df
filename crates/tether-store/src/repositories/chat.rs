//! Chat table access — one row per external chat id.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::Result;
use crate::types::Chat;
use crate::util::generate_id;

/// Repository for the `chats` table.
pub struct ChatRepo;

impl ChatRepo {
    /// Get a chat by internal id.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<Chat>> {
        let chat = conn
            .query_row(
                "SELECT id, project_id, external_chat_id, unsafe_until \
                 FROM chats WHERE id = ?1",
                params![id],
                chat_from_row,
            )
            .optional()?;
        Ok(chat)
    }

    /// Get the row for an external chat id.
    pub fn get_by_external(conn: &Connection, external_chat_id: i64) -> Result<Option<Chat>> {
        let chat = conn
            .query_row(
                "SELECT id, project_id, external_chat_id, unsafe_until \
                 FROM chats WHERE external_chat_id = ?1",
                params![external_chat_id],
                chat_from_row,
            )
            .optional()?;
        Ok(chat)
    }

    /// Get or create the row for an external chat id.
    pub fn get_or_create(
        conn: &Connection,
        external_chat_id: i64,
        project_id: Option<&str>,
    ) -> Result<Chat> {
        if let Some(existing) = Self::get_by_external(conn, external_chat_id)? {
            return Ok(existing);
        }
        let id = generate_id("chat");
        let _ = conn.execute(
            "INSERT INTO chats (id, project_id, external_chat_id) VALUES (?1, ?2, ?3)",
            params![id, project_id, external_chat_id],
        )?;
        Ok(Chat {
            id,
            project_id: project_id.map(String::from),
            external_chat_id,
            unsafe_until: None,
        })
    }

    /// Set (or clear) the unsafe-mode deadline.
    pub fn set_unsafe_until(
        conn: &Connection,
        external_chat_id: i64,
        unsafe_until: Option<i64>,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE chats SET unsafe_until = ?1 WHERE external_chat_id = ?2",
            params![unsafe_until, external_chat_id],
        )?;
        Ok(changed > 0)
    }

    /// Change the selected project.
    pub fn set_project(
        conn: &Connection,
        external_chat_id: i64,
        project_id: Option<&str>,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE chats SET project_id = ?1 WHERE external_chat_id = ?2",
            params![project_id, external_chat_id],
        )?;
        Ok(changed > 0)
    }
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        project_id: row.get(1)?,
        external_chat_id: row.get(2)?,
        unsafe_until: row.get(3)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Session table access.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::Result;
use crate::types::{Provider, Session, SessionStatus};
use crate::util::{generate_id, now_ms};

/// Parameters for creating a session.
pub struct CreateSessionParams<'a> {
    pub project_id: &'a str,
    pub chat_id: Option<&'a str>,
    pub provider: Provider,
    pub prompt: &'a str,
    pub model: Option<&'a str>,
    pub agent: Option<&'a str>,
}

/// Repository for the `sessions` table.
pub struct SessionRepo;

impl SessionRepo {
    /// Create a new session.
    pub fn create(conn: &Connection, params: &CreateSessionParams<'_>) -> Result<Session> {
        let id = generate_id("sess");
        let now = now_ms();
        let _ = conn.execute(
            "INSERT INTO sessions \
             (id, project_id, chat_id, provider, status, prompt, model, agent, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            rusqlite::params![
                id,
                params.project_id,
                params.chat_id,
                params.provider.as_sql(),
                SessionStatus::Active.as_sql(),
                params.prompt,
                params.model,
                params.agent,
                now,
            ],
        )?;
        Ok(Session {
            id,
            project_id: params.project_id.to_string(),
            chat_id: params.chat_id.map(String::from),
            provider: params.provider,
            engine_session_id: None,
            status: SessionStatus::Active,
            prompt: params.prompt.to_string(),
            model: params.model.map(String::from),
            agent: params.agent.map(String::from),
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a session by id.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<Session>> {
        conn.query_row(
            "SELECT id, project_id, chat_id, provider, engine_session_id, status, prompt, \
                    model, agent, created_at, updated_at \
             FROM sessions WHERE id = ?1",
            params![id],
            session_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// Sessions of a project, oldest first.
    pub fn list_by_project(conn: &Connection, project_id: &str) -> Result<Vec<Session>> {
        let mut stmt = conn.prepare(
            "SELECT id, project_id, chat_id, provider, engine_session_id, status, prompt, \
                    model, agent, created_at, updated_at \
             FROM sessions WHERE project_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![project_id], session_from_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row??);
        }
        Ok(sessions)
    }

    /// Update the captured engine session id (or the continue marker).
    pub fn update_engine_session_id(
        conn: &Connection,
        id: &str,
        engine_session_id: Option<&str>,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET engine_session_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![engine_session_id, now_ms(), id],
        )?;
        Ok(changed > 0)
    }

    /// Update the lifecycle status.
    pub fn update_status(conn: &Connection, id: &str, status: SessionStatus) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_sql(), now_ms(), id],
        )?;
        Ok(changed > 0)
    }

    /// Update the model override.
    pub fn update_model(conn: &Connection, id: &str, model: Option<&str>) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET model = ?1, updated_at = ?2 WHERE id = ?3",
            params![model, now_ms(), id],
        )?;
        Ok(changed > 0)
    }

    /// Update the agent override.
    pub fn update_agent(conn: &Connection, id: &str, agent: Option<&str>) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET agent = ?1, updated_at = ?2 WHERE id = ?3",
            params![agent, now_ms(), id],
        )?;
        Ok(changed > 0)
    }
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Session>> {
    let provider: String = row.get(3)?;
    let status: String = row.get(5)?;
    Ok(Provider::parse(&provider).and_then(|provider| {
        SessionStatus::parse(&status).map(|status| Session {
            id: row.get_unwrap(0),
            project_id: row.get_unwrap(1),
            chat_id: row.get_unwrap(2),
            provider,
            engine_session_id: row.get_unwrap(4),
            status,
            prompt: row.get_unwrap(6),
            model: row.get_unwrap(7),
            agent: row.get_unwrap(8),
            created_at: row.get_unwrap(9),
            updated_at: row.get_unwrap(10),
        })
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

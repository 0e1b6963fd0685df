//! Row types and column enums for the store.
//!
//! Enum columns are stored as lowercase strings; each enum has `as_sql` for
//! writes and `parse` for reads. A value that fails to parse surfaces as
//! [`StoreError::CorruptRow`] rather than silently defaulting.
//!
//! [`StoreError::CorruptRow`]: crate::errors::StoreError::CorruptRow

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StoreError};

/// Agent engine backing a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Opencode,
}

impl Provider {
    /// SQL column representation.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Opencode => "opencode",
        }
    }

    /// Parse a SQL column value.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "claude" => Ok(Self::Claude),
            "opencode" => Ok(Self::Opencode),
            other => Err(StoreError::CorruptRow(format!("unknown provider: {other}"))),
        }
    }
}

/// Session lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            other => Err(StoreError::CorruptRow(format!(
                "unknown session status: {other}"
            ))),
        }
    }
}

/// Run lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Leased,
    InFlight,
    Completed,
    Failed,
    Cancelled,
    Abandoned,
}

impl RunState {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "queued" => Ok(Self::Queued),
            "leased" => Ok(Self::Leased),
            "in_flight" => Ok(Self::InFlight),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(StoreError::CorruptRow(format!("unknown run state: {other}"))),
        }
    }

    /// Whether the run still occupies its session's single-flight slot.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Leased | Self::InFlight)
    }

    /// Whether the run has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// Job queue status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Leased,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "queued" => Ok(Self::Queued),
            "leased" => Ok(Self::Leased),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::CorruptRow(format!("unknown job state: {other}"))),
        }
    }
}

/// File transfer direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileDirection {
    Upload,
    Download,
}

impl FileDirection {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            other => Err(StoreError::CorruptRow(format!(
                "unknown file direction: {other}"
            ))),
        }
    }
}

/// Audit outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDecision {
    Allow,
    Deny,
}

impl AuditDecision {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(StoreError::CorruptRow(format!(
                "unknown audit decision: {other}"
            ))),
        }
    }
}

/// A configured project directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub root_path: String,
    pub default_engine: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opencode_attach_url: Option<String>,
}

/// One row per external chat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub project_id: Option<String>,
    pub external_chat_id: i64,
    pub unsafe_until: Option<i64>,
}

/// A persistent conversation thread with an engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub chat_id: Option<String>,
    pub provider: Provider,
    /// Absent for a new session, the literal `__continue__` marker, or an
    /// engine-assigned id captured from the event stream.
    pub engine_session_id: Option<String>,
    pub status: SessionStatus,
    pub prompt: String,
    /// Model override passed to the engine, when the owner picked one.
    pub model: Option<String>,
    /// OpenCode agent name, when the owner picked one.
    pub agent: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The literal marker stored in `engine_session_id` to request engine-side
/// conversation continuation without a captured id.
pub const CONTINUE_MARKER: &str = "__continue__";

/// One prompt execution against a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub project_id: String,
    pub session_id: String,
    pub idempotency_key: String,
    pub prompt: String,
    pub status: RunState,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub summary_json: Option<String>,
    pub created_at: i64,
}

/// Queue record attached 1:1 to a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub run_id: String,
    pub status: JobState,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub available_at: i64,
    pub attempts: i64,
    pub last_error: Option<String>,
}

/// A persisted normalized event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEventRow {
    pub id: i64,
    pub run_id: String,
    pub seq: i64,
    pub event_type: String,
    pub payload_json: String,
    pub created_at: i64,
}

/// Upload/download provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub chat_id: Option<String>,
    pub direction: FileDirection,
    pub original_name: String,
    pub stored_rel_path: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub created_at: i64,
}

/// One audit trail entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub chat_id: i64,
    pub command: String,
    pub run_id: Option<String>,
    pub decision: AuditDecision,
    pub reason: Option<String>,
    pub created_at: i64,
}

/// Derived summary stored on a finalized run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub duration_ms: i64,
    pub tool_calls_count: i64,
    pub bytes_in: i64,
    pub bytes_out: i64,
    pub exit_status: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

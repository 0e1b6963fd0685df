//! Small shared helpers for the repository layer.

use uuid::Uuid;

/// Generate a prefixed UUID v7 id (time-ordered).
pub(crate) fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::now_v7())
}

/// Current UTC time in milliseconds since epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

//! Error types for the runtime.

use thiserror::Error;

/// Errors from the orchestrator and worker pool.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The session already has an active run (single-flight).
    #[error("session already active: {0}")]
    SessionAlreadyActive(String),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] tether_store::StoreError),

    /// Engine/executor failure.
    #[error("engine error: {0}")]
    Engine(#[from] tether_engines::EngineError),

    /// A referenced entity is missing.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (run, session, project).
        kind: &'static str,
        /// Entity id.
        id: String,
    },
}

/// Convenience alias for runtime results.
pub type Result<T> = std::result::Result<T, RuntimeError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_already_active_display() {
        let err = RuntimeError::SessionAlreadyActive("sess-1".into());
        assert_eq!(err.to_string(), "session already active: sess-1");
    }

    #[test]
    fn not_found_display() {
        let err = RuntimeError::NotFound {
            kind: "session",
            id: "sess-9".into(),
        };
        assert_eq!(err.to_string(), "session not found: sess-9");
    }
}

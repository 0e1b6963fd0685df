//! Error types for the engine layer.

use thiserror::Error;

/// Errors from parsers, the process runner, and executors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A second start was attempted for a session that already has a live
    /// process.
    #[error("session already has a live process: {0}")]
    SingleFlightSession(String),

    /// The child process failed to spawn.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// The command that failed.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O failure on a child stream.
    #[error("process i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The store rejected a write during the run.
    #[error("store error during run: {0}")]
    Store(#[from] tether_store::StoreError),

    /// The event sink rejected an event.
    #[error("event sink error: {0}")]
    Sink(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_flight_display() {
        let err = EngineError::SingleFlightSession("sess-1".into());
        assert_eq!(
            err.to_string(),
            "session already has a live process: sess-1"
        );
    }

    #[test]
    fn spawn_display_names_command() {
        let err = EngineError::Spawn {
            command: "claude".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().contains("claude"));
    }
}

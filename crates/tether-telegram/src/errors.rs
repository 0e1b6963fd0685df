//! Error types for the chat surface.

use thiserror::Error;

/// Errors from the transport, handler, and streamer.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Transport-level failure (HTTP, API rejection).
    #[error("transport error: {0}")]
    Transport(String),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] tether_store::StoreError),

    /// Orchestrator failure.
    #[error("runtime error: {0}")]
    Runtime(#[from] tether_runtime::RuntimeError),

    /// A path escaped the sandbox or does not exist.
    #[error("path rejected: {0}")]
    Sandbox(String),

    /// Filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Convenience alias for chat results.
pub type Result<T> = std::result::Result<T, ChatError>;

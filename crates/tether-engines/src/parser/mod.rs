//! Streaming engine parsers.
//!
//! Each engine emits line-delimited JSON on stdout. A parser consumes raw
//! byte chunks, frames them into lines, and maps each recognized line to
//! normalized [`EngineEvent`]s. Shared invariants:
//!
//! - Exactly one `run_finished` per parser lifetime. Later terminal inputs
//!   are dropped; if none arrived by [`EngineParser::finish`], one is
//!   synthesized with the supplied status.
//! - Malformed JSON lines increment a counter and never abort parsing.
//!   Blank lines and unrecognized-but-valid structures are dropped silently.
//! - The latest engine session id seen in any line is captured.

pub mod claude;
pub mod opencode;

use serde_json::Value;

use tether_core::{EngineEvent, RunStatus};

/// A streaming parser for one engine's stdout.
pub trait EngineParser: Send {
    /// Feed a raw stdout chunk; returns the events it completed.
    fn push(&mut self, chunk: &[u8]) -> Vec<EngineEvent>;

    /// Flush the tail and guarantee a terminal event.
    ///
    /// If the stream already produced `run_finished`, returns only whatever
    /// the tail yielded; otherwise appends `run_finished` with `status`.
    fn finish(&mut self, status: RunStatus) -> Vec<EngineEvent>;

    /// The most recent engine-assigned session id observed, if any.
    fn engine_session_id(&self) -> Option<String>;

    /// JSON-level parse failures seen so far.
    fn malformed_lines(&self) -> u64;
}

/// Extract an engine session id from a parsed line.
///
/// Engines disagree on the field name; all three observed spellings are
/// accepted, checked at the top level and one level under `part`/`info`.
pub(crate) fn extract_session_id(value: &Value) -> Option<String> {
    const KEYS: [&str; 3] = ["session_id", "sessionID", "sessionId"];
    for key in KEYS {
        if let Some(id) = value.get(key).and_then(Value::as_str) {
            return Some(id.to_string());
        }
    }
    for nested in ["part", "info"] {
        if let Some(inner) = value.get(nested) {
            for key in KEYS {
                if let Some(id) = inner.get(key).and_then(Value::as_str) {
                    return Some(id.to_string());
                }
            }
        }
    }
    None
}

/// Once-only latch for the terminal event shared by both parsers.
#[derive(Debug, Default)]
pub(crate) struct FinishLatch {
    finished: bool,
}

impl FinishLatch {
    /// Try to emit a terminal event; `None` if one was already emitted.
    pub fn arm(&mut self, status: RunStatus) -> Option<EngineEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(EngineEvent::RunFinished { status })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

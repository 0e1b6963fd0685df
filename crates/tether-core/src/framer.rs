//! Streaming line framer.
//!
//! Child-process stdout arrives in arbitrary byte chunks. [`LineFramer`]
//! buffers those chunks and yields complete `\n`-terminated lines, stripping
//! a trailing `\r` from each. Splitting happens at the byte level before any
//! UTF-8 conversion, so multi-byte characters split across chunks reassemble
//! correctly. Lines that still fail UTF-8 validation are skipped.

use bytes::BytesMut;
use tracing::warn;

/// Buffers byte chunks and emits complete lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
}

impl LineFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Append a chunk and return every complete line it unlocked.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line_bytes = self.buffer.split_to(newline_pos + 1);
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }
            match std::str::from_utf8(&line_bytes) {
                Ok(s) => lines.push(s.to_string()),
                Err(e) => warn!(error = %e, "skipping non-UTF-8 line"),
            }
        }
        lines
    }

    /// Emit the unterminated tail as a final line, if any, and clear.
    pub fn flush(&mut self) -> Vec<String> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let mut tail = std::mem::take(&mut self.buffer);
        if tail.last() == Some(&b'\r') {
            tail.truncate(tail.len() - 1);
        }
        match std::str::from_utf8(&tail) {
            Ok(s) => vec![s.to_string()],
            Err(e) => {
                warn!(error = %e, "skipping non-UTF-8 tail");
                Vec::new()
            }
        }
    }

    /// Bytes currently buffered (the unterminated tail).
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

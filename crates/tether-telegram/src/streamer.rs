//! Run streamer.
//!
//! Coalesces the high-rate normalized event stream into throttled edits of
//! a single progress message per run, with a Stop button. Transport edit
//! failures fall back to fresh sends and never propagate to the run path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use tether_core::friendly::friendly_message;
use tether_core::text::{format_elapsed, sanitize, tail};
use tether_core::{EngineEvent, RunStatus};
use tether_runtime::RunObserver;
use tether_store::{RunSummary, Store};

use crate::transport::{KeyboardButton, MessageTransport};

/// Telegram's message length cap.
pub const MESSAGE_CHAR_LIMIT: usize = 4096;

/// Default minimum interval between progress edits.
pub const DEFAULT_EDIT_INTERVAL_MS: u64 = 2000;

/// Characters of buffered text shown in the progress preview.
const PREVIEW_CHARS: usize = 300;

/// Tool names shown in the progress line.
const TOOLS_SHOWN: usize = 3;

struct StreamState {
    chat_external_id: i64,
    progress_message_id: Option<i64>,
    started_at: Instant,
    last_edit_at: Option<Instant>,
    text_buffer: String,
    tool_names: Vec<String>,
}

/// Streams run progress into the chat.
pub struct RunStreamer {
    transport: Arc<dyn MessageTransport>,
    store: Arc<Store>,
    edit_interval_ms: u64,
    states: Mutex<HashMap<String, StreamState>>,
}

impl RunStreamer {
    #[must_use]
    pub fn new(transport: Arc<dyn MessageTransport>, store: Arc<Store>) -> Self {
        Self::with_interval(transport, store, DEFAULT_EDIT_INTERVAL_MS)
    }

    #[must_use]
    pub fn with_interval(
        transport: Arc<dyn MessageTransport>,
        store: Arc<Store>,
        edit_interval_ms: u64,
    ) -> Self {
        Self {
            transport,
            store,
            edit_interval_ms,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// External chat id for a session's internal chat id, if it streams
    /// anywhere.
    fn resolve_chat(&self, chat_id: Option<&str>) -> Option<i64> {
        let chat_id = chat_id?;
        match self.store.get_chat_by_id(chat_id) {
            Ok(Some(chat)) => Some(chat.external_chat_id),
            Ok(None) => None,
            Err(e) => {
                warn!(chat_id, error = %e, "chat lookup failed");
                None
            }
        }
    }

    /// Take a snapshot for the next progress edit, or `None` while
    /// throttled.
    fn progress_snapshot(&self, run_id: &str) -> Option<(i64, Option<i64>, String)> {
        let mut states = self.states.lock();
        let state = states.get_mut(run_id)?;

        let due = state
            .last_edit_at
            .is_none_or(|at| at.elapsed().as_millis() as u64 >= self.edit_interval_ms);
        if !due {
            return None;
        }
        state.last_edit_at = Some(Instant::now());

        let mut text = format!(
            "Working... ({})",
            format_elapsed(state.started_at.elapsed().as_millis() as u64)
        );
        if !state.tool_names.is_empty() {
            let start = state.tool_names.len().saturating_sub(TOOLS_SHOWN);
            text.push_str("\nTools: ");
            text.push_str(&state.tool_names[start..].join(", "));
        }
        let preview = tail(state.text_buffer.trim(), PREVIEW_CHARS);
        if !preview.is_empty() {
            text.push('\n');
            text.push_str(preview);
        }

        Some((state.chat_external_id, state.progress_message_id, text))
    }

    async fn push_progress(&self, run_id: &str) {
        let Some((chat_id, message_id, text)) = self.progress_snapshot(run_id) else {
            return;
        };
        let keyboard = vec![vec![KeyboardButton::new(
            "Stop",
            format!("stop_run:{run_id}"),
        )]];

        match message_id {
            None => match self.transport.send_message(chat_id, &text, Some(&keyboard)).await {
                Ok(new_id) => {
                    if let Some(state) = self.states.lock().get_mut(run_id) {
                        state.progress_message_id = Some(new_id);
                    }
                }
                Err(e) => warn!(run_id, error = %e, "progress send failed"),
            },
            Some(message_id) => {
                if let Err(e) = self
                    .transport
                    .edit_message(chat_id, message_id, &text, Some(&keyboard))
                    .await
                {
                    // Edit can fail on not-modified or transport hiccups;
                    // fall back to a fresh message and track that instead.
                    debug!(run_id, error = %e, "progress edit failed, sending fresh");
                    match self.transport.send_message(chat_id, &text, Some(&keyboard)).await {
                        Ok(new_id) => {
                            if let Some(state) = self.states.lock().get_mut(run_id) {
                                state.progress_message_id = Some(new_id);
                            }
                        }
                        Err(e) => warn!(run_id, error = %e, "progress fallback send failed"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RunObserver for RunStreamer {
    async fn on_event(&self, run_id: &str, chat_id: Option<&str>, event: &EngineEvent) {
        let Some(chat_external_id) = self.resolve_chat(chat_id) else {
            return;
        };

        {
            let mut states = self.states.lock();
            let state = states.entry(run_id.to_string()).or_insert_with(|| StreamState {
                chat_external_id,
                progress_message_id: None,
                started_at: Instant::now(),
                last_edit_at: None,
                text_buffer: String::new(),
                tool_names: Vec::new(),
            });

            match event {
                EngineEvent::TextDelta { text, .. } => state.text_buffer.push_str(text),
                EngineEvent::ToolStart { tool_name, .. } => {
                    state.tool_names.push(tool_name.clone());
                }
                EngineEvent::Error { .. } => {}
                _ => return,
            }
        }

        if let EngineEvent::Error { message, code } = event {
            let mut text = match friendly_message(message) {
                Some(friendly) => format!("{friendly}\n\n{message}"),
                None => format!("Engine error: {message}"),
            };
            if let Some(code) = code {
                text.push_str(&format!(" ({code})"));
            }
            if let Err(e) = self
                .transport
                .send_message(chat_external_id, &text, None)
                .await
            {
                warn!(run_id, error = %e, "error notification failed");
            }
            return;
        }

        self.push_progress(run_id).await;
    }

    async fn on_run_finished(
        &self,
        run_id: &str,
        chat_id: Option<&str>,
        status: RunStatus,
        summary: &RunSummary,
    ) {
        let state = self.states.lock().remove(run_id);
        let (chat_external_id, progress_message_id, buffer) = match state {
            Some(state) => (
                state.chat_external_id,
                state.progress_message_id,
                state.text_buffer,
            ),
            None => {
                let Some(id) = self.resolve_chat(chat_id) else {
                    return;
                };
                (id, None, String::new())
            }
        };

        let icon = match status {
            RunStatus::Success => "✅",
            RunStatus::Error => "❌",
            RunStatus::Cancelled => "🛑",
            RunStatus::Unknown => "❔",
        };
        let footer = format!(
            "[{icon} in {}]",
            format_elapsed(summary.duration_ms.max(0) as u64)
        );

        let body = sanitize(&buffer);
        let full = if body.is_empty() {
            footer
        } else {
            format!("{body}\n\n{footer}")
        };
        let chunks = split_message(&full, MESSAGE_CHAR_LIMIT);
        let Some((first, rest)) = chunks.split_first() else {
            return;
        };

        // Final text replaces the progress message (keyboard stripped);
        // overflow goes out as fresh messages.
        let edited = match progress_message_id {
            Some(message_id) => self
                .transport
                .edit_message(chat_external_id, message_id, first, Some(&[]))
                .await
                .is_ok(),
            None => false,
        };
        if !edited {
            if let Err(e) = self.transport.send_message(chat_external_id, first, None).await {
                warn!(run_id, error = %e, "final send failed");
            }
        }
        for chunk in rest {
            if let Err(e) = self.transport.send_message(chat_external_id, chunk, None).await {
                warn!(run_id, error = %e, "final chunk send failed");
            }
        }
    }
}

/// Split text into chunks of at most `limit` characters, preferring to cut
/// at the last newline inside the window.
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let char_count = rest.chars().count();
        if char_count <= limit {
            chunks.push(rest.to_string());
            break;
        }

        let window_end = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(idx, _)| idx);
        let window = &rest[..window_end];
        let cut = window.rfind('\n').map_or(window_end, |pos| pos.max(1));
        let (head, tail_rest) = rest.split_at(cut);
        chunks.push(head.to_string());
        rest = tail_rest.trim_start_matches('\n');
    }
    chunks
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

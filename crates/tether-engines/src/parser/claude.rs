//! Parser for the claude CLI's `stream-json` output.
//!
//! One JSON object per line. The shapes that matter:
//!
//! - `stream_event` wrapping raw API streaming events (`content_block_delta`
//!   with a `text_delta`, `content_block_start` opening a `tool_use` block).
//! - `assistant` messages whose content blocks include executed `tool_use`
//!   blocks (the block's `input` carries the arguments that already ran).
//! - `system` init lines carrying model metadata.
//! - `result` lines closing the run, with `subtype` as the status and
//!   `is_error` flagging failures.
//! - bare `error` lines.

use serde_json::Value;
use tracing::debug;

use tether_core::{EngineEvent, LineFramer, RunStatus};

use super::{extract_session_id, EngineParser, FinishLatch};

/// Streaming parser for `claude --output-format stream-json`.
#[derive(Debug, Default)]
pub struct ClaudeParser {
    framer: LineFramer,
    latch: FinishLatch,
    session_id: Option<String>,
    malformed: u64,
}

impl ClaudeParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_line(&mut self, line: &str) -> Vec<EngineEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                self.malformed += 1;
                debug!(error = %e, "malformed claude line");
                return Vec::new();
            }
        };

        if let Some(id) = extract_session_id(&value) {
            self.session_id = Some(id);
        }

        match value.get("type").and_then(Value::as_str) {
            Some("stream_event") => self.map_stream_event(&value),
            Some("assistant") => map_assistant(&value),
            Some("system") => map_system(&value),
            Some("result") => self.map_result(&value),
            Some("error") => vec![EngineEvent::Error {
                message: best_error_message(&value),
                code: value
                    .get("code")
                    .and_then(Value::as_str)
                    .map(String::from),
            }],
            _ => Vec::new(),
        }
    }

    fn map_stream_event(&mut self, value: &Value) -> Vec<EngineEvent> {
        let event = &value["event"];
        match event.get("type").and_then(Value::as_str) {
            Some("content_block_delta") => {
                let delta = &event["delta"];
                if delta.get("type").and_then(Value::as_str) == Some("text_delta") {
                    if let Some(text) = delta.get("text").and_then(Value::as_str) {
                        return vec![EngineEvent::TextDelta {
                            text: text.to_string(),
                            channel: None,
                        }];
                    }
                }
                Vec::new()
            }
            Some("content_block_start") => {
                let block = &event["content_block"];
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    if let Some(name) = block.get("name").and_then(Value::as_str) {
                        return vec![EngineEvent::ToolStart {
                            tool_name: name.to_string(),
                            call_id: block.get("id").and_then(Value::as_str).map(String::from),
                            input: None,
                        }];
                    }
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn map_result(&mut self, value: &Value) -> Vec<EngineEvent> {
        let is_error = value.get("is_error").and_then(Value::as_bool).unwrap_or(false);
        let subtype = value.get("subtype").and_then(Value::as_str);

        let status = if is_error {
            RunStatus::Error
        } else {
            match subtype {
                Some("success") => RunStatus::Success,
                Some(s) if s.starts_with("error") => RunStatus::Error,
                Some(_) | None => RunStatus::Unknown,
            }
        };

        let mut events = Vec::new();
        if status == RunStatus::Error {
            events.push(EngineEvent::Error {
                message: best_error_message(value),
                code: subtype.map(String::from),
            });
        }
        events.extend(self.latch.arm(status));
        events
    }
}

impl EngineParser for ClaudeParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<EngineEvent> {
        let lines = self.framer.push(chunk);
        let mut events = Vec::new();
        for line in lines {
            events.extend(self.parse_line(&line));
        }
        events
    }

    fn finish(&mut self, status: RunStatus) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for line in self.framer.flush() {
            events.extend(self.parse_line(&line));
        }
        events.extend(self.latch.arm(status));
        events
    }

    fn engine_session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    fn malformed_lines(&self) -> u64 {
        self.malformed
    }
}

/// Executed tool calls surface on assistant messages as `tool_use` blocks.
fn map_assistant(value: &Value) -> Vec<EngineEvent> {
    let Some(blocks) = value["message"]["content"].as_array() else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|block| {
            let name = block.get("name").and_then(Value::as_str)?;
            Some(EngineEvent::ToolEnd {
                tool_name: name.to_string(),
                call_id: block.get("id").and_then(Value::as_str).map(String::from),
                output: block.get("input").cloned(),
            })
        })
        .collect()
}

fn map_system(value: &Value) -> Vec<EngineEvent> {
    if value.get("subtype").and_then(Value::as_str) != Some("init") {
        return Vec::new();
    }
    vec![EngineEvent::EngineMeta {
        engine: Some("claude".to_string()),
        model: value.get("model").and_then(Value::as_str).map(String::from),
        metadata: value.get("tools").cloned().map(|tools| {
            serde_json::json!({ "tools": tools })
        }),
    }]
}

/// Best-available message for an error line or failed result.
fn best_error_message(value: &Value) -> String {
    for key in ["result", "error", "message", "body"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    tether_core::text::truncate_str(&value.to_string(), 300)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

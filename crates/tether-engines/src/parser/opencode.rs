//! Parser for the opencode CLI's `--format json` output.
//!
//! One JSON object per line, but the event vocabulary has drifted across
//! releases, so the mapping is deliberately permissive: type names are
//! lowercased and underscore-normalized, text can live under several keys,
//! and `tool_use` state decides start vs end.

use serde_json::Value;
use tracing::debug;

use tether_core::{EngineEvent, LineFramer, RunStatus};

use super::{extract_session_id, EngineParser, FinishLatch};

/// Streaming parser for `opencode run --format json`.
#[derive(Debug, Default)]
pub struct OpencodeParser {
    framer: LineFramer,
    latch: FinishLatch,
    session_id: Option<String>,
    malformed: u64,
}

impl OpencodeParser {
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
                debug!(error = %e, "malformed opencode line");
                return Vec::new();
            }
        };

        if let Some(id) = extract_session_id(&value) {
            self.session_id = Some(id);
        }

        let Some(raw_type) = value.get("type").and_then(Value::as_str) else {
            return Vec::new();
        };
        let kind = normalize_type(raw_type);

        match kind.as_str() {
            "started" | "run_started" | "run_start" => vec![EngineEvent::RunStarted {
                run_id: value.get("runId").and_then(Value::as_str).map(String::from),
                timestamp: value
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .map(String::from),
            }],
            "text" | "text_delta" | "message_delta" | "output_text_delta" => {
                extract_text(&value).map_or_else(Vec::new, |text| {
                    vec![EngineEvent::TextDelta {
                        text,
                        channel: None,
                    }]
                })
            }
            "tool_use" => map_tool_use(&value),
            "step_start" | "step_finish" => Vec::new(),
            "finished" | "completed" | "run_finished" | "run_end" => {
                let status = terminal_status(&value);
                self.latch.arm(status).into_iter().collect()
            }
            "error" => vec![EngineEvent::Error {
                message: extract_text(&value)
                    .unwrap_or_else(|| tether_core::text::truncate_str(&value.to_string(), 300)),
                code: value.get("code").and_then(Value::as_str).map(String::from),
            }],
            "file_uploaded" | "upload_completed" => vec![file_event(&value, true)],
            "file_downloaded" | "download_completed" => vec![file_event(&value, false)],
            other if other.starts_with("tool_start") || other.starts_with("tool_started") => {
                tool_identity(&value).map_or_else(Vec::new, |(tool_name, call_id)| {
                    vec![EngineEvent::ToolStart {
                        tool_name,
                        call_id,
                        input: tool_field(&value, "input"),
                    }]
                })
            }
            other if other.starts_with("tool_end") || other.starts_with("tool_call_") => {
                tool_identity(&value).map_or_else(Vec::new, |(tool_name, call_id)| {
                    vec![EngineEvent::ToolEnd {
                        tool_name,
                        call_id,
                        output: tool_field(&value, "output"),
                    }]
                })
            }
            _ => Vec::new(),
        }
    }
}

impl EngineParser for OpencodeParser {
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

/// Lowercase and fold separators to underscores.
fn normalize_type(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '.' { '_' } else { c })
        .collect()
}

/// Text lives wherever this release put it.
fn extract_text(value: &Value) -> Option<String> {
    if let Some(text) = value["part"]["text"].as_str() {
        return Some(text.to_string());
    }
    for key in ["text", "delta", "content", "message"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }
    None
}

/// Tool name and call id from the part or the top level.
fn tool_identity(value: &Value) -> Option<(String, Option<String>)> {
    let part = &value["part"];
    let name = part["tool"]
        .as_str()
        .or_else(|| part["name"].as_str())
        .or_else(|| value["tool"].as_str())
        .or_else(|| value["name"].as_str())?;
    let call_id = part["callID"]
        .as_str()
        .or_else(|| part["id"].as_str())
        .or_else(|| value["callId"].as_str())
        .or_else(|| value["id"].as_str())
        .map(String::from);
    Some((name.to_string(), call_id))
}

fn tool_field(value: &Value, key: &str) -> Option<Value> {
    let from_part = value["part"]["state"][key].clone();
    if !from_part.is_null() {
        return Some(from_part);
    }
    value.get(key).filter(|v| !v.is_null()).cloned()
}

/// `tool_use` lines carry their phase in `part.state.status`.
fn map_tool_use(value: &Value) -> Vec<EngineEvent> {
    let Some((tool_name, call_id)) = tool_identity(value) else {
        return Vec::new();
    };
    let state = &value["part"]["state"];
    let status = state["status"].as_str();

    match status {
        Some("pending") | None => vec![EngineEvent::ToolStart {
            tool_name,
            call_id,
            input: state.get("input").filter(|v| !v.is_null()).cloned(),
        }],
        Some(_) => {
            let output = state
                .get("output")
                .filter(|v| !v.is_null())
                .or_else(|| state.get("error").filter(|v| !v.is_null()))
                .cloned();
            vec![EngineEvent::ToolEnd {
                tool_name,
                call_id,
                output,
            }]
        }
    }
}

fn terminal_status(value: &Value) -> RunStatus {
    match value.get("status").and_then(Value::as_str) {
        Some("error" | "failed") => RunStatus::Error,
        Some("cancelled" | "canceled" | "aborted") => RunStatus::Cancelled,
        Some("success" | "completed" | "done") | None => RunStatus::Success,
        Some(_) => RunStatus::Unknown,
    }
}

fn file_event(value: &Value, upload: bool) -> EngineEvent {
    let source = if value.get("part").is_some() {
        &value["part"]
    } else {
        value
    };
    let file_path = source["filePath"]
        .as_str()
        .or_else(|| source["path"].as_str())
        .map(String::from);
    let file_name = source["fileName"]
        .as_str()
        .or_else(|| source["name"].as_str())
        .map(String::from);
    let size_bytes = source["sizeBytes"]
        .as_u64()
        .or_else(|| source["size"].as_u64());
    let url = source["url"].as_str().map(String::from);

    if upload {
        EngineEvent::FileUploaded {
            file_path,
            file_name,
            size_bytes,
            url,
        }
    } else {
        EngineEvent::FileDownloaded {
            file_path,
            file_name,
            size_bytes,
            url,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

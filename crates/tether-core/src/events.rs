//! Normalized engine events.
//!
//! Every engine adapter translates its CLI's raw JSON lines into this closed
//! tagged union. The union is the common language between the parsers, the
//! store (persisted as `run_events.payload_json`), and the run streamer.
//!
//! Unknown discriminators never reach this type — a parser that cannot
//! recognize a structure drops the line. Unknown optional fields of a
//! recognized structure are preserved in the `raw` slot for debugging
//! without affecting the union invariants.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of a run as reported by the engine (or synthesized).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Engine reported success.
    Success,
    /// Engine reported an error (or one was synthesized from stderr).
    Error,
    /// The run was cancelled.
    Cancelled,
    /// The stream ended without a recognizable terminal status.
    Unknown,
}

impl RunStatus {
    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

/// A normalized event emitted by an engine parser.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The run has started on the engine side.
    RunStarted {
        /// Run id, when the engine echoes one.
        #[serde(rename = "runId", skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        /// Engine-reported timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Engine self-description (model, version, capabilities).
    EngineMeta {
        /// Engine name as reported.
        #[serde(skip_serializing_if = "Option::is_none")]
        engine: Option<String>,
        /// Model in use.
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// Anything else the engine volunteered.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    /// Incremental assistant text.
    TextDelta {
        /// Text fragment.
        text: String,
        /// Output channel, when the engine distinguishes them.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },

    /// A tool invocation began.
    ToolStart {
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Engine-side call id.
        #[serde(rename = "callId", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        /// Tool input, when available at start.
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },

    /// A tool invocation finished.
    ToolEnd {
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Engine-side call id.
        #[serde(rename = "callId", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        /// Tool output (or the executed input, for engines that only echo it).
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },

    /// An error surfaced mid-stream.
    Error {
        /// Human-readable message.
        message: String,
        /// Engine-specific error code.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Terminal event. Emitted exactly once per parser lifetime.
    RunFinished {
        /// Terminal status.
        status: RunStatus,
    },

    /// A file was uploaded into the project during the run.
    FileUploaded {
        #[serde(rename = "filePath", skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(rename = "sizeBytes", skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    /// A file was produced by the run and is available for download.
    FileDownloaded {
        #[serde(rename = "filePath", skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(rename = "sizeBytes", skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl EngineEvent {
    /// Stable discriminator name, matching the serialized `type` tag.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::EngineMeta { .. } => "engine_meta",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::Error { .. } => "error",
            Self::RunFinished { .. } => "run_finished",
            Self::FileUploaded { .. } => "file_uploaded",
            Self::FileDownloaded { .. } => "file_downloaded",
        }
    }

    /// Whether this is the terminal event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_text_delta() {
        let event = EngineEvent::TextDelta {
            text: "hello".into(),
            channel: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["text"], "hello");
        assert!(json.get("channel").is_none());
    }

    #[test]
    fn serialize_tool_start_camel_case_fields() {
        let event = EngineEvent::ToolStart {
            tool_name: "Read".into(),
            call_id: Some("call_1".into()),
            input: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["toolName"], "Read");
        assert_eq!(json["callId"], "call_1");
    }

    #[test]
    fn deserialize_run_finished() {
        let event: EngineEvent =
            serde_json::from_str(r#"{"type":"run_finished","status":"success"}"#).unwrap();
        assert_eq!(
            event,
            EngineEvent::RunFinished {
                status: RunStatus::Success
            }
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn deserialize_rejects_unknown_discriminator() {
        let result = serde_json::from_str::<EngineEvent>(r#"{"type":"nonsense"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn event_type_matches_tag() {
        let cases: Vec<EngineEvent> = vec![
            EngineEvent::RunStarted {
                run_id: None,
                timestamp: None,
            },
            EngineEvent::TextDelta {
                text: String::new(),
                channel: None,
            },
            EngineEvent::RunFinished {
                status: RunStatus::Unknown,
            },
        ];
        for event in cases {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn run_status_round_trip() {
        for status in [
            RunStatus::Success,
            RunStatus::Error,
            RunStatus::Cancelled,
            RunStatus::Unknown,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let back: RunStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }
}

//! Message transport.
//!
//! The core talks to the chat through the narrow [`MessageTransport`] trait;
//! [`TelegramTransport`] is the thin Bot-API implementation. Update parsing
//! (long polling) lives in the binary — the handler receives pre-parsed
//! [`ChatUpdate`]s.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{ChatError, Result};

/// A chat reference on an incoming message.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChatRef {
    pub id: i64,
    /// `private`, `group`, `supergroup`, `channel`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// The sender of a message or callback.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UserRef {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// An incoming chat message.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: ChatRef,
    pub from: UserRef,
    #[serde(default)]
    pub text: Option<String>,
}

/// An inline-keyboard button press.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    pub from: UserRef,
    pub chat_id: i64,
    pub message_id: i64,
    pub data: String,
}

/// One pre-parsed update from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatUpdate {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
    pub callback_query: Option<CallbackQuery>,
}

/// One inline-keyboard button.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl KeyboardButton {
    #[must_use]
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// An outbound action produced by the handler.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Plain text reply.
    Reply { text: String },
    /// Send a document with an optional caption.
    ReplyWithDocument {
        file_path: std::path::PathBuf,
        caption: Option<String>,
    },
    /// Text with an inline keyboard.
    ReplyKeyboard {
        text: String,
        keyboard: Vec<Vec<KeyboardButton>>,
    },
    /// Edit an existing message's text and keyboard in place.
    EditKeyboard {
        message_id: i64,
        text: String,
        keyboard: Vec<Vec<KeyboardButton>>,
    },
    /// Short toast answering a callback query.
    Toast {
        callback_query_id: String,
        text: String,
    },
}

/// The narrow seam between the core and the chat service.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Send a message; returns the new message id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&[Vec<KeyboardButton>]>,
    ) -> Result<i64>;

    /// Edit a message's text and keyboard in place.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&[Vec<KeyboardButton>]>,
    ) -> Result<()>;

    /// Send a local file as a document; returns the new message id.
    async fn send_document(
        &self,
        chat_id: i64,
        file_path: &Path,
        caption: Option<&str>,
    ) -> Result<i64>;

    /// Answer a callback query (a toast, or silent ack with `None`).
    async fn answer_callback(&self, callback_query_id: &str, text: Option<&str>) -> Result<()>;
}

/// Bot-API implementation.
pub struct TelegramTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramTransport {
    #[must_use]
    pub fn new(bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        }
    }

    /// Override the API host (tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{method}", self.base_url);
        let response = self.client.post(&url).json(&body).send().await?;
        let envelope: ApiEnvelope = response.json().await?;
        if !envelope.ok {
            return Err(ChatError::Transport(format!(
                "{method} failed: {}",
                envelope.description.unwrap_or_else(|| "unknown".into())
            )));
        }
        Ok(envelope.result)
    }

    /// Long-poll for updates after `offset`. Returns raw update objects;
    /// callers parse with [`parse_update`].
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Value>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        let result = self.call("getUpdates", body).await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }

    fn keyboard_json(keyboard: &[Vec<KeyboardButton>]) -> Value {
        let rows: Vec<Value> = keyboard
            .iter()
            .map(|row| {
                Value::Array(
                    row.iter()
                        .map(|b| json!({"text": b.text, "callback_data": b.callback_data}))
                        .collect(),
                )
            })
            .collect();
        json!({ "inline_keyboard": rows })
    }
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&[Vec<KeyboardButton>]>,
    ) -> Result<i64> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(kb) = keyboard {
            body["reply_markup"] = Self::keyboard_json(kb);
        }
        let result = self.call("sendMessage", body).await?;
        let message_id = result["message_id"].as_i64().ok_or_else(|| {
            ChatError::Transport("sendMessage result missing message_id".into())
        })?;
        debug!(chat_id, message_id, "message sent");
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&[Vec<KeyboardButton>]>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = Self::keyboard_json(kb);
        }
        let _ = self.call("editMessageText", body).await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_path: &Path,
        caption: Option<&str>,
    ) -> Result<i64> {
        let bytes = tokio::fs::read(file_path).await?;
        let file_name = file_path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let url = format!("{}/sendDocument", self.base_url);
        let response = self.client.post(&url).multipart(form).send().await?;
        let envelope: ApiEnvelope = response.json().await?;
        if !envelope.ok {
            return Err(ChatError::Transport(format!(
                "sendDocument failed: {}",
                envelope.description.unwrap_or_else(|| "unknown".into())
            )));
        }
        envelope.result["message_id"].as_i64().ok_or_else(|| {
            ChatError::Transport("sendDocument result missing message_id".into())
        })
    }

    async fn answer_callback(&self, callback_query_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _ = self.call("answerCallbackQuery", body).await?;
        Ok(())
    }
}

/// Parse one raw Bot-API update object into a [`ChatUpdate`].
///
/// Returns `None` for update kinds the bridge does not consume (edited
/// messages, channel posts, inline queries).
#[must_use]
pub fn parse_update(raw: &Value) -> Option<ChatUpdate> {
    let update_id = raw["update_id"].as_i64()?;

    if let Some(message) = raw.get("message") {
        let message: IncomingMessage = serde_json::from_value(message.clone()).ok()?;
        return Some(ChatUpdate {
            update_id,
            message: Some(message),
            callback_query: None,
        });
    }

    if let Some(cq) = raw.get("callback_query") {
        let id = cq["id"].as_str()?.to_string();
        let from: UserRef = serde_json::from_value(cq["from"].clone()).ok()?;
        let chat_id = cq["message"]["chat"]["id"].as_i64()?;
        let message_id = cq["message"]["message_id"].as_i64()?;
        let data = cq["data"].as_str().unwrap_or_default().to_string();
        return Some(ChatUpdate {
            update_id,
            message: None,
            callback_query: Some(CallbackQuery {
                id,
                from,
                chat_id,
                message_id,
                data,
            }),
        });
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

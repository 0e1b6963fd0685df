//! # tether-telegram
//!
//! The chat surface: a narrow [`MessageTransport`] over the Telegram Bot
//! API, the owner-gated command handler with its per-chat state machine and
//! inline dashboard, and the run streamer that coalesces engine events into
//! throttled progress edits.

#![deny(unsafe_code)]

pub mod dashboard;
pub mod errors;
pub mod files;
pub mod handler;
pub mod state;
pub mod streamer;
pub mod transport;

pub use errors::{ChatError, Result};
pub use handler::{ChatCommandHandler, HandlerConfig};
pub use streamer::RunStreamer;
pub use transport::{
    Action, CallbackQuery, ChatRef, ChatUpdate, IncomingMessage, KeyboardButton, MessageTransport,
    TelegramTransport, UserRef,
};

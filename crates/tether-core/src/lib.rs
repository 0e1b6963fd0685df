//! # tether-core
//!
//! Shared vocabulary for the tether bridge: the normalized engine event
//! union, the streaming line framer, and small text utilities used by the
//! chat-facing crates.

#![deny(unsafe_code)]

pub mod events;
pub mod framer;
pub mod friendly;
pub mod text;

pub use events::{EngineEvent, RunStatus};
pub use framer::LineFramer;

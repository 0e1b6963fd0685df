//! # tether-engines
//!
//! Engine adapters: per-engine streaming parsers that normalize CLI output
//! into [`tether_core::EngineEvent`]s, the child-process runner with
//! single-flight and graceful-then-forceful cancellation, and the executors
//! that compose both into one run.

#![deny(unsafe_code)]

pub mod env;
pub mod errors;
pub mod executor;
pub mod parser;
pub mod policy;
pub mod runner;

pub use errors::{EngineError, Result};
pub use executor::{ClaudeExecutor, EngineExecutor, EventSink, ExecOutcome, ExecRequest, OpencodeExecutor};
pub use parser::{claude::ClaudeParser, opencode::OpencodeParser, EngineParser};
pub use runner::{
    LifecycleEvent, ProcessCanceller, ProcessEvents, ProcessHandle, ProcessResult, ProcessRunner,
    ProcessStatus, StartParams,
};

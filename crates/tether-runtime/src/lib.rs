//! # tether-runtime
//!
//! The execution backbone between the chat surface and the engines: the
//! run orchestrator (idempotent enqueue, leased processing, finalization,
//! stale-run reconciliation) and the bounded worker pool that drives it.

#![deny(unsafe_code)]

pub mod errors;
pub mod orchestrator;
pub mod worker;

pub use errors::{Result, RuntimeError};
pub use orchestrator::{
    ExecutorRegistry, NullObserver, ProcessedJob, ReconcileOutcome, RunObserver, RunOrchestrator,
};
pub use worker::{WorkerPool, WorkerPoolConfig};

//! # tether-server
//!
//! The HTTP side of the bridge: liveness/readiness probes, Prometheus
//! metrics, and thin read-views over the store under `/api/*`, optionally
//! gated by basic auth. No write surface beyond run cancellation.

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use config::DashboardConfig;
pub use server::DashboardServer;
pub use shutdown::ShutdownCoordinator;

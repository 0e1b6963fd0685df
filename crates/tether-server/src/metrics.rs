//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Jobs waiting in the queue (gauge).
pub const JOBS_QUEUED: &str = "tether_jobs_queued";
/// Runs currently in flight (gauge).
pub const RUNS_IN_FLIGHT: &str = "tether_runs_in_flight";
/// Run events persisted in total (gauge, monotone from the store).
pub const RUN_EVENTS_TOTAL: &str = "tether_run_events_total";
/// Updates handled total (counter, incremented by the transport loop).
pub const UPDATES_TOTAL: &str = "tether_updates_total";
/// Runs enqueued total (counter).
pub const RUNS_ENQUEUED_TOTAL: &str = "tether_runs_enqueued_total";

/// Install the global Prometheus recorder. Call once at startup.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text from the installed recorder.
#[must_use]
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed() {
        for name in [
            JOBS_QUEUED,
            RUNS_IN_FLIGHT,
            RUN_EVENTS_TOTAL,
            UPDATES_TOTAL,
            RUNS_ENQUEUED_TOTAL,
        ] {
            assert!(name.starts_with("tether_"), "{name}");
        }
    }
}

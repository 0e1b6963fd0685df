//! `/healthz` and `/readyz` bodies.

use std::time::Instant;

use serde::Serialize;

/// Liveness response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process runs.
    pub status: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Jobs currently queued.
    pub queued_jobs: i64,
    /// Runs currently in flight.
    pub runs_in_flight: i64,
}

/// Build a health response from live counters.
#[must_use]
pub fn health_check(start_time: Instant, queued_jobs: i64, runs_in_flight: i64) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        queued_jobs,
        runs_in_flight,
    }
}

/// Readiness response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyResponse {
    /// Whether the store answered the probe query.
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, 0);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn counters_pass_through() {
        let resp = health_check(Instant::now(), 4, 2);
        assert_eq!(resp.queued_jobs, 4);
        assert_eq!(resp.runs_in_flight, 2);
    }
}

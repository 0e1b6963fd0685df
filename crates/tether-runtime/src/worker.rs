//! Bounded worker pool.
//!
//! One supervisor loop polls the queue: it leases jobs while capacity
//! remains, spawns a worker task per job, and runs a reconcile pass each
//! iteration. Every worker keeps its lease alive with a renewal ticker.
//! Shutdown cancels all live engine processes and waits briefly for workers
//! to finalize.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tether_engines::ProcessRunner;
use tether_store::Store;

use crate::orchestrator::RunOrchestrator;

/// Pool tuning knobs.
#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    /// Maximum jobs executing at once.
    pub max_concurrent_jobs: usize,
    /// Sleep between polls when idle or at capacity.
    pub poll_interval_ms: u64,
    /// Lease duration handed to the store.
    pub lease_duration_ms: i64,
    /// How often a worker renews its lease.
    pub lease_renewal_interval_ms: u64,
    /// In-flight runs older than this are abandoned and requeued.
    pub stale_run_ceiling_ms: i64,
    /// How long shutdown waits for active jobs to clear.
    pub shutdown_drain_ms: u64,
    /// Lease owner label recorded on jobs.
    pub owner: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            poll_interval_ms: 750,
            lease_duration_ms: 30_000,
            lease_renewal_interval_ms: 15_000,
            stale_run_ceiling_ms: 60 * 60 * 1000,
            shutdown_drain_ms: 5_000,
            owner: format!("worker-{}", std::process::id()),
        }
    }
}

/// The supervisor and its worker tasks.
pub struct WorkerPool {
    orchestrator: Arc<RunOrchestrator>,
    store: Arc<Store>,
    runner: Arc<ProcessRunner>,
    config: WorkerPoolConfig,
    active_jobs: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        orchestrator: Arc<RunOrchestrator>,
        store: Arc<Store>,
        runner: Arc<ProcessRunner>,
        config: WorkerPoolConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            store,
            runner,
            config,
            active_jobs: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// Jobs currently executing.
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Run the supervisor loop until shutdown.
    pub async fn run(self: Arc<Self>) {
        info!(
            max_concurrent = self.config.max_concurrent_jobs,
            owner = %self.config.owner,
            "worker pool started"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let now_ms = chrono::Utc::now().timestamp_millis();

            // Hard ceiling on in-flight age; anything older is abandoned.
            match self
                .orchestrator
                .reconcile(now_ms, self.config.stale_run_ceiling_ms)
            {
                Ok(outcome) if !outcome.abandoned_run_ids.is_empty() => {
                    warn!(
                        abandoned = outcome.abandoned_run_ids.len(),
                        requeued = outcome.requeued,
                        "reconciled stale runs"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "reconcile failed"),
            }

            if self.active_jobs.load(Ordering::SeqCst) >= self.config.max_concurrent_jobs {
                self.sleep_or_shutdown().await;
                continue;
            }

            match self.orchestrator.lease_next(
                &self.config.owner,
                now_ms,
                self.config.lease_duration_ms,
            ) {
                Ok(Some(job)) => {
                    let _ = self.active_jobs.fetch_add(1, Ordering::SeqCst);
                    self.clone().spawn_worker(job);
                    // Immediately poll again; more jobs may be waiting.
                }
                Ok(None) => self.sleep_or_shutdown().await,
                Err(e) => {
                    error!(error = %e, "lease poll failed");
                    self.sleep_or_shutdown().await;
                }
            }
        }

        self.drain().await;
    }

    /// Request shutdown (also triggered by the shared token).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn spawn_worker(self: Arc<Self>, job: tether_store::Job) {
        let _ = tokio::spawn(async move {
            let renewal = {
                let store = self.store.clone();
                let job_id = job.id.clone();
                let interval_ms = self.config.lease_renewal_interval_ms;
                let lease_ms = self.config.lease_duration_ms;
                tokio::spawn(async move {
                    let mut tick =
                        tokio::time::interval(Duration::from_millis(interval_ms));
                    // The first tick fires immediately; skip it.
                    let _ = tick.tick().await;
                    loop {
                        let _ = tick.tick().await;
                        let now = chrono::Utc::now().timestamp_millis();
                        match store.renew_job_lease(&job_id, now, lease_ms) {
                            Ok(true) => debug!(job_id, "lease renewed"),
                            Ok(false) => break,
                            Err(e) => warn!(job_id, error = %e, "lease renewal failed"),
                        }
                    }
                })
            };

            // A single run's failure is logged, never fatal to the pool.
            if let Err(e) = self.orchestrator.execute_job(&job).await {
                error!(job_id = %job.id, run_id = %job.run_id, error = %e, "job failed");
            }

            renewal.abort();
            let _ = self.active_jobs.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn sleep_or_shutdown(&self) {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
            () = self.shutdown.cancelled() => {}
        }
    }

    async fn drain(&self) {
        info!(active = self.active_jobs(), "worker pool shutting down");
        self.runner.cancel_all();

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.shutdown_drain_ms);
        while self.active_jobs.load(Ordering::SeqCst) > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if self.active_jobs.load(Ordering::SeqCst) > 0 {
            warn!(
                remaining = self.active_jobs(),
                "workers still active at drain deadline"
            );
        }
        info!("worker pool stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    use tether_core::{EngineEvent, RunStatus};
    use tether_engines::executor::{EngineExecutor, EventSink, ExecOutcome, ExecRequest};
    use tether_store::{
        new_in_memory, run_migrations, ConnectionConfig, JobState, Project, Provider, RunState,
    };

    use crate::orchestrator::{ExecutorRegistry, NullObserver};

    fn setup_store() -> Arc<Store> {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        let store = Arc::new(Store::new(pool));
        let _ = store
            .sync_projects(&[Project {
                id: "proj-1".into(),
                name: "One".into(),
                root_path: "/srv/one".into(),
                default_engine: Provider::Claude,
                opencode_attach_url: None,
            }])
            .unwrap();
        store
    }

    struct InstantExecutor;

    #[async_trait]
    impl EngineExecutor for InstantExecutor {
        async fn execute(
            &self,
            _req: &ExecRequest,
            sink: Arc<dyn EventSink>,
        ) -> tether_engines::Result<ExecOutcome> {
            sink.on_event(EngineEvent::TextDelta {
                text: "ok".into(),
                channel: None,
            })
            .await?;
            sink.on_event(EngineEvent::RunFinished {
                status: RunStatus::Success,
            })
            .await?;
            Ok(ExecOutcome {
                exit_status: RunStatus::Success,
                engine_session_id: None,
                bytes_out: 2,
                malformed_lines: 0,
            })
        }
    }

    fn pool_with(store: &Arc<Store>, shutdown: CancellationToken) -> Arc<WorkerPool> {
        let executor: Arc<dyn EngineExecutor> = Arc::new(InstantExecutor);
        let orchestrator = Arc::new(crate::orchestrator::RunOrchestrator::new(
            store.clone(),
            ExecutorRegistry::new(executor.clone(), executor),
            Arc::new(NullObserver),
            Arc::new(AtomicBool::new(false)),
        ));
        Arc::new(WorkerPool::new(
            orchestrator,
            store.clone(),
            Arc::new(tether_engines::ProcessRunner::new()),
            WorkerPoolConfig {
                poll_interval_ms: 20,
                shutdown_drain_ms: 500,
                ..Default::default()
            },
            shutdown,
        ))
    }

    #[tokio::test]
    async fn pool_drains_queue_and_stops() {
        let store = setup_store();
        let shutdown = CancellationToken::new();
        let pool = pool_with(&store, shutdown.clone());

        let mut run_ids = Vec::new();
        for i in 0..3 {
            let session = store
                .create_session(&tether_store::CreateSessionParams {
                    project_id: "proj-1",
                    chat_id: None,
                    provider: Provider::Claude,
                    prompt: "p",
                    model: None,
                    agent: None,
                })
                .unwrap();
            let outcome = store
                .enqueue_run("proj-1", &session.id, &format!("k{i}"), "p", 0)
                .unwrap();
            run_ids.push(outcome.run.id);
        }

        let handle = tokio::spawn(pool.clone().run());

        // Wait for every run to reach a terminal state.
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let done = run_ids
                .iter()
                .all(|id| {
                    store
                        .get_run(id)
                        .unwrap()
                        .unwrap()
                        .status
                        .is_terminal()
                });
            if done {
                break;
            }
        }

        for id in &run_ids {
            let run = store.get_run(id).unwrap().unwrap();
            assert_eq!(run.status, RunState::Completed, "run {id}");
            let job = store.get_job_by_run(id).unwrap().unwrap();
            assert_eq!(job.status, JobState::Completed);
        }

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(pool.active_jobs(), 0);
    }

    #[tokio::test]
    async fn pool_stops_promptly_when_idle() {
        let store = setup_store();
        let shutdown = CancellationToken::new();
        let pool = pool_with(&store, shutdown.clone());

        let handle = tokio::spawn(pool.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("pool did not stop")
            .unwrap();
    }

    #[test]
    fn default_config_matches_policy() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.poll_interval_ms, 750);
        assert_eq!(config.lease_duration_ms, 30_000);
        assert_eq!(config.lease_renewal_interval_ms, 15_000);
        assert_eq!(config.stale_run_ceiling_ms, 3_600_000);
        assert_eq!(config.shutdown_drain_ms, 5_000);
    }
}

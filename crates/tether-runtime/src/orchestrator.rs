//! Run orchestrator.
//!
//! Owns the run lifecycle from enqueue to finalization:
//!
//! - **Enqueue** is idempotent by key and enforces session single-flight
//!   through both an in-memory active set and the store.
//! - **Execute** drives a leased job through the engine executor, persisting
//!   every event in arrival order before forwarding it to the observer, then
//!   derives the summary and finalizes run and job together.
//! - **Reconcile** abandons in-flight runs older than a staleness cutoff and
//!   requeues their jobs.
//!
//! The active-sessions set is a process-local guard; truth lives in the
//! store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use tether_core::{EngineEvent, RunStatus};
use tether_engines::executor::{EngineExecutor, EventSink, ExecRequest};
use tether_engines::EngineError;
use tether_store::{Job, Provider, Run, RunState, RunSummary, Store};

use crate::errors::{Result, RuntimeError};

/// Observer of a run's event stream (the chat streamer, in production).
#[async_trait]
pub trait RunObserver: Send + Sync {
    /// Called after each event is persisted, in `seq` order.
    async fn on_event(&self, run_id: &str, chat_id: Option<&str>, event: &EngineEvent);

    /// Called once after the run is finalized.
    async fn on_run_finished(
        &self,
        run_id: &str,
        chat_id: Option<&str>,
        status: RunStatus,
        summary: &RunSummary,
    );
}

/// Observer that drops everything.
pub struct NullObserver;

#[async_trait]
impl RunObserver for NullObserver {
    async fn on_event(&self, _run_id: &str, _chat_id: Option<&str>, _event: &EngineEvent) {}
    async fn on_run_finished(
        &self,
        _run_id: &str,
        _chat_id: Option<&str>,
        _status: RunStatus,
        _summary: &RunSummary,
    ) {
    }
}

/// One executor per provider.
pub struct ExecutorRegistry {
    executors: HashMap<Provider, Arc<dyn EngineExecutor>>,
}

impl ExecutorRegistry {
    #[must_use]
    pub fn new(claude: Arc<dyn EngineExecutor>, opencode: Arc<dyn EngineExecutor>) -> Self {
        let mut executors: HashMap<Provider, Arc<dyn EngineExecutor>> = HashMap::new();
        let _ = executors.insert(Provider::Claude, claude);
        let _ = executors.insert(Provider::Opencode, opencode);
        Self { executors }
    }

    fn for_provider(&self, provider: Provider) -> Arc<dyn EngineExecutor> {
        self.executors[&provider].clone()
    }
}

/// What happened to one leased job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessedJob {
    /// The run executed to a terminal state.
    Executed { run_id: String, status: RunState },
    /// Re-lease collision — the session is already running here.
    Requeued { run_id: String },
    /// Kill switch is on — pushed back into the queue for later.
    Deferred { run_id: String },
    /// The job referenced missing state and was failed.
    Dropped { run_id: String },
}

/// Outcome of one reconcile pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Runs flipped to `abandoned`.
    pub abandoned_run_ids: Vec<String>,
    /// Jobs that went back to `queued`.
    pub requeued: usize,
}

/// Sink that persists each event before forwarding it to the observer, and
/// keeps the counters the summary needs.
struct PersistingSink {
    store: Arc<Store>,
    observer: Arc<dyn RunObserver>,
    run_id: String,
    chat_id: Option<String>,
    tool_calls: AtomicI64,
    encoded_bytes: AtomicI64,
    error_seen: AtomicBool,
}

#[async_trait]
impl EventSink for PersistingSink {
    async fn on_event(&self, event: EngineEvent) -> tether_engines::Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let row = self
            .store
            .append_run_event(&self.run_id, &event, now)
            .map_err(EngineError::Store)?;

        if matches!(event, EngineEvent::ToolStart { .. }) {
            let _ = self.tool_calls.fetch_add(1, Ordering::Relaxed);
        }
        if matches!(event, EngineEvent::Error { .. }) {
            self.error_seen.store(true, Ordering::SeqCst);
        }
        let _ = self
            .encoded_bytes
            .fetch_add(row.payload_json.len() as i64, Ordering::Relaxed);

        self.observer
            .on_event(&self.run_id, self.chat_id.as_deref(), &event)
            .await;
        Ok(())
    }
}

/// Removes the session from the active set when execution ends, however it
/// ends.
struct ActiveSessionGuard {
    sessions: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        let _ = self.sessions.lock().remove(&self.session_id);
    }
}

/// The run orchestrator.
pub struct RunOrchestrator {
    store: Arc<Store>,
    executors: ExecutorRegistry,
    observer: Arc<dyn RunObserver>,
    active_sessions: Arc<Mutex<HashSet<String>>>,
    kill_switch: Arc<AtomicBool>,
}

impl RunOrchestrator {
    pub fn new(
        store: Arc<Store>,
        executors: ExecutorRegistry,
        observer: Arc<dyn RunObserver>,
        kill_switch: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            executors,
            observer,
            active_sessions: Arc::new(Mutex::new(HashSet::new())),
            kill_switch,
        }
    }

    /// Whether a session currently executes in this process.
    #[must_use]
    pub fn is_session_active(&self, session_id: &str) -> bool {
        self.active_sessions.lock().contains(session_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Enqueue
    // ─────────────────────────────────────────────────────────────────────

    /// Idempotent enqueue. Same key → same run, no second job. A session
    /// with an active run rejects new work with
    /// [`RuntimeError::SessionAlreadyActive`].
    pub fn enqueue(
        &self,
        project_id: &str,
        session_id: &str,
        idempotency_key: &str,
        prompt: &str,
        now_ms: i64,
    ) -> Result<Run> {
        // Fast path: repeat delivery of the same chat message.
        if let Some(existing) = self
            .store
            .get_run_by_idempotency_key(idempotency_key)?
        {
            return Ok(existing);
        }

        if self.is_session_active(session_id)
            || self.store.find_active_run_by_session(session_id)?.is_some()
        {
            return Err(RuntimeError::SessionAlreadyActive(session_id.to_string()));
        }

        let outcome =
            self.store
                .enqueue_run(project_id, session_id, idempotency_key, prompt, now_ms)?;
        if outcome.created {
            info!(run_id = %outcome.run.id, session_id, "run enqueued");
        }
        Ok(outcome.run)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lease + execute
    // ─────────────────────────────────────────────────────────────────────

    /// Lease the next eligible job and flip its run to `leased`.
    pub fn lease_next(
        &self,
        owner: &str,
        now_ms: i64,
        lease_duration_ms: i64,
    ) -> Result<Option<Job>> {
        let Some(job) = self.store.lease_next_job(owner, now_ms, lease_duration_ms)? else {
            return Ok(None);
        };
        let _ = self.store.mark_run_leased(&job.run_id)?;
        Ok(Some(job))
    }

    /// Execute one leased job to its terminal state.
    ///
    /// Exception path: persists an `error` event, finalizes the run
    /// `failed`, fails the job, then re-raises so the pool can log.
    pub async fn execute_job(&self, job: &Job) -> Result<ProcessedJob> {
        let now_ms = chrono::Utc::now().timestamp_millis();

        // Kill switch flipped after enqueue: leased jobs wait it out.
        if self.kill_switch.load(Ordering::SeqCst) {
            warn!(run_id = %job.run_id, "kill switch on, deferring leased job");
            let _ = self.store.defer_job(&job.id, now_ms + 60_000)?;
            let _ = self.store.set_run_queued(&job.run_id)?;
            return Ok(ProcessedJob::Deferred {
                run_id: job.run_id.clone(),
            });
        }

        let Some(run) = self.store.get_run(&job.run_id)? else {
            let _ = self.store.fail_job(&job.id, "run record missing")?;
            return Ok(ProcessedJob::Dropped {
                run_id: job.run_id.clone(),
            });
        };

        // Re-lease collision: this process is already executing the session.
        if self.is_session_active(&run.session_id) {
            let _ = self
                .store
                .requeue_leased_job_by_run_id(&run.id, now_ms + 1_000)?;
            let _ = self.store.set_run_queued(&run.id)?;
            return Ok(ProcessedJob::Requeued { run_id: run.id });
        }

        let Some(session) = self.store.get_session(&run.session_id)? else {
            let _ = self.store.fail_job(&job.id, "session record missing")?;
            let summary = RunSummary {
                exit_status: "error".into(),
                ..Default::default()
            };
            let _ = self
                .store
                .finalize_run(&run.id, RunState::Failed, now_ms, &summary)?;
            return Ok(ProcessedJob::Dropped { run_id: run.id });
        };

        let Some(project) = self.store.get_project(&run.project_id)? else {
            let _ = self.store.fail_job(&job.id, "project record missing")?;
            let summary = RunSummary {
                exit_status: "error".into(),
                ..Default::default()
            };
            let _ = self
                .store
                .finalize_run(&run.id, RunState::Failed, now_ms, &summary)?;
            return Ok(ProcessedJob::Dropped { run_id: run.id });
        };

        let _guard = {
            let _ = self.active_sessions.lock().insert(run.session_id.clone());
            ActiveSessionGuard {
                sessions: self.active_sessions.clone(),
                session_id: run.session_id.clone(),
            }
        };

        let started_at = chrono::Utc::now().timestamp_millis();
        let _ = self.store.mark_run_in_flight(&run.id, started_at)?;

        let sink = Arc::new(PersistingSink {
            store: self.store.clone(),
            observer: self.observer.clone(),
            run_id: run.id.clone(),
            chat_id: session.chat_id.clone(),
            tool_calls: AtomicI64::new(0),
            encoded_bytes: AtomicI64::new(0),
            error_seen: AtomicBool::new(false),
        });

        let request = ExecRequest {
            run_id: run.id.clone(),
            project,
            session: session.clone(),
            prompt: run.prompt.clone(),
            model: session.model.clone(),
            agent: session.agent.clone(),
            files: Vec::new(),
        };

        let executor = self.executors.for_provider(session.provider);
        let exec_result = executor.execute(&request, sink.clone()).await;

        let finished_at = chrono::Utc::now().timestamp_millis();
        match exec_result {
            Ok(outcome) => {
                let summary = RunSummary {
                    duration_ms: (finished_at - started_at).max(0),
                    tool_calls_count: sink.tool_calls.load(Ordering::Relaxed),
                    bytes_in: 0,
                    bytes_out: if outcome.bytes_out > 0 {
                        outcome.bytes_out as i64
                    } else {
                        sink.encoded_bytes.load(Ordering::Relaxed)
                    },
                    exit_status: outcome.exit_status.as_str().to_string(),
                };

                let final_state = match outcome.exit_status {
                    RunStatus::Success => RunState::Completed,
                    RunStatus::Cancelled => RunState::Cancelled,
                    RunStatus::Error | RunStatus::Unknown => RunState::Failed,
                };
                let _ = self
                    .store
                    .finalize_run(&run.id, final_state, finished_at, &summary)?;
                match final_state {
                    RunState::Completed => {
                        let _ = self.store.complete_job(&job.id)?;
                    }
                    RunState::Cancelled => {
                        let _ = self.store.cancel_job_by_run(&run.id)?;
                    }
                    _ => {
                        let _ = self
                            .store
                            .fail_job(&job.id, &format!("run {}", summary.exit_status))?;
                    }
                }

                self.observer
                    .on_run_finished(
                        &run.id,
                        session.chat_id.as_deref(),
                        outcome.exit_status,
                        &summary,
                    )
                    .await;

                info!(
                    run_id = %run.id,
                    status = summary.exit_status,
                    duration_ms = summary.duration_ms,
                    malformed = outcome.malformed_lines,
                    "run finished"
                );
                Ok(ProcessedJob::Executed {
                    run_id: run.id,
                    status: final_state,
                })
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "executor failed");
                let _ = self.store.append_run_event(
                    &run.id,
                    &EngineEvent::Error {
                        message: e.to_string(),
                        code: None,
                    },
                    finished_at,
                );
                let summary = RunSummary {
                    duration_ms: (finished_at - started_at).max(0),
                    tool_calls_count: sink.tool_calls.load(Ordering::Relaxed),
                    bytes_in: 0,
                    bytes_out: sink.encoded_bytes.load(Ordering::Relaxed),
                    exit_status: "error".into(),
                };
                let _ = self
                    .store
                    .finalize_run(&run.id, RunState::Failed, finished_at, &summary)?;
                let _ = self.store.fail_job(&job.id, &e.to_string())?;

                self.observer
                    .on_run_finished(
                        &run.id,
                        session.chat_id.as_deref(),
                        RunStatus::Error,
                        &summary,
                    )
                    .await;

                Err(e.into())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reconcile
    // ─────────────────────────────────────────────────────────────────────

    /// Abandon in-flight runs older than `stale_age_ms` and requeue their
    /// jobs.
    pub fn reconcile(&self, now_ms: i64, stale_age_ms: i64) -> Result<ReconcileOutcome> {
        let cutoff = now_ms - stale_age_ms;
        let mut outcome = ReconcileOutcome::default();

        for run in self.store.list_stale_in_flight_runs(cutoff)? {
            // Skip runs this process is still executing; their leases renew.
            if self.is_session_active(&run.session_id) {
                continue;
            }
            if self.store.abandon_run(&run.id, now_ms)? {
                warn!(run_id = %run.id, "abandoning stale in-flight run");
                outcome.abandoned_run_ids.push(run.id.clone());
                if self.store.requeue_leased_job_by_run_id(&run.id, now_ms)? {
                    outcome.requeued += 1;
                }
            }
        }

        Ok(outcome)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! High-level transactional store API.
//!
//! Composes the per-table repositories into atomic operations. Every
//! multi-statement write runs inside a single transaction — callers never
//! observe a run without its job, or an event row with a recycled `seq`.

use tether_core::EngineEvent;

use crate::connection::{ConnectionPool, PooledConnection};
use crate::errors::Result;
use crate::repositories::audit::AppendAuditParams;
use crate::repositories::file::InsertFileParams;
use crate::repositories::run::InsertRunParams;
use crate::repositories::session::CreateSessionParams;
use crate::repositories::{
    AuditRepo, ChatRepo, FileRepo, InboxRepo, JobRepo, ProjectRepo, RunEventRepo, RunRepo,
    SessionRepo,
};
use crate::types::{
    AuditDecision, AuditEntry, Chat, FileDirection, FileRecord, Job, Project, Run, RunEventRow,
    RunState, RunSummary, Session,
};

/// Result of an idempotent enqueue.
#[derive(Debug)]
pub struct EnqueueOutcome {
    /// The run — freshly inserted or the earlier one for the same key.
    pub run: Run,
    /// Whether this call created the run (and its job).
    pub created: bool,
}

/// Result of a config-driven project sync.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProjectSyncOutcome {
    /// Projects removed because they left the config.
    pub deleted: usize,
    /// Projects inserted or updated from the config.
    pub upserted: usize,
}

/// Transactional repository facade over the connection pool.
pub struct Store {
    pool: ConnectionPool,
}

impl Store {
    /// Create a store over an initialized (migrated) pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────────────────────

    /// Replace the project table with the configured list: delete rows whose
    /// id left the config, then upsert every configured row. One transaction.
    pub fn sync_projects(&self, desired: &[Project]) -> Result<ProjectSyncOutcome> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut outcome = ProjectSyncOutcome::default();
        let existing = ProjectRepo::ids(&tx)?;
        for id in &existing {
            if !desired.iter().any(|p| &p.id == id) && ProjectRepo::delete(&tx, id)? {
                outcome.deleted += 1;
            }
        }
        for project in desired {
            ProjectRepo::upsert(&tx, project)?;
            outcome.upserted += 1;
        }

        tx.commit()?;
        Ok(outcome)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn()?;
        ProjectRepo::list(&conn)
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn()?;
        ProjectRepo::get(&conn, id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Chats
    // ─────────────────────────────────────────────────────────────────────

    pub fn get_or_create_chat(
        &self,
        external_chat_id: i64,
        project_id: Option<&str>,
    ) -> Result<Chat> {
        let conn = self.conn()?;
        ChatRepo::get_or_create(&conn, external_chat_id, project_id)
    }

    pub fn get_chat(&self, external_chat_id: i64) -> Result<Option<Chat>> {
        let conn = self.conn()?;
        ChatRepo::get_by_external(&conn, external_chat_id)
    }

    pub fn get_chat_by_id(&self, id: &str) -> Result<Option<Chat>> {
        let conn = self.conn()?;
        ChatRepo::get(&conn, id)
    }

    pub fn set_chat_unsafe_until(
        &self,
        external_chat_id: i64,
        unsafe_until: Option<i64>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        ChatRepo::set_unsafe_until(&conn, external_chat_id, unsafe_until)
    }

    pub fn set_chat_project(
        &self,
        external_chat_id: i64,
        project_id: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        ChatRepo::set_project(&conn, external_chat_id, project_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    pub fn create_session(&self, params: &CreateSessionParams<'_>) -> Result<Session> {
        let conn = self.conn()?;
        SessionRepo::create(&conn, params)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn()?;
        SessionRepo::get(&conn, id)
    }

    pub fn list_sessions_by_project(&self, project_id: &str) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        SessionRepo::list_by_project(&conn, project_id)
    }

    pub fn set_session_engine_id(
        &self,
        session_id: &str,
        engine_session_id: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        SessionRepo::update_engine_session_id(&conn, session_id, engine_session_id)
    }

    pub fn set_session_model(&self, session_id: &str, model: Option<&str>) -> Result<bool> {
        let conn = self.conn()?;
        SessionRepo::update_model(&conn, session_id, model)
    }

    pub fn set_session_agent(&self, session_id: &str, agent: Option<&str>) -> Result<bool> {
        let conn = self.conn()?;
        SessionRepo::update_agent(&conn, session_id, agent)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Runs and jobs
    // ─────────────────────────────────────────────────────────────────────

    /// Idempotent enqueue: a run with the same key is returned unchanged;
    /// otherwise the run and its job are inserted in one transaction.
    pub fn enqueue_run(
        &self,
        project_id: &str,
        session_id: &str,
        idempotency_key: &str,
        prompt: &str,
        now_ms: i64,
    ) -> Result<EnqueueOutcome> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        if let Some(existing) = RunRepo::get_by_idempotency_key(&tx, idempotency_key)? {
            tx.commit()?;
            return Ok(EnqueueOutcome {
                run: existing,
                created: false,
            });
        }

        let run = RunRepo::insert(
            &tx,
            &InsertRunParams {
                project_id,
                session_id,
                idempotency_key,
                prompt,
                now_ms,
            },
        )?;
        let _ = JobRepo::insert(&tx, &run.id, now_ms)?;

        tx.commit()?;
        Ok(EnqueueOutcome { run, created: true })
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.conn()?;
        RunRepo::get(&conn, id)
    }

    pub fn get_run_by_idempotency_key(&self, key: &str) -> Result<Option<Run>> {
        let conn = self.conn()?;
        RunRepo::get_by_idempotency_key(&conn, key)
    }

    pub fn find_active_run_by_session(&self, session_id: &str) -> Result<Option<Run>> {
        let conn = self.conn()?;
        RunRepo::find_active_by_session(&conn, session_id)
    }

    pub fn list_recent_runs(&self, limit: u32) -> Result<Vec<Run>> {
        let conn = self.conn()?;
        RunRepo::list_recent(&conn, limit)
    }

    pub fn list_runs_by_session(&self, session_id: &str, limit: u32) -> Result<Vec<Run>> {
        let conn = self.conn()?;
        RunRepo::list_by_session(&conn, session_id, limit)
    }

    /// Atomically lease the oldest eligible queued job.
    pub fn lease_next_job(
        &self,
        owner: &str,
        now_ms: i64,
        lease_duration_ms: i64,
    ) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let Some(job) = JobRepo::next_eligible(&tx, now_ms)? else {
            return Ok(None);
        };
        if !JobRepo::lease(&tx, &job.id, owner, now_ms, lease_duration_ms)? {
            // Taken between select and flip — treat as empty queue this poll.
            return Ok(None);
        }
        let leased = JobRepo::get(&tx, &job.id)?;

        tx.commit()?;
        Ok(leased)
    }

    /// Flip the run to `leased` when its job is acquired.
    pub fn mark_run_leased(&self, run_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        RunRepo::set_status(&conn, run_id, RunState::Leased)
    }

    /// Flip the run back to `queued` (lease released without executing).
    pub fn set_run_queued(&self, run_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        RunRepo::set_status(&conn, run_id, RunState::Queued)
    }

    pub fn mark_run_in_flight(&self, run_id: &str, now_ms: i64) -> Result<bool> {
        let conn = self.conn()?;
        RunRepo::mark_in_flight(&conn, run_id, now_ms)
    }

    pub fn finalize_run(
        &self,
        run_id: &str,
        status: RunState,
        now_ms: i64,
        summary: &RunSummary,
    ) -> Result<bool> {
        let conn = self.conn()?;
        RunRepo::finalize(&conn, run_id, status, now_ms, summary)
    }

    /// Cancel a run and its job together.
    pub fn cancel_run(&self, run_id: &str, now_ms: i64) -> Result<bool> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let run_cancelled = RunRepo::cancel(&tx, run_id, now_ms)?;
        let _ = JobRepo::cancel_by_run(&tx, run_id)?;
        tx.commit()?;
        Ok(run_cancelled)
    }

    pub fn requeue_leased_job_by_run_id(&self, run_id: &str, now_ms: i64) -> Result<bool> {
        let conn = self.conn()?;
        JobRepo::requeue_by_run(&conn, run_id, now_ms)
    }

    pub fn abandon_run(&self, run_id: &str, now_ms: i64) -> Result<bool> {
        let conn = self.conn()?;
        RunRepo::abandon_if_in_flight(&conn, run_id, now_ms)
    }

    pub fn list_stale_in_flight_runs(&self, started_before_ms: i64) -> Result<Vec<Run>> {
        let conn = self.conn()?;
        RunRepo::list_stale_in_flight(&conn, started_before_ms)
    }

    pub fn get_job_by_run(&self, run_id: &str) -> Result<Option<Job>> {
        let conn = self.conn()?;
        JobRepo::get_by_run(&conn, run_id)
    }

    pub fn renew_job_lease(
        &self,
        job_id: &str,
        now_ms: i64,
        lease_duration_ms: i64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        JobRepo::renew_lease(&conn, job_id, now_ms, lease_duration_ms)
    }

    pub fn complete_job(&self, job_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        JobRepo::complete(&conn, job_id)
    }

    pub fn fail_job(&self, job_id: &str, error: &str) -> Result<bool> {
        let conn = self.conn()?;
        JobRepo::fail(&conn, job_id, error)
    }

    /// Defer a leased job back to the queue at a future time (kill switch).
    pub fn defer_job(&self, job_id: &str, available_at: i64) -> Result<bool> {
        let conn = self.conn()?;
        JobRepo::defer(&conn, job_id, available_at)
    }

    /// Cancel just the job of a run (the run reached `cancelled` elsewhere).
    pub fn cancel_job_by_run(&self, run_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        JobRepo::cancel_by_run(&conn, run_id)
    }

    pub fn count_queued_jobs(&self) -> Result<i64> {
        let conn = self.conn()?;
        JobRepo::count_queued(&conn)
    }

    pub fn count_runs_in_state(&self, state: RunState) -> Result<i64> {
        let conn = self.conn()?;
        RunRepo::count_by_status(&conn, state)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Run events
    // ─────────────────────────────────────────────────────────────────────

    /// Append a normalized event with the next gap-free `seq`.
    ///
    /// Sequence computation and insert share one transaction, so two
    /// concurrent appends always produce distinct sequential values.
    pub fn append_run_event(
        &self,
        run_id: &str,
        event: &EngineEvent,
        now_ms: i64,
    ) -> Result<RunEventRow> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let seq = RunEventRepo::next_seq(&tx, run_id)?;
        let payload = serde_json::to_string(event)?;
        let row = RunEventRepo::insert(&tx, run_id, seq, event.event_type(), &payload, now_ms)?;

        tx.commit()?;
        Ok(row)
    }

    pub fn list_run_events(&self, run_id: &str) -> Result<Vec<RunEventRow>> {
        let conn = self.conn()?;
        RunEventRepo::list_by_run(&conn, run_id)
    }

    pub fn count_run_events(&self, run_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        RunEventRepo::count(&conn, run_id)
    }

    pub fn count_all_run_events(&self) -> Result<i64> {
        let conn = self.conn()?;
        RunEventRepo::count_all(&conn)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbox, files, audit
    // ─────────────────────────────────────────────────────────────────────

    /// First-writer-wins dedupe of an inbound chat update.
    pub fn insert_inbox_update(
        &self,
        update_id: i64,
        chat_id: Option<i64>,
        payload: &serde_json::Value,
        now_ms: i64,
    ) -> Result<bool> {
        let payload_json = serde_json::to_string(payload)?;
        let conn = self.conn()?;
        InboxRepo::insert(&conn, update_id, chat_id, &payload_json, now_ms)
    }

    pub fn insert_file_record(
        &self,
        chat_id: Option<&str>,
        direction: FileDirection,
        original_name: &str,
        stored_rel_path: &str,
        size_bytes: i64,
        sha256: &str,
    ) -> Result<FileRecord> {
        let conn = self.conn()?;
        FileRepo::insert(
            &conn,
            &InsertFileParams {
                chat_id,
                direction,
                original_name,
                stored_rel_path,
                size_bytes,
                sha256,
            },
        )
    }

    pub fn list_files(
        &self,
        direction: Option<FileDirection>,
        limit: u32,
    ) -> Result<Vec<FileRecord>> {
        let conn = self.conn()?;
        FileRepo::list(&conn, direction, limit)
    }

    pub fn append_audit(
        &self,
        user_id: Option<i64>,
        chat_id: i64,
        command: &str,
        run_id: Option<&str>,
        decision: AuditDecision,
        reason: Option<&str>,
    ) -> Result<AuditEntry> {
        let conn = self.conn()?;
        AuditRepo::append(
            &conn,
            &AppendAuditParams {
                user_id,
                chat_id,
                command,
                run_id,
                decision,
                reason,
            },
        )
    }

    pub fn list_audit(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let conn = self.conn()?;
        AuditRepo::list_recent(&conn, limit)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

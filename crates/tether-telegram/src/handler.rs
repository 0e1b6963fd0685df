//! Chat command handler.
//!
//! Gatekeeping happens in a fixed order: non-private chats are audited and
//! dropped, non-owners are audited and refused, duplicate updates are
//! swallowed after the inbox dedupe, and only then is per-chat state
//! hydrated and the command dispatched.
//!
//! The handler returns [`Action`]s; the transport loop in the binary sends
//! them. While a chat's unsafe window is open, every outgoing text carries
//! an UNSAFE MODE banner.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use tether_runtime::{RunOrchestrator, RuntimeError};
use tether_store::{
    AuditDecision, CreateSessionParams, Project, Provider, Session, Store, CONTINUE_MARKER,
};

use crate::dashboard;
use crate::errors::{ChatError, Result};
use crate::files::{resolve_in_root, sha256_hex};
use crate::state::{ChatState, ChatStateMap};
use crate::transport::{Action, CallbackQuery, ChatUpdate, IncomingMessage};

/// Handler configuration.
#[derive(Clone, Debug)]
pub struct HandlerConfig {
    /// The sole permitted user id.
    pub owner_user_id: i64,
    /// Location of `projects.json` for `/reload_projects`.
    pub projects_config_path: PathBuf,
}

/// Owner-gated command handler with per-chat state.
pub struct ChatCommandHandler {
    store: Arc<Store>,
    orchestrator: Arc<RunOrchestrator>,
    states: ChatStateMap,
    config: HandlerConfig,
    kill_switch: Arc<AtomicBool>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ChatCommandHandler {
    pub fn new(
        store: Arc<Store>,
        orchestrator: Arc<RunOrchestrator>,
        config: HandlerConfig,
        kill_switch: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            states: ChatStateMap::new(),
            config,
            kill_switch,
        }
    }

    /// Handle one pre-parsed update, returning the actions to perform.
    pub fn handle_update(&self, update: &ChatUpdate) -> Vec<Action> {
        if let Some(message) = &update.message {
            return self.handle_message(update.update_id, message);
        }
        if let Some(callback) = &update.callback_query {
            return self.handle_callback(update.update_id, callback);
        }
        Vec::new()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Gatekeeping
    // ─────────────────────────────────────────────────────────────────────

    fn handle_message(&self, update_id: i64, message: &IncomingMessage) -> Vec<Action> {
        let chat_id = message.chat.id;

        if message.chat.kind != "private" {
            self.audit(
                Some(message.from.id),
                chat_id,
                "message",
                None,
                AuditDecision::Deny,
                Some("group-or-non-private-chat"),
            );
            return Vec::new();
        }

        if message.from.id != self.config.owner_user_id {
            self.audit(
                Some(message.from.id),
                chat_id,
                "message",
                None,
                AuditDecision::Deny,
                Some("non-owner"),
            );
            return vec![Action::Reply {
                text: "Access denied: owner only.".into(),
            }];
        }

        if !self.accept_update(update_id, chat_id) {
            return Vec::new();
        }

        self.hydrate(chat_id);

        let Some(text) = message.text.as_deref() else {
            return Vec::new();
        };
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let actions = self.dispatch_text(chat_id, message, text);
        self.decorate(chat_id, actions)
    }

    fn handle_callback(&self, update_id: i64, callback: &CallbackQuery) -> Vec<Action> {
        let chat_id = callback.chat_id;

        if callback.from.id != self.config.owner_user_id {
            self.audit(
                Some(callback.from.id),
                chat_id,
                "callback",
                None,
                AuditDecision::Deny,
                Some("non-owner"),
            );
            return vec![Action::Toast {
                callback_query_id: callback.id.clone(),
                text: "Owner only.".into(),
            }];
        }

        if !self.accept_update(update_id, chat_id) {
            return Vec::new();
        }

        self.hydrate(chat_id);

        let actions = match self.dispatch_callback(chat_id, callback) {
            Ok(actions) => actions,
            Err(e) => vec![Action::Toast {
                callback_query_id: callback.id.clone(),
                text: format!("Error: {e}"),
            }],
        };
        self.decorate(chat_id, actions)
    }

    /// First-writer-wins dedupe; a store failure lets the update through.
    fn accept_update(&self, update_id: i64, chat_id: i64) -> bool {
        match self.store.insert_inbox_update(
            update_id,
            Some(chat_id),
            &json!({ "update_id": update_id, "chat_id": chat_id }),
            now_ms(),
        ) {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(update_id, error = %e, "inbox insert failed, accepting update");
                true
            }
        }
    }

    /// Pull persistent chat state into the in-memory map.
    fn hydrate(&self, chat_id: i64) {
        let first_project = self
            .store
            .list_projects()
            .ok()
            .and_then(|projects| projects.first().cloned());

        let chat = self
            .store
            .get_or_create_chat(chat_id, first_project.as_ref().map(|p| p.id.as_str()))
            .ok();

        self.states.update(chat_id, |state| {
            if let Some(chat) = &chat {
                state.unsafe_until = chat.unsafe_until;
                if state.project_id.is_none() {
                    state.project_id = chat.project_id.clone();
                }
            }
            if state.project_id.is_none() {
                if let Some(project) = &first_project {
                    state.project_id = Some(project.id.clone());
                    state.default_engine = project.default_engine;
                }
            }
        });
    }

    fn audit(
        &self,
        user_id: Option<i64>,
        chat_id: i64,
        command: &str,
        run_id: Option<&str>,
        decision: AuditDecision,
        reason: Option<&str>,
    ) {
        if let Err(e) = self
            .store
            .append_audit(user_id, chat_id, command, run_id, decision, reason)
        {
            warn!(chat_id, command, error = %e, "audit append failed");
        }
    }

    /// Prefix outgoing texts with the unsafe banner while the window is
    /// open.
    fn decorate(&self, chat_id: i64, actions: Vec<Action>) -> Vec<Action> {
        let state = self.states.get(chat_id);
        let now = now_ms();
        let Some(until) = state.unsafe_until.filter(|&until| until > now) else {
            return actions;
        };
        let expires = chrono::DateTime::from_timestamp_millis(until)
            .map_or_else(|| until.to_string(), |dt| dt.to_rfc3339());
        let banner = format!("⚠️ UNSAFE MODE (expires {expires})\n\n");

        actions
            .into_iter()
            .map(|action| match action {
                Action::Reply { text } => Action::Reply {
                    text: format!("{banner}{text}"),
                },
                Action::ReplyKeyboard { text, keyboard } => Action::ReplyKeyboard {
                    text: format!("{banner}{text}"),
                    keyboard,
                },
                Action::EditKeyboard {
                    message_id,
                    text,
                    keyboard,
                } => Action::EditKeyboard {
                    message_id,
                    text: format!("{banner}{text}"),
                    keyboard,
                },
                other => other,
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Text dispatch
    // ─────────────────────────────────────────────────────────────────────

    fn dispatch_text(
        &self,
        chat_id: i64,
        message: &IncomingMessage,
        text: &str,
    ) -> Vec<Action> {
        if !text.starts_with('/') {
            return self.cmd_run(chat_id, message, text);
        }

        let (command, rest) = text
            .split_once(char::is_whitespace)
            .map_or((text, ""), |(c, r)| (c, r.trim()));

        let result: Result<Vec<Action>> = match command {
            "/d" | "/dashboard" => self.cmd_dashboard(chat_id),
            "/projects" => self.cmd_projects(),
            "/use" => self.cmd_use(chat_id, rest),
            "/sessions" => self.cmd_sessions(chat_id),
            "/newsession" => self.cmd_newsession(chat_id, rest),
            "/use_session" => self.cmd_use_session(chat_id, rest),
            "/engine" => self.cmd_engine(chat_id, rest),
            "/run" => Ok(self.cmd_run(chat_id, message, rest)),
            "/continue" => self.cmd_continue(chat_id, message, rest),
            "/attach" => self.cmd_attach(chat_id, rest),
            "/stop" => self.cmd_stop(chat_id),
            "/status" => self.cmd_status(chat_id),
            "/current" => self.cmd_current(chat_id),
            "/whoami" => Ok(vec![reply(format!(
                "You are {} (owner).",
                message.from.id
            ))]),
            "/enable_unsafe" => self.cmd_enable_unsafe(chat_id, rest),
            "/uploads" => self.cmd_uploads(),
            "/get" => self.cmd_get(chat_id, rest),
            "/help" | "/start" => Ok(vec![reply(HELP_TEXT.to_string())]),
            "/reload_projects" => self.cmd_reload_projects(),
            _ => Ok(vec![reply(format!(
                "Unknown command: {command}. Try /help."
            ))]),
        };

        result.unwrap_or_else(|e| vec![reply(format!("Error: {e}"))])
    }

    // ─────────────────────────────────────────────────────────────────────
    // Run path
    // ─────────────────────────────────────────────────────────────────────

    fn cmd_run(&self, chat_id: i64, message: &IncomingMessage, prompt: &str) -> Vec<Action> {
        if prompt.is_empty() {
            return vec![reply("Usage: /run <prompt>".to_string())];
        }

        if self.kill_switch.load(Ordering::SeqCst) {
            self.audit(
                Some(message.from.id),
                chat_id,
                "run",
                None,
                AuditDecision::Deny,
                Some("kill-switch"),
            );
            return vec![reply(
                "Maintenance mode: new runs are disabled right now.".to_string(),
            )];
        }

        match self.enqueue_run(chat_id, message.message_id, prompt) {
            Ok(run_id) => {
                self.audit(
                    Some(message.from.id),
                    chat_id,
                    "run",
                    Some(&run_id),
                    AuditDecision::Allow,
                    None,
                );
                vec![reply(format!("Run queued: {run_id}"))]
            }
            Err(ChatError::Runtime(RuntimeError::SessionAlreadyActive(_))) => vec![reply(
                "Session busy: a run is already active. /stop it first.".to_string(),
            )],
            Err(e) => vec![reply(format!("Error: {e}"))],
        }
    }

    fn enqueue_run(&self, chat_id: i64, message_id: i64, prompt: &str) -> Result<String> {
        let project = self.ensure_project(chat_id)?;
        let session = self.ensure_session(chat_id, &project)?;

        let idempotency_key = format!("tg:{chat_id}:{message_id}");
        let run = self.orchestrator.enqueue(
            &project.id,
            &session.id,
            &idempotency_key,
            prompt,
            now_ms(),
        )?;

        self.states.update(chat_id, |state| {
            state.last_run_id = Some(run.id.clone());
            state.session_id = Some(session.id.clone());
        });
        Ok(run.id)
    }

    fn ensure_project(&self, chat_id: i64) -> Result<Project> {
        let state = self.states.get(chat_id);
        if let Some(id) = state.project_id.as_deref() {
            if let Some(project) = self.store.get_project(id)? {
                return Ok(project);
            }
        }
        let Some(project) = self.store.list_projects()?.into_iter().next() else {
            return Err(ChatError::Sandbox("no projects configured".into()));
        };
        self.states
            .update(chat_id, |state| state.project_id = Some(project.id.clone()));
        Ok(project)
    }

    /// The selected session, else the project's first, else a fresh one
    /// owned by this chat.
    fn ensure_session(&self, chat_id: i64, project: &Project) -> Result<Session> {
        let state = self.states.get(chat_id);

        if let Some(id) = state.session_id.as_deref() {
            if let Some(session) = self.store.get_session(id)? {
                if session.project_id == project.id {
                    self.apply_overrides(chat_id, &session)?;
                    return self
                        .store
                        .get_session(id)?
                        .ok_or_else(|| ChatError::Sandbox("session vanished".into()));
                }
            }
        }

        if let Some(session) = self
            .store
            .list_sessions_by_project(&project.id)?
            .into_iter()
            .next()
        {
            self.states
                .update(chat_id, |s| s.session_id = Some(session.id.clone()));
            self.apply_overrides(chat_id, &session)?;
            return Ok(self
                .store
                .get_session(&session.id)?
                .unwrap_or(session));
        }

        self.create_session(chat_id, project, "")
    }

    /// Push the chat's model/agent choices onto the session record so the
    /// executor sees them.
    fn apply_overrides(&self, chat_id: i64, session: &Session) -> Result<()> {
        let state = self.states.get(chat_id);
        if state.model != session.model {
            let _ = self
                .store
                .set_session_model(&session.id, state.model.as_deref())?;
        }
        if state.opencode_agent != session.agent {
            let _ = self
                .store
                .set_session_agent(&session.id, state.opencode_agent.as_deref())?;
        }
        Ok(())
    }

    fn create_session(&self, chat_id: i64, project: &Project, name: &str) -> Result<Session> {
        let state = self.states.get(chat_id);
        let chat = self.store.get_or_create_chat(chat_id, Some(&project.id))?;
        let session = self.store.create_session(&CreateSessionParams {
            project_id: &project.id,
            chat_id: Some(&chat.id),
            provider: state.default_engine,
            prompt: name,
            model: state.model.as_deref(),
            agent: state.opencode_agent.as_deref(),
        })?;
        self.states
            .update(chat_id, |s| s.session_id = Some(session.id.clone()));
        Ok(session)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    fn cmd_dashboard(&self, chat_id: i64) -> Result<Vec<Action>> {
        let state = self.states.get(chat_id);
        let projects = self.store.list_projects()?;
        let (text, keyboard) = dashboard::render_dashboard(&state, &projects);
        Ok(vec![Action::ReplyKeyboard { text, keyboard }])
    }

    fn cmd_projects(&self) -> Result<Vec<Action>> {
        let projects = self.store.list_projects()?;
        if projects.is_empty() {
            return Ok(vec![reply("No projects configured.".to_string())]);
        }
        let lines: Vec<String> = projects
            .iter()
            .map(|p| {
                format!(
                    "{} — {} ({}, engine {})",
                    p.id,
                    p.name,
                    p.root_path,
                    p.default_engine.as_sql()
                )
            })
            .collect();
        Ok(vec![reply(format!("Projects:\n{}", lines.join("\n")))])
    }

    fn cmd_use(&self, chat_id: i64, arg: &str) -> Result<Vec<Action>> {
        if arg.is_empty() {
            return Ok(vec![reply("Usage: /use <projectId>".to_string())]);
        }
        let Some(project) = self.store.get_project(arg)? else {
            return Ok(vec![reply(format!("Unknown project: {arg}"))]);
        };
        self.select_project(chat_id, &project)?;
        Ok(vec![reply(format!("Project set: {}", project.name))])
    }

    fn select_project(&self, chat_id: i64, project: &Project) -> Result<()> {
        let _ = self.store.get_or_create_chat(chat_id, Some(&project.id))?;
        let _ = self.store.set_chat_project(chat_id, Some(&project.id))?;
        self.states.update(chat_id, |state| {
            state.project_id = Some(project.id.clone());
            state.default_engine = project.default_engine;
            state.session_id = None;
            state.model = None;
            state.opencode_agent = None;
        });
        Ok(())
    }

    fn cmd_sessions(&self, chat_id: i64) -> Result<Vec<Action>> {
        let project = self.ensure_project(chat_id)?;
        let sessions = self.store.list_sessions_by_project(&project.id)?;
        if sessions.is_empty() {
            return Ok(vec![reply(
                "No sessions yet. /newsession <engine> to create one.".to_string(),
            )]);
        }
        let state = self.states.get(chat_id);
        let lines: Vec<String> = sessions
            .iter()
            .map(|s| {
                let marker = if state.session_id.as_deref() == Some(s.id.as_str()) {
                    "* "
                } else {
                    "  "
                };
                format!(
                    "{marker}{} ({}, engine session: {})",
                    s.id,
                    s.provider.as_sql(),
                    s.engine_session_id.as_deref().unwrap_or("-")
                )
            })
            .collect();
        Ok(vec![reply(format!("Sessions:\n{}", lines.join("\n")))])
    }

    fn cmd_newsession(&self, chat_id: i64, rest: &str) -> Result<Vec<Action>> {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let engine_arg = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default().trim();

        if engine_arg.is_empty() {
            return Ok(vec![reply(
                "Usage: /newsession <claude|opencode> [name]".to_string(),
            )]);
        }
        let Ok(provider) = Provider::parse(engine_arg) else {
            return Ok(vec![reply(format!("Unknown engine: {engine_arg}"))]);
        };

        self.states
            .update(chat_id, |state| state.default_engine = provider);
        let project = self.ensure_project(chat_id)?;
        let session = self.create_session(chat_id, &project, name)?;
        Ok(vec![reply(format!(
            "Session created and selected: {} ({})",
            session.id,
            provider.as_sql()
        ))])
    }

    fn cmd_use_session(&self, chat_id: i64, arg: &str) -> Result<Vec<Action>> {
        if arg.is_empty() {
            return Ok(vec![reply("Usage: /use_session <sessionId>".to_string())]);
        }
        let Some(session) = self.store.get_session(arg)? else {
            return Ok(vec![reply(format!("Unknown session: {arg}"))]);
        };
        self.states.update(chat_id, |state| {
            state.session_id = Some(session.id.clone());
            state.default_engine = session.provider;
        });
        Ok(vec![reply(format!("Session selected: {}", session.id))])
    }

    fn cmd_engine(&self, chat_id: i64, arg: &str) -> Result<Vec<Action>> {
        let Ok(provider) = Provider::parse(arg) else {
            return Ok(vec![reply("Usage: /engine <claude|opencode>".to_string())]);
        };
        self.states
            .update(chat_id, |state| state.default_engine = provider);
        Ok(vec![reply(format!("Engine set: {}", provider.as_sql()))])
    }

    fn cmd_continue(
        &self,
        chat_id: i64,
        message: &IncomingMessage,
        rest: &str,
    ) -> Result<Vec<Action>> {
        let project = self.ensure_project(chat_id)?;
        let session = self.ensure_session(chat_id, &project)?;
        let _ = self
            .store
            .set_session_engine_id(&session.id, Some(CONTINUE_MARKER))?;

        if rest.is_empty() {
            return Ok(vec![reply(
                "Next run continues the engine-side conversation.".to_string(),
            )]);
        }
        Ok(self.cmd_run(chat_id, message, rest))
    }

    fn cmd_attach(&self, chat_id: i64, arg: &str) -> Result<Vec<Action>> {
        if arg.is_empty() {
            return Ok(vec![reply("Usage: /attach <engineSessionId>".to_string())]);
        }
        let project = self.ensure_project(chat_id)?;
        let session = self.ensure_session(chat_id, &project)?;
        let _ = self.store.set_session_engine_id(&session.id, Some(arg))?;
        Ok(vec![reply(format!(
            "Session {} attached to engine session {arg}.",
            session.id
        ))])
    }

    fn cmd_stop(&self, chat_id: i64) -> Result<Vec<Action>> {
        let state = self.states.get(chat_id);

        let active = match state.session_id.as_deref() {
            Some(session_id) => self.store.find_active_run_by_session(session_id)?,
            None => None,
        };
        let run_id = active.map(|r| r.id).or(state.last_run_id);

        let Some(run_id) = run_id else {
            return Ok(vec![reply("No run to stop.".to_string())]);
        };
        if self.store.cancel_run(&run_id, now_ms())? {
            Ok(vec![reply(format!("Cancelling run {run_id}…"))])
        } else {
            Ok(vec![reply(format!("Run {run_id} already finished."))])
        }
    }

    fn cmd_status(&self, chat_id: i64) -> Result<Vec<Action>> {
        let queued = self.store.count_queued_jobs()?;
        let in_flight = self
            .store
            .count_runs_in_state(tether_store::RunState::InFlight)?;
        let state = self.states.get(chat_id);
        let last = match state.last_run_id.as_deref() {
            Some(id) => self
                .store
                .get_run(id)?
                .map_or_else(|| "unknown".to_string(), |r| {
                    format!("{} ({})", r.id, r.status.as_sql())
                }),
            None => "-".to_string(),
        };
        Ok(vec![reply(format!(
            "Queued jobs: {queued}\nRuns in flight: {in_flight}\nLast run: {last}"
        ))])
    }

    fn cmd_current(&self, chat_id: i64) -> Result<Vec<Action>> {
        let state = self.states.get(chat_id);
        Ok(vec![reply(format!(
            "Project: {}\nSession: {}\nEngine: {}\nModel: {}",
            state.project_id.as_deref().unwrap_or("-"),
            state.session_id.as_deref().unwrap_or("-"),
            state.default_engine.as_sql(),
            state.model.as_deref().unwrap_or("default"),
        ))])
    }

    fn cmd_enable_unsafe(&self, chat_id: i64, arg: &str) -> Result<Vec<Action>> {
        let Ok(minutes) = arg.parse::<i64>() else {
            return Ok(vec![reply("Usage: /enable_unsafe <minutes>".to_string())]);
        };
        if !(1..=24 * 60).contains(&minutes) {
            return Ok(vec![reply(
                "Unsafe window must be between 1 minute and 24 hours.".to_string(),
            )]);
        }
        let until = now_ms() + minutes * 60_000;
        let _ = self.store.get_or_create_chat(chat_id, None)?;
        let _ = self.store.set_chat_unsafe_until(chat_id, Some(until))?;
        self.states
            .update(chat_id, |state| state.unsafe_until = Some(until));
        Ok(vec![reply(format!(
            "Unsafe mode enabled for {minutes} minute(s)."
        ))])
    }

    fn cmd_uploads(&self) -> Result<Vec<Action>> {
        let files = self
            .store
            .list_files(Some(tether_store::FileDirection::Upload), 20)?;
        if files.is_empty() {
            return Ok(vec![reply("No uploads recorded.".to_string())]);
        }
        let lines: Vec<String> = files
            .iter()
            .map(|f| format!("{} ({} bytes) — {}", f.original_name, f.size_bytes, f.stored_rel_path))
            .collect();
        Ok(vec![reply(format!("Uploads:\n{}", lines.join("\n")))])
    }

    fn cmd_get(&self, chat_id: i64, arg: &str) -> Result<Vec<Action>> {
        if arg.is_empty() {
            return Ok(vec![reply("Usage: /get <relative path>".to_string())]);
        }
        let project = self.ensure_project(chat_id)?;
        let resolved = resolve_in_root(std::path::Path::new(&project.root_path), arg)?;

        let bytes = std::fs::read(&resolved)?;
        let chat = self.store.get_or_create_chat(chat_id, Some(&project.id))?;
        let _ = self.store.insert_file_record(
            Some(&chat.id),
            tether_store::FileDirection::Download,
            arg,
            &resolved.to_string_lossy(),
            bytes.len() as i64,
            &sha256_hex(&bytes),
        )?;

        Ok(vec![Action::ReplyWithDocument {
            file_path: resolved,
            caption: Some(format!("{arg} ({} bytes)", bytes.len())),
        }])
    }

    fn cmd_reload_projects(&self) -> Result<Vec<Action>> {
        let projects = tether_settings::load_projects(&self.config.projects_config_path)
            .map_err(|e| ChatError::Sandbox(e.to_string()))?;
        let outcome = self.store.sync_projects(&projects)?;
        Ok(vec![reply(format!(
            "Projects reloaded: {} upserted, {} deleted.",
            outcome.upserted, outcome.deleted
        ))])
    }

    // ─────────────────────────────────────────────────────────────────────
    // Callback dispatch
    // ─────────────────────────────────────────────────────────────────────

    fn dispatch_callback(&self, chat_id: i64, callback: &CallbackQuery) -> Result<Vec<Action>> {
        let data = callback.data.as_str();

        let (toast, view) = if let Some(project_id) = data.strip_prefix("proj:") {
            match self.store.get_project(project_id)? {
                Some(project) => {
                    self.select_project(chat_id, &project)?;
                    (format!("Project: {}", project.name), View::Dashboard)
                }
                None => (format!("Unknown project: {project_id}"), View::Dashboard),
            }
        } else if let Some(engine) = data.strip_prefix("engine:") {
            match Provider::parse(engine) {
                Ok(provider) => {
                    self.states.update(chat_id, |state| {
                        state.default_engine = provider;
                        state.model = None;
                    });
                    (format!("Engine: {engine}"), View::Dashboard)
                }
                Err(_) => (format!("Unknown engine: {engine}"), View::Dashboard),
            }
        } else if data == "newsession" {
            let project = self.ensure_project(chat_id)?;
            let session = self.create_session(chat_id, &project, "")?;
            (format!("Session created: {}", session.id), View::Dashboard)
        } else if data == "continue" {
            let project = self.ensure_project(chat_id)?;
            let session = self.ensure_session(chat_id, &project)?;
            let _ = self
                .store
                .set_session_engine_id(&session.id, Some(CONTINUE_MARKER))?;
            ("Will continue the engine conversation.".to_string(), View::Dashboard)
        } else if let Some(session_id) = data.strip_prefix("session:") {
            match self.store.get_session(session_id)? {
                Some(session) => {
                    self.states.update(chat_id, |state| {
                        state.session_id = Some(session.id.clone());
                        state.default_engine = session.provider;
                    });
                    (format!("Session: {session_id}"), View::Dashboard)
                }
                None => (format!("Unknown session: {session_id}"), View::Dashboard),
            }
        } else if data == "sessions" {
            (String::new(), View::Sessions)
        } else if let Some(minutes) = data.strip_prefix("unsafe:") {
            let minutes: i64 = minutes.parse().unwrap_or(30);
            let until = now_ms() + minutes * 60_000;
            let _ = self.store.get_or_create_chat(chat_id, None)?;
            let _ = self.store.set_chat_unsafe_until(chat_id, Some(until))?;
            self.states
                .update(chat_id, |state| state.unsafe_until = Some(until));
            (format!("Unsafe for {minutes}m"), View::Dashboard)
        } else if data == "unsafe_off" {
            let _ = self.store.set_chat_unsafe_until(chat_id, None)?;
            self.states
                .update(chat_id, |state| state.unsafe_until = None);
            ("Unsafe mode off.".to_string(), View::Dashboard)
        } else if data == "models" {
            (String::new(), View::Models)
        } else if let Some(model) = data.strip_prefix("model:") {
            let model = (!model.is_empty()).then(|| model.to_string());
            self.states
                .update(chat_id, |state| state.model = model.clone());
            if let Some(session_id) = self.states.get(chat_id).session_id.as_deref() {
                let _ = self.store.set_session_model(session_id, model.as_deref())?;
            }
            (
                format!("Model: {}", model.as_deref().unwrap_or("default")),
                View::Models,
            )
        } else if let Some(agent) = data.strip_prefix("agent:") {
            let agent = (!agent.is_empty()).then(|| agent.to_string());
            self.states
                .update(chat_id, |state| state.opencode_agent = agent.clone());
            if let Some(session_id) = self.states.get(chat_id).session_id.as_deref() {
                let _ = self.store.set_session_agent(session_id, agent.as_deref())?;
            }
            (
                format!("Agent: {}", agent.as_deref().unwrap_or("default")),
                View::Dashboard,
            )
        } else if data == "clisessions" {
            (String::new(), View::CliSessions)
        } else if let Some(session_id) = data.strip_prefix("clipeek:") {
            (String::new(), View::CliPeek(session_id.to_string()))
        } else if let Some(engine_id) = data.strip_prefix("cliattach:") {
            let project = self.ensure_project(chat_id)?;
            let session = self.ensure_session(chat_id, &project)?;
            let _ = self.store.set_session_engine_id(&session.id, Some(engine_id))?;
            (format!("Attached to {engine_id}"), View::Dashboard)
        } else if let Some(run_id) = data.strip_prefix("stop_run:") {
            if self.store.cancel_run(run_id, now_ms())? {
                (format!("Stopping {run_id}…"), View::None)
            } else {
                ("Run already finished.".to_string(), View::None)
            }
        } else if data == "refresh" || data == "back" {
            (String::new(), View::Dashboard)
        } else {
            (format!("Unknown action: {data}"), View::None)
        };

        let mut actions = Vec::new();
        if let Some((text, keyboard)) = self.render_view(chat_id, &view)? {
            actions.push(Action::EditKeyboard {
                message_id: callback.message_id,
                text,
                keyboard,
            });
        }
        if !toast.is_empty() {
            actions.push(Action::Toast {
                callback_query_id: callback.id.clone(),
                text: toast,
            });
        }
        Ok(actions)
    }

    fn render_view(
        &self,
        chat_id: i64,
        view: &View,
    ) -> Result<Option<(String, Vec<Vec<crate::transport::KeyboardButton>>)>> {
        let state = self.states.get(chat_id);
        match view {
            View::None => Ok(None),
            View::Dashboard => {
                let projects = self.store.list_projects()?;
                Ok(Some(dashboard::render_dashboard(&state, &projects)))
            }
            View::Sessions => {
                let project = self.ensure_project(chat_id)?;
                let sessions = self.store.list_sessions_by_project(&project.id)?;
                Ok(Some(dashboard::render_sessions_menu(&state, &sessions)))
            }
            View::Models => Ok(Some(dashboard::render_models_menu(&state))),
            View::CliSessions => {
                let project = self.ensure_project(chat_id)?;
                let sessions = self.store.list_sessions_by_project(&project.id)?;
                Ok(Some(dashboard::render_cli_sessions_menu(&sessions)))
            }
            View::CliPeek(session_id) => match self.store.get_session(session_id)? {
                Some(session) => Ok(Some(dashboard::render_cli_peek(&session))),
                None => Ok(None),
            },
        }
    }

    /// Test/diagnostic access to one chat's state snapshot.
    #[must_use]
    pub fn chat_state(&self, chat_id: i64) -> ChatState {
        self.states.get(chat_id)
    }
}

/// The submenu (or main view) a callback lands on.
enum View {
    None,
    Dashboard,
    Sessions,
    Models,
    CliSessions,
    CliPeek(String),
}

fn reply(text: String) -> Action {
    Action::Reply { text }
}

const HELP_TEXT: &str = "tether — remote control for coding agents\n\
    /d — dashboard\n\
    /projects, /use <id> — pick a project\n\
    /sessions, /newsession <engine> [name], /use_session <id> — sessions\n\
    /engine <claude|opencode>, /run <prompt> — run a prompt\n\
    /continue [prompt], /attach <engineSessionId> — engine-side sessions\n\
    /stop — cancel the active run\n\
    /status, /current, /whoami — state\n\
    /enable_unsafe <minutes> — widen tool permissions temporarily\n\
    /uploads, /get <path> — files\n\
    /reload_projects — re-read projects.json";

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

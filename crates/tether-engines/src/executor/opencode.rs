//! Executor for the opencode CLI.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tether_store::{Store, CONTINUE_MARKER};

use crate::env::sanitized_env;
use crate::errors::Result;
use crate::parser::opencode::OpencodeParser;
use crate::policy::opencode_config_content;
use crate::runner::{ProcessRunner, DEFAULT_CANCEL_GRACE_MS};

use super::{
    run_engine, unsafe_mode_now, EngineExecutor, EngineInvocation, EventSink, ExecOutcome,
    ExecRequest,
};

/// Environment variable carrying the permission policy document.
pub const OPENCODE_CONFIG_ENV: &str = "OPENCODE_CONFIG_CONTENT";

/// Configuration for the opencode executor.
#[derive(Clone, Debug)]
pub struct OpencodeExecutorConfig {
    /// Binary name or path.
    pub binary: String,
    /// Idle watchdog limit. Longer than claude's; opencode stays quiet
    /// through long tool calls.
    pub idle_timeout_ms: u64,
    /// Interrupt-to-kill grace.
    pub cancel_grace_ms: u64,
    /// Pass `--fork` when continuing or resuming.
    pub fork: bool,
}

impl Default for OpencodeExecutorConfig {
    fn default() -> Self {
        Self {
            binary: "opencode".into(),
            idle_timeout_ms: 300_000,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            fork: false,
        }
    }
}

/// Build the opencode argv for one run.
#[must_use]
pub fn build_opencode_args(req: &ExecRequest, config: &OpencodeExecutorConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        req.prompt.clone(),
        "--format".into(),
        "json".into(),
    ];

    match req.session.engine_session_id.as_deref() {
        None => {}
        Some(CONTINUE_MARKER) => {
            args.push("--continue".into());
            if config.fork {
                args.push("--fork".into());
            }
        }
        Some(id) => {
            args.push("--session".into());
            args.push(id.to_string());
            if config.fork {
                args.push("--fork".into());
            }
        }
    }

    if let Some(url) = &req.project.opencode_attach_url {
        args.push("--attach".into());
        args.push(url.clone());
    }
    for file in &req.files {
        args.push("-f".into());
        args.push(file.clone());
    }
    if let Some(model) = &req.model {
        args.push("--model".into());
        args.push(model.clone());
    }
    if let Some(agent) = &req.agent {
        args.push("--agent".into());
        args.push(agent.clone());
    }

    args
}

/// Executor for `opencode run … --format json`.
pub struct OpencodeExecutor {
    store: Arc<Store>,
    runner: Arc<ProcessRunner>,
    config: OpencodeExecutorConfig,
}

impl OpencodeExecutor {
    pub fn new(
        store: Arc<Store>,
        runner: Arc<ProcessRunner>,
        config: OpencodeExecutorConfig,
    ) -> Self {
        Self {
            store,
            runner,
            config,
        }
    }
}

#[async_trait]
impl EngineExecutor for OpencodeExecutor {
    async fn execute(&self, req: &ExecRequest, sink: Arc<dyn EventSink>) -> Result<ExecOutcome> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let unsafe_mode = unsafe_mode_now(&self.store, &req.session, now_ms);

        let mut env: HashMap<String, String> = sanitized_env(std::env::vars());
        let _ = env.insert(
            OPENCODE_CONFIG_ENV.to_string(),
            opencode_config_content(unsafe_mode),
        );

        let invocation = EngineInvocation {
            command: self.config.binary.clone(),
            args: build_opencode_args(req, &self.config),
            env,
            idle_timeout: Duration::from_millis(self.config.idle_timeout_ms),
            cancel_grace_ms: self.config.cancel_grace_ms,
        };

        run_engine(
            &self.store,
            &self.runner,
            req,
            invocation,
            Box::new(OpencodeParser::new()),
            sink,
        )
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

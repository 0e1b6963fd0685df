//! Executor for the claude CLI.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tether_store::{Store, CONTINUE_MARKER};

use crate::env::sanitized_env;
use crate::errors::Result;
use crate::parser::claude::ClaudeParser;
use crate::policy::claude_tools;
use crate::runner::{ProcessRunner, DEFAULT_CANCEL_GRACE_MS};

use super::{
    run_engine, unsafe_mode_now, EngineExecutor, EngineInvocation, EventSink, ExecOutcome,
    ExecRequest,
};

/// Configuration for the claude executor.
#[derive(Clone, Debug)]
pub struct ClaudeExecutorConfig {
    /// Binary name or path.
    pub binary: String,
    /// Idle watchdog limit.
    pub idle_timeout_ms: u64,
    /// Interrupt-to-kill grace.
    pub cancel_grace_ms: u64,
    /// Pass `--fork-session` when resuming a captured session id.
    pub fork_session: bool,
    /// Optional `--disallowedTools` CSV.
    pub disallowed_tools: Option<String>,
    /// Optional `--max-turns`.
    pub max_turns: Option<u32>,
    /// Optional `--max-budget-usd`.
    pub max_budget_usd: Option<f64>,
}

impl Default for ClaudeExecutorConfig {
    fn default() -> Self {
        Self {
            binary: "claude".into(),
            idle_timeout_ms: 180_000,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            fork_session: false,
            disallowed_tools: None,
            max_turns: None,
            max_budget_usd: None,
        }
    }
}

/// Build the claude argv for one run.
#[must_use]
pub fn build_claude_args(
    req: &ExecRequest,
    unsafe_mode: bool,
    config: &ClaudeExecutorConfig,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-p".into(),
        req.prompt.clone(),
        "--output-format".into(),
        "stream-json".into(),
        "--include-partial-messages".into(),
        "--verbose".into(),
    ];

    if let Some(model) = &req.model {
        args.push("--model".into());
        args.push(model.clone());
    }

    match req.session.engine_session_id.as_deref() {
        None => {}
        Some(CONTINUE_MARKER) => args.push("--continue".into()),
        Some(id) => {
            args.push("--resume".into());
            args.push(id.to_string());
            if config.fork_session {
                args.push("--fork-session".into());
            }
        }
    }

    let tools = claude_tools(unsafe_mode);
    args.push("--tools".into());
    args.push(tools.into());
    args.push("--allowedTools".into());
    args.push(tools.into());

    if let Some(disallowed) = &config.disallowed_tools {
        args.push("--disallowedTools".into());
        args.push(disallowed.clone());
    }
    if let Some(max_turns) = config.max_turns {
        args.push("--max-turns".into());
        args.push(max_turns.to_string());
    }
    if let Some(budget) = config.max_budget_usd {
        args.push("--max-budget-usd".into());
        args.push(budget.to_string());
    }

    args
}

/// Executor for `claude -p … --output-format stream-json`.
pub struct ClaudeExecutor {
    store: Arc<Store>,
    runner: Arc<ProcessRunner>,
    config: ClaudeExecutorConfig,
}

impl ClaudeExecutor {
    pub fn new(store: Arc<Store>, runner: Arc<ProcessRunner>, config: ClaudeExecutorConfig) -> Self {
        Self {
            store,
            runner,
            config,
        }
    }
}

#[async_trait]
impl EngineExecutor for ClaudeExecutor {
    async fn execute(&self, req: &ExecRequest, sink: Arc<dyn EventSink>) -> Result<ExecOutcome> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let unsafe_mode = unsafe_mode_now(&self.store, &req.session, now_ms);

        let env: HashMap<String, String> = sanitized_env(std::env::vars());
        let invocation = EngineInvocation {
            command: self.config.binary.clone(),
            args: build_claude_args(req, unsafe_mode, &self.config),
            env,
            idle_timeout: Duration::from_millis(self.config.idle_timeout_ms),
            cancel_grace_ms: self.config.cancel_grace_ms,
        };

        run_engine(
            &self.store,
            &self.runner,
            req,
            invocation,
            Box::new(ClaudeParser::new()),
            sink,
        )
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tether_store::{Project, Provider, Session, SessionStatus};

    fn request(engine_session_id: Option<&str>, model: Option<&str>) -> ExecRequest {
        ExecRequest {
            run_id: "run-1".into(),
            project: Project {
                id: "proj-1".into(),
                name: "P".into(),
                root_path: "/srv/p".into(),
                default_engine: Provider::Claude,
                opencode_attach_url: None,
            },
            session: Session {
                id: "sess-1".into(),
                project_id: "proj-1".into(),
                chat_id: None,
                provider: Provider::Claude,
                engine_session_id: engine_session_id.map(String::from),
                status: SessionStatus::Active,
                prompt: String::new(),
                model: None,
                agent: None,
                created_at: 0,
                updated_at: 0,
            },
            prompt: "fix the bug".into(),
            model: model.map(String::from),
            agent: None,
            files: Vec::new(),
        }
    }

    #[test]
    fn base_args_safe_mode() {
        let args = build_claude_args(&request(None, None), false, &ClaudeExecutorConfig::default());
        assert_eq!(
            args,
            vec![
                "-p",
                "fix the bug",
                "--output-format",
                "stream-json",
                "--include-partial-messages",
                "--verbose",
                "--tools",
                "Read,Glob,Grep",
                "--allowedTools",
                "Read,Glob,Grep",
            ]
        );
    }

    #[test]
    fn unsafe_mode_widens_tools() {
        let args = build_claude_args(&request(None, None), true, &ClaudeExecutorConfig::default());
        let tools_pos = args.iter().position(|a| a == "--tools").unwrap();
        assert_eq!(args[tools_pos + 1], "Bash,Read,Edit,Write,Glob,Grep");
        let allowed_pos = args.iter().position(|a| a == "--allowedTools").unwrap();
        assert_eq!(args[allowed_pos + 1], "Bash,Read,Edit,Write,Glob,Grep");
    }

    #[test]
    fn model_flag() {
        let args = build_claude_args(
            &request(None, Some("claude-sonnet-4-5")),
            false,
            &ClaudeExecutorConfig::default(),
        );
        let pos = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[pos + 1], "claude-sonnet-4-5");
    }

    #[test]
    fn continue_marker_maps_to_continue_flag() {
        let args = build_claude_args(
            &request(Some(CONTINUE_MARKER), None),
            false,
            &ClaudeExecutorConfig::default(),
        );
        assert!(args.contains(&"--continue".to_string()));
        assert!(!args.contains(&"--resume".to_string()));
    }

    #[test]
    fn captured_id_maps_to_resume() {
        let args = build_claude_args(
            &request(Some("ses_abc"), None),
            false,
            &ClaudeExecutorConfig::default(),
        );
        let pos = args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(args[pos + 1], "ses_abc");
        assert!(!args.contains(&"--fork-session".to_string()));
    }

    #[test]
    fn fork_session_flag() {
        let config = ClaudeExecutorConfig {
            fork_session: true,
            ..Default::default()
        };
        let args = build_claude_args(&request(Some("ses_abc"), None), false, &config);
        assert!(args.contains(&"--fork-session".to_string()));
    }

    #[test]
    fn optional_limits() {
        let config = ClaudeExecutorConfig {
            disallowed_tools: Some("WebSearch".into()),
            max_turns: Some(25),
            max_budget_usd: Some(2.5),
            ..Default::default()
        };
        let args = build_claude_args(&request(None, None), false, &config);
        let d = args.iter().position(|a| a == "--disallowedTools").unwrap();
        assert_eq!(args[d + 1], "WebSearch");
        let t = args.iter().position(|a| a == "--max-turns").unwrap();
        assert_eq!(args[t + 1], "25");
        let b = args.iter().position(|a| a == "--max-budget-usd").unwrap();
        assert_eq!(args[b + 1], "2.5");
    }

    #[test]
    fn default_idle_timeout_is_three_minutes() {
        assert_eq!(ClaudeExecutorConfig::default().idle_timeout_ms, 180_000);
    }
}

//! Engine executors.
//!
//! An executor composes a parser and the process runner into one run: it
//! builds the argv and environment for its engine, spawns the CLI in the
//! project root, feeds every stdout chunk through the parser, pushes each
//! normalized event into the orchestrator's sink (persist, then stream),
//! and returns a terminal outcome.
//!
//! Two cancellation sources besides an engine exit: an idle watchdog (no
//! stdout/stderr activity for the engine's idle limit — surfaces as `error`,
//! no user cancel was recorded) and a 500 ms poll against the store that
//! notices externally-cancelled runs.

pub mod claude;
pub mod opencode;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use tether_core::{EngineEvent, RunStatus};
use tether_store::{Project, RunState, Session, Store};

use crate::errors::{EngineError, Result};
use crate::parser::EngineParser;
use crate::runner::{LifecycleEvent, ProcessEvents, ProcessRunner, StartParams};

pub use claude::{ClaudeExecutor, ClaudeExecutorConfig};
pub use opencode::{OpencodeExecutor, OpencodeExecutorConfig};

/// Cap on the retained stderr tail.
const STDERR_CAP_BYTES: usize = 10 * 1024;

/// How often the executor checks the store for an external cancel.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One run handed to an executor.
#[derive(Clone, Debug)]
pub struct ExecRequest {
    pub run_id: String,
    pub project: Project,
    pub session: Session,
    pub prompt: String,
    pub model: Option<String>,
    /// OpenCode agent name.
    pub agent: Option<String>,
    /// Paths attached to the prompt (OpenCode `-f`).
    pub files: Vec<String>,
}

/// Terminal outcome of one execution.
#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub exit_status: RunStatus,
    pub engine_session_id: Option<String>,
    pub bytes_out: u64,
    pub malformed_lines: u64,
}

/// Receives each normalized event in arrival order. The orchestrator's sink
/// persists before forwarding to the streamer.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: EngineEvent) -> Result<()>;
}

/// An engine executor.
#[async_trait]
pub trait EngineExecutor: Send + Sync {
    /// Execute one run, feeding events into `sink`.
    async fn execute(&self, req: &ExecRequest, sink: Arc<dyn EventSink>) -> Result<ExecOutcome>;
}

/// Everything the shared run loop needs, prepared by the engine-specific
/// executor.
pub(crate) struct EngineInvocation {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub idle_timeout: Duration,
    pub cancel_grace_ms: u64,
}

/// Whether the chat that owns this session is inside its unsafe window.
pub(crate) fn unsafe_mode_now(store: &Store, session: &Session, now_ms: i64) -> bool {
    let Some(chat_id) = session.chat_id.as_deref() else {
        return false;
    };
    match store.get_chat_by_id(chat_id) {
        Ok(Some(chat)) => chat.unsafe_until.is_some_and(|until| until > now_ms),
        Ok(None) => false,
        Err(e) => {
            warn!(chat_id, error = %e, "unsafe lookup failed, staying safe");
            false
        }
    }
}

/// Stream adapter between the process runner and the parser/sink.
struct StreamAdapter {
    parser: Arc<tokio::sync::Mutex<Box<dyn EngineParser>>>,
    sink: Arc<dyn EventSink>,
    stderr_tail: Mutex<Vec<u8>>,
    last_activity: Mutex<Instant>,
    bytes_out: AtomicU64,
    error_event_seen: AtomicBool,
    sink_failed: AtomicBool,
    sink_error: Mutex<Option<String>>,
}

impl StreamAdapter {
    fn new(
        parser: Arc<tokio::sync::Mutex<Box<dyn EngineParser>>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            parser,
            sink,
            stderr_tail: Mutex::new(Vec::new()),
            last_activity: Mutex::new(Instant::now()),
            bytes_out: AtomicU64::new(0),
            error_event_seen: AtomicBool::new(false),
            sink_failed: AtomicBool::new(false),
            sink_error: Mutex::new(None),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    fn stderr_tail_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr_tail.lock()).into_owned()
    }

    async fn forward(&self, event: EngineEvent) {
        if self.sink_failed.load(Ordering::SeqCst) {
            return;
        }
        if matches!(event, EngineEvent::Error { .. }) {
            self.error_event_seen.store(true, Ordering::SeqCst);
        }
        if let Err(e) = self.sink.on_event(event).await {
            self.sink_failed.store(true, Ordering::SeqCst);
            *self.sink_error.lock() = Some(e.to_string());
        }
    }
}

#[async_trait]
impl ProcessEvents for StreamAdapter {
    async fn on_stdout(&self, chunk: &[u8]) {
        self.touch();
        let _ = self
            .bytes_out
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);

        let events = self.parser.lock().await.push(chunk);
        for event in events {
            self.forward(event).await;
        }
    }

    async fn on_stderr(&self, chunk: &[u8]) {
        self.touch();
        let mut tail = self.stderr_tail.lock();
        tail.extend_from_slice(chunk);
        if tail.len() > STDERR_CAP_BYTES {
            let excess = tail.len() - STDERR_CAP_BYTES;
            let _ = tail.drain(..excess);
        }
    }

    async fn on_lifecycle(&self, event: LifecycleEvent) {
        debug!(?event, "process lifecycle");
    }
}

/// The shared run loop. See the module docs for the shape.
pub(crate) async fn run_engine(
    store: &Arc<Store>,
    runner: &Arc<ProcessRunner>,
    req: &ExecRequest,
    invocation: EngineInvocation,
    parser: Box<dyn EngineParser>,
    sink: Arc<dyn EventSink>,
) -> Result<ExecOutcome> {
    let parser = Arc::new(tokio::sync::Mutex::new(parser));
    let adapter = Arc::new(StreamAdapter::new(parser.clone(), sink.clone()));

    sink.on_event(EngineEvent::RunStarted {
        run_id: Some(req.run_id.clone()),
        timestamp: Some(chrono::Utc::now().to_rfc3339()),
    })
    .await?;

    let handle = runner
        .start(
            StartParams {
                session_key: req.session.id.clone(),
                command: invocation.command,
                args: invocation.args,
                cwd: PathBuf::from(&req.project.root_path),
                env: invocation.env,
                cancel_grace_ms: invocation.cancel_grace_ms,
            },
            adapter.clone(),
        )
        .await?;

    let canceller = handle.canceller();
    let idle_tripped = Arc::new(AtomicBool::new(false));

    let watchdog = {
        let adapter = adapter.clone();
        let canceller = canceller.clone();
        let idle_tripped = idle_tripped.clone();
        let limit = invocation.idle_timeout;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                let _ = tick.tick().await;
                if adapter.idle_for() > limit {
                    warn!(idle_ms = limit.as_millis() as u64, "idle watchdog tripped");
                    idle_tripped.store(true, Ordering::SeqCst);
                    canceller.cancel();
                    break;
                }
            }
        })
    };

    let cancel_poll = {
        let store = store.clone();
        let run_id = req.run_id.clone();
        let adapter = adapter.clone();
        let canceller = canceller.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(CANCEL_POLL_INTERVAL);
            loop {
                let _ = tick.tick().await;
                if adapter.sink_failed.load(Ordering::SeqCst) {
                    canceller.cancel();
                    break;
                }
                match store.get_run(&run_id) {
                    Ok(Some(run)) if run.status == RunState::Cancelled => {
                        debug!(run_id, "store reports run cancelled");
                        canceller.cancel();
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(run_id, error = %e, "cancel poll failed"),
                }
            }
        })
    };

    let result = handle.wait().await;
    watchdog.abort();
    cancel_poll.abort();
    let result = result?;

    let idle = idle_tripped.load(Ordering::SeqCst);
    let exit_status = if idle {
        RunStatus::Error
    } else if result.cancelled {
        RunStatus::Cancelled
    } else {
        match result.exit_code {
            Some(0) => RunStatus::Success,
            _ => RunStatus::Error,
        }
    };

    // Flush the parser tail, synthesizing the terminal event if the engine
    // never produced one. A synthesized stderr error goes before the
    // terminal event, and only when the stream produced no error itself.
    let residual = parser.lock().await.finish(exit_status);
    let (terminal, rest): (Vec<_>, Vec<_>) =
        residual.into_iter().partition(EngineEvent::is_terminal);

    for event in rest {
        adapter.forward(event).await;
    }
    if exit_status == RunStatus::Error && !adapter.error_event_seen.load(Ordering::SeqCst) {
        let tail = adapter.stderr_tail_string();
        let message = if tail.trim().is_empty() {
            if idle {
                "engine produced no output before the idle timeout".to_string()
            } else {
                format!(
                    "engine exited with {}",
                    result
                        .exit_code
                        .map_or_else(|| "no exit code".to_string(), |c| format!("code {c}"))
                )
            }
        } else {
            tether_core::text::truncate_str(tail.trim(), 2000)
        };
        adapter.forward(EngineEvent::Error {
            message,
            code: None,
        })
        .await;
    }
    for event in terminal {
        adapter.forward(event).await;
    }

    if let Some(message) = adapter.sink_error.lock().take() {
        return Err(EngineError::Sink(message));
    }

    let (engine_session_id, malformed_lines) = {
        let parser = parser.lock().await;
        (parser.engine_session_id(), parser.malformed_lines())
    };

    // Persist a newly captured engine session id.
    if let Some(id) = engine_session_id.as_deref() {
        if req.session.engine_session_id.as_deref() != Some(id) {
            let _ = store.set_session_engine_id(&req.session.id, Some(id))?;
        }
    }

    Ok(ExecOutcome {
        exit_status,
        engine_session_id,
        bytes_out: adapter.bytes_out.load(Ordering::Relaxed),
        malformed_lines,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::opencode::OpencodeParser;
    use tether_store::{
        new_in_memory, run_migrations, ConnectionConfig, CreateSessionParams, Provider,
    };

    fn setup_store() -> Arc<Store> {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        Arc::new(Store::new(pool))
    }

    struct CollectSink {
        events: Mutex<Vec<EngineEvent>>,
    }

    #[async_trait]
    impl EventSink for CollectSink {
        async fn on_event(&self, event: EngineEvent) -> Result<()> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    fn request(store: &Store) -> ExecRequest {
        let session = store
            .create_session(&CreateSessionParams {
                project_id: "proj-1",
                chat_id: None,
                provider: Provider::Opencode,
                prompt: "hello",
                model: None,
                agent: None,
            })
            .unwrap();
        let outcome = store
            .enqueue_run("proj-1", &session.id, "key-1", "hello", 0)
            .unwrap();
        ExecRequest {
            run_id: outcome.run.id,
            project: Project {
                id: "proj-1".into(),
                name: "P".into(),
                root_path: std::env::temp_dir().to_string_lossy().into_owned(),
                default_engine: Provider::Opencode,
                opencode_attach_url: None,
            },
            session,
            prompt: "hello".into(),
            model: None,
            agent: None,
            files: Vec::new(),
        }
    }

    fn fake_engine_invocation(script: &str, idle_secs: u64) -> EngineInvocation {
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        EngineInvocation {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env,
            idle_timeout: Duration::from_secs(idle_secs),
            cancel_grace_ms: 500,
        }
    }

    #[tokio::test]
    async fn happy_path_events_flow_through_sink() {
        let store = setup_store();
        let runner = Arc::new(ProcessRunner::new());
        let req = request(&store);
        let sink = Arc::new(CollectSink {
            events: Mutex::new(Vec::new()),
        });

        let script = r#"printf '%s\n' '{"type":"started","sessionID":"oc_7"}' '{"type":"text","text":"hi"}' '{"type":"finished"}'"#;
        let outcome = run_engine(
            &store,
            &runner,
            &req,
            fake_engine_invocation(script, 30),
            Box::new(OpencodeParser::new()),
            sink.clone(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_status, RunStatus::Success);
        assert_eq!(outcome.engine_session_id.as_deref(), Some("oc_7"));
        assert!(outcome.bytes_out > 0);

        let types: Vec<&str> = sink
            .events
            .lock()
            .iter()
            .map(EngineEvent::event_type)
            .collect();
        // Synthetic run_started first, then the engine's own stream.
        assert_eq!(
            types,
            vec!["run_started", "run_started", "text_delta", "run_finished"]
        );

        // Captured session id was persisted.
        let session = store.get_session(&req.session.id).unwrap().unwrap();
        assert_eq!(session.engine_session_id.as_deref(), Some("oc_7"));
    }

    #[tokio::test]
    async fn engine_failure_synthesizes_error_from_stderr() {
        let store = setup_store();
        let runner = Arc::new(ProcessRunner::new());
        let req = request(&store);
        let sink = Arc::new(CollectSink {
            events: Mutex::new(Vec::new()),
        });

        let script = "echo 'fatal: credentials rejected' >&2; exit 2";
        let outcome = run_engine(
            &store,
            &runner,
            &req,
            fake_engine_invocation(script, 30),
            Box::new(OpencodeParser::new()),
            sink.clone(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_status, RunStatus::Error);
        let events = sink.events.lock();
        let error = events
            .iter()
            .find_map(|e| match e {
                EngineEvent::Error { message, .. } => Some(message.clone()),
                _ => None,
            })
            .unwrap();
        assert!(error.contains("credentials rejected"));
        // Error precedes the terminal event.
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn external_cancel_detected_by_poll() {
        let store = setup_store();
        let runner = Arc::new(ProcessRunner::new());
        let req = request(&store);
        let sink = Arc::new(CollectSink {
            events: Mutex::new(Vec::new()),
        });

        // Cancel the run in the store shortly after start.
        {
            let store = store.clone();
            let run_id = req.run_id.clone();
            let _ = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let _ = store.cancel_run(&run_id, 1_000).unwrap();
            });
        }

        let outcome = run_engine(
            &store,
            &runner,
            &req,
            fake_engine_invocation("sleep 30", 60),
            Box::new(OpencodeParser::new()),
            sink.clone(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_status, RunStatus::Cancelled);
        assert!(sink
            .events
            .lock()
            .iter()
            .any(|e| matches!(e, EngineEvent::RunFinished { status: RunStatus::Cancelled })));
    }

    #[tokio::test]
    async fn idle_watchdog_yields_error_not_cancelled() {
        let store = setup_store();
        let runner = Arc::new(ProcessRunner::new());
        let req = request(&store);
        let sink = Arc::new(CollectSink {
            events: Mutex::new(Vec::new()),
        });

        // Engine prints nothing and sleeps past the 1 s idle limit.
        let outcome = run_engine(
            &store,
            &runner,
            &req,
            fake_engine_invocation("sleep 30", 1),
            Box::new(OpencodeParser::new()),
            sink.clone(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_status, RunStatus::Error);
    }

    #[tokio::test]
    async fn unsafe_mode_reads_chat_deadline() {
        let store = setup_store();
        let chat = store.get_or_create_chat(100, Some("proj-1")).unwrap();
        let session = store
            .create_session(&CreateSessionParams {
                project_id: "proj-1",
                chat_id: Some(&chat.id),
                provider: Provider::Claude,
                prompt: "p",
                model: None,
                agent: None,
            })
            .unwrap();

        assert!(!unsafe_mode_now(&store, &session, 1_000));
        let _ = store.set_chat_unsafe_until(100, Some(2_000)).unwrap();
        assert!(unsafe_mode_now(&store, &session, 1_000));
        assert!(!unsafe_mode_now(&store, &session, 2_000));
    }
}

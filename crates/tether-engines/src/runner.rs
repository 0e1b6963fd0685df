//! Child-process runner.
//!
//! Spawns one engine CLI per run and owns its lifecycle:
//!
//! - **Single-flight**: at most one live process per session key. A second
//!   `start` for the same key fails with
//!   [`EngineError::SingleFlightSession`]; the slot frees on exit, including
//!   spawn failure.
//! - **Back-pressure**: stdout/stderr are read in chunks and each chunk is
//!   awaited through the [`ProcessEvents`] callback before the next read, so
//!   a slow parse/persist path pauses the stream instead of buffering it.
//! - **Cancellation**: the first `cancel()` sends SIGINT; if the process has
//!   not exited after the grace period it is force-killed. Later `cancel()`
//!   calls are no-ops.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{EngineError, Result};

/// Default grace between interrupt and force-kill.
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 1000;

const READ_BUF_SIZE: usize = 8192;

/// Parameters for starting a child process.
#[derive(Clone, Debug)]
pub struct StartParams {
    /// Single-flight key (the session id).
    pub session_key: String,
    /// Binary to execute.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory (the project root).
    pub cwd: PathBuf,
    /// Full child environment (the runner does not inherit).
    pub env: HashMap<String, String>,
    /// Milliseconds between interrupt and force-kill.
    pub cancel_grace_ms: u64,
}

/// Lifecycle notifications, emitted in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Starting,
    Running { pid: u32 },
    Cancelling,
    Killing,
    Exited {
        exit_code: Option<i32>,
        signal: Option<String>,
    },
}

/// Consumer of process output and lifecycle events.
///
/// Callbacks may suspend; the corresponding stream stays paused until the
/// callback resolves.
#[async_trait]
pub trait ProcessEvents: Send + Sync {
    async fn on_stdout(&self, chunk: &[u8]);
    async fn on_stderr(&self, chunk: &[u8]);
    async fn on_lifecycle(&self, event: LifecycleEvent);
}

/// Terminal disposition of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Exited zero without a cancel.
    Completed,
    /// Exited non-zero (or failed to report) without a cancel.
    Failed,
    /// `cancel()` was invoked before exit.
    Cancelled,
}

/// Final result of a process.
#[derive(Clone, Debug)]
pub struct ProcessResult {
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    /// Name of the terminating signal, when there was one.
    pub signal: Option<String>,
    /// True iff `cancel()` was invoked on the handle.
    pub cancelled: bool,
}

/// Shared cancel state between handle, runner, and supervise task.
#[derive(Debug)]
struct CancelState {
    token: CancellationToken,
    requested: AtomicBool,
}

impl CancelState {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            requested: AtomicBool::new(false),
        }
    }

    /// First call cancels; the rest are no-ops.
    fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.token.cancel();
        }
    }

    fn was_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Clonable cancel trigger detached from the handle, for watchdogs and
/// polling tasks that outlive the `wait` call.
#[derive(Clone)]
pub struct ProcessCanceller(Arc<CancelState>);

impl ProcessCanceller {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.request();
    }
}

/// Handle to a live process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    cancel: Arc<CancelState>,
    result_rx: oneshot::Receiver<ProcessResult>,
}

impl ProcessHandle {
    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Request cancellation (interrupt, then force-kill after the grace).
    /// Idempotent.
    pub fn cancel(&self) {
        self.cancel.request();
    }

    /// A detached cancel trigger.
    #[must_use]
    pub fn canceller(&self) -> ProcessCanceller {
        ProcessCanceller(self.cancel.clone())
    }

    /// Await the terminal result.
    pub async fn wait(self) -> Result<ProcessResult> {
        self.result_rx
            .await
            .map_err(|_| EngineError::Internal("process supervisor dropped".into()))
    }
}

/// Spawns and supervises engine child processes.
pub struct ProcessRunner {
    active: Arc<Mutex<HashMap<String, Arc<CancelState>>>>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live processes.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Cancel every live process.
    pub fn cancel_all(&self) {
        let active = self.active.lock();
        for state in active.values() {
            state.request();
        }
    }

    /// Spawn a process. Spawn failures surface synchronously; everything
    /// after the spawn arrives through [`ProcessEvents`] and the handle.
    pub async fn start(
        &self,
        params: StartParams,
        events: Arc<dyn ProcessEvents>,
    ) -> Result<ProcessHandle> {
        let cancel = Arc::new(CancelState::new());
        {
            let mut active = self.active.lock();
            if active.contains_key(&params.session_key) {
                return Err(EngineError::SingleFlightSession(params.session_key));
            }
            let _ = active.insert(params.session_key.clone(), cancel.clone());
        }

        events.on_lifecycle(LifecycleEvent::Starting).await;

        let mut cmd = Command::new(&params.command);
        let _ = cmd
            .args(&params.args)
            .current_dir(&params.cwd)
            .env_clear()
            .envs(&params.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let _ = self.active.lock().remove(&params.session_key);
                return Err(EngineError::Spawn {
                    command: params.command,
                    source,
                });
            }
        };

        let Some(pid) = child.id() else {
            let _ = self.active.lock().remove(&params.session_key);
            return Err(EngineError::Internal("spawned child has no pid".into()));
        };

        events.on_lifecycle(LifecycleEvent::Running { pid }).await;
        debug!(pid, command = %params.command, "process running");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = {
            let events = events.clone();
            tokio::spawn(async move {
                let Some(mut stream) = stdout else { return };
                let mut buf = [0u8; READ_BUF_SIZE];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => events.on_stdout(&buf[..n]).await,
                    }
                }
            })
        };
        let stderr_task = {
            let events = events.clone();
            tokio::spawn(async move {
                let Some(mut stream) = stderr else { return };
                let mut buf = [0u8; READ_BUF_SIZE];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => events.on_stderr(&buf[..n]).await,
                    }
                }
            })
        };

        let (result_tx, result_rx) = oneshot::channel();
        let active = self.active.clone();
        let session_key = params.session_key.clone();
        let grace = Duration::from_millis(params.cancel_grace_ms);
        let supervise_cancel = cancel.clone();

        let _supervisor = tokio::spawn(async move {
            let wait_status = tokio::select! {
                status = child.wait() => status,
                () = supervise_cancel.token.cancelled() => {
                    events.on_lifecycle(LifecycleEvent::Cancelling).await;
                    interrupt(pid);
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(status) => status,
                        Err(_) => {
                            events.on_lifecycle(LifecycleEvent::Killing).await;
                            warn!(pid, "process ignored interrupt, force-killing");
                            let _ = child.start_kill();
                            child.wait().await
                        }
                    }
                }
            };

            // Readers end at EOF once the process is gone.
            let _ = stdout_task.await;
            let _ = stderr_task.await;

            let (exit_code, signal) = match &wait_status {
                Ok(status) => (status.code(), signal_name(status)),
                Err(e) => {
                    warn!(pid, error = %e, "wait failed");
                    (None, None)
                }
            };

            let cancelled = supervise_cancel.was_requested();
            let status = if cancelled {
                ProcessStatus::Cancelled
            } else if exit_code == Some(0) {
                ProcessStatus::Completed
            } else {
                ProcessStatus::Failed
            };

            events
                .on_lifecycle(LifecycleEvent::Exited {
                    exit_code,
                    signal: signal.clone(),
                })
                .await;

            let _ = active.lock().remove(&session_key);
            let _ = result_tx.send(ProcessResult {
                status,
                exit_code,
                signal,
                cancelled,
            });
        });

        Ok(ProcessHandle {
            pid,
            cancel,
            result_rx,
        })
    }
}

/// Deliver SIGINT to a pid; delivery failure is not actionable here.
fn interrupt(pid: u32) {
    #[allow(clippy::cast_possible_wrap)]
    let target = Pid::from_raw(pid as i32);
    if let Err(e) = kill(target, Signal::SIGINT) {
        warn!(pid, error = %e, "failed to deliver interrupt");
    }
}

/// Name of the terminating signal, unix only.
fn signal_name(status: &std::process::ExitStatus) -> Option<String> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|n| match n {
            2 => "SIGINT".to_string(),
            9 => "SIGKILL".to_string(),
            15 => "SIGTERM".to_string(),
            other => format!("SIG{other}"),
        })
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects output and lifecycle events for assertions.
    #[derive(Default)]
    struct Collector {
        stdout: Mutex<Vec<u8>>,
        stderr: Mutex<Vec<u8>>,
        lifecycle: Mutex<Vec<LifecycleEvent>>,
    }

    impl Collector {
        fn stdout_string(&self) -> String {
            String::from_utf8_lossy(&self.stdout.lock()).into_owned()
        }
        fn lifecycle_events(&self) -> Vec<LifecycleEvent> {
            self.lifecycle.lock().clone()
        }
        fn has(&self, matcher: impl Fn(&LifecycleEvent) -> bool) -> bool {
            self.lifecycle.lock().iter().any(|e| matcher(e))
        }
    }

    #[async_trait]
    impl ProcessEvents for Collector {
        async fn on_stdout(&self, chunk: &[u8]) {
            self.stdout.lock().extend_from_slice(chunk);
        }
        async fn on_stderr(&self, chunk: &[u8]) {
            self.stderr.lock().extend_from_slice(chunk);
        }
        async fn on_lifecycle(&self, event: LifecycleEvent) {
            self.lifecycle.lock().push(event);
        }
    }

    fn sh(session_key: &str, script: &str, grace_ms: u64) -> StartParams {
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        StartParams {
            session_key: session_key.to_string(),
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: std::env::temp_dir(),
            env,
            cancel_grace_ms: grace_ms,
        }
    }

    #[tokio::test]
    async fn echo_completes_with_output() {
        let runner = ProcessRunner::new();
        let collector = Arc::new(Collector::default());
        let handle = runner
            .start(sh("s1", "echo hello", 1000), collector.clone())
            .await
            .unwrap();

        let result = handle.wait().await.unwrap();
        assert_eq!(result.status, ProcessStatus::Completed);
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.cancelled);
        assert_eq!(collector.stdout_string().trim(), "hello");

        let lifecycle = collector.lifecycle_events();
        assert_eq!(lifecycle[0], LifecycleEvent::Starting);
        assert!(matches!(lifecycle[1], LifecycleEvent::Running { .. }));
        assert!(matches!(
            lifecycle.last().unwrap(),
            LifecycleEvent::Exited {
                exit_code: Some(0),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let runner = ProcessRunner::new();
        let handle = runner
            .start(sh("s1", "exit 3", 1000), Arc::new(Collector::default()))
            .await
            .unwrap();
        let result = handle.wait().await.unwrap();
        assert_eq!(result.status, ProcessStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn stderr_captured() {
        let runner = ProcessRunner::new();
        let collector = Arc::new(Collector::default());
        let handle = runner
            .start(sh("s1", "echo oops >&2", 1000), collector.clone())
            .await
            .unwrap();
        let _ = handle.wait().await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&collector.stderr.lock()).trim(),
            "oops"
        );
    }

    #[tokio::test]
    async fn spawn_failure_is_synchronous_and_frees_slot() {
        let runner = ProcessRunner::new();
        let mut params = sh("s1", "true", 1000);
        params.command = "/nonexistent/binary".to_string();

        let err = runner
            .start(params, Arc::new(Collector::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
        assert_eq!(runner.active_count(), 0);

        // Slot is free — a real process starts fine under the same key.
        let handle = runner
            .start(sh("s1", "true", 1000), Arc::new(Collector::default()))
            .await
            .unwrap();
        let _ = handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn single_flight_per_session_key() {
        let runner = ProcessRunner::new();
        let first = runner
            .start(sh("s1", "sleep 10", 100), Arc::new(Collector::default()))
            .await
            .unwrap();

        let err = runner
            .start(sh("s1", "echo hi", 100), Arc::new(Collector::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SingleFlightSession(key) if key == "s1"));

        // A different key is fine.
        let other = runner
            .start(sh("s2", "true", 100), Arc::new(Collector::default()))
            .await
            .unwrap();
        let _ = other.wait().await.unwrap();

        first.cancel();
        let _ = first.wait().await.unwrap();
        assert_eq!(runner.active_count(), 0);
    }

    #[tokio::test]
    async fn slot_freed_after_exit() {
        let runner = ProcessRunner::new();
        let handle = runner
            .start(sh("s1", "true", 1000), Arc::new(Collector::default()))
            .await
            .unwrap();
        let _ = handle.wait().await.unwrap();

        let again = runner
            .start(sh("s1", "true", 1000), Arc::new(Collector::default()))
            .await
            .unwrap();
        let _ = again.wait().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_interruptible_process() {
        let runner = ProcessRunner::new();
        let collector = Arc::new(Collector::default());
        let handle = runner
            .start(sh("s1", "sleep 30", 2000), collector.clone())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
        handle.cancel(); // idempotent

        let result = handle.wait().await.unwrap();
        assert_eq!(result.status, ProcessStatus::Cancelled);
        assert!(result.cancelled);
        assert!(collector.has(|e| matches!(e, LifecycleEvent::Cancelling)));
        // Interrupt sufficed; no force-kill.
        assert!(!collector.has(|e| matches!(e, LifecycleEvent::Killing)));
    }

    #[tokio::test]
    async fn cancel_escalates_to_kill_when_interrupt_ignored() {
        let runner = ProcessRunner::new();
        let collector = Arc::new(Collector::default());
        let handle = runner
            .start(
                sh("s1", "trap '' INT; sleep 30", 200),
                collector.clone(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();

        let result = handle.wait().await.unwrap();
        assert_eq!(result.status, ProcessStatus::Cancelled);
        assert!(result.cancelled);
        assert_eq!(result.signal.as_deref(), Some("SIGKILL"));
        assert!(collector.has(|e| matches!(e, LifecycleEvent::Cancelling)));
        assert!(collector.has(|e| matches!(e, LifecycleEvent::Killing)));
    }

    #[tokio::test]
    async fn cancel_all_cancels_every_handle() {
        let runner = ProcessRunner::new();
        let h1 = runner
            .start(sh("s1", "sleep 30", 100), Arc::new(Collector::default()))
            .await
            .unwrap();
        let h2 = runner
            .start(sh("s2", "sleep 30", 100), Arc::new(Collector::default()))
            .await
            .unwrap();

        runner.cancel_all();

        assert_eq!(h1.wait().await.unwrap().status, ProcessStatus::Cancelled);
        assert_eq!(h2.wait().await.unwrap().status, ProcessStatus::Cancelled);
        assert_eq!(runner.active_count(), 0);
    }

    #[tokio::test]
    async fn backpressure_pauses_stream_during_slow_callback() {
        /// Sink whose stdout callback sleeps, proving reads serialize.
        struct SlowSink {
            chunks: Mutex<Vec<usize>>,
            in_callback: AtomicBool,
            overlapped: AtomicBool,
        }

        #[async_trait]
        impl ProcessEvents for SlowSink {
            async fn on_stdout(&self, chunk: &[u8]) {
                if self.in_callback.swap(true, Ordering::SeqCst) {
                    self.overlapped.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.chunks.lock().push(chunk.len());
                self.in_callback.store(false, Ordering::SeqCst);
            }
            async fn on_stderr(&self, _chunk: &[u8]) {}
            async fn on_lifecycle(&self, _event: LifecycleEvent) {}
        }

        let sink = Arc::new(SlowSink {
            chunks: Mutex::new(Vec::new()),
            in_callback: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
        });

        let runner = ProcessRunner::new();
        let handle = runner
            .start(
                sh("s1", "for i in 1 2 3 4 5; do echo line$i; done", 1000),
                sink.clone(),
            )
            .await
            .unwrap();
        let _ = handle.wait().await.unwrap();

        assert!(!sink.overlapped.load(Ordering::SeqCst));
        assert!(!sink.chunks.lock().is_empty());
    }
}

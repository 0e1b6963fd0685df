//! # tetherd
//!
//! The tether daemon: wires the store, engines, runtime, Telegram surface,
//! and dashboard together and runs them until a signal arrives.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use tether_engines::executor::{ClaudeExecutorConfig, OpencodeExecutorConfig};
use tether_engines::{ClaudeExecutor, OpencodeExecutor, ProcessRunner};
use tether_runtime::{ExecutorRegistry, RunOrchestrator, WorkerPool, WorkerPoolConfig};
use tether_server::{DashboardConfig, DashboardServer, ShutdownCoordinator};
use tether_settings::Settings;
use tether_store::Store;
use tether_telegram::transport::parse_update;
use tether_telegram::{
    Action, ChatCommandHandler, HandlerConfig, MessageTransport, RunStreamer, TelegramTransport,
};

/// Telegram remote control for coding-agent CLIs.
#[derive(Parser, Debug)]
#[command(name = "tetherd", about = "Telegram remote control for claude and opencode")]
struct Cli {
    /// Override DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override PROJECTS_CONFIG_PATH.
    #[arg(long)]
    projects_config: Option<PathBuf>,

    /// Override DASHBOARD_PORT.
    #[arg(long)]
    dashboard_port: Option<u16>,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut settings = tether_settings::load_settings().context("loading settings")?;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }
    if let Some(path) = cli.projects_config {
        settings.projects_config_path = path;
    }
    if let Some(port) = cli.dashboard_port {
        settings.dashboard_port = port;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?
        .block_on(run(settings))
}

async fn run(settings: Settings) -> Result<()> {
    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("creating data dir {}", settings.data_dir.display()))?;
    std::fs::create_dir_all(settings.files_dir()).context("creating files dir")?;

    // Store.
    let db_path = settings.db_path();
    let pool = tether_store::new_file(
        db_path.to_str().context("db path is not utf-8")?,
        &tether_store::ConnectionConfig::default(),
    )
    .context("opening database")?;
    {
        let conn = pool.get().context("getting migration connection")?;
        let applied = tether_store::run_migrations(&conn).context("running migrations")?;
        info!(applied, db = %db_path.display(), "database ready");
    }
    let store = Arc::new(Store::new(pool));

    // Projects.
    match tether_settings::load_projects(&settings.projects_config_path) {
        Ok(projects) => {
            let outcome = store.sync_projects(&projects).context("syncing projects")?;
            info!(
                upserted = outcome.upserted,
                deleted = outcome.deleted,
                "projects synced"
            );
        }
        Err(e) => warn!(
            path = %settings.projects_config_path.display(),
            error = %e,
            "projects file not loaded; starting with the stored list"
        ),
    }

    let kill_switch = Arc::new(AtomicBool::new(settings.kill_switch_disable_runs));
    if kill_switch.load(Ordering::SeqCst) {
        warn!("kill switch is ON: new runs are disabled");
    }

    // Engines.
    let runner = Arc::new(ProcessRunner::new());
    let claude = Arc::new(ClaudeExecutor::new(
        store.clone(),
        runner.clone(),
        ClaudeExecutorConfig::default(),
    ));
    let opencode = Arc::new(OpencodeExecutor::new(
        store.clone(),
        runner.clone(),
        OpencodeExecutorConfig::default(),
    ));

    // Chat surface.
    let transport = Arc::new(TelegramTransport::new(&settings.telegram_bot_token));
    let streamer = Arc::new(RunStreamer::new(transport.clone(), store.clone()));

    // Runtime.
    let orchestrator = Arc::new(RunOrchestrator::new(
        store.clone(),
        ExecutorRegistry::new(claude, opencode),
        streamer,
        kill_switch.clone(),
    ));
    let handler = Arc::new(ChatCommandHandler::new(
        store.clone(),
        orchestrator.clone(),
        HandlerConfig {
            owner_user_id: settings.telegram_owner_user_id,
            projects_config_path: settings.projects_config_path.clone(),
        },
        kill_switch,
    ));

    let shutdown = Arc::new(ShutdownCoordinator::new());

    // Worker pool.
    let pool = Arc::new(WorkerPool::new(
        orchestrator,
        store.clone(),
        runner,
        WorkerPoolConfig::default(),
        shutdown.token(),
    ));
    shutdown.register_task(tokio::spawn(pool.run()));

    // Dashboard.
    let metrics_handle = tether_server::metrics::install_recorder();
    let dashboard = DashboardServer::new(
        DashboardConfig {
            host: settings.dashboard_bind_host.clone(),
            port: settings.dashboard_port,
            basic_auth_user: settings.dashboard_basic_auth_user.clone(),
            basic_auth_pass: settings.dashboard_basic_auth_pass.clone(),
        },
        store.clone(),
        metrics_handle,
        shutdown.clone(),
    );
    let (_addr, dashboard_task) = dashboard.listen().await.context("binding dashboard")?;
    shutdown.register_task(dashboard_task);

    // Telegram long-poll loop.
    shutdown.register_task(tokio::spawn(poll_updates(
        transport,
        handler,
        shutdown.token(),
    )));

    info!("tetherd started");
    wait_for_signal().await;
    info!("signal received, shutting down");
    shutdown
        .graceful_shutdown(Some(std::time::Duration::from_secs(10)))
        .await;
    Ok(())
}

/// Long-poll Telegram and feed the handler.
async fn poll_updates(
    transport: Arc<TelegramTransport>,
    handler: Arc<ChatCommandHandler>,
    token: tokio_util::sync::CancellationToken,
) {
    let mut offset: i64 = 0;
    loop {
        let updates = tokio::select! {
            result = transport.get_updates(offset, 30) => result,
            () = token.cancelled() => break,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                error!(error = %e, "getUpdates failed");
                tokio::select! {
                    () = tokio::time::sleep(std::time::Duration::from_secs(3)) => continue,
                    () = token.cancelled() => break,
                }
            }
        };

        for raw in updates {
            if let Some(id) = raw.get("update_id").and_then(serde_json::Value::as_i64) {
                offset = offset.max(id + 1);
            }
            let Some(update) = parse_update(&raw) else {
                continue;
            };
            metrics::counter!(tether_server::metrics::UPDATES_TOTAL).increment(1);

            let chat_id = update
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .or_else(|| update.callback_query.as_ref().map(|c| c.chat_id));
            let Some(chat_id) = chat_id else { continue };

            let actions = handler.handle_update(&update);
            apply_actions(transport.as_ref(), chat_id, actions).await;
        }
    }
    info!("update loop stopped");
}

/// Perform the handler's actions through the transport.
async fn apply_actions(transport: &TelegramTransport, chat_id: i64, actions: Vec<Action>) {
    for action in actions {
        let result = match action {
            Action::Reply { text } => transport
                .send_message(chat_id, &text, None)
                .await
                .map(|_| ()),
            Action::ReplyKeyboard { text, keyboard } => transport
                .send_message(chat_id, &text, Some(&keyboard))
                .await
                .map(|_| ()),
            Action::EditKeyboard {
                message_id,
                text,
                keyboard,
            } => {
                transport
                    .edit_message(chat_id, message_id, &text, Some(&keyboard))
                    .await
            }
            Action::ReplyWithDocument { file_path, caption } => transport
                .send_document(chat_id, &file_path, caption.as_deref())
                .await
                .map(|_| ()),
            Action::Toast {
                callback_query_id,
                text,
            } => {
                transport
                    .answer_callback(&callback_query_id, Some(&text))
                    .await
            }
        };
        if let Err(e) = result {
            error!(chat_id, error = %e, "action delivery failed");
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

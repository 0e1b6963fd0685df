//! Dashboard server assembly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tether_store::Store;

use crate::config::DashboardConfig;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub start_time: Instant,
    pub metrics_handle: Arc<PrometheusHandle>,
    pub basic_auth: Option<(String, String)>,
}

/// The dashboard HTTP server.
pub struct DashboardServer {
    config: DashboardConfig,
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
}

impl DashboardServer {
    pub fn new(
        config: DashboardConfig,
        store: Arc<Store>,
        metrics_handle: PrometheusHandle,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let basic_auth = config.credentials();
        Self {
            config,
            state: AppState {
                store,
                start_time: Instant::now(),
                metrics_handle: Arc::new(metrics_handle),
                basic_auth,
            },
            shutdown,
        }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(routes::healthz))
            .route("/readyz", get(routes::readyz))
            .route("/metrics", get(routes::metrics_text))
            .route("/api/projects", get(routes::api_projects))
            .route("/api/sessions", get(routes::api_sessions))
            .route("/api/runs", get(routes::api_runs))
            .route("/api/runs/{id}", get(routes::api_run))
            .route("/api/runs/{id}/events", get(routes::api_run_events))
            .route("/api/runs/{id}/cancel", post(routes::api_run_cancel))
            .route("/api/files", get(routes::api_files))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(256 * 1024))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(15),
            ))
    }

    /// Bind and serve. Returns the bound address and the server task handle.
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;
        info!(addr = %bound_addr, "dashboard listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    token.cancelled().await;
                    info!("dashboard shutdown initiated");
                })
                .await;
            info!("dashboard stopped");
        });

        Ok((bound_addr, handle))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine as _;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use tether_store::{new_in_memory, run_migrations, ConnectionConfig, Project, Provider};

    fn setup_store() -> Arc<Store> {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        let store = Arc::new(Store::new(pool));
        let _ = store
            .sync_projects(&[Project {
                id: "web".into(),
                name: "Web".into(),
                root_path: "/srv/web".into(),
                default_engine: Provider::Claude,
                opencode_attach_url: None,
            }])
            .unwrap();
        store
    }

    fn server(store: Arc<Store>, config: DashboardConfig) -> DashboardServer {
        // Recorder installation is global; fall back to an isolated handle
        // when another test got there first.
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .install_recorder()
            .unwrap_or_else(|_| {
                metrics_exporter_prometheus::PrometheusBuilder::new()
                    .build_recorder()
                    .handle()
            });
        DashboardServer::new(config, store, handle, Arc::new(ShutdownCoordinator::new()))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let server = server(setup_store(), DashboardConfig::default());
        let response = server
            .router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["queued_jobs"], 0);
    }

    #[tokio::test]
    async fn readyz_reports_ready() {
        let server = server(setup_store(), DashboardConfig::default());
        let response = server
            .router()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_projects_lists() {
        let server = server(setup_store(), DashboardConfig::default());
        let response = server
            .router()
            .oneshot(Request::get("/api/projects").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json[0]["id"], "web");
    }

    #[tokio::test]
    async fn api_runs_round_trip_with_cancel() {
        let store = setup_store();
        let outcome = store.enqueue_run("web", "sess-1", "k1", "p", 0).unwrap();
        let server = server(store.clone(), DashboardConfig::default());
        let router = server.router();

        let response = router
            .clone()
            .oneshot(
                Request::get(format!("/api/runs/{}", outcome.run.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "queued");

        let response = router
            .clone()
            .oneshot(
                Request::post(format!("/api/runs/{}/cancel", outcome.run.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["cancelled"], true);

        let response = router
            .oneshot(Request::get("/api/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json[0]["status"], "cancelled");
    }

    #[tokio::test]
    async fn api_run_missing_is_404() {
        let server = server(setup_store(), DashboardConfig::default());
        let response = server
            .router()
            .oneshot(
                Request::get("/api/runs/run-missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn basic_auth_gates_api_but_not_probes() {
        let config = DashboardConfig {
            basic_auth_user: Some("ops".into()),
            basic_auth_pass: Some("pw".into()),
            ..Default::default()
        };
        let server = server(setup_store(), config);
        let router = server.router();

        // Probes stay open.
        let response = router
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // API without credentials is refused.
        let response = router
            .clone()
            .oneshot(Request::get("/api/projects").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // With credentials it passes.
        let auth = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("ops:pw")
        );
        let response = router
            .oneshot(
                Request::get("/api/projects")
                    .header("authorization", auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_renders_text() {
        let store = setup_store();
        let _ = store.enqueue_run("web", "sess-1", "k1", "p", 0).unwrap();
        let server = server(store, DashboardConfig::default());

        let response = server
            .router()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

//! Route handlers: probes, metrics, and the `/api/*` read views.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::auth::authorized;
use crate::health::{health_check, ReadyResponse};
use crate::metrics;
use crate::server::AppState;

fn store_error(e: &tether_store::StoreError) -> Response {
    tracing::error!(error = %e, "store query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "store error" })),
    )
        .into_response()
}

pub(crate) async fn healthz(State(state): State<AppState>) -> Response {
    let queued = state.store.count_queued_jobs().unwrap_or(-1);
    let in_flight = state
        .store
        .count_runs_in_state(tether_store::RunState::InFlight)
        .unwrap_or(-1);
    Json(health_check(state.start_time, queued, in_flight)).into_response()
}

pub(crate) async fn readyz(State(state): State<AppState>) -> Response {
    let ready = state.store.count_queued_jobs().is_ok();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadyResponse { ready })).into_response()
}

pub(crate) async fn metrics_text(State(state): State<AppState>) -> Response {
    // Store-derived gauges refresh at scrape time.
    if let Ok(queued) = state.store.count_queued_jobs() {
        ::metrics::gauge!(metrics::JOBS_QUEUED).set(queued as f64);
    }
    if let Ok(in_flight) = state
        .store
        .count_runs_in_state(tether_store::RunState::InFlight)
    {
        ::metrics::gauge!(metrics::RUNS_IN_FLIGHT).set(in_flight as f64);
    }
    if let Ok(events) = state.store.count_all_run_events() {
        ::metrics::gauge!(metrics::RUN_EVENTS_TOTAL).set(events as f64);
    }
    metrics::render(&state.metrics_handle).into_response()
}

/// Gate an `/api/*` request; `None` means authorized.
fn gate(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    let Some((user, pass)) = &state.basic_auth else {
        return None;
    };
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if authorized(header, user, pass) {
        None
    } else {
        Some(
            (
                StatusCode::UNAUTHORIZED,
                [(axum::http::header::WWW_AUTHENTICATE, "Basic realm=\"tether\"")],
                Json(json!({ "error": "unauthorized" })),
            )
                .into_response(),
        )
    }
}

pub(crate) async fn api_projects(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    match state.store.list_projects() {
        Ok(projects) => Json(projects).into_response(),
        Err(e) => store_error(&e),
    }
}

pub(crate) async fn api_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    let result = match params.get("project") {
        Some(project_id) => state.store.list_sessions_by_project(project_id),
        None => state.store.list_projects().and_then(|projects| {
            let mut all = Vec::new();
            for project in projects {
                all.extend(state.store.list_sessions_by_project(&project.id)?);
            }
            Ok(all)
        }),
    };
    match result {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => store_error(&e),
    }
}

pub(crate) async fn api_runs(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    match state.store.list_recent_runs(50) {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => store_error(&e),
    }
}

pub(crate) async fn api_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    match state.store.get_run(&id) {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "run not found" })),
        )
            .into_response(),
        Err(e) => store_error(&e),
    }
}

pub(crate) async fn api_run_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    match state.store.list_run_events(&id) {
        Ok(events) => Json(events).into_response(),
        Err(e) => store_error(&e),
    }
}

pub(crate) async fn api_run_cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    let now = chrono::Utc::now().timestamp_millis();
    match state.store.cancel_run(&id, now) {
        Ok(cancelled) => Json(json!({ "cancelled": cancelled })).into_response(),
        Err(e) => store_error(&e),
    }
}

pub(crate) async fn api_files(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(denied) = gate(&state, &headers) {
        return denied;
    }
    match state.store.list_files(None, 100) {
        Ok(files) => Json(files).into_response(),
        Err(e) => store_error(&e),
    }
}

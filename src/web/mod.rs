//! # HTTP API
//!
//! Sync endpoints mounted on an `axum` router:
//!
//! - `GET  /api/get_sync`   - persisted sync settings and progress
//! - `POST /api/save_sync`  - persist settings and restart the timer
//! - `POST /api/do_sync`    - run a cycle now (optional JSON override body)
//! - `GET  /api/sync_stats` - counters and timer state
//!
//! Errors are always `{"status": "error", "msg": ...}`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::warn;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::metrics;
use crate::sync::{SaveSyncRequest, SyncError, SyncOverride, SyncService, SyncStatus, SyncTrigger};

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/get_sync", get(get_sync))
        .route("/api/save_sync", post(save_sync))
        .route("/api/do_sync", post(do_sync))
        .route("/api/sync_stats", get(sync_stats))
        .with_state(state)
}

/// Serve the API on an already bound listener until the process stops.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    msg: String,
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            msg: msg.into(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::Transport(_) | SyncError::RemoteRejected { .. } => StatusCode::BAD_GATEWAY,
            SyncError::Store(_) | SyncError::UnknownMode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            msg: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("api error {}: {}", self.status.as_u16(), self.msg);
        }
        (
            self.status,
            Json(json!({ "status": "error", "msg": self.msg })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

async fn get_sync(State(state): State<AppState>) -> ApiResult<Json<SyncStatus>> {
    Ok(Json(state.sync.status()?))
}

async fn save_sync(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    if is_blank(&body) {
        return Err(ApiError::bad_request("No JSON received"));
    }
    let request: SaveSyncRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid sync config: {e}")))?;
    request.validate().map_err(ApiError::bad_request)?;
    state.sync.save(&request).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn do_sync(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let trigger = if is_blank(&body) {
        SyncTrigger::Auto
    } else {
        let overrides: SyncOverride = serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid sync request: {e}")))?;
        SyncTrigger::Manual(overrides)
    };
    let manual = matches!(trigger, SyncTrigger::Manual(_));

    match state.sync.run(trigger).await {
        Ok(report) => Ok(Json(json!({
            "status": "ok",
            "msg": format!("synced {}", report.summary),
            "response": report.response,
            "timestamp": report.timestamp,
        }))),
        // A caller-supplied body that still leaves the config incomplete is the caller's fault.
        Err(SyncError::ConfigIncomplete(msg)) if manual => Err(ApiError::bad_request(msg)),
        Err(e) if e.is_skip() => Ok(Json(json!({ "status": "skipped", "msg": e.to_string() }))),
        Err(e) => Err(e.into()),
    }
}

async fn sync_stats(State(state): State<AppState>) -> Json<Value> {
    let counters = metrics::snapshot();
    let timer = state.sync.scheduler().snapshot().await.unwrap_or_default();
    Json(json!({
        "source": state.sync.source().kind(),
        "counters": counters,
        "timer": {
            "armed": timer.armed,
            "fires_in_secs": timer.fires_in.map(|d| d.as_secs()),
            "armed_total": timer.armed_total,
            "fired_total": timer.fired_total,
            "cancelled_total": timer.cancelled_total,
        },
    }))
}

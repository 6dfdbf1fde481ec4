//! Axum router and all HTTP handlers for riskd-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Every handler here is a read of `AppState.accounts` (the engine's
//! read-only snapshot) or a write to `AppState.event_tx`/`AppState.config` —
//! never a direct mutation of business state. That stays the engine's job.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use riskd_schemas::{Event, EventPayload};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{
        AccountStateResponse, EnforcementHistoryResponse, ErrorResponse, HealthResponse,
        PnlResponse, PositionsResponse, ReloadConfigRequest, ReloadConfigResponse,
        ShutdownRequest, ShutdownResponse, UnknownAccountResponse,
    },
    state::{uptime_secs, AppState, BusMsg},
};

/// Default page size for `get_enforcement_history` when the caller doesn't
/// pass `?limit=`.
const DEFAULT_HISTORY_LIMIT: usize = 50;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/accounts/:account_id", get(get_account_state))
        .route("/v1/accounts/:account_id/positions", get(get_positions))
        .route("/v1/accounts/:account_id/pnl", get(get_pnl))
        .route(
            "/v1/accounts/:account_id/enforcement-history",
            get(get_enforcement_history),
        )
        .route("/v1/config/reload", post(reload_config))
        .route("/v1/shutdown", post(request_shutdown))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let status = st.status.read().await;
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: status.error_state == riskd_schemas::ErrorState::Normal,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            uptime_secs: uptime_secs(),
            queue_depth: status.queue_depth,
            last_event_ago_secs: None,
            error_state: status.error_state,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut snap = st.status.read().await.clone();
    snap.daemon_uptime_secs = uptime_secs();
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// GET /v1/accounts/:account_id
// ---------------------------------------------------------------------------

pub(crate) async fn get_account_state(
    State(st): State<Arc<AppState>>,
    AxumPath(account_id): AxumPath<String>,
) -> Response {
    let accounts = st.accounts.lock().await;
    match accounts.get(&account_id) {
        Some(state) => {
            let now = Utc::now();
            (
                StatusCode::OK,
                Json(AccountStateResponse {
                    account_id: state.account_id.clone(),
                    open_position_count: state.open_positions.len(),
                    realized_pnl_today: state.realized_pnl_today,
                    combined_exposure: state.combined_exposure(),
                    lockout_until: state.lockout_until.filter(|_| state.is_locked_out(now)),
                    cooldown_until: state.cooldown_until.filter(|_| state.is_in_cooldown(now)),
                    last_daily_reset: state.last_daily_reset,
                    error_state: state.error_state,
                }),
            )
                .into_response()
        }
        None => unknown_account(account_id),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/accounts/:account_id/positions
// ---------------------------------------------------------------------------

pub(crate) async fn get_positions(
    State(st): State<Arc<AppState>>,
    AxumPath(account_id): AxumPath<String>,
) -> Response {
    let accounts = st.accounts.lock().await;
    match accounts.get(&account_id) {
        Some(state) => (
            StatusCode::OK,
            Json(PositionsResponse {
                account_id: account_id.clone(),
                positions: state.open_positions.values().cloned().collect(),
            }),
        )
            .into_response(),
        None => unknown_account(account_id),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/accounts/:account_id/pnl
// ---------------------------------------------------------------------------

pub(crate) async fn get_pnl(State(st): State<Arc<AppState>>, AxumPath(account_id): AxumPath<String>) -> Response {
    let accounts = st.accounts.lock().await;
    match accounts.get(&account_id) {
        Some(state) => {
            let unrealized = state
                .open_positions
                .values()
                .fold(riskd_money::Cents::ZERO, |acc, p| acc + p.unrealized_pnl);
            (
                StatusCode::OK,
                Json(PnlResponse {
                    account_id: account_id.clone(),
                    realized: state.realized_pnl_today,
                    unrealized,
                    combined: state.combined_exposure(),
                }),
            )
                .into_response()
        }
        None => unknown_account(account_id),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/accounts/:account_id/enforcement-history
// ---------------------------------------------------------------------------

pub(crate) async fn get_enforcement_history(
    State(st): State<Arc<AppState>>,
    AxumPath(account_id): AxumPath<String>,
) -> Response {
    {
        let accounts = st.accounts.lock().await;
        if !accounts.contains_key(&account_id) {
            return unknown_account(account_id);
        }
    }
    let log_path = st.audit_dir.join(format!("{account_id}.jsonl"));
    match riskd_audit::read_enforcement_history(&log_path, &account_id, DEFAULT_HISTORY_LIMIT) {
        Ok(events) => (
            StatusCode::OK,
            Json(EnforcementHistoryResponse { account_id, events }),
        )
            .into_response(),
        Err(err) => {
            warn!(%account_id, %err, "failed to read enforcement history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: err.to_string() }),
            )
                .into_response()
        }
    }
}

fn unknown_account(account_id: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(UnknownAccountResponse {
            error: "account is not in the running configuration".to_string(),
            account_id,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/config/reload
// ---------------------------------------------------------------------------

pub(crate) async fn reload_config(
    State(st): State<Arc<AppState>>,
    Json(_req): Json<ReloadConfigRequest>,
) -> Response {
    let paths: Vec<&str> = st.config_paths.iter().map(String::as_str).collect();
    let loaded = match riskd_config::load_layered_yaml(&paths) {
        Ok(loaded) => loaded,
        Err(err) => {
            warn!(%err, "config reload: failed to read/merge layered config");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: err.to_string() }),
            )
                .into_response();
        }
    };
    let parsed = match riskd_config::parse_riskd_config(&loaded.config_json) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(%err, "config reload: new config failed validation, keeping the running config");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: err.to_string() }),
            )
                .into_response();
        }
    };

    let _ = st.config.send(Arc::new(parsed));

    let seq = next_control_seq();
    let event = Event::new(
        "*",
        "control-reload-config",
        Utc::now(),
        seq,
        Uuid::new_v4(),
        EventPayload::ConfigReload {
            config_hash: loaded.config_hash.clone(),
        },
    );
    if st.event_tx.send(event).await.is_err() {
        warn!("config reload: engine event channel closed");
    }

    info!(config_hash = %loaded.config_hash, "config reload accepted");
    (
        StatusCode::OK,
        Json(ReloadConfigResponse {
            accepted: true,
            config_hash: loaded.config_hash,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/shutdown
// ---------------------------------------------------------------------------

pub(crate) async fn request_shutdown(State(st): State<Arc<AppState>>, Json(req): Json<ShutdownRequest>) -> impl IntoResponse {
    info!(reason = %req.reason, "shutdown requested");
    let _ = st.bus.send(BusMsg::LogLine {
        level: "WARN".to_string(),
        msg: format!("shutdown requested: {}", req.reason),
    });
    st.shutdown.notify_waiters();
    (StatusCode::OK, Json(ShutdownResponse { accepted: true }))
}

fn next_control_seq() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    SEQ.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// GET /v1/stream (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::LogLine { .. } => "log",
                    BusMsg::Enforcement { .. } => "enforcement",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(SseEvent::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}

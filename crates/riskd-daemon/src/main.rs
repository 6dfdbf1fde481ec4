//! riskd-daemon entry point.
//!
//! This file is intentionally thin: it loads config, loads/reconciles
//! persisted account state, wires the event core into the risk engine, and
//! starts the HTTP control surface. All route handlers live in `routes.rs`;
//! all shared state types live in `state.rs`; the dispatch loop lives in
//! `engine.rs`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use chrono::Utc;
use riskd_broker_paper::PaperBroker;
use riskd_daemon::{engine::Engine, routes, state};
use riskd_enforcement::BrokerAdapter;
use riskd_schemas::{AccountState, Event, EventPayload};
use tokio::sync::mpsc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use uuid::Uuid;

const DEFAULT_CONFIG_PATHS: &[&str] = &["config/base.yaml", "config/local.yaml"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev-time .env.local bootstrap; silent if absent, production injects
    // env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config_paths = config_paths_from_env();
    let loaded = riskd_config::load_layered_yaml(&borrow_paths(&config_paths))
        .context("ConfigInvalid: failed to load layered config")?;
    let config = riskd_config::parse_riskd_config(&loaded.config_json)
        .context("ConfigInvalid: config failed schema validation, refusing to start")?;
    info!(config_hash = %loaded.config_hash, accounts = config.accounts.len(), "config loaded");

    let persistence_dir = PathBuf::from(&config.persistence_dir);
    ensure_persistence_dir_writable(&persistence_dir)
        .context("persistence directory unwritable at startup")?;

    let audit_dir = persistence_dir.join("audit");
    std::fs::create_dir_all(&audit_dir).context("failed to create audit directory")?;

    if let Ok(webhook) = riskd_config::alerting::resolve_alert_webhook(&loaded.config_json) {
        info!(configured = webhook.0.is_some(), "alert webhook resolved");
    }

    let mut accounts: BTreeMap<String, AccountState> = BTreeMap::new();
    for account_id in config.accounts.keys() {
        let state = riskd_state::load_account_state(&persistence_dir, account_id)
            .context("failed to load persisted account state")?;
        accounts.insert(account_id.clone(), state);
    }

    let broker: Arc<dyn BrokerAdapter> = Arc::new(PaperBroker::with_tick_values(config.tick_values.clone()));

    let (event_tx, event_rx) = mpsc::channel::<Event>(config.queue_capacity);

    let shared = Arc::new(state::AppState::new(
        config.clone(),
        loaded.config_hash.clone(),
        config_paths.clone(),
        accounts.clone(),
        event_tx.clone(),
        audit_dir.clone(),
    ));
    // The engine reads config through its own receiver cloned off the same
    // watch channel `reload_config` publishes to, so a reload only has to
    // publish once for both the HTTP status surface and the dispatch loop.
    let config_rx = shared.config.subscribe();

    let mut engine = Engine::new(
        Arc::clone(&shared),
        Arc::clone(&broker),
        config_rx,
        accounts,
        &audit_dir,
    )
    .context("failed to construct risk engine")?;

    engine.reconcile_all(Utc::now()).await;

    state::spawn_heartbeat(shared.bus.clone(), event_tx.clone(), Duration::from_secs(1));
    spawn_minute_tick(event_tx.clone());

    tokio::spawn(engine.run(event_rx));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("riskd-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = shared.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => { info!("ctrl-c received, shutting down"); }
                _ = shutdown.notified() => { info!("shutdown requested via control surface"); }
            }
        })
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("RISKD_DAEMON_ADDR").ok()?.parse().ok()
}

fn config_paths_from_env() -> Vec<String> {
    match std::env::var("RISKD_CONFIG_PATHS") {
        Ok(raw) if !raw.trim().is_empty() => raw.split(',').map(|s| s.trim().to_string()).collect(),
        _ => DEFAULT_CONFIG_PATHS.iter().map(|s| s.to_string()).collect(),
    }
}

fn borrow_paths(paths: &[String]) -> Vec<&str> {
    paths.iter().map(String::as_str).collect()
}

/// A persistence directory that can't be created or written to aborts
/// startup outright.
fn ensure_persistence_dir_writable(dir: &PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let probe = dir.join(".riskd_write_probe");
    std::fs::write(&probe, b"ok").with_context(|| format!("writing probe file in {}", dir.display()))?;
    std::fs::remove_file(&probe).ok();
    Ok(())
}

/// Periodic `TimeTick` producer driving the daily-reset check and
/// `NoStopLossGrace` evaluation every minute even when no broker events
/// arrive.
fn spawn_minute_tick(event_tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        let mut seq: u64 = 0;
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            seq += 1;
            let event = Event::new(
                "*",
                "daemon-minute-tick",
                Utc::now(),
                seq,
                Uuid::new_v4(),
                EventPayload::TimeTick,
            );
            if event_tx.send(event).await.is_err() {
                warn!("minute tick: engine event channel closed, stopping ticker");
                return;
            }
        }
    });
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

//! Shared runtime state for riskd-daemon.
//!
//! `AppState` is the one thing every Axum handler and the risk engine task
//! both hold an `Arc` to. The engine is the sole writer of `accounts`; HTTP
//! handlers only ever read it — mirroring the single-writer discipline
//! `riskd_eventcore` enforces over the event queue itself, just one layer
//! further out so a read-only control surface can exist at all.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use riskd_config::RiskdConfig;
use riskd_schemas::{AccountState, ErrorState, Event, EventPayload};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch, Mutex, Notify, RwLock};
use uuid::Uuid;

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    LogLine { level: String, msg: String },
    Enforcement {
        account_id: String,
        rule_name: String,
        detail: String,
    },
}

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Point-in-time snapshot of daemon state, returned by `GET /v1/status` and
/// carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub error_state: ErrorState,
    pub queue_depth: usize,
    pub accounts: Vec<String>,
    pub config_hash: String,
    pub notes: Option<String>,
}

/// Cloneable (Arc-backed) handle shared across all Axum handlers and the
/// engine task.
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub status: RwLock<StatusSnapshot>,
    /// Live config, published by `reload_config`; the engine holds a
    /// `watch::Receiver` clone and re-borrows it on every event.
    pub config: watch::Sender<Arc<RiskdConfig>>,
    /// Read-only snapshot of every configured account's state, refreshed by
    /// the engine after each event it processes. Never written by a route
    /// handler.
    pub accounts: Arc<Mutex<BTreeMap<String, AccountState>>>,
    pub audit_dir: PathBuf,
    /// Layered config file paths, kept so `reload_config` can re-read and
    /// re-merge them exactly as `main.rs` did at startup.
    pub config_paths: Vec<String>,
    /// Inbound event producers (the engine's own tickers, and a handful of
    /// dev-only injection routes) all go through this.
    pub event_tx: mpsc::Sender<Event>,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(
        config: RiskdConfig,
        config_hash: String,
        config_paths: Vec<String>,
        accounts: BTreeMap<String, AccountState>,
        event_tx: mpsc::Sender<Event>,
        audit_dir: PathBuf,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let account_ids: Vec<String> = accounts.keys().cloned().collect();

        let initial_status = StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            error_state: ErrorState::Normal,
            queue_depth: 0,
            accounts: account_ids,
            config_hash,
            notes: Some("engine starting".to_string()),
        };

        let (config_tx, _config_rx) = watch::channel(Arc::new(config));

        Self {
            bus,
            build: BuildInfo {
                service: "riskd-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            status: RwLock::new(initial_status),
            config: config_tx,
            accounts: Arc::new(Mutex::new(accounts)),
            audit_dir,
            config_paths,
            event_tx,
            shutdown: Arc::new(Notify::new()),
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}

/// Spawn a background task that emits an SSE heartbeat and feeds a
/// lowest-priority `Heartbeat` event into the engine every `interval`. The
/// event send is best-effort: a full queue drops heartbeats per
/// `riskd_eventcore`'s own boundary policy, so a blocking send here would
/// just reintroduce backpressure the queue already declined to apply.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, event_tx: mpsc::Sender<Event>, interval: Duration) {
    tokio::spawn(async move {
        let mut seq: u64 = 0;
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });

            seq += 1;
            let event = Event::new(
                "*",
                "daemon-heartbeat",
                chrono::Utc::now(),
                seq,
                Uuid::new_v4(),
                EventPayload::Heartbeat,
            );
            let _ = event_tx.try_send(event);
        }
    });
}

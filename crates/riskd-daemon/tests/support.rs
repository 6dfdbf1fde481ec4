//! Shared scaffolding for riskd-daemon scenario tests: builds a fully wired
//! `Engine` + `AppState` pair backed by a `FakeBrokerAdapter`, the same
//! composition `main.rs` performs against a real broker.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use riskd_config::{AccountRiskConfig, RiskdConfig};
use riskd_daemon::{engine::Engine, state::AppState};
use riskd_enforcement::BrokerAdapter;
use riskd_money::Cents;
use riskd_schemas::{AccountState, Event};
use riskd_testkit::FakeBrokerAdapter;
use tokio::sync::mpsc;

pub const ACCOUNT: &str = "acct-1";

pub fn sample_account_config() -> AccountRiskConfig {
    AccountRiskConfig {
        max_contracts: 4,
        max_contracts_per_instrument: BTreeMap::new(),
        daily_realized_loss_limit: Cents::new(-100_000),
        daily_realized_profit_target: Cents::new(150_000),
        unrealized_loss_limit: Cents::new(-50_000),
        unrealized_profit_target: Cents::new(80_000),
        trade_frequency_window_seconds: 60,
        trade_frequency_max_count: 100,
        cooldown_after_loss_threshold: Cents::new(-1_000_000),
        cooldown_after_loss_seconds: 300,
        stop_loss_grace_seconds: 3_600,
        session_window: None,
        blocked_symbols: Vec::new(),
        auth_loss_guard_limit: Cents::new(-200_000),
    }
}

pub fn sample_config(tmp_dir: &std::path::Path) -> RiskdConfig {
    let mut accounts = BTreeMap::new();
    accounts.insert(ACCOUNT.to_string(), sample_account_config());
    let mut tick_values = BTreeMap::new();
    tick_values.insert("MNQ".to_string(), Cents::new(500));
    tick_values.insert("ES".to_string(), Cents::new(5_000));

    RiskdConfig {
        accounts,
        tick_values,
        timezone: "UTC".to_string(),
        daily_reset_local_time: "17:00:00".to_string(),
        persistence_dir: tmp_dir.to_string_lossy().to_string(),
        queue_capacity: 1_000,
        dedup_size: 128,
        alert_webhook_env: None,
    }
}

pub fn tmp_dir(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("riskd-daemon-test-{}-{}", std::process::id(), name));
    let _ = std::fs::remove_dir_all(&p);
    std::fs::create_dir_all(&p).unwrap();
    p
}

/// Wire an engine + shared app state over a `FakeBrokerAdapter`. The engine
/// runs as a detached background task for the lifetime of the test process
/// (it never sees every sender dropped, since `AppState` keeps its own
/// clone alive for the HTTP control surface) — tests call `settle()` after
/// sending events instead of waiting for the loop to exit.
pub struct Harness<B: BrokerAdapter + 'static> {
    pub event_tx: mpsc::Sender<Event>,
    pub shared: Arc<AppState>,
    pub broker: Arc<B>,
}

impl Harness<FakeBrokerAdapter> {
    pub fn new(dir: &std::path::Path, broker: FakeBrokerAdapter) -> Self {
        Self::with_state(dir, broker, AccountState::new(ACCOUNT), |c| c)
    }
}

impl<B: BrokerAdapter + 'static> Harness<B> {
    /// Build a harness over a caller-supplied initial account state (e.g. a
    /// nonzero `realized_pnl_today` or a pre-seeded open position) and an
    /// optional config override.
    pub fn with_state(
        dir: &std::path::Path,
        broker: B,
        initial_state: AccountState,
        configure: impl FnOnce(AccountRiskConfig) -> AccountRiskConfig,
    ) -> Self {
        let mut config = sample_config(dir);
        let account_cfg = configure(sample_account_config());
        config.accounts.insert(ACCOUNT.to_string(), account_cfg);

        let mut accounts = BTreeMap::new();
        accounts.insert(ACCOUNT.to_string(), initial_state);

        let (event_tx, event_rx) = mpsc::channel::<Event>(config.queue_capacity);
        let audit_dir = dir.join("audit");

        let shared = Arc::new(AppState::new(
            config.clone(),
            "test-config-hash".to_string(),
            vec![],
            accounts.clone(),
            event_tx.clone(),
            audit_dir.clone(),
        ));
        let config_rx = shared.config.subscribe();

        let broker = Arc::new(broker);
        let dyn_broker: Arc<dyn BrokerAdapter> = broker.clone();
        let engine = Engine::new(Arc::clone(&shared), dyn_broker, config_rx, accounts, &audit_dir)
            .expect("engine construction failed");

        tokio::spawn(engine.run(event_rx));

        Harness { event_tx, shared, broker }
    }

    /// Same as [`Harness::with_state`], but runs startup reconciliation
    /// against the broker's book before the dispatch loop starts taking
    /// events — mirrors what `main.rs` does on process start after a crash.
    pub async fn with_reconciled_state(
        dir: &std::path::Path,
        broker: B,
        initial_state: AccountState,
        configure: impl FnOnce(AccountRiskConfig) -> AccountRiskConfig,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let mut config = sample_config(dir);
        let account_cfg = configure(sample_account_config());
        config.accounts.insert(ACCOUNT.to_string(), account_cfg);

        let mut accounts = BTreeMap::new();
        accounts.insert(ACCOUNT.to_string(), initial_state);

        let (event_tx, event_rx) = mpsc::channel::<Event>(config.queue_capacity);
        let audit_dir = dir.join("audit");

        let shared = Arc::new(AppState::new(
            config.clone(),
            "test-config-hash".to_string(),
            vec![],
            accounts.clone(),
            event_tx.clone(),
            audit_dir.clone(),
        ));
        let config_rx = shared.config.subscribe();

        let broker = Arc::new(broker);
        let dyn_broker: Arc<dyn BrokerAdapter> = broker.clone();
        let mut engine = Engine::new(Arc::clone(&shared), dyn_broker, config_rx, accounts, &audit_dir)
            .expect("engine construction failed");

        engine.reconcile_all(now).await;
        tokio::spawn(engine.run(event_rx));

        let harness = Harness { event_tx, shared, broker };
        // Reconciliation doesn't push to the shared snapshot on its own; a
        // real process picks that up on its first event after startup, same
        // as this heartbeat does here.
        harness
            .send(Event::new(
                "*".to_string(),
                "test-harness".to_string(),
                now,
                0,
                uuid::Uuid::new_v4(),
                riskd_schemas::EventPayload::TimeTick,
            ))
            .await;
        harness
    }

    /// Every event this harness has sent so far has been single-threaded
    /// through the dispatch loop and reflected in `shared.accounts` by the
    /// time this returns, since `Engine::run` awaits each handler to
    /// completion before pulling the next queued event.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    pub async fn send(&self, event: Event) {
        self.event_tx.send(event).await.expect("engine task died");
        self.settle().await;
    }

    pub async fn account_state(&self) -> AccountState {
        self.shared
            .accounts
            .lock()
            .await
            .get(ACCOUNT)
            .cloned()
            .expect("account missing from shared state")
    }
}

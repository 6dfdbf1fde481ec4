//! The risk engine task: the single writer of every account's mutable
//! state. Pulls events off the shared priority queue, applies the mutation
//! the event implies, asks [`riskd_risk::decide`] whether a rule fires, and
//! dispatches the resulting action through the broker gateway.
//!
//! One owner composes mutate -> decide -> dispatch -> cascade over a live
//! event channel rather than an offline replay loop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use riskd_audit::AuditWriter;
use riskd_clock::DailyResetSchedule;
use riskd_config::RiskdConfig;
use riskd_enforcement::{BrokerAdapter, BrokerGateway};
use riskd_eventcore::{EventCore, IngestOutcome};
use riskd_money::{Cents, Price};
use riskd_reconcile::{BrokerPositionsSnapshot, SnapshotFreshness, SnapshotWatermark};
use riskd_schemas::{AccountState, EnforcementAction, ErrorState, Event, EventPayload, RuleViolation};
use riskd_state::{persistence, persistence::DebounceGate, AccountStore};
use tokio::sync::{mpsc, watch};

use crate::state::{AppState, BusMsg};

/// Non-critical flushes are debounced at this interval; critical mutations
/// (lockouts, daily resets, confirmed closes) always flush immediately via
/// `persist_critical`.
const NON_CRITICAL_FLUSH_DEBOUNCE_SECONDS: i64 = 5;

struct EngineAccount {
    store: AccountStore,
    audit: AuditWriter,
    debounce: DebounceGate,
    watermark: SnapshotWatermark,
}

/// Owns every configured account's state and the one broker gateway through
/// which enforcement actions flow. Constructed once at startup; `run`
/// consumes it for the lifetime of the process.
pub struct Engine {
    accounts: BTreeMap<String, EngineAccount>,
    gateway: BrokerGateway<Arc<dyn BrokerAdapter>>,
    broker: Arc<dyn BrokerAdapter>,
    config_rx: watch::Receiver<Arc<RiskdConfig>>,
    shared: Arc<AppState>,
}

impl Engine {
    pub fn new(
        shared: Arc<AppState>,
        broker: Arc<dyn BrokerAdapter>,
        config_rx: watch::Receiver<Arc<RiskdConfig>>,
        initial_accounts: BTreeMap<String, AccountState>,
        audit_dir: &Path,
    ) -> anyhow::Result<Self> {
        let mut accounts = BTreeMap::new();
        for (id, state) in initial_accounts {
            let audit = AuditWriter::new(audit_dir.join(format!("{id}.jsonl")), true)?;
            accounts.insert(
                id,
                EngineAccount {
                    store: AccountStore::from_state(state),
                    audit,
                    debounce: DebounceGate::new(NON_CRITICAL_FLUSH_DEBOUNCE_SECONDS),
                    watermark: SnapshotWatermark::new(),
                },
            );
        }
        Ok(Engine {
            accounts,
            gateway: BrokerGateway::new(broker.clone()),
            broker,
            config_rx,
            shared,
        })
    }

    /// Adopt/drop positions against what the broker actually reports before
    /// the first event is processed. Each fetch is stamped with `now` (the
    /// instant this call took it) and run through the account's
    /// `SnapshotWatermark` before being trusted, so a fetch that arrives out
    /// of order relative to the last accepted one is rejected rather than
    /// reconciled against.
    pub async fn reconcile_all(&mut self, now: DateTime<Utc>) {
        for (id, acct) in self.accounts.iter_mut() {
            match self.broker.get_current_positions(id).await {
                Ok(positions) => {
                    let snapshot = BrokerPositionsSnapshot {
                        fetched_at_ms: now.timestamp_millis(),
                        positions,
                    };
                    match acct.watermark.accept(&snapshot) {
                        SnapshotFreshness::Fresh => {
                            let report = riskd_reconcile::reconcile(&mut acct.store.state, &snapshot.positions, now);
                            if !report.diffs.is_empty() {
                                tracing::warn!(account_id = %id, diff_count = report.diffs.len(), "startup reconciliation adjusted local state");
                            }
                        }
                        rejected => {
                            tracing::error!(account_id = %id, ?rejected, "rejecting broker snapshot older than the last one accepted, skipping reconciliation");
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(account_id = %id, %err, "failed to fetch broker positions for startup reconciliation");
                }
            }
        }
    }

    /// Drive the dispatch loop to completion (i.e. until every event
    /// producer has dropped its `mpsc::Sender`). Inlines the same
    /// ingest-then-drain shape as `riskd_eventcore::run_dispatch_loop`,
    /// since that helper's `FnMut(Event) -> Fut` signature can't express a
    /// handler that mutably borrows an owned `Engine` across awaits without
    /// boxing every future.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<Event>) {
        let (capacity, dedup_size) = {
            let cfg = self.config_rx.borrow();
            (cfg.queue_capacity, cfg.dedup_size)
        };
        let mut core = EventCore::new(capacity, dedup_size);

        while let Some(event) = event_rx.recv().await {
            if core.ingest(event) == IngestOutcome::Overflow {
                tracing::error!("event queue overflow; entering safe state");
            }
            while let Some(ready) = core.next() {
                self.handle_event(ready).await;
            }
            self.publish_status(core.depth(), core.error_state()).await;
        }
        tracing::warn!("all event producers dropped; engine loop exiting");
    }

    async fn handle_event(&mut self, event: Event) {
        // `now` for every rule/lockout/debounce decision this event triggers
        // is the event's own timestamp, not a fresh wall-clock read — the
        // dispatch loop processes events one at a time but not necessarily
        // the instant they were produced, and `riskd_risk::decide` is
        // written to take `now` from its caller rather than read a clock.
        let now = event.timestamp;
        if event.account_id == "*" {
            match &event.payload {
                EventPayload::Heartbeat => return,
                EventPayload::ConfigReload { config_hash } => {
                    self.on_config_reload(config_hash.clone()).await;
                    return;
                }
                EventPayload::TimeTick | EventPayload::SessionTick => {
                    let ids: Vec<String> = self.accounts.keys().cloned().collect();
                    for id in ids {
                        let per_account = Event::new(
                            id,
                            event.source.clone(),
                            event.timestamp,
                            event.monotonic_seq,
                            event.correlation_id,
                            event.payload.clone(),
                        );
                        self.handle_account_event(per_account, now).await;
                    }
                    return;
                }
                _ => {}
            }
        }
        self.handle_account_event(event, now).await;
    }

    async fn handle_account_event(&mut self, event: Event, now: DateTime<Utc>) {
        let account_id = event.account_id.clone();
        let config = self.config_rx.borrow().clone();
        let Some(account_cfg) = config.accounts.get(&account_id).cloned() else {
            tracing::warn!(%account_id, "event for an account not in the running config, dropping");
            return;
        };
        if !self.accounts.contains_key(&account_id) {
            tracing::warn!(%account_id, "event for an account with no engine state, dropping");
            return;
        }

        let tz: Tz = config.timezone.parse().unwrap_or(chrono_tz::UTC);
        let local_time = parse_local_time(&config.daily_reset_local_time).unwrap_or_else(|| NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        let schedule = DailyResetSchedule::new(tz, local_time);

        {
            let acct = self.accounts.get_mut(&account_id).expect("checked above");
            if acct.store.daily_reset_due(&schedule, now) {
                acct.store.daily_reset(schedule.most_recent_reset_at_or_before(now));
                tracing::info!(%account_id, "daily reset applied");
            }
            mutate_for_event(&mut acct.store, &event, &account_cfg, |symbol| {
                // Static config wins when present; the broker's own table is
                // only a fallback for symbols the config doesn't list.
                config
                    .tick_values
                    .get(symbol)
                    .copied()
                    .or_else(|| self.gateway.tick_value(symbol))
                    .unwrap_or(Cents::ZERO)
            });
        }

        let decision = {
            let acct = self.accounts.get(&account_id).expect("checked above");
            riskd_risk::decide(&event, &acct.store.state, &account_cfg, tz, now)
        };
        if let Some(violation) = decision {
            self.execute_violation(violation, now).await;
        }

        self.persist_if_due(&account_id, now);
        self.refresh_account_snapshot(&account_id).await;
    }

    async fn execute_violation(&mut self, violation: RuleViolation, now: DateTime<Utc>) {
        let account_id = violation.account_id.clone();
        self.apply_action(&violation, now).await;

        let mut cascades = 0u8;
        while cascades < riskd_risk::MAX_CASCADES {
            let next = {
                let config = self.config_rx.borrow();
                let (Some(acct), Some(cfg)) = (self.accounts.get(&account_id), config.accounts.get(&account_id)) else {
                    break;
                };
                riskd_risk::cascade_daily_rules(&account_id, &acct.store.state, cfg)
            };
            match next {
                Some(v) => {
                    self.apply_action(&v, now).await;
                    cascades += 1;
                }
                None => break,
            }
        }
    }

    async fn apply_action(&mut self, v: &RuleViolation, now: DateTime<Utc>) {
        let account_id = v.account_id.clone();
        let result = match v.action.clone() {
            EnforcementAction::ClosePosition { position_id, quantity } => {
                match self.gateway.close_position(&account_id, &position_id, quantity).await {
                    Ok(Some(confirmed)) => {
                        let realized = confirmed.realized_pnl;
                        if let Some(acct) = self.accounts.get_mut(&account_id) {
                            acct.store.apply_confirmed_close(&confirmed);
                        }
                        self.persist_critical(&account_id, now);
                        self.maybe_start_cooldown(&account_id, realized, now).await;
                        "confirmed".to_string()
                    }
                    Ok(None) => "duplicate_in_flight".to_string(),
                    Err(err) => {
                        tracing::error!(%account_id, %err, "close_position dispatch failed");
                        format!("failed: {err}")
                    }
                }
            }
            EnforcementAction::FlattenAccount => match self.gateway.flatten_account(&account_id).await {
                Ok(Some(confirmed_closes)) => {
                    let mut total_realized = Cents::ZERO;
                    if let Some(acct) = self.accounts.get_mut(&account_id) {
                        for c in &confirmed_closes {
                            acct.store.apply_confirmed_close(c);
                            total_realized += c.realized_pnl;
                        }
                    }
                    self.persist_critical(&account_id, now);
                    self.maybe_start_cooldown(&account_id, total_realized, now).await;
                    if matches!(v.rule_name, "daily_realized_loss" | "daily_realized_profit") {
                        self.set_daily_lockout(&account_id, now).await;
                    }
                    "confirmed".to_string()
                }
                Ok(None) => "duplicate_in_flight".to_string(),
                Err(err) => {
                    tracing::error!(%account_id, %err, "flatten_account dispatch failed");
                    format!("failed: {err}")
                }
            },
            EnforcementAction::SetLockout { until } => {
                if let Some(acct) = self.accounts.get_mut(&account_id) {
                    acct.store.set_lockout(until);
                }
                self.persist_critical(&account_id, now);
                "applied".to_string()
            }
            EnforcementAction::StartCooldown { seconds } => {
                if let Some(acct) = self.accounts.get_mut(&account_id) {
                    acct.store.start_cooldown(seconds, now);
                }
                self.persist_critical(&account_id, now);
                "applied".to_string()
            }
            EnforcementAction::SendAlert { severity, text } => {
                tracing::warn!(%account_id, ?severity, %text, "risk alert");
                "notified".to_string()
            }
        };

        self.record(v, &result);
    }

    /// Cooldown is never reached through the generic dispatch table (see
    /// `riskd_rules`'s module docs) — it fires directly off the realized
    /// pnl of a close that just confirmed.
    async fn maybe_start_cooldown(&mut self, account_id: &str, realized: Cents, now: DateTime<Utc>) {
        let config = self.config_rx.borrow().clone();
        let Some(cfg) = config.accounts.get(account_id) else { return };
        let Some(v) = riskd_rules::cooldown_after_loss(account_id, realized, cfg) else { return };
        if let EnforcementAction::StartCooldown { seconds } = v.action {
            if let Some(acct) = self.accounts.get_mut(account_id) {
                acct.store.start_cooldown(seconds, now);
            }
            self.persist_critical(account_id, now);
            self.record(&v, "applied");
        }
    }

    /// Rows 3/4 of the rule table pair every daily-limit flatten with a
    /// lockout expiring at the next scheduled local reset.
    async fn set_daily_lockout(&mut self, account_id: &str, now: DateTime<Utc>) {
        let config = self.config_rx.borrow().clone();
        let tz: Tz = config.timezone.parse().unwrap_or(chrono_tz::UTC);
        let local_time = parse_local_time(&config.daily_reset_local_time)
            .unwrap_or_else(|| NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        let schedule = DailyResetSchedule::new(tz, local_time);
        let action = riskd_risk::daily_limit_lockout(schedule, now);
        let EnforcementAction::SetLockout { until } = action else {
            unreachable!("daily_limit_lockout always returns SetLockout");
        };
        if let Some(acct) = self.accounts.get_mut(account_id) {
            acct.store.set_lockout(until);
        }
        self.persist_critical(account_id, now);
        self.record(
            &RuleViolation {
                rule_name: "daily_limit_lockout",
                severity: riskd_schemas::Severity::Critical,
                account_id: account_id.to_string(),
                detail: format!("locked out until {until}"),
                action: EnforcementAction::SetLockout { until },
            },
            "applied",
        );
    }

    fn record(&mut self, v: &RuleViolation, result: &str) {
        let payload = serde_json::json!({
            "rule": v.rule_name,
            "detail": v.detail,
            "action": v.action,
            "result": result,
        });
        if let Some(acct) = self.accounts.get_mut(&v.account_id) {
            if let Err(err) = acct.audit.append(&v.account_id, v.rule_name, payload) {
                tracing::error!(account_id = %v.account_id, %err, "failed to append audit log entry");
            }
        }
        let _ = self.shared.bus.send(BusMsg::Enforcement {
            account_id: v.account_id.clone(),
            rule_name: v.rule_name.to_string(),
            detail: format!("{} ({result})", v.detail),
        });
    }

    async fn on_config_reload(&mut self, config_hash: String) {
        let mut status = self.shared.status.write().await;
        status.config_hash = config_hash;
        status.notes = Some("config reloaded".to_string());
        tracing::info!("config reloaded");
    }

    fn persist_critical(&mut self, account_id: &str, now: DateTime<Utc>) {
        let dir = PathBuf::from(self.config_rx.borrow().persistence_dir.clone());
        if let Some(acct) = self.accounts.get_mut(account_id) {
            if let Err(err) = persistence::save_account_state(&dir, &acct.store.state) {
                tracing::error!(%account_id, %err, "failed to persist account state");
            }
            acct.debounce.mark_flushed(now);
        }
    }

    /// Non-critical mutations (price updates, frequency-window bookkeeping)
    /// are flushed on a 5s debounce timer rather than on every event;
    /// critical mutations go through `persist_critical` directly and reset
    /// the same debounce clock.
    fn persist_if_due(&mut self, account_id: &str, now: DateTime<Utc>) {
        let due = self.accounts.get(account_id).map(|acct| acct.debounce.due(now)).unwrap_or(false);
        if due {
            self.persist_critical(account_id, now);
        }
    }

    async fn refresh_account_snapshot(&self, account_id: &str) {
        if let Some(acct) = self.accounts.get(account_id) {
            let mut guard = self.shared.accounts.lock().await;
            guard.insert(account_id.to_string(), acct.store.state.clone());
        }
    }

    async fn publish_status(&self, queue_depth: usize, error_state: ErrorState) {
        let mut status = self.shared.status.write().await;
        status.daemon_uptime_secs = crate::state::uptime_secs();
        status.queue_depth = queue_depth;
        status.error_state = error_state;
        let snapshot = status.clone();
        drop(status);
        let _ = self.shared.bus.send(BusMsg::Status(snapshot));
    }
}

fn mutate_for_event(
    store: &mut AccountStore,
    event: &Event,
    account_cfg: &riskd_config::AccountRiskConfig,
    tick_value_for: impl Fn(&str) -> Cents,
) {
    match &event.payload {
        EventPayload::Fill { position_id, symbol, side, quantity, price } => {
            let was_open = store.state.open_positions.contains_key(position_id);
            let entry_price = Price::parse(price).unwrap_or(Price::ZERO);
            let tick_value = tick_value_for(symbol);
            store.add_or_merge_position(position_id, symbol, *side, *quantity, entry_price, tick_value, event.timestamp);
            store.record_trade("fills", account_cfg.trade_frequency_window_seconds, account_cfg.trade_frequency_max_count, event.timestamp);
            if !was_open {
                store.start_stop_loss_grace(position_id, account_cfg.stop_loss_grace_seconds, event.timestamp);
            }
        }
        EventPayload::PositionUpdate { position_id, symbol, current_price } => {
            let tick_value = tick_value_for(symbol);
            let price = Price::parse(current_price).unwrap_or(Price::ZERO);
            store.update_price(position_id, price, tick_value, event.timestamp);
        }
        EventPayload::OrderUpdate { symbol, status, .. } => {
            // A working/accepted order update for a symbol is the signal a
            // stop-loss order is now live at the broker. Matched by symbol
            // rather than position_id, since the order update itself doesn't
            // carry one.
            if matches!(status.as_str(), "working" | "accepted") {
                store.attach_stop_loss(symbol, event.timestamp);
            }
        }
        _ => {}
    }
}

fn parse_local_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S").or_else(|_| NaiveTime::parse_from_str(s, "%H:%M")).ok()
}

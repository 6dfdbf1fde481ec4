//! Shared wire and domain types for the riskd workspace.
//!
//! Every other crate depends on this one for the event/domain vocabulary
//! instead of redeclaring its own copies.

use chrono::{DateTime, Utc};
use riskd_money::Cents;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub mod error;
pub use error::RiskdError;

/// Side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for Long, -1 for Short — the sign used when combining with a
    /// price delta to compute unrealized pnl.
    pub fn sign(self) -> i64 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }
}

/// The payload carried by an [`Event`]. Each variant's priority is fixed by
/// the table: P1 ConnectionChange, P2 Fill/OrderUpdate/PositionUpdate,
/// P3 ConfigReload, P4 TimeTick, P5 SessionTick, P6 Heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    ConnectionChange { connected: bool, detail: String },
    Fill {
        position_id: String,
        symbol: String,
        side: Side,
        quantity: i64,
        price: String,
    },
    OrderUpdate {
        order_id: String,
        symbol: String,
        status: String,
    },
    PositionUpdate {
        position_id: String,
        symbol: String,
        current_price: String,
    },
    ConfigReload { config_hash: String },
    TimeTick,
    SessionTick,
    Heartbeat,
}

impl EventPayload {
    pub fn priority(&self) -> u8 {
        match self {
            EventPayload::ConnectionChange { .. } => 1,
            EventPayload::Fill { .. }
            | EventPayload::OrderUpdate { .. }
            | EventPayload::PositionUpdate { .. } => 2,
            EventPayload::ConfigReload { .. } => 3,
            EventPayload::TimeTick => 4,
            EventPayload::SessionTick => 5,
            EventPayload::Heartbeat => 6,
        }
    }
}

/// A single unit of work flowing through the event core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
    pub monotonic_seq: u64,
    pub account_id: String,
    pub source: String,
    pub correlation_id: Uuid,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        account_id: impl Into<String>,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        monotonic_seq: u64,
        correlation_id: Uuid,
        payload: EventPayload,
    ) -> Self {
        Event {
            event_id: Uuid::new_v4(),
            priority: payload.priority(),
            timestamp,
            monotonic_seq,
            account_id: account_id.into(),
            source: source.into(),
            correlation_id,
            payload,
        }
    }

    /// Total order key: `(priority, timestamp, monotonic_seq)`.
    pub fn order_key(&self) -> (u8, DateTime<Utc>, u64) {
        (self.priority, self.timestamp, self.monotonic_seq)
    }
}

/// One open futures position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub entry_price: String,
    pub current_price: String,
    pub unrealized_pnl: Cents,
    pub opened_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub pending_close: bool,
    pub stop_loss_attached: bool,
    pub stop_loss_price: Option<String>,
    pub stop_loss_grace_expires: Option<DateTime<Utc>>,
    /// Unknown fields preserved forward-compatibly.
    #[serde(default, flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// A rolling count-over-window used by TradeFrequencyLimit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyWindow {
    pub window_seconds: u64,
    pub max_count: u32,
    pub timestamps: Vec<DateTime<Utc>>,
}

impl FrequencyWindow {
    pub fn count_within(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::seconds(self.window_seconds as i64);
        self.timestamps.iter().filter(|t| **t > cutoff).count()
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(self.window_seconds as i64);
        self.timestamps.retain(|t| *t > cutoff);
        self.timestamps.push(now);
    }
}

/// Safe-mode marker set when the event core detects queue overflow or
/// another integrity-threatening condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorState {
    #[default]
    Normal,
    Safe,
}

/// Per-account mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub account_id: String,
    pub open_positions: BTreeMap<String, Position>,
    pub realized_pnl_today: Cents,
    pub lockout_until: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub frequency_windows: BTreeMap<String, FrequencyWindow>,
    pub last_daily_reset: Option<DateTime<Utc>>,
    pub last_processed_event_id: Option<Uuid>,
    pub error_state: ErrorState,
    #[serde(default, flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl AccountState {
    pub fn new(account_id: impl Into<String>) -> Self {
        AccountState {
            account_id: account_id.into(),
            open_positions: BTreeMap::new(),
            realized_pnl_today: Cents::ZERO,
            lockout_until: None,
            cooldown_until: None,
            frequency_windows: BTreeMap::new(),
            last_daily_reset: None,
            last_processed_event_id: None,
            error_state: ErrorState::Normal,
            extensions: BTreeMap::new(),
        }
    }

    /// `combined_exposure` = realized_pnl_today + sum(unrealized_pnl of all
    /// open positions), recomputed from scratch rather than maintained
    /// incrementally so reconciliation can never drift from it.
    pub fn combined_exposure(&self) -> Cents {
        self.open_positions
            .values()
            .fold(self.realized_pnl_today, |acc, p| acc + p.unrealized_pnl)
    }

    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.map(|until| now < until).unwrap_or(false)
    }

    pub fn is_in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }
}

/// Severity of a [`RuleViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A single rule firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_name: &'static str,
    pub severity: Severity,
    pub account_id: String,
    pub detail: String,
    pub action: EnforcementAction,
}

/// Result of a broker-confirmed close, used to update `AccountState` after
/// enforcement dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedClose {
    pub position_id: String,
    pub closed_quantity: i64,
    pub close_price: String,
    pub realized_pnl: Cents,
    pub confirmed_at: DateTime<Utc>,
}

/// The concrete action the enforcement engine must carry out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EnforcementAction {
    ClosePosition {
        position_id: String,
        quantity: Option<i64>,
    },
    FlattenAccount,
    SetLockout { until: DateTime<Utc> },
    StartCooldown { seconds: u64 },
    SendAlert { severity: Severity, text: String },
}

impl EnforcementAction {
    /// Critical actions retry indefinitely (capped backoff); non-critical
    /// actions give up after a bounded number of attempts.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            EnforcementAction::ClosePosition { .. }
                | EnforcementAction::FlattenAccount
                | EnforcementAction::SetLockout { .. }
        )
    }

    /// Idempotency key component distinguishing action kinds: either
    /// `(account_id, position_id, action_type)` or
    /// `(account_id, "flatten"|"lockout")`.
    pub fn idempotency_discriminant(&self) -> String {
        match self {
            EnforcementAction::ClosePosition { position_id, .. } => {
                format!("close:{position_id}")
            }
            EnforcementAction::FlattenAccount => "flatten".to_string(),
            EnforcementAction::SetLockout { .. } => "lockout".to_string(),
            EnforcementAction::StartCooldown { .. } => "cooldown".to_string(),
            EnforcementAction::SendAlert { .. } => "alert".to_string(),
        }
    }
}

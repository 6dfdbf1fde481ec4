//! Position/account mutations: `add_or_merge_position`, `update_price`,
//! `close_position`, `mark_pending_close`/`clear_pending_close`,
//! `set_lockout`, `start_cooldown`, `record_trade`, `daily_reset`.

use chrono::{DateTime, Utc};
use riskd_clock::DailyResetSchedule;
use riskd_money::{unrealized_pnl_cents, Cents, Price};
use riskd_schemas::{AccountState, ConfirmedClose, ErrorState, FrequencyWindow, Position, Side};
use std::collections::BTreeMap;

/// Owns one account's mutable state and applies its mutation vocabulary to
/// it. Persistence is a separate concern ([`crate::persistence`]); this
/// type only holds state in memory.
pub struct AccountStore {
    pub state: AccountState,
}

fn signed_diff(side: Side, entry: Price, current: Price) -> Price {
    match side {
        Side::Long => Price::new(current.raw() - entry.raw()),
        Side::Short => Price::new(entry.raw() - current.raw()),
    }
}

impl AccountStore {
    pub fn new(account_id: impl Into<String>) -> Self {
        AccountStore {
            state: AccountState::new(account_id),
        }
    }

    pub fn from_state(state: AccountState) -> Self {
        AccountStore { state }
    }

    /// Open a new position, or merge into an existing one at the same
    /// symbol+side by weighted-average entry price.
    pub fn add_or_merge_position(
        &mut self,
        position_id: &str,
        symbol: &str,
        side: Side,
        quantity: i64,
        entry_price: Price,
        tick_value: Cents,
        now: DateTime<Utc>,
    ) {
        match self.state.open_positions.get_mut(position_id) {
            Some(existing) => {
                let prior_entry = Price::parse(&existing.entry_price).unwrap_or(Price::ZERO);
                let total_qty = existing.quantity + quantity;
                let weighted = if total_qty > 0 {
                    Price::new(
                        ((prior_entry.raw() as i128 * existing.quantity as i128
                            + entry_price.raw() as i128 * quantity as i128)
                            / total_qty as i128) as i64,
                    )
                } else {
                    prior_entry
                };
                existing.quantity = total_qty;
                existing.entry_price = weighted.to_string();
                existing.last_update = now;
                recompute_unrealized(existing, tick_value);
            }
            None => {
                let mut pos = Position {
                    position_id: position_id.to_string(),
                    account_id: self.state.account_id.clone(),
                    symbol: symbol.to_string(),
                    side,
                    quantity,
                    entry_price: entry_price.to_string(),
                    current_price: entry_price.to_string(),
                    unrealized_pnl: Cents::ZERO,
                    opened_at: now,
                    last_update: now,
                    pending_close: false,
                    stop_loss_attached: false,
                    stop_loss_price: None,
                    stop_loss_grace_expires: None,
                    extensions: BTreeMap::new(),
                };
                recompute_unrealized(&mut pos, tick_value);
                self.state.open_positions.insert(position_id.to_string(), pos);
            }
        }
    }

    /// Apply a new mark price and recompute `unrealized_pnl`.
    pub fn update_price(&mut self, position_id: &str, current_price: Price, tick_value: Cents, now: DateTime<Utc>) {
        if let Some(pos) = self.state.open_positions.get_mut(position_id) {
            pos.current_price = current_price.to_string();
            pos.last_update = now;
            recompute_unrealized(pos, tick_value);
        }
    }

    /// Close all or part of a position, realizing pnl for the closed
    /// quantity into `realized_pnl_today`. Returns the realized pnl booked,
    /// or `None` if the position does not exist.
    pub fn close_position(
        &mut self,
        position_id: &str,
        quantity: Option<i64>,
        close_price: Price,
        tick_value: Cents,
        now: DateTime<Utc>,
    ) -> Option<Cents> {
        let pos = self.state.open_positions.get_mut(position_id)?;
        let entry = Price::parse(&pos.entry_price).unwrap_or(Price::ZERO);
        let closed_qty = quantity.unwrap_or(pos.quantity).min(pos.quantity);
        if closed_qty <= 0 {
            return Some(Cents::ZERO);
        }
        let diff = signed_diff(pos.side, entry, close_price);
        let realized = unrealized_pnl_cents(diff, closed_qty, tick_value);

        let remaining = pos.quantity - closed_qty;
        if remaining <= 0 {
            self.state.open_positions.remove(position_id);
        } else {
            pos.quantity = remaining;
            pos.last_update = now;
            pos.pending_close = false;
            recompute_unrealized(pos, tick_value);
        }
        self.state.realized_pnl_today += realized;
        Some(realized)
    }

    /// Book a broker-confirmed close. Unlike [`Self::close_position`], the
    /// realized pnl comes from the broker rather than being recomputed here
    /// — the adapter is the authority on its own fill price and tick value.
    pub fn apply_confirmed_close(&mut self, confirmed: &ConfirmedClose) {
        self.state.realized_pnl_today += confirmed.realized_pnl;
        if let Some(pos) = self.state.open_positions.get_mut(&confirmed.position_id) {
            let remaining = pos.quantity - confirmed.closed_quantity;
            if remaining <= 0 {
                self.state.open_positions.remove(&confirmed.position_id);
            } else {
                pos.quantity = remaining;
                pos.last_update = confirmed.confirmed_at;
                pos.pending_close = false;
            }
        }
    }

    /// Attach a stop-loss grace deadline to a just-opened position, for the
    /// NoStopLossGrace rule. A no-op if the position already has one or
    /// does not exist — merging into an existing position never resets its
    /// grace clock.
    pub fn start_stop_loss_grace(&mut self, position_id: &str, grace_seconds: u64, now: DateTime<Utc>) {
        if let Some(pos) = self.state.open_positions.get_mut(position_id) {
            if pos.stop_loss_grace_expires.is_none() && !pos.stop_loss_attached {
                pos.stop_loss_grace_expires = Some(now + chrono::Duration::seconds(grace_seconds as i64));
            }
        }
    }

    /// Mark every open position on `symbol` that doesn't already have one as
    /// stop-loss attached, matched by symbol rather than `position_id` since
    /// the signal that drives this (a broker order-update) doesn't carry a
    /// position id of its own.
    pub fn attach_stop_loss(&mut self, symbol: &str, now: DateTime<Utc>) {
        for pos in self.state.open_positions.values_mut() {
            if pos.symbol == symbol && !pos.stop_loss_attached {
                pos.stop_loss_attached = true;
                pos.last_update = now;
            }
        }
    }

    pub fn mark_pending_close(&mut self, position_id: &str) {
        if let Some(pos) = self.state.open_positions.get_mut(position_id) {
            pos.pending_close = true;
        }
    }

    pub fn clear_pending_close(&mut self, position_id: &str) {
        if let Some(pos) = self.state.open_positions.get_mut(position_id) {
            pos.pending_close = false;
        }
    }

    pub fn set_lockout(&mut self, until: DateTime<Utc>) {
        self.state.lockout_until = Some(until);
    }

    pub fn start_cooldown(&mut self, seconds: u64, now: DateTime<Utc>) {
        self.state.cooldown_until = Some(now + chrono::Duration::seconds(seconds as i64));
    }

    /// Record a trade event against a named frequency window (e.g.
    /// `"fills"`), used by TradeFrequencyLimit.
    pub fn record_trade(&mut self, window_key: &str, window_seconds: u64, max_count: u32, now: DateTime<Utc>) {
        let window = self
            .state
            .frequency_windows
            .entry(window_key.to_string())
            .or_insert_with(|| FrequencyWindow {
                window_seconds,
                max_count,
                timestamps: Vec::new(),
            });
        window.record(now);
    }

    /// Daily reset: zero `realized_pnl_today`, clear daily lockouts, reset
    /// frequency windows, stamp `last_daily_reset`. Intended
    /// to be called once per crossing of [`DailyResetSchedule`]; callers are
    /// responsible for the per-minute crossing check via
    /// `DailyResetSchedule::crossed_since`.
    pub fn daily_reset(&mut self, reset_instant: DateTime<Utc>) {
        self.state.realized_pnl_today = Cents::ZERO;
        self.state.lockout_until = None;
        for window in self.state.frequency_windows.values_mut() {
            window.timestamps.clear();
        }
        self.state.last_daily_reset = Some(reset_instant);
        self.state.error_state = ErrorState::Normal;
    }

    /// Whether a daily reset is due given `schedule` and the current time.
    pub fn daily_reset_due(&self, schedule: &DailyResetSchedule, now: DateTime<Utc>) -> bool {
        schedule.crossed_since(self.state.last_daily_reset, now)
    }
}

fn recompute_unrealized(pos: &mut Position, tick_value: Cents) {
    let entry = Price::parse(&pos.entry_price).unwrap_or(Price::ZERO);
    let current = Price::parse(&pos.current_price).unwrap_or(entry);
    let diff = signed_diff(pos.side, entry, current);
    pos.unrealized_pnl = unrealized_pnl_cents(diff, pos.quantity, tick_value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn add_then_price_update_matches_scenario_b_unrealized() {
        let mut store = AccountStore::new("acct-1");
        store.add_or_merge_position(
            "p1",
            "MNQ",
            Side::Long,
            2,
            Price::parse("5000.00").unwrap(),
            Cents::new(500),
            t(0),
        );
        store.update_price("p1", Price::parse("4990.00").unwrap(), Cents::new(500), t(1));
        let pos = &store.state.open_positions["p1"];
        assert_eq!(pos.unrealized_pnl, Cents::new(-10_000));
    }

    #[test]
    fn close_position_books_realized_and_removes_when_flat() {
        let mut store = AccountStore::new("acct-1");
        store.add_or_merge_position(
            "p1",
            "MNQ",
            Side::Long,
            2,
            Price::parse("5000.00").unwrap(),
            Cents::new(500),
            t(0),
        );
        let realized = store
            .close_position("p1", None, Price::parse("4990.00").unwrap(), Cents::new(500), t(1))
            .unwrap();
        assert_eq!(realized, Cents::new(-10_000));
        assert_eq!(store.state.realized_pnl_today, Cents::new(-10_000));
        assert!(!store.state.open_positions.contains_key("p1"));
    }

    #[test]
    fn partial_close_leaves_remainder_open() {
        let mut store = AccountStore::new("acct-1");
        store.add_or_merge_position(
            "p1",
            "MNQ",
            Side::Long,
            4,
            Price::parse("5000.00").unwrap(),
            Cents::new(500),
            t(0),
        );
        store
            .close_position("p1", Some(1), Price::parse("5010.00").unwrap(), Cents::new(500), t(1))
            .unwrap();
        let pos = &store.state.open_positions["p1"];
        assert_eq!(pos.quantity, 3);
        assert_eq!(store.state.realized_pnl_today, Cents::new(5_000));
    }

    #[test]
    fn apply_confirmed_close_trusts_broker_realized_pnl() {
        let mut store = AccountStore::new("acct-1");
        store.add_or_merge_position(
            "p1",
            "MNQ",
            Side::Long,
            2,
            Price::parse("5000.00").unwrap(),
            Cents::new(500),
            t(0),
        );
        store.apply_confirmed_close(&riskd_schemas::ConfirmedClose {
            position_id: "p1".into(),
            closed_quantity: 2,
            close_price: "4990.00".into(),
            realized_pnl: Cents::new(-12_345),
            confirmed_at: t(1),
        });
        assert_eq!(store.state.realized_pnl_today, Cents::new(-12_345));
        assert!(!store.state.open_positions.contains_key("p1"));
    }

    #[test]
    fn start_stop_loss_grace_does_not_overwrite_existing_deadline() {
        let mut store = AccountStore::new("acct-1");
        store.add_or_merge_position(
            "p1",
            "MNQ",
            Side::Long,
            1,
            Price::parse("5000.00").unwrap(),
            Cents::new(500),
            t(0),
        );
        store.start_stop_loss_grace("p1", 30, t(0));
        let first = store.state.open_positions["p1"].stop_loss_grace_expires;
        store.start_stop_loss_grace("p1", 999, t(5));
        assert_eq!(store.state.open_positions["p1"].stop_loss_grace_expires, first);
    }

    #[test]
    fn attach_stop_loss_sets_flag_on_matching_symbol_only() {
        let mut store = AccountStore::new("acct-1");
        store.add_or_merge_position("p1", "MNQ", Side::Long, 1, Price::parse("5000.00").unwrap(), Cents::new(500), t(0));
        store.add_or_merge_position("p2", "ES", Side::Long, 1, Price::parse("5000.00").unwrap(), Cents::new(5_000), t(0));
        store.attach_stop_loss("MNQ", t(1));
        assert!(store.state.open_positions["p1"].stop_loss_attached);
        assert!(!store.state.open_positions["p2"].stop_loss_attached);
    }

    #[test]
    fn daily_reset_zeros_realized_and_clears_lockout() {
        let mut store = AccountStore::new("acct-1");
        store.state.realized_pnl_today = Cents::new(-100_000);
        store.set_lockout(t(20));
        store.daily_reset(t(17));
        assert_eq!(store.state.realized_pnl_today, Cents::ZERO);
        assert!(store.state.lockout_until.is_none());
        assert_eq!(store.state.last_daily_reset, Some(t(17)));
    }
}

//! Deterministic in-memory broker adapter used by the daemon binary when no
//! live broker connection is configured, and by integration tests that need
//! a real [`BrokerAdapter`] impl rather than the scripted
//! `riskd_testkit::FakeBrokerAdapter`.
//!
//! No randomness, no wall-clock reads baked into identifiers,
//! resubmits/re-closes are idempotent by construction. Only satisfies the
//! narrow `BrokerAdapter` capability — report positions, close in full or
//! in part, flatten an account, quote a tick value — since order
//! submission/cancellation is the broker SDK's job, not this adapter's.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use riskd_enforcement::{AdapterError, BrokerAdapter};
use riskd_money::{unrealized_pnl_cents, Cents, Price};
use riskd_reconcile::BrokerPositionSnapshot;
use riskd_schemas::{ConfirmedClose, Side};

#[derive(Clone, Debug, PartialEq, Eq)]
struct PaperPosition {
    symbol: String,
    side: Side,
    quantity: i64,
    entry_price: String,
    current_price: String,
}

#[derive(Default)]
struct AccountBook {
    positions: BTreeMap<String, PaperPosition>,
}

/// In-memory broker double, one instance backing every configured account.
pub struct PaperBroker {
    books: Mutex<BTreeMap<String, AccountBook>>,
    tick_values: BTreeMap<String, Cents>,
}

impl PaperBroker {
    pub fn new() -> Self {
        PaperBroker {
            books: Mutex::new(BTreeMap::new()),
            tick_values: BTreeMap::new(),
        }
    }

    pub fn with_tick_values(tick_values: BTreeMap<String, Cents>) -> Self {
        PaperBroker {
            books: Mutex::new(BTreeMap::new()),
            tick_values,
        }
    }

    /// Seed a position directly, bypassing fills — used to stand up
    /// reconciliation scenarios and local demo wiring without a real feed.
    pub fn seed_position(
        &self,
        account_id: impl Into<String>,
        position_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: i64,
        entry_price: impl Into<String>,
    ) {
        let mut books = self.books.lock().expect("paper broker lock poisoned");
        let entry_price = entry_price.into();
        let book = books.entry(account_id.into()).or_default();
        book.positions.insert(
            position_id.into(),
            PaperPosition {
                symbol: symbol.into(),
                side,
                quantity,
                current_price: entry_price.clone(),
                entry_price,
            },
        );
    }

    /// Mark a seeded position to a new price, so a subsequent close realizes
    /// a nonzero pnl instead of always settling flat.
    pub fn mark_price(&self, account_id: &str, position_id: &str, price: impl Into<String>) {
        let mut books = self.books.lock().expect("paper broker lock poisoned");
        if let Some(position) = books
            .get_mut(account_id)
            .and_then(|book| book.positions.get_mut(position_id))
        {
            position.current_price = price.into();
        }
    }

    fn tick_value_or_zero(&self, symbol: &str) -> Cents {
        self.tick_values.get(symbol).copied().unwrap_or(Cents::ZERO)
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    async fn get_current_positions(&self, account_id: &str) -> Result<Vec<BrokerPositionSnapshot>, AdapterError> {
        let books = self.books.lock().expect("paper broker lock poisoned");
        Ok(books
            .get(account_id)
            .map(|book| {
                book.positions
                    .iter()
                    .map(|(position_id, p)| BrokerPositionSnapshot {
                        position_id: position_id.clone(),
                        symbol: p.symbol.clone(),
                        side: p.side,
                        quantity: p.quantity,
                        entry_price: p.entry_price.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn close_position(
        &self,
        account_id: &str,
        position_id: &str,
        quantity: Option<i64>,
    ) -> Result<ConfirmedClose, AdapterError> {
        let mut books = self.books.lock().expect("paper broker lock poisoned");
        let Some(book) = books.get_mut(account_id) else {
            return Err(AdapterError::Permanent(format!("unknown account {account_id}")));
        };
        let Some(position) = book.positions.get_mut(position_id) else {
            return Err(AdapterError::Permanent(format!("unknown position {position_id}")));
        };

        let close_qty = quantity.unwrap_or(position.quantity).min(position.quantity);
        if close_qty <= 0 {
            return Err(AdapterError::Permanent(format!(
                "nothing to close for {position_id}"
            )));
        }

        let entry = Price::parse(&position.entry_price).unwrap_or(Price::ZERO);
        let close = Price::parse(&position.current_price).unwrap_or(entry);
        let diff = match position.side {
            Side::Long => close - entry,
            Side::Short => entry - close,
        };
        let tick_value = self.tick_value_or_zero(&position.symbol);
        let realized_pnl = unrealized_pnl_cents(diff, close_qty, tick_value);
        let close_price = position.current_price.clone();

        position.quantity -= close_qty;
        if position.quantity == 0 {
            book.positions.remove(position_id);
        }

        Ok(ConfirmedClose {
            position_id: position_id.to_string(),
            closed_quantity: close_qty,
            close_price,
            realized_pnl,
            confirmed_at: Utc::now(),
        })
    }

    async fn flatten_account(&self, account_id: &str) -> Result<Vec<ConfirmedClose>, AdapterError> {
        let position_ids: Vec<String> = {
            let books = self.books.lock().expect("paper broker lock poisoned");
            books
                .get(account_id)
                .map(|book| book.positions.keys().cloned().collect())
                .unwrap_or_default()
        };
        let mut closes = Vec::with_capacity(position_ids.len());
        for position_id in position_ids {
            closes.push(self.close_position(account_id, &position_id, None).await?);
        }
        Ok(closes)
    }

    fn tick_value(&self, symbol: &str) -> Option<Cents> {
        self.tick_values.get(symbol).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_position_realizes_pnl_from_marked_price() {
        let mut tick_values = BTreeMap::new();
        tick_values.insert("MNQ".to_string(), Cents::new(500));
        let broker = PaperBroker::with_tick_values(tick_values);
        broker.seed_position("acct-1", "p1", "MNQ", Side::Long, 2, "5000.00");
        broker.mark_price("acct-1", "p1", "5010.00");

        let confirmed = broker.close_position("acct-1", "p1", None).await.unwrap();
        assert_eq!(confirmed.closed_quantity, 2);
        assert_eq!(confirmed.realized_pnl, Cents::new(10_000)); // 10 pts * 2 qty * $5.00
        assert!(broker.get_current_positions("acct-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_close_leaves_remainder_open() {
        let broker = PaperBroker::new();
        broker.seed_position("acct-1", "p1", "ES", Side::Long, 3, "4500.00");

        let confirmed = broker.close_position("acct-1", "p1", Some(1)).await.unwrap();
        assert_eq!(confirmed.closed_quantity, 1);
        let remaining = broker.get_current_positions("acct-1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].quantity, 2);
    }

    #[tokio::test]
    async fn flatten_closes_every_open_position() {
        let broker = PaperBroker::new();
        broker.seed_position("acct-1", "p1", "MNQ", Side::Long, 2, "5000.00");
        broker.seed_position("acct-1", "p2", "ES", Side::Short, 1, "4500.00");

        let closes = broker.flatten_account("acct-1").await.unwrap();
        assert_eq!(closes.len(), 2);
        assert!(broker.get_current_positions("acct-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closing_unknown_position_is_permanent() {
        let broker = PaperBroker::new();
        let err = broker.close_position("acct-1", "ghost", None).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn unknown_account_returns_empty_snapshot() {
        let broker = PaperBroker::new();
        assert!(broker.get_current_positions("no-such-acct").await.unwrap().is_empty());
    }
}

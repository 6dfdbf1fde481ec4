//! Deterministic in-memory broker adapter for tests: accepts close/flatten
//! requests and immediately confirms them at a configured price, with no
//! randomness and no network I/O.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use riskd_enforcement::{AdapterError, BrokerAdapter};
use riskd_money::Cents;
use riskd_reconcile::BrokerPositionSnapshot;
use riskd_schemas::ConfirmedClose;

#[derive(Default)]
pub struct FakeBrokerAdapter {
    inner: Mutex<FakeBrokerState>,
}

#[derive(Default)]
struct FakeBrokerState {
    positions: Vec<BrokerPositionSnapshot>,
    closes: Vec<ConfirmedClose>,
    /// When set, the next N close/flatten calls fail transiently before
    /// succeeding — used to exercise the enforcement retry loop.
    fail_next: u32,
}

impl FakeBrokerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positions(positions: Vec<BrokerPositionSnapshot>) -> Self {
        FakeBrokerAdapter {
            inner: Mutex::new(FakeBrokerState {
                positions,
                closes: Vec::new(),
                fail_next: 0,
            }),
        }
    }

    pub fn fail_next_calls(&self, n: u32) {
        self.inner.lock().unwrap().fail_next = n;
    }

    pub fn closes(&self) -> Vec<ConfirmedClose> {
        self.inner.lock().unwrap().closes.clone()
    }

    fn maybe_fail(&self) -> Option<AdapterError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Some(AdapterError::Transient("fake broker: simulated failure".to_string()));
        }
        None
    }
}

#[async_trait]
impl BrokerAdapter for FakeBrokerAdapter {
    async fn get_current_positions(&self, _account_id: &str) -> Result<Vec<BrokerPositionSnapshot>, AdapterError> {
        Ok(self.inner.lock().unwrap().positions.clone())
    }

    async fn close_position(
        &self,
        _account_id: &str,
        position_id: &str,
        quantity: Option<i64>,
    ) -> Result<ConfirmedClose, AdapterError> {
        if let Some(err) = self.maybe_fail() {
            return Err(err);
        }
        let mut state = self.inner.lock().unwrap();
        let closed_quantity = state
            .positions
            .iter()
            .find(|p| p.position_id == position_id)
            .map(|p| quantity.unwrap_or(p.quantity))
            .ok_or_else(|| AdapterError::Permanent(format!("unknown position {position_id}")))?;
        state.positions.retain(|p| p.position_id != position_id || quantity.is_some());
        let close = ConfirmedClose {
            position_id: position_id.to_string(),
            closed_quantity,
            close_price: "0.00".to_string(),
            realized_pnl: Cents::ZERO,
            confirmed_at: Utc::now(),
        };
        state.closes.push(close.clone());
        Ok(close)
    }

    async fn flatten_account(&self, account_id: &str) -> Result<Vec<ConfirmedClose>, AdapterError> {
        if let Some(err) = self.maybe_fail() {
            return Err(err);
        }
        let position_ids: Vec<String> = {
            let state = self.inner.lock().unwrap();
            state.positions.iter().map(|p| p.position_id.clone()).collect()
        };
        let mut closes = Vec::new();
        for position_id in position_ids {
            closes.push(self.close_position(account_id, &position_id, None).await?);
        }
        Ok(closes)
    }

    fn tick_value(&self, _symbol: &str) -> Option<Cents> {
        None
    }
}

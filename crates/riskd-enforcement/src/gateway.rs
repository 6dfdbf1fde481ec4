//! Broker Gateway — the single choke-point through which every broker call
//! the enforcement engine makes must flow.
//!
//! This engine has no arm/disarm lifecycle to gate on — the gates here are
//! idempotency (refuse a second dispatch for a key already in flight) and
//! retry policy (differentiated by action criticality), both enforced
//! internally rather than by verdicts the caller supplies.

use std::future::Future;
use std::time::Duration;

use riskd_schemas::{ConfirmedClose, EnforcementAction};

use crate::adapter::{AdapterError, BrokerAdapter};
use crate::idempotency::{self, InFlightSet};
use crate::retry::RetryPolicy;

const ADAPTER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a dispatch attempt: `None` means the request was dropped
/// because a dispatch for the same idempotency key was already in flight.
pub type DispatchResult<T> = Result<Option<T>, AdapterError>;

pub struct BrokerGateway<B: BrokerAdapter> {
    broker: B,
    in_flight: InFlightSet,
}

impl<B: BrokerAdapter> BrokerGateway<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            in_flight: InFlightSet::new(),
        }
    }

    pub fn tick_value(&self, symbol: &str) -> Option<riskd_money::Cents> {
        self.broker.tick_value(symbol)
    }

    pub async fn close_position(
        &mut self,
        account_id: &str,
        position_id: &str,
        quantity: Option<i64>,
    ) -> DispatchResult<ConfirmedClose> {
        let action = EnforcementAction::ClosePosition {
            position_id: position_id.to_string(),
            quantity,
        };
        let key = idempotency::key_for(account_id, &action);
        if !self.in_flight.begin(&key) {
            tracing::debug!(%key, "close_position already in flight, dropping duplicate");
            return Ok(None);
        }
        let policy = RetryPolicy::for_action(&action);
        let result = run_with_retry(policy, || self.broker.close_position(account_id, position_id, quantity)).await;
        self.in_flight.finish(&key);
        result.map(Some)
    }

    pub async fn flatten_account(&mut self, account_id: &str) -> DispatchResult<Vec<ConfirmedClose>> {
        let action = EnforcementAction::FlattenAccount;
        let key = idempotency::key_for(account_id, &action);
        if !self.in_flight.begin(&key) {
            tracing::debug!(%key, "flatten_account already in flight, dropping duplicate");
            return Ok(None);
        }
        let policy = RetryPolicy::for_action(&action);
        let result = run_with_retry(policy, || self.broker.flatten_account(account_id)).await;
        self.in_flight.finish(&key);
        result.map(Some)
    }
}

async fn run_with_retry<F, Fut, T>(policy: RetryPolicy, mut op: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(ADAPTER_CALL_TIMEOUT, op()).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Transient("adapter call timed out".to_string())),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(err @ AdapterError::Permanent(_)) => {
                tracing::error!(%err, "permanent adapter error, not retrying");
                return Err(err);
            }
            Err(err @ AdapterError::Transient(_)) => {
                if policy.exhausted(attempt) {
                    tracing::error!(%err, attempt, "retry budget exhausted");
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(%err, attempt, ?delay, "transient adapter error, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

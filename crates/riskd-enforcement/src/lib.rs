//! Executes enforcement actions against a broker adapter.
//!
//! Only [`riskd_schemas::EnforcementAction::ClosePosition`] and
//! `FlattenAccount` reach a broker call — they go through [`BrokerGateway`],
//! which owns idempotency tracking and retry policy. `SetLockout`,
//! `StartCooldown`, and `SendAlert` are local state/notification effects
//! applied directly by the dispatcher and never touch this crate's gateway.

mod adapter;
mod gateway;
mod idempotency;
mod retry;

pub use adapter::{AdapterError, BrokerAdapter};
pub use gateway::{BrokerGateway, DispatchResult};
pub use idempotency::{key_for, InFlightSet};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use riskd_money::Cents;
use riskd_reconcile::BrokerPositionSnapshot;
use riskd_schemas::ConfirmedClose;

/// Broker failures split into what's worth retrying and what isn't.
/// Transient covers network/timeout/5xx-equivalent conditions; Permanent
/// covers a broker-side rejection that retrying cannot fix (unknown
/// position, rejected order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    Transient(String),
    Permanent(String),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::Transient(msg) => write!(f, "transient adapter error: {msg}"),
            AdapterError::Permanent(msg) => write!(f, "permanent adapter error: {msg}"),
        }
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

/// The capability a broker connection must provide. Event delivery
/// (`subscribe_events`) is modeled as a normal [`riskd_schemas::Event`]
/// producer outside this trait — the adapter pushes onto the event core's
/// queue directly rather than through a call the dispatcher awaits.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn get_current_positions(&self, account_id: &str) -> Result<Vec<BrokerPositionSnapshot>, AdapterError>;

    async fn close_position(
        &self,
        account_id: &str,
        position_id: &str,
        quantity: Option<i64>,
    ) -> Result<ConfirmedClose, AdapterError>;

    async fn flatten_account(&self, account_id: &str) -> Result<Vec<ConfirmedClose>, AdapterError>;

    /// Per-contract tick value for the given symbol, sourced from the
    /// broker's contract spec when available. Callers fall back to static
    /// configuration when this returns `None`.
    fn tick_value(&self, symbol: &str) -> Option<Cents>;
}

#[async_trait]
impl BrokerAdapter for std::sync::Arc<dyn BrokerAdapter> {
    async fn get_current_positions(&self, account_id: &str) -> Result<Vec<BrokerPositionSnapshot>, AdapterError> {
        (**self).get_current_positions(account_id).await
    }

    async fn close_position(
        &self,
        account_id: &str,
        position_id: &str,
        quantity: Option<i64>,
    ) -> Result<ConfirmedClose, AdapterError> {
        (**self).close_position(account_id, position_id, quantity).await
    }

    async fn flatten_account(&self, account_id: &str) -> Result<Vec<ConfirmedClose>, AdapterError> {
        (**self).flatten_account(account_id).await
    }

    fn tick_value(&self, symbol: &str) -> Option<Cents> {
        (**self).tick_value(symbol)
    }
}

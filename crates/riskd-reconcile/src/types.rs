use riskd_schemas::Side;

/// One position as reported by the broker at startup, independent of
/// whatever the persisted account state believes. Shape mirrors
/// [`riskd_schemas::Position`] but carries only what a broker snapshot can
/// actually tell us — no pending-close or stop-loss bookkeeping, since that
/// is local risk-engine state the broker has no notion of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerPositionSnapshot {
    pub position_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub entry_price: String,
}

/// A broker snapshot bundled with the time it was fetched, so
/// [`crate::watermark::SnapshotWatermark`] can reject a stale snapshot
/// before it reaches the reconciliation engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerPositionsSnapshot {
    pub fetched_at_ms: i64,
    pub positions: Vec<BrokerPositionSnapshot>,
}

/// One adjustment the reconciler made to bring local state in line with the
/// broker. Reconciliation here is asymmetric and self-healing: it adds what
/// it was missing and drops what no longer exists, rather than refusing to
/// proceed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileDiff {
    /// The broker reports a position the persisted state didn't know about;
    /// it was added with `pending_close = false` and `stop_loss_attached =
    /// false` since the daemon has no record of either.
    AddedFromBroker { position_id: String, symbol: String },
    /// The persisted state held a position the broker no longer reports
    /// (closed elsewhere, e.g. manually or by another system); it was
    /// removed with zero realized pnl booked, since the daemon did not
    /// observe the close and cannot know its price.
    RemovedNotAtBroker { position_id: String, symbol: String },
}

/// Full reconciliation report for one account.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    pub diffs: Vec<ReconcileDiff>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.diffs.is_empty()
    }
}

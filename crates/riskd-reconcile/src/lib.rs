//! Startup (and periodic) reconciliation between persisted account state and
//! what the broker actually reports holding.
//!
//! This daemon has no arm/disarm lifecycle of its own — it reconciles and
//! heals: a position the broker has that local state doesn't gets adopted, a
//! position local state has that the broker doesn't gets dropped, and
//! combined exposure is recomputed from the result rather than carried
//! forward. `Engine::reconcile_all` stamps each fetch with the instant it
//! was taken and runs it through a per-account [`SnapshotWatermark`] first,
//! so a fetch that somehow arrives out of order against the last one
//! accepted gets rejected instead of silently corrupting the reconciliation.

mod engine;
mod types;
mod watermark;

pub use engine::reconcile;
pub use types::{BrokerPositionSnapshot, BrokerPositionsSnapshot, ReconcileDiff, ReconcileReport};
pub use watermark::{SnapshotFreshness, SnapshotWatermark};

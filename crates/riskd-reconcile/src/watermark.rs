//! Snapshot monotonicity watermark.
//!
//! A stale broker snapshot can mask a position that was actually closed, or
//! resurrect one that was actually opened and since closed again. This
//! tracks the fetch timestamp of the last accepted snapshot and rejects any
//! snapshot older than that, failing closed on an untimed or
//! backwards-moving source.

use crate::types::BrokerPositionsSnapshot;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotFreshness {
    Fresh,
    Stale { watermark_ms: i64, got_ms: i64 },
    NoTimestamp,
}

impl SnapshotFreshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, SnapshotFreshness::Fresh)
    }

    pub fn is_rejected(&self) -> bool {
        !self.is_fresh()
    }
}

#[derive(Clone, Debug)]
pub struct SnapshotWatermark {
    last_accepted_ms: i64,
}

impl Default for SnapshotWatermark {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotWatermark {
    pub fn new() -> Self {
        SnapshotWatermark {
            last_accepted_ms: i64::MIN,
        }
    }

    pub fn check(&self, snap: &BrokerPositionsSnapshot) -> SnapshotFreshness {
        if snap.fetched_at_ms == 0 {
            return SnapshotFreshness::NoTimestamp;
        }
        if snap.fetched_at_ms < self.last_accepted_ms {
            return SnapshotFreshness::Stale {
                watermark_ms: self.last_accepted_ms,
                got_ms: snap.fetched_at_ms,
            };
        }
        SnapshotFreshness::Fresh
    }

    pub fn accept(&mut self, snap: &BrokerPositionsSnapshot) -> SnapshotFreshness {
        let result = self.check(snap);
        if result.is_fresh() {
            self.last_accepted_ms = snap.fetched_at_ms;
        }
        result
    }

    pub fn last_accepted_ms(&self) -> i64 {
        self.last_accepted_ms
    }
}

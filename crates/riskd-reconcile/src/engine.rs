use crate::types::{BrokerPositionSnapshot, ReconcileDiff, ReconcileReport};
use chrono::{DateTime, Utc};
use riskd_money::Cents;
use riskd_schemas::{AccountState, Position};
use std::collections::BTreeMap;

/// Reconcile persisted account state against what the broker reports at
/// startup (or on a periodic re-sync), mutating `state` in place.
///
/// Policy is asymmetric, not a HALT gate: a position the broker has that
/// local state doesn't is adopted; a position local state has that the
/// broker doesn't is dropped. `combined_exposure` is never carried forward
/// incrementally through this — it's always recomputed from the
/// post-reconciliation position set by [`AccountState::combined_exposure`].
pub fn reconcile(
    state: &mut AccountState,
    broker: &[BrokerPositionSnapshot],
    now: DateTime<Utc>,
) -> ReconcileReport {
    let mut diffs = Vec::new();
    let broker_ids: BTreeMap<&str, &BrokerPositionSnapshot> =
        broker.iter().map(|p| (p.position_id.as_str(), p)).collect();

    // Drop positions local state believes are open but the broker no longer reports.
    let stale_ids: Vec<String> = state
        .open_positions
        .keys()
        .filter(|id| !broker_ids.contains_key(id.as_str()))
        .cloned()
        .collect();
    for id in stale_ids {
        if let Some(pos) = state.open_positions.remove(&id) {
            diffs.push(ReconcileDiff::RemovedNotAtBroker {
                position_id: id,
                symbol: pos.symbol,
            });
        }
    }

    // Adopt positions the broker reports that local state didn't know about.
    for bp in broker {
        if state.open_positions.contains_key(&bp.position_id) {
            continue;
        }
        let pos = Position {
            position_id: bp.position_id.clone(),
            account_id: state.account_id.clone(),
            symbol: bp.symbol.clone(),
            side: bp.side,
            quantity: bp.quantity,
            entry_price: bp.entry_price.clone(),
            current_price: bp.entry_price.clone(),
            unrealized_pnl: Cents::ZERO,
            opened_at: now,
            last_update: now,
            pending_close: false,
            stop_loss_attached: false,
            stop_loss_price: None,
            stop_loss_grace_expires: None,
            extensions: BTreeMap::new(),
        };
        diffs.push(ReconcileDiff::AddedFromBroker {
            position_id: bp.position_id.clone(),
            symbol: bp.symbol.clone(),
        });
        state.open_positions.insert(bp.position_id.clone(), pos);
    }

    ReconcileReport { diffs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use riskd_schemas::Side;

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn broker_extra_position_is_adopted() {
        let mut state = AccountState::new("acct-1");
        let broker = vec![BrokerPositionSnapshot {
            position_id: "p1".into(),
            symbol: "MNQ".into(),
            side: Side::Long,
            quantity: 2,
            entry_price: "5000.00".into(),
        }];
        let report = reconcile(&mut state, &broker, t());
        assert_eq!(report.diffs.len(), 1);
        assert!(matches!(report.diffs[0], ReconcileDiff::AddedFromBroker { .. }));
        assert!(state.open_positions.contains_key("p1"));
        assert!(!state.open_positions["p1"].pending_close);
        assert!(!state.open_positions["p1"].stop_loss_attached);
    }

    #[test]
    fn state_extra_position_is_dropped_with_no_realized_pnl() {
        let mut state = AccountState::new("acct-1");
        state.open_positions.insert(
            "p1".into(),
            Position {
                position_id: "p1".into(),
                account_id: "acct-1".into(),
                symbol: "MNQ".into(),
                side: Side::Long,
                quantity: 1,
                entry_price: "5000.00".into(),
                current_price: "5000.00".into(),
                unrealized_pnl: Cents::ZERO,
                opened_at: t(),
                last_update: t(),
                pending_close: false,
                stop_loss_attached: false,
                stop_loss_price: None,
                stop_loss_grace_expires: None,
                extensions: BTreeMap::new(),
            },
        );
        let before_realized = state.realized_pnl_today;
        let report = reconcile(&mut state, &[], t());
        assert_eq!(report.diffs.len(), 1);
        assert!(matches!(report.diffs[0], ReconcileDiff::RemovedNotAtBroker { .. }));
        assert!(!state.open_positions.contains_key("p1"));
        assert_eq!(state.realized_pnl_today, before_realized);
    }

    #[test]
    fn matching_positions_produce_clean_report() {
        let mut state = AccountState::new("acct-1");
        state.open_positions.insert(
            "p1".into(),
            Position {
                position_id: "p1".into(),
                account_id: "acct-1".into(),
                symbol: "MNQ".into(),
                side: Side::Long,
                quantity: 1,
                entry_price: "5000.00".into(),
                current_price: "5000.00".into(),
                unrealized_pnl: Cents::ZERO,
                opened_at: t(),
                last_update: t(),
                pending_close: false,
                stop_loss_attached: false,
                stop_loss_price: None,
                stop_loss_grace_expires: None,
                extensions: BTreeMap::new(),
            },
        );
        let broker = vec![BrokerPositionSnapshot {
            position_id: "p1".into(),
            symbol: "MNQ".into(),
            side: Side::Long,
            quantity: 1,
            entry_price: "5000.00".into(),
        }];
        let report = reconcile(&mut state, &broker, t());
        assert!(report.is_clean());
    }
}

//! Scenario A: MaxContracts closes the excess from the most recently opened
//! position (LIFO), leaving older positions untouched.

mod support;

use chrono::{TimeZone, Utc};
use riskd_reconcile::BrokerPositionSnapshot;
use riskd_schemas::Side;
use riskd_testkit::FakeBrokerAdapter;

#[tokio::test]
async fn excess_contracts_close_from_the_most_recently_opened_position() {
    let dir = support::tmp_dir("max-contracts-lifo");
    let broker = FakeBrokerAdapter::with_positions(vec![BrokerPositionSnapshot {
        position_id: "es".to_string(),
        symbol: "ES".to_string(),
        side: Side::Long,
        quantity: 3,
        entry_price: "4500.00".to_string(),
    }]);
    let harness = support::Harness::new(&dir, broker);

    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 1).unwrap();

    harness
        .send(riskd_testkit::fill_event(support::ACCOUNT, "mnq", "MNQ", 2, t0))
        .await;
    harness
        .send(riskd_testkit::fill_event(support::ACCOUNT, "es", "ES", 3, t1))
        .await;

    let state = harness.account_state().await;
    assert_eq!(state.open_positions.get("mnq").map(|p| p.quantity), Some(2));
    assert_eq!(state.open_positions.get("es").map(|p| p.quantity), Some(2));

    let closes = harness.broker.closes();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].position_id, "es");
    assert_eq!(closes[0].closed_quantity, 1);
}

//! NoStopLossGrace: a position with no stop-loss attached past its grace
//! window gets force-closed, but an `OrderUpdate` reporting a working stop
//! order attaches it and the same elapsed grace window no longer fires.

mod support;

use chrono::{TimeZone, Utc};
use riskd_schemas::{Event, EventPayload};
use riskd_testkit::FakeBrokerAdapter;
use uuid::Uuid;

fn time_tick(account_id: &str, ts: chrono::DateTime<Utc>, seq: u64) -> Event {
    Event::new(account_id, "test", ts, seq, Uuid::new_v4(), EventPayload::TimeTick)
}

#[tokio::test]
async fn position_with_no_stop_loss_is_closed_once_grace_elapses() {
    let dir = support::tmp_dir("stop-loss-grace-fires");
    let harness = support::Harness::with_state(&dir, FakeBrokerAdapter::new(), riskd_schemas::AccountState::new(support::ACCOUNT), |mut cfg| {
        cfg.stop_loss_grace_seconds = 60;
        cfg
    });

    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap();

    harness.send(riskd_testkit::fill_event(support::ACCOUNT, "p1", "MNQ", 1, t0)).await;
    // TimeTick re-checks the rules without mutating position state itself,
    // so this is purely "has the grace window elapsed" with nothing else
    // in play.
    harness.send(time_tick(support::ACCOUNT, t1, 2)).await;

    let state = harness.account_state().await;
    assert!(state.open_positions.is_empty());
    assert_eq!(harness.broker.closes().len(), 1);
}

#[tokio::test]
async fn order_update_attaching_stop_loss_prevents_the_grace_close() {
    let dir = support::tmp_dir("stop-loss-grace-attached");
    let harness = support::Harness::with_state(&dir, FakeBrokerAdapter::new(), riskd_schemas::AccountState::new(support::ACCOUNT), |mut cfg| {
        cfg.stop_loss_grace_seconds = 60;
        cfg
    });

    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
    let t0_5 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 30).unwrap();
    let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap();

    harness.send(riskd_testkit::fill_event(support::ACCOUNT, "p1", "MNQ", 1, t0)).await;
    // Before the grace window elapses, the broker reports the stop order is
    // live.
    harness
        .send(riskd_testkit::order_update_event(support::ACCOUNT, "ord-1", "MNQ", "working", t0_5))
        .await;

    let attached = harness.account_state().await;
    assert!(attached.open_positions["p1"].stop_loss_attached);

    // Same elapsed time past the grace window as the companion test above,
    // but the stop-loss is now attached so the rule must not fire.
    harness.send(time_tick(support::ACCOUNT, t1, 3)).await;

    let state = harness.account_state().await;
    assert!(state.open_positions.contains_key("p1"));
    assert!(harness.broker.closes().is_empty());
}

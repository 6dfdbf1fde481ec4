use chrono::{DateTime, Utc};
use riskd_money::Cents;
use riskd_schemas::{Event, EventPayload, Position, Side};
use std::collections::BTreeMap;
use uuid::Uuid;

pub fn open_position(position_id: &str, symbol: &str, quantity: i64, opened_at: DateTime<Utc>) -> Position {
    Position {
        position_id: position_id.to_string(),
        account_id: "acct-1".to_string(),
        symbol: symbol.to_string(),
        side: Side::Long,
        quantity,
        entry_price: "5000.00".to_string(),
        current_price: "5000.00".to_string(),
        unrealized_pnl: Cents::ZERO,
        opened_at,
        last_update: opened_at,
        pending_close: false,
        stop_loss_attached: false,
        stop_loss_price: None,
        stop_loss_grace_expires: None,
        extensions: BTreeMap::new(),
    }
}

pub fn fill_event(account_id: &str, position_id: &str, symbol: &str, quantity: i64, ts: DateTime<Utc>) -> Event {
    Event::new(
        account_id,
        "broker",
        ts,
        1,
        Uuid::new_v4(),
        EventPayload::Fill {
            position_id: position_id.to_string(),
            symbol: symbol.to_string(),
            side: Side::Long,
            quantity,
            price: "5000.00".to_string(),
        },
    )
}

pub fn order_update_event(account_id: &str, order_id: &str, symbol: &str, status: &str, ts: DateTime<Utc>) -> Event {
    Event::new(
        account_id,
        "broker",
        ts,
        1,
        Uuid::new_v4(),
        EventPayload::OrderUpdate {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            status: status.to_string(),
        },
    )
}

pub fn position_update_event(account_id: &str, position_id: &str, symbol: &str, current_price: &str, ts: DateTime<Utc>) -> Event {
    Event::new(
        account_id,
        "broker",
        ts,
        1,
        Uuid::new_v4(),
        EventPayload::PositionUpdate {
            position_id: position_id.to_string(),
            symbol: symbol.to_string(),
            current_price: current_price.to_string(),
        },
    )
}

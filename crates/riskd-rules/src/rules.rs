use crate::RuleKind;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use riskd_config::AccountRiskConfig;
use riskd_schemas::{AccountState, EnforcementAction, Event, EventPayload, RuleViolation, Severity};

fn violation(rule: RuleKind, account_id: &str, detail: impl Into<String>, action: EnforcementAction) -> RuleViolation {
    RuleViolation {
        rule_name: rule.name(),
        severity: rule.severity(),
        account_id: account_id.to_string(),
        detail: detail.into(),
        action,
    }
}

/// Whether `rule` is triggered by events of the shape `payload` carries, per
/// the trigger-events column of the rule table.
pub fn applies_to(rule: RuleKind, payload: &EventPayload) -> bool {
    use EventPayload::*;
    match rule {
        RuleKind::MaxContracts | RuleKind::MaxContractsPerInstrument | RuleKind::TradeFrequencyLimit | RuleKind::SymbolBlock => {
            matches!(payload, Fill { .. })
        }
        RuleKind::DailyRealizedLoss | RuleKind::DailyRealizedProfit | RuleKind::UnrealizedLoss | RuleKind::UnrealizedProfit => {
            matches!(payload, PositionUpdate { .. })
        }
        RuleKind::CooldownAfterLoss => false, // invoked directly on close confirmation, not via event dispatch
        RuleKind::NoStopLossGrace => matches!(payload, Fill { .. } | OrderUpdate { .. } | TimeTick),
        RuleKind::SessionBlockOutside => matches!(payload, Fill { .. } | SessionTick),
        RuleKind::AuthLossGuard => matches!(payload, ConnectionChange { connected: false, .. }),
    }
}

/// Evaluate one rule against an inbound event and the (already-updated)
/// account state. Pure: reads only, produces at most one violation.
pub fn evaluate(
    rule: RuleKind,
    event: &Event,
    state: &AccountState,
    config: &AccountRiskConfig,
    tz: Tz,
    now: DateTime<Utc>,
) -> Option<RuleViolation> {
    if !applies_to(rule, &event.payload) {
        return None;
    }
    match rule {
        RuleKind::MaxContracts => max_contracts(event, state, config),
        RuleKind::MaxContractsPerInstrument => max_contracts_per_instrument(event, state, config),
        RuleKind::DailyRealizedLoss => daily_realized_loss(&event.account_id, state, config),
        RuleKind::DailyRealizedProfit => daily_realized_profit(&event.account_id, state, config),
        RuleKind::UnrealizedLoss => unrealized_loss(event, state, config),
        RuleKind::UnrealizedProfit => unrealized_profit(event, state, config),
        RuleKind::TradeFrequencyLimit => trade_frequency_limit(event, state, config, now),
        RuleKind::CooldownAfterLoss => None,
        RuleKind::NoStopLossGrace => no_stop_loss_grace(&event.account_id, state, now),
        RuleKind::SessionBlockOutside => session_block_outside(event, config, tz, now),
        RuleKind::SymbolBlock => symbol_block(event, config),
        RuleKind::AuthLossGuard => auth_loss_guard(event, state, config),
    }
}

fn most_recently_opened<'a>(
    positions: impl Iterator<Item = &'a riskd_schemas::Position>,
) -> Option<&'a riskd_schemas::Position> {
    positions
        .filter(|p| p.quantity > 0)
        .max_by_key(|p| (p.opened_at, p.position_id.clone()))
}

fn max_contracts(event: &Event, state: &AccountState, config: &AccountRiskConfig) -> Option<RuleViolation> {
    if !matches!(event.payload, EventPayload::Fill { .. }) || config.max_contracts <= 0 {
        return None;
    }
    let total: i64 = state.open_positions.values().map(|p| p.quantity).sum();
    let excess = total - config.max_contracts;
    if excess <= 0 {
        return None;
    }
    let pos = most_recently_opened(state.open_positions.values())?;
    let close_qty = excess.min(pos.quantity);
    Some(violation(
        RuleKind::MaxContracts,
        &event.account_id,
        format!("total contracts {total} exceeds limit {}", config.max_contracts),
        EnforcementAction::ClosePosition {
            position_id: pos.position_id.clone(),
            quantity: Some(close_qty),
        },
    ))
}

fn max_contracts_per_instrument(event: &Event, state: &AccountState, config: &AccountRiskConfig) -> Option<RuleViolation> {
    let symbol = match &event.payload {
        EventPayload::Fill { symbol, .. } => symbol,
        _ => return None,
    };
    let limit = *config.max_contracts_per_instrument.get(symbol)?;
    if limit <= 0 {
        return None;
    }
    let qty_symbol: i64 = state
        .open_positions
        .values()
        .filter(|p| &p.symbol == symbol)
        .map(|p| p.quantity)
        .sum();
    let excess = qty_symbol - limit;
    if excess <= 0 {
        return None;
    }
    let pos = most_recently_opened(state.open_positions.values().filter(|p| &p.symbol == symbol))?;
    let close_qty = excess.min(pos.quantity);
    Some(violation(
        RuleKind::MaxContractsPerInstrument,
        &event.account_id,
        format!("{symbol} contracts {qty_symbol} exceeds limit {limit}"),
        EnforcementAction::ClosePosition {
            position_id: pos.position_id.clone(),
            quantity: Some(close_qty),
        },
    ))
}

/// Triggered by PositionUpdate dispatch and by a direct call right after a
/// close confirmation, since there is no dedicated Event variant for a
/// "close" to dispatch through (see module docs).
pub fn daily_realized_loss(account_id: &str, state: &AccountState, config: &AccountRiskConfig) -> Option<RuleViolation> {
    let combined = state.combined_exposure();
    if combined > config.daily_realized_loss_limit {
        return None;
    }
    Some(violation(
        RuleKind::DailyRealizedLoss,
        account_id,
        format!("combined exposure {combined} breached daily loss limit {}", config.daily_realized_loss_limit),
        EnforcementAction::FlattenAccount,
    ))
}

pub fn daily_realized_profit(account_id: &str, state: &AccountState, config: &AccountRiskConfig) -> Option<RuleViolation> {
    let combined = state.combined_exposure();
    if combined < config.daily_realized_profit_target {
        return None;
    }
    Some(violation(
        RuleKind::DailyRealizedProfit,
        account_id,
        format!("combined exposure {combined} reached daily profit target {}", config.daily_realized_profit_target),
        EnforcementAction::FlattenAccount,
    ))
}

/// Secondary action companion to rules 3/4: the lockout that always
/// accompanies a daily-limit flatten. Modeled separately because
/// [`EnforcementAction`] has no compound variant — the risk engine issues
/// this immediately after the `FlattenAccount` it follows from.
pub fn daily_limit_lockout_action(until: DateTime<Utc>) -> EnforcementAction {
    EnforcementAction::SetLockout { until }
}

fn unrealized_loss(event: &Event, state: &AccountState, config: &AccountRiskConfig) -> Option<RuleViolation> {
    let position_id = match &event.payload {
        EventPayload::PositionUpdate { position_id, .. } => position_id,
        _ => return None,
    };
    let pos = state.open_positions.get(position_id)?;
    if pos.unrealized_pnl > config.unrealized_loss_limit {
        return None;
    }
    Some(violation(
        RuleKind::UnrealizedLoss,
        &event.account_id,
        format!("position {position_id} unrealized {} breached limit {}", pos.unrealized_pnl, config.unrealized_loss_limit),
        EnforcementAction::ClosePosition {
            position_id: position_id.clone(),
            quantity: None,
        },
    ))
}

fn unrealized_profit(event: &Event, state: &AccountState, config: &AccountRiskConfig) -> Option<RuleViolation> {
    let position_id = match &event.payload {
        EventPayload::PositionUpdate { position_id, .. } => position_id,
        _ => return None,
    };
    let pos = state.open_positions.get(position_id)?;
    if pos.unrealized_pnl < config.unrealized_profit_target {
        return None;
    }
    Some(violation(
        RuleKind::UnrealizedProfit,
        &event.account_id,
        format!("position {position_id} unrealized {} reached target {}", pos.unrealized_pnl, config.unrealized_profit_target),
        EnforcementAction::ClosePosition {
            position_id: position_id.clone(),
            quantity: None,
        },
    ))
}

fn trade_frequency_limit(event: &Event, state: &AccountState, config: &AccountRiskConfig, now: DateTime<Utc>) -> Option<RuleViolation> {
    let (position_id, quantity) = match &event.payload {
        EventPayload::Fill { position_id, quantity, .. } => (position_id, *quantity),
        _ => return None,
    };
    let window = state.frequency_windows.get("fills")?;
    if window.count_within(now) < config.trade_frequency_max_count as usize {
        return None;
    }
    Some(violation(
        RuleKind::TradeFrequencyLimit,
        &event.account_id,
        format!("fill rate exceeded {} within window", config.trade_frequency_max_count),
        EnforcementAction::ClosePosition {
            position_id: position_id.clone(),
            quantity: Some(quantity),
        },
    ))
}

/// Invoked directly on close confirmation (see [`applies_to`] docs); not
/// reachable through the generic event dispatch.
pub fn cooldown_after_loss(account_id: &str, realized_of_close: riskd_money::Cents, config: &AccountRiskConfig) -> Option<RuleViolation> {
    if realized_of_close > config.cooldown_after_loss_threshold {
        return None;
    }
    Some(violation(
        RuleKind::CooldownAfterLoss,
        account_id,
        format!("close realized {realized_of_close} breached cooldown threshold {}", config.cooldown_after_loss_threshold),
        EnforcementAction::StartCooldown {
            seconds: config.cooldown_after_loss_seconds,
        },
    ))
}

fn no_stop_loss_grace(account_id: &str, state: &AccountState, now: DateTime<Utc>) -> Option<RuleViolation> {
    state
        .open_positions
        .values()
        .find(|p| {
            !p.stop_loss_attached
                && p.stop_loss_grace_expires.map(|expires| now > expires).unwrap_or(false)
        })
        .map(|pos| {
            violation(
                RuleKind::NoStopLossGrace,
                account_id,
                format!("position {} had no stop-loss attached past its grace period", pos.position_id),
                EnforcementAction::ClosePosition {
                    position_id: pos.position_id.clone(),
                    quantity: None,
                },
            )
        })
}

fn parse_local_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn outside_session_window(window: &riskd_config::SessionWindow, tz: Tz, now: DateTime<Utc>) -> bool {
    let start = match parse_local_time(&window.start_local) {
        Some(t) => t,
        None => return false,
    };
    let end = match parse_local_time(&window.end_local) {
        Some(t) => t,
        None => return false,
    };
    let local_time = now.with_timezone(&tz).time();
    if start <= end {
        local_time < start || local_time > end
    } else {
        // Window wraps past midnight.
        local_time < start && local_time > end
    }
}

fn session_block_outside(event: &Event, config: &AccountRiskConfig, tz: Tz, now: DateTime<Utc>) -> Option<RuleViolation> {
    let window = config.session_window.as_ref()?;
    match &event.payload {
        EventPayload::Fill { position_id, .. } => {
            if !outside_session_window(window, tz, now) {
                return None;
            }
            Some(violation(
                RuleKind::SessionBlockOutside,
                &event.account_id,
                format!("fill on {position_id} occurred outside the allowed session window"),
                EnforcementAction::ClosePosition {
                    position_id: position_id.clone(),
                    quantity: None,
                },
            ))
        }
        EventPayload::SessionTick => {
            if !outside_session_window(window, tz, now) {
                return None;
            }
            Some(violation(
                RuleKind::SessionBlockOutside,
                &event.account_id,
                "session window closed; flattening account".to_string(),
                EnforcementAction::FlattenAccount,
            ))
        }
        _ => None,
    }
}

fn symbol_block(event: &Event, config: &AccountRiskConfig) -> Option<RuleViolation> {
    let (position_id, symbol) = match &event.payload {
        EventPayload::Fill { position_id, symbol, .. } => (position_id, symbol),
        _ => return None,
    };
    if !config.blocked_symbols.iter().any(|s| s == symbol) {
        return None;
    }
    Some(violation(
        RuleKind::SymbolBlock,
        &event.account_id,
        format!("symbol {symbol} is blocked"),
        EnforcementAction::ClosePosition {
            position_id: position_id.clone(),
            quantity: None,
        },
    ))
}

fn auth_loss_guard(event: &Event, state: &AccountState, config: &AccountRiskConfig) -> Option<RuleViolation> {
    if !matches!(event.payload, EventPayload::ConnectionChange { connected: false, .. }) {
        return None;
    }
    let combined = state.combined_exposure();
    let text = if combined <= config.auth_loss_guard_limit {
        format!("broker connection lost; combined exposure {combined} is also below the guard threshold {}", config.auth_loss_guard_limit)
    } else {
        "broker connection lost".to_string()
    };
    Some(violation(
        RuleKind::AuthLossGuard,
        &event.account_id,
        text.clone(),
        EnforcementAction::SendAlert {
            severity: Severity::Info,
            text,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use riskd_money::Cents;
    use riskd_schemas::{FrequencyWindow, Position, Side};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, h, 0, 0).unwrap()
    }

    fn sample_config() -> AccountRiskConfig {
        AccountRiskConfig {
            max_contracts: 4,
            max_contracts_per_instrument: BTreeMap::new(),
            daily_realized_loss_limit: Cents::new(-100_000),
            daily_realized_profit_target: Cents::new(150_000),
            unrealized_loss_limit: Cents::new(-50_000),
            unrealized_profit_target: Cents::new(80_000),
            trade_frequency_window_seconds: 60,
            trade_frequency_max_count: 10,
            cooldown_after_loss_threshold: Cents::new(-20_000),
            cooldown_after_loss_seconds: 300,
            stop_loss_grace_seconds: 30,
            session_window: None,
            blocked_symbols: Vec::new(),
            auth_loss_guard_limit: Cents::new(-200_000),
        }
    }

    fn make_position(id: &str, symbol: &str, quantity: i64, opened_at: DateTime<Utc>) -> Position {
        Position {
            position_id: id.to_string(),
            account_id: "acct-1".into(),
            symbol: symbol.to_string(),
            side: Side::Long,
            quantity,
            entry_price: "5000.00".into(),
            current_price: "5000.00".into(),
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

    fn fill_event(position_id: &str, symbol: &str, quantity: i64, ts: DateTime<Utc>) -> Event {
        Event::new(
            "acct-1",
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

    #[test]
    fn max_contracts_closes_excess_from_most_recent() {
        let mut state = AccountState::new("acct-1");
        state.open_positions.insert("mnq".into(), make_position("mnq", "MNQ", 2, t(0)));
        state.open_positions.insert("es".into(), make_position("es", "ES", 3, t(1)));
        let event = fill_event("es", "ES", 1, t(1));
        let v = max_contracts(&event, &state, &sample_config()).unwrap();
        assert!(matches!(
            v.action,
            EnforcementAction::ClosePosition { ref position_id, quantity: Some(1) } if position_id == "es"
        ));
    }

    #[test]
    fn daily_realized_loss_fires_when_combined_at_or_below_limit() {
        let mut state = AccountState::new("acct-1");
        state.realized_pnl_today = Cents::new(-90_000);
        state.open_positions.insert("p1".into(), {
            let mut p = make_position("p1", "MNQ", 2, t(0));
            p.unrealized_pnl = Cents::new(-10_000);
            p
        });
        let v = daily_realized_loss("acct-1", &state, &sample_config()).unwrap();
        assert!(matches!(v.action, EnforcementAction::FlattenAccount));
    }

    #[test]
    fn unrealized_loss_targets_the_event_position() {
        let mut state = AccountState::new("acct-1");
        state.open_positions.insert("p1".into(), {
            let mut p = make_position("p1", "MNQ", 2, t(0));
            p.unrealized_pnl = Cents::new(-60_000);
            p
        });
        let event = Event::new(
            "acct-1",
            "broker",
            t(1),
            1,
            Uuid::new_v4(),
            EventPayload::PositionUpdate {
                position_id: "p1".into(),
                symbol: "MNQ".into(),
                current_price: "4970.00".into(),
            },
        );
        let v = unrealized_loss(&event, &state, &sample_config()).unwrap();
        assert!(matches!(v.action, EnforcementAction::ClosePosition { ref position_id, quantity: None } if position_id == "p1"));
    }

    #[test]
    fn trade_frequency_limit_closes_just_filled_quantity() {
        let mut state = AccountState::new("acct-1");
        state.frequency_windows.insert(
            "fills".into(),
            FrequencyWindow {
                window_seconds: 60,
                max_count: 10,
                timestamps: vec![t(0); 10],
            },
        );
        let event = fill_event("p1", "MNQ", 3, t(0));
        let v = trade_frequency_limit(&event, &state, &sample_config(), t(0)).unwrap();
        assert!(matches!(v.action, EnforcementAction::ClosePosition { quantity: Some(3), .. }));
    }

    #[test]
    fn cooldown_after_loss_fires_on_large_enough_loss() {
        let v = cooldown_after_loss("acct-1", Cents::new(-25_000), &sample_config()).unwrap();
        assert!(matches!(v.action, EnforcementAction::StartCooldown { seconds: 300 }));
    }

    #[test]
    fn cooldown_after_loss_does_not_fire_on_small_loss() {
        assert!(cooldown_after_loss("acct-1", Cents::new(-5_000), &sample_config()).is_none());
    }

    #[test]
    fn symbol_block_closes_blocked_symbol_fill() {
        let mut config = sample_config();
        config.blocked_symbols.push("NQ".to_string());
        let event = fill_event("p1", "NQ", 1, t(0));
        let v = symbol_block(&event, &config).unwrap();
        assert!(matches!(v.action, EnforcementAction::ClosePosition { .. }));
    }

    #[test]
    fn auth_loss_guard_always_fires_on_disconnect() {
        let state = AccountState::new("acct-1");
        let event = Event::new(
            "acct-1",
            "broker",
            t(0),
            1,
            Uuid::new_v4(),
            EventPayload::ConnectionChange {
                connected: false,
                detail: "socket reset".into(),
            },
        );
        let v = auth_loss_guard(&event, &state, &sample_config()).unwrap();
        assert!(matches!(v.action, EnforcementAction::SendAlert { severity: Severity::Info, .. }));
    }

    #[test]
    fn no_stop_loss_grace_fires_past_expiry() {
        let mut state = AccountState::new("acct-1");
        let mut pos = make_position("p1", "MNQ", 1, t(0));
        pos.stop_loss_grace_expires = Some(t(1));
        state.open_positions.insert("p1".into(), pos);
        let v = no_stop_loss_grace("acct-1", &state, t(2)).unwrap();
        assert!(matches!(v.action, EnforcementAction::ClosePosition { .. }));
    }

    #[test]
    fn no_stop_loss_grace_does_not_fire_once_attached() {
        let mut state = AccountState::new("acct-1");
        let mut pos = make_position("p1", "MNQ", 1, t(0));
        pos.stop_loss_grace_expires = Some(t(1));
        pos.stop_loss_attached = true;
        state.open_positions.insert("p1".into(), pos);
        assert!(no_stop_loss_grace("acct-1", &state, t(2)).is_none());
    }
}

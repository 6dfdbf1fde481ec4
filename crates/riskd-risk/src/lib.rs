//! Per-event risk engine: the single place that turns one inbound event plus
//! the current account state into at most one [`EnforcementAction`].
//!
//! Pure decision logic — no broker calls, no persistence, no clock reads
//! beyond the `now` the caller supplies, matching the single-writer dispatch
//! task that owns `AccountState` exclusively. Deciding an action does not
//! execute it; the caller hands the result to the enforcement engine.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use riskd_config::AccountRiskConfig;
use riskd_rules::RuleKind;
use riskd_schemas::{AccountState, EnforcementAction, Event, EventPayload, RuleViolation, Severity};

/// Cascade re-evaluation of daily rules after a close confirms is bounded to
/// prevent a pathological close -> flatten -> close loop.
pub const MAX_CASCADES: u8 = 3;

const LOCKOUT_RULE: &str = "lockout_in_effect";
const COOLDOWN_RULE: &str = "cooldown_in_effect";

/// Decide the single highest-priority action for `event`, or `None` if no
/// rule fires.
pub fn decide(
    event: &Event,
    state: &AccountState,
    config: &AccountRiskConfig,
    tz: Tz,
    now: DateTime<Utc>,
) -> Option<RuleViolation> {
    if let EventPayload::Fill { position_id, quantity, .. } = &event.payload {
        if state.is_locked_out(now) {
            tracing::info!(account_id = %event.account_id, %position_id, "fill rejected during lockout");
            return Some(short_circuit_close(
                LOCKOUT_RULE,
                &event.account_id,
                "account is locked out",
                position_id.clone(),
                *quantity,
            ));
        }
        if state.is_in_cooldown(now) {
            tracing::info!(account_id = %event.account_id, %position_id, "fill closed during cooldown");
            return Some(short_circuit_close(
                COOLDOWN_RULE,
                &event.account_id,
                "account is in cooldown",
                position_id.clone(),
                *quantity,
            ));
        }
    }

    let mut violations: Vec<(RuleKind, RuleViolation)> = RuleKind::ALL
        .into_iter()
        .filter_map(|rule| riskd_rules::evaluate(rule, event, state, config, tz, now).map(|v| (rule, v)))
        .collect();

    // Highest severity first; within a severity, lowest tie_break_rank first.
    violations.sort_by(|a, b| b.1.severity.cmp(&a.1.severity).then(a.0.tie_break_rank().cmp(&b.0.tie_break_rank())));

    violations.into_iter().next().map(|(_, v)| v)
}

fn short_circuit_close(
    rule_name: &'static str,
    account_id: &str,
    detail: &str,
    position_id: String,
    quantity: i64,
) -> RuleViolation {
    RuleViolation {
        rule_name,
        severity: Severity::Warning,
        account_id: account_id.to_string(),
        detail: detail.to_string(),
        action: EnforcementAction::ClosePosition {
            position_id,
            quantity: Some(quantity),
        },
    }
}

/// Re-check the daily rules (3/4) after a close has been confirmed, for the
/// engine's bounded cascade step. Returns `None` once neither daily rule
/// fires, at which point the caller stops cascading.
pub fn cascade_daily_rules(account_id: &str, state: &AccountState, config: &AccountRiskConfig) -> Option<RuleViolation> {
    riskd_rules::daily_realized_loss(account_id, state, config)
        .or_else(|| riskd_rules::daily_realized_profit(account_id, state, config))
}

/// The lockout action that must follow a daily-limit flatten, expiring at
/// the next scheduled local reset.
pub fn daily_limit_lockout(schedule: riskd_clock::DailyResetSchedule, now: DateTime<Utc>) -> EnforcementAction {
    riskd_rules::daily_limit_lockout_action(schedule.next_reset_after(now))
}

//! The twelve account risk rules, evaluated as pure functions over an
//! account's state and a single inbound event — deterministic, no IO, no
//! direct clock reads (the caller supplies `now`).
//!
//! Coverage is a closed set of named rules (see [`RuleKind`]) dispatched by
//! event shape rather than one evaluation path, since each rule reacts to a
//! different subset of event kinds and produces a different action.
//!
//! Two rules — [`RuleKind::DailyRealizedLoss`]/[`RuleKind::DailyRealizedProfit`]
//! and [`RuleKind::CooldownAfterLoss`] — are also exposed as direct-call
//! functions ([`daily_realized_loss`], [`daily_realized_profit`],
//! [`cooldown_after_loss`]) for use right after a close is confirmed: the
//! event vocabulary this crate dispatches on has no variant representing a
//! confirmed close, only order/position/fill updates leading up to one.

mod rules;
mod types;

pub use rules::{
    applies_to, cooldown_after_loss, daily_limit_lockout_action, daily_realized_loss,
    daily_realized_profit, evaluate,
};
pub use types::RuleKind;

use riskd_schemas::EnforcementAction;
use std::time::Duration;

/// How many times (and how long) to keep retrying a transient failure for a
/// given action. Critical actions (close, flatten, lockout) retry forever
/// with backoff capped at 15 minutes; everything else gives up after 3
/// attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub backoff_cap: Duration,
}

const NON_CRITICAL_MAX_ATTEMPTS: u32 = 3;
const NON_CRITICAL_CAP: Duration = Duration::from_secs(60);
const CRITICAL_CAP: Duration = Duration::from_secs(15 * 60);

impl RetryPolicy {
    pub fn for_action(action: &EnforcementAction) -> Self {
        if action.is_critical() {
            RetryPolicy {
                max_attempts: None,
                backoff_cap: CRITICAL_CAP,
            }
        } else {
            RetryPolicy {
                max_attempts: Some(NON_CRITICAL_MAX_ATTEMPTS),
                backoff_cap: NON_CRITICAL_CAP,
            }
        }
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt >= max)
    }

    /// Exponential backoff starting at 1s, doubling each attempt, capped at
    /// `backoff_cap`. `attempt` is 1-based (the delay before the *next*
    /// try after `attempt` failures so far).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.backoff_cap)
    }
}

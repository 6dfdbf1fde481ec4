//! Error taxonomy: every failure mode the core can hit collapses into one
//! of these five kinds. Hand-rolled `Display` + `Error` rather than a
//! derive macro, so each variant's message can be composed from its fields.

use std::fmt;

/// A transient condition the caller should retry (network hiccup, broker
/// timeout). Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transient {
    pub detail: String,
}

impl fmt::Display for Transient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transient error: {}", self.detail)
    }
}
impl std::error::Error for Transient {}

/// A condition that will not resolve by retrying (bad credentials, invalid
/// instrument). Escalates to an alert and does not retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permanent {
    pub detail: String,
}

impl fmt::Display for Permanent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "permanent error: {}", self.detail)
    }
}
impl std::error::Error for Permanent {}

/// Local state and broker-observed reality have diverged beyond what
/// reconciliation can silently repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInconsistency {
    pub detail: String,
}

impl fmt::Display for StateInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state inconsistency: {}", self.detail)
    }
}
impl std::error::Error for StateInconsistency {}

/// Configuration failed to load, parse, or validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigInvalid {
    pub detail: String,
}

impl fmt::Display for ConfigInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config: {}", self.detail)
    }
}
impl std::error::Error for ConfigInvalid {}

/// The event queue hit capacity; only heartbeats (P6) may still be
/// silently dropped, everything else trips the account into
/// [`crate::ErrorState::Safe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOverflow {
    pub queue_len: usize,
    pub capacity: usize,
}

impl fmt::Display for QueueOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queue overflow: {}/{} capacity",
            self.queue_len, self.capacity
        )
    }
}
impl std::error::Error for QueueOverflow {}

/// Umbrella taxonomy; crates that need a single error type to return
/// (rather than the narrower individual structs above) use this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskdError {
    Transient(Transient),
    Permanent(Permanent),
    StateInconsistency(StateInconsistency),
    ConfigInvalid(ConfigInvalid),
    QueueOverflow(QueueOverflow),
}

impl fmt::Display for RiskdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskdError::Transient(e) => e.fmt(f),
            RiskdError::Permanent(e) => e.fmt(f),
            RiskdError::StateInconsistency(e) => e.fmt(f),
            RiskdError::ConfigInvalid(e) => e.fmt(f),
            RiskdError::QueueOverflow(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for RiskdError {}

impl RiskdError {
    pub fn transient(detail: impl Into<String>) -> Self {
        RiskdError::Transient(Transient { detail: detail.into() })
    }
    pub fn permanent(detail: impl Into<String>) -> Self {
        RiskdError::Permanent(Permanent { detail: detail.into() })
    }
    pub fn state_inconsistency(detail: impl Into<String>) -> Self {
        RiskdError::StateInconsistency(StateInconsistency { detail: detail.into() })
    }
    pub fn config_invalid(detail: impl Into<String>) -> Self {
        RiskdError::ConfigInvalid(ConfigInvalid { detail: detail.into() })
    }
    pub fn queue_overflow(queue_len: usize, capacity: usize) -> Self {
        RiskdError::QueueOverflow(QueueOverflow { queue_len, capacity })
    }

    /// Whether this class of error warrants a retry loop at all.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RiskdError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_others_are_not() {
        assert!(RiskdError::transient("timeout").is_retryable());
        assert!(!RiskdError::permanent("bad creds").is_retryable());
        assert!(!RiskdError::state_inconsistency("drift").is_retryable());
    }

    #[test]
    fn display_includes_detail() {
        let e = RiskdError::queue_overflow(10_000, 10_000);
        assert!(format!("{e}").contains("10000/10000"));
    }
}

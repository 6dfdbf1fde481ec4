use riskd_schemas::EnforcementAction;
use std::collections::HashSet;

/// Full idempotency key: `(account_id, action-specific discriminant)`.
pub fn key_for(account_id: &str, action: &EnforcementAction) -> String {
    format!("{account_id}:{}", action.idempotency_discriminant())
}

/// Tracks in-flight enforcement dispatches. Owned exclusively by the
/// dispatcher task — no locking needed since nothing else ever writes it.
#[derive(Debug, Default)]
pub struct InFlightSet {
    keys: HashSet<String>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` as in-flight. Returns `false` (and leaves the set
    /// unchanged) if a dispatch for this key is already outstanding — the
    /// caller should drop the duplicate request with a debug log.
    pub fn begin(&mut self, key: &str) -> bool {
        self.keys.insert(key.to_string())
    }

    pub fn finish(&mut self, key: &str) {
        self.keys.remove(key);
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_for_same_key_is_refused() {
        let mut set = InFlightSet::new();
        assert!(set.begin("acct-1:flatten"));
        assert!(!set.begin("acct-1:flatten"));
    }

    #[test]
    fn finish_allows_key_reuse() {
        let mut set = InFlightSet::new();
        assert!(set.begin("acct-1:flatten"));
        set.finish("acct-1:flatten");
        assert!(set.begin("acct-1:flatten"));
    }
}

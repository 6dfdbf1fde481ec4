//! Alert webhook routing.
//!
//! Broker credential resolution is out of scope here — the only secret
//! this core resolves is the destination for `SendAlert` (the
//! AuthLossGuard rule, and failed-enforcement escalation).
//!
//! Config stores only the env var **name**, never the value, and `Debug`
//! redacts it.

use anyhow::{bail, Result};
use serde_json::Value;

/// A resolved alert webhook URL. `Debug` never prints the value — webhook
/// URLs typically carry an auth token in the path.
pub struct AlertWebhook(pub Option<String>);

impl std::fmt::Debug for AlertWebhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AlertWebhook")
            .field(&self.0.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Resolve the alert webhook from `config_json`'s `/alert_webhook_env`
/// pointer, which names the environment variable holding the URL. Absent
/// configuration or an absent env var both resolve to `None` — alerting is
/// best-effort, not a startup-fatal dependency.
pub fn resolve_alert_webhook(config_json: &Value) -> Result<AlertWebhook> {
    let Some(var_name) = config_json
        .pointer("/alert_webhook_env")
        .and_then(|v| v.as_str())
    else {
        return Ok(AlertWebhook(None));
    };
    if var_name.trim().is_empty() {
        bail!("alert_webhook_env is present but empty");
    }
    Ok(AlertWebhook(std::env::var(var_name).ok()))
}

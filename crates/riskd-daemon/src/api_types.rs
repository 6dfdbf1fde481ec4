//! Request and response types for every riskd-daemon HTTP endpoint.
//!
//! `Serialize + Deserialize` so Axum can encode them and tests can decode
//! them. No business logic lives here — every field is a direct projection
//! of `riskd_schemas`/`riskd_config` types already computed by the engine.

use riskd_money::Cents;
use riskd_schemas::{ErrorState, Position};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub queue_depth: usize,
    pub last_event_ago_secs: Option<u64>,
    pub error_state: ErrorState,
}

// ---------------------------------------------------------------------------
// /v1/accounts/:id
// ---------------------------------------------------------------------------

/// Read-only projection of `AccountState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStateResponse {
    pub account_id: String,
    pub open_position_count: usize,
    pub realized_pnl_today: Cents,
    pub combined_exposure: Cents,
    pub lockout_until: Option<chrono::DateTime<chrono::Utc>>,
    pub cooldown_until: Option<chrono::DateTime<chrono::Utc>>,
    pub last_daily_reset: Option<chrono::DateTime<chrono::Utc>>,
    pub error_state: ErrorState,
}

/// Response body for an account that isn't in the running configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownAccountResponse {
    pub error: String,
    pub account_id: String,
}

// ---------------------------------------------------------------------------
// /v1/accounts/:id/positions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsResponse {
    pub account_id: String,
    pub positions: Vec<Position>,
}

// ---------------------------------------------------------------------------
// /v1/accounts/:id/pnl
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlResponse {
    pub account_id: String,
    pub realized: Cents,
    pub unrealized: Cents,
    pub combined: Cents,
}

// ---------------------------------------------------------------------------
// /v1/accounts/:id/enforcement-history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementHistoryResponse {
    pub account_id: String,
    pub events: Vec<riskd_audit::AuditEvent>,
}

// ---------------------------------------------------------------------------
// /v1/config/reload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReloadConfigRequest {
    /// Which config layer to re-read; currently always "full" but kept as a
    /// field so a partial-reload scheme can be added without breaking callers.
    #[serde(default = "default_reload_kind")]
    pub kind: String,
}

fn default_reload_kind() -> String {
    "full".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfigResponse {
    pub accepted: bool,
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// /v1/shutdown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub accepted: bool,
}

// ---------------------------------------------------------------------------
// Generic error body shared by 4xx/5xx responses.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

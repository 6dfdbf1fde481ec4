use anyhow::{bail, Context, Result};
use riskd_money::Cents;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;

pub mod alerting;

/// Read each path in `paths` as YAML and fold them into one document, later
/// paths overriding earlier ones.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let sources = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("read config: {p}")))
        .collect::<Result<Vec<_>>>()?;
    let borrowed: Vec<&str> = sources.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&borrowed)
}

/// Same as [`load_layered_yaml`], but over YAML text already in memory —
/// what tests use, and what a caller sourcing config from something other
/// than the filesystem (e.g. a config-management service) would call too.
///
/// The result is hashed so `/config/reload` can report whether the new
/// config actually differs from the running one; the hash has to be stable
/// under key reordering, so the merged document is put through a canonical
/// (recursively key-sorted) JSON encoding before hashing rather than hashing
/// whatever order `serde_yaml` happened to parse keys in.
pub fn load_layered_yaml_from_strings(layers: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());
    for layer in layers {
        let yaml: serde_yaml::Value = serde_yaml::from_str(layer).context("parse yaml layer")?;
        let as_json = serde_json::to_value(yaml).context("yaml->json conversion failed")?;
        merge_layer(&mut merged, as_json);
    }

    let canonical_json = canonical_json_string(&merged);
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    let config_json = serde_json::from_str(&canonical_json).context("canonical json parse failed")?;

    Ok(LoadedConfig { config_json, canonical_json, config_hash })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Merge `src` into `dst` in place: matching object keys recurse, everything
/// else (including arrays — they don't element-wise merge) is replaced
/// wholesale by the later layer's value.
fn merge_layer(dst: &mut Value, src: Value) {
    let (Value::Object(dst_fields), Value::Object(src_fields)) = (&mut *dst, &src) else {
        *dst = src;
        return;
    };
    for (key, value) in src_fields {
        match dst_fields.get_mut(key) {
            Some(existing) => merge_layer(existing, value.clone()),
            None => {
                dst_fields.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Serialize `v` with every object's keys in sorted order, so two
/// differently-ordered-but-equal documents hash identically.
fn canonical_json_string(v: &Value) -> String {
    serde_json::to_string(&canonical_value(v)).expect("canonical json never fails to serialize")
}

fn canonical_value(v: &Value) -> Value {
    match v {
        Value::Object(fields) => {
            let sorted = fields
                .iter()
                .collect::<std::collections::BTreeMap<_, _>>()
                .into_iter()
                .map(|(k, v)| (k.clone(), canonical_value(v)));
            Value::Object(sorted.collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        scalar => scalar.clone(),
    }
}

// ---------------------------------------------------------------------------
// Domain configuration
// ---------------------------------------------------------------------------

/// A trading-day local window, e.g. `"08:30"`..`"15:00"`, consumed by the
/// SessionBlockOutside rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionWindow {
    pub start_local: String,
    pub end_local: String,
}

/// Risk rule parameters for a single account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountRiskConfig {
    pub max_contracts: i64,
    #[serde(default)]
    pub max_contracts_per_instrument: BTreeMap<String, i64>,
    pub daily_realized_loss_limit: Cents,
    pub daily_realized_profit_target: Cents,
    pub unrealized_loss_limit: Cents,
    pub unrealized_profit_target: Cents,
    pub trade_frequency_window_seconds: u64,
    pub trade_frequency_max_count: u32,
    pub cooldown_after_loss_threshold: Cents,
    pub cooldown_after_loss_seconds: u64,
    pub stop_loss_grace_seconds: u64,
    #[serde(default)]
    pub session_window: Option<SessionWindow>,
    #[serde(default)]
    pub blocked_symbols: Vec<String>,
    pub auth_loss_guard_limit: Cents,
}

/// Whole-daemon configuration surface: per-account risk rule parameters,
/// the tick-value table, timezone/daily-reset time, persistence directory,
/// and queue/dedup capacities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskdConfig {
    pub accounts: BTreeMap<String, AccountRiskConfig>,
    #[serde(default)]
    pub tick_values: BTreeMap<String, Cents>,
    pub timezone: String,
    #[serde(default = "default_daily_reset_local_time")]
    pub daily_reset_local_time: String,
    pub persistence_dir: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_dedup_size")]
    pub dedup_size: usize,
    #[serde(default)]
    pub alert_webhook_env: Option<String>,
}

fn default_daily_reset_local_time() -> String {
    "17:00:00".to_string()
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_dedup_size() -> usize {
    1_024
}

/// Parse a canonicalized config document into the typed domain config,
/// failing closed on anything malformed rather than partially trusting it.
pub fn parse_riskd_config(config_json: &Value) -> Result<RiskdConfig> {
    if config_json.get("accounts").is_none() {
        bail!("config is missing required `accounts` section");
    }
    let cfg: RiskdConfig =
        serde_json::from_value(config_json.clone()).context("config failed schema validation")?;
    if cfg.queue_capacity == 0 {
        bail!("queue_capacity must be > 0");
    }
    if cfg.accounts.is_empty() {
        bail!("at least one account must be configured");
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
timezone: "America/Chicago"
daily_reset_local_time: "17:00:00"
persistence_dir: "/var/lib/riskd"
queue_capacity: 10000
dedup_size: 1024
tick_values:
  MNQ: "5.00"
  ES: "50.00"
accounts:
  acct-1:
    max_contracts: 4
    max_contracts_per_instrument: { MNQ: 4, ES: 2 }
    daily_realized_loss_limit: "-1000.00"
    daily_realized_profit_target: "1500.00"
    unrealized_loss_limit: "-500.00"
    unrealized_profit_target: "800.00"
    trade_frequency_window_seconds: 60
    trade_frequency_max_count: 10
    cooldown_after_loss_threshold: "-200.00"
    cooldown_after_loss_seconds: 300
    stop_loss_grace_seconds: 30
    auth_loss_guard_limit: "-2000.00"
"#;

    #[test]
    fn same_input_produces_identical_hash() {
        let a = load_layered_yaml_from_strings(&[SAMPLE]).unwrap();
        let b = load_layered_yaml_from_strings(&[SAMPLE]).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
    }

    #[test]
    fn reordered_keys_produce_same_hash() {
        let reordered = r#"
persistence_dir: "/var/lib/riskd"
timezone: "America/Chicago"
daily_reset_local_time: "17:00:00"
dedup_size: 1024
queue_capacity: 10000
tick_values:
  ES: "50.00"
  MNQ: "5.00"
accounts:
  acct-1:
    auth_loss_guard_limit: "-2000.00"
    max_contracts: 4
    max_contracts_per_instrument: { ES: 2, MNQ: 4 }
    daily_realized_loss_limit: "-1000.00"
    daily_realized_profit_target: "1500.00"
    unrealized_loss_limit: "-500.00"
    unrealized_profit_target: "800.00"
    trade_frequency_window_seconds: 60
    trade_frequency_max_count: 10
    cooldown_after_loss_threshold: "-200.00"
    cooldown_after_loss_seconds: 300
    stop_loss_grace_seconds: 30
"#;
        let a = load_layered_yaml_from_strings(&[SAMPLE]).unwrap();
        let b = load_layered_yaml_from_strings(&[reordered]).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
    }

    #[test]
    fn layering_overrides_earlier_values() {
        let overlay = r#"
accounts:
  acct-1:
    max_contracts: 2
"#;
        let loaded = load_layered_yaml_from_strings(&[SAMPLE, overlay]).unwrap();
        let max_contracts = loaded
            .config_json
            .pointer("/accounts/acct-1/max_contracts")
            .and_then(|v| v.as_i64())
            .unwrap();
        assert_eq!(max_contracts, 2);
    }

    #[test]
    fn parses_into_typed_config() {
        let loaded = load_layered_yaml_from_strings(&[SAMPLE]).unwrap();
        let cfg = parse_riskd_config(&loaded.config_json).unwrap();
        assert_eq!(cfg.queue_capacity, 10_000);
        assert_eq!(cfg.accounts["acct-1"].max_contracts, 4);
        assert_eq!(cfg.tick_values["MNQ"], Cents::new(500));
    }

    #[test]
    fn missing_accounts_section_is_config_invalid() {
        let loaded = load_layered_yaml_from_strings(&["timezone: UTC"]).unwrap();
        assert!(parse_riskd_config(&loaded.config_json).is_err());
    }
}

//! Append-only audit log of enforcement decisions, one JSON line per event
//! (event id, rule, violation detail, action, dispatch result) — backs
//! `get_enforcement_history`.
//!
//! Each line is hashed into the next, so splicing a line out, editing one in
//! place, or reordering the file is detectable by replaying the chain
//! (`verify_hash_chain`) rather than trusted on read.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One handle per log file. `hash_chain` toggles whether `hash_prev`/
/// `hash_self` get populated at all — a writer that never links events still
/// produces valid JSON Lines, just without tamper-evidence.
pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Count of events this writer has appended, folded into `event_id` so
    /// two events with identical payloads in the same chain position still
    /// get distinct ids without reaching for an RNG. On restart, a writer
    /// resuming an existing log needs both this and `last_hash` restored
    /// together ([`set_seq`](Self::set_seq), [`set_last_hash`](Self::set_last_hash)) —
    /// restoring one without the other breaks the chain it computes next.
    events_written: u64,
}

impl AuditWriter {
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {parent:?}"))?;
        }
        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            events_written: 0,
        })
    }

    pub fn set_last_hash(&mut self, last_hash: Option<String>) {
        self.last_hash = last_hash;
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn set_seq(&mut self, seq: u64) {
        self.events_written = seq;
    }

    pub fn seq(&self) -> u64 {
        self.events_written
    }

    /// Append one event to the log, chaining it onto whatever was last
    /// written if `hash_chain` is on.
    pub fn append(&mut self, account_id: &str, event_type: &str, payload: Value) -> Result<AuditEvent> {
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.events_written);
        self.events_written += 1;

        let mut event = AuditEvent {
            event_id,
            account_id: account_id.to_string(),
            ts_utc: Utc::now(),
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            event.hash_prev = self.last_hash.clone();
            let hash_self = compute_event_hash(&event)?;
            self.last_hash = Some(hash_self.clone());
            event.hash_self = Some(hash_self);
        }

        append_line(&self.path, &canonical_json_line(&event)?)?;
        Ok(event)
    }
}

/// One recorded audit event. `payload` typically holds a serialized
/// `riskd_schemas::EnforcementAction` plus a `result` field ("dispatched",
/// "confirmed", "failed:<detail>").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub account_id: String,
    pub ts_utc: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Read the most recent `limit` audit events for `account_id` from the log
/// at `path`, oldest-first. Backs `get_enforcement_history`. A missing log
/// file is treated as an empty history, not an error — a freshly
/// provisioned account has no enforcement history yet.
pub fn read_enforcement_history(
    path: impl AsRef<Path>,
    account_id: &str,
    limit: usize,
) -> Result<Vec<AuditEvent>> {
    let content = match fs::read_to_string(path.as_ref()) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("read audit log"),
    };
    let mut matching = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent = serde_json::from_str(trimmed).context("parse audit event")?;
        if ev.account_id == account_id {
            matching.push(ev);
        }
    }
    if matching.len() > limit {
        matching.drain(0..matching.len() - limit);
    }
    Ok(matching)
}

/// Fold the chain position into an id: hashing `(last_hash, events_written,
/// payload)` means two events with an identical payload never collide as
/// long as they land at different points in the chain, with no RNG involved.
fn derive_event_id(last_hash: Option<&str>, payload: &Value, events_written: u64) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(last_hash.unwrap_or("").as_bytes());
    hasher.update(events_written.to_be_bytes());
    hasher.update(canonical_line(payload).unwrap_or_default().as_bytes());
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&hasher.finalize()[..16]);
    Uuid::from_bytes(id_bytes)
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {path:?}"))?;
    writeln!(file, "{line}").context("write audit line")
}

/// Serialize with every object's keys in sorted order, so the hash chain
/// doesn't depend on whatever field order `serde` happened to emit.
fn canonical_json_line<T: Serialize>(value: &T) -> Result<String> {
    let raw = serde_json::to_value(value).context("serialize audit event")?;
    canonical_line(&raw)
}

fn canonical_line(v: &Value) -> Result<String> {
    serde_json::to_string(&canonical_value(v)).context("json stringify")
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

/// The hash that goes in `hash_self`: the event's canonical encoding with
/// `hash_self` itself blanked out first, so the hash never refers to itself.
pub fn compute_event_hash(event: &AuditEvent) -> Result<String> {
    let mut unhashed = event.clone();
    unhashed.hash_self = None;
    let canonical = canonical_json_line(&unhashed)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

/// Verify the hash chain of an audit log on disk.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent =
            serde_json::from_str(trimmed).with_context(|| format!("parse audit event at line {}", i + 1))?;
        line_count += 1;

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!("hash_prev mismatch: expected {prev_hash:?}, got {:?}", ev.hash_prev),
            });
        }
        if let Some(ref claimed) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }
        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::{Path, PathBuf};

    struct TempPath(PathBuf);

    impl TempPath {
        fn new(name: &str) -> Self {
            let mut p = std::env::temp_dir();
            p.push(format!("riskd-audit-test-{}-{}", std::process::id(), name));
            TempPath(p)
        }
    }

    impl AsRef<Path> for TempPath {
        fn as_ref(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn append_and_read_back_filters_by_account() {
        let path = TempPath::new("history");
        let mut w = AuditWriter::new(&path, true).unwrap();
        w.append("acct-1", "flatten_account", json!({"result": "dispatched"}))
            .unwrap();
        w.append("acct-2", "flatten_account", json!({"result": "dispatched"}))
            .unwrap();
        w.append("acct-1", "set_lockout", json!({"result": "confirmed"}))
            .unwrap();

        let history = read_enforcement_history(&path, "acct-1", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.account_id == "acct-1"));
    }

    #[test]
    fn history_is_capped_at_limit_keeping_most_recent() {
        let path = TempPath::new("capped");
        let mut w = AuditWriter::new(&path, false).unwrap();
        for i in 0..5 {
            w.append("acct-1", "alert", json!({"n": i})).unwrap();
        }
        let history = read_enforcement_history(&path, "acct-1", 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload["n"], 3);
        assert_eq!(history[1].payload["n"], 4);
    }

    #[test]
    fn missing_log_file_is_empty_history_not_error() {
        let history = read_enforcement_history("/nonexistent/riskd-audit.jsonl", "acct-1", 10).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn hash_chain_detects_tampering() {
        let path = TempPath::new("tamper");
        {
            let mut w = AuditWriter::new(&path, true).unwrap();
            w.append("acct-1", "alert", json!({"n": 1})).unwrap();
            w.append("acct-1", "alert", json!({"n": 2})).unwrap();
        }
        let mut content = fs::read_to_string(&path).unwrap();
        content = content.replace("\"n\":2", "\"n\":999");
        let result = verify_hash_chain_str(&content).unwrap();
        assert!(matches!(result, VerifyResult::Broken { .. }));
    }

    #[test]
    fn untampered_chain_verifies_clean() {
        let path = TempPath::new("clean");
        {
            let mut w = AuditWriter::new(&path, true).unwrap();
            w.append("acct-1", "alert", json!({"n": 1})).unwrap();
            w.append("acct-1", "alert", json!({"n": 2})).unwrap();
        }
        let result = verify_hash_chain(&path).unwrap();
        assert_eq!(result, VerifyResult::Valid { lines: 2 });
    }
}

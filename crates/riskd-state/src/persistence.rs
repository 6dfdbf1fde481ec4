//! Crash-safe per-account persistence.
//!
//! Writes are write-temp-then-rename-then-fsync so a crash mid-write never
//! leaves a half-written state file behind: the rename is atomic, and
//! whichever of the old/new file existed before the crash is what a reader
//! sees after it. A file that fails to parse on load is quarantined rather
//! than trusted — corrupt state is never silently accepted.

use chrono::Utc;
use riskd_schemas::AccountState;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum PersistError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::Io(e) => write!(f, "persistence I/O error: {e}"),
            PersistError::Serialize(e) => write!(f, "persistence serialization error: {e}"),
        }
    }
}
impl std::error::Error for PersistError {}

impl From<std::io::Error> for PersistError {
    fn from(e: std::io::Error) -> Self {
        PersistError::Io(e)
    }
}
impl From<serde_json::Error> for PersistError {
    fn from(e: serde_json::Error) -> Self {
        PersistError::Serialize(e)
    }
}

fn account_path(dir: &Path, account_id: &str) -> PathBuf {
    dir.join(format!("{account_id}.json"))
}

fn temp_path(dir: &Path, account_id: &str) -> PathBuf {
    dir.join(format!("{account_id}.json.tmp"))
}

/// Write-temp-then-rename-then-fsync. Called immediately for critical
/// events (lockout set, daily reset, enforcement dispatched) and on a
/// debounce timer otherwise.
pub fn save_account_state(dir: &Path, state: &AccountState) -> Result<(), PersistError> {
    fs::create_dir_all(dir)?;
    let tmp = temp_path(dir, &state.account_id);
    let final_path = account_path(dir, &state.account_id);

    let json = serde_json::to_vec_pretty(state)?;
    {
        let mut f = File::create(&tmp)?;
        f.write_all(&json)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, &final_path)?;

    // Best-effort directory fsync so the rename itself is durable; not all
    // platforms support opening a directory for read, so this is advisory.
    if let Ok(dir_handle) = File::open(dir) {
        let _ = dir_handle.sync_all();
    }
    Ok(())
}

/// Load an account's persisted state, or a fresh empty one if none exists
/// yet. A file that fails to parse is moved aside to
/// `state_corrupt_<unix_ts>` and logged at `error` level rather than
/// aborting startup — the account simply starts from empty state.
pub fn load_account_state(dir: &Path, account_id: &str) -> Result<AccountState, PersistError> {
    let path = account_path(dir, account_id);
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AccountState::new(account_id));
        }
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<AccountState>(&bytes) {
        Ok(state) => Ok(state),
        Err(parse_err) => {
            quarantine_corrupt_file(dir, account_id, &path)?;
            tracing::error!(
                account_id,
                error = %parse_err,
                "corrupt account state file quarantined; starting from empty state"
            );
            Ok(AccountState::new(account_id))
        }
    }
}

fn quarantine_corrupt_file(dir: &Path, account_id: &str, path: &Path) -> Result<(), PersistError> {
    let ts = Utc::now().timestamp();
    let quarantine = dir.join(format!("{account_id}.state_corrupt_{ts}"));
    fs::rename(path, &quarantine)?;
    Ok(())
}

/// Flush every given account's state immediately, used on graceful shutdown.
pub fn flush_all<'a>(dir: &Path, states: impl Iterator<Item = &'a AccountState>) -> Result<(), PersistError> {
    for state in states {
        save_account_state(dir, state)?;
    }
    Ok(())
}

/// Tracks whether a non-critical state mutation is due for its debounced
/// flush.
pub struct DebounceGate {
    debounce: chrono::Duration,
    last_flush: Option<chrono::DateTime<Utc>>,
}

impl DebounceGate {
    pub fn new(debounce_seconds: i64) -> Self {
        DebounceGate {
            debounce: chrono::Duration::seconds(debounce_seconds),
            last_flush: None,
        }
    }

    pub fn due(&self, now: chrono::DateTime<Utc>) -> bool {
        match self.last_flush {
            None => true,
            Some(last) => now - last >= self.debounce,
        }
    }

    pub fn mark_flushed(&mut self, now: chrono::DateTime<Utc>) {
        self.last_flush = Some(now);
    }
}

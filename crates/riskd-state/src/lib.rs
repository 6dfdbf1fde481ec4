//! State manager: per-account position/pnl mutations, crash-safe
//! persistence, and startup broker reconciliation.
//!
//! Positions are merged/closed directly by symbol rather than tracked as a
//! sequence of lots, so the mutation surface is narrow and keyed on
//! `position_id`.

pub mod mutations;
pub mod persistence;

pub use mutations::AccountStore;
pub use persistence::{load_account_state, PersistError};

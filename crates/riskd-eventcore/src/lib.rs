//! Event ingestion, ordering, and dispatch.
//!
//! A bounded priority queue ordered by `(priority, timestamp,
//! monotonic_seq)`, a fixed-size dedup LRU of dispatched event ids, and a
//! single-consumer dispatch loop that drains the queue between awaits on
//! new inbound events. Everything here is owned by one task; producers only
//! ever call the thread-safe [`EventCore::ingest`] entry point.

mod core;
mod dedup;
mod queue;

pub use core::{run_dispatch_loop, EventCore, IngestOutcome};
pub use dedup::DedupLru;
pub use queue::{EnqueueOutcome, EventQueue};

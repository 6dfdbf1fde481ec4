//! Test fixtures shared across crates: a deterministic fake broker adapter
//! and small builders for events/positions so scenario tests don't hand-roll
//! the same boilerplate per crate.

mod fake_broker;
mod fixtures;

pub use fake_broker::FakeBrokerAdapter;
pub use fixtures::{fill_event, open_position, order_update_event, position_update_event};

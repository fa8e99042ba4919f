//! SQLite persistence for the on-device engine.
//!
//! A single local database file backs the durable sync queue, the
//! dead-letter table, restart snapshots and identity records.

mod store;

pub use store::*;

//! Infrastructure layer for the field engine.
//!
//! Contains trait definitions and implementations for:
//! - Durable storage (SQLite sync queue, snapshots, identities)
//! - Collaborator seams (remote authority, telemetry, connectivity)
//! - Retry backoff policy
//! - Error taxonomy

mod backoff;
mod error;
pub mod sqlite;
mod traits;

pub use backoff::BackoffPolicy;
pub use error::*;
pub use sqlite::{QueuedEnvelope, SqliteStore, DEFAULT_MAX_QUEUE_DEPTH};
pub use traits::*;

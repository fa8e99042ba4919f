//! Domain models for the Fieldguard engine
//!
//! Core types for alerts, telemetry, sync envelopes, zone classification,
//! route scoring, and digital identities.

mod alert;
mod envelope;
mod identity;
mod route;
mod telemetry;
mod types;
mod zone;

pub use alert::*;
pub use envelope::*;
pub use identity::*;
pub use route::*;
pub use telemetry::*;
pub use types::*;
pub use zone::*;

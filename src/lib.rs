//! Fieldguard Engine Library
//!
//! Offline-first safety core for tourist field devices: durable
//! telemetry capture, emergency alerting, store-and-forward sync
//! against a remote authority, geofenced risk classification, safety
//! scored route planning, and digital identity registration.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (telemetry, alerts, envelopes, routes)
//! - [`infra`] - Infrastructure (SQLite store, collaborator traits, errors)
//! - [`alert`] - Emergency alert state machine
//! - [`sync`] - Durable queue drain loop against the remote authority
//! - [`zone`] - Risk zone classification and monitoring
//! - [`route`] - Route planning, scoring, and selection
//! - [`identity`] - Digital identity registration and verification
//! - [`capture`] - Periodic telemetry capture
//! - [`runtime`] - Engine assembly and lifecycle
//! - [`sim`] - Deterministic simulation collaborators

pub mod alert;
pub mod capture;
pub mod domain;
pub mod identity;
pub mod infra;
pub mod migrations;
pub mod route;
pub mod runtime;
pub mod sim;
pub mod sync;
pub mod zone;

// Re-export commonly used types
pub use domain::{
    AlertStatus, AlertUpdate, Connectivity, DeviceId, DeviceTelemetrySample, DigitalIdentity,
    EmergencyAlert, EnvelopeId, GeoPoint, RiskLevel, RouteBatch, RouteCandidate, RouteId,
    SubmitOutcome, SyncEnvelope, TouristId, TravelerForm, ZoneStatus,
};

pub use infra::{EngineError, HealthSnapshot, Result, SharedConnectivity, SqliteStore};

pub use runtime::{Collaborators, Engine, EngineConfig};

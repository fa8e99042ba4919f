//! Error types for the Fieldguard engine

use thiserror::Error;

use crate::domain::{AlertStatus, RouteId, TouristId};

/// Errors that can occur in the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Payload (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed local input, rejected before anything is stored or queued
    #[error("validation error: {0}")]
    Validation(String),

    /// A non-terminal alert already exists for this tourist
    #[error("alert already outstanding for tourist {tourist_id} (status {status})")]
    AlertAlreadyOutstanding {
        tourist_id: TouristId,
        status: AlertStatus,
    },

    /// No position fix within the bounded timeout
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    /// Transport failure while delivering to the remote authority
    #[error("sync delivery failure: {0}")]
    SyncDelivery(String),

    /// Local durable queue is at capacity; fatal, nothing may be dropped
    #[error("durable queue full at depth {depth}")]
    QueueFull { depth: u64 },

    /// Illegal alert state machine move
    #[error("invalid alert transition: {0}")]
    InvalidTransition(String),

    /// Route selection outside the current batch
    #[error("route {route_id} is not part of the current batch")]
    UnknownRoute { route_id: RouteId },

    /// Route planning did not finish within the bounded timeout; retry
    #[error("route planning timed out after {timeout_ms} ms")]
    RoutePlanningTimeout { timeout_ms: u64 },

    /// The external issuer failed or exceeded its bounded wait
    #[error("identity issuance failed: {0}")]
    IdentityIssuance(String),

    /// No identity record under that id
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// Verification refused because the record is flagged
    #[error("identity {0} is flagged; verification requires an explicit override")]
    IdentityFlagged(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AlertStatus;

    #[test]
    fn test_error_messages_carry_context() {
        let tourist_id = TouristId::new();
        let err = EngineError::AlertAlreadyOutstanding {
            tourist_id,
            status: AlertStatus::Active,
        };
        let msg = err.to_string();
        assert!(msg.contains(&tourist_id.to_string()));
        assert!(msg.contains("active"));

        let err = EngineError::QueueFull { depth: 10_000 };
        assert!(err.to_string().contains("10000"));
    }
}

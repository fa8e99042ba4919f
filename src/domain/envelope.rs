//! Sync envelope and delivery outcome types
//!
//! The envelope is the contract between the field device and the remote
//! authority: the only thing the durable queue stores and the only thing the
//! sync engine transmits. `envelope_id` is the idempotency key; the authority
//! dedups on it, which is what makes at-least-once delivery safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{AlertTransition, DeviceTelemetrySample, EnvelopeId, TouristId};

/// Envelope payload discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Telemetry,
    AlertTransition,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Telemetry => "telemetry",
            PayloadKind::AlertTransition => "alert_transition",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "telemetry" => Some(PayloadKind::Telemetry),
            "alert_transition" => Some(PayloadKind::AlertTransition),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an envelope carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EnvelopePayload {
    Telemetry(DeviceTelemetrySample),
    AlertTransition(AlertTransition),
}

impl EnvelopePayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            EnvelopePayload::Telemetry(_) => PayloadKind::Telemetry,
            EnvelopePayload::AlertTransition(_) => PayloadKind::AlertTransition,
        }
    }
}

/// One unit of sync work, durably queued until acknowledged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Globally unique envelope identifier (remote dedup key)
    pub envelope_id: EnvelopeId,

    /// When the envelope was created locally
    pub created_at: DateTime<Utc>,

    /// The wrapped payload
    pub payload: EnvelopePayload,

    /// Delivery attempts so far; incremented by the sync engine, persisted
    /// with the queue entry
    pub attempt_count: u32,
}

impl SyncEnvelope {
    pub fn new(payload: EnvelopePayload) -> Self {
        Self {
            envelope_id: EnvelopeId::new(),
            created_at: Utc::now(),
            payload,
            attempt_count: 0,
        }
    }

    /// Wrap a telemetry sample.
    pub fn telemetry(sample: DeviceTelemetrySample) -> Self {
        Self::new(EnvelopePayload::Telemetry(sample))
    }

    /// Wrap a committed alert transition.
    pub fn alert_transition(transition: AlertTransition) -> Self {
        Self::new(EnvelopePayload::AlertTransition(transition))
    }

    pub fn payload_kind(&self) -> PayloadKind {
        self.payload.kind()
    }
}

/// Per-envelope verdict returned by the remote authority.
///
/// `Duplicate` means the authority already holds this `envelope_id`; the
/// engine treats it exactly like `Accepted` (acknowledge and move on).
/// Transport failures are NOT an outcome; they surface as errors from the
/// authority trait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted,
    Duplicate,
    Rejected { reason: String },
}

impl SubmitOutcome {
    /// Outcomes that complete delivery and allow local acknowledgment.
    pub fn is_settled(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted | SubmitOutcome::Duplicate)
    }
}

/// An envelope parked after the authority permanently rejected it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The envelope as it stood at its final attempt
    pub envelope: SyncEnvelope,

    /// Rejection reason reported by the authority
    pub reason: String,

    /// When the envelope was parked
    pub failed_at: DateTime<Utc>,
}

/// Subscription handle metadata for the authority's alert-update stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSubscription {
    /// Subscription identifier assigned by the authority
    pub subscription_id: Uuid,

    /// Tourist whose alerts the stream covers
    pub tourist_id: TouristId,
}

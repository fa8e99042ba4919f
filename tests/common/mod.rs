//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use fieldguard::domain::{
    AlertUpdate, DeviceId, EnvelopeId, GeoPoint, IdentityId, PayloadKind, SubmitOutcome,
    SyncEnvelope, TelemetryReading, TouristId, TravelerForm, METERS_PER_DEG_LAT,
};
use fieldguard::infra::{AlertUpdateStream, IdentityIssuer, RemoteAuthority, Result};

/// Test tourist ID
pub fn test_tourist_id() -> TouristId {
    TouristId::from_uuid(Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap())
}

/// Test device ID
pub fn test_device_id() -> DeviceId {
    DeviceId::new("LORA-TEST-01")
}

/// Reference point used across the fixtures (Agra city center).
pub fn base_position() -> GeoPoint {
    GeoPoint::new(27.1751, 78.0421)
}

/// A point offset from `origin` in meters.
pub fn offset_position(origin: GeoPoint, north_meters: f64, east_meters: f64) -> GeoPoint {
    let lng_scale = METERS_PER_DEG_LAT * origin.lat.to_radians().cos();
    GeoPoint::new(
        origin.lat + north_meters / METERS_PER_DEG_LAT,
        origin.lng + east_meters / lng_scale,
    )
}

/// A plausible telemetry reading at the given position.
pub fn reading_at(position: GeoPoint) -> TelemetryReading {
    TelemetryReading::new(position, 82, 64)
}

/// A telemetry envelope ready to enqueue.
pub fn telemetry_envelope() -> SyncEnvelope {
    use fieldguard::domain::DeviceTelemetrySample;
    let sample = DeviceTelemetrySample::capture(test_device_id(), reading_at(base_position()));
    SyncEnvelope::telemetry(sample)
}

/// An alert transition envelope ready to enqueue.
pub fn alert_envelope() -> SyncEnvelope {
    use chrono::Utc;
    use fieldguard::domain::{AlertId, AlertStatus, AlertTransition};
    SyncEnvelope::alert_transition(AlertTransition {
        alert_id: AlertId::new(),
        tourist_id: test_tourist_id(),
        from: AlertStatus::Pending,
        to: AlertStatus::Active,
        coordinates: Some(base_position()),
        occurred_at: Utc::now(),
    })
}

/// A registration form that passes validation.
pub fn valid_traveler_form() -> TravelerForm {
    TravelerForm {
        first_name: "Asha".into(),
        last_name: "Verma".into(),
        email: "asha.verma@example.com".into(),
        phone: "+1 212 555 0148".into(),
        nationality: "India".into(),
        passport_number: "P4558821".into(),
        emergency_contact_name: "Ravi Verma".into(),
        emergency_contact_phone: "+91 98100 22334".into(),
        destination: "Agra".into(),
        trip_purpose: "Two week sightseeing visit".into(),
    }
}

/// Authority double that replays a scripted sequence of outcomes and
/// records every submission it sees.
///
/// Once the script runs dry every submission is `Accepted`. Alert
/// updates are pushed through [`ScriptedAuthority::push_update`]; the
/// stream stays open until the sender side is dropped.
pub struct ScriptedAuthority {
    script: Mutex<VecDeque<Result<SubmitOutcome>>>,
    submitted: Mutex<Vec<(EnvelopeId, PayloadKind)>>,
    updates: Mutex<Option<mpsc::UnboundedReceiver<AlertUpdate>>>,
    update_tx: mpsc::UnboundedSender<AlertUpdate>,
}

impl ScriptedAuthority {
    pub fn accepting() -> Arc<Self> {
        Self::with_script(Vec::new())
    }

    pub fn with_script(script: Vec<Result<SubmitOutcome>>) -> Arc<Self> {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            submitted: Mutex::new(Vec::new()),
            updates: Mutex::new(Some(update_rx)),
            update_tx,
        })
    }

    /// Envelope ids in the order they were submitted (including retries).
    pub fn submissions(&self) -> Vec<EnvelopeId> {
        self.submitted.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    /// How many submitted envelopes carried an alert transition.
    pub fn alert_transitions_submitted(&self) -> usize {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, kind)| *kind == PayloadKind::AlertTransition)
            .count()
    }

    /// Push one operator-side alert transition to the update stream.
    pub fn push_update(&self, update: AlertUpdate) {
        let _ = self.update_tx.send(update);
    }
}

#[async_trait]
impl RemoteAuthority for ScriptedAuthority {
    async fn submit_envelope(&self, envelope: &SyncEnvelope) -> Result<SubmitOutcome> {
        self.submitted
            .lock()
            .unwrap()
            .push((envelope.envelope_id, envelope.payload_kind()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SubmitOutcome::Accepted))
    }

    async fn subscribe_alert_updates(&self, _tourist_id: &TouristId) -> Result<AlertUpdateStream> {
        let rx = self
            .updates
            .lock()
            .unwrap()
            .take()
            .expect("update stream already subscribed");
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Issuer double handing out sequential identifiers.
#[derive(Default)]
pub struct CountingIssuer {
    issued: Mutex<u32>,
}

#[async_trait]
impl IdentityIssuer for CountingIssuer {
    async fn issue(&self, _tourist_id: &TouristId) -> Result<IdentityId> {
        let mut issued = self.issued.lock().unwrap();
        *issued += 1;
        Ok(IdentityId::new(format!("did:fg:{:04}", *issued)))
    }
}

/// Assert that a result is Ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
}

/// Assert that a result is Err
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
            Err(e) => e,
        }
    };
}

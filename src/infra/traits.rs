//! Trait definitions for the engine's external collaborators
//!
//! Everything the engine cannot own lives behind one of these seams:
//! the remote authority, the telemetry and positioning hardware, connectivity
//! detection, the risk-signal feed, the route planner, and the identity
//! issuer. Tests inject deterministic implementations; production wires real
//! ones.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::pin::Pin;
use tokio::sync::watch;
use tokio_stream::Stream;

use crate::domain::{
    AlertUpdate, Connectivity, GeoPoint, IdentityId, PlannedRoute, RiskSignal, SubmitOutcome,
    SyncEnvelope, TelemetryReading, TouristId,
};

use super::Result;

/// Stream of alert lifecycle updates pushed by the authority
pub type AlertUpdateStream = Pin<Box<dyn Stream<Item = AlertUpdate> + Send>>;

/// The remote authority the device syncs against.
///
/// Invariant: `submit_envelope` is idempotent by envelope id; re-submitting a
/// delivered envelope yields `Duplicate`, never a second side effect.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Deliver one envelope.
    ///
    /// `Err` means transport failure (nothing is known about delivery);
    /// `Ok(Rejected ...)` means the authority saw the envelope and refused it.
    async fn submit_envelope(&self, envelope: &SyncEnvelope) -> Result<SubmitOutcome>;

    /// Open the stream of operator-side transitions (Responding/Resolved)
    /// for a tourist's alerts.
    async fn subscribe_alert_updates(&self, tourist_id: &TouristId) -> Result<AlertUpdateStream>;
}

/// Source of raw telemetry readings (hardware or simulator).
///
/// Lazy and restartable: the capture task polls it at its own cadence; the
/// source yields `None` once deactivated and the sequence terminates.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn read(&self) -> Result<Option<TelemetryReading>>;
}

/// One-shot position fix. The caller bounds the wait; a slow provider is
/// abandoned, not cancelled.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<GeoPoint>;
}

/// Edge-triggered online/offline detection
#[cfg_attr(test, automock)]
pub trait ConnectivitySignal: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<Connectivity>;
}

/// Feed of advisory risk signals around a position
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RiskSignalSource: Send + Sync {
    async fn signals_near(&self, position: &GeoPoint, radius_meters: f64)
        -> Result<Vec<RiskSignal>>;
}

/// Produces candidate walking polylines between two points.
///
/// Not a mapping provider: the default implementation synthesizes detour
/// variants; a real deployment may plug in cached map data.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn plan(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
        count: usize,
    ) -> Result<Vec<PlannedRoute>>;
}

/// Opaque external identity issuance (the chain/registry collaborator)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityIssuer: Send + Sync {
    async fn issue(&self, tourist_id: &TouristId) -> Result<IdentityId>;
}

/// Health of one background component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentHealth {
    Running,
    Stopped,
    Failed { reason: String },
}

impl ComponentHealth {
    pub fn is_running(&self) -> bool {
        matches!(self, ComponentHealth::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ComponentHealth::Failed { .. })
    }
}

/// Health of all engine background tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub capture: ComponentHealth,
    pub sync: ComponentHealth,
    pub zone: ComponentHealth,
    pub alert_updates: ComponentHealth,
}

impl HealthSnapshot {
    pub fn all_running(&self) -> bool {
        self.capture.is_running()
            && self.sync.is_running()
            && self.zone.is_running()
            && self.alert_updates.is_running()
    }
}

/// Watch-channel-backed connectivity signal; the production implementation
/// wraps platform network callbacks, tests flip it by hand.
#[derive(Debug, Clone)]
pub struct SharedConnectivity {
    tx: std::sync::Arc<watch::Sender<Connectivity>>,
}

impl SharedConnectivity {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Publish a connectivity edge. Repeating the current state is a no-op
    /// for subscribers.
    pub fn set(&self, state: Connectivity) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }
}

impl ConnectivitySignal for SharedConnectivity {
    fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

//! Deterministic simulation collaborators.
//!
//! Stand-ins for the device sensors and data services the engine talks
//! to in the field: a seeded random-walk telemetry source, a fixed
//! signal feed, and a static location fix. Used by integration tests
//! and demos; production deployments supply real implementations of
//! the same traits.

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

use crate::domain::{
    GeoPoint, LandmarkKind, RiskLevel, RiskObservation, RiskSignal, TelemetryReading,
    METERS_PER_DEG_LAT,
};
use crate::infra::{LocationProvider, Result, RiskSignalSource, TelemetrySource};

/// Seeded random walk emitting plausible telemetry.
///
/// Each read drifts the position by at most `step_meters`, drains the
/// battery slowly, and jitters the signal strength. The same seed
/// replays the same walk.
pub struct SimulatedTelemetrySource {
    step_meters: f64,
    state: Mutex<WalkState>,
}

struct WalkState {
    rng: StdRng,
    position: GeoPoint,
    battery: f64,
}

impl SimulatedTelemetrySource {
    pub fn new(seed: u64, start: GeoPoint) -> Self {
        Self {
            step_meters: 20.0,
            state: Mutex::new(WalkState {
                rng: StdRng::seed_from_u64(seed),
                position: start,
                battery: 100.0,
            }),
        }
    }

    pub fn with_step_meters(mut self, step_meters: f64) -> Self {
        self.step_meters = step_meters;
        self
    }
}

#[async_trait]
impl TelemetrySource for SimulatedTelemetrySource {
    async fn read(&self) -> Result<Option<TelemetryReading>> {
        let mut state = self.state.lock().await;

        let heading: f64 = state.rng.gen_range(0.0..std::f64::consts::TAU);
        let distance: f64 = state.rng.gen_range(0.0..self.step_meters);
        let north = heading.cos() * distance;
        let east = heading.sin() * distance;
        let lat_scale = METERS_PER_DEG_LAT;
        let lng_scale = METERS_PER_DEG_LAT * state.position.lat.to_radians().cos().max(0.01);
        state.position = GeoPoint::new(
            state.position.lat + north / lat_scale,
            state.position.lng + east / lng_scale,
        );

        state.battery = (state.battery - state.rng.gen_range(0.0..0.2)).max(5.0);
        let signal = state.rng.gen_range(35..=95) as u8;

        Ok(Some(TelemetryReading::new(
            state.position,
            state.battery.round() as u8,
            signal,
        )))
    }
}

/// Signal feed backed by a fixed advisory list.
pub struct StaticSignalSource {
    signals: Vec<RiskSignal>,
}

impl StaticSignalSource {
    pub fn new(signals: Vec<RiskSignal>) -> Self {
        Self { signals }
    }
}

#[async_trait]
impl RiskSignalSource for StaticSignalSource {
    async fn signals_near(&self, center: &GeoPoint, radius_meters: f64) -> Result<Vec<RiskSignal>> {
        Ok(self
            .signals
            .iter()
            .filter(|s| s.center.distance_meters(center) <= radius_meters + s.radius_meters)
            .cloned()
            .collect())
    }
}

/// Location provider pinned to one point.
pub struct StaticLocation {
    position: GeoPoint,
}

impl StaticLocation {
    pub fn new(position: GeoPoint) -> Self {
        Self { position }
    }

    pub fn shared(position: GeoPoint) -> Arc<dyn LocationProvider> {
        Arc::new(Self::new(position))
    }
}

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn current_position(&self) -> Result<GeoPoint> {
        Ok(self.position)
    }
}

/// A small advisory set around a center point, for demos and tests.
pub fn sample_signals(center: GeoPoint) -> Vec<RiskSignal> {
    vec![
        RiskSignal::new(
            "riverbank flood advisory",
            offset(center, 600.0, 400.0),
            500.0,
            RiskLevel::Caution,
        ),
        RiskSignal::new(
            "old town after dark",
            offset(center, -900.0, 250.0),
            400.0,
            RiskLevel::HighRisk,
        ),
    ]
}

/// A small observation set around a center point, for demos and tests.
pub fn sample_observations(center: GeoPoint) -> Vec<RiskObservation> {
    vec![
        RiskObservation::incident(offset(center, 150.0, -80.0), "pickpocketing"),
        RiskObservation::incident(offset(center, -300.0, 520.0), "poor lighting"),
        RiskObservation::landmark(
            offset(center, 90.0, 210.0),
            "market street police post",
            LandmarkKind::Police,
        ),
        RiskObservation::landmark(
            offset(center, -120.0, -340.0),
            "district hospital",
            LandmarkKind::Hospital,
        ),
        RiskObservation::landmark(
            offset(center, 420.0, 60.0),
            "fountain square",
            LandmarkKind::PointOfInterest,
        ),
    ]
}

fn offset(origin: GeoPoint, north_meters: f64, east_meters: f64) -> GeoPoint {
    let lng_scale = METERS_PER_DEG_LAT * origin.lat.to_radians().cos().max(0.01);
    GeoPoint::new(
        origin.lat + north_meters / METERS_PER_DEG_LAT,
        origin.lng + east_meters / lng_scale,
    )
}

//! Zone classification types
//!
//! A risk signal is a circular area with an assessed risk level; the
//! classifier folds the signals covering a position into one `ZoneStatus`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GeoPoint, RiskLevel};

/// One advisory area with an assessed risk level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    /// Human-readable area name, e.g. "Waterfront Promenade"
    pub label: String,

    /// Center of the advisory circle
    pub center: GeoPoint,

    /// Radius of the advisory circle in meters
    pub radius_meters: f64,

    /// Assessed risk inside the circle
    pub level: RiskLevel,
}

impl RiskSignal {
    pub fn new(
        label: impl Into<String>,
        center: GeoPoint,
        radius_meters: f64,
        level: RiskLevel,
    ) -> Self {
        Self {
            label: label.into(),
            center,
            radius_meters,
            level,
        }
    }

    /// Whether the position falls inside the advisory circle.
    pub fn contains(&self, position: &GeoPoint) -> bool {
        self.center.distance_meters(position) <= self.radius_meters
    }
}

/// The classification produced by one evaluation.
///
/// Statuses are recomputed, never mutated; each evaluation yields a fresh
/// value with its own `evaluated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneStatus {
    /// Name of the area that determined the level (or the configured default
    /// label when no signal applies)
    pub zone_label: String,

    /// Risk level in effect
    pub risk_level: RiskLevel,

    /// When this evaluation happened
    pub evaluated_at: DateTime<Utc>,
}

impl ZoneStatus {
    pub fn new(
        zone_label: impl Into<String>,
        risk_level: RiskLevel,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            zone_label: zone_label.into(),
            risk_level,
            evaluated_at,
        }
    }
}

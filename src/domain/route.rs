//! Route candidates, scoring inputs, and the computed batch
//!
//! Candidates are compared by safety score (higher is better); ties break
//! toward the shorter estimated duration. A batch is replaced wholesale on
//! recomputation and carries its own selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use super::{GeoPoint, RouteId};

/// Landmark categories known to the scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkKind {
    Police,
    Hospital,
    TouristInfo,
    PointOfInterest,
}

impl LandmarkKind {
    /// Landmarks whose proximity earns a safety bonus.
    pub fn is_safety_anchor(&self) -> bool {
        matches!(
            self,
            LandmarkKind::Police | LandmarkKind::Hospital | LandmarkKind::TouristInfo
        )
    }
}

/// What a historical observation point records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationKind {
    /// A reported incident contributing a risk factor label
    Incident { factor: String },
    /// A mapped landmark
    Landmark { name: String, category: LandmarkKind },
}

/// One point in the historical incident/landmark dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskObservation {
    /// Where the observation was recorded
    pub position: GeoPoint,

    /// Incident or landmark detail
    #[serde(flatten)]
    pub kind: ObservationKind,

    /// When the observation entered the dataset
    pub recorded_at: DateTime<Utc>,
}

impl RiskObservation {
    pub fn incident(position: GeoPoint, factor: impl Into<String>) -> Self {
        Self {
            position,
            kind: ObservationKind::Incident {
                factor: factor.into(),
            },
            recorded_at: Utc::now(),
        }
    }

    pub fn landmark(position: GeoPoint, name: impl Into<String>, category: LandmarkKind) -> Self {
        Self {
            position,
            kind: ObservationKind::Landmark {
                name: name.into(),
                category,
            },
            recorded_at: Utc::now(),
        }
    }

    /// The label this observation contributes during aggregation.
    pub fn label(&self) -> &str {
        match &self.kind {
            ObservationKind::Incident { factor } => factor,
            ObservationKind::Landmark { name, .. } => name,
        }
    }
}

/// Planner output: a walkable polyline before any scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    /// Polyline from origin to destination, densely sampled
    pub path: Vec<GeoPoint>,

    /// Path length in meters
    pub distance_meters: f64,

    /// Estimated walking time in seconds
    pub estimated_duration_seconds: u32,
}

/// One scored route candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCandidate {
    /// Candidate identifier, scoped to its batch
    pub route_id: RouteId,

    /// Polyline from origin to destination
    pub path: Vec<GeoPoint>,

    /// Path length in meters
    pub distance_meters: f64,

    /// Estimated walking time in seconds
    pub estimated_duration_seconds: u32,

    /// Safety score, 0-100, higher is safer
    pub safety_score: u8,

    /// Landmarks encountered along the route, in path order
    pub landmarks: Vec<String>,

    /// Distinct risk factor labels observed along the route
    pub risk_factors: BTreeSet<String>,
}

impl RouteCandidate {
    /// Batch ordering: descending score, then ascending duration.
    pub fn ranking(&self, other: &Self) -> Ordering {
        other
            .safety_score
            .cmp(&self.safety_score)
            .then(self.estimated_duration_seconds.cmp(&other.estimated_duration_seconds))
    }
}

impl fmt::Display for RouteCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "route {} score {} ({:.0} m, {} s, {} risk factors)",
            self.route_id,
            self.safety_score,
            self.distance_meters,
            self.estimated_duration_seconds,
            self.risk_factors.len()
        )
    }
}

/// A computed set of candidates plus the current selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteBatch {
    /// Batch identifier; selections are only valid within their batch
    pub batch_id: Uuid,

    /// Where the batch was computed from
    pub origin: GeoPoint,

    /// Where the candidates lead
    pub destination: GeoPoint,

    /// When the batch was computed
    pub computed_at: DateTime<Utc>,

    /// Candidates in ranked order (best first)
    pub candidates: Vec<RouteCandidate>,

    /// Currently selected candidate; defaults to the best-ranked one
    pub selected: Option<RouteId>,
}

impl RouteBatch {
    /// Build a batch from ranked candidates, selecting the best one.
    pub fn new(
        origin: GeoPoint,
        destination: GeoPoint,
        candidates: Vec<RouteCandidate>,
    ) -> Self {
        let selected = candidates.first().map(|c| c.route_id);
        Self {
            batch_id: Uuid::new_v4(),
            origin,
            destination,
            computed_at: Utc::now(),
            candidates,
            selected,
        }
    }

    pub fn contains(&self, route_id: &RouteId) -> bool {
        self.candidates.iter().any(|c| &c.route_id == route_id)
    }

    pub fn selected_candidate(&self) -> Option<&RouteCandidate> {
        let selected = self.selected.as_ref()?;
        self.candidates.iter().find(|c| &c.route_id == selected)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

//! Route planning and safety scoring.
//!
//! A pluggable planner proposes candidate polylines under a bounded
//! timeout; the scorer walks each candidate segment by segment, pulls
//! the nearest historical observations from the grid index, and folds
//! them into a 0-100 safety score: a fixed penalty per distinct risk
//! factor, a fixed bonus per distinct safety landmark, clamped at both
//! ends. Candidates are ranked score-descending with duration as the
//! tie-break, and each recomputation replaces the batch wholesale.

mod grid;

pub use grid::{point_to_segment_meters, SpatialGrid};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{info, instrument, warn};

use crate::domain::{
    GeoPoint, ObservationKind, PlannedRoute, RiskObservation, RouteBatch, RouteCandidate, RouteId,
    METERS_PER_DEG_LAT,
};
use crate::infra::{EngineError, Result, RoutePlanner};

/// Route scorer configuration.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Upper bound on one planner invocation.
    pub planner_timeout: Duration,

    /// Candidates requested from the planner.
    pub route_count: usize,

    /// Observations considered per segment.
    pub neighbors_per_segment: usize,

    /// Observations farther than this from a segment are ignored even
    /// when they are among its nearest.
    pub relevance_radius_meters: f64,

    /// Score penalty per distinct risk factor.
    pub risk_penalty: u8,

    /// Score bonus per distinct safety landmark.
    pub landmark_bonus: u8,

    /// Grid cell size for the observation index.
    pub cell_size_meters: f64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            planner_timeout: Duration::from_secs(3),
            route_count: 3,
            neighbors_per_segment: 5,
            relevance_radius_meters: 150.0,
            risk_penalty: 15,
            landmark_bonus: 5,
            cell_size_meters: 250.0,
        }
    }
}

struct Inner {
    config: RouteConfig,
    planner: Arc<dyn RoutePlanner>,
    grid: Mutex<SpatialGrid>,
    batch: Mutex<Option<RouteBatch>>,
    updates: watch::Sender<Option<RouteBatch>>,
}

/// Handle to the route scorer. Cheap to clone; all clones share the
/// same state.
#[derive(Clone)]
pub struct RouteScorer {
    inner: Arc<Inner>,
}

impl RouteScorer {
    pub fn new(
        config: RouteConfig,
        planner: Arc<dyn RoutePlanner>,
        observations: Vec<RiskObservation>,
    ) -> Self {
        let grid = SpatialGrid::build(config.cell_size_meters, observations);
        let (updates, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                planner,
                grid: Mutex::new(grid),
                batch: Mutex::new(None),
                updates,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RouteBatch>> {
        self.inner.updates.subscribe()
    }

    pub async fn current_batch(&self) -> Option<RouteBatch> {
        self.inner.batch.lock().await.clone()
    }

    /// Replace the observation dataset; the index is rebuilt wholesale.
    pub async fn update_observations(&self, observations: Vec<RiskObservation>) {
        let count = observations.len();
        let grid = SpatialGrid::build(self.inner.config.cell_size_meters, observations);
        *self.inner.grid.lock().await = grid;
        info!(observations = count, "observation index rebuilt");
    }

    /// Plan and score a fresh batch. The previous batch (and selection)
    /// is replaced only when planning succeeds; a planner timeout leaves
    /// it untouched and surfaces a retryable error.
    #[instrument(skip(self), fields(origin = %origin, destination = %destination))]
    pub async fn compute_routes(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<RouteBatch> {
        if !origin.is_valid() || !destination.is_valid() {
            return Err(EngineError::Validation(
                "route endpoints must be valid coordinates".to_string(),
            ));
        }

        let timeout = self.inner.config.planner_timeout;
        let plan = self
            .inner
            .planner
            .plan(&origin, &destination, self.inner.config.route_count);
        let planned = match tokio::time::timeout(timeout, plan).await {
            Ok(Ok(routes)) => routes,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "route planner timed out"
                );
                return Err(EngineError::RoutePlanningTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let mut candidates = {
            let grid = self.inner.grid.lock().await;
            planned
                .into_iter()
                .map(|route| self.assess(&grid, route))
                .collect::<Vec<_>>()
        };
        candidates.sort_by(|a, b| a.ranking(b));

        let batch = RouteBatch::new(origin, destination, candidates);
        *self.inner.batch.lock().await = Some(batch.clone());
        let _ = self.inner.updates.send(Some(batch.clone()));
        info!(
            batch_id = %batch.batch_id,
            candidates = batch.candidates.len(),
            best_score = batch.selected_candidate().map(|c| c.safety_score).unwrap_or(0),
            "route batch computed"
        );
        Ok(batch)
    }

    /// Pick a candidate from the current batch. The selection sticks
    /// until the next recomputation replaces the batch.
    #[instrument(skip(self), fields(route_id = %route_id))]
    pub async fn select_route(&self, route_id: RouteId) -> Result<RouteCandidate> {
        let mut guard = self.inner.batch.lock().await;
        let Some(batch) = guard.as_mut() else {
            return Err(EngineError::UnknownRoute { route_id });
        };
        if !batch.contains(&route_id) {
            return Err(EngineError::UnknownRoute { route_id });
        }

        batch.selected = Some(route_id);
        let candidate = batch
            .selected_candidate()
            .cloned()
            .ok_or_else(|| EngineError::Internal("selected candidate vanished".to_string()))?;
        let snapshot = batch.clone();
        drop(guard);

        let _ = self.inner.updates.send(Some(snapshot));
        info!(
            route_id = %route_id,
            score = candidate.safety_score,
            "route selected"
        );
        Ok(candidate)
    }

    /// Score one planned route against the observation index.
    fn assess(&self, grid: &SpatialGrid, route: PlannedRoute) -> RouteCandidate {
        let config = &self.inner.config;
        let mut risk_factors: BTreeSet<String> = BTreeSet::new();
        let mut landmarks: BTreeSet<String> = BTreeSet::new();

        for window in route.path.windows(2) {
            let (a, b) = (window[0], window[1]);
            let midpoint = GeoPoint::new((a.lat + b.lat) / 2.0, (a.lng + b.lng) / 2.0);

            // Over-fetch by point distance from the midpoint, then re-rank
            // by exact distance to the segment itself.
            let mut by_segment: Vec<(f64, &RiskObservation)> = grid
                .nearest(&midpoint, config.neighbors_per_segment * 2)
                .into_iter()
                .map(|obs| (point_to_segment_meters(&obs.position, &a, &b), obs))
                .collect();
            by_segment.sort_by(|x, y| x.0.total_cmp(&y.0));

            for (distance, observation) in by_segment
                .into_iter()
                .take(config.neighbors_per_segment)
            {
                if distance > config.relevance_radius_meters {
                    continue;
                }
                match &observation.kind {
                    ObservationKind::Incident { factor } => {
                        risk_factors.insert(factor.clone());
                    }
                    ObservationKind::Landmark { name, category } => {
                        if category.is_safety_anchor() {
                            landmarks.insert(name.clone());
                        }
                    }
                }
            }
        }

        let penalty = config.risk_penalty as i32 * risk_factors.len() as i32;
        let bonus = config.landmark_bonus as i32 * landmarks.len() as i32;
        let safety_score = (100 - penalty + bonus).clamp(0, 100) as u8;

        RouteCandidate {
            route_id: RouteId::new(),
            path: route.path,
            distance_meters: route.distance_meters,
            estimated_duration_seconds: route.estimated_duration_seconds,
            safety_score,
            landmarks: landmarks.into_iter().collect(),
            risk_factors,
        }
    }
}

/// Default planner: the direct line plus laterally offset variants.
///
/// Stands in for a road-network planner; each variant bulges sideways
/// from the direct line so candidates cover distinct corridors.
#[derive(Debug, Clone)]
pub struct OffsetPlanner {
    /// Assumed walking speed for duration estimates.
    pub walking_speed_mps: f64,

    /// Bulge of the first offset pair, as a fraction of the direct
    /// distance.
    pub offset_fraction: f64,
}

impl Default for OffsetPlanner {
    fn default() -> Self {
        Self {
            walking_speed_mps: 1.4,
            offset_fraction: 0.15,
        }
    }
}

impl OffsetPlanner {
    fn polyline(&self, origin: &GeoPoint, destination: &GeoPoint, bulge_m: f64) -> PlannedRoute {
        let lng_scale = METERS_PER_DEG_LAT * origin.lat.to_radians().cos();

        // Unit perpendicular to the direct line, in the local frame.
        let dx = (destination.lng - origin.lng) * lng_scale;
        let dy = (destination.lat - origin.lat) * METERS_PER_DEG_LAT;
        let length = (dx * dx + dy * dy).sqrt().max(f64::EPSILON);
        let (px, py) = (-dy / length, dx / length);

        let mut path = vec![*origin];
        for step in 1..=3 {
            let t = step as f64 / 4.0;
            let sideways = bulge_m * (std::f64::consts::PI * t).sin();
            let lat = origin.lat + t * (destination.lat - origin.lat)
                + (py * sideways) / METERS_PER_DEG_LAT;
            let lng = origin.lng
                + t * (destination.lng - origin.lng)
                + (px * sideways) / lng_scale;
            path.push(GeoPoint::new(lat, lng));
        }
        path.push(*destination);

        let distance_meters: f64 = path
            .windows(2)
            .map(|w| w[0].distance_meters(&w[1]))
            .sum();
        let estimated_duration_seconds = (distance_meters / self.walking_speed_mps).ceil() as u32;

        PlannedRoute {
            path,
            distance_meters,
            estimated_duration_seconds,
        }
    }
}

#[async_trait]
impl RoutePlanner for OffsetPlanner {
    async fn plan(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
        count: usize,
    ) -> Result<Vec<PlannedRoute>> {
        let direct = origin.distance_meters(destination);
        let mut routes = Vec::with_capacity(count);
        for index in 0..count {
            let bulge = if index == 0 {
                0.0
            } else {
                let side = if index % 2 == 1 { 1.0 } else { -1.0 };
                let rank = ((index + 1) / 2) as f64;
                side * rank * self.offset_fraction * direct
            };
            routes.push(self.polyline(origin, destination, bulge));
        }
        Ok(routes)
    }
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LandmarkKind;

    fn origin() -> GeoPoint {
        GeoPoint::new(27.1751, 78.0421)
    }

    fn destination() -> GeoPoint {
        // Roughly 2 km north.
        GeoPoint::new(27.1751 + 2_000.0 / METERS_PER_DEG_LAT, 78.0421)
    }

    fn east_of(point: GeoPoint, meters: f64) -> GeoPoint {
        let lng_scale = METERS_PER_DEG_LAT * point.lat.to_radians().cos();
        GeoPoint::new(point.lat, point.lng + meters / lng_scale)
    }

    fn north_of(point: GeoPoint, meters: f64) -> GeoPoint {
        GeoPoint::new(point.lat + meters / METERS_PER_DEG_LAT, point.lng)
    }

    /// Planner double returning fixed corridors far enough apart that
    /// observations near one never bleed into another.
    struct FixedPlanner {
        routes: Vec<PlannedRoute>,
    }

    impl FixedPlanner {
        fn corridors(durations: [u32; 3]) -> (Self, [GeoPoint; 3]) {
            let mut routes = Vec::new();
            let mut midpoints = [origin(); 3];
            for (index, duration) in durations.into_iter().enumerate() {
                let start = east_of(origin(), index as f64 * 2_000.0);
                let end = north_of(start, 2_000.0);
                let mid = north_of(start, 1_000.0);
                midpoints[index] = mid;
                routes.push(PlannedRoute {
                    path: vec![start, mid, end],
                    distance_meters: 2_000.0,
                    estimated_duration_seconds: duration,
                });
            }
            (Self { routes }, midpoints)
        }
    }

    #[async_trait]
    impl RoutePlanner for FixedPlanner {
        async fn plan(
            &self,
            _origin: &GeoPoint,
            _destination: &GeoPoint,
            _count: usize,
        ) -> Result<Vec<PlannedRoute>> {
            Ok(self.routes.clone())
        }
    }

    struct HangingPlanner;

    #[async_trait]
    impl RoutePlanner for HangingPlanner {
        async fn plan(
            &self,
            _origin: &GeoPoint,
            _destination: &GeoPoint,
            _count: usize,
        ) -> Result<Vec<PlannedRoute>> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn clean_routes_score_one_hundred() {
        let scorer = RouteScorer::new(
            RouteConfig::default(),
            Arc::new(OffsetPlanner::default()),
            Vec::new(),
        );
        let batch = scorer.compute_routes(origin(), destination()).await.unwrap();
        assert_eq!(batch.candidates.len(), 3);
        assert!(batch.candidates.iter().all(|c| c.safety_score == 100));
        // Clean scores tie; the direct (shortest) route leads the batch.
        let best = batch.selected_candidate().unwrap();
        assert!(batch
            .candidates
            .iter()
            .all(|c| c.estimated_duration_seconds >= best.estimated_duration_seconds));
    }

    #[tokio::test]
    async fn batch_orders_by_score_then_duration() {
        // Corridor 0: one risk factor plus two landmarks -> 95.
        // Corridor 1: one risk factor -> 85.
        // Corridor 2: two risk factors -> 70.
        let (planner, mids) = FixedPlanner::corridors([900, 840, 780]);
        let observations = vec![
            RiskObservation::incident(east_of(mids[0], 30.0), "pickpocketing"),
            RiskObservation::landmark(east_of(mids[0], 40.0), "central police post", LandmarkKind::Police),
            RiskObservation::landmark(east_of(mids[0], 60.0), "city hospital", LandmarkKind::Hospital),
            RiskObservation::incident(east_of(mids[1], 30.0), "poor lighting"),
            RiskObservation::incident(east_of(mids[2], 30.0), "poor lighting"),
            RiskObservation::incident(east_of(mids[2], 50.0), "flash flooding"),
        ];
        let scorer = RouteScorer::new(RouteConfig::default(), Arc::new(planner), observations);

        let batch = scorer.compute_routes(origin(), destination()).await.unwrap();
        let scores: Vec<u8> = batch.candidates.iter().map(|c| c.safety_score).collect();
        assert_eq!(scores, vec![95, 85, 70]);
        assert_eq!(batch.selected_candidate().unwrap().safety_score, 95);
        assert_eq!(
            batch.candidates[0].landmarks,
            vec!["central police post".to_string(), "city hospital".to_string()]
        );
    }

    #[tokio::test]
    async fn an_added_risk_factor_strictly_lowers_the_score() {
        let (planner, mids) = FixedPlanner::corridors([900, 900, 900]);
        let one_factor = vec![RiskObservation::incident(
            east_of(mids[0], 30.0),
            "pickpocketing",
        )];
        let mut two_factors = one_factor.clone();
        two_factors.push(RiskObservation::incident(
            east_of(mids[0], 45.0),
            "poor lighting",
        ));

        let planner = Arc::new(planner);
        let scorer = RouteScorer::new(RouteConfig::default(), planner.clone(), one_factor);
        let before = scorer.compute_routes(origin(), destination()).await.unwrap();

        scorer.update_observations(two_factors).await;
        let after = scorer.compute_routes(origin(), destination()).await.unwrap();

        let score_before = before.candidates.last().unwrap().safety_score;
        let score_after = after.candidates.last().unwrap().safety_score;
        assert_eq!(score_before, 85);
        assert_eq!(score_after, 70);
        assert!(score_after < score_before);
    }

    #[tokio::test]
    async fn repeated_factor_labels_count_once() {
        let (planner, mids) = FixedPlanner::corridors([900, 900, 900]);
        let observations = vec![
            RiskObservation::incident(east_of(mids[0], 30.0), "poor lighting"),
            RiskObservation::incident(east_of(mids[0], 50.0), "poor lighting"),
            RiskObservation::incident(east_of(mids[0], 70.0), "poor lighting"),
        ];
        let scorer = RouteScorer::new(RouteConfig::default(), Arc::new(planner), observations);
        let batch = scorer.compute_routes(origin(), destination()).await.unwrap();
        let lowest = batch.candidates.last().unwrap();
        assert_eq!(lowest.safety_score, 85);
        assert_eq!(lowest.risk_factors.len(), 1);
    }

    #[tokio::test]
    async fn distant_observations_are_ignored() {
        let (planner, mids) = FixedPlanner::corridors([900, 900, 900]);
        // 500 m out: nearest by distance but outside the relevance radius.
        let observations = vec![RiskObservation::incident(
            east_of(mids[0], 500.0),
            "pickpocketing",
        )];
        let scorer = RouteScorer::new(RouteConfig::default(), Arc::new(planner), observations);
        let batch = scorer.compute_routes(origin(), destination()).await.unwrap();
        assert!(batch.candidates.iter().all(|c| c.safety_score == 100));
    }

    #[tokio::test]
    async fn selection_sticks_until_the_batch_is_replaced() {
        let (planner, mids) = FixedPlanner::corridors([900, 840, 780]);
        let observations = vec![RiskObservation::incident(
            east_of(mids[0], 30.0),
            "pickpocketing",
        )];
        let scorer = RouteScorer::new(RouteConfig::default(), Arc::new(planner), observations);

        let batch = scorer.compute_routes(origin(), destination()).await.unwrap();
        let worst = batch.candidates.last().unwrap().route_id;
        let picked = scorer.select_route(worst).await.unwrap();
        assert_eq!(picked.route_id, worst);
        assert_eq!(
            scorer.current_batch().await.unwrap().selected,
            Some(worst)
        );

        // Recomputation replaces the batch and resets to the default.
        let fresh = scorer.compute_routes(origin(), destination()).await.unwrap();
        assert_ne!(fresh.selected, Some(worst));
        assert_eq!(
            fresh.selected,
            fresh.candidates.first().map(|c| c.route_id)
        );
    }

    #[tokio::test]
    async fn selecting_outside_the_batch_is_rejected() {
        let (planner, _) = FixedPlanner::corridors([900, 840, 780]);
        let scorer = RouteScorer::new(RouteConfig::default(), Arc::new(planner), Vec::new());
        scorer.compute_routes(origin(), destination()).await.unwrap();

        let stranger = RouteId::new();
        let err = scorer.select_route(stranger).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownRoute { route_id } if route_id == stranger));
    }

    #[tokio::test(start_paused = true)]
    async fn planner_timeout_surfaces_a_retry_signal_and_keeps_the_batch() {
        let scorer = RouteScorer::new(
            RouteConfig::default(),
            Arc::new(HangingPlanner),
            Vec::new(),
        );
        let err = scorer
            .compute_routes(origin(), destination())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::RoutePlanningTimeout { timeout_ms: 3_000 }
        ));
        assert!(scorer.current_batch().await.is_none());
    }

    #[tokio::test]
    async fn invalid_endpoints_are_rejected_before_planning() {
        let scorer = RouteScorer::new(
            RouteConfig::default(),
            Arc::new(OffsetPlanner::default()),
            Vec::new(),
        );
        let err = scorer
            .compute_routes(GeoPoint::new(120.0, 0.0), destination())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn offset_planner_produces_distinct_corridors() {
        let planner = OffsetPlanner::default();
        let routes = planner.plan(&origin(), &destination(), 3).await.unwrap();
        assert_eq!(routes.len(), 3);

        for route in &routes {
            assert_eq!(route.path.first(), Some(&origin()));
            assert_eq!(route.path.last(), Some(&destination()));
            assert!(route.distance_meters >= 1_990.0);
            assert!(route.estimated_duration_seconds > 0);
        }
        // The direct variant is the shortest.
        assert!(routes[0].distance_meters < routes[1].distance_meters);
        assert!(routes[0].distance_meters < routes[2].distance_meters);
        // The two offsets bulge to opposite sides.
        let mid1 = routes[1].path[2];
        let mid2 = routes[2].path[2];
        assert!((mid1.lng - mid2.lng).abs() > 1e-4);
    }
}

//! Uniform grid index over risk observations.
//!
//! Observations are bucketed into fixed-size cells keyed by quantized
//! latitude and longitude. Nearest-neighbor queries expand outward in
//! rings and stop once no unvisited ring can hold a closer point than
//! the k-th best found, so results are exact, not approximate.

use std::collections::HashMap;

use crate::domain::{GeoPoint, RiskObservation, METERS_PER_DEG_LAT};

/// Spatial index over a fixed observation set. Rebuilt wholesale when
/// the dataset changes.
#[derive(Debug, Default)]
pub struct SpatialGrid {
    cell_size_deg: f64,
    observations: Vec<RiskObservation>,
    cells: HashMap<(i32, i32), Vec<usize>>,
}

impl SpatialGrid {
    /// Bucket `observations` into cells roughly `cell_size_meters` on a
    /// side.
    pub fn build(cell_size_meters: f64, observations: Vec<RiskObservation>) -> Self {
        let cell_size_deg = (cell_size_meters / METERS_PER_DEG_LAT).max(f64::EPSILON);
        let mut cells: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        for (index, observation) in observations.iter().enumerate() {
            cells
                .entry(Self::cell_of(cell_size_deg, &observation.position))
                .or_default()
                .push(index);
        }
        Self {
            cell_size_deg,
            observations,
            cells,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// The `k` observations closest to `position`, nearest first.
    pub fn nearest(&self, position: &GeoPoint, k: usize) -> Vec<&RiskObservation> {
        if k == 0 || self.observations.is_empty() {
            return Vec::new();
        }

        let (center_row, center_col) = Self::cell_of(self.cell_size_deg, position);
        // Narrowest physical cell extent around the query latitude; the
        // ring lower bound must never overestimate.
        let cell_extent_m = self.cell_size_deg
            * METERS_PER_DEG_LAT
            * position.lat.to_radians().cos().abs().min(1.0).max(0.01);

        let mut found: Vec<(f64, usize)> = Vec::new();
        let mut ring: i32 = 0;
        loop {
            for (row, col) in ring_cells(center_row, center_col, ring) {
                if let Some(indices) = self.cells.get(&(row, col)) {
                    for &index in indices {
                        let distance =
                            position.distance_meters(&self.observations[index].position);
                        found.push((distance, index));
                    }
                }
            }

            if found.len() >= k {
                found.sort_by(|a, b| a.0.total_cmp(&b.0));
                let kth = found[k - 1].0;
                // Any point in ring r+1 is at least r cell extents away.
                if ring as f64 * cell_extent_m > kth {
                    break;
                }
            }
            if found.len() == self.observations.len() {
                found.sort_by(|a, b| a.0.total_cmp(&b.0));
                break;
            }
            ring += 1;
        }

        found
            .into_iter()
            .take(k)
            .map(|(_, index)| &self.observations[index])
            .collect()
    }

    fn cell_of(cell_size_deg: f64, position: &GeoPoint) -> (i32, i32) {
        (
            (position.lat / cell_size_deg).floor() as i32,
            (position.lng / cell_size_deg).floor() as i32,
        )
    }
}

/// Cells at Chebyshev distance `ring` from the center cell.
fn ring_cells(
    center_row: i32,
    center_col: i32,
    ring: i32,
) -> impl Iterator<Item = (i32, i32)> {
    let mut cells = Vec::new();
    if ring == 0 {
        cells.push((center_row, center_col));
        return cells.into_iter();
    }
    for delta_col in -ring..=ring {
        cells.push((center_row - ring, center_col + delta_col));
        cells.push((center_row + ring, center_col + delta_col));
    }
    for delta_row in (-ring + 1)..ring {
        cells.push((center_row + delta_row, center_col - ring));
        cells.push((center_row + delta_row, center_col + ring));
    }
    cells.into_iter()
}

/// Great-circle distance from `point` to the segment `a`-`b`, computed
/// in a local equirectangular frame centered on `point`. Good to well
/// under a percent at city scale.
pub fn point_to_segment_meters(point: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat_scale = METERS_PER_DEG_LAT;
    let lng_scale = METERS_PER_DEG_LAT * point.lat.to_radians().cos();

    let ax = (a.lng - point.lng) * lng_scale;
    let ay = (a.lat - point.lat) * lat_scale;
    let bx = (b.lng - point.lng) * lng_scale;
    let by = (b.lat - point.lat) * lat_scale;

    let dx = bx - ax;
    let dy = by - ay;
    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return (ax * ax + ay * ay).sqrt();
    }

    // Project the origin (the query point) onto the segment.
    let t = (-(ax * dx + ay * dy) / length_sq).clamp(0.0, 1.0);
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    (cx * cx + cy * cy).sqrt()
}

// ===== Tests =====

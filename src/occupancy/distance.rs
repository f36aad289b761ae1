//! Great-circle distances among distinct plot locations.

use std::collections::HashMap;

use faer::Mat;

use crate::input::SurveyPlot;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Haversine distance in kilometres between two points in decimal degrees.
#[must_use]
pub fn haversine_km(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let phi_a = lat_a.to_radians();
    let phi_b = lat_b.to_radians();
    let half_dphi = 0.5 * (lat_b - lat_a).to_radians();
    let half_dlambda = 0.5 * (lon_b - lon_a).to_radians();
    let h = (phi_a.cos() * phi_b.cos()).mul_add(
        half_dlambda.sin().powi(2),
        half_dphi.sin().powi(2),
    );
    2.0 * EARTH_RADIUS_KM * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Symmetric matrix of distances among the first observation of every
/// distinct subject id. Remeasurements collapse onto one location.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    index: HashMap<String, usize>,
    /// Row of each distinct subject in the plot slice it was built from.
    first_observation: Vec<usize>,
    distances: Mat<f64>,
}

impl DistanceMatrix {
    #[must_use]
    pub fn from_plots(plots: &[SurveyPlot]) -> Self {
        let mut index = HashMap::new();
        let mut first_observation = Vec::new();
        for (row, plot) in plots.iter().enumerate() {
            if !index.contains_key(&plot.subject_id) {
                index.insert(plot.subject_id.clone(), first_observation.len());
                first_observation.push(row);
            }
        }

        let n = first_observation.len();
        let mut distances = Mat::<f64>::zeros(n, n);
        for i in 0..n {
            let a = &plots[first_observation[i]];
            for j in (i + 1)..n {
                let b = &plots[first_observation[j]];
                let d = haversine_km(a.latitude_deg, a.longitude_deg, b.latitude_deg, b.longitude_deg);
                distances[(i, j)] = d;
                distances[(j, i)] = d;
            }
        }

        Self {
            index,
            first_observation,
            distances,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.first_observation.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first_observation.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, subject_id: &str) -> Option<usize> {
        self.index.get(subject_id).copied()
    }

    /// Position, in the source plot slice, of the first observation of `subject_id`.
    #[must_use]
    pub fn first_observation(&self, subject_id: &str) -> Option<usize> {
        self.index_of(subject_id).map(|idx| self.first_observation[idx])
    }

    #[must_use]
    pub fn by_index(&self, row: usize, col: usize) -> f64 {
        self.distances[(row, col)]
    }

    #[must_use]
    pub fn distance(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.by_index(self.index_of(a)?, self.index_of(b)?))
    }
}

//! # Occupancy index
//!
//! Design-based estimate of the local proportion of plots occupied by a
//! species, around a focal plot, within a radius and a trailing window of
//! measurement years. The estimate is used as a model covariate.
//!
//! The estimator is built once from the full plot collection:
//! - a distance matrix over the first observation of each distinct plot,
//! - a lazily filled cache of the plots whose year falls in a window
//!   relative to a focal year.
//!
//! For a focal plot, the neighbourhood is the year-filtered set intersected
//! with the radius filter, collapsed to one record per plot id (a record
//! showing the species wins over one that does not). Equal sampling
//! weights use the simple-random-sample mean; unequal weights use a
//! Horvitz-Thompson proportion over the plot units that fit in the disc.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::input::{InputError, SurveyPlot};
use crate::parameters::GaussianEstimate;

pub mod distance;
pub mod index;
pub mod sampling;

pub use distance::{DistanceMatrix, EARTH_RADIUS_KM, haversine_km};
pub use index::OccupancyIndex;
pub use sampling::{horvitz_thompson_proportion, population_size, simple_random_sample_mean};

/// Relative tolerance for treating sampling weights as equal.
const EQUAL_WEIGHT_TOLERANCE: f64 = 1.0e-12;

/// Errors returned by the occupancy estimator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OccupancyError {
    #[error(transparent)]
    InvalidPlot(#[from] InputError),
    #[error("plot `{subject_id}` is not part of the estimator's plot collection")]
    UnknownSubject { subject_id: String },
    #[error(
        "neighbourhood of plot `{subject_id}` in {year} holds {found} distinct plot(s); at least 2 are required"
    )]
    InsufficientSample {
        subject_id: String,
        year: i32,
        found: usize,
    },
    #[error("search radius must be finite and positive; found {0}")]
    InvalidRadius(f64),
    #[error("year window [{min}, {max}] is empty")]
    InvalidYearWindow { min: i32, max: i32 },
}

/// Inclusive range of `focal_year - plot_year` differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct YearWindow {
    pub min: i32,
    pub max: i32,
}

impl Default for YearWindow {
    fn default() -> Self {
        Self { min: 0, max: 10 }
    }
}

impl YearWindow {
    #[must_use]
    pub const fn contains(self, year_difference: i32) -> bool {
        year_difference >= self.min && year_difference <= self.max
    }
}

/// Neighbourhood definition for the occupancy covariate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancyOptions {
    pub max_radius_km: f64,
    pub year_window: YearWindow,
}

impl Default for OccupancyOptions {
    fn default() -> Self {
        Self {
            max_radius_km: 10.0,
            year_window: YearWindow::default(),
        }
    }
}

impl OccupancyOptions {
    /// # Errors
    ///
    /// Returns `OccupancyError` for a non-positive radius or an empty window.
    pub fn validate(self) -> Result<(), OccupancyError> {
        if !(self.max_radius_km.is_finite() && self.max_radius_km > 0.0) {
            return Err(OccupancyError::InvalidRadius(self.max_radius_km));
        }
        if self.year_window.min > self.year_window.max {
            return Err(OccupancyError::InvalidYearWindow {
                min: self.year_window.min,
                max: self.year_window.max,
            });
        }
        Ok(())
    }
}

/// Estimator branch selected for a neighbourhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingDesign {
    SimpleRandom,
    HorvitzThompson,
}

/// Spatial occupancy estimator over a fixed plot collection.
#[derive(Debug)]
pub struct SpatialOccupancyEstimator {
    plots: Vec<SurveyPlot>,
    distances: DistanceMatrix,
    /// Distance-matrix row of every plot record.
    rows: Vec<usize>,
    year_filters: DashMap<(i32, YearWindow), Arc<Vec<usize>>>,
}

impl SpatialOccupancyEstimator {
    /// # Errors
    ///
    /// Returns `OccupancyError::InvalidPlot` if any record fails validation.
    pub fn new(plots: Vec<SurveyPlot>) -> Result<Self, OccupancyError> {
        for plot in &plots {
            plot.validate()?;
        }
        let distances = DistanceMatrix::from_plots(&plots);
        let rows = plots
            .iter()
            .map(|plot| {
                distances
                    .index_of(&plot.subject_id)
                    .ok_or_else(|| OccupancyError::UnknownSubject {
                        subject_id: plot.subject_id.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            records = plots.len(),
            distinct_plots = distances.len(),
            "built occupancy distance matrix"
        );
        Ok(Self {
            plots,
            distances,
            rows,
            year_filters: DashMap::new(),
        })
    }

    #[must_use]
    pub fn plots(&self) -> &[SurveyPlot] {
        &self.plots
    }

    #[must_use]
    pub const fn distances(&self) -> &DistanceMatrix {
        &self.distances
    }

    /// Estimate `(mean, variance)` of the occupancy of `species` around `plot_id`.
    ///
    /// # Errors
    ///
    /// Returns `OccupancyError::UnknownSubject` for an unknown plot,
    /// `OccupancyError::InsufficientSample` when fewer than two distinct
    /// plots fall in the neighbourhood, or an options validation error.
    pub fn estimate(
        &self,
        plot_id: &str,
        year: i32,
        species: &str,
        options: OccupancyOptions,
    ) -> Result<GaussianEstimate, OccupancyError> {
        self.estimate_with_design(plot_id, year, species, options)
            .map(|(estimate, _)| estimate)
    }

    /// Same as [`Self::estimate`], also reporting which estimator ran.
    ///
    /// # Errors
    ///
    /// See [`Self::estimate`].
    pub fn estimate_with_design(
        &self,
        plot_id: &str,
        year: i32,
        species: &str,
        options: OccupancyOptions,
    ) -> Result<(GaussianEstimate, SamplingDesign), OccupancyError> {
        options.validate()?;
        let focal_area = self
            .distances
            .first_observation(plot_id)
            .map(|row| self.plots[row].area_ha)
            .ok_or_else(|| OccupancyError::UnknownSubject {
                subject_id: plot_id.to_owned(),
            })?;

        let neighbours = self.neighbourhood(plot_id, year, species, options)?;
        if neighbours.len() < 2 {
            warn!(
                plot_id,
                year,
                found = neighbours.len(),
                "occupancy neighbourhood too small"
            );
            return Err(OccupancyError::InsufficientSample {
                subject_id: plot_id.to_owned(),
                year,
                found: neighbours.len(),
            });
        }

        let presence: Vec<f64> = neighbours
            .iter()
            .map(|plot| if plot.has_species(species) { 1.0 } else { 0.0 })
            .collect();
        let weights: Vec<f64> = neighbours.iter().map(|plot| plot.weight).collect();

        let (estimate, design) = if equal_weights(&weights) {
            (simple_random_sample_mean(&presence), SamplingDesign::SimpleRandom)
        } else {
            let units = population_size(options.max_radius_km, focal_area);
            (
                horvitz_thompson_proportion(&presence, &weights, units),
                SamplingDesign::HorvitzThompson,
            )
        };
        let estimate = estimate.ok_or_else(|| OccupancyError::InsufficientSample {
            subject_id: plot_id.to_owned(),
            year,
            found: neighbours.len(),
        })?;
        trace!(
            plot_id,
            year,
            species,
            neighbours = neighbours.len(),
            ?design,
            mean = estimate.mean(),
            variance = estimate.variance(),
            "occupancy estimate"
        );
        Ok((estimate, design))
    }

    /// Plots in the neighbourhood of `plot_id`, one record per distinct plot.
    ///
    /// # Errors
    ///
    /// Returns `OccupancyError::UnknownSubject` if `plot_id` is unknown.
    pub fn neighbourhood(
        &self,
        plot_id: &str,
        year: i32,
        species: &str,
        options: OccupancyOptions,
    ) -> Result<Vec<&SurveyPlot>, OccupancyError> {
        let focal_row =
            self.distances
                .index_of(plot_id)
                .ok_or_else(|| OccupancyError::UnknownSubject {
                    subject_id: plot_id.to_owned(),
                })?;

        let in_window = self.year_filter(year, options.year_window);
        let mut selected: Vec<usize> = Vec::new();
        let mut position_by_row: Vec<Option<usize>> = vec![None; self.distances.len()];
        for &record in in_window.iter() {
            let row = self.rows[record];
            if self.distances.by_index(focal_row, row) >= options.max_radius_km {
                continue;
            }
            match position_by_row[row] {
                None => {
                    position_by_row[row] = Some(selected.len());
                    selected.push(record);
                }
                Some(position) => {
                    let kept = &self.plots[selected[position]];
                    if !kept.has_species(species) && self.plots[record].has_species(species) {
                        selected[position] = record;
                    }
                }
            }
        }
        Ok(selected.into_iter().map(|record| &self.plots[record]).collect())
    }

    fn year_filter(&self, year: i32, window: YearWindow) -> Arc<Vec<usize>> {
        if let Some(cached) = self.year_filters.get(&(year, window)) {
            return Arc::clone(cached.value());
        }
        let filtered = Arc::new(
            self.plots
                .iter()
                .enumerate()
                .filter(|(_, plot)| window.contains(year - plot.year))
                .map(|(record, _)| record)
                .collect::<Vec<_>>(),
        );
        Arc::clone(
            self.year_filters
                .entry((year, window))
                .or_insert(filtered)
                .value(),
        )
    }
}

fn equal_weights(weights: &[f64]) -> bool {
    let Some(first) = weights.first() else {
        return true;
    };
    weights
        .iter()
        .all(|weight| (weight - first).abs() <= EQUAL_WEIGHT_TOLERANCE * first.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SPECIES: &str = "ABIBAL";

    fn plot(id: &str, year: i32, lat: f64, present: bool) -> SurveyPlot {
        SurveyPlot::new(id, year, lat, -72.0).with_basal_area(SPECIES, if present { 2.0 } else { 0.0 })
    }

    fn options(radius: f64) -> OccupancyOptions {
        OccupancyOptions {
            max_radius_km: radius,
            year_window: YearWindow::default(),
        }
    }

    #[test]
    fn unknown_focal_plot_is_reported() {
        let estimator = SpatialOccupancyEstimator::new(vec![plot("A", 2000, 46.0, true)])
            .expect("valid plots");
        let err = estimator
            .estimate("Z", 2000, SPECIES, options(5.0))
            .expect_err("unknown plot");
        assert_eq!(
            err,
            OccupancyError::UnknownSubject {
                subject_id: "Z".to_owned()
            }
        );
    }

    #[test]
    fn window_and_radius_filter_the_neighbourhood() {
        let estimator = SpatialOccupancyEstimator::new(vec![
            plot("A", 2000, 46.00, true),
            plot("B", 1995, 46.01, false),
            // outside window: measured after the focal year
            plot("C", 2003, 46.01, true),
            // outside window: too old
            plot("D", 1985, 46.01, true),
            // outside radius (~111 km)
            plot("E", 2000, 47.00, true),
        ])
        .expect("valid plots");
        let ids: Vec<&str> = estimator
            .neighbourhood("A", 2000, SPECIES, options(5.0))
            .expect("known plot")
            .iter()
            .map(|plot| plot.subject_id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn remeasurement_showing_presence_is_kept() {
        let estimator = SpatialOccupancyEstimator::new(vec![
            plot("A", 2000, 46.00, false),
            plot("B", 1992, 46.01, false),
            plot("B", 1998, 46.01, true),
            plot("C", 1999, 46.02, false),
            plot("C", 1994, 46.02, true),
        ])
        .expect("valid plots");
        let neighbours = estimator
            .neighbourhood("A", 2000, SPECIES, options(10.0))
            .expect("known plot");
        assert_eq!(neighbours.len(), 3);
        assert!(neighbours[1].has_species(SPECIES));
        assert_eq!(neighbours[1].year, 1998);
        assert!(neighbours[2].has_species(SPECIES));
        assert_eq!(neighbours[2].year, 1994);
    }

    #[test]
    fn equal_weights_use_simple_random_sample() {
        let estimator = SpatialOccupancyEstimator::new(vec![
            plot("A", 2000, 46.00, true),
            plot("B", 2000, 46.01, false),
            plot("C", 2000, 46.02, false),
            plot("D", 2000, 46.03, false),
        ])
        .expect("valid plots");
        let (estimate, design) = estimator
            .estimate_with_design("A", 2000, SPECIES, options(10.0))
            .expect("four plots");
        assert_eq!(design, SamplingDesign::SimpleRandom);
        assert_relative_eq!(estimate.mean(), 0.25);
        assert_relative_eq!(estimate.variance(), 0.0625);
    }

    #[test]
    fn unequal_weights_use_horvitz_thompson() {
        let estimator = SpatialOccupancyEstimator::new(vec![
            plot("A", 2000, 46.00, true).with_weight(1.0),
            plot("B", 2000, 46.01, false).with_weight(1.0),
            plot("C", 2000, 46.02, true).with_weight(2.0),
            plot("D", 2000, 46.03, false).with_weight(2.0),
        ])
        .expect("valid plots");
        let (estimate, design) = estimator
            .estimate_with_design("A", 2000, SPECIES, options(10.0))
            .expect("four plots");
        assert_eq!(design, SamplingDesign::HorvitzThompson);
        assert_relative_eq!(estimate.mean(), 0.5, epsilon = 1.0e-12);
        assert_relative_eq!(estimate.variance(), 0.101_851_851_851_851_85, epsilon = 1.0e-12);
    }

    #[test]
    fn single_plot_neighbourhood_is_insufficient() {
        let estimator = SpatialOccupancyEstimator::new(vec![
            plot("A", 2000, 46.0, true),
            plot("B", 2000, 48.0, true),
        ])
        .expect("valid plots");
        let err = estimator
            .estimate("A", 2000, SPECIES, options(5.0))
            .expect_err("only the focal plot is near");
        assert!(matches!(err, OccupancyError::InsufficientSample { found: 1, .. }));
    }

    #[test]
    fn repeated_estimates_are_bit_identical() {
        let estimator = SpatialOccupancyEstimator::new(vec![
            plot("A", 2000, 46.00, true).with_weight(1.5),
            plot("B", 1996, 46.01, false),
            plot("C", 1999, 46.02, true).with_weight(0.7),
        ])
        .expect("valid plots");
        let first = estimator.estimate("A", 2000, SPECIES, options(10.0)).expect("ok");
        let second = estimator.estimate("A", 2000, SPECIES, options(10.0)).expect("ok");
        assert_eq!(first.mean().to_bits(), second.mean().to_bits());
        assert_eq!(first.variance().to_bits(), second.variance().to_bits());
    }

    #[test]
    fn invalid_options_and_plots_are_rejected() {
        let estimator =
            SpatialOccupancyEstimator::new(vec![plot("A", 2000, 46.0, true)]).expect("valid");
        let err = estimator
            .estimate("A", 2000, SPECIES, options(0.0))
            .expect_err("zero radius");
        assert_eq!(err, OccupancyError::InvalidRadius(0.0));

        let err = SpatialOccupancyEstimator::new(vec![plot("A", 2000, 46.0, true).with_weight(-1.0)])
            .expect_err("negative weight");
        assert!(matches!(err, OccupancyError::InvalidPlot(_)));
    }
}

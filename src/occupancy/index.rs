//! Cached occupancy covariate shared by the predictors of one species.

use std::sync::Arc;

use tracing::debug;

use super::{OccupancyError, OccupancyOptions, SpatialOccupancyEstimator};
use crate::cache::{RealizationCache, RealizationKey};
use crate::parameters::GaussianEstimate;
use crate::utils::DrawSeed;

/// Occupancy covariate for one species and neighbourhood definition.
///
/// Estimates are cached per (plot, realization, year) and stochastic
/// deviates per (subject, realization, year). Each deviate is drawn from a
/// source seeded by its own key, so it is the same whatever order subjects
/// are predicted in. Predictors that must agree
/// on the deviate (e.g. recruitment probability and recruitment count)
/// share one instance through `Arc`.
#[derive(Debug)]
pub struct OccupancyIndex {
    estimator: Arc<SpatialOccupancyEstimator>,
    species: String,
    options: OccupancyOptions,
    estimates: RealizationCache<RealizationKey, GaussianEstimate>,
    deviates: RealizationCache<RealizationKey, f64>,
    seed: u64,
}

impl OccupancyIndex {
    /// # Errors
    ///
    /// Returns `OccupancyError` if `options` are invalid.
    pub fn new(
        estimator: Arc<SpatialOccupancyEstimator>,
        species: impl Into<String>,
        options: OccupancyOptions,
        seed: u64,
    ) -> Result<Self, OccupancyError> {
        options.validate()?;
        Ok(Self {
            estimator,
            species: species.into(),
            options,
            estimates: RealizationCache::new(),
            deviates: RealizationCache::new(),
            seed,
        })
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn species(&self) -> &str {
        &self.species
    }

    #[must_use]
    pub const fn options(&self) -> OccupancyOptions {
        self.options
    }

    #[must_use]
    pub fn estimator(&self) -> &SpatialOccupancyEstimator {
        &self.estimator
    }

    /// Occupancy estimate for `plot_id`, computed on first request.
    ///
    /// # Errors
    ///
    /// Propagates estimator failures; failures are not cached.
    pub fn estimate(
        &self,
        plot_id: &str,
        realization_id: usize,
        year: i32,
    ) -> Result<GaussianEstimate, OccupancyError> {
        let key = RealizationKey::new(plot_id, realization_id).with_year(year);
        self.estimates.get_or_try_compute(&key, || {
            debug!(plot_id, realization_id, year, species = %self.species, "computing occupancy estimate");
            self.estimator
                .estimate(plot_id, year, &self.species, self.options)
        })
    }

    /// Gaussian deviate from the plot's occupancy estimate, drawn once per
    /// (subject, realization, year) and reused afterwards.
    ///
    /// # Errors
    ///
    /// Propagates estimator failures.
    pub fn deviate(
        &self,
        subject_id: &str,
        plot_id: &str,
        realization_id: usize,
        year: i32,
    ) -> Result<f64, OccupancyError> {
        let key = RealizationKey::new(subject_id, realization_id).with_year(year);
        self.deviates.get_or_try_compute(&key, || {
            let estimate = self.estimate(plot_id, realization_id, year)?;
            let mut rng = DrawSeed::new(self.seed, "occupancy")
                .with_str(&self.species)
                .with_str(subject_id)
                .with_index(realization_id)
                .with_year(year)
                .rng();
            Ok(estimate.draw(&mut rng))
        })
    }

    /// Number of cached estimates.
    #[must_use]
    pub fn cached_estimates(&self) -> usize {
        self.estimates.len()
    }

    /// Number of cached deviates.
    #[must_use]
    pub fn cached_deviates(&self) -> usize {
        self.deviates.len()
    }
}

//! # Model inputs
//!
//! Survey plot records consumed by the occupancy estimator, and the
//! attribute-provider trait every predicted subject implements.
//!
//! # Examples
//!
//! ```
//! use stand_predictors::SurveyPlot;
//!
//! let plot = SurveyPlot::new("P-001", 2004, 46.8, -71.2)
//!     .with_weight(1.0)
//!     .with_area_ha(0.04)
//!     .with_basal_area("ABIBAL", 3.2);
//!
//! assert!(plot.validate().is_ok());
//! assert!(plot.has_species("ABIBAL"));
//! assert!(!plot.has_species("PICMAR"));
//! ```
//!
//! ```
//! use stand_predictors::SurveyPlot;
//!
//! let plot = SurveyPlot::new("P-002", 2004, 123.0, -71.2);
//! assert!(plot.validate().is_err());
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors returned when validating plot records.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    #[error("plot subject id must not be empty")]
    EmptySubjectId,
    #[error("plot `{subject_id}` has latitude {value} outside [-90, 90]")]
    InvalidLatitude { subject_id: String, value: f64 },
    #[error("plot `{subject_id}` has longitude {value} outside [-180, 180]")]
    InvalidLongitude { subject_id: String, value: f64 },
    #[error("plot `{subject_id}` must have a finite, strictly positive sampling weight")]
    NonPositiveWeight { subject_id: String },
    #[error("plot `{subject_id}` must have a finite, strictly positive area")]
    NonPositiveArea { subject_id: String },
    #[error("plot `{subject_id}` has invalid basal area {value} for species `{species}`")]
    InvalidBasalArea {
        subject_id: String,
        species: String,
        value: f64,
    },
}

/// One measurement of a permanent or temporary sample plot.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyPlot {
    pub subject_id: String,
    pub year: i32,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Design (expansion) weight of the plot.
    pub weight: f64,
    pub area_ha: f64,
    /// Basal area (m2/ha) by species code.
    pub basal_area: BTreeMap<String, f64>,
}

impl SurveyPlot {
    /// Plot with unit weight, 0.04 ha area and no recorded species.
    #[must_use]
    pub fn new(
        subject_id: impl Into<String>,
        year: i32,
        latitude_deg: f64,
        longitude_deg: f64,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            year,
            latitude_deg,
            longitude_deg,
            weight: 1.0,
            area_ha: 0.04,
            basal_area: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub const fn with_area_ha(mut self, area_ha: f64) -> Self {
        self.area_ha = area_ha;
        self
    }

    #[must_use]
    pub fn with_basal_area(mut self, species: impl Into<String>, basal_area: f64) -> Self {
        self.basal_area.insert(species.into(), basal_area);
        self
    }

    /// Conspecific presence: a strictly positive basal area for `species`.
    #[must_use]
    pub fn has_species(&self, species: &str) -> bool {
        self.basal_area.get(species).is_some_and(|value| *value > 0.0)
    }

    /// # Errors
    ///
    /// Returns `InputError` if the record cannot be used by the estimator.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.subject_id.is_empty() {
            return Err(InputError::EmptySubjectId);
        }
        if !(self.latitude_deg.is_finite() && (-90.0..=90.0).contains(&self.latitude_deg)) {
            return Err(InputError::InvalidLatitude {
                subject_id: self.subject_id.clone(),
                value: self.latitude_deg,
            });
        }
        if !(self.longitude_deg.is_finite() && (-180.0..=180.0).contains(&self.longitude_deg)) {
            return Err(InputError::InvalidLongitude {
                subject_id: self.subject_id.clone(),
                value: self.longitude_deg,
            });
        }
        if !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(InputError::NonPositiveWeight {
                subject_id: self.subject_id.clone(),
            });
        }
        if !(self.area_ha.is_finite() && self.area_ha > 0.0) {
            return Err(InputError::NonPositiveArea {
                subject_id: self.subject_id.clone(),
            });
        }
        if let Some((species, value)) = self
            .basal_area
            .iter()
            .find(|(_, value)| !(value.is_finite() && **value >= 0.0))
        {
            return Err(InputError::InvalidBasalArea {
                subject_id: self.subject_id.clone(),
                species: species.clone(),
                value: *value,
            });
        }
        Ok(())
    }
}

/// Attribute provider for a predicted plot or tree.
///
/// Only identity and the few attributes the engine itself needs are
/// exposed here; model covariates are read by the effect-vector builder.
pub trait PredictionSubject {
    /// Stable id used as the cache key for every stochastic quantity.
    fn subject_id(&self) -> &str;

    /// Monte Carlo realization; `0` in deterministic runs.
    fn realization_id(&self) -> usize {
        0
    }

    /// Plot whose neighbourhood defines the occupancy covariate.
    fn plot_id(&self) -> &str {
        self.subject_id()
    }

    /// Observation year.
    fn year(&self) -> i32;

    /// Occupancy supplied directly instead of estimated (test doubles).
    fn known_occupancy(&self) -> Option<f64> {
        None
    }

    /// Growth step length in years, used by log step-length offsets.
    fn step_length_years(&self) -> Option<f64> {
        None
    }

    /// Id of the enclosing unit at a random-effect level (e.g. `"plot"`).
    fn level_id(&self, _level: &str) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_plot() -> SurveyPlot {
        SurveyPlot::new("P1", 2000, 47.0, -72.0).with_basal_area("BOJ", 1.5)
    }

    #[test]
    fn validate_accepts_well_formed_plot() {
        assert!(valid_plot().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_id() {
        let mut plot = valid_plot();
        plot.subject_id.clear();
        assert_eq!(plot.validate(), Err(InputError::EmptySubjectId));
    }

    #[test]
    fn validate_rejects_out_of_range_longitude() {
        let plot = SurveyPlot::new("P1", 2000, 47.0, -272.0);
        assert!(matches!(
            plot.validate(),
            Err(InputError::InvalidLongitude { .. })
        ));
    }

    #[test]
    fn validate_rejects_non_positive_weight_and_area() {
        let plot = valid_plot().with_weight(0.0);
        assert!(matches!(
            plot.validate(),
            Err(InputError::NonPositiveWeight { .. })
        ));
        let plot = valid_plot().with_area_ha(f64::NAN);
        assert!(matches!(
            plot.validate(),
            Err(InputError::NonPositiveArea { .. })
        ));
    }

    #[test]
    fn validate_rejects_negative_basal_area() {
        let plot = valid_plot().with_basal_area("SAB", -0.1);
        let err = plot.validate().expect_err("negative basal area should fail");
        assert!(matches!(err, InputError::InvalidBasalArea { ref species, .. } if species == "SAB"));
    }

    #[test]
    fn presence_requires_positive_basal_area() {
        let plot = valid_plot().with_basal_area("SAB", 0.0);
        assert!(plot.has_species("BOJ"));
        assert!(!plot.has_species("SAB"));
        assert!(!plot.has_species("ERS"));
    }
}

//! Core public types for predictor models.

use thiserror::Error;

use super::link::LinkFunction;
use crate::inference::ConfigError;
use crate::occupancy::OccupancyError;
use crate::parameters::{GaussianParameterModel, NumericalError, ParameterError, RandomEffectLevel};
use crate::quadrature::QuadratureError;

/// Errors returned by model construction and prediction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictionError {
    #[error(transparent)]
    Numerical(#[from] NumericalError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    Occupancy(#[from] OccupancyError),
    #[error(transparent)]
    Quadrature(#[from] QuadratureError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("effect id {effect_id} has no covariate extractor")]
    UnknownEffect { effect_id: u32 },
    #[error("model `{model}` declares {effects} effects but has {coefficients} coefficients")]
    CoefficientMismatch {
        model: String,
        effects: usize,
        coefficients: usize,
    },
    #[error("design vector has {found} slots; expected {expected}")]
    DesignLengthMismatch { expected: usize, found: usize },
    #[error("occupancy term references effect id {effect_id}, which model `{model}` does not list")]
    OccupancyEffectMissing { model: String, effect_id: u32 },
    #[error("model `{model}` needs an occupancy index to resolve its occupancy terms")]
    MissingOccupancyIndex { model: String },
    #[error("subject `{subject_id}` has no id at random-effect level `{level}`")]
    MissingLevelId {
        subject_id: String,
        level: &'static str,
    },
    #[error("subject `{subject_id}` needs a finite, positive step length for the offset")]
    InvalidStepLength { subject_id: String },
    #[error("link function `{0:?}` has invalid residual parameters")]
    InvalidLink(LinkFunction),
}

impl PredictionError {
    /// Whether the failure is an undersized occupancy neighbourhood, which
    /// batch callers are expected to handle per subject.
    #[must_use]
    pub const fn is_insufficient_sample(&self) -> bool {
        matches!(
            self,
            Self::Occupancy(OccupancyError::InsufficientSample { .. })
        )
    }
}

/// How the occupancy covariate enters a design slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupancyTransform {
    Linear,
    Squared,
    /// Product with the value of another, non-occupancy, effect.
    InteractionWith(u32),
}

/// A design slot owned by the occupancy covariate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupancyTerm {
    pub effect_id: u32,
    pub transform: OccupancyTransform,
}

impl OccupancyTerm {
    #[must_use]
    pub const fn linear(effect_id: u32) -> Self {
        Self {
            effect_id,
            transform: OccupancyTransform::Linear,
        }
    }

    #[must_use]
    pub const fn squared(effect_id: u32) -> Self {
        Self {
            effect_id,
            transform: OccupancyTransform::Squared,
        }
    }

    #[must_use]
    pub const fn interaction(effect_id: u32, with_effect: u32) -> Self {
        Self {
            effect_id,
            transform: OccupancyTransform::InteractionWith(with_effect),
        }
    }
}

/// Offset added to the linear predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetTerm {
    #[default]
    None,
    /// `ln(step length in years)`.
    LogStepLength,
}

/// A fitted linear predictor: ordered effects, coefficients, random
/// effects, link, offset, and the slots owned by the occupancy covariate.
#[derive(Debug, Clone)]
pub struct PredictorModel {
    pub name: String,
    pub effect_ids: Vec<u32>,
    pub fixed_effects: GaussianParameterModel,
    pub random_effects: Vec<RandomEffectLevel>,
    pub link: LinkFunction,
    pub offset: OffsetTerm,
    pub occupancy_terms: Vec<OccupancyTerm>,
}

impl PredictorModel {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        effect_ids: Vec<u32>,
        fixed_effects: GaussianParameterModel,
        link: LinkFunction,
    ) -> Self {
        Self {
            name: name.into(),
            effect_ids,
            fixed_effects,
            random_effects: Vec::new(),
            link,
            offset: OffsetTerm::None,
            occupancy_terms: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_random_effect(mut self, level: RandomEffectLevel) -> Self {
        self.random_effects.push(level);
        self
    }

    #[must_use]
    pub const fn with_offset(mut self, offset: OffsetTerm) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn with_occupancy_term(mut self, term: OccupancyTerm) -> Self {
        self.occupancy_terms.push(term);
        self
    }

    /// Position of `effect_id` in the design vector.
    #[must_use]
    pub fn slot_of(&self, effect_id: u32) -> Option<usize> {
        self.effect_ids.iter().position(|id| *id == effect_id)
    }

    /// # Errors
    ///
    /// Returns `PredictionError` if coefficients and effects disagree, an
    /// occupancy term points at a missing effect (or interacts with another
    /// occupancy slot), or the link parameters are invalid.
    pub fn validate(&self) -> Result<(), PredictionError> {
        if self.fixed_effects.dimension() != self.effect_ids.len() {
            return Err(PredictionError::CoefficientMismatch {
                model: self.name.clone(),
                effects: self.effect_ids.len(),
                coefficients: self.fixed_effects.dimension(),
            });
        }
        if !self.link.is_valid() {
            return Err(PredictionError::InvalidLink(self.link));
        }
        for term in &self.occupancy_terms {
            let missing = |effect_id| PredictionError::OccupancyEffectMissing {
                model: self.name.clone(),
                effect_id,
            };
            self.slot_of(term.effect_id).ok_or_else(|| missing(term.effect_id))?;
            if let OccupancyTransform::InteractionWith(partner) = term.transform {
                self.slot_of(partner).ok_or_else(|| missing(partner))?;
                if self.occupancy_terms.iter().any(|other| other.effect_id == partner) {
                    return Err(missing(partner));
                }
            }
        }
        Ok(())
    }
}

/// Outcome of one prediction call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Probability, count, or increment on the response scale.
    pub value: f64,
    /// Occupancy value substituted in the design, when one was used.
    pub occupancy: Option<f64>,
    /// Whether the occupancy covariate was integrated out by quadrature.
    pub marginalized: bool,
}

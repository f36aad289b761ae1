//! Per-call prediction pipeline: build the design vector, resolve the
//! occupancy covariate, then apply the link and residual.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use faer::Mat;
use rayon::prelude::*;
use tracing::{debug, trace};

use super::effects::EffectVectorBuilder;
use super::link::{COUNT_SHIFT, LinkFunction, Marginalization};
use super::types::{OccupancyTransform, OffsetTerm, Prediction, PredictionError, PredictorModel};
use crate::cache::{RealizationCache, RealizationKey};
use crate::inference::SimulationConfig;
use crate::input::PredictionSubject;
use crate::occupancy::OccupancyIndex;
use crate::parameters::GaussianEstimate;
use crate::quadrature::{DensityWeight, QuadratureIntegrator};
use crate::utils::{DrawSeed, dot_column, sample_negative_binomial, sample_standard_normal};

#[derive(Debug, Clone, Copy)]
enum SlotValue {
    Linear,
    Squared,
    Product(usize),
}

#[derive(Debug, Clone, Copy)]
struct OccupancySlot {
    slot: usize,
    value: SlotValue,
}

enum Covariate {
    Absent,
    Value(f64),
    Marginal(GaussianEstimate),
}

/// Prediction engine for one fitted model.
///
/// Owns every piece of mutable state the model needs: cached coefficient
/// draws per realization and cached random intercepts per level. The
/// occupancy index is the only state that may be shared with other engines.
///
/// Every draw comes from a source seeded by `config.seed`, the model name and
/// the draw's own key, so a seeded simulation gives the same values however
/// its predictions are ordered or spread across threads.
pub struct PredictionEngine<S: ?Sized, B> {
    model: PredictorModel,
    builder: B,
    config: SimulationConfig,
    integrator: QuadratureIntegrator,
    occupancy: Option<Arc<OccupancyIndex>>,
    occupancy_slots: Vec<OccupancySlot>,
    reserved: Vec<usize>,
    mean_coefficients: Arc<Mat<f64>>,
    coefficient_draws: RealizationCache<usize, Arc<Mat<f64>>>,
    random_effect_draws: Vec<RealizationCache<RealizationKey, f64>>,
    subject: PhantomData<fn(&S)>,
}

impl<S: ?Sized, B> fmt::Debug for PredictionEngine<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictionEngine")
            .field("model", &self.model.name)
            .field("link", &self.model.link)
            .field("config", &self.config)
            .field("occupancy_slots", &self.occupancy_slots)
            .field("has_occupancy_index", &self.occupancy.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, B> PredictionEngine<S, B>
where
    S: PredictionSubject + ?Sized,
    B: EffectVectorBuilder<S>,
{
    /// # Errors
    ///
    /// Returns `PredictionError` if the configuration or model is invalid,
    /// or if `builder` cannot produce a covariate for one of the model's
    /// non-occupancy effects.
    pub fn new(
        model: PredictorModel,
        builder: B,
        config: SimulationConfig,
    ) -> Result<Self, PredictionError> {
        config.validate()?;
        model.validate()?;
        let integrator = config.quadrature.build()?;

        let mut occupancy_slots = Vec::with_capacity(model.occupancy_terms.len());
        for term in &model.occupancy_terms {
            let missing = |effect_id| PredictionError::OccupancyEffectMissing {
                model: model.name.clone(),
                effect_id,
            };
            let slot = model
                .slot_of(term.effect_id)
                .ok_or_else(|| missing(term.effect_id))?;
            let value = match term.transform {
                OccupancyTransform::Linear => SlotValue::Linear,
                OccupancyTransform::Squared => SlotValue::Squared,
                OccupancyTransform::InteractionWith(partner) => {
                    SlotValue::Product(model.slot_of(partner).ok_or_else(|| missing(partner))?)
                }
            };
            occupancy_slots.push(OccupancySlot { slot, value });
        }
        let reserved: Vec<usize> = occupancy_slots.iter().map(|term| term.slot).collect();

        if let Some(effect_id) = model
            .effect_ids
            .iter()
            .enumerate()
            .filter(|(slot, _)| !reserved.contains(slot))
            .map(|(_, effect_id)| *effect_id)
            .find(|effect_id| !builder.supports(*effect_id))
        {
            return Err(PredictionError::UnknownEffect { effect_id });
        }

        debug!(
            model = %model.name,
            effects = model.effect_ids.len(),
            occupancy_slots = occupancy_slots.len(),
            random_effect_levels = model.random_effects.len(),
            seed = config.seed,
            "prediction engine ready"
        );

        let mean_coefficients = Arc::new(model.fixed_effects.mean().clone());
        let random_effect_draws = model
            .random_effects
            .iter()
            .map(|_| RealizationCache::new())
            .collect();
        Ok(Self {
            builder,
            integrator,
            occupancy: None,
            occupancy_slots,
            reserved,
            mean_coefficients,
            coefficient_draws: RealizationCache::new(),
            random_effect_draws,
            config,
            model,
            subject: PhantomData,
        })
    }

    /// Attach the occupancy covariate, possibly shared with other engines.
    #[must_use]
    pub fn with_occupancy_index(mut self, index: Arc<OccupancyIndex>) -> Self {
        self.occupancy = Some(index);
        self
    }

    #[must_use]
    pub const fn model(&self) -> &PredictorModel {
        &self.model
    }

    #[must_use]
    pub const fn config(&self) -> SimulationConfig {
        self.config
    }

    #[must_use]
    pub const fn builder(&self) -> &B {
        &self.builder
    }

    #[must_use]
    pub fn occupancy_index(&self) -> Option<&Arc<OccupancyIndex>> {
        self.occupancy.as_ref()
    }

    /// Number of realizations holding a cached coefficient draw.
    #[must_use]
    pub fn cached_coefficient_draws(&self) -> usize {
        self.coefficient_draws.len()
    }

    /// Predict the outcome for one subject.
    ///
    /// # Errors
    ///
    /// Returns `PredictionError` when the design cannot be built, a draw
    /// fails numerically, or the occupancy covariate cannot be estimated.
    /// Use [`PredictionError::is_insufficient_sample`] to detect the
    /// recoverable neighbourhood failure.
    pub fn predict(&self, subject: &S) -> Result<Prediction, PredictionError> {
        let mut design = vec![0.0; self.model.effect_ids.len()];
        self.builder
            .fill(&self.model.effect_ids, subject, &mut design, &self.reserved)?;

        let coefficients = self.coefficients(subject.realization_id())?;
        let shift = self.offset(subject)? + self.random_intercepts(subject)?;

        let (mean, occupancy, marginalized) = match self.resolve_covariate(subject)? {
            Covariate::Absent => (self.response(&design, &coefficients, shift), None, false),
            Covariate::Value(value) => {
                self.fill_occupancy(&mut design, value);
                (
                    self.response(&design, &coefficients, shift),
                    Some(value),
                    false,
                )
            }
            Covariate::Marginal(estimate) => (
                self.marginalize(&design, &coefficients, shift, estimate)?,
                None,
                true,
            ),
        };
        let value = self.apply_residual(subject, mean);
        trace!(
            model = %self.model.name,
            subject_id = subject.subject_id(),
            realization_id = subject.realization_id(),
            value,
            marginalized,
            "prediction"
        );
        Ok(Prediction {
            value,
            occupancy,
            marginalized,
        })
    }

    /// Predict many independent subjects in parallel, one result per subject.
    pub fn predict_batch(&self, subjects: &[S]) -> Vec<Result<Prediction, PredictionError>>
    where
        S: Sized + Sync,
        B: Sync,
    {
        subjects
            .par_iter()
            .map(|subject| self.predict(subject))
            .collect()
    }

    fn coefficients(&self, realization_id: usize) -> Result<Arc<Mat<f64>>, PredictionError> {
        if !self.config.variability.parameters {
            return Ok(Arc::clone(&self.mean_coefficients));
        }
        let draw = self
            .coefficient_draws
            .get_or_try_compute(&realization_id, || {
                let mut rng = self.draw_seed("coefficients").with_index(realization_id).rng();
                self.model
                    .fixed_effects
                    .draw_realization(true, &mut rng)
                    .map(Arc::new)
            })?;
        Ok(draw)
    }

    fn random_intercepts(&self, subject: &S) -> Result<f64, PredictionError> {
        if !self.config.variability.random_effects {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for (level, draws) in self.model.random_effects.iter().zip(&self.random_effect_draws) {
            if !level.is_active() {
                continue;
            }
            let level_id =
                subject
                    .level_id(level.name())
                    .ok_or_else(|| PredictionError::MissingLevelId {
                        subject_id: subject.subject_id().to_owned(),
                        level: level.name(),
                    })?;
            let key = RealizationKey::new(level_id, subject.realization_id());
            total += draws.get_or_try_compute(&key, || {
                let mut rng = self
                    .draw_seed("random effect")
                    .with_str(level.name())
                    .with_str(level_id)
                    .with_index(subject.realization_id())
                    .rng();
                level
                    .model()
                    .draw_realization(true, &mut rng)
                    .map(|draw| draw[(0, 0)])
            })?;
        }
        Ok(total)
    }

    fn offset(&self, subject: &S) -> Result<f64, PredictionError> {
        match self.model.offset {
            OffsetTerm::None => Ok(0.0),
            OffsetTerm::LogStepLength => subject
                .step_length_years()
                .filter(|years| years.is_finite() && *years > 0.0)
                .map(f64::ln)
                .ok_or_else(|| PredictionError::InvalidStepLength {
                    subject_id: subject.subject_id().to_owned(),
                }),
        }
    }

    fn resolve_covariate(&self, subject: &S) -> Result<Covariate, PredictionError> {
        if self.occupancy_slots.is_empty() {
            return Ok(Covariate::Absent);
        }
        if let Some(value) = subject.known_occupancy() {
            return Ok(Covariate::Value(value));
        }
        let index = self
            .occupancy
            .as_deref()
            .ok_or_else(|| PredictionError::MissingOccupancyIndex {
                model: self.model.name.clone(),
            })?;
        let (plot_id, realization_id, year) =
            (subject.plot_id(), subject.realization_id(), subject.year());
        if self.config.variability.random_effects {
            let value = index.deviate(subject.subject_id(), plot_id, realization_id, year)?;
            Ok(Covariate::Value(value))
        } else {
            let estimate = index.estimate(plot_id, realization_id, year)?;
            Ok(Covariate::Marginal(estimate))
        }
    }

    fn fill_occupancy(&self, design: &mut [f64], value: f64) {
        for term in &self.occupancy_slots {
            design[term.slot] = match term.value {
                SlotValue::Linear => value,
                SlotValue::Squared => value * value,
                SlotValue::Product(partner) => value * design[partner],
            };
        }
    }

    fn response(&self, design: &[f64], coefficients: &Mat<f64>, shift: f64) -> f64 {
        self.model
            .link
            .inverse(dot_column(design, coefficients) + shift)
    }

    fn marginalize(
        &self,
        design: &[f64],
        coefficients: &Mat<f64>,
        shift: f64,
        estimate: GaussianEstimate,
    ) -> Result<f64, PredictionError> {
        let Some(primary) = self.occupancy_slots.first().map(|term| term.slot) else {
            return Ok(self.response(design, coefficients, shift));
        };
        let integrand = |row: &[f64]| {
            let mut row = row.to_vec();
            let value = row[primary];
            self.fill_occupancy(&mut row, value);
            self.response(&row, coefficients, shift)
        };
        let value = match self.model.link.marginalization() {
            Marginalization::GaussHermite => self.integrator.gauss_hermite(
                integrand,
                design,
                primary,
                estimate,
                DensityWeight::Applied,
            )?,
            Marginalization::GaussLegendre => self.integrator.gauss_legendre(
                integrand,
                design,
                primary,
                estimate,
                DensityWeight::Applied,
            )?,
        };
        Ok(value)
    }

    fn draw_seed(&self, quantity: &str) -> DrawSeed {
        DrawSeed::new(self.config.seed, quantity).with_str(&self.model.name)
    }

    /// Residual source for one (subject, realization, year).
    fn residual_seed(&self, subject: &S) -> DrawSeed {
        self.draw_seed("residual")
            .with_str(subject.subject_id())
            .with_index(subject.realization_id())
            .with_year(subject.year())
    }

    fn apply_residual(&self, subject: &S, mean: f64) -> f64 {
        let residual = self.config.variability.residual;
        match self.model.link {
            LinkFunction::ComplementaryLogLog => mean,
            LinkFunction::LogNegativeBinomial { dispersion } => {
                let count = if residual {
                    let mut rng = self.residual_seed(subject).rng();
                    sample_negative_binomial(&mut rng, mean, dispersion)
                } else {
                    mean
                };
                count + COUNT_SHIFT
            }
            LinkFunction::Identity { residual_variance } => {
                if residual && residual_variance > 0.0 {
                    let noise = sample_standard_normal(&mut self.residual_seed(subject).rng());
                    residual_variance.sqrt().mul_add(noise, mean)
                } else {
                    mean
                }
            }
        }
    }
}

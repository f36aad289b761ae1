#![forbid(unsafe_code)]

//! # `stand_predictors`
//!
//! Stochastic prediction engine shared by forest-stand growth, mortality
//! and recruitment predictors.
//!
//! A predictor maps plot- and tree-level covariates to a probability, a
//! count, or an increment through a fitted linear predictor. It runs either
//! in deterministic mode (marginal mean, with the local occupancy covariate
//! integrated out by quadrature) or in stochastic mode, where coefficient
//! vectors, random effects, the occupancy deviate and residuals are drawn
//! once per (subject, realization) and cached for the rest of the run.
//!
//! Effect tables, parameter files and species lookups live outside this
//! crate; they plug in through [`EffectVectorBuilder`] and
//! [`GaussianParameterModel`].

pub mod cache;
pub mod inference;
pub mod input;
pub mod models;
pub mod occupancy;
pub mod parameters;
pub mod quadrature;
pub mod utils;

pub use cache::{RealizationCache, RealizationKey};
pub use inference::{ConfigError, QuadratureOptions, SimulationConfig, VariabilityConfig};
pub use input::{InputError, PredictionSubject, SurveyPlot};
pub use models::{
    COUNT_SHIFT, EffectRegistry, EffectVectorBuilder, LinkFunction, Marginalization,
    OccupancyTerm, OccupancyTransform, OffsetTerm, Prediction, PredictionEngine,
    PredictionError, PredictorModel, cloglog_inverse,
};
pub use occupancy::{
    DistanceMatrix, EARTH_RADIUS_KM, OccupancyError, OccupancyIndex, OccupancyOptions,
    SamplingDesign, SpatialOccupancyEstimator, YearWindow, haversine_km,
};
pub use parameters::{
    GaussianEstimate, GaussianParameterModel, NumericalError, ParameterError, RandomEffectLevel,
};
pub use quadrature::{DensityWeight, QuadratureError, QuadratureIntegrator, QuadratureRule};

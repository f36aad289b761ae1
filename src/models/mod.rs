//! # Models
//!
//! Fitted linear predictors and the engine that evaluates them in
//! deterministic (marginal mean) or stochastic (Monte Carlo) mode.

pub mod effects;
pub mod engine;
pub mod link;
pub mod types;

pub use effects::{EffectRegistry, EffectVectorBuilder};
pub use engine::PredictionEngine;
pub use link::{COUNT_SHIFT, LinkFunction, Marginalization, cloglog_inverse};
pub use types::{
    OccupancyTerm, OccupancyTransform, OffsetTerm, Prediction, PredictionError, PredictorModel,
};

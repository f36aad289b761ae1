//! Simulation settings shared by every predictor.

use thiserror::Error;

use crate::quadrature::{QuadratureError, QuadratureIntegrator};

/// Errors for simulation configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("quadrature orders must be positive")]
    InvalidQuadratureOrder,
    #[error("Gauss-Legendre span must be a finite, positive number of standard deviations")]
    InvalidLegendreSpan,
}

/// Which sources of uncertainty are simulated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariabilityConfig {
    /// Draw fixed-effect coefficients from their sampling distribution.
    pub parameters: bool,
    /// Draw random effects and the occupancy covariate.
    pub random_effects: bool,
    /// Draw residual errors (counts, increments).
    pub residual: bool,
}

impl VariabilityConfig {
    /// Marginal-mean predictions only.
    #[must_use]
    pub const fn deterministic() -> Self {
        Self {
            parameters: false,
            random_effects: false,
            residual: false,
        }
    }

    /// Every source of uncertainty enabled.
    #[must_use]
    pub const fn fully_stochastic() -> Self {
        Self {
            parameters: true,
            random_effects: true,
            residual: true,
        }
    }

    #[must_use]
    pub const fn is_deterministic(self) -> bool {
        !(self.parameters || self.random_effects || self.residual)
    }
}

/// Quadrature orders used to marginalize the occupancy covariate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadratureOptions {
    pub hermite_order: usize,
    pub legendre_order: usize,
    /// Half-width of the Gauss-Legendre interval, in standard deviations.
    pub legendre_span_sd: f64,
}

impl Default for QuadratureOptions {
    fn default() -> Self {
        Self {
            hermite_order: 5,
            legendre_order: 10,
            legendre_span_sd: 3.0,
        }
    }
}

impl QuadratureOptions {
    /// # Errors
    ///
    /// Returns `ConfigError` for zero orders or an invalid span.
    pub fn validate(self) -> Result<(), ConfigError> {
        if self.hermite_order == 0 || self.legendre_order == 0 {
            return Err(ConfigError::InvalidQuadratureOrder);
        }
        if !(self.legendre_span_sd.is_finite() && self.legendre_span_sd > 0.0) {
            return Err(ConfigError::InvalidLegendreSpan);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `QuadratureError` if the rules cannot be built.
    pub fn build(self) -> Result<QuadratureIntegrator, QuadratureError> {
        QuadratureIntegrator::new(self.hermite_order, self.legendre_order, self.legendre_span_sd)
    }
}

/// Engine-level configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    /// Seed of the engine's random source.
    pub seed: u64,
    pub variability: VariabilityConfig,
    pub quadrature: QuadratureOptions,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            variability: VariabilityConfig::deterministic(),
            quadrature: QuadratureOptions::default(),
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns `ConfigError` if quadrature settings are invalid.
    pub fn validate(self) -> Result<(), ConfigError> {
        self.quadrature.validate()
    }
}

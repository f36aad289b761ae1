/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Gauss-Hermite and Gauss-Legendre quadrature for covariate marginalization.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Quadrature
//!
//! Integrates a model's response over the Gaussian distribution of a noisy
//! covariate without drawing random numbers.
//!
//! - Gauss-Hermite: `E[f(X)]` for `X ~ N(mu, sigma^2)` through the change of
//!   variable `x = mu + sqrt(2 sigma^2) t`. Used with log and identity links.
//! - Gauss-Legendre: `integral of f(x) phi(x)` over `mu +/- k sigma` with the
//!   Gaussian density multiplied into the integrand. Used with the cloglog
//!   link. The `k = 3` default truncates 0.27% of the covariate mass.
//!
//! The integrand receives a full design row; the integrator writes each
//! abscissa into one slot of a scratch copy of that row. A zero variance
//! skips integration and evaluates the integrand at the mean.
//!
//! Rules are computed once by Newton iteration on the orthogonal
//! polynomial recurrences and are read-only afterwards.

use std::f64::consts::PI;

use statrs::distribution::{Continuous, Normal};
use thiserror::Error;

use crate::parameters::GaussianEstimate;
use crate::utils::usize_to_f64;

const NEWTON_TOLERANCE: f64 = 3.0e-14;
const NEWTON_MAX_ITERS: usize = 100;

/// Errors returned when building rules or integrating.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum QuadratureError {
    #[error("quadrature order must be positive")]
    InvalidOrder,
    #[error("integration span must be finite and positive; found {0}")]
    InvalidSpan(f64),
    #[error("covariate estimate must have a finite mean and non-negative variance")]
    InvalidEstimate,
    #[error("substitution slot {slot} is outside a design row of length {len}")]
    SlotOutOfRange { slot: usize, len: usize },
}

/// Nodes and weights of a Gauss rule, nodes ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl QuadratureRule {
    #[must_use]
    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[must_use]
    pub fn order(&self) -> usize {
        self.nodes.len()
    }

    /// Gauss-Hermite rule for the weight `exp(-t^2)` on the real line.
    ///
    /// # Errors
    ///
    /// Returns `QuadratureError::InvalidOrder` for `order == 0`.
    pub fn gauss_hermite(order: usize) -> Result<Self, QuadratureError> {
        if order == 0 {
            return Err(QuadratureError::InvalidOrder);
        }
        // pi^(-1/4)
        let pim4 = PI.powf(-0.25);
        let n = usize_to_f64(order);
        let half = order.div_ceil(2);
        let mut nodes = vec![0.0; order];
        let mut weights = vec![0.0; order];
        let mut z = 0.0_f64;

        for i in 0..half {
            z = match i {
                0 => 2.0f64.mul_add(n, 1.0).sqrt() - 1.855_75 * 2.0f64.mul_add(n, 1.0).powf(-0.166_67),
                1 => z - 1.14 * n.powf(0.426) / z,
                2 => 1.86f64.mul_add(z, -0.86 * nodes[0]),
                3 => 1.91f64.mul_add(z, -0.91 * nodes[1]),
                _ => 2.0f64.mul_add(z, -nodes[i - 2]),
            };
            let mut derivative = 1.0;
            for _ in 0..NEWTON_MAX_ITERS {
                let (value, previous) = orthonormal_hermite(order, z, pim4);
                derivative = (2.0 * n).sqrt() * previous;
                let step = value / derivative;
                z -= step;
                if step.abs() <= NEWTON_TOLERANCE {
                    break;
                }
            }
            nodes[i] = z;
            nodes[order - 1 - i] = -z;
            let weight = 2.0 / (derivative * derivative);
            weights[i] = weight;
            weights[order - 1 - i] = weight;
        }

        Ok(Self::sorted(nodes, weights))
    }

    /// Gauss-Legendre rule on `[-1, 1]`.
    ///
    /// # Errors
    ///
    /// Returns `QuadratureError::InvalidOrder` for `order == 0`.
    pub fn gauss_legendre(order: usize) -> Result<Self, QuadratureError> {
        if order == 0 {
            return Err(QuadratureError::InvalidOrder);
        }
        let n = usize_to_f64(order);
        let half = order.div_ceil(2);
        let mut nodes = vec![0.0; order];
        let mut weights = vec![0.0; order];

        for i in 0..half {
            let mut z = (PI * (usize_to_f64(i) + 0.75) / (n + 0.5)).cos();
            let mut derivative = 1.0;
            for _ in 0..NEWTON_MAX_ITERS {
                let (value, previous) = legendre(order, z);
                derivative = n * z.mul_add(value, -previous) / z.mul_add(z, -1.0);
                let step = value / derivative;
                z -= step;
                if step.abs() <= NEWTON_TOLERANCE {
                    break;
                }
            }
            nodes[i] = -z;
            nodes[order - 1 - i] = z;
            let weight = 2.0 / ((1.0 - z * z) * derivative * derivative);
            weights[i] = weight;
            weights[order - 1 - i] = weight;
        }

        Ok(Self::sorted(nodes, weights))
    }

    fn sorted(nodes: Vec<f64>, weights: Vec<f64>) -> Self {
        let mut pairs: Vec<(f64, f64)> = nodes.into_iter().zip(weights).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (nodes, weights) = pairs.into_iter().unzip();
        Self { nodes, weights }
    }
}

/// Orthonormal Hermite polynomial of degree `order` at `z` and the one of degree `order - 1`.
fn orthonormal_hermite(order: usize, z: f64, pim4: f64) -> (f64, f64) {
    let mut p1 = pim4;
    let mut p2 = 0.0;
    for j in 0..order {
        let p3 = p2;
        p2 = p1;
        let jf = usize_to_f64(j);
        p1 = (z * (2.0 / (jf + 1.0)).sqrt()).mul_add(p2, -(jf / (jf + 1.0)).sqrt() * p3);
    }
    (p1, p2)
}

/// Legendre polynomial of degree `order` at `z` and the one of degree `order - 1`.
fn legendre(order: usize, z: f64) -> (f64, f64) {
    let mut p1 = 1.0;
    let mut p2 = 0.0;
    for j in 0..order {
        let p3 = p2;
        p2 = p1;
        let jf = usize_to_f64(j);
        p1 = (2.0f64.mul_add(jf, 1.0) * z).mul_add(p2, -jf * p3) / (jf + 1.0);
    }
    (p1, p2)
}

/// Whether the covariate density is already part of the integrand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DensityWeight {
    /// The integrator supplies the Gaussian weight.
    #[default]
    Applied,
    /// The integrand already multiplies by the covariate's Gaussian density.
    Folded,
}

/// Stateless integrator holding one Hermite and one Legendre rule.
#[derive(Debug, Clone)]
pub struct QuadratureIntegrator {
    hermite: QuadratureRule,
    legendre: QuadratureRule,
    legendre_span_sd: f64,
}

impl QuadratureIntegrator {
    /// # Errors
    ///
    /// Returns `QuadratureError` for a zero order or a non-positive span.
    pub fn new(
        hermite_order: usize,
        legendre_order: usize,
        legendre_span_sd: f64,
    ) -> Result<Self, QuadratureError> {
        if !(legendre_span_sd.is_finite() && legendre_span_sd > 0.0) {
            return Err(QuadratureError::InvalidSpan(legendre_span_sd));
        }
        Ok(Self {
            hermite: QuadratureRule::gauss_hermite(hermite_order)?,
            legendre: QuadratureRule::gauss_legendre(legendre_order)?,
            legendre_span_sd,
        })
    }

    #[must_use]
    pub const fn hermite_rule(&self) -> &QuadratureRule {
        &self.hermite
    }

    #[must_use]
    pub const fn legendre_rule(&self) -> &QuadratureRule {
        &self.legendre
    }

    /// Approximate `E[f(row with row[slot] = X)]` for `X ~ N(mean, variance)`.
    ///
    /// With `DensityWeight::Folded` the integrand is taken to already include
    /// the Gaussian density of `X`, so the result is its integral over `x`.
    ///
    /// # Errors
    ///
    /// Returns `QuadratureError` for an out-of-range slot or an invalid estimate.
    pub fn gauss_hermite<F>(
        &self,
        integrand: F,
        row: &[f64],
        slot: usize,
        estimate: GaussianEstimate,
        density: DensityWeight,
    ) -> Result<f64, QuadratureError>
    where
        F: Fn(&[f64]) -> f64,
    {
        let mut scratch = prepare(row, slot, estimate)?;
        if estimate.is_degenerate() {
            scratch[slot] = estimate.mean();
            return Ok(integrand(&scratch));
        }
        let scale = (2.0 * estimate.variance()).sqrt();
        let mut sum = 0.0;
        for (node, weight) in self.hermite.nodes.iter().zip(&self.hermite.weights) {
            scratch[slot] = scale.mul_add(*node, estimate.mean());
            let value = integrand(&scratch);
            sum += match density {
                DensityWeight::Applied => weight * value,
                DensityWeight::Folded => weight * (node * node).exp() * value,
            };
        }
        Ok(match density {
            DensityWeight::Applied => sum / PI.sqrt(),
            DensityWeight::Folded => sum * scale,
        })
    }

    /// Approximate the integral of `f * phi` over `mean +/- span_sd * sd`,
    /// where `phi` is the `N(mean, variance)` density.
    ///
    /// # Errors
    ///
    /// Returns `QuadratureError` for an out-of-range slot or an invalid estimate.
    pub fn gauss_legendre<F>(
        &self,
        integrand: F,
        row: &[f64],
        slot: usize,
        estimate: GaussianEstimate,
        density: DensityWeight,
    ) -> Result<f64, QuadratureError>
    where
        F: Fn(&[f64]) -> f64,
    {
        let mut scratch = prepare(row, slot, estimate)?;
        if estimate.is_degenerate() {
            scratch[slot] = estimate.mean();
            return Ok(integrand(&scratch));
        }
        let sd = estimate.std_dev();
        let normal =
            Normal::new(estimate.mean(), sd).map_err(|_| QuadratureError::InvalidEstimate)?;
        let half_width = self.legendre_span_sd * sd;
        let mut sum = 0.0;
        for (node, weight) in self.legendre.nodes.iter().zip(&self.legendre.weights) {
            let x = half_width.mul_add(*node, estimate.mean());
            scratch[slot] = x;
            let value = integrand(&scratch);
            sum += match density {
                DensityWeight::Applied => weight * value * normal.pdf(x),
                DensityWeight::Folded => weight * value,
            };
        }
        Ok(sum * half_width)
    }
}

fn prepare(row: &[f64], slot: usize, estimate: GaussianEstimate) -> Result<Vec<f64>, QuadratureError> {
    if slot >= row.len() {
        return Err(QuadratureError::SlotOutOfRange {
            slot,
            len: row.len(),
        });
    }
    if !(estimate.mean().is_finite() && estimate.variance().is_finite() && estimate.variance() >= 0.0)
    {
        return Err(QuadratureError::InvalidEstimate);
    }
    Ok(row.to_vec())
}

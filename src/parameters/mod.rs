//! # Parameter uncertainty
//!
//! Gaussian models for fixed-effect coefficient vectors and random effects.
//! A model holds a mean column and a covariance matrix and supplies either
//! the mean (deterministic mode) or `mean + L z` draws, where `L` is the
//! lower Cholesky factor of the covariance.
//!
//! The factorization is computed lazily on the first stochastic draw and
//! cached, so an invalid covariance is reported at draw time rather than
//! at construction.
//!
//! ```
//! use faer::Mat;
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//! use stand_predictors::GaussianParameterModel;
//!
//! let mean = Mat::from_fn(2, 1, |i, _| if i == 0 { 1.0 } else { -0.5 });
//! let covariance = Mat::from_fn(2, 2, |i, j| if i == j { 0.04 } else { 0.01 });
//! let model = GaussianParameterModel::new(mean, covariance).expect("square shapes");
//!
//! let mut rng = StdRng::seed_from_u64(1);
//! let draw = model.draw_realization(false, &mut rng).expect("mean is always available");
//! assert_eq!(draw[(0, 0)], 1.0);
//! ```

use std::sync::OnceLock;

use faer::Mat;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::utils::{matrix_is_finite, sample_standard_normal, vec_to_column};

/// Relative tolerance used for symmetry and semi-definiteness checks.
const FACTOR_TOLERANCE: f64 = 1.0e-10;

/// Failures of the covariance factorization. These are never corrected silently.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum NumericalError {
    #[error("covariance is not symmetric at ({row}, {col}): {upper} vs {lower}")]
    AsymmetricCovariance {
        row: usize,
        col: usize,
        upper: f64,
        lower: f64,
    },
    #[error("covariance is not positive semi-definite (pivot {pivot} = {value})")]
    NotPositiveSemidefinite { pivot: usize, value: f64 },
    #[error("covariance contains non-finite values")]
    NonFiniteCovariance,
}

/// Shape problems detected when a parameter model is built.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParameterError {
    #[error("mean must be a single column; found {cols} columns")]
    InvalidMeanShape { cols: usize },
    #[error("covariance must be {expected}x{expected}; found {rows}x{cols}")]
    CovarianceShapeMismatch {
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("mean contains non-finite values")]
    NonFiniteMean,
    #[error("random-effect level `{level}` must be one-dimensional; found {dim}")]
    RandomEffectDimension { level: &'static str, dim: usize },
}

/// Scalar Gaussian summary `(mean, variance)`, immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianEstimate {
    mean: f64,
    variance: f64,
}

impl GaussianEstimate {
    #[must_use]
    pub const fn new(mean: f64, variance: f64) -> Self {
        Self { mean, variance }
    }

    #[must_use]
    pub const fn mean(self) -> f64 {
        self.mean
    }

    #[must_use]
    pub const fn variance(self) -> f64 {
        self.variance
    }

    #[must_use]
    pub fn std_dev(self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    /// Whether the estimate carries any uncertainty at all.
    #[must_use]
    pub fn is_degenerate(self) -> bool {
        self.variance == 0.0
    }

    /// Draw `mean + sd * z`; a degenerate estimate returns its mean without
    /// consuming random numbers.
    pub fn draw(self, rng: &mut StdRng) -> f64 {
        if self.is_degenerate() {
            return self.mean;
        }
        self.std_dev().mul_add(sample_standard_normal(rng), self.mean)
    }
}

#[derive(Debug, Clone)]
enum Factor {
    /// Covariance is identically zero.
    Zero,
    Lower(Mat<f64>),
}

/// Mean vector and covariance of a Gaussian coefficient (or random-effect) vector.
#[derive(Debug, Clone)]
pub struct GaussianParameterModel {
    mean: Mat<f64>,
    covariance: Mat<f64>,
    factor: OnceLock<Result<Factor, NumericalError>>,
}

impl GaussianParameterModel {
    /// # Errors
    ///
    /// Returns `ParameterError` if `mean` is not a finite column or the
    /// covariance is not `p x p`.
    pub fn new(mean: Mat<f64>, covariance: Mat<f64>) -> Result<Self, ParameterError> {
        if mean.ncols() != 1 {
            return Err(ParameterError::InvalidMeanShape { cols: mean.ncols() });
        }
        let dim = mean.nrows();
        if covariance.nrows() != dim || covariance.ncols() != dim {
            return Err(ParameterError::CovarianceShapeMismatch {
                expected: dim,
                rows: covariance.nrows(),
                cols: covariance.ncols(),
            });
        }
        if !matrix_is_finite(&mean) {
            return Err(ParameterError::NonFiniteMean);
        }
        Ok(Self {
            mean,
            covariance,
            factor: OnceLock::new(),
        })
    }

    /// Parameters known without uncertainty.
    #[must_use]
    pub fn fixed(mean: &[f64]) -> Self {
        let dim = mean.len();
        Self {
            mean: Mat::from_fn(dim, 1, |row, _| mean[row]),
            covariance: Mat::zeros(dim, dim),
            factor: OnceLock::new(),
        }
    }

    /// Zero-mean model, as used for random effects.
    ///
    /// # Errors
    ///
    /// Returns `ParameterError` if the covariance is not square.
    pub fn zero_mean(covariance: Mat<f64>) -> Result<Self, ParameterError> {
        let dim = covariance.nrows();
        Self::new(Mat::zeros(dim, 1), covariance)
    }

    #[must_use]
    pub const fn mean(&self) -> &Mat<f64> {
        &self.mean
    }

    #[must_use]
    pub const fn variance(&self) -> &Mat<f64> {
        &self.covariance
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.mean.nrows()
    }

    /// Whether every covariance entry is exactly zero.
    #[must_use]
    pub fn has_zero_variance(&self) -> bool {
        (0..self.covariance.nrows())
            .all(|i| (0..self.covariance.ncols()).all(|j| self.covariance[(i, j)] == 0.0))
    }

    /// Return the mean when `stochastic` is false, otherwise `mean + L z`.
    ///
    /// # Errors
    ///
    /// Returns `NumericalError` if the covariance is asymmetric, indefinite,
    /// or non-finite. The failure is cached and reported on every later draw.
    pub fn draw_realization(
        &self,
        stochastic: bool,
        rng: &mut StdRng,
    ) -> Result<Mat<f64>, NumericalError> {
        if !stochastic {
            return Ok(self.mean.clone());
        }
        let factor = self
            .factor
            .get_or_init(|| factorize(&self.covariance))
            .as_ref()
            .map_err(|err| *err)?;
        match factor {
            Factor::Zero => Ok(self.mean.clone()),
            Factor::Lower(lower) => {
                let dim = self.dimension();
                let noise: Vec<f64> = (0..dim).map(|_| sample_standard_normal(rng)).collect();
                let correlated = lower * &vec_to_column(&noise);
                Ok(Mat::from_fn(dim, 1, |row, _| {
                    self.mean[(row, 0)] + correlated[(row, 0)]
                }))
            }
        }
    }

    /// Lower factor of the covariance, computing it if needed.
    ///
    /// # Errors
    ///
    /// Returns `NumericalError` when the covariance cannot be factorized.
    pub fn lower_factor(&self) -> Result<Mat<f64>, NumericalError> {
        let dim = self.dimension();
        match self.factor.get_or_init(|| factorize(&self.covariance)) {
            Ok(Factor::Zero) => Ok(Mat::zeros(dim, dim)),
            Ok(Factor::Lower(lower)) => Ok(lower.clone()),
            Err(err) => Err(*err),
        }
    }
}

/// One hierarchical random-intercept level (e.g. plot, tree, interval within plot).
#[derive(Debug, Clone)]
pub struct RandomEffectLevel {
    name: &'static str,
    model: GaussianParameterModel,
}

impl RandomEffectLevel {
    /// # Errors
    ///
    /// Returns `ParameterError` if the variance is not a 1x1 matrix.
    pub fn new(name: &'static str, variance: f64) -> Result<Self, ParameterError> {
        let model = GaussianParameterModel::zero_mean(Mat::from_fn(1, 1, |_, _| variance))?;
        Self::from_model(name, model)
    }

    /// # Errors
    ///
    /// Returns `ParameterError` if `model` is not one-dimensional.
    pub fn from_model(
        name: &'static str,
        model: GaussianParameterModel,
    ) -> Result<Self, ParameterError> {
        if model.dimension() != 1 {
            return Err(ParameterError::RandomEffectDimension {
                level: name,
                dim: model.dimension(),
            });
        }
        Ok(Self { name, model })
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn model(&self) -> &GaussianParameterModel {
        &self.model
    }

    /// A level with an all-zero covariance behaves as if it did not exist.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.model.has_zero_variance()
    }
}

fn factorize(covariance: &Mat<f64>) -> Result<Factor, NumericalError> {
    if !matrix_is_finite(covariance) {
        return Err(NumericalError::NonFiniteCovariance);
    }
    let dim = covariance.nrows();
    let mut scale = 0.0_f64;
    for row in 0..dim {
        scale = scale.max(covariance[(row, row)].abs());
        for col in 0..row {
            let upper = covariance[(col, row)];
            let lower = covariance[(row, col)];
            let bound = FACTOR_TOLERANCE * upper.abs().max(lower.abs()).max(1.0);
            if (upper - lower).abs() > bound {
                return Err(NumericalError::AsymmetricCovariance {
                    row,
                    col,
                    upper,
                    lower,
                });
            }
        }
    }
    if scale == 0.0 && (0..dim).all(|i| (0..dim).all(|j| covariance[(i, j)] == 0.0)) {
        return Ok(Factor::Zero);
    }
    cholesky_semidefinite(covariance, FACTOR_TOLERANCE * scale.max(f64::MIN_POSITIVE))
        .map(Factor::Lower)
}

/// Cholesky factorization tolerant of zero pivots (semi-definite input).
/// Columns with a zero pivot are left at zero.
fn cholesky_semidefinite(matrix: &Mat<f64>, tolerance: f64) -> Result<Mat<f64>, NumericalError> {
    let dim = matrix.ncols();
    let mut lower = Mat::<f64>::zeros(dim, dim);
    for col in 0..dim {
        let mut pivot = matrix[(col, col)];
        for k in 0..col {
            pivot -= lower[(col, k)] * lower[(col, k)];
        }
        if pivot < -tolerance {
            return Err(NumericalError::NotPositiveSemidefinite { pivot: col, value: pivot });
        }
        if pivot <= tolerance {
            for row in (col + 1)..dim {
                let mut residual = matrix[(row, col)];
                for k in 0..col {
                    residual -= lower[(row, k)] * lower[(col, k)];
                }
                if residual.abs() > tolerance.sqrt() {
                    return Err(NumericalError::NotPositiveSemidefinite {
                        pivot: col,
                        value: pivot,
                    });
                }
            }
            continue;
        }
        let diagonal = pivot.sqrt();
        lower[(col, col)] = diagonal;
        for row in (col + 1)..dim {
            let mut sum = matrix[(row, col)];
            for k in 0..col {
                sum -= lower[(row, k)] * lower[(col, k)];
            }
            lower[(row, col)] = sum / diagonal;
        }
    }
    Ok(lower)
}

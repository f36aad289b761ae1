//! Link functions and residual behaviour of the predictor families.

/// Count models are fitted on `count - 1`; predictions add it back.
pub const COUNT_SHIFT: f64 = 1.0;

/// Quadrature family used to marginalize a covariate under a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marginalization {
    GaussHermite,
    GaussLegendre,
}

/// Link function, tagged with the parameters of its residual distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkFunction {
    /// `p = 1 - exp(-exp(eta))`.
    ComplementaryLogLog,
    /// `mu = exp(eta)` with a negative binomial residual, `Var = mu + k mu^2`.
    LogNegativeBinomial { dispersion: f64 },
    /// `mu = eta` with a Gaussian residual (increment models).
    Identity { residual_variance: f64 },
}

impl LinkFunction {
    /// Response scale value of the linear predictor.
    #[must_use]
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            Self::ComplementaryLogLog => cloglog_inverse(eta),
            Self::LogNegativeBinomial { .. } => eta.exp(),
            Self::Identity { .. } => eta,
        }
    }

    #[must_use]
    pub const fn marginalization(self) -> Marginalization {
        match self {
            Self::ComplementaryLogLog => Marginalization::GaussLegendre,
            Self::LogNegativeBinomial { .. } | Self::Identity { .. } => {
                Marginalization::GaussHermite
            }
        }
    }

    /// Whether the residual parameters are usable.
    #[must_use]
    pub fn is_valid(self) -> bool {
        match self {
            Self::ComplementaryLogLog => true,
            Self::LogNegativeBinomial { dispersion } => dispersion.is_finite() && dispersion >= 0.0,
            Self::Identity { residual_variance } => {
                residual_variance.is_finite() && residual_variance >= 0.0
            }
        }
    }
}

/// Inverse complementary log-log, `1 - exp(-exp(eta))`, stable for small `exp(eta)`.
#[must_use]
pub fn cloglog_inverse(eta: f64) -> f64 {
    -(-eta.exp()).exp_m1()
}

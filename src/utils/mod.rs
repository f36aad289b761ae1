/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Shared numeric helpers and random variate generators for the prediction engine.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Shared helpers for dot products, finiteness checks on faer matrices, keyed
//! random sources, and the hand-rolled random variate generators used by the
//! stochastic mode.

use faer::Mat;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// Threshold above which Poisson draws switch from inversion to PTRS.
const POISSON_INVERSION_LIMIT: f64 = 10.0;

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

/// Inner product of a design row with a coefficient column.
#[must_use]
pub fn dot_column(design: &[f64], coefficients: &Mat<f64>) -> f64 {
    design
        .iter()
        .enumerate()
        .map(|(row, value)| value * coefficients[(row, 0)])
        .sum()
}

#[must_use]
pub fn vec_to_column(values: &[f64]) -> Mat<f64> {
    Mat::from_fn(values.len(), 1, |row, _| values[row])
}

#[must_use]
pub fn column_to_vec(column: &Mat<f64>) -> Vec<f64> {
    (0..column.nrows()).map(|row| column[(row, 0)]).collect()
}

pub fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Marsaglia-Tsang gamma draw with `shape` and `scale`.
pub fn sample_gamma(rng: &mut StdRng, shape: f64, scale: f64) -> f64 {
    if !(shape > 0.0 && scale > 0.0) {
        return f64::NAN;
    }

    if shape < 1.0 {
        let u = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    let shape_minus_third = shape - (1.0 / 3.0);
    let coeff = (1.0 / (9.0 * shape_minus_third)).sqrt();
    loop {
        let standard_normal = sample_standard_normal(rng);
        let one_plus_coeff_noise = coeff.mul_add(standard_normal, 1.0);
        if one_plus_coeff_noise <= 0.0 {
            continue;
        }
        let cubic_term = one_plus_coeff_noise * one_plus_coeff_noise * one_plus_coeff_noise;
        let uniform = rng.random::<f64>();
        if uniform
            < (0.0331 * standard_normal * standard_normal * standard_normal)
                .mul_add(-standard_normal, 1.0)
        {
            return scale * shape_minus_third * cubic_term;
        }
        if uniform.ln()
            < (0.5 * standard_normal).mul_add(
                standard_normal,
                shape_minus_third * (1.0 - cubic_term + cubic_term.ln()),
            )
        {
            return scale * shape_minus_third * cubic_term;
        }
    }
}

/// Poisson draw. Small means use sequential inversion, larger means use
/// Hormann's transformed rejection with squeeze (PTRS).
pub fn sample_poisson(rng: &mut StdRng, mean: f64) -> f64 {
    if !(mean.is_finite() && mean >= 0.0) {
        return f64::NAN;
    }
    if mean == 0.0 {
        return 0.0;
    }
    if mean < POISSON_INVERSION_LIMIT {
        return poisson_inversion(rng, mean);
    }
    poisson_ptrs(rng, mean)
}

fn poisson_inversion(rng: &mut StdRng, mean: f64) -> f64 {
    let uniform = rng.random::<f64>();
    let mut count = 0.0;
    let mut probability = (-mean).exp();
    let mut cumulative = probability;
    while uniform > cumulative {
        count += 1.0;
        probability *= mean / count;
        cumulative += probability;
        if probability <= 0.0 {
            break;
        }
    }
    count
}

fn poisson_ptrs(rng: &mut StdRng, mean: f64) -> f64 {
    let log_mean = mean.ln();
    let b = 0.931 + 2.53 * mean.sqrt();
    let a = 0.02483_f64.mul_add(b, -0.059);
    let inv_alpha = 1.1239 + 1.1328 / (b - 3.4);
    let v_r = 0.9277 - 3.6224 / (b - 2.0);

    loop {
        let u = rng.random::<f64>() - 0.5;
        let v = rng.random::<f64>();
        let us = 0.5 - u.abs();
        let k = ((2.0 * a / us + b).mul_add(u, mean) + 0.43).floor();
        if us >= 0.07 && v <= v_r {
            return k;
        }
        if k < 0.0 || (us < 0.013 && v > us) {
            continue;
        }
        let lhs = (v * inv_alpha / (a / (us * us) + b)).ln();
        let rhs = -mean + k.mul_add(log_mean, -statrs::function::gamma::ln_gamma(k + 1.0));
        if lhs <= rhs {
            return k;
        }
    }
}

/// Seed for one stochastic quantity, derived from a master seed and the
/// quantity's key.
///
/// Parts are length-prefixed into a BLAKE3 digest, so two keys never share a
/// stream and a draw never depends on which other keys were drawn first.
#[derive(Debug, Clone)]
pub struct DrawSeed {
    hasher: blake3::Hasher,
}

impl DrawSeed {
    #[must_use]
    pub fn new(seed: u64, quantity: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&seed.to_le_bytes());
        Self { hasher }.with_bytes(quantity.as_bytes())
    }

    #[must_use]
    pub fn with_str(self, value: &str) -> Self {
        self.with_bytes(value.as_bytes())
    }

    #[must_use]
    pub fn with_index(self, value: usize) -> Self {
        self.with_bytes(&u64::try_from(value).unwrap_or(u64::MAX).to_le_bytes())
    }

    #[must_use]
    pub fn with_year(self, value: i32) -> Self {
        self.with_bytes(&value.to_le_bytes())
    }

    fn with_bytes(mut self, bytes: &[u8]) -> Self {
        let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        self.hasher.update(&len.to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    #[must_use]
    pub fn rng(&self) -> StdRng {
        StdRng::from_seed(*self.hasher.finalize().as_bytes())
    }
}

/// Negative binomial draw as a gamma-Poisson mixture.
///
/// `dispersion` is the `k` in `Var = mu + k * mu^2`; zero reduces to Poisson.
pub fn sample_negative_binomial(rng: &mut StdRng, mean: f64, dispersion: f64) -> f64 {
    if dispersion <= 0.0 {
        return sample_poisson(rng, mean);
    }
    if mean <= 0.0 {
        return 0.0;
    }
    let shape = 1.0 / dispersion;
    let rate_mean = sample_gamma(rng, shape, mean * dispersion);
    sample_poisson(rng, rate_mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_moments(draws: &[f64]) -> (f64, f64) {
        let n = usize_to_f64(draws.len());
        let mean = draws.iter().sum::<f64>() / n;
        let variance = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        (mean, variance)
    }

    #[test]
    fn dot_column_matches_manual_product() {
        let coefficients = vec_to_column(&[0.5, -1.0, 2.0]);
        assert_relative_eq!(dot_column(&[2.0, 1.0, 0.25], &coefficients), 0.5);
    }

    #[test]
    fn column_round_trip_preserves_values() {
        let values = vec![1.0, 2.5, -3.0];
        assert_eq!(column_to_vec(&vec_to_column(&values)), values);
    }

    #[test]
    fn matrix_is_finite_detects_nan() {
        let matrix = Mat::from_fn(2, 1, |i, _| if i == 0 { 1.0 } else { f64::NAN });
        assert!(!matrix_is_finite(&matrix));
    }

    #[test]
    fn gamma_draws_match_moments() {
        let mut rng = StdRng::seed_from_u64(7);
        let draws: Vec<f64> = (0..40_000).map(|_| sample_gamma(&mut rng, 2.5, 1.5)).collect();
        let (mean, variance) = sample_moments(&draws);
        assert!((mean - 3.75).abs() < 0.06);
        assert!((variance - 5.625).abs() < 0.3);
    }

    #[test]
    fn poisson_draws_match_moments_in_both_regimes() {
        let mut rng = StdRng::seed_from_u64(11);
        for target in [2.3, 45.0] {
            let draws: Vec<f64> = (0..40_000).map(|_| sample_poisson(&mut rng, target)).collect();
            let (mean, variance) = sample_moments(&draws);
            assert!((mean - target).abs() < 0.03 * target.max(1.0));
            assert!((variance - target).abs() < 0.08 * target.max(1.0));
            assert!(draws.iter().all(|x| *x >= 0.0 && x.fract() == 0.0));
        }
    }

    #[test]
    fn negative_binomial_is_overdispersed() {
        let mut rng = StdRng::seed_from_u64(19);
        let draws: Vec<f64> = (0..40_000)
            .map(|_| sample_negative_binomial(&mut rng, 4.0, 0.5))
            .collect();
        let (mean, variance) = sample_moments(&draws);
        assert!((mean - 4.0).abs() < 0.1);
        // 4 + 0.5 * 16
        assert!((variance - 12.0).abs() < 1.0);
    }

    #[test]
    fn draw_seeds_depend_only_on_their_key() {
        let key = || {
            DrawSeed::new(42, "residual")
                .with_str("T1")
                .with_index(3)
                .with_year(2000)
        };
        let first = sample_standard_normal(&mut key().rng());
        // drawing from other keys in between changes nothing
        for realization in 0..10 {
            let mut rng = DrawSeed::new(42, "residual").with_index(realization).rng();
            let _ = sample_standard_normal(&mut rng);
        }
        assert_eq!(first.to_bits(), sample_standard_normal(&mut key().rng()).to_bits());

        let variants = [
            DrawSeed::new(43, "residual").with_str("T1").with_index(3).with_year(2000),
            DrawSeed::new(42, "occupancy").with_str("T1").with_index(3).with_year(2000),
            DrawSeed::new(42, "residual").with_str("T2").with_index(3).with_year(2000),
            DrawSeed::new(42, "residual").with_str("T1").with_index(4).with_year(2000),
            DrawSeed::new(42, "residual").with_str("T1").with_index(3).with_year(2001),
        ];
        for variant in variants {
            assert_ne!(first.to_bits(), sample_standard_normal(&mut variant.rng()).to_bits());
        }
    }

    #[test]
    fn draw_seed_parts_are_length_prefixed() {
        let joined = DrawSeed::new(1, "tag").with_str("ab").with_str("c");
        let split = DrawSeed::new(1, "tag").with_str("a").with_str("bc");
        assert_ne!(
            sample_standard_normal(&mut joined.rng()).to_bits(),
            sample_standard_normal(&mut split.rng()).to_bits()
        );
    }

    #[test]
    fn poisson_of_zero_mean_is_zero() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_relative_eq!(sample_poisson(&mut rng, 0.0), 0.0);
        assert!(sample_poisson(&mut rng, -1.0).is_nan());
    }
}

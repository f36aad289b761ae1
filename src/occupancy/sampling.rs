//! Design-based estimators of a proportion from a neighbourhood sample.

use crate::parameters::GaussianEstimate;
use crate::utils::usize_to_f64;

/// Sample mean of `values` under simple random sampling, with variance
/// `s^2 / n` (no finite-population correction).
///
/// Returns `None` for fewer than two observations.
#[must_use]
pub fn simple_random_sample_mean(values: &[f64]) -> Option<GaussianEstimate> {
    if values.len() < 2 {
        return None;
    }
    let n = usize_to_f64(values.len());
    let mean = values.iter().sum::<f64>() / n;
    let sum_sq = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>();
    let sample_variance = sum_sq / (n - 1.0);
    Some(GaussianEstimate::new(mean, sample_variance / n))
}

/// Population total estimate scaled back to a proportion of `population_size` units.
///
/// Unit `i` has inclusion probability `sum(w) / (w_i * N)`; the total uses
/// the Horvitz-Thompson expansion and its with-replacement variance
/// approximation, and both are divided by `N` (variance by `N^2`).
///
/// Returns `None` for fewer than two observations, mismatched slices, or a
/// non-positive population size.
#[must_use]
pub fn horvitz_thompson_proportion(
    values: &[f64],
    weights: &[f64],
    population_size: f64,
) -> Option<GaussianEstimate> {
    if values.len() < 2 || values.len() != weights.len() || population_size <= 0.0 {
        return None;
    }
    let n = usize_to_f64(values.len());
    let weight_sum = weights.iter().sum::<f64>();

    let expanded: Vec<f64> = values
        .iter()
        .zip(weights)
        .map(|(value, weight)| {
            let inclusion = weight_sum / (weight * population_size);
            let draw_probability = inclusion / n;
            value / draw_probability
        })
        .collect();
    let total = expanded.iter().sum::<f64>() / n;
    let total_variance = expanded
        .iter()
        .map(|value| (value - total).powi(2))
        .sum::<f64>()
        / (n * (n - 1.0));

    Some(GaussianEstimate::new(
        total / population_size,
        total_variance / (population_size * population_size),
    ))
}

/// Number of plot-sized units in the disc of `radius_km` around a plot of `plot_area_ha`.
#[must_use]
pub fn population_size(radius_km: f64, plot_area_ha: f64) -> f64 {
    std::f64::consts::PI * radius_km * radius_km * 100.0 / plot_area_ha
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn simple_random_sample_of_indicators() {
        let estimate = simple_random_sample_mean(&[1.0, 0.0, 0.0, 0.0]).expect("n >= 2");
        assert_relative_eq!(estimate.mean(), 0.25);
        // p (1 - p) / (n - 1)
        assert_relative_eq!(estimate.variance(), 0.0625);
    }

    #[test]
    fn single_observation_has_no_estimate() {
        assert!(simple_random_sample_mean(&[1.0]).is_none());
        assert!(horvitz_thompson_proportion(&[1.0], &[1.0], 10.0).is_none());
    }

    #[test]
    fn horvitz_thompson_mean_is_weighted_proportion() {
        let n_units = population_size(5.0, 0.04);
        let estimate =
            horvitz_thompson_proportion(&[1.0, 0.0, 1.0, 0.0], &[1.0, 1.0, 2.0, 2.0], n_units)
                .expect("valid sample");
        assert_relative_eq!(estimate.mean(), 0.5, epsilon = 1.0e-12);
        assert_relative_eq!(estimate.variance(), 0.101_851_851_851_851_85, epsilon = 1.0e-12);
    }

    #[test]
    fn horvitz_thompson_reduces_to_simple_random_sampling_for_equal_weights() {
        let values = [1.0, 1.0, 0.0, 0.0, 0.0];
        let srs = simple_random_sample_mean(&values).expect("n >= 2");
        let ht = horvitz_thompson_proportion(&values, &[3.0; 5], 1_000.0).expect("valid");
        assert_relative_eq!(srs.mean(), ht.mean(), epsilon = 1.0e-12);
        assert_relative_eq!(srs.variance(), ht.variance(), epsilon = 1.0e-12);
    }

    #[test]
    fn population_size_counts_plot_units_in_disc() {
        // 1 km radius = pi * 100 ha; 0.04 ha plots
        assert_relative_eq!(population_size(1.0, 0.04), std::f64::consts::PI * 2_500.0);
    }
}

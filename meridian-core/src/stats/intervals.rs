//! Quantile-based intervals via `statrs`.

use statrs::distribution::{Beta, ContinuousCDF, Gamma, Normal};

use crate::types::ConfidenceInterval;

/// Two-sided standard normal critical value for coverage `level`.
pub fn z_value(level: f64) -> f64 {
    let tail = (1.0 - level.clamp(0.5, 0.999_999)) / 2.0;
    match Normal::new(0.0, 1.0) {
        Ok(n) => n.inverse_cdf(1.0 - tail),
        Err(_) => 1.96,
    }
}

/// Normal-approximation interval `mean ± z * se`.
pub fn normal_interval(mean: f64, std_error: f64, level: f64) -> ConfidenceInterval {
    let half = z_value(level) * std_error.max(0.0);
    ConfidenceInterval::new(mean - half, mean + half, level)
}

/// Posterior parameters for a Beta(1, 1) prior after `successes` of `trials`.
pub fn beta_posterior(successes: u64, trials: u64) -> (f64, f64) {
    let k = successes.min(trials) as f64;
    let n = trials as f64;
    (1.0 + k, 1.0 + (n - k).max(0.0))
}

/// Equal-tailed credible interval of Beta(alpha, beta).
pub fn beta_credible_interval(alpha: f64, beta: f64, level: f64) -> ConfidenceInterval {
    if alpha <= 0.0 || beta <= 0.0 || !alpha.is_finite() || !beta.is_finite() {
        return ConfidenceInterval::new(0.0, 1.0, level);
    }
    if alpha > 1e6 || beta > 1e6 {
        let mean = alpha / (alpha + beta);
        return ConfidenceInterval::point(mean, level);
    }
    let tail = (1.0 - level) / 2.0;
    match Beta::new(alpha, beta) {
        Ok(dist) => {
            let low = dist.inverse_cdf(tail);
            let high = dist.inverse_cdf(1.0 - tail);
            let low = if low.is_finite() { low.clamp(0.0, 1.0) } else { 0.0 };
            let high = if high.is_finite() { high.clamp(0.0, 1.0) } else { 1.0 };
            ConfidenceInterval::new(low, high, level)
        }
        Err(_) => ConfidenceInterval::new(0.0, 1.0, level),
    }
}

/// Equal-tailed interval of Gamma(shape, rate).
pub fn gamma_interval(shape: f64, rate: f64, level: f64) -> ConfidenceInterval {
    if shape <= 0.0 || rate <= 0.0 || !shape.is_finite() || !rate.is_finite() {
        return ConfidenceInterval::point(0.0, level);
    }
    let tail = (1.0 - level) / 2.0;
    match Gamma::new(shape, rate) {
        Ok(dist) => {
            let low = dist.inverse_cdf(tail);
            let high = dist.inverse_cdf(1.0 - tail);
            let mean = shape / rate;
            let low = if low.is_finite() { low.max(0.0) } else { 0.0 };
            let high = if high.is_finite() { high } else { mean * 3.0 };
            ConfidenceInterval::new(low, high, level)
        }
        Err(_) => ConfidenceInterval::point(shape / rate, level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_z_value_95() {
        assert!((z_value(0.95) - 1.959_964).abs() < 1e-3);
    }

    #[test]
    fn test_beta_posterior_counts() {
        assert_eq!(beta_posterior(8, 10), (9.0, 3.0));
        assert_eq!(beta_posterior(0, 0), (1.0, 1.0));
    }

    #[test]
    fn test_credible_interval_narrows_with_data() {
        let (a1, b1) = beta_posterior(5, 100);
        let (a2, b2) = beta_posterior(500, 10_000);
        let wide = beta_credible_interval(a1, b1, 0.95);
        let narrow = beta_credible_interval(a2, b2, 0.95);
        assert!(narrow.width() < wide.width());
        assert!(narrow.contains(0.05));
    }

    #[test]
    fn test_invalid_beta_params_give_unit_interval() {
        let ci = beta_credible_interval(0.0, 1.0, 0.95);
        assert_eq!((ci.lower, ci.upper), (0.0, 1.0));
    }

    #[test]
    fn test_gamma_interval_brackets_mean() {
        let ci = gamma_interval(10.0, 2.0, 0.95);
        assert!(ci.contains(5.0));
        assert!(ci.lower > 0.0);
    }

    #[test]
    fn test_normal_interval_symmetric() {
        let ci = normal_interval(10.0, 1.0, 0.95);
        assert!(((10.0 - ci.lower) - (ci.upper - 10.0)).abs() < 1e-9);
    }
}

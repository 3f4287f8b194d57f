//! Bayesian logistic regression
//!
//! Maximum a posteriori fit under an isotropic Gaussian prior, solved with
//! Newton iterations. The inverse Hessian at the optimum is kept as a
//! Laplace approximation of the posterior covariance, which gives interval
//! estimates on the logit scale. With no data the model is exactly its
//! prior.

use serde::{Deserialize, Serialize};

use super::intervals::z_value;
use super::linalg::{self, Matrix};
use crate::error::{MeridianError, Result};
use crate::types::ConfidenceInterval;

const MAX_NEWTON_ITERATIONS: usize = 50;
const CONVERGENCE_TOLERANCE: f64 = 1e-8;

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Logistic model with intercept stored at index 0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    weights: Vec<f64>,
    prior_mean: Vec<f64>,
    prior_precision: f64,
    covariance: Matrix,
    trained_on: usize,
}

impl LogisticModel {
    /// Model with prior `N(prior_mean, I / prior_precision)`.
    ///
    /// `prior_mean[0]` is the intercept.
    pub fn with_prior(prior_mean: Vec<f64>, prior_precision: f64) -> Self {
        let dim = prior_mean.len();
        let precision = prior_precision.max(1e-6);
        let covariance = (0..dim)
            .map(|i| {
                (0..dim)
                    .map(|j| if i == j { 1.0 / precision } else { 0.0 })
                    .collect()
            })
            .collect();
        Self {
            weights: prior_mean.clone(),
            prior_mean,
            prior_precision: precision,
            covariance,
            trained_on: 0,
        }
    }

    /// Zero-mean ridge prior over `features` inputs.
    pub fn ridge(features: usize, prior_precision: f64) -> Self {
        Self::with_prior(vec![0.0; features + 1], prior_precision)
    }

    pub fn features(&self) -> usize {
        self.weights.len() - 1
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn trained_on(&self) -> usize {
        self.trained_on
    }

    fn augmented(x: &[f64]) -> Vec<f64> {
        let mut v = Vec::with_capacity(x.len() + 1);
        v.push(1.0);
        v.extend_from_slice(x);
        v
    }

    /// Fit to labelled rows, starting from the current weights.
    pub fn fit(&mut self, xs: &[Vec<f64>], ys: &[bool]) -> Result<()> {
        if xs.len() != ys.len() {
            return Err(MeridianError::DataQuality(format!(
                "{} feature rows for {} labels",
                xs.len(),
                ys.len()
            )));
        }
        let dim = self.weights.len();
        if let Some(bad) = xs.iter().find(|x| x.len() + 1 != dim) {
            return Err(MeridianError::DataQuality(format!(
                "feature row of width {} for model of width {}",
                bad.len(),
                dim - 1
            )));
        }

        let rows: Vec<Vec<f64>> = xs.iter().map(|x| Self::augmented(x)).collect();
        let mut hessian = linalg::identity(dim);

        for _ in 0..MAX_NEWTON_ITERATIONS {
            let mut grad: Vec<f64> = self
                .weights
                .iter()
                .zip(&self.prior_mean)
                .map(|(w, m)| self.prior_precision * (w - m))
                .collect();
            hessian = linalg::identity(dim);
            for row in hessian.iter_mut() {
                for v in row.iter_mut() {
                    *v *= self.prior_precision;
                }
            }

            for (x, &y) in rows.iter().zip(ys) {
                let p = sigmoid(linalg::dot(&self.weights, x));
                let residual = p - if y { 1.0 } else { 0.0 };
                let w = (p * (1.0 - p)).max(1e-10);
                for i in 0..dim {
                    grad[i] += residual * x[i];
                    for j in 0..dim {
                        hessian[i][j] += w * x[i] * x[j];
                    }
                }
            }

            let step = linalg::solve(&hessian, &grad)?;
            let mut max_step = 0.0_f64;
            for (w, s) in self.weights.iter_mut().zip(&step) {
                *w -= s;
                max_step = max_step.max(s.abs());
            }
            if max_step < CONVERGENCE_TOLERANCE {
                break;
            }
        }

        self.covariance = linalg::invert(&hessian)?;
        self.trained_on = xs.len();
        Ok(())
    }

    pub fn logit(&self, x: &[f64]) -> f64 {
        self.weights[0]
            + self.weights[1..]
                .iter()
                .zip(x)
                .map(|(w, v)| w * v)
                .sum::<f64>()
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        sigmoid(self.logit(x))
    }

    /// Probability with a Laplace-approximate interval.
    pub fn predict_interval(&self, x: &[f64], level: f64) -> (f64, ConfidenceInterval) {
        let aug = Self::augmented(x);
        let z = self.logit(x);
        let se = linalg::quadratic_form(&self.covariance, &aug).max(0.0).sqrt();
        let half = z_value(level) * se;
        (
            sigmoid(z),
            ConfidenceInterval::new(sigmoid(z - half), sigmoid(z + half), level),
        )
    }

    /// Per-feature logit contributions `w_i * x_i` (intercept excluded).
    pub fn contributions(&self, x: &[f64]) -> Vec<f64> {
        self.weights[1..].iter().zip(x).map(|(w, v)| w * v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_symmetry() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!((sigmoid(3.0) + sigmoid(-3.0) - 1.0).abs() < 1e-12);
        assert!(sigmoid(-800.0) >= 0.0);
    }

    #[test]
    fn test_unfit_model_is_prior() {
        let model = LogisticModel::with_prior(vec![-1.0, 2.0], 1.0);
        assert!((model.logit(&[1.0]) - 1.0).abs() < 1e-12);
        assert_eq!(model.trained_on(), 0);
    }

    #[test]
    fn test_fit_learns_direction() {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for i in 0..200 {
            let x = (i as f64 - 100.0) / 25.0;
            xs.push(vec![x]);
            // noisy threshold at 0
            ys.push(if i % 10 == 0 { x < 0.0 } else { x > 0.0 });
        }
        let mut model = LogisticModel::ridge(1, 0.1);
        model.fit(&xs, &ys).unwrap();
        assert!(model.weights()[1] > 0.5);
        assert!(model.predict(&[3.0]) > 0.8);
        assert!(model.predict(&[-3.0]) < 0.2);
    }

    #[test]
    fn test_interval_shrinks_after_fit() {
        let prior = LogisticModel::ridge(1, 1.0);
        let (_, wide) = prior.predict_interval(&[1.0], 0.95);

        let xs: Vec<Vec<f64>> = (0..400).map(|i| vec![(i % 4) as f64 / 3.0]).collect();
        let ys: Vec<bool> = (0..400).map(|i| i % 3 == 0).collect();
        let mut fitted = LogisticModel::ridge(1, 1.0);
        fitted.fit(&xs, &ys).unwrap();
        let (_, narrow) = fitted.predict_interval(&[1.0], 0.95);
        assert!(narrow.width() < wide.width());
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let mut model = LogisticModel::ridge(2, 1.0);
        let err = model.fit(&[vec![1.0]], &[true]).unwrap_err();
        assert!(matches!(err, MeridianError::DataQuality(_)));
    }
}

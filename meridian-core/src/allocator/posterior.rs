//! Beta posteriors over arm conversion rates

use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use super::types::BudgetArm;
use crate::stats::{beta_credible_interval, beta_posterior};
use crate::types::{ArmId, ConfidenceInterval};

/// Beta(1 + conversions, 1 + trials - conversions) for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmPosterior {
    pub arm_id: ArmId,
    pub alpha: f64,
    pub beta: f64,
    pub credible_interval: ConfidenceInterval,
}

impl ArmPosterior {
    pub fn from_arm(arm: &BudgetArm, level: f64) -> Self {
        let (alpha, beta) = beta_posterior(arm.observed_conversions, arm.trials());
        Self {
            arm_id: arm.arm_id.clone(),
            alpha,
            beta,
            credible_interval: beta_credible_interval(alpha, beta, level),
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    fn sampler(&self) -> Option<Beta<f64>> {
        Beta::new(self.alpha, self.beta).ok()
    }
}

/// Estimate each arm's chance of having the highest weighted rate.
///
/// Each draw samples every posterior, scales it by the arm's weight and
/// credits the winner; ties go to the lower index.
pub fn prob_best<R: Rng + ?Sized>(
    posteriors: &[ArmPosterior],
    weights: &[f64],
    draws: usize,
    rng: &mut R,
) -> Vec<f64> {
    let n = posteriors.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 || draws == 0 {
        return vec![1.0 / n as f64; n];
    }
    let samplers: Vec<Option<Beta<f64>>> = posteriors.iter().map(ArmPosterior::sampler).collect();
    let mut wins = vec![0usize; n];
    for _ in 0..draws {
        let mut best = 0;
        let mut best_value = f64::NEG_INFINITY;
        for (i, (posterior, sampler)) in posteriors.iter().zip(&samplers).enumerate() {
            let rate = match sampler {
                Some(s) => s.sample(rng),
                None => posterior.mean(),
            };
            let value = rate * weights.get(i).copied().unwrap_or(1.0);
            if value > best_value {
                best = i;
                best_value = value;
            }
        }
        wins[best] += 1;
    }
    wins.into_iter().map(|w| w as f64 / draws as f64).collect()
}

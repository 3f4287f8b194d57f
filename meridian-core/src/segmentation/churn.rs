//! 30/60/90-day churn risk
//!
//! Labels come from the event history itself. For a horizon of `h` days,
//! features are taken as of `as_of - h` and a profile is labelled churned
//! when it has no activity in `(as_of - h, as_of]`. One ridge logistic
//! model is fitted per horizon.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::features::{FEATURE_COUNT, Scaler, active_between, extract};
use crate::error::{MeridianError, Result};
use crate::guard::RunGuard;
use crate::predictor::Predictor;
use crate::stats::{LogisticModel, auc};
use crate::types::Event;

/// Churn horizons in days
pub const HORIZONS: [u32; 3] = [30, 60, 90];

/// Every `HOLDOUT_STRIDE`-th profile is held out for AUC
const HOLDOUT_STRIDE: usize = 5;

/// Labelled rows for one horizon
#[derive(Debug, Clone, Default)]
pub struct HorizonSample {
    pub horizon_days: u32,
    pub rows: Vec<[f64; FEATURE_COUNT]>,
    pub labels: Vec<bool>,
}

impl HorizonSample {
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l).count()
    }

    pub fn negatives(&self) -> usize {
        self.labels.len() - self.positives()
    }
}

/// Labelled history for all horizons
#[derive(Debug, Clone, Default)]
pub struct ChurnTrainingSet {
    pub horizons: Vec<HorizonSample>,
}

/// Derive churn labels for each horizon from `events`.
pub fn build_training_set(events: &[&Event], as_of: DateTime<Utc>) -> ChurnTrainingSet {
    let horizons = HORIZONS
        .iter()
        .map(|&h| {
            let cutoff = as_of - Duration::days(i64::from(h));
            let features = extract(events, cutoff);
            let active = active_between(events, cutoff, as_of);
            let labels = features
                .profile_ids
                .iter()
                .map(|p| !active.contains(p))
                .collect();
            HorizonSample {
                horizon_days: h,
                rows: features.rows,
                labels,
            }
        })
        .collect();
    ChurnTrainingSet { horizons }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HorizonModel {
    horizon_days: u32,
    scaler: Scaler,
    model: LogisticModel,
    holdout_auc: Option<f64>,
}

/// One logistic model per churn horizon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnModel {
    prior_precision: f64,
    min_profiles: usize,
    min_labels_per_class: usize,
    horizons: Vec<HorizonModel>,
}

impl ChurnModel {
    pub fn new(prior_precision: f64, min_profiles: usize, min_labels_per_class: usize) -> Self {
        Self {
            prior_precision,
            min_profiles,
            min_labels_per_class,
            horizons: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.horizons.len() == HORIZONS.len()
    }

    /// Holdout AUC per horizon, in [`HORIZONS`] order
    pub fn holdout_auc(&self) -> Vec<Option<f64>> {
        self.horizons.iter().map(|h| h.holdout_auc).collect()
    }

    fn fit_horizon(&self, sample: &HorizonSample) -> Result<HorizonModel> {
        if sample.rows.len() < self.min_profiles {
            return Err(MeridianError::insufficient(
                format!("churn profiles at {}d horizon", sample.horizon_days),
                self.min_profiles,
                sample.rows.len(),
            ));
        }
        let minority = sample.positives().min(sample.negatives());
        if minority < self.min_labels_per_class {
            return Err(MeridianError::insufficient(
                format!("churn labels at {}d horizon", sample.horizon_days),
                self.min_labels_per_class,
                minority,
            ));
        }

        let scaler = Scaler::fit(&sample.rows);
        let mut train_x = Vec::new();
        let mut train_y = Vec::new();
        let mut hold_x = Vec::new();
        let mut hold_y = Vec::new();
        for (i, (row, &label)) in sample.rows.iter().zip(&sample.labels).enumerate() {
            let x = scaler.transform(row);
            if i % HOLDOUT_STRIDE == HOLDOUT_STRIDE - 1 {
                hold_x.push(x);
                hold_y.push(label);
            } else {
                train_x.push(x);
                train_y.push(label);
            }
        }

        let mut model = LogisticModel::ridge(FEATURE_COUNT, self.prior_precision);
        model.fit(&train_x, &train_y)?;
        let scores: Vec<f64> = hold_x.iter().map(|x| model.predict(x)).collect();
        let holdout_auc = auc(&scores, &hold_y);
        debug!(
            horizon_days = sample.horizon_days,
            trained_on = train_x.len(),
            holdout = hold_x.len(),
            auc = ?holdout_auc,
            "Fitted churn horizon"
        );

        Ok(HorizonModel {
            horizon_days: sample.horizon_days,
            scaler,
            model,
            holdout_auc,
        })
    }
}

impl Predictor for ChurnModel {
    type TrainingData = ChurnTrainingSet;
    type Input = [f64; FEATURE_COUNT];
    /// Risks for 30, 60 and 90 days, non-decreasing
    type Output = [f64; 3];

    fn train(&mut self, data: &ChurnTrainingSet, guard: &RunGuard) -> Result<()> {
        let mut fitted = Vec::with_capacity(HORIZONS.len());
        for sample in &data.horizons {
            guard.check("churn")?;
            guard.charge_items::<f64>(sample.rows.len() * (FEATURE_COUNT + 1) * 2)?;
            fitted.push(self.fit_horizon(sample)?);
        }
        if fitted.len() != HORIZONS.len() {
            return Err(MeridianError::insufficient(
                "churn horizons",
                HORIZONS.len(),
                fitted.len(),
            ));
        }
        self.horizons = fitted;
        Ok(())
    }

    fn score(&self, input: &[f64; FEATURE_COUNT]) -> Result<[f64; 3]> {
        if !self.is_trained() {
            return Err(MeridianError::NotFound("trained churn model".into()));
        }
        let mut risks = [0.0; 3];
        for (risk, h) in risks.iter_mut().zip(&self.horizons) {
            *risk = h.model.predict(&h.scaler.transform(input));
        }
        // a profile gone within 30 days is also gone within 60 and 90
        risks[1] = risks[1].max(risks[0]);
        risks[2] = risks[2].max(risks[1]);
        Ok(risks)
    }

    fn confidence(&self) -> f64 {
        let aucs: Vec<f64> = self.horizons.iter().filter_map(|h| h.holdout_auc).collect();
        if aucs.is_empty() {
            return 0.0;
        }
        let mean = aucs.iter().sum::<f64>() / aucs.len() as f64;
        ((mean - 0.5) * 2.0).clamp(0.0, 1.0)
    }
}

//! Creative fatigue forecasting
//!
//! Fatigue is the probability that a creative's CTR degrades within the
//! next 7 or 14 days. Each horizon has a logistic model whose prior weights
//! encode the usual signs of overexposure: rising frequency, falling CTR,
//! saturated audience and creative age. The prior is used as-is until
//! enough labelled windows exist, then refined from history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::PredictiveConfig;
use crate::error::{MeridianError, Result};
use crate::guard::RunGuard;
use crate::predictor::Predictor;
use crate::stats::{LogisticModel, auc, mean, slope};
use crate::types::{ConfidenceInterval, CreativeDay, CreativeSeries, FatigueForecast, RiskFactor};

pub const FATIGUE_FEATURES: [&str; 6] = [
    "frequency",
    "frequency_trend",
    "ctr_change",
    "ctr_drop_from_peak",
    "audience_saturation",
    "creative_age",
];

const PRIOR_7D: [f64; 7] = [-2.0, 0.4, 3.0, -4.0, 3.0, 1.5, 0.5];
const PRIOR_14D: [f64; 7] = [-1.5, 0.4, 3.0, -4.0, 3.0, 1.5, 0.5];

/// Days averaged at each end of the window for CTR change
const CTR_EDGE_DAYS: usize = 3;

const HOLDOUT_STRIDE: usize = 5;

/// Fatigue features over the trailing `window` days of `days`.
pub fn fatigue_features(days: &[CreativeDay], audience_size: Option<u64>, window: usize) -> [f64; 6] {
    if days.is_empty() {
        return [0.0; 6];
    }
    let recent = &days[days.len().saturating_sub(window.max(1))..];
    let ctr: Vec<f64> = recent.iter().map(|d| d.ctr).collect();
    let freq: Vec<f64> = recent.iter().map(|d| d.frequency).collect();
    let edge = CTR_EDGE_DAYS.min(ctr.len());
    let head = mean(&ctr[..edge]);
    let tail = mean(&ctr[ctr.len() - edge..]);
    let peak = ctr.iter().copied().fold(0.0, f64::max);

    let ctr_change = if head > 0.0 { (tail - head) / head } else { 0.0 };
    let drop_from_peak = if peak > 0.0 {
        ((peak - tail) / peak).max(0.0)
    } else {
        0.0
    };

    let latest_frequency = freq.last().copied().unwrap_or(0.0);
    let saturation = match audience_size {
        Some(audience) if audience > 0 => {
            let impressions: u64 = days.iter().map(|d| d.impressions).sum();
            let reach = impressions as f64 / latest_frequency.max(1.0);
            (reach / audience as f64).clamp(0.0, 1.0)
        }
        _ => 0.0,
    };

    [
        latest_frequency,
        slope(&freq),
        ctr_change,
        drop_from_peak,
        saturation,
        days.len() as f64 / 30.0,
    ]
}

/// Labelled training windows for one horizon
#[derive(Debug, Clone, Default)]
pub struct FatigueWindows {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
}

impl FatigueWindows {
    fn minority(&self) -> usize {
        let pos = self.labels.iter().filter(|&&l| l).count();
        pos.min(self.labels.len() - pos)
    }
}

/// Slide over each series and label whether CTR degraded within `horizon` days.
pub fn build_windows(series: &[CreativeSeries], horizon: usize, config: &PredictiveConfig) -> FatigueWindows {
    let mut windows = FatigueWindows::default();
    let start = config.min_observation_days.max(1) - 1;
    for s in series {
        let days = &s.days;
        if days.len() <= start + horizon {
            continue;
        }
        for t in start..days.len() - horizon {
            let observed = &days[..=t];
            let trailing: Vec<f64> = observed[observed.len().saturating_sub(CTR_EDGE_DAYS)..]
                .iter()
                .map(|d| d.ctr)
                .collect();
            let future: Vec<f64> = days[t + 1..=t + horizon].iter().map(|d| d.ctr).collect();
            let baseline = mean(&trailing);
            if baseline <= 0.0 {
                continue;
            }
            let degraded = mean(&future) < (1.0 - config.degradation_threshold) * baseline;
            windows.features.push(
                fatigue_features(observed, s.audience_size, config.fatigue_window_days).to_vec(),
            );
            windows.labels.push(degraded);
        }
    }
    windows
}

/// Logistic fatigue model for the 7- and 14-day horizons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueModel {
    config: PredictiveConfig,
    model_7d: LogisticModel,
    model_14d: LogisticModel,
    auc_7d: Option<f64>,
    auc_14d: Option<f64>,
    training_windows: usize,
    trained: bool,
}

impl FatigueModel {
    /// Model that scores with the prior weights only
    pub fn prior(config: PredictiveConfig) -> Self {
        let precision = config.fatigue_prior_precision;
        Self {
            config,
            model_7d: LogisticModel::with_prior(PRIOR_7D.to_vec(), precision),
            model_14d: LogisticModel::with_prior(PRIOR_14D.to_vec(), precision),
            auc_7d: None,
            auc_14d: None,
            training_windows: 0,
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn holdout_auc(&self) -> (Option<f64>, Option<f64>) {
        (self.auc_7d, self.auc_14d)
    }

    pub fn training_windows(&self) -> usize {
        self.training_windows
    }

    fn refine(&self, prior: &[f64; 7], windows: &FatigueWindows) -> Result<(LogisticModel, Option<f64>)> {
        let mut train_x = Vec::new();
        let mut train_y = Vec::new();
        let mut hold_x = Vec::new();
        let mut hold_y = Vec::new();
        for (i, (x, &y)) in windows.features.iter().zip(&windows.labels).enumerate() {
            if i % HOLDOUT_STRIDE == HOLDOUT_STRIDE - 1 {
                hold_x.push(x.clone());
                hold_y.push(y);
            } else {
                train_x.push(x.clone());
                train_y.push(y);
            }
        }
        let mut model = LogisticModel::with_prior(prior.to_vec(), self.config.fatigue_prior_precision);
        model.fit(&train_x, &train_y)?;
        let scores: Vec<f64> = hold_x.iter().map(|x| model.predict(x)).collect();
        Ok((model, auc(&scores, &hold_y)))
    }

    /// Forecast for one creative; young creatives are refused.
    pub fn forecast(&self, series: &CreativeSeries, generated_at: DateTime<Utc>) -> Result<FatigueForecast> {
        if series.age_days() < self.config.min_observation_days {
            return Err(MeridianError::insufficient(
                format!("observed days for creative {}", series.creative_id),
                self.config.min_observation_days,
                series.age_days(),
            ));
        }
        if !series.is_ordered() {
            return Err(MeridianError::DataQuality(format!(
                "creative {} days are not in date order",
                series.creative_id
            )));
        }

        let x = fatigue_features(&series.days, series.audience_size, self.config.fatigue_window_days);
        let level = self.config.confidence_level;
        let (p7, ci7) = self.model_7d.predict_interval(&x, level);
        let (p14, ci14) = self.model_14d.predict_interval(&x, level);
        // degrading within 7 days implies degrading within 14
        let p14 = p14.max(p7);
        let ci14 = ConfidenceInterval::new(
            ci14.lower.max(ci7.lower),
            ci14.upper.max(ci7.upper),
            level,
        );

        let mut risk_factors: Vec<RiskFactor> = self
            .model_7d
            .contributions(&x)
            .into_iter()
            .zip(FATIGUE_FEATURES)
            .filter(|(c, _)| *c > 0.0)
            .map(|(contribution, name)| RiskFactor {
                name: name.to_string(),
                contribution,
            })
            .collect();
        risk_factors.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));

        Ok(FatigueForecast {
            creative_id: series.creative_id.clone(),
            fatigue_probability_7d: p7,
            fatigue_probability_14d: p14,
            confidence_interval_7d: ci7,
            confidence_interval_14d: ci14,
            risk_factors,
            generated_at,
        })
    }
}

impl Predictor for FatigueModel {
    type TrainingData = [CreativeSeries];
    type Input = CreativeSeries;
    type Output = FatigueForecast;

    fn train(&mut self, series: &[CreativeSeries], guard: &RunGuard) -> Result<()> {
        guard.check("fatigue_windows")?;
        let w7 = build_windows(series, 7, &self.config);
        let w14 = build_windows(series, 14, &self.config);
        guard.charge_items::<f64>((w7.labels.len() + w14.labels.len()) * (FATIGUE_FEATURES.len() + 1))?;

        let enough = |w: &FatigueWindows| {
            w.labels.len() >= self.config.min_training_windows
                && w.minority() >= self.config.min_labels_per_class
        };
        if !enough(&w7) || !enough(&w14) {
            info!(
                windows_7d = w7.labels.len(),
                windows_14d = w14.labels.len(),
                "Not enough labelled fatigue windows, keeping prior"
            );
            return Ok(());
        }

        guard.check("fatigue_fit")?;
        let (model_7d, auc_7d) = self.refine(&PRIOR_7D, &w7)?;
        let (model_14d, auc_14d) = self.refine(&PRIOR_14D, &w14)?;
        debug!(?auc_7d, ?auc_14d, windows = w7.labels.len(), "Refined fatigue model");

        self.model_7d = model_7d;
        self.model_14d = model_14d;
        self.auc_7d = auc_7d;
        self.auc_14d = auc_14d;
        self.training_windows = w7.labels.len();
        self.trained = true;
        Ok(())
    }

    fn score(&self, series: &CreativeSeries) -> Result<FatigueForecast> {
        self.forecast(series, Utc::now())
    }

    fn confidence(&self) -> f64 {
        match (self.trained, self.auc_7d) {
            (true, Some(a)) => ((a - 0.5) * 2.0).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap() + chrono::Duration::days(offset)
    }

    /// Frequency climbing and CTR sliding every day
    fn fatiguing(id: &str, days: usize) -> CreativeSeries {
        let mut s = CreativeSeries::new(id, "meta").with_audience(200_000);
        for i in 0..days {
            let impressions = 10_000;
            let ctr = 0.05 * (1.0 - 0.06 * i as f64).max(0.1);
            let clicks = (impressions as f64 * ctr).round() as u64;
            s.push_day(CreativeDay::from_counts(
                date(i as i64),
                impressions,
                clicks,
                100.0,
                clicks / 10,
                1.0 + 0.35 * i as f64,
            ))
            .unwrap();
        }
        s
    }

    fn steady(id: &str, days: usize) -> CreativeSeries {
        let mut s = CreativeSeries::new(id, "meta").with_audience(2_000_000);
        for i in 0..days {
            let wobble = if i % 2 == 0 { 1.03 } else { 0.97 };
            let clicks = (10_000.0 * 0.04 * wobble) as u64;
            s.push_day(CreativeDay::from_counts(date(i as i64), 10_000, clicks, 100.0, 40, 1.5))
                .unwrap();
        }
        s
    }

    /// CTR holds until day 12 then decays
    fn late_decay(id: &str, days: usize) -> CreativeSeries {
        let mut s = CreativeSeries::new(id, "meta").with_audience(300_000);
        for i in 0..days {
            let ctr = if i < 12 {
                0.05
            } else {
                0.05 * 0.92_f64.powi(i as i32 - 11)
            };
            let clicks = (10_000.0 * ctr) as u64;
            s.push_day(CreativeDay::from_counts(
                date(i as i64),
                10_000,
                clicks,
                100.0,
                clicks / 10,
                1.0 + 0.2 * i as f64,
            ))
            .unwrap();
        }
        s
    }

    #[test]
    fn test_features_capture_decline() {
        let s = fatiguing("c1", 10);
        let x = fatigue_features(&s.days, s.audience_size, 14);
        assert!(x[0] > 4.0);
        assert!(x[1] > 0.3);
        assert!(x[2] < -0.3);
        assert!(x[3] > 0.3);
        assert!((x[5] - 10.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_prior_flags_fatiguing_creative() {
        let model = FatigueModel::prior(PredictiveConfig::default());
        let f = model.forecast(&fatiguing("c1", 10), Utc::now()).unwrap();
        assert!(f.fatigue_probability_7d > 0.7, "{}", f.fatigue_probability_7d);
        assert!(f.fatigue_probability_14d >= f.fatigue_probability_7d);
        assert!(!f.risk_factors.is_empty());
        assert!(
            f.risk_factors
                .windows(2)
                .all(|w| w[0].contribution >= w[1].contribution)
        );
    }

    #[test]
    fn test_prior_calm_on_steady_creative() {
        let model = FatigueModel::prior(PredictiveConfig::default());
        let f = model.forecast(&steady("c2", 10), Utc::now()).unwrap();
        assert!(f.fatigue_probability_7d < 0.5, "{}", f.fatigue_probability_7d);
    }

    #[test]
    fn test_young_creative_refused() {
        let model = FatigueModel::prior(PredictiveConfig::default());
        let err = model.forecast(&steady("c3", 3), Utc::now()).unwrap_err();
        assert!(matches!(err, MeridianError::InsufficientData { .. }));
    }

    #[test]
    fn test_training_refines_prior() {
        let mut history = Vec::new();
        for i in 0..10 {
            history.push(late_decay(&format!("decay-{i}"), 30));
            history.push(steady(&format!("steady-{i}"), 30));
        }
        let mut model = FatigueModel::prior(PredictiveConfig::default());
        model.train(&history, &RunGuard::unbounded("test")).unwrap();
        assert!(model.is_trained());
        let (auc_7d, auc_14d) = model.holdout_auc();
        assert!(auc_7d.unwrap() > 0.75);
        assert!(auc_14d.unwrap() > 0.65);
        assert!(model.confidence() > 0.0);
    }

    #[test]
    fn test_short_history_keeps_prior() {
        let history = vec![steady("s", 12)];
        let mut model = FatigueModel::prior(PredictiveConfig::default());
        model.train(&history, &RunGuard::unbounded("test")).unwrap();
        assert!(!model.is_trained());
        assert_eq!(model.confidence(), 0.0);
    }
}

//! Predictive intelligence configuration and run output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::calibration::CalibrationTrend;
use crate::types::{FatigueForecast, LtvPrediction};

/// Fatigue and LTV forecasting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictiveConfig {
    /// Trailing days used to build fatigue features
    pub fatigue_window_days: usize,
    /// Creatives with fewer observed days are not scored
    pub min_observation_days: usize,
    /// Relative CTR decline that counts as fatigue
    pub degradation_threshold: f64,
    /// Labelled windows needed before the prior is refined
    pub min_training_windows: usize,
    pub min_labels_per_class: usize,
    /// Strength of the pull towards the prior weights
    pub fatigue_prior_precision: f64,
    pub confidence_level: f64,
    pub ltv_horizon_days: u32,
    /// Revenue run-rate window
    pub ltv_lookback_days: u32,
    /// Cached fatigue model is retrained after this age
    pub model_max_age_hours: u64,
    /// Hard deadline for one online fatigue score
    pub online_timeout_ms: u64,
    /// Runs kept for the calibration trend
    pub calibration_history: usize,
    /// Slope per run below which accuracy counts as stable
    pub calibration_tolerance: f64,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            fatigue_window_days: 14,
            min_observation_days: 5,
            degradation_threshold: 0.2,
            min_training_windows: 40,
            min_labels_per_class: 5,
            fatigue_prior_precision: 4.0,
            confidence_level: 0.95,
            ltv_horizon_days: 90,
            ltv_lookback_days: 90,
            model_max_age_hours: 24,
            online_timeout_ms: 500,
            calibration_history: 10,
            calibration_tolerance: 0.02,
        }
    }
}

/// Acceptance metrics for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveSummary {
    pub fatigue_auc_7d: Option<f64>,
    pub fatigue_auc_14d: Option<f64>,
    /// Whether the fatigue model was refined from data or is the prior
    pub fatigue_trained: bool,
    pub training_windows: usize,
    pub ltv_rmse_pct: Option<f64>,
    pub calibration_trend: CalibrationTrend,
    pub creatives_scored: usize,
    pub creatives_excluded: usize,
    #[serde(default)]
    pub creatives_quarantined: usize,
}

/// A creative set aside because its series could not be trusted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedCreative {
    pub creative_id: String,
    pub reason: String,
}

/// Everything one predictive run publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictiveOutput {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub fatigue: Vec<FatigueForecast>,
    /// Creatives below the minimum observation window
    pub excluded_creatives: Vec<String>,
    /// Creatives with malformed series; neither trained on nor scored
    #[serde(default)]
    pub quarantined_creatives: Vec<QuarantinedCreative>,
    pub ltv: Vec<LtvPrediction>,
    pub summary: PredictiveSummary,
}

impl PredictiveOutput {
    pub fn fatigue_for(&self, creative_id: &str) -> Option<&FatigueForecast> {
        self.fatigue.iter().find(|f| f.creative_id == creative_id)
    }

    pub fn ltv_for(&self, segment_id: usize) -> Option<&LtvPrediction> {
        self.ltv.iter().find(|l| l.segment_id == segment_id)
    }
}

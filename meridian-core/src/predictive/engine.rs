//! Predictive intelligence runs and online fatigue scoring

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::calibration::{CalibrationPoint, CalibrationTracker, CalibrationTrend};
use super::fatigue::FatigueModel;
use super::ltv::{LtvModel, MemberRevenue, build_dataset};
use super::types::{PredictiveConfig, PredictiveOutput, PredictiveSummary, QuarantinedCreative};
use crate::error::{MeridianError, Result};
use crate::governance::ingest;
use crate::guard::RunGuard;
use crate::predictor::Predictor;
use crate::segmentation::SegmentationOutput;
use crate::types::{CreativeSeries, Event, FatigueForecast};

#[derive(Debug)]
struct CachedFatigue {
    model: Arc<FatigueModel>,
    trained_at: DateTime<Utc>,
}

/// Forecasts fatigue and LTV, and serves cached fatigue scores online
#[derive(Debug)]
pub struct PredictiveEngine {
    config: PredictiveConfig,
    cache: RwLock<Option<CachedFatigue>>,
    retrain_requested: AtomicBool,
    calibration: Mutex<CalibrationTracker>,
}

impl PredictiveEngine {
    pub fn new(config: PredictiveConfig) -> Self {
        let calibration =
            CalibrationTracker::new(config.calibration_history, config.calibration_tolerance);
        Self {
            config,
            cache: RwLock::new(None),
            retrain_requested: AtomicBool::new(false),
            calibration: Mutex::new(calibration),
        }
    }

    pub fn config(&self) -> &PredictiveConfig {
        &self.config
    }

    /// Force the next batch run to retrain instead of reusing the cache.
    pub fn request_retrain(&self) {
        self.retrain_requested.store(true, Ordering::SeqCst);
    }

    /// Whether the cached fatigue model is missing, too old, or flagged.
    pub fn needs_retrain(&self, now: DateTime<Utc>) -> bool {
        if self.retrain_requested.load(Ordering::SeqCst) {
            return true;
        }
        let max_age = Duration::hours(self.config.model_max_age_hours as i64);
        match self.cache.read() {
            Ok(guard) => guard
                .as_ref()
                .is_none_or(|c| now - c.trained_at > max_age),
            Err(_) => true,
        }
    }

    pub fn calibration_trend(&self) -> CalibrationTrend {
        self.calibration
            .lock()
            .map(|t| t.trend())
            .unwrap_or(CalibrationTrend::Insufficient)
    }

    fn cached_model(&self) -> Option<Arc<FatigueModel>> {
        self.cache
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(|c| Arc::clone(&c.model)))
    }

    fn store_model(&self, model: Arc<FatigueModel>, trained_at: DateTime<Utc>) {
        match self.cache.write() {
            Ok(mut slot) => {
                *slot = Some(CachedFatigue { model, trained_at });
                self.retrain_requested.store(false, Ordering::SeqCst);
            }
            Err(_) => warn!("Fatigue model cache poisoned, model not cached"),
        }
    }

    /// Train or reuse the fatigue model, then forecast fatigue and LTV.
    ///
    /// Creatives whose days are out of order are quarantined and the run
    /// continues on the rest.
    #[instrument(skip_all, fields(creatives = series.len(), events = events.len()))]
    pub fn run(
        &self,
        series: &[CreativeSeries],
        events: &[Event],
        segmentation: Option<&SegmentationOutput>,
        now: DateTime<Utc>,
        guard: &RunGuard,
    ) -> Result<PredictiveOutput> {
        guard.check("predictive")?;
        let mut valid = Vec::with_capacity(series.len());
        let mut quarantined = Vec::new();
        for s in series {
            if s.is_ordered() {
                valid.push(s.clone());
            } else {
                quarantined.push(QuarantinedCreative {
                    creative_id: s.creative_id.clone(),
                    reason: "days are not in date order".into(),
                });
            }
        }

        // accuracy is recorded only once the whole run has passed
        let mut holdout_accuracy = None;
        let model = match self.cached_model() {
            Some(model) if !self.needs_retrain(now) => {
                debug!("Reusing cached fatigue model");
                model
            }
            _ => {
                let mut model = FatigueModel::prior(self.config.clone());
                model.train(&valid, guard)?;
                holdout_accuracy = model.holdout_auc().0;
                Arc::new(model)
            }
        };

        guard.charge_items::<FatigueForecast>(valid.len())?;
        let mut fatigue = Vec::new();
        let mut excluded = Vec::new();
        for s in &valid {
            guard.check("fatigue_score")?;
            if s.age_days() < self.config.min_observation_days {
                excluded.push(s.creative_id.clone());
                continue;
            }
            match model.forecast(s, now) {
                Ok(forecast) => fatigue.push(forecast),
                Err(MeridianError::DataQuality(reason)) => quarantined.push(QuarantinedCreative {
                    creative_id: s.creative_id.clone(),
                    reason,
                }),
                Err(e) => return Err(e),
            }
        }
        if !excluded.is_empty() {
            debug!(excluded = excluded.len(), "Creatives below observation window");
        }
        if !quarantined.is_empty() {
            warn!(quarantined = quarantined.len(), "Creatives quarantined");
        }

        let mut ltv = Vec::new();
        let mut ltv_rmse_pct = None;
        if let Some(seg) = segmentation {
            guard.check("ltv")?;
            let report = ingest(events, now);
            let dataset = build_dataset(
                &report.accepted,
                seg,
                self.config.ltv_horizon_days,
                self.config.ltv_lookback_days,
            );
            guard.charge_items::<MemberRevenue>(dataset.members.len())?;
            let mut ltv_model = LtvModel::new(self.config.confidence_level);
            ltv_model.train(&dataset, guard)?;
            if !dataset.members.is_empty() {
                ltv = ltv_model.score(&dataset)?;
            }
            ltv_rmse_pct = ltv_model.backtest_rmse_pct();
        }
        guard.check("publish")?;

        if let Some(accuracy) = holdout_accuracy {
            self.record_accuracy(accuracy, now);
        }
        let (fatigue_auc_7d, fatigue_auc_14d) = model.holdout_auc();
        let fatigue_trained = model.is_trained();
        let training_windows = model.training_windows();
        if !self.cached_model().is_some_and(|m| Arc::ptr_eq(&m, &model)) {
            self.store_model(Arc::clone(&model), now);
        }

        let summary = PredictiveSummary {
            fatigue_auc_7d,
            fatigue_auc_14d,
            fatigue_trained,
            training_windows,
            ltv_rmse_pct,
            calibration_trend: self.calibration_trend(),
            creatives_scored: fatigue.len(),
            creatives_excluded: excluded.len(),
            creatives_quarantined: quarantined.len(),
        };
        info!(
            scored = summary.creatives_scored,
            excluded = summary.creatives_excluded,
            quarantined = summary.creatives_quarantined,
            auc_7d = ?summary.fatigue_auc_7d,
            ltv_rmse_pct = ?summary.ltv_rmse_pct,
            "Predictive run complete"
        );

        Ok(PredictiveOutput {
            run_id: Uuid::now_v7(),
            generated_at: now,
            fatigue,
            excluded_creatives: excluded,
            quarantined_creatives: quarantined,
            ltv,
            summary,
        })
    }

    fn record_accuracy(&self, accuracy: f64, now: DateTime<Utc>) {
        if let Ok(mut tracker) = self.calibration.lock() {
            tracker.record(accuracy, now);
        }
    }

    /// Recorded holdout accuracy, oldest first.
    pub fn calibration_history(&self) -> Vec<CalibrationPoint> {
        self.calibration
            .lock()
            .map(|t| t.history().copied().collect())
            .unwrap_or_default()
    }

    /// Score one creative against the cached model, or the prior if none.
    ///
    /// Scoring runs on the blocking pool under the online deadline; a late
    /// score is a failure, not a slow success.
    pub async fn score_online(&self, series: CreativeSeries, now: DateTime<Utc>) -> Result<FatigueForecast> {
        let model = self
            .cached_model()
            .unwrap_or_else(|| Arc::new(FatigueModel::prior(self.config.clone())));
        let limit_ms = self.config.online_timeout_ms;
        let limit = StdDuration::from_millis(limit_ms);
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || model.forecast(&series, now));
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) if started.elapsed() < limit => result,
            Ok(Err(join)) => Err(MeridianError::ChannelClosed(format!("fatigue score task: {join}"))),
            _ => {
                warn!(limit_ms, "Online fatigue score timed out");
                Err(MeridianError::Timeout {
                    operation: "fatigue score".into(),
                    limit_ms,
                })
            }
        }
    }
}

impl Default for PredictiveEngine {
    fn default() -> Self {
        Self::new(PredictiveConfig::default())
    }
}

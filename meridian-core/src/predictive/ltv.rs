//! Segment lifetime-value forecasting
//!
//! Each member's forward value is their revenue run-rate over the lookback
//! window, projected over the horizon and discounted by the chance they
//! churn part-way through. A segment's forecast is the member mean with a
//! normal-approximation interval.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MeridianError, Result};
use crate::guard::RunGuard;
use crate::predictor::Predictor;
use crate::segmentation::SegmentationOutput;
use crate::stats::{mean, normal_interval, rmse_pct, std_dev};
use crate::types::{Event, LtvPrediction};

/// Revenue observations for one segment member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRevenue {
    pub profile_id: String,
    pub segment_id: usize,
    /// Revenue in `(as_of - lookback, as_of]`
    pub recent_revenue: f64,
    /// Revenue in the lookback window ending one horizon before `as_of`
    pub backtest_revenue: f64,
    /// Revenue in `(as_of - horizon, as_of]`
    pub realised_revenue: f64,
    pub churn_risk_90d: f64,
}

/// Member revenue for one forecast run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LtvDataset {
    pub as_of: DateTime<Utc>,
    pub horizon_days: u32,
    pub lookback_days: u32,
    /// History reaches back far enough for a one-horizon backtest
    pub backtest_available: bool,
    pub members: Vec<MemberRevenue>,
}

fn revenue_between<'a>(
    totals: &mut BTreeMap<&'a str, [f64; 3]>,
    slot: usize,
    event: &'a Event,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) {
    if event.timestamp > from && event.timestamp <= to {
        totals.entry(event.profile_id.as_str()).or_default()[slot] += event.revenue;
    }
}

/// Gather member revenue for every profile assigned to a segment.
pub fn build_dataset(
    events: &[&Event],
    segmentation: &SegmentationOutput,
    horizon_days: u32,
    lookback_days: u32,
) -> LtvDataset {
    let as_of = segmentation.as_of;
    let horizon = Duration::days(i64::from(horizon_days));
    let lookback = Duration::days(i64::from(lookback_days));
    let backtest_cutoff = as_of - horizon;

    let mut totals: BTreeMap<&str, [f64; 3]> = BTreeMap::new();
    let mut earliest: Option<DateTime<Utc>> = None;
    for event in events.iter().filter(|e| e.timestamp <= as_of) {
        earliest = Some(earliest.map_or(event.timestamp, |t| t.min(event.timestamp)));
        revenue_between(&mut totals, 0, event, as_of - lookback, as_of);
        revenue_between(&mut totals, 1, event, backtest_cutoff - lookback, backtest_cutoff);
        revenue_between(&mut totals, 2, event, backtest_cutoff, as_of);
    }

    let members = segmentation
        .assignments
        .iter()
        .map(|(profile, &segment_id)| {
            let [recent, backtest, realised] = totals.get(profile.as_str()).copied().unwrap_or_default();
            MemberRevenue {
                profile_id: profile.clone(),
                segment_id,
                recent_revenue: recent,
                backtest_revenue: backtest,
                realised_revenue: realised,
                churn_risk_90d: segmentation
                    .churn_for(profile)
                    .map(|c| c.risk_90d)
                    .unwrap_or(0.0),
            }
        })
        .collect();

    LtvDataset {
        as_of,
        horizon_days,
        lookback_days,
        backtest_available: earliest.is_some_and(|t| t <= backtest_cutoff - lookback),
        members,
    }
}

/// Run-rate LTV model with churn discounting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LtvModel {
    level: f64,
    backtest_rmse_pct: Option<f64>,
    trained: bool,
}

impl LtvModel {
    pub fn new(level: f64) -> Self {
        Self {
            level,
            backtest_rmse_pct: None,
            trained: false,
        }
    }

    pub fn backtest_rmse_pct(&self) -> Option<f64> {
        self.backtest_rmse_pct
    }

    /// Projected horizon value for one member from `window_revenue`.
    ///
    /// Churn is assumed uniform over the horizon, so a churner is active
    /// for half of it on average.
    pub fn member_value(window_revenue: f64, lookback_days: u32, horizon_days: u32, churn_risk: f64) -> f64 {
        if lookback_days == 0 {
            return 0.0;
        }
        let rate = window_revenue / f64::from(lookback_days);
        rate * f64::from(horizon_days) * (1.0 - churn_risk.clamp(0.0, 1.0) / 2.0)
    }

    fn by_segment(members: &[MemberRevenue]) -> BTreeMap<usize, Vec<&MemberRevenue>> {
        let mut groups: BTreeMap<usize, Vec<&MemberRevenue>> = BTreeMap::new();
        for m in members {
            groups.entry(m.segment_id).or_default().push(m);
        }
        groups
    }
}

impl Predictor for LtvModel {
    type TrainingData = LtvDataset;
    type Input = LtvDataset;
    type Output = Vec<LtvPrediction>;

    fn train(&mut self, data: &LtvDataset, guard: &RunGuard) -> Result<()> {
        guard.check("ltv_backtest")?;
        self.trained = true;
        if !data.backtest_available {
            self.backtest_rmse_pct = None;
            debug!("History too short for an LTV backtest");
            return Ok(());
        }
        let mut predicted = Vec::new();
        let mut actual = Vec::new();
        for members in Self::by_segment(&data.members).values() {
            let values: Vec<f64> = members
                .iter()
                .map(|m| {
                    Self::member_value(
                        m.backtest_revenue,
                        data.lookback_days,
                        data.horizon_days,
                        m.churn_risk_90d,
                    )
                })
                .collect();
            let realised: Vec<f64> = members.iter().map(|m| m.realised_revenue).collect();
            predicted.push(mean(&values));
            actual.push(mean(&realised));
        }
        self.backtest_rmse_pct = Some(rmse_pct(&predicted, &actual));
        debug!(rmse_pct = ?self.backtest_rmse_pct, segments = predicted.len(), "LTV backtest");
        Ok(())
    }

    fn score(&self, data: &LtvDataset) -> Result<Vec<LtvPrediction>> {
        if data.members.is_empty() {
            return Err(MeridianError::insufficient("LTV segment members", 1, 0));
        }
        let level = if self.level > 0.0 { self.level } else { 0.95 };
        Ok(Self::by_segment(&data.members)
            .into_iter()
            .map(|(segment_id, members)| {
                let values: Vec<f64> = members
                    .iter()
                    .map(|m| {
                        Self::member_value(
                            m.recent_revenue,
                            data.lookback_days,
                            data.horizon_days,
                            m.churn_risk_90d,
                        )
                    })
                    .collect();
                let value = mean(&values);
                let se = std_dev(&values) / (values.len() as f64).sqrt();
                let mut ci = normal_interval(value, se, level);
                ci.lower = ci.lower.max(0.0);
                LtvPrediction {
                    segment_id,
                    horizon_days: data.horizon_days,
                    value,
                    confidence_interval: ci,
                    members: members.len(),
                    generated_at: data.as_of,
                }
            })
            .collect())
    }

    fn confidence(&self) -> f64 {
        match (self.trained, self.backtest_rmse_pct) {
            (true, Some(r)) => (1.0 - r).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

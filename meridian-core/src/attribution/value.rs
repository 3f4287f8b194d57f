//! Channel ROI and customer lifetime value
//!
//! ROI intervals come from a seeded bootstrap over profiles: each replicate
//! resamples whole journeys, so revenue and the spend those profiles
//! generated move together. Committed ledger spend is not tied to a
//! profile and is held fixed across replicates.
//!
//! CLV treats each profile's purchase count as Poisson with a Gamma prior
//! on the daily rate. The posterior mean rate times the horizon gives
//! expected purchases, valued at the profile's average order value.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::touch::{Credit, Journey, Journeys};
use super::types::{AttributionConfig, AttributionResult, CampaignMeta, ClvResult};
use crate::allocator::LedgerEntry;
use crate::error::{MeridianError, Result};
use crate::guard::RunGuard;
use crate::predictor::Predictor;
use crate::stats::{gamma_interval, mean, quantile, rmse_pct};
use crate::types::{ConfidenceInterval, Event};

/// Return on spend; 0 when nothing was spent.
pub fn roi(revenue: f64, spend: f64) -> f64 {
    if spend > 0.0 {
        (revenue - spend) / spend
    } else {
        0.0
    }
}

/// Channel owning a ledger entry: by campaign, then by arm, then the arm itself.
pub fn ledger_channel<'a>(entry: &'a LedgerEntry, campaigns: &'a [CampaignMeta]) -> &'a str {
    campaigns
        .iter()
        .find(|c| c.campaign_id == entry.campaign_id)
        .or_else(|| campaigns.iter().find(|c| c.arm_ids.contains(&entry.arm_id)))
        .map(|c| c.channel.as_str())
        .unwrap_or_else(|| entry.arm_id.as_str())
}

/// Committed allocator spend per channel.
pub fn ledger_spend_by_channel(ledger: &[LedgerEntry], campaigns: &[CampaignMeta]) -> BTreeMap<String, f64> {
    let mut spend = BTreeMap::new();
    for entry in ledger {
        *spend
            .entry(ledger_channel(entry, campaigns).to_string())
            .or_insert(0.0) += entry.amount;
    }
    spend
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Cell {
    revenue: f64,
    conversions: f64,
    spend: f64,
}

/// Per-profile, per-channel totals ready for resampling
#[derive(Debug, Clone, Default)]
pub struct ChannelPanel {
    channels: Vec<String>,
    /// Sparse `(channel index, totals)` rows, one per profile
    rows: Vec<Vec<(usize, Cell)>>,
    fixed_spend: Vec<f64>,
}

impl ChannelPanel {
    /// Assemble credited revenue, event spend and ledger spend.
    ///
    /// `credits[i]` belongs to `journeys.journeys[i]`.
    pub fn build(
        journeys: &Journeys,
        credits: &[Vec<Credit>],
        events: &[&Event],
        ledger_spend: &BTreeMap<String, f64>,
    ) -> Self {
        let mut names: BTreeMap<&str, usize> = BTreeMap::new();
        for c in credits.iter().flatten() {
            names.entry(c.channel.as_str()).or_insert(0);
        }
        for e in events.iter().filter(|e| e.spend > 0.0) {
            names.entry(e.channel.as_str()).or_insert(0);
        }
        for channel in ledger_spend.keys() {
            names.entry(channel.as_str()).or_insert(0);
        }
        let channels: Vec<String> = names.keys().map(|s| s.to_string()).collect();
        for (i, slot) in names.values_mut().enumerate() {
            *slot = i;
        }

        let row_of: BTreeMap<&str, usize> = journeys
            .journeys
            .iter()
            .enumerate()
            .map(|(i, j)| (j.profile_id.as_str(), i))
            .collect();
        let mut dense: Vec<BTreeMap<usize, Cell>> = vec![BTreeMap::new(); journeys.journeys.len()];
        for (row, profile_credits) in dense.iter_mut().zip(credits) {
            for c in profile_credits {
                let cell = row.entry(names[c.channel.as_str()]).or_default();
                cell.revenue += c.revenue;
                cell.conversions += c.conversions;
            }
        }
        for e in events.iter().filter(|e| e.spend > 0.0) {
            if let Some(&row) = row_of.get(e.profile_id.as_str()) {
                dense[row].entry(names[e.channel.as_str()]).or_default().spend += e.spend;
            }
        }

        let fixed_spend = channels
            .iter()
            .map(|c| ledger_spend.get(c).copied().unwrap_or(0.0))
            .collect();
        Self {
            channels,
            rows: dense.into_iter().map(|r| r.into_iter().collect()).collect(),
            fixed_spend,
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    fn totals<'a>(&self, rows: impl Iterator<Item = &'a Vec<(usize, Cell)>>) -> Vec<Cell> {
        let mut totals: Vec<Cell> = self
            .fixed_spend
            .iter()
            .map(|&spend| Cell {
                spend,
                ..Cell::default()
            })
            .collect();
        for row in rows {
            for (channel, cell) in row {
                let t = &mut totals[*channel];
                t.revenue += cell.revenue;
                t.conversions += cell.conversions;
                t.spend += cell.spend;
            }
        }
        totals
    }

    /// ROI per channel with percentile bootstrap intervals, sorted by channel.
    pub fn roi(&self, level: f64, samples: usize, seed: u64, guard: &RunGuard) -> Result<Vec<AttributionResult>> {
        let point = self.totals(self.rows.iter());
        let n = self.rows.len();
        guard.charge_items::<f64>(samples.saturating_mul(self.channels.len()))?;

        let replicates: Vec<Vec<f64>> = if n == 0 || samples == 0 {
            Vec::new()
        } else {
            (0..samples)
                .into_par_iter()
                .map(|b| {
                    let mut rng = StdRng::seed_from_u64(seed ^ (b as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
                    let draws = (0..n).map(|_| &self.rows[rng.gen_range(0..n)]);
                    self.totals(draws)
                        .iter()
                        .map(|t| roi(t.revenue, t.spend))
                        .collect()
                })
                .collect()
        };
        guard.check("roi_bootstrap")?;

        let tail = (1.0 - level) / 2.0;
        Ok(self
            .channels
            .iter()
            .enumerate()
            .map(|(c, channel)| {
                let t = point[c];
                let value = roi(t.revenue, t.spend);
                let confidence_interval = if replicates.is_empty() || t.spend <= 0.0 {
                    ConfidenceInterval::point(value, level)
                } else {
                    let draws: Vec<f64> = replicates.iter().map(|r| r[c]).collect();
                    ConfidenceInterval::new(quantile(&draws, tail), quantile(&draws, 1.0 - tail), level)
                };
                AttributionResult {
                    channel: channel.clone(),
                    value,
                    confidence_interval,
                    attributed_revenue: t.revenue,
                    attributed_conversions: t.conversions,
                    spend: t.spend,
                }
            })
            .collect())
    }
}

/// Purchase history for one profile up to a cutoff
#[derive(Debug, Clone, Copy, PartialEq)]
struct History {
    purchases: usize,
    revenue: f64,
    observed_days: f64,
}

fn history(journey: &Journey, cutoff: DateTime<Utc>) -> Option<History> {
    let first = journey
        .touches
        .iter()
        .map(|t| t.timestamp)
        .chain(journey.conversions.iter().map(|c| c.timestamp))
        .filter(|t| *t <= cutoff)
        .min()?;
    let before: Vec<_> = journey
        .conversions
        .iter()
        .filter(|c| c.timestamp <= cutoff)
        .collect();
    Some(History {
        purchases: before.len(),
        revenue: before.iter().map(|c| c.revenue).sum(),
        observed_days: ((cutoff - first).num_seconds() as f64 / 86_400.0).max(1.0),
    })
}

/// Gamma–Poisson customer value model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClvModel {
    as_of: DateTime<Utc>,
    horizon_days: u32,
    prior_shape: f64,
    prior_rate: f64,
    level: f64,
    /// Order value used for profiles that have never purchased
    population_aov: f64,
    backtest_rmse_pct: Option<f64>,
    trained: bool,
}

impl ClvModel {
    pub fn new(config: &AttributionConfig, as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            horizon_days: config.clv_horizon_days,
            prior_shape: config.clv_prior_shape.max(1e-3),
            prior_rate: config.clv_prior_rate.max(1e-3),
            level: config.confidence_level,
            population_aov: 0.0,
            backtest_rmse_pct: None,
            trained: false,
        }
    }

    pub fn backtest_rmse_pct(&self) -> Option<f64> {
        self.backtest_rmse_pct
    }

    fn aov(&self, h: &History, population_aov: f64) -> f64 {
        if h.purchases > 0 {
            h.revenue / h.purchases as f64
        } else {
            population_aov
        }
    }

    fn posterior(&self, h: &History) -> (f64, f64) {
        (self.prior_shape + h.purchases as f64, self.prior_rate + h.observed_days)
    }

    fn expected_value(&self, h: &History, population_aov: f64) -> f64 {
        let (shape, rate) = self.posterior(h);
        f64::from(self.horizon_days) * shape / rate * self.aov(h, population_aov)
    }

    fn population_aov_at(journeys: &Journeys, cutoff: DateTime<Utc>) -> f64 {
        let values: Vec<f64> = journeys
            .journeys
            .iter()
            .flat_map(|j| j.conversions.iter())
            .filter(|c| c.timestamp <= cutoff)
            .map(|c| c.revenue)
            .collect();
        mean(&values)
    }

    /// Predict one horizon from history before `as_of - horizon` and
    /// compare with realised revenue, by purchase-count cohort.
    fn backtest(&self, journeys: &Journeys) -> Option<f64> {
        let horizon = Duration::days(i64::from(self.horizon_days));
        let cutoff = self.as_of - horizon;
        let spans_two_horizons = journeys
            .journeys
            .iter()
            .filter_map(|j| history(j, cutoff))
            .any(|h| h.observed_days >= f64::from(self.horizon_days));
        if !spans_two_horizons {
            return None;
        }
        let population_aov = Self::population_aov_at(journeys, cutoff);
        let mut cohorts: BTreeMap<usize, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for journey in &journeys.journeys {
            let Some(h) = history(journey, cutoff) else {
                continue;
            };
            let realised: f64 = journey
                .conversions
                .iter()
                .filter(|c| c.timestamp > cutoff && c.timestamp <= self.as_of)
                .map(|c| c.revenue)
                .sum();
            let cohort = cohorts.entry(h.purchases.min(3)).or_default();
            cohort.0.push(self.expected_value(&h, population_aov));
            cohort.1.push(realised);
        }
        let (predicted, actual): (Vec<f64>, Vec<f64>) = cohorts
            .values()
            .map(|(p, a)| (mean(p), mean(a)))
            .unzip();
        Some(rmse_pct(&predicted, &actual))
    }
}

impl Predictor for ClvModel {
    type TrainingData = Journeys;
    type Input = Journey;
    type Output = ClvResult;

    fn train(&mut self, journeys: &Journeys, guard: &RunGuard) -> Result<()> {
        guard.check("clv_fit")?;
        self.population_aov = Self::population_aov_at(journeys, self.as_of);
        self.backtest_rmse_pct = self.backtest(journeys);
        self.trained = true;
        debug!(
            population_aov = self.population_aov,
            rmse_pct = ?self.backtest_rmse_pct,
            "Fitted CLV model"
        );
        Ok(())
    }

    fn score(&self, journey: &Journey) -> Result<ClvResult> {
        let h = history(journey, self.as_of)
            .ok_or_else(|| MeridianError::insufficient(format!("history for {}", journey.profile_id), 1, 0))?;
        let aov = self.aov(&h, self.population_aov);
        let (shape, rate) = self.posterior(&h);
        let horizon = f64::from(self.horizon_days);
        let expected_purchases = horizon * shape / rate;
        let rate_ci = gamma_interval(shape, rate, self.level);
        let scale = horizon * aov;
        Ok(ClvResult {
            profile_id: journey.profile_id.clone(),
            value: expected_purchases * aov,
            confidence_interval: ConfidenceInterval::new(rate_ci.lower * scale, rate_ci.upper * scale, self.level),
            expected_purchases,
            average_order_value: aov,
        })
    }

    fn confidence(&self) -> f64 {
        match (self.trained, self.backtest_rmse_pct) {
            (true, Some(r)) => (1.0 - r).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

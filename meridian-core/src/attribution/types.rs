//! Attribution configuration, inputs and results

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::drift::DriftBaseline;
use crate::allocator::LedgerEntry;
use crate::governance::QuarantinedEvent;
use crate::types::{ArmId, CampaignId, ConfidenceInterval, Event};

/// Attribution, customer-value and drift settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Touch credit halves every `half_life_days` before the conversion
    pub half_life_days: f64,
    /// Estimate the half-life from observed touch-to-conversion lags
    pub auto_half_life: bool,
    /// Touches older than this earn no credit
    pub lookback_days: i64,
    pub bootstrap_samples: usize,
    pub confidence_level: f64,
    pub clv_horizon_days: u32,
    /// Gamma prior shape on the daily purchase rate
    pub clv_prior_shape: f64,
    /// Gamma prior rate on the daily purchase rate, in days
    pub clv_prior_rate: f64,
    /// KL divergence at or above which drift is reported
    pub drift_threshold: f64,
    /// Dirichlet pseudo-count for KL smoothing
    pub drift_smoothing: f64,
    /// Upper edges of the spend histogram bins
    pub spend_bin_edges: Vec<f64>,
    /// Proposals wanted per run
    pub min_proposals: usize,
    /// Fraction of an entity's spend a proposal moves
    pub proposal_shift_fraction: f64,
    /// Relative distance from median ROAS that makes a strong proposal
    pub proposal_margin: f64,
    /// Largest accepted batch
    pub max_batch_events: usize,
    pub seed: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            half_life_days: 7.0,
            auto_half_life: false,
            lookback_days: 30,
            bootstrap_samples: 200,
            confidence_level: 0.95,
            clv_horizon_days: 90,
            clv_prior_shape: 0.5,
            clv_prior_rate: 30.0,
            drift_threshold: 0.1,
            drift_smoothing: 0.5,
            spend_bin_edges: vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 50.0],
            min_proposals: 5,
            proposal_shift_fraction: 0.2,
            proposal_margin: 0.1,
            max_batch_events: 5_000_000,
            seed: 42,
        }
    }
}

/// Campaign metadata mapping allocator arms to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignMeta {
    pub campaign_id: CampaignId,
    #[serde(default)]
    pub name: String,
    pub channel: String,
    #[serde(default)]
    pub arm_ids: Vec<ArmId>,
}

/// One attribution window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributionInput {
    pub events: Vec<Event>,
    #[serde(default)]
    pub campaigns: Vec<CampaignMeta>,
    /// Committed allocator spend for the window
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
    /// Reference distributions for drift checks
    #[serde(default)]
    pub baseline: Option<DriftBaseline>,
    /// Known channel ROI, for MAPE against ground truth
    #[serde(default)]
    pub reference_roi: BTreeMap<String, f64>,
}

/// Channel ROI with a bootstrap interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub channel: String,
    /// `(revenue - spend) / spend`; 0 for channels without spend
    pub value: f64,
    pub confidence_interval: ConfidenceInterval,
    pub attributed_revenue: f64,
    pub attributed_conversions: f64,
    pub spend: f64,
}

/// Forward customer value for one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClvResult {
    pub profile_id: String,
    pub value: f64,
    pub confidence_interval: ConfidenceInterval,
    pub expected_purchases: f64,
    pub average_order_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Channel,
    Campaign,
    Creative,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Campaign => "campaign",
            Self::Creative => "creative",
        }
    }
}

/// Delivery and efficiency metrics for one campaign or creative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub kind: EntityKind,
    pub id: String,
    pub impressions: u64,
    pub clicks: u64,
    /// Attributed conversions
    pub conversions: f64,
    pub spend: f64,
    /// Attributed revenue
    pub revenue: f64,
    pub cpc: Option<f64>,
    pub ctr: Option<f64>,
    pub cvr: Option<f64>,
    pub cpa: Option<f64>,
    pub roas: Option<f64>,
}

/// Ranked campaigns and creatives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub campaigns: Vec<LeaderboardEntry>,
    pub creatives: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReallocationAction {
    Increase,
    Decrease,
    Pause,
}

/// Advisory budget move; never executed by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetReallocationProposal {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub action: ReallocationAction,
    pub reason: String,
    /// Expected change in revenue from the move
    pub expected_delta: f64,
}

/// Divergence of one feature distribution from its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub feature: String,
    pub divergence: f64,
    pub threshold: f64,
    pub retrain_recommended: bool,
    pub detected_at: DateTime<Utc>,
}

/// Acceptance metrics for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionSummary {
    pub channels: usize,
    pub profiles: usize,
    pub conversions: usize,
    /// Share of conversions with at least one touch in the lookback
    pub touch_coverage: f64,
    pub half_life_days: f64,
    /// Against `reference_roi`, when supplied
    pub roi_mape: Option<f64>,
    pub clv_backtest_rmse_pct: Option<f64>,
    pub proposals: usize,
    pub proposals_below_minimum: bool,
    pub drift_alerts: usize,
    pub max_divergence: f64,
    pub quarantined: usize,
}

/// Everything one attribution run publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionOutput {
    pub run_id: Uuid,
    pub window_end: DateTime<Utc>,
    /// Sorted by channel
    pub channel_roi: Vec<AttributionResult>,
    /// Sorted by profile id
    pub clv: Vec<ClvResult>,
    pub leaderboard: Leaderboard,
    pub proposals: Vec<BudgetReallocationProposal>,
    pub drift: BTreeMap<String, f64>,
    pub drift_alerts: Vec<DriftAlert>,
    pub summary: AttributionSummary,
    #[serde(default)]
    pub quarantined: Vec<QuarantinedEvent>,
}

impl AttributionOutput {
    pub fn roi_for(&self, channel: &str) -> Option<&AttributionResult> {
        self.channel_roi.iter().find(|r| r.channel == channel)
    }

    pub fn clv_for(&self, profile_id: &str) -> Option<&ClvResult> {
        self.clv
            .binary_search_by(|c| c.profile_id.as_str().cmp(profile_id))
            .ok()
            .map(|i| &self.clv[i])
    }
}

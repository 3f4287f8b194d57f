//! Metric points, anomalies and remediation proposals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MeridianError;
use crate::types::CampaignId;

/// Most remediation actions attached to one anomaly
pub const MAX_PROPOSED_ACTIONS: usize = 2;

/// Settings for the streaming detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Rolling baseline length, in points
    pub window: usize,
    /// Points needed before a metric is scored at all
    pub warmup: usize,
    /// Flag when |robust z| reaches this
    pub z_threshold: f64,
    pub medium_z: f64,
    pub high_z: f64,
    /// Value / baseline (or its inverse) at which severity is at least medium
    pub medium_ratio: f64,
    /// Value / baseline (or its inverse) at which severity is high
    pub high_ratio: f64,
    /// Consecutive anomalies after which the new level becomes the baseline
    pub level_shift_after: usize,
    /// Scale floor as a fraction of |median|, for flat baselines
    pub min_relative_scale: f64,
    /// Predicted 7-day fatigue at or above which a consistent move is expected
    pub fatigue_suppression: f64,
    /// Anomalies on other metrics this close in time are reported together
    pub co_occurrence_secs: i64,
    /// Hard deadline per point in the online loop
    pub point_timeout_ms: u64,
    /// Bytes stored per retained point, for the cost estimate
    pub bytes_per_point: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window: 60,
            warmup: 10,
            z_threshold: 5.0,
            medium_z: 8.0,
            high_z: 12.0,
            medium_ratio: 1.5,
            high_ratio: 3.0,
            level_shift_after: 5,
            min_relative_scale: 0.01,
            fatigue_suppression: 0.6,
            co_occurrence_secs: 120,
            point_timeout_ms: 1_000,
            bytes_per_point: 48,
        }
    }
}

/// Family a metric belongs to, inferred from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Ctr,
    Clicks,
    Impressions,
    Conversions,
    Revenue,
    Spend,
    /// CPC, CPA and other cost-per metrics
    Cost,
    Other,
}

impl MetricKind {
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("ctr") {
            Self::Ctr
        } else if name.contains("cpc") || name.contains("cpa") || name.contains("cost_per") {
            Self::Cost
        } else if name.contains("spend") {
            Self::Spend
        } else if name.contains("impression") {
            Self::Impressions
        } else if name.contains("conversion") || name.contains("purchase") {
            Self::Conversions
        } else if name.contains("revenue") {
            Self::Revenue
        } else if name.contains("click") {
            Self::Clicks
        } else {
            Self::Other
        }
    }

    /// Whether creative fatigue predicts a move of this metric in `direction`.
    pub fn fatigue_consistent(&self, direction: Direction) -> bool {
        match direction {
            Direction::Drop => matches!(self, Self::Ctr | Self::Clicks | Self::Conversions | Self::Revenue),
            Direction::Spike => matches!(self, Self::Cost),
        }
    }
}

/// One minute-level reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub creative_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
}

impl MetricPoint {
    pub fn new(metric: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            timestamp,
            value,
            creative_id: None,
            campaign_id: None,
        }
    }

    pub fn with_creative(mut self, creative_id: impl Into<String>) -> Self {
        self.creative_id = Some(creative_id.into());
        self
    }

    pub fn with_campaign(mut self, campaign_id: impl Into<CampaignId>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn kind(&self) -> MetricKind {
        MetricKind::from_name(&self.metric)
    }
}

/// Benchmark point with its ground-truth label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledPoint {
    #[serde(flatten)]
    pub point: MetricPoint,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Spike,
    Drop,
}

/// Structured pointer toward a likely cause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "hint")]
pub enum RootCauseHint {
    /// Size and direction of the move against the baseline
    Movement { direction: Direction, ratio: f64 },
    /// Other metrics anomalous within the co-occurrence window
    CoOccurring { metrics: Vec<String> },
    /// Fatigue forecast for the creative behind the metric, below the suppression level
    FatigueContext { creative_id: String, fatigue_probability_7d: f64 },
    /// Part of a run of consecutive anomalies that may become a new level
    Sustained { consecutive: usize },
}

/// Low-risk remediations. None of them is executed by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RotateCreative,
    CapFrequency,
    LowerBidCap,
    HoldBudgetIncreases,
    VerifyTracking,
    VerifyDelivery,
    NotifyOwner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub kind: ActionKind,
    /// Creative or campaign the action applies to
    #[serde(default)]
    pub target: Option<String>,
    pub reason: String,
}

/// At most [`MAX_PROPOSED_ACTIONS`] actions, enforced on construction and deserialization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ProposedAction>", into = "Vec<ProposedAction>")]
pub struct ProposedActions(Vec<ProposedAction>);

impl ProposedActions {
    pub fn as_slice(&self) -> &[ProposedAction] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProposedAction> {
        self.0.iter()
    }
}

impl TryFrom<Vec<ProposedAction>> for ProposedActions {
    type Error = MeridianError;

    fn try_from(actions: Vec<ProposedAction>) -> Result<Self, Self::Error> {
        if actions.len() > MAX_PROPOSED_ACTIONS {
            return Err(MeridianError::DataQuality(format!(
                "{} proposed actions, at most {MAX_PROPOSED_ACTIONS} allowed",
                actions.len()
            )));
        }
        Ok(Self(actions))
    }
}

impl From<ProposedActions> for Vec<ProposedAction> {
    fn from(actions: ProposedActions) -> Self {
        actions.0
    }
}

/// A detected abnormal move on one metric. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
    /// Rolling median at detection
    pub baseline: f64,
    pub robust_z: f64,
    pub ratio: f64,
    pub direction: Direction,
    pub severity: Severity,
    pub root_cause_hints: Vec<RootCauseHint>,
    pub proposed_actions: ProposedActions,
    /// Time from receiving the point to emitting the anomaly
    pub detection_latency_ms: f64,
}

/// What the engine concluded about one point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DetectionOutcome {
    /// Baseline still filling
    WarmingUp,
    Normal { robust_z: f64 },
    Anomaly(Anomaly),
    /// Abnormal but explained by a fatigue forecast
    Suppressed {
        metric: String,
        creative_id: String,
        fatigue_probability_7d: f64,
        robust_z: f64,
    },
    /// A run of anomalies was accepted as the new normal
    LevelShift { metric: String, new_baseline: f64 },
}

impl DetectionOutcome {
    pub fn anomaly(&self) -> Option<&Anomaly> {
        match self {
            Self::Anomaly(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_flagged(&self) -> bool {
        matches!(self, Self::Anomaly(_))
    }
}

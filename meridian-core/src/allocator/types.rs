//! Allocator configuration, arms, decisions and ledger records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::decision::DecisionState;
use crate::predictive::PredictiveOutput;
use crate::types::{ArmId, CampaignId, ConfidenceInterval};

/// Budgeted bandit settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Coverage of the per-arm credible interval
    pub credible_level: f64,
    /// Escalate when any arm's credible interval is wider than this
    pub max_interval_width: f64,
    /// Escalate when the top two expected values differ by less than this fraction
    pub min_ev_delta: f64,
    /// Share of every tick's budget spread evenly across arms
    pub exploration_floor: f64,
    /// Posterior draws used to estimate each arm's chance of being best
    pub thompson_draws: usize,
    /// Expected value is scaled by `1 - fatigue_discount * p_fatigue_7d`
    pub fatigue_discount: f64,
    /// Hard per-decision deadline
    pub decision_timeout_ms: u64,
    pub max_memory_mb: u64,
    /// Largest accepted arm count per decision
    pub max_arms: usize,
    /// Queued commands per campaign ledger actor
    pub ledger_mailbox: usize,
    pub seed: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            credible_level: 0.95,
            max_interval_width: 0.05,
            min_ev_delta: 0.05,
            exploration_floor: 0.05,
            thompson_draws: 1000,
            fatigue_discount: 1.0,
            decision_timeout_ms: 300,
            max_memory_mb: 512,
            max_arms: 1000,
            ledger_mailbox: 64,
            seed: 42,
        }
    }
}

/// A variant or channel competing for budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetArm {
    pub arm_id: ArmId,
    pub hourly_traffic: u64,
    /// Cumulative trials behind `observed_conversions`; 0 means use `hourly_traffic`
    #[serde(default)]
    pub observed_trials: u64,
    pub observed_conversions: u64,
    #[serde(default)]
    pub current_allocation: f64,
    /// Creative served by this arm, for fatigue lookups
    #[serde(default)]
    pub creative_id: Option<String>,
    /// Segment this arm targets, for value weighting
    #[serde(default)]
    pub segment_id: Option<usize>,
}

impl BudgetArm {
    pub fn new(arm_id: impl Into<ArmId>, trials: u64, conversions: u64) -> Self {
        Self {
            arm_id: arm_id.into(),
            hourly_traffic: trials,
            observed_trials: trials,
            observed_conversions: conversions,
            current_allocation: 0.0,
            creative_id: None,
            segment_id: None,
        }
    }

    pub fn with_creative(mut self, creative_id: impl Into<String>) -> Self {
        self.creative_id = Some(creative_id.into());
        self
    }

    pub fn with_segment(mut self, segment_id: usize) -> Self {
        self.segment_id = Some(segment_id);
        self
    }

    pub fn trials(&self) -> u64 {
        if self.observed_trials > 0 {
            self.observed_trials
        } else {
            self.hourly_traffic
        }
    }
}

/// Everything one allocation decision needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRequest {
    pub campaign_id: CampaignId,
    pub tick: u64,
    /// Total budget available this tick
    pub budget: f64,
    pub arms: Vec<BudgetArm>,
    /// 7-day fatigue probability by creative id
    #[serde(default)]
    pub fatigue: BTreeMap<String, f64>,
    /// Forecast value by segment id
    #[serde(default)]
    pub segment_value: BTreeMap<usize, f64>,
}

impl TickRequest {
    pub fn new(campaign_id: impl Into<CampaignId>, tick: u64, budget: f64, arms: Vec<BudgetArm>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            tick,
            budget,
            arms,
            fatigue: BTreeMap::new(),
            segment_value: BTreeMap::new(),
        }
    }

    /// Fill fatigue and segment value from the latest predictive snapshot.
    ///
    /// Entries already present win over the snapshot.
    pub fn with_predictive(mut self, output: &PredictiveOutput) -> Self {
        for f in &output.fatigue {
            self.fatigue
                .entry(f.creative_id.clone())
                .or_insert(f.fatigue_probability_7d);
        }
        for ltv in &output.ltv {
            self.segment_value.entry(ltv.segment_id).or_insert(ltv.value);
        }
        self
    }
}

/// Why an allocation needs a human
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EscalationTrigger {
    /// The arm's credible interval is wider than the configured maximum
    WideInterval { arm_id: ArmId, width: f64 },
    /// The top two arms' expected values are too close to separate
    IndistinguishableTopArms { leader: ArmId, runner_up: ArmId, delta: f64 },
}

/// Posterior summary and allocation for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmAllocation {
    pub arm_id: ArmId,
    pub share: f64,
    pub amount: f64,
    pub posterior_mean: f64,
    pub credible_interval: ConfidenceInterval,
    /// Chance the arm has the highest weighted conversion rate
    pub p_best: f64,
    /// Posterior mean scaled by segment value and fatigue
    pub expected_value: f64,
}

/// One allocation decision and its review state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationDecision {
    pub decision_id: Uuid,
    pub campaign_id: CampaignId,
    pub tick: u64,
    pub state: DecisionState,
    pub budget: f64,
    /// In arm-id order
    pub allocations: Vec<ArmAllocation>,
    #[serde(default)]
    pub escalation: Vec<EscalationTrigger>,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewer: Option<String>,
}

impl AllocationDecision {
    pub fn needs_human(&self) -> bool {
        !self.escalation.is_empty()
    }

    pub fn allocated(&self) -> f64 {
        self.allocations.iter().map(|a| a.amount).sum()
    }

    pub fn allocation_for(&self, arm_id: &ArmId) -> Option<&ArmAllocation> {
        self.allocations.iter().find(|a| &a.arm_id == arm_id)
    }

    /// Ledger rows for this decision, one per arm with a positive amount.
    pub fn ledger_entries(&self, recorded_at: DateTime<Utc>) -> Vec<LedgerEntry> {
        self.allocations
            .iter()
            .filter(|a| a.amount > 0.0)
            .map(|a| LedgerEntry {
                tick: self.tick,
                campaign_id: self.campaign_id.clone(),
                arm_id: a.arm_id.clone(),
                amount: a.amount,
                rationale: self.rationale.clone(),
                needs_human: self.needs_human(),
                decision_id: self.decision_id,
                recorded_at,
            })
            .collect()
    }
}

/// One committed allocation in the append-only budget ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tick: u64,
    pub campaign_id: CampaignId,
    pub arm_id: ArmId,
    pub amount: f64,
    pub rationale: String,
    /// The decision went through human review
    pub needs_human: bool,
    pub decision_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictive::PredictiveSummary;
    use crate::predictive::CalibrationTrend;
    use crate::types::{FatigueForecast, LtvPrediction};

    #[test]
    fn test_trials_fall_back_to_traffic() {
        let mut arm = BudgetArm::new("a", 100, 5);
        assert_eq!(arm.trials(), 100);
        arm.observed_trials = 0;
        arm.hourly_traffic = 40;
        assert_eq!(arm.trials(), 40);
    }

    #[test]
    fn test_request_picks_up_predictive_snapshot() {
        let now = Utc::now();
        let ci = ConfidenceInterval::point(0.5, 0.95);
        let output = PredictiveOutput {
            run_id: Uuid::nil(),
            generated_at: now,
            fatigue: vec![FatigueForecast {
                creative_id: "cr-1".into(),
                fatigue_probability_7d: 0.8,
                fatigue_probability_14d: 0.9,
                confidence_interval_7d: ci,
                confidence_interval_14d: ci,
                risk_factors: vec![],
                generated_at: now,
            }],
            excluded_creatives: vec![],
            quarantined_creatives: vec![],
            ltv: vec![LtvPrediction {
                segment_id: 2,
                horizon_days: 90,
                value: 120.0,
                confidence_interval: ci,
                members: 10,
                generated_at: now,
            }],
            summary: PredictiveSummary {
                fatigue_auc_7d: None,
                fatigue_auc_14d: None,
                fatigue_trained: false,
                training_windows: 0,
                ltv_rmse_pct: None,
                calibration_trend: CalibrationTrend::Insufficient,
                creatives_scored: 1,
                creatives_excluded: 0,
                creatives_quarantined: 0,
            },
        };
        let mut request = TickRequest::new("c", 1, 100.0, vec![]);
        request.fatigue.insert("cr-1".into(), 0.1);
        let request = request.with_predictive(&output);
        assert_eq!(request.fatigue["cr-1"], 0.1);
        assert_eq!(request.segment_value[&2], 120.0);
    }
}

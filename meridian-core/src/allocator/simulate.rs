//! Benchmark runs against arms with known conversion rates
//!
//! Each tick the policy splits the budget, traffic follows the split and
//! conversions are drawn from each arm's true rate. Escalated ticks are
//! approved by a stand-in reviewer so the run never stalls. The oracle puts
//! every tick's whole budget on the best true rate.

use std::collections::BTreeMap;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Binomial, Distribution};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::decision::{DecisionEvent, DecisionState};
use super::ledger::BudgetLedger;
use super::policy::decide;
use super::types::{AllocatorConfig, BudgetArm, TickRequest};
use crate::error::{MeridianError, Result};
use crate::types::{ArmId, CampaignId};

const SIMULATED_REVIEWER: &str = "simulated-reviewer";

/// Arm with a fixed, known conversion rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedArm {
    pub arm_id: ArmId,
    pub true_rate: f64,
}

impl SimulatedArm {
    pub fn new(arm_id: impl Into<ArmId>, true_rate: f64) -> Self {
        Self {
            arm_id: arm_id.into(),
            true_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub campaign_id: CampaignId,
    pub arms: Vec<SimulatedArm>,
    pub ticks: u64,
    pub tick_budget: f64,
    /// Visitors per tick, split across arms by budget share
    pub traffic_per_tick: u64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            campaign_id: CampaignId::new("benchmark"),
            arms: vec![SimulatedArm::new("high", 0.05), SimulatedArm::new("low", 0.01)],
            ticks: 50,
            tick_budget: 100.0,
            traffic_per_tick: 2_000,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub ticks: u64,
    /// Fraction of all committed budget per arm
    pub budget_share: BTreeMap<String, f64>,
    /// 1 - allocator value / oracle value
    pub regret_ratio: f64,
    pub escalations: usize,
    pub auto_commits: usize,
    /// Expected conversions bought per unit budget, summed over ticks
    pub allocator_value: f64,
    pub oracle_value: f64,
    pub total_committed: f64,
}

impl BenchmarkReport {
    pub fn share_of(&self, arm_id: &str) -> f64 {
        self.budget_share.get(arm_id).copied().unwrap_or(0.0)
    }
}

/// Run the policy against simulated traffic and score it against the oracle.
pub fn simulate(simulation: &SimulationConfig, config: &AllocatorConfig) -> Result<BenchmarkReport> {
    if simulation.arms.is_empty() {
        return Err(MeridianError::insufficient("simulation arms", 1, 0));
    }
    if let Some(bad) = simulation.arms.iter().find(|a| !(0.0..=1.0).contains(&a.true_rate)) {
        return Err(MeridianError::DataQuality(format!(
            "arm {} true rate {}",
            bad.arm_id, bad.true_rate
        )));
    }

    let rates: BTreeMap<ArmId, f64> = simulation
        .arms
        .iter()
        .map(|a| (a.arm_id.clone(), a.true_rate))
        .collect();
    let best_rate = rates.values().copied().fold(0.0, f64::max);
    let mut observed: BTreeMap<ArmId, (u64, u64)> = rates.keys().map(|id| (id.clone(), (0, 0))).collect();
    let mut ledger = BudgetLedger::new(simulation.campaign_id.clone());
    let mut rng = StdRng::seed_from_u64(simulation.seed);

    let mut escalations = 0;
    let mut auto_commits = 0;
    let mut allocator_value = 0.0;
    let mut oracle_value = 0.0;

    for tick in 1..=simulation.ticks {
        let arms: Vec<BudgetArm> = observed
            .iter()
            .map(|(id, (trials, conversions))| BudgetArm::new(id.clone(), *trials, *conversions))
            .collect();
        let request = TickRequest::new(simulation.campaign_id.clone(), tick, simulation.tick_budget, arms);
        let now = Utc::now();
        let mut decision = decide(&request, config, now)?;
        match decision.state {
            DecisionState::AutoCommitted => auto_commits += 1,
            DecisionState::EscalatedPendingReview => {
                escalations += 1;
                decision.apply(
                    &DecisionEvent::Approve {
                        reviewer: SIMULATED_REVIEWER.into(),
                    },
                    now,
                )?;
            }
            _ => {}
        }

        ledger.open_tick(tick, simulation.tick_budget)?;
        ledger.append(decision.ledger_entries(now))?;

        for allocation in &decision.allocations {
            let rate = rates.get(&allocation.arm_id).copied().unwrap_or(0.0);
            allocator_value += allocation.amount * rate;
            let visitors = (simulation.traffic_per_tick as f64 * allocation.share).floor() as u64;
            let conversions = match Binomial::new(visitors, rate) {
                Ok(dist) => dist.sample(&mut rng),
                Err(_) => 0,
            };
            if let Some(entry) = observed.get_mut(&allocation.arm_id) {
                entry.0 += visitors;
                entry.1 += conversions;
            }
        }
        oracle_value += simulation.tick_budget * best_rate;
        debug!(tick, state = %decision.state, "Simulated tick");
    }

    let mut spent: BTreeMap<String, f64> = rates.keys().map(|id| (id.to_string(), 0.0)).collect();
    for entry in ledger.entries() {
        *spent.entry(entry.arm_id.to_string()).or_default() += entry.amount;
    }
    let total_committed: f64 = spent.values().sum();
    let budget_share = spent
        .into_iter()
        .map(|(id, amount)| {
            let share = if total_committed > 0.0 { amount / total_committed } else { 0.0 };
            (id, share)
        })
        .collect();
    let regret_ratio = if oracle_value > 0.0 {
        (1.0 - allocator_value / oracle_value).max(0.0)
    } else {
        0.0
    };

    info!(
        ticks = simulation.ticks,
        regret_ratio,
        escalations,
        auto_commits,
        "Benchmark complete"
    );
    Ok(BenchmarkReport {
        ticks: simulation.ticks,
        budget_share,
        regret_ratio,
        escalations,
        auto_commits,
        allocator_value,
        oracle_value,
        total_committed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_flows_to_better_arm() {
        let report = simulate(&SimulationConfig::default(), &AllocatorConfig::default()).unwrap();
        assert!(report.share_of("high") >= 0.9, "share {}", report.share_of("high"));
        assert!(report.regret_ratio <= 0.15, "regret {}", report.regret_ratio);
        assert!(report.escalations >= 1);
        assert!(report.total_committed <= 50.0 * 100.0 * (1.0 + 1e-9));
    }

    #[test]
    fn test_same_seed_same_report() {
        let a = simulate(&SimulationConfig::default(), &AllocatorConfig::default()).unwrap();
        let b = simulate(&SimulationConfig::default(), &AllocatorConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_rates() {
        let simulation = SimulationConfig {
            arms: vec![SimulatedArm::new("x", 1.5)],
            ..Default::default()
        };
        assert!(simulate(&simulation, &AllocatorConfig::default()).is_err());
        let empty = SimulationConfig {
            arms: Vec::new(),
            ..Default::default()
        };
        assert!(simulate(&empty, &AllocatorConfig::default()).is_err());
    }
}

//! Thompson-sampling budget split with an uncertainty gate
//!
//! Every arm keeps `exploration_floor / n` of the budget. The rest follows
//! each arm's posterior chance of having the best weighted conversion
//! rate, where the weight combines the targeted segment's forecast value
//! and a discount for predicted creative fatigue.
//!
//! The gate escalates to review when any arm's credible interval is wider
//! than `max_interval_width`, or when the top two expected values differ by
//! less than `min_ev_delta`.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;
use uuid::Uuid;

use super::decision::{DecisionEvent, DecisionState};
use super::posterior::{ArmPosterior, prob_best};
use super::types::{AllocationDecision, AllocatorConfig, ArmAllocation, BudgetArm, EscalationTrigger, TickRequest};
use crate::error::{MeridianError, Result};
use crate::types::CampaignId;

fn campaign_seed(campaign_id: &CampaignId) -> u64 {
    // FNV-1a, stable across processes unlike the std hasher
    campaign_id
        .as_str()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3))
}

fn validate(request: &TickRequest, config: &AllocatorConfig) -> Result<()> {
    if !request.budget.is_finite() || request.budget < 0.0 {
        return Err(MeridianError::DataQuality(format!("tick budget {}", request.budget)));
    }
    if request.arms.len() > config.max_arms {
        return Err(MeridianError::DataQuality(format!(
            "{} arms exceeds limit of {}",
            request.arms.len(),
            config.max_arms
        )));
    }
    for arm in &request.arms {
        if arm.observed_conversions > arm.trials() {
            return Err(MeridianError::DataQuality(format!(
                "arm {}: {} conversions from {} trials",
                arm.arm_id,
                arm.observed_conversions,
                arm.trials()
            )));
        }
    }
    Ok(())
}

/// Trim trailing amounts until their running sum is within `budget`.
///
/// The ledger sums rows in allocation order, so rounding must be settled
/// here rather than there.
fn fit_to_budget(amounts: &mut [f64], budget: f64) {
    loop {
        let total: f64 = amounts.iter().sum();
        if total <= budget {
            return;
        }
        let Some(last) = amounts.iter_mut().rev().find(|a| **a > 0.0) else {
            return;
        };
        // at least one ulp, so every pass makes progress
        let step = (total - budget).max(*last * f64::EPSILON);
        *last = (*last - step).max(0.0);
    }
}

/// Weight from segment value (relative to the mean across arms) and fatigue.
fn arm_weights(arms: &[&BudgetArm], request: &TickRequest, config: &AllocatorConfig) -> Vec<f64> {
    let values: Vec<f64> = arms
        .iter()
        .filter_map(|a| a.segment_id.and_then(|s| request.segment_value.get(&s)).copied())
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    let mean_value = if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    };
    arms.iter()
        .map(|arm| {
            let value = match arm.segment_id.and_then(|s| request.segment_value.get(&s)) {
                Some(v) if mean_value > 0.0 && v.is_finite() && *v > 0.0 => v / mean_value,
                _ => 1.0,
            };
            let fatigue = arm
                .creative_id
                .as_ref()
                .and_then(|c| request.fatigue.get(c))
                .map(|p| (1.0 - config.fatigue_discount * p.clamp(0.0, 1.0)).max(0.0))
                .unwrap_or(1.0);
            value * fatigue
        })
        .collect()
}

/// Relative gap between the two largest values; 0 when the leader is not positive.
pub fn top_two_delta(values: &[f64]) -> Option<(usize, usize, f64)> {
    if values.len() < 2 {
        return None;
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));
    let (first, second) = (order[0], order[1]);
    let delta = if values[first] > 0.0 {
        (values[first] - values[second]) / values[first]
    } else {
        0.0
    };
    Some((first, second, delta))
}

fn rationale(allocations: &[ArmAllocation], triggers: &[EscalationTrigger], config: &AllocatorConfig) -> String {
    let leader = allocations
        .iter()
        .max_by(|a, b| a.share.total_cmp(&b.share).then(b.arm_id.cmp(&a.arm_id)));
    let mut text = match leader {
        Some(l) => format!(
            "{} leads with {:.1}% of budget (P(best) {:.2}, rate {:.4})",
            l.arm_id,
            l.share * 100.0,
            l.p_best,
            l.posterior_mean
        ),
        None => "no arms; nothing allocated".to_string(),
    };
    for trigger in triggers {
        match trigger {
            EscalationTrigger::WideInterval { arm_id, width } => text.push_str(&format!(
                "; {arm_id} {:.0}% interval spans {width:.4} > {:.4}",
                config.credible_level * 100.0,
                config.max_interval_width
            )),
            EscalationTrigger::IndistinguishableTopArms {
                leader,
                runner_up,
                delta,
            } => text.push_str(&format!(
                "; {leader} vs {runner_up} expected values differ by {:.1}% < {:.1}%",
                delta * 100.0,
                config.min_ev_delta * 100.0
            )),
        }
    }
    if !triggers.is_empty() {
        text.push_str("; needs review");
    }
    text
}

/// Propose an allocation for one tick and run it through the gate.
///
/// Zero arms and a single arm are trivially confident.
pub fn decide(request: &TickRequest, config: &AllocatorConfig, now: DateTime<Utc>) -> Result<AllocationDecision> {
    validate(request, config)?;
    let mut arms: Vec<&BudgetArm> = request.arms.iter().collect();
    arms.sort_by(|a, b| a.arm_id.cmp(&b.arm_id));
    if arms.windows(2).any(|w| w[0].arm_id == w[1].arm_id) {
        return Err(MeridianError::DataQuality("duplicate arm ids".into()));
    }

    let n = arms.len();
    let posteriors: Vec<ArmPosterior> = arms
        .iter()
        .map(|a| ArmPosterior::from_arm(a, config.credible_level))
        .collect();
    let weights = arm_weights(&arms, request, config);
    let expected: Vec<f64> = posteriors
        .iter()
        .zip(&weights)
        .map(|(p, w)| p.mean() * w)
        .collect();

    let p_best = if n > 1 {
        let seed = config.seed ^ request.tick.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ campaign_seed(&request.campaign_id);
        let mut rng = StdRng::seed_from_u64(seed);
        prob_best(&posteriors, &weights, config.thompson_draws, &mut rng)
    } else {
        vec![1.0; n]
    };
    let floor = if n > 1 {
        config.exploration_floor.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let shares: Vec<f64> = p_best
        .iter()
        .map(|p| floor / n as f64 + (1.0 - floor) * p)
        .collect();
    let mut amounts: Vec<f64> = shares.iter().map(|s| s * request.budget).collect();
    let total: f64 = amounts.iter().sum();
    if total > request.budget && total > 0.0 {
        let scale = request.budget / total;
        amounts.iter_mut().for_each(|a| *a *= scale);
    }
    fit_to_budget(&mut amounts, request.budget);

    let allocations: Vec<ArmAllocation> = (0..n)
        .map(|i| ArmAllocation {
            arm_id: arms[i].arm_id.clone(),
            share: shares[i],
            amount: amounts[i],
            posterior_mean: posteriors[i].mean(),
            credible_interval: posteriors[i].credible_interval,
            p_best: p_best[i],
            expected_value: expected[i],
        })
        .collect();

    let mut triggers = Vec::new();
    if n > 1 {
        triggers.extend(
            posteriors
                .iter()
                .filter(|p| p.credible_interval.width() > config.max_interval_width)
                .map(|p| EscalationTrigger::WideInterval {
                    arm_id: p.arm_id.clone(),
                    width: p.credible_interval.width(),
                }),
        );
        if let Some((first, second, delta)) = top_two_delta(&expected)
            && delta < config.min_ev_delta
        {
            triggers.push(EscalationTrigger::IndistinguishableTopArms {
                leader: arms[first].arm_id.clone(),
                runner_up: arms[second].arm_id.clone(),
                delta,
            });
        }
    }

    let mut decision = AllocationDecision {
        decision_id: Uuid::now_v7(),
        campaign_id: request.campaign_id.clone(),
        tick: request.tick,
        state: DecisionState::Proposed,
        budget: request.budget,
        rationale: rationale(&allocations, &triggers, config),
        allocations,
        escalation: triggers,
        created_at: now,
        resolved_at: None,
        reviewer: None,
    };
    let event = if decision.escalation.is_empty() {
        DecisionEvent::Confident
    } else {
        DecisionEvent::Uncertain
    };
    decision.apply(&event, now)?;
    debug!(
        campaign = %decision.campaign_id,
        tick = decision.tick,
        arms = n,
        state = %decision.state,
        "Allocation proposed"
    );
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(arms: Vec<BudgetArm>) -> TickRequest {
        TickRequest::new("spring", 1, 1000.0, arms)
    }

    #[test]
    fn test_zero_arms_trivial() {
        let d = decide(&request(vec![]), &AllocatorConfig::default(), Utc::now()).unwrap();
        assert_eq!(d.state, DecisionState::AutoCommitted);
        assert!(d.allocations.is_empty());
        assert_eq!(d.allocated(), 0.0);
    }

    #[test]
    fn test_single_arm_gets_everything() {
        let d = decide(&request(vec![BudgetArm::new("only", 3, 0)]), &AllocatorConfig::default(), Utc::now()).unwrap();
        assert_eq!(d.state, DecisionState::AutoCommitted);
        assert_eq!(d.allocations[0].share, 1.0);
        assert_eq!(d.allocations[0].amount, 1000.0);
    }

    #[test]
    fn test_clear_winner_auto_commits() {
        let arms = vec![BudgetArm::new("a", 20_000, 1000), BudgetArm::new("b", 20_000, 200)];
        let d = decide(&request(arms), &AllocatorConfig::default(), Utc::now()).unwrap();
        assert_eq!(d.state, DecisionState::AutoCommitted, "{}", d.rationale);
        let a = d.allocation_for(&"a".into()).unwrap();
        assert!((a.share - 0.975).abs() < 1e-9);
        assert!(d.allocated() <= 1000.0);
    }

    #[test]
    fn test_rounding_never_lifts_total_over_budget() {
        let mut amounts = vec![0.1, 0.2, 0.3];
        fit_to_budget(&mut amounts, 0.6);
        assert!(amounts.iter().sum::<f64>() <= 0.6);
        assert!((amounts[2] - 0.3).abs() < 1e-12);

        let mut untouched = vec![250.0, 750.0];
        fit_to_budget(&mut untouched, 1000.0);
        assert_eq!(untouched, vec![250.0, 750.0]);

        let budget = 1_000_000.0 / 3.0;
        let arms: Vec<BudgetArm> = (0..7).map(|i| BudgetArm::new(format!("arm-{i}"), 5000, 100 + i * 7)).collect();
        let d = decide(&TickRequest::new("odd", 3, budget, arms), &AllocatorConfig::default(), Utc::now()).unwrap();
        let rows: f64 = d.ledger_entries(Utc::now()).iter().map(|e| e.amount).sum();
        assert!(rows <= budget);
    }

    #[test]
    fn test_close_arms_escalate() {
        let arms = vec![BudgetArm::new("a", 1000, 50), BudgetArm::new("b", 1000, 52)];
        let d = decide(&request(arms), &AllocatorConfig::default(), Utc::now()).unwrap();
        assert_eq!(d.state, DecisionState::EscalatedPendingReview);
        assert!(d.needs_human());
        assert!(d
            .escalation
            .iter()
            .any(|t| matches!(t, EscalationTrigger::IndistinguishableTopArms { .. })));
        assert!(d.rationale.contains("needs review"));
    }

    #[test]
    fn test_wide_interval_escalates() {
        let arms = vec![BudgetArm::new("a", 20_000, 1000), BudgetArm::new("b", 30, 0)];
        let d = decide(&request(arms), &AllocatorConfig::default(), Utc::now()).unwrap();
        assert_eq!(d.state, DecisionState::EscalatedPendingReview);
        assert!(matches!(
            &d.escalation[0],
            EscalationTrigger::WideInterval { arm_id, .. } if arm_id.as_str() == "b"
        ));
    }

    #[test]
    fn test_fatigue_moves_budget_away() {
        let arms = vec![
            BudgetArm::new("a", 20_000, 1000).with_creative("tired"),
            BudgetArm::new("b", 20_000, 900).with_creative("fresh"),
        ];
        let mut req = request(arms);
        req.fatigue.insert("tired".into(), 0.9);
        let d = decide(&req, &AllocatorConfig::default(), Utc::now()).unwrap();
        let b = d.allocation_for(&"b".into()).unwrap();
        assert!(b.share > 0.9);
    }

    #[test]
    fn test_same_inputs_same_shares() {
        let arms = vec![BudgetArm::new("a", 500, 30), BudgetArm::new("b", 500, 25)];
        let first = decide(&request(arms.clone()), &AllocatorConfig::default(), Utc::now()).unwrap();
        let second = decide(&request(arms), &AllocatorConfig::default(), Utc::now()).unwrap();
        let shares = |d: &AllocationDecision| d.allocations.iter().map(|a| a.share).collect::<Vec<_>>();
        assert_eq!(shares(&first), shares(&second));
    }

    #[test]
    fn test_rejects_bad_input() {
        let cfg = AllocatorConfig::default();
        let mut bad = request(vec![BudgetArm::new("a", 10, 11)]);
        assert!(decide(&bad, &cfg, Utc::now()).is_err());
        bad.arms = vec![BudgetArm::new("a", 10, 1), BudgetArm::new("a", 10, 1)];
        assert!(decide(&bad, &cfg, Utc::now()).is_err());
        bad.arms.clear();
        bad.budget = f64::NAN;
        assert!(decide(&bad, &cfg, Utc::now()).is_err());
    }
}

//! Allocation invariants over arbitrary arm sets

use chrono::Utc;
use meridian_core::allocator::{
    AllocatorConfig, BudgetArm, DecisionState, SimulationConfig, TickRequest, decide, simulate, top_two_delta,
};
use proptest::prelude::*;

fn arms_strategy() -> impl Strategy<Value = Vec<BudgetArm>> {
    prop::collection::vec((0u64..5_000, 0.0f64..1.0), 0..6).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (trials, rate))| {
                let conversions = (trials as f64 * rate).floor() as u64;
                BudgetArm::new(format!("arm-{i}"), trials, conversions)
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn allocation_never_exceeds_budget(
        arms in arms_strategy(),
        budget in 0.0f64..1_000_000.0,
        tick in 0u64..1_000,
    ) {
        let request = TickRequest::new("prop", tick, budget, arms);
        let decision = decide(&request, &AllocatorConfig::default(), Utc::now()).unwrap();
        let total: f64 = decision.allocations.iter().map(|a| a.amount).sum();
        prop_assert!(total <= budget, "allocated {} of {}", total, budget);
        prop_assert!(decision.allocations.iter().all(|a| a.amount.is_finite() && a.amount >= 0.0));
    }

    #[test]
    fn escalates_exactly_when_uncertain(arms in arms_strategy(), budget in 1.0f64..10_000.0) {
        let config = AllocatorConfig::default();
        let n = arms.len();
        let decision = decide(&TickRequest::new("prop", 1, budget, arms), &config, Utc::now()).unwrap();

        let wide = decision
            .allocations
            .iter()
            .any(|a| a.credible_interval.width() > config.max_interval_width);
        let values: Vec<f64> = decision.allocations.iter().map(|a| a.expected_value).collect();
        let close = top_two_delta(&values).is_some_and(|(_, _, delta)| delta < config.min_ev_delta);
        let uncertain = n > 1 && (wide || close);

        prop_assert_eq!(decision.needs_human(), uncertain);
        let expected = if uncertain {
            DecisionState::EscalatedPendingReview
        } else {
            DecisionState::AutoCommitted
        };
        prop_assert_eq!(decision.state, expected);
    }
}

#[test]
fn test_zero_arms_commit_nothing() {
    let decision = decide(
        &TickRequest::new("edge", 1, 500.0, vec![]),
        &AllocatorConfig::default(),
        Utc::now(),
    )
    .unwrap();
    assert_eq!(decision.state, DecisionState::AutoCommitted);
    assert_eq!(decision.allocated(), 0.0);
}

#[test]
fn test_single_arm_takes_whole_budget() {
    let decision = decide(
        &TickRequest::new("edge", 1, 500.0, vec![BudgetArm::new("only", 10, 1)]),
        &AllocatorConfig::default(),
        Utc::now(),
    )
    .unwrap();
    assert_eq!(decision.state, DecisionState::AutoCommitted);
    assert_eq!(decision.allocations.len(), 1);
    assert!((decision.allocations[0].amount - 500.0).abs() < 1e-9);
}

#[test]
fn test_same_request_same_allocation() {
    let request = TickRequest::new(
        "repeat",
        9,
        1_000.0,
        vec![BudgetArm::new("a", 400, 20), BudgetArm::new("b", 400, 24)],
    );
    let config = AllocatorConfig::default();
    let first = decide(&request, &config, Utc::now()).unwrap();
    let second = decide(&request, &config, Utc::now()).unwrap();
    assert_eq!(first.allocations, second.allocations);
    assert_eq!(first.state, second.state);
}

#[test]
fn test_simulation_is_reproducible() {
    let setup = SimulationConfig {
        ticks: 20,
        ..Default::default()
    };
    let config = AllocatorConfig::default();
    assert_eq!(simulate(&setup, &config).unwrap(), simulate(&setup, &config).unwrap());
}

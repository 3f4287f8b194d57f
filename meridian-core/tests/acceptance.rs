//! Acceptance scenarios at the engine boundaries

use chrono::{DateTime, Duration, NaiveDate, Utc};
use meridian_core::allocator::{AllocatorConfig, BudgetArm, DecisionState, SimulationConfig, TickRequest, decide};
use meridian_core::{
    CreativeDay, CreativeSeries, Event, EventType, PredictiveEngine, RunGuard, SegmentationEngine, simulate,
};

fn as_of() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-06-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Three behavioural archetypes with per-profile jitter in cadence, order
/// value and recency. Some browsers buy once and some buyers are lapsing.
fn archetypes(per_group: usize) -> Vec<Event> {
    let expiry = as_of() + Duration::days(365);
    let mut events = Vec::with_capacity(per_group * 112);
    for i in 0..per_group {
        let browser = format!("browser-{i:04}");
        let buyer = format!("buyer-{i:04}");
        let dormant = format!("dormant-{i:04}");
        let first = 1 + (i % 4) as i64;
        for d in (first..150).step_by(3 + i % 3) {
            let ts = as_of() - Duration::days(d);
            events.push(Event::new(&browser, EventType::View, ts, "social", "analytics", expiry));
            events.push(Event::new(&browser, EventType::Click, ts, "social", "analytics", expiry));
        }
        if i % 9 == 0 {
            let ts = as_of() - Duration::days(first + 5);
            events.push(
                Event::new(&browser, EventType::Purchase, ts, "email", "analytics", expiry).with_revenue(25.0),
            );
        }

        let latest = if i % 8 == 7 { 20 + (i % 40) as i64 } else { 2 + (i % 5) as i64 };
        let order_value = 60.0 + ((i * 37) % 41) as f64;
        for d in (latest..150).step_by(8 + i % 5) {
            let ts = as_of() - Duration::days(d);
            events.push(Event::new(&buyer, EventType::View, ts, "search", "analytics", expiry));
            events.push(
                Event::new(&buyer, EventType::Purchase, ts, "email", "analytics", expiry).with_revenue(order_value),
            );
        }

        for d in ((115 + (i % 30) as i64)..200).step_by(15 + i % 10) {
            let ts = as_of() - Duration::days(d);
            events.push(Event::new(&dormant, EventType::View, ts, "display", "analytics", expiry));
        }
    }
    events
}

#[test]
fn test_hundred_thousand_events_find_seeded_clusters() {
    let events = archetypes(892);
    assert!(events.len() > 95_000 && events.len() <= 100_000, "{}", events.len());
    let out = SegmentationEngine::default()
        .run(&events, as_of(), &RunGuard::unbounded("segmentation"))
        .unwrap();
    assert!(out.segments.len() >= 3);
    assert!(out.summary.silhouette >= 0.45, "{:?}", out.summary);
    assert!(!out.summary.sub_threshold);
    assert_eq!(out.summary.profiles, 892 * 3);
    assert!(out.summary.auc_30d.is_some());

    let buyer = out.segment_of("buyer-0000").unwrap();
    let dormant = out.segment_of("dormant-0000").unwrap();
    assert_ne!(buyer.cluster_id, dormant.cluster_id);
}

#[test]
fn test_rising_frequency_falling_ctr_is_fatigued() {
    let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    let mut series = CreativeSeries::new("tiring", "meta");
    for i in 0..10u32 {
        let ctr = 0.05 - 0.003 * f64::from(i);
        let clicks = (10_000.0 * ctr) as u64;
        series
            .push_day(CreativeDay::from_counts(
                start + Duration::days(i64::from(i)),
                10_000,
                clicks,
                50.0,
                clicks / 20,
                1.0 + 0.4 * f64::from(i),
            ))
            .unwrap();
    }
    let now = DateTime::parse_from_rfc3339("2026-04-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let out = PredictiveEngine::default()
        .run(&[series], &[], None, now, &RunGuard::unbounded("predictive"))
        .unwrap();
    let forecast = out.fatigue_for("tiring").unwrap();
    assert!(forecast.fatigue_probability_7d > 0.7);
    assert!(forecast.fatigue_probability_14d >= forecast.fatigue_probability_7d);
}

#[test]
fn test_five_vs_one_percent_arms_converge() {
    let report = simulate(&SimulationConfig::default(), &AllocatorConfig::default()).unwrap();
    assert!(report.share_of("high") >= 0.9, "{report:?}");
    assert!(report.regret_ratio <= 0.15, "{report:?}");
}

#[test]
fn test_near_identical_arms_escalate() {
    let request = TickRequest::new(
        "close-call",
        1,
        1_000.0,
        vec![BudgetArm::new("a", 500, 25), BudgetArm::new("b", 500, 26)],
    );
    let decision = decide(&request, &AllocatorConfig::default(), Utc::now()).unwrap();
    assert_eq!(decision.state, DecisionState::EscalatedPendingReview);
    assert!(decision.rationale.contains("needs review"));
    assert!(decision.ledger_entries(Utc::now()).iter().all(|e| e.needs_human));
}

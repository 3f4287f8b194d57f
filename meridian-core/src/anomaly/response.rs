//! Severity, root-cause hints and remediation choice for flagged points
//!
//! Responses are graduated by metric family and direction:
//! - Creative engagement drops: rotate the creative, cap frequency
//! - Cost spikes: lower the bid cap, hold budget increases
//! - Delivery drops: verify delivery, notify the owner
//! - Anything else: verify tracking, notify the owner

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::detector::PointScore;

    fn score(z: f64, ratio: f64, direction: Direction) -> PointScore {
        PointScore {
            robust_z: z,
            baseline: 100.0,
            scale: 1.0,
            ratio,
            direction,
        }
    }

    // =========================================================================
    // Severity tests
    // =========================================================================

    #[test]
    fn test_five_x_spike_is_high() {
        let config = AnomalyConfig::default();
        assert_eq!(severity(&score(6.0, 5.0, Direction::Spike), &config), Severity::High);
    }

    #[test]
    fn test_severity_grades_by_z_and_ratio() {
        let config = AnomalyConfig::default();
        assert_eq!(severity(&score(5.5, 1.1, Direction::Spike), &config), Severity::Low);
        assert_eq!(severity(&score(9.0, 1.1, Direction::Spike), &config), Severity::Medium);
        assert_eq!(severity(&score(-6.0, 0.6, Direction::Drop), &config), Severity::Medium);
        assert_eq!(severity(&score(-6.0, 0.2, Direction::Drop), &config), Severity::High);
        assert_eq!(severity(&score(15.0, 1.2, Direction::Spike), &config), Severity::High);
    }

    // =========================================================================
    // Action tests
    // =========================================================================

    #[test]
    fn test_ctr_drop_rotates_creative() {
        let point = MetricPoint::new("ctr", chrono::Utc::now(), 0.01).with_creative("cr-9");
        let actions = propose_actions(&point, Direction::Drop);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions.as_slice()[0].kind, ActionKind::RotateCreative);
        assert_eq!(actions.as_slice()[0].target.as_deref(), Some("cr-9"));
    }

    #[test]
    fn test_actions_never_exceed_two() {
        let now = chrono::Utc::now();
        for metric in ["ctr", "cpc", "spend", "impressions", "purchases", "revenue", "clicks", "other"] {
            for direction in [Direction::Spike, Direction::Drop] {
                let actions = propose_actions(&MetricPoint::new(metric, now, 1.0), direction);
                assert!(!actions.is_empty());
                assert!(actions.len() <= MAX_PROPOSED_ACTIONS);
            }
        }
    }

    // =========================================================================
    // Suppression tests
    // =========================================================================

    #[test]
    fn test_predicted_decline_suppressed() {
        let mut fatigue = BTreeMap::new();
        fatigue.insert("cr-1".to_string(), 0.85);
        let point = MetricPoint::new("ctr", chrono::Utc::now(), 0.01).with_creative("cr-1");
        let config = AnomalyConfig::default();
        assert_eq!(
            fatigue_explains(&point, Direction::Drop, &fatigue, &config),
            Some(("cr-1".to_string(), 0.85))
        );
        assert_eq!(fatigue_explains(&point, Direction::Spike, &fatigue, &config), None);
    }

    #[test]
    fn test_low_fatigue_not_suppressed() {
        let mut fatigue = BTreeMap::new();
        fatigue.insert("cr-1".to_string(), 0.2);
        let point = MetricPoint::new("ctr", chrono::Utc::now(), 0.01).with_creative("cr-1");
        assert_eq!(
            fatigue_explains(&point, Direction::Drop, &fatigue, &AnomalyConfig::default()),
            None
        );
    }

    // =========================================================================
    // Hint tests
    // =========================================================================

    #[test]
    fn test_hints_include_co_occurring_metrics() {
        let point = MetricPoint::new("ctr", chrono::Utc::now(), 0.01).with_creative("cr-1");
        let mut fatigue = BTreeMap::new();
        fatigue.insert("cr-1".to_string(), 0.3);
        let hints = root_cause_hints(
            &point,
            &score(-7.0, 0.4, Direction::Drop),
            1,
            &["cpc".to_string()],
            &fatigue,
        );
        assert!(matches!(hints[0], RootCauseHint::Movement { direction: Direction::Drop, .. }));
        assert!(hints.iter().any(|h| matches!(h, RootCauseHint::CoOccurring { metrics } if metrics == &["cpc"])));
        assert!(hints.iter().any(|h| matches!(h, RootCauseHint::FatigueContext { .. })));
        assert!(!hints.iter().any(|h| matches!(h, RootCauseHint::Sustained { .. })));
    }
}

// =============================================================================
// Implementation
// =============================================================================

use std::collections::BTreeMap;

use super::detector::PointScore;
use super::types::{
    ActionKind, AnomalyConfig, Direction, MAX_PROPOSED_ACTIONS, MetricKind, MetricPoint, ProposedAction,
    ProposedActions, RootCauseHint, Severity,
};

/// Grade by the larger of the z-based and ratio-based readings.
pub fn severity(score: &PointScore, config: &AnomalyConfig) -> Severity {
    let z = score.robust_z.abs();
    let by_z = if z >= config.high_z {
        Severity::High
    } else if z >= config.medium_z {
        Severity::Medium
    } else {
        Severity::Low
    };
    let magnitude = score.magnitude();
    let by_ratio = if magnitude >= config.high_ratio {
        Severity::High
    } else if magnitude >= config.medium_ratio {
        Severity::Medium
    } else {
        Severity::Low
    };
    by_z.max(by_ratio)
}

/// The creative and its forecast when a fatigue prediction already explains the move.
pub fn fatigue_explains(
    point: &MetricPoint,
    direction: Direction,
    fatigue: &BTreeMap<String, f64>,
    config: &AnomalyConfig,
) -> Option<(String, f64)> {
    let creative = point.creative_id.as_ref()?;
    let probability = *fatigue.get(creative)?;
    if probability >= config.fatigue_suppression && point.kind().fatigue_consistent(direction) {
        Some((creative.clone(), probability))
    } else {
        None
    }
}

pub fn root_cause_hints(
    point: &MetricPoint,
    score: &PointScore,
    consecutive: usize,
    co_occurring: &[String],
    fatigue: &BTreeMap<String, f64>,
) -> Vec<RootCauseHint> {
    let mut hints = vec![RootCauseHint::Movement {
        direction: score.direction,
        ratio: score.ratio,
    }];
    if !co_occurring.is_empty() {
        hints.push(RootCauseHint::CoOccurring {
            metrics: co_occurring.to_vec(),
        });
    }
    if let Some(creative) = &point.creative_id
        && let Some(p) = fatigue.get(creative)
    {
        hints.push(RootCauseHint::FatigueContext {
            creative_id: creative.clone(),
            fatigue_probability_7d: *p,
        });
    }
    if consecutive > 1 {
        hints.push(RootCauseHint::Sustained { consecutive });
    }
    hints
}

fn action(kind: ActionKind, target: Option<&String>, reason: &str) -> ProposedAction {
    ProposedAction {
        kind,
        target: target.cloned(),
        reason: reason.to_string(),
    }
}

/// Pick the low-risk remediations for a metric family and direction.
pub fn propose_actions(point: &MetricPoint, direction: Direction) -> ProposedActions {
    let creative = point.creative_id.as_ref();
    let campaign = point.campaign_id.as_ref().map(|c| c.to_string());
    let campaign = campaign.as_ref();
    let mut actions = match (point.kind(), direction) {
        (MetricKind::Ctr | MetricKind::Clicks, Direction::Drop) => vec![
            action(ActionKind::RotateCreative, creative, "engagement fell against its baseline"),
            action(ActionKind::CapFrequency, campaign, "audience may be overexposed"),
        ],
        (MetricKind::Cost, Direction::Spike) | (MetricKind::Spend, Direction::Spike) => vec![
            action(ActionKind::LowerBidCap, campaign, "cost rose sharply against its baseline"),
            action(ActionKind::HoldBudgetIncreases, campaign, "avoid scaling into the cost spike"),
        ],
        (MetricKind::Impressions | MetricKind::Spend, Direction::Drop) => vec![
            action(ActionKind::VerifyDelivery, campaign, "delivery fell against its baseline"),
            action(ActionKind::NotifyOwner, campaign, "campaign may be paused or capped upstream"),
        ],
        (MetricKind::Conversions | MetricKind::Revenue, Direction::Drop) => vec![
            action(ActionKind::VerifyTracking, campaign, "conversions fell; check tracking first"),
            action(ActionKind::HoldBudgetIncreases, campaign, "hold scaling until conversions recover"),
        ],
        _ => vec![
            action(ActionKind::VerifyTracking, campaign, "unexpected move; rule out tracking faults"),
            action(ActionKind::NotifyOwner, campaign, "unexpected move needs an owner's review"),
        ],
    };
    actions.truncate(MAX_PROPOSED_ACTIONS);
    ProposedActions::try_from(actions).unwrap_or_default()
}

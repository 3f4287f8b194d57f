//! Advisory budget reallocation proposals
//!
//! Every channel, campaign and creative with spend is compared with the
//! median ROAS of its kind. Moving a fraction of spend from a below-median
//! entity to a median one (or onto an above-median one) is worth
//! `fraction * spend * |roas - median|` in revenue. Entities that spend
//! without converting are proposed for a pause. Proposals are never
//! executed here.

use std::collections::BTreeMap;

use super::types::{
    AttributionConfig, AttributionResult, BudgetReallocationProposal, EntityKind, Leaderboard,
    ReallocationAction,
};
use crate::stats::median;

#[derive(Debug, Clone)]
struct Candidate {
    kind: EntityKind,
    id: String,
    spend: f64,
    revenue: f64,
}

impl Candidate {
    fn roas(&self) -> f64 {
        self.revenue / self.spend
    }
}

fn candidates(channels: &[AttributionResult], leaderboard: &Leaderboard) -> Vec<Candidate> {
    let channel = channels.iter().map(|r| Candidate {
        kind: EntityKind::Channel,
        id: r.channel.clone(),
        spend: r.spend,
        revenue: r.attributed_revenue,
    });
    let ranked = leaderboard
        .campaigns
        .iter()
        .chain(&leaderboard.creatives)
        .map(|e| Candidate {
            kind: e.kind,
            id: e.id.clone(),
            spend: e.spend,
            revenue: e.revenue,
        });
    channel.chain(ranked).filter(|c| c.spend > 0.0).collect()
}

fn by_impact(a: &BudgetReallocationProposal, b: &BudgetReallocationProposal) -> std::cmp::Ordering {
    b.expected_delta
        .abs()
        .total_cmp(&a.expected_delta.abs())
        .then_with(|| a.entity_kind.cmp(&b.entity_kind))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

/// Proposals ordered by impact, and whether fewer than `min_proposals` exist.
///
/// Strong proposals (spend without revenue, or ROAS outside the margin
/// around the median) always appear. Marginal ones top the list up to the
/// minimum.
pub fn propose(
    channels: &[AttributionResult],
    leaderboard: &Leaderboard,
    config: &AttributionConfig,
) -> (Vec<BudgetReallocationProposal>, bool) {
    let all = candidates(channels, leaderboard);
    let mut medians: BTreeMap<EntityKind, f64> = BTreeMap::new();
    for kind in [EntityKind::Channel, EntityKind::Campaign, EntityKind::Creative] {
        let values: Vec<f64> = all
            .iter()
            .filter(|c| c.kind == kind)
            .map(Candidate::roas)
            .collect();
        medians.insert(kind, median(&values));
    }

    let fraction = config.proposal_shift_fraction;
    let mut strong = Vec::new();
    let mut marginal = Vec::new();
    for c in all {
        let med = medians.get(&c.kind).copied().unwrap_or(0.0);
        let roas = c.roas();
        if c.revenue <= 0.0 {
            strong.push(BudgetReallocationProposal {
                entity_id: c.id,
                entity_kind: c.kind,
                action: ReallocationAction::Pause,
                reason: format!(
                    "{:.2} spent with no attributed revenue; {} median ROAS is {med:.2}",
                    c.spend,
                    c.kind.as_str()
                ),
                expected_delta: c.spend * med,
            });
            continue;
        }
        let action = if roas >= med {
            ReallocationAction::Increase
        } else {
            ReallocationAction::Decrease
        };
        let verb = match action {
            ReallocationAction::Increase => "add",
            _ => "move out",
        };
        let proposal = BudgetReallocationProposal {
            reason: format!(
                "ROAS {roas:.2} vs {} median {med:.2}; {verb} {:.0}% of {:.2} spend",
                c.kind.as_str(),
                fraction * 100.0,
                c.spend
            ),
            expected_delta: fraction * c.spend * (roas - med).abs(),
            entity_id: c.id,
            entity_kind: c.kind,
            action,
        };
        let relative = if med > 0.0 { (roas - med).abs() / med } else { f64::INFINITY };
        if relative >= config.proposal_margin {
            strong.push(proposal);
        } else {
            marginal.push(proposal);
        }
    }

    strong.sort_by(by_impact);
    marginal.sort_by(by_impact);
    let shortfall = config.min_proposals.saturating_sub(strong.len());
    strong.extend(marginal.into_iter().take(shortfall));
    let below_minimum = strong.len() < config.min_proposals;
    (strong, below_minimum)
}

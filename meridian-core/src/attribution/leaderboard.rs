//! Campaign and creative leaderboard

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::touch::Credit;
use super::types::{EntityKind, Leaderboard, LeaderboardEntry};
use crate::allocator::LedgerEntry;
use crate::types::{Event, EventType};

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    impressions: u64,
    clicks: u64,
    conversions: f64,
    spend: f64,
    revenue: f64,
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den > 0.0).then(|| num / den)
}

impl Tally {
    fn count(&mut self, event: &Event) {
        match event.event_type {
            EventType::View => self.impressions += 1,
            EventType::Click => self.clicks += 1,
            _ => {}
        }
        self.spend += event.spend;
    }

    fn into_entry(self, kind: EntityKind, id: String) -> LeaderboardEntry {
        let clicks = self.clicks as f64;
        LeaderboardEntry {
            kind,
            id,
            impressions: self.impressions,
            clicks: self.clicks,
            conversions: self.conversions,
            spend: self.spend,
            revenue: self.revenue,
            cpc: ratio(self.spend, clicks),
            ctr: ratio(clicks, self.impressions as f64),
            cvr: ratio(self.conversions, clicks),
            cpa: ratio(self.spend, self.conversions),
            roas: ratio(self.revenue, self.spend),
        }
    }
}

/// ROAS descending with unknown ROAS last, then revenue descending, then id.
pub fn rank(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    let roas = match (a.roas, b.roas) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    roas.then_with(|| b.revenue.total_cmp(&a.revenue))
        .then_with(|| a.id.cmp(&b.id))
}

fn finish(tallies: BTreeMap<String, Tally>, kind: EntityKind) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = tallies
        .into_iter()
        .map(|(id, t)| t.into_entry(kind, id))
        .collect();
    entries.sort_by(rank);
    entries
}

/// Rank campaigns and creatives by delivery and attributed value.
///
/// Events without a campaign or content id only feed the channel view.
/// Ledger spend counts toward its campaign.
pub fn build(events: &[&Event], credits: &[Vec<Credit>], ledger: &[LedgerEntry]) -> Leaderboard {
    let mut campaigns: BTreeMap<String, Tally> = BTreeMap::new();
    let mut creatives: BTreeMap<String, Tally> = BTreeMap::new();

    for event in events {
        if let Some(id) = &event.campaign_id {
            campaigns.entry(id.clone()).or_default().count(event);
        }
        if let Some(id) = &event.content_id {
            creatives.entry(id.clone()).or_default().count(event);
        }
    }
    for credit in credits.iter().flatten() {
        if let Some(id) = &credit.campaign_id {
            let t = campaigns.entry(id.clone()).or_default();
            t.conversions += credit.conversions;
            t.revenue += credit.revenue;
        }
        if let Some(id) = &credit.content_id {
            let t = creatives.entry(id.clone()).or_default();
            t.conversions += credit.conversions;
            t.revenue += credit.revenue;
        }
    }
    for entry in ledger {
        campaigns
            .entry(entry.campaign_id.to_string())
            .or_default()
            .spend += entry.amount;
    }

    Leaderboard {
        campaigns: finish(campaigns, EntityKind::Campaign),
        creatives: finish(creatives, EntityKind::Creative),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn ev(kind: EventType, campaign: &str, content: &str, spend: f64) -> Event {
        let now = Utc::now();
        Event::new("p1", kind, now, "search", "ads", now + Duration::days(30))
            .with_campaign(campaign)
            .with_content(content)
            .with_spend(spend)
    }

    fn credit(campaign: &str, content: &str, revenue: f64) -> Credit {
        Credit {
            channel: "search".into(),
            campaign_id: Some(campaign.into()),
            content_id: Some(content.into()),
            revenue,
            conversions: 1.0,
        }
    }

    #[test]
    fn test_metrics_and_order() {
        let events = [
            ev(EventType::View, "alpha", "c1", 0.0),
            ev(EventType::View, "alpha", "c1", 0.0),
            ev(EventType::Click, "alpha", "c1", 10.0),
            ev(EventType::View, "beta", "c2", 0.0),
            ev(EventType::Click, "beta", "c2", 10.0),
            ev(EventType::View, "gamma", "c3", 0.0),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        let credits = vec![vec![credit("alpha", "c1", 20.0), credit("beta", "c2", 50.0)]];
        let board = build(&refs, &credits, &[]);

        let ids: Vec<&str> = board.campaigns.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["beta", "alpha", "gamma"]);
        let alpha = &board.campaigns[1];
        assert_eq!(alpha.impressions, 2);
        assert_eq!(alpha.clicks, 1);
        assert_eq!(alpha.ctr, Some(0.5));
        assert_eq!(alpha.cpc, Some(10.0));
        assert_eq!(alpha.cpa, Some(10.0));
        assert_eq!(alpha.roas, Some(2.0));
        assert_eq!(board.campaigns[2].roas, None);
        assert_eq!(board.creatives.len(), 3);
    }

    #[test]
    fn test_ties_break_on_revenue_then_id() {
        let events = [
            ev(EventType::Click, "b", "x", 10.0),
            ev(EventType::Click, "a", "y", 10.0),
            ev(EventType::Click, "c", "z", 20.0),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        let credits = vec![vec![credit("a", "y", 20.0), credit("b", "x", 20.0), credit("c", "z", 40.0)]];
        let board = build(&refs, &credits, &[]);
        let ids: Vec<&str> = board.campaigns.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }
}

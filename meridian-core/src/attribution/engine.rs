//! Attribution runs: ROI, CLV, leaderboard, proposals and drift

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::drift::{self, DriftBaseline};
use super::leaderboard;
use super::proposals::propose;
use super::touch::{Credit, Journeys, TimeDecayAttribution};
use super::types::{AttributionConfig, AttributionInput, AttributionOutput, AttributionSummary, ClvResult};
use super::value::{ChannelPanel, ClvModel, ledger_spend_by_channel};
use crate::error::{MeridianError, Result};
use crate::governance::ingest;
use crate::guard::RunGuard;
use crate::predictor::Predictor;
use crate::retrain::RetrainQueue;
use crate::stats::mape;
use crate::types::Event;

/// Stateless across runs: the same window always yields the same figures
#[derive(Debug, Clone, Default)]
pub struct AttributionEngine {
    config: AttributionConfig,
    retrain: Option<RetrainQueue>,
}

impl AttributionEngine {
    pub fn new(config: AttributionConfig) -> Self {
        Self {
            config,
            retrain: None,
        }
    }

    /// Route drift alerts to `queue` as retrain requests.
    pub fn with_retrain_queue(mut self, queue: RetrainQueue) -> Self {
        self.retrain = Some(queue);
        self
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    /// Profile a window of events for use as a later drift baseline.
    pub fn baseline(&self, events: &[Event], as_of: DateTime<Utc>) -> DriftBaseline {
        let report = ingest(events, as_of);
        DriftBaseline::from_events(&report.accepted, &self.config.spend_bin_edges)
    }

    #[instrument(skip_all, fields(events = input.events.len(), campaigns = input.campaigns.len()))]
    pub fn run(&self, input: &AttributionInput, as_of: DateTime<Utc>, guard: &RunGuard) -> Result<AttributionOutput> {
        guard.check("attribution")?;
        if input.events.len() > self.config.max_batch_events {
            return Err(MeridianError::DataQuality(format!(
                "batch of {} events exceeds limit of {}",
                input.events.len(),
                self.config.max_batch_events
            )));
        }
        let report = ingest(&input.events, as_of);
        let events: Vec<&Event> = report
            .accepted
            .iter()
            .copied()
            .filter(|e| e.timestamp <= as_of)
            .collect();
        guard.charge_items::<Event>(events.len())?;

        let journeys = Journeys::from_events(&events);
        let mut touch_model = TimeDecayAttribution::new(
            self.config.half_life_days,
            self.config.lookback_days,
            self.config.auto_half_life,
        );
        touch_model.train(&journeys, guard)?;
        let credits = journeys
            .journeys
            .iter()
            .map(|j| touch_model.score(j))
            .collect::<Result<Vec<Vec<Credit>>>>()?;
        guard.check("credit")?;

        let ledger_spend = ledger_spend_by_channel(&input.ledger, &input.campaigns);
        let panel = ChannelPanel::build(&journeys, &credits, &events, &ledger_spend);
        let channel_roi = panel.roi(
            self.config.confidence_level,
            self.config.bootstrap_samples,
            self.config.seed,
            guard,
        )?;
        let roi_mape = reference_mape(&channel_roi, &input.reference_roi);

        let mut clv_model = ClvModel::new(&self.config, as_of);
        clv_model.train(&journeys, guard)?;
        let clv = journeys
            .journeys
            .iter()
            .filter(|j| !j.touches.is_empty() || !j.conversions.is_empty())
            .map(|j| clv_model.score(j))
            .collect::<Result<Vec<ClvResult>>>()?;
        guard.check("clv")?;

        let leaderboard = leaderboard::build(&events, &credits, &input.ledger);
        let (proposals, proposals_below_minimum) = propose(&channel_roi, &leaderboard, &self.config);
        if proposals_below_minimum {
            debug!(
                proposals = proposals.len(),
                wanted = self.config.min_proposals,
                "Too few entities with spend for the proposal minimum"
            );
        }

        let drift = match &input.baseline {
            Some(baseline) => DriftBaseline::from_events(&events, &self.config.spend_bin_edges)
                .divergence_from(baseline, self.config.drift_smoothing),
            None => BTreeMap::new(),
        };
        let drift_alerts = drift::alerts(&drift, self.config.drift_threshold, as_of);
        guard.check("publish")?;
        drift::recommend_retrain(self.retrain.as_ref(), &drift_alerts);

        let conversions = journeys.conversions();
        let summary = AttributionSummary {
            channels: channel_roi.len(),
            profiles: journeys.journeys.len(),
            conversions,
            touch_coverage: touch_model.coverage().unwrap_or(0.0),
            half_life_days: touch_model.half_life_days(),
            roi_mape,
            clv_backtest_rmse_pct: clv_model.backtest_rmse_pct(),
            proposals: proposals.len(),
            proposals_below_minimum,
            drift_alerts: drift_alerts.len(),
            max_divergence: drift.values().copied().fold(0.0, f64::max),
            quarantined: report.quarantined.len(),
        };
        info!(
            channels = summary.channels,
            conversions,
            roi_mape = ?summary.roi_mape,
            proposals = summary.proposals,
            drift_alerts = summary.drift_alerts,
            "Attribution run complete"
        );

        Ok(AttributionOutput {
            run_id: Uuid::now_v7(),
            window_end: as_of,
            channel_roi,
            clv,
            leaderboard,
            proposals,
            drift,
            drift_alerts,
            summary,
            quarantined: report.quarantined,
        })
    }
}

fn reference_mape(
    channel_roi: &[super::types::AttributionResult],
    reference: &BTreeMap<String, f64>,
) -> Option<f64> {
    let (predicted, actual): (Vec<f64>, Vec<f64>) = channel_roi
        .iter()
        .filter_map(|r| reference.get(&r.channel).map(|truth| (r.value, *truth)))
        .unzip();
    (!predicted.is_empty()).then(|| mape(&predicted, &actual))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::LedgerEntry;
    use crate::types::{ArmId, CampaignId, EventType};
    use crate::attribution::CampaignMeta;
    use chrono::Duration;

    fn as_of() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn ev(profile: &str, kind: EventType, days_ago: i64, channel: &str) -> Event {
        Event::new(
            profile,
            kind,
            as_of() - Duration::days(days_ago),
            channel,
            "analytics",
            as_of() + Duration::days(365),
        )
    }

    /// Single-touch journeys so credited revenue equals the channel's truth.
    fn window() -> Vec<Event> {
        let mut events = Vec::new();
        let channels = [("search", 3.0), ("social", 1.0), ("email", 6.0), ("display", 0.0), ("video", 2.0)];
        for (c, (channel, revenue)) in channels.iter().enumerate() {
            for i in 0..20 {
                let p = format!("{channel}-{i}");
                events.push(
                    ev(&p, EventType::Click, 10, channel)
                        .with_spend(1.0)
                        .with_campaign(format!("camp-{c}"))
                        .with_content(format!("cr-{c}-{}", i % 2)),
                );
                if *revenue > 0.0 {
                    events.push(
                        ev(&p, EventType::Purchase, 9, channel)
                            .with_revenue(*revenue)
                            .with_campaign(format!("camp-{c}")),
                    );
                }
            }
        }
        let mut unconsented = ev("ghost", EventType::Purchase, 1, "search").with_revenue(1000.0);
        unconsented.consent_purpose = None;
        events.push(unconsented);
        events
    }

    fn input() -> AttributionInput {
        let reference_roi = BTreeMap::from([
            ("search".to_string(), 2.0),
            ("social".to_string(), 0.0),
            ("email".to_string(), 5.0),
            ("display".to_string(), -1.0),
            ("video".to_string(), 1.0),
        ]);
        AttributionInput {
            events: window(),
            reference_roi,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_reports_roi_and_proposals() {
        let engine = AttributionEngine::default();
        let out = engine.run(&input(), as_of(), &RunGuard::unbounded("attribution")).unwrap();
        assert_eq!(out.summary.quarantined, 1);
        assert_eq!(out.channel_roi.len(), 5);
        let search = out.roi_for("search").unwrap();
        assert!((search.value - 2.0).abs() < 1e-9);
        assert!((out.roi_for("display").unwrap().value + 1.0).abs() < 1e-9);
        assert!(out.summary.roi_mape.unwrap() < 0.2);
        assert!(out.proposals.len() >= 5);
        assert!(!out.summary.proposals_below_minimum);
        assert_eq!(out.summary.touch_coverage, 1.0);
        assert!(out.clv_for("search-0").is_some());
        assert!(out.clv_for("ghost").is_none());
        assert!(out.drift.is_empty());
    }

    #[test]
    fn test_identical_window_identical_figures() {
        let engine = AttributionEngine::default();
        let a = engine.run(&input(), as_of(), &RunGuard::unbounded("attribution")).unwrap();
        let b = engine.run(&input(), as_of(), &RunGuard::unbounded("attribution")).unwrap();
        assert_eq!(a.channel_roi, b.channel_roi);
        assert_eq!(a.clv, b.clv);
        assert_eq!(a.leaderboard, b.leaderboard);
        assert_eq!(a.proposals, b.proposals);
    }

    #[test]
    fn test_ledger_spend_lowers_roi() {
        let mut with_ledger = input();
        with_ledger.campaigns = vec![CampaignMeta {
            campaign_id: CampaignId::new("camp-0"),
            name: "search brand".into(),
            channel: "search".into(),
            arm_ids: vec![ArmId::new("arm-a")],
        }];
        with_ledger.ledger = vec![LedgerEntry {
            tick: 1,
            campaign_id: CampaignId::new("camp-0"),
            arm_id: ArmId::new("arm-a"),
            amount: 20.0,
            rationale: "test".into(),
            needs_human: false,
            decision_id: Uuid::nil(),
            recorded_at: as_of(),
        }];
        let out = AttributionEngine::default()
            .run(&with_ledger, as_of(), &RunGuard::unbounded("attribution"))
            .unwrap();
        let search = out.roi_for("search").unwrap();
        assert_eq!(search.spend, 40.0);
        assert!((search.value - 0.5).abs() < 1e-9);
        assert_eq!(out.leaderboard.campaigns.iter().find(|e| e.id == "camp-0").unwrap().spend, 40.0);
    }

    #[test]
    fn test_drift_alert_queues_retrain() {
        let (queue, mut rx) = RetrainQueue::channel(8);
        let engine = AttributionEngine::default().with_retrain_queue(queue);
        let skewed: Vec<Event> = (0..50)
            .map(|i| ev(&format!("n{i}"), EventType::View, 2, "tiktok"))
            .collect();
        let mut input = input();
        input.baseline = Some(engine.baseline(&skewed, as_of()));
        let out = engine.run(&input, as_of(), &RunGuard::unbounded("attribution")).unwrap();
        assert!(!out.drift_alerts.is_empty());
        assert!(out.summary.max_divergence >= 0.1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_cancelled_run_fails() {
        let guard = RunGuard::unbounded("attribution");
        guard.cancel_token().cancel();
        let err = AttributionEngine::default().run(&input(), as_of(), &guard).unwrap_err();
        assert!(matches!(err, MeridianError::Cancelled));
    }
}

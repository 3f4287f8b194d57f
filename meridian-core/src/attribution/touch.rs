//! Time-decay multi-touch attribution
//!
//! Each conversion's revenue is split across the profile's earlier touches
//! in the lookback window. A touch `d` days before the conversion weighs
//! `2^(-d / half_life)`; weights are normalised per conversion. A
//! conversion with no touch in range credits its own channel.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::guard::RunGuard;
use crate::predictor::Predictor;
use crate::stats::median;
use crate::types::Event;

/// Smallest half-life the lag estimate may produce, in days
const MIN_HALF_LIFE_DAYS: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touch {
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    pub campaign_id: Option<String>,
    pub content_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub timestamp: DateTime<Utc>,
    pub revenue: f64,
    pub channel: String,
    pub campaign_id: Option<String>,
    pub content_id: Option<String>,
}

/// One profile's touches and conversions in time order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub profile_id: String,
    pub touches: Vec<Touch>,
    pub conversions: Vec<Conversion>,
}

/// Journeys for every profile, in profile-id order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Journeys {
    pub journeys: Vec<Journey>,
}

impl Journeys {
    /// Group events by profile and order each journey by time.
    ///
    /// Ties are broken by channel so the ordering does not depend on input order.
    pub fn from_events(events: &[&Event]) -> Self {
        let mut by_profile: BTreeMap<&str, Journey> = BTreeMap::new();
        for event in events {
            let journey = by_profile
                .entry(event.profile_id.as_str())
                .or_insert_with(|| Journey {
                    profile_id: event.profile_id.clone(),
                    touches: Vec::new(),
                    conversions: Vec::new(),
                });
            if event.event_type.is_touch() {
                journey.touches.push(Touch {
                    timestamp: event.timestamp,
                    channel: event.channel.clone(),
                    campaign_id: event.campaign_id.clone(),
                    content_id: event.content_id.clone(),
                });
            } else if event.event_type.is_conversion() {
                journey.conversions.push(Conversion {
                    timestamp: event.timestamp,
                    revenue: event.revenue,
                    channel: event.channel.clone(),
                    campaign_id: event.campaign_id.clone(),
                    content_id: event.content_id.clone(),
                });
            }
        }
        let mut journeys: Vec<Journey> = by_profile.into_values().collect();
        for j in &mut journeys {
            j.touches
                .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.channel.cmp(&b.channel)));
            j.conversions
                .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.channel.cmp(&b.channel)));
        }
        Self { journeys }
    }

    pub fn conversions(&self) -> usize {
        self.journeys.iter().map(|j| j.conversions.len()).sum()
    }
}

/// Credit earned by one touch (or an untouched conversion)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credit {
    pub channel: String,
    pub campaign_id: Option<String>,
    pub content_id: Option<String>,
    pub revenue: f64,
    /// Fractional conversions
    pub conversions: f64,
}

/// Time-decay weighting over each journey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeDecayAttribution {
    half_life_days: f64,
    lookback: Duration,
    estimate_half_life: bool,
    coverage: Option<f64>,
}

impl TimeDecayAttribution {
    pub fn new(half_life_days: f64, lookback_days: i64, estimate_half_life: bool) -> Self {
        Self {
            half_life_days: half_life_days.max(MIN_HALF_LIFE_DAYS),
            lookback: Duration::days(lookback_days.max(0)),
            estimate_half_life,
            coverage: None,
        }
    }

    pub fn half_life_days(&self) -> f64 {
        self.half_life_days
    }

    /// Share of conversions with a touch in the lookback, once trained
    pub fn coverage(&self) -> Option<f64> {
        self.coverage
    }

    /// Decay weight for a touch `lag` before the conversion; 0 outside the lookback.
    pub fn weight(&self, lag: Duration) -> f64 {
        if lag < Duration::zero() || lag > self.lookback {
            return 0.0;
        }
        let days = lag.num_seconds() as f64 / 86_400.0;
        (-days / self.half_life_days * std::f64::consts::LN_2).exp()
    }

    fn eligible<'a>(&self, journey: &'a Journey, at: DateTime<Utc>) -> impl Iterator<Item = &'a Touch> {
        let lookback = self.lookback;
        journey
            .touches
            .iter()
            .take_while(move |t| t.timestamp <= at)
            .filter(move |t| at - t.timestamp <= lookback)
    }

    /// Split every conversion in `journey` across its eligible touches.
    pub fn credit(&self, journey: &Journey) -> Vec<Credit> {
        let mut credits = Vec::new();
        for conversion in &journey.conversions {
            let weighted: Vec<(&Touch, f64)> = self
                .eligible(journey, conversion.timestamp)
                .map(|t| (t, self.weight(conversion.timestamp - t.timestamp)))
                .filter(|(_, w)| *w > 0.0)
                .collect();
            let total: f64 = weighted.iter().map(|(_, w)| w).sum();
            if total <= 0.0 {
                credits.push(Credit {
                    channel: conversion.channel.clone(),
                    campaign_id: conversion.campaign_id.clone(),
                    content_id: conversion.content_id.clone(),
                    revenue: conversion.revenue,
                    conversions: 1.0,
                });
                continue;
            }
            for (touch, w) in weighted {
                let share = w / total;
                credits.push(Credit {
                    channel: touch.channel.clone(),
                    campaign_id: touch.campaign_id.clone(),
                    content_id: touch.content_id.clone(),
                    revenue: conversion.revenue * share,
                    conversions: share,
                });
            }
        }
        credits
    }
}

impl Predictor for TimeDecayAttribution {
    type TrainingData = Journeys;
    type Input = Journey;
    type Output = Vec<Credit>;

    fn train(&mut self, data: &Journeys, guard: &RunGuard) -> Result<()> {
        guard.check("attribution_lags")?;
        let mut lags = Vec::new();
        let mut total = 0usize;
        for journey in &data.journeys {
            for conversion in &journey.conversions {
                total += 1;
                if let Some(last) = self.eligible(journey, conversion.timestamp).last() {
                    lags.push((conversion.timestamp - last.timestamp).num_seconds() as f64 / 86_400.0);
                }
            }
        }
        self.coverage = Some(if total == 0 {
            0.0
        } else {
            lags.len() as f64 / total as f64
        });
        if self.estimate_half_life && !lags.is_empty() {
            let lookback_days = self.lookback.num_days().max(1) as f64;
            self.half_life_days = median(&lags).clamp(MIN_HALF_LIFE_DAYS, lookback_days);
        }
        debug!(
            conversions = total,
            touched = lags.len(),
            half_life_days = self.half_life_days,
            "Trained touch model"
        );
        Ok(())
    }

    fn score(&self, journey: &Journey) -> Result<Vec<Credit>> {
        Ok(self.credit(journey))
    }

    fn confidence(&self) -> f64 {
        self.coverage.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn event(kind: EventType, day: i64, channel: &str) -> Event {
        Event::new("p1", kind, t0() + Duration::days(day), channel, "analytics", t0() + Duration::days(400))
    }

    #[test]
    fn test_weight_halves_per_half_life() {
        let model = TimeDecayAttribution::new(7.0, 30, false);
        assert!((model.weight(Duration::zero()) - 1.0).abs() < 1e-12);
        assert!((model.weight(Duration::days(7)) - 0.5).abs() < 1e-9);
        assert_eq!(model.weight(Duration::days(31)), 0.0);
        assert_eq!(model.weight(Duration::days(-1)), 0.0);
    }

    #[test]
    fn test_recent_touch_earns_more() {
        let events = [
            event(EventType::View, 0, "display"),
            event(EventType::Click, 7, "search"),
            event(EventType::Purchase, 7, "search").with_revenue(90.0),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        let journeys = Journeys::from_events(&refs);
        let model = TimeDecayAttribution::new(7.0, 30, false);
        let credits = model.credit(&journeys.journeys[0]);
        let display: f64 = credits.iter().filter(|c| c.channel == "display").map(|c| c.revenue).sum();
        let search: f64 = credits.iter().filter(|c| c.channel == "search").map(|c| c.revenue).sum();
        assert!((display + search - 90.0).abs() < 1e-9);
        assert!((search - 60.0).abs() < 1e-9);
        let conv: f64 = credits.iter().map(|c| c.conversions).sum();
        assert!((conv - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_untouched_conversion_credits_own_channel() {
        let events = [
            event(EventType::View, 0, "display"),
            event(EventType::Purchase, 60, "email").with_revenue(20.0),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        let journeys = Journeys::from_events(&refs);
        let model = TimeDecayAttribution::new(7.0, 30, false);
        let credits = model.credit(&journeys.journeys[0]);
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].channel, "email");
        assert_eq!(credits[0].revenue, 20.0);
    }

    #[test]
    fn test_training_estimates_half_life_and_coverage() {
        let events = [
            event(EventType::Click, 0, "search"),
            event(EventType::Purchase, 4, "search").with_revenue(10.0),
            event(EventType::Purchase, 100, "search").with_revenue(10.0),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        let journeys = Journeys::from_events(&refs);
        let mut model = TimeDecayAttribution::new(7.0, 30, true);
        model.train(&journeys, &RunGuard::unbounded("test")).unwrap();
        assert!((model.coverage().unwrap() - 0.5).abs() < 1e-12);
        assert!((model.half_life_days() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_journeys_independent_of_input_order() {
        let events = [
            event(EventType::Click, 3, "search"),
            event(EventType::View, 1, "display"),
        ];
        let forward: Vec<&Event> = events.iter().collect();
        let backward: Vec<&Event> = events.iter().rev().collect();
        assert_eq!(Journeys::from_events(&forward), Journeys::from_events(&backward));
    }
}

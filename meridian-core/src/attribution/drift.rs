//! Distribution drift against a reference baseline
//!
//! The caller supplies the baseline explicitly (typically the profile of the
//! window the models were last trained on). Each tracked feature is compared
//! with a smoothed categorical KL divergence; at or above the threshold a
//! [`DriftAlert`] is raised and a retrain request is queued.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::types::DriftAlert;
use crate::retrain::{RetrainQueue, RetrainRequest};
use crate::stats::{bin_label, kl_divergence};
use crate::types::{Component, Event};

pub const FEATURE_CHANNEL_MIX: &str = "channel_mix";
pub const FEATURE_EVENT_TYPE_MIX: &str = "event_type_mix";
pub const FEATURE_SPEND_HISTOGRAM: &str = "spend_histogram";

/// Category counts for each tracked feature
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftBaseline {
    pub channel_mix: BTreeMap<String, u64>,
    pub event_type_mix: BTreeMap<String, u64>,
    /// Spend on events with spend, bucketed by the configured edges
    pub spend_histogram: BTreeMap<String, u64>,
}

impl DriftBaseline {
    /// Profile a batch of events.
    pub fn from_events(events: &[&Event], spend_bin_edges: &[f64]) -> Self {
        let mut profile = Self::default();
        for event in events {
            *profile.channel_mix.entry(event.channel.clone()).or_default() += 1;
            *profile
                .event_type_mix
                .entry(event.event_type.as_str().to_string())
                .or_default() += 1;
            if event.spend > 0.0 {
                *profile
                    .spend_histogram
                    .entry(bin_label(event.spend, spend_bin_edges))
                    .or_default() += 1;
            }
        }
        profile
    }

    fn features(&self) -> [(&'static str, &BTreeMap<String, u64>); 3] {
        [
            (FEATURE_CHANNEL_MIX, &self.channel_mix),
            (FEATURE_EVENT_TYPE_MIX, &self.event_type_mix),
            (FEATURE_SPEND_HISTOGRAM, &self.spend_histogram),
        ]
    }

    /// KL divergence of `self` from `baseline`, per feature.
    ///
    /// A feature empty on both sides reports no drift.
    pub fn divergence_from(&self, baseline: &DriftBaseline, smoothing: f64) -> BTreeMap<String, f64> {
        self.features()
            .into_iter()
            .zip(baseline.features())
            .map(|((name, current), (_, reference))| {
                (name.to_string(), kl_divergence(current, reference, smoothing))
            })
            .collect()
    }
}

/// Turn divergences at or above `threshold` into alerts.
pub fn alerts(divergence: &BTreeMap<String, f64>, threshold: f64, at: DateTime<Utc>) -> Vec<DriftAlert> {
    divergence
        .iter()
        .filter(|(_, d)| **d >= threshold)
        .map(|(feature, d)| DriftAlert {
            feature: feature.clone(),
            divergence: *d,
            threshold,
            retrain_recommended: true,
            detected_at: at,
        })
        .collect()
}

/// Queue retrains for the models fed by the drifted features.
///
/// Never blocks: a full queue drops the request with a warning. Returns
/// the number of requests accepted.
pub fn recommend_retrain(queue: Option<&RetrainQueue>, alerts: &[DriftAlert]) -> usize {
    let Some(worst) = alerts
        .iter()
        .max_by(|a, b| a.divergence.total_cmp(&b.divergence))
    else {
        return 0;
    };
    let Some(queue) = queue else {
        warn!(
            feature = %worst.feature,
            divergence = worst.divergence,
            "Drift detected with no retrain queue attached"
        );
        return 0;
    };
    let features: Vec<&str> = alerts.iter().map(|a| a.feature.as_str()).collect();
    let reason = format!("drift in {}", features.join(", "));
    let accepted = [Component::Segmentation, Component::Predictive, Component::Attribution]
        .into_iter()
        .filter(|component| {
            queue.request(RetrainRequest {
                component: *component,
                reason: reason.clone(),
                divergence: Some(worst.divergence),
                requested_at: worst.detected_at,
            })
        })
        .count();
    info!(accepted, divergence = worst.divergence, %reason, "Retrain recommended");
    accepted
}

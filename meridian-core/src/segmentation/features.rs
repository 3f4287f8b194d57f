//! Per-profile behavioural features

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Event, EventType};

/// Feature names, in vector order
pub const FEATURE_NAMES: [&str; 9] = [
    "views",
    "clicks",
    "add_to_carts",
    "purchases",
    "spend",
    "revenue",
    "recency_days",
    "active_days",
    "channels",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

pub(crate) const RECENCY: usize = 6;

#[derive(Debug, Default)]
struct Accumulator {
    counts: [u64; 4],
    spend: f64,
    revenue: f64,
    last_seen: Option<DateTime<Utc>>,
    days: BTreeSet<NaiveDate>,
    channels: BTreeSet<String>,
}

impl Accumulator {
    fn add(&mut self, event: &Event) {
        match event.event_type {
            EventType::View => self.counts[0] += 1,
            EventType::Click => self.counts[1] += 1,
            EventType::AddToCart => self.counts[2] += 1,
            EventType::Purchase => self.counts[3] += 1,
            EventType::Other => {}
        }
        self.spend += event.spend;
        self.revenue += event.revenue;
        self.last_seen = Some(match self.last_seen {
            Some(prev) if prev >= event.timestamp => prev,
            _ => event.timestamp,
        });
        self.days.insert(event.timestamp.date_naive());
        if !self.channels.contains(&event.channel) {
            self.channels.insert(event.channel.clone());
        }
    }

    fn vector(&self, cutoff: DateTime<Utc>) -> [f64; FEATURE_COUNT] {
        let recency = self
            .last_seen
            .map(|t| (cutoff - t).num_seconds().max(0) as f64 / 86_400.0)
            .unwrap_or(0.0);
        [
            (self.counts[0] as f64).ln_1p(),
            (self.counts[1] as f64).ln_1p(),
            (self.counts[2] as f64).ln_1p(),
            (self.counts[3] as f64).ln_1p(),
            self.spend.ln_1p(),
            self.revenue.ln_1p(),
            recency,
            (self.days.len() as f64).ln_1p(),
            self.channels.len() as f64,
        ]
    }
}

/// Raw (unscaled) feature matrix keyed by profile, in profile-id order
#[derive(Debug, Clone, Default)]
pub struct ProfileFeatures {
    pub profile_ids: Vec<String>,
    pub rows: Vec<[f64; FEATURE_COUNT]>,
}

impl ProfileFeatures {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn index_of(&self, profile_id: &str) -> Option<usize> {
        self.profile_ids
            .binary_search_by(|p| p.as_str().cmp(profile_id))
            .ok()
    }
}

/// Build features from events at or before `cutoff`, measuring recency from `cutoff`.
///
/// Profiles with no events in range are omitted.
pub fn extract(events: &[&Event], cutoff: DateTime<Utc>) -> ProfileFeatures {
    let mut by_profile: BTreeMap<&str, Accumulator> = BTreeMap::new();
    for event in events.iter().filter(|e| e.timestamp <= cutoff) {
        by_profile
            .entry(event.profile_id.as_str())
            .or_default()
            .add(event);
    }
    let mut features = ProfileFeatures::default();
    for (profile, acc) in by_profile {
        features.profile_ids.push(profile.to_string());
        features.rows.push(acc.vector(cutoff));
    }
    features
}

/// Profiles with any activity in `(from, to]`
pub fn active_between(events: &[&Event], from: DateTime<Utc>, to: DateTime<Utc>) -> BTreeSet<String> {
    events
        .iter()
        .filter(|e| e.timestamp > from && e.timestamp <= to)
        .map(|e| e.profile_id.clone())
        .collect()
}

/// Z-score standardisation fitted on one matrix and applied to others
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl Scaler {
    pub fn fit(rows: &[[f64; FEATURE_COUNT]]) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut scales = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = s.sqrt();
            if *s < 1e-9 {
                *s = 1.0;
            }
        }
        Self { means, scales }
    }

    pub fn transform(&self, row: &[f64; FEATURE_COUNT]) -> Vec<f64> {
        row.iter()
            .zip(&self.means)
            .zip(&self.scales)
            .map(|((v, m), s)| (v - m) / s)
            .collect()
    }

    pub fn transform_all(&self, rows: &[[f64; FEATURE_COUNT]]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform(r)).collect()
    }
}

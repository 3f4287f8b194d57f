//! Segmentation configuration and run output

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::governance::QuarantinedEvent;
use crate::types::{ChurnScore, Segment};

/// Segmentation and churn settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Smallest cluster count searched
    pub min_clusters: usize,
    /// Largest cluster count searched
    pub max_clusters: usize,
    /// Silhouette at or above which a run is accepted
    pub silhouette_threshold: f64,
    /// Perturbed-seed retries before emitting a sub-threshold result
    pub max_retries: u32,
    /// Points sampled for silhouette evaluation
    pub silhouette_sample: usize,
    /// Profile ids listed per segment
    pub member_sample_size: usize,
    /// Fewer profiles than this is insufficient data
    pub min_profiles: usize,
    /// Minimum churned and retained profiles per horizon
    pub min_labels_per_class: usize,
    /// Ridge precision for the churn models
    pub churn_prior_precision: f64,
    /// Largest accepted batch
    pub max_batch_events: usize,
    pub seed: u64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_clusters: 3,
            max_clusters: 8,
            silhouette_threshold: 0.45,
            max_retries: 3,
            silhouette_sample: 2_000,
            member_sample_size: 10,
            min_profiles: 50,
            min_labels_per_class: 5,
            churn_prior_precision: 1.0,
            max_batch_events: 100_000,
            seed: 42,
        }
    }
}

/// Acceptance metrics for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationSummary {
    pub silhouette: f64,
    pub k: usize,
    /// Best result stayed below the silhouette threshold after all retries
    pub sub_threshold: bool,
    pub attempts: u32,
    pub auc_30d: Option<f64>,
    pub auc_60d: Option<f64>,
    pub auc_90d: Option<f64>,
    pub profiles: usize,
    pub quarantined: usize,
}

/// Everything one segmentation run publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationOutput {
    pub run_id: Uuid,
    pub as_of: DateTime<Utc>,
    /// Ordered by size, largest first; `cluster_id` is the index
    pub segments: Vec<Segment>,
    /// Profile id to cluster id
    pub assignments: BTreeMap<String, usize>,
    /// One per profile, in profile-id order
    pub churn_scores: Vec<ChurnScore>,
    pub summary: SegmentationSummary,
    #[serde(default)]
    pub quarantined: Vec<QuarantinedEvent>,
}

impl SegmentationOutput {
    pub fn segment_of(&self, profile_id: &str) -> Option<&Segment> {
        self.assignments
            .get(profile_id)
            .and_then(|&c| self.segments.get(c))
    }

    pub fn churn_for(&self, profile_id: &str) -> Option<&ChurnScore> {
        self.churn_scores
            .binary_search_by(|s| s.profile_id.as_str().cmp(profile_id))
            .ok()
            .map(|i| &self.churn_scores[i])
    }

    /// Members of `cluster_id`, in profile-id order
    pub fn members(&self, cluster_id: usize) -> impl Iterator<Item = &str> {
        self.assignments
            .iter()
            .filter(move |(_, c)| **c == cluster_id)
            .map(|(p, _)| p.as_str())
    }
}

//! Batch segmentation run
//!
//! One run ingests a bounded event batch, clusters profiles, labels the
//! clusters and scores churn for every profile. Nothing is returned unless
//! every stage completes within the run guard.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::churn::{ChurnModel, build_training_set};
use super::clustering::{KMeansFit, kmeans, silhouette, silhouette_sample};
use super::features::{FEATURE_COUNT, FEATURE_NAMES, Scaler, extract};
use super::types::{SegmentationConfig, SegmentationOutput, SegmentationSummary};
use crate::error::{MeridianError, Result};
use crate::governance::ingest;
use crate::guard::RunGuard;
use crate::predictor::Predictor;
use crate::types::{ChurnScore, Event, Segment};

/// Seed offset between retry attempts
const RETRY_SEED_STRIDE: u64 = 7_919;

/// z-score above which a centroid feature counts as elevated
const ELEVATED_Z: f64 = 0.5;

const PURCHASES: usize = 3;
const REVENUE: usize = 5;
const RECENCY: usize = super::features::RECENCY;
const VIEWS: usize = 0;
const CLICKS: usize = 1;

/// k-means over a range of k, keeping the best silhouette
#[derive(Debug, Clone)]
pub struct KMeansSegmenter {
    config: SegmentationConfig,
    fit: Option<KMeansFit>,
    silhouette: f64,
    attempts: u32,
}

impl KMeansSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self {
            config,
            fit: None,
            silhouette: 0.0,
            attempts: 0,
        }
    }

    pub fn fit(&self) -> Option<&KMeansFit> {
        self.fit.as_ref()
    }

    pub fn silhouette(&self) -> f64 {
        self.silhouette
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn sub_threshold(&self) -> bool {
        self.silhouette < self.config.silhouette_threshold
    }
}

impl Predictor for KMeansSegmenter {
    type TrainingData = [Vec<f64>];
    type Input = [f64];
    type Output = usize;

    fn train(&mut self, points: &[Vec<f64>], guard: &RunGuard) -> Result<()> {
        let needed = self.config.min_clusters.max(2) * 2;
        if points.len() < needed {
            return Err(MeridianError::insufficient(
                "segmentation points",
                needed,
                points.len(),
            ));
        }
        let max_k = self.config.max_clusters.min(points.len() - 1);
        if max_k < 2 {
            return Err(MeridianError::Config(format!(
                "segmentation needs max_clusters of at least 2, got {}",
                self.config.max_clusters
            )));
        }
        let min_k = self.config.min_clusters.clamp(2, max_k);
        let sample = silhouette_sample(
            points.len(),
            self.config.silhouette_sample,
            self.config.seed,
        );
        guard.charge_items::<usize>(points.len() * (max_k - min_k + 1))?;

        let mut best: Option<(f64, KMeansFit)> = None;
        let mut attempts = 0;
        for attempt in 0..=self.config.max_retries {
            attempts += 1;
            let seed = self
                .config
                .seed
                .wrapping_add(u64::from(attempt) * RETRY_SEED_STRIDE);
            for k in min_k..=max_k {
                guard.check("kmeans")?;
                let fit = kmeans(points, k, seed);
                let score = silhouette(points, &fit.assignments, fit.k, &sample);
                debug!(attempt, k, silhouette = score, inertia = fit.inertia, "Evaluated k");
                // strict improvement keeps the smaller k on ties
                if best.as_ref().is_none_or(|(b, _)| score > *b) {
                    best = Some((score, fit));
                }
            }
            if let Some((score, _)) = &best
                && *score >= self.config.silhouette_threshold
            {
                break;
            }
            if attempt < self.config.max_retries {
                warn!(
                    attempt,
                    threshold = self.config.silhouette_threshold,
                    "Silhouette below threshold, retrying with perturbed seed"
                );
            }
        }

        let (score, fit) = best.ok_or_else(|| {
            MeridianError::insufficient("segmentation cluster range", 1, 0)
        })?;
        self.silhouette = score;
        self.attempts = attempts;
        self.fit = Some(fit);
        Ok(())
    }

    fn score(&self, point: &[f64]) -> Result<usize> {
        let fit = self
            .fit
            .as_ref()
            .ok_or_else(|| MeridianError::NotFound("trained segmenter".into()))?;
        let mut best = (0, f64::INFINITY);
        for (i, c) in fit.centroids.iter().enumerate() {
            let d = super::clustering::euclidean_distance(point, c);
            if d < best.1 {
                best = (i, d);
            }
        }
        Ok(best.0)
    }

    fn confidence(&self) -> f64 {
        if self.fit.is_none() {
            return 0.0;
        }
        self.silhouette.clamp(0.0, 1.0)
    }
}

/// Base label from the centroid's elevated features
fn base_label(centroid: &[f64]) -> &'static str {
    if centroid[PURCHASES] > ELEVATED_Z || centroid[REVENUE] > ELEVATED_Z {
        "high_value"
    } else if centroid[RECENCY] > ELEVATED_Z {
        "dormant"
    } else if centroid[VIEWS] > ELEVATED_Z || centroid[CLICKS] > ELEVATED_Z {
        "engaged_browser"
    } else {
        "casual"
    }
}

fn top_features(centroid: &[f64], n: usize) -> Vec<String> {
    let mut ranked: Vec<usize> = (0..centroid.len()).collect();
    ranked.sort_by(|&a, &b| centroid[b].abs().total_cmp(&centroid[a].abs()).then(a.cmp(&b)));
    ranked
        .into_iter()
        .take(n)
        .map(|i| FEATURE_NAMES[i].to_string())
        .collect()
}

/// Runs segmentation and churn scoring over event batches
#[derive(Debug, Clone, Default)]
pub struct SegmentationEngine {
    config: SegmentationConfig,
}

impl SegmentationEngine {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    #[instrument(skip(self, events, guard), fields(events = events.len()))]
    pub fn run(
        &self,
        events: &[Event],
        as_of: DateTime<Utc>,
        guard: &RunGuard,
    ) -> Result<SegmentationOutput> {
        guard.check("ingest")?;
        let report = ingest(events, as_of);
        if report.accepted.len() > self.config.max_batch_events {
            return Err(MeridianError::DataQuality(format!(
                "batch of {} events exceeds limit of {}",
                report.accepted.len(),
                self.config.max_batch_events
            )));
        }

        let features = extract(&report.accepted, as_of);
        if features.len() < self.config.min_profiles {
            return Err(MeridianError::insufficient(
                "segmentation profiles",
                self.config.min_profiles,
                features.len(),
            ));
        }
        guard.charge_items::<f64>(features.len() * FEATURE_COUNT * 2)?;

        guard.check("features")?;
        let scaler = Scaler::fit(&features.rows);
        let points = scaler.transform_all(&features.rows);

        let mut segmenter = KMeansSegmenter::new(self.config.clone());
        segmenter.train(&points, guard)?;
        let fit = segmenter
            .fit()
            .ok_or_else(|| MeridianError::NotFound("trained segmenter".into()))?;

        // Re-index clusters by size, largest first
        let mut sizes = vec![0usize; fit.k];
        for &a in &fit.assignments {
            sizes[a] += 1;
        }
        let mut order: Vec<usize> = (0..fit.k).filter(|&c| sizes[c] > 0).collect();
        order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(a.cmp(&b)));
        let mut remap = vec![usize::MAX; fit.k];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new;
        }

        let mut assignments = BTreeMap::new();
        let mut members: Vec<Vec<&str>> = vec![Vec::new(); order.len()];
        for (profile, &a) in features.profile_ids.iter().zip(&fit.assignments) {
            let cluster = remap[a];
            assignments.insert(profile.clone(), cluster);
            members[cluster].push(profile.as_str());
        }

        let mut label_counts: BTreeMap<&str, usize> = BTreeMap::new();
        let segments: Vec<Segment> = order
            .iter()
            .enumerate()
            .map(|(cluster_id, &old)| {
                let centroid = fit.centroids[old].clone();
                let base = base_label(&centroid);
                let seen = label_counts.entry(base).or_insert(0);
                *seen += 1;
                let label = if *seen == 1 {
                    base.to_string()
                } else {
                    format!("{base}_{seen}")
                };
                Segment {
                    cluster_id,
                    label,
                    top_features: top_features(&centroid, 3),
                    member_sample: members[cluster_id]
                        .iter()
                        .take(self.config.member_sample_size)
                        .map(|s| s.to_string())
                        .collect(),
                    size: members[cluster_id].len(),
                    centroid,
                }
            })
            .collect();

        guard.check("churn")?;
        let training = build_training_set(&report.accepted, as_of);
        let mut churn = ChurnModel::new(
            self.config.churn_prior_precision,
            self.config.min_profiles,
            self.config.min_labels_per_class,
        );
        churn.train(&training, guard)?;

        let mut churn_scores = Vec::with_capacity(features.len());
        for (profile, row) in features.profile_ids.iter().zip(&features.rows) {
            let [risk_30d, risk_60d, risk_90d] = churn.score(row)?;
            churn_scores.push(ChurnScore {
                profile_id: profile.clone(),
                risk_30d,
                risk_60d,
                risk_90d,
                as_of,
            });
        }
        guard.check("publish")?;

        let aucs = churn.holdout_auc();
        let summary = SegmentationSummary {
            silhouette: segmenter.silhouette(),
            k: segments.len(),
            sub_threshold: segmenter.sub_threshold(),
            attempts: segmenter.attempts(),
            auc_30d: aucs.first().copied().flatten(),
            auc_60d: aucs.get(1).copied().flatten(),
            auc_90d: aucs.get(2).copied().flatten(),
            profiles: features.len(),
            quarantined: report.quarantined.len(),
        };
        info!(
            k = summary.k,
            silhouette = summary.silhouette,
            sub_threshold = summary.sub_threshold,
            auc_30d = ?summary.auc_30d,
            profiles = summary.profiles,
            "Segmentation run complete"
        );

        Ok(SegmentationOutput {
            run_id: Uuid::now_v7(),
            as_of,
            segments,
            assignments,
            churn_scores,
            summary,
            quarantined: report.quarantined,
        })
    }
}

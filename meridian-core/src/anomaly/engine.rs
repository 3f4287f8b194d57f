//! Multi-metric anomaly engine
//!
//! Holds one [`RobustDetector`] per metric name, the latest fatigue
//! forecasts and a short memory of recent anomalies for co-occurrence
//! hints. Scoring one point is synchronous and touches only that metric's
//! window.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::cost::{CostReport, Workload};
use super::detector::{DetectorStep, RobustDetector};
use super::response::{fatigue_explains, propose_actions, root_cause_hints, severity};
use super::types::{Anomaly, AnomalyConfig, DetectionOutcome, LabelledPoint, MetricPoint};
use crate::error::{MeridianError, Result};
use crate::predictive::PredictiveOutput;
use crate::stats::DetectionScore;

#[derive(Debug, Clone)]
pub struct AnomalyEngine {
    config: AnomalyConfig,
    detectors: BTreeMap<String, RobustDetector>,
    fatigue: BTreeMap<String, f64>,
    fatigue_run: Option<Uuid>,
    recent: VecDeque<(DateTime<Utc>, String)>,
    points: u64,
    anomalies: u64,
    suppressed: u64,
    scoring_us: f64,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
}

impl AnomalyEngine {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            detectors: BTreeMap::new(),
            fatigue: BTreeMap::new(),
            fatigue_run: None,
            recent: VecDeque::new(),
            points: 0,
            anomalies: 0,
            suppressed: 0,
            scoring_us: 0.0,
            first_seen: None,
            last_seen: None,
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Replace fatigue forecasts with those from a predictive run.
    pub fn update_fatigue(&mut self, output: &PredictiveOutput) {
        self.fatigue = output
            .fatigue
            .iter()
            .map(|f| (f.creative_id.clone(), f.fatigue_probability_7d))
            .collect();
        self.fatigue_run = Some(output.run_id);
        debug!(run_id = %output.run_id, creatives = self.fatigue.len(), "Fatigue forecasts updated");
    }

    pub fn with_fatigue(mut self, fatigue: BTreeMap<String, f64>) -> Self {
        self.fatigue = fatigue;
        self
    }

    /// Run id of the predictive output behind the current forecasts
    pub fn fatigue_run(&self) -> Option<Uuid> {
        self.fatigue_run
    }

    fn co_occurring(&mut self, metric: &str, at: DateTime<Utc>) -> Vec<String> {
        let window = Duration::seconds(self.config.co_occurrence_secs);
        while let Some((ts, _)) = self.recent.front()
            && *ts < at - window
        {
            self.recent.pop_front();
        }
        let others: BTreeSet<String> = self
            .recent
            .iter()
            .filter(|(ts, m)| m != metric && (*ts - at).abs() <= window)
            .map(|(_, m)| m.clone())
            .collect();
        others.into_iter().collect()
    }

    /// Score one point and update that metric's baseline.
    pub fn observe(&mut self, point: &MetricPoint) -> Result<DetectionOutcome> {
        let received = Instant::now();
        if point.metric.is_empty() {
            return Err(MeridianError::DataQuality("metric point without a metric name".into()));
        }
        if !point.value.is_finite() {
            return Err(MeridianError::DataQuality(format!(
                "metric {} value {}",
                point.metric, point.value
            )));
        }
        self.points += 1;
        self.first_seen = Some(self.first_seen.map_or(point.timestamp, |t| t.min(point.timestamp)));
        self.last_seen = Some(self.last_seen.map_or(point.timestamp, |t| t.max(point.timestamp)));

        let config = &self.config;
        let detector = self
            .detectors
            .entry(point.metric.clone())
            .or_insert_with(|| RobustDetector::new(config));

        // a move the fatigue forecast predicted is normal and joins the baseline
        if let Some(score) = detector.score(point.value)
            && score.robust_z.abs() >= config.z_threshold
            && let Some((creative_id, p)) = fatigue_explains(point, score.direction, &self.fatigue, config)
        {
            detector.accept(point.value);
            self.suppressed += 1;
            debug!(metric = %point.metric, %creative_id, fatigue = p, "Predicted decline suppressed");
            self.record_latency(received);
            return Ok(DetectionOutcome::Suppressed {
                metric: point.metric.clone(),
                creative_id,
                fatigue_probability_7d: p,
                robust_z: score.robust_z,
            });
        }

        let outcome = match detector.observe(point.value) {
            DetectorStep::WarmingUp => DetectionOutcome::WarmingUp,
            DetectorStep::Normal(score) => DetectionOutcome::Normal {
                robust_z: score.robust_z,
            },
            DetectorStep::LevelShift { new_baseline } => {
                info!(metric = %point.metric, new_baseline, "Sustained shift accepted as new level");
                DetectionOutcome::LevelShift {
                    metric: point.metric.clone(),
                    new_baseline,
                }
            }
            DetectorStep::Anomalous { score, consecutive } => {
                let co_occurring = self.co_occurring(&point.metric, point.timestamp);
                self.recent.push_back((point.timestamp, point.metric.clone()));
                self.anomalies += 1;
                let anomaly = Anomaly {
                    anomaly_id: Uuid::now_v7(),
                    timestamp: point.timestamp,
                    metric: point.metric.clone(),
                    value: point.value,
                    baseline: score.baseline,
                    robust_z: score.robust_z,
                    ratio: score.ratio,
                    direction: score.direction,
                    severity: severity(&score, &self.config),
                    root_cause_hints: root_cause_hints(point, &score, consecutive, &co_occurring, &self.fatigue),
                    proposed_actions: propose_actions(point, score.direction),
                    detection_latency_ms: received.elapsed().as_secs_f64() * 1_000.0,
                };
                info!(
                    metric = %anomaly.metric,
                    severity = %anomaly.severity,
                    robust_z = anomaly.robust_z,
                    ratio = anomaly.ratio,
                    "Anomaly detected"
                );
                DetectionOutcome::Anomaly(anomaly)
            }
        };
        self.record_latency(received);
        Ok(outcome)
    }

    fn record_latency(&mut self, received: Instant) {
        self.scoring_us += received.elapsed().as_secs_f64() * 1e6;
    }

    pub fn workload(&self) -> Workload {
        let span_minutes = match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => ((last - first).num_seconds() as f64 / 60.0).max(1.0),
            _ => 0.0,
        };
        Workload {
            metrics: self.detectors.len(),
            points: self.points,
            anomalies: self.anomalies,
            mean_scoring_us: if self.points > 0 {
                self.scoring_us / self.points as f64
            } else {
                0.0
            },
            span_minutes,
        }
    }

    pub fn cost_report(&self) -> CostReport {
        CostReport::estimate(&self.workload(), &self.config)
    }

    pub fn summary(&self) -> AnomalySummary {
        AnomalySummary {
            metrics: self.detectors.len(),
            points: self.points,
            anomalies: self.anomalies,
            suppressed: self.suppressed,
        }
    }
}

/// Counts since the engine started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub metrics: usize,
    pub points: u64,
    pub anomalies: u64,
    pub suppressed: u64,
}

/// Detection quality on a labelled stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub score: DetectionScore,
    pub precision: f64,
    pub recall: f64,
    pub false_positive_rate: f64,
    pub max_latency_ms: f64,
    pub anomalies: Vec<Anomaly>,
    pub cost: CostReport,
}

/// Replay a labelled stream through a fresh engine and score its flags.
#[instrument(skip_all, fields(points = points.len()))]
pub fn evaluate(
    config: &AnomalyConfig,
    fatigue: &BTreeMap<String, f64>,
    points: &[LabelledPoint],
) -> Result<EvaluationReport> {
    let mut engine = AnomalyEngine::new(config.clone()).with_fatigue(fatigue.clone());
    let mut flagged = Vec::with_capacity(points.len());
    let mut truth = Vec::with_capacity(points.len());
    let mut anomalies = Vec::new();
    for labelled in points {
        let outcome = engine.observe(&labelled.point)?;
        flagged.push(outcome.is_flagged());
        truth.push(labelled.is_anomaly);
        if let DetectionOutcome::Anomaly(a) = outcome {
            anomalies.push(a);
        }
    }
    let score = DetectionScore::from_labels(&flagged, &truth);
    let max_latency_ms = anomalies
        .iter()
        .map(|a| a.detection_latency_ms)
        .fold(0.0, f64::max);
    info!(
        precision = score.precision(),
        recall = score.recall(),
        fpr = score.false_positive_rate(),
        "Labelled stream evaluated"
    );
    Ok(EvaluationReport {
        precision: score.precision(),
        recall: score.recall(),
        false_positive_rate: score.false_positive_rate(),
        score,
        max_latency_ms,
        anomalies,
        cost: engine.cost_report(),
    })
}

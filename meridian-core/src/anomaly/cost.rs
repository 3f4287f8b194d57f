//! Footprint estimate for the anomaly engine and ways to shrink it

use serde::{Deserialize, Serialize};

use super::types::AnomalyConfig;

const MINUTES_PER_DAY: f64 = 1_440.0;
/// Serialized size of one point on the wire, before compression
const WIRE_BYTES_PER_POINT: f64 = 96.0;
/// Serialized size of one anomaly with hints and actions
const WIRE_BYTES_PER_ANOMALY: f64 = 1_024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostArea {
    Inference,
    Storage,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TacticKind {
    Batching,
    Compression,
    Caching,
    Downsampling,
}

/// One concrete way to cut cost, with its expected effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTactic {
    pub tactic: TacticKind,
    pub area: CostArea,
    pub action: String,
    /// Expected fraction of that area's cost removed
    pub estimated_saving: f64,
}

/// Observed workload the estimate is scaled from
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub metrics: usize,
    pub points: u64,
    pub anomalies: u64,
    /// Mean scoring time per point, in microseconds
    pub mean_scoring_us: f64,
    /// Span the points cover, in minutes
    pub span_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub metrics: usize,
    pub points_per_minute: f64,
    pub inference_cpu_ms_per_day: f64,
    /// Rolling windows held in memory
    pub resident_bytes: u64,
    pub storage_bytes_per_day: f64,
    pub network_bytes_per_day: f64,
    pub tactics: Vec<CostTactic>,
}

impl CostReport {
    pub fn estimate(workload: &Workload, config: &AnomalyConfig) -> Self {
        let points_per_minute = if workload.span_minutes > 0.0 {
            workload.points as f64 / workload.span_minutes
        } else {
            workload.metrics as f64
        };
        let points_per_day = points_per_minute * MINUTES_PER_DAY;
        let anomalies_per_day = if workload.points > 0 {
            points_per_day * workload.anomalies as f64 / workload.points as f64
        } else {
            0.0
        };
        let window_bytes = (config.window * size_of::<f64>()) as u64;

        Self {
            metrics: workload.metrics,
            points_per_minute,
            inference_cpu_ms_per_day: points_per_day * workload.mean_scoring_us / 1_000.0,
            resident_bytes: workload.metrics as u64 * window_bytes,
            storage_bytes_per_day: points_per_day * config.bytes_per_point as f64,
            network_bytes_per_day: points_per_day * WIRE_BYTES_PER_POINT
                + anomalies_per_day * WIRE_BYTES_PER_ANOMALY,
            tactics: tactics(config),
        }
    }
}

fn tactics(config: &AnomalyConfig) -> Vec<CostTactic> {
    // incremental median structures would avoid re-sorting the window per point
    let resort_share = 1.0 - 1.0 / (config.window.max(2) as f64).log2();
    vec![
        CostTactic {
            tactic: TacticKind::Batching,
            area: CostArea::Network,
            action: "ship points in one-minute batches per source instead of one request per point".into(),
            estimated_saving: 0.6,
        },
        CostTactic {
            tactic: TacticKind::Compression,
            area: CostArea::Storage,
            action: "delta-encode timestamps and compress retained points per metric".into(),
            estimated_saving: 0.7,
        },
        CostTactic {
            tactic: TacticKind::Caching,
            area: CostArea::Inference,
            action: "keep a sorted window per metric and update the median incrementally".into(),
            estimated_saving: resort_share.clamp(0.0, 0.9),
        },
        CostTactic {
            tactic: TacticKind::Downsampling,
            area: CostArea::Storage,
            action: "retain minute points for one day, then hourly median and MAD only".into(),
            estimated_saving: 0.95,
        },
    ]
}

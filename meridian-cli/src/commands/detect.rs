use super::{print_json, read_json};
use anyhow::Result;
use clap::Args;
use meridian_core::anomaly::{Anomaly, AnomalyEngine, AnomalySummary, CostReport, DetectionOutcome, LabelledPoint, evaluate};
use meridian_core::{MeridianConfig, MetricPoint};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args)]
pub struct DetectArgs {
    /// JSON array of metric points, in time order
    #[arg(long)]
    pub points: PathBuf,
    /// Points carry an `is_anomaly` label; report precision and recall
    #[arg(long)]
    pub labelled: bool,
    /// JSON map of creative id to 7-day fatigue probability
    #[arg(long)]
    pub fatigue: Option<PathBuf>,
}

#[derive(Serialize)]
struct DetectReport {
    anomalies: Vec<Anomaly>,
    suppressed: usize,
    summary: AnomalySummary,
    cost: CostReport,
}

pub fn run(args: DetectArgs, config: &MeridianConfig) -> Result<()> {
    let fatigue: BTreeMap<String, f64> = match &args.fatigue {
        Some(path) => read_json(path)?,
        None => BTreeMap::new(),
    };

    if args.labelled {
        let points: Vec<LabelledPoint> = read_json(&args.points)?;
        let report = evaluate(&config.anomaly, &fatigue, &points)?;
        return print_json(&report);
    }

    let points: Vec<MetricPoint> = read_json(&args.points)?;
    let mut engine = AnomalyEngine::new(config.anomaly.clone()).with_fatigue(fatigue);
    let mut anomalies = Vec::new();
    let mut suppressed = 0;
    for point in &points {
        match engine.observe(point) {
            Ok(DetectionOutcome::Anomaly(anomaly)) => anomalies.push(anomaly),
            Ok(DetectionOutcome::Suppressed { .. }) => suppressed += 1,
            Ok(_) => {}
            Err(e) => warn!(metric = %point.metric, error = %e, "Point rejected"),
        }
    }

    let report = DetectReport {
        anomalies,
        suppressed,
        summary: engine.summary(),
        cost: engine.cost_report(),
    };
    info!(anomalies = report.anomalies.len(), suppressed, "Detection finished");
    print_json(&report)
}

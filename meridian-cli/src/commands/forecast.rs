use super::{as_of, print_json, read_json};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use meridian_core::{CreativeSeries, Event, MeridianConfig, PredictiveEngine, RunGuard, SegmentationEngine};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args)]
pub struct ForecastArgs {
    /// JSON array of creative daily series
    #[arg(long)]
    pub series: PathBuf,
    /// JSON array of events; when given, segments are built and LTV is forecast
    #[arg(long)]
    pub events: Option<PathBuf>,
    /// Evaluation time (RFC 3339), defaults to now
    #[arg(long)]
    pub as_of: Option<DateTime<Utc>>,
}

pub fn run(args: ForecastArgs, config: &MeridianConfig) -> Result<()> {
    let now = as_of(args.as_of);
    let series: Vec<CreativeSeries> = read_json(&args.series)?;
    let events: Vec<Event> = match &args.events {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };

    let segmentation = if events.is_empty() {
        None
    } else {
        let guard = RunGuard::new("segmentation", config.limits.segmentation, CancellationToken::new());
        match SegmentationEngine::new(config.segmentation.clone()).run(&events, now, &guard) {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(error = %e, "Segmentation failed, forecasting fatigue only");
                None
            }
        }
    };

    let engine = PredictiveEngine::new(config.predictive.clone());
    let guard = RunGuard::new("predictive", config.limits.predictive, CancellationToken::new());
    let output = engine.run(&series, &events, segmentation.as_ref(), now, &guard)?;
    info!(
        creatives = output.fatigue.len(),
        excluded = output.excluded_creatives.len(),
        ltv = output.ltv.len(),
        "Forecast finished"
    );
    print_json(&output)
}

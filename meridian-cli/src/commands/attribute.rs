use super::{as_of, print_json, read_json};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use meridian_core::attribution::AttributionInput;
use meridian_core::{AttributionEngine, Event, MeridianConfig, RunGuard};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Args)]
pub struct AttributeArgs {
    /// JSON attribution input (events, campaigns, ledger, reference ROI)
    #[arg(long)]
    pub input: PathBuf,
    /// JSON array of prior-window events to profile as the drift baseline
    #[arg(long)]
    pub baseline_events: Option<PathBuf>,
    /// Window end (RFC 3339), defaults to now
    #[arg(long)]
    pub as_of: Option<DateTime<Utc>>,
}

pub fn run(args: AttributeArgs, config: &MeridianConfig) -> Result<()> {
    let now = as_of(args.as_of);
    let mut input: AttributionInput = read_json(&args.input)?;
    let engine = AttributionEngine::new(config.attribution.clone());
    if let Some(path) = &args.baseline_events {
        let prior: Vec<Event> = read_json(path)?;
        input.baseline = Some(engine.baseline(&prior, now));
    }

    let guard = RunGuard::new("attribution", config.limits.attribution, CancellationToken::new());
    let output = engine.run(&input, now, &guard)?;
    info!(
        channels = output.summary.channels,
        drift_alerts = output.drift_alerts.len(),
        "Attribution finished"
    );
    print_json(&output)
}

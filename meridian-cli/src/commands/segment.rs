use super::{as_of, print_json, read_json};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use meridian_core::{Event, MeridianConfig, RunGuard, SegmentationEngine};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Args)]
pub struct SegmentArgs {
    /// JSON array of events
    #[arg(long)]
    pub events: PathBuf,
    /// Evaluation time (RFC 3339), defaults to now
    #[arg(long)]
    pub as_of: Option<DateTime<Utc>>,
}

pub fn run(args: SegmentArgs, config: &MeridianConfig) -> Result<()> {
    let events: Vec<Event> = read_json(&args.events)?;
    let engine = SegmentationEngine::new(config.segmentation.clone());
    let guard = RunGuard::new("segmentation", config.limits.segmentation, CancellationToken::new());
    let output = engine.run(&events, as_of(args.as_of), &guard)?;
    info!(segments = output.segments.len(), "Segmentation finished");
    print_json(&output)
}

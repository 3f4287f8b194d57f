use super::{as_of, print_json, read_json};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use meridian_core::store::ComponentHealth;
use meridian_core::{BatchInputs, BatchReport, Component, MeridianConfig, Orchestrator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args)]
pub struct BatchArgs {
    /// JSON batch inputs (events, creative series, campaigns, baseline)
    #[arg(long)]
    pub inputs: PathBuf,
    /// Evaluation time (RFC 3339), defaults to now
    #[arg(long)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct BatchOutput {
    report: BatchReport,
    health: BTreeMap<Component, ComponentHealth>,
}

pub async fn run(args: BatchArgs, config: &MeridianConfig) -> Result<()> {
    let inputs: BatchInputs = read_json(&args.inputs)?;
    let (orchestrator, retrain_rx) = Orchestrator::new(config);
    let shutdown = CancellationToken::new();
    let worker = orchestrator.start_retrain_worker(retrain_rx, shutdown.clone());

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling batch");
            interrupt.cancel();
        }
    });

    let report = orchestrator
        .run_batch(Arc::new(inputs), as_of(args.as_of), &shutdown)
        .await;
    shutdown.cancel();
    let stopped = worker.await?;
    info!(worker = ?stopped, pending_retrains = orchestrator.flags().len(), "Batch finished");

    print_json(&BatchOutput {
        report,
        health: orchestrator.store().health(),
    })
}

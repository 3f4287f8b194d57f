use super::{print_json, read_json};
use anyhow::Result;
use clap::Args;
use meridian_core::allocator::{SimulationConfig, simulate};
use meridian_core::MeridianConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct SimulateArgs {
    /// JSON simulation setup (arms with true rates, ticks, budget, traffic)
    #[arg(long)]
    pub setup: Option<PathBuf>,
    /// Override the number of ticks
    #[arg(long)]
    pub ticks: Option<u64>,
    /// Override the random seed
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run(args: SimulateArgs, config: &MeridianConfig) -> Result<()> {
    let mut setup: SimulationConfig = match &args.setup {
        Some(path) => read_json(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(ticks) = args.ticks {
        setup.ticks = ticks;
    }
    if let Some(seed) = args.seed {
        setup.seed = seed;
    }

    let report = simulate(&setup, &config.allocator)?;
    info!(
        regret_ratio = report.regret_ratio,
        escalations = report.escalations,
        "Simulation finished"
    );
    print_json(&report)
}

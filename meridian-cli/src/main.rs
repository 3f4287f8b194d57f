use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "meridian", about = "Decision intelligence for marketing spend")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file layered over the user and project configs
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster profiles and score churn risk
    Segment(commands::segment::SegmentArgs),
    /// Forecast creative fatigue and segment LTV
    Forecast(commands::forecast::ForecastArgs),
    /// Attribute conversions, estimate CLV and check drift
    Attribute(commands::attribute::AttributeArgs),
    /// Decide budget allocations for one or more ticks
    Allocate(commands::allocate::AllocateArgs),
    /// Benchmark the allocator against simulated arms
    Simulate(commands::simulate::SimulateArgs),
    /// Detect anomalies in metric streams
    Detect(commands::detect::DetectArgs),
    /// Run the batch components together
    Batch(commands::batch::BatchArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = config::ConfigLoader::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Segment(args) => commands::segment::run(args, &config),
        Commands::Forecast(args) => commands::forecast::run(args, &config),
        Commands::Attribute(args) => commands::attribute::run(args, &config),
        Commands::Allocate(args) => commands::allocate::run(args, &config).await,
        Commands::Simulate(args) => commands::simulate::run(args, &config),
        Commands::Detect(args) => commands::detect::run(args, &config),
        Commands::Batch(args) => commands::batch::run(args, &config).await,
        Commands::Config(args) => commands::config::run(args, &config),
    }
}

use super::{print_json, read_json};
use anyhow::Result;
use clap::Args;
use meridian_core::allocator::{AllocationDecision, AllocatorService, LedgerEntry, TickRequest, Verdict};
use meridian_core::MeridianConfig;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args)]
pub struct AllocateArgs {
    /// JSON array of tick requests, decided in order against one ledger
    #[arg(long)]
    pub requests: PathBuf,
    /// Approve every escalated decision as this reviewer
    #[arg(long)]
    pub approve_as: Option<String>,
}

#[derive(Serialize)]
struct AllocateReport {
    decisions: Vec<AllocationDecision>,
    /// Escalated decisions still waiting for a human
    pending_review: usize,
    ledger: Vec<LedgerEntry>,
}

pub async fn run(args: AllocateArgs, config: &MeridianConfig) -> Result<()> {
    let requests: Vec<TickRequest> = read_json(&args.requests)?;
    let service = AllocatorService::new(config.allocator.clone());

    let mut decisions = Vec::with_capacity(requests.len());
    for request in requests {
        let mut decision = service.decide_tick(request).await?;
        if decision.needs_human()
            && let Some(reviewer) = &args.approve_as
        {
            match service
                .resolve_review(
                    decision.decision_id,
                    Verdict::Approved {
                        reviewer: reviewer.clone(),
                    },
                )
                .await
            {
                Ok(approved) => decision = approved,
                Err(e) => warn!(decision_id = %decision.decision_id, error = %e, "Approval refused"),
            }
        }
        decisions.push(decision);
    }

    let report = AllocateReport {
        pending_review: service.reviews().len(),
        ledger: service.ledgers().all_entries().await?,
        decisions,
    };
    info!(
        decisions = report.decisions.len(),
        pending_review = report.pending_review,
        "Allocation finished"
    );
    print_json(&report)
}

//! Online allocation service and its tick loop
//!
//! A tick is decided on the blocking pool under a hard deadline; a late
//! decision is a failed tick and nothing is written. Confident decisions
//! then commit through the campaign's ledger actor, escalated ones wait in
//! the review queue until a verdict arrives.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::decision::{DecisionState, Verdict};
use super::ledger::LedgerRegistry;
use super::policy::decide;
use super::posterior::ArmPosterior;
use super::review::ReviewQueue;
use super::types::{AllocationDecision, AllocatorConfig, ArmAllocation, BudgetArm, LedgerEntry, TickRequest};
use crate::error::{MeridianError, Result};
use crate::guard::{ResourceLimits, RunGuard};
use crate::store::InsightStore;
use crate::types::CampaignId;

/// Decides ticks, commits allocations and resolves reviews
#[derive(Debug)]
pub struct AllocatorService {
    config: AllocatorConfig,
    ledgers: LedgerRegistry,
    reviews: ReviewQueue,
    insights: Option<Arc<InsightStore>>,
}

impl AllocatorService {
    pub fn new(config: AllocatorConfig) -> Self {
        let ledgers = LedgerRegistry::new(config.ledger_mailbox);
        Self {
            config,
            ledgers,
            reviews: ReviewQueue::new(),
            insights: None,
        }
    }

    /// Read fatigue and segment value from the latest published snapshot.
    pub fn with_insights(mut self, store: Arc<InsightStore>) -> Self {
        self.insights = Some(store);
        self
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn reviews(&self) -> &ReviewQueue {
        &self.reviews
    }

    pub fn ledgers(&self) -> &LedgerRegistry {
        &self.ledgers
    }

    fn working_set_bytes(&self, arms: usize) -> u64 {
        let per_arm = size_of::<BudgetArm>() + size_of::<ArmPosterior>() + size_of::<ArmAllocation>();
        (arms as u64).saturating_mul((per_arm + size_of::<f64>() * 4) as u64)
    }

    /// Decide one tick and commit or escalate it.
    pub async fn decide_tick(&self, mut request: TickRequest) -> Result<AllocationDecision> {
        let guard = RunGuard::new(
            "allocator",
            ResourceLimits::new(self.config.decision_timeout_ms.div_ceil(1000).max(1), self.config.max_memory_mb),
            CancellationToken::new(),
        );
        guard.charge(self.working_set_bytes(request.arms.len()))?;

        // latest available insight, never waiting on a batch run
        if let Some(store) = &self.insights
            && let Some(snapshot) = store.predictive().latest()
        {
            request = request.with_predictive(&snapshot.payload);
        }

        let limit_ms = self.config.decision_timeout_ms;
        let limit = Duration::from_millis(limit_ms);
        let started = Instant::now();
        let config = self.config.clone();
        let pending = request.clone();
        let task = tokio::task::spawn_blocking(move || decide(&pending, &config, Utc::now()));
        let decided = match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => Some(result?),
            Ok(Err(join)) => {
                return Err(MeridianError::ChannelClosed(format!("allocation task: {join}")));
            }
            Err(_) => None,
        };
        let decision = match decided {
            Some(decision) if started.elapsed() < limit => decision,
            _ => {
                warn!(campaign = %request.campaign_id, tick = request.tick, limit_ms, "Allocation decision timed out");
                return Err(MeridianError::Timeout {
                    operation: "allocation decision".into(),
                    limit_ms,
                });
            }
        };

        let ledger = self.ledgers.handle(&request.campaign_id);
        ledger.open_tick(request.tick, request.budget).await?;
        match decision.state {
            DecisionState::AutoCommitted => {
                ledger.append(decision.ledger_entries(Utc::now())).await?;
                debug!(
                    campaign = %decision.campaign_id,
                    tick = decision.tick,
                    allocated = decision.allocated(),
                    "Allocation committed"
                );
            }
            DecisionState::EscalatedPendingReview => self.reviews.submit(decision.clone())?,
            other => {
                return Err(MeridianError::InvalidTransition {
                    from: other.as_str().to_string(),
                    event: "commit".into(),
                });
            }
        }
        Ok(decision)
    }

    /// Apply a reviewer's verdict. Approval commits through the ledger,
    /// which may still refuse it; a refused approval goes back to the queue.
    pub async fn resolve_review(&self, decision_id: Uuid, verdict: Verdict) -> Result<AllocationDecision> {
        let now = Utc::now();
        let decision = self.reviews.resolve(&decision_id, verdict, now)?;
        if decision.state == DecisionState::Approved {
            let ledger = self.ledgers.handle(&decision.campaign_id);
            if let Err(err) = ledger.append(decision.ledger_entries(now)).await {
                warn!(%decision_id, error = %err, "Approved allocation refused by ledger");
                self.reviews.restore(decision);
                return Err(err);
            }
        }
        info!(%decision_id, state = %decision.state, "Review resolved");
        Ok(decision)
    }

    pub async fn ledger_entries(&self, campaign_id: &CampaignId) -> Result<Vec<LedgerEntry>> {
        match self.ledgers.get(campaign_id) {
            Some(handle) => handle.entries().await,
            None => Ok(Vec::new()),
        }
    }
}

/// A tick for the loop, with an optional reply channel
#[derive(Debug)]
pub struct TickCommand {
    pub request: TickRequest,
    pub reply: Option<oneshot::Sender<Result<AllocationDecision>>>,
}

impl TickCommand {
    pub fn new(request: TickRequest) -> (Self, oneshot::Receiver<Result<AllocationDecision>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Result of running the allocator loop.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsumerLoopResult {
    /// Loop stopped due to shutdown signal.
    Shutdown,
    /// Loop stopped because every sender was dropped.
    Closed,
}

/// Start the allocator loop on its own task.
pub fn start_allocator_loop(
    service: Arc<AllocatorService>,
    rx: mpsc::Receiver<TickCommand>,
    shutdown: CancellationToken,
) -> JoinHandle<ConsumerLoopResult> {
    info!("Starting allocator loop");
    tokio::spawn(async move { allocator_loop(service, rx, shutdown).await })
}

/// Decide ticks as they arrive until shutdown or the channel closes.
///
/// Each tick runs on its own task so a slow campaign never holds up the
/// others; writes for one campaign still serialize on its ledger actor.
/// A failed tick is logged and reported to its caller; the loop continues.
/// In-flight ticks are drained before the loop returns.
pub async fn allocator_loop(
    service: Arc<AllocatorService>,
    mut rx: mpsc::Receiver<TickCommand>,
    shutdown: CancellationToken,
) -> ConsumerLoopResult {
    info!("Allocator loop starting");
    let mut in_flight = JoinSet::new();
    let result = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(in_flight = in_flight.len(), "Allocator loop received shutdown signal");
                break ConsumerLoopResult::Shutdown;
            }

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Tick task failed");
                }
            }

            received = rx.recv() => {
                let Some(command) = received else {
                    info!("Allocator tick channel closed");
                    break ConsumerLoopResult::Closed;
                };
                in_flight.spawn(run_tick(Arc::clone(&service), command));
            }
        }
    };
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Tick task failed");
        }
    }
    result
}

async fn run_tick(service: Arc<AllocatorService>, command: TickCommand) {
    let campaign = command.request.campaign_id.clone();
    let tick = command.request.tick;
    let result = service.decide_tick(command.request).await;
    match &result {
        Ok(decision) => debug!(%campaign, tick, state = %decision.state, "Tick decided"),
        Err(e) => warn!(%campaign, tick, error = %e, "Tick failed"),
    }
    if let Some(reply) = command.reply {
        let _ = reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confident(tick: u64) -> TickRequest {
        TickRequest::new(
            "spring",
            tick,
            100.0,
            vec![BudgetArm::new("a", 20_000, 1000), BudgetArm::new("b", 20_000, 200)],
        )
    }

    fn uncertain(tick: u64) -> TickRequest {
        TickRequest::new(
            "spring",
            tick,
            100.0,
            vec![BudgetArm::new("a", 1000, 50), BudgetArm::new("b", 1000, 52)],
        )
    }

    #[tokio::test]
    async fn test_confident_tick_commits() {
        let service = AllocatorService::new(AllocatorConfig::default());
        let decision = service.decide_tick(confident(1)).await.unwrap();
        assert_eq!(decision.state, DecisionState::AutoCommitted);
        let entries = service.ledger_entries(&"spring".into()).await.unwrap();
        assert_eq!(entries.len(), 2);
        let total: f64 = entries.iter().map(|e| e.amount).sum();
        assert!(total <= 100.0);
    }

    #[tokio::test]
    async fn test_escalated_tick_waits_for_review() {
        let service = AllocatorService::new(AllocatorConfig::default());
        let decision = service.decide_tick(uncertain(1)).await.unwrap();
        assert_eq!(decision.state, DecisionState::EscalatedPendingReview);
        assert!(service.ledger_entries(&"spring".into()).await.unwrap().is_empty());
        assert_eq!(service.reviews().len(), 1);

        let approved = service
            .resolve_review(decision.decision_id, Verdict::Approved { reviewer: "ops".into() })
            .await
            .unwrap();
        assert_eq!(approved.state, DecisionState::Approved);
        let entries = service.ledger_entries(&"spring".into()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.needs_human));
    }

    #[tokio::test]
    async fn test_approval_refused_when_tick_already_spent() {
        let service = AllocatorService::new(AllocatorConfig::default());
        let escalated = service.decide_tick(uncertain(1)).await.unwrap();
        service.decide_tick(confident(1)).await.unwrap();
        let err = service
            .resolve_review(escalated.decision_id, Verdict::Approved { reviewer: "ops".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, MeridianError::BudgetExceeded { .. }));
        assert_eq!(service.reviews().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_tick() {
        let config = AllocatorConfig {
            decision_timeout_ms: 0,
            ..Default::default()
        };
        let service = AllocatorService::new(config);
        let err = service.decide_tick(confident(1)).await.unwrap_err();
        assert!(matches!(err, MeridianError::Timeout { .. }));
        assert!(service.ledger_entries(&"spring".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loop_replies_and_stops() {
        let service = Arc::new(AllocatorService::new(AllocatorConfig::default()));
        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let handle = start_allocator_loop(Arc::clone(&service), rx, shutdown.clone());

        let (command, reply) = TickCommand::new(confident(7));
        tx.send(command).await.unwrap();
        let decision = reply.await.unwrap().unwrap();
        assert_eq!(decision.tick, 7);

        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), ConsumerLoopResult::Shutdown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_campaign_does_not_hold_up_others() {
        let config = AllocatorConfig {
            thompson_draws: 5_000,
            decision_timeout_ms: 250,
            ..Default::default()
        };
        let service = Arc::new(AllocatorService::new(config));
        let (tx, rx) = mpsc::channel(4);
        let handle = start_allocator_loop(Arc::clone(&service), rx, CancellationToken::new());

        let crowded: Vec<BudgetArm> = (0..1000)
            .map(|i| BudgetArm::new(format!("arm-{i}"), 1000, 30 + i % 20))
            .collect();
        let (slow, mut slow_reply) = TickCommand::new(TickRequest::new("crowded", 1, 100.0, crowded));
        let (fast, mut fast_reply) = TickCommand::new(TickRequest::new(
            "sparse",
            1,
            100.0,
            vec![BudgetArm::new("a", 20_000, 1000), BudgetArm::new("b", 20_000, 200)],
        ));
        tx.send(slow).await.unwrap();
        tx.send(fast).await.unwrap();

        tokio::select! {
            biased;
            decided = &mut fast_reply => {
                assert_eq!(decided.unwrap().unwrap().campaign_id.as_str(), "sparse");
            }
            _ = &mut slow_reply => panic!("crowded campaign answered before the sparse one"),
        }
        assert!(slow_reply.await.is_ok());

        drop(tx);
        assert_eq!(handle.await.unwrap(), ConsumerLoopResult::Closed);
    }
}

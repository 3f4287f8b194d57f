//! Escalated decisions awaiting a human verdict

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use super::decision::{DecisionEvent, DecisionState, Verdict};
use super::types::AllocationDecision;
use crate::error::{MeridianError, Result};

/// Pending `EscalatedPendingReview` decisions keyed by decision id
#[derive(Debug, Default)]
pub struct ReviewQueue {
    pending: DashMap<Uuid, AllocationDecision>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an escalated decision. Any other state is refused.
    pub fn submit(&self, decision: AllocationDecision) -> Result<()> {
        if decision.state != DecisionState::EscalatedPendingReview {
            return Err(MeridianError::InvalidTransition {
                from: decision.state.as_str().to_string(),
                event: "submit for review".into(),
            });
        }
        info!(
            decision_id = %decision.decision_id,
            campaign = %decision.campaign_id,
            tick = decision.tick,
            rationale = %decision.rationale,
            "Allocation escalated for review"
        );
        self.pending.insert(decision.decision_id, decision);
        Ok(())
    }

    pub fn get(&self, decision_id: &Uuid) -> Option<AllocationDecision> {
        self.pending.get(decision_id).map(|d| d.clone())
    }

    /// Pending decisions, oldest first.
    pub fn pending(&self) -> Vec<AllocationDecision> {
        let mut all: Vec<AllocationDecision> = self.pending.iter().map(|d| d.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.decision_id.cmp(&b.decision_id)));
        all
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove a decision and apply the verdict to it.
    pub fn resolve(&self, decision_id: &Uuid, verdict: Verdict, at: DateTime<Utc>) -> Result<AllocationDecision> {
        let (_, mut decision) = self
            .pending
            .remove(decision_id)
            .ok_or_else(|| MeridianError::NotFound(format!("pending decision {decision_id}")))?;
        decision.apply(&DecisionEvent::from(verdict), at)?;
        Ok(decision)
    }

    /// Put a decision back, e.g. when committing its approval failed.
    pub(crate) fn restore(&self, mut decision: AllocationDecision) {
        decision.state = DecisionState::EscalatedPendingReview;
        decision.reviewer = None;
        decision.resolved_at = None;
        self.pending.insert(decision.decision_id, decision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::policy::decide;
    use crate::allocator::types::{AllocatorConfig, BudgetArm, TickRequest};

    fn escalated() -> AllocationDecision {
        let arms = vec![BudgetArm::new("a", 100, 5), BudgetArm::new("b", 100, 5)];
        decide(&TickRequest::new("c", 1, 10.0, arms), &AllocatorConfig::default(), Utc::now()).unwrap()
    }

    #[test]
    fn test_submit_and_approve() {
        let queue = ReviewQueue::new();
        let decision = escalated();
        let id = decision.decision_id;
        queue.submit(decision).unwrap();
        assert_eq!(queue.len(), 1);
        let approved = queue
            .resolve(&id, Verdict::Approved { reviewer: "ops".into() }, Utc::now())
            .unwrap();
        assert_eq!(approved.state, DecisionState::Approved);
        assert_eq!(approved.reviewer.as_deref(), Some("ops"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reject_records_reason() {
        let queue = ReviewQueue::new();
        let decision = escalated();
        let id = decision.decision_id;
        queue.submit(decision).unwrap();
        let rejected = queue
            .resolve(
                &id,
                Verdict::Rejected {
                    reviewer: "ops".into(),
                    reason: "wait for more data".into(),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(rejected.state, DecisionState::Rejected);
        assert!(rejected.rationale.ends_with("rejected: wait for more data"));
    }

    #[test]
    fn test_unknown_and_non_escalated() {
        let queue = ReviewQueue::new();
        assert!(matches!(
            queue.resolve(&Uuid::nil(), Verdict::Approved { reviewer: "x".into() }, Utc::now()),
            Err(MeridianError::NotFound(_))
        ));
        let arms = vec![BudgetArm::new("only", 10, 1)];
        let auto = decide(&TickRequest::new("c", 1, 10.0, arms), &AllocatorConfig::default(), Utc::now()).unwrap();
        assert!(queue.submit(auto).is_err());
    }
}

//! Review state machine for allocation decisions
//!
//! ```text
//! Proposed ──confident──▶ AutoCommitted
//!    │
//!    └──uncertain──▶ EscalatedPendingReview ──approve──▶ Approved
//!                                           └──reject───▶ Rejected
//! ```
//!
//! Only `AutoCommitted` and `Approved` decisions write to the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::AllocationDecision;
use crate::error::{MeridianError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionState {
    Proposed,
    AutoCommitted,
    EscalatedPendingReview,
    Approved,
    Rejected,
}

impl DecisionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "Proposed",
            Self::AutoCommitted => "AutoCommitted",
            Self::EscalatedPendingReview => "EscalatedPendingReview",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AutoCommitted | Self::Approved | Self::Rejected)
    }

    /// Whether a decision in this state spends budget
    pub fn commits_budget(&self) -> bool {
        matches!(self, Self::AutoCommitted | Self::Approved)
    }

    /// Next state for `event`, or `InvalidTransition`.
    pub fn on(self, event: &DecisionEvent) -> Result<DecisionState> {
        use DecisionEvent as E;
        match (self, event) {
            (Self::Proposed, E::Confident) => Ok(Self::AutoCommitted),
            (Self::Proposed, E::Uncertain) => Ok(Self::EscalatedPendingReview),
            (Self::EscalatedPendingReview, E::Approve { .. }) => Ok(Self::Approved),
            (Self::EscalatedPendingReview, E::Reject { .. }) => Ok(Self::Rejected),
            (from, event) => Err(MeridianError::InvalidTransition {
                from: from.as_str().to_string(),
                event: event.name().to_string(),
            }),
        }
    }
}

impl std::fmt::Display for DecisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum DecisionEvent {
    /// The uncertainty gate passed
    Confident,
    /// The uncertainty gate fired
    Uncertain,
    Approve { reviewer: String },
    Reject { reviewer: String, reason: String },
}

impl DecisionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Confident => "confident",
            Self::Uncertain => "uncertain",
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
        }
    }
}

/// A reviewer's answer to an escalated decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum Verdict {
    Approved { reviewer: String },
    Rejected { reviewer: String, reason: String },
}

impl From<Verdict> for DecisionEvent {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approved { reviewer } => Self::Approve { reviewer },
            Verdict::Rejected { reviewer, reason } => Self::Reject { reviewer, reason },
        }
    }
}

impl AllocationDecision {
    /// Move the decision along the state machine.
    pub fn apply(&mut self, event: &DecisionEvent, at: DateTime<Utc>) -> Result<()> {
        self.state = self.state.on(event)?;
        match event {
            DecisionEvent::Approve { reviewer } => {
                self.reviewer = Some(reviewer.clone());
                self.resolved_at = Some(at);
            }
            DecisionEvent::Reject { reviewer, reason } => {
                self.reviewer = Some(reviewer.clone());
                self.resolved_at = Some(at);
                self.rationale = format!("{}; rejected: {reason}", self.rationale);
            }
            DecisionEvent::Confident => self.resolved_at = Some(at),
            DecisionEvent::Uncertain => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approve() -> DecisionEvent {
        DecisionEvent::Approve {
            reviewer: "ops".into(),
        }
    }

    #[test]
    fn test_happy_paths() {
        assert_eq!(
            DecisionState::Proposed.on(&DecisionEvent::Confident).unwrap(),
            DecisionState::AutoCommitted
        );
        let escalated = DecisionState::Proposed.on(&DecisionEvent::Uncertain).unwrap();
        assert_eq!(escalated, DecisionState::EscalatedPendingReview);
        assert_eq!(escalated.on(&approve()).unwrap(), DecisionState::Approved);
        let rejected = escalated
            .on(&DecisionEvent::Reject {
                reviewer: "ops".into(),
                reason: "too risky".into(),
            })
            .unwrap();
        assert!(rejected.is_terminal());
        assert!(!rejected.commits_budget());
    }

    #[test]
    fn test_invalid_transitions() {
        let err = DecisionState::Proposed.on(&approve()).unwrap_err();
        assert!(matches!(err, MeridianError::InvalidTransition { .. }));
        assert!(DecisionState::AutoCommitted.on(&approve()).is_err());
        assert!(DecisionState::Approved.on(&DecisionEvent::Uncertain).is_err());
        assert!(DecisionState::Rejected.on(&approve()).is_err());
    }

    #[test]
    fn test_verdict_maps_to_event() {
        let event: DecisionEvent = Verdict::Approved {
            reviewer: "ops".into(),
        }
        .into();
        assert_eq!(event, approve());
    }
}

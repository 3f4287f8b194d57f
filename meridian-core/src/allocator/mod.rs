//! Budgeted bandit allocator
//!
//! Splits each tick's budget across arms by posterior chance of being best,
//! escalates uncertain splits to a human, and commits through a per-campaign
//! ledger that refuses any write taking a tick over budget.

pub mod decision;
pub mod ledger;
pub mod policy;
pub mod posterior;
pub mod review;
pub mod service;
pub mod simulate;
pub mod types;

pub use decision::{DecisionEvent, DecisionState, Verdict};
pub use ledger::{BudgetLedger, LedgerHandle, LedgerRegistry};
pub use policy::{decide, top_two_delta};
pub use posterior::{ArmPosterior, prob_best};
pub use review::ReviewQueue;
pub use service::{AllocatorService, TickCommand, allocator_loop, start_allocator_loop};
pub use simulate::{BenchmarkReport, SimulatedArm, SimulationConfig, simulate};
pub use types::{
    AllocationDecision, AllocatorConfig, ArmAllocation, BudgetArm, EscalationTrigger, LedgerEntry, TickRequest,
};

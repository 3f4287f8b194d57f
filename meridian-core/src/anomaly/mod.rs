//! Anomaly detection & response engine
//!
//! Scores minute-level metric streams with a robust rolling baseline per
//! metric, suppresses moves a fatigue forecast already predicted, and
//! attaches severity, root-cause hints and at most two low-risk actions to
//! each anomaly. Also estimates its own running cost.

pub mod consumer;
pub mod cost;
pub mod detector;
pub mod engine;
pub mod response;
pub mod types;

pub use consumer::{AnomalyLoopConfig, anomaly_loop, start_anomaly_loop};
pub use cost::{CostArea, CostReport, CostTactic, TacticKind, Workload};
pub use detector::{DetectorStep, PointScore, RobustDetector};
pub use engine::{AnomalyEngine, AnomalySummary, EvaluationReport, evaluate};
pub use response::{fatigue_explains, propose_actions, root_cause_hints, severity};
pub use types::{
    ActionKind, Anomaly, AnomalyConfig, DetectionOutcome, Direction, LabelledPoint, MAX_PROPOSED_ACTIONS, MetricKind,
    MetricPoint, ProposedAction, ProposedActions, RootCauseHint, Severity,
};

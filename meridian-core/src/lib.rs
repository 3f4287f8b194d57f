//! meridian-core - Decision intelligence core
//!
//! Five components share one event model, one error type and one insight
//! store. Segmentation, predictive and attribution run as guarded batch
//! jobs and publish snapshots; the budget allocator and the anomaly engine
//! run online and read whatever was last published.

pub mod allocator;
pub mod anomaly;
pub mod attribution;
pub mod config;
pub mod error;
pub mod governance;
pub mod guard;
pub mod orchestrator;
pub mod predictive;
pub mod predictor;
pub mod retrain;
pub mod segmentation;
pub mod stats;
pub mod store;
pub mod types;

pub use allocator::service::ConsumerLoopResult as AllocatorLoopResult;
pub use allocator::{AllocationDecision, AllocatorConfig, AllocatorService, TickRequest, simulate};
pub use anomaly::consumer::ConsumerLoopResult as AnomalyLoopResult;
pub use anomaly::{Anomaly, AnomalyConfig, AnomalyEngine, DetectionOutcome, MetricPoint};
pub use attribution::{AttributionConfig, AttributionEngine, AttributionInput, AttributionOutput};
pub use config::{LimitsConfig, MeridianConfig};
pub use error::{MeridianError, Result};
pub use guard::{ResourceLimits, RunGuard};
pub use orchestrator::{BatchInputs, BatchReport, ComponentOutcome, Orchestrator};
pub use predictive::{PredictiveConfig, PredictiveEngine, PredictiveOutput};
pub use predictor::Predictor;
pub use retrain::ConsumerLoopResult as RetrainLoopResult;
pub use retrain::{RetrainFlags, RetrainQueue, RetrainRequest};
pub use segmentation::{SegmentationConfig, SegmentationEngine, SegmentationOutput};
pub use store::{InsightRead, InsightStore, StoreConfig};
pub use types::*;

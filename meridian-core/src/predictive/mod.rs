//! Predictive intelligence engine
//!
//! Forecasts creative fatigue at 7 and 14 days and segment lifetime value
//! at 90 days, and tracks whether forecast accuracy is improving.

pub mod calibration;
pub mod engine;
pub mod fatigue;
pub mod ltv;
pub mod types;

pub use calibration::{CalibrationTracker, CalibrationTrend};
pub use engine::PredictiveEngine;
pub use fatigue::{FATIGUE_FEATURES, FatigueModel, fatigue_features};
pub use ltv::{LtvDataset, LtvModel, MemberRevenue, build_dataset};
pub use types::{PredictiveConfig, PredictiveOutput, PredictiveSummary, QuarantinedCreative};

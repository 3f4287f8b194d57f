//! Shared data model

mod component;
mod creative;
mod event;
mod ids;
mod insight;

pub use component::Component;
pub use creative::{CreativeAttributes, CreativeDay, CreativeSeries};
pub use event::{Event, EventType};
pub use ids::{ArmId, CampaignId};
pub use insight::{ChurnScore, ConfidenceInterval, FatigueForecast, LtvPrediction, RiskFactor, Segment};

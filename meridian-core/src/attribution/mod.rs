//! Attribution & customer-value engine
//!
//! Credits revenue across each profile's touches, then derives channel ROI,
//! per-profile CLV, a campaign/creative leaderboard and advisory budget
//! moves. Also watches the event mix for drift against a baseline.

pub mod drift;
pub mod engine;
pub mod leaderboard;
pub mod proposals;
pub mod touch;
pub mod types;
pub mod value;

pub use drift::DriftBaseline;
pub use engine::AttributionEngine;
pub use proposals::propose;
pub use touch::{Credit, Journey, Journeys, TimeDecayAttribution};
pub use types::{
    AttributionConfig, AttributionInput, AttributionOutput, AttributionResult, AttributionSummary,
    BudgetReallocationProposal, CampaignMeta, ClvResult, DriftAlert, EntityKind, Leaderboard,
    LeaderboardEntry, ReallocationAction,
};
pub use value::{ChannelPanel, ClvModel, ledger_spend_by_channel, roi};

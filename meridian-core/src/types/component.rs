//! Decision-core components

use serde::{Deserialize, Serialize};

/// One of the five decision-core components
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Segmentation,
    Predictive,
    Attribution,
    Allocator,
    Anomaly,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segmentation => "segmentation",
            Self::Predictive => "predictive",
            Self::Attribution => "attribution",
            Self::Allocator => "allocator",
            Self::Anomaly => "anomaly",
        }
    }

    /// Components that run as scheduled batch jobs
    pub fn batch() -> &'static [Component] {
        &[Self::Segmentation, Self::Predictive, Self::Attribution]
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

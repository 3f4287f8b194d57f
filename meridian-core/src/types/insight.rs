//! Published insight records shared between components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Two-sided interval around an estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    /// Nominal coverage, e.g. 0.95
    pub level: f64,
}

impl ConfidenceInterval {
    pub fn new(lower: f64, upper: f64, level: f64) -> Self {
        let (lower, upper) = if lower <= upper {
            (lower, upper)
        } else {
            (upper, lower)
        };
        Self {
            lower,
            upper,
            level,
        }
    }

    /// Degenerate interval at a point
    pub fn point(value: f64, level: f64) -> Self {
        Self::new(value, value, level)
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Cluster of profiles produced by one segmentation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub cluster_id: usize,
    pub label: String,
    /// Features ranked by how strongly they distinguish the cluster
    pub top_features: Vec<String>,
    pub member_sample: Vec<String>,
    pub size: usize,
    /// Centroid in standardized feature space
    pub centroid: Vec<f64>,
}

/// Churn probabilities for one profile at one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnScore {
    pub profile_id: String,
    pub risk_30d: f64,
    pub risk_60d: f64,
    pub risk_90d: f64,
    pub as_of: DateTime<Utc>,
}

/// Named contribution to a forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// Contribution on the logit scale
    pub contribution: f64,
}

/// Probability that a creative's performance degrades within 7 and 14 days
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatigueForecast {
    pub creative_id: String,
    pub fatigue_probability_7d: f64,
    pub fatigue_probability_14d: f64,
    pub confidence_interval_7d: ConfidenceInterval,
    pub confidence_interval_14d: ConfidenceInterval,
    /// Ranked, most influential first
    pub risk_factors: Vec<RiskFactor>,
    pub generated_at: DateTime<Utc>,
}

/// Forward lifetime-value forecast for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtvPrediction {
    pub segment_id: usize,
    pub horizon_days: u32,
    /// Expected revenue per member over the horizon
    pub value: f64,
    pub confidence_interval: ConfidenceInterval,
    pub members: usize,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_orders_bounds() {
        let ci = ConfidenceInterval::new(0.8, 0.2, 0.95);
        assert_eq!(ci.lower, 0.2);
        assert_eq!(ci.upper, 0.8);
        assert!((ci.width() - 0.6).abs() < 1e-12);
        assert!(ci.contains(0.5));
        assert!(!ci.contains(0.9));
    }

    #[test]
    fn test_point_interval_has_zero_width() {
        assert_eq!(ConfidenceInterval::point(3.0, 0.95).width(), 0.0);
    }
}

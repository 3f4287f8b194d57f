//! Accuracy trend across successive runs

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::slope;

/// Direction of prediction accuracy over recent runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationTrend {
    Improving,
    Stable,
    Declining,
    /// Fewer than three runs recorded
    Insufficient,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub recorded_at: DateTime<Utc>,
    /// Holdout accuracy in [0, 1], higher is better
    pub accuracy: f64,
}

/// Bounded history of per-run holdout accuracy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationTracker {
    history: VecDeque<CalibrationPoint>,
    capacity: usize,
    tolerance: f64,
}

impl CalibrationTracker {
    pub fn new(capacity: usize, tolerance: f64) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            tolerance,
        }
    }

    pub fn record(&mut self, accuracy: f64, recorded_at: DateTime<Utc>) {
        if !accuracy.is_finite() {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(CalibrationPoint {
            recorded_at,
            accuracy,
        });
    }

    pub fn history(&self) -> impl Iterator<Item = &CalibrationPoint> {
        self.history.iter()
    }

    pub fn trend(&self) -> CalibrationTrend {
        if self.history.len() < 3 {
            return CalibrationTrend::Insufficient;
        }
        let values: Vec<f64> = self.history.iter().map(|p| p.accuracy).collect();
        let s = slope(&values);
        if s > self.tolerance {
            CalibrationTrend::Improving
        } else if s < -self.tolerance {
            CalibrationTrend::Declining
        } else {
            CalibrationTrend::Stable
        }
    }
}

impl Default for CalibrationTracker {
    fn default() -> Self {
        Self::new(10, 0.02)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(values: &[f64]) -> CalibrationTracker {
        let mut t = CalibrationTracker::default();
        for v in values {
            t.record(*v, Utc::now());
        }
        t
    }

    #[test]
    fn test_trend_needs_three_runs() {
        assert_eq!(tracker_with(&[0.7, 0.8]).trend(), CalibrationTrend::Insufficient);
    }

    #[test]
    fn test_trend_directions() {
        assert_eq!(tracker_with(&[0.70, 0.75, 0.80]).trend(), CalibrationTrend::Improving);
        assert_eq!(tracker_with(&[0.80, 0.75, 0.70]).trend(), CalibrationTrend::Declining);
        assert_eq!(tracker_with(&[0.80, 0.81, 0.80]).trend(), CalibrationTrend::Stable);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut t = CalibrationTracker::new(3, 0.02);
        for v in [0.1, 0.2, 0.3, 0.4] {
            t.record(v, Utc::now());
        }
        let kept: Vec<f64> = t.history().map(|p| p.accuracy).collect();
        assert_eq!(kept, vec![0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_non_finite_ignored() {
        let t = tracker_with(&[f64::NAN, 0.5]);
        assert_eq!(t.history().count(), 1);
    }
}

//! Rolling median/MAD detector for one metric
//!
//! Scores each point by its robust z against the rolling window. Flagged
//! points stay out of the window, so a spike cannot drag the baseline
//! toward itself. When enough anomalies arrive back to back the detector
//! treats them as a new level and rebuilds the window from them.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::types::{AnomalyConfig, Direction};
use crate::stats::{mad, median};

/// MAD to standard deviation under normality
const MAD_SCALE: f64 = 1.4826;

/// How one value compares with the current baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointScore {
    pub robust_z: f64,
    pub baseline: f64,
    pub scale: f64,
    /// value / baseline, 1.0 when the baseline is zero
    pub ratio: f64,
    pub direction: Direction,
}

impl PointScore {
    /// Ratio folded so drops and spikes compare on one scale (always >= 1).
    pub fn magnitude(&self) -> f64 {
        if self.ratio > 0.0 && self.ratio < 1.0 {
            1.0 / self.ratio
        } else if self.ratio <= 0.0 {
            f64::MAX
        } else {
            self.ratio
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorStep {
    WarmingUp,
    Normal(PointScore),
    Anomalous { score: PointScore, consecutive: usize },
    LevelShift { new_baseline: f64 },
}

#[derive(Debug, Clone)]
pub struct RobustDetector {
    window: VecDeque<f64>,
    pending: Vec<f64>,
    capacity: usize,
    warmup: usize,
    z_threshold: f64,
    level_shift_after: usize,
    min_relative_scale: f64,
}

impl RobustDetector {
    pub fn new(config: &AnomalyConfig) -> Self {
        let capacity = config.window.max(3);
        Self {
            window: VecDeque::with_capacity(capacity),
            pending: Vec::new(),
            capacity,
            warmup: config.warmup.clamp(3, capacity),
            z_threshold: config.z_threshold,
            level_shift_after: config.level_shift_after.max(1),
            min_relative_scale: config.min_relative_scale,
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn baseline(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(median(&self.values()))
    }

    fn values(&self) -> Vec<f64> {
        self.window.iter().copied().collect()
    }

    /// Score against the current window without changing it.
    pub fn score(&self, value: f64) -> Option<PointScore> {
        if self.window.len() < self.warmup {
            return None;
        }
        let values = self.values();
        let center = median(&values);
        let floor = (self.min_relative_scale * center.abs()).max(1e-9);
        let scale = (MAD_SCALE * mad(&values, center)).max(floor);
        let ratio = if center.abs() > 1e-12 { value / center } else { 1.0 };
        Some(PointScore {
            robust_z: (value - center) / scale,
            baseline: center,
            scale,
            ratio,
            direction: if value >= center { Direction::Spike } else { Direction::Drop },
        })
    }

    pub fn observe(&mut self, value: f64) -> DetectorStep {
        let Some(score) = self.score(value) else {
            self.push(value);
            return DetectorStep::WarmingUp;
        };
        if score.robust_z.abs() < self.z_threshold {
            self.pending.clear();
            self.push(value);
            return DetectorStep::Normal(score);
        }

        self.pending.push(value);
        if self.pending.len() >= self.level_shift_after {
            let shifted = std::mem::take(&mut self.pending);
            self.window.clear();
            for v in shifted {
                self.push(v);
            }
            let new_baseline = median(&self.values());
            return DetectorStep::LevelShift { new_baseline };
        }
        DetectorStep::Anomalous {
            score,
            consecutive: self.pending.len(),
        }
    }

    /// Take a value into the baseline regardless of its score.
    pub fn accept(&mut self, value: f64) {
        self.pending.clear();
        self.push(value);
    }

    fn push(&mut self, value: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }
}

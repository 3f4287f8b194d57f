//! Common contract for the swappable models behind each engine
//!
//! Segmentation, churn, fatigue, LTV and attribution models each retrain
//! on their own cadence. They share this capability instead of a type
//! hierarchy, so an engine can hold any implementation of the contract for
//! its model slot.

use crate::error::Result;
use crate::guard::RunGuard;

/// A trainable model that scores inputs and reports its own confidence
pub trait Predictor {
    /// What the model learns from
    type TrainingData: ?Sized;
    /// What one scoring call consumes
    type Input: ?Sized;
    /// What one scoring call produces
    type Output;

    /// Fit the model, honouring the run's resource ceilings.
    fn train(&mut self, data: &Self::TrainingData, guard: &RunGuard) -> Result<()>;

    /// Score one input with the current fit.
    fn score(&self, input: &Self::Input) -> Result<Self::Output>;

    /// Confidence in the current fit, in [0, 1]; 0 before training.
    fn confidence(&self) -> f64;
}

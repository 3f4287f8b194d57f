//! Segmentation & churn engine
//!
//! Clusters profiles from raw events and scores 30/60/90-day churn risk.
//! Leaf component: it reads the event batch only.

pub mod churn;
pub mod clustering;
pub mod engine;
pub mod features;
pub mod types;

pub use churn::{ChurnModel, ChurnTrainingSet, HORIZONS, build_training_set};
pub use clustering::{KMeansFit, euclidean_distance, kmeans, silhouette};
pub use engine::{KMeansSegmenter, SegmentationEngine};
pub use features::{FEATURE_NAMES, ProfileFeatures, Scaler, extract};
pub use types::{SegmentationConfig, SegmentationOutput, SegmentationSummary};

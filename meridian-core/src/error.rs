//! Error types for meridian-core

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resource whose ceiling a run can breach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Wall-clock training or scoring time, in milliseconds
    Time,
    /// Estimated working-set memory, in bytes
    Memory,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time => write!(f, "time"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Error type for decision-core operations
#[derive(Debug, Error)]
pub enum MeridianError {
    /// Input records were malformed or lacked governance fields
    #[error("Data quality error: {0}")]
    DataQuality(String),

    /// Not enough data to fit a model; no degraded model is produced
    #[error("Insufficient data for {what}: need {needed}, found {found}")]
    InsufficientData {
        what: String,
        needed: usize,
        found: usize,
    },

    /// A hard resource ceiling was breached; the run was aborted
    #[error("Resource exceeded: {resource} limit {limit}, observed {observed}")]
    ResourceExceeded {
        resource: Resource,
        limit: u64,
        observed: u64,
    },

    /// The run was cancelled before completion
    #[error("Run cancelled")]
    Cancelled,

    /// An online operation missed its hard deadline
    #[error("{operation} timed out after {limit_ms}ms")]
    Timeout { operation: String, limit_ms: u64 },

    /// A ledger write would allocate more than the tick budget
    #[error("Budget exceeded at tick {tick}: requested {requested:.4}, remaining {remaining:.4}")]
    BudgetExceeded {
        tick: u64,
        requested: f64,
        remaining: f64,
    },

    /// A decision state machine received an event it cannot accept
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration was invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task or actor stopped receiving
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MeridianError {
    /// Shorthand for [`MeridianError::InsufficientData`]
    pub fn insufficient(what: impl Into<String>, needed: usize, found: usize) -> Self {
        Self::InsufficientData {
            what: what.into(),
            needed,
            found,
        }
    }

    /// Whether the error aborted a run because of a ceiling or cancellation
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::ResourceExceeded { .. } | Self::Cancelled)
    }
}

impl From<serde_json::Error> for MeridianError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for MeridianError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for decision-core operations
pub type Result<T> = std::result::Result<T, MeridianError>;

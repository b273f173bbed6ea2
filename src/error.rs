//! Error taxonomy for the analytics core.
//!
//! Application layers (CLI, storage, monitor loop) wrap these in `anyhow`;
//! the core itself only ever returns these typed errors.

use thiserror::Error;

/// A malformed or incomplete observation. Rejected before it can touch any
/// rolling state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("observation {sequence_id}: missing required feature '{feature}'")]
    MissingFeature { sequence_id: u64, feature: String },

    #[error("observation {sequence_id}: feature '{feature}' must be numeric")]
    NotNumeric { sequence_id: u64, feature: String },

    #[error("observation {sequence_id}: feature '{feature}' is not finite")]
    NonFinite { sequence_id: u64, feature: String },

    #[error("observation {sequence_id}: count feature '{feature}' is negative ({value})")]
    NegativeCount {
        sequence_id: u64,
        feature: String,
        value: f64,
    },

    #[error("observation {sequence_id} is not newer than last accepted {last}")]
    OutOfOrder { sequence_id: u64, last: u64 },
}

/// A configuration value outside its valid range.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid configuration value for '{key}': {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(key: &'static str, reason: impl Into<String>) -> Self {
        Self {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no data available for {operation}")]
    InsufficientData { operation: &'static str },
}

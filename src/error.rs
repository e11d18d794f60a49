//! Error types for FVS Flux
//!
//! Three families, matching how failures propagate:
//! - [`ConfigError`]: caller misuse, raised once when a processor is built
//! - [`RejectReason`]: per-interval data rejection, attached to that interval's record
//! - [`ComputeError`]: schema and JSON failures at the crate boundary

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::PartitionError;
use crate::types::Channel;
use crate::wue::WueError;

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid interval batch: {0}")]
    Schema(String),
}

/// Configuration errors; these indicate caller misuse, not data quality
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("water use efficiency must be negative, got {0}")]
    NonNegativeWue(f64),

    #[error("unrecognized photosynthetic pathway '{0}' (expected C3 or C4)")]
    UnknownPathway(String),

    #[error("unrecognized ci model '{0}' (expected const_ratio, const_ppm, linear or sqrt)")]
    UnknownCiModel(String),

    #[error("ci model '{ci_mod}' expects {expected} parameter(s), got {got}")]
    MissingParameter {
        ci_mod: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid value for {name}: {value}")]
    InvalidParameter { name: String, value: f64 },

    #[error("invalid bounds for {channel:?}: lower {lower} > upper {upper}")]
    InvalidBounds {
        channel: Channel,
        lower: f64,
        upper: f64,
    },
}

/// Which QC tolerance a rejected interval failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tolerance {
    /// Minimum number of consecutive good records
    Absolute,
    /// Minimum fraction of the interval's records
    Relative,
}

/// Why an interval was not partitioned
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    #[error(
        "insufficient good data ({tolerance:?} tolerance): longest good run {good_run} of {total} records, required {required}"
    )]
    InsufficientData {
        tolerance: Tolerance,
        good_run: usize,
        total: usize,
        required: f64,
    },

    #[error("insufficient records for statistics: {records}")]
    InsufficientStatistics { records: usize },

    #[error("insufficient turbulence: ustar {ustar:.4} m/s below {threshold} m/s")]
    InsufficientTurbulence { ustar: f64, threshold: f64 },

    #[error("water use efficiency must be negative, got {value}")]
    InvalidWue { value: f64 },

    #[error("water use efficiency model failed: {0}")]
    WueModel(WueError),

    #[error("partitioning failed: {0}")]
    Partition(PartitionError),
}

impl From<WueError> for RejectReason {
    fn from(e: WueError) -> Self {
        match e {
            WueError::NonNegativeWue { value } => RejectReason::InvalidWue { value },
            other => RejectReason::WueModel(other),
        }
    }
}

impl From<PartitionError> for RejectReason {
    fn from(e: PartitionError) -> Self {
        RejectReason::Partition(e)
    }
}

impl RejectReason {
    /// Short machine-friendly code
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::InsufficientData { .. } => "insufficient_data",
            RejectReason::InsufficientStatistics { .. } => "insufficient_statistics",
            RejectReason::InsufficientTurbulence { .. } => "insufficient_turbulence",
            RejectReason::InvalidWue { .. } => "invalid_wue",
            RejectReason::WueModel(_) => "wue_model",
            RejectReason::Partition(_) => "partition",
        }
    }
}

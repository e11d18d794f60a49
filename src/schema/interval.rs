//! fvs.interval_batch.v1 schema definition
//!
//! One JSON object per averaging interval: interval bounds, the seven channel
//! columns in SI units, and optional quality-flag columns.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Channel, FlagColumn, SampleBatch};

/// Current schema version
pub const SCHEMA_VERSION: &str = "fvs.interval_batch.v1";

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// Channel columns of one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Columns {
    /// Streamwise wind (m/s)
    pub u: Vec<f64>,
    /// Crosswind (m/s)
    pub v: Vec<f64>,
    /// Vertical wind (m/s)
    pub w: Vec<f64>,
    /// CO2 density (kg/m³)
    pub c: Vec<f64>,
    /// Water vapor density (kg/m³)
    pub q: Vec<f64>,
    /// Air temperature (K)
    #[serde(rename = "T")]
    pub t: Vec<f64>,
    /// Air pressure (Pa)
    #[serde(rename = "P")]
    pub p: Vec<f64>,
}

impl Columns {
    fn column(&self, channel: Channel) -> &[f64] {
        match channel {
            Channel::U => &self.u,
            Channel::V => &self.v,
            Channel::W => &self.w,
            Channel::C => &self.c,
            Channel::Q => &self.q,
            Channel::T => &self.t,
            Channel::P => &self.p,
        }
    }
}

/// Serialized form of one interval's samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalBatch {
    /// Schema version (must be "fvs.interval_batch.v1")
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Caller identifier carried into the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Interval start, site-local time (e.g. "2024-06-01T12:00:00")
    pub start: NaiveDateTime,
    /// Interval end, site-local time
    pub end: NaiveDateTime,
    pub columns: Columns,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<FlagColumn>,
}

impl IntervalBatch {
    /// Number of records, taken from the `w` column
    pub fn len(&self) -> usize {
        self.columns.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.w.is_empty()
    }

    /// Validate the batch structure
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        if self.end <= self.start {
            return Err(ValidationError::InvalidInterval {
                start: self.start,
                end: self.end,
            });
        }

        let expected = self.len();
        for channel in Channel::ALL {
            let actual = self.columns.column(channel).len();
            if actual != expected {
                return Err(ValidationError::ColumnLengthMismatch {
                    channel: channel.as_str().to_string(),
                    expected,
                    actual,
                });
            }
        }

        for flag in &self.flags {
            if flag.values.len() != expected {
                return Err(ValidationError::FlagLengthMismatch {
                    name: flag.name.clone(),
                    expected,
                    actual: flag.values.len(),
                });
            }
        }

        Ok(())
    }

    /// Validate and convert into the pipeline's sample batch
    pub fn into_sample_batch(self) -> Result<SampleBatch, ValidationError> {
        self.validate()?;
        let Columns { u, v, w, c, q, t, p } = self.columns;
        Ok(SampleBatch {
            label: self.label,
            start: self.start,
            end: self.end,
            u,
            v,
            w,
            c,
            q,
            t,
            p,
            flags: self.flags,
        })
    }
}

impl From<SampleBatch> for IntervalBatch {
    fn from(batch: SampleBatch) -> Self {
        IntervalBatch {
            schema_version: default_schema_version(),
            label: batch.label,
            start: batch.start,
            end: batch.end,
            columns: Columns {
                u: batch.u,
                v: batch.v,
                w: batch.w,
                c: batch.c,
                q: batch.q,
                t: batch.t,
                p: batch.p,
            },
            flags: batch.flags,
        }
    }
}

/// Structural problems with an interval batch
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Interval end {end} is not after start {start}")]
    InvalidInterval {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("Column {channel} has {actual} values, expected {expected}")]
    ColumnLengthMismatch {
        channel: String,
        expected: usize,
        actual: usize,
    },

    #[error("Flag column {name} has {actual} values, expected {expected}")]
    FlagLengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

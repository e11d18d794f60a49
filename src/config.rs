//! Pipeline configuration
//!
//! A `PipelineConfig` is built once per batch, validated by
//! [`PipelineConfig::validate`], and shared read-only by every interval.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::types::Channel;
use crate::wue::WueModel;

/// Default minimum number of consecutive good records
pub const DEFAULT_AD_TOL: usize = 1024;

/// Default minimum fraction of an interval covered by the good run
pub const DEFAULT_RD_TOL: f64 = 0.4;

/// Default friction velocity threshold (m/s)
pub const DEFAULT_USTAR_TOL: f64 = 0.1;

/// Default minimum |x| separation for resolving two valid roots
pub const DEFAULT_MIN_ROOT_SEPARATION: f64 = 0.1;

/// A value that is either fixed or computed from the interval timestamp
pub enum Param<T> {
    Constant(T),
    TimestampFunction(Arc<dyn Fn(NaiveDateTime) -> T + Send + Sync>),
}

impl<T: Clone> Param<T> {
    /// Wrap a closure of the interval timestamp
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(NaiveDateTime) -> T + Send + Sync + 'static,
    {
        Param::TimestampFunction(Arc::new(f))
    }

    /// Value for the interval at `timestamp`
    pub fn resolve(&self, timestamp: NaiveDateTime) -> T {
        match self {
            Param::Constant(v) => v.clone(),
            Param::TimestampFunction(f) => f(timestamp),
        }
    }

    pub fn as_constant(&self) -> Option<&T> {
        match self {
            Param::Constant(v) => Some(v),
            Param::TimestampFunction(_) => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Param::TimestampFunction(_))
    }
}

impl<T: Clone> Clone for Param<T> {
    fn clone(&self) -> Self {
        match self {
            Param::Constant(v) => Param::Constant(v.clone()),
            Param::TimestampFunction(f) => Param::TimestampFunction(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Param<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Param::TimestampFunction(_) => f.write_str("TimestampFunction(..)"),
        }
    }
}

impl<T> From<T> for Param<T> {
    fn from(v: T) -> Self {
        Param::Constant(v)
    }
}

impl<T: Serialize> Serialize for Param<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Param::Constant(v) => v.serialize(serializer),
            Param::TimestampFunction(_) => Err(serde::ser::Error::custom(
                "timestamp functions cannot be serialized",
            )),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Param<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Param::Constant)
    }
}

/// Local sunrise and sunset for the night override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunWindow {
    pub sunrise: NaiveTime,
    pub sunset: NaiveTime,
}

impl SunWindow {
    pub fn new(sunrise: NaiveTime, sunset: NaiveTime) -> Self {
        Self { sunrise, sunset }
    }

    /// Whether `[start, end]` lies wholly before sunrise or wholly after sunset
    /// of the day `start` falls on
    pub fn is_dark(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        let date = start.date();
        end <= date.and_time(self.sunrise) || start >= date.and_time(self.sunset)
    }
}

/// Inclusive admissible range for one channel
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

impl Bounds {
    pub fn at_least(lower: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
        }
    }

    pub fn between(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower.map_or(true, |lo| value >= lo) && self.upper.map_or(true, |hi| value <= hi)
    }
}

/// Sample QC options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcOptions {
    /// Per-channel admissible ranges
    pub bounds: BTreeMap<Channel, Bounds>,
    /// Minimum good-run length (records)
    pub ad_tol: usize,
    /// Minimum good-run fraction of the interval
    pub rd_tol: f64,
}

impl Default for QcOptions {
    fn default() -> Self {
        let mut bounds = BTreeMap::new();
        bounds.insert(Channel::C, Bounds::at_least(0.0));
        bounds.insert(Channel::Q, Bounds::at_least(0.0));
        Self {
            bounds,
            ad_tol: DEFAULT_AD_TOL,
            rd_tol: DEFAULT_RD_TOL,
        }
    }
}

impl QcOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.rd_tol) {
            return Err(ConfigError::InvalidParameter {
                name: "rd_tol".to_string(),
                value: self.rd_tol,
            });
        }
        for (channel, bounds) in &self.bounds {
            for v in [bounds.lower, bounds.upper].into_iter().flatten() {
                if v.is_nan() {
                    return Err(ConfigError::InvalidParameter {
                        name: format!("bounds.{}", channel.as_str()),
                        value: v,
                    });
                }
            }
            if let (Some(lower), Some(upper)) = (bounds.lower, bounds.upper) {
                if lower > upper {
                    return Err(ConfigError::InvalidBounds {
                        channel: *channel,
                        lower,
                        upper,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Partitioning options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionOptions {
    /// Scale partitioned fluxes so they sum to the measured totals
    pub adjust_fluxes: bool,
    /// Sunrise/sunset for the night override; `None` disables it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sun: Option<Param<SunWindow>>,
    /// Minimum difference in |x| for choosing between two valid roots
    pub min_root_separation: f64,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            adjust_fluxes: true,
            sun: None,
            min_root_separation: DEFAULT_MIN_ROOT_SEPARATION,
        }
    }
}

/// Where the interval's water use efficiency comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WueSource {
    /// Caller-supplied value (kg CO2 / kg H2O), strictly negative
    Prescribed(Param<f64>),
    /// Leaf gas-exchange model
    Modeled(WueModel),
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Apply the WPL/Detto-Katul correction to q and c
    #[serde(default = "default_true")]
    pub correct_external: bool,
    /// Friction velocity threshold (m/s)
    #[serde(default = "default_ustar_tol")]
    pub ustar_tol: f64,
    #[serde(default)]
    pub qc: QcOptions,
    pub wue: WueSource,
    #[serde(default)]
    pub partition: PartitionOptions,
}

fn default_true() -> bool {
    true
}

fn default_ustar_tol() -> f64 {
    DEFAULT_USTAR_TOL
}

impl PipelineConfig {
    /// Default options around the given WUE source
    pub fn new(wue: WueSource) -> Self {
        Self {
            correct_external: true,
            ustar_tol: DEFAULT_USTAR_TOL,
            qc: QcOptions::default(),
            wue,
            partition: PartitionOptions::default(),
        }
    }

    /// Prescribed constant WUE with default options
    pub fn with_constant_wue(wue: f64) -> Self {
        Self::new(WueSource::Prescribed(Param::Constant(wue)))
    }

    /// Check everything that can be checked before seeing data
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.qc.validate()?;

        if !self.ustar_tol.is_finite() || self.ustar_tol < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "ustar_tol".to_string(),
                value: self.ustar_tol,
            });
        }

        let sep = self.partition.min_root_separation;
        if !sep.is_finite() || sep < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "min_root_separation".to_string(),
                value: sep,
            });
        }

        match &self.wue {
            WueSource::Prescribed(param) => {
                if let Some(&w) = param.as_constant() {
                    if w.is_nan() || w >= 0.0 {
                        return Err(ConfigError::NonNegativeWue(w));
                    }
                }
            }
            WueSource::Modeled(model) => model.validate()?,
        }

        Ok(())
    }
}

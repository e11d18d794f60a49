//! Core types for the FVS Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: sample batches, the good run, interval statistics, partition results,
//! and the analysis record emitted per interval.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::RejectReason;
use crate::wue::WueEstimate;

/// One of the seven synchronized physical channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Streamwise wind (m/s)
    #[serde(rename = "u")]
    U,
    /// Crosswind (m/s)
    #[serde(rename = "v")]
    V,
    /// Vertical wind (m/s)
    #[serde(rename = "w")]
    W,
    /// CO2 density (kg/m³)
    #[serde(rename = "c")]
    C,
    /// Water vapor density (kg/m³)
    #[serde(rename = "q")]
    Q,
    /// Air temperature (K)
    #[serde(rename = "T")]
    T,
    /// Air pressure (Pa)
    #[serde(rename = "P")]
    P,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Channel::U,
        Channel::V,
        Channel::W,
        Channel::C,
        Channel::Q,
        Channel::T,
        Channel::P,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::U => "u",
            Channel::V => "v",
            Channel::W => "w",
            Channel::C => "c",
            Channel::Q => "q",
            Channel::T => "T",
            Channel::P => "P",
        }
    }
}

/// Externally supplied quality-flag column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagColumn {
    /// Column name, for diagnostics
    pub name: String,
    /// One flag value per record
    pub values: Vec<f64>,
    /// Flag value that marks a good record
    pub good_value: f64,
}

impl FlagColumn {
    /// Whether record `idx` carries the good flag value
    pub fn is_good(&self, idx: usize) -> bool {
        self.values.get(idx).is_some_and(|v| *v == self.good_value)
    }
}

/// One interval's synchronized samples, column-wise, already in SI units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    /// Optional caller identifier carried into the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Interval start (site-local time)
    pub start: NaiveDateTime,
    /// Interval end (site-local time)
    pub end: NaiveDateTime,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub w: Vec<f64>,
    pub c: Vec<f64>,
    pub q: Vec<f64>,
    #[serde(rename = "T")]
    pub t: Vec<f64>,
    #[serde(rename = "P")]
    pub p: Vec<f64>,
    /// Quality-flag columns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<FlagColumn>,
}

impl SampleBatch {
    /// Number of records (length of the shortest channel)
    pub fn len(&self) -> usize {
        Channel::ALL
            .iter()
            .map(|ch| self.channel(*ch).len())
            .min()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Series for one channel
    pub fn channel(&self, channel: Channel) -> &[f64] {
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

/// Longest contiguous run of accepted records within an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodRun {
    /// Index of the first record of the run
    pub start: usize,
    /// Number of records in the run
    pub len: usize,
    /// Number of records in the interval
    pub total: usize,
}

impl GoodRun {
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }

    /// Fraction of the interval covered by the run (0-1)
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.len as f64 / self.total as f64
        }
    }
}

/// Aggregate turbulence statistics for one interval
///
/// Moments are population moments (divide by N) over the good run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalStatistics {
    /// Records used
    pub records: usize,
    pub mean_u: f64,
    pub mean_v: f64,
    pub mean_w: f64,
    /// Mean CO2 density (kg/m³)
    pub mean_c: f64,
    /// Mean water vapor density (kg/m³)
    pub mean_q: f64,
    /// Mean air temperature (K)
    pub mean_t: f64,
    /// Mean air pressure (Pa)
    pub mean_p: f64,
    pub var_w: f64,
    pub var_q: f64,
    pub var_c: f64,
    pub var_t: f64,
    /// Water vapor flux w'q' (kg m⁻² s⁻¹)
    pub cov_w_q: f64,
    /// CO2 flux w'c' (kg m⁻² s⁻¹)
    pub cov_w_c: f64,
    /// Kinematic heat flux w'T' (K m/s)
    pub cov_w_t: f64,
    pub cov_u_w: f64,
    pub cov_v_w: f64,
    pub cov_q_c: f64,
    pub corr_q_c: f64,
    /// Third central moment of q
    pub third_q: f64,
    /// Third central moment of c
    pub third_c: f64,
    pub skew_q: f64,
    pub skew_c: f64,
    /// Friction velocity (m/s)
    pub ustar: f64,
    /// Obukhov length (m); `None` under neutral conditions (w'T' = 0)
    pub obukhov_length: Option<f64>,
}

/// Why a root candidate was judged physically invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootRejection {
    /// Flux split is not finite (ratio of -1 or overflow)
    NonFinite,
    /// Implied nonstomatal:stomatal standard deviation ratio is negative
    NegativeStdRatio,
    /// Transpiration must be positive
    StomatalWaterNotPositive,
    /// Photosynthesis must be negative
    StomatalCo2NotNegative,
    /// Evaporation must be non-negative
    NegativeEvaporation,
    /// Respiration must be non-negative
    NegativeRespiration,
}

/// One root of the flux-ratio quadratic and the split it implies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCandidate {
    /// Nonstomatal:stomatal CO2 flux ratio (w'cr' / w'cp')
    pub flux_ratio: f64,
    /// Transpiration covariance
    pub wqt: f64,
    /// Evaporation covariance
    pub wqe: f64,
    /// Photosynthesis covariance
    pub wcp: f64,
    /// Respiration covariance
    pub wcr: f64,
    /// Reasons this root is invalid; empty when valid
    pub rejections: Vec<RootRejection>,
}

impl RootCandidate {
    pub fn is_valid(&self) -> bool {
        self.rejections.is_empty()
    }
}

/// How the stomatal/nonstomatal split was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMethod {
    /// Flux-variance-similarity root solution
    RootSolution,
    /// Dark hours: all flux assigned to the nonstomatal component
    NightOverride,
}

/// Partitioned covariances for one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub method: PartitionMethod,
    /// Transpiration covariance w'qt'
    pub wqt: f64,
    /// Evaporation covariance w'qe'
    pub wqe: f64,
    /// Photosynthesis covariance w'cp'
    pub wcp: f64,
    /// Respiration covariance w'cr'
    pub wcr: f64,
    /// Correlation between stomatal and nonstomatal CO2 fluctuations
    pub corr_cp_cr: Option<f64>,
    /// Variance of the stomatal CO2 fluctuations
    pub var_cp: Option<f64>,
    /// All roots considered, valid or not
    pub candidates: Vec<RootCandidate>,
    /// Flux ratio of the selected root
    pub selected_ratio: Option<f64>,
    /// Two physically valid roots existed and a tie-break was applied
    pub ambiguous: bool,
    /// Whether closure adjustment was applied
    pub adjusted: bool,
}

impl PartitionResult {
    /// Whether the split respects the stomatal/nonstomatal sign expectations
    pub fn is_valid(&self) -> bool {
        match self.method {
            PartitionMethod::NightOverride => true,
            PartitionMethod::RootSolution => {
                self.wqt > 0.0 && self.wcp < 0.0 && self.wqe >= 0.0 && self.wcr >= 0.0
            }
        }
    }
}

/// Partitioned fluxes in physical units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFluxes {
    /// Total water vapor flux (kg m⁻² s⁻¹)
    pub fq: f64,
    /// Transpiration (kg m⁻² s⁻¹)
    pub fqt: f64,
    /// Evaporation (kg m⁻² s⁻¹)
    pub fqe: f64,
    /// Latent heat flux (W/m²)
    pub le: f64,
    pub let_: f64,
    pub lee: f64,
    /// Total CO2 flux (kg m⁻² s⁻¹)
    pub fc: f64,
    /// Photosynthesis (kg m⁻² s⁻¹)
    pub fcp: f64,
    /// Respiration (kg m⁻² s⁻¹)
    pub fcr: f64,
    /// CO2 fluxes (mol m⁻² s⁻¹)
    pub fc_mol: f64,
    pub fcp_mol: f64,
    pub fcr_mol: f64,
    /// Sensible heat flux (W/m²)
    pub h: f64,
}

/// Non-fatal conditions noted while processing an interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Two valid roots; the one nearer the fully-stomatal limit was used
    RootAmbiguity { selected: f64, rejected: f64 },
    /// External-effect correction was disabled by configuration
    CorrectionDisabled,
    /// Interval was in dark hours; no stomatal exchange assumed
    NightOverride,
    /// WUE came from a caller-supplied timestamp function
    WueFromFunction,
}

/// Outcome of an interval: accepted with its good run, or rejected at some stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QcOutcome {
    Accepted { good_run: GoodRun },
    Rejected { reason: RejectReason },
}

/// Everything known about one processed interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub outcome: QcOutcome,
    pub statistics: Option<IntervalStatistics>,
    pub wue: Option<WueEstimate>,
    pub partition: Option<PartitionResult>,
    pub fluxes: Option<DerivedFluxes>,
    pub warnings: Vec<Warning>,
}

impl AnalysisRecord {
    /// Whether the interval produced a partition
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, QcOutcome::Accepted { .. }) && self.partition.is_some()
    }

    /// The typed rejection reason, if any
    pub fn rejection(&self) -> Option<&RejectReason> {
        match &self.outcome {
            QcOutcome::Rejected { reason } => Some(reason),
            QcOutcome::Accepted { .. } => None,
        }
    }
}

/// All records of one batch call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Unique identifier of this batch run
    pub run_id: String,
    /// Crate name and version that produced the report
    pub producer: String,
    pub version: String,
    /// RFC 3339 completion time
    pub computed_at_utc: String,
    pub accepted: usize,
    pub rejected: usize,
    pub records: Vec<AnalysisRecord>,
}

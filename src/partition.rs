//! Flux-variance-similarity partitioning
//!
//! Stomatal fluctuations are linked by the water use efficiency (c_p' = W q_t'),
//! and the correlation between stomatal and nonstomatal CO2 fluctuations follows
//! flux-variance similarity. Together these give closed forms for the stomatal CO2
//! variance and that correlation, and a quadratic in the flux ratio
//! x = w'cr' / w'cp' whose physically valid root fixes the split.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::closure::FluxAdjuster;
use crate::config::PartitionOptions;
use crate::types::{
    IntervalStatistics, PartitionMethod, PartitionResult, RootCandidate, RootRejection,
};

/// Negative discriminants above this are rounding noise and treated as zero
const DISCRIMINANT_TOL: f64 = 1e-12;

/// Why an interval could not be partitioned
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionError {
    #[error("water use efficiency must be negative, got {wue}")]
    NonNegativeWue { wue: f64 },

    #[error("moments are inconsistent with the model: var_cp = {var_cp}, rho^2 = {rho_sq}")]
    InvalidMoments { var_cp: f64, rho_sq: f64 },

    #[error("flux ratio quadratic has no real root (discriminant {discriminant})")]
    NoRealRoot { discriminant: f64 },

    #[error("no physically valid root among {} candidate(s)", roots.len())]
    Indeterminate { roots: Vec<RootCandidate> },

    #[error("two valid roots too close to choose between")]
    Ambiguous { roots: Vec<RootCandidate> },
}

/// Stomatal CO2 variance and the stomatal/nonstomatal CO2 correlation squared
fn stomatal_moments(stats: &IntervalStatistics, wue: f64) -> (f64, f64) {
    let var_q = stats.var_q;
    let var_c = stats.var_c;
    let cov = stats.cov_q_c;
    let fq = stats.cov_w_q;
    let fc = stats.cov_w_c;

    let det = var_q * var_c - cov * cov;
    let num = var_c * fq * fq - 2.0 * cov * fq * fc + var_q * fc * fc;
    let den = (var_c * fq - cov * (fc + wue * fq) + var_q * wue * fc).powi(2);

    let var_cp = wue * wue * det * num / den;
    let rho_sq = det * (fc - wue * fq).powi(2)
        / (num * (var_c - 2.0 * wue * cov + wue * wue * var_q));
    (var_cp, rho_sq)
}

/// Flux split implied by one root, with its validity verdict
fn root_candidate(x: f64, corr_cp_cr: f64, wue: f64, fq: f64, fc: f64) -> RootCandidate {
    let wcp = fc / (1.0 + x);
    let wcr = x * wcp;
    let wqt = wcp / wue;
    let wqe = fq - wqt;

    let mut rejections = Vec::new();
    if ![x, wcp, wcr, wqt, wqe].iter().all(|v| v.is_finite()) {
        rejections.push(RootRejection::NonFinite);
    } else {
        let std_ratio = if x == 0.0 { 0.0 } else { x / corr_cp_cr };
        if !(std_ratio >= 0.0) {
            rejections.push(RootRejection::NegativeStdRatio);
        }
        if !(wqt > 0.0) {
            rejections.push(RootRejection::StomatalWaterNotPositive);
        }
        if !(wcp < 0.0) {
            rejections.push(RootRejection::StomatalCo2NotNegative);
        }
        if wqe < 0.0 {
            rejections.push(RootRejection::NegativeEvaporation);
        }
        if wcr < 0.0 {
            rejections.push(RootRejection::NegativeRespiration);
        }
    }

    RootCandidate {
        flux_ratio: x,
        wqt,
        wqe,
        wcp,
        wcr,
        rejections,
    }
}

/// Partition one interval's fluxes given its statistics and WUE (kg CO2 / kg H2O)
pub fn fvs_partition(
    stats: &IntervalStatistics,
    wue: f64,
    opts: &PartitionOptions,
) -> Result<PartitionResult, PartitionError> {
    if !(wue < 0.0) {
        return Err(PartitionError::NonNegativeWue { wue });
    }

    let (var_cp, rho_sq) = stomatal_moments(stats, wue);
    if !var_cp.is_finite() || !rho_sq.is_finite() || var_cp <= 0.0 || !(0.0..=1.0).contains(&rho_sq)
    {
        return Err(PartitionError::InvalidMoments { var_cp, rho_sq });
    }

    let rho = rho_sq.sqrt();
    let corr_cp_cr = -rho;

    let mut discriminant = rho_sq - 1.0 + stats.var_c / var_cp;
    if discriminant < 0.0 {
        if discriminant < -DISCRIMINANT_TOL {
            return Err(PartitionError::NoRealRoot { discriminant });
        }
        discriminant = 0.0;
    }

    let spread = rho * discriminant.sqrt();
    let mut ratios = vec![-rho_sq + spread];
    if spread > 0.0 {
        ratios.push(-rho_sq - spread);
    }

    let candidates: Vec<RootCandidate> = ratios
        .into_iter()
        .map(|x| root_candidate(x, corr_cp_cr, wue, stats.cov_w_q, stats.cov_w_c))
        .collect();

    let valid: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].is_valid())
        .collect();
    let (selected, ambiguous) = match *valid.as_slice() {
        [] => return Err(PartitionError::Indeterminate { roots: candidates }),
        [only] => (candidates[only].clone(), false),
        [a, b, ..] => {
            let (near, far) = if candidates[a].flux_ratio.abs() <= candidates[b].flux_ratio.abs() {
                (a, b)
            } else {
                (b, a)
            };
            let gap = candidates[far].flux_ratio.abs() - candidates[near].flux_ratio.abs();
            if gap < opts.min_root_separation {
                return Err(PartitionError::Ambiguous { roots: candidates });
            }
            (candidates[near].clone(), true)
        }
    };

    let mut result = PartitionResult {
        method: PartitionMethod::RootSolution,
        wqt: selected.wqt,
        wqe: selected.wqe,
        wcp: selected.wcp,
        wcr: selected.wcr,
        corr_cp_cr: Some(corr_cp_cr),
        var_cp: Some(var_cp),
        candidates,
        selected_ratio: Some(selected.flux_ratio),
        ambiguous,
        adjusted: false,
    };

    if opts.adjust_fluxes {
        FluxAdjuster::adjust(&mut result, stats);
    }

    Ok(result)
}

/// Whether the night override applies to the interval `[start, end]`
pub fn is_night(opts: &PartitionOptions, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    opts.sun
        .as_ref()
        .is_some_and(|sun| sun.resolve(start).is_dark(start, end))
}

impl PartitionResult {
    /// All flux assigned to the nonstomatal components
    pub fn nonstomatal(stats: &IntervalStatistics) -> Self {
        Self {
            method: PartitionMethod::NightOverride,
            wqt: 0.0,
            wqe: stats.cov_w_q,
            wcp: 0.0,
            wcr: stats.cov_w_c,
            corr_cp_cr: None,
            var_cp: None,
            candidates: Vec::new(),
            selected_ratio: None,
            ambiguous: false,
            adjusted: false,
        }
    }
}

//! Turbulence statistics
//!
//! Population moments over the good run, computed in two passes (means first,
//! then central sums), plus friction velocity and Obukhov length.

use crate::constants::{GRAVITY, VON_KARMAN};
use crate::error::RejectReason;
use crate::types::{GoodRun, IntervalStatistics, SampleBatch};

/// Arithmetic mean; NaN for an empty sequence
pub(crate) fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

fn central(a: &[f64], a_bar: f64, b: &[f64], b_bar: f64) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - a_bar) * (y - b_bar))
        .sum::<f64>()
        / a.len() as f64
}

fn third(a: &[f64], a_bar: f64) -> f64 {
    a.iter().map(|x| (x - a_bar).powi(3)).sum::<f64>() / a.len() as f64
}

fn skewness(third: f64, var: f64) -> f64 {
    if var > 0.0 {
        third / var.powf(1.5)
    } else {
        0.0
    }
}

/// Borrowed view of the seven channels over the records used for statistics
#[derive(Debug, Clone, Copy)]
pub struct Series<'a> {
    pub u: &'a [f64],
    pub v: &'a [f64],
    pub w: &'a [f64],
    pub c: &'a [f64],
    pub q: &'a [f64],
    pub t: &'a [f64],
    pub p: &'a [f64],
}

impl<'a> Series<'a> {
    /// Slice the good run out of a batch
    pub fn from_run(batch: &'a SampleBatch, run: &GoodRun) -> Self {
        let r = run.range();
        Self {
            u: &batch.u[r.clone()],
            v: &batch.v[r.clone()],
            w: &batch.w[r.clone()],
            c: &batch.c[r.clone()],
            q: &batch.q[r.clone()],
            t: &batch.t[r.clone()],
            p: &batch.p[r],
        }
    }

    /// Replace the scalar series, e.g. with corrected values
    pub fn with_scalars(self, q: &'a [f64], c: &'a [f64]) -> Self {
        Self { q, c, ..self }
    }

    pub fn len(&self) -> usize {
        self.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }
}

/// Turbulence statistics engine
pub struct StatisticsEngine;

impl StatisticsEngine {
    /// Compute interval statistics; requires at least two records
    pub fn compute(series: &Series<'_>) -> Result<IntervalStatistics, RejectReason> {
        let records = series.len();
        if records < 2 {
            return Err(RejectReason::InsufficientStatistics { records });
        }

        let mean_u = mean(series.u.iter().copied());
        let mean_v = mean(series.v.iter().copied());
        let mean_w = mean(series.w.iter().copied());
        let mean_c = mean(series.c.iter().copied());
        let mean_q = mean(series.q.iter().copied());
        let mean_t = mean(series.t.iter().copied());
        let mean_p = mean(series.p.iter().copied());

        let var_w = central(series.w, mean_w, series.w, mean_w);
        let var_q = central(series.q, mean_q, series.q, mean_q);
        let var_c = central(series.c, mean_c, series.c, mean_c);
        let var_t = central(series.t, mean_t, series.t, mean_t);

        let cov_w_q = central(series.w, mean_w, series.q, mean_q);
        let cov_w_c = central(series.w, mean_w, series.c, mean_c);
        let cov_w_t = central(series.w, mean_w, series.t, mean_t);
        let cov_u_w = central(series.u, mean_u, series.w, mean_w);
        let cov_v_w = central(series.v, mean_v, series.w, mean_w);
        let cov_q_c = central(series.q, mean_q, series.c, mean_c);

        let corr_q_c = if var_q > 0.0 && var_c > 0.0 {
            cov_q_c / (var_q * var_c).sqrt()
        } else {
            0.0
        };

        let third_q = third(series.q, mean_q);
        let third_c = third(series.c, mean_c);

        let ustar = (cov_u_w * cov_u_w + cov_v_w * cov_v_w).powf(0.25);
        let obukhov_length = obukhov_length(mean_t, ustar, cov_w_t);

        Ok(IntervalStatistics {
            records,
            mean_u,
            mean_v,
            mean_w,
            mean_c,
            mean_q,
            mean_t,
            mean_p,
            var_w,
            var_q,
            var_c,
            var_t,
            cov_w_q,
            cov_w_c,
            cov_w_t,
            cov_u_w,
            cov_v_w,
            cov_q_c,
            corr_q_c,
            third_q,
            third_c,
            skew_q: skewness(third_q, var_q),
            skew_c: skewness(third_c, var_c),
            ustar,
            obukhov_length,
        })
    }

    /// Reject intervals whose friction velocity is below `ustar_tol`
    pub fn check_turbulence(stats: &IntervalStatistics, ustar_tol: f64) -> Result<(), RejectReason> {
        if stats.ustar < ustar_tol {
            return Err(RejectReason::InsufficientTurbulence {
                ustar: stats.ustar,
                threshold: ustar_tol,
            });
        }
        Ok(())
    }
}

/// Obukhov length (m); `None` when the kinematic heat flux is zero
pub fn obukhov_length(mean_t: f64, ustar: f64, cov_w_t: f64) -> Option<f64> {
    if cov_w_t == 0.0 {
        None
    } else {
        Some(-mean_t * ustar.powi(3) / (VON_KARMAN * GRAVITY * cov_w_t))
    }
}

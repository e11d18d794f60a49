//! External-effect correction of scalar densities
//!
//! Applies the Webb-Pearman-Leuning (1980) density correction in the form used by
//! Detto and Katul (2007) to the water vapor and CO2 series of a good run.

use crate::constants::{GAS_CONSTANT_DRY_AIR, GAS_CONSTANT_VAPOR, MOLAR_MASS_DRY_AIR, MOLAR_MASS_VAPOR};
use crate::stats::mean;

/// Corrected scalar series
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedScalars {
    pub q: Vec<f64>,
    pub c: Vec<f64>,
}

/// External-effect corrector
pub struct ExternalCorrector;

impl ExternalCorrector {
    /// Correct q and c for density fluctuations driven by heat and water vapor.
    ///
    /// All slices must have the same length. Fluctuations are taken about the run
    /// means of the uncorrected series.
    pub fn correct(q: &[f64], c: &[f64], t: &[f64], p: &[f64]) -> CorrectedScalars {
        if q.is_empty() {
            return CorrectedScalars {
                q: Vec::new(),
                c: Vec::new(),
            };
        }

        let rho_d = mean(
            q.iter()
                .zip(t)
                .zip(p)
                .map(|((q, t), p)| (p - q * GAS_CONSTANT_VAPOR * t) / (GAS_CONSTANT_DRY_AIR * t)),
        );
        let q_bar = mean(q.iter().copied());
        let c_bar = mean(c.iter().copied());
        let t_bar = mean(t.iter().copied());

        let mu = MOLAR_MASS_DRY_AIR / MOLAR_MASS_VAPOR;
        let sigma = q_bar / rho_d;
        let thermal = 1.0 + mu * sigma;

        let mut q_out = Vec::with_capacity(q.len());
        let mut c_out = Vec::with_capacity(c.len());
        for i in 0..q.len() {
            let q_prime = q[i] - q_bar;
            let t_ratio = (t[i] - t_bar) / t_bar;
            q_out.push(q[i] + mu * sigma * q_prime + thermal * q_bar * t_ratio);
            c_out.push(c[i] + mu * (c_bar / rho_d) * q_prime + thermal * c_bar * t_ratio);
        }

        CorrectedScalars { q: q_out, c: c_out }
    }
}

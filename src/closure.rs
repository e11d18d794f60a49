//! Flux closure
//!
//! Rescales each stomatal/nonstomatal pair so that it sums to the measured total,
//! then settles floating-point residuals into the nonstomatal term.

use crate::types::{IntervalStatistics, PartitionResult};

/// Upper bound on single-ulp moves while settling a residual
const MAX_ULP_STEPS: usize = 64;

/// Flux closure adjuster
pub struct FluxAdjuster;

impl FluxAdjuster {
    /// Close both species against the interval's measured fluxes
    pub fn adjust(result: &mut PartitionResult, stats: &IntervalStatistics) {
        let (wqt, wqe) = Self::close_pair(result.wqt, result.wqe, stats.cov_w_q);
        let (wcp, wcr) = Self::close_pair(result.wcp, result.wcr, stats.cov_w_c);
        result.wqt = wqt;
        result.wqe = wqe;
        result.wcp = wcp;
        result.wcr = wcr;
        result.adjusted = true;
    }

    /// Scale `(stomatal, nonstomatal)` proportionally so the pair sums to `total`.
    ///
    /// When the pair sums to zero it is returned unchanged for a zero total;
    /// otherwise the whole total goes to the nonstomatal term.
    pub fn close_pair(stomatal: f64, nonstomatal: f64, total: f64) -> (f64, f64) {
        if !(stomatal.is_finite() && nonstomatal.is_finite() && total.is_finite()) {
            return (stomatal, nonstomatal);
        }

        let sum = stomatal + nonstomatal;
        let s = if sum == 0.0 {
            if total == 0.0 {
                return (stomatal, nonstomatal);
            }
            stomatal
        } else {
            stomatal * (total / sum)
        };

        Self::settle(s, total - s, total)
    }

    fn settle(mut s: f64, mut n: f64, total: f64) -> (f64, f64) {
        for _ in 0..MAX_ULP_STEPS {
            let residual = total - (s + n);
            if residual == 0.0 {
                return (s, n);
            }
            let next = n + residual;
            n = if next == n {
                ulp_step(n, residual > 0.0)
            } else {
                next
            };
        }

        // Residual finer than the nonstomatal grid: let the stomatal term absorb it
        for _ in 0..4 {
            if s + n == total {
                break;
            }
            s = total - n;
            n = total - s;
        }
        (s, n)
    }
}

/// Adjacent representable value toward +inf (`up`) or -inf
fn ulp_step(x: f64, up: bool) -> f64 {
    if x == 0.0 {
        let tiny = f64::from_bits(1);
        return if up { tiny } else { -tiny };
    }
    let bits = x.to_bits();
    if (x > 0.0) == up {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartitionMethod;

    #[test]
    fn test_close_pair_exact_for_same_sign_components() {
        let cases = [
            (0.1, 0.2, 0.3),
            (0.5, 0.75, 1.25),
            (0.333_333_333_333_333_26, 0.566_666_666_666_666_8, 0.9),
            (1e-5, 3e-5, 4.1e-5),
            (2.0e-5, 1.0e-5, 2.7e-5),
        ];
        for (s, n, total) in cases {
            let (s2, n2) = FluxAdjuster::close_pair(s, n, total);
            assert_eq!(s2 + n2, total, "({s}, {n}) -> {total}");
        }
    }

    #[test]
    fn test_close_pair_is_proportional() {
        let (s, n) = FluxAdjuster::close_pair(1e-5, 3e-5, 4.1e-5);
        assert!((s - 1.025e-5).abs() < 1e-18);
        assert!((n - 3.075e-5).abs() < 1e-18);
    }

    #[test]
    fn test_close_pair_opposite_signs() {
        let (s, n) = FluxAdjuster::close_pair(-1.0, 0.75, -0.25);
        assert_eq!((s, n), (-1.0, 0.75));
    }

    #[test]
    fn test_co2_pairs_close_to_half_ulp_of_larger_term() {
        // photosynthesis outweighs respiration, total within 0.05 % of the raw sum
        let mut inexact = 0;
        for i in 0..200usize {
            let wcp = -0.5e-6 - 1.0e-6 * (i as f64 / 199.0);
            let wcr = 0.1e-6 + 0.8e-6 * ((i * 37 % 200) as f64 / 199.0);
            let total = (wcp + wcr) * (1.0 + 5.0e-4 * ((i * 13 % 200) as f64 / 100.0 - 1.0));

            let (s, n) = FluxAdjuster::close_pair(wcp, wcr, total);
            assert!((s / wcp - total / (wcp + wcr)).abs() < 1e-15);

            let larger = s.abs().max(n.abs());
            let ulp = f64::from_bits(larger.to_bits() + 1) - larger;
            let residual = (total - (s + n)).abs();
            assert!(residual <= 0.5 * ulp, "pair {i}: residual {residual:e}");
            if residual != 0.0 {
                inexact += 1;
            }
        }
        // the total's grid is finer than the components'
        assert!(inexact > 0);
    }

    #[test]
    fn test_zero_sum_pair() {
        assert_eq!(FluxAdjuster::close_pair(0.0, 0.0, 0.0), (0.0, 0.0));
        assert_eq!(FluxAdjuster::close_pair(0.0, 0.0, 2.0), (0.0, 2.0));
        assert_eq!(FluxAdjuster::close_pair(1.0, -1.0, 0.0), (1.0, -1.0));
    }

    #[test]
    fn test_ulp_step() {
        assert!(ulp_step(1.0, true) > 1.0);
        assert!(ulp_step(1.0, false) < 1.0);
        assert!(ulp_step(-1.0, true) > -1.0);
        assert!(ulp_step(-1.0, false) < -1.0);
        assert!(ulp_step(0.0, true) > 0.0);
        assert_eq!(ulp_step(ulp_step(0.5, true), false), 0.5);
    }

    #[test]
    fn test_adjust_sets_flag_and_closes() {
        let mut result = PartitionResult {
            method: PartitionMethod::RootSolution,
            wqt: 0.1,
            wqe: 0.2,
            wcp: -0.2,
            wcr: 0.05,
            corr_cp_cr: None,
            var_cp: None,
            candidates: Vec::new(),
            selected_ratio: None,
            ambiguous: false,
            adjusted: false,
        };
        let stats = crate::partition::tests::make_test_stats(13.0, 7.0, 5.5, 0.3, -0.15);
        FluxAdjuster::adjust(&mut result, &stats);
        assert!(result.adjusted);
        assert_eq!(result.wqt + result.wqe, 0.3);
        assert!((result.wcp + result.wcr + 0.15).abs() < 1e-16);
    }
}

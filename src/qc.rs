//! Sample quality screening
//!
//! Marks each record good or bad, finds the longest run of consecutive good
//! records, and checks it against the absolute and relative tolerances.
//! Bad records are excluded, never imputed.

use crate::config::QcOptions;
use crate::error::{RejectReason, Tolerance};
use crate::types::{Channel, GoodRun, SampleBatch};

/// Sample QC filter
pub struct QualityScreen;

impl QualityScreen {
    /// Screen one interval and return its good run
    pub fn screen(batch: &SampleBatch, opts: &QcOptions) -> Result<GoodRun, RejectReason> {
        let mask = Self::record_mask(batch, opts);
        let run = Self::longest_run(&mask);

        if run.len < opts.ad_tol || run.total == 0 {
            return Err(RejectReason::InsufficientData {
                tolerance: Tolerance::Absolute,
                good_run: run.len,
                total: run.total,
                required: opts.ad_tol as f64,
            });
        }

        if run.fraction() < opts.rd_tol {
            return Err(RejectReason::InsufficientData {
                tolerance: Tolerance::Relative,
                good_run: run.len,
                total: run.total,
                required: opts.rd_tol * run.total as f64,
            });
        }

        Ok(run)
    }

    /// Per-record acceptance
    pub fn record_mask(batch: &SampleBatch, opts: &QcOptions) -> Vec<bool> {
        (0..batch.len())
            .map(|i| Self::is_good(batch, opts, i))
            .collect()
    }

    fn is_good(batch: &SampleBatch, opts: &QcOptions, idx: usize) -> bool {
        let channels_ok = Channel::ALL.iter().all(|ch| {
            let value = batch.channel(*ch)[idx];
            value.is_finite()
                && opts
                    .bounds
                    .get(ch)
                    .map_or(true, |bounds| bounds.contains(value))
        });

        channels_ok && batch.flags.iter().all(|flag| flag.is_good(idx))
    }

    /// Longest contiguous run of `true`; the first one wins on ties
    pub fn longest_run(mask: &[bool]) -> GoodRun {
        let mut best = GoodRun {
            start: 0,
            len: 0,
            total: mask.len(),
        };
        let mut current_start = 0;
        let mut current_len = 0;

        for (i, &good) in mask.iter().enumerate() {
            if good {
                if current_len == 0 {
                    current_start = i;
                }
                current_len += 1;
                if current_len > best.len {
                    best.start = current_start;
                    best.len = current_len;
                }
            } else {
                current_len = 0;
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Bounds;
    use crate::types::FlagColumn;
    use chrono::NaiveDate;

    fn make_test_batch(n: usize) -> SampleBatch {
        let start = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        SampleBatch {
            label: None,
            start,
            end: start + chrono::Duration::minutes(30),
            u: vec![2.0; n],
            v: vec![0.5; n],
            w: vec![0.0; n],
            c: vec![7.0e-4; n],
            q: vec![1.0e-2; n],
            t: vec![298.0; n],
            p: vec![101_325.0; n],
            flags: Vec::new(),
        }
    }

    fn small_tolerances() -> QcOptions {
        QcOptions {
            ad_tol: 4,
            rd_tol: 0.4,
            ..QcOptions::default()
        }
    }

    #[test]
    fn test_longest_run_first_wins_on_tie() {
        let mask = [true, true, false, true, true, false, true];
        let run = QualityScreen::longest_run(&mask);
        assert_eq!(run, GoodRun { start: 0, len: 2, total: 7 });
    }

    #[test]
    fn test_longest_run_picks_longest() {
        let mask = [true, false, true, true, true, false, true, true];
        let run = QualityScreen::longest_run(&mask);
        assert_eq!(run.start, 2);
        assert_eq!(run.len, 3);
        assert_eq!(run.range(), 2..5);
    }

    #[test]
    fn test_all_good_batch_accepted() {
        let batch = make_test_batch(10);
        let run = QualityScreen::screen(&batch, &small_tolerances()).unwrap();
        assert_eq!(run, GoodRun { start: 0, len: 10, total: 10 });
    }

    #[test]
    fn test_non_finite_and_out_of_bounds_records_are_bad() {
        let mut batch = make_test_batch(6);
        batch.w[1] = f64::NAN;
        batch.q[3] = -1e-6;
        batch.t[5] = f64::INFINITY;
        let mask = QualityScreen::record_mask(&batch, &QcOptions::default());
        assert_eq!(mask, vec![true, false, true, false, true, false]);
    }

    #[test]
    fn test_custom_bounds_apply() {
        let mut batch = make_test_batch(4);
        batch.t[2] = 350.0;
        let mut opts = QcOptions::default();
        opts.bounds.insert(Channel::T, Bounds::between(250.0, 330.0));
        let mask = QualityScreen::record_mask(&batch, &opts);
        assert_eq!(mask, vec![true, true, false, true]);
    }

    #[test]
    fn test_flag_columns_mark_records_bad() {
        let mut batch = make_test_batch(5);
        batch.flags.push(FlagColumn {
            name: "diag".to_string(),
            values: vec![0.0, 0.0, 1.0, 0.0, 0.0],
            good_value: 0.0,
        });
        let mask = QualityScreen::record_mask(&batch, &QcOptions::default());
        assert_eq!(mask, vec![true, true, false, true, true]);
    }

    #[test]
    fn test_absolute_tolerance_rejection() {
        let batch = make_test_batch(3);
        let err = QualityScreen::screen(&batch, &small_tolerances()).unwrap_err();
        assert_eq!(
            err,
            RejectReason::InsufficientData {
                tolerance: Tolerance::Absolute,
                good_run: 3,
                total: 3,
                required: 4.0,
            }
        );
    }

    #[test]
    fn test_relative_tolerance_rejection() {
        let mut batch = make_test_batch(20);
        for i in (0..20).step_by(5) {
            batch.c[i] = f64::NAN;
        }
        // runs of 4 out of 20 -> 0.2 < 0.4
        let err = QualityScreen::screen(&batch, &small_tolerances()).unwrap_err();
        match err {
            RejectReason::InsufficientData {
                tolerance,
                good_run,
                total,
                ..
            } => {
                assert_eq!(tolerance, Tolerance::Relative);
                assert_eq!(good_run, 4);
                assert_eq!(total, 20);
            }
            other => panic!("unexpected rejection {other:?}"),
        }
    }

    #[test]
    fn test_absolute_reported_before_relative() {
        let mut batch = make_test_batch(10);
        batch.q[2] = f64::NAN;
        batch.q[5] = f64::NAN;
        batch.q[8] = f64::NAN;
        // longest run is 2: fails both tolerances
        let err = QualityScreen::screen(&batch, &small_tolerances()).unwrap_err();
        assert!(matches!(
            err,
            RejectReason::InsufficientData {
                tolerance: Tolerance::Absolute,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_batch_rejected_with_absolute_tolerance() {
        let batch = make_test_batch(0);
        let opts = QcOptions {
            ad_tol: 0,
            ..QcOptions::default()
        };
        let err = QualityScreen::screen(&batch, &opts).unwrap_err();
        assert!(matches!(
            err,
            RejectReason::InsufficientData {
                tolerance: Tolerance::Absolute,
                total: 0,
                ..
            }
        ));
    }
}

//! Pipeline orchestration
//!
//! This module provides the public API for FVS Flux.
//! It runs each interval through QC, correction, statistics, WUE, partitioning,
//! and aggregation, and fans batches out over a rayon thread pool.

use rayon::prelude::*;
use tracing::{debug, dispatcher, info, info_span, warn, Dispatch};
use uuid::Uuid;

use crate::aggregate::{IntervalAccumulator, ResultAggregator};
use crate::config::{PipelineConfig, WueSource};
use crate::correction::ExternalCorrector;
use crate::error::{ComputeError, ConfigError, RejectReason};
use crate::partition::{fvs_partition, is_night};
use crate::qc::QualityScreen;
use crate::schema::BatchAdapter;
use crate::stats::{Series, StatisticsEngine};
use crate::types::{AnalysisRecord, BatchReport, PartitionResult, SampleBatch, Warning};
use crate::wue::WueEstimator;

/// Partition a set of intervals with the given configuration.
///
/// # Arguments
/// * `batches` - One sample batch per interval
/// * `config` - Pipeline configuration, validated before any interval runs
///
/// # Returns
/// A batch report with one analysis record per interval, in input order
pub fn partition_batches(
    batches: &[SampleBatch],
    config: PipelineConfig,
) -> Result<BatchReport, ConfigError> {
    let processor = FvsProcessor::new(config)?;
    Ok(processor.process_batch(batches))
}

/// Partition a JSON array of fvs.interval_batch.v1 documents.
///
/// # Returns
/// The batch report encoded as JSON
///
/// # Example
/// ```ignore
/// let report_json = partition_json(
///     intervals_json,
///     PipelineConfig::with_constant_wue(-0.004),
/// )?;
/// ```
pub fn partition_json(raw_json: &str, config: PipelineConfig) -> Result<String, ComputeError> {
    let processor = FvsProcessor::new(config)?;
    let batches = BatchAdapter::to_sample_batches(BatchAdapter::parse_array(raw_json)?)?;
    let report = processor.process_batch(&batches);
    ResultAggregator::encode_report(&report, false)
}

/// Processor holding one validated configuration.
///
/// Shared read-only across intervals; `process_batch` runs intervals in parallel.
pub struct FvsProcessor {
    config: PipelineConfig,
}

impl FvsProcessor {
    /// Validate the configuration and build a processor
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one interval through every stage.
    ///
    /// Rejections are carried inside the returned record.
    pub fn process_interval(&self, batch: &SampleBatch) -> AnalysisRecord {
        let mut acc = IntervalAccumulator::default();
        match self.run_stages(batch, &mut acc) {
            Ok(()) => {
                debug!(start = %batch.start, label = ?batch.label, "interval partitioned");
                ResultAggregator::accepted(batch, acc)
            }
            Err(reason) => {
                warn!(
                    start = %batch.start,
                    label = ?batch.label,
                    code = reason.code(),
                    "interval rejected: {}",
                    reason
                );
                ResultAggregator::rejected(batch, reason, acc)
            }
        }
    }

    /// Run every interval; records come back in input order
    pub fn process_batch(&self, batches: &[SampleBatch]) -> BatchReport {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("batch", run_id = %run_id, intervals = batches.len());
        let _guard = span.enter();

        // rayon workers have no subscriber or span context of their own
        let dispatch = dispatcher::get_default(Dispatch::clone);
        let records: Vec<AnalysisRecord> = batches
            .par_iter()
            .enumerate()
            .map(|(index, batch)| {
                dispatcher::with_default(&dispatch, || {
                    let _interval = info_span!(parent: &span, "interval", index).entered();
                    self.process_interval(batch)
                })
            })
            .collect();

        let report = ResultAggregator::report(run_id, records);
        info!(
            accepted = report.accepted,
            rejected = report.rejected,
            "batch complete"
        );
        report
    }

    fn run_stages(
        &self,
        batch: &SampleBatch,
        acc: &mut IntervalAccumulator,
    ) -> Result<(), RejectReason> {
        let config = &self.config;

        // Stage 1: QC
        let run = QualityScreen::screen(batch, &config.qc)?;
        acc.good_run = Some(run);
        debug!(start = run.start, len = run.len, total = run.total, "good run");

        // Stage 2: external-effect correction
        let raw = Series::from_run(batch, &run);
        let corrected;
        let series = if config.correct_external {
            corrected = ExternalCorrector::correct(raw.q, raw.c, raw.t, raw.p);
            raw.with_scalars(&corrected.q, &corrected.c)
        } else {
            acc.warn(Warning::CorrectionDisabled);
            raw
        };

        // Stage 3: turbulence statistics
        let stats = StatisticsEngine::compute(&series)?;
        debug!(ustar = stats.ustar, cov_w_q = stats.cov_w_q, cov_w_c = stats.cov_w_c, "statistics");
        acc.statistics = Some(stats.clone());
        StatisticsEngine::check_turbulence(&stats, config.ustar_tol)?;

        // Night: no stomatal exchange, skip WUE and root finding
        if is_night(&config.partition, batch.start, batch.end) {
            debug!("night override");
            acc.warn(Warning::NightOverride);
            acc.partition = Some(PartitionResult::nonstomatal(&stats));
            return Ok(());
        }

        // Stage 4: water use efficiency
        let wue = WueEstimator::estimate(&config.wue, batch.start, &stats)?;
        if let WueSource::Prescribed(param) = &config.wue {
            if param.is_function() {
                acc.warn(Warning::WueFromFunction);
            }
        }
        debug!(wue = wue.wue, "water use efficiency");
        let wue_value = wue.wue;
        acc.wue = Some(wue);

        // Stage 5 and 6: root finding and closure
        let partition = fvs_partition(&stats, wue_value, &config.partition)?;
        if partition.ambiguous {
            if let Some(selected) = partition.selected_ratio {
                let rejected = partition
                    .candidates
                    .iter()
                    .map(|c| c.flux_ratio)
                    .find(|x| *x != selected)
                    .unwrap_or(selected);
                acc.warn(Warning::RootAmbiguity { selected, rejected });
            }
        }
        acc.partition = Some(partition);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Param, SunWindow};
    use crate::error::Tolerance;
    use crate::types::{PartitionMethod, QcOutcome};
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    /// Deterministic interval with upward vapor flux and downward CO2 flux
    fn make_test_batch(n: usize, start: NaiveDateTime) -> SampleBatch {
        let mut batch = SampleBatch {
            label: Some("synthetic".to_string()),
            start,
            end: start + chrono::Duration::minutes(30),
            u: Vec::with_capacity(n),
            v: Vec::with_capacity(n),
            w: Vec::with_capacity(n),
            c: Vec::with_capacity(n),
            q: Vec::with_capacity(n),
            t: Vec::with_capacity(n),
            p: Vec::with_capacity(n),
            flags: Vec::new(),
        };
        for i in 0..n {
            let phase = i as f64 * 0.37;
            let w = 0.4 * phase.sin();
            let gust = 0.3 * (phase * 1.7).cos();
            let other = (phase * 0.53).sin();
            // stomatal scalar fluctuations follow w; nonstomatal follow a mix
            let qt = 4.0e-4 * w;
            let qe = 2.0e-4 * (0.6 * w + 0.8 * other);
            let cp = -0.01 * qt;
            let cr = 1.0e-6 * (0.5 * w + 0.5 * other);
            batch.u.push(3.0 - 0.8 * w + gust);
            batch.v.push(0.2 * (phase * 0.9).sin());
            batch.w.push(w);
            batch.q.push(1.0e-2 + qt + qe);
            batch.c.push(7.0e-4 + cp + cr);
            batch.t.push(298.0 + 0.5 * w);
            batch.p.push(1.0e5);
        }
        batch
    }

    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig::with_constant_wue(-0.01);
        config.qc.ad_tol = 100;
        config
    }

    #[derive(Clone, Default)]
    struct SharedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_interval_events_carry_run_id() {
        let log = SharedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();

        let processor = FvsProcessor::new(test_config()).unwrap();
        let batches: Vec<SampleBatch> = (0..4).map(|_| make_test_batch(50, noon())).collect();
        let report = tracing::subscriber::with_default(subscriber, || {
            processor.process_batch(&batches)
        });
        assert_eq!(report.rejected, 4);

        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        let rejections: Vec<&str> = text
            .lines()
            .filter(|line| line.contains("interval rejected"))
            .collect();
        assert_eq!(rejections.len(), 4);
        for line in rejections {
            assert!(line.contains(&report.run_id), "missing run id: {line}");
            assert!(line.contains("interval{index="), "missing interval span: {line}");
        }
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        assert!(FvsProcessor::new(PipelineConfig::with_constant_wue(0.01)).is_err());
    }

    #[test]
    fn test_qc_rejection_skips_downstream_stages() {
        let processor = FvsProcessor::new(PipelineConfig::with_constant_wue(-0.01)).unwrap();
        let record = processor.process_interval(&make_test_batch(200, noon()));
        assert!(matches!(
            record.rejection(),
            Some(RejectReason::InsufficientData {
                tolerance: Tolerance::Absolute,
                ..
            })
        ));
        assert!(record.statistics.is_none());
        assert!(record.wue.is_none());
        assert!(record.partition.is_none());
    }

    #[test]
    fn test_low_turbulence_rejected_with_statistics() {
        let mut config = test_config();
        config.ustar_tol = 10.0;
        let processor = FvsProcessor::new(config).unwrap();
        let record = processor.process_interval(&make_test_batch(400, noon()));
        match record.rejection() {
            Some(RejectReason::InsufficientTurbulence { threshold, .. }) => {
                assert_eq!(*threshold, 10.0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(record.statistics.is_some());
        assert!(record.partition.is_none());
    }

    #[test]
    fn test_night_override_all_nonstomatal() {
        let mut config = test_config();
        config.partition.sun = Some(Param::Constant(SunWindow::new(
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        )));
        let processor = FvsProcessor::new(config).unwrap();
        let night = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        let record = processor.process_interval(&make_test_batch(400, night));

        assert!(record.is_accepted());
        let partition = record.partition.as_ref().unwrap();
        let stats = record.statistics.as_ref().unwrap();
        assert_eq!(partition.method, PartitionMethod::NightOverride);
        assert_eq!(partition.wqt, 0.0);
        assert_eq!(partition.wcp, 0.0);
        assert_eq!(partition.wqe, stats.cov_w_q);
        assert_eq!(partition.wcr, stats.cov_w_c);
        assert!(record.warnings.contains(&Warning::NightOverride));
        assert!(record.wue.is_none());
    }

    #[test]
    fn test_correction_disabled_warning() {
        let mut config = test_config();
        config.correct_external = false;
        let processor = FvsProcessor::new(config).unwrap();
        let record = processor.process_interval(&make_test_batch(400, noon()));
        assert!(record.warnings.contains(&Warning::CorrectionDisabled));
        assert!(record.statistics.is_some());
    }

    #[test]
    fn test_function_wue_warning_and_rejection() {
        let mut config = test_config();
        config.wue = WueSource::Prescribed(Param::from_fn(|_| 0.5));
        let processor = FvsProcessor::new(config).unwrap();
        let record = processor.process_interval(&make_test_batch(400, noon()));
        assert_eq!(
            record.rejection(),
            Some(&RejectReason::InvalidWue { value: 0.5 })
        );
    }

    #[test]
    fn test_every_interval_yields_a_record() {
        let processor = FvsProcessor::new(test_config()).unwrap();
        let batches = vec![
            make_test_batch(400, noon()),
            make_test_batch(50, noon()),
            make_test_batch(400, noon() + chrono::Duration::minutes(30)),
        ];
        let report = processor.process_batch(&batches);
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.accepted + report.rejected, 3);
        assert!(matches!(
            report.records[1].outcome,
            QcOutcome::Rejected { .. }
        ));
        assert_eq!(report.records[2].start, batches[2].start);
        assert!(Uuid::parse_str(&report.run_id).is_ok());
    }

    #[test]
    fn test_partition_json_round_trip() {
        let batch = crate::schema::IntervalBatch::from(make_test_batch(400, noon()));
        let json = serde_json::to_string(&vec![batch]).unwrap();
        let report_json = partition_json(&json, test_config()).unwrap();
        let report: serde_json::Value = serde_json::from_str(&report_json).unwrap();
        assert_eq!(report["records"].as_array().unwrap().len(), 1);
        assert_eq!(report["records"][0]["label"], "synthetic");
        assert_eq!(report["producer"], crate::PRODUCER_NAME);
    }
}

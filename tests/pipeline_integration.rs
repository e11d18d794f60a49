//! End-to-end runs of the partitioning pipeline on synthetic intervals

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use fvs_flux::error::Tolerance;
use fvs_flux::types::{PartitionMethod, Warning};
use fvs_flux::{
    partition_json, BatchAdapter, FvsProcessor, IntervalBatch, Param, Pathway, PipelineConfig,
    RejectReason, SampleBatch, SunWindow, WueModel, WueSource,
};

const WUE: f64 = -0.01;

/// xorshift64* so intervals are reproducible without a rand dependency
struct XorShift(u64);

impl XorShift {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn uniform(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Irwin-Hall approximation, mean 0 and variance 1/3
    fn gauss(&mut self) -> f64 {
        self.uniform() + self.uniform() + self.uniform() + self.uniform() - 2.0
    }
}

fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn empty_batch(label: &str, start: NaiveDateTime, n: usize) -> SampleBatch {
    SampleBatch {
        label: Some(label.to_string()),
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
    }
}

/// Canopy interval: stomatal scalars track w, nonstomatal scalars share an
/// independent source, CO2 uptake is tied to transpiration through `WUE`
fn make_canopy_interval(label: &str, start: NaiveDateTime, seed: u64, n: usize) -> SampleBatch {
    let mut rng = XorShift(seed);
    let mut batch = empty_batch(label, start, n);
    for _ in 0..n {
        let s1 = rng.gauss();
        let s2 = rng.gauss();
        let s3 = rng.gauss();
        let s4 = rng.gauss();
        let w = 0.5 * s1;
        let qt = 3.0e-4 * (0.8 * s1 + 0.6 * s2);
        let qe = 1.5e-4 * (0.4 * s1 + 0.9 * s3);
        let cp = WUE * qt;
        let cr = 2.0e-6 * (0.4 * s1 + 0.9 * s3);
        batch.u.push(3.0 - 0.6 * w + 0.3 * s4);
        batch.v.push(0.2 * s4);
        batch.w.push(w);
        batch.q.push(1.0e-2 + qt + qe);
        batch.c.push(7.0e-4 + cp + cr);
        batch.t.push(298.0 + 0.3 * s1 + 0.1 * s2);
        batch.p.push(1.0e5);
    }
    batch
}

fn covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / n
}

#[test]
fn test_daytime_interval_is_partitioned() {
    let batch = make_canopy_interval("day", at(12), 42, 2000);
    let processor = FvsProcessor::new(PipelineConfig::with_constant_wue(WUE)).unwrap();
    let record = processor.process_interval(&batch);

    assert!(record.is_accepted(), "rejected: {:?}", record.rejection());
    let stats = record.statistics.as_ref().unwrap();
    assert!(stats.ustar > 0.2 && stats.ustar < 0.25);

    let partition = record.partition.as_ref().unwrap();
    assert_eq!(partition.method, PartitionMethod::RootSolution);
    assert!(partition.is_valid());
    assert!(partition.adjusted);

    // Both roots are physical here; the smaller |x| wins and is flagged
    assert!(partition.ambiguous);
    let selected = partition.selected_ratio.unwrap();
    assert!((selected + 0.326).abs() < 0.01, "selected {selected}");
    assert!(matches!(
        record.warnings.as_slice(),
        [Warning::RootAmbiguity { rejected, .. }] if *rejected < selected
    ));

    let fluxes = record.fluxes.as_ref().unwrap();
    assert!(fluxes.fqt > 0.0);
    assert!(fluxes.fqe >= 0.0);
    assert!(fluxes.fcp < 0.0);
    assert!(fluxes.fcr >= 0.0);
    assert!(fluxes.le > 0.0);
    assert!(fluxes.h > 0.0);
    assert!((fluxes.fcp - WUE * fluxes.fqt).abs() < 1e-3 * fluxes.fcp.abs());

    // Closure against the corrected covariances
    assert_eq!(fluxes.fqt + fluxes.fqe, stats.cov_w_q);
    assert!((fluxes.fcp + fluxes.fcr - stats.cov_w_c).abs() <= 1e-9 * stats.cov_w_c.abs());
}

#[test]
fn test_uncorrected_interval_uses_raw_covariances() {
    let batch = make_canopy_interval("raw", at(12), 42, 2000);
    let mut config = PipelineConfig::with_constant_wue(WUE);
    config.correct_external = false;
    let record = FvsProcessor::new(config).unwrap().process_interval(&batch);

    assert!(record.is_accepted());
    assert!(record.warnings.contains(&Warning::CorrectionDisabled));
    let stats = record.statistics.as_ref().unwrap();
    let raw_fq = covariance(&batch.w, &batch.q);
    assert!((stats.cov_w_q - raw_fq).abs() <= 1e-9 * raw_fq.abs());
}

#[test]
fn test_mixed_batch_preserves_order_and_counts() {
    let day = make_canopy_interval("day", at(12), 42, 2000);
    let night = make_canopy_interval("night", at(23), 7, 2000);

    // every 100th record is a dropout, so no run reaches ad_tol
    let mut gappy = make_canopy_interval("gappy", at(13), 2024, 2000);
    for i in (0..gappy.len()).step_by(100) {
        gappy.q[i] = f64::NAN;
    }

    // u and v never move, so there is no momentum flux
    let mut calm = make_canopy_interval("calm", at(14), 99, 2000);
    calm.u.iter_mut().for_each(|u| *u = 3.0);
    calm.v.iter_mut().for_each(|v| *v = 0.0);

    let mut config = PipelineConfig::with_constant_wue(WUE);
    config.partition.sun = Some(Param::Constant(SunWindow::new(
        NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
    )));
    let processor = FvsProcessor::new(config).unwrap();
    let report = processor.process_batch(&[day, gappy, night, calm]);

    let labels: Vec<_> = report
        .records
        .iter()
        .map(|r| r.label.as_deref().unwrap())
        .collect();
    assert_eq!(labels, vec!["day", "gappy", "night", "calm"]);
    assert_eq!(report.accepted, 2);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.accepted + report.rejected, report.records.len());
    assert!(!report.run_id.is_empty());

    assert!(report.records[0].is_accepted());

    match report.records[1].rejection() {
        Some(RejectReason::InsufficientData {
            tolerance,
            good_run,
            total,
            ..
        }) => {
            assert_eq!(*tolerance, Tolerance::Absolute);
            assert_eq!(*good_run, 99);
            assert_eq!(*total, 2000);
        }
        other => panic!("expected insufficient data, got {other:?}"),
    }

    let night = &report.records[2];
    assert!(night.is_accepted());
    assert!(night.wue.is_none());
    assert!(night.warnings.contains(&Warning::NightOverride));
    let partition = night.partition.as_ref().unwrap();
    assert_eq!(partition.method, PartitionMethod::NightOverride);
    assert_eq!(partition.wqt, 0.0);
    assert_eq!(partition.wcp, 0.0);
    let stats = night.statistics.as_ref().unwrap();
    assert_eq!(partition.wqe, stats.cov_w_q);
    assert_eq!(partition.wcr, stats.cov_w_c);

    let calm = &report.records[3];
    assert!(matches!(
        calm.rejection(),
        Some(RejectReason::InsufficientTurbulence { ustar, .. }) if *ustar == 0.0
    ));
    assert!(calm.statistics.is_some());
    assert!(calm.partition.is_none());
}

#[test]
fn test_modeled_wue_reaches_the_record() {
    let batch = make_canopy_interval("modeled", at(12), 42, 2000);
    let model = WueModel::new(Param::Constant(1.0), Param::Constant(3.0), Pathway::C3);
    let config = PipelineConfig::new(WueSource::Modeled(model));
    let record = FvsProcessor::new(config).unwrap().process_interval(&batch);

    // The partition itself may or may not succeed with the modeled value
    let wue = record.wue.as_ref().expect("wue stage ran");
    assert!(wue.wue < 0.0);
    let diagnostics = wue.model.as_ref().expect("model diagnostics");
    assert!(diagnostics.inter_co2 < diagnostics.ambient_co2);
    assert!(!record.warnings.contains(&Warning::WueFromFunction));
}

#[test]
fn test_json_round_trip_through_schema() {
    let intervals: Vec<IntervalBatch> = vec![
        make_canopy_interval("day", at(12), 42, 2000).into(),
        empty_batch("empty", at(13), 0).into(),
    ];
    let input = serde_json::to_string(&intervals).unwrap();

    let parsed = BatchAdapter::parse_array(&input).unwrap();
    assert!(BatchAdapter::validate_batches(&parsed).is_empty());

    let config: PipelineConfig = serde_json::from_str(r#"{ "wue": { "prescribed": -0.01 } }"#).unwrap();
    let output = partition_json(&input, config).unwrap();
    let report: serde_json::Value = serde_json::from_str(&output).unwrap();

    assert_eq!(report["producer"], "fvs-flux");
    assert_eq!(report["accepted"], 1);
    assert_eq!(report["rejected"], 1);
    assert_eq!(report["records"][0]["label"], "day");
    assert_eq!(report["records"][0]["outcome"]["status"], "accepted");
    assert_eq!(report["records"][0]["partition"]["ambiguous"], true);
    assert_eq!(report["records"][1]["outcome"]["status"], "rejected");
    assert_eq!(
        report["records"][1]["outcome"]["reason"]["kind"],
        "insufficient_data"
    );
}

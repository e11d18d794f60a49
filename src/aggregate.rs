//! Result aggregation
//!
//! Packages each interval's stage outputs into an [`AnalysisRecord`], converts
//! partitioned covariances to physical fluxes, and encodes records and batch
//! reports as JSON.

use chrono::Utc;

use crate::constants::{
    latent_heat_vaporization, GAS_CONSTANT_DRY_AIR, GAS_CONSTANT_VAPOR, MOLAR_MASS_CO2,
    SPECIFIC_HEAT_DRY_AIR,
};
use crate::error::{ComputeError, RejectReason};
use crate::types::{
    AnalysisRecord, BatchReport, DerivedFluxes, GoodRun, IntervalStatistics, PartitionResult,
    QcOutcome, SampleBatch, Warning,
};
use crate::wue::WueEstimate;
use crate::{FVS_VERSION, PRODUCER_NAME};

/// Stage outputs collected while an interval moves through the pipeline
#[derive(Debug, Clone, Default)]
pub struct IntervalAccumulator {
    pub good_run: Option<GoodRun>,
    pub statistics: Option<IntervalStatistics>,
    pub wue: Option<WueEstimate>,
    pub partition: Option<PartitionResult>,
    pub warnings: Vec<Warning>,
}

impl IntervalAccumulator {
    pub fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }
}

/// Result aggregator
pub struct ResultAggregator;

impl ResultAggregator {
    /// Record for an interval that made it through every stage
    pub fn accepted(batch: &SampleBatch, acc: IntervalAccumulator) -> AnalysisRecord {
        let fluxes = match (&acc.statistics, &acc.partition) {
            (Some(stats), Some(partition)) => Some(Self::derive_fluxes(stats, partition)),
            _ => None,
        };
        let outcome = match acc.good_run {
            Some(good_run) => QcOutcome::Accepted { good_run },
            None => QcOutcome::Accepted {
                good_run: GoodRun {
                    start: 0,
                    len: batch.len(),
                    total: batch.len(),
                },
            },
        };

        AnalysisRecord {
            label: batch.label.clone(),
            start: batch.start,
            end: batch.end,
            outcome,
            statistics: acc.statistics,
            wue: acc.wue,
            partition: acc.partition,
            fluxes,
            warnings: acc.warnings,
        }
    }

    /// Record for an interval rejected at some stage; earlier stage outputs are kept
    pub fn rejected(
        batch: &SampleBatch,
        reason: RejectReason,
        acc: IntervalAccumulator,
    ) -> AnalysisRecord {
        AnalysisRecord {
            label: batch.label.clone(),
            start: batch.start,
            end: batch.end,
            outcome: QcOutcome::Rejected { reason },
            statistics: acc.statistics,
            wue: acc.wue,
            partition: None,
            fluxes: None,
            warnings: acc.warnings,
        }
    }

    /// Convert partitioned covariances to physical fluxes
    pub fn derive_fluxes(stats: &IntervalStatistics, partition: &PartitionResult) -> DerivedFluxes {
        let lv = latent_heat_vaporization(stats.mean_t);
        let dry_pressure = stats.mean_p - stats.mean_q * GAS_CONSTANT_VAPOR * stats.mean_t;
        let rho_air = dry_pressure / (GAS_CONSTANT_DRY_AIR * stats.mean_t) + stats.mean_q;

        let fq = partition.wqt + partition.wqe;
        let fc = partition.wcp + partition.wcr;

        DerivedFluxes {
            fq,
            fqt: partition.wqt,
            fqe: partition.wqe,
            le: lv * fq,
            let_: lv * partition.wqt,
            lee: lv * partition.wqe,
            fc,
            fcp: partition.wcp,
            fcr: partition.wcr,
            fc_mol: fc / MOLAR_MASS_CO2,
            fcp_mol: partition.wcp / MOLAR_MASS_CO2,
            fcr_mol: partition.wcr / MOLAR_MASS_CO2,
            h: rho_air * SPECIFIC_HEAT_DRY_AIR * stats.cov_w_t,
        }
    }

    /// Bundle records into a batch report
    pub fn report(run_id: String, records: Vec<AnalysisRecord>) -> BatchReport {
        let accepted = records.iter().filter(|r| r.is_accepted()).count();
        BatchReport {
            run_id,
            producer: PRODUCER_NAME.to_string(),
            version: FVS_VERSION.to_string(),
            computed_at_utc: Utc::now().to_rfc3339(),
            accepted,
            rejected: records.len() - accepted,
            records,
        }
    }

    /// Encode one record as a single JSON line
    pub fn encode_record(record: &AnalysisRecord) -> Result<String, ComputeError> {
        Ok(serde_json::to_string(record)?)
    }

    /// Encode a batch report, optionally pretty-printed
    pub fn encode_report(report: &BatchReport, pretty: bool) -> Result<String, ComputeError> {
        let json = if pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        Ok(json)
    }

    /// Encode records as newline-delimited JSON
    pub fn encode_ndjson(records: &[AnalysisRecord]) -> Result<String, ComputeError> {
        let lines = records
            .iter()
            .map(Self::encode_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }
}

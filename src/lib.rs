//! FVS Flux - Flux-variance-similarity partitioning of eddy-covariance fluxes
//!
//! Flux splits the measured water vapor and CO2 fluxes of an eddy-covariance
//! interval into stomatal (transpiration, photosynthesis) and nonstomatal
//! (evaporation, respiration) components through a deterministic pipeline:
//! sample QC → external-effect correction → turbulence statistics → water use
//! efficiency → FVS root finding → flux closure → result aggregation.
//!
//! ## Example
//!
//! ```ignore
//! use fvs_flux::{FvsProcessor, PipelineConfig};
//!
//! let processor = FvsProcessor::new(PipelineConfig::with_constant_wue(-0.004))?;
//! let report = processor.process_batch(&intervals);
//! for record in &report.records {
//!     if let Some(fluxes) = &record.fluxes {
//!         println!("{}: transpiration {} kg/m2/s", record.start, fluxes.fqt);
//!     }
//! }
//! ```

pub mod aggregate;
pub mod closure;
pub mod config;
pub mod constants;
pub mod correction;
pub mod error;
pub mod partition;
pub mod pipeline;
pub mod qc;
pub mod schema;
pub mod stats;
pub mod types;
pub mod wue;

pub use config::{Param, PartitionOptions, PipelineConfig, QcOptions, SunWindow, WueSource};
pub use error::{ComputeError, ConfigError, RejectReason};
pub use partition::{fvs_partition, PartitionError};
pub use pipeline::{partition_batches, partition_json, FvsProcessor};
pub use types::{AnalysisRecord, BatchReport, SampleBatch};
pub use wue::{water_use_efficiency, CiModel, Pathway, WueError, WueModel};

// Schema exports
pub use schema::{BatchAdapter, IntervalBatch, SCHEMA_VERSION};

/// Crate version embedded in every batch report
pub const FVS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for batch reports
pub const PRODUCER_NAME: &str = "fvs-flux";

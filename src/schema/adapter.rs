//! Adapter for converting fvs.interval_batch.v1 documents to sample batches

use crate::error::ComputeError;
use crate::schema::interval::{IntervalBatch, ValidationError};
use crate::types::SampleBatch;

/// Adapter for parsing and validating interval batches
pub struct BatchAdapter;

impl BatchAdapter {
    /// Parse a JSON string containing an array of IntervalBatches
    pub fn parse_array(json: &str) -> Result<Vec<IntervalBatch>, ComputeError> {
        let batches: Vec<IntervalBatch> = serde_json::from_str(json)?;
        Ok(batches)
    }

    /// Parse NDJSON (newline-delimited JSON) containing IntervalBatches
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<IntervalBatch>, ComputeError> {
        let mut batches = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<IntervalBatch>(trimmed) {
                Ok(batch) => batches.push(batch),
                Err(e) => {
                    return Err(ComputeError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(batches)
    }

    /// Validate a set of batches, returning only the failures
    pub fn validate_batches(batches: &[IntervalBatch]) -> Vec<ValidationResult> {
        batches
            .iter()
            .enumerate()
            .filter_map(|(idx, batch)| {
                batch.validate().err().map(|error| ValidationResult {
                    index: idx,
                    label: batch.label.clone(),
                    error,
                })
            })
            .collect()
    }

    /// Validate and convert every batch; the first invalid batch aborts
    pub fn to_sample_batches(batches: Vec<IntervalBatch>) -> Result<Vec<SampleBatch>, ComputeError> {
        batches
            .into_iter()
            .enumerate()
            .map(|(idx, batch)| {
                batch
                    .into_sample_batch()
                    .map_err(|e| ComputeError::Schema(format!("batch {}: {}", idx, e)))
            })
            .collect()
    }
}

/// Result of batch validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub label: Option<String>,
    pub error: ValidationError,
}

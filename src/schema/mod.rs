//! Unified fvs.interval_batch.v1 schema
//!
//! This module defines the JSON input schema for callers that hand intervals
//! over as documents rather than in-memory sample batches.

mod adapter;
mod interval;

pub use adapter::*;
pub use interval::*;

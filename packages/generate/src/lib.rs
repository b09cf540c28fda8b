#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Offline builder for precomputed heatmap aggregates.
//!
//! Streams a raw point CSV through the spatial binner and writes the
//! scored per-cell table that the server can load instead of binning at
//! startup.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use heatmap_aggregate::binner::{BinningStats, DEFAULT_CHUNK_SIZE, PointColumns, SpatialBinner};
use heatmap_aggregate::precomputed::write_precomputed;
use heatmap_aggregate::progress::ProgressCallback;
use heatmap_aggregate::{AggregateError, BoundingBox};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Inputs for one aggregate build.
#[derive(Debug, Clone)]
pub struct AggregateJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub resolutions: Vec<u8>,
    /// k-anonymity threshold recorded in the `suppressed` column.
    pub k: u64,
    pub chunk_size: usize,
    pub bbox: Option<BoundingBox>,
    pub columns: PointColumns,
}

impl AggregateJob {
    #[must_use]
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            resolutions: vec![7, 8, 9],
            k: 20,
            chunk_size: DEFAULT_CHUNK_SIZE,
            bbox: None,
            columns: PointColumns::default(),
        }
    }
}

/// What a finished build produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSummary {
    pub stats: BinningStats,
    pub rows_written: u64,
}

/// Bins `job.input` and writes the precomputed table to `job.output`.
///
/// The output file is only created once binning has succeeded.
///
/// # Errors
///
/// * [`GenerateError::Open`] / [`GenerateError::Create`] on file access
///   failures
/// * [`GenerateError::Aggregate`] if the input is malformed or yields no
///   points
pub fn build_aggregates(
    job: &AggregateJob,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<AggregateSummary, GenerateError> {
    let input = File::open(&job.input).map_err(|source| GenerateError::Open {
        path: job.input.clone(),
        source,
    })?;

    let mut binner = SpatialBinner::new(&job.resolutions)?
        .with_bbox(job.bbox)
        .with_columns(job.columns.clone())
        .with_chunk_size(job.chunk_size);
    binner.ingest_csv(BufReader::new(input), progress)?;
    let stats = binner.stats();
    let tables = binner.finish()?;

    let output = File::create(&job.output).map_err(|source| GenerateError::Create {
        path: job.output.clone(),
        source,
    })?;
    let rows_written = write_precomputed(BufWriter::new(output), &tables, job.k)?;

    progress.finish(format!(
        "Wrote {rows_written} cells to {}",
        job.output.display()
    ));

    Ok(AggregateSummary {
        stats,
        rows_written,
    })
}

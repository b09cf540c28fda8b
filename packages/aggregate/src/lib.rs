#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial aggregation pipeline for the mobility heatmap.
//!
//! Raw point CSVs are streamed in bounded chunks through the
//! [`binner::SpatialBinner`], which accumulates per-cell point counts and
//! distinct entity ids at every configured H3 resolution. Finished tables
//! are scored by [`scoring::build_table`] and published as one immutable
//! [`store::AggregateSnapshot`] by the [`store::AggregateStore`].
//!
//! A precomputed aggregate CSV can stand in for the raw stream; see
//! [`precomputed`].

pub mod binner;
pub mod precomputed;
pub mod progress;
pub mod scoring;
pub mod source;
pub mod store;

pub use heatmap_aggregate_models::{
    BoundingBox, CellAggregate, ResolutionTable, ResolutionTotals,
};
pub use source::AggregateSource;
pub use store::{AggregateSnapshot, AggregateStore};

use thiserror::Error;

/// Errors from aggregation, loading and store lookups.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Input is missing required columns.
    #[error("Missing required columns: {}", missing.join(", "))]
    Schema {
        /// Names of the absent columns.
        missing: Vec<String>,
    },

    /// The requested resolution has never been loaded.
    #[error("Resolution {resolution} not loaded")]
    NotFound {
        /// Resolution that was requested.
        resolution: u8,
    },

    /// Nothing left to publish after filtering.
    #[error("No data available: {message}")]
    DataUnavailable {
        /// Description of what came up empty.
        message: String,
    },

    /// CSV read/write failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Grid operation failure (e.g. an unsupported resolution).
    #[error("Grid error: {0}")]
    Grid(#[from] heatmap_grid::GridError),
}

/// Returns the names in `required` that are not present in `headers`.
pub(crate) fn missing_columns(headers: &csv::StringRecord, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !headers.iter().any(|h| h == **name))
        .map(|name| (*name).to_string())
        .collect()
}

/// Position of the first header matching any of `aliases`.
pub(crate) fn column_index(headers: &csv::StringRecord, aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == *alias))
}

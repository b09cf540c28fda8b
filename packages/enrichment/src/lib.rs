#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Optional enrichment for the forecast: which cells are transit hubs and
//! which lie on heavy origin-destination corridors.
//!
//! Enrichment never fails a forecast. Sources hand out possibly-empty sets
//! and deal with their own load errors.

pub mod artifacts;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use artifacts::ArtifactEnrichment;
use heatmap_grid::CellIndex;
use thiserror::Error;

/// A shared set of cells.
pub type CellSet = Arc<HashSet<CellIndex>>;

/// Errors raised while reading enrichment artifacts.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{file} is missing column '{column}'")]
    MissingColumn { file: String, column: String },

    #[error("Grid error: {0}")]
    Grid(#[from] heatmap_grid::GridError),
}

/// Hub and corridor sets for one resolution.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentSets {
    pub hubs: CellSet,
    pub corridors: CellSet,
}

impl EnrichmentSets {
    #[must_use]
    pub fn is_hub(&self, cell: &CellIndex) -> bool {
        self.hubs.contains(cell)
    }

    #[must_use]
    pub fn is_corridor(&self, cell: &CellIndex) -> bool {
        self.corridors.contains(cell)
    }
}

/// Supplies hub and corridor cells per resolution.
pub trait EnrichmentSource: Send + Sync {
    /// Cells containing a high-activity stop cluster.
    fn hub_cells(&self, resolution: u8) -> CellSet;

    /// Cells at either end of a top origin-destination pair.
    fn corridor_cells(&self, resolution: u8) -> CellSet;

    /// Both sets at once.
    fn sets(&self, resolution: u8) -> EnrichmentSets {
        EnrichmentSets {
            hubs: self.hub_cells(resolution),
            corridors: self.corridor_cells(resolution),
        }
    }
}

/// Fixed enrichment sets, set up in code.
///
/// With nothing registered every lookup yields an empty set, which is what
/// the server uses when no artifacts directory is configured.
#[derive(Debug, Clone, Default)]
pub struct StaticEnrichment {
    hubs: HashMap<u8, CellSet>,
    corridors: HashMap<u8, CellSet>,
}

impl StaticEnrichment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_hubs(mut self, resolution: u8, cells: impl IntoIterator<Item = CellIndex>) -> Self {
        self.hubs
            .insert(resolution, Arc::new(cells.into_iter().collect()));
        self
    }

    #[must_use]
    pub fn with_corridors(
        mut self,
        resolution: u8,
        cells: impl IntoIterator<Item = CellIndex>,
    ) -> Self {
        self.corridors
            .insert(resolution, Arc::new(cells.into_iter().collect()));
        self
    }
}

impl EnrichmentSource for StaticEnrichment {
    fn hub_cells(&self, resolution: u8) -> CellSet {
        self.hubs.get(&resolution).cloned().unwrap_or_default()
    }

    fn corridor_cells(&self, resolution: u8) -> CellSet {
        self.corridors.get(&resolution).cloned().unwrap_or_default()
    }
}

//! Ingestion paths that produce a full set of resolution tables.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use heatmap_aggregate_models::{BoundingBox, ResolutionTable};

use crate::AggregateError;
use crate::binner::{PointColumns, SpatialBinner};
use crate::precomputed::load_precomputed;
use crate::progress::ProgressCallback;

/// Where aggregate tables come from.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateSource {
    /// Stream and bin a raw point CSV.
    RawCsv {
        /// Raw CSV path.
        path: PathBuf,
        /// Resolutions to bin at.
        resolutions: Vec<u8>,
        /// Optional spatial filter applied before binning.
        bbox: Option<BoundingBox>,
        /// Rows per chunk.
        chunk_size: usize,
        /// Required column names.
        columns: PointColumns,
    },
    /// Load an already aggregated CSV.
    Precomputed {
        /// Precomputed CSV path.
        path: PathBuf,
    },
}

impl AggregateSource {
    /// Path of the backing file.
    #[must_use]
    pub const fn path(&self) -> &PathBuf {
        match self {
            Self::RawCsv { path, .. } | Self::Precomputed { path } => path,
        }
    }

    /// Builds every table this source provides.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::DataUnavailable`] if the file does not
    /// exist, and propagates schema, CSV and grid errors from the loaders.
    pub fn load(
        &self,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<BTreeMap<u8, ResolutionTable>, AggregateError> {
        let path = self.path();
        if !path.exists() {
            return Err(AggregateError::DataUnavailable {
                message: format!("{} does not exist", path.display()),
            });
        }
        let reader = BufReader::new(File::open(path)?);

        match self {
            Self::RawCsv {
                resolutions,
                bbox,
                chunk_size,
                columns,
                ..
            } => {
                log::info!(
                    "Binning {} at resolutions {resolutions:?}",
                    path.display()
                );
                let mut binner = SpatialBinner::new(resolutions)?
                    .with_bbox(*bbox)
                    .with_columns(columns.clone())
                    .with_chunk_size(*chunk_size);
                binner.ingest_csv(reader, progress)?;
                binner.finish()
            }
            Self::Precomputed { .. } => {
                log::info!("Loading precomputed aggregates from {}", path.display());
                let tables = load_precomputed(reader)?;
                if tables.is_empty() {
                    return Err(AggregateError::DataUnavailable {
                        message: format!("{} contains no valid rows", path.display()),
                    });
                }
                Ok(tables)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::null_progress;

    fn temp_file(contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("heatmap_source_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("input.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_is_data_unavailable() {
        let source = AggregateSource::Precomputed {
            path: PathBuf::from("/nonexistent/heatmap/aggregates.csv"),
        };
        assert!(matches!(
            source.load(&null_progress()),
            Err(AggregateError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn raw_source_bins_requested_resolutions() {
        let path = temp_file("randomized_id,lat,lng\na,51.169,71.449\nb,51.17,71.45\n");
        let source = AggregateSource::RawCsv {
            path: path.clone(),
            resolutions: vec![7, 9],
            bbox: None,
            chunk_size: 1,
            columns: PointColumns::default(),
        };
        let tables = source.load(&null_progress()).unwrap();
        assert_eq!(tables.keys().copied().collect::<Vec<_>>(), vec![7, 9]);
        assert_eq!(tables[&7].totals().total_points, 2);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn header_only_precomputed_is_data_unavailable() {
        let path = temp_file("h3,res,point_count,unique_trips\n");
        let source = AggregateSource::Precomputed { path: path.clone() };
        assert!(matches!(
            source.load(&null_progress()),
            Err(AggregateError::DataUnavailable { .. })
        ));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}

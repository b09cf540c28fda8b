//! Streaming H3 binner.
//!
//! Reads a raw point CSV in fixed-size chunks so peak memory is bounded by
//! the chunk plus the per-cell accumulators, never by the input size. Each
//! chunk is binned at every configured resolution before the next one is
//! read.
//!
//! Per-cell uniqueness is tracked with an exact hash set of entity ids.
//! Memory for those sets grows with the number of distinct ids per cell.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::sync::Arc;

use heatmap_aggregate_models::{BoundingBox, ResolutionTable};
use heatmap_grid::{CellIndex, Resolution};

use crate::progress::ProgressCallback;
use crate::scoring::{CellCounts, build_table};
use crate::{AggregateError, missing_columns};

/// Default number of rows held in memory per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 200_000;

/// Names of the required columns in a raw point CSV.
///
/// Any other columns (altitude, speed, azimuth, timestamps) are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointColumns {
    /// Entity/trip identifier column.
    pub id: String,
    /// Latitude column (degrees).
    pub lat: String,
    /// Longitude column (degrees).
    pub lng: String,
}

impl Default for PointColumns {
    fn default() -> Self {
        Self {
            id: "randomized_id".to_string(),
            lat: "lat".to_string(),
            lng: "lng".to_string(),
        }
    }
}

/// A parsed raw point.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoint {
    /// Entity/trip identifier.
    pub id: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

/// Counters describing one binning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinningStats {
    /// Rows read from the input.
    pub rows_read: u64,
    /// Rows dropped for a missing or unparseable id/lat/lng.
    pub rows_dropped: u64,
    /// Rows outside the bounding box.
    pub rows_filtered: u64,
    /// Rows binned into cells.
    pub points_binned: u64,
}

#[derive(Debug, Default)]
struct CellAccumulator {
    points: u64,
    ids: HashSet<String>,
}

/// Accumulates per-cell point counts and distinct ids at several
/// resolutions.
pub struct SpatialBinner {
    resolutions: Vec<(u8, Resolution)>,
    bbox: Option<BoundingBox>,
    columns: PointColumns,
    chunk_size: usize,
    accum: BTreeMap<u8, HashMap<CellIndex, CellAccumulator>>,
    stats: BinningStats,
}

impl SpatialBinner {
    /// Creates a binner for the given H3 resolutions.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::Grid`] if any resolution is outside 0-15.
    pub fn new(resolutions: &[u8]) -> Result<Self, AggregateError> {
        let resolutions = resolutions
            .iter()
            .map(|&r| heatmap_grid::resolution(r).map(|res| (r, res)))
            .collect::<Result<Vec<_>, _>>()?;

        let accum = resolutions.iter().map(|(r, _)| (*r, HashMap::new())).collect();

        Ok(Self {
            resolutions,
            bbox: None,
            columns: PointColumns::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            accum,
            stats: BinningStats::default(),
        })
    }

    /// Drops points outside `bbox` before binning.
    #[must_use]
    pub const fn with_bbox(mut self, bbox: Option<BoundingBox>) -> Self {
        self.bbox = bbox;
        self
    }

    /// Overrides the required column names.
    #[must_use]
    pub fn with_columns(mut self, columns: PointColumns) -> Self {
        self.columns = columns;
        self
    }

    /// Sets the number of rows read per chunk (minimum 1).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Counters accumulated so far.
    #[must_use]
    pub const fn stats(&self) -> BinningStats {
        self.stats
    }

    /// Streams a raw point CSV into the accumulators.
    ///
    /// Returns the number of rows read.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::Schema`] if the header lacks any required
    /// column, or [`AggregateError::Csv`] on a malformed record.
    pub fn ingest_csv<R: Read>(
        &mut self,
        reader: R,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<u64, AggregateError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();

        let missing = missing_columns(
            &headers,
            &[
                self.columns.id.as_str(),
                self.columns.lat.as_str(),
                self.columns.lng.as_str(),
            ],
        );
        if !missing.is_empty() {
            return Err(AggregateError::Schema { missing });
        }

        let position = |name: &str| headers.iter().position(|h| h == name).unwrap_or(0);
        let id_idx = position(&self.columns.id);
        let lat_idx = position(&self.columns.lat);
        let lng_idx = position(&self.columns.lng);

        let mut chunk: Vec<RawPoint> = Vec::with_capacity(self.chunk_size);
        let mut rows_read: u64 = 0;
        let mut chunks: u64 = 0;
        let mut record = csv::StringRecord::new();

        while rdr.read_record(&mut record)? {
            rows_read += 1;
            self.stats.rows_read += 1;

            if let Some(point) = parse_point(&record, id_idx, lat_idx, lng_idx) {
                chunk.push(point);
            } else {
                self.stats.rows_dropped += 1;
            }

            if chunk.len() >= self.chunk_size {
                chunks += 1;
                self.bin_chunk(&chunk);
                progress.inc(chunk.len() as u64);
                progress.set_message(format!("Binned chunk {chunks}"));
                log::debug!("Binned chunk {chunks} ({rows_read} rows read so far)");
                chunk.clear();
            }
        }

        if !chunk.is_empty() {
            chunks += 1;
            self.bin_chunk(&chunk);
            progress.inc(chunk.len() as u64);
            progress.set_message(format!("Binned chunk {chunks}"));
        }

        log::info!(
            "Read {rows_read} rows: {} binned, {} dropped, {} outside bbox",
            self.stats.points_binned,
            self.stats.rows_dropped,
            self.stats.rows_filtered
        );

        Ok(rows_read)
    }

    /// Bins a single point at every resolution.
    ///
    /// Points outside the bounding box or with coordinates the grid
    /// rejects are skipped.
    pub fn push(&mut self, point: &RawPoint) {
        if let Some(bbox) = &self.bbox
            && !bbox.contains(point.lat, point.lng)
        {
            self.stats.rows_filtered += 1;
            return;
        }

        let mut binned = false;
        for (r, res) in &self.resolutions {
            let Ok(cell) = heatmap_grid::cell_for_point(point.lat, point.lng, *res) else {
                continue;
            };
            let Some(cells) = self.accum.get_mut(r) else {
                continue;
            };
            let bucket = cells.entry(cell).or_default();
            bucket.points += 1;
            if !bucket.ids.contains(&point.id) {
                bucket.ids.insert(point.id.clone());
            }
            binned = true;
        }

        if binned {
            self.stats.points_binned += 1;
        } else {
            self.stats.rows_dropped += 1;
        }
    }

    fn bin_chunk(&mut self, chunk: &[RawPoint]) {
        for point in chunk {
            self.push(point);
        }
    }

    /// Scores the accumulated cells and returns one table per resolution.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::DataUnavailable`] if no resolution received
    /// any points.
    pub fn finish(self) -> Result<BTreeMap<u8, ResolutionTable>, AggregateError> {
        if self.accum.values().all(HashMap::is_empty) {
            return Err(AggregateError::DataUnavailable {
                message: "no points were binned; check the input file and bounding box"
                    .to_string(),
            });
        }

        Ok(self
            .accum
            .into_iter()
            .map(|(r, cells)| {
                let counts = cells
                    .into_iter()
                    .map(|(cell, acc)| CellCounts {
                        cell,
                        point_count: acc.points,
                        unique_trip_count: acc.ids.len() as u64,
                        center: None,
                    })
                    .collect();
                let table = build_table(r, counts);
                log::info!(
                    "Resolution {r}: {} cells, {} points",
                    table.len(),
                    table.totals().total_points
                );
                (r, table)
            })
            .collect())
    }
}

/// Extracts id/lat/lng from a record; `None` if any is missing or invalid.
fn parse_point(
    record: &csv::StringRecord,
    id_idx: usize,
    lat_idx: usize,
    lng_idx: usize,
) -> Option<RawPoint> {
    let id = record.get(id_idx).map(str::trim).filter(|s| !s.is_empty())?;
    let lat = parse_coord(record.get(lat_idx))?;
    let lng = parse_coord(record.get(lng_idx))?;
    Some(RawPoint {
        id: id.to_string(),
        lat,
        lng,
    })
}

fn parse_coord(field: Option<&str>) -> Option<f64> {
    field?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::null_progress;

    const CSV: &str = "\
randomized_id,lat,lng,alt,spd,azm
u1,51.1690,71.4490,340.1,30.2,120.0
u1,51.1691,71.4491,340.1,31.0,121.0
u2,51.1690,71.4490,341.0,12.0,90.0
u3,51.2200,71.5500,330.0,0.0,0.0
,51.1690,71.4490,340.0,0.0,0.0
u4,,71.4490,340.0,0.0,0.0
u5,abc,71.4490,340.0,0.0,0.0
";

    fn bin(csv: &str, chunk_size: usize) -> (BTreeMap<u8, ResolutionTable>, BinningStats) {
        let mut binner = SpatialBinner::new(&[7, 8, 9])
            .unwrap()
            .with_chunk_size(chunk_size);
        binner.ingest_csv(csv.as_bytes(), &null_progress()).unwrap();
        let stats = binner.stats();
        (binner.finish().unwrap(), stats)
    }

    #[test]
    fn drops_rows_missing_required_fields() {
        let (_, stats) = bin(CSV, 1000);
        assert_eq!(stats.rows_read, 7);
        assert_eq!(stats.rows_dropped, 3);
        assert_eq!(stats.points_binned, 4);
    }

    #[test]
    fn totals_match_sum_of_cells_at_every_resolution() {
        let (tables, _) = bin(CSV, 2);
        assert_eq!(tables.keys().copied().collect::<Vec<_>>(), vec![7, 8, 9]);
        for table in tables.values() {
            let sum: u64 = table.iter().map(|c| c.point_count).sum();
            assert_eq!(sum, table.totals().total_points);
            assert_eq!(sum, 4);
            for cell in table.iter() {
                assert!(cell.unique_trip_count <= cell.point_count);
            }
        }
    }

    #[test]
    fn counts_distinct_ids_per_cell() {
        let (tables, _) = bin(CSV, 1000);
        let res = heatmap_grid::resolution(7).unwrap();
        let cell = heatmap_grid::cell_for_point(51.1690, 71.4490, res).unwrap();
        let agg = tables[&7].get(&cell).unwrap();
        assert_eq!(agg.point_count, 3);
        assert_eq!(agg.unique_trip_count, 2);
    }

    #[derive(Default)]
    struct RecordingProgress {
        rows: std::sync::Mutex<u64>,
        messages: std::sync::Mutex<Vec<String>>,
    }

    impl ProgressCallback for RecordingProgress {
        fn inc(&self, delta: u64) {
            *self.rows.lock().unwrap() += delta;
        }
        fn set_message(&self, msg: String) {
            self.messages.lock().unwrap().push(msg);
        }
        fn finish(&self, _msg: String) {}
    }

    #[test]
    fn reports_progress_per_chunk() {
        let recorder = Arc::new(RecordingProgress::default());
        let progress: Arc<dyn ProgressCallback> = recorder.clone();
        let mut binner = SpatialBinner::new(&[8]).unwrap().with_chunk_size(2);
        binner.ingest_csv(CSV.as_bytes(), &progress).unwrap();

        assert_eq!(*recorder.rows.lock().unwrap(), 4);
        assert_eq!(
            *recorder.messages.lock().unwrap(),
            vec!["Binned chunk 1".to_string(), "Binned chunk 2".to_string()]
        );
    }

    #[test]
    fn chunk_size_does_not_change_result() {
        let (small, _) = bin(CSV, 1);
        let (large, _) = bin(CSV, 10_000);
        assert_eq!(small, large);
    }

    #[test]
    fn bbox_filters_before_binning() {
        let bbox: BoundingBox = "51.15,71.40,51.18,71.46".parse().unwrap();
        let mut binner = SpatialBinner::new(&[8]).unwrap().with_bbox(Some(bbox));
        binner.ingest_csv(CSV.as_bytes(), &null_progress()).unwrap();
        assert_eq!(binner.stats().rows_filtered, 1);
        let tables = binner.finish().unwrap();
        assert_eq!(tables[&8].totals().total_points, 3);
    }

    #[test]
    fn missing_columns_is_schema_error() {
        let mut binner = SpatialBinner::new(&[8]).unwrap();
        let err = binner
            .ingest_csv("id,latitude,lng\nu1,51.1,71.4\n".as_bytes(), &null_progress())
            .unwrap_err();
        match err {
            AggregateError::Schema { missing } => {
                assert_eq!(missing, vec!["randomized_id".to_string(), "lat".to_string()]);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn custom_columns_are_honored() {
        let columns = PointColumns {
            id: "trip".to_string(),
            lat: "latitude".to_string(),
            lng: "longitude".to_string(),
        };
        let mut binner = SpatialBinner::new(&[8]).unwrap().with_columns(columns);
        binner
            .ingest_csv(
                "trip,latitude,longitude\nt1,51.1,71.4\n".as_bytes(),
                &null_progress(),
            )
            .unwrap();
        assert_eq!(binner.finish().unwrap()[&8].totals().total_points, 1);
    }

    #[test]
    fn empty_input_is_data_unavailable() {
        let mut binner = SpatialBinner::new(&[8]).unwrap();
        binner
            .ingest_csv("randomized_id,lat,lng\n".as_bytes(), &null_progress())
            .unwrap();
        assert!(matches!(
            binner.finish(),
            Err(AggregateError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn rejects_invalid_resolution() {
        assert!(matches!(
            SpatialBinner::new(&[8, 16]),
            Err(AggregateError::Grid(_))
        ));
    }
}

//! Enrichment read from an artifacts directory.
//!
//! Two optional files are consulted:
//!
//! - `stop_clusters.csv`: one row per stop cluster with `cluster_id`, a
//!   centroid and an activity weight. The 50 heaviest clusters become hubs.
//! - `od_top.csv`: origin-destination cluster pairs with `trip_count`. Of
//!   the first 200 rows, the 100 busiest pairs mark both endpoint cells as
//!   corridor cells.
//!
//! Each set is computed at most once per resolution. A load failure is
//! logged and remembered as an empty set.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use heatmap_grid::CellIndex;

use crate::{CellSet, EnrichmentError, EnrichmentSource};

pub const STOP_CLUSTERS_FILE: &str = "stop_clusters.csv";
pub const OD_TOP_FILE: &str = "od_top.csv";

/// Hubs kept after ranking clusters by weight.
pub const MAX_HUBS: usize = 50;
/// Rows of `od_top.csv` considered at all.
pub const OD_ROWS_SCANNED: usize = 200;
/// Pairs kept after ranking the scanned rows by trip count.
pub const MAX_CORRIDOR_PAIRS: usize = 100;

const LAT_ALIASES: &[&str] = &["lat_mean", "lat_center", "lat"];
const LNG_ALIASES: &[&str] = &["lng_mean", "lng_center", "lng"];
const WEIGHT_ALIASES: &[&str] = &["count", "trip_count", "trips"];

#[derive(Debug, Clone, Copy, PartialEq)]
struct StopCluster {
    id: i64,
    lat: f64,
    lng: f64,
    weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OdPair {
    start: i64,
    end: i64,
    trip_count: f64,
}

/// Lazily loaded hub and corridor sets backed by CSV artifacts.
#[derive(Debug)]
pub struct ArtifactEnrichment {
    dir: PathBuf,
    hubs: Mutex<HashMap<u8, CellSet>>,
    corridors: Mutex<HashMap<u8, CellSet>>,
}

impl ArtifactEnrichment {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            hubs: Mutex::new(HashMap::new()),
            corridors: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Computes the hub set for `resolution` without caching.
    ///
    /// # Errors
    ///
    /// Fails if `stop_clusters.csv` cannot be read, lacks a centroid or
    /// weight column, or `resolution` is invalid.
    pub fn load_hubs(&self, resolution: u8) -> Result<HashSet<CellIndex>, EnrichmentError> {
        let res = heatmap_grid::resolution(resolution)?;
        let mut clusters = read_stop_clusters(&self.dir.join(STOP_CLUSTERS_FILE))?;

        if clusters.iter().all(|c| c.weight.is_none()) && !clusters.is_empty() {
            return Err(EnrichmentError::MissingColumn {
                file: STOP_CLUSTERS_FILE.to_string(),
                column: WEIGHT_ALIASES[0].to_string(),
            });
        }

        clusters.sort_by(|a, b| {
            b.weight
                .unwrap_or(0.0)
                .total_cmp(&a.weight.unwrap_or(0.0))
        });

        Ok(clusters
            .iter()
            .take(MAX_HUBS)
            .filter_map(|c| heatmap_grid::cell_for_point(c.lat, c.lng, res).ok())
            .collect())
    }

    /// Computes the corridor set for `resolution` without caching.
    ///
    /// # Errors
    ///
    /// Fails if either artifact cannot be read or lacks required columns,
    /// or `resolution` is invalid.
    pub fn load_corridors(&self, resolution: u8) -> Result<HashSet<CellIndex>, EnrichmentError> {
        let res = heatmap_grid::resolution(resolution)?;
        let mut pairs = read_od_pairs(&self.dir.join(OD_TOP_FILE))?;
        pairs.sort_by(|a, b| b.trip_count.total_cmp(&a.trip_count));
        pairs.truncate(MAX_CORRIDOR_PAIRS);

        let centroids: HashMap<i64, (f64, f64)> =
            read_stop_clusters(&self.dir.join(STOP_CLUSTERS_FILE))?
                .into_iter()
                .map(|c| (c.id, (c.lat, c.lng)))
                .collect();

        Ok(pairs
            .iter()
            .flat_map(|p| [p.start, p.end])
            .filter_map(|id| centroids.get(&id))
            .filter_map(|&(lat, lng)| heatmap_grid::cell_for_point(lat, lng, res).ok())
            .collect())
    }

    fn cached(
        &self,
        cache: &Mutex<HashMap<u8, CellSet>>,
        resolution: u8,
        kind: &str,
        load: impl FnOnce() -> Result<HashSet<CellIndex>, EnrichmentError>,
    ) -> CellSet {
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = cache.get(&resolution) {
            return Arc::clone(set);
        }

        let set = match load() {
            Ok(set) => {
                log::debug!("Loaded {} {kind} cells at resolution {resolution}", set.len());
                Arc::new(set)
            }
            Err(e) => {
                log::warn!(
                    "No {kind} enrichment at resolution {resolution} from {}: {e}",
                    self.dir.display()
                );
                CellSet::default()
            }
        };
        cache.insert(resolution, Arc::clone(&set));
        set
    }
}

impl EnrichmentSource for ArtifactEnrichment {
    fn hub_cells(&self, resolution: u8) -> CellSet {
        self.cached(&self.hubs, resolution, "hub", || self.load_hubs(resolution))
    }

    fn corridor_cells(&self, resolution: u8) -> CellSet {
        self.cached(&self.corridors, resolution, "corridor", || {
            self.load_corridors(resolution)
        })
    }
}

fn open_csv(path: &Path) -> Result<csv::Reader<BufReader<File>>, EnrichmentError> {
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(BufReader::new(file)))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn require(
    headers: &csv::StringRecord,
    aliases: &[&str],
    path: &Path,
) -> Result<usize, EnrichmentError> {
    column(headers, aliases).ok_or_else(|| EnrichmentError::MissingColumn {
        file: file_name(path),
        column: aliases[0].to_string(),
    })
}

fn column(headers: &csv::StringRecord, aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h.trim() == *alias))
}

fn parse_f64(record: &csv::StringRecord, idx: usize) -> Option<f64> {
    record
        .get(idx)?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Cluster ids may be written as floats (`"12.0"`).
#[allow(clippy::cast_possible_truncation)]
fn parse_id(record: &csv::StringRecord, idx: usize) -> Option<i64> {
    let raw = record.get(idx)?.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

fn read_stop_clusters(path: &Path) -> Result<Vec<StopCluster>, EnrichmentError> {
    let mut rdr = open_csv(path)?;
    let headers = rdr.headers()?.clone();
    let id_idx = require(&headers, &["cluster_id"], path)?;
    let lat_idx = require(&headers, LAT_ALIASES, path)?;
    let lng_idx = require(&headers, LNG_ALIASES, path)?;
    let weight_idx = column(&headers, WEIGHT_ALIASES);

    let mut clusters = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let (Some(id), Some(lat), Some(lng)) = (
            parse_id(&record, id_idx),
            parse_f64(&record, lat_idx),
            parse_f64(&record, lng_idx),
        ) else {
            continue;
        };
        clusters.push(StopCluster {
            id,
            lat,
            lng,
            weight: weight_idx.and_then(|idx| parse_f64(&record, idx)),
        });
    }
    Ok(clusters)
}

fn read_od_pairs(path: &Path) -> Result<Vec<OdPair>, EnrichmentError> {
    let mut rdr = open_csv(path)?;
    let headers = rdr.headers()?.clone();
    let start_idx = require(&headers, &["start_cluster"], path)?;
    let end_idx = require(&headers, &["end_cluster"], path)?;
    let count_idx = require(&headers, &["trip_count"], path)?;

    let mut pairs = Vec::new();
    for record in rdr.records().take(OD_ROWS_SCANNED) {
        let record = record?;
        let (Some(start), Some(end), Some(trip_count)) = (
            parse_id(&record, start_idx),
            parse_id(&record, end_idx),
            parse_f64(&record, count_idx),
        ) else {
            continue;
        };
        pairs.push(OdPair {
            start,
            end,
            trip_count,
        });
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;

    use super::*;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("heatmap_enrichment_{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn write(&self, name: &str, contents: &str) {
            std::fs::write(self.0.join(name), contents).unwrap();
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.0).ok();
        }
    }

    fn cell(lat: f64, lng: f64, res: u8) -> CellIndex {
        heatmap_grid::cell_for_point(lat, lng, heatmap_grid::resolution(res).unwrap()).unwrap()
    }

    #[test]
    fn missing_directory_yields_empty_sets() {
        let source = ArtifactEnrichment::new("/nonexistent/heatmap/artifacts");
        assert!(source.hub_cells(8).is_empty());
        assert!(source.corridor_cells(8).is_empty());
        assert!(source.load_hubs(8).is_err());
    }

    #[test]
    fn hubs_take_heaviest_clusters() {
        let dir = TempDir::new();
        let mut csv = String::from("cluster_id,lat_mean,lng_mean,count\n");
        // 60 clusters spread north; weight grows with index
        for i in 0..60 {
            let lat = 0.01f64.mul_add(f64::from(i), 51.0);
            writeln!(csv, "{i},{lat},71.4,{i}").unwrap();
        }
        dir.write(STOP_CLUSTERS_FILE, &csv);

        let source = ArtifactEnrichment::new(&dir.0);
        let hubs = source.hub_cells(9);
        assert_eq!(hubs.len(), MAX_HUBS);
        assert!(hubs.contains(&cell(0.01f64.mul_add(59.0, 51.0), 71.4, 9)));
        assert!(!hubs.contains(&cell(51.0, 71.4, 9)));
    }

    #[test]
    fn hubs_accept_alternate_column_names() {
        let dir = TempDir::new();
        dir.write(
            STOP_CLUSTERS_FILE,
            "cluster_id,lat_center,lng_center,trip_count\n1,51.169,71.449,10\n",
        );
        let hubs = ArtifactEnrichment::new(&dir.0).hub_cells(8);
        assert!(hubs.contains(&cell(51.169, 71.449, 8)));
    }

    #[test]
    fn corridors_resolve_endpoints_through_clusters() {
        let dir = TempDir::new();
        dir.write(
            STOP_CLUSTERS_FILE,
            "cluster_id,lat_mean,lng_mean,count\n1,51.10,71.40,5\n2,51.20,71.50,5\n3,51.30,71.60,5\n",
        );
        // pair (2, 99): cluster 99 is unknown and is ignored
        dir.write(
            OD_TOP_FILE,
            "start_cluster,end_cluster,trip_count,geometry\n1,3,40,x\n2,99,10,x\n",
        );
        let corridors = ArtifactEnrichment::new(&dir.0).corridor_cells(8);
        assert_eq!(corridors.len(), 3);
        assert!(corridors.contains(&cell(51.10, 71.40, 8)));
        assert!(corridors.contains(&cell(51.20, 71.50, 8)));
        assert!(corridors.contains(&cell(51.30, 71.60, 8)));
    }

    #[test]
    fn corridors_only_scan_leading_rows() {
        let dir = TempDir::new();
        dir.write(
            STOP_CLUSTERS_FILE,
            "cluster_id,lat_mean,lng_mean,count\n1,51.10,71.40,5\n2,51.20,71.50,5\n",
        );
        let mut od = String::from("start_cluster,end_cluster,trip_count\n");
        for _ in 0..OD_ROWS_SCANNED {
            od.push_str("1,1,5\n");
        }
        od.push_str("2,2,1000\n");
        dir.write(OD_TOP_FILE, &od);

        let corridors = ArtifactEnrichment::new(&dir.0).corridor_cells(8);
        assert!(corridors.contains(&cell(51.10, 71.40, 8)));
        assert!(!corridors.contains(&cell(51.20, 71.50, 8)));
    }

    #[test]
    fn corrupt_artifacts_are_cached_as_empty() {
        let dir = TempDir::new();
        dir.write(STOP_CLUSTERS_FILE, "foo,bar\n1,2\n");
        let source = ArtifactEnrichment::new(&dir.0);
        assert!(source.hub_cells(8).is_empty());

        // fixing the file later does not change the remembered result
        dir.write(
            STOP_CLUSTERS_FILE,
            "cluster_id,lat_mean,lng_mean,count\n1,51.169,71.449,10\n",
        );
        assert!(source.hub_cells(8).is_empty());
        assert_eq!(source.hub_cells(9).len(), 1);
    }
}

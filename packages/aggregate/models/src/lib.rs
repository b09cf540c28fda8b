#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Aggregate types shared by the binner, the aggregate store, the forecast
//! engine and the HTTP layer.
//!
//! A [`ResolutionTable`] is built in one pass and never patched afterwards;
//! reloading produces new tables.

use std::collections::BTreeMap;
use std::str::FromStr;

use heatmap_grid::CellIndex;
use serde::{Serialize, Serializer};

/// Geographic bounding box used to pre-filter raw points.
///
/// Bounds are inclusive on every side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Whether the point lies inside the box (edges included).
    #[must_use]
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        (self.south..=self.north).contains(&lat) && (self.west..=self.east).contains(&lng)
    }
}

impl FromStr for BoundingBox {
    type Err = InvalidBoundingBoxError;

    /// Parses `"minLat,minLng,maxLat,maxLng"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(InvalidBoundingBoxError {
                input: s.to_string(),
                reason: "expected four comma-separated numbers",
            });
        }

        let mut values = [0.0_f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| InvalidBoundingBoxError {
                    input: s.to_string(),
                    reason: "values must be finite numbers",
                })?;
        }

        let [min_lat, min_lng, max_lat, max_lng] = values;
        if min_lat > max_lat || min_lng > max_lng {
            return Err(InvalidBoundingBoxError {
                input: s.to_string(),
                reason: "minimum exceeds maximum",
            });
        }

        Ok(Self::new(min_lng, min_lat, max_lng, max_lat))
    }
}

/// Error returned when a bounding box string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidBoundingBoxError {
    /// The rejected input.
    pub input: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

impl std::fmt::Display for InvalidBoundingBoxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid bounding box '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for InvalidBoundingBoxError {}

/// Aggregated traffic for one H3 cell at one resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellAggregate {
    /// H3 cell, serialized as its lowercase hex string.
    #[serde(rename = "h3", serialize_with = "serialize_cell")]
    pub cell: CellIndex,
    /// H3 resolution of `cell`.
    #[serde(rename = "res")]
    pub resolution: u8,
    /// Number of raw points that fell in the cell.
    pub point_count: u64,
    /// Number of distinct entity ids among those points.
    #[serde(rename = "unique_trips")]
    pub unique_trip_count: u64,
    /// Latitude of the cell center.
    pub lat_center: f64,
    /// Longitude of the cell center.
    pub lng_center: f64,
    /// Blend of normalized volume and trip diversity, in `[0, 1]`.
    #[serde(rename = "score")]
    pub demand_score: f64,
    /// Percentile rank of `demand_score` within the resolution, in `[0, 1]`.
    #[serde(rename = "score_quantile")]
    pub demand_score_percentile: f64,
}

impl CellAggregate {
    /// Whether raw counts for this cell must be hidden under privacy
    /// threshold `k`.
    #[must_use]
    pub const fn is_suppressed(&self, k: u64) -> bool {
        self.point_count < k || self.unique_trip_count < k
    }
}

/// Serializes a cell as its hex string form.
///
/// # Errors
///
/// Propagates serializer errors.
pub fn serialize_cell<S: Serializer>(cell: &CellIndex, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(cell)
}

/// Point/trip sums for one resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionTotals {
    /// Sum of `point_count` over all cells.
    pub total_points: u64,
    /// Sum of `unique_trip_count` over all cells.
    pub total_trips: u64,
}

/// All cell aggregates of one resolution, keyed by cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolutionTable {
    resolution: u8,
    cells: BTreeMap<CellIndex, CellAggregate>,
    totals: ResolutionTotals,
}

impl ResolutionTable {
    /// Builds a table from finished cell aggregates, computing totals.
    #[must_use]
    pub fn new(resolution: u8, cells: impl IntoIterator<Item = CellAggregate>) -> Self {
        let cells: BTreeMap<CellIndex, CellAggregate> =
            cells.into_iter().map(|agg| (agg.cell, agg)).collect();

        let totals = cells.values().fold(ResolutionTotals::default(), |acc, c| {
            ResolutionTotals {
                total_points: acc.total_points + c.point_count,
                total_trips: acc.total_trips + c.unique_trip_count,
            }
        });

        Self {
            resolution,
            cells,
            totals,
        }
    }

    /// H3 resolution of every cell in the table.
    #[must_use]
    pub const fn resolution(&self) -> u8 {
        self.resolution
    }

    /// Point/trip totals.
    #[must_use]
    pub const fn totals(&self) -> ResolutionTotals {
        self.totals
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the table has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Looks up one cell.
    #[must_use]
    pub fn get(&self, cell: &CellIndex) -> Option<&CellAggregate> {
        self.cells.get(cell)
    }

    /// Whether `cell` has an aggregate in this table.
    #[must_use]
    pub fn contains(&self, cell: &CellIndex) -> bool {
        self.cells.contains_key(cell)
    }

    /// Iterates cells in cell-index order.
    pub fn iter(&self) -> impl Iterator<Item = &CellAggregate> {
        self.cells.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(lat: f64, lng: f64) -> CellIndex {
        let res = heatmap_grid::resolution(8).unwrap();
        heatmap_grid::cell_for_point(lat, lng, res).unwrap()
    }

    fn agg(cell: CellIndex, points: u64, trips: u64) -> CellAggregate {
        CellAggregate {
            cell,
            resolution: 8,
            point_count: points,
            unique_trip_count: trips,
            lat_center: 0.0,
            lng_center: 0.0,
            demand_score: 0.0,
            demand_score_percentile: 0.0,
        }
    }

    #[test]
    fn parses_bbox_in_lat_lng_order() {
        let bbox: BoundingBox = "51.0,71.2,51.3,71.7".parse().unwrap();
        assert!((bbox.south - 51.0).abs() < f64::EPSILON);
        assert!((bbox.west - 71.2).abs() < f64::EPSILON);
        assert!(bbox.contains(51.169, 71.449));
        assert!(bbox.contains(51.0, 71.2));
        assert!(!bbox.contains(50.9, 71.449));
    }

    #[test]
    fn rejects_malformed_bbox() {
        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("a,2,3,4".parse::<BoundingBox>().is_err());
        assert!("5,2,3,4".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn table_totals_sum_cells() {
        let table = ResolutionTable::new(
            8,
            vec![
                agg(cell(51.169, 71.449), 10, 4),
                agg(cell(51.219, 71.549), 30, 12),
            ],
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.totals().total_points, 40);
        assert_eq!(table.totals().total_trips, 16);
    }

    #[test]
    fn suppression_uses_either_count() {
        let c = cell(51.169, 71.449);
        assert!(agg(c, 10, 10).is_suppressed(20));
        assert!(agg(c, 50, 10).is_suppressed(20));
        assert!(!agg(c, 50, 20).is_suppressed(20));
    }

    #[test]
    fn serializes_cell_as_hex_string() {
        let c = cell(51.169, 71.449);
        let json = serde_json::to_value(agg(c, 1, 1)).unwrap();
        assert_eq!(json["h3"], serde_json::Value::String(c.to_string()));
        assert_eq!(json["res"], 8);
    }
}

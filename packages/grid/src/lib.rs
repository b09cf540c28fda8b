#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Thin wrapper around `h3o` exposing the parts of the H3 grid the heatmap
//! relies on: point to cell, cell to center, 1-ring neighbors, and cell
//! boundaries as `geo`/`GeoJSON` polygons.
//!
//! Resolutions travel through the rest of the workspace as plain `u8`
//! values and are validated here on the way into `h3o`.

use geo::{LineString, Point, Polygon};
pub use h3o::{CellIndex, LatLng, Resolution};

/// Errors from grid operations.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// Resolution outside the H3 range (0-15).
    #[error("Invalid H3 resolution {0}: expected 0-15")]
    InvalidResolution(u8),

    /// Latitude/longitude pair could not be placed on the grid.
    #[error("Invalid coordinates ({lat}, {lng})")]
    InvalidCoordinates {
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lng: f64,
    },

    /// String that is not a valid H3 cell index.
    #[error("Invalid H3 cell '{0}'")]
    InvalidCell(String),
}

/// Converts a raw resolution number into an `h3o` [`Resolution`].
///
/// # Errors
///
/// Returns [`GridError::InvalidResolution`] if `res` is above 15.
pub fn resolution(res: u8) -> Result<Resolution, GridError> {
    Resolution::try_from(res).map_err(|_| GridError::InvalidResolution(res))
}

/// Maps a point to the cell containing it at `res`.
///
/// # Errors
///
/// Returns [`GridError::InvalidCoordinates`] for non-finite coordinates.
pub fn cell_for_point(lat: f64, lng: f64, res: Resolution) -> Result<CellIndex, GridError> {
    LatLng::new(lat, lng)
        .map(|coord| coord.to_cell(res))
        .map_err(|_| GridError::InvalidCoordinates { lat, lng })
}

/// Center of a cell.
#[must_use]
pub fn center(cell: CellIndex) -> LatLng {
    LatLng::from(cell)
}

/// Cells sharing an edge with `cell` (its 1-ring), excluding `cell` itself.
///
/// Hexagons have six neighbors; pentagons have five.
#[must_use]
pub fn neighbors(cell: CellIndex) -> Vec<CellIndex> {
    cell.grid_disk::<Vec<_>>(1)
        .into_iter()
        .filter(|n| *n != cell)
        .collect()
}

/// Boundary of a cell as a closed polygon in `(lng, lat)` order.
#[must_use]
pub fn boundary(cell: CellIndex) -> Polygon<f64> {
    let ring: Vec<(f64, f64)> = cell
        .boundary()
        .iter()
        .map(|vertex| (vertex.lng(), vertex.lat()))
        .collect();

    // Polygon::new closes the exterior ring.
    Polygon::new(LineString::from(ring), vec![])
}

/// Boundary of a cell as a `GeoJSON` polygon geometry.
#[must_use]
pub fn boundary_geometry(cell: CellIndex) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(&boundary(cell)))
}

/// Center of a cell as a `GeoJSON` point geometry.
#[must_use]
pub fn center_geometry(cell: CellIndex) -> geojson::Geometry {
    let c = center(cell);
    geojson::Geometry::new(geojson::Value::from(&Point::new(c.lng(), c.lat())))
}

/// Parses the lowercase hex form of an H3 cell (e.g. `"881f1d4a4bfffff"`).
///
/// # Errors
///
/// Returns [`GridError::InvalidCell`] if the string is not a valid cell.
pub fn parse_cell(s: &str) -> Result<CellIndex, GridError> {
    s.trim()
        .parse::<CellIndex>()
        .map_err(|_| GridError::InvalidCell(s.to_string()))
}

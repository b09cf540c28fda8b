//! GeoJSON feature rendering of heatmap and forecast cells.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use heatmap_grid::CellIndex;
use serde::Serialize;

use crate::error::ServerError;

/// Serializes `value` into a GeoJSON properties object.
pub fn properties<T: Serialize>(value: &T) -> Result<JsonObject, ServerError> {
    match serde_json::to_value(value)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(ServerError::Internal(format!(
            "expected an object for feature properties, got {other}"
        ))),
    }
}

/// The cell's hexagon, or a point at `(lat, lng)`.
pub fn cell_geometry(cell: CellIndex, polygon: bool, center: Option<(f64, f64)>) -> Geometry {
    match (polygon, center) {
        (true, _) => heatmap_grid::boundary_geometry(cell),
        (false, Some((lat, lng))) => Geometry::new(geojson::Value::from(&geo::Point::new(lng, lat))),
        (false, None) => heatmap_grid::center_geometry(cell),
    }
}

#[must_use]
pub fn feature(geometry: Geometry, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Wraps features in a collection, attaching `meta` as a foreign member.
#[must_use]
pub fn collection(features: Vec<Feature>, meta: Option<JsonObject>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: meta.map(|m| {
            let mut members = JsonObject::new();
            members.insert("meta".to_string(), JsonValue::Object(m));
            members
        }),
    }
}

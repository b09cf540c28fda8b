#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the heatmap server.
//!
//! These are the wire contract and are kept separate from the aggregate and
//! forecast types so either side can evolve independently. All JSON is
//! `snake_case`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use heatmap_aggregate_models::{CellAggregate, ResolutionTotals};
use heatmap_forecast_models::{Explanations, ForecastCell, ForecastResult, Prediction, Quantiles};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Version of the cell payload schema.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Human-readable application name reported by `/version`.
pub const APP_NAME: &str = "Mobility Heatmap API";

/// Which count a heatmap layer is built from.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Metric {
    /// Raw point count.
    #[default]
    Points,
    /// Distinct trip count.
    Trips,
}

impl Metric {
    /// The selected count of `cell`.
    #[must_use]
    pub const fn value_of(self, cell: &CellAggregate) -> u64 {
        match self {
            Self::Points => cell.point_count,
            Self::Trips => cell.unique_trip_count,
        }
    }
}

/// Response body encoding.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Geojson,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lng: f64,
}

/// Error body for 4xx/5xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub resolutions: Vec<u8>,
    pub k_anon: u64,
    pub total_points: BTreeMap<u8, u64>,
    pub total_trips: BTreeMap<u8, u64>,
    pub center: Center,
}

impl HealthResponse {
    #[must_use]
    pub fn new(totals: &BTreeMap<u8, ResolutionTotals>, k_anon: u64, center: Center) -> Self {
        Self {
            status: "ok",
            resolutions: totals.keys().copied().collect(),
            k_anon,
            total_points: totals.iter().map(|(r, t)| (*r, t.total_points)).collect(),
            total_trips: totals.iter().map(|(r, t)| (*r, t.total_trips)).collect(),
            center,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    pub app: &'static str,
    pub version: &'static str,
    pub schema_version: &'static str,
}

/// Per-resolution summary in `/heatmap/meta`.
#[derive(Debug, Clone, Serialize)]
pub struct MetaResolution {
    pub res: u8,
    pub cells_before: usize,
    pub cells_after_suppression: usize,
    pub total_points: u64,
    pub total_trips: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetaResponse {
    pub resolutions: Vec<MetaResolution>,
    pub k_anon_default: u64,
    pub center: Center,
    pub bbox: Option<String>,
    pub last_loaded_at: DateTime<Utc>,
}

/// One heatmap cell as returned by `/heatmap/top` and `/heatmap/cells`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellOut {
    pub h3: String,
    pub res: u8,
    pub point_count: u64,
    pub unique_trips: u64,
    /// The selected metric; `None` when the cell is suppressed.
    pub value: Option<u64>,
    /// Share of the resolution's total points.
    pub share_points: f64,
    /// Share of the resolution's total trips.
    pub share_trips: f64,
    pub center: Center,
    pub suppressed: bool,
    pub schema_version: &'static str,
    pub score: Option<f64>,
    pub score_quantile: Option<f64>,
}

impl CellOut {
    /// Builds the API view of `cell`. Suppressed cells keep their identity
    /// but report no value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_aggregate(
        cell: &CellAggregate,
        totals: ResolutionTotals,
        metric: Metric,
        suppressed: bool,
    ) -> Self {
        Self {
            h3: cell.cell.to_string(),
            res: cell.resolution,
            point_count: cell.point_count,
            unique_trips: cell.unique_trip_count,
            value: (!suppressed).then_some(metric.value_of(cell)),
            share_points: cell.point_count as f64 / totals.total_points.max(1) as f64,
            share_trips: cell.unique_trip_count as f64 / totals.total_trips.max(1) as f64,
            center: Center {
                lat: cell.lat_center,
                lng: cell.lng_center,
            },
            suppressed,
            schema_version: SCHEMA_VERSION,
            score: Some(cell.demand_score),
            score_quantile: Some(cell.demand_score_percentile),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopQuery {
    /// Unsupported or absent values fall back to the default resolution.
    pub res: Option<u8>,
    pub metric: Option<Metric>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CellsQuery {
    pub res: u8,
    pub metric: Option<Metric>,
    pub include_suppressed: Option<bool>,
    /// Overrides the configured k-anonymity threshold.
    pub k: Option<u64>,
    /// `minLat,minLng,maxLat,maxLng` filter on cell centers.
    pub bbox: Option<String>,
    pub format: Option<OutputFormat>,
    /// GeoJSON geometry: cell polygon (default) or center point.
    pub polygon: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForecastQuery {
    pub res: u8,
    /// Comma separated minutes; defaults to `5,10,15`.
    pub horizons: Option<String>,
    pub format: Option<OutputFormat>,
    pub polygon: Option<bool>,
    pub limit: Option<usize>,
    pub include_suppressed: Option<bool>,
    /// Include `is_hub`, `is_corridor` and `decay` (default true).
    pub include_enrichment: Option<bool>,
}

/// Forecast metadata shared by the meta and cells endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastMeta {
    pub generated_at: DateTime<Utc>,
    pub res: u8,
    pub horizons_minutes: Vec<u32>,
    pub forecast_version: String,
    pub decay_base: f64,
    pub quantiles: Quantiles,
    pub alpha_smoothing: f64,
    pub corridor_boost: f64,
    pub explanations: Explanations,
}

impl From<&ForecastResult> for ForecastMeta {
    fn from(r: &ForecastResult) -> Self {
        Self {
            generated_at: r.generated_at,
            res: r.resolution,
            horizons_minutes: r.horizons_minutes.clone(),
            forecast_version: r.forecast_version.clone(),
            decay_base: r.decay_base,
            quantiles: r.quantiles,
            alpha_smoothing: r.alpha_smoothing,
            corridor_boost: r.corridor_boost,
            explanations: r.explanations.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastMetaResponse {
    #[serde(flatten)]
    pub meta: ForecastMeta,
    pub cells_count: usize,
    pub k_anon_default: u64,
}

/// A forecast cell, optionally without enrichment fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastCellOut {
    pub h3: String,
    pub current_count: u64,
    pub unique_trips: u64,
    pub suppressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_hub: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_corridor: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay: Option<f64>,
    pub predictions: BTreeMap<u32, Prediction>,
}

impl ForecastCellOut {
    #[must_use]
    pub fn new(cell: &ForecastCell, include_enrichment: bool) -> Self {
        Self {
            h3: cell.cell.to_string(),
            current_count: cell.current_count,
            unique_trips: cell.unique_trips,
            suppressed: cell.suppressed,
            is_hub: include_enrichment.then_some(cell.is_hub),
            is_corridor: include_enrichment.then_some(cell.is_corridor),
            decay: include_enrichment.then_some(cell.decay),
            predictions: cell.predictions.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastCellsResponse {
    #[serde(flatten)]
    pub meta: ForecastMeta,
    pub cells: Vec<ForecastCellOut>,
}

/// Body of a successful `/admin/reload`.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadResponse {
    pub status: &'static str,
    pub version: u64,
    pub resolutions: Vec<u8>,
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Forecast output types.
//!
//! A [`ForecastResult`] is produced once per (resolution, horizons, minute,
//! snapshot) and shared read-only between requests, so every type here is
//! plain data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use heatmap_aggregate_models::serialize_cell;
use heatmap_grid::CellIndex;
use serde::Serialize;

/// Version tag of the heuristic that produced a result.
pub const FORECAST_VERSION: &str = "heuristic_v2";

/// Predicted activity for one cell at one horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// Expected activity, rounded to 3 decimals.
    pub predicted: f64,
    /// Lower confidence bound, never negative.
    pub lower: f64,
    /// Upper confidence bound.
    pub upper: f64,
    /// Predicted activity relative to the horizon's blended maximum,
    /// rounded to 4 decimals.
    pub demand_index: f64,
}

/// Point-count tier boundaries for a resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Quantiles {
    pub q50: f64,
    pub q80: f64,
    pub q95: f64,
}

/// Human-readable description of what went into a forecast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanations {
    pub temporal_basis: String,
    pub components: Vec<String>,
}

impl Default for Explanations {
    fn default() -> Self {
        Self {
            temporal_basis: "single-snapshot heuristic without historical timestamps".to_string(),
            components: [
                "variable_decay_tiers",
                "neighbor_smoothing",
                "corridor_short_horizon_boost",
                "hub_decay_clamp",
                "blended_demand_index",
                "tier_scaled_confidence_intervals",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// Forecast for one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastCell {
    #[serde(rename = "h3", serialize_with = "serialize_cell")]
    pub cell: CellIndex,
    /// Current point count.
    pub current_count: u64,
    pub unique_trips: u64,
    /// Below the k-anonymity threshold on either count.
    pub suppressed: bool,
    pub is_hub: bool,
    pub is_corridor: bool,
    /// Decay rate per hour applied to this cell, rounded to 5 decimals.
    pub decay: f64,
    /// Keyed by horizon in minutes.
    pub predictions: BTreeMap<u32, Prediction>,
}

/// A complete forecast for one resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub generated_at: DateTime<Utc>,
    #[serde(rename = "res")]
    pub resolution: u8,
    /// Sorted, deduplicated horizons in minutes.
    pub horizons_minutes: Vec<u32>,
    pub forecast_version: String,
    /// Base decay rate per hour.
    pub decay_base: f64,
    pub quantiles: Quantiles,
    pub alpha_smoothing: f64,
    pub corridor_boost: f64,
    pub explanations: Explanations,
    pub cells: Vec<ForecastCell>,
}

impl ForecastResult {
    /// Cells in result order, optionally dropping suppressed ones, then
    /// truncated to `limit`.
    pub fn select(
        &self,
        include_suppressed: bool,
        limit: Option<usize>,
    ) -> impl Iterator<Item = &ForecastCell> {
        self.cells
            .iter()
            .filter(move |c| include_suppressed || !c.suppressed)
            .take(limit.unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(suppressed: bool) -> ForecastCell {
        let res = heatmap_grid::resolution(8).unwrap();
        ForecastCell {
            cell: heatmap_grid::cell_for_point(51.169, 71.449, res).unwrap(),
            current_count: 100,
            unique_trips: 40,
            suppressed,
            is_hub: false,
            is_corridor: true,
            decay: 0.15,
            predictions: [
                (
                    10,
                    Prediction {
                        predicted: 97.531,
                        lower: 78.175,
                        upper: 116.887,
                        demand_index: 1.0,
                    },
                ),
                (
                    5,
                    Prediction {
                        predicted: 98.757,
                        lower: 79.279,
                        upper: 118.235,
                        demand_index: 1.0,
                    },
                ),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn result(cells: Vec<ForecastCell>) -> ForecastResult {
        ForecastResult {
            generated_at: DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            resolution: 8,
            horizons_minutes: vec![5, 10],
            forecast_version: FORECAST_VERSION.to_string(),
            decay_base: 0.15,
            quantiles: Quantiles::default(),
            alpha_smoothing: 0.7,
            corridor_boost: 0.1,
            explanations: Explanations::default(),
            cells,
        }
    }

    #[test]
    fn serializes_wire_names() {
        let json = serde_json::to_value(result(vec![cell(false)])).unwrap();
        assert_eq!(json["res"], 8);
        assert_eq!(json["forecast_version"], "heuristic_v2");
        assert!(json["generated_at"].as_str().unwrap().starts_with("2026-01-01T12:00:00"));
        let c = &json["cells"][0];
        assert!(c["h3"].is_string());
        assert!(c["predictions"]["5"]["predicted"].is_number());
        assert!(c["predictions"]["10"]["demand_index"].is_number());
        assert_eq!(json["explanations"]["components"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn select_filters_suppressed_then_limits() {
        let r = result(vec![cell(true), cell(false), cell(false)]);
        assert_eq!(r.select(false, None).count(), 2);
        assert_eq!(r.select(true, None).count(), 3);
        assert_eq!(r.select(true, Some(1)).count(), 1);
        assert!(r.select(true, Some(1)).all(|c| c.suppressed));
    }
}

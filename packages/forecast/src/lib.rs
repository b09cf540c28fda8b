#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Short-horizon activity forecast.
//!
//! There is no temporal history to learn from, so the forecast is a
//! heuristic over the current snapshot: each cell's count is smoothed with
//! its 1-ring neighbors and decayed exponentially over the horizon, with
//! the decay rate chosen by density tier and slowed down for transit hubs.
//! Corridor cells get a small persistence boost at short horizons.

pub mod cache;
pub mod engine;
pub mod horizons;

use std::time::Duration;

pub use engine::ForecastEngine;
pub use heatmap_forecast_models::{
    Explanations, FORECAST_VERSION, ForecastCell, ForecastResult, Prediction, Quantiles,
};
pub use horizons::{parse_horizons, validate_horizons};
use thiserror::Error;

/// Weight of the cell's own count against its neighbor mean.
pub const ALPHA_SMOOTHING: f64 = 0.7;
/// Peak relative uplift applied to corridor cells.
pub const CORRIDOR_BOOST: f64 = 0.10;
/// Time constant (hours) of the corridor uplift; also its cut-off.
pub const CORRIDOR_TAU_HOURS: f64 = 0.5;

/// Errors from forecast requests.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A horizon is outside `1..=max` minutes.
    #[error("Invalid horizon {horizon}: must be between 1 and {max} minutes")]
    InvalidHorizon { horizon: i64, max: u32 },

    #[error("No horizons provided")]
    NoHorizons,

    #[error("Invalid horizons format: '{token}' is not an integer")]
    InvalidHorizonsFormat { token: String },

    #[error(transparent)]
    Aggregate(#[from] heatmap_aggregate::AggregateError),
}

/// Tunables of the forecast heuristic and its result cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    /// Base exponential decay rate per hour.
    pub decay_per_hour: f64,
    /// Largest accepted horizon in minutes.
    pub max_minutes: u32,
    /// k-anonymity threshold for the `suppressed` flag.
    pub suppress_k: u64,
    pub cache_capacity: u64,
    pub cache_ttl: Duration,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            decay_per_hour: 0.15,
            max_minutes: 180,
            suppress_k: 20,
            cache_capacity: 256,
            cache_ttl: Duration::from_secs(120),
        }
    }
}

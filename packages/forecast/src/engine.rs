//! The forecast heuristic and its memoized entry point.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use heatmap_aggregate::{AggregateStore, CellAggregate, ResolutionTable};
use heatmap_enrichment::{EnrichmentSets, EnrichmentSource};
use heatmap_forecast_models::{
    Explanations, FORECAST_VERSION, ForecastCell, ForecastResult, Prediction, Quantiles,
};

use crate::cache::{ForecastCache, ForecastCacheKey};
use crate::horizons::validate_horizons;
use crate::{ALPHA_SMOOTHING, CORRIDOR_BOOST, CORRIDOR_TAU_HOURS, ForecastConfig, ForecastError};

/// z-score of the two-sided 95% normal interval.
const Z_95: f64 = 1.96;

/// Hubs never decay faster than this fraction of the base rate.
const HUB_DECAY_CAP: f64 = 0.5;

/// Computes forecasts against the live aggregate store.
pub struct ForecastEngine {
    store: Arc<AggregateStore>,
    enrichment: Arc<dyn EnrichmentSource>,
    config: ForecastConfig,
    cache: ForecastCache,
}

impl ForecastEngine {
    #[must_use]
    pub fn new(
        store: Arc<AggregateStore>,
        enrichment: Arc<dyn EnrichmentSource>,
        config: ForecastConfig,
    ) -> Self {
        let cache = ForecastCache::new(config.cache_capacity, config.cache_ttl);
        Self {
            store,
            enrichment,
            config,
            cache,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ForecastConfig {
        &self.config
    }

    #[must_use]
    pub const fn cache(&self) -> &ForecastCache {
        &self.cache
    }

    /// Forecast for `resolution` at the given horizons (minutes), as of now.
    ///
    /// # Errors
    ///
    /// See [`Self::forecast_at`].
    pub fn forecast(
        &self,
        resolution: u8,
        horizons: &[i64],
    ) -> Result<Arc<ForecastResult>, ForecastError> {
        self.forecast_at(resolution, horizons, Utc::now())
    }

    /// Forecast for `resolution` as of `now`.
    ///
    /// Results are memoized per UTC minute and snapshot version, so repeated
    /// calls within the same minute return the same shared result.
    ///
    /// # Errors
    ///
    /// * [`ForecastError::NoHorizons`] / [`ForecastError::InvalidHorizon`]
    ///   if the horizons are empty or outside `1..=max_minutes`
    /// * [`ForecastError::Aggregate`] if the resolution is not loaded
    pub fn forecast_at(
        &self,
        resolution: u8,
        horizons: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Arc<ForecastResult>, ForecastError> {
        let horizons = validate_horizons(horizons, self.config.max_minutes)?;

        let snapshot = self.store.snapshot();
        let key = ForecastCacheKey::new(
            resolution,
            &horizons,
            now,
            snapshot.version,
            self.config.decay_per_hour,
        );
        if let Some(hit) = self.cache.get(&key) {
            log::debug!("Forecast cache hit for res {resolution} {horizons:?}");
            return Ok(hit);
        }

        let table = snapshot.get(resolution)?;
        if table.is_empty() {
            let empty = self.result(resolution, horizons, now, Quantiles::default(), vec![]);
            return Ok(Arc::new(empty));
        }

        let sets = self.enrichment.sets(resolution);
        let (quantiles, cells) = compute(&table, &sets, &horizons, &self.config);
        log::debug!(
            "Computed forecast for res {resolution} over {} cells (snapshot v{})",
            cells.len(),
            snapshot.version
        );

        let result = Arc::new(self.result(resolution, horizons, now, quantiles, cells));
        self.cache.insert(key, Arc::clone(&result));
        Ok(result)
    }

    fn result(
        &self,
        resolution: u8,
        horizons: Vec<u32>,
        now: DateTime<Utc>,
        quantiles: Quantiles,
        cells: Vec<ForecastCell>,
    ) -> ForecastResult {
        ForecastResult {
            generated_at: now,
            resolution,
            horizons_minutes: horizons,
            forecast_version: FORECAST_VERSION.to_string(),
            decay_base: self.config.decay_per_hour,
            quantiles,
            alpha_smoothing: ALPHA_SMOOTHING,
            corridor_boost: CORRIDOR_BOOST,
            explanations: Explanations::default(),
            cells,
        }
    }
}

/// Per-cell intermediate state.
struct Working<'a> {
    agg: &'a CellAggregate,
    is_hub: bool,
    is_corridor: bool,
    decay: f64,
    /// Unrounded `(predicted, lower, upper)`, one per horizon.
    raw: Vec<(f64, f64, f64)>,
}

#[allow(clippy::cast_precision_loss)]
fn compute(
    table: &ResolutionTable,
    sets: &EnrichmentSets,
    horizons: &[u32],
    config: &ForecastConfig,
) -> (Quantiles, Vec<ForecastCell>) {
    let mut counts: Vec<f64> = table.iter().map(|c| c.point_count as f64).collect();
    counts.sort_by(f64::total_cmp);
    let quantiles = Quantiles {
        q50: quantile(&counts, 50),
        q80: quantile(&counts, 80),
        q95: quantile(&counts, 95),
    };
    let base = config.decay_per_hour;

    let working: Vec<Working<'_>> = table
        .iter()
        .map(|agg| {
            let pc = agg.point_count as f64;
            let is_hub = sets.is_hub(&agg.cell);
            let is_corridor = sets.is_corridor(&agg.cell);
            let smoothed = smoothed_count(table, agg);
            let decay = decay_rate(pc, is_hub, base, &quantiles);
            let ci_scale = interval_scale(pc, &quantiles);

            let raw = horizons
                .iter()
                .map(|&h| {
                    let hours = f64::from(h) / 60.0;
                    let mut predicted = smoothed * (-decay * hours).exp();
                    if is_corridor && hours <= CORRIDOR_TAU_HOURS {
                        predicted *= CORRIDOR_BOOST.mul_add((-hours / CORRIDOR_TAU_HOURS).exp(), 1.0);
                    }
                    let half_width = Z_95 * predicted.sqrt() * ci_scale;
                    (predicted, (predicted - half_width).max(0.0), predicted + half_width)
                })
                .collect();

            Working {
                agg,
                is_hub,
                is_corridor,
                decay,
                raw,
            }
        })
        .collect();

    let denominators: Vec<f64> = (0..horizons.len())
        .map(|i| {
            let mut values: Vec<f64> = working.iter().map(|w| w.raw[i].0).collect();
            values.sort_by(f64::total_cmp);
            let max = values.last().copied().unwrap_or(0.0);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let p95 = values[(0.95 * (values.len() - 1) as f64).floor() as usize];
            0.5f64.mul_add(max.max(1.0), 0.5 * p95.max(1.0))
        })
        .collect();

    let k = config.suppress_k;
    let cells = working
        .into_iter()
        .map(|w| {
            let predictions: BTreeMap<u32, Prediction> = horizons
                .iter()
                .zip(&w.raw)
                .zip(&denominators)
                .map(|((&h, &(predicted, lower, upper)), &denom)| {
                    (
                        h,
                        Prediction {
                            predicted: round_to(predicted, 3),
                            lower: round_to(lower, 3),
                            upper: round_to(upper, 3),
                            demand_index: round_to(predicted / denom, 4),
                        },
                    )
                })
                .collect();

            ForecastCell {
                cell: w.agg.cell,
                current_count: w.agg.point_count,
                unique_trips: w.agg.unique_trip_count,
                suppressed: w.agg.is_suppressed(k),
                is_hub: w.is_hub,
                is_corridor: w.is_corridor,
                decay: round_to(w.decay, 5),
                predictions,
            }
        })
        .collect();

    (quantiles, cells)
}

/// Blend of the cell's count with the mean count of its loaded 1-ring
/// neighbors; the raw count if none are loaded.
#[allow(clippy::cast_precision_loss)]
fn smoothed_count(table: &ResolutionTable, agg: &CellAggregate) -> f64 {
    let pc = agg.point_count as f64;
    let neighbor_counts: Vec<f64> = heatmap_grid::neighbors(agg.cell)
        .iter()
        .filter_map(|n| table.get(n))
        .map(|n| n.point_count as f64)
        .collect();

    if neighbor_counts.is_empty() {
        return pc;
    }
    let mean = neighbor_counts.iter().sum::<f64>() / neighbor_counts.len() as f64;
    ALPHA_SMOOTHING.mul_add(pc, (1.0 - ALPHA_SMOOTHING) * mean)
}

fn decay_rate(point_count: f64, is_hub: bool, base: f64, q: &Quantiles) -> f64 {
    let tier = if point_count >= q.q95 {
        0.4
    } else if point_count >= q.q80 {
        0.7
    } else if point_count >= q.q50 {
        1.0
    } else {
        1.3
    };
    let decay = base * tier;
    if is_hub {
        decay.min(base * HUB_DECAY_CAP)
    } else {
        decay
    }
}

fn interval_scale(point_count: f64, q: &Quantiles) -> f64 {
    if point_count >= q.q95 {
        0.8
    } else if point_count < q.q50 {
        1.3
    } else {
        1.0
    }
}

/// Percentile of an ascending slice using the exclusive method: position
/// `percent * (n + 1) / 100`, interpolating between the bracketing ranks and
/// extrapolating past the ends for small `n`. A single value is its own
/// percentile; 0 when empty.
#[allow(clippy::cast_precision_loss)]
fn quantile(sorted: &[f64], percent: usize) -> f64 {
    match sorted {
        [] => 0.0,
        [only] => *only,
        _ => {
            let n = sorted.len();
            let scaled = percent * (n + 1);
            let j = (scaled / 100).clamp(1, n - 1);
            let delta = scaled as f64 - (100 * j) as f64;
            sorted[j - 1].mul_add(100.0 - delta, sorted[j] * delta) / 100.0
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

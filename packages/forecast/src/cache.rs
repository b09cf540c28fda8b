//! Bounded forecast result cache.
//!
//! Entries are keyed by everything a result depends on, so a hit is always
//! exactly what a fresh computation would return. Capacity and TTL only
//! bound memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use heatmap_forecast_models::ForecastResult;
use moka::sync::Cache;

/// Identity of a forecast computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForecastCacheKey {
    pub resolution: u8,
    /// Sorted, deduplicated.
    pub horizons: Vec<u32>,
    /// Whole minutes since the Unix epoch (UTC).
    pub minute_bucket: i64,
    /// Version of the aggregate snapshot the result was computed from.
    pub snapshot_version: u64,
    /// `f64::to_bits` of the base decay rate.
    pub decay_bits: u64,
}

impl ForecastCacheKey {
    #[must_use]
    pub fn new(
        resolution: u8,
        horizons: &[u32],
        now: DateTime<Utc>,
        snapshot_version: u64,
        decay_per_hour: f64,
    ) -> Self {
        Self {
            resolution,
            horizons: horizons.to_vec(),
            minute_bucket: now.timestamp().div_euclid(60),
            snapshot_version,
            decay_bits: decay_per_hour.to_bits(),
        }
    }
}

/// Shared, size and age bounded map from key to computed result.
pub struct ForecastCache {
    cache: Cache<ForecastCacheKey, Arc<ForecastResult>>,
}

impl ForecastCache {
    #[must_use]
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    #[must_use]
    pub fn get(&self, key: &ForecastCacheKey) -> Option<Arc<ForecastResult>> {
        self.cache.get(key)
    }

    pub fn insert(&self, key: ForecastCacheKey, result: Arc<ForecastResult>) {
        self.cache.insert(key, result);
    }

    /// Approximate number of entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for ForecastCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use heatmap_forecast_models::{Explanations, FORECAST_VERSION, Quantiles};

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap()
    }

    fn result() -> Arc<ForecastResult> {
        Arc::new(ForecastResult {
            generated_at: at(8, 0, 0),
            resolution: 8,
            horizons_minutes: vec![5],
            forecast_version: FORECAST_VERSION.to_string(),
            decay_base: 0.15,
            quantiles: Quantiles::default(),
            alpha_smoothing: 0.7,
            corridor_boost: 0.1,
            explanations: Explanations::default(),
            cells: vec![],
        })
    }

    #[test]
    fn same_minute_shares_bucket() {
        let a = ForecastCacheKey::new(8, &[5], at(8, 0, 1), 1, 0.15);
        let b = ForecastCacheKey::new(8, &[5], at(8, 0, 59), 1, 0.15);
        let c = ForecastCacheKey::new(8, &[5], at(8, 1, 0), 1, 0.15);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn snapshot_version_and_decay_are_part_of_identity() {
        let base = ForecastCacheKey::new(8, &[5], at(8, 0, 0), 1, 0.15);
        assert_ne!(base, ForecastCacheKey::new(8, &[5], at(8, 0, 0), 2, 0.15));
        assert_ne!(base, ForecastCacheKey::new(8, &[5], at(8, 0, 0), 1, 0.2));
        assert_ne!(base, ForecastCacheKey::new(9, &[5], at(8, 0, 0), 1, 0.15));
    }

    #[test]
    fn hit_returns_same_allocation() {
        let cache = ForecastCache::new(16, Duration::from_secs(60));
        let key = ForecastCacheKey::new(8, &[5], at(8, 0, 0), 1, 0.15);
        let value = result();
        cache.insert(key.clone(), Arc::clone(&value));
        assert!(Arc::ptr_eq(&cache.get(&key).unwrap(), &value));
    }

    #[test]
    fn clear_drops_entries() {
        let cache = ForecastCache::new(16, Duration::from_secs(60));
        let key = ForecastCacheKey::new(8, &[5], at(8, 0, 0), 1, 0.15);
        cache.insert(key.clone(), result());
        cache.clear();
        assert!(cache.get(&key).is_none());
    }
}

//! In-memory aggregate store.
//!
//! The store publishes one immutable [`AggregateSnapshot`] at a time.
//! Readers clone the current `Arc` and keep a consistent view for as long
//! as they hold it; reloads build a complete replacement off to the side
//! and swap the pointer only once it is ready.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use heatmap_aggregate_models::{ResolutionTable, ResolutionTotals};

use crate::AggregateError;
use crate::progress::ProgressCallback;
use crate::source::AggregateSource;

/// An immutable set of resolution tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSnapshot {
    /// Incremented on every successful publish; `0` means never loaded.
    pub version: u64,
    /// When this snapshot was published.
    pub loaded_at: Option<DateTime<Utc>>,
    /// Tables keyed by resolution.
    pub tables: BTreeMap<u8, Arc<ResolutionTable>>,
}

impl AggregateSnapshot {
    /// Table for `resolution`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::NotFound`] if the resolution is absent.
    pub fn get(&self, resolution: u8) -> Result<Arc<ResolutionTable>, AggregateError> {
        self.tables
            .get(&resolution)
            .cloned()
            .ok_or(AggregateError::NotFound { resolution })
    }

    /// Loaded resolutions, ascending.
    #[must_use]
    pub fn resolutions(&self) -> Vec<u8> {
        self.tables.keys().copied().collect()
    }
}

/// Thread-safe holder of the current snapshot.
#[derive(Debug, Default)]
pub struct AggregateStore {
    current: RwLock<Arc<AggregateSnapshot>>,
}

impl AggregateStore {
    /// An empty store (version 0).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with `tables` already published as version 1.
    #[must_use]
    pub fn with_tables(tables: BTreeMap<u8, ResolutionTable>) -> Self {
        let store = Self::new();
        store.replace(tables);
        store
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<AggregateSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Table for `resolution` from the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::NotFound`] if the resolution is not loaded.
    pub fn get(&self, resolution: u8) -> Result<Arc<ResolutionTable>, AggregateError> {
        self.snapshot().get(resolution)
    }

    #[must_use]
    pub fn list_resolutions(&self) -> Vec<u8> {
        self.snapshot().resolutions()
    }

    #[must_use]
    pub fn totals(&self) -> BTreeMap<u8, ResolutionTotals> {
        self.snapshot()
            .tables
            .iter()
            .map(|(res, table)| (*res, table.totals()))
            .collect()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    #[must_use]
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot().loaded_at
    }

    /// Publishes `tables` as the next snapshot and returns its version.
    pub fn replace(&self, tables: BTreeMap<u8, ResolutionTable>) -> u64 {
        let tables = tables
            .into_iter()
            .map(|(res, table)| (res, Arc::new(table)))
            .collect();

        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let version = guard.version + 1;
        *guard = Arc::new(AggregateSnapshot {
            version,
            loaded_at: Some(Utc::now()),
            tables,
        });
        drop(guard);

        log::info!("Published aggregate snapshot v{version}");
        version
    }

    /// Rebuilds every table from `source` and publishes the result.
    ///
    /// Readers continue to see the previous snapshot until the new one is
    /// complete.
    ///
    /// # Errors
    ///
    /// Propagates any load failure; the current snapshot is left in place.
    pub fn reload(
        &self,
        source: &AggregateSource,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<u64, AggregateError> {
        match source.load(progress) {
            Ok(tables) => Ok(self.replace(tables)),
            Err(e) => {
                log::error!(
                    "Reload from {} failed, keeping snapshot v{}: {e}",
                    source.path().display(),
                    self.version()
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::thread;

    use super::*;
    use crate::progress::null_progress;
    use crate::scoring::{CellCounts, build_table};

    fn table(res: u8, points: u64) -> ResolutionTable {
        let r = heatmap_grid::resolution(res).unwrap();
        let cell = heatmap_grid::cell_for_point(51.169, 71.449, r).unwrap();
        build_table(
            res,
            vec![CellCounts {
                cell,
                point_count: points,
                unique_trip_count: points,
                center: None,
            }],
        )
    }

    fn tables(points: u64) -> BTreeMap<u8, ResolutionTable> {
        [8, 7, 9].into_iter().map(|r| (r, table(r, points))).collect()
    }

    #[test]
    fn empty_store_has_no_version() {
        let store = AggregateStore::new();
        assert_eq!(store.version(), 0);
        assert!(store.loaded_at().is_none());
        assert!(store.list_resolutions().is_empty());
        assert!(matches!(
            store.get(8),
            Err(AggregateError::NotFound { resolution: 8 })
        ));
    }

    #[test]
    fn replace_bumps_version_and_lists_ascending() {
        let store = AggregateStore::new();
        assert_eq!(store.replace(tables(3)), 1);
        assert_eq!(store.replace(tables(4)), 2);
        assert_eq!(store.list_resolutions(), vec![7, 8, 9]);
        assert_eq!(store.totals()[&8].total_points, 4);
        assert!(store.loaded_at().is_some());
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let store = AggregateStore::with_tables(tables(5));
        let before = store.snapshot();

        let source = AggregateSource::Precomputed {
            path: PathBuf::from("/nonexistent/heatmap/precomputed.csv"),
        };
        assert!(store.reload(&source, &null_progress()).is_err());

        assert_eq!(store.version(), 1);
        assert_eq!(*store.snapshot(), *before);
    }

    #[test]
    fn held_snapshot_is_unaffected_by_replace() {
        let store = AggregateStore::with_tables(tables(5));
        let held = store.snapshot();
        store.replace(tables(9));
        assert_eq!(held.version, 1);
        assert_eq!(held.get(8).unwrap().totals().total_points, 5);
        assert_eq!(store.get(8).unwrap().totals().total_points, 9);
    }

    #[test]
    fn readers_never_see_mixed_tables() {
        let store = Arc::new(AggregateStore::with_tables(tables(1)));

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for points in 2..50 {
                    store.replace(tables(points));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let snap = store.snapshot();
                        let totals: Vec<u64> = snap
                            .tables
                            .values()
                            .map(|t| t.totals().total_points)
                            .collect();
                        assert!(totals.windows(2).all(|w| w[0] == w[1]));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.version(), 49);
    }
}

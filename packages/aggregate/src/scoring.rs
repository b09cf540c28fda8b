//! Demand scoring applied when a resolution table is finalized.
//!
//! `demand_score = 0.6 * normalized_count + 0.4 * uniqueness_ratio`, where
//! `normalized_count` is the cell's point count over the resolution's
//! maximum and `uniqueness_ratio` is distinct trips over points (clipped to
//! `[0, 1]`). The percentile is an average-rank percentile within the
//! resolution, so tied scores share a rank.

use std::cmp::Ordering;

use heatmap_aggregate_models::{CellAggregate, ResolutionTable};
use heatmap_grid::CellIndex;

/// Weight of normalized volume in the demand score.
pub const VOLUME_WEIGHT: f64 = 0.6;

/// Weight of trip diversity in the demand score.
pub const UNIQUENESS_WEIGHT: f64 = 0.4;

/// Raw per-cell counts before scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellCounts {
    /// H3 cell.
    pub cell: CellIndex,
    /// Points that fell in the cell.
    pub point_count: u64,
    /// Distinct entity ids among those points.
    pub unique_trip_count: u64,
    /// Precomputed `(lat, lng)` center, derived from the cell when absent.
    pub center: Option<(f64, f64)>,
}

/// Scores a set of cell counts and assembles the resolution table.
///
/// `unique_trip_count` is clamped to `point_count`.
#[must_use]
pub fn build_table(resolution: u8, counts: Vec<CellCounts>) -> ResolutionTable {
    let max_points = counts.iter().map(|c| c.point_count).max().unwrap_or(0).max(1);

    let scores: Vec<f64> = counts
        .iter()
        .map(|c| demand_score(c.point_count, c.unique_trip_count.min(c.point_count), max_points))
        .collect();
    let percentiles = percentile_ranks(&scores);

    let cells = counts
        .into_iter()
        .zip(scores)
        .zip(percentiles)
        .map(|((c, score), pct)| {
            let (lat_center, lng_center) = c.center.unwrap_or_else(|| {
                let ll = heatmap_grid::center(c.cell);
                (ll.lat(), ll.lng())
            });
            CellAggregate {
                cell: c.cell,
                resolution,
                point_count: c.point_count,
                unique_trip_count: c.unique_trip_count.min(c.point_count),
                lat_center,
                lng_center,
                demand_score: score,
                demand_score_percentile: pct,
            }
        })
        .collect::<Vec<_>>();

    ResolutionTable::new(resolution, cells)
}

/// Demand score for one cell given the resolution's maximum point count.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn demand_score(point_count: u64, unique_trip_count: u64, max_points: u64) -> f64 {
    let normalized = point_count as f64 / max_points.max(1) as f64;
    let uniqueness = (unique_trip_count as f64 / point_count.max(1) as f64).clamp(0.0, 1.0);
    VOLUME_WEIGHT.mul_add(normalized, UNIQUENESS_WEIGHT * uniqueness)
}

/// Average-rank percentile of each value (`rank / n`, ranks 1-based, ties
/// receive the mean of the ranks they span).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n
            && values[order[end + 1]].total_cmp(&values[order[start]]) == Ordering::Equal
        {
            end += 1;
        }
        // Positions start..=end hold equal values; ranks are 1-based.
        let avg_rank = (start + end + 2) as f64 / 2.0;
        for &idx in &order[start..=end] {
            ranks[idx] = avg_rank / n as f64;
        }
        start = end + 1;
    }
    ranks
}

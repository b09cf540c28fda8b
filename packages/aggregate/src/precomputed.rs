//! Precomputed aggregate tables.
//!
//! A precomputed CSV replaces the raw point stream at startup. Two column
//! naming schemes are recognized and may be mixed:
//!
//! | Field | Scheme A | Scheme B |
//! |---|---|---|
//! | cell id | `h3` | `h3_index` |
//! | resolution | `res` | `resolution` |
//! | points | `point_count` | `point_count` |
//! | distinct trips | `unique_trips` | `unique_trip_count` |
//!
//! `lat_center`/`lng_center` are used when present. Scores are always
//! recomputed from the counts.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use heatmap_aggregate_models::ResolutionTable;

use crate::scoring::{CellCounts, build_table};
use crate::{AggregateError, column_index};

const CELL_ALIASES: &[&str] = &["h3", "h3_index"];
const RES_ALIASES: &[&str] = &["res", "resolution"];
const POINTS_ALIASES: &[&str] = &["point_count"];
const TRIPS_ALIASES: &[&str] = &["unique_trips", "unique_trip_count"];

/// Header written by [`write_precomputed`].
pub const PRECOMPUTED_HEADER: &[&str] = &[
    "h3",
    "res",
    "point_count",
    "unique_trips",
    "lat_center",
    "lng_center",
    "score",
    "score_quantile",
    "suppressed",
];

/// Loads a precomputed aggregate CSV into one table per resolution found.
///
/// Rows with an unparseable cell, resolution or count are skipped with a
/// warning.
///
/// # Errors
///
/// Returns [`AggregateError::Schema`] if a required column is absent under
/// both naming schemes, or [`AggregateError::Csv`] on malformed input.
pub fn load_precomputed<R: Read>(reader: R) -> Result<BTreeMap<u8, ResolutionTable>, AggregateError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();

    let required = [
        ("h3", CELL_ALIASES),
        ("res", RES_ALIASES),
        ("point_count", POINTS_ALIASES),
        ("unique_trips", TRIPS_ALIASES),
    ];
    let mut indices = [0_usize; 4];
    let mut missing = Vec::new();
    for (slot, (name, aliases)) in indices.iter_mut().zip(required) {
        match column_index(&headers, aliases) {
            Some(idx) => *slot = idx,
            None => missing.push(name.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(AggregateError::Schema { missing });
    }
    let [cell_idx, res_idx, points_idx, trips_idx] = indices;

    let lat_idx = column_index(&headers, &["lat_center"]);
    let lng_idx = column_index(&headers, &["lng_center"]);

    let mut by_res: BTreeMap<u8, Vec<CellCounts>> = BTreeMap::new();
    let mut skipped: u64 = 0;

    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or_default();

        let Ok(cell) = heatmap_grid::parse_cell(field(cell_idx)) else {
            log::warn!("Skipping row {}: invalid cell '{}'", line + 2, field(cell_idx));
            skipped += 1;
            continue;
        };
        let (Ok(res), Some(points), Some(trips)) = (
            field(res_idx).parse::<u8>(),
            parse_count(field(points_idx)),
            parse_count(field(trips_idx)),
        ) else {
            log::warn!("Skipping row {}: unparseable resolution or counts", line + 2);
            skipped += 1;
            continue;
        };
        if u8::from(cell.resolution()) != res {
            log::warn!(
                "Skipping row {}: cell {cell} is resolution {}, not {res}",
                line + 2,
                u8::from(cell.resolution())
            );
            skipped += 1;
            continue;
        }

        let center = match (lat_idx, lng_idx) {
            (Some(la), Some(ln)) => field(la)
                .parse::<f64>()
                .ok()
                .zip(field(ln).parse::<f64>().ok()),
            _ => None,
        };

        if trips > points {
            log::warn!(
                "Row {}: unique trips ({trips}) exceed points ({points}); clamping",
                line + 2
            );
        }

        by_res.entry(res).or_default().push(CellCounts {
            cell,
            point_count: points,
            unique_trip_count: trips,
            center,
        });
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} invalid precomputed rows");
    }

    Ok(by_res
        .into_iter()
        .map(|(res, counts)| (res, build_table(res, counts)))
        .collect())
}

/// Accepts integer counts, including float-formatted ones such as `"12.0"`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_count(s: &str) -> Option<u64> {
    if let Ok(v) = s.parse::<u64>() {
        return Some(v);
    }
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
        .map(|v| v as u64)
}

/// Writes tables in the precomputed format, ordered by resolution then by
/// descending point count. `suppressed` is evaluated against `k`.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`AggregateError::Csv`] if writing fails.
pub fn write_precomputed<W: Write>(
    writer: W,
    tables: &BTreeMap<u8, ResolutionTable>,
    k: u64,
) -> Result<u64, AggregateError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(PRECOMPUTED_HEADER)?;

    let mut rows: u64 = 0;
    for table in tables.values() {
        let mut cells: Vec<_> = table.iter().collect();
        cells.sort_by(|a, b| b.point_count.cmp(&a.point_count).then(a.cell.cmp(&b.cell)));

        for cell in cells {
            wtr.write_record([
                cell.cell.to_string(),
                cell.resolution.to_string(),
                cell.point_count.to_string(),
                cell.unique_trip_count.to_string(),
                cell.lat_center.to_string(),
                cell.lng_center.to_string(),
                cell.demand_score.to_string(),
                cell.demand_score_percentile.to_string(),
                cell.is_suppressed(k).to_string(),
            ])?;
            rows += 1;
        }
    }

    wtr.flush()?;
    Ok(rows)
}

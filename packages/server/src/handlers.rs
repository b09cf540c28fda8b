//! HTTP handler functions for the heatmap API.

use std::sync::Arc;

use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, web};
use chrono::Utc;
use heatmap_aggregate::progress::null_progress;
use heatmap_aggregate::{BoundingBox, CellAggregate};
use heatmap_forecast::parse_horizons;
use heatmap_forecast_models::ForecastResult;
use heatmap_server_models::{
    APP_NAME, CellOut, CellsQuery, Center, ForecastCellOut, ForecastCellsResponse, ForecastMeta,
    ForecastMetaResponse, ForecastQuery, HealthResponse, MetaResolution, MetaResponse, Metric,
    OutputFormat, ReloadResponse, SCHEMA_VERSION, TopQuery, VersionResponse,
};
use sha2::{Digest, Sha256};

use crate::AppState;
use crate::error::ServerError;
use crate::features::{cell_geometry, collection, feature, properties};

const DEFAULT_TOP_LIMIT: usize = 50;
const MAX_TOP_LIMIT: usize = 1_000;
const MAX_CELLS_LIMIT: usize = 50_000;
const DEFAULT_HORIZONS: &str = "5,10,15";

fn center(state: &AppState) -> Center {
    Center {
        lat: state.settings.city_center.lat,
        lng: state.settings.city_center.lng,
    }
}

fn check_limit(limit: Option<usize>, max: usize) -> Result<Option<usize>, ServerError> {
    match limit {
        Some(l) if l == 0 || l > max => Err(ServerError::BadRequest(format!(
            "limit must be between 1 and {max}"
        ))),
        other => Ok(other),
    }
}

/// Rejects resolutions the store has not loaded.
fn check_resolution(state: &AppState, res: u8) -> Result<(), ServerError> {
    if state.store.list_resolutions().contains(&res) {
        Ok(())
    } else {
        Err(ServerError::UnsupportedResolution(res))
    }
}

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse::new(
        &state.store.totals(),
        state.settings.suppress_k,
        center(&state),
    ))
}

/// `GET /api/version`
pub async fn version() -> HttpResponse {
    HttpResponse::Ok().json(VersionResponse {
        app: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
        schema_version: SCHEMA_VERSION,
    })
}

/// `GET /api/heatmap/meta`
pub async fn heatmap_meta(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.store.snapshot();
    let k = state.settings.suppress_k;

    let resolutions = snapshot
        .tables
        .iter()
        .map(|(res, table)| {
            let totals = table.totals();
            MetaResolution {
                res: *res,
                cells_before: table.len(),
                cells_after_suppression: table.iter().filter(|c| !c.is_suppressed(k)).count(),
                total_points: totals.total_points,
                total_trips: totals.total_trips,
            }
        })
        .collect();

    HttpResponse::Ok().json(MetaResponse {
        resolutions,
        k_anon_default: k,
        center: center(&state),
        bbox: state.settings.bbox.clone(),
        last_loaded_at: snapshot.loaded_at.unwrap_or_else(Utc::now),
    })
}

/// `GET /api/heatmap/top`
///
/// Highest demand-score cells. Suppressed cells are flagged and carry no
/// value.
pub async fn heatmap_top(
    state: web::Data<AppState>,
    params: web::Query<TopQuery>,
) -> Result<HttpResponse, ServerError> {
    let res = state.settings.resolve_resolution(params.res);
    let metric = params.metric.unwrap_or_default();
    let limit = check_limit(params.limit, MAX_TOP_LIMIT)?.unwrap_or(DEFAULT_TOP_LIMIT);
    let k = state.settings.suppress_k;

    let table = state.store.get(res)?;
    let totals = table.totals();

    let mut cells: Vec<&CellAggregate> = table.iter().collect();
    cells.sort_by(|a, b| {
        b.demand_score
            .total_cmp(&a.demand_score)
            .then(b.point_count.cmp(&a.point_count))
    });

    let out: Vec<CellOut> = cells
        .into_iter()
        .take(limit)
        .map(|c| CellOut::from_aggregate(c, totals, metric, c.is_suppressed(k)))
        .collect();

    Ok(HttpResponse::Ok().json(out))
}

/// Weak validator over everything that determines a `/heatmap/cells`
/// response.
fn cells_etag(
    res: u8,
    metric: Metric,
    k: u64,
    bbox: Option<&str>,
    count: usize,
    snapshot_version: u64,
) -> String {
    let base = format!(
        "{res}|{metric}|{k}|{}|{count}|{snapshot_version}",
        bbox.unwrap_or_default()
    );
    let digest = Sha256::digest(base.as_bytes());
    format!("W/\"{}\"", hex::encode(digest))
}

/// `GET /api/heatmap/cells`
///
/// Cells of one resolution, filtered by bounding box and k-anonymity,
/// sorted by the selected metric.
#[allow(clippy::cast_precision_loss)]
pub async fn heatmap_cells(
    req: HttpRequest,
    state: web::Data<AppState>,
    params: web::Query<CellsQuery>,
) -> Result<HttpResponse, ServerError> {
    let res = params.res;
    check_resolution(&state, res)?;
    let metric = params.metric.unwrap_or_default();
    let include_suppressed = params.include_suppressed.unwrap_or(false);
    let limit = check_limit(params.limit, MAX_CELLS_LIMIT)?;
    let k = params.k.unwrap_or(state.settings.suppress_k);
    if k == 0 {
        return Err(ServerError::BadRequest("k must be at least 1".to_string()));
    }
    let bbox = params
        .bbox
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<BoundingBox>)
        .transpose()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let snapshot = state.store.snapshot();
    let table = snapshot.get(res)?;
    let totals = table.totals();

    let in_bbox: Vec<&CellAggregate> = table
        .iter()
        .filter(|c| bbox.is_none_or(|b| b.contains(c.lat_center, c.lng_center)))
        .collect();
    if in_bbox.is_empty() {
        return Err(ServerError::BadRequest("No cells in selection".to_string()));
    }

    let mut selected: Vec<&CellAggregate> = in_bbox
        .into_iter()
        .filter(|c| include_suppressed || !c.is_suppressed(k))
        .collect();
    if selected.is_empty() {
        return Err(ServerError::BadRequest(
            "No cells after suppression; try lowering k or include_suppressed=true".to_string(),
        ));
    }

    selected.sort_by(|a, b| metric.value_of(b).cmp(&metric.value_of(a)));
    if let Some(limit) = limit {
        selected.truncate(limit);
    }

    let max_value = selected
        .iter()
        .map(|c| metric.value_of(c))
        .max()
        .unwrap_or(0)
        .max(1);

    let cells: Vec<CellOut> = selected
        .iter()
        .map(|c| CellOut::from_aggregate(c, totals, metric, c.is_suppressed(k)))
        .collect();

    let etag = cells_etag(
        res,
        metric,
        k,
        params.bbox.as_deref(),
        cells.len(),
        snapshot.version,
    );
    let not_modified = req
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);

    let mut response = if not_modified {
        HttpResponse::NotModified()
    } else {
        HttpResponse::Ok()
    };
    response
        .insert_header((header::ETAG, etag))
        .insert_header((header::CACHE_CONTROL, "public, max-age=60"));

    if not_modified {
        return Ok(response.finish());
    }

    if params.format.unwrap_or_default() == OutputFormat::Geojson {
        let polygon = params.polygon.unwrap_or(true);
        let features = cells
            .iter()
            .zip(&selected)
            .map(|(out, agg)| {
                let mut props = properties(out)?;
                props.remove("center");
                if let Some(value) = out.value {
                    let index = value as f64 / max_value as f64;
                    props.insert(
                        "demand_index".to_string(),
                        serde_json::Value::from((index * 10_000.0).round() / 10_000.0),
                    );
                }
                let geometry =
                    cell_geometry(agg.cell, polygon, Some((agg.lat_center, agg.lng_center)));
                Ok(feature(geometry, props))
            })
            .collect::<Result<Vec<_>, ServerError>>()?;
        return Ok(response.json(collection(features, None)));
    }

    Ok(response.json(cells))
}

fn run_forecast(
    state: &AppState,
    res: u8,
    horizons: Option<&str>,
) -> Result<Arc<ForecastResult>, ServerError> {
    let horizons = parse_horizons(horizons.unwrap_or(DEFAULT_HORIZONS))?;
    check_resolution(state, res)?;
    Ok(state.forecast.forecast(res, &horizons)?)
}

/// `GET /api/forecast/meta`
pub async fn forecast_meta(
    state: web::Data<AppState>,
    params: web::Query<ForecastQuery>,
) -> Result<HttpResponse, ServerError> {
    let result = run_forecast(&state, params.res, params.horizons.as_deref())?;
    Ok(HttpResponse::Ok().json(ForecastMetaResponse {
        meta: ForecastMeta::from(result.as_ref()),
        cells_count: result.cells.len(),
        k_anon_default: state.settings.suppress_k,
    }))
}

/// `GET /api/forecast/cells`
pub async fn forecast_cells(
    state: web::Data<AppState>,
    params: web::Query<ForecastQuery>,
) -> Result<HttpResponse, ServerError> {
    let limit = check_limit(params.limit, MAX_CELLS_LIMIT)?;
    let result = run_forecast(&state, params.res, params.horizons.as_deref())?;
    let include_enrichment = params.include_enrichment.unwrap_or(true);

    let selected: Vec<_> = result
        .select(params.include_suppressed.unwrap_or(false), limit)
        .collect();
    let meta = ForecastMeta::from(result.as_ref());

    if params.format.unwrap_or_default() == OutputFormat::Geojson {
        let polygon = params.polygon.unwrap_or(true);
        let features = selected
            .iter()
            .map(|cell| {
                let props = properties(&ForecastCellOut::new(cell, include_enrichment))?;
                Ok(feature(cell_geometry(cell.cell, polygon, None), props))
            })
            .collect::<Result<Vec<_>, ServerError>>()?;
        return Ok(HttpResponse::Ok().json(collection(features, Some(properties(&meta)?))));
    }

    Ok(HttpResponse::Ok().json(ForecastCellsResponse {
        meta,
        cells: selected
            .into_iter()
            .map(|c| ForecastCellOut::new(c, include_enrichment))
            .collect(),
    }))
}

/// `POST /api/admin/reload`
///
/// Rebuilds the aggregate snapshot from the configured source on the
/// blocking pool. The previous snapshot stays live if the rebuild fails.
pub async fn admin_reload(state: web::Data<AppState>) -> Result<HttpResponse, ServerError> {
    let store = Arc::clone(&state.store);
    let source = state.source.clone();

    let version = web::block(move || store.reload(&source, &null_progress()))
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
        .map_err(ServerError::Reload)?;

    Ok(HttpResponse::Ok().json(ReloadResponse {
        status: "reloaded",
        version,
        resolutions: state.store.list_resolutions(),
    }))
}

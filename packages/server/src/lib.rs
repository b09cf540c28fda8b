#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the mobility heatmap.
//!
//! Serves k-anonymized H3 heatmap layers and short-horizon demand
//! forecasts from an in-memory aggregate snapshot. The snapshot is built
//! once at startup and can be rebuilt in place through
//! `POST /api/admin/reload` without interrupting readers.

pub mod error;
mod features;
mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use heatmap_aggregate::progress::null_progress;
use heatmap_aggregate::{AggregateSource, AggregateStore};
use heatmap_config::Settings;
use heatmap_enrichment::{ArtifactEnrichment, EnrichmentSource, StaticEnrichment};
use heatmap_forecast::ForecastEngine;

pub use error::ServerError;

/// Shared application state.
pub struct AppState {
    pub settings: Settings,
    /// Live aggregate snapshot, swapped atomically on reload.
    pub store: Arc<AggregateStore>,
    pub forecast: ForecastEngine,
    /// Where `/admin/reload` rebuilds the snapshot from.
    pub source: AggregateSource,
}

impl AppState {
    /// Wires state around an already populated `store`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the configured bounding box is
    /// malformed.
    pub fn new(
        settings: Settings,
        store: Arc<AggregateStore>,
        enrichment: Arc<dyn EnrichmentSource>,
    ) -> Result<Self, ServerError> {
        let source = settings.aggregate_source()?;
        let forecast = ForecastEngine::new(
            Arc::clone(&store),
            enrichment,
            settings.forecast_config(),
        );
        Ok(Self {
            settings,
            store,
            forecast,
            source,
        })
    }

    /// Builds the initial snapshot from the configured source.
    ///
    /// # Errors
    ///
    /// * [`ServerError::Config`] if the settings are inconsistent
    /// * [`ServerError::Aggregate`] if the aggregate data cannot be loaded
    pub fn load(settings: Settings) -> Result<Self, ServerError> {
        let enrichment: Arc<dyn EnrichmentSource> = match &settings.artifacts_dir {
            Some(dir) => Arc::new(ArtifactEnrichment::new(dir.clone())),
            None => Arc::new(StaticEnrichment::new()),
        };

        let state = Self::new(settings, Arc::new(AggregateStore::new()), enrichment)?;

        log::info!("Loading aggregates from {}", state.source.path().display());
        let version = state.store.reload(&state.source, &null_progress())?;
        log::info!(
            "Aggregate snapshot v{version} ready: resolutions {:?}",
            state.store.list_resolutions()
        );

        Ok(state)
    }
}

/// Registers every `/api` route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/version", web::get().to(handlers::version))
            .route("/heatmap/meta", web::get().to(handlers::heatmap_meta))
            .route("/heatmap/top", web::get().to(handlers::heatmap_top))
            .route("/heatmap/cells", web::get().to(handlers::heatmap_cells))
            .route("/forecast/meta", web::get().to(handlers::forecast_meta))
            .route("/forecast/cells", web::get().to(handlers::forecast_cells))
            .route("/admin/reload", web::post().to(handlers::admin_reload)),
    );
}

/// Starts the HTTP server.
///
/// Loads settings, builds the initial aggregate snapshot and serves the
/// API until shutdown.
///
/// # Errors
///
/// Returns an `std::io::Result` error if settings or aggregates fail to
/// load, or the HTTP server fails to bind.
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let settings = Settings::load().map_err(std::io::Error::other)?;
    let bind_addr = settings.bind_addr.clone();
    let port = settings.port;

    let state = web::Data::new(AppState::load(settings).map_err(std::io::Error::other)?);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}

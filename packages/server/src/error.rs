//! HTTP error mapping.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use heatmap_aggregate::AggregateError;
use heatmap_config::ConfigError;
use heatmap_forecast::ForecastError;
use heatmap_server_models::ErrorResponse;
use thiserror::Error;

/// Errors surfaced by request handlers and server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unsupported resolution {0}")]
    UnsupportedResolution(u8),

    /// A query parameter failed validation.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Reload failed: {0}")]
    Reload(AggregateError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

const fn aggregate_status(e: &AggregateError) -> StatusCode {
    match e {
        AggregateError::Schema { .. }
        | AggregateError::NotFound { .. }
        | AggregateError::DataUnavailable { .. } => StatusCode::BAD_REQUEST,
        AggregateError::Csv(_) | AggregateError::Io(_) | AggregateError::Grid(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedResolution(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Aggregate(e) | Self::Forecast(ForecastError::Aggregate(e)) => aggregate_status(e),
            Self::Forecast(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Reload(_) | Self::Json(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{self}");
        }
        HttpResponse::build(status).json(ErrorResponse {
            detail: self.to_string(),
        })
    }
}

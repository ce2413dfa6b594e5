use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::convert::ConvertError;
use crate::render::OutputFormat;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Failed to convert HTML to {format}: {source}")]
    Conversion {
        format: OutputFormat,
        #[source]
        source: ConvertError,
    },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::Conversion { format, source } => {
                tracing::error!("Conversion to {format} failed: {source}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": format!("Failed to convert HTML to {format}"),
                        "details": source.to_string(),
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

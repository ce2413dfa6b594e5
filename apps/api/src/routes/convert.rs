use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::render::OutputFormat;
use crate::state::AppState;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Debug, Deserialize)]
pub struct HtmlRequest {
    pub html: String,
}

/// POST /api/to-png
pub async fn handle_to_png(
    State(state): State<AppState>,
    body: Result<Json<HtmlRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    convert(&state, body, OutputFormat::Png).await
}

/// POST /api/to-pdf
pub async fn handle_to_pdf(
    State(state): State<AppState>,
    body: Result<Json<HtmlRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    convert(&state, body, OutputFormat::Pdf).await
}

async fn convert(
    state: &AppState,
    body: Result<Json<HtmlRequest>, JsonRejection>,
    format: OutputFormat,
) -> Result<Response, AppError> {
    let Json(req) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    if req.html.is_empty() {
        return Err(AppError::BadRequest("Field 'html' is required".to_string()));
    }

    let converted = state
        .converter
        .convert(&req.html, format)
        .await
        .map_err(|source| AppError::Conversion { format, source })?;

    let cache_status = if converted.from_cache { "HIT" } else { "MISS" };
    Ok((
        [
            (header::CONTENT_TYPE, converted.artifact.mime_type),
            (X_CACHE, cache_status),
        ],
        converted.artifact.bytes,
    )
        .into_response())
}

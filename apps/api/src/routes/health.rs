use axum::Json;
use serde_json::{json, Value};

/// GET /health
/// Process liveness only; the rendering backend is not consulted.
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "message": "check" }))
}

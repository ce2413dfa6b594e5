use std::sync::Arc;

use crate::config::Config;
use crate::convert::Converter;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub converter: Arc<Converter>,
    pub config: Config,
}

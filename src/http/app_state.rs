use std::sync::Arc;

use crate::core::ResearchConfig;
use crate::research::ResearchEngine;

/// Shared handle injected into every Axum handler via `axum::extract::State`.
pub struct AppState {
    pub config: ResearchConfig,
    pub engine: Arc<ResearchEngine>,
}

impl AppState {
    pub fn new(config: ResearchConfig, engine: Arc<ResearchEngine>) -> Self {
        Self { config, engine }
    }
}

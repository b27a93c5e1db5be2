use axum::extract::FromRef;
use std::sync::Arc;

use crate::cache::TenantCache;
use crate::database::Store;
use crate::services::Pipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: TenantCache,
    pub pipeline: Arc<Pipeline>,
}

impl FromRef<AppState> for Arc<Pipeline> {
    fn from_ref(state: &AppState) -> Self {
        state.pipeline.clone()
    }
}

use axum::extract::DefaultBodyLimit;
use axum::Router;
use leadflow_engine::{EngineError, LeadEngine};
use leadflow_storage::SqliteStore;
use std::sync::Arc;

pub mod api_error;
pub mod identity;
mod routes;

pub use api_error::ApiError;
pub use identity::Caller;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct HubState {
    engine: Arc<LeadEngine<SqliteStore>>,
    max_upload_bytes: usize,
}

impl HubState {
    pub fn new(engine: LeadEngine<SqliteStore>, max_upload_bytes: usize) -> Self {
        Self {
            engine: Arc::new(engine),
            max_upload_bytes,
        }
    }

    /// Runs a store-backed engine call off the async workers.
    async fn run<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&LeadEngine<SqliteStore>) -> Result<T, EngineError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || op(&engine))
            .await
            .map_err(|err| ApiError::internal(format!("engine task failed: {err}")))?
            .map_err(ApiError::from)
    }
}

pub fn build_router(state: HubState) -> Router {
    let limit = state.max_upload_bytes;
    routes::api_routes()
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

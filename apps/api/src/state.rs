use std::sync::Arc;

use sqlx::PgPool;

use crate::llm_client::LlmClient;
use crate::storage::BlobStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Blob store behind a trait object so the pipeline can be exercised
    /// against an in-memory double.
    pub blobs: Arc<dyn BlobStore>,
    pub llm: LlmClient,
}

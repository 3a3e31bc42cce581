//! Application state.

use pagecast_core::{JobQueue, ObjectStore, StatusStore};
use std::path::PathBuf;
use std::sync::Arc;

use crate::services::IngestService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub status: Arc<dyn StatusStore>,
    pub ingest: Arc<IngestService>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        status: Arc<dyn StatusStore>,
        clone_root: impl Into<PathBuf>,
    ) -> Self {
        let ingest = Arc::new(IngestService::new(store, queue, status.clone(), clone_root));
        Self { status, ingest }
    }
}

//! API routes.

pub mod deploy;
pub mod health;

use crate::AppState;
use axum::Router;

/// Build the ingestion API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(deploy::router())
        .merge(health::router())
        .with_state(state)
}

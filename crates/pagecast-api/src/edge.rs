//! Edge file server.
//!
//! Serves `{site}/_static/{path}` for requests to `{site}.<any domain>`.

use axum::Router;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use pagecast_core::artifact::static_key;
use pagecast_core::{JobId, ObjectStore, content_type_for};
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;

const INDEX: &str = "index.html";

pub fn router(store: Arc<dyn ObjectStore>) -> Router {
    Router::new().fallback(serve_file).with_state(store)
}

async fn serve_file(
    State(store): State<Arc<dyn ObjectStore>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| uri.host())
        .unwrap_or_default();
    let site = site_label(host)
        .ok_or_else(|| ApiError::BadRequest("missing site id in Host header".to_string()))?;
    let job_id = JobId::parse(site)?;

    let path = request_path(uri.path())?;
    let key = static_key(&job_id, &path);
    debug!(key = %key, "Serving edge request");

    let object = store.get(&key).await.map_err(|e| {
        if e.is_not_found() {
            ApiError::NotFound(format!("{} not found", path))
        } else {
            e.into()
        }
    })?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, content_type_for(&path))],
        object.data,
    )
        .into_response())
}

/// First DNS label of a `Host` value, without the port.
fn site_label(host: &str) -> Option<&str> {
    let hostname = host.split(':').next().unwrap_or_default();
    let label = hostname.split('.').next().unwrap_or_default().trim();
    (!label.is_empty()).then_some(label)
}

/// Object path for a request path: decoded, relative, with index files filled in.
///
/// Dot segments, empty interior segments and backslashes are rejected so the
/// key always stays under the site's `_static/` prefix.
fn request_path(raw: &str) -> Result<String, ApiError> {
    let decoded = urlencoding::decode(raw)
        .map_err(|e| ApiError::BadRequest(format!("invalid path encoding: {}", e)))?;
    let mut path = decoded.trim_start_matches('/').to_string();

    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        let empty_interior = segment.is_empty() && i != last;
        if empty_interior || *segment == "." || *segment == ".." || segment.contains('\\') {
            return Err(ApiError::BadRequest(format!("invalid path {:?}", raw)));
        }
    }
    if path.is_empty() || path.ends_with('/') {
        path.push_str(INDEX);
    }
    Ok(path)
}

//! Object storage abstraction and bucket key layout.
//!
//! Raw sources live under `{job_id}/{relative_path}`, published artifacts under
//! `{job_id}/_static/{relative_path}`. Both share one bucket namespace.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{JobId, Result};

/// Path segment separating published output from raw source.
pub const STATIC_SEGMENT: &str = "_static";

/// Summary of a listed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// An object fetched from the store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    /// Content type recorded at upload time, if the backend keeps one.
    pub content_type: Option<String>,
}

/// Trait for object storage backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Fetch an object. A missing key is `Error::NotFound`.
    async fn get(&self, key: &str) -> Result<StoredObject>;

    /// Store an object, replacing any previous value.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// List objects whose key starts with `prefix`, in key order.
    /// `limit` caps the number of returned summaries.
    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<ObjectSummary>>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Prefix under which a job's published artifact is stored.
pub fn static_prefix(job_id: &JobId) -> String {
    format!("{}/{}/", job_id, STATIC_SEGMENT)
}

/// Key of one published file. Backslashes in `relative_path` become `/`.
pub fn static_key(job_id: &JobId, relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    format!(
        "{}{}",
        static_prefix(job_id),
        normalized.trim_start_matches('/')
    )
}

/// Key of one raw source file.
pub fn source_key(job_id: &JobId, relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    format!("{}/{}", job_id, normalized.trim_start_matches('/'))
}

//! Object store backends for pagecast.
//!
//! - S3 and S3-compatible services (production)
//! - Local filesystem (development)
//! - In-memory (tests and single-process runs)

pub mod local;
pub mod memory;
pub mod s3;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use pagecast_config::StorageConfig;
use pagecast_core::{ObjectStore, Result};
use std::sync::Arc;

/// Build the backend selected by configuration.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::S3(s3) => Ok(Arc::new(S3ObjectStore::new(s3)?)),
        StorageConfig::Local { root } => Ok(Arc::new(LocalObjectStore::new(root.clone()))),
    }
}

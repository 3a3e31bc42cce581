//! Deployment scheduling for pagecast.
//!
//! A worker pops job ids from the queue and drives each one through the
//! pipeline: download sources, build, publish, with status written at every
//! step. Job failures are recorded and never stop the worker.

pub mod error;
pub mod memory;
pub mod pipeline;
pub mod sync;
pub mod worker;

pub use error::{DeployError, SyncError};
pub use memory::{MemoryJobQueue, MemoryStatusStore};
pub use pipeline::{DeploymentPipeline, JobOutcome};
pub use sync::SyncEngine;
pub use worker::Worker;

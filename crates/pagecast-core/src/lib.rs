//! Core domain types and traits for the pagecast deployment platform.
//!
//! This crate contains:
//! - Job identifiers and the deployment status state machine
//! - Build descriptors shared by the builder and the sync engine
//! - The object-store, job-queue and status-store traits
//! - Object key layout and content-type mapping

pub mod artifact;
pub mod content_type;
pub mod error;
pub mod id;
pub mod project;
pub mod queue;
pub mod status;

pub use artifact::{ObjectStore, ObjectSummary, StoredObject};
pub use content_type::content_type_for;
pub use error::{Error, Result};
pub use id::JobId;
pub use project::{BuildDescriptor, ProjectKind};
pub use queue::{JobQueue, StatusStore};
pub use status::DeploymentStatus;

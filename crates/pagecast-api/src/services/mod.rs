//! Services backing the ingestion routes.

pub mod git;
pub mod ingest;

pub use git::{GitError, GitService};
pub use ingest::{IngestError, IngestService};

//! Build detection and execution for pagecast.
//!
//! Classifies a checked-out project, runs its install and build steps as
//! subprocesses and reports where the publishable output landed.

pub mod detect;
pub mod error;
pub mod export;
pub mod runner;

pub use detect::{ProjectInfo, detect};
pub use error::{BuildError, BuildResult};
pub use export::StaticExportGuard;
pub use runner::{NpmBuilder, ProjectBuilder};

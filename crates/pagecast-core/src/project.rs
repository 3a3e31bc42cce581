//! Build classification and results.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a checked-out project is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectKind {
    /// Any project with a package manifest; output lands in `dist`.
    Generic,
    /// A framework project that needs the static-export patch before building.
    FrameworkSsg,
}

/// Where a successful build left its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    /// Absolute path of the directory holding the build output.
    pub build_path: PathBuf,
    pub project_kind: ProjectKind,
}

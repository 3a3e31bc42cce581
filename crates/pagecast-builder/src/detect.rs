//! Project classification.

use pagecast_core::ProjectKind;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::{BuildError, BuildResult};

pub const MANIFEST: &str = "package.json";

/// Framework configuration files whose presence marks a static-export project.
pub const FRAMEWORK_CONFIGS: [&str; 2] = ["next.config.js", "next.config.ts"];

/// Build scripts in order of preference. `dev` is a last resort.
pub const BUILD_SCRIPTS: [&str; 3] = ["build", "build:prod", "dev"];

/// The subset of `package.json` the runner reads.
#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub scripts: HashMap<String, String>,
}

impl Manifest {
    /// First declared script from [`BUILD_SCRIPTS`].
    pub fn build_script(&self) -> Option<&'static str> {
        BUILD_SCRIPTS
            .into_iter()
            .find(|name| self.scripts.contains_key(*name))
    }
}

/// What the runner needs to know about a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub kind: ProjectKind,
    /// `None` when the manifest declares none of the build scripts.
    pub script: Option<&'static str>,
}

/// Inspect `project_dir` and classify it.
pub async fn detect(project_dir: &Path) -> BuildResult<ProjectInfo> {
    let manifest_path = project_dir.join(MANIFEST);
    let raw = match tokio::fs::read(&manifest_path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(BuildError::ManifestNotFound(manifest_path));
        }
        Err(e) => return Err(e.into()),
    };
    let manifest: Manifest = serde_json::from_slice(&raw).map_err(|e| {
        BuildError::ManifestInvalid(format!("{}: {}", manifest_path.display(), e))
    })?;

    let kind = if framework_config(project_dir).await.is_some() {
        ProjectKind::FrameworkSsg
    } else {
        ProjectKind::Generic
    };

    Ok(ProjectInfo {
        kind,
        script: manifest.build_script(),
    })
}

async fn framework_config(project_dir: &Path) -> Option<PathBuf> {
    for name in FRAMEWORK_CONFIGS {
        let path = project_dir.join(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

/// Directory the build is expected to leave its output in.
pub async fn resolve_output(project_dir: &Path, kind: ProjectKind) -> BuildResult<PathBuf> {
    let candidates: &[&str] = match kind {
        ProjectKind::FrameworkSsg => &["out", ".next"],
        ProjectKind::Generic => &["dist"],
    };

    for name in candidates {
        let dir = project_dir.join(name);
        if tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Ok(tokio::fs::canonicalize(&dir).await?);
        }
    }
    Err(BuildError::BuildOutputNotFound(project_dir.join(candidates[0])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> Manifest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_script_preference() {
        let m = manifest(r#"{"scripts":{"dev":"d","build:prod":"p","build":"b"}}"#);
        assert_eq!(m.build_script(), Some("build"));

        let m = manifest(r#"{"scripts":{"dev":"d","build:prod":"p"}}"#);
        assert_eq!(m.build_script(), Some("build:prod"));

        let m = manifest(r#"{"scripts":{"dev":"d","start":"s"}}"#);
        assert_eq!(m.build_script(), Some("dev"));

        assert_eq!(manifest(r#"{"name":"x"}"#).build_script(), None);
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = detect(dir.path()).await.unwrap_err();
        assert!(matches!(err, BuildError::ManifestNotFound(p) if p.ends_with(MANIFEST)));
    }

    #[tokio::test]
    async fn test_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST), "{ not json").unwrap();
        let err = detect(dir.path()).await.unwrap_err();
        assert!(matches!(err, BuildError::ManifestInvalid(_)));
    }

    #[tokio::test]
    async fn test_classification() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST), r#"{"scripts":{"build":"vite build"}}"#)
            .unwrap();

        let info = detect(dir.path()).await.unwrap();
        assert_eq!(info.kind, ProjectKind::Generic);
        assert_eq!(info.script, Some("build"));

        std::fs::write(dir.path().join("next.config.ts"), "export default {}").unwrap();
        let info = detect(dir.path()).await.unwrap();
        assert_eq!(info.kind, ProjectKind::FrameworkSsg);
    }

    #[tokio::test]
    async fn test_output_resolution() {
        let dir = tempfile::tempdir().unwrap();

        let err = resolve_output(dir.path(), ProjectKind::Generic).await.unwrap_err();
        assert!(matches!(err, BuildError::BuildOutputNotFound(p) if p.ends_with("dist")));

        std::fs::create_dir(dir.path().join(".next")).unwrap();
        let out = resolve_output(dir.path(), ProjectKind::FrameworkSsg).await.unwrap();
        assert!(out.ends_with(".next"));
        assert!(out.is_absolute());

        std::fs::create_dir(dir.path().join("out")).unwrap();
        let out = resolve_output(dir.path(), ProjectKind::FrameworkSsg).await.unwrap();
        assert!(out.ends_with("out"));
    }
}

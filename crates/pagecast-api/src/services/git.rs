//! Git service for fetching submitted repositories.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};
use url::Url;

/// URL schemes `git clone` is allowed to use.
const ALLOWED_SCHEMES: [&str; 4] = ["https", "http", "ssh", "git"];

/// Scheme for repositories on the local filesystem; only accepted when
/// enabled with [`GitService::with_local_repositories`].
const LOCAL_SCHEME: &str = "file";

/// Service for Git operations.
#[derive(Debug, Clone)]
pub struct GitService {
    git_bin: String,
    allow_local: bool,
}

impl Default for GitService {
    fn default() -> Self {
        Self::new()
    }
}

impl GitService {
    pub fn new() -> Self {
        Self {
            git_bin: "git".to_string(),
            allow_local: false,
        }
    }

    /// Accept `file://` URLs. Never enable this for untrusted callers.
    pub fn with_local_repositories(mut self, allow: bool) -> Self {
        self.allow_local = allow;
        self
    }

    /// Validate a submitted repository URL.
    pub fn validate_url(&self, repo_url: &str) -> Result<Url, GitError> {
        let url = Url::parse(repo_url.trim())
            .map_err(|e| GitError::InvalidUrl(format!("{:?}: {}", repo_url, e)))?;
        let local = self.allow_local && url.scheme() == LOCAL_SCHEME;
        if !local && !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(GitError::InvalidUrl(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }
        Ok(url)
    }

    /// Shallow-clone `repo_url` into `dest`, which must not exist yet.
    pub async fn clone_shallow(&self, repo_url: &str, dest: &Path) -> Result<(), GitError> {
        let url = self.validate_url(repo_url)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(repo_url = %url, path = %dest.display(), "Cloning repository");

        let output = Command::new(&self.git_bin)
            .args(["clone", "--depth", "1", "--single-branch", url.as_str()])
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(repo_url = %url, "Git clone failed");
            return Err(GitError::CloneFailed(stderr.trim().to_string()));
        }

        info!(path = %dest.display(), "Repository cloned successfully");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Clone failed: {0}")]
    CloneFailed(String),

    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),
}

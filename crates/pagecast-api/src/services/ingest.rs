//! Ingestion: turn a repository URL into a queued deployment job.

use bytes::Bytes;
use futures::{TryStreamExt, stream};
use pagecast_core::artifact::source_key;
use pagecast_core::{DeploymentStatus, JobId, JobQueue, ObjectStore, StatusStore, content_type_for};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{GitError, GitService};

/// Directories never uploaded as job sources.
const SKIPPED_DIRS: [&str; 1] = [".git"];

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] pagecast_core::Error),
}

pub struct IngestService {
    git: GitService,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
    status: Arc<dyn StatusStore>,
    clone_root: PathBuf,
    concurrency: usize,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        status: Arc<dyn StatusStore>,
        clone_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            git: GitService::new(),
            store,
            queue,
            status,
            clone_root: clone_root.into(),
            concurrency: 8,
        }
    }

    pub fn with_git(mut self, git: GitService) -> Self {
        self.git = git;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Clone `repo_url`, store its files and queue a new job for it.
    pub async fn deploy(&self, repo_url: &str) -> Result<JobId, IngestError> {
        self.git.validate_url(repo_url)?;
        let job_id = JobId::generate();
        let checkout = self.clone_root.join(job_id.as_str());

        let result = async {
            self.git.clone_shallow(repo_url, &checkout).await?;
            self.ingest_directory(&job_id, &checkout).await
        }
        .await;

        match tokio::fs::remove_dir_all(&checkout).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to remove checkout"),
        }

        let files = result?;
        info!(job_id = %job_id, repo_url = %repo_url, files, "Repository ingested");
        Ok(job_id)
    }

    /// Upload every file under `dir` as the sources of `job_id`, then mark
    /// the job queued and enqueue it.
    pub async fn ingest_directory(&self, job_id: &JobId, dir: &Path) -> Result<usize, IngestError> {
        let mut files = Vec::new();
        collect_sources(dir, dir, &mut files).await?;
        let count = files.len();

        stream::iter(files.into_iter().map(Ok::<_, IngestError>))
            .try_for_each_concurrent(self.concurrency, |(path, relative)| async move {
                let data = tokio::fs::read(&path).await?;
                self.store
                    .put(
                        &source_key(job_id, &relative),
                        Bytes::from(data),
                        content_type_for(&relative),
                    )
                    .await?;
                Ok::<(), IngestError>(())
            })
            .await?;

        self.status
            .set_status(job_id, DeploymentStatus::Queued)
            .await?;
        self.queue.enqueue(job_id).await?;
        info!(job_id = %job_id, files = count, "Job queued");
        Ok(count)
    }
}

#[async_recursion::async_recursion]
async fn collect_sources(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(PathBuf, String)>,
) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        let name = entry.file_name();

        if file_type.is_dir() {
            if SKIPPED_DIRS.iter().any(|skip| name.as_os_str() == *skip) {
                continue;
            }
            collect_sources(root, &path, out).await?;
        } else if file_type.is_file() {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((path, relative));
        }
    }
    Ok(())
}

//! Per-job deployment pipeline.
//!
//! `building -> download -> build -> deploying -> upload -> deployed`, with
//! any failure recorded as `failed`. [`DeploymentPipeline::process`] is the
//! per-job error boundary: it never returns an error, only a [`JobOutcome`].

use pagecast_builder::ProjectBuilder;
use pagecast_core::{DeploymentStatus, JobId, StatusStore};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{DeployError, SyncEngine};

/// How one delivery of a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    Deployed { files: usize },
    Failed(DeployError),
    /// The job was not run; carries the status found on delivery.
    Skipped(DeploymentStatus),
}

impl JobOutcome {
    pub fn is_deployed(&self) -> bool {
        matches!(self, JobOutcome::Deployed { .. })
    }
}

pub struct DeploymentPipeline {
    sync: SyncEngine,
    builder: Arc<dyn ProjectBuilder>,
    status: Arc<dyn StatusStore>,
    keep_workspace: bool,
    keep_failed_workspace: bool,
}

impl DeploymentPipeline {
    pub fn new(
        sync: SyncEngine,
        builder: Arc<dyn ProjectBuilder>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            sync,
            builder,
            status,
            keep_workspace: false,
            keep_failed_workspace: false,
        }
    }

    /// Keep the workspace of successful jobs.
    pub fn keep_workspace(mut self, keep: bool) -> Self {
        self.keep_workspace = keep;
        self
    }

    /// Keep the workspace of failed jobs for inspection.
    pub fn keep_failed_workspace(mut self, keep: bool) -> Self {
        self.keep_failed_workspace = keep;
        self
    }

    /// Run one job to a terminal state.
    pub async fn process(&self, job_id: &JobId) -> JobOutcome {
        match self.status.get_status(job_id).await {
            Ok(Some(status)) if status.is_terminal() => {
                info!(job_id = %job_id, status = %status, "Skipping duplicate delivery");
                return JobOutcome::Skipped(status);
            }
            Ok(Some(status @ (DeploymentStatus::Building | DeploymentStatus::Deploying))) => {
                warn!(job_id = %job_id, status = %status, "Previous attempt was interrupted; marking failed");
                if let Err(e) = self.status.set_status(job_id, DeploymentStatus::Failed).await {
                    error!(job_id = %job_id, error = %e, "Failed to record failed status");
                }
                return JobOutcome::Skipped(status);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not read current status; processing anyway");
            }
        }

        let mut current = DeploymentStatus::Queued;
        let outcome = match self.run(job_id, &mut current).await {
            Ok(files) => {
                info!(job_id = %job_id, files, "Deployment succeeded");
                JobOutcome::Deployed { files }
            }
            Err(DeployError::Superseded(stored)) => {
                warn!(job_id = %job_id, stage = %current, status = %stored, "Job was finalised elsewhere; abandoning");
                JobOutcome::Skipped(stored)
            }
            Err(e) => {
                error!(job_id = %job_id, stage = %current, error = %e, "Deployment failed");
                match self
                    .advance(job_id, &mut current, DeploymentStatus::Failed)
                    .await
                {
                    Ok(()) | Err(DeployError::Superseded(_)) => {}
                    Err(status_err) => {
                        error!(job_id = %job_id, error = %status_err, "Failed to record failed status");
                    }
                }
                JobOutcome::Failed(e)
            }
        };

        let keep = if outcome.is_deployed() {
            self.keep_workspace
        } else {
            self.keep_failed_workspace
        };
        if !keep {
            self.remove_workspace(job_id).await;
        }
        outcome
    }

    async fn remove_workspace(&self, job_id: &JobId) {
        let workspace = self.sync.workspace_for(job_id);
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to remove workspace"),
        }
    }

    async fn run(&self, job_id: &JobId, current: &mut DeploymentStatus) -> Result<usize, DeployError> {
        self.advance(job_id, current, DeploymentStatus::Building).await?;
        let workspace = self.sync.download(job_id).await?;
        let descriptor = self.builder.build(&workspace).await?;

        self.advance(job_id, current, DeploymentStatus::Deploying).await?;
        let files = self.sync.upload(job_id, &descriptor).await?;

        self.advance(job_id, current, DeploymentStatus::Deployed).await?;
        Ok(files)
    }

    /// Write `next` if it is a valid edge from `current` and the stored
    /// status is not already terminal.
    async fn advance(
        &self,
        job_id: &JobId,
        current: &mut DeploymentStatus,
        next: DeploymentStatus,
    ) -> Result<(), DeployError> {
        if !current.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                from: *current,
                to: next,
            });
        }
        match self.status.get_status(job_id).await.map_err(DeployError::Status)? {
            Some(stored) if stored.is_terminal() => return Err(DeployError::Superseded(stored)),
            _ => {}
        }
        self.status
            .set_status(job_id, next)
            .await
            .map_err(DeployError::Status)?;
        info!(job_id = %job_id, status = %next, "Status updated");
        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStatusStore, SyncError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use pagecast_builder::{BuildError, BuildResult};
    use pagecast_core::{BuildDescriptor, ObjectStore, ProjectKind, Result as CoreResult};
    use pagecast_storage::MemoryObjectStore;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Status store that also records every write.
    ///
    /// With `fail_after` set, a write of that status is immediately followed
    /// by an unrecorded `failed`, as if another worker had finalised the job.
    #[derive(Default)]
    struct RecordingStatusStore {
        inner: MemoryStatusStore,
        writes: Mutex<Vec<DeploymentStatus>>,
        fail_after: Option<DeploymentStatus>,
    }

    impl RecordingStatusStore {
        fn writes(&self) -> Vec<DeploymentStatus> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusStore for RecordingStatusStore {
        async fn set_status(&self, job_id: &JobId, status: DeploymentStatus) -> CoreResult<()> {
            self.writes.lock().unwrap().push(status);
            self.inner.set_status(job_id, status).await?;
            if self.fail_after == Some(status) {
                self.inner.set_status(job_id, DeploymentStatus::Failed).await?;
            }
            Ok(())
        }

        async fn get_status(&self, job_id: &JobId) -> CoreResult<Option<DeploymentStatus>> {
            self.inner.get_status(job_id).await
        }
    }

    /// Builds by copying `index.html` from the checkout into `dist/`.
    struct CopyBuilder;

    #[async_trait]
    impl ProjectBuilder for CopyBuilder {
        async fn build(&self, project_dir: &Path) -> BuildResult<BuildDescriptor> {
            let manifest = project_dir.join("package.json");
            if !manifest.exists() {
                return Err(BuildError::ManifestNotFound(manifest));
            }
            let dist = project_dir.join("dist");
            std::fs::create_dir_all(&dist)?;
            std::fs::copy(project_dir.join("index.html"), dist.join("index.html"))?;
            Ok(BuildDescriptor {
                build_path: dist,
                project_kind: ProjectKind::Generic,
            })
        }
    }

    struct Harness {
        _workspace: TempDir,
        store: Arc<MemoryObjectStore>,
        status: Arc<RecordingStatusStore>,
        pipeline: DeploymentPipeline,
    }

    fn harness_with(builder: Arc<dyn ProjectBuilder>) -> Harness {
        harness_with_status(builder, RecordingStatusStore::default())
    }

    fn harness_with_status(builder: Arc<dyn ProjectBuilder>, status: RecordingStatusStore) -> Harness {
        let workspace = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let status = Arc::new(status);
        let pipeline = DeploymentPipeline::new(
            SyncEngine::new(store.clone(), workspace.path()),
            builder,
            status.clone(),
        );
        Harness {
            _workspace: workspace,
            store,
            status,
            pipeline,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(CopyBuilder))
    }

    async fn seed(store: &MemoryObjectStore, files: &[(&str, &str)]) {
        for (key, body) in files {
            store
                .put(key, Bytes::from(body.to_string()), "text/plain")
                .await
                .unwrap();
        }
    }

    fn static_keys(store: &MemoryObjectStore) -> Vec<String> {
        store
            .keys()
            .into_iter()
            .filter(|k| k.contains("/_static/"))
            .collect()
    }

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_successful_deployment() {
        let h = harness();
        seed(
            &h.store,
            &[("site/package.json", "{}"), ("site/index.html", "<h1>site</h1>")],
        )
        .await;

        let outcome = h.pipeline.process(&id("site")).await;
        assert!(matches!(outcome, JobOutcome::Deployed { files: 1 }));
        assert_eq!(
            h.status.writes(),
            vec![
                DeploymentStatus::Building,
                DeploymentStatus::Deploying,
                DeploymentStatus::Deployed
            ]
        );
        let object = h.store.get("site/_static/index.html").await.unwrap();
        assert_eq!(&object.data[..], b"<h1>site</h1>");
        assert!(!h.pipeline.sync.workspace_for(&id("site")).exists());
    }

    #[tokio::test]
    async fn test_missing_manifest_fails_without_artifact() {
        let h = harness();
        seed(&h.store, &[("demo2/index.html", "<h1>no manifest</h1>")]).await;

        let outcome = h.pipeline.process(&id("demo2")).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(DeployError::Build(BuildError::ManifestNotFound(_)))
        ));
        assert_eq!(
            h.status.writes(),
            vec![DeploymentStatus::Building, DeploymentStatus::Failed]
        );
        assert!(static_keys(&h.store).is_empty());
        assert!(!h.pipeline.sync.workspace_for(&id("demo2")).exists());
    }

    #[tokio::test]
    async fn test_failed_workspace_kept_on_request() {
        let mut h = harness();
        h.pipeline = h.pipeline.keep_failed_workspace(true);
        seed(&h.store, &[("demo3/index.html", "<h1>no manifest</h1>")]).await;

        let outcome = h.pipeline.process(&id("demo3")).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert!(h.pipeline.sync.workspace_for(&id("demo3")).join("index.html").exists());
    }

    #[tokio::test]
    async fn test_job_failed_elsewhere_mid_run_is_not_overwritten() {
        let h = harness_with_status(
            Arc::new(CopyBuilder),
            RecordingStatusStore {
                fail_after: Some(DeploymentStatus::Building),
                ..Default::default()
            },
        );
        seed(
            &h.store,
            &[("raced/package.json", "{}"), ("raced/index.html", "<h1>raced</h1>")],
        )
        .await;

        let outcome = h.pipeline.process(&id("raced")).await;
        assert!(matches!(outcome, JobOutcome::Skipped(DeploymentStatus::Failed)));
        assert_eq!(h.status.writes(), vec![DeploymentStatus::Building]);
        assert_eq!(
            h.status.get_status(&id("raced")).await.unwrap(),
            Some(DeploymentStatus::Failed)
        );
        assert!(static_keys(&h.store).is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let h = harness();
        seed(&h.store, &[("other/package.json", "{}")]).await;

        let outcome = h.pipeline.process(&id("ghost")).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(DeployError::Sync(SyncError::SourceNotFound { .. }))
        ));
        assert_eq!(
            h.status.inner.get_status(&id("ghost")).await.unwrap(),
            Some(DeploymentStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_skipped() {
        let h = harness();
        let job = id("done");
        h.status.inner.set_status(&job, DeploymentStatus::Deployed).await.unwrap();

        let outcome = h.pipeline.process(&job).await;
        assert!(matches!(outcome, JobOutcome::Skipped(DeploymentStatus::Deployed)));
        assert!(h.status.writes().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_attempt_is_marked_failed() {
        let h = harness();
        let job = id("crashed");
        h.status.inner.set_status(&job, DeploymentStatus::Deploying).await.unwrap();

        let outcome = h.pipeline.process(&job).await;
        assert!(matches!(outcome, JobOutcome::Skipped(DeploymentStatus::Deploying)));
        assert_eq!(h.status.writes(), vec![DeploymentStatus::Failed]);
    }

    #[tokio::test]
    async fn test_rerun_replaces_partial_artifact() {
        let h = harness();
        seed(
            &h.store,
            &[
                ("again/package.json", "{}"),
                ("again/index.html", "new"),
                ("again/_static/stale.js", "old"),
            ],
        )
        .await;
        h.status.inner.set_status(&id("again"), DeploymentStatus::Queued).await.unwrap();

        let outcome = h.pipeline.process(&id("again")).await;
        assert!(outcome.is_deployed());
        assert_eq!(static_keys(&h.store), vec!["again/_static/index.html"]);
    }

    #[tokio::test]
    async fn test_superstring_ids_are_isolated() {
        let h = harness();
        seed(
            &h.store,
            &[
                ("abcd/package.json", "{}"),
                ("abcd/index.html", "abcd"),
            ],
        )
        .await;

        let outcome = h.pipeline.process(&id("abc")).await;
        assert!(matches!(outcome, JobOutcome::Failed(DeployError::Sync(_))));
        assert!(static_keys(&h.store).is_empty());
    }

    /// Runs the real npm runner against a shell-script stand-in.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_end_to_end_with_npm_runner() {
        use pagecast_builder::NpmBuilder;

        let scripts = tempfile::tempdir().unwrap();
        let fake_npm = scripts.path().join("npm.sh");
        std::fs::write(
            &fake_npm,
            "case \"$1\" in\n  install) exit 0 ;;\n  run) mkdir -p dist && cp index.html dist/index.html ;;\nesac\n",
        )
        .unwrap();
        let builder = NpmBuilder::new(&format!("sh {}", fake_npm.display()));

        let h = harness_with(Arc::new(builder));
        seed(
            &h.store,
            &[
                ("demo1/package.json", r#"{"scripts":{"build":"vite build"}}"#),
                ("demo1/index.html", "<h1>demo1</h1>"),
            ],
        )
        .await;

        let outcome = h.pipeline.process(&id("demo1")).await;
        assert!(outcome.is_deployed(), "{outcome:?}");
        assert_eq!(
            h.status.writes(),
            vec![
                DeploymentStatus::Building,
                DeploymentStatus::Deploying,
                DeploymentStatus::Deployed
            ]
        );
        let object = h.store.get("demo1/_static/index.html").await.unwrap();
        assert_eq!(&object.data[..], b"<h1>demo1</h1>");
        assert_eq!(object.content_type.as_deref(), Some("text/html"));
    }
}

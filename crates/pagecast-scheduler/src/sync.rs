//! Moves job files between the object store and the local workspace.
//!
//! Download resolves which key prefix actually holds a job's sources, since
//! ingestion has written them with both `/` and `\` separators and under a
//! legacy `output` root. Upload publishes a build under `{id}/_static/`,
//! replacing anything a previous attempt left there.

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use pagecast_core::artifact::{static_key, static_prefix};
use pagecast_core::{BuildDescriptor, JobId, ObjectStore, ObjectSummary, content_type_for};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::SyncError;

/// Keys listed when no candidate prefix matches.
const DIAGNOSTIC_SAMPLE: usize = 10;

pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    workspace_root: PathBuf,
    concurrency: usize,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            workspace_root: workspace_root.into(),
            concurrency: 8,
        }
    }

    /// Maximum number of object transfers in flight per job.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Local directory holding a job's sources.
    pub fn workspace_for(&self, job_id: &JobId) -> PathBuf {
        self.workspace_root.join(job_id.as_str())
    }

    /// Fetch every source object of `job_id` into a fresh workspace directory.
    pub async fn download(&self, job_id: &JobId) -> Result<PathBuf, SyncError> {
        let candidates = candidate_prefixes(job_id);
        let mut found = None;
        for prefix in &candidates {
            let objects = self.store.list(prefix, None).await?;
            let matching: Vec<(ObjectSummary, String)> = objects
                .into_iter()
                .filter_map(|object| {
                    let remainder = remainder_on_boundary(prefix, &object.key)?.to_string();
                    Some((object, remainder))
                })
                .collect();
            debug!(job_id = %job_id, prefix = %prefix, objects = matching.len(), "Checked source prefix");
            if !matching.is_empty() {
                found = Some((prefix, matching));
                break;
            }
        }

        let Some((prefix, objects)) = found else {
            self.log_near_matches(job_id).await;
            return Err(SyncError::SourceNotFound {
                job_id: job_id.to_string(),
                tried: candidates,
            });
        };
        info!(job_id = %job_id, prefix = %prefix, objects = objects.len(), "Resolved source prefix");

        let workspace = self.workspace_for(job_id);
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&workspace).await?;

        let files: Vec<(String, PathBuf)> = objects
            .into_iter()
            .filter_map(|(object, remainder)| {
                let relative = relative_source_path(&remainder);
                if relative.is_none() {
                    if remainder.contains("..") {
                        warn!(job_id = %job_id, key = %object.key, "Skipping key that escapes the workspace");
                    } else {
                        debug!(key = %object.key, "Skipping directory placeholder");
                    }
                }
                relative.map(|rel| (object.key, workspace.join(rel)))
            })
            .collect();
        let count = files.len();

        stream::iter(files.into_iter().map(Ok::<_, SyncError>))
            .try_for_each_concurrent(self.concurrency, |(key, path)| async move {
                let object = self.store.get(&key).await?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &object.data).await?;
                debug!(key = %key, path = %path.display(), "Downloaded source file");
                Ok::<(), SyncError>(())
            })
            .await?;

        info!(job_id = %job_id, files = count, workspace = %workspace.display(), "Downloaded sources");
        Ok(workspace)
    }

    async fn log_near_matches(&self, job_id: &JobId) {
        match self.store.list("", Some(DIAGNOSTIC_SAMPLE)).await {
            Ok(sample) => {
                let near: Vec<&str> = sample
                    .iter()
                    .map(|o| o.key.as_str())
                    .filter(|key| key.contains(job_id.as_str()))
                    .collect();
                let keys: Vec<&str> = sample.iter().map(|o| o.key.as_str()).collect();
                warn!(job_id = %job_id, sample = ?keys, near_matches = ?near, "No source objects found for job");
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "No source objects found; bucket sample unavailable");
            }
        }
    }

    /// Publish the build output under `{id}/_static/`. Returns the file count.
    pub async fn upload(
        &self,
        job_id: &JobId,
        descriptor: &BuildDescriptor,
    ) -> Result<usize, SyncError> {
        let mut files = Vec::new();
        collect_files(&descriptor.build_path, &descriptor.build_path, &mut files).await?;

        self.clear_published(job_id).await?;

        let count = files.len();
        stream::iter(files.into_iter().map(Ok::<_, SyncError>))
            .try_for_each_concurrent(self.concurrency, |(path, relative)| async move {
                let key = static_key(job_id, &relative);
                let data = tokio::fs::read(&path).await?;
                self.store
                    .put(&key, Bytes::from(data), content_type_for(&relative))
                    .await
                    .map_err(|e| SyncError::Upload {
                        key: key.clone(),
                        message: e.to_string(),
                    })?;
                debug!(key = %key, "Uploaded artifact file");
                Ok::<(), SyncError>(())
            })
            .await?;

        info!(job_id = %job_id, files = count, prefix = %static_prefix(job_id), "Published artifact");
        Ok(count)
    }

    /// Delete whatever an earlier attempt published for this job.
    async fn clear_published(&self, job_id: &JobId) -> Result<(), SyncError> {
        let prefix = static_prefix(job_id);
        let existing = self.store.list(&prefix, None).await?;
        if existing.is_empty() {
            return Ok(());
        }

        let count = existing.len();
        stream::iter(existing)
            .map(|object| async move { self.store.delete(&object.key).await })
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        info!(job_id = %job_id, prefix = %prefix, objects = count, "Cleared previous artifact");
        Ok(())
    }
}

/// Prefixes tried in order when looking for a job's sources.
pub fn candidate_prefixes(job_id: &JobId) -> Vec<String> {
    let id = job_id.as_str();
    vec![
        format!("{}/", id),
        format!("{}\\", id),
        id.to_string(),
        format!("output/{}/", id),
        format!("output\\{}\\", id),
        format!("output/{}", id),
        format!("output\\{}", id),
    ]
}

/// The part of `key` after `prefix`, if `key` belongs to that prefix's job.
///
/// Without a trailing separator in the prefix, `abc` would also match
/// `abcd/...`, so the remainder must then start at a separator.
fn remainder_on_boundary<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let remainder = key.strip_prefix(prefix)?;
    let on_boundary = prefix.ends_with(['/', '\\'])
        || remainder.is_empty()
        || remainder.starts_with(['/', '\\']);
    on_boundary.then_some(remainder)
}

/// Workspace-relative path for a key remainder.
///
/// `None` for directory placeholders and for anything with `..` segments.
fn relative_source_path(remainder: &str) -> Option<PathBuf> {
    if remainder.ends_with(['/', '\\']) {
        return None;
    }
    let mut path = PathBuf::new();
    for segment in remainder.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return None,
            segment => path.push(segment),
        }
    }
    (!path.as_os_str().is_empty()).then_some(path)
}

/// Every regular file under `dir`, with its `/`-separated path relative to `root`.
#[async_recursion::async_recursion]
async fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(PathBuf, String)>,
) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            collect_files(root, &path, out).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pagecast_core::{Error, ProjectKind, StoredObject};
    use pagecast_storage::MemoryObjectStore;

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    async fn seed(store: &MemoryObjectStore, keys: &[&str]) {
        for key in keys {
            store
                .put(key, Bytes::from(format!("contents of {}", key)), "text/plain")
                .await
                .unwrap();
        }
    }

    fn engine(store: Arc<dyn ObjectStore>, root: &Path) -> SyncEngine {
        SyncEngine::new(store, root).with_concurrency(4)
    }

    #[test]
    fn test_candidate_order() {
        assert_eq!(
            candidate_prefixes(&id("abc")),
            vec![
                "abc/",
                "abc\\",
                "abc",
                "output/abc/",
                "output\\abc\\",
                "output/abc",
                "output\\abc",
            ]
        );
    }

    #[test]
    fn test_boundary_filter() {
        assert_eq!(remainder_on_boundary("abc/", "abc/x.js"), Some("x.js"));
        assert_eq!(remainder_on_boundary("abc", "abc/x.js"), Some("/x.js"));
        assert_eq!(remainder_on_boundary("abc", "abc\\x.js"), Some("\\x.js"));
        assert_eq!(remainder_on_boundary("abc", "abc"), Some(""));
        assert_eq!(remainder_on_boundary("abc", "abcd/x.js"), None);
        assert_eq!(remainder_on_boundary("abc/", "xyz/abc/x.js"), None);
    }

    #[test]
    fn test_relative_source_path() {
        assert_eq!(
            relative_source_path("/src\\app/main.js"),
            Some(PathBuf::from("src/app/main.js"))
        );
        assert_eq!(relative_source_path(""), None);
        assert_eq!(relative_source_path("/"), None);
        assert_eq!(relative_source_path("src/"), None);
        assert_eq!(relative_source_path("../etc/passwd"), None);
        assert_eq!(relative_source_path("a/../../b"), None);
    }

    #[tokio::test]
    async fn test_download_canonical_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        seed(
            &store,
            &["demo1/package.json", "demo1/src/index.js", "demo1/src/", "demo10/package.json"],
        )
        .await;

        let workspace = engine(store, dir.path()).download(&id("demo1")).await.unwrap();
        assert_eq!(workspace, dir.path().join("demo1"));
        assert_eq!(
            std::fs::read_to_string(workspace.join("package.json")).unwrap(),
            "contents of demo1/package.json"
        );
        assert!(workspace.join("src/index.js").is_file());
        assert!(!dir.path().join("demo10").exists());
    }

    #[tokio::test]
    async fn test_download_legacy_backslash_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        seed(
            &store,
            &["output\\site\\package.json", "output\\site\\src\\main.js"],
        )
        .await;

        let workspace = engine(store, dir.path()).download(&id("site")).await.unwrap();
        assert!(workspace.join("package.json").is_file());
        assert!(workspace.join("src").join("main.js").is_file());
    }

    #[tokio::test]
    async fn test_download_does_not_take_other_jobs_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        seed(&store, &["abcd/package.json", "xabc/package.json"]).await;

        let err = engine(store, dir.path()).download(&id("abc")).await.unwrap_err();
        match err {
            SyncError::SourceNotFound { job_id, tried } => {
                assert_eq!(job_id, "abc");
                assert_eq!(tried.len(), 7);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("abc").exists());
    }

    #[tokio::test]
    async fn test_download_clears_stale_workspace_and_skips_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("job/stale.txt");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "old").unwrap();

        let store = Arc::new(MemoryObjectStore::new());
        seed(&store, &["job/index.html", "job/../escape.txt"]).await;

        let workspace = engine(store, dir.path()).download(&id("job")).await.unwrap();
        assert!(workspace.join("index.html").is_file());
        assert!(!stale.exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    fn build_output(root: &Path) -> BuildDescriptor {
        let out = root.join("dist");
        std::fs::create_dir_all(out.join("assets")).unwrap();
        std::fs::write(out.join("index.html"), "<h1>hi</h1>").unwrap();
        std::fs::write(out.join("assets/app.JS"), "console.log(1)").unwrap();
        std::fs::write(out.join("assets/logo.bin"), [0u8, 1, 2]).unwrap();
        std::fs::write(out.join("assets/site.css"), "body{}").unwrap();
        std::fs::write(out.join("assets/icon.svg"), "<svg/>").unwrap();
        std::fs::write(out.join("assets/hero.png"), [0x89u8, b'P', b'N', b'G']).unwrap();
        std::fs::write(out.join("manifest.json"), "{}").unwrap();
        BuildDescriptor {
            build_path: out,
            project_kind: ProjectKind::Generic,
        }
    }

    #[tokio::test]
    async fn test_upload_publishes_with_content_types() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        seed(&store, &["demo/_static/old.html", "demo/package.json"]).await;
        let descriptor = build_output(dir.path());

        let sync = engine(store.clone(), dir.path());
        let count = sync.upload(&id("demo"), &descriptor).await.unwrap();
        assert_eq!(count, 7);

        assert_eq!(
            store.keys(),
            vec![
                "demo/_static/assets/app.JS",
                "demo/_static/assets/hero.png",
                "demo/_static/assets/icon.svg",
                "demo/_static/assets/logo.bin",
                "demo/_static/assets/site.css",
                "demo/_static/index.html",
                "demo/_static/manifest.json",
                "demo/package.json",
            ]
        );
        for (key, content_type, body) in [
            ("demo/_static/index.html", "text/html", &b"<h1>hi</h1>"[..]),
            ("demo/_static/assets/app.JS", "application/javascript", &b"console.log(1)"[..]),
            ("demo/_static/assets/site.css", "text/css", &b"body{}"[..]),
            ("demo/_static/manifest.json", "application/json", &b"{}"[..]),
            ("demo/_static/assets/hero.png", "image/png", &b"\x89PNG"[..]),
            ("demo/_static/assets/icon.svg", "image/svg+xml", &b"<svg/>"[..]),
            ("demo/_static/assets/logo.bin", "application/octet-stream", &b"\x00\x01\x02"[..]),
        ] {
            let object = store.get(key).await.unwrap();
            assert_eq!(object.content_type.as_deref(), Some(content_type), "{key}");
            assert_eq!(&object.data[..], body, "{key}");
        }
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore(MemoryObjectStore);

    #[async_trait]
    impl ObjectStore for ReadOnlyStore {
        fn name(&self) -> &'static str {
            "read-only"
        }

        async fn get(&self, key: &str) -> pagecast_core::Result<StoredObject> {
            self.0.get(key).await
        }

        async fn put(&self, _key: &str, _data: Bytes, _ct: &str) -> pagecast_core::Result<()> {
            Err(Error::Storage("bucket is read-only".to_string()))
        }

        async fn list(
            &self,
            prefix: &str,
            limit: Option<usize>,
        ) -> pagecast_core::Result<Vec<ObjectSummary>> {
            self.0.list(prefix, limit).await
        }

        async fn delete(&self, key: &str) -> pagecast_core::Result<()> {
            self.0.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = build_output(dir.path());
        let sync = engine(Arc::new(ReadOnlyStore(MemoryObjectStore::new())), dir.path());

        let err = sync.upload(&id("demo"), &descriptor).await.unwrap_err();
        assert!(
            matches!(err, SyncError::Upload { key, message } if key.starts_with("demo/_static/") && message.contains("read-only"))
        );
    }
}

//! Filesystem-backed object store for local development.
//!
//! Each key is a file under the root directory, with `/` separating
//! directories. Keys are returned with `/` separators regardless of platform.

use async_trait::async_trait;
use bytes::Bytes;
use pagecast_core::{Error, ObjectStore, ObjectSummary, Result, StoredObject};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(Error::InvalidInput("empty object key".to_string()));
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::InvalidInput(format!(
                    "object key {:?} has an empty or relative segment",
                    key
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Deepest directory that can hold keys starting with `prefix`.
    fn list_root(&self, prefix: &str) -> PathBuf {
        match prefix.rfind('/') {
            Some(idx) => match self.path_for(&prefix[..idx]) {
                Ok(dir) => dir,
                Err(_) => self.root.clone(),
            },
            None => self.root.clone(),
        }
    }

    #[async_recursion::async_recursion]
    async fn collect(&self, dir: &Path, out: &mut Vec<ObjectSummary>) -> std::io::Result<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                self.collect(&path, out).await?;
            } else if file_type.is_file() {
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let size = entry.metadata().await?.len();
                out.push(ObjectSummary { key, size });
            }
        }
        Ok(())
    }
}

fn io_error(key: &str, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound(format!("object {}", key))
    } else {
        Error::Storage(format!("{}: {}", key, e))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<StoredObject> {
        let path = self.path_for(key)?;
        let data = tokio::fs::read(&path).await.map_err(|e| io_error(key, e))?;
        Ok(StoredObject {
            data: Bytes::from(data),
            content_type: None,
        })
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| io_error(key, e))?;
        debug!(key = %key, bytes = data.len(), "Stored object");
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        self.collect(&self.list_root(prefix), &mut objects)
            .await
            .map_err(|e| Error::Storage(format!("listing {}: {}", prefix, e)))?;

        objects.retain(|o| o.key.starts_with(prefix));
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(limit) = limit {
            objects.truncate(limit);
        }
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(key, e)),
        }

        // Prune directories left empty, stopping at the root.
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store
            .put("site/_static/css/app.css", Bytes::from_static(b"body{}"), "text/css")
            .await
            .unwrap();

        let object = store.get("site/_static/css/app.css").await.unwrap();
        assert_eq!(&object.data[..], b"body{}");
        assert!(dir.path().join("site/_static/css/app.css").is_file());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(store.get("missing/file").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        for key in ["../escape", "a/../../b", "", "a//b", "trailing/"] {
            let err = store.put(key, Bytes::new(), "text/plain").await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{:?}", key);
        }
    }

    #[tokio::test]
    async fn test_list_uses_forward_slashes_and_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        for key in ["abc/src/main.js", "abc/package.json", "abcd/package.json"] {
            store.put(key, Bytes::from_static(b"x"), "text/plain").await.unwrap();
        }

        let keys: Vec<_> = store
            .list("abc/", None)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["abc/package.json", "abc/src/main.js"]);

        let all = store.list("abc", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|o| o.size == 1));

        assert!(store.list("zzz/", None).await.unwrap().is_empty());
        assert_eq!(store.list("", Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store
            .put("job/_static/a/b.html", Bytes::new(), "text/html")
            .await
            .unwrap();

        store.delete("job/_static/a/b.html").await.unwrap();
        store.delete("job/_static/a/b.html").await.unwrap();

        assert!(!dir.path().join("job").exists());
        assert!(dir.path().exists());
    }
}

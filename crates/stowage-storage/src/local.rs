//! Filesystem-backed storage backend for local runs and development.
//!
//! [`LocalBackend`] implements the [`StorageBackend`] trait using the local
//! filesystem. Keys map to paths under the root directory; parent
//! directories are created on demand.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, instrument};

use stowage_core::error::StowError;
use stowage_core::storage::{BackendKind, StorageBackend};
use stowage_core::Result;

/// A [`StorageBackend`] backed by the local filesystem.
///
/// All keys are mapped to paths under the configured `base_dir`.
/// `chunk_size` arguments are accepted and ignored.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    base_dir: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await.map_err(|e| {
            StowError::storage(
                format!("Failed to create base directory: {}", base_dir.display()),
                e,
            )
        })?;
        debug!(base_dir = %base_dir.display(), "LocalBackend initialised");
        Ok(Self { base_dir })
    }

    /// Return the full filesystem path for a storage key.
    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    /// Return the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            StowError::storage(
                format!("Failed to create parent directories for {}", path.display()),
                e,
            )
        })?;
    }
    Ok(())
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.key_to_path(key);
        create_parent(&path).await?;
        fs::write(&path, &data)
            .await
            .map_err(|e| StowError::from_io(key, format!("Failed to write {}", path.display()), e))?;
        debug!("Put {} bytes to {}", data.len(), key);
        Ok(())
    }

    #[instrument(skip(self, _chunk_size), fields(key = %key, source = %source.display()))]
    async fn put_file(&self, key: &str, source: &Path, _chunk_size: Option<usize>) -> Result<()> {
        let path = self.key_to_path(key);
        create_parent(&path).await?;
        let copied = fs::copy(source, &path).await.map_err(|e| {
            StowError::from_io(
                key,
                format!("Failed to copy {} to {}", source.display(), path.display()),
                e,
            )
        })?;
        debug!("Put {} bytes from file to {}", copied, key);
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.key_to_path(key);
        let data = fs::read(&path)
            .await
            .map_err(|e| StowError::from_io(key, format!("Failed to read {}", path.display()), e))?;
        debug!("Get {} bytes from {}", data.len(), key);
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, _chunk_size), fields(key = %key, dest = %dest.display()))]
    async fn get_file(&self, key: &str, dest: &Path, _chunk_size: Option<usize>) -> Result<u64> {
        let path = self.key_to_path(key);
        create_parent(dest).await?;
        let copied = fs::copy(&path, dest).await.map_err(|e| {
            StowError::from_io(key, format!("Failed to copy {} out", path.display()), e)
        })?;
        debug!("Get {} bytes from {} into file", copied, key);
        Ok(copied)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.key_to_path(key);
        let exists = fs::try_exists(&path)
            .await
            .map_err(|e| StowError::from_io(key, format!("Failed to stat {}", path.display()), e))?;
        debug!("exists {} → {}", key, exists);
        Ok(exists && path.is_file())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Delete {}: already absent", key);
                Ok(())
            }
            Err(e) => Err(StowError::from_io(
                key,
                format!("Failed to delete {}", path.display()),
                e,
            )),
        }
    }

    #[instrument(skip(self), fields(prefix = %prefix))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = &self.base_dir;
        let mut results = Vec::new();
        list_recursive(base, base, prefix, &mut results).await?;
        results.sort();
        debug!("Listed {} keys with prefix '{}'", results.len(), prefix);
        Ok(results)
    }
}

/// Recursively list all files under `dir`, producing keys relative to `base`.
async fn list_recursive(
    base: &Path,
    dir: &Path,
    prefix: &str,
    results: &mut Vec<String>,
) -> Result<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(StowError::storage(
                format!("Failed to read directory {}", dir.display()),
                e,
            ))
        }
    };

    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        StowError::storage(
            format!("Failed to read directory entry in {}", dir.display()),
            e,
        )
    })? {
        let path = entry.path();
        if path.is_dir() {
            Box::pin(list_recursive(base, &path, prefix, results)).await?;
        } else {
            let relative = path.strip_prefix(base).map_err(|e| StowError::Internal {
                message: format!("Path prefix strip failed: {e}"),
            })?;
            // Keys always use forward slashes.
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                results.push(key);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_backend() -> (LocalBackend, TempDir) {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().join("root")).await.unwrap();
        (backend, tmp)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (backend, _tmp) = test_backend().await;
        backend
            .put("runs/2024/output", Bytes::from("hello"))
            .await
            .unwrap();
        let data = backend.get("runs/2024/output").await.unwrap();
        assert_eq!(data, Bytes::from("hello"));
        assert!(backend.base_dir().join("runs/2024/output").is_file());
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let (backend, _tmp) = test_backend().await;
        let result = backend.get("nonexistent").await;
        assert!(matches!(result, Err(StowError::NotFound { ref key }) if key == "nonexistent"));
    }

    #[tokio::test]
    async fn test_put_file_and_get_file() {
        let (backend, tmp) = test_backend().await;
        let source = tmp.path().join("source.bin");
        std::fs::write(&source, b"file body").unwrap();

        backend.put_file("a/b.bin", &source, Some(4)).await.unwrap();
        assert!(source.exists(), "put_file must not consume its source");

        let dest = tmp.path().join("out/dest.bin");
        let written = backend.get_file("a/b.bin", &dest, None).await.unwrap();
        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&dest).unwrap(), b"file body");
    }

    #[tokio::test]
    async fn test_get_file_not_found() {
        let (backend, tmp) = test_backend().await;
        let result = backend
            .get_file("missing", &tmp.path().join("dest"), None)
            .await;
        assert!(matches!(result, Err(StowError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list() {
        let (backend, _tmp) = test_backend().await;
        backend.put("prefix/a.txt", Bytes::from("a")).await.unwrap();
        backend.put("prefix/b.txt", Bytes::from("b")).await.unwrap();
        backend.put("other/c.txt", Bytes::from("c")).await.unwrap();

        let keys = backend.list("prefix/").await.unwrap();
        assert_eq!(keys, vec!["prefix/a.txt", "prefix/b.txt"]);

        let all = backend.list("").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (backend, _tmp) = test_backend().await;
        backend.put("to_delete.txt", Bytes::from("data")).await.unwrap();
        backend.delete("to_delete.txt").await.unwrap();
        backend.delete("to_delete.txt").await.unwrap();
        assert!(!backend.exists("to_delete.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists() {
        let (backend, _tmp) = test_backend().await;
        assert!(!backend.exists("missing").await.unwrap());
        backend.put("dir/present.txt", Bytes::from("data")).await.unwrap();
        assert!(backend.exists("dir/present.txt").await.unwrap());
        // A directory is not an object.
        assert!(!backend.exists("dir").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (backend, _tmp) = test_backend().await;
        backend.put("overwrite.txt", Bytes::from("v1")).await.unwrap();
        backend.put("overwrite.txt", Bytes::from("v2")).await.unwrap();
        let data = backend.get("overwrite.txt").await.unwrap();
        assert_eq!(data, Bytes::from("v2"));
    }
}

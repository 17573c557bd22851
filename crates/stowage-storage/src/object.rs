//! Shared `object_store` transport for the remote backends.
//!
//! S3, GCS and ADLS differ only in how their client is built. Once built,
//! every remote variant is an [`ObjectStoreBackend`] underneath, which maps
//! keys to object paths, classifies `object_store` errors into the
//! [`StowError`] taxonomy, and switches to multipart uploads when a chunk
//! size is given.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, PutPayload, RetryConfig, WriteMultipart};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use stowage_core::error::StowError;
use stowage_core::key::KEY_DELIMITER;
use stowage_core::storage::{BackendKind, StorageBackend};
use stowage_core::Result;

/// Buffer size for streamed downloads when no chunk size is given.
const DEFAULT_DOWNLOAD_BUFFER: usize = 8 * 1024 * 1024;

/// Number of multipart parts allowed in flight at once.
const MAX_CONCURRENT_PARTS: usize = 4;

/// HTTP client options shared by the remote builders.
pub(crate) fn client_options(request_timeout: Duration) -> ClientOptions {
    ClientOptions::new().with_timeout(request_timeout)
}

/// Client-level retries are off; [`stowage_core::RetryPolicy`] is the only
/// retry loop.
pub(crate) fn no_client_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 0,
        ..RetryConfig::default()
    }
}

/// Map an `object_store` error on `key` into a [`StowError`].
///
/// `Generic` carries everything the HTTP clients report, from 4xx responses
/// to dropped connections. Only the ones caused by a timeout, a connection
/// failure, a 5xx or a 429 become [`StowError::Transient`].
pub fn classify_error(key: &str, operation: &str, err: object_store::Error) -> StowError {
    let message = format!("{operation} failed for {key}");
    match err {
        object_store::Error::NotFound { .. } => StowError::NotFound {
            key: key.to_string(),
        },
        e @ (object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. }) => StowError::auth(message, e),
        e @ object_store::Error::Generic { .. } if has_transient_cause(&e) => {
            StowError::transient(message, e)
        }
        e => StowError::storage(message, e),
    }
}

/// Walk the source chain looking for a transport-level cause.
fn has_transient_cause(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            let retryable_status = e
                .status()
                .is_some_and(|s| s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS);
            if e.is_timeout() || e.is_connect() || retryable_status {
                return true;
            }
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            if is_transient_io(e.kind()) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        kind,
        TimedOut
            | Interrupted
            | ConnectionReset
            | ConnectionRefused
            | ConnectionAborted
            | BrokenPipe
            | UnexpectedEof
    )
}

/// A [`StorageBackend`] over any [`ObjectStore`] client.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    kind: BackendKind,
}

impl ObjectStoreBackend {
    /// Wrap an existing client.
    pub fn new(store: Arc<dyn ObjectStore>, kind: BackendKind) -> Self {
        Self { store, kind }
    }

    /// An in-process store. Used by tests and dry runs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), BackendKind::Memory)
    }

    /// The underlying client.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn path(&self, key: &str) -> Result<ObjectPath> {
        ObjectPath::parse(key).map_err(|e| StowError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn put_multipart(&self, key: &str, path: &ObjectPath, source: &Path, chunk_size: usize) -> Result<()> {
        let mut file = fs::File::open(source)
            .await
            .map_err(|e| StowError::from_io(key, format!("Failed to open {}", source.display()), e))?;

        let upload = self
            .store
            .put_multipart(path)
            .await
            .map_err(|e| classify_error(key, "multipart upload", e))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, chunk_size);

        let mut buf = vec![0u8; chunk_size];
        let mut total = 0usize;
        loop {
            let n = match file.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(StowError::from_io(
                        key,
                        format!("Failed to read {}", source.display()),
                        e,
                    ));
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await {
                let _ = writer.abort().await;
                return Err(classify_error(key, "multipart upload", e));
            }
            writer.write(&buf[..n]);
            total += n;
        }

        // Drain in-flight parts here; `finish` returns a part error without
        // aborting the upload.
        if let Err(e) = writer.wait_for_capacity(0).await {
            let _ = writer.abort().await;
            return Err(classify_error(key, "multipart upload", e));
        }
        writer
            .finish()
            .await
            .map_err(|e| classify_error(key, "multipart upload", e))?;
        debug!("Multipart put {} bytes to {} in parts of {}", total, key, chunk_size);
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    #[instrument(skip(self, data), fields(backend = %self.kind, key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path(key)?;
        let size = data.len();
        self.store
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|e| classify_error(key, "put", e))?;
        debug!("Put {} bytes to {}", size, key);
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.kind, key = %key))]
    async fn put_file(&self, key: &str, source: &Path, chunk_size: Option<usize>) -> Result<()> {
        let path = self.path(key)?;
        match chunk_size {
            Some(chunk_size) if chunk_size > 0 => {
                self.put_multipart(key, &path, source, chunk_size).await
            }
            _ => {
                let data = fs::read(source).await.map_err(|e| {
                    StowError::from_io(key, format!("Failed to read {}", source.display()), e)
                })?;
                self.put(key, Bytes::from(data)).await
            }
        }
    }

    #[instrument(skip(self), fields(backend = %self.kind, key = %key))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.path(key)?;
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| classify_error(key, "get", e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| classify_error(key, "get bytes", e))?;
        debug!("Get {} bytes from {}", bytes.len(), key);
        Ok(bytes)
    }

    #[instrument(skip(self), fields(backend = %self.kind, key = %key))]
    async fn get_file(&self, key: &str, dest: &Path, chunk_size: Option<usize>) -> Result<u64> {
        let path = self.path(key)?;
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| classify_error(key, "get", e))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StowError::storage(format!("Failed to create {}", parent.display()), e)
            })?;
        }
        let file = fs::File::create(dest)
            .await
            .map_err(|e| StowError::from_io(key, format!("Failed to create {}", dest.display()), e))?;
        let capacity = chunk_size.unwrap_or(DEFAULT_DOWNLOAD_BUFFER);
        let mut writer = BufWriter::with_capacity(capacity, file);

        let mut stream = result.into_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| classify_error(key, "download", e))?
        {
            writer.write_all(&chunk).await.map_err(|e| {
                StowError::from_io(key, format!("Failed to write {}", dest.display()), e)
            })?;
            written += chunk.len() as u64;
        }
        writer.flush().await.map_err(|e| {
            StowError::from_io(key, format!("Failed to flush {}", dest.display()), e)
        })?;

        debug!("Downloaded {} bytes from {} to {}", written, key, dest.display());
        Ok(written)
    }

    #[instrument(skip(self), fields(backend = %self.kind, key = %key))]
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(classify_error(key, "head", e)),
        }
    }

    #[instrument(skip(self), fields(backend = %self.kind, key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match self.store.delete(&path).await {
            Ok(()) => {
                debug!("Deleted {}", key);
                Ok(())
            }
            Err(object_store::Error::NotFound { .. }) => {
                debug!("Delete {}: already absent", key);
                Ok(())
            }
            Err(e) => Err(classify_error(key, "delete", e)),
        }
    }

    #[instrument(skip(self), fields(backend = %self.kind, prefix = %prefix))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Object store prefixes match whole segments; list the enclosing
        // folder and filter on the raw string prefix.
        let folder = match prefix.rfind(KEY_DELIMITER) {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let folder_path = if folder.is_empty() {
            None
        } else {
            Some(self.path(folder)?)
        };

        let mut results = Vec::new();
        let mut stream = self.store.list(folder_path.as_ref());
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| classify_error(prefix, "list", e))?
        {
            let key = meta.location.to_string();
            if key.starts_with(prefix) {
                results.push(key);
            }
        }

        results.sort();
        debug!("Listed {} keys with prefix '{}'", results.len(), prefix);
        Ok(results)
    }
}

/// Implement [`StorageBackend`] for a wrapper whose `inner` field is an
/// [`ObjectStoreBackend`].
macro_rules! delegate_backend {
    ($ty:ty) => {
        #[::async_trait::async_trait]
        impl ::stowage_core::storage::StorageBackend for $ty {
            fn kind(&self) -> ::stowage_core::storage::BackendKind {
                ::stowage_core::storage::StorageBackend::kind(&self.inner)
            }

            async fn put(&self, key: &str, data: ::bytes::Bytes) -> ::stowage_core::Result<()> {
                ::stowage_core::storage::StorageBackend::put(&self.inner, key, data).await
            }

            async fn put_file(
                &self,
                key: &str,
                path: &::std::path::Path,
                chunk_size: Option<usize>,
            ) -> ::stowage_core::Result<()> {
                ::stowage_core::storage::StorageBackend::put_file(&self.inner, key, path, chunk_size).await
            }

            async fn get(&self, key: &str) -> ::stowage_core::Result<::bytes::Bytes> {
                ::stowage_core::storage::StorageBackend::get(&self.inner, key).await
            }

            async fn get_file(
                &self,
                key: &str,
                dest: &::std::path::Path,
                chunk_size: Option<usize>,
            ) -> ::stowage_core::Result<u64> {
                ::stowage_core::storage::StorageBackend::get_file(&self.inner, key, dest, chunk_size).await
            }

            async fn exists(&self, key: &str) -> ::stowage_core::Result<bool> {
                ::stowage_core::storage::StorageBackend::exists(&self.inner, key).await
            }

            async fn delete(&self, key: &str) -> ::stowage_core::Result<()> {
                ::stowage_core::storage::StorageBackend::delete(&self.inner, key).await
            }

            async fn list(&self, prefix: &str) -> ::stowage_core::Result<Vec<String>> {
                ::stowage_core::storage::StorageBackend::list(&self.inner, prefix).await
            }
        }
    };
}

pub(crate) use delegate_backend;

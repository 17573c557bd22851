//! The storage facade: backend + codec + staging + retry.
//!
//! [`Storage`] is what targets talk to. It composes the blob key from the
//! parent folder, serializes the payload with the requested [`Format`],
//! stages it on local disk when the format calls for it, and runs every
//! backend call under the [`RetryPolicy`]. All backend variants therefore
//! share the same save/load semantics and differ only in transport.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info, instrument};

use stowage_core::codec::{self, Encoded};
use stowage_core::config::{default_staging_dir, StorageConfig};
use stowage_core::error::StowError;
use stowage_core::format::Format;
use stowage_core::key::{join_key, metadata_key, strip_parent, KEY_DELIMITER};
use stowage_core::retry::RetryPolicy;
use stowage_core::storage::{BackendKind, StorageBackend};
use stowage_core::value::{Metadata, Payload};
use stowage_core::Result;

use crate::factory::build_backend;
use crate::staging::{StagingArea, StagingFile};

/// Uniform save/load/exists/delete over one configured backend.
///
/// A `Storage` is built once per pipeline and shared by every target
/// through an `Arc`. Calls on different keys are independent; concurrent
/// saves of the same key are last-writer-wins.
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
    staging: StagingArea,
    retry: RetryPolicy,
    parent_folder: String,
    chunk_size: Option<usize>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend.kind())
            .field("staging", &self.staging)
            .field("retry", &self.retry)
            .field("parent_folder", &self.parent_folder)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl Storage {
    /// Wrap a backend with default settings: no parent folder, the
    /// default staging directory and the default retry policy.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            staging: StagingArea::new(default_staging_dir()),
            retry: RetryPolicy::default(),
            parent_folder: String::new(),
            chunk_size: None,
        }
    }

    /// Build the configured backend and wrap it.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let backend = build_backend(&config.backend, config.request_timeout).await?;
        info!(
            backend = %backend.kind(),
            parent_folder = %config.parent_folder,
            "Storage initialised"
        );
        Ok(Self {
            backend,
            staging: StagingArea::new(&config.staging_dir),
            retry: config.retry.clone(),
            parent_folder: config.parent_folder.clone(),
            chunk_size: config.chunk_size,
        })
    }

    /// Prefix every key with `parent_folder`.
    pub fn with_parent_folder(mut self, parent_folder: impl Into<String>) -> Self {
        self.parent_folder = parent_folder.into();
        self
    }

    /// Stage downloads and uploads under `staging_dir`.
    pub fn with_staging_dir(mut self, staging_dir: impl AsRef<Path>) -> Self {
        self.staging = StagingArea::new(staging_dir.as_ref());
        self
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Default multipart chunk size for uploads and downloads.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// The wrapped transport.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Which backend variant this storage talks to.
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Folder prepended to every key; empty when unset.
    pub fn parent_folder(&self) -> &str {
        &self.parent_folder
    }

    /// The local staging area.
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// The full blob key for a caller key.
    pub fn full_key(&self, key: &str) -> Result<String> {
        join_key(&self.parent_folder, key)
    }

    /// Serialize `payload` with `format` and upload it under `key`.
    ///
    /// Overwrites any existing blob. A payload that does not fit the
    /// format fails with `TypeMismatch` before anything is written.
    #[instrument(skip(self, payload), fields(backend = %self.kind(), key = %key, format = %format))]
    pub async fn save(
        &self,
        key: &str,
        payload: &Payload,
        format: Format,
        chunk_size: Option<usize>,
    ) -> Result<()> {
        let full = self.full_key(key)?;
        let encoded = codec::encode(payload, format)?;
        let chunk_size = chunk_size.or(self.chunk_size);

        match encoded {
            Encoded::File(source) => {
                self.retry
                    .run("save", || self.backend.put_file(&full, &source, chunk_size))
                    .await?;
            }
            Encoded::Buffer(bytes) if format.uses_staging() => {
                let staged = self.stage(&full, &bytes).await?;
                self.retry
                    .run("save", || self.backend.put_file(&full, staged.path(), chunk_size))
                    .await?;
            }
            Encoded::Buffer(bytes) => {
                self.retry
                    .run("save", || self.backend.put(&full, bytes.clone()))
                    .await?;
            }
        }

        debug!("Saved {} as {}", full, format);
        Ok(())
    }

    /// Download `key` and deserialize it with `format`.
    ///
    /// `columns` projects tabular results. A `file` load returns the path
    /// of a local copy that now belongs to the caller.
    #[instrument(skip(self, columns), fields(backend = %self.kind(), key = %key, format = %format))]
    pub async fn load(
        &self,
        key: &str,
        format: Format,
        columns: Option<&[String]>,
        chunk_size: Option<usize>,
    ) -> Result<Payload> {
        let full = self.full_key(key)?;
        let chunk_size = chunk_size.or(self.chunk_size);

        let payload = match format {
            Format::File => {
                let staged = self.download(&full, chunk_size).await?;
                Payload::File(staged.keep())
            }
            Format::Pickle | Format::Parquet => {
                let staged = self.download(&full, chunk_size).await?;
                let data = fs::read(staged.path()).await.map_err(|e| {
                    StowError::from_io(&full, format!("Failed to read {}", staged.path().display()), e)
                })?;
                codec::decode(Bytes::from(data), format, columns)?
            }
            Format::Joblib | Format::Json => {
                let data = self.retry.run("load", || self.backend.get(&full)).await?;
                codec::decode(data, format, columns)?
            }
        };

        debug!("Loaded {} as {}", full, format);
        Ok(payload)
    }

    /// Whether a blob exists under `key`. Absence is `Ok(false)`.
    #[instrument(skip(self), fields(backend = %self.kind(), key = %key))]
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key)?;
        self.retry.run("exists", || self.backend.exists(&full)).await
    }

    /// Delete the blob under `key` and every local staging file of it.
    ///
    /// Deleting an absent key succeeds.
    #[instrument(skip(self), fields(backend = %self.kind(), key = %key))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let full = self.full_key(key)?;
        self.retry.run("delete", || self.backend.delete(&full)).await?;
        self.staging.purge(&full).await?;
        debug!("Deleted {}", full);
        Ok(())
    }

    /// List keys under `prefix`, relative to the parent folder.
    #[instrument(skip(self), fields(backend = %self.kind(), prefix = %prefix))]
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = match (self.parent_folder.is_empty(), prefix.is_empty()) {
            (true, _) => prefix.to_string(),
            (false, true) => format!("{}{KEY_DELIMITER}", self.parent_folder),
            (false, false) => format!("{}{KEY_DELIMITER}{prefix}", self.parent_folder),
        };
        let keys = self
            .retry
            .run("list", || self.backend.list(&full_prefix))
            .await?;
        Ok(keys
            .iter()
            .filter_map(|key| strip_parent(&self.parent_folder, key))
            .map(str::to_string)
            .collect())
    }

    /// Write the metadata record that belongs to `key`.
    #[instrument(skip(self, metadata), fields(backend = %self.kind(), key = %key))]
    pub async fn save_metadata(&self, key: &str, metadata: &Metadata) -> Result<()> {
        let meta_key = metadata_key(&self.full_key(key)?);
        let bytes = codec::encode_metadata(metadata)?;
        self.retry
            .run("save_metadata", || self.backend.put(&meta_key, bytes.clone()))
            .await
    }

    /// Read the metadata record that belongs to `key`.
    #[instrument(skip(self), fields(backend = %self.kind(), key = %key))]
    pub async fn load_metadata(&self, key: &str) -> Result<Metadata> {
        let meta_key = metadata_key(&self.full_key(key)?);
        let bytes = self
            .retry
            .run("load_metadata", || self.backend.get(&meta_key))
            .await?;
        codec::decode_metadata(bytes).map_err(|e| StowError::Codec {
            message: format!("Invalid metadata record {meta_key}: {e}"),
            source: Some(Box::new(e)),
        })
    }

    /// Delete the metadata record that belongs to `key`.
    #[instrument(skip(self), fields(backend = %self.kind(), key = %key))]
    pub async fn delete_metadata(&self, key: &str) -> Result<()> {
        let meta_key = metadata_key(&self.full_key(key)?);
        self.retry
            .run("delete_metadata", || self.backend.delete(&meta_key))
            .await
    }

    /// Write `bytes` to a fresh staging file for `full`.
    async fn stage(&self, full: &str, bytes: &Bytes) -> Result<StagingFile> {
        let staged = self.staging.reserve(full).await?;
        fs::write(staged.path(), bytes).await.map_err(|e| {
            StowError::storage(
                format!("Failed to write staging file {}", staged.path().display()),
                e,
            )
        })?;
        Ok(staged)
    }

    /// Download `full` into a fresh staging file.
    async fn download(&self, full: &str, chunk_size: Option<usize>) -> Result<StagingFile> {
        let staged = self.staging.reserve(full).await?;
        self.retry
            .run("load", || self.backend.get_file(full, staged.path(), chunk_size))
            .await?;
        Ok(staged)
    }
}

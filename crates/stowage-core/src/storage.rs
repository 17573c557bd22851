//! The StorageBackend trait: the transport interface every backend implements.
//!
//! A backend moves bytes and files to and from one blob namespace. It knows
//! nothing about formats, parent folders or staging; the `Storage` facade in
//! `stowage-storage` layers those on top, so all variants behave alike.
//! Implementations include the local filesystem and the S3, GCS and ADLS
//! object stores.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Which transport a backend uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local filesystem.
    Local,
    /// Amazon S3 or an S3-compatible endpoint.
    S3,
    /// Google Cloud Storage.
    Gcs,
    /// Azure Data Lake Storage / Blob Storage.
    Adls,
    /// In-process memory, for tests.
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Local => "local",
            BackendKind::S3 => "s3",
            BackendKind::Gcs => "gcs",
            BackendKind::Adls => "adls",
            BackendKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// The transport interface shared by all storage backends.
///
/// Keys are full, validated blob keys. Implementations must be
/// `Send + Sync`: one backend instance is shared by every target of a
/// pipeline and may be called concurrently for different keys.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The transport this backend uses.
    fn kind(&self) -> BackendKind;

    /// Write an object. Overwrites if it already exists.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Upload a local file. Overwrites if the object already exists.
    ///
    /// Remote backends switch to a multipart upload with parts of
    /// `chunk_size` bytes when it is given; the local backend ignores it.
    async fn put_file(&self, key: &str, path: &Path, chunk_size: Option<usize>) -> Result<()>;

    /// Read an object. Returns [`StowError::NotFound`](crate::StowError::NotFound)
    /// if the key does not exist.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Download an object into `dest`, returning the number of bytes written.
    async fn get_file(&self, key: &str, dest: &Path, chunk_size: Option<usize>) -> Result<u64>;

    /// Check if an object exists. Absence is `Ok(false)`, never an error.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete an object. Does not error if the key does not exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all object keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

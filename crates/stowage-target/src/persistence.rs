//! Where an artifact's bytes live.
//!
//! [`Artifact`] is the shared core of every concrete target. At
//! construction the [`TargetContext`] picks one [`Persistence`]: the remote
//! [`Storage`] when one is configured, the local filesystem otherwise.
//! Target variants only ever talk to the artifact, so none of them branch
//! on where data is stored.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, instrument};

use stowage_core::codec::{self, Encoded};
use stowage_core::error::StowError;
use stowage_core::format::Format;
use stowage_core::key::METADATA_SUFFIX;
use stowage_core::value::{Metadata, Payload};
use stowage_core::Result;
use stowage_storage::Storage;

use crate::context::{TargetContext, TaskIdentity};

/// Save/load/exists/remove for one artifact and its metadata record.
#[async_trait]
pub(crate) trait Persistence: fmt::Debug + Send + Sync {
    /// Human-readable location for logs and errors.
    fn location(&self) -> String;

    fn is_remote(&self) -> bool;

    async fn exists(&self) -> Result<bool>;

    async fn save(&self, payload: &Payload, format: Format) -> Result<()>;

    async fn load(&self, format: Format, columns: Option<&[String]>) -> Result<Payload>;

    async fn remove(&self) -> Result<()>;

    async fn save_metadata(&self, metadata: &Metadata) -> Result<()>;

    async fn load_metadata(&self) -> Result<Metadata>;

    async fn remove_metadata(&self) -> Result<()>;
}

/// Plain files under the context's target directory.
#[derive(Debug)]
pub(crate) struct LocalPersistence {
    path: PathBuf,
    metadata_path: PathBuf,
}

impl LocalPersistence {
    pub(crate) fn new(path: PathBuf) -> Self {
        let mut metadata_path = path.clone().into_os_string();
        metadata_path.push(METADATA_SUFFIX);
        Self {
            path,
            metadata_path: PathBuf::from(metadata_path),
        }
    }
}

async fn write_local(path: &Path, data: &[u8]) -> Result<()> {
    let key = path.display().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StowError::from_io(&key, format!("Failed to create {}", parent.display()), e))?;
    }
    fs::write(path, data)
        .await
        .map_err(|e| StowError::from_io(&key, format!("Failed to write {key}"), e))
}

async fn read_local(path: &Path) -> Result<Bytes> {
    let key = path.display().to_string();
    let data = fs::read(path)
        .await
        .map_err(|e| StowError::from_io(&key, format!("Failed to read {key}"), e))?;
    Ok(Bytes::from(data))
}

async fn remove_local(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            let key = path.display().to_string();
            Err(StowError::from_io(&key, format!("Failed to remove {key}"), e))
        }
    }
}

#[async_trait]
impl Persistence for LocalPersistence {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn exists(&self) -> Result<bool> {
        let key = self.location();
        let found = fs::try_exists(&self.path)
            .await
            .map_err(|e| StowError::from_io(&key, format!("Failed to stat {key}"), e))?;
        Ok(found && self.path.is_file())
    }

    async fn save(&self, payload: &Payload, format: Format) -> Result<()> {
        match codec::encode(payload, format)? {
            Encoded::Buffer(bytes) => write_local(&self.path, &bytes).await,
            Encoded::File(source) if source == self.path => Ok(()),
            Encoded::File(source) => {
                let key = self.location();
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent).await.map_err(|e| {
                        StowError::from_io(&key, format!("Failed to create {}", parent.display()), e)
                    })?;
                }
                fs::copy(&source, &self.path).await.map_err(|e| {
                    StowError::from_io(
                        &source.display().to_string(),
                        format!("Failed to copy {} to {key}", source.display()),
                        e,
                    )
                })?;
                Ok(())
            }
        }
    }

    async fn load(&self, format: Format, columns: Option<&[String]>) -> Result<Payload> {
        if format == Format::File {
            return if self.exists().await? {
                Ok(Payload::File(self.path.clone()))
            } else {
                Err(StowError::NotFound {
                    key: self.location(),
                })
            };
        }
        let data = read_local(&self.path).await?;
        codec::decode(data, format, columns)
    }

    async fn remove(&self) -> Result<()> {
        remove_local(&self.path).await
    }

    async fn save_metadata(&self, metadata: &Metadata) -> Result<()> {
        let bytes = codec::encode_metadata(metadata)?;
        write_local(&self.metadata_path, &bytes).await
    }

    async fn load_metadata(&self) -> Result<Metadata> {
        let data = read_local(&self.metadata_path).await?;
        codec::decode_metadata(data)
    }

    async fn remove_metadata(&self) -> Result<()> {
        remove_local(&self.metadata_path).await
    }
}

/// A key in the configured [`Storage`].
#[derive(Debug)]
pub(crate) struct RemotePersistence {
    storage: Arc<Storage>,
    key: String,
}

impl RemotePersistence {
    pub(crate) fn new(storage: Arc<Storage>, key: String) -> Self {
        Self { storage, key }
    }
}

#[async_trait]
impl Persistence for RemotePersistence {
    fn location(&self) -> String {
        format!("{}:{}", self.storage.kind(), self.key)
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn exists(&self) -> Result<bool> {
        self.storage.exists(&self.key).await
    }

    async fn save(&self, payload: &Payload, format: Format) -> Result<()> {
        self.storage.save(&self.key, payload, format, None).await
    }

    async fn load(&self, format: Format, columns: Option<&[String]>) -> Result<Payload> {
        self.storage.load(&self.key, format, columns, None).await
    }

    async fn remove(&self) -> Result<()> {
        self.storage.delete(&self.key).await
    }

    async fn save_metadata(&self, metadata: &Metadata) -> Result<()> {
        self.storage.save_metadata(&self.key, metadata).await
    }

    async fn load_metadata(&self) -> Result<Metadata> {
        self.storage.load_metadata(&self.key).await
    }

    async fn remove_metadata(&self) -> Result<()> {
        self.storage.delete_metadata(&self.key).await
    }
}

/// One persisted task output: its local path, its remote key, and the
/// persistence chosen for it.
#[derive(Debug, Clone)]
pub struct Artifact {
    local_path: PathBuf,
    persistence: Arc<dyn Persistence>,
}

impl Artifact {
    /// Place the output of `identity` with extension `ext`.
    pub fn new(context: &TargetContext, identity: &TaskIdentity, ext: &str) -> Self {
        let local_path = context.local_path(identity, ext);
        let persistence: Arc<dyn Persistence> = match context.storage() {
            Some(storage) => Arc::new(RemotePersistence::new(
                Arc::clone(storage),
                identity.relative_path(ext),
            )),
            None => Arc::new(LocalPersistence::new(local_path.clone())),
        };
        Self {
            local_path,
            persistence,
        }
    }

    /// An artifact at an explicit local path. Always persisted locally.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        let local_path = path.into();
        Self {
            persistence: Arc::new(LocalPersistence::new(local_path.clone())),
            local_path,
        }
    }

    /// The local path, used directly by local persistence and as scratch
    /// space by targets that write a file before uploading it.
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Whether the artifact lives behind a `Storage`.
    pub fn is_remote(&self) -> bool {
        self.persistence.is_remote()
    }

    /// Local path or remote key, for log messages.
    pub fn location(&self) -> String {
        self.persistence.location()
    }

    pub async fn exists(&self) -> Result<bool> {
        self.persistence.exists().await
    }

    #[instrument(skip(self, payload), fields(location = %self.location()))]
    pub async fn save(&self, payload: &Payload, format: Format) -> Result<()> {
        self.persistence.save(payload, format).await?;
        debug!("Dumped {} artifact", format);
        Ok(())
    }

    #[instrument(skip(self, columns), fields(location = %self.location()))]
    pub async fn load(&self, format: Format, columns: Option<&[String]>) -> Result<Payload> {
        let payload = self.persistence.load(format, columns).await?;
        debug!("Loaded {} artifact", format);
        Ok(payload)
    }

    #[instrument(skip(self), fields(location = %self.location()))]
    pub async fn remove(&self) -> Result<()> {
        self.persistence.remove().await
    }

    /// Write the `.metadata` sibling.
    pub async fn save_metadata(&self, metadata: &Metadata) -> Result<()> {
        self.persistence.save_metadata(metadata).await
    }

    pub async fn load_metadata(&self) -> Result<Metadata> {
        self.persistence.load_metadata().await
    }

    pub async fn remove_metadata(&self) -> Result<()> {
        self.persistence.remove_metadata().await
    }
}

//! Targets whose value is a local file.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use stowage_core::error::StowError;
use stowage_core::format::Format;
use stowage_core::value::{Metadata, Payload};
use stowage_core::Result;

use crate::context::{TargetContext, TaskIdentity};
use crate::persistence::Artifact;
use crate::target::Target;

/// A task output that is a file on disk.
///
/// `dump` takes the path of a file the task wrote and moves it into the
/// target: it is uploaded (or copied into place) and then removed. `load`
/// returns the path of a local copy. A copy downloaded from remote storage
/// is not removed automatically; it goes away with the next `remove`.
#[derive(Debug, Clone)]
pub struct FileTarget {
    artifact: Artifact,
}

impl FileTarget {
    pub const EXTENSION: &'static str = "file";

    /// The target of task `identity` under `context`.
    pub fn new(context: &TargetContext, identity: &TaskIdentity) -> Self {
        Self {
            artifact: Artifact::new(context, identity, Self::EXTENSION),
        }
    }

    /// A local-only target at an explicit path.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            artifact: Artifact::at_path(path),
        }
    }

    /// Where the file lives.
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }
}

#[async_trait]
impl Target for FileTarget {
    type Value = PathBuf;

    async fn exists(&self) -> Result<bool> {
        self.artifact.exists().await
    }

    async fn load(&self) -> Result<PathBuf> {
        self.artifact.load(Format::File, None).await?.into_file()
    }

    async fn dump(&self, source: PathBuf) -> Result<()> {
        self.artifact
            .save(&Payload::File(source.clone()), Format::File)
            .await?;
        if self.artifact.is_remote() || source != self.artifact.local_path() {
            fs::remove_file(&source).await.map_err(|e| {
                StowError::storage(format!("Failed to remove {}", source.display()), e)
            })?;
            debug!(source = %source.display(), "Removed dumped source file");
        }
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.artifact.remove().await
    }

    async fn dump_metadata(&self, metadata: &Metadata) -> Result<()> {
        self.artifact.save_metadata(metadata).await
    }

    async fn load_metadata(&self) -> Result<Metadata> {
        self.artifact.load_metadata().await
    }

    async fn remove_metadata(&self) -> Result<()> {
        self.artifact.remove_metadata().await
    }
}

//! Targets holding arbitrary objects or tables in the binary object codec.

use std::path::PathBuf;

use async_trait::async_trait;

use stowage_core::format::Format;
use stowage_core::value::{Metadata, Payload};
use stowage_core::Result;

use crate::context::{TargetContext, TaskIdentity};
use crate::persistence::Artifact;
use crate::target::Target;

/// A task output stored with the `joblib` codec, locally and remotely.
///
/// Accepts object and table payloads; a file payload is a `TypeMismatch`.
#[derive(Debug, Clone)]
pub struct PickleTarget {
    artifact: Artifact,
}

impl PickleTarget {
    pub const EXTENSION: &'static str = "pkl";

    /// A `.pkl` target for task `identity`.
    pub fn new(context: &TargetContext, identity: &TaskIdentity) -> Self {
        Self {
            artifact: Artifact::new(context, identity, Self::EXTENSION),
        }
    }

    /// A local target at `path` instead of the derived location.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            artifact: Artifact::at_path(path),
        }
    }

    /// The backing artifact.
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }
}

#[async_trait]
impl Target for PickleTarget {
    type Value = Payload;

    async fn exists(&self) -> Result<bool> {
        self.artifact.exists().await
    }

    async fn load(&self) -> Result<Payload> {
        self.artifact.load(Format::Joblib, None).await
    }

    async fn dump(&self, value: Payload) -> Result<()> {
        self.artifact.save(&value, Format::Joblib).await
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

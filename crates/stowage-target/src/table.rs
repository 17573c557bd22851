//! Tabular targets: Parquet and line-delimited JSON.

use std::path::PathBuf;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;

use stowage_core::format::Format;
use stowage_core::value::{Metadata, Payload};
use stowage_core::Result;

use crate::context::{TargetContext, TaskIdentity};
use crate::persistence::Artifact;
use crate::target::Target;

/// A table stored as Parquet.
#[derive(Debug, Clone)]
pub struct ParquetTarget {
    artifact: Artifact,
}

impl ParquetTarget {
    pub const EXTENSION: &'static str = "parquet";

    /// A table target for task `identity`.
    pub fn new(context: &TargetContext, identity: &TaskIdentity) -> Self {
        Self {
            artifact: Artifact::new(context, identity, Self::EXTENSION),
        }
    }

    /// A local table target at `path`.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            artifact: Artifact::at_path(path),
        }
    }

    /// The backing artifact.
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Load only `columns`, in that order. Unknown columns are a `Schema`
    /// error.
    pub async fn load_columns(&self, columns: &[String]) -> Result<RecordBatch> {
        self.artifact
            .load(Format::Parquet, Some(columns))
            .await?
            .into_table()
    }
}

#[async_trait]
impl Target for ParquetTarget {
    type Value = RecordBatch;

    async fn exists(&self) -> Result<bool> {
        self.artifact.exists().await
    }

    async fn load(&self) -> Result<RecordBatch> {
        self.artifact.load(Format::Parquet, None).await?.into_table()
    }

    async fn dump(&self, value: RecordBatch) -> Result<()> {
        self.artifact
            .save(&Payload::Table(value), Format::Parquet)
            .await
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

/// A table stored as line-delimited JSON records.
///
/// Column types are re-inferred on load.
#[derive(Debug, Clone)]
pub struct JsonTarget {
    artifact: Artifact,
}

impl JsonTarget {
    pub const EXTENSION: &'static str = "json";

    /// A table target for task `identity`.
    pub fn new(context: &TargetContext, identity: &TaskIdentity) -> Self {
        Self {
            artifact: Artifact::new(context, identity, Self::EXTENSION),
        }
    }

    /// A local table target at `path`.
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
impl Target for JsonTarget {
    type Value = RecordBatch;

    async fn exists(&self) -> Result<bool> {
        self.artifact.exists().await
    }

    async fn load(&self) -> Result<RecordBatch> {
        self.artifact.load(Format::Json, None).await?.into_table()
    }

    async fn dump(&self, value: RecordBatch) -> Result<()> {
        self.artifact.save(&Payload::Table(value), Format::Json).await
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

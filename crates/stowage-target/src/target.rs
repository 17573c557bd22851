//! The Target trait: the contract between the orchestrator and storage.

use async_trait::async_trait;

use stowage_core::value::Metadata;
use stowage_core::Result;

/// A task output the orchestrator can check, read, write and discard.
///
/// The metadata record is a separate sibling of the artifact: dumping,
/// loading or removing one never touches the other.
#[async_trait]
pub trait Target: Send + Sync {
    /// What `load` returns and `dump` accepts.
    type Value: Send;

    /// Whether the output has been produced.
    async fn exists(&self) -> Result<bool>;

    /// Whether the producing task can be considered done.
    async fn complete(&self) -> Result<bool> {
        self.exists().await
    }

    /// Read the output back. `NotFound` when it was never dumped.
    async fn load(&self) -> Result<Self::Value>;

    /// Persist `value`, replacing any previous output.
    async fn dump(&self, value: Self::Value) -> Result<()>;

    /// Delete the output. Succeeds when it is already absent.
    async fn remove(&self) -> Result<()>;

    /// Write the metadata record next to the output.
    async fn dump_metadata(&self, metadata: &Metadata) -> Result<()>;

    async fn load_metadata(&self) -> Result<Metadata>;

    async fn remove_metadata(&self) -> Result<()>;
}

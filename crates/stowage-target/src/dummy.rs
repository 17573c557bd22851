//! A null target with a fixed value.

use async_trait::async_trait;

use stowage_core::value::Metadata;
use stowage_core::Result;

use crate::target::Target;

/// Always exists and always loads the value it was built with.
///
/// Dump, remove and the metadata operations do nothing; loading metadata
/// returns an empty record. Useful for wiring a fixed input into a
/// pipeline without persisting anything.
#[derive(Debug, Clone, Default)]
pub struct DummyTarget<T> {
    fixed_output: T,
}

impl<T> DummyTarget<T> {
    /// A target that always exists and loads `fixed_output`.
    pub fn new(fixed_output: T) -> Self {
        Self { fixed_output }
    }
}

#[async_trait]
impl<T> Target for DummyTarget<T>
where
    T: Clone + Send + Sync,
{
    type Value = T;

    async fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    async fn load(&self) -> Result<T> {
        Ok(self.fixed_output.clone())
    }

    async fn dump(&self, _value: T) -> Result<()> {
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        Ok(())
    }

    async fn dump_metadata(&self, _metadata: &Metadata) -> Result<()> {
        Ok(())
    }

    async fn load_metadata(&self) -> Result<Metadata> {
        Ok(Metadata::new())
    }

    async fn remove_metadata(&self) -> Result<()> {
        Ok(())
    }
}

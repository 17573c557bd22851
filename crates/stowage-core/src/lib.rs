//! Stowage core types, codecs, configuration, and errors.
//!
//! This crate provides the foundational building blocks shared by every
//! storage backend and target: the [`Value`] and [`Payload`] data model,
//! the closed [`Format`] set with its codecs, blob key rules, the
//! [`StorageBackend`] transport trait, the [`RetryPolicy`], storage
//! configuration, and the unified error type.

pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod key;
pub mod retry;
pub mod storage;
pub mod value;

pub use config::{BackendConfig, StorageConfig};
pub use error::StowError;
pub use format::Format;
pub use retry::RetryPolicy;
pub use storage::{BackendKind, StorageBackend};
pub use value::{Metadata, Payload, Value};

/// Convenience Result type using [`StowError`].
pub type Result<T> = std::result::Result<T, StowError>;

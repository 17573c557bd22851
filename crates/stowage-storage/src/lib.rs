//! Storage backend implementations for stowage.
//!
//! This crate provides concrete implementations of the
//! [`StorageBackend`](stowage_core::StorageBackend) trait:
//!
//! - [`LocalBackend`]: filesystem-backed storage for local runs and development
//! - [`S3Backend`], [`GcsBackend`], [`AdlsBackend`]: cloud object stores,
//!   all running on the shared [`ObjectStoreBackend`] transport
//!
//! and the [`Storage`] facade that adds key composition, format codecs,
//! staging files and retries on top of any of them.

pub mod adls;
pub mod factory;
pub mod gcs;
pub mod local;
pub mod object;
pub mod s3;
pub mod staging;
pub mod storage;

pub use adls::AdlsBackend;
pub use factory::build_backend;
pub use gcs::GcsBackend;
pub use local::LocalBackend;
pub use object::ObjectStoreBackend;
pub use s3::S3Backend;
pub use storage::Storage;

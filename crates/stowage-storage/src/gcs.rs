//! Google Cloud Storage backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use object_store::gcp::GoogleCloudStorageBuilder;
use tracing::debug;

use stowage_core::error::StowError;
use stowage_core::storage::BackendKind;
use stowage_core::Result;

use crate::object::{client_options, delegate_backend, no_client_retry, ObjectStoreBackend};

/// A storage backend backed by a GCS bucket.
///
/// Without a service account path the client falls back to
/// `GOOGLE_SERVICE_ACCOUNT` / `GOOGLE_APPLICATION_CREDENTIALS` and then to
/// application default credentials.
#[derive(Debug, Clone)]
pub struct GcsBackend {
    inner: ObjectStoreBackend,
    bucket: String,
}

impl GcsBackend {
    /// Build the GCS client for `bucket`.
    pub fn new(
        bucket: &str,
        service_account_path: Option<&PathBuf>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .with_client_options(client_options(request_timeout))
            .with_retry(no_client_retry());

        if let Some(path) = service_account_path {
            builder = builder.with_service_account_path(path.to_string_lossy());
        }

        let store = builder.build().map_err(|e| {
            StowError::storage(format!("Failed to create GCS client for bucket {bucket}"), e)
        })?;

        debug!(bucket = %bucket, "GcsBackend initialised");

        Ok(Self {
            inner: ObjectStoreBackend::new(Arc::new(store), BackendKind::Gcs),
            bucket: bucket.to_string(),
        })
    }

    /// The bucket this backend writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

delegate_backend!(GcsBackend);

//! Azure Data Lake Storage Gen2 / Blob Storage backend.

use std::sync::Arc;
use std::time::Duration;

use object_store::azure::MicrosoftAzureBuilder;
use tracing::debug;

use stowage_core::config::Secret;
use stowage_core::error::StowError;
use stowage_core::storage::BackendKind;
use stowage_core::Result;

use crate::object::{client_options, delegate_backend, no_client_retry, ObjectStoreBackend};

/// Connection settings for [`AdlsBackend`].
///
/// Unset fields fall back to `AZURE_STORAGE_ACCOUNT_NAME`,
/// `AZURE_STORAGE_ACCOUNT_KEY` and the other `AZURE_*` variables.
#[derive(Debug, Clone, Default)]
pub struct AdlsOptions {
    /// Storage account name.
    pub account: Option<String>,
    /// Container (ADLS file system) name.
    pub container: String,
    /// Shared account key.
    pub access_key: Option<Secret>,
    /// OAuth bearer token, used instead of a key.
    pub bearer_token: Option<Secret>,
}

/// A storage backend backed by an Azure storage container.
#[derive(Debug, Clone)]
pub struct AdlsBackend {
    inner: ObjectStoreBackend,
    container: String,
}

impl AdlsBackend {
    /// Build the Azure client.
    pub fn new(options: AdlsOptions, request_timeout: Duration) -> Result<Self> {
        let mut builder = MicrosoftAzureBuilder::from_env()
            .with_container_name(&options.container)
            .with_client_options(client_options(request_timeout))
            .with_retry(no_client_retry());

        if let Some(account) = &options.account {
            builder = builder.with_account(account);
        }
        if let Some(key) = &options.access_key {
            builder = builder.with_access_key(key.expose());
        }
        if let Some(token) = &options.bearer_token {
            builder = builder.with_bearer_token_authorization(token.expose());
        }

        let store = builder.build().map_err(|e| {
            StowError::storage(
                format!("Failed to create Azure client for container {}", options.container),
                e,
            )
        })?;

        debug!(container = %options.container, "AdlsBackend initialised");

        Ok(Self {
            inner: ObjectStoreBackend::new(Arc::new(store), BackendKind::Adls),
            container: options.container,
        })
    }

    /// The container this backend writes to.
    pub fn container(&self) -> &str {
        &self.container
    }
}

delegate_backend!(AdlsBackend);

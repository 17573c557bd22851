//! Build a backend from configuration.

use std::sync::Arc;
use std::time::Duration;

use stowage_core::config::BackendConfig;
use stowage_core::storage::StorageBackend;
use stowage_core::Result;

use crate::adls::{AdlsBackend, AdlsOptions};
use crate::gcs::GcsBackend;
use crate::local::LocalBackend;
use crate::s3::{S3Backend, S3Options};

/// Construct the backend selected by `config`.
pub async fn build_backend(
    config: &BackendConfig,
    request_timeout: Duration,
) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config {
        BackendConfig::Local { root } => Arc::new(LocalBackend::new(root).await?),
        BackendConfig::S3 {
            bucket,
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            session_token,
            allow_http,
        } => {
            let options = S3Options {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: session_token.clone(),
                allow_http: *allow_http,
            };
            Arc::new(S3Backend::new(options, request_timeout)?)
        }
        BackendConfig::Gcs {
            bucket,
            service_account_path,
        } => Arc::new(GcsBackend::new(
            bucket,
            service_account_path.as_ref(),
            request_timeout,
        )?),
        BackendConfig::Adls {
            account,
            container,
            access_key,
            bearer_token,
        } => {
            let options = AdlsOptions {
                account: account.clone(),
                container: container.clone(),
                access_key: access_key.clone(),
                bearer_token: bearer_token.clone(),
            };
            Arc::new(AdlsBackend::new(options, request_timeout)?)
        }
    };
    Ok(backend)
}

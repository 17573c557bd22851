//! S3-compatible object storage backend.
//!
//! [`S3Backend`] implements the [`StorageBackend`](stowage_core::StorageBackend)
//! trait over the `object_store` AmazonS3 client, supporting any
//! S3-compatible endpoint: AWS S3, MinIO, Ceph, etc.

use std::sync::Arc;
use std::time::Duration;

use object_store::aws::AmazonS3Builder;
use tracing::debug;

use stowage_core::config::Secret;
use stowage_core::error::StowError;
use stowage_core::storage::BackendKind;
use stowage_core::Result;

use crate::object::{client_options, delegate_backend, no_client_retry, ObjectStoreBackend};

/// Connection settings for [`S3Backend`].
///
/// Unset fields fall back to `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
/// `AWS_SESSION_TOKEN`, `AWS_REGION` and `AWS_ENDPOINT`.
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    /// Bucket name.
    pub bucket: String,
    /// AWS region, e.g. `eu-west-1`.
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<Secret>,
    /// Session token for temporary credentials.
    pub session_token: Option<Secret>,
    /// Allow plain `http://` endpoints.
    pub allow_http: bool,
}

/// A storage backend backed by any S3-compatible object storage.
#[derive(Debug, Clone)]
pub struct S3Backend {
    inner: ObjectStoreBackend,
    bucket: String,
}

impl S3Backend {
    /// Build the S3 client.
    ///
    /// No request is sent here; bad credentials surface on the first call.
    pub fn new(options: S3Options, request_timeout: Duration) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&options.bucket)
            .with_client_options(client_options(request_timeout))
            .with_retry(no_client_retry());

        if let Some(region) = &options.region {
            builder = builder.with_region(region);
        }
        // MinIO / custom S3-compatible services
        if let Some(endpoint) = &options.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if options.allow_http {
            builder = builder.with_allow_http(true);
        }
        if let Some(key_id) = &options.access_key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &options.secret_access_key {
            builder = builder.with_secret_access_key(secret.expose());
        }
        if let Some(token) = &options.session_token {
            builder = builder.with_token(token.expose());
        }

        let store = builder.build().map_err(|e| {
            StowError::storage(
                format!("Failed to create S3 client for bucket {}", options.bucket),
                e,
            )
        })?;

        debug!(bucket = %options.bucket, "S3Backend initialised");

        Ok(Self {
            inner: ObjectStoreBackend::new(Arc::new(store), BackendKind::S3),
            bucket: options.bucket,
        })
    }

    /// The bucket this backend writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

delegate_backend!(S3Backend);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stowage_core::retry::RetryPolicy;
    use stowage_core::{Format, Payload, StorageBackend, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::Storage;

    /// Read one HTTP request (headers and body) and answer with `status`.
    async fn answer(mut socket: TcpStream, status: &str) {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while request.len() < header_end + content_length {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let body = "<Error><Code>MalformedXML</Code></Error>";
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    }

    /// An HTTP endpoint answering every request with `status`. Returns its
    /// URL and a request counter.
    async fn stub_endpoint(status: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(answer(socket, status));
            }
        });
        (format!("http://{addr}"), requests)
    }

    #[test]
    fn test_build_with_explicit_credentials() {
        let options = S3Options {
            bucket: "pipeline-artifacts".into(),
            region: Some("eu-west-1".into()),
            endpoint: Some("http://localhost:9000".into()),
            access_key_id: Some("minio".into()),
            secret_access_key: Some(Secret::new("minio123")),
            session_token: None,
            allow_http: true,
        };
        let backend = S3Backend::new(options, Duration::from_secs(5)).unwrap();
        assert_eq!(backend.kind(), BackendKind::S3);
        assert_eq!(backend.bucket(), "pipeline-artifacts");
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let (endpoint, requests) = stub_endpoint("400 Bad Request").await;
        let options = S3Options {
            bucket: "pipeline-artifacts".into(),
            region: Some("eu-west-1".into()),
            endpoint: Some(endpoint),
            access_key_id: Some("minio".into()),
            secret_access_key: Some(Secret::new("minio123")),
            session_token: None,
            allow_http: true,
        };
        let backend = S3Backend::new(options, Duration::from_secs(5)).unwrap();
        let storage = Storage::new(Arc::new(backend)).with_retry(RetryPolicy::immediate(5));

        let err = storage
            .save("k", &Payload::Object(Value::from(1i64)), Format::Joblib, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StowError::Storage { .. }), "got {err}");
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }
}

//! Storage configuration.
//!
//! [`StorageConfig`] selects one backend for the whole process and carries
//! the settings every backend shares: parent folder, default chunk size,
//! staging directory, retry policy and request timeout. It deserializes
//! from JSON or parses from a storage URI such as
//! `s3://bucket/prefix?region=eu-west-1`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StowError;
use crate::key::validate_key;
use crate::retry::RetryPolicy;
use crate::storage::BackendKind;
use crate::Result;

/// Default timeout for a single remote request: 60 seconds.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Name of the staging directory under the system temp dir.
const STAGING_DIR_NAME: &str = "stowage";

/// A credential string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw credential.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Backend selection and its construction parameters.
///
/// Credentials left unset fall back to the provider's environment
/// variables (`AWS_*`, `GOOGLE_*`, `AZURE_*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Files under a local root directory.
    Local {
        /// Directory that holds every blob.
        root: PathBuf,
    },
    /// Amazon S3 or an S3-compatible service (MinIO, Ceph, ...).
    S3 {
        /// Bucket name.
        bucket: String,
        /// AWS region.
        region: Option<String>,
        /// Custom endpoint for S3-compatible services.
        endpoint: Option<String>,
        /// Access key id of the key pair.
        access_key_id: Option<String>,
        /// Secret access key of the key pair.
        secret_access_key: Option<Secret>,
        /// Session token for temporary credentials.
        session_token: Option<Secret>,
        /// Allow plain HTTP endpoints.
        #[serde(default)]
        allow_http: bool,
    },
    /// Google Cloud Storage.
    Gcs {
        /// Bucket name.
        bucket: String,
        /// Path to a service account JSON key.
        service_account_path: Option<PathBuf>,
    },
    /// Azure Data Lake Storage Gen2 / Blob Storage.
    Adls {
        /// Storage account name.
        account: Option<String>,
        /// Container (file system) name.
        container: String,
        /// Shared account key.
        access_key: Option<Secret>,
        /// OAuth bearer token.
        bearer_token: Option<Secret>,
    },
}

impl BackendConfig {
    /// The transport this configuration selects.
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Local { .. } => BackendKind::Local,
            BackendConfig::S3 { .. } => BackendKind::S3,
            BackendConfig::Gcs { .. } => BackendKind::Gcs,
            BackendConfig::Adls { .. } => BackendKind::Adls,
        }
    }
}

/// Process-wide storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// The selected backend.
    pub backend: BackendConfig,

    /// Prefix joined in front of every key.
    #[serde(default)]
    pub parent_folder: String,

    /// Default multipart chunk size in bytes for remote uploads.
    #[serde(default)]
    pub chunk_size: Option<usize>,

    /// Local directory for staging files.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Retry policy for backend calls.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Timeout of a single remote request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

/// `$TMPDIR/stowage`.
pub fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join(STAGING_DIR_NAME)
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl StorageConfig {
    /// A configuration with default settings for `backend`.
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            parent_folder: String::new(),
            chunk_size: None,
            staging_dir: default_staging_dir(),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// A local filesystem configuration rooted at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new(BackendConfig::Local { root: root.into() })
    }

    /// Set the parent folder.
    pub fn with_parent_folder(mut self, parent_folder: impl Into<String>) -> Self {
        self.parent_folder = parent_folder.into();
        self
    }

    /// Set the staging directory.
    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the default chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Parse a storage URI.
    ///
    /// # URI Formats
    ///
    /// - `local:///path/to/root`, `local://~/data` or a bare path
    /// - `s3://bucket/prefix?region=us-east-1&endpoint=http://minio:9000`
    /// - `gs://bucket/prefix?service_account=/path/key.json`
    /// - `az://container/prefix?account=myaccount`
    ///
    /// The path after the bucket or container becomes the parent folder.
    ///
    /// # Example
    ///
    /// ```
    /// use stowage_core::config::{BackendConfig, StorageConfig};
    ///
    /// let config = StorageConfig::from_uri("s3://my-bucket/pipeline?region=eu-west-1").unwrap();
    /// assert_eq!(config.parent_folder, "pipeline");
    /// assert!(matches!(config.backend, BackendConfig::S3 { .. }));
    /// ```
    pub fn from_uri(uri: &str) -> Result<Self> {
        let (scheme, rest) = match uri.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("local", uri),
        };

        let config = match scheme {
            "local" | "file" => Self::local(expand_home(strip_query(rest))?),
            "s3" | "s3a" => {
                let (bucket, prefix) = parse_bucket(uri, rest)?;
                let backend = BackendConfig::S3 {
                    bucket,
                    region: extract_query_param(uri, "region"),
                    endpoint: extract_query_param(uri, "endpoint"),
                    access_key_id: None,
                    secret_access_key: None,
                    session_token: None,
                    allow_http: extract_query_param(uri, "allow_http").as_deref() == Some("true"),
                };
                Self::new(backend).with_parent_folder(prefix)
            }
            "gs" | "gcs" => {
                let (bucket, prefix) = parse_bucket(uri, rest)?;
                let backend = BackendConfig::Gcs {
                    bucket,
                    service_account_path: extract_query_param(uri, "service_account")
                        .map(PathBuf::from),
                };
                Self::new(backend).with_parent_folder(prefix)
            }
            "az" | "abfs" | "abfss" | "adls" => {
                let (container, prefix) = parse_bucket(uri, rest)?;
                let backend = BackendConfig::Adls {
                    account: extract_query_param(uri, "account"),
                    container,
                    access_key: None,
                    bearer_token: None,
                };
                Self::new(backend).with_parent_folder(prefix)
            }
            other => {
                return Err(StowError::Config {
                    message: format!("Unsupported storage scheme '{other}' in {uri}"),
                })
            }
        };

        if let Some(chunk) = extract_query_param(uri, "chunk_size") {
            let chunk_size = chunk.parse::<usize>().map_err(|_| StowError::Config {
                message: format!("chunk_size must be a positive integer: {chunk}"),
            })?;
            let config = config.with_chunk_size(chunk_size);
            config.validate()?;
            return Ok(config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| StowError::Config {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| StowError::Config {
            message: format!("Invalid storage configuration in {}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that are not enforced by the type system.
    pub fn validate(&self) -> Result<()> {
        if !self.parent_folder.is_empty() {
            validate_key(&self.parent_folder).map_err(|e| StowError::Config {
                message: format!("Invalid parent_folder: {e}"),
            })?;
        }
        if self.chunk_size == Some(0) {
            return Err(StowError::Config {
                message: "chunk_size must be greater than zero".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(StowError::Config {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }
        let empty_name = match &self.backend {
            BackendConfig::S3 { bucket, .. } | BackendConfig::Gcs { bucket, .. } => {
                bucket.is_empty()
            }
            BackendConfig::Adls { container, .. } => container.is_empty(),
            BackendConfig::Local { root } => root.as_os_str().is_empty(),
        };
        if empty_name {
            return Err(StowError::Config {
                message: format!("{} backend needs a bucket, container or root", self.backend.kind()),
            });
        }
        Ok(())
    }
}

/// Split `bucket/prefix/path` (query string removed) into bucket and prefix.
fn parse_bucket(uri: &str, rest: &str) -> Result<(String, String)> {
    let path_part = strip_query(rest);
    let (bucket, prefix) = match path_part.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
        None => (path_part, ""),
    };
    if bucket.is_empty() {
        return Err(StowError::Config {
            message: format!("Storage URI must include a bucket or container name: {uri}"),
        });
    }
    Ok((bucket.to_string(), prefix.to_string()))
}

fn strip_query(s: &str) -> &str {
    s.split('?').next().unwrap_or(s)
}

/// Extract a query parameter value from a URI.
fn extract_query_param(uri: &str, param: &str) -> Option<String> {
    let query = uri.split('?').nth(1)?;
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if kv.next()? == param {
            return kv.next().map(|v| v.to_string());
        }
    }
    None
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        let home = home_dir().ok_or_else(|| StowError::Config {
            message: "Cannot determine home directory".to_string(),
        })?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(path))
}

/// Best-effort home directory detection.
fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

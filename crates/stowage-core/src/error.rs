//! Unified error types for stowage.
//!
//! All errors are represented by [`StowError`], using `thiserror` for the
//! definitions. The variants follow the storage layer's taxonomy: absence,
//! caller mistakes (format / payload combinations), transient transport
//! failures, credential failures and everything else. Only
//! [`StowError::Transient`] is ever retried.

use thiserror::Error;

/// Boxed source error carried by several variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The unified error type for all stowage operations.
#[derive(Error, Debug)]
pub enum StowError {
    /// The requested key was not found in storage.
    #[error("Not found: {key}")]
    NotFound {
        /// The storage key that was not found.
        key: String,
    },

    /// A format name outside the recognized set was requested.
    #[error("Unsupported format '{format}': supported formats are pickle, joblib, file, parquet and json")]
    UnsupportedFormat {
        /// The format name as given by the caller.
        format: String,
    },

    /// The payload cannot be encoded with the requested format.
    #[error("Object to be saved as {format} must be {expected}, received {found}")]
    TypeMismatch {
        /// The requested format.
        format: String,
        /// The payload kind the format accepts.
        expected: String,
        /// The payload kind that was supplied.
        found: String,
    },

    /// A transport failure that may succeed on a later attempt.
    #[error("Transient storage error: {message}")]
    Transient {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// Credentials were rejected or the caller lacks permission.
    #[error("Authentication failure: {message}")]
    AuthFailure {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// A transient failure persisted through every allowed attempt.
    #[error("Giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the last attempt.
        #[source]
        source: Box<StowError>,
    },

    /// Serializing or deserializing a payload failed.
    #[error("Codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// A tabular schema did not match the request (e.g. unknown column).
    #[error("Schema error: {message}")]
    Schema {
        /// Description of the schema mismatch.
        message: String,
    },

    /// A blob key cannot be used as given.
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// Any other storage failure. Never retried.
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// An internal error (bug).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StowError {
    /// Create a storage error from a message and source error.
    pub fn storage(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error from a message only.
    pub fn storage_msg(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient error from a message and source error.
    pub fn transient(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an authentication error from a message and source error.
    pub fn auth(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::AuthFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a codec error from a message and source error.
    pub fn codec(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Codec {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a codec error from a message only.
    pub fn codec_msg(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
            source: None,
        }
    }

    /// Classify a local filesystem error against `key`.
    ///
    /// `NotFound` maps to [`StowError::NotFound`], permission problems to
    /// [`StowError::AuthFailure`], timeouts and interruptions to
    /// [`StowError::Transient`]; everything else is a plain storage error.
    pub fn from_io(key: &str, context: impl Into<String>, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound {
                key: key.to_string(),
            },
            ErrorKind::PermissionDenied => Self::auth(context, err),
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                Self::transient(context, err)
            }
            _ => Self::storage(context, err),
        }
    }

    /// Whether the retry policy may attempt the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether this error reports an absent key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

//! The closed set of serialization formats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StowError;

/// Serialization scheme of a single save or load call.
///
/// The format is never stored with the blob: a load must name the same
/// format the save used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Compressed binary object encoding, materialised through a staging file.
    Pickle,
    /// Uncompressed binary object encoding, kept in an in-memory buffer.
    Joblib,
    /// A local file uploaded and downloaded verbatim.
    File,
    /// Columnar Parquet for tables.
    Parquet,
    /// Line-delimited JSON records for tables.
    Json,
}

impl Format {
    /// Every recognized format.
    pub const ALL: [Format; 5] = [
        Format::Pickle,
        Format::Joblib,
        Format::File,
        Format::Parquet,
        Format::Json,
    ];

    /// The canonical lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Pickle => "pickle",
            Format::Joblib => "joblib",
            Format::File => "file",
            Format::Parquet => "parquet",
            Format::Json => "json",
        }
    }

    /// Whether the format only accepts tabular payloads.
    pub fn is_tabular(&self) -> bool {
        matches!(self, Format::Parquet | Format::Json)
    }

    /// Whether save and load go through a local staging file.
    pub fn uses_staging(&self) -> bool {
        matches!(self, Format::Pickle | Format::Parquet | Format::File)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = StowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| StowError::UnsupportedFormat {
                format: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_formats() {
        for format in Format::ALL {
            assert_eq!(format.as_str().parse::<Format>().unwrap(), format);
        }
    }

    #[test]
    fn test_unknown_format_never_defaults() {
        for name in ["csv", "PICKLE", "", "pkl"] {
            let err = name.parse::<Format>().unwrap_err();
            assert!(
                matches!(err, StowError::UnsupportedFormat { ref format } if format == name),
                "{name:?} should be unsupported"
            );
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Format::Parquet).unwrap();
        assert_eq!(json, "\"parquet\"");
        let back: Format = serde_json::from_str("\"joblib\"").unwrap();
        assert_eq!(back, Format::Joblib);
    }
}

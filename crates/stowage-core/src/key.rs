//! Blob key composition and validation.
//!
//! A key is a relative, `/`-separated path. Keys are validated rather than
//! normalised, so every backend sees exactly the hierarchy the caller wrote.

use crate::error::StowError;
use crate::Result;

/// Separator between key segments on every backend.
pub const KEY_DELIMITER: char = '/';

/// Suffix of the sibling blob holding an artifact's metadata record.
pub const METADATA_SUFFIX: &str = ".metadata";

/// Check that `key` is a usable relative blob key.
///
/// Rejects empty keys, a leading or trailing `/`, empty segments and the
/// `.` / `..` segments.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason: &str| StowError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.starts_with(KEY_DELIMITER) {
        return Err(invalid("key must be relative"));
    }
    if key.ends_with(KEY_DELIMITER) {
        return Err(invalid("key must not end with a separator"));
    }
    for segment in key.split(KEY_DELIMITER) {
        match segment {
            "" => return Err(invalid("key contains an empty segment")),
            "." | ".." => return Err(invalid("key contains a relative segment")),
            s if s.contains('\\') || s.contains('\0') => {
                return Err(invalid("key contains a backslash or NUL"))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Join an optional parent folder and a name into a full key.
///
/// An empty `parent_folder` leaves `name` untouched. Trailing separators on
/// the parent are not stripped; the result is validated as a whole.
pub fn join_key(parent_folder: &str, name: &str) -> Result<String> {
    let key = if parent_folder.is_empty() {
        name.to_string()
    } else {
        format!("{parent_folder}{KEY_DELIMITER}{name}")
    };
    validate_key(&key)?;
    Ok(key)
}

/// Strip `parent_folder` (and its separator) from a full key.
///
/// Returns `None` when the key does not live under the folder.
pub fn strip_parent<'a>(parent_folder: &str, key: &'a str) -> Option<&'a str> {
    if parent_folder.is_empty() {
        return Some(key);
    }
    key.strip_prefix(parent_folder)?
        .strip_prefix(KEY_DELIMITER)
}

/// The key of the metadata record that belongs to `key`.
pub fn metadata_key(key: &str) -> String {
    format!("{key}{METADATA_SUFFIX}")
}

/// Flatten a key into a single file name (`a/b/c` → `a-b-c`).
pub fn flatten_key(key: &str) -> String {
    key.replace(KEY_DELIMITER, "-")
}

//! Local scratch files for save and load.
//!
//! A staging file is named after the flattened blob key plus a unique
//! per-operation suffix (`runs-2024-output~<uuid>`), so two operations on
//! the same key never share a file.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use stowage_core::error::StowError;
use stowage_core::key::flatten_key;
use stowage_core::Result;

/// Separator between the flattened key and the unique suffix.
const SUFFIX_SEPARATOR: char = '~';

/// Length of a hyphenated UUID.
const SUFFIX_LEN: usize = 36;

/// Directory holding the staging files of one `Storage`.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// A staging area rooted at `root`. Nothing is created until use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The staging directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a fresh staging path for `key`.
    ///
    /// The directory is created if needed; the file itself is not.
    pub async fn reserve(&self, key: &str) -> Result<StagingFile> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            StowError::storage(
                format!("Failed to create staging directory {}", self.root.display()),
                e,
            )
        })?;
        let name = format!("{}{SUFFIX_SEPARATOR}{}", flatten_key(key), Uuid::new_v4());
        Ok(StagingFile {
            path: self.root.join(name),
            keep: false,
        })
    }

    /// Remove every staging file that belongs to `key`.
    ///
    /// Returns how many files were removed. Matching goes by flattened
    /// name, so keys that flatten alike (`a/b` and `a-b`) purge each
    /// other's files, including kept `file` loads.
    pub async fn purge(&self, key: &str) -> Result<usize> {
        let flat = flatten_key(key);
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(StowError::storage(
                    format!("Failed to read staging directory {}", self.root.display()),
                    e,
                ))
            }
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            StowError::storage(
                format!("Failed to read staging directory {}", self.root.display()),
                e,
            )
        })? {
            let name = entry.file_name();
            if !belongs_to(&name.to_string_lossy(), &flat) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StowError::storage(
                        format!("Failed to remove staging file {}", entry.path().display()),
                        e,
                    ))
                }
            }
        }

        if removed > 0 {
            debug!(key = %key, removed, "Purged staging files");
        }
        Ok(removed)
    }
}

/// Whether a staging file name was produced for the flattened key `flat`.
///
/// Flattening is lossy: `a/b` and `a-b` both become `a-b` and match here.
fn belongs_to(name: &str, flat: &str) -> bool {
    if name == flat {
        return true;
    }
    match name.strip_prefix(flat) {
        Some(rest) => {
            rest.len() == SUFFIX_LEN + 1
                && rest.starts_with(SUFFIX_SEPARATOR)
                && Uuid::parse_str(&rest[1..]).is_ok()
        }
        None => false,
    }
}

/// A reserved staging path, removed on drop unless kept.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    keep: bool,
}

impl StagingFile {
    /// The reserved path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand the file over to the caller; it is no longer removed on drop.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staging file"),
        }
    }
}

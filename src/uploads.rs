//! Raw upload storage. The record store only keeps the sanitized filename.

use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

use crate::error::{CatalogError, Result};

#[derive(Debug, Clone)]
pub(crate) struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under an already-sanitized name, replacing any earlier
    /// file of the same name.
    pub(crate) fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self
            .path_for(filename)
            .ok_or_else(|| CatalogError::Validation(format!("invalid filename: {filename}")))?;
        std::fs::create_dir_all(&self.dir)?;
        // unique staging name per save
        let mut staged = tempfile::Builder::new()
            .prefix(".upload-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        staged.write_all(bytes)?;
        staged.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    pub(crate) fn fetch(&self, filename: &str) -> Result<Vec<u8>> {
        let not_found = || CatalogError::NotFound(format!("upload {filename}"));
        let path = self.path_for(filename).ok_or_else(not_found)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(err) if path.is_dir() => {
                tracing::debug!(error = %err, "upload name refers to a directory");
                Err(not_found())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// True when a stored file with this name has exactly these contents.
    pub(crate) fn has_identical(&self, filename: &str, bytes: &[u8]) -> bool {
        match self.fetch(filename) {
            Ok(existing) => blake3::hash(&existing) == blake3::hash(bytes),
            Err(_) => false,
        }
    }

    /// Resolve a name to a path inside the upload directory. Anything other
    /// than a single plain file name is rejected.
    fn path_for(&self, filename: &str) -> Option<PathBuf> {
        plain_file_name(filename).map(|name| self.dir.join(name))
    }
}

pub(crate) fn plain_file_name(name: &str) -> Option<&str> {
    if name.is_empty() || name.contains('\\') {
        return None;
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(name),
        _ => None,
    }
}

/// Reduce an arbitrary client-supplied name to `[A-Za-z0-9_.-]`.
///
/// Non-ASCII characters are decomposed and their accents dropped, path
/// separators and whitespace become `_`, and leading or trailing dots and
/// underscores are trimmed. Returns `None` when nothing usable is left.
pub(crate) fn sanitize_filename(name: &str) -> Option<String> {
    let ascii: String = name.nfkd().filter(char::is_ascii).collect();
    let spaced = ascii.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

//! Ingestion: manual entries, uploads and bulk imports all end in
//! [`Catalog::create_record`], which writes the record and then syncs the
//! full-text index on a best-effort basis.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::error::{CatalogError, Result};
use crate::extract::extension_hint;
use crate::index::IndexError;
use crate::store::{NewRecord, RecordId};
use crate::uploads::sanitize_filename;

pub(crate) const IMPORT_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// JSON body of a manually entered record. Missing fields are empty strings,
/// except `type`, which defaults to `paper`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct ManualEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub(crate) title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub(crate) authors: String,
    #[serde(deserialize_with = "lenient_string")]
    pub(crate) year: String,
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub(crate) kind: String,
    #[serde(rename = "abstract", deserialize_with = "lenient_string")]
    pub(crate) abstract_text: String,
    #[serde(deserialize_with = "lenient_string")]
    pub(crate) text: String,
}

impl Default for ManualEntry {
    fn default() -> Self {
        Self {
            title: String::new(),
            authors: String::new(),
            year: String::new(),
            kind: "paper".to_string(),
            abstract_text: String::new(),
            text: String::new(),
        }
    }
}

impl From<ManualEntry> for NewRecord {
    fn from(entry: ManualEntry) -> Self {
        NewRecord {
            title: entry.title,
            authors: entry.authors,
            year: entry.year,
            kind: entry.kind,
            abstract_text: entry.abstract_text,
            text: entry.text,
            filename: String::new(),
        }
    }
}

/// Accepts strings, numbers and booleans (stringified) and `null` (empty).
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct UploadOutcome {
    pub(crate) id: RecordId,
    pub(crate) filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ImportReport {
    pub(crate) scanned: usize,
    pub(crate) imported: usize,
    pub(crate) skipped: usize,
}

impl Catalog {
    /// Insert a record, then sync its index entry.
    ///
    /// Only the insert can fail the call. A sync failure leaves the record
    /// without an index entry; `status` shows the gap and `reindex` closes it.
    pub(crate) fn create_record(&self, record: &NewRecord) -> Result<RecordId> {
        let db = self.connect()?;
        let id = db.create_record(record)?;
        match self.index.sync(db.conn(), id) {
            Ok(()) => {}
            Err(IndexError::Unavailable) => {
                tracing::debug!(id, "full-text index unavailable; record not indexed");
            }
            Err(err) => {
                tracing::warn!(id, error = %err, "index sync failed; record stored without full-text entry");
            }
        }
        tracing::info!(id, title = %record.title, "record created");
        Ok(id)
    }

    pub(crate) fn add_entry(&self, entry: ManualEntry) -> Result<RecordId> {
        self.create_record(&NewRecord::from(entry))
    }

    /// Save an uploaded file, extract its text and catalog it under its
    /// sanitized name.
    pub(crate) fn ingest_upload(&self, original_name: &str, bytes: &[u8]) -> Result<UploadOutcome> {
        let filename = sanitize_filename(original_name)
            .ok_or_else(|| CatalogError::Validation("invalid filename".into()))?;
        self.uploads.save(&filename, bytes)?;
        let text = self.extractor.extract(bytes, &extension_hint(&filename));
        if text.is_empty() {
            tracing::debug!(filename = %filename, "no text extracted from upload");
        }
        let id = self.create_record(&NewRecord {
            title: filename.clone(),
            kind: "file".to_string(),
            text,
            filename: filename.clone(),
            ..NewRecord::default()
        })?;
        Ok(UploadOutcome { id, filename })
    }

    /// Import a file or a directory tree, in file-name order. Files whose
    /// stored copy already has identical contents are skipped, as are later
    /// files that sanitize to a name an earlier file of the same run took.
    pub(crate) fn import_path(&self, root: &Path, exts: &[String], dry_run: bool) -> Result<ImportReport> {
        if !root.exists() {
            return Err(CatalogError::NotFound(root.display().to_string()));
        }
        let mut report = ImportReport::default();
        let mut claimed: HashSet<String> = HashSet::new();

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_extension_allowed(entry.path(), exts) {
                continue;
            }
            report.scanned += 1;

            let original = entry.file_name().to_string_lossy();
            let Some(filename) = sanitize_filename(&original) else {
                report.skipped += 1;
                continue;
            };
            if !claimed.insert(filename.clone()) {
                tracing::warn!(
                    path = %entry.path().display(),
                    filename = %filename,
                    "stored name already taken by an earlier file in this import; skipping"
                );
                report.skipped += 1;
                continue;
            }
            let bytes = std::fs::read(entry.path())?;
            if self.uploads.has_identical(&filename, &bytes)
                && self.connect()?.filename_exists(&filename)?
            {
                report.skipped += 1;
                continue;
            }
            if !dry_run {
                self.ingest_upload(&filename, &bytes)?;
            }
            report.imported += 1;
        }
        Ok(report)
    }
}

pub(crate) fn is_extension_allowed(path: &Path, exts: &[String]) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or("");
    if exts.is_empty() {
        return IMPORT_EXTENSIONS.iter().any(|allowed| ext.eq_ignore_ascii_case(allowed));
    }
    exts.iter()
        .any(|allowed| ext.eq_ignore_ascii_case(allowed.trim_start_matches('.')))
}

//! Plain-text extraction for uploaded files.
//!
//! Extraction never fails: unreadable or unsupported input yields an empty
//! string and the record is stored without body text.

use std::ffi::OsStr;
use std::path::Path;

pub(crate) trait TextExtractor: Send + Sync {
    /// `hint` is the file extension without the dot, in any case.
    fn extract(&self, bytes: &[u8], hint: &str) -> String;
}

/// PDFs through `pdf-extract`, `.txt` / `.md` as UTF-8, everything else empty.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FileTextExtractor;

impl TextExtractor for FileTextExtractor {
    fn extract(&self, bytes: &[u8], hint: &str) -> String {
        match hint.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => extract_pdf(bytes),
            "txt" | "md" => match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(err) => {
                    tracing::debug!(error = %err, "text upload is not valid UTF-8");
                    String::new()
                }
            },
            _ => String::new(),
        }
    }
}

pub(crate) fn extension_hint(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn extract_pdf(bytes: &[u8]) -> String {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "pdf_extract failed");
            String::new()
        }
        Err(_) => {
            tracing::warn!("pdf_extract panicked on malformed input");
            String::new()
        }
    }
}

//! SQLite record store: the authoritative `entries` table.
//!
//! Every catalog entry lives here exactly once. The full-text index in
//! [`crate::index`] is a derived copy and is never consulted for metadata.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{CatalogError, Result};

pub(crate) type RecordId = i64;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT,
    authors TEXT,
    year TEXT,
    type TEXT,
    abstract TEXT,
    text TEXT,
    filename TEXT,
    added INTEGER
);

CREATE INDEX IF NOT EXISTS idx_entries_filename ON entries(filename);
";

const SUMMARY_COLUMNS: &str = "id, title, authors, year, type, abstract, filename";

/// Ids per `IN (...)` lookup; stays well under SQLite's bound-parameter limit.
const HYDRATE_BATCH: usize = 500;

// ── Record types ─────────────────────────────────────────────────────────

/// One catalog entry as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Record {
    pub(crate) id: RecordId,
    pub(crate) title: String,
    pub(crate) authors: String,
    pub(crate) year: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(rename = "abstract")]
    pub(crate) abstract_text: String,
    pub(crate) text: String,
    pub(crate) filename: String,
    pub(crate) added: i64,
}

/// Search result projection of a [`Record`]; the body text is left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecordSummary {
    pub(crate) id: RecordId,
    pub(crate) title: String,
    pub(crate) authors: String,
    pub(crate) year: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(rename = "abstract")]
    pub(crate) abstract_text: String,
    pub(crate) filename: String,
}

/// Fields supplied by the ingestion paths. `id` and `added` are assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NewRecord {
    pub(crate) title: String,
    pub(crate) authors: String,
    pub(crate) year: String,
    pub(crate) kind: String,
    pub(crate) abstract_text: String,
    pub(crate) text: String,
    pub(crate) filename: String,
}

// ═════════════════════════════════════════════════════════════════════════
// CatalogDb: one connection, scoped to a single operation
// ═════════════════════════════════════════════════════════════════════════

pub(crate) struct CatalogDb {
    conn: Connection,
}

impl CatalogDb {
    /// Open (creating the file if needed) without touching the schema.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.apply_pragmas()?;
        db.register_functions()?;
        Ok(db)
    }

    fn apply_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// `fold(text)`: see [`fold_text`]. NULL and non-text values fold to NULL.
    fn register_functions(&self) -> Result<()> {
        self.conn.create_scalar_function(
            "fold",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                Ok(match ctx.get_raw(0) {
                    ValueRef::Text(bytes) => Some(fold_text(&String::from_utf8_lossy(bytes))),
                    _ => None,
                })
            },
        )?;
        Ok(())
    }

    pub(crate) fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Writes ───────────────────────────────────────────────────────

    pub(crate) fn create_record(&self, record: &NewRecord) -> Result<RecordId> {
        let added = Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO entries (title, authors, year, type, abstract, text, filename, added)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.title,
                record.authors,
                record.year,
                record.kind,
                record.abstract_text,
                record.text,
                record.filename,
                added,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub(crate) fn record(&self, id: RecordId) -> Result<Record> {
        self.conn
            .query_row(
                "SELECT id, title, authors, year, type, abstract, text, filename, added
                 FROM entries WHERE id = ?",
                params![id],
                |row| {
                    Ok(Record {
                        id: row.get(0)?,
                        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        authors: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        year: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        kind: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        abstract_text: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                        text: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                        filename: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                        added: row.get::<_, Option<i64>>(8)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?
            .ok_or_else(|| CatalogError::NotFound(format!("record {id}")))
    }

    pub(crate) fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub(crate) fn filename_exists(&self, filename: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM entries WHERE filename = ? LIMIT 1",
                params![filename],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Substring scan over title, abstract and text in insertion order.
    ///
    /// `%`, `_` and `\` in the needle are escaped so it always matches
    /// literally. Both sides go through [`fold_text`], so case and accents
    /// are ignored the same way the FTS tokenizer ignores them.
    pub(crate) fn search_substring(&self, needle: &str, limit: usize) -> Result<Vec<RecordSummary>> {
        let pattern = like_pattern(&fold_text(needle));
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM entries
             WHERE fold(title) LIKE ?1 ESCAPE '\\'
                OR fold(abstract) LIKE ?1 ESCAPE '\\'
                OR fold(text) LIKE ?1 ESCAPE '\\'
             ORDER BY id
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pattern, limit as i64], row_to_summary)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Hydrate summaries for `ids`, keeping their order. Ids missing from the
    /// store are dropped.
    pub(crate) fn summaries_by_ids(&self, ids: &[RecordId]) -> Result<Vec<RecordSummary>> {
        let mut by_id: HashMap<RecordId, RecordSummary> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(HYDRATE_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("SELECT {SUMMARY_COLUMNS} FROM entries WHERE id IN ({placeholders})");
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_summary)?;
            for row in rows {
                let summary = row?;
                by_id.insert(summary.id, summary);
            }
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<RecordSummary> {
    Ok(RecordSummary {
        id: row.get(0)?,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        authors: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        year: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        kind: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        abstract_text: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        filename: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
    })
}

/// Unicode lowercase with combining marks removed, matching the case and
/// diacritic folding of the `unicode61` tokenizer.
pub(crate) fn fold_text(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

// ── Tests ────────────────────────────────────────────────────────────────

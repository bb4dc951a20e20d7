//! FTS5 projection of the record store.
//!
//! `entries_fts` keeps its own copy of `title`, `authors`, `abstract` and
//! `text` keyed by the record id (the FTS rowid). It is written only by
//! [`SearchIndex::sync`] and [`SearchIndex::rebuild`]; there are no triggers,
//! so a broken index can never fail a record insert.

use rusqlite::{params, Connection};

use crate::store::RecordId;

const FTS_SCHEMA_SQL: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    title, authors, abstract, text,
    tokenize='unicode61'
);
";

const COPY_COLUMNS: &str = "id, COALESCE(title, ''), COALESCE(authors, ''),
                            COALESCE(abstract, ''), COALESCE(text, '')";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexState {
    Available,
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum IndexError {
    #[error("full-text index unavailable")]
    Unavailable,

    #[error("full-text engine error: {0}")]
    Engine(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexHit {
    pub(crate) id: RecordId,
    /// FTS5 bm25 rank; lower is better.
    pub(crate) rank: f64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchIndex {
    state: IndexState,
}

impl SearchIndex {
    /// Create the FTS table if possible and fix the index mode for the
    /// lifetime of the process.
    pub(crate) fn initialize(conn: &Connection, enabled: bool) -> Self {
        if !enabled {
            tracing::info!("full-text index disabled by configuration; using substring search");
            return Self::with_state(IndexState::Unavailable);
        }
        match conn.execute_batch(FTS_SCHEMA_SQL) {
            Ok(()) => Self::with_state(IndexState::Available),
            Err(err) => {
                tracing::warn!(error = %err, "full-text index could not be created; using substring search");
                Self::with_state(IndexState::Unavailable)
            }
        }
    }

    pub(crate) fn with_state(state: IndexState) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> IndexState {
        self.state
    }

    fn ensure_available(&self) -> Result<(), IndexError> {
        match self.state {
            IndexState::Available => Ok(()),
            IndexState::Unavailable => Err(IndexError::Unavailable),
        }
    }

    /// Replace the index entry for `id` with the record's current fields.
    pub(crate) fn sync(&self, conn: &Connection, id: RecordId) -> Result<(), IndexError> {
        self.ensure_available()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM entries_fts WHERE rowid = ?1", params![id])?;
        let copied = tx.execute(
            &format!(
                "INSERT INTO entries_fts(rowid, title, authors, abstract, text)
                 SELECT {COPY_COLUMNS} FROM entries WHERE id = ?1"
            ),
            params![id],
        )?;
        tx.commit()?;
        if copied == 0 {
            tracing::debug!(id, "sync found no record to index");
        }
        Ok(())
    }

    /// Run `q` through FTS5 `MATCH` unchanged and return every hit, best
    /// match first.
    ///
    /// Query-syntax errors surface as [`IndexError::Engine`].
    pub(crate) fn query(&self, conn: &Connection, q: &str) -> Result<Vec<IndexHit>, IndexError> {
        self.ensure_available()?;
        let mut stmt = conn.prepare(
            "SELECT rowid, rank FROM entries_fts
             WHERE entries_fts MATCH ?1
             ORDER BY rank",
        )?;
        let rows = stmt.query_map(params![q], |row| {
            Ok(IndexHit {
                id: row.get(0)?,
                rank: row.get(1)?,
            })
        })?;
        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    /// Drop every index entry and copy the whole record store back in.
    pub(crate) fn rebuild(&self, conn: &Connection) -> Result<usize, IndexError> {
        self.ensure_available()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM entries_fts", [])?;
        let copied = tx.execute(
            &format!(
                "INSERT INTO entries_fts(rowid, title, authors, abstract, text)
                 SELECT {COPY_COLUMNS} FROM entries ORDER BY id"
            ),
            [],
        )?;
        tx.commit()?;
        Ok(copied)
    }

    pub(crate) fn entry_count(&self, conn: &Connection) -> Result<usize, IndexError> {
        self.ensure_available()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM entries_fts", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

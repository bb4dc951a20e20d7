//! Search execution: full-text first, substring scan when the index cannot answer.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::index::IndexError;
use crate::store::RecordSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchMode {
    /// Blank query; nothing was read.
    Skipped,
    FullText,
    Substring,
}

#[derive(Debug, Clone)]
pub(crate) struct SearchOutcome {
    pub(crate) mode: SearchMode,
    pub(crate) results: Vec<RecordSummary>,
}

impl Catalog {
    pub(crate) fn execute_search(&self, q: &str) -> Result<Vec<RecordSummary>> {
        Ok(self.search_with_mode(q)?.results)
    }

    /// Best-effort search. Index failures of any kind, including queries the
    /// FTS5 parser rejects, fall back to the substring scan; only store
    /// failures are returned as errors.
    pub(crate) fn search_with_mode(&self, q: &str) -> Result<SearchOutcome> {
        let q = q.trim();
        if q.is_empty() {
            return Ok(SearchOutcome {
                mode: SearchMode::Skipped,
                results: Vec::new(),
            });
        }

        let db = self.connect()?;
        match self.index.query(db.conn(), q) {
            Ok(hits) => {
                let ids: Vec<_> = hits.iter().map(|hit| hit.id).collect();
                let results = db.summaries_by_ids(&ids)?;
                tracing::debug!(
                    query = %q,
                    hits = results.len(),
                    best_rank = hits.first().map(|hit| hit.rank),
                    "full-text search"
                );
                return Ok(SearchOutcome {
                    mode: SearchMode::FullText,
                    results,
                });
            }
            Err(IndexError::Unavailable) => {}
            Err(err) => {
                tracing::debug!(query = %q, error = %err, "full-text query failed; falling back to substring scan");
            }
        }

        let results = db.search_substring(q, self.config.search_limit)?;
        tracing::debug!(query = %q, hits = results.len(), "substring search");
        Ok(SearchOutcome {
            mode: SearchMode::Substring,
            results,
        })
    }
}

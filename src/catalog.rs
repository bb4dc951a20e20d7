use std::sync::Arc;

use crate::config::Config;
use crate::error::{CatalogError, Result};
use crate::extract::{FileTextExtractor, TextExtractor};
use crate::index::{IndexError, IndexState, SearchIndex};
use crate::store::{CatalogDb, Record, RecordId};
use crate::uploads::UploadStore;

/// Shared, immutable handle over the catalog's storage.
///
/// Holds no connection: every operation opens its own [`CatalogDb`] and drops
/// it before returning.
pub(crate) struct Catalog {
    pub(crate) config: Config,
    pub(crate) index: SearchIndex,
    pub(crate) uploads: UploadStore,
    pub(crate) extractor: Arc<dyn TextExtractor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CatalogStatus {
    pub(crate) records: usize,
    pub(crate) index_state: IndexState,
    /// `None` when the index is unavailable or could not be counted.
    pub(crate) index_entries: Option<usize>,
}

impl Catalog {
    /// Create the schema and decide the index mode once for this process.
    pub(crate) fn open(config: Config) -> Result<Self> {
        let db = CatalogDb::open(&config.db_path)?;
        db.init_schema()?;
        let index = SearchIndex::initialize(db.conn(), config.full_text);
        drop(db);

        let uploads = UploadStore::new(config.upload_dir.clone());
        std::fs::create_dir_all(uploads.dir())?;
        tracing::info!(
            db = %config.db_path.display(),
            uploads = %uploads.dir().display(),
            index = ?index.state(),
            "catalog opened"
        );
        Ok(Self {
            config,
            index,
            uploads,
            extractor: Arc::new(FileTextExtractor),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub(crate) fn connect(&self) -> Result<CatalogDb> {
        CatalogDb::open(&self.config.db_path)
    }

    pub(crate) fn record(&self, id: RecordId) -> Result<Record> {
        self.connect()?.record(id)
    }

    pub(crate) fn fetch_upload(&self, filename: &str) -> Result<Vec<u8>> {
        self.uploads.fetch(filename)
    }

    pub(crate) fn status(&self) -> Result<CatalogStatus> {
        let db = self.connect()?;
        let records = db.count()?;
        let index_entries = match self.index.entry_count(db.conn()) {
            Ok(n) => Some(n),
            Err(IndexError::Unavailable) => None,
            Err(err) => {
                tracing::warn!(error = %err, "could not count index entries");
                None
            }
        };
        Ok(CatalogStatus {
            records,
            index_state: self.index.state(),
            index_entries,
        })
    }

    /// Repopulate the full-text index from the record store.
    pub(crate) fn reindex(&self) -> Result<usize> {
        let db = self.connect()?;
        match self.index.rebuild(db.conn()) {
            Ok(n) => {
                tracing::info!(entries = n, "full-text index rebuilt");
                Ok(n)
            }
            Err(IndexError::Unavailable) => Err(CatalogError::Validation(
                "full-text index is unavailable in this deployment".into(),
            )),
            Err(IndexError::Engine(err)) => Err(CatalogError::Store(err)),
        }
    }
}

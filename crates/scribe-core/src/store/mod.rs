// ============================================================================
// ScribeDb - Embedded Database (redb)
// ============================================================================
// Persistent local storage for source items (transcriptions, enrichments)
// and their embedding vectors.
// Default path: ~/.scribe/scribe.redb (override via SCRIBE_DB_PATH env var)
// ============================================================================

mod content;
mod enumerator;
mod vectors;

pub use content::ContentStore;
pub use enumerator::{ContentEnumerator, DEFAULT_PAGE_SIZE};
pub use vectors::{cosine_similarity, VectorStore};

use redb::{Database, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::{RagError, RagResult};
use crate::types::SourceKind;

// Table definitions
/// `{kind}:{id}` -> bincode SourceItem
pub(crate) const SOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("sources");
/// `{kind}/{created_at:020}/{id}` -> id, ordered by creation time per kind
pub(crate) const SOURCE_ORDER: TableDefinition<&str, &str> = TableDefinition::new("source_order");
/// `{kind}:{id}` -> bincode EmbeddingRecord
pub(crate) const EMBEDDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");

/// Handle to the embedded database; hands out the content and vector stores
#[derive(Clone)]
pub struct ScribeDb {
    db: Arc<Database>,
    path: Option<PathBuf>,
}

impl ScribeDb {
    /// Open (or create) the database at the given path
    pub fn open(path: impl AsRef<Path>) -> RagResult<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening database at: {}", path.display());

        let db = Database::create(&path).map_err(|e| storage_err("Failed to open database", e))?;
        Self::init(db, Some(path))
    }

    /// Volatile database, used by tests and dry runs
    pub fn open_in_memory() -> RagResult<Self> {
        let db = redb::Builder::new()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| storage_err("Failed to create in-memory database", e))?;
        Self::init(db, None)
    }

    fn init(db: Database, path: Option<PathBuf>) -> RagResult<Self> {
        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| storage_err("Failed to begin write", e))?;
        {
            write_txn
                .open_table(SOURCES)
                .map_err(|e| storage_err("Failed to create sources table", e))?;
            write_txn
                .open_table(SOURCE_ORDER)
                .map_err(|e| storage_err("Failed to create source_order table", e))?;
            write_txn
                .open_table(EMBEDDINGS)
                .map_err(|e| storage_err("Failed to create embeddings table", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| storage_err("Failed to commit init", e))?;

        info!("Database ready");
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// File path, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn content(&self) -> ContentStore {
        ContentStore::new(self.db.clone())
    }

    pub fn vectors(&self) -> VectorStore {
        VectorStore::new(self.db.clone())
    }
}

pub(crate) fn storage_err(context: &str, e: impl std::fmt::Display) -> RagError {
    RagError::Storage(format!("{}: {}", context, e))
}

pub(crate) fn item_key(kind: SourceKind, id: &str) -> String {
    format!("{}:{}", kind.as_str(), id)
}

/// Split an `item_key` back into its parts
pub(crate) fn parse_item_key(key: &str) -> Option<(SourceKind, &str)> {
    let (kind, id) = key.split_once(':')?;
    Some((kind.parse().ok()?, id))
}

pub(crate) fn order_key(kind: SourceKind, created_at: i64, id: &str) -> String {
    format!("{}/{:020}/{}", kind.as_str(), created_at.max(0), id)
}

/// Half-open key range covering every order key of `kind`.
/// '0' sorts right after '/', so `kind0` bounds the `kind/` prefix.
pub(crate) fn order_prefix_range(kind: SourceKind) -> (String, String) {
    (format!("{}/", kind.as_str()), format!("{}0", kind.as_str()))
}

pub(crate) fn encode<T: serde::Serialize>(value: &T, what: &str) -> RagResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| RagError::Data(format!("Failed to serialize {}: {}", what, e)))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> RagResult<T> {
    bincode::deserialize(bytes)
        .map_err(|e| RagError::Data(format!("Failed to deserialize {}: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_keys_sort_by_time() {
        let early = order_key(SourceKind::Transcription, 5, "zzz");
        let late = order_key(SourceKind::Transcription, 40, "aaa");
        assert!(early < late);

        let (start, end) = order_prefix_range(SourceKind::Transcription);
        assert!(start.as_str() <= early.as_str() && early.as_str() < end.as_str());
        let other = order_key(SourceKind::Enrichment, 5, "x");
        assert!(!(start.as_str() <= other.as_str() && other.as_str() < end.as_str()));
    }

    #[test]
    fn test_item_key_roundtrip() {
        let key = item_key(SourceKind::Enrichment, "rec:1");
        assert_eq!(parse_item_key(&key), Some((SourceKind::Enrichment, "rec:1")));
        assert_eq!(parse_item_key("bogus"), None);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = std::env::temp_dir().join(format!("scribe-db-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scribe.redb");
        {
            let db = ScribeDb::open(&path).unwrap();
            db.vectors()
                .upsert("t1", SourceKind::Transcription, vec![1.0, 0.0], "h1")
                .unwrap();
        }
        let db = ScribeDb::open(&path).unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        assert_eq!(db.vectors().stats().unwrap().transcriptions.embedded, 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}

//! ============================================================================
//! Content Store - Transcriptions and enrichments awaiting embedding
//! ============================================================================
//! Stands in for the recording service's relational tables. Items are keyed
//! by kind + id, with a secondary creation-order index per kind so batch
//! runs enumerate deterministically.
//! ============================================================================

use redb::{Database, ReadableTable};
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

use super::{
    decode, encode, item_key, order_key, order_prefix_range, storage_err, EMBEDDINGS, SOURCES,
    SOURCE_ORDER,
};
use crate::error::{RagError, RagResult};
use crate::types::{SourceItem, SourceKind};

#[derive(Clone)]
pub struct ContentStore {
    db: Arc<Database>,
}

impl ContentStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new item or update an existing one's text.
    ///
    /// An update keeps the first `created_at` (so enumeration order is
    /// stable) and bumps `revision` only when the text actually changed.
    /// Returns the item as stored.
    pub fn put_item(&self, item: &SourceItem) -> RagResult<SourceItem> {
        if item.id.trim().is_empty() {
            return Err(RagError::InvalidRequest("source item id is empty".into()));
        }
        let key = item_key(item.kind, &item.id);

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| storage_err("Failed to begin write", e))?;
        let stored;
        {
            let mut sources = write_txn
                .open_table(SOURCES)
                .map_err(|e| storage_err("Failed to open sources table", e))?;

            let existing: Option<SourceItem> = match sources
                .get(key.as_str())
                .map_err(|e| storage_err("Failed to get source", e))?
            {
                Some(value) => Some(decode(value.value(), "source item")?),
                None => None,
            };

            stored = match existing {
                Some(current) if current.text == item.text => current,
                Some(current) => SourceItem {
                    text: item.text.clone(),
                    revision: current.revision.saturating_add(1),
                    parent_recording_id: item.parent_recording_id.clone(),
                    ..current
                },
                None => item.clone(),
            };

            let value = encode(&stored, "source item")?;
            sources
                .insert(key.as_str(), value.as_slice())
                .map_err(|e| storage_err("Failed to insert source", e))?;

            let mut order = write_txn
                .open_table(SOURCE_ORDER)
                .map_err(|e| storage_err("Failed to open source_order table", e))?;
            let okey = order_key(stored.kind, stored.created_at, &stored.id);
            order
                .insert(okey.as_str(), stored.id.as_str())
                .map_err(|e| storage_err("Failed to insert order entry", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| storage_err("Failed to commit", e))?;

        debug!(
            "Stored {} {} (revision {})",
            stored.kind, stored.id, stored.revision
        );
        Ok(stored)
    }

    pub fn get_item(&self, kind: SourceKind, id: &str) -> RagResult<Option<SourceItem>> {
        let key = item_key(kind, id);

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| storage_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(SOURCES)
            .map_err(|e| storage_err("Failed to open sources table", e))?;

        match table
            .get(key.as_str())
            .map_err(|e| storage_err("Failed to get source", e))?
        {
            Some(value) => Ok(Some(decode(value.value(), "source item")?)),
            None => Ok(None),
        }
    }

    /// Like `get_item`, but a missing item is a `NotFound` error
    pub fn require_item(&self, kind: SourceKind, id: &str) -> RagResult<SourceItem> {
        self.get_item(kind, id)?
            .ok_or_else(|| RagError::NotFound(format!("{} {}", kind, id)))
    }

    /// Number of items of one kind
    pub fn count(&self, kind: SourceKind) -> RagResult<usize> {
        let (start, end) = order_prefix_range(kind);

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| storage_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(SOURCE_ORDER)
            .map_err(|e| storage_err("Failed to open source_order table", e))?;

        let count = table
            .range::<&str>(start.as_str()..end.as_str())
            .map_err(|e| storage_err("Failed to iterate sources", e))?
            .count();
        Ok(count)
    }

    /// One page of items in creation order, strictly after `after` (an
    /// order key previously returned by this method).
    pub(crate) fn list_page(
        &self,
        kind: SourceKind,
        after: Option<&str>,
        limit: usize,
    ) -> RagResult<Vec<(String, SourceItem)>> {
        let (start, end) = order_prefix_range(kind);
        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Included(start.as_str()),
        };

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| storage_err("Failed to begin read", e))?;
        let order = read_txn
            .open_table(SOURCE_ORDER)
            .map_err(|e| storage_err("Failed to open source_order table", e))?;
        let sources = read_txn
            .open_table(SOURCES)
            .map_err(|e| storage_err("Failed to open sources table", e))?;

        let mut page = Vec::with_capacity(limit);
        let iter = order
            .range::<&str>((lower, Bound::Excluded(end.as_str())))
            .map_err(|e| storage_err("Failed to iterate sources", e))?;
        for entry in iter {
            if page.len() >= limit {
                break;
            }
            let (okey, id) = entry.map_err(|e| storage_err("Failed to read entry", e))?;
            let key = item_key(kind, id.value());
            let item = match sources
                .get(key.as_str())
                .map_err(|e| storage_err("Failed to get source", e))?
            {
                Some(value) => decode::<SourceItem>(value.value(), "source item")?,
                None => {
                    return Err(RagError::Data(format!(
                        "order index points at missing source {}",
                        key
                    )))
                }
            };
            page.push((okey.value().to_string(), item));
        }
        Ok(page)
    }

    /// Remove a recording's items and their embeddings in one transaction.
    /// Returns the number of items deleted.
    pub fn delete_recording(&self, recording_id: &str) -> RagResult<usize> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| storage_err("Failed to begin write", e))?;
        let removed;
        {
            let mut sources = write_txn
                .open_table(SOURCES)
                .map_err(|e| storage_err("Failed to open sources table", e))?;

            let mut doomed: Vec<SourceItem> = Vec::new();
            for entry in sources
                .range::<&str>(..)
                .map_err(|e| storage_err("Failed to iterate sources", e))?
            {
                let (_key, value) = entry.map_err(|e| storage_err("Failed to read entry", e))?;
                let item: SourceItem = decode(value.value(), "source item")?;
                if item.parent_recording_id == recording_id {
                    doomed.push(item);
                }
            }

            let mut order = write_txn
                .open_table(SOURCE_ORDER)
                .map_err(|e| storage_err("Failed to open source_order table", e))?;
            let mut embeddings = write_txn
                .open_table(EMBEDDINGS)
                .map_err(|e| storage_err("Failed to open embeddings table", e))?;

            for item in &doomed {
                let key = item_key(item.kind, &item.id);
                sources
                    .remove(key.as_str())
                    .map_err(|e| storage_err("Failed to remove source", e))?;
                order
                    .remove(order_key(item.kind, item.created_at, &item.id).as_str())
                    .map_err(|e| storage_err("Failed to remove order entry", e))?;
                embeddings
                    .remove(key.as_str())
                    .map_err(|e| storage_err("Failed to remove embedding", e))?;
            }
            removed = doomed.len();
        }
        write_txn
            .commit()
            .map_err(|e| storage_err("Failed to commit delete", e))?;

        if removed > 0 {
            debug!("Deleted {} items of recording {}", removed, recording_id);
        }
        Ok(removed)
    }
}

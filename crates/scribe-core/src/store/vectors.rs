//! ============================================================================
//! Vector Store - Embedding records with cosine similarity search
//! ============================================================================
//! One record per (source id, kind). Upserts are skipped when the stored
//! revision hash already matches; every write is a single redb transaction,
//! so a record is either fully written or not at all.
//! ============================================================================

use redb::{Database, ReadableTable};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{decode, encode, item_key, parse_item_key, storage_err, EMBEDDINGS};
use crate::error::{RagError, RagResult};
use crate::types::{
    EmbeddingRecord, KindFilter, ScoredRecord, SourceKind, StoreStats, UpsertOutcome,
};

#[derive(Clone)]
pub struct VectorStore {
    db: Arc<Database>,
}

impl VectorStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the vector for (source_id, kind)
    pub fn upsert(
        &self,
        source_id: &str,
        kind: SourceKind,
        vector: Vec<f32>,
        revision_hash: &str,
    ) -> RagResult<UpsertOutcome> {
        self.upsert_record(EmbeddingRecord::new(source_id, kind, vector, revision_hash))
    }

    /// Write a prepared record.
    ///
    /// Skipped when the stored record carries the same revision hash.
    /// Superseded when the stored record has a different hash but was
    /// created after `record` (last write wins on `created_at`).
    pub fn upsert_record(&self, record: EmbeddingRecord) -> RagResult<UpsertOutcome> {
        if record.vector.is_empty() {
            return Err(RagError::Data(format!(
                "empty vector for {} {}",
                record.kind, record.source_id
            )));
        }
        if record.vector.iter().any(|v| !v.is_finite()) {
            return Err(RagError::Data(format!(
                "non-finite vector component for {} {}",
                record.kind, record.source_id
            )));
        }

        let key = item_key(record.kind, &record.source_id);
        let value = encode(&record, "embedding record")?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| storage_err("Failed to begin write", e))?;
        let outcome;
        {
            let mut table = write_txn
                .open_table(EMBEDDINGS)
                .map_err(|e| storage_err("Failed to open embeddings table", e))?;

            let existing: Option<EmbeddingRecord> = match table
                .get(key.as_str())
                .map_err(|e| storage_err("Failed to get embedding", e))?
            {
                Some(guard) => Some(decode(guard.value(), "embedding record")?),
                None => None,
            };

            outcome = match &existing {
                Some(current) if current.text_revision_hash == record.text_revision_hash => {
                    UpsertOutcome::Skipped
                }
                Some(current) if current.created_at > record.created_at => {
                    UpsertOutcome::Superseded
                }
                Some(_) => UpsertOutcome::Replaced,
                None => UpsertOutcome::Inserted,
            };

            if outcome.is_written() {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(|e| storage_err("Failed to insert embedding", e))?;
            }
        }

        if !outcome.is_written() {
            write_txn
                .abort()
                .map_err(|e| storage_err("Failed to abort", e))?;
        } else {
            write_txn
                .commit()
                .map_err(|e| storage_err("Failed to commit", e))?;
        }

        debug!("Upsert {} -> {:?}", key, outcome);
        Ok(outcome)
    }

    pub fn get(&self, source_id: &str, kind: SourceKind) -> RagResult<Option<EmbeddingRecord>> {
        let key = item_key(kind, source_id);

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| storage_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(EMBEDDINGS)
            .map_err(|e| storage_err("Failed to open embeddings table", e))?;

        match table
            .get(key.as_str())
            .map_err(|e| storage_err("Failed to get embedding", e))?
        {
            Some(value) => Ok(Some(decode(value.value(), "embedding record")?)),
            None => Ok(None),
        }
    }

    /// Whether the stored record for (source_id, kind) was built from `revision_hash`
    pub fn has_revision(
        &self,
        source_id: &str,
        kind: SourceKind,
        revision_hash: &str,
    ) -> RagResult<bool> {
        Ok(self
            .get(source_id, kind)?
            .map(|record| record.text_revision_hash == revision_hash)
            .unwrap_or(false))
    }

    pub fn remove(&self, source_id: &str, kind: SourceKind) -> RagResult<bool> {
        let key = item_key(kind, source_id);

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| storage_err("Failed to begin write", e))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(EMBEDDINGS)
                .map_err(|e| storage_err("Failed to open embeddings table", e))?;
            removed = table
                .remove(key.as_str())
                .map_err(|e| storage_err("Failed to remove embedding", e))?
                .is_some();
        }
        write_txn
            .commit()
            .map_err(|e| storage_err("Failed to commit delete", e))?;

        if removed {
            debug!("Deleted embedding: {}", key);
        }
        Ok(removed)
    }

    /// The `top_k` records most similar to `query`.
    ///
    /// Ordered by cosine similarity descending, ties broken by most recent
    /// `created_at`. A stored vector whose length differs from the query is
    /// a `Data` error. An empty store, empty query, zero-norm query or
    /// `top_k == 0` yields an empty result.
    pub fn search(
        &self,
        query: &[f32],
        filter: KindFilter,
        top_k: usize,
    ) -> RagResult<Vec<ScoredRecord>> {
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if l2_norm(query) == 0.0 {
            return Ok(Vec::new());
        }

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| storage_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(EMBEDDINGS)
            .map_err(|e| storage_err("Failed to open embeddings table", e))?;

        let mut results: Vec<ScoredRecord> = Vec::new();
        for entry in table
            .range::<&str>(..)
            .map_err(|e| storage_err("Failed to iterate embeddings", e))?
        {
            let (key, value) = entry.map_err(|e| storage_err("Failed to read entry", e))?;
            let Some((kind, _)) = parse_item_key(key.value()) else {
                return Err(RagError::Data(format!(
                    "malformed embedding key '{}'",
                    key.value()
                )));
            };
            if !filter.accepts(kind) {
                continue;
            }

            let record: EmbeddingRecord = decode(value.value(), "embedding record")?;
            let score = cosine_similarity(query, &record.vector)?;
            if !score.is_finite() {
                continue;
            }
            results.push(ScoredRecord {
                source_id: record.source_id,
                kind: record.kind,
                score,
                created_at: record.created_at,
            });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        results.truncate(top_k);

        debug!("Search returned {} records", results.len());
        Ok(results)
    }

    /// Count of stored records per kind
    pub fn stats(&self) -> RagResult<StoreStats> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| storage_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(EMBEDDINGS)
            .map_err(|e| storage_err("Failed to open embeddings table", e))?;

        let mut stats = StoreStats::default();
        for entry in table
            .range::<&str>(..)
            .map_err(|e| storage_err("Failed to iterate embeddings", e))?
        {
            let (key, _value) = entry.map_err(|e| storage_err("Failed to read entry", e))?;
            match parse_item_key(key.value()) {
                Some((kind, _)) => stats.increment(kind),
                None => {
                    return Err(RagError::Data(format!(
                        "malformed embedding key '{}'",
                        key.value()
                    )))
                }
            }
        }
        Ok(stats)
    }

    /// source id -> stored revision hash, for one kind
    pub fn revisions(&self, kind: SourceKind) -> RagResult<HashMap<String, String>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| storage_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(EMBEDDINGS)
            .map_err(|e| storage_err("Failed to open embeddings table", e))?;

        let mut revisions = HashMap::new();
        for entry in table
            .range::<&str>(..)
            .map_err(|e| storage_err("Failed to iterate embeddings", e))?
        {
            let (key, value) = entry.map_err(|e| storage_err("Failed to read entry", e))?;
            if !matches!(parse_item_key(key.value()), Some((k, _)) if k == kind) {
                continue;
            }
            let record: EmbeddingRecord = decode(value.value(), "embedding record")?;
            revisions.insert(record.source_id, record.text_revision_hash);
        }
        Ok(revisions)
    }
}

/// Cosine similarity of two vectors of identical length.
///
/// Accumulates in f64. A zero-norm side yields 0.0; a length mismatch is a
/// `Data` error rather than a silent truncation.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> RagResult<f32> {
    if a.len() != b.len() {
        return Err(RagError::Data(format!(
            "vector dimensionality mismatch: query has {}, stored has {}",
            a.len(),
            b.len()
        )));
    }
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    let dot = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum::<f64>();
    Ok((dot / (norm_a * norm_b)) as f32)
}

fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|v| (*v as f64) * (*v as f64))
        .sum::<f64>()
        .sqrt()
}

//! ============================================================================
//! Embedding Pipeline - Batch backfill of missing or stale vectors
//! ============================================================================
//! Walks every transcription and enrichment, skips items whose current text
//! is already embedded, and embeds the rest one at a time. A failing item is
//! counted and logged; it never stops its siblings.
//! ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, RagResult};
use crate::retry::{with_retry, RetryConfig};
use crate::store::{ContentEnumerator, ContentStore, ScribeDb, VectorStore, DEFAULT_PAGE_SIZE};
use crate::types::{
    now_millis, EmbedAllResults, EmbeddingRecord, EmbeddingStats, KindSummary, SourceItem,
    SourceKind, StoreStats, UpsertOutcome,
};

/// Cooperative stop flag, shared between a signal handler and the pipeline
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum ItemOutcome {
    Embedded,
    Skipped,
}

pub struct EmbeddingPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    content: ContentStore,
    vectors: VectorStore,
    retry: RetryConfig,
    shutdown: ShutdownSignal,
    page_size: usize,
}

impl EmbeddingPipeline {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, db: &ScribeDb) -> Self {
        Self {
            embedder,
            content: db.content(),
            vectors: db.vectors(),
            retry: RetryConfig::default(),
            shutdown: ShutdownSignal::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Embed every item whose current revision has no stored vector.
    ///
    /// Returns `Configuration` before touching either store when the
    /// embedder has no credential. Per-item failures end up in `errors`.
    pub async fn embed_all(&self) -> RagResult<EmbedAllResults> {
        if !self.embedder.is_configured() {
            return Err(RagError::Configuration(
                "embedding provider is not configured (set OPENAI_API_KEY)".into(),
            ));
        }

        info!("Starting embedding backfill (model: {})", self.embedder.model());

        let (transcriptions, enrichments) = tokio::join!(
            self.embed_kind(SourceKind::Transcription),
            self.embed_kind(SourceKind::Enrichment)
        );
        let (transcriptions, t_interrupted) = transcriptions?;
        let (enrichments, e_interrupted) = enrichments?;

        let results = EmbedAllResults {
            transcriptions,
            enrichments,
            interrupted: t_interrupted || e_interrupted,
        };

        info!(
            "Embedding backfill finished: {} embedded, {} skipped, {} errors{}",
            transcriptions.embedded + enrichments.embedded,
            transcriptions.skipped + enrichments.skipped,
            results.total_errors(),
            if results.interrupted { " (interrupted)" } else { "" }
        );
        Ok(results)
    }

    /// Returns the kind's counters and whether the shutdown signal cut it short.
    /// Only an enumeration failure aborts the kind.
    async fn embed_kind(&self, kind: SourceKind) -> RagResult<(KindSummary, bool)> {
        let enumerator =
            ContentEnumerator::new(self.content.clone(), kind)?.with_page_size(self.page_size);
        info!("Embedding {} {}", enumerator.live_count(), kind.plural());

        let mut summary = KindSummary::default();
        let mut interrupted = false;

        for next in enumerator {
            if self.shutdown.is_triggered() {
                info!("Shutdown requested, stopping {} backfill", kind.plural());
                interrupted = true;
                break;
            }

            let item = next?;
            summary.total += 1;

            match self.embed_item(&item).await {
                Ok(ItemOutcome::Embedded) => summary.embedded += 1,
                Ok(ItemOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!("Failed to embed {} {}: {}", kind, item.id, e);
                }
            }
        }

        info!(
            "{}: {} total, {} embedded, {} skipped, {} errors",
            kind.display_name(),
            summary.total,
            summary.embedded,
            summary.skipped,
            summary.errors
        );
        Ok((summary, interrupted))
    }

    async fn embed_item(&self, item: &SourceItem) -> RagResult<ItemOutcome> {
        let hash = item.revision_hash();
        let stored = self.vectors.get(&item.id, item.kind)?;
        if stored.as_ref().map(|r| r.text_revision_hash == hash).unwrap_or(false) {
            debug!("Skipping {} {} (revision unchanged)", item.kind, item.id);
            return Ok(ItemOutcome::Skipped);
        }

        if item.text.trim().is_empty() {
            return Err(RagError::Data(format!("{} {} has no text", item.kind, item.id)));
        }

        let label = format!("embed {} {}", item.kind, item.id);
        let vector = with_retry(&self.retry, &label, || self.embedder.embed(&item.text)).await?;

        // Stamp after the stored record; the content store's text is current.
        let created_at = match &stored {
            Some(previous) => now_millis().max(previous.created_at.saturating_add(1)),
            None => now_millis(),
        };
        let record =
            EmbeddingRecord::new(&item.id, item.kind, vector, hash).with_created_at(created_at);

        match self.vectors.upsert_record(record)? {
            UpsertOutcome::Skipped => Ok(ItemOutcome::Skipped),
            UpsertOutcome::Superseded => Err(RagError::Data(format!(
                "a newer embedding for {} {} was written concurrently",
                item.kind, item.id
            ))),
            UpsertOutcome::Inserted | UpsertOutcome::Replaced => {
                debug!("Embedded {} {}", item.kind, item.id);
                Ok(ItemOutcome::Embedded)
            }
        }
    }

    /// Content population vs. embedded population
    pub fn embedding_stats(&self) -> RagResult<EmbeddingStats> {
        embedding_stats(&self.content, &self.vectors)
    }

    /// Stored record counts per kind
    pub fn get_stats(&self) -> RagResult<StoreStats> {
        self.vectors.stats()
    }
}

/// Compare every content item's current revision with the stored vectors.
/// Needs no embedder, so the CLI can report progress without a credential.
pub fn embedding_stats(content: &ContentStore, vectors: &VectorStore) -> RagResult<EmbeddingStats> {
    let mut stats = EmbeddingStats::default();

    for kind in SourceKind::ALL {
        let revisions = vectors.revisions(kind)?;
        let mut total = 0;
        let mut embedded = 0;
        for next in ContentEnumerator::new(content.clone(), kind)? {
            let item = next?;
            total += 1;
            if revisions.get(&item.id) == Some(&item.revision_hash()) {
                embedded += 1;
            }
        }
        stats.total_by_source.set(kind, total);
        stats.embedded_by_source.set(kind, embedded);
        stats.pending_by_source.set(kind, total - embedded);
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stub_vector, StubEmbedder};
    use crate::types::KindFilter;

    fn seed(db: &ScribeDb, kind: SourceKind, texts: &[&str]) -> Vec<SourceItem> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let item = SourceItem::new(kind, format!("{}-{}", kind, i), "rec1", *text)
                    .with_created_at(1_000 + i as i64);
                db.content().put_item(&item).unwrap()
            })
            .collect()
    }

    fn pipeline(db: &ScribeDb, embedder: Arc<StubEmbedder>) -> EmbeddingPipeline {
        EmbeddingPipeline::new(embedder, db)
            .with_retry(RetryConfig::none())
            .with_page_size(2)
    }

    #[tokio::test]
    async fn test_embeds_all_kinds() {
        let db = ScribeDb::open_in_memory().unwrap();
        seed(&db, SourceKind::Transcription, &["alpha", "beta", "gamma"]);
        seed(&db, SourceKind::Enrichment, &["summary of alpha"]);

        let embedder = Arc::new(StubEmbedder::new());
        let results = pipeline(&db, embedder.clone()).embed_all().await.unwrap();

        assert_eq!(
            results.transcriptions,
            KindSummary { total: 3, embedded: 3, skipped: 0, errors: 0 }
        );
        assert_eq!(
            results.enrichments,
            KindSummary { total: 1, embedded: 1, skipped: 0, errors: 0 }
        );
        assert!(!results.interrupted);
        assert_eq!(embedder.calls(), 4);

        let stats = db.vectors().stats().unwrap();
        assert_eq!(stats.transcriptions.embedded, 3);
        assert_eq!(stats.enrichments.embedded, 1);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let db = ScribeDb::open_in_memory().unwrap();
        seed(&db, SourceKind::Transcription, &["alpha", "beta"]);
        seed(&db, SourceKind::Enrichment, &["notes"]);

        let embedder = Arc::new(StubEmbedder::new());
        let pipeline = pipeline(&db, embedder.clone());
        pipeline.embed_all().await.unwrap();
        let before = db.vectors().get("transcription-0", SourceKind::Transcription).unwrap();

        let second = pipeline.embed_all().await.unwrap();
        assert_eq!(second.transcriptions.embedded, 0);
        assert_eq!(second.transcriptions.skipped, 2);
        assert_eq!(second.enrichments.skipped, 1);
        assert_eq!(embedder.calls(), 3);

        let after = db.vectors().get("transcription-0", SourceKind::Transcription).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_changed_text_is_reembedded() {
        let db = ScribeDb::open_in_memory().unwrap();
        let items = seed(&db, SourceKind::Transcription, &["first draft", "other"]);

        let embedder = Arc::new(StubEmbedder::new());
        let pipeline = pipeline(&db, embedder.clone());
        pipeline.embed_all().await.unwrap();

        let mut edited = items[0].clone();
        edited.text = "second draft".into();
        let stored = db.content().put_item(&edited).unwrap();
        assert_eq!(stored.revision, 2);

        let results = pipeline.embed_all().await.unwrap();
        assert_eq!(results.transcriptions.embedded, 1);
        assert_eq!(results.transcriptions.skipped, 1);

        let record = db.vectors().get(&edited.id, SourceKind::Transcription).unwrap().unwrap();
        assert_eq!(record.text_revision_hash, stored.revision_hash());
        assert_eq!(record.vector, stub_vector("second draft"));
    }

    #[tokio::test]
    async fn test_failing_item_does_not_stop_siblings() {
        let db = ScribeDb::open_in_memory().unwrap();
        let items = seed(&db, SourceKind::Transcription, &["one", "two", "three", "four"]);

        let embedder = Arc::new(StubEmbedder::new().failing_on("three"));
        let results = pipeline(&db, embedder).embed_all().await.unwrap();

        assert_eq!(results.transcriptions.total, 4);
        assert_eq!(results.transcriptions.embedded, 3);
        assert_eq!(results.transcriptions.errors, 1);
        assert_eq!(results.total_errors(), 1);

        let vectors = db.vectors();
        for item in items.iter().filter(|i| i.text != "three") {
            let hits = vectors
                .search(&stub_vector(&item.text), KindFilter::Any, 4)
                .unwrap();
            assert_eq!(hits[0].source_id, item.id);
        }
        assert!(vectors.get("transcription-2", SourceKind::Transcription).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_touches_nothing() {
        let db = ScribeDb::open_in_memory().unwrap();
        seed(&db, SourceKind::Transcription, &["alpha"]);

        let embedder = Arc::new(StubEmbedder::unconfigured());
        let err = pipeline(&db, embedder.clone()).embed_all().await.unwrap_err();

        assert!(matches!(err, RagError::Configuration(_)));
        assert_eq!(embedder.calls(), 0);
        assert_eq!(db.vectors().stats().unwrap(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let db = ScribeDb::open_in_memory().unwrap();
        seed(&db, SourceKind::Enrichment, &["action items"]);

        let embedder = Arc::new(
            StubEmbedder::new()
                .failing_times("action items", 1)
                .with_failure_status(503),
        );
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        };
        let results = EmbeddingPipeline::new(embedder.clone(), &db)
            .with_retry(retry)
            .embed_all()
            .await
            .unwrap();

        assert_eq!(results.enrichments.embedded, 1);
        assert_eq!(results.enrichments.errors, 0);
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let db = ScribeDb::open_in_memory().unwrap();
        seed(&db, SourceKind::Enrichment, &["too long"]);

        let embedder = Arc::new(StubEmbedder::new().failing_on("too long").with_failure_status(400));
        let results = EmbeddingPipeline::new(embedder.clone(), &db)
            .embed_all()
            .await
            .unwrap();

        assert_eq!(results.enrichments.errors, 1);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_text_counts_as_error() {
        let db = ScribeDb::open_in_memory().unwrap();
        seed(&db, SourceKind::Transcription, &["   ", "spoken words"]);

        let embedder = Arc::new(StubEmbedder::new());
        let results = pipeline(&db, embedder.clone()).embed_all().await.unwrap();

        assert_eq!(results.transcriptions.errors, 1);
        assert_eq!(results.transcriptions.embedded, 1);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_before_next_item() {
        let db = ScribeDb::open_in_memory().unwrap();
        seed(&db, SourceKind::Transcription, &["a", "b"]);
        seed(&db, SourceKind::Enrichment, &["c"]);

        let embedder = Arc::new(StubEmbedder::new());
        let pipeline = pipeline(&db, embedder.clone());
        pipeline.shutdown_signal().trigger();

        let results = pipeline.embed_all().await.unwrap();
        assert!(results.interrupted);
        assert_eq!(results.transcriptions.total, 0);
        assert_eq!(results.enrichments.total, 0);
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_embedding_stats_tracks_pending() {
        let db = ScribeDb::open_in_memory().unwrap();
        let items = seed(&db, SourceKind::Transcription, &["a", "b", "c"]);
        seed(&db, SourceKind::Enrichment, &["d"]);

        let pipeline = pipeline(&db, Arc::new(StubEmbedder::new()));
        let before = pipeline.embedding_stats().unwrap();
        assert_eq!(before.total_by_source.transcriptions, 3);
        assert_eq!(before.pending_by_source.transcriptions, 3);
        assert_eq!(before.embedded_by_source.enrichments, 0);

        pipeline.embed_all().await.unwrap();

        let mut edited = items[1].clone();
        edited.text = "b, revised".into();
        db.content().put_item(&edited).unwrap();

        let after = pipeline.embedding_stats().unwrap();
        assert_eq!(after.embedded_by_source.transcriptions, 2);
        assert_eq!(after.pending_by_source.transcriptions, 1);
        assert_eq!(after.pending_by_source.get(SourceKind::Enrichment), 0);
        assert_eq!(after.total_by_source.get(SourceKind::Transcription), 3);
        assert_eq!(pipeline.get_stats().unwrap().transcriptions.embedded, 3);
    }

    #[tokio::test]
    async fn test_edit_replaces_record_stamped_in_the_future() {
        let db = ScribeDb::open_in_memory().unwrap();
        let items = seed(&db, SourceKind::Transcription, &["before the edit"]);
        let future = now_millis() + 60_000;
        db.vectors()
            .upsert_record(
                EmbeddingRecord::new(
                    &items[0].id,
                    SourceKind::Transcription,
                    stub_vector("before the edit"),
                    items[0].revision_hash(),
                )
                .with_created_at(future),
            )
            .unwrap();

        let mut edited = items[0].clone();
        edited.text = "after the edit".into();
        let stored = db.content().put_item(&edited).unwrap();

        let embedder = Arc::new(StubEmbedder::new());
        let pipeline = pipeline(&db, embedder.clone());
        let results = pipeline.embed_all().await.unwrap();

        assert_eq!(results.transcriptions.embedded, 1);
        assert_eq!(results.transcriptions.skipped, 0);
        assert_eq!(embedder.calls(), 1);

        let record = db.vectors().get(&edited.id, SourceKind::Transcription).unwrap().unwrap();
        assert_eq!(record.text_revision_hash, stored.revision_hash());
        assert!(record.created_at > future);
        assert_eq!(pipeline.embedding_stats().unwrap().pending_by_source.transcriptions, 0);

        let again = pipeline.embed_all().await.unwrap();
        assert_eq!(again.transcriptions.skipped, 1);
        assert_eq!(embedder.calls(), 1);
    }
}

//! ============================================================================
//! RAG Service - Answers grounded in the user's recordings
//! ============================================================================
//! Flow:
//! 1. Embed the question
//! 2. Pull the top-K most similar transcriptions and enrichments
//! 3. Resolve each hit to its current text (missing items are dropped)
//! 4. Ask the completion model to answer from those sources only
//!
//! When nothing relevant is found the completion model is never called.
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::completion::{CompletionProvider, OpenAiCompletionService};
use crate::config::RagConfig;
use crate::embeddings::{EmbeddingProvider, OpenAiEmbeddingService};
use crate::error::{RagError, RagResult};
use crate::store::{ContentStore, ScribeDb, VectorStore};
use crate::types::{Citation, KindFilter, QueryResult, SourceItem};

/// Returned verbatim when no stored source matches the question
pub const NO_RELEVANT_SOURCE_ANSWER: &str =
    "I couldn't find anything in your recordings that answers this question.";

/// Per-source cap on text copied into the prompt
pub const DEFAULT_MAX_SOURCE_CHARS: usize = 4000;

pub struct RagService {
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    content: ContentStore,
    vectors: VectorStore,
    top_k: usize,
    max_source_chars: usize,
}

struct GroundingSource {
    citation: Citation,
    item: SourceItem,
}

impl RagService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        db: &ScribeDb,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            completer,
            content: db.content(),
            vectors: db.vectors(),
            top_k,
            max_source_chars: DEFAULT_MAX_SOURCE_CHARS,
        }
    }

    /// Wire the OpenAI-compatible clients from `config`
    pub fn from_config(config: &RagConfig, db: &ScribeDb) -> RagResult<Self> {
        let embedder = Arc::new(OpenAiEmbeddingService::new(config)?);
        let completer = Arc::new(OpenAiCompletionService::new(config)?);
        Ok(Self::new(embedder, completer, db, config.top_k))
    }

    pub fn with_max_source_chars(mut self, max_source_chars: usize) -> Self {
        self.max_source_chars = max_source_chars.max(1);
        self
    }

    pub async fn answer(&self, question: &str) -> RagResult<QueryResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("question is empty".into()));
        }

        debug!("Answering question ({} chars)", question.len());

        let query = self.embedder.embed(question).await?;
        let hits = self.vectors.search(&query, KindFilter::Any, self.top_k)?;
        if hits.is_empty() {
            info!("No relevant sources for question");
            return Ok(no_relevant_source());
        }

        let mut sources = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.content.require_item(hit.kind, &hit.source_id) {
                Ok(item) => sources.push(GroundingSource {
                    citation: Citation {
                        source_id: hit.source_id,
                        kind: hit.kind,
                        similarity_score: hit.score,
                    },
                    item,
                }),
                Err(RagError::NotFound(msg)) => {
                    warn!("Dropping citation {} {}: {}", hit.kind, hit.source_id, msg);
                }
                Err(e) => return Err(e),
            }
        }

        if sources.is_empty() {
            info!("Every matching source is gone; answering without sources");
            return Ok(no_relevant_source());
        }

        let prompt = build_prompt(question, &sources, self.max_source_chars);
        let answer_text = self.completer.complete(&prompt).await?;

        info!("Answered question from {} sources", sources.len());
        Ok(QueryResult {
            answer_text,
            citations: sources.into_iter().map(|s| s.citation).collect(),
        })
    }
}

fn no_relevant_source() -> QueryResult {
    QueryResult {
        answer_text: NO_RELEVANT_SOURCE_ANSWER.to_string(),
        citations: Vec::new(),
    }
}

fn build_prompt(question: &str, sources: &[GroundingSource], max_source_chars: usize) -> String {
    let mut prompt = String::from(
        "You answer questions about the user's own voice recordings.\n\
         Use only the sources below. If they do not contain the answer, say so.\n\n<sources>\n",
    );

    for (i, source) in sources.iter().enumerate() {
        prompt.push_str(&format!(
            "<source index=\"{}\" kind=\"{}\" id=\"{}\" recording=\"{}\" score=\"{:.3}\">\n{}\n</source>\n",
            i + 1,
            source.item.kind.display_name(),
            source.item.id,
            source.item.parent_recording_id,
            source.citation.similarity_score,
            truncate_chars(&source.item.text, max_source_chars)
        ));
    }

    prompt.push_str("</sources>\n\n");
    prompt.push_str(&format!("Question: {}\n\n", question));
    prompt.push_str(
        "Answer concisely. Refer to sources by their index in square brackets, e.g. [1].",
    );
    prompt
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

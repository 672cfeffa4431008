//! ============================================================================
//! SCRIBE-CORE: Search and answers over recorded speech
//! ============================================================================
//! This crate handles the retrieval side of the Scribe recorder:
//! - Embedding transcriptions and enrichments via an OpenAI-compatible API
//! - redb-backed content and vector storage with cosine search
//! - Idempotent batch backfill of missing or stale embeddings
//! - Retrieval-augmented answers with source citations
//! ============================================================================

pub mod completion;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod pipeline;
pub mod rag;
pub mod retry;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use completion::{CompletionProvider, OpenAiCompletionService};
pub use config::RagConfig;
pub use embeddings::{EmbeddingProvider, OpenAiEmbeddingService};
pub use error::{RagError, RagResult};
pub use pipeline::{embedding_stats, EmbeddingPipeline, ShutdownSignal};
pub use rag::{RagService, NO_RELEVANT_SOURCE_ANSWER};
pub use retry::RetryConfig;
pub use store::{ContentEnumerator, ContentStore, ScribeDb, VectorStore};
pub use types::*;

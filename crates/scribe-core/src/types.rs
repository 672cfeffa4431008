//! ============================================================================
//! Core Types - Source items, embedding records, summaries and answers
//! ============================================================================
//! These types are serialized to JSON for the CLI and the HTTP endpoint, and
//! with bincode inside redb tables.
//! ============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The two content collections that get embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Raw speech-to-text output of a recording
    Transcription,
    /// Derived content (summary, action items, notes) of a recording
    Enrichment,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Transcription, SourceKind::Enrichment];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Transcription => "transcription",
            SourceKind::Enrichment => "enrichment",
        }
    }

    /// Collection name used in stats output
    pub fn plural(&self) -> &'static str {
        match self {
            SourceKind::Transcription => "transcriptions",
            SourceKind::Enrichment => "enrichments",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::Transcription => "Transcription",
            SourceKind::Enrichment => "Enrichment",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transcription" | "transcriptions" => Ok(SourceKind::Transcription),
            "enrichment" | "enrichments" => Ok(SourceKind::Enrichment),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Stable fingerprint of a text: lowercase hex SHA-256
pub fn revision_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// A piece of content that needs an embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    pub kind: SourceKind,
    pub text: String,
    /// Bumped every time the text changes
    pub revision: u32,
    pub parent_recording_id: String,
    /// Epoch milliseconds; fixes enumeration order
    pub created_at: i64,
}

impl SourceItem {
    pub fn new(
        kind: SourceKind,
        id: impl Into<String>,
        parent_recording_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
            revision: 1,
            parent_recording_id: parent_recording_id.into(),
            created_at: now_millis(),
        }
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn revision_hash(&self) -> String {
        revision_hash(&self.text)
    }
}

/// Import payload for a source item; missing ids are generated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItemInput {
    #[serde(default)]
    pub id: Option<String>,
    pub kind: SourceKind,
    pub text: String,
    #[serde(alias = "recordingId")]
    pub parent_recording_id: String,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl SourceItemInput {
    pub fn into_item(self) -> SourceItem {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let item = SourceItem::new(self.kind, id, self.parent_recording_id, self.text);
        match self.created_at {
            Some(ts) => item.with_created_at(ts),
            None => item,
        }
    }
}

/// Stored vector for one (source id, kind)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub source_id: String,
    pub kind: SourceKind,
    pub vector: Vec<f32>,
    pub text_revision_hash: String,
    pub created_at: i64,
}

impl EmbeddingRecord {
    pub fn new(
        source_id: impl Into<String>,
        kind: SourceKind,
        vector: Vec<f32>,
        text_revision_hash: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            vector,
            text_revision_hash: text_revision_hash.into(),
            created_at: now_millis(),
        }
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Search hit: an embedding record's identity plus its similarity
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub source_id: String,
    pub kind: SourceKind,
    pub score: f32,
    pub created_at: i64,
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Stored hash already matched
    Skipped,
    /// Stored record has another hash but a later `created_at`
    Superseded,
}

impl UpsertOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Replaced)
    }
}

/// Restricts a search to one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Only(SourceKind),
    Any,
}

impl KindFilter {
    pub fn accepts(&self, kind: SourceKind) -> bool {
        match self {
            KindFilter::Only(k) => *k == kind,
            KindFilter::Any => true,
        }
    }
}

/// Per-kind counters of one batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSummary {
    pub total: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Result of `embed_all`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedAllResults {
    pub transcriptions: KindSummary,
    pub enrichments: KindSummary,
    /// A shutdown signal stopped the run before every item was visited
    #[serde(default)]
    pub interrupted: bool,
}

impl EmbedAllResults {
    pub fn summary(&self, kind: SourceKind) -> &KindSummary {
        match kind {
            SourceKind::Transcription => &self.transcriptions,
            SourceKind::Enrichment => &self.enrichments,
        }
    }

    pub fn total_errors(&self) -> usize {
        self.transcriptions.errors + self.enrichments.errors
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedCount {
    pub embedded: usize,
}

/// Vector store counts, in the shape the stats consumer expects:
/// `{ "transcriptions": {"embedded": N}, "enrichments": {"embedded": N} }`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub transcriptions: EmbeddedCount,
    pub enrichments: EmbeddedCount,
}

impl StoreStats {
    pub fn embedded(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Transcription => self.transcriptions.embedded,
            SourceKind::Enrichment => self.enrichments.embedded,
        }
    }

    pub(crate) fn increment(&mut self, kind: SourceKind) {
        match kind {
            SourceKind::Transcription => self.transcriptions.embedded += 1,
            SourceKind::Enrichment => self.enrichments.embedded += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub transcriptions: usize,
    pub enrichments: usize,
}

impl KindCounts {
    pub fn get(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Transcription => self.transcriptions,
            SourceKind::Enrichment => self.enrichments,
        }
    }

    pub(crate) fn set(&mut self, kind: SourceKind, value: usize) {
        match kind {
            SourceKind::Transcription => self.transcriptions = value,
            SourceKind::Enrichment => self.enrichments = value,
        }
    }
}

/// Content population vs. embedded population, computed on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingStats {
    pub total_by_source: KindCounts,
    /// Items whose current revision has a stored vector
    pub embedded_by_source: KindCounts,
    /// Items with no vector, or a vector for an older revision
    pub pending_by_source: KindCounts,
}

/// A source that grounded an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub source_id: String,
    pub kind: SourceKind,
    #[serde(rename = "score")]
    pub similarity_score: f32,
}

/// Answer of the query service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(rename = "answer")]
    pub answer_text: String,
    /// Ordered by similarity rank
    pub citations: Vec<Citation>,
}

impl QueryResult {
    pub fn is_grounded(&self) -> bool {
        !self.citations.is_empty()
    }
}

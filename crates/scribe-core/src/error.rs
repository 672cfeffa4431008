//! ============================================================================
//! Error Types - Failure taxonomy shared by the RAG pipeline
//! ============================================================================
//! Configuration failures are fatal to a batch run, upstream failures come
//! from the embedding/completion API, data failures from stored records.
//! ============================================================================

use thiserror::Error;

/// Errors surfaced by the scribe core.
#[derive(Error, Debug)]
pub enum RagError {
    /// Missing or invalid configuration (no API credential, bad env value)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Embedding or completion API failure
    #[error("upstream error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Upstream {
        message: String,
        /// HTTP status code when the API answered at all
        status: Option<u16>,
    },

    /// Vector dimensionality mismatch or malformed stored record
    #[error("data error: {0}")]
    Data(String),

    /// A referenced source item no longer exists
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied an unusable request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Embedded database failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    pub fn upstream(message: impl Into<String>) -> Self {
        RagError::Upstream {
            message: message.into(),
            status: None,
        }
    }

    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        RagError::Upstream {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Whether another attempt at the same call could succeed.
    ///
    /// Transport failures, rate limits and server errors are retryable.
    /// Client errors (bad key, bad request) and everything outside the
    /// upstream variant are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::Upstream { status: None, .. } => true,
            RagError::Upstream {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Rate limiting gets a longer backoff than ordinary retries
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RagError::Upstream { status: Some(429), .. })
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;

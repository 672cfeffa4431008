//! Deterministic providers for unit tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::completion::CompletionProvider;
use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, RagResult};

pub(crate) const STUB_DIM: usize = 8;

/// Hash-derived unit vector, stable per text
pub(crate) fn stub_vector(text: &str) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let raw: Vec<f32> = digest
        .iter()
        .take(STUB_DIM)
        .map(|b| *b as f32 + 1.0)
        .collect();
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    raw.into_iter().map(|v| v / norm).collect()
}

#[derive(Default)]
pub(crate) struct StubEmbedder {
    unconfigured: bool,
    overrides: HashMap<String, Vec<f32>>,
    /// text -> remaining failures; usize::MAX fails forever
    failures: Mutex<HashMap<String, usize>>,
    failure_status: Option<u16>,
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn unconfigured() -> Self {
        Self {
            unconfigured: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.to_string(), vector);
        self
    }

    pub(crate) fn failing_on(self, text: &str) -> Self {
        self.failing_times(text, usize::MAX)
    }

    pub(crate) fn failing_times(self, text: &str, times: usize) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(text.to_string(), times);
        }
        self
    }

    pub(crate) fn with_failure_status(mut self, status: u16) -> Self {
        self.failure_status = Some(status);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn is_configured(&self) -> bool {
        !self.unconfigured
    }

    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unconfigured {
            return Err(RagError::Configuration("stub not configured".into()));
        }
        {
            let mut failures = self.failures.lock().expect("stub lock");
            if let Some(remaining) = failures.get_mut(text) {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    return Err(match self.failure_status {
                        Some(status) => RagError::upstream_status(status, "stub failure"),
                        None => RagError::upstream("stub failure"),
                    });
                }
            }
        }
        Ok(self
            .overrides
            .get(text)
            .cloned()
            .unwrap_or_else(|| stub_vector(text)))
    }

    fn model(&self) -> &str {
        "stub-embedding"
    }
}

pub(crate) struct StubCompleter {
    reply: String,
    fail: bool,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl StubCompleter {
    pub(crate) fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::replying("")
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().expect("stub lock").clone()
    }
}

#[async_trait]
impl CompletionProvider for StubCompleter {
    async fn complete(&self, prompt: &str) -> RagResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().expect("stub lock") = Some(prompt.to_string());
        if self.fail {
            return Err(RagError::upstream_status(502, "stub completion failure"));
        }
        Ok(self.reply.clone())
    }
}

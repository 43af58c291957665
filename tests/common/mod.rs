//! Shared scripted collaborators for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use mindgraph::gateways::{
    DocumentParser, EmbeddingGateway, FileRef, GatewayError, LlmGateway, WebHit, WebSearch,
};

/// An LLM gateway that replays queued replies. When the queue runs dry,
/// `complete` returns the default reply and `complete_structured` reports
/// structured output as unavailable.
pub struct ScriptedLlm {
    completions: Mutex<VecDeque<Result<String, GatewayError>>>,
    structured: Mutex<VecDeque<Result<serde_json::Value, GatewayError>>>,
    default_reply: String,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            structured: Mutex::new(VecDeque::new()),
            default_reply: default_reply.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_completion(&self, reply: Result<String, GatewayError>) {
        self.completions.lock().push_back(reply);
    }

    pub fn push_structured(&self, reply: Result<serde_json::Value, GatewayError>) {
        self.structured.lock().push_back(reply);
    }

    /// Total calls made, structured and free-text combined.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmGateway for ScriptedLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.completions
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_reply.clone()))
    }

    async fn complete_structured(&self, _prompt: &str) -> Result<serde_json::Value, GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.structured.lock().pop_front().unwrap_or_else(|| {
            Err(GatewayError::StructuredOutput("no scripted reply".into()))
        })
    }
}

/// A parser that returns fixed content for any file.
pub struct StaticParser(pub &'static str);

#[async_trait]
impl DocumentParser for StaticParser {
    async fn extract(&self, _file: &FileRef) -> Result<String, GatewayError> {
        Ok(self.0.to_string())
    }
}

/// A parser that always fails.
pub struct FailingParser;

#[async_trait]
impl DocumentParser for FailingParser {
    async fn extract(&self, file: &FileRef) -> Result<String, GatewayError> {
        Err(GatewayError::Parse(format!(
            "cannot read {}",
            file.original_filename
        )))
    }
}

/// Deterministic embeddings derived from character counts; identical texts
/// get identical vectors and every vector is non-zero.
pub struct HashEmbedder;

pub const EMBED_DIM: usize = 8;

pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![1.0f32; EMBED_DIM];
    for (index, byte) in text.bytes().enumerate() {
        vector[index % EMBED_DIM] += f32::from(byte) / 255.0;
    }
    vector
}

#[async_trait]
impl EmbeddingGateway for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

/// Assigns each distinct text its own one-hot vector, so different texts are
/// exactly orthogonal and repeats are identical. Useful where the
/// character-count vectors of [`HashEmbedder`] would be too similar.
#[derive(Default)]
pub struct OneHotEmbedder {
    indexes: Mutex<FxHashMap<String, usize>>,
}

pub const ONE_HOT_DIM: usize = 32;

impl OneHotEmbedder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingGateway for OneHotEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut indexes = self.indexes.lock();
        Ok(texts
            .iter()
            .map(|text| {
                let next = indexes.len() % ONE_HOT_DIM;
                let index = *indexes.entry(text.clone()).or_insert(next);
                let mut vector = vec![0.0f32; ONE_HOT_DIM];
                vector[index] = 1.0;
                vector
            })
            .collect())
    }
}

/// Fails the first `failures` batches, then behaves like [`HashEmbedder`].
pub struct FlakyEmbedder {
    failures_remaining: AtomicU32,
}

impl FlakyEmbedder {
    pub fn new(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl EmbeddingGateway for FlakyEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let remaining = self.failures_remaining.load(Ordering::Relaxed);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::Relaxed);
            return Err(GatewayError::Embedding("transient embedding outage".into()));
        }
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

/// Records how often it was called and returns one fixed hit.
pub struct CountingWeb {
    calls: AtomicUsize,
}

impl CountingWeb {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WebSearch for CountingWeb {
    async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<WebHit>, GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(vec![WebHit {
            title: "External article".into(),
            url: "https://example.com/article".into(),
            content: format!("External coverage of: {query}"),
        }])
    }
}

//! External collaborator contracts.
//!
//! Everything the pipelines call out to (document parsing, LLM completion,
//! embeddings, and the optional secondary web search source) is reached
//! through the narrow async traits in this module. Implementations own all
//! transport concerns; the pipelines only see [`GatewayError`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by any external collaborator call.
///
/// These are per-call, potentially transient failures. Stages either degrade
/// gracefully (fallback parse, dropped section, skipped escalation) or
/// propagate them as a stage failure.
#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    /// Document-to-markdown extraction failed.
    #[error("document parsing failed: {0}")]
    #[diagnostic(code(mindgraph::gateway::parse))]
    Parse(String),

    /// LLM completion call failed.
    #[error("llm completion failed ({provider}): {message}")]
    #[diagnostic(
        code(mindgraph::gateway::llm),
        help("Completion failures degrade to a weaker extraction path where one exists.")
    )]
    Llm {
        provider: &'static str,
        message: String,
    },

    /// The gateway cannot produce structured output for this request.
    #[error("structured output unavailable: {0}")]
    #[diagnostic(code(mindgraph::gateway::structured_output))]
    StructuredOutput(String),

    /// Embedding request failed.
    #[error("embedding request failed: {0}")]
    #[diagnostic(code(mindgraph::gateway::embedding))]
    Embedding(String),

    /// Secondary-source (web) search failed.
    #[error("web search failed: {0}")]
    #[diagnostic(code(mindgraph::gateway::web_search))]
    WebSearch(String),
}

/// Reference to an uploaded document handed to ingestion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRef {
    /// Local path (or opaque handle) the parser understands.
    pub path: String,
    /// Original filename as uploaded, extension included.
    pub original_filename: String,
    /// Optional origin URI (object storage path, upload id, ...).
    pub source_uri: Option<String>,
}

impl FileRef {
    pub fn new(path: impl Into<String>, original_filename: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            original_filename: original_filename.into(),
            source_uri: None,
        }
    }

    #[must_use]
    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }

    /// Filename with its extension stripped; used as the root-label fallback
    /// when a document yields no outline.
    pub fn stem(&self) -> &str {
        self.original_filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .filter(|stem| !stem.is_empty())
            .unwrap_or(&self.original_filename)
    }
}

/// Converts an uploaded document into markdown text.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn extract(&self, file: &FileRef) -> Result<String, GatewayError>;
}

/// LLM completion surface.
///
/// `complete_structured` is best-effort: gateways without native structured
/// output return [`GatewayError::StructuredOutput`] and callers fall back to
/// free text plus manual JSON recovery.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Free-text completion.
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError>;

    /// Completion constrained to a JSON value.
    async fn complete_structured(&self, prompt: &str) -> Result<serde_json::Value, GatewayError> {
        let _ = prompt;
        Err(GatewayError::StructuredOutput(
            "this gateway does not support structured output".into(),
        ))
    }
}

/// Batch text embedding. Output length must equal input length.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError>;
}

/// A single result from the secondary retrieval source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Optional secondary retrieval source used for escalation. Configuring none
/// simply disables escalation; it is never an error.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>, GatewayError>;
}

/// Rotates completion calls across several gateway credentials.
///
/// The parallel outline fan-out issues many completions at once; spreading
/// them over a pool keeps any single credential under its rate limit.
pub struct RoundRobinLlm {
    pool: Vec<Arc<dyn LlmGateway>>,
    cursor: AtomicUsize,
}

impl RoundRobinLlm {
    pub fn new(pool: Vec<Arc<dyn LlmGateway>>) -> Self {
        Self {
            pool,
            cursor: AtomicUsize::new(0),
        }
    }

    fn pick(&self) -> Result<&Arc<dyn LlmGateway>, GatewayError> {
        if self.pool.is_empty() {
            return Err(GatewayError::Llm {
                provider: "round-robin",
                message: "no gateways configured".into(),
            });
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        Ok(&self.pool[index])
    }
}

#[async_trait]
impl LlmGateway for RoundRobinLlm {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        self.pick()?.complete(prompt).await
    }

    async fn complete_structured(&self, prompt: &str) -> Result<serde_json::Value, GatewayError> {
        self.pick()?.complete_structured(prompt).await
    }
}

//! Persistence contracts and record types.
//!
//! Three narrow stores back the pipelines:
//!
//! - [`VectorStore`]: chunk records with embeddings, similarity search with
//!   `(user_id, map_id)` equality pre-filters.
//! - [`MapStore`]: key/value CRUD for finished concept-map documents.
//! - [`ConversationStore`]: per-node chat history with soft deletion.
//!
//! [`memory::MemoryStore`] implements all three in-process for tests and
//! demos; production backends live outside this crate.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::hierarchy::HierarchyNode;
use crate::layout::MindMapLayout;

/// Errors surfaced by store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Backend-specific failure (connection, query, ...).
    #[error("store backend error: {0}")]
    #[diagnostic(code(mindgraph::store::backend))]
    Backend(String),

    /// (De)serialization of a stored document failed.
    #[error(transparent)]
    #[diagnostic(code(mindgraph::store::serde))]
    Serde(#[from] serde_json::Error),
}

/// A persisted document chunk with its embedding and provenance metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub user_id: String,
    pub map_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Header titles from the document root down to this chunk.
    pub hierarchy_path: Vec<String>,
    /// Original filename the chunk came from.
    pub source: String,
    pub page: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn new(
        user_id: impl Into<String>,
        map_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            map_id: map_id.into(),
            text: text.into(),
            embedding: Vec::new(),
            hierarchy_path: Vec::new(),
            source: String::new(),
            page: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    #[must_use]
    pub fn with_hierarchy_path(mut self, path: Vec<String>) -> Self {
        self.hierarchy_path = path;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Human-readable title: the hierarchy path when present, else the source
    /// filename.
    pub fn title(&self) -> String {
        if self.hierarchy_path.is_empty() {
            self.source.clone()
        } else {
            self.hierarchy_path.join(" > ")
        }
    }
}

/// Equality pre-filter applied before similarity ranking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkFilter {
    pub user_id: String,
    pub map_id: String,
}

/// A chunk paired with its similarity score for one query.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist a batch of chunk records, returning how many were stored.
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, StoreError>;

    /// Similarity search over embeddings, scoped by the filter, best first.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Number of stored chunks matching the filter.
    async fn count(&self, filter: &ChunkFilter) -> Result<usize, StoreError>;

    /// All stored chunks matching the filter, in insertion order.
    async fn chunks(&self, filter: &ChunkFilter) -> Result<Vec<ChunkRecord>, StoreError>;
}

/// Timing and size metadata recorded when ingestion finishes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub processing_time_seconds: Option<f64>,
    pub chunk_count: Option<usize>,
    pub embedding_dimension: Option<usize>,
}

/// The finished concept-map document: hierarchy, layout, and metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapDocument {
    pub user_id: String,
    pub map_id: String,
    pub title: String,
    pub source_filename: String,
    pub hierarchy: HierarchyNode,
    pub layout: MindMapLayout,
    pub processing: ProcessingMetadata,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MapStore: Send + Sync {
    /// Insert or replace the map document for `(user_id, map_id)`.
    async fn put_map(&self, doc: MapDocument) -> Result<(), StoreError>;

    async fn get_map(&self, user_id: &str, map_id: &str)
    -> Result<Option<MapDocument>, StoreError>;
}

/// One cited source attached to a generated answer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub source_id: String,
    pub title: String,
    pub page: Option<u32>,
    pub snippet: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Question,
    Answer,
}

/// One turn in a node conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub kind: MessageKind,
    pub content: String,
    pub citations: Vec<Citation>,
    pub confidence: Option<f32>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn question(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Question,
            content: content.into(),
            citations: Vec::new(),
            confidence: None,
            created_at: Utc::now(),
        }
    }

    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Answer,
            content: content.into(),
            citations: Vec::new(),
            confidence: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A per-node chat thread, keyed by `(user_id, map_id, node_id)`.
///
/// Never physically deleted; `is_deleted` hides it from every read path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub map_id: String,
    pub node_id: String,
    pub node_label: String,
    pub messages: Vec<ConversationMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a message, creating the conversation on first use. Returns the
    /// conversation id. `node_label` is refreshed on every append since map
    /// labels can change between questions.
    async fn append_message(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
        node_label: &str,
        message: ConversationMessage,
    ) -> Result<String, StoreError>;

    /// Fetch the live (non-deleted) conversation for the key, if any.
    async fn conversation(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Mark the conversation deleted. Returns whether one was found.
    async fn soft_delete(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
    ) -> Result<bool, StoreError>;
}

//! High-level facade tying both pipelines to their collaborators.
//!
//! [`MindGraph`] is the API surface an HTTP layer or CLI would call. Pipeline
//! failures come back as structured payloads with a user-facing message, not
//! as errors; `Err` is reserved for workflow wiring bugs.

use std::sync::Arc;

use futures_util::future::join_all;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::gateways::{
    DocumentParser, EmbeddingGateway, FileRef, GatewayError, LlmGateway, WebSearch,
};
use crate::graph::{self, ConceptTriple, GraphMode};
use crate::hierarchy::HierarchyNode;
use crate::ingestion::{IngestStage, IngestionPipeline};
use crate::layout::{self, MindMapLayout};
use crate::rag::{RagPipeline, RagRequest};
use crate::stores::{
    ChunkFilter, Citation, Conversation, ConversationStore, MapStore, ProcessingMetadata,
    StoreError, VectorStore,
};
use crate::workflow::EngineError;

/// Errors from facade operations that read stores or call gateways directly,
/// outside a workflow run.
#[derive(Debug, Error, Diagnostic)]
pub enum ServiceError {
    #[error(transparent)]
    #[diagnostic(code(mindgraph::service::store))]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(code(mindgraph::service::gateway))]
    Gateway(#[from] GatewayError),
}

/// Everything the facade needs injected.
pub struct Dependencies {
    pub parser: Arc<dyn DocumentParser>,
    pub llm: Arc<dyn LlmGateway>,
    pub embedder: Arc<dyn EmbeddingGateway>,
    pub vectors: Arc<dyn VectorStore>,
    pub maps: Arc<dyn MapStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub web: Option<Arc<dyn WebSearch>>,
    pub settings: Settings,
}

/// Terminal status of one document-processing request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Completed,
    Failed,
}

/// What one document-processing request produced.
#[derive(Clone, Debug, Serialize)]
pub struct MindMapOutcome {
    pub map_id: String,
    pub status: ProcessingStatus,
    pub stage: IngestStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<HierarchyNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<MindMapLayout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    /// User-facing explanation when processing failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The answer payload for one question.
#[derive(Clone, Debug, Serialize)]
pub struct NodeAnswer {
    pub query: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub processing_time_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A triple-based concept graph derived from a map's stored chunks.
#[derive(Clone, Debug, Serialize)]
pub struct ConceptMapOutcome {
    pub map_id: String,
    pub triples: Vec<ConceptTriple>,
    /// How many label variants were folded into a canonical concept.
    pub merged_labels: usize,
    pub layout: MindMapLayout,
}

const ANSWER_UNAVAILABLE: &str =
    "I'm sorry, I couldn't generate an answer for this question right now. Please try again.";

/// The assembled application: document ingestion plus question answering.
pub struct MindGraph {
    ingestion: IngestionPipeline,
    rag: RagPipeline,
    maps: Arc<dyn MapStore>,
    llm: Arc<dyn LlmGateway>,
    embedder: Arc<dyn EmbeddingGateway>,
    vectors: Arc<dyn VectorStore>,
    settings: Settings,
}

impl MindGraph {
    pub fn new(deps: Dependencies) -> Result<Self, EngineError> {
        let ingestion = IngestionPipeline::new(
            deps.parser,
            Arc::clone(&deps.llm),
            Arc::clone(&deps.embedder),
            Arc::clone(&deps.vectors),
            Arc::clone(&deps.maps),
            &deps.settings,
        )?;
        let rag = RagPipeline::new(
            Arc::clone(&deps.llm),
            Arc::clone(&deps.embedder),
            Arc::clone(&deps.vectors),
            deps.conversations,
            deps.web,
            &deps.settings,
        )?;
        Ok(Self {
            ingestion,
            rag,
            maps: deps.maps,
            llm: deps.llm,
            embedder: deps.embedder,
            vectors: deps.vectors,
            settings: deps.settings,
        })
    }

    /// Ingest one document into a concept map. A fresh `map_id` is minted when
    /// the caller does not supply one.
    pub async fn process_document(
        &self,
        file: FileRef,
        user_id: &str,
        map_id: Option<String>,
    ) -> Result<MindMapOutcome, EngineError> {
        let map_id = map_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let run = self.ingestion.run(file, user_id, &map_id).await?;
        let state = run.state;

        let processing_time_seconds = state.processing_seconds();
        let outcome = if run.outcome == crate::workflow::Outcome::Completed {
            MindMapOutcome {
                map_id,
                status: ProcessingStatus::Completed,
                stage: state.stage,
                title: state.hierarchy.as_ref().map(|h| h.title.clone()),
                hierarchy: state.hierarchy,
                layout: state.layout,
                processing_time_seconds,
                chunk_count: state.chunk_count,
                message: None,
            }
        } else {
            warn!(%map_id, error = ?state.error, "document processing failed");
            MindMapOutcome {
                map_id,
                status: ProcessingStatus::Failed,
                stage: state.stage,
                title: None,
                hierarchy: None,
                layout: None,
                processing_time_seconds: None,
                chunk_count: None,
                message: state.error,
            }
        };
        Ok(outcome)
    }

    /// Answer a question, optionally scoped to one mind-map node. A failed
    /// run degrades to an apologetic answer with the failure attached.
    pub async fn query_node(&self, request: RagRequest) -> Result<NodeAnswer, EngineError> {
        let query = request.question.clone();
        let run = self.rag.ask(request).await?;
        let elapsed = run.elapsed.as_secs_f64();
        let state = run.state;

        let answer = match state.answer {
            Some(answer) if run.outcome == crate::workflow::Outcome::Completed => NodeAnswer {
                query,
                answer,
                citations: state.citations,
                confidence: state.confidence,
                processing_time_seconds: elapsed,
                message: None,
            },
            _ => {
                warn!(error = ?state.error, "question answering failed");
                NodeAnswer {
                    query,
                    answer: ANSWER_UNAVAILABLE.to_string(),
                    citations: Vec::new(),
                    confidence: Some(0.0),
                    processing_time_seconds: elapsed,
                    message: state.error,
                }
            }
        };
        Ok(answer)
    }

    /// Build a triple-based concept graph from a map's stored chunks.
    ///
    /// Extracts relationship triples from every chunk, merges near-duplicate
    /// concept labels, and lays the result out as a flat labeled graph. A map
    /// with no stored chunks yields the placeholder two-node layout.
    pub async fn concept_map(
        &self,
        user_id: &str,
        map_id: &str,
    ) -> Result<ConceptMapOutcome, ServiceError> {
        let filter = ChunkFilter {
            user_id: user_id.to_string(),
            map_id: map_id.to_string(),
        };
        let chunks = self.vectors.chunks(&filter).await?;
        debug!(%map_id, chunks = chunks.len(), "building concept graph");

        let extractions = chunks
            .iter()
            .map(|chunk| graph::extract_triples(self.llm.as_ref(), &chunk.text));
        let raw: Vec<ConceptTriple> = join_all(extractions).await.into_iter().flatten().collect();

        let graph = graph::build_concept_graph(
            raw,
            GraphMode::MindMap,
            self.settings.mindmap_similarity_threshold,
            self.embedder.as_ref(),
        )
        .await?;
        let layout = layout::layout_triples(&graph.triples);
        Ok(ConceptMapOutcome {
            map_id: map_id.to_string(),
            triples: graph.triples,
            merged_labels: graph.merges.len(),
            layout,
        })
    }

    /// Processing metrics recorded when the map was built, if it exists.
    pub async fn workflow_metrics(
        &self,
        user_id: &str,
        map_id: &str,
    ) -> Result<Option<ProcessingMetadata>, StoreError> {
        Ok(self
            .maps
            .get_map(user_id, map_id)
            .await?
            .map(|doc| doc.processing))
    }

    /// The stored map document, if it exists.
    pub async fn map(
        &self,
        user_id: &str,
        map_id: &str,
    ) -> Result<Option<crate::stores::MapDocument>, StoreError> {
        self.maps.get_map(user_id, map_id).await
    }

    /// Soft-delete one node's conversation. Returns whether one existed.
    pub async fn delete_conversation(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
    ) -> Result<bool, StoreError> {
        self.rag.conversations().delete(user_id, map_id, node_id).await
    }

    /// The live conversation for one node, if any.
    pub async fn conversation_history(
        &self,
        user_id: &str,
        map_id: &str,
        node_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        self.rag.conversations().history(user_id, map_id, node_id).await
    }
}

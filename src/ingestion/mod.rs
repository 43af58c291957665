//! Document ingestion workflow.
//!
//! ```text
//!  extract ─▶ outline ─▶ optimize ─▶ chunk ─▶ embed+store ─▶ finalize
//!     │          │           │         │           │            │
//!     └──────────┴───────────┴─────────┴───────────┴── error ──▶ failed
//! ```
//!
//! Chunks persisted before a later failure are not rolled back; they remain
//! useful for retrieval even without a finished mind map.

pub mod chunking;
pub mod outline;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::gateways::{DocumentParser, EmbeddingGateway, FileRef, LlmGateway};
use crate::hierarchy::{HierarchyNode, parse_outline};
use crate::layout::{self, MindMapLayout};
use crate::stores::{ChunkRecord, MapDocument, MapStore, ProcessingMetadata, VectorStore};
use crate::workflow::{
    EngineError, Stage, StageContext, StageError, Transition, Workflow, WorkflowBuilder,
    WorkflowRun, WorkflowState,
};
use chunking::{DocChunk, chunk_by_headers};
use outline::{extract_outline, optimize_prompt, sanitize_outline};

/// Milestones recorded in the state as stages complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Initialized,
    ContentExtracted,
    OutlineExtracted,
    MindMapGenerated,
    ContentChunked,
    ChunksEmbedded,
    Completed,
    Failed,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Initialized => "initialized",
            IngestStage::ContentExtracted => "content_extracted",
            IngestStage::OutlineExtracted => "outline_extracted",
            IngestStage::MindMapGenerated => "mind_map_generated",
            IngestStage::ContentChunked => "content_chunked",
            IngestStage::ChunksEmbedded => "chunks_embedded",
            IngestStage::Completed => "completed",
            IngestStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Executable stage identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IngestStep {
    ExtractContent,
    ExtractOutline,
    OptimizeMindMap,
    ChunkContent,
    EmbedAndStore,
    Finalize,
}

impl fmt::Display for IngestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStep::ExtractContent => "extract_content",
            IngestStep::ExtractOutline => "extract_outline",
            IngestStep::OptimizeMindMap => "optimize_mind_map",
            IngestStep::ChunkContent => "chunk_content",
            IngestStep::EmbedAndStore => "embed_and_store",
            IngestStep::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// State threaded through one ingestion run.
#[derive(Clone, Debug)]
pub struct IngestionState {
    pub user_id: String,
    pub map_id: String,
    pub file: FileRef,
    pub raw_content: Option<String>,
    pub outline: Option<String>,
    pub hierarchy: Option<HierarchyNode>,
    pub chunks: Option<Vec<DocChunk>>,
    pub layout: Option<MindMapLayout>,
    pub stage: IngestStage,
    pub error: Option<String>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub chunk_count: Option<usize>,
    pub embedding_dimension: Option<usize>,
}

impl IngestionState {
    pub fn new(user_id: impl Into<String>, map_id: impl Into<String>, file: FileRef) -> Self {
        Self {
            user_id: user_id.into(),
            map_id: map_id.into(),
            file,
            raw_content: None,
            outline: None,
            hierarchy: None,
            chunks: None,
            layout: None,
            stage: IngestStage::Initialized,
            error: None,
            retry_count: 0,
            started_at: None,
            finished_at: None,
            chunk_count: None,
            embedding_dimension: None,
        }
    }

    pub fn processing_seconds(&self) -> Option<f64> {
        let start = self.started_at?;
        let end = self.finished_at?;
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }
}

impl WorkflowState for IngestionState {
    fn failure(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn record_failure(&mut self, message: String) {
        self.error = Some(message);
        self.stage = IngestStage::Failed;
    }
}

fn route(state: &IngestionState) -> Transition<IngestStep> {
    match state.stage {
        IngestStage::Initialized => Transition::Next(IngestStep::ExtractContent),
        IngestStage::ContentExtracted => Transition::Next(IngestStep::ExtractOutline),
        IngestStage::OutlineExtracted => Transition::Next(IngestStep::OptimizeMindMap),
        IngestStage::MindMapGenerated => Transition::Next(IngestStep::ChunkContent),
        IngestStage::ContentChunked => Transition::Next(IngestStep::EmbedAndStore),
        IngestStage::ChunksEmbedded => Transition::Next(IngestStep::Finalize),
        IngestStage::Completed | IngestStage::Failed => Transition::Complete,
    }
}

struct ExtractContent {
    parser: Arc<dyn DocumentParser>,
}

#[async_trait]
impl Stage<IngestionState> for ExtractContent {
    async fn run(&self, state: &mut IngestionState, ctx: StageContext) -> Result<(), StageError> {
        state.started_at = Some(Utc::now());
        let content = self.parser.extract(&state.file).await?;
        if content.trim().is_empty() {
            return Err(StageError::Validation(format!(
                "no content extracted from {}",
                state.file.original_filename
            )));
        }
        ctx.emit("ingestion", format!("extracted {} characters", content.len()))?;
        state.raw_content = Some(content);
        state.stage = IngestStage::ContentExtracted;
        Ok(())
    }
}

struct ExtractOutline {
    llm: Arc<dyn LlmGateway>,
    section_max_chars: usize,
}

#[async_trait]
impl Stage<IngestionState> for ExtractOutline {
    async fn run(&self, state: &mut IngestionState, ctx: StageContext) -> Result<(), StageError> {
        let content = state
            .raw_content
            .as_deref()
            .ok_or(StageError::MissingInput { what: "raw_content" })?;
        let merged = extract_outline(Arc::clone(&self.llm), content, self.section_max_chars).await;
        ctx.emit(
            "ingestion",
            format!("merged outline has {} lines", merged.lines().count()),
        )?;
        state.outline = Some(merged);
        state.stage = IngestStage::OutlineExtracted;
        Ok(())
    }
}

struct OptimizeMindMap {
    llm: Arc<dyn LlmGateway>,
    max_levels: usize,
}

#[async_trait]
impl Stage<IngestionState> for OptimizeMindMap {
    async fn run(&self, state: &mut IngestionState, ctx: StageContext) -> Result<(), StageError> {
        let outline = state
            .outline
            .as_deref()
            .ok_or(StageError::MissingInput { what: "outline" })?;
        let optimized = if outline.is_empty() {
            String::new()
        } else {
            match self.llm.complete(&optimize_prompt(outline)).await {
                Ok(reply) => {
                    let cleaned = sanitize_outline(std::slice::from_ref(&reply));
                    if cleaned.is_empty() {
                        warn!("optimizer returned nothing usable; keeping unoptimized outline");
                        outline.to_string()
                    } else {
                        cleaned
                    }
                }
                Err(error) => {
                    warn!(%error, "outline optimizer failed; keeping unoptimized outline");
                    outline.to_string()
                }
            }
        };
        let tree = parse_outline(&optimized, state.file.stem(), self.max_levels);
        ctx.emit(
            "ingestion",
            format!("hierarchy has {} nodes, depth {}", tree.count(), tree.depth()),
        )?;
        state.outline = Some(optimized);
        state.hierarchy = Some(tree);
        state.stage = IngestStage::MindMapGenerated;
        Ok(())
    }
}

struct ChunkContent;

#[async_trait]
impl Stage<IngestionState> for ChunkContent {
    async fn run(&self, state: &mut IngestionState, ctx: StageContext) -> Result<(), StageError> {
        let content = state
            .raw_content
            .as_deref()
            .ok_or(StageError::MissingInput { what: "raw_content" })?;
        let chunks = chunk_by_headers(content);
        if chunks.is_empty() {
            return Err(StageError::Validation(
                "document produced no chunks".into(),
            ));
        }
        ctx.emit("ingestion", format!("chunked into {} pieces", chunks.len()))?;
        state.chunk_count = Some(chunks.len());
        state.chunks = Some(chunks);
        state.stage = IngestStage::ContentChunked;
        Ok(())
    }
}

struct EmbedAndStore {
    embedder: Arc<dyn EmbeddingGateway>,
    vectors: Arc<dyn VectorStore>,
}

#[async_trait]
impl Stage<IngestionState> for EmbedAndStore {
    async fn run(&self, state: &mut IngestionState, ctx: StageContext) -> Result<(), StageError> {
        let chunks = state
            .chunks
            .as_ref()
            .ok_or(StageError::MissingInput { what: "chunks" })?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(StageError::Validation(format!(
                "embedding count {} does not match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }
        state.embedding_dimension = vectors.first().map(Vec::len);

        let records: Vec<ChunkRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| {
                ChunkRecord::new(&state.user_id, &state.map_id, &chunk.text)
                    .with_id(chunk.chunk_id.clone())
                    .with_embedding(embedding)
                    .with_hierarchy_path(chunk.hierarchy_path.clone())
                    .with_source(state.file.original_filename.clone())
            })
            .collect();
        let stored = self.vectors.insert_chunks(records).await?;
        ctx.emit("ingestion", format!("persisted {stored} embedded chunks"))?;
        state.stage = IngestStage::ChunksEmbedded;
        Ok(())
    }
}

struct Finalize {
    maps: Arc<dyn MapStore>,
}

#[async_trait]
impl Stage<IngestionState> for Finalize {
    async fn run(&self, state: &mut IngestionState, ctx: StageContext) -> Result<(), StageError> {
        let hierarchy = state
            .hierarchy
            .clone()
            .ok_or(StageError::MissingInput { what: "hierarchy" })?;
        let map_layout =
            layout::layout_hierarchy(std::slice::from_ref(&hierarchy), &hierarchy.title);
        state.finished_at = Some(Utc::now());

        let processing = ProcessingMetadata {
            processing_time_seconds: state.processing_seconds(),
            chunk_count: state.chunk_count,
            embedding_dimension: state.embedding_dimension,
        };
        self.maps
            .put_map(MapDocument {
                user_id: state.user_id.clone(),
                map_id: state.map_id.clone(),
                title: hierarchy.title.clone(),
                source_filename: state.file.original_filename.clone(),
                hierarchy: hierarchy.clone(),
                layout: map_layout.clone(),
                processing: processing.clone(),
                created_at: Utc::now(),
            })
            .await?;

        info!(
            user_id = %state.user_id,
            map_id = %state.map_id,
            chunks = ?processing.chunk_count,
            embedding_dimension = ?processing.embedding_dimension,
            seconds = ?processing.processing_time_seconds,
            "document ingestion complete"
        );
        ctx.emit(
            "metrics",
            format!(
                "chunks={:?} dimension={:?} seconds={:?}",
                processing.chunk_count,
                processing.embedding_dimension,
                processing.processing_time_seconds
            ),
        )?;
        state.layout = Some(map_layout);
        state.hierarchy = Some(hierarchy);
        state.stage = IngestStage::Completed;
        Ok(())
    }
}

/// The assembled ingestion workflow with its collaborators injected.
pub struct IngestionPipeline {
    workflow: Workflow<IngestionState, IngestStep>,
}

impl IngestionPipeline {
    pub fn new(
        parser: Arc<dyn DocumentParser>,
        llm: Arc<dyn LlmGateway>,
        embedder: Arc<dyn EmbeddingGateway>,
        vectors: Arc<dyn VectorStore>,
        maps: Arc<dyn MapStore>,
        settings: &crate::config::Settings,
    ) -> Result<Self, EngineError> {
        let workflow = WorkflowBuilder::new("ingestion")
            .add_stage(IngestStep::ExtractContent, Arc::new(ExtractContent { parser }))
            .add_stage(
                IngestStep::ExtractOutline,
                Arc::new(ExtractOutline {
                    llm: Arc::clone(&llm),
                    section_max_chars: settings.section_max_chars,
                }),
            )
            .add_stage(
                IngestStep::OptimizeMindMap,
                Arc::new(OptimizeMindMap {
                    llm,
                    max_levels: settings.max_outline_levels,
                }),
            )
            .add_stage(IngestStep::ChunkContent, Arc::new(ChunkContent))
            .add_stage(
                IngestStep::EmbedAndStore,
                Arc::new(EmbedAndStore { embedder, vectors }),
            )
            .add_stage(IngestStep::Finalize, Arc::new(Finalize { maps }))
            .with_entry(IngestStep::ExtractContent)
            .with_router(route)
            .with_max_steps(settings.max_workflow_steps)
            .compile()?;
        Ok(Self { workflow })
    }

    /// Run the full ingestion workflow for one document.
    pub async fn run(
        &self,
        file: FileRef,
        user_id: &str,
        map_id: &str,
    ) -> Result<WorkflowRun<IngestionState>, EngineError> {
        self.workflow
            .run(IngestionState::new(user_id, map_id, file))
            .await
    }
}

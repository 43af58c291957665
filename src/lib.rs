//! Document-to-mind-map generation with retrieval-augmented question
//! answering over the result.
//!
//! Two staged workflows share one engine:
//!
//! ```text
//!               ┌────────────────────── ingestion ──────────────────────┐
//!   document ──▶ extract ─▶ outline ─▶ optimize ─▶ chunk ─▶ embed+store ─▶ map
//!                                                                │
//!                                                          vector store
//!                                                                │
//!               ┌──────────────────────── rag ────────────┐      │
//!   question ──▶ retrieve ─▶ grade ─▶ generate ─▶ finalize ◀─────┘
//!                              │
//!                        web escalation
//! ```
//!
//! - [`workflow`]: the generic stage/router runner both pipelines use.
//! - [`ingestion`]: document → outline → hierarchy → embedded chunks.
//! - [`layout`]: hierarchical and triple-based mind-map geometry.
//! - [`graph`]: concept-triple extraction and similarity-based label merging.
//! - [`rag`]: retrieval, sufficiency grading, answer generation, and
//!   per-node conversation history.
//! - [`service`]: the [`MindGraph`](service::MindGraph) facade over both.
//!
//! All external collaborators (parsers, LLMs, embedders, stores) are trait
//! objects in [`gateways`] and [`stores`]; [`stores::memory::MemoryStore`]
//! backs tests and demos in-process.

pub mod config;
pub mod gateways;
pub mod graph;
pub mod hierarchy;
pub mod ingestion;
pub mod layout;
pub mod rag;
pub mod service;
pub mod stores;
pub mod telemetry;
pub mod util;
pub mod workflow;

pub use config::Settings;
pub use gateways::{
    DocumentParser, EmbeddingGateway, FileRef, GatewayError, LlmGateway, RoundRobinLlm, WebHit,
    WebSearch,
};
pub use graph::{ConceptGraph, ConceptTriple, GraphMode, build_concept_graph, extract_triples};
pub use hierarchy::HierarchyNode;
pub use ingestion::{IngestStage, IngestionPipeline, IngestionState};
pub use layout::MindMapLayout;
pub use rag::{NodeContext, RagPipeline, RagRequest, RagStage, RagState};
pub use service::{
    ConceptMapOutcome, Dependencies, MindGraph, MindMapOutcome, NodeAnswer, ProcessingStatus,
    ServiceError,
};
pub use stores::{ChunkFilter, ChunkRecord, Citation, MapDocument, StoreError};
pub use workflow::{Outcome, Workflow, WorkflowBuilder, WorkflowRun};

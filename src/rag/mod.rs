//! Retrieval-augmented question answering over ingested documents.
//!
//! ```text
//!  retrieve ─▶ grade ─▶ generate ─▶ finalize
//!      │         │          │           │
//!      │   (zero docs skip grading)     │
//!      └─────────┴──────────┴── error ──▶ failed
//! ```
//!
//! The workflow itself is policy-free; caching, history injection and the
//! retrieval retry loop live in [`RagPipeline::ask`].

pub mod conversation;
mod stages;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Settings;
use crate::gateways::{EmbeddingGateway, LlmGateway, WebSearch};
use crate::stores::{Citation, ConversationStore, VectorStore};
use crate::workflow::{
    EngineError, Outcome, Transition, Workflow, WorkflowBuilder, WorkflowRun, WorkflowState,
};
use conversation::ConversationService;
use stages::{FinalizeRag, Generate, Grade, Retrieve};

/// Milestones recorded in the state as stages complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagStage {
    Initialized,
    DocumentsRetrieved,
    DocumentsGraded,
    AnswerGenerated,
    Completed,
    Failed,
}

impl fmt::Display for RagStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RagStage::Initialized => "initialized",
            RagStage::DocumentsRetrieved => "documents_retrieved",
            RagStage::DocumentsGraded => "documents_graded",
            RagStage::AnswerGenerated => "answer_generated",
            RagStage::Completed => "completed",
            RagStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Executable stage identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RagStep {
    Retrieve,
    Grade,
    Generate,
    Finalize,
}

impl fmt::Display for RagStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RagStep::Retrieve => "retrieve",
            RagStep::Grade => "grade",
            RagStep::Generate => "generate",
            RagStep::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// The mind-map node a question is asked against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeContext {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Where a context document came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocOrigin {
    VectorStore,
    WebSearch,
}

/// One document offered to the answer model as context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextDoc {
    pub id: String,
    pub title: String,
    pub text: String,
    pub page: Option<u32>,
    pub score: Option<f32>,
    pub origin: DocOrigin,
}

/// The model's verdict on whether retrieved documents suffice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SufficiencyGrade {
    pub is_sufficient: bool,
    #[serde(alias = "confidence_score", default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

impl SufficiencyGrade {
    pub(crate) fn insufficient() -> Self {
        Self {
            is_sufficient: false,
            confidence: 0.0,
            reasoning: String::new(),
        }
    }
}

/// State threaded through one question-answering run.
#[derive(Clone, Debug)]
pub struct RagState {
    pub user_id: String,
    pub map_id: String,
    pub query: String,
    pub top_k: usize,
    pub node: Option<NodeContext>,
    pub history_context: Option<String>,
    pub documents: Vec<ContextDoc>,
    pub grade: Option<SufficiencyGrade>,
    pub escalated: bool,
    pub answer: Option<String>,
    pub citations: Vec<Citation>,
    pub confidence: Option<f32>,
    pub stage: RagStage,
    pub error: Option<String>,
    pub retry_count: u32,
    pub retrieval_seconds: Option<f64>,
    pub generation_seconds: Option<f64>,
    pub total_documents_found: Option<usize>,
}

impl RagState {
    pub fn new(
        user_id: impl Into<String>,
        map_id: impl Into<String>,
        query: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            map_id: map_id.into(),
            query: query.into(),
            top_k,
            node: None,
            history_context: None,
            documents: Vec::new(),
            grade: None,
            escalated: false,
            answer: None,
            citations: Vec::new(),
            confidence: None,
            stage: RagStage::Initialized,
            error: None,
            retry_count: 0,
            retrieval_seconds: None,
            generation_seconds: None,
            total_documents_found: None,
        }
    }
}

impl WorkflowState for RagState {
    fn failure(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn record_failure(&mut self, message: String) {
        self.error = Some(message);
        self.stage = RagStage::Failed;
    }
}

fn route(state: &RagState) -> Transition<RagStep> {
    match state.stage {
        RagStage::Initialized => Transition::Next(RagStep::Retrieve),
        // Nothing retrieved means nothing to grade; answer from general
        // knowledge instead of failing.
        RagStage::DocumentsRetrieved if state.documents.is_empty() => {
            Transition::Next(RagStep::Generate)
        }
        RagStage::DocumentsRetrieved => Transition::Next(RagStep::Grade),
        RagStage::DocumentsGraded => Transition::Next(RagStep::Generate),
        RagStage::AnswerGenerated => Transition::Next(RagStep::Finalize),
        RagStage::Completed | RagStage::Failed => Transition::Complete,
    }
}

/// One incoming question.
#[derive(Clone, Debug, Deserialize)]
pub struct RagRequest {
    pub user_id: String,
    pub map_id: String,
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub node: Option<NodeContext>,
}

/// The assembled question-answering workflow plus caller-side policy:
/// answer caching, conversation-history injection, and retrieval retries.
pub struct RagPipeline {
    workflow: Workflow<RagState, RagStep>,
    conversations: ConversationService,
    max_retries: u32,
    default_top_k: usize,
}

impl RagPipeline {
    pub fn new(
        llm: Arc<dyn LlmGateway>,
        embedder: Arc<dyn EmbeddingGateway>,
        vectors: Arc<dyn VectorStore>,
        conversation_store: Arc<dyn ConversationStore>,
        web: Option<Arc<dyn WebSearch>>,
        settings: &Settings,
    ) -> Result<Self, EngineError> {
        let workflow = WorkflowBuilder::new("rag")
            .add_stage(RagStep::Retrieve, Arc::new(Retrieve { embedder, vectors }))
            .add_stage(
                RagStep::Grade,
                Arc::new(Grade {
                    llm: Arc::clone(&llm),
                    web,
                    confidence_threshold: settings.grading_confidence_threshold,
                    min_docs: settings.min_docs_for_grading,
                    max_web_results: settings.max_web_results,
                }),
            )
            .add_stage(RagStep::Generate, Arc::new(Generate { llm }))
            .add_stage(RagStep::Finalize, Arc::new(FinalizeRag))
            .with_entry(RagStep::Retrieve)
            .with_router(route)
            .with_max_steps(settings.max_workflow_steps)
            .compile()?;
        Ok(Self {
            workflow,
            conversations: ConversationService::new(
                conversation_store,
                settings.history_context_limit,
            ),
            max_retries: settings.max_retrieval_retries,
            default_top_k: settings.default_top_k,
        })
    }

    /// Answer one question. Node-scoped questions check the conversation
    /// cache first and record the exchange afterwards; retrieval failures are
    /// retried up to the configured cap before the run is surfaced as failed.
    pub async fn ask(&self, request: RagRequest) -> Result<WorkflowRun<RagState>, EngineError> {
        let top_k = request.top_k.unwrap_or(self.default_top_k);

        if let Some(node) = &request.node {
            match self
                .conversations
                .cached_answer(&request.user_id, &request.map_id, &node.id, &request.question)
                .await
            {
                Ok(Some(cached)) => {
                    info!(node_id = %node.id, "serving cached answer");
                    let mut state =
                        RagState::new(&request.user_id, &request.map_id, &request.question, top_k);
                    state.node = Some(node.clone());
                    state.answer = Some(cached.answer);
                    state.citations = cached.citations;
                    state.confidence = cached.confidence;
                    state.stage = RagStage::Completed;
                    return Ok(WorkflowRun {
                        state,
                        outcome: Outcome::Completed,
                        steps: 0,
                        elapsed: Duration::ZERO,
                        events: Vec::new(),
                    });
                }
                Ok(None) => {}
                Err(error) => warn!(%error, "cache lookup failed; answering fresh"),
            }
        }

        let history_context = match &request.node {
            Some(node) => self
                .conversations
                .recent_context(&request.user_id, &request.map_id, &node.id)
                .await
                .unwrap_or_else(|error| {
                    warn!(%error, "history lookup failed; answering without it");
                    None
                }),
            None => None,
        };

        let mut attempt: u32 = 0;
        let run = loop {
            let mut state =
                RagState::new(&request.user_id, &request.map_id, &request.question, top_k);
            state.node = request.node.clone();
            state.history_context = history_context.clone();
            state.retry_count = attempt;

            let run = self.workflow.run(state).await?;
            let retrieval_failed =
                run.outcome == Outcome::Failed && run.state.total_documents_found.is_none();
            if retrieval_failed && attempt < self.max_retries {
                attempt += 1;
                warn!(attempt, "retrieval failed; retrying");
                continue;
            }
            break run;
        };

        if run.is_completed() {
            if let (Some(node), Some(answer)) = (&request.node, run.state.answer.as_deref()) {
                if let Err(error) = self
                    .conversations
                    .record_exchange(
                        &request.user_id,
                        &request.map_id,
                        &node.id,
                        &node.label,
                        &request.question,
                        answer,
                        run.state.citations.clone(),
                        run.state.confidence,
                    )
                    .await
                {
                    warn!(%error, "failed to record the exchange");
                }
            }
        }
        Ok(run)
    }

    pub fn conversations(&self) -> &ConversationService {
        &self.conversations
    }
}

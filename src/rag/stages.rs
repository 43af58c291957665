//! Stage implementations for the question-answering workflow.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ContextDoc, DocOrigin, RagStage, RagState, SufficiencyGrade};
use crate::gateways::{EmbeddingGateway, LlmGateway, WebSearch};
use crate::stores::{Citation, ChunkFilter, ScoredChunk, VectorStore};
use crate::util::{first_json_object, strip_code_fences, truncate_chars};
use crate::workflow::{Stage, StageContext, StageError};

const SNIPPET_CHARS: usize = 200;

pub(super) struct Retrieve {
    pub embedder: Arc<dyn EmbeddingGateway>,
    pub vectors: Arc<dyn VectorStore>,
}

#[async_trait]
impl Stage<RagState> for Retrieve {
    async fn run(&self, state: &mut RagState, ctx: StageContext) -> Result<(), StageError> {
        let started = Instant::now();
        let query_text = augmented_query(state);
        let embedded = self
            .embedder
            .embed_batch(std::slice::from_ref(&query_text))
            .await?;
        let query_vector = embedded.into_iter().next().ok_or(StageError::Validation(
            "embedding gateway returned no vector for the query".into(),
        ))?;
        let filter = ChunkFilter {
            user_id: state.user_id.clone(),
            map_id: state.map_id.clone(),
        };
        let hits = self
            .vectors
            .search(&query_vector, state.top_k, &filter)
            .await?;

        state.total_documents_found = Some(hits.len());
        state.documents = hits.into_iter().map(context_doc).collect();
        state.retrieval_seconds = Some(started.elapsed().as_secs_f64());
        ctx.emit(
            "retrieval",
            format!("retrieved {} documents", state.documents.len()),
        )?;
        state.stage = RagStage::DocumentsRetrieved;
        Ok(())
    }
}

fn augmented_query(state: &RagState) -> String {
    let Some(node) = &state.node else {
        return state.query.clone();
    };
    let mut text = format!("{} (in the context of {})", state.query, node.label);
    if !node.children.is_empty() {
        text.push_str(&format!(", covering {}", node.children.join(", ")));
    }
    text
}

fn context_doc(hit: ScoredChunk) -> ContextDoc {
    ContextDoc {
        id: hit.chunk.id.clone(),
        title: hit.chunk.title(),
        text: hit.chunk.text.clone(),
        page: hit.chunk.page,
        score: Some(hit.score),
        origin: DocOrigin::VectorStore,
    }
}

pub(super) struct Grade {
    pub llm: Arc<dyn LlmGateway>,
    pub web: Option<Arc<dyn WebSearch>>,
    pub confidence_threshold: f32,
    pub min_docs: usize,
    pub max_web_results: usize,
}

#[async_trait]
impl Stage<RagState> for Grade {
    async fn run(&self, state: &mut RagState, ctx: StageContext) -> Result<(), StageError> {
        let grade = if state.documents.len() < self.min_docs {
            info!(
                documents = state.documents.len(),
                "too few documents for grading; forcing escalation"
            );
            SufficiencyGrade {
                is_sufficient: false,
                confidence: 0.0,
                reasoning: "not enough local documents to grade".into(),
            }
        } else {
            self.grade_documents(state).await
        };

        let escalate = !(grade.is_sufficient && grade.confidence >= self.confidence_threshold);
        ctx.emit(
            "grading",
            format!(
                "sufficient={} confidence={:.2} escalate={escalate}",
                grade.is_sufficient, grade.confidence
            ),
        )?;

        if escalate {
            match &self.web {
                Some(web) => match web.search(&state.query, self.max_web_results).await {
                    Ok(hits) => {
                        info!(results = hits.len(), "escalated to secondary source");
                        state.escalated = true;
                        state.documents.extend(hits.into_iter().map(|hit| ContextDoc {
                            id: hit.url.clone(),
                            title: hit.title,
                            text: hit.content,
                            page: None,
                            score: None,
                            origin: DocOrigin::WebSearch,
                        }));
                    }
                    Err(error) => {
                        warn!(%error, "secondary source failed; continuing without it");
                    }
                },
                None => {
                    debug!("no secondary source configured; skipping escalation");
                }
            }
        }

        state.grade = Some(grade);
        state.stage = RagStage::DocumentsGraded;
        Ok(())
    }
}

impl Grade {
    async fn grade_documents(&self, state: &RagState) -> SufficiencyGrade {
        let prompt = grading_prompt(state);
        match self.llm.complete_structured(&prompt).await {
            Ok(value) => {
                if let Ok(grade) = serde_json::from_value::<SufficiencyGrade>(value) {
                    return grade;
                }
                debug!("structured grade had an unexpected shape; retrying as free text");
            }
            Err(error) => debug!(%error, "structured grading unavailable"),
        }
        match self.llm.complete(&prompt).await {
            Ok(reply) => parse_grade(&reply),
            Err(error) => {
                warn!(%error, "grading call failed; treating documents as insufficient");
                SufficiencyGrade::insufficient()
            }
        }
    }
}

fn grading_prompt(state: &RagState) -> String {
    let snippets: Vec<String> = state
        .documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("[{}] {}", i + 1, truncate_chars(&doc.text, 500)))
        .collect();
    format!(
        "Question: {}\n\nDocument snippets:\n{}\n\n\
         Judge whether these snippets are sufficient to answer the question.\n\
         Respond with only a JSON object: \
         {{\"is_sufficient\": true|false, \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}}",
        state.query,
        snippets.join("\n")
    )
}

/// Manual recovery of a grade from a free-text reply. Unparsable replies
/// default to insufficient with zero confidence; grading never fails a run.
pub(super) fn parse_grade(reply: &str) -> SufficiencyGrade {
    let cleaned = strip_code_fences(reply);
    let candidate = first_json_object(cleaned).unwrap_or(cleaned);
    serde_json::from_str(candidate).unwrap_or_else(|_| SufficiencyGrade::insufficient())
}

pub(super) struct Generate {
    pub llm: Arc<dyn LlmGateway>,
}

#[async_trait]
impl Stage<RagState> for Generate {
    async fn run(&self, state: &mut RagState, ctx: StageContext) -> Result<(), StageError> {
        let started = Instant::now();
        let prompt = answer_prompt(state);
        let answer = self.llm.complete(&prompt).await?;

        // Every document offered as context becomes a citation; no attempt is
        // made to infer which ones the model actually drew on.
        state.citations = state
            .documents
            .iter()
            .map(|doc| Citation {
                source_id: doc.id.clone(),
                title: doc.title.clone(),
                page: doc.page,
                snippet: truncate_chars(&doc.text, SNIPPET_CHARS),
            })
            .collect();

        let mut confidence = (state.documents.len() as f32 / 3.0).min(1.0);
        if state.node.is_some() {
            confidence = (confidence + 0.1).min(1.0);
        }
        state.confidence = Some(confidence);
        state.answer = Some(answer);
        state.generation_seconds = Some(started.elapsed().as_secs_f64());
        ctx.emit(
            "generation",
            format!("answered with {} citations", state.citations.len()),
        )?;
        state.stage = RagStage::AnswerGenerated;
        Ok(())
    }
}

fn answer_prompt(state: &RagState) -> String {
    let mut prompt = String::new();
    if let Some(history) = &state.history_context {
        prompt.push_str(history);
        prompt.push('\n');
    }
    if let Some(node) = &state.node {
        prompt.push_str(&format!("The question concerns the topic \"{}\"", node.label));
        if !node.children.is_empty() {
            prompt.push_str(&format!(
                " and its subtopics: {}",
                node.children.join(", ")
            ));
        }
        prompt.push_str(".\n");
    }
    if state.documents.is_empty() {
        prompt.push_str(
            "No source documents are available; answer from general knowledge and say so.\n",
        );
    } else {
        prompt.push_str("Answer using the sources below, citing them where relevant.\n\n");
        for (index, doc) in state.documents.iter().enumerate() {
            let origin = match doc.origin {
                DocOrigin::VectorStore => "document",
                DocOrigin::WebSearch => "web",
            };
            prompt.push_str(&format!(
                "[Source {} ({origin}): {}]\n{}\n\n",
                index + 1,
                doc.title,
                doc.text
            ));
        }
    }
    prompt.push_str(&format!("Question: {}\n", state.query));
    prompt
}

pub(super) struct FinalizeRag;

#[async_trait]
impl Stage<RagState> for FinalizeRag {
    async fn run(&self, state: &mut RagState, ctx: StageContext) -> Result<(), StageError> {
        info!(
            user_id = %state.user_id,
            map_id = %state.map_id,
            documents = ?state.total_documents_found,
            escalated = state.escalated,
            retrieval_seconds = ?state.retrieval_seconds,
            generation_seconds = ?state.generation_seconds,
            confidence = ?state.confidence,
            "question answering complete"
        );
        ctx.emit(
            "metrics",
            format!(
                "documents={:?} escalated={} retrieval={:?}s generation={:?}s",
                state.total_documents_found,
                state.escalated,
                state.retrieval_seconds,
                state.generation_seconds
            ),
        )?;
        state.stage = RagStage::Completed;
        Ok(())
    }
}

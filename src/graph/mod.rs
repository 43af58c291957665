//! Concept graph construction: triple extraction and similarity merging.
//!
//! ```text
//!  chunk text ──LLM──▶ raw triples ──filter──▶ normalize ──▶ merge ──▶ dedup
//!                │                                             │
//!                └── JSON-scrape fallbacks                     └── embeddings
//! ```
//!
//! Extraction never fails a pipeline: unparsable model output degrades to an
//! empty triple set for that unit.

pub mod merge;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::gateways::LlmGateway;
use crate::util::strip_code_fences;

pub use merge::{ConceptGraph, GraphMode, MergeMap, build_concept_graph};

/// A `(source, target, relation)` fact extracted from text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConceptTriple {
    pub source: String,
    pub target: String,
    pub relation: String,
}

impl ConceptTriple {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
        }
    }
}

fn triple_prompt(text: &str) -> String {
    format!(
        "Extract the key concepts and their relationships from the text below.\n\
         Respond with only a JSON object of the shape:\n\
         {{\"triples\": [{{\"source\": \"...\", \"target\": \"...\", \"relation\": \"...\"}}]}}\n\
         Use short noun phrases for source and target and a short verb phrase for relation.\n\n\
         Text:\n{text}"
    )
}

/// Matches the first `{"triples": [...]}` object embedded in prose.
static TRIPLES_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{[^{}]*"triples"[^{}]*\[[^\]]*\][^{}]*\}"#).expect("triples pattern")
});

/// Extract triples from one unit of text via the LLM gateway.
///
/// Fallback ladder: structured output → JSON object scraped out of the free
/// text → the entire trimmed reply as JSON → zero triples.
pub async fn extract_triples(llm: &dyn LlmGateway, text: &str) -> Vec<ConceptTriple> {
    let prompt = triple_prompt(text);
    match llm.complete_structured(&prompt).await {
        Ok(value) => {
            if let Some(triples) = triples_from_value(&value) {
                return triples;
            }
            debug!("structured reply lacked a usable triples array; retrying as free text");
        }
        Err(error) => debug!(%error, "structured triple extraction unavailable"),
    }
    match llm.complete(&prompt).await {
        Ok(reply) => parse_triples(&reply),
        Err(error) => {
            warn!(%error, "triple extraction call failed; yielding no triples");
            Vec::new()
        }
    }
}

/// Recover triples from a free-text model reply.
pub fn parse_triples(reply: &str) -> Vec<ConceptTriple> {
    let cleaned = strip_code_fences(reply);
    if let Some(found) = TRIPLES_OBJECT.find(cleaned) {
        if let Some(triples) = triples_from_json(found.as_str()) {
            return triples;
        }
    }
    triples_from_json(cleaned).unwrap_or_default()
}

fn triples_from_json(text: &str) -> Option<Vec<ConceptTriple>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    triples_from_value(&value)
}

fn triples_from_value(value: &serde_json::Value) -> Option<Vec<ConceptTriple>> {
    let entries = value.get("triples")?.as_array()?;
    let triples = entries
        .iter()
        .filter_map(|entry| {
            let source = entry.get("source")?.as_str()?.trim();
            let target = entry.get("target")?.as_str()?.trim();
            let relation = entry.get("relation")?.as_str()?.trim();
            (!source.is_empty() && !target.is_empty())
                .then(|| ConceptTriple::new(source, target, relation))
        })
        .collect();
    Some(triples)
}

//! Runtime configuration.
//!
//! All tunables live in [`Settings`]. Defaults match production behavior;
//! [`Settings::from_env`] overlays `MINDGRAPH_*` environment variables
//! (loading a local `.env` file first when present).

use std::str::FromStr;

/// Tunable thresholds and limits for both pipelines.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Target maximum characters per outline-extraction section.
    pub section_max_chars: usize,
    /// Maximum hierarchy depth, counting the root as level 0.
    pub max_outline_levels: usize,
    /// Similarity above which two labels merge in general concept graphs.
    pub similarity_threshold: f32,
    /// Similarity above which two labels merge in mind maps. Higher than the
    /// general threshold so distinct concepts are not over-collapsed.
    pub mindmap_similarity_threshold: f32,
    /// Minimum grading confidence to answer from local documents alone.
    pub grading_confidence_threshold: f32,
    /// Below this many retrieved documents, grading is skipped and escalation
    /// is forced.
    pub min_docs_for_grading: usize,
    /// Default similarity-search fan-out.
    pub default_top_k: usize,
    /// Maximum results requested from the secondary (web) source.
    pub max_web_results: usize,
    /// Maximum workflow re-runs after a retrieval-class failure.
    pub max_retrieval_retries: u32,
    /// How many prior conversation messages feed the generation prompt.
    pub history_context_limit: usize,
    /// Hard step ceiling per workflow run; exceeding it fails the run.
    pub max_workflow_steps: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            section_max_chars: 4000,
            max_outline_levels: 4,
            similarity_threshold: 0.85,
            mindmap_similarity_threshold: 0.90,
            grading_confidence_threshold: 0.6,
            min_docs_for_grading: 1,
            default_top_k: 10,
            max_web_results: 3,
            max_retrieval_retries: 2,
            history_context_limit: 5,
            max_workflow_steps: 32,
        }
    }
}

impl Settings {
    /// Build settings from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut settings = Self::default();
        overlay(&mut settings.section_max_chars, "MINDGRAPH_SECTION_MAX_CHARS");
        overlay(&mut settings.max_outline_levels, "MINDGRAPH_MAX_OUTLINE_LEVELS");
        overlay(
            &mut settings.similarity_threshold,
            "MINDGRAPH_SIMILARITY_THRESHOLD",
        );
        overlay(
            &mut settings.mindmap_similarity_threshold,
            "MINDGRAPH_MINDMAP_SIMILARITY_THRESHOLD",
        );
        overlay(
            &mut settings.grading_confidence_threshold,
            "MINDGRAPH_GRADING_CONFIDENCE_THRESHOLD",
        );
        overlay(
            &mut settings.min_docs_for_grading,
            "MINDGRAPH_MIN_DOCS_FOR_GRADING",
        );
        overlay(&mut settings.default_top_k, "MINDGRAPH_DEFAULT_TOP_K");
        overlay(&mut settings.max_web_results, "MINDGRAPH_MAX_WEB_RESULTS");
        overlay(
            &mut settings.max_retrieval_retries,
            "MINDGRAPH_MAX_RETRIEVAL_RETRIES",
        );
        overlay(
            &mut settings.history_context_limit,
            "MINDGRAPH_HISTORY_CONTEXT_LIMIT",
        );
        overlay(&mut settings.max_workflow_steps, "MINDGRAPH_MAX_WORKFLOW_STEPS");
        settings
    }
}

fn overlay<T: FromStr>(slot: &mut T, key: &str) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *slot = value;
        }
    }
}

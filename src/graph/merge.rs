//! Label normalization, conceptual filtering, and embedding-similarity merge.

use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ConceptTriple;
use crate::gateways::{EmbeddingGateway, GatewayError};
use crate::util::cosine_similarity;

/// Which flavor of graph is being built. Mind maps use a stricter similarity
/// threshold, filter non-concept labels, and treat edges as undirected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphMode {
    General,
    MindMap,
}

/// Union-find style redirection table from observed labels to canonical ones.
///
/// Built so a redirect always points at a label that was canonical at insert
/// time; a redirected label is never chosen as a target again, so chains are
/// acyclic and resolution terminates.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MergeMap {
    redirects: FxHashMap<String, String>,
}

impl MergeMap {
    /// Follow redirects to the canonical label. Resolving an unknown label
    /// returns it unchanged.
    pub fn resolve(&self, label: &str) -> String {
        let mut current = label;
        while let Some(next) = self.redirects.get(current) {
            current = next.as_str();
        }
        current.to_string()
    }

    pub fn is_redirected(&self, label: &str) -> bool {
        self.redirects.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.redirects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.redirects.is_empty()
    }

    pub(crate) fn redirect(&mut self, from: String, to: String) {
        self.redirects.insert(from, to);
    }
}

/// Finished concept graph: deduplicated triples plus the merge table that
/// produced them.
#[derive(Clone, Debug, Default)]
pub struct ConceptGraph {
    pub triples: Vec<ConceptTriple>,
    pub merges: MergeMap,
}

static NON_CONCEPT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Structural document markers, not ideas.
        r"(?i)^(figure|fig\.?|table|page|chapter|section|appendix|equation|eq\.?)\b",
        r"(?i)^ref(erence)?s?\b",
        // Bare years.
        r"^\d{4}$",
        // URLs.
        r"(?i)https?://|www\.",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("non-concept pattern"))
    .collect()
});

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "in", "on", "for", "with", "to", "is", "are", "this",
    "that", "it", "as", "by", "at", "from", "be", "was", "were",
];

/// Short tokens allowed through the length filter.
const ACRONYMS: &[&str] = &[
    "ai", "ml", "nlp", "api", "cpu", "gpu", "ram", "sql", "dna", "rna", "llm", "rag", "iot", "ui",
    "ux", "os", "db", "url", "orm", "etl",
];

/// Whether a label names an actual concept rather than document furniture.
pub fn is_conceptual(label: &str) -> bool {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return false;
    }
    if NON_CONCEPT_PATTERNS.iter().any(|re| re.is_match(trimmed)) {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    if trimmed
        .split_whitespace()
        .all(|word| STOPWORDS.contains(&word.to_lowercase().as_str()))
    {
        return false;
    }
    if trimmed.chars().count() < 4 && !ACRONYMS.contains(&lowered.as_str()) {
        return false;
    }
    true
}

/// Trim, collapse whitespace, and title-case every word of an endpoint label.
pub fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}

/// Drop triples whose endpoints fail the mode's acceptance rules or whose
/// relation is empty, then normalize survivors.
pub fn filter_and_normalize(triples: Vec<ConceptTriple>, mode: GraphMode) -> Vec<ConceptTriple> {
    triples
        .into_iter()
        .filter(|t| !t.relation.trim().is_empty())
        .filter(|t| match mode {
            GraphMode::MindMap => is_conceptual(&t.source) && is_conceptual(&t.target),
            GraphMode::General => {
                !t.source.trim().is_empty() && !t.target.trim().is_empty()
            }
        })
        .map(|t| ConceptTriple {
            source: normalize_label(&t.source),
            target: normalize_label(&t.target),
            relation: t.relation.trim().to_string(),
        })
        .filter(|t| !t.source.is_empty() && !t.target.is_empty())
        .collect()
}

/// Build the merge table for a set of normalized labels.
///
/// Labels are sorted lexicographically first so the greedy pairwise pass is
/// reproducible regardless of input order. For each unredirected pair with
/// similarity above the threshold, the loser is redirected: mind maps always
/// fold the longer label into the shorter one (ties fold later into earlier);
/// general graphs fold later into earlier.
pub async fn build_merge_map(
    labels: &[String],
    embedder: &dyn EmbeddingGateway,
    threshold: f32,
    mode: GraphMode,
) -> Result<MergeMap, GatewayError> {
    let mut unique: Vec<String> = labels
        .iter()
        .cloned()
        .collect::<FxHashSet<_>>()
        .into_iter()
        .collect();
    unique.sort();

    let mut map = MergeMap::default();
    if unique.len() < 2 {
        return Ok(map);
    }

    let vectors = embedder.embed_batch(&unique).await?;
    if vectors.len() != unique.len() {
        return Err(GatewayError::Embedding(format!(
            "expected {} vectors, got {}",
            unique.len(),
            vectors.len()
        )));
    }

    for i in 0..unique.len() {
        if map.is_redirected(&unique[i]) {
            continue;
        }
        for j in (i + 1)..unique.len() {
            if map.is_redirected(&unique[j]) {
                continue;
            }
            let similarity = cosine_similarity(&vectors[i], &vectors[j]);
            if similarity <= threshold {
                continue;
            }
            let (keep, fold) = pick_canonical(&unique[i], &unique[j], mode);
            debug!(keep, fold, similarity, "merging similar labels");
            let folded_earlier = fold == unique[i];
            map.redirect(fold.to_string(), keep.to_string());
            if folded_earlier {
                // The outer label is no longer canonical; stop pairing it.
                break;
            }
        }
    }
    Ok(map)
}

fn pick_canonical<'a>(earlier: &'a str, later: &'a str, mode: GraphMode) -> (&'a str, &'a str) {
    match mode {
        GraphMode::General => (earlier, later),
        GraphMode::MindMap => {
            if later.chars().count() < earlier.chars().count() {
                (later, earlier)
            } else {
                (earlier, later)
            }
        }
    }
}

/// Rewrite triple endpoints through the merge map and drop self-loops.
pub fn resolve_triples(triples: &[ConceptTriple], merges: &MergeMap) -> Vec<ConceptTriple> {
    triples
        .iter()
        .map(|t| ConceptTriple {
            source: merges.resolve(&t.source),
            target: merges.resolve(&t.target),
            relation: t.relation.clone(),
        })
        .filter(|t| t.source != t.target)
        .collect()
}

/// Remove duplicate edges, first occurrence wins.
///
/// General graphs are directed and relation-sensitive. Mind maps are
/// undirected: edges are keyed by the case-insensitive unordered label pair,
/// so `(A, B, rel)` and `(B, A, rel)` collapse and the earlier-seen triple
/// keeps its casing and relation.
pub fn dedup_triples(triples: Vec<ConceptTriple>, mode: GraphMode) -> Vec<ConceptTriple> {
    let mut seen = FxHashSet::default();
    let mut unique = Vec::new();
    for triple in triples {
        let key = match mode {
            GraphMode::General => (
                triple.source.clone(),
                triple.target.clone(),
                triple.relation.clone(),
            ),
            GraphMode::MindMap => {
                let a = triple.source.to_lowercase();
                let b = triple.target.to_lowercase();
                if a <= b {
                    (a, b, String::new())
                } else {
                    (b, a, String::new())
                }
            }
        };
        if seen.insert(key) {
            unique.push(triple);
        }
    }
    unique
}

/// Full pipeline: filter, normalize, merge similar labels, resolve, dedup.
pub async fn build_concept_graph(
    raw: Vec<ConceptTriple>,
    mode: GraphMode,
    threshold: f32,
    embedder: &dyn EmbeddingGateway,
) -> Result<ConceptGraph, GatewayError> {
    let normalized = filter_and_normalize(raw, mode);
    let mut labels = Vec::with_capacity(normalized.len() * 2);
    for triple in &normalized {
        labels.push(triple.source.clone());
        labels.push(triple.target.clone());
    }
    let merges = build_merge_map(&labels, embedder, threshold, mode).await?;
    let resolved = resolve_triples(&normalized, &merges);
    let triples = dedup_triples(resolved, mode);
    Ok(ConceptGraph { triples, merges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;

    /// Embedder with hand-pinned vectors so pairwise similarities are exact.
    struct PinnedEmbedder;

    #[async_trait]
    impl EmbeddingGateway for PinnedEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
            Ok(texts
                .iter()
                .map(|t| match t.as_str() {
                    // similarity(Ai, Machine Learning) = 0.5
                    "Ai" => vec![1.0, 0.0],
                    "Machine Learning" => vec![0.5, 3.0f32.sqrt() / 2.0],
                    // A near-duplicate pair above any threshold.
                    "Neural Network" => vec![0.0, 1.0],
                    "Neural Networks" => vec![0.001, 1.0],
                    _ => vec![-1.0, 1.0],
                })
                .collect())
        }
    }

    #[test]
    fn normalization_title_cases_words() {
        assert_eq!(normalize_label("  machine   learning "), "Machine Learning");
        assert_eq!(normalize_label("AI"), "Ai");
        assert_eq!(normalize_label("ai"), "Ai");
    }

    #[test]
    fn conceptual_filter_rejects_document_furniture() {
        assert!(!is_conceptual("Figure 3"));
        assert!(!is_conceptual("Table 2"));
        assert!(!is_conceptual("page 12"));
        assert!(!is_conceptual("References"));
        assert!(!is_conceptual("2021"));
        assert!(!is_conceptual("https://example.com"));
        assert!(!is_conceptual("the and of"));
        assert!(!is_conceptual("xyz"));
    }

    #[test]
    fn conceptual_filter_allows_known_acronyms() {
        assert!(is_conceptual("AI"));
        assert!(is_conceptual("nlp"));
        assert!(is_conceptual("Gradient Descent"));
    }

    #[tokio::test]
    async fn undirected_duplicate_collapses_to_one_edge() {
        // Two triples naming the same pair in opposite directions; similarity
        // between the two distinct labels is 0.5, below the 0.85 threshold.
        let raw = vec![
            ConceptTriple::new("Machine Learning", "AI", "is part of"),
            ConceptTriple::new("ai", "Machine learning", "relates to"),
        ];
        let graph = build_concept_graph(raw, GraphMode::MindMap, 0.85, &PinnedEmbedder)
            .await
            .unwrap();
        assert_eq!(graph.triples.len(), 1);
        let edge = &graph.triples[0];
        assert_eq!(edge.source, "Machine Learning");
        assert_eq!(edge.target, "Ai");
        assert_eq!(edge.relation, "is part of");
        assert!(graph.merges.is_empty());
    }

    #[tokio::test]
    async fn merge_folds_longer_label_and_removes_self_loops() {
        let raw = vec![
            ConceptTriple::new("Neural Network", "Neural Networks", "same as"),
            ConceptTriple::new("Neural Networks", "Machine Learning", "used in"),
        ];
        let graph = build_concept_graph(raw, GraphMode::MindMap, 0.9, &PinnedEmbedder)
            .await
            .unwrap();
        // The plural folds into the singular; the self-loop disappears.
        assert_eq!(graph.merges.resolve("Neural Networks"), "Neural Network");
        assert_eq!(graph.triples.len(), 1);
        assert_eq!(graph.triples[0].source, "Neural Network");
        assert_eq!(graph.triples[0].target, "Machine Learning");
        for t in &graph.triples {
            assert_ne!(t.source, t.target);
        }
    }

    #[tokio::test]
    async fn below_threshold_labels_stay_separate() {
        let raw = vec![ConceptTriple::new("Machine Learning", "AI", "includes")];
        let graph = build_concept_graph(raw, GraphMode::General, 0.85, &PinnedEmbedder)
            .await
            .unwrap();
        assert!(graph.merges.is_empty());
        assert_eq!(graph.triples.len(), 1);
    }

    #[test]
    fn directed_dedup_keeps_distinct_relations() {
        let triples = vec![
            ConceptTriple::new("A", "B", "uses"),
            ConceptTriple::new("A", "B", "uses"),
            ConceptTriple::new("A", "B", "extends"),
            ConceptTriple::new("B", "A", "uses"),
        ];
        assert_eq!(dedup_triples(triples, GraphMode::General).len(), 3);
    }

    proptest! {
        /// Resolution is idempotent: a second resolve is a no-op, and the
        /// canonical label maps to itself. Redirect tables are built the same
        /// way the merge loop builds them: both ends canonical at insert time.
        #[test]
        fn resolution_reaches_a_fixed_point(pairs in proptest::collection::vec((0usize..8, 0usize..8), 0..16)) {
            let labels: Vec<String> = (0..8).map(|i| format!("label-{i}")).collect();
            let mut map = MergeMap::default();
            for (a, b) in pairs {
                if a == b {
                    continue;
                }
                let (from, to) = (&labels[a], &labels[b]);
                if !map.is_redirected(from) && !map.is_redirected(to) {
                    map.redirect(from.clone(), to.clone());
                }
            }
            for label in &labels {
                let once = map.resolve(label);
                let twice = map.resolve(&once);
                prop_assert_eq!(&once, &twice);
                prop_assert!(!map.is_redirected(&once));
            }
        }
    }
}

//! Small helpers shared across the graph, grading, and store modules.

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for empty, mismatched-length, or zero-magnitude inputs rather
/// than erroring; callers treat such pairs as "not similar".
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Strip a surrounding markdown code fence (with optional `json` tag) from an
/// LLM reply. Models frequently wrap JSON payloads this way.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let inner = inner.trim_start();
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Slice from the first `{` to the last `}` of a free-text reply.
///
/// The weakest JSON recovery path: assumes at most one top-level object of
/// interest and lets `serde_json` reject garbage.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Truncate on a character boundary, for citation snippets.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

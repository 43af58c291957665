//! Section splitting and outline extraction/cleanup.

use std::sync::Arc;

use futures_util::future::join_all;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::gateways::LlmGateway;

const MIN_LINE_CHARS: usize = 3;

/// Lines starting with these are model chatter, not outline content.
const PREAMBLES: &[&str] = &[
    "here is",
    "here's",
    "sure",
    "certainly",
    "below is",
    "of course",
    "outline:",
    "the outline",
    "i have",
    "i've",
];

pub(crate) fn outline_prompt(section: &str) -> String {
    format!(
        "Produce a topic outline of the text below.\n\
         One topic per line, two spaces of indentation per nesting level, at most four levels.\n\
         Output only outline lines, nothing else.\n\n\
         Text:\n{section}"
    )
}

pub(crate) fn optimize_prompt(outline: &str) -> String {
    format!(
        "Improve the outline below: remove duplicate topics, balance branch sizes, \
         and keep at most four levels of nesting.\n\
         Keep the two-spaces-per-level indentation. Output only outline lines.\n\n\
         Outline:\n{outline}"
    )
}

/// Split content into sections of at most `max_chars`, preferring paragraph
/// boundaries and falling back to sentence boundaries for oversized
/// paragraphs. A single sentence longer than the limit passes through whole.
pub fn split_into_sections(content: &str, max_chars: usize) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, sections: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            sections.push(trimmed.to_string());
        }
        current.clear();
    };

    for paragraph in content.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if paragraph.len() > max_chars {
            flush(&mut current, &mut sections);
            let mut piece = String::new();
            for sentence in paragraph.unicode_sentences() {
                if !piece.is_empty() && piece.len() + sentence.len() > max_chars {
                    flush(&mut piece, &mut sections);
                }
                piece.push_str(sentence);
            }
            flush(&mut piece, &mut sections);
            continue;
        }
        if !current.is_empty() && current.len() + paragraph.len() + 2 > max_chars {
            flush(&mut current, &mut sections);
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    flush(&mut current, &mut sections);
    sections
}

/// Merge per-section outlines into one cleaned outline: drop short lines and
/// explanatory preambles, normalize indentation to even widths, and
/// deduplicate case-insensitively across the whole result (first occurrence
/// wins).
pub fn sanitize_outline(raw_outlines: &[String]) -> String {
    let mut seen = FxHashSet::default();
    let mut lines = Vec::new();
    for outline in raw_outlines {
        for raw in outline.lines() {
            let line = raw.trim_end();
            let trimmed = line.trim_start();
            if trimmed.chars().count() < MIN_LINE_CHARS {
                continue;
            }
            let lowered = trimmed.to_lowercase();
            if PREAMBLES.iter().any(|p| lowered.starts_with(p)) {
                continue;
            }
            if !seen.insert(lowered) {
                continue;
            }
            let level = (line.len() - trimmed.len()) / 2;
            lines.push(format!("{}{}", "  ".repeat(level), trimmed));
        }
    }
    lines.join("\n")
}

/// Extract the merged outline for a whole document: one LLM call per section,
/// dispatched concurrently. A failed section is logged and dropped; it never
/// fails the stage.
pub async fn extract_outline(
    llm: Arc<dyn LlmGateway>,
    content: &str,
    max_section_chars: usize,
) -> String {
    let sections = split_into_sections(content, max_section_chars);
    debug!(sections = sections.len(), "dispatching outline extraction");

    let calls = sections.into_iter().enumerate().map(|(index, section)| {
        let llm = Arc::clone(&llm);
        async move {
            match llm.complete(&outline_prompt(&section)).await {
                Ok(reply) => Some(reply),
                Err(error) => {
                    warn!(section = index, %error, "outline call failed; dropping section");
                    None
                }
            }
        }
    });
    let replies: Vec<String> = join_all(calls).await.into_iter().flatten().collect();
    sanitize_outline(&replies)
}

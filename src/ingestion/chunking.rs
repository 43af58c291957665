//! Header-based document chunking.
//!
//! Chunks split at markdown headers; each chunk records the header path that
//! leads to it so citations can name the section, not just the file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chunk of document text before embedding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocChunk {
    pub chunk_id: String,
    pub text: String,
    /// Header titles from the document root down to this chunk.
    pub hierarchy_path: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Split markdown content at header markers. Text before the first header
/// gets an empty path; a headerless document yields a single chunk.
pub fn chunk_by_headers(content: &str) -> Vec<DocChunk> {
    let mut chunks = Vec::new();
    let mut path: Vec<(usize, String)> = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if let Some((level, title)) = parse_header(line) {
            push_chunk(&mut chunks, &mut current, &path);
            while matches!(path.last(), Some((l, _)) if *l >= level) {
                path.pop();
            }
            path.push((level, title.to_string()));
        }
        current.push_str(line);
        current.push('\n');
    }
    push_chunk(&mut chunks, &mut current, &path);
    chunks
}

fn parse_header(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|b| *b == b'#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim();
    (!title.is_empty()).then_some((hashes, title))
}

fn push_chunk(chunks: &mut Vec<DocChunk>, current: &mut String, path: &[(usize, String)]) {
    let text = current.trim();
    if !text.is_empty() {
        chunks.push(DocChunk {
            chunk_id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            hierarchy_path: path.iter().map(|(_, title)| title.clone()).collect(),
            created_at: Utc::now(),
        });
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_headers_with_paths() {
        let content = "# Intro\nwelcome\n\n## Details\nmore text\n\n# Outro\nbye";
        let chunks = chunk_by_headers(content);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].hierarchy_path, vec!["Intro"]);
        assert!(chunks[0].text.starts_with("# Intro"));
        assert_eq!(chunks[1].hierarchy_path, vec!["Intro", "Details"]);
        assert_eq!(chunks[2].hierarchy_path, vec!["Outro"]);
    }

    #[test]
    fn sibling_header_replaces_path_tail() {
        let content = "# A\n## B\nb text\n## C\nc text";
        let chunks = chunk_by_headers(content);
        let last = chunks.last().unwrap();
        assert_eq!(last.hierarchy_path, vec!["A", "C"]);
    }

    #[test]
    fn headerless_document_is_one_chunk() {
        let chunks = chunk_by_headers("just some prose\nover two lines");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].hierarchy_path.is_empty());
    }

    #[test]
    fn preamble_before_first_header_has_empty_path() {
        let chunks = chunk_by_headers("lead-in text\n\n# First\nbody");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].hierarchy_path.is_empty());
        assert_eq!(chunks[1].hierarchy_path, vec!["First"]);
    }

    #[test]
    fn hash_without_space_is_not_a_header() {
        let chunks = chunk_by_headers("#hashtag\nmore");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].hierarchy_path.is_empty());
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(chunk_by_headers("").is_empty());
        assert!(chunk_by_headers("\n\n  \n").is_empty());
    }
}

//! Hierarchy tree and indented-outline parsing.
//!
//! The outline format is one topic per line, two spaces of indentation per
//! level. The first top-level line names the root; later top-level lines
//! become its children.

use serde::{Deserialize, Serialize};

/// A node in the document hierarchy used for both chunking context and the
/// mind-map skeleton. A node always carries either a title or descendants.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HierarchyNode {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<HierarchyNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Titles of the direct children, in order.
    pub fn child_titles(&self) -> Vec<String> {
        self.children.iter().map(|c| c.title.clone()).collect()
    }

    /// Total node count including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(HierarchyNode::count).sum::<usize>()
    }

    /// Maximum depth, counting this node as 1.
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(HierarchyNode::depth)
            .max()
            .unwrap_or(0)
    }
}

/// Parse a 2-space-indented outline into a tree.
///
/// An empty outline yields a lone root labeled `fallback_root` (the source
/// filename without extension). Indentation deeper than `max_levels` or
/// skipping levels is clamped to the nearest legal depth.
pub fn parse_outline(outline: &str, fallback_root: &str, max_levels: usize) -> HierarchyNode {
    let max_levels = max_levels.max(2);
    let mut lines = outline.lines().filter_map(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let indent = raw.len() - raw.trim_start().len();
        Some((indent / 2, strip_bullet(trimmed).to_string()))
    });

    let Some((_, root_title)) = lines.next() else {
        return HierarchyNode::new(fallback_root);
    };
    let mut root = HierarchyNode::new(root_title);

    // Index path from the root to the most recently inserted node; its length
    // equals that node's depth.
    let mut path: Vec<usize> = Vec::new();
    for (level, title) in lines {
        let depth = (level + 1).min(max_levels - 1).min(path.len() + 1);
        path.truncate(depth - 1);
        let parent = node_at_mut(&mut root, &path);
        parent.children.push(HierarchyNode::new(title));
        path.push(parent.children.len() - 1);
    }
    root
}

fn node_at_mut<'a>(root: &'a mut HierarchyNode, path: &[usize]) -> &'a mut HierarchyNode {
    let mut node = root;
    for &index in path {
        node = &mut node.children[index];
    }
    node
}

fn strip_bullet(line: &str) -> &str {
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest.trim_start();
        }
    }
    line
}

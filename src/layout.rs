//! Positioned mind-map layout.
//!
//! Converts a hierarchy tree (or a flat triple list when no tree exists) into
//! nodes with coordinates and depth-keyed styles plus the edges between them.
//! The tree algorithm is a single depth-first pass: leaves occupy one node
//! width, parents are centered over the pixel span of their children.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::graph::ConceptTriple;
use crate::hierarchy::HierarchyNode;

pub const LEVEL_HEIGHT: f32 = 150.0;
pub const NODE_WIDTH: f32 = 250.0;
pub const START_X: f32 = 50.0;
pub const START_Y: f32 = 50.0;

const MAX_ID_LEN: usize = 30;
const TRIPLE_COLUMNS: usize = 4;
const TRIPLE_GUTTER: f32 = 50.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Visual hints keyed by depth.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStyle {
    pub background: String,
    pub color: String,
    pub font_weight: String,
}

impl NodeStyle {
    pub fn for_level(level: usize) -> Self {
        let (background, color, font_weight) = match level {
            0 => ("#1e40af", "#ffffff", "bold"),
            1 => ("#3b82f6", "#ffffff", "600"),
            2 => ("#60a5fa", "#ffffff", "500"),
            3 => ("#93c5fd", "#1f2937", "400"),
            _ => ("#dbeafe", "#1f2937", "400"),
        };
        Self {
            background: background.into(),
            color: color.into(),
            font_weight: font_weight.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutNode {
    pub id: String,
    pub label: String,
    pub level: usize,
    pub position: Position,
    pub style: NodeStyle,
    /// Rendering hint: `root`, `topic`, or `detail`.
    pub kind: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MindMapLayout {
    pub nodes: Vec<LayoutNode>,
    pub edges: Vec<LayoutEdge>,
}

impl MindMapLayout {
    pub fn find_node(&self, label: &str) -> Option<&LayoutNode> {
        self.nodes.iter().find(|n| n.label == label)
    }
}

/// Lay out one or more top-level sections.
///
/// With several sections a synthetic root labeled `root_label` is added and
/// centered over the combined span; with exactly one, that section's root is
/// the layout root. Empty input yields the two-node fallback.
pub fn layout_hierarchy(sections: &[HierarchyNode], root_label: &str) -> MindMapLayout {
    match sections {
        [] => fallback_layout(root_label),
        [only] => layout_tree(only),
        many => {
            let synthetic = HierarchyNode::new(root_label).with_children(many.to_vec());
            layout_tree(&synthetic)
        }
    }
}

fn layout_tree(root: &HierarchyNode) -> MindMapLayout {
    let mut layout = MindMapLayout::default();
    let mut ids = IdAllocator::default();
    place(root, 0, START_X, None, &mut layout, &mut ids);
    layout
}

/// Lay out a flat triple list: first-seen unique labels on a wrapped grid.
/// Used when no hierarchy tree exists for a document.
pub fn layout_triples(triples: &[ConceptTriple]) -> MindMapLayout {
    if triples.is_empty() {
        return fallback_layout("Document");
    }
    let mut layout = MindMapLayout::default();
    let mut ids = IdAllocator::default();
    let mut placed: FxHashMap<String, String> = FxHashMap::default();

    let mut place_label = |label: &str, layout: &mut MindMapLayout, ids: &mut IdAllocator| {
        if let Some(id) = placed.get(label) {
            return id.clone();
        }
        let index = placed.len();
        let column = index % TRIPLE_COLUMNS;
        let row = index / TRIPLE_COLUMNS;
        let id = ids.allocate(label);
        layout.nodes.push(LayoutNode {
            id: id.clone(),
            label: label.to_string(),
            level: 1,
            position: Position {
                x: START_X + column as f32 * (NODE_WIDTH + TRIPLE_GUTTER),
                y: START_Y + row as f32 * LEVEL_HEIGHT,
            },
            style: NodeStyle::for_level(1),
            kind: "topic".into(),
        });
        placed.insert(label.to_string(), id.clone());
        id
    };

    for (index, triple) in triples.iter().enumerate() {
        let source_id = place_label(&triple.source, &mut layout, &mut ids);
        let target_id = place_label(&triple.target, &mut layout, &mut ids);
        layout.edges.push(LayoutEdge {
            id: format!("e{index}-{source_id}-{target_id}"),
            source: source_id,
            target: target_id,
            label: Some(triple.relation.clone()),
        });
    }
    layout
}

/// Fixed two-node graph emitted for empty or unparsable input; callers must
/// never receive zero nodes.
pub fn fallback_layout(root_label: &str) -> MindMapLayout {
    let label = if root_label.trim().is_empty() {
        "Document"
    } else {
        root_label
    };
    MindMapLayout {
        nodes: vec![
            LayoutNode {
                id: "root".into(),
                label: label.to_string(),
                level: 0,
                position: Position { x: 50.0, y: 50.0 },
                style: NodeStyle::for_level(0),
                kind: "root".into(),
            },
            LayoutNode {
                id: "content".into(),
                label: "Content".into(),
                level: 1,
                position: Position { x: 350.0, y: 130.0 },
                style: NodeStyle::for_level(1),
                kind: "detail".into(),
            },
        ],
        edges: vec![LayoutEdge {
            id: "root-content".into(),
            source: "root".into(),
            target: "content".into(),
            label: None,
        }],
    }
}

fn subtree_width(node: &HierarchyNode) -> usize {
    if node.children.is_empty() {
        1
    } else {
        node.children
            .iter()
            .map(subtree_width)
            .sum::<usize>()
            .max(1)
    }
}

fn place(
    node: &HierarchyNode,
    depth: usize,
    current_x: f32,
    parent_id: Option<&str>,
    layout: &mut MindMapLayout,
    ids: &mut IdAllocator,
) {
    let span = subtree_width(node) as f32 * NODE_WIDTH;
    let x = if node.children.is_empty() {
        current_x
    } else {
        (current_x + (span - NODE_WIDTH) / 2.0).max(current_x)
    };
    let id = ids.allocate(&node.title);
    let kind = match (depth, node.children.is_empty()) {
        (0, _) => "root",
        (_, false) => "topic",
        (_, true) => "detail",
    };
    layout.nodes.push(LayoutNode {
        id: id.clone(),
        label: node.title.clone(),
        level: depth,
        position: Position {
            x,
            y: START_Y + depth as f32 * LEVEL_HEIGHT,
        },
        style: NodeStyle::for_level(depth),
        kind: kind.into(),
    });
    if let Some(parent) = parent_id {
        layout.edges.push(LayoutEdge {
            id: format!("{parent}-{id}"),
            source: parent.to_string(),
            target: id.clone(),
            label: None,
        });
    }

    let mut child_x = current_x;
    for child in &node.children {
        place(child, depth + 1, child_x, Some(&id), layout, ids);
        child_x += subtree_width(child) as f32 * NODE_WIDTH;
    }
}

#[derive(Default)]
struct IdAllocator {
    used: FxHashSet<String>,
}

impl IdAllocator {
    fn allocate(&mut self, label: &str) -> String {
        let base = slug(label);
        let mut candidate = base.clone();
        let mut counter = 2;
        while !self.used.insert(candidate.clone()) {
            candidate = format!("{base}-{counter}");
            counter += 1;
        }
        candidate
    }
}

fn slug(label: &str) -> String {
    let mut out = String::new();
    let mut last_dash = true;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
        if out.len() >= MAX_ID_LEN {
            break;
        }
    }
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "node".into()
    } else {
        trimmed
    }
}

//! Output graph consumed by layout engines and renderers

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A loop produced by a stitch
    Top,
    /// Internal, split or loop-side node
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightClass {
    Primary,
    Secondary,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label_attachment_tags: Vec<String>,
    #[serde(rename = "displayType")]
    pub display_type: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub tail: String,
    pub head: String,
    pub length: f64,
    pub color: String,
    pub visible: bool,
    pub weight_class: WeightClass,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl PatternGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edges_into<'a>(&'a self, head: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.head == head)
    }

    pub fn edge_between(&self, a: &str, b: &str) -> Option<&GraphEdge> {
        self.edges
            .iter()
            .find(|e| (e.tail == a && e.head == b) || (e.tail == b && e.head == a))
    }
}

/// Stitch counts for one row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSummary {
    pub row: usize,
    pub counts: BTreeMap<String, usize>,
}

/// Everything a compile produces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledPattern {
    pub graph: PatternGraph,
    /// `DOT:` lines, verbatim
    pub metadata: Vec<String>,
    /// `TRANSFORM_OBJECT:` lines, verbatim
    pub transforms: Vec<String>,
    pub background: Option<String>,
    /// `DEF:` lines, verbatim
    pub definitions: Vec<String>,
    pub rows: Vec<RowSummary>,
}

impl CompiledPattern {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text rendering: quoted nodes, `"tail" -- "head" length` edges,
    /// then the metadata lines
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for node in &self.graph.nodes {
            let _ = writeln!(out, "\"{}\" [{} {} {}]", node.id, node.display_type, node.color, kind_tag(node.kind));
        }
        for edge in &self.graph.edges {
            let _ = writeln!(
                out,
                "\"{}\" -- \"{}\" {} [{}{}]",
                edge.tail,
                edge.head,
                edge.length,
                class_tag(edge.weight_class),
                if edge.visible { "" } else { " hidden" }
            );
        }
        if let Some(background) = &self.background {
            let _ = writeln!(out, "BACKGROUND: {}", background);
        }
        for line in &self.metadata {
            let _ = writeln!(out, "DOT: {}", line);
        }
        out
    }
}

fn kind_tag(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Top => "top",
        NodeKind::Hidden => "hidden",
    }
}

fn class_tag(class: WeightClass) -> &'static str {
    match class {
        WeightClass::Primary => "primary",
        WeightClass::Secondary => "secondary",
        WeightClass::Internal => "internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_field_names() {
        let node = GraphNode {
            id: "0,0|0".into(),
            kind: NodeKind::Top,
            label_attachment_tags: vec!["A".into()],
            display_type: "ch".into(),
            color: "#969696".into(),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["displayType"], "ch");
        assert_eq!(json["kind"], "top");

        let edge = GraphEdge {
            tail: "a".into(),
            head: "b".into(),
            length: 1.0,
            color: "red".into(),
            visible: false,
            weight_class: WeightClass::Internal,
        };
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["weight_class"], "internal");
        assert_eq!(json["visible"], false);
    }

    #[test]
    fn test_to_text() {
        let pattern = CompiledPattern {
            graph: PatternGraph {
                nodes: vec![],
                edges: vec![GraphEdge {
                    tail: "0,0|0".into(),
                    head: "0,1|1".into(),
                    length: 1.0,
                    color: "#969696".into(),
                    visible: true,
                    weight_class: WeightClass::Primary,
                }],
            },
            metadata: vec!["iterations=4000".into()],
            ..Default::default()
        };
        let text = pattern.to_text();
        assert!(text.contains("\"0,0|0\" -- \"0,1|1\" 1 [primary]"));
        assert!(text.ends_with("DOT: iterations=4000\n"));
    }
}

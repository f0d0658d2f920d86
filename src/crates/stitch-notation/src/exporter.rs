//! Graph exporter
//!
//! Folds the placed stitches into the node and edge lists consumed by
//! layout engines. Top nodes are named `row,pos|uid`, where `pos` counts
//! from the row's first top; hidden nodes add their template name after the
//! position, e.g. `2,4C|17`.

use std::collections::{BTreeMap, HashMap, HashSet};

use stitch_core::{
    owner_of, Endpoint, GraphEdge, GraphNode, NodeKind, NodeRef, NodeRole, PatternGraph, WeightClass,
};

use crate::builder::Fabric;
use crate::error::{CompileError, Result};
use crate::options::CompileOptions;

/// Build the output graph for a fully resolved fabric
pub fn export_graph(fabric: &Fabric, options: &CompileOptions) -> Result<PatternGraph> {
    let mut exporter = Exporter::new(fabric, options);
    for index in 0..fabric.instances.len() {
        exporter.stitch(index)?;
    }
    log::debug!(
        "exported {} node(s), {} edge(s)",
        exporter.graph.nodes.len(),
        exporter.graph.edges.len()
    );
    Ok(exporter.graph)
}

/// A resolved connection end
struct End {
    node: String,
    /// `!` or one of the stitch's own tops
    top: bool,
    /// Loop-side weight carried by a concrete bottom
    jacobian: Option<f64>,
}

struct Exporter<'a> {
    fabric: &'a Fabric,
    options: &'a CompileOptions,
    graph: PatternGraph,
    row_first: BTreeMap<usize, u64>,
    /// Row and position hidden nodes of each stitch are named after
    bases: Vec<(usize, u64)>,
    tops: HashMap<u64, String>,
    /// Heads that already have a primary edge
    primaries: HashSet<String>,
    /// Split nodes emitted so far, keyed by instance and bottom index
    splits: HashMap<(usize, usize), String>,
    last_top: Option<u64>,
    current_color: String,
}

impl<'a> Exporter<'a> {
    fn new(fabric: &'a Fabric, options: &'a CompileOptions) -> Self {
        let mut row_first = BTreeMap::new();
        for stitch in &fabric.instances {
            if let Some(first) = stitch.first_top() {
                row_first.entry(stitch.row).or_insert(first);
            }
        }

        let mut bases = Vec::with_capacity(fabric.instances.len());
        let mut previous = None;
        for stitch in &fabric.instances {
            let here = stitch
                .first_top()
                .and_then(|id| row_first.get(&stitch.row).map(|first| (stitch.row, id - first)));
            let base = here.or(previous).unwrap_or((stitch.row, 0));
            if here.is_some() {
                previous = here;
            }
            bases.push(base);
        }

        Exporter {
            fabric,
            options,
            graph: PatternGraph::default(),
            row_first,
            bases,
            tops: HashMap::new(),
            primaries: HashSet::new(),
            splits: HashMap::new(),
            last_top: None,
            current_color: String::new(),
        }
    }

    fn top(&self, id: u64) -> Result<String> {
        self.tops
            .get(&id)
            .cloned()
            .ok_or_else(|| CompileError::internal(format!("top {} was never emitted", id)))
    }

    fn hidden_name(&self, index: usize, name: &str) -> String {
        let (row, pos) = self.bases[index];
        format!("{},{}{}|{}", row, pos, name, self.fabric.instances[index].uid)
    }

    fn push_hidden(&mut self, id: String, display_type: &str, color: &str) {
        self.graph.nodes.push(GraphNode {
            id,
            kind: NodeKind::Hidden,
            label_attachment_tags: Vec::new(),
            display_type: display_type.to_string(),
            color: color.to_string(),
        });
    }

    fn push_edge(&mut self, tail: String, head: String, length: f64, class: WeightClass) {
        let color = self.current_color.clone();
        self.graph.edges.push(GraphEdge {
            tail,
            head,
            length,
            color,
            visible: class != WeightClass::Internal,
            weight_class: class,
        });
    }

    fn stitch(&mut self, index: usize) -> Result<()> {
        let fabric = self.fabric;
        let stitch = &fabric.instances[index];
        let template = &stitch.template;
        self.current_color = stitch.color.clone();
        let previous = self.last_top;

        for (id, top) in stitch.top_ids.iter().zip(&template.tops) {
            let first = self
                .row_first
                .get(&stitch.row)
                .copied()
                .ok_or_else(|| CompileError::internal(format!("row {} has no tops", stitch.row)))?;
            let node = format!("{},{}|{}", stitch.row, id - first, stitch.uid);
            self.graph.nodes.push(GraphNode {
                id: node.clone(),
                kind: NodeKind::Top,
                label_attachment_tags: stitch.labels.clone(),
                display_type: top.tag.clone(),
                color: stitch.color.clone(),
            });
            self.tops.insert(*id, node);
        }
        for hidden in &template.hidden {
            let node = self.hidden_name(index, &hidden.name);
            self.push_hidden(node, &hidden.display_type, &stitch.color);
        }

        for connection in &template.connections {
            let Some(length) = connection.length.value() else {
                continue;
            };
            let (Some(tail), Some(head)) = (
                self.end(index, &connection.from, previous)?,
                self.end(index, &connection.to, previous)?,
            ) else {
                continue;
            };

            if connection.soft {
                self.push_edge(tail.node, head.node, length, WeightClass::Internal);
                continue;
            }

            // A loop-side bottom pulls through its own hidden node
            let (tail, head) = match (tail.jacobian, head.jacobian) {
                (Some(j), _) => (self.loop_side(tail.node, &head.node, j), head),
                (None, Some(j)) => {
                    let head = self.loop_side(head.node, &tail.node, j);
                    (tail, head)
                }
                (None, None) => (tail, head),
            };
            let class = if tail.top && head.top && !self.primaries.contains(&head.node) {
                self.primaries.insert(head.node.clone());
                WeightClass::Primary
            } else {
                WeightClass::Secondary
            };
            self.push_edge(tail.node, head.node, length, class);
        }

        if let Some(last) = stitch.last_top() {
            self.last_top = Some(last);
        }
        Ok(())
    }

    /// Emit the loop-side node between `node` and `other`, returning an end
    /// that stands in for `node`
    fn loop_side(&mut self, node: String, other: &str, jacobian: f64) -> End {
        let side = format!("{}a{}_jacobian{}", node, other, jacobian);
        let color = self.current_color.clone();
        self.push_hidden(side.clone(), "hidden", &color);
        self.push_edge(node, side.clone(), jacobian.abs(), WeightClass::Secondary);
        End {
            node: side,
            top: false,
            jacobian: None,
        }
    }

    fn end(&mut self, index: usize, end: &Endpoint, previous: Option<u64>) -> Result<Option<End>> {
        let fabric = self.fabric;
        let stitch = &fabric.instances[index];
        let template = &stitch.template;
        let name = match end {
            Endpoint::Previous => {
                return match previous {
                    Some(id) => Ok(Some(End {
                        node: self.top(id)?,
                        top: true,
                        jacobian: None,
                    })),
                    None => Ok(None),
                };
            }
            Endpoint::Node(name) => name,
        };

        let missing = || CompileError::internal(format!("'{}' has no node '{}'", stitch.stitch, name));
        match template.role(name) {
            Some(NodeRole::Top) => {
                let id = template
                    .top_index(name)
                    .and_then(|i| stitch.top_ids.get(i))
                    .copied()
                    .ok_or_else(missing)?;
                Ok(Some(End {
                    node: self.top(id)?,
                    top: true,
                    jacobian: None,
                }))
            }
            Some(NodeRole::Hidden) => Ok(Some(End {
                node: self.hidden_name(index, name),
                top: false,
                jacobian: None,
            })),
            Some(NodeRole::Bottom) => {
                let b = template.bottom_index(name).ok_or_else(missing)?;
                self.bottom(index, b).map(Some)
            }
            None => Err(missing()),
        }
    }

    fn bottom(&mut self, index: usize, b: usize) -> Result<End> {
        let fabric = self.fabric;
        let stitch = &fabric.instances[index];
        let bottom = &stitch.template.bottoms[b];
        let reference = stitch.bottoms.get(b).ok_or_else(|| {
            CompileError::internal(format!("'{}' is missing bottom '{}'", stitch.stitch, bottom.name))
        })?;
        let target = fabric.descend(reference, bottom.depth).ok_or_else(|| {
            CompileError::internal(format!("'{}' cannot reach {} rows down from {}", stitch.stitch, bottom.depth, reference))
        })?;

        match target {
            NodeRef::Concrete(id) => Ok(End {
                node: self.top(id)?,
                top: false,
                jacobian: bottom.loop_flag.map(|flag| flag.jacobian(self.options.default_loop_weight)),
            }),
            NodeRef::PostAnchor(..) => Ok(End {
                node: self.anchor(&target)?,
                top: false,
                jacobian: None,
            }),
            NodeRef::Interpolated { a, b: far, wa, wb } => {
                if let Some(node) = self.splits.get(&(index, b)) {
                    return Ok(End {
                        node: node.clone(),
                        top: false,
                        jacobian: None,
                    });
                }
                let split = self.hidden_name(index, &bottom.name);
                let (near, far) = (self.anchor(&a)?, self.anchor(&far)?);
                let color = stitch.color.clone();
                self.push_hidden(split.clone(), "hidden", &color);
                self.push_edge(near, split.clone(), wa, WeightClass::Internal);
                self.push_edge(split.clone(), far, wb, WeightClass::Internal);
                self.splits.insert((index, b), split.clone());
                Ok(End {
                    node: split,
                    top: false,
                    jacobian: None,
                })
            }
        }
    }

    /// Graph node standing for a concrete id or post anchor
    fn anchor(&self, node: &NodeRef) -> Result<String> {
        match node {
            NodeRef::Concrete(id) => self.top(*id),
            NodeRef::PostAnchor(id, name) => {
                let owner = owner_of(&self.fabric.instances, *id)
                    .ok_or_else(|| CompileError::internal(format!("post anchor {} has no owner", node)))?;
                if self.fabric.instances[owner].template.role(name) != Some(NodeRole::Hidden) {
                    return Err(CompileError::internal(format!("post anchor {} names no hidden node", node)));
                }
                Ok(self.hidden_name(owner, name))
            }
            NodeRef::Interpolated { .. } => Err(CompileError::internal(format!("nested interpolation {}", node))),
        }
    }
}

//! References from a bottom node to the node it is worked into

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRef {
    /// A top node id
    Concrete(u64),
    /// Internal node `name` of the stitch that produced top `id`
    PostAnchor(u64, String),
    /// A point between two anchors; `wa` and `wb` are the edge lengths
    /// pulling towards `a` and `b`
    Interpolated {
        a: Box<NodeRef>,
        b: Box<NodeRef>,
        wa: f64,
        wb: f64,
    },
}

impl NodeRef {
    pub fn between(a: NodeRef, b: NodeRef, wa: f64, wb: f64) -> Self {
        NodeRef::Interpolated {
            a: Box::new(a),
            b: Box::new(b),
            wa,
            wb,
        }
    }

    pub fn concrete(&self) -> Option<u64> {
        match self {
            NodeRef::Concrete(id) => Some(*id),
            _ => None,
        }
    }

    /// Top id this reference hangs off, the left anchor for interpolations
    pub fn anchor_id(&self) -> u64 {
        match self {
            NodeRef::Concrete(id) | NodeRef::PostAnchor(id, _) => *id,
            NodeRef::Interpolated { a, .. } => a.anchor_id(),
        }
    }

    /// Every top id this reference depends on
    pub fn ids(&self) -> Vec<u64> {
        match self {
            NodeRef::Concrete(id) | NodeRef::PostAnchor(id, _) => vec![*id],
            NodeRef::Interpolated { a, b, .. } => {
                let mut ids = a.ids();
                ids.extend(b.ids());
                ids
            }
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Concrete(id) => write!(f, "{}", id),
            NodeRef::PostAnchor(id, name) => write!(f, "^{}-{}", id, name),
            NodeRef::Interpolated { a, b, wa, wb } => write!(f, "({}:{} | {}:{})", a, wa, b, wb),
        }
    }
}

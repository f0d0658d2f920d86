//! Core types for the stitch pattern compiler
//!
//! This crate holds the data the compiler works over: stitch templates and
//! their raw spec syntax, the registry that seeds and synthesizes them, the
//! stitch instances a compile emits, and the output graph schema consumed by
//! layout engines.
//!
//! # Examples
//!
//! ```
//! use stitch_core::Registry;
//!
//! let mut registry = Registry::builtin().unwrap();
//! let sc3tog = registry.resolve("sc3tog").unwrap();
//! assert_eq!(sc3tog.bottoms.len(), 3);
//! ```
//!
//! # Main Components
//!
//! - **StitchTemplate**: topology and default lengths of one stitch
//! - **Registry**: named templates, with `Ntog`/`Ninc`/rescaled variants
//! - **StitchInstance**: one placed stitch with its node ids
//! - **NodeRef**: what a bottom node is worked into
//! - **PatternGraph**: the exported nodes and edges

pub mod builtins;
pub mod graph;
pub mod instance;
pub mod node_ref;
pub mod registry;
pub mod template;
pub mod variants;

pub use graph::{CompiledPattern, GraphEdge, GraphNode, NodeKind, PatternGraph, RowSummary, WeightClass};
pub use instance::{owner_of, StitchInstance};
pub use node_ref::NodeRef;
pub use registry::{is_raw_spec, Registry};
pub use template::{
    BottomNode, Connection, Endpoint, HiddenNode, Length, LoopFlag, LoopSide, NodeRole, Scale, StitchTemplate,
    TopNode, SPEC_SENTINEL,
};
pub use variants::{parse_variant_name, VariantKind};

/// Errors raised while defining, parsing or deriving templates
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown stitch type '{0}'")]
    Unknown(String),

    #[error("stitch '{0}' is already defined")]
    Duplicate(String),

    #[error("malformed stitch template '{name}': {reason}")]
    Malformed { name: String, reason: String },

    #[error("cannot derive stitch '{name}': {reason}")]
    Unsynthesizable { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TemplateError>;

//! Crochet pattern notation compiler
//!
//! This crate turns crochet pattern text into a graph of loops and yarn
//! connections that a layout engine can relax into a 3D shape.
//!
//! # Examples
//!
//! ```
//! use stitch_notation::compile;
//!
//! let pattern = compile("3ch,turn\nsk,2sc").unwrap();
//! assert_eq!(pattern.rows[1].counts["sc"], 2);
//! assert!(pattern.graph.node("1,0|4").is_some());
//! ```
//!
//! # Notation
//!
//! - Items separated by `,`, rows by newlines: `3ch,turn\nsc,sc`
//! - Repeats: `3sc`, `sc*3`, `[sc,sc2inc]*6`
//! - Labels: `ch.A`, attach with `sc@A`
//! - Addresses: `sc@[0,2]`, `dc@[sc:@+1]`, post stitches `dc@[@]^`
//! - Variables: `$i=0$`, `sc@[0,i++]`
//! - Definitions: `DEF: P=sc,ch`, `DEF: dc=Copy(dc,3)`
//!
//! # Main Functions
//!
//! - [`compile`]: full pipeline with default options
//! - [`Compiler`]: pipeline with custom [`CompileOptions`]
//! - [`parse_rows`]: structural parse of expanded notation
//! - [`format_rows`]: rows back to flat notation

pub mod arith;
pub mod ast;
pub mod builder;
pub mod compile;
pub mod error;
pub mod expander;
pub mod exporter;
pub mod formatter;
pub mod indices;
pub mod lexer;
pub mod normalizer;
pub mod options;
pub mod parser;
pub mod resolver;
pub mod span;

#[cfg(test)]
mod pipeline_tests;

pub use ast::{Attachment, RowToken, Rows, TokenKind};
pub use builder::{Fabric, GraphBuilder};
pub use compile::{compile, Compiler};
pub use error::{CompileError, ErrorKind, Result};
pub use expander::expand_repeats;
pub use exporter::export_graph;
pub use formatter::format_rows;
pub use indices::evaluate_indices;
pub use lexer::{Lexer, Token};
pub use normalizer::{normalize, Normalized};
pub use options::CompileOptions;
pub use parser::parse_rows;
pub use resolver::resolve_labels;
pub use span::{MappedText, Span};

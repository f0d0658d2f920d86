//! Compile pipeline
//!
//! normalize → expand repeats → evaluate indices → parse rows → place
//! stitches → resolve labels → export. Every compile works on its own copy
//! of the registry, so variants synthesized or `DEF:`ined by one pattern
//! never leak into the next.

use stitch_core::{CompiledPattern, Registry};

use crate::ast::Rows;
use crate::builder::GraphBuilder;
use crate::error::Result;
use crate::expander::expand_repeats;
use crate::exporter::export_graph;
use crate::indices::evaluate_indices;
use crate::normalizer::{normalize, Normalized};
use crate::options::CompileOptions;
use crate::parser::parse_rows;
use crate::resolver::resolve_labels;
use crate::span::MappedText;

/// A compiler seeded with the built-in stitches
#[derive(Debug, Clone)]
pub struct Compiler {
    pub options: CompileOptions,
    registry: Registry,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Result<Self> {
        let registry = Registry::builtin()?;
        Ok(Compiler { options, registry })
    }

    /// Start from `registry` instead of the built-ins
    pub fn with_registry(options: CompileOptions, registry: Registry) -> Self {
        Compiler { options, registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Notation after normalizing, repeat expansion and index evaluation
    pub fn expand(&self, source: &str) -> Result<String> {
        let mut registry = self.registry.clone();
        let (_, text) = self.front(source, &mut registry).map_err(|e| e.with_source(source))?;
        Ok(text.as_str().to_string())
    }

    /// Structural parse of `source`
    pub fn rows(&self, source: &str) -> Result<Rows> {
        let mut registry = self.registry.clone();
        self.parse(source, &mut registry)
            .map(|(_, rows)| rows)
            .map_err(|e| e.with_source(source))
    }

    pub fn compile(&self, source: &str) -> Result<CompiledPattern> {
        self.run(source).map_err(|e| e.with_source(source))
    }

    fn front(&self, source: &str, registry: &mut Registry) -> Result<(Normalized, MappedText)> {
        let normalized = normalize(source, registry)?;
        log::debug!(
            "normalized {} byte(s), {} color switch(es)",
            normalized.expression.len(),
            normalized.colors.len()
        );
        let expanded = expand_repeats(&normalized.expression)?;
        log::debug!("expanded repeats to {} byte(s)", expanded.len());
        let evaluated = evaluate_indices(&expanded, registry)?;
        log::debug!("evaluated indices to {} byte(s)", evaluated.len());
        Ok((normalized, evaluated))
    }

    fn parse(&self, source: &str, registry: &mut Registry) -> Result<(Normalized, Rows)> {
        let (normalized, text) = self.front(source, registry)?;
        let rows = parse_rows(&text, &normalized.colors, &self.options.default_color)?;
        Ok((normalized, rows))
    }

    fn run(&self, source: &str) -> Result<CompiledPattern> {
        let mut registry = self.registry.clone();
        let (normalized, rows) = self.parse(source, &mut registry)?;
        let mut fabric = GraphBuilder::new(&mut registry, &self.options).build(&rows)?;
        resolve_labels(&mut fabric)?;
        let graph = export_graph(&fabric, &self.options)?;

        let metadata = normalized.metadata;
        Ok(CompiledPattern {
            graph,
            metadata: metadata.dot,
            transforms: metadata.transforms,
            background: metadata.background,
            definitions: metadata.definitions,
            rows: fabric.row_summaries(),
        })
    }
}

/// Compile `source` with default options
pub fn compile(source: &str) -> Result<CompiledPattern> {
    Compiler::new(CompileOptions::default())?.compile(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_compiles_are_independent() {
        let compiler = Compiler::new(CompileOptions::default()).unwrap();
        let builtins = compiler.registry().len();
        let first = compiler.compile("DEF: dc=Copy(dc,3)\n6ch\ndc,sc3tog").unwrap();
        assert_eq!(first.definitions.len(), 1);
        assert_eq!(first.rows[1].counts["sc3tog"], 1);
        assert!(!compiler.registry().contains("sc3tog"));
        assert_eq!(compiler.registry().len(), builtins);
        // the rescaled dc must not survive into the next compile
        let second = compiler.compile("3ch\ndc").unwrap();
        let edge = second.graph.edge_between("0,0|0", "1,0|3").unwrap();
        assert_eq!(edge.length, 2.0);
    }

    #[test]
    fn test_errors_carry_snippets() {
        let err = compile("3ch\nsc,bogus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownStitchType);
        assert_eq!(err.snippet.as_deref(), Some("bogus"));
    }

    #[test]
    fn test_expand_and_rows() {
        let compiler = Compiler::new(CompileOptions::default()).unwrap();
        assert_eq!(compiler.expand("2[ch,sc]").unwrap(), "[ch,sc],[ch,sc]");
        let rows = compiler.rows("3ch,turn\nsc").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_first_id_option() {
        let options = CompileOptions {
            first_id: 10,
            ..Default::default()
        };
        let pattern = Compiler::new(options).unwrap().compile("3ch\n3sc").unwrap();
        assert!(pattern.graph.edge_between("0,0|0", "1,0|3").is_some());
        assert_eq!(pattern.rows[1].counts["sc"], 3);
    }
}

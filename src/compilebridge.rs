//! Serializable views of compiler results
//!
//! The CLI prints these as JSON or as human-readable text, so callers get
//! the same shape whether they read stdout or a file.

use serde::{Deserialize, Serialize};
use stitch_core::{Registry, StitchTemplate};
use stitch_notation::{CompileError, ErrorKind};

/// A compile error located in the pattern source
#[derive(Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<ErrorLocation>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: usize,
    pub column: usize,
    pub span_start: usize,
    pub span_end: usize,
    pub snippet: String,
}

impl Diagnostic {
    pub fn new(err: &CompileError, source: &str) -> Self {
        Diagnostic {
            kind: err.kind(),
            message: err.message.clone(),
            location: err.span().map(|span| {
                let (line, column) = span.line_col(source);
                ErrorLocation {
                    line,
                    column,
                    span_start: span.start,
                    span_end: span.end,
                    snippet: span.snippet(source).to_string(),
                }
            }),
        }
    }

    /// `line:col: kind: message`, then the source line with the span underlined
    pub fn render(&self, source: &str) -> String {
        let Some(location) = &self.location else {
            return format!("{}: {}", self.kind, self.message);
        };
        let mut out = format!("{}:{}: {}: {}", location.line, location.column, self.kind, self.message);
        if let Some(text) = source.lines().nth(location.line - 1) {
            let width = location.snippet.lines().next().map_or(0, |s| s.chars().count()).max(1);
            out.push_str(&format!(
                "\n  {}\n  {}{}",
                text,
                " ".repeat(location.column - 1),
                "^".repeat(width)
            ));
        }
        out
    }
}

/// One registry entry as listed by `stitches`
#[derive(Debug, Serialize, Deserialize)]
pub struct StitchInfo {
    pub name: String,
    pub description: String,
    pub tops: usize,
    pub bottoms: usize,
    pub spec: String,
}

impl From<&StitchTemplate> for StitchInfo {
    fn from(template: &StitchTemplate) -> Self {
        StitchInfo {
            name: template.name.clone(),
            description: template.description.clone(),
            tops: template.tops.len(),
            bottoms: template.bottoms.len(),
            spec: template.to_spec(),
        }
    }
}

/// Templates in `registry`, in name order
pub fn list_stitches(registry: &Registry) -> Vec<StitchInfo> {
    registry
        .names()
        .into_iter()
        .filter_map(|name| registry.lookup(name).ok())
        .map(|template| StitchInfo::from(template.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_notation::compile;

    #[test]
    fn test_diagnostic_points_at_the_stitch() {
        let source = "3ch\nsc,bogus";
        let err = compile(source).unwrap_err();
        let diagnostic = Diagnostic::new(&err, source);
        assert_eq!(diagnostic.kind, ErrorKind::UnknownStitchType);
        let location = diagnostic.location.as_ref().unwrap();
        assert_eq!((location.line, location.column), (2, 4));
        assert_eq!(location.snippet, "bogus");

        let rendered = diagnostic.render(source);
        assert!(rendered.starts_with("2:4: unknown stitch type"));
        assert!(rendered.ends_with("  sc,bogus\n     ^^^^^"));
    }

    #[test]
    fn test_diagnostic_without_location() {
        let err = CompileError::internal("dangling node");
        let diagnostic = Diagnostic::new(&err, "");
        assert!(diagnostic.location.is_none());
        assert_eq!(diagnostic.render(""), "internal inconsistency: dangling node");
    }

    #[test]
    fn test_list_stitches_is_sorted() {
        let registry = Registry::builtin().unwrap();
        let stitches = list_stitches(&registry);
        assert_eq!(stitches.len(), registry.len());
        assert!(stitches.windows(2).all(|w| w[0].name <= w[1].name));
        let sc = stitches.iter().find(|s| s.name == "sc").unwrap();
        assert_eq!((sc.tops, sc.bottoms), (1, 1));
    }
}

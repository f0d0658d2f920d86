use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;
use stitch_core::TemplateError;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnbalancedBrackets,
    UnknownStitchType,
    DuplicateDefinition,
    /// A macro or variable name shadows a stitch name
    NameCollision,
    TurnNotAtRowEnd,
    AddressNotFound,
    LabelNotFound,
    AmbiguousLabelDefinition,
    MultiplierParseError,
    UnsupportedNesting,
    /// A defect in an earlier phase surfaced during export
    InternalInconsistency,
    /// Malformed notation that fits no other kind
    Syntax,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnbalancedBrackets => "unbalanced brackets",
            ErrorKind::UnknownStitchType => "unknown stitch type",
            ErrorKind::DuplicateDefinition => "duplicate definition",
            ErrorKind::NameCollision => "name collision",
            ErrorKind::TurnNotAtRowEnd => "turn not at row end",
            ErrorKind::AddressNotFound => "address not found",
            ErrorKind::LabelNotFound => "label not found",
            ErrorKind::AmbiguousLabelDefinition => "ambiguous label definition",
            ErrorKind::MultiplierParseError => "bad multiplier",
            ErrorKind::UnsupportedNesting => "unsupported nesting",
            ErrorKind::InternalInconsistency => "internal inconsistency",
            ErrorKind::Syntax => "syntax error",
        };
        f.write_str(name)
    }
}

/// A fatal compile error, located in the pattern source
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<Span>,
    /// Source text under `span`, filled in once the source is known
    pub snippet: Option<String>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CompileError {
            kind,
            message: message.into(),
            span: None,
            snippet: None,
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Keep an existing location, otherwise use `span`
    pub fn or_at(mut self, span: Span) -> Self {
        self.span.get_or_insert(span);
        self
    }

    pub fn unbalanced(message: impl Into<String>, span: Span) -> Self {
        CompileError::new(ErrorKind::UnbalancedBrackets, message).at(span)
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        CompileError::new(ErrorKind::Syntax, message).at(span)
    }

    pub fn multiplier(message: impl Into<String>, span: Span) -> Self {
        CompileError::new(ErrorKind::MultiplierParseError, message).at(span)
    }

    pub fn address_not_found(message: impl Into<String>, span: Span) -> Self {
        CompileError::new(ErrorKind::AddressNotFound, message).at(span)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::new(ErrorKind::InternalInconsistency, message)
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Attach the offending source text
    pub fn with_source(mut self, source: &str) -> Self {
        if let Some(span) = self.span {
            self.snippet = Some(span.snippet(source).to_string());
        }
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        match (&self.span, &self.snippet) {
            (Some(span), Some(snippet)) if !snippet.is_empty() => write!(f, " at {} ('{}')", span, snippet),
            (Some(span), _) => write!(f, " at {}", span),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<TemplateError> for CompileError {
    fn from(err: TemplateError) -> Self {
        let kind = match &err {
            TemplateError::Unknown(_) => ErrorKind::UnknownStitchType,
            TemplateError::Duplicate(_) => ErrorKind::DuplicateDefinition,
            TemplateError::Malformed { .. } | TemplateError::Unsynthesizable { .. } => ErrorKind::Syntax,
        };
        CompileError::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_snippet() {
        let err = CompileError::unbalanced("unmatched ']'", Span::new(3, 4)).with_source("3sc]");
        assert_eq!(err.to_string(), "unbalanced brackets: unmatched ']' at 3..4 (']')");
    }

    #[test]
    fn test_template_error_kinds() {
        let err: CompileError = TemplateError::Unknown("zz".into()).into();
        assert_eq!(err.kind(), ErrorKind::UnknownStitchType);
        let err: CompileError = TemplateError::Duplicate("dc".into()).into();
        assert_eq!(err.kind(), ErrorKind::DuplicateDefinition);
    }

    #[test]
    fn test_or_at_keeps_first_location() {
        let err = CompileError::syntax("x", Span::new(1, 2)).or_at(Span::new(5, 6));
        assert_eq!(err.span(), Some(Span::new(1, 2)));
    }
}

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which boundary stitches a `+` modifier adds to a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extend {
    /// `+`
    Both,
    /// `+0`
    Left,
    /// `+1`
    Right,
}

/// Which boundary slots a `!` modifier leaves empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Skip {
    /// `!`
    Both,
    /// `!0`
    First,
    /// `!1`
    Last,
}

/// `+`, `!` and `^` modifiers on a label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelModifiers {
    pub extend: Option<Extend>,
    pub skip: Option<Skip>,
    /// `^` / `^N`: attach around the post; `None` inside means the last one
    pub post: Option<Option<i64>>,
}

impl LabelModifiers {
    pub fn is_empty(&self) -> bool {
        self.extend.is_none() && self.skip.is_none() && self.post.is_none()
    }

    /// Combine modifiers written on a definition with those on a reference
    pub fn merge(&self, other: &LabelModifiers) -> LabelModifiers {
        LabelModifiers {
            extend: self.extend.or(other.extend),
            skip: self.skip.or(other.skip),
            post: self.post.or(other.post),
        }
    }
}

impl fmt::Display for LabelModifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extend {
            Some(Extend::Both) => write!(f, "+")?,
            Some(Extend::Left) => write!(f, "+0")?,
            Some(Extend::Right) => write!(f, "+1")?,
            None => {}
        }
        match self.skip {
            Some(Skip::Both) => write!(f, "!")?,
            Some(Skip::First) => write!(f, "!0")?,
            Some(Skip::Last) => write!(f, "!1")?,
            None => {}
        }
        match self.post {
            Some(Some(n)) => write!(f, "^{}", n),
            Some(None) => write!(f, "^"),
            None => Ok(()),
        }
    }
}

/// `.Name`, `.Name[0,3]`, `.Name+!`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDef {
    /// Name plus its bracket selector, e.g. `C[0,3]`
    pub key: String,
    pub modifiers: LabelModifiers,
    pub span: Span,
}

/// `@Name`, `@Name[i]`, `@Name[i;g]~`, `@Name[sel][k]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRef {
    /// Label key the reference names, group selector removed
    pub key: String,
    /// `;g`: which pass over the label this reference belongs to
    pub group: i64,
    /// `~`: consume the label's stitches in reverse
    pub reversed: bool,
    /// `[sel][k]`: seek to the k-th stitch of the label instead of mapping
    pub index: Option<i64>,
    pub modifiers: LabelModifiers,
}

/// Attachment expression following `@`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attachment {
    /// No `@`: one step on from the last attachment
    Advance,
    /// `@[row,pos]` or `@[type:row,pos]`; `%` is kept in the text
    Absolute {
        row: String,
        pos: String,
        stitch_type: Option<String>,
    },
    /// `@[@+k]` or `@[type:@+k]`
    Relative { stitch_type: Option<String>, offset: i64 },
    Label(LabelRef),
}

/// Where and how a stitch attaches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachSpec {
    pub target: Attachment,
    /// `^` / `^N` after a bracketed address
    pub post: Option<Option<i64>>,
}

impl AttachSpec {
    pub fn advance() -> Self {
        AttachSpec {
            target: Attachment::Advance,
            post: None,
        }
    }
}

/// Node of the structural tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Stitch(StitchNode),
    /// Bracketed sub-tree; its labels and attachment apply to every child
    Group(GroupNode),
    Turn(Span),
    /// Color switch, keyed into the normalizer's color map
    Color(usize, Span),
    /// `@...` with no stitch: move the cursor only
    Seek(AttachSpec, String, Span),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchNode {
    pub name: String,
    pub labels: Vec<LabelDef>,
    pub attach: Option<(AttachSpec, String)>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    pub children: Vec<Vec<Node>>,
    pub labels: Vec<LabelDef>,
    pub attach: Option<(AttachSpec, String)>,
    pub span: Span,
}

/// A parsed row: its items in order
pub type RowNodes = Vec<Node>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    Stitch(String),
    Turn,
    Seek,
}

/// One flattened row item handed to the graph builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowToken {
    pub kind: TokenKind,
    pub labels: Vec<LabelDef>,
    pub attach: AttachSpec,
    /// Attachment text as written, empty for the implicit advance
    pub raw_attachment: String,
    pub row: usize,
    pub color: String,
    /// Location in the pattern source
    pub span: Span,
}

impl RowToken {
    pub fn stitch_name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Stitch(name) => Some(name),
            _ => None,
        }
    }
}

/// Flattened pattern: `rows[r]` holds the tokens of row `r`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    pub rows: Vec<Vec<RowToken>>,
}

impl Rows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &RowToken> {
        self.rows.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_display() {
        let modifiers = LabelModifiers {
            extend: Some(Extend::Right),
            skip: Some(Skip::Both),
            post: None,
        };
        assert_eq!(modifiers.to_string(), "+1!");
        let post = LabelModifiers {
            post: Some(None),
            ..Default::default()
        };
        assert_eq!(post.to_string(), "^");
        assert!(LabelModifiers::default().is_empty());
    }

    #[test]
    fn test_merge_prefers_definition() {
        let def = LabelModifiers {
            extend: Some(Extend::Both),
            ..Default::default()
        };
        let reference = LabelModifiers {
            extend: Some(Extend::Left),
            skip: Some(Skip::First),
            post: None,
        };
        let merged = def.merge(&reference);
        assert_eq!(merged.extend, Some(Extend::Both));
        assert_eq!(merged.skip, Some(Skip::First));
    }
}

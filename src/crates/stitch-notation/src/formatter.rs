// Formatter: flattened rows back to notation
use crate::ast::{RowToken, Rows, TokenKind};

/// Format rows as flat notation: one line per row, no repeats or variables
///
/// A `COLOR:` item is written wherever the color changes, starting from
/// `default_color`. Labels a token inherited from enclosing groups become
/// nested single-stitch groups, so the output parses back to the same rows.
pub fn format_rows(rows: &Rows, default_color: &str) -> String {
    let mut color = default_color;
    let mut lines = Vec::with_capacity(rows.len());
    for row in &rows.rows {
        let mut items = Vec::with_capacity(row.len());
        for token in row {
            if token.kind != TokenKind::Turn && token.color != color {
                items.push(format!("COLOR:{}", token.color));
                color = &token.color;
            }
            items.push(format_token(token));
        }
        lines.push(items.join(","));
    }
    lines.join("\n")
}

fn attachment(token: &RowToken) -> String {
    if token.raw_attachment.is_empty() {
        String::new()
    } else {
        format!("@{}", token.raw_attachment)
    }
}

fn format_token(token: &RowToken) -> String {
    match &token.kind {
        TokenKind::Turn => "turn".to_string(),
        TokenKind::Seek => attachment(token),
        TokenKind::Stitch(name) => {
            // Outermost group label comes first
            let mut labels = token.labels.iter().rev();
            let mut out = name.clone();
            if let Some(first) = labels.next() {
                out.push_str(&format!(".{}{}", first.key, first.modifiers));
            }
            out.push_str(&attachment(token));
            for label in labels {
                out = format!("[{}].{}{}", out, label.key, label.modifiers);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DEFAULT_COLOR;
    use crate::parser::parse_rows;
    use crate::span::MappedText;
    use std::collections::BTreeMap;

    type Shape = Vec<(TokenKind, Vec<String>, String, String, usize)>;

    fn shape(rows: &Rows) -> Shape {
        rows.tokens()
            .map(|t| {
                let labels = t.labels.iter().map(|l| format!("{}{}", l.key, l.modifiers)).collect();
                (t.kind.clone(), labels, t.raw_attachment.clone(), t.color.clone(), t.row)
            })
            .collect()
    }

    fn parse(input: &str, colors: &BTreeMap<usize, String>) -> Rows {
        parse_rows(&MappedText::from_source(input), colors, DEFAULT_COLOR).unwrap()
    }

    fn roundtrip(input: &str) {
        let rows = parse(input, &BTreeMap::new());
        let formatted = format_rows(&rows, DEFAULT_COLOR);
        let again = parse(&formatted, &BTreeMap::new());
        assert_eq!(shape(&rows), shape(&again), "Roundtrip failed for '{}' -> '{}'", input, formatted);
    }

    #[test]
    fn test_format_plain_rows() {
        let rows = parse("ch,ch,turn\nsc,sc", &BTreeMap::new());
        assert_eq!(format_rows(&rows, DEFAULT_COLOR), "ch,ch,turn\nsc,sc");
    }

    #[test]
    fn test_format_labels_and_addresses() {
        roundtrip("ch.A+!,ch.B^2,ch\nsc@A~,sc@[0,%],sc@[dc:@+1]^,@B");
        roundtrip("[sc,dc@B].A@C[2]");
    }

    #[test]
    fn test_format_nested_labels() {
        let rows = parse("[sc.B].A", &BTreeMap::new());
        assert_eq!(format_rows(&rows, DEFAULT_COLOR), "[sc.B].A");
    }

    #[test]
    fn test_format_colors() {
        let mut colors = BTreeMap::new();
        colors.insert(3, "red".to_string());
        let rows = parse("ch,COLOR:3,sc\nsc", &colors);
        assert_eq!(format_rows(&rows, DEFAULT_COLOR), "ch,COLOR:red,sc\nsc");
    }
}

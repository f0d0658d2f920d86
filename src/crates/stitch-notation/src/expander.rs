//! Repeat expander
//!
//! Every comma/newline separated item has up to three zones:
//!
//! ```text
//! 3*[sc,2dc].A@B      leading multiplier, bracketed body, suffixes
//! [sc,dc]*3.A         trailing multiplier
//! 12sc                multiplier glued to a stitch name
//! ```
//!
//! Multiplied items are replaced by comma-joined copies. Inside a
//! multiplied group, a bare `>` item ends the *last* repetition early and a
//! bare `<` makes the *first* repetition start late:
//!
//! ```text
//! [12sc,sc3inc,>,2sk]*3   ->  [12sc,sc3inc,2sk],[12sc,sc3inc,2sk],[12sc,sc3inc]
//! [ch,<,sc]*2             ->  [sc],[ch,sc]
//! ```
//!
//! Markers are only understood at the top level of a multiplied group.

use std::ops::Range;

use crate::error::{CompileError, ErrorKind, Result};
use crate::span::MappedText;

const EARLY_EXIT: &str = ">";
const LATE_START: &str = "<";

/// Expand every multiplier in `text`
pub fn expand_repeats(text: &MappedText) -> Result<MappedText> {
    let out = expand_sequence(text, 0..text.len())?;
    if let Some(span) = find_marker(&out) {
        return Err(CompileError::new(
            ErrorKind::UnsupportedNesting,
            "'>' and '<' must sit directly inside a repeated group",
        )
        .at(span));
    }
    log::debug!("expanded {} bytes of notation into {} bytes", text.len(), out.len());
    Ok(out)
}

#[derive(Debug, Clone)]
struct Item {
    range: Range<usize>,
    /// Separator after the item, with its offset
    sep: Option<(char, usize)>,
}

/// Split `range` of `s` at top-level `,` and newlines
fn split_items(s: &str, range: Range<usize>) -> Vec<Item> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_block = false;
    let mut start = range.start;

    for (offset, ch) in s[range.clone()].char_indices() {
        let i = range.start + offset;
        match ch {
            '$' => in_block = !in_block,
            '(' | '[' | '{' if !in_block => depth += 1,
            ')' | ']' | '}' if !in_block => depth = depth.saturating_sub(1),
            ',' | '\n' if depth == 0 && !in_block => {
                items.push(Item {
                    range: start..i,
                    sep: Some((ch, i)),
                });
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(Item {
        range: start..range.end,
        sep: None,
    });
    items
}

#[derive(Debug, Clone)]
enum Body {
    Literal(Range<usize>),
    Group { open: usize, inner: Range<usize>, close: usize },
}

#[derive(Debug, Clone)]
struct Zones {
    count: Option<usize>,
    body: Option<Body>,
    /// `.label` and `@attachment` pieces in written order
    suffixes: Vec<Range<usize>>,
    has_attachment: bool,
}

fn expand_sequence(text: &MappedText, range: Range<usize>) -> Result<MappedText> {
    let mut out = MappedText::new();
    for item in split_items(text.as_str(), range) {
        out.push_mapped(&expand_item(text, &item.range)?);
        if let Some((sep, at)) = item.sep {
            out.push(sep, text.origin(at));
        }
    }
    Ok(out)
}

fn expand_item(text: &MappedText, range: &Range<usize>) -> Result<MappedText> {
    let s = text.as_str();
    if s[range.clone()].is_empty() {
        return Ok(MappedText::new());
    }
    let span = text.source_span(range.clone());
    let zones = zones(text, range.clone())?;

    let render = |body: &MappedText| {
        let mut once = body.clone();
        for piece in &zones.suffixes {
            once.push_slice(text, piece.clone());
        }
        once
    };

    let body = match &zones.body {
        None if zones.has_attachment && zones.count.is_none() => {
            return Ok(render(&MappedText::new()));
        }
        None if zones.count.is_some() => {
            return Err(CompileError::multiplier("multiplier without a stitch", span));
        }
        None => return Err(CompileError::syntax("label without a stitch", span)),
        Some(body) => body,
    };

    match body {
        Body::Literal(lit) => {
            let literal = text.slice(lit.clone());
            if is_marker(literal.as_str()) && (zones.count.is_some() || !zones.suffixes.is_empty()) {
                return Err(CompileError::syntax("'>' and '<' markers take no multiplier or suffix", span));
            }
            let once = render(&literal);
            Ok(repeat(&[once], zones.count.unwrap_or(1), text.origin(range.start)))
        }
        Body::Group { open, inner, close } => {
            let expanded = expand_sequence(text, inner.clone())?;
            let wrap = |content: &MappedText| {
                let mut group = MappedText::new();
                group.push_slice(text, *open..open + 1);
                group.push_mapped(content);
                group.push_slice(text, *close..close + 1);
                render(&group)
            };
            match zones.count {
                None => {
                    if let Some(marker) = find_marker(&expanded) {
                        return Err(CompileError::new(
                            ErrorKind::UnsupportedNesting,
                            "'>' and '<' need a multiplier on the group that directly contains them",
                        )
                        .at(marker));
                    }
                    Ok(wrap(&expanded))
                }
                Some(count) => {
                    let copies = repetitions(&expanded, count, span)?;
                    let copies: Vec<MappedText> = copies.iter().map(wrap).collect();
                    Ok(repeat(&copies, 1, text.origin(range.start)))
                }
            }
        }
    }
}

/// Join `count` rounds of `copies` with commas
fn repeat(copies: &[MappedText], count: usize, origin: usize) -> MappedText {
    let mut out = MappedText::new();
    for round in 0..count {
        for (k, copy) in copies.iter().enumerate() {
            if round > 0 || k > 0 {
                out.push(',', origin);
            }
            out.push_mapped(copy);
        }
    }
    out
}

fn zones(text: &MappedText, range: Range<usize>) -> Result<Zones> {
    let s = text.as_str();
    let bytes = s.as_bytes();
    let end = range.end;
    let mut i = range.start;
    let span_of = |r: Range<usize>| text.source_span(r);

    let mut zones = Zones {
        count: None,
        body: None,
        suffixes: Vec::new(),
        has_attachment: false,
    };

    let digits = s[i..end].bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        zones.count = Some(parse_count(text, i..i + digits)?);
        i += digits;
        if i < end && bytes[i] == b'*' {
            i += 1;
        }
        if i >= end {
            return Err(CompileError::multiplier("multiplier without a stitch", span_of(range)));
        }
    }

    if bytes[i] == b'-' && bytes.get(i + 1).map_or(false, u8::is_ascii_digit) {
        return Err(CompileError::multiplier("negative multiplier", span_of(range)));
    }

    match bytes[i] {
        b'(' | b'[' | b'{' => {
            let close = matching_close(text, i, end)?;
            zones.body = Some(Body::Group {
                open: i,
                inner: i + 1..close,
                close,
            });
            i = close + 1;
        }
        b'$' => {
            let close = s[i + 1..end]
                .find('$')
                .map(|p| i + 1 + p)
                .ok_or_else(|| CompileError::unbalanced("variable block '$' is never closed", span_of(i..end)))?;
            zones.body = Some(Body::Literal(i..close + 1));
            i = close + 1;
        }
        b'.' | b'@' => {}
        _ => {
            let stop = scan_until(s, i, end, b".@*");
            zones.body = Some(Body::Literal(i..stop));
            i = stop;
        }
    }

    let mut labelled = false;
    while i < end {
        match bytes[i] {
            b'.' => {
                if labelled {
                    return Err(CompileError::syntax(
                        "only one label per item; wrap the item in parentheses to add another",
                        span_of(range),
                    ));
                }
                labelled = true;
                let stop = scan_until(s, i + 1, end, b".@*");
                zones.suffixes.push(i..stop);
                i = stop;
            }
            b'@' => {
                if zones.has_attachment {
                    return Err(CompileError::syntax("only one attachment per item", span_of(range)));
                }
                zones.has_attachment = true;
                let stop = scan_until(s, i + 1, end, b".@*");
                zones.suffixes.push(i..stop);
                i = stop;
            }
            b'*' => {
                if zones.count.is_some() {
                    return Err(CompileError::multiplier("item has two multipliers", span_of(range)));
                }
                let digits = s[i + 1..end].bytes().take_while(u8::is_ascii_digit).count();
                if digits == 0 {
                    return Err(CompileError::multiplier("'*' must be followed by a count", span_of(range)));
                }
                zones.count = Some(parse_count(text, i + 1..i + 1 + digits)?);
                i += 1 + digits;
            }
            other => {
                return Err(CompileError::syntax(
                    format!("unexpected '{}' after the stitch", other as char),
                    span_of(i..i + 1),
                ));
            }
        }
    }

    Ok(zones)
}

fn parse_count(text: &MappedText, range: Range<usize>) -> Result<usize> {
    text.as_str()[range.clone()]
        .parse::<usize>()
        .map_err(|e| CompileError::multiplier(format!("bad multiplier: {}", e), text.source_span(range)))
}

/// First top-level byte in `stops`, or `end`
fn scan_until(s: &str, from: usize, end: usize, stops: &[u8]) -> usize {
    let mut depth = 0usize;
    for (k, b) in s.as_bytes()[from..end].iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ if depth == 0 && stops.contains(b) => return from + k,
            _ => {}
        }
    }
    end
}

fn matching_close(text: &MappedText, open: usize, end: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (k, b) in text.as_str().as_bytes()[open..end].iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(open + k);
                }
            }
            _ => {}
        }
    }
    Err(CompileError::unbalanced("group is never closed", text.source_span(open..open + 1)))
}

fn is_marker(item: &str) -> bool {
    item == EARLY_EXIT || item == LATE_START
}

/// Source span of the first top-level marker item in `text`
fn find_marker(text: &MappedText) -> Option<crate::span::Span> {
    split_items(text.as_str(), 0..text.len())
        .into_iter()
        .find(|item| is_marker(&text.as_str()[item.range.clone()]))
        .map(|item| text.source_span(item.range))
}

/// The `count` repetitions of an expanded group body, honoring markers
fn repetitions(body: &MappedText, count: usize, span: crate::span::Span) -> Result<Vec<MappedText>> {
    let items = split_items(body.as_str(), 0..body.len());
    let position = |marker: &str| -> Result<Option<usize>> {
        let found: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| &body.as_str()[item.range.clone()] == marker)
            .map(|(k, _)| k)
            .collect();
        match found.len() {
            0 => Ok(None),
            1 => Ok(Some(found[0])),
            _ => Err(CompileError::new(
                ErrorKind::UnsupportedNesting,
                format!("a repeated group may hold only one '{}' marker", marker),
            )
            .at(span)),
        }
    };
    let exit = position(EARLY_EXIT)?;
    let start = position(LATE_START)?;

    let render = |from: usize, to: usize| {
        let mut out = MappedText::new();
        for item in items.iter().take(to).skip(from) {
            let marker = is_marker(&body.as_str()[item.range.clone()]);
            if !marker {
                out.push_slice(body, item.range.clone());
            }
            match item.sep {
                Some(('\n', at)) => out.push('\n', body.origin(at)),
                Some((sep, at)) if !marker => out.push(sep, body.origin(at)),
                _ => {}
            }
        }
        out.trim_end_commas();
        out
    };

    let all = items.len();
    let full = render(0, all);
    let first = render(start.map_or(0, |p| p + 1), all);
    let last = render(0, exit.unwrap_or(all));

    Ok(match count {
        0 => Vec::new(),
        1 => vec![render(start.map_or(0, |p| p + 1), exit.unwrap_or(all))],
        n => {
            let mut copies = Vec::with_capacity(n);
            copies.push(first);
            copies.extend(std::iter::repeat(full).take(n - 2));
            copies.push(last);
            copies
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(input: &str) -> Result<String> {
        expand_repeats(&MappedText::from_source(input)).map(|t| t.as_str().to_string())
    }

    #[test]
    fn test_literal_multipliers() {
        assert_eq!(expand("3sc").unwrap(), "sc,sc,sc");
        assert_eq!(expand("2*dc.A").unwrap(), "dc.A,dc.A");
        assert_eq!(expand("ch*2@B").unwrap(), "ch@B,ch@B");
        assert_eq!(expand("0sc,ch").unwrap(), ",ch");
    }

    #[test]
    fn test_group_multipliers() {
        assert_eq!(expand("[sc,dc]*2").unwrap(), "[sc,dc],[sc,dc]");
        assert_eq!(expand("2[sc,2ch].A").unwrap(), "[sc,ch,ch].A,[sc,ch,ch].A");
        assert_eq!(expand("(3(sc,dc))").unwrap(), "((sc,dc),(sc,dc),(sc,dc))");
    }

    #[test]
    fn test_unmultiplied_group_kept() {
        assert_eq!(expand("[sc,sc].A@B[2],turn").unwrap(), "[sc,sc].A@B[2],turn");
    }

    #[test]
    fn test_rows_survive() {
        assert_eq!(expand("3ch,turn\n[sc,turn\n]*2").unwrap(), "ch,ch,ch,turn\n[sc,turn\n],[sc,turn\n]");
    }

    #[test]
    fn test_early_exit_marker() {
        assert_eq!(
            expand("[12sc,sc3inc,>,2sk]*3").unwrap().replace("sc,sc,sc,sc,sc,sc,sc,sc,sc,sc,sc,sc", "12sc"),
            "[12sc,sc3inc,sk,sk],[12sc,sc3inc,sk,sk],[12sc,sc3inc]"
        );
        assert_eq!(expand("2*[A,>,B]").unwrap(), "[A,B],[A]");
    }

    #[test]
    fn test_late_start_marker() {
        assert_eq!(expand("[ch,<,sc]*3").unwrap(), "[sc],[ch,sc],[ch,sc]");
        assert_eq!(expand("[ch,<,sc,>,dc]*1").unwrap(), "[sc]");
    }

    #[test]
    fn test_marker_errors() {
        assert_eq!(expand("sc,>,sc").unwrap_err().kind(), ErrorKind::UnsupportedNesting);
        assert_eq!(expand("[[sc,>,dc],ch]*2").unwrap_err().kind(), ErrorKind::UnsupportedNesting);
        assert_eq!(expand("[sc,>,dc,>]*2").unwrap_err().kind(), ErrorKind::UnsupportedNesting);
        assert_eq!(expand("[[sc,>,dc]*2,ch]*2").unwrap(), "[[sc,dc],[sc],ch],[[sc,dc],[sc],ch]");
    }

    #[test]
    fn test_multiplier_errors() {
        assert_eq!(expand("7sc*3").unwrap_err().kind(), ErrorKind::MultiplierParseError);
        assert_eq!(expand("sc*x").unwrap_err().kind(), ErrorKind::MultiplierParseError);
        assert_eq!(expand("3").unwrap_err().kind(), ErrorKind::MultiplierParseError);
        assert_eq!(expand("-3sc").unwrap_err().kind(), ErrorKind::MultiplierParseError);
    }

    #[test]
    fn test_suffix_errors() {
        assert_eq!(expand("sc.A.B").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(expand("sc@A@B").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(expand(".A").unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_seek_and_blocks_pass_through() {
        assert_eq!(expand("$i=0,j=2$,@[0,5],sc").unwrap(), "$i=0,j=2$,@[0,5],sc");
        assert_eq!(expand("[COLOR:12,sc]*2").unwrap(), "[COLOR:12,sc],[COLOR:12,sc]");
    }

    #[test]
    fn test_provenance_of_copies() {
        let source = "[sc,dc]*2";
        let out = expand_repeats(&MappedText::from_source(source)).unwrap();
        let second_dc = out.as_str().rfind("dc").unwrap();
        assert_eq!(out.source_span(second_dc..second_dc + 2).snippet(source), "dc");
    }

    proptest::proptest! {
        #[test]
        fn prop_repeat_cardinality(count in 1usize..12, body in "(sc|dc|ch)(,(sc|dc|ch)){0,3}") {
            let group = format!("[{}]", body);
            let out = expand(&format!("{}*{}", group, count)).unwrap();
            let copies: Vec<&str> = out.split("],").collect();
            proptest::prop_assert_eq!(copies.len(), count);
            proptest::prop_assert_eq!(out, vec![group; count].join(","));
        }
    }
}

//! Text normalizer
//!
//! Turns raw pattern text into one expression string:
//!
//! ```text
//! DEF: P=sc,dc          # macro
//! COLOR:red, 3P, turn   # becomes COLOR:<key>,3(sc,dc),turn
//! DOT: iterations=4000  # passed through to the output
//! ```
//!
//! `#` starts a comment (except directly after `COLOR:` or `BACKGROUND:`,
//! where it is part of a hex color), a trailing `\` joins the next line,
//! `...` is a separator, and `DEF:`/`DOT:`/`BACKGROUND:`/`TRANSFORM_OBJECT:`
//! lines are taken out of the expression. Color names move into a side map;
//! the expression keeps a `COLOR:<key>` marker so colors repeat with the
//! groups that contain them.

use std::collections::BTreeMap;

use regex::{Captures, Regex};
use stitch_core::{is_raw_spec, Registry};

use crate::error::{CompileError, ErrorKind, Result};
use crate::span::MappedText;

pub const COLOR_MARK: &str = "COLOR:";
const DEF_MARK: &str = "DEF:";
const DOT_MARK: &str = "DOT:";
const BACKGROUND_MARK: &str = "BACKGROUND:";
const TRANSFORM_MARK: &str = "TRANSFORM_OBJECT:";
const COPY_MARK: &str = "Copy(";

/// Out-of-band lines, preserved for non-graph consumers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub dot: Vec<String>,
    pub transforms: Vec<String>,
    pub background: Option<String>,
    pub definitions: Vec<String>,
}

/// Normalizer output
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub expression: MappedText,
    /// Color names keyed by the offset recorded in each `COLOR:<key>` marker
    pub colors: BTreeMap<usize, String>,
    pub metadata: Metadata,
}

/// Normalize `source`, registering `DEF:` templates in `registry`
pub fn normalize(source: &str, registry: &mut Registry) -> Result<Normalized> {
    let mut metadata = Metadata::default();
    let mut definitions = Vec::new();
    let mut expression = MappedText::new();

    for line in logical_lines(source) {
        let content = line.as_str().trim_start();
        let lead = line.len() - content.len();
        let rest = |mark: &str| line.slice(lead + mark.len()..line.len());

        if content.starts_with(DEF_MARK) {
            let def = rest(DEF_MARK);
            metadata.definitions.push(def.as_str().trim().to_string());
            definitions.push(def);
        } else if content.starts_with(DOT_MARK) {
            metadata.dot.push(rest(DOT_MARK).as_str().trim().to_string());
        } else if content.starts_with(TRANSFORM_MARK) {
            metadata.transforms.push(rest(TRANSFORM_MARK).as_str().trim().to_string());
        } else if content.starts_with(BACKGROUND_MARK) {
            if metadata.background.is_some() {
                return Err(CompileError::new(
                    ErrorKind::DuplicateDefinition,
                    "BACKGROUND may be given only once",
                )
                .at(line.source_span(0..line.len())));
            }
            metadata.background = Some(rest(BACKGROUND_MARK).as_str().trim().to_string());
        } else if !content.trim().is_empty() {
            expression.push_mapped(&line);
            expression.push('\n', line.origin(line.len()));
        }
    }

    check_brackets(&expression)?;
    let mut expression = replace_ellipses(&expression);

    let mut seen: Vec<String> = Vec::new();
    for def in &definitions {
        expression = apply_definition(def, expression, registry, &mut seen)?;
    }

    let mut colors = BTreeMap::new();
    let expression = extract_colors(&expression, &mut colors)?;
    let expression = rewrite_word_steps(&expression);
    let expression = strip_blanks(&expression);

    log::debug!(
        "normalized {} bytes into {} bytes, {} definitions, {} colors",
        source.len(),
        expression.len(),
        definitions.len(),
        colors.len()
    );

    Ok(Normalized {
        expression,
        colors,
        metadata,
    })
}

/// Physical lines with comments removed and `\` continuations joined
fn logical_lines(source: &str) -> Vec<MappedText> {
    let mut lines = Vec::new();
    let mut current = MappedText::new();
    let mut offset = 0;

    for raw in source.split('\n') {
        let start = offset;
        offset += raw.len() + 1;

        let content = strip_comment(raw).trim_end();
        let (body, continues) = match content.strip_suffix('\\') {
            Some(body) => (body, true),
            None => (content, false),
        };
        for (i, ch) in body.char_indices() {
            match ch {
                '\r' => {}
                '\t' => current.push(' ', start + i),
                _ => current.push(ch, start + i),
            }
        }
        if !continues {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn strip_comment(line: &str) -> &str {
    for (i, ch) in line.char_indices() {
        if ch != '#' {
            continue;
        }
        let before = line[..i].trim_end();
        if !(before.ends_with(COLOR_MARK) || before.ends_with(BACKGROUND_MARK)) {
            return &line[..i];
        }
    }
    line
}

/// Fail on the first bracket or `$` that has no partner
pub fn check_brackets(text: &MappedText) -> Result<()> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut dollar: Option<usize> = None;

    for (i, ch) in text.as_str().char_indices() {
        match ch {
            '(' | '[' | '{' => stack.push((ch, i)),
            ')' | ']' | '}' => {
                let open = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((o, _)) if o == open => {}
                    Some((o, at)) => {
                        return Err(CompileError::unbalanced(
                            format!("'{}' closed by '{}'", o, ch),
                            text.source_span(at..i + 1),
                        ))
                    }
                    None => {
                        return Err(CompileError::unbalanced(
                            format!("unmatched '{}'", ch),
                            text.source_span(i..i + 1),
                        ))
                    }
                }
            }
            '$' => dollar = if dollar.is_some() { None } else { Some(i) },
            _ => {}
        }
    }

    if let Some((open, at)) = stack.pop() {
        return Err(CompileError::unbalanced(
            format!("'{}' is never closed", open),
            text.source_span(at..at + 1),
        ));
    }
    if let Some(at) = dollar {
        return Err(CompileError::unbalanced(
            "variable block '$' is never closed",
            text.source_span(at..at + 1),
        ));
    }
    Ok(())
}

fn replace_ellipses(text: &MappedText) -> MappedText {
    let s = text.as_str();
    let mut out = MappedText::new();
    let mut pos = 0;
    while let Some(found) = s[pos..].find("...") {
        let at = pos + found;
        out.push_slice(text, pos..at);
        out.push(',', text.origin(at));
        pos = at + 3;
    }
    out.push_slice(text, pos..s.len());
    out
}

fn apply_definition(
    def: &MappedText,
    expression: MappedText,
    registry: &mut Registry,
    seen: &mut Vec<String>,
) -> Result<MappedText> {
    let span = def.source_span(0..def.len());
    let (name, body) = def
        .as_str()
        .split_once('=')
        .ok_or_else(|| CompileError::syntax("definition must look like DEF: name=...", span))?;
    let (name, body) = (name.trim(), body.trim());

    if !is_identifier(name) {
        return Err(CompileError::syntax(format!("invalid stitch name '{}'", name), span));
    }
    if seen.iter().any(|s| s == name) {
        return Err(CompileError::new(
            ErrorKind::DuplicateDefinition,
            format!("'{}' is defined twice", name),
        )
        .at(span));
    }
    seen.push(name.to_string());

    if is_raw_spec(body) {
        registry
            .define_spec(name, body)
            .map_err(|e| CompileError::from(e).at(span))?;
        return Ok(expression);
    }

    if let Some(args) = body.strip_prefix(COPY_MARK) {
        let args = args
            .strip_suffix(')')
            .ok_or_else(|| CompileError::syntax("Copy( is never closed", span))?;
        let (base, height, width) = parse_copy_args(args)
            .ok_or_else(|| CompileError::syntax("expected Copy(base, height[, width]) with numeric factors", span))?;
        registry
            .rescale(base, name, height, width)
            .map_err(|e| CompileError::from(e).at(span))?;
        return Ok(expression);
    }

    if registry.contains(name) {
        return Err(CompileError::new(
            ErrorKind::NameCollision,
            format!("macro '{}' has the name of a stitch", name),
        )
        .at(span));
    }
    let body_start = def.len() - def.as_str().trim_start_matches(|c| c != '=').len() + 1;
    check_brackets(&def.slice(body_start..def.len()))?;

    Ok(substitute_macro(&expression, name, body))
}

/// `base,height[,width]`; absent factors are -1
fn parse_copy_args(args: &str) -> Option<(&str, f64, f64)> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if parts.is_empty() || parts.len() > 3 || parts[0].is_empty() {
        return None;
    }
    let factor = |i: usize| match parts.get(i) {
        Some(p) => p.parse::<f64>().ok(),
        None => Some(-1.0),
    };
    Some((parts[0], factor(1)?, factor(2)?))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Replace every occurrence of macro `name` in `text` by its body
///
/// `3name` becomes `(3(body))`, plain `name` becomes `(body)`, and when the
/// body is a single identifier `name2tog`/`name2inc` are renamed too. Label
/// names (`.name`, `@name`) are left alone.
pub fn substitute_macro(text: &MappedText, name: &str, body: &str) -> MappedText {
    let escaped = regex::escape(name);
    let plain = Regex::new(&format!(r"\b(\d*){}\b", escaped));
    let variant = Regex::new(&format!(r"\b(\d*){}(\d+(?:tog|inc))\b", escaped));
    let (Ok(plain), Ok(variant)) = (plain, variant) else {
        return text.clone();
    };

    let text = rewrite(text, &plain, |caps| {
        let count = caps.get(1).map_or("", |m| m.as_str());
        Some(if count.is_empty() {
            format!("({})", body)
        } else {
            format!("({}({}))", count, body)
        })
    });

    if !is_identifier(body) {
        return text;
    }
    rewrite(&text, &variant, |caps| {
        let count = caps.get(1).map_or("", |m| m.as_str());
        Some(format!("{}{}{}", count, body, &caps[2]))
    })
}

/// Regex replace over mapped text; replacements map to the match start.
/// Matches directly after `.`, `@` or `:` are kept.
fn rewrite(text: &MappedText, re: &Regex, replace: impl Fn(&Captures) -> Option<String>) -> MappedText {
    let s = text.as_str();
    let mut out = MappedText::new();
    let mut pos = 0;
    for caps in re.captures_iter(s) {
        let Some(m) = caps.get(0) else { continue };
        let guarded = s[..m.start()].ends_with(['.', '@', ':']);
        let replacement = if guarded { None } else { replace(&caps) };
        if let Some(replacement) = replacement {
            out.push_slice(text, pos..m.start());
            out.push_str(&replacement, text.origin(m.start()));
            pos = m.end();
        }
    }
    out.push_slice(text, pos..s.len());
    out
}

/// Move `COLOR:` values into `colors`, leaving `COLOR:<key>` markers
fn extract_colors(text: &MappedText, colors: &mut BTreeMap<usize, String>) -> Result<MappedText> {
    let s = text.as_str();
    let mut out = MappedText::new();
    let mut pos = 0;

    while let Some(found) = s[pos..].find(COLOR_MARK) {
        let at = pos + found;
        let value_start = at + COLOR_MARK.len();
        let value_end = color_value_end(s, value_start);
        let value = s[value_start..value_end].trim();
        if value.is_empty() {
            return Err(CompileError::syntax(
                "COLOR: needs a color",
                text.source_span(at..value_start),
            ));
        }
        colors.insert(at, value.to_string());

        out.push_slice(text, pos..value_start);
        out.push_str(&at.to_string(), text.origin(value_start));
        pos = value_end;
    }
    out.push_slice(text, pos..s.len());
    Ok(out)
}

fn color_value_end(s: &str, start: usize) -> usize {
    let mut depth = 0usize;
    for (i, ch) in s[start..].char_indices() {
        match ch {
            '\n' => return start + i,
            '(' => depth += 1,
            ')' if depth == 0 => return start + i,
            ')' => depth -= 1,
            ',' | ']' | '}' if depth == 0 => return start + i,
            _ => {}
        }
    }
    s.len()
}

/// `next i` -> `++i`, `prev i` -> `--i`
fn rewrite_word_steps(text: &MappedText) -> MappedText {
    match Regex::new(r"\b(next|prev)\s+([A-Za-z_]\w*)") {
        Ok(re) => rewrite(text, &re, |caps| {
            let op = if &caps[1] == "next" { "++" } else { "--" };
            Some(format!("{}{}", op, &caps[2]))
        }),
        Err(_) => text.clone(),
    }
}

/// Remove spaces and blank lines
fn strip_blanks(text: &MappedText) -> MappedText {
    let mut out = MappedText::new();
    let mut line_empty = true;
    for (i, ch) in text.as_str().char_indices() {
        match ch {
            ' ' | '\t' | '\r' => {}
            '\n' => {
                if !line_empty {
                    out.push('\n', text.origin(i));
                    line_empty = true;
                }
            }
            _ => {
                out.push(ch, text.origin(i));
                line_empty = false;
            }
        }
    }
    if out.as_str().ends_with('\n') {
        let trimmed = out.len() - 1;
        out = out.slice(0..trimmed);
    }
    out
}

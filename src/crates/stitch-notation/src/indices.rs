//! Index evaluator
//!
//! `$...$` blocks hold comma or semicolon separated statements:
//!
//! ```text
//! $k=0,t=2$       assign
//! $k++$           step (also ++k, k--, --k)
//! ```
//!
//! Outside blocks, a variable name is replaced by its current value and the
//! step forms substitute and update it. Evaluation is strictly left to right,
//! so `[sc.A[k++]]*3` labels its copies `A[0]`, `A[1]`, `A[2]`.
//!
//! Afterwards, every arithmetic component of an innermost `[...]` that comes
//! out as a whole number is replaced by that number: `C[m-1,2*k]` becomes
//! `C[0,4]`.

use std::collections::HashMap;
use std::ops::Range;

use stitch_core::Registry;

use crate::arith;
use crate::error::{CompileError, ErrorKind, Result};
use crate::span::{MappedText, Span};

/// Consume variable blocks and fold index arithmetic
pub fn evaluate_indices(text: &MappedText, registry: &Registry) -> Result<MappedText> {
    let mut vars = Variables::default();
    let substituted = vars.substitute_all(text, registry)?;
    let folded = fold_arithmetic(&substituted);
    log::debug!("evaluated indices with {} variable(s)", vars.values.len());
    Ok(folded)
}

#[derive(Debug, Default)]
struct Variables {
    values: HashMap<String, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Variables {
    fn step(&mut self, name: &str, step: Step, span: Span) -> Result<i64> {
        let value = self
            .values
            .get_mut(name)
            .ok_or_else(|| CompileError::syntax(format!("variable '{}' is used before it is set", name), span))?;
        let before = *value;
        let after = match step {
            Step::PreIncrement | Step::PostIncrement => before.checked_add(1),
            Step::PreDecrement | Step::PostDecrement => before.checked_sub(1),
        }
        .ok_or_else(|| CompileError::syntax(format!("variable '{}' overflows at {}", name, before), span))?;
        *value = after;
        Ok(match step {
            Step::PreIncrement | Step::PreDecrement => after,
            Step::PostIncrement | Step::PostDecrement => before,
        })
    }

    fn substitute_all(&mut self, text: &MappedText, registry: &Registry) -> Result<MappedText> {
        let s = text.as_str();
        let bytes = s.as_bytes();
        let mut out = MappedText::new();
        let mut i = 0;

        while i < s.len() {
            let b = bytes[i];

            if b == b'$' {
                let close = s[i + 1..]
                    .find('$')
                    .map(|p| i + 1 + p)
                    .ok_or_else(|| CompileError::unbalanced("variable block '$' is never closed", text.source_span(i..s.len())))?;
                self.run_block(text, i + 1..close, registry)?;
                i = close + 1;
                let dangling = out.as_str().is_empty() || out.as_str().ends_with([',', '\n', '[', '(', '{']);
                if dangling && bytes.get(i) == Some(&b',') {
                    i += 1;
                }
                continue;
            }

            if (b == b'+' || b == b'-') && bytes.get(i + 1) == Some(&b) {
                let word = word_at(s, i + 2);
                if !word.is_empty() && self.values.contains_key(&s[word.clone()]) {
                    let step = if b == b'+' { Step::PreIncrement } else { Step::PreDecrement };
                    let value = self.step(&s[word.clone()], step, text.source_span(i..word.end))?;
                    out.push_str(&value.to_string(), text.origin(word.start));
                    i = word.end;
                    continue;
                }
            }

            if is_word(b) && (i == 0 || !is_word(bytes[i - 1])) {
                let word = word_at(s, i);
                let name = &s[word.clone()];
                let guarded = i > 0 && matches!(bytes[i - 1], b'.' | b'@');
                if !guarded && self.values.contains_key(name) {
                    let after = &s[word.end..];
                    let (step, consumed) = if after.starts_with("++") {
                        (Some(Step::PostIncrement), 2)
                    } else if after.starts_with("--") {
                        (Some(Step::PostDecrement), 2)
                    } else {
                        (None, 0)
                    };
                    let value = match step {
                        Some(step) => self.step(name, step, text.source_span(word.start..word.end + consumed))?,
                        None => self.values[name],
                    };
                    out.push_str(&value.to_string(), text.origin(word.start));
                    i = word.end + consumed;
                } else {
                    out.push_slice(text, word.clone());
                    i = word.end;
                }
                continue;
            }

            let width = s[i..].chars().next().map_or(1, char::len_utf8);
            out.push_slice(text, i..i + width);
            i += width;
        }

        Ok(out)
    }

    fn run_block(&mut self, text: &MappedText, body: Range<usize>, registry: &Registry) -> Result<()> {
        let s = text.as_str();
        let mut start = body.start;
        for (offset, ch) in s[body.clone()].char_indices().chain(std::iter::once((body.len(), ','))) {
            if ch != ',' && ch != ';' {
                continue;
            }
            let end = body.start + offset;
            let statement = s[start..end].trim();
            if !statement.is_empty() {
                self.run_statement(statement, text.source_span(start..end), registry)?;
            }
            start = end + 1;
        }
        Ok(())
    }

    fn run_statement(&mut self, statement: &str, span: Span, registry: &Registry) -> Result<()> {
        if let Some((name, expr)) = statement.split_once('=') {
            let name = name.trim();
            if !is_identifier(name) {
                return Err(CompileError::syntax(format!("'{}' is not a variable name", name), span));
            }
            if registry.contains(name) {
                return Err(CompileError::new(
                    ErrorKind::NameCollision,
                    format!("variable '{}' has the same name as a stitch", name),
                )
                .at(span));
            }
            let expanded = self.substitute_all(&MappedText::from_source(expr), registry)?;
            let value = arith::eval_integer(expanded.as_str())
                .map_err(|e| CompileError::syntax(format!("bad value for '{}': {}", name, e), span))?
                .ok_or_else(|| CompileError::syntax(format!("'{}' must be a whole number", name), span))?;
            self.values.insert(name.to_string(), value);
            return Ok(());
        }

        let (name, step) = if let Some(name) = statement.strip_prefix("++") {
            (name, Step::PreIncrement)
        } else if let Some(name) = statement.strip_prefix("--") {
            (name, Step::PreDecrement)
        } else if let Some(name) = statement.strip_suffix("++") {
            (name, Step::PostIncrement)
        } else if let Some(name) = statement.strip_suffix("--") {
            (name, Step::PostDecrement)
        } else {
            return Err(CompileError::syntax(format!("unknown statement '{}'", statement), span));
        };
        self.step(name.trim(), step, span).map(|_| ())
    }
}

fn word_at(s: &str, start: usize) -> Range<usize> {
    let len = s.as_bytes().get(start..).map_or(0, |rest| rest.iter().take_while(|b| is_word(**b)).count());
    start..start + len
}

/// Replace arithmetic components of innermost brackets with their value
fn fold_arithmetic(text: &MappedText) -> MappedText {
    let s = text.as_str();
    let mut replacements: Vec<(Range<usize>, i64)> = Vec::new();
    let mut open = None;

    for (i, ch) in s.char_indices() {
        match ch {
            '[' => open = Some(i),
            ']' => {
                if let Some(start) = open.take() {
                    replacements.extend(arithmetic_components(s, start + 1..i));
                }
            }
            _ => {}
        }
    }

    let mut out = MappedText::new();
    let mut cursor = 0;
    for (range, value) in replacements {
        out.push_slice(text, cursor..range.start);
        out.push_str(&value.to_string(), text.origin(range.start));
        cursor = range.end;
    }
    out.push_slice(text, cursor..s.len());
    out
}

fn arithmetic_components(s: &str, inner: Range<usize>) -> Vec<(Range<usize>, i64)> {
    let mut found = Vec::new();
    let mut start = inner.start;
    for piece in s[inner.clone()].split(',') {
        let end = start + piece.len();
        let mut component = start..start + piece.find(';').unwrap_or(piece.len());
        if let Some(colon) = s[component.clone()].rfind(':') {
            component.start += colon + 1;
        }
        let expr = &s[component.clone()];
        if arith::has_operator(expr) && !expr.contains(['%', '@']) {
            if let Ok(Some(value)) = arith::eval_integer(expr) {
                found.push((component, value));
            }
        }
        start = end + 1;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(input: &str) -> Result<String> {
        let registry = Registry::builtin().unwrap();
        evaluate_indices(&MappedText::from_source(input), &registry).map(|t| t.as_str().to_string())
    }

    #[test]
    fn test_post_increment_in_order() {
        assert_eq!(
            evaluate("$k=0$,sc.A[k++],sc.A[k++],sc.A[k++]").unwrap(),
            "sc.A[0],sc.A[1],sc.A[2]"
        );
    }

    #[test]
    fn test_pre_forms_and_plain_uses() {
        assert_eq!(evaluate("$t=2$,dc@T[--t],dc@T[t],dc@T[++t]").unwrap(), "dc@T[1],dc@T[1],dc@T[2]");
    }

    #[test]
    fn test_statement_blocks_mutate() {
        assert_eq!(evaluate("$c=0$,sc@C[c++],$c++$,sc@C[c]").unwrap(), "sc@C[0],sc@C[2]");
        assert_eq!(evaluate("[$m=1;k=m+1$,sc.C[m,k]]").unwrap(), "[sc.C[1,2]]");
    }

    #[test]
    fn test_labels_named_like_variables_are_kept() {
        assert_eq!(evaluate("$k=3$,sc.k,dc@k,ch.K[k]").unwrap(), "sc.k,dc@k,ch.K[3]");
    }

    #[test]
    fn test_arithmetic_folding() {
        assert_eq!(evaluate("$m=1,k=3$,sc@C[m-1,k*2]").unwrap(), "sc@C[0,6]");
        assert_eq!(evaluate("sc@[dc:@+1],sc@[%,-1],sc@[-1,2+2]").unwrap(), "sc@[dc:@+1],sc@[%,-1],sc@[-1,4]");
        assert_eq!(evaluate("sc@A[1+1;2]").unwrap(), "sc@A[2;2]");
        assert_eq!(evaluate("sc@A[5/2]").unwrap(), "sc@A[5/2]");
    }

    #[test]
    fn test_variable_named_like_stitch() {
        let err = evaluate("$ch=0$,sc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameCollision);
    }

    #[test]
    fn test_bad_statements() {
        assert_eq!(evaluate("$k++$,sc").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(evaluate("$k=x$,sc").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(evaluate("$k=1/2$,sc").unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_step_overflow_is_an_error() {
        let source = "$i=9223372036854775807$,3ch\nsc@[0,i++],sc@[0,i]";
        let err = evaluate(source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert_eq!(err.span().unwrap().snippet(source), "i++");

        let err = evaluate("$i=-9223372036854775808$,$i--$,sc").unwrap_err();
        assert!(err.message.contains("overflows"), "{}", err.message);
    }

    #[test]
    fn test_substitution_provenance() {
        let source = "$i=10$,sc@A[i]";
        let out = evaluate_indices(&MappedText::from_source(source), &Registry::builtin().unwrap()).unwrap();
        assert_eq!(out.as_str(), "sc@A[10]");
        assert_eq!(out.source_span(5..7).snippet(source), "i");
    }
}

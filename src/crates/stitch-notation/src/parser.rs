use std::collections::BTreeMap;

use crate::arith;
use crate::ast::*;
use crate::error::{CompileError, ErrorKind, Result};
use crate::lexer::{Lexer, Token};
use crate::span::{MappedText, Span};

/// Parser for expanded, index-evaluated pattern text
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    text: &'source MappedText,
    /// End of the last consumed token
    last_end: usize,
}

impl<'source> Parser<'source> {
    pub fn new(text: &'source MappedText) -> Self {
        Parser {
            lexer: Lexer::new(text.as_str()),
            text,
            last_end: 0,
        }
    }

    /// Parse the whole expression into lines of nodes
    pub fn parse_lines(&mut self) -> Result<Vec<RowNodes>> {
        let lines = self.parse_body(None)?;
        match self.peek() {
            Some((token, span)) => Err(CompileError::unbalanced(
                format!("unexpected '{}'", token),
                self.source_span(span),
            )),
            None => Ok(lines),
        }
    }

    /// Items up to `close` (not consumed) or the end of input
    fn parse_body(&mut self, close: Option<&Token>) -> Result<Vec<RowNodes>> {
        let mut lines = Vec::new();
        let mut line = Vec::new();

        loop {
            match self.peek() {
                None => match close {
                    Some(close) => {
                        let at = self.text.source_span(self.last_end..self.last_end);
                        return Err(CompileError::unbalanced(format!("missing '{}'", close), at));
                    }
                    None => break,
                },
                Some((token, _)) if Some(&token) == close => break,
                Some((token, span)) if token.is_close() => {
                    return Err(CompileError::unbalanced(
                        format!("unexpected '{}'", token),
                        self.source_span(span),
                    ));
                }
                Some((Token::Comma, _)) => {
                    self.advance();
                }
                Some((Token::Newline, _)) => {
                    self.advance();
                    lines.push(std::mem::take(&mut line));
                }
                Some(_) => {
                    line.push(self.parse_item()?);
                    match self.peek() {
                        None => {}
                        Some((token, _)) if token.is_separator() || token.is_close() => {}
                        Some((token, span)) => {
                            return Err(CompileError::syntax(
                                format!("expected ',' before '{}'", token),
                                self.source_span(span),
                            ));
                        }
                    }
                }
            }
        }

        lines.push(line);
        Ok(lines)
    }

    fn parse_item(&mut self) -> Result<Node> {
        let (token, span) = self.expect_any()?;
        match token {
            Token::Ident => {
                let name = self.lexer.slice(span).to_string();
                let (labels, attach) = self.parse_suffixes()?;
                Ok(Node::Stitch(StitchNode {
                    name,
                    labels,
                    attach,
                    span: self.source_span(span),
                }))
            }
            Token::Turn => {
                if let Some((Token::Dot | Token::At, next)) = self.peek() {
                    return Err(CompileError::syntax(
                        "turn takes no label or attachment",
                        self.source_span(span.merge(next)),
                    ));
                }
                Ok(Node::Turn(self.source_span(span)))
            }
            Token::ColorMark(key) => Ok(Node::Color(key, self.source_span(span))),
            open if open.is_open() => {
                let close = closer(&open);
                let children = self.parse_body(Some(&close))?;
                let (_, end) = self.expect_any()?;
                let (labels, attach) = self.parse_suffixes()?;
                Ok(Node::Group(GroupNode {
                    children,
                    labels,
                    attach,
                    span: self.source_span(span.merge(end)),
                }))
            }
            Token::At => {
                let (spec, raw) = self.parse_attachment(span)?;
                if let Some((Token::Dot, dot)) = self.peek() {
                    return Err(CompileError::syntax("a seek cannot carry a label", self.source_span(dot)));
                }
                Ok(Node::Seek(spec, raw, self.source_span(span.merge(Span::new(span.start, self.last_end)))))
            }
            Token::Dot => Err(CompileError::syntax("label without a stitch", self.source_span(span))),
            Token::Number(_) => Err(CompileError::multiplier(
                "a number must be followed by a stitch",
                self.source_span(span),
            )),
            other => Err(CompileError::syntax(format!("unexpected '{}'", other), self.source_span(span))),
        }
    }

    #[allow(clippy::type_complexity)]
    fn parse_suffixes(&mut self) -> Result<(Vec<LabelDef>, Option<(AttachSpec, String)>)> {
        let mut labels = Vec::new();
        let mut attach = None;
        loop {
            match self.peek() {
                Some((Token::Dot, dot)) => {
                    self.advance();
                    labels.push(self.parse_label_def(dot)?);
                }
                Some((Token::At, at)) => {
                    self.advance();
                    if attach.is_some() {
                        return Err(CompileError::syntax("only one attachment per item", self.source_span(at)));
                    }
                    attach = Some(self.parse_attachment(at)?);
                }
                _ => break,
            }
        }
        Ok((labels, attach))
    }

    fn parse_label_def(&mut self, dot: Span) -> Result<LabelDef> {
        let name = self.expect_name("a label name after '.'")?;
        let mut key = self.lexer.slice(name).to_string();
        if let Some((Token::LBracket, _)) = self.peek() {
            let (selector, _) = self.bracket_text()?;
            if !selector.is_empty() {
                key = format!("{}[{}]", key, selector);
            }
        }
        let (modifiers, reversed) = self.parse_modifiers()?;
        let span = self.source_span(Span::new(dot.start, self.last_end));
        if reversed {
            return Err(CompileError::syntax(
                "'~' goes on references (@A~), not on label definitions",
                span,
            ));
        }
        Ok(LabelDef { key, modifiers, span })
    }

    fn parse_attachment(&mut self, at: Span) -> Result<(AttachSpec, String)> {
        let target = match self.peek() {
            Some((Token::LBracket, _)) => {
                let (inner, close) = self.bracket_text()?;
                parse_address(&inner, self.source_span(at.merge(close)))?
            }
            Some((Token::Ident, _)) => Attachment::Label(self.parse_label_ref()?),
            Some((Token::Number(_), span)) => {
                return Err(CompileError::syntax(
                    "numbered attachment cursors are not supported",
                    self.source_span(span),
                ));
            }
            _ => {
                return Err(CompileError::syntax("expected an address after '@'", self.source_span(at)));
            }
        };

        let mut post = None;
        if !matches!(target, Attachment::Label(_)) {
            let (modifiers, reversed) = self.parse_modifiers()?;
            if reversed || modifiers.extend.is_some() || modifiers.skip.is_some() {
                return Err(CompileError::syntax(
                    "only '^' may follow a bracketed address",
                    self.source_span(Span::new(at.start, self.last_end)),
                ));
            }
            post = modifiers.post;
        }

        let raw = self.lexer.source()[at.end..self.last_end].to_string();
        Ok((AttachSpec { target, post }, raw))
    }

    fn parse_label_ref(&mut self) -> Result<LabelRef> {
        let name = self.expect_name("a label name after '@'")?;
        let mut key = self.lexer.slice(name).to_string();
        let mut group = 0;
        let mut index = None;

        if let Some((Token::LBracket, _)) = self.peek() {
            let (inner, close) = self.bracket_text()?;
            let (selector, pass) = match inner.split_once(';') {
                Some((selector, pass)) => (selector.to_string(), Some(pass.trim().to_string())),
                None => (inner, None),
            };
            if let Some(pass) = pass {
                group = parse_int(&pass).ok_or_else(|| {
                    CompileError::syntax(format!("group '{}' is not a whole number", pass), self.source_span(close))
                })?;
            }
            if !selector.is_empty() {
                key = format!("{}[{}]", key, selector);
            }
            if let Some((Token::LBracket, _)) = self.peek() {
                let (inner, close) = self.bracket_text()?;
                index = Some(parse_int(&inner).ok_or_else(|| {
                    CompileError::syntax(format!("index '{}' is not a whole number", inner), self.source_span(close))
                })?);
            }
        }

        if let Some((Token::Semi, semi)) = self.peek() {
            self.advance();
            group = match self.next() {
                Some((Token::Number(n), _)) if n.fract() == 0.0 => n as i64,
                _ => return Err(CompileError::syntax("';' must be followed by a group number", self.source_span(semi))),
            };
        }

        let (modifiers, reversed) = self.parse_modifiers()?;
        Ok(LabelRef {
            key,
            group,
            reversed,
            index,
            modifiers,
        })
    }

    /// `+`, `+0`, `+1`, `!`, `!0`, `!1`, `^`, `^N` and `~`, in any order
    fn parse_modifiers(&mut self) -> Result<(LabelModifiers, bool)> {
        let mut modifiers = LabelModifiers::default();
        let mut reversed = false;
        loop {
            let Some((token, span)) = self.peek() else { break };
            let at = self.source_span(span);
            let twice = |token: &Token| CompileError::syntax(format!("'{}' given twice", token), at);
            match token {
                Token::Tilde => {
                    self.advance();
                    if reversed {
                        return Err(twice(&token));
                    }
                    reversed = true;
                }
                Token::Plus => {
                    self.advance();
                    if modifiers.extend.is_some() {
                        return Err(twice(&token));
                    }
                    modifiers.extend = Some(match self.boundary_digit(span)? {
                        None => Extend::Both,
                        Some(0) => Extend::Left,
                        Some(_) => Extend::Right,
                    });
                }
                Token::Bang => {
                    self.advance();
                    if modifiers.skip.is_some() {
                        return Err(twice(&token));
                    }
                    modifiers.skip = Some(match self.boundary_digit(span)? {
                        None => Skip::Both,
                        Some(0) => Skip::First,
                        Some(_) => Skip::Last,
                    });
                }
                Token::Caret => {
                    self.advance();
                    if modifiers.post.is_some() {
                        return Err(twice(&token));
                    }
                    let negative = matches!(self.peek(), Some((Token::Minus, _)));
                    if negative {
                        self.advance();
                    }
                    let which = match self.peek() {
                        Some((Token::Number(n), at)) => {
                            self.advance();
                            if n.fract() != 0.0 {
                                return Err(CompileError::syntax("'^' takes a whole number", self.source_span(at)));
                            }
                            Some(if negative { -(n as i64) } else { n as i64 })
                        }
                        _ if negative => {
                            return Err(CompileError::syntax("'^-' needs a number", self.source_span(span)));
                        }
                        _ => None,
                    };
                    modifiers.post = Some(which);
                }
                _ => break,
            }
        }
        Ok((modifiers, reversed))
    }

    /// Optional `0`/`1` after `+` or `!`
    fn boundary_digit(&mut self, op: Span) -> Result<Option<u8>> {
        match self.peek() {
            Some((Token::Number(n), span)) => {
                self.advance();
                if n == 0.0 || n == 1.0 {
                    Ok(Some(n as u8))
                } else {
                    Err(CompileError::syntax(
                        "only 0 or 1 may follow '+' or '!'",
                        self.source_span(op.merge(span)),
                    ))
                }
            }
            _ => Ok(None),
        }
    }

    /// Consume `[ ... ]`, returning the text between the brackets and the
    /// span of the closing bracket
    fn bracket_text(&mut self) -> Result<(String, Span)> {
        let (_, open) = self.expect_any()?;
        let mut depth = 1;
        loop {
            let (token, span) = match self.next() {
                Some(next) => next,
                None => return Err(CompileError::unbalanced("missing ']'", self.source_span(open))),
            };
            match token {
                Token::LBracket => depth += 1,
                Token::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        let inner = self.lexer.source()[open.end..span.start].to_string();
                        return Ok((inner, span));
                    }
                }
                Token::Newline => {
                    return Err(CompileError::unbalanced("address runs past the end of the line", self.source_span(open)));
                }
                _ => {}
            }
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<Span> {
        match self.next() {
            Some((Token::Ident, span)) => Ok(span),
            Some((token, span)) => Err(CompileError::syntax(
                format!("expected {}, found '{}'", what, token),
                self.source_span(span),
            )),
            None => Err(CompileError::syntax(
                format!("expected {}", what),
                self.text.source_span(self.last_end..self.last_end),
            )),
        }
    }

    fn expect_any(&mut self) -> Result<(Token, Span)> {
        self.next().ok_or_else(|| {
            CompileError::syntax("unexpected end of pattern", self.text.source_span(self.last_end..self.last_end))
        })
    }

    // Helper methods

    fn peek(&mut self) -> Option<(Token, Span)> {
        self.lexer.peek_token()
    }

    fn next(&mut self) -> Option<(Token, Span)> {
        let next = self.lexer.next_token();
        if let Some((_, span)) = &next {
            self.last_end = span.end;
        }
        next
    }

    fn advance(&mut self) {
        self.next();
    }

    fn source_span(&self, span: Span) -> Span {
        self.text.source_span(span.to_range())
    }
}

fn closer(open: &Token) -> Token {
    match open {
        Token::LParen => Token::RParen,
        Token::LBrace => Token::RBrace,
        _ => Token::RBracket,
    }
}

fn parse_int(text: &str) -> Option<i64> {
    arith::eval_integer(text.trim()).ok().flatten()
}

/// Interpret the inside of `@[...]`
fn parse_address(inner: &str, span: Span) -> Result<Attachment> {
    let (stitch_type, rest) = match inner.split_once(':') {
        Some((ty, rest)) => {
            let ty = ty.trim();
            if ty.is_empty() || !ty.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(CompileError::syntax(format!("'{}' is not a stitch type", ty), span));
            }
            (Some(ty.to_string()), rest.trim())
        }
        None => (None, inner.trim()),
    };

    if let Some(after) = rest.strip_prefix('@') {
        if after.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(CompileError::syntax("numbered attachment cursors are not supported", span));
        }
        let offset = if after.is_empty() {
            0
        } else {
            parse_int(&format!("0{}", after))
                .ok_or_else(|| CompileError::syntax(format!("bad cursor offset '{}'", after), span))?
        };
        return Ok(Attachment::Relative { stitch_type, offset });
    }

    match rest.split(',').collect::<Vec<_>>().as_slice() {
        [row, pos] if !row.trim().is_empty() && !pos.trim().is_empty() => Ok(Attachment::Absolute {
            row: row.trim().to_string(),
            pos: pos.trim().to_string(),
            stitch_type,
        }),
        _ => Err(CompileError::syntax(
            format!("expected [row,pos] or [type:@+k], found [{}]", inner),
            span,
        )),
    }
}

/// Parse `text` and flatten it into rows of tokens
///
/// A newline starts a new row only when the current row has tokens, so
/// blank lines and lines holding only a color switch do not count. Every
/// token takes the color in force where it appears.
pub fn parse_rows(text: &MappedText, colors: &BTreeMap<usize, String>, default_color: &str) -> Result<Rows> {
    let lines = Parser::new(text).parse_lines()?;

    let mut flat = Flattener {
        colors,
        color: default_color.to_string(),
        rows: vec![Vec::new()],
    };
    flat.lines(&lines, &[], None)?;

    let mut rows = flat.rows;
    while rows.last().map_or(false, Vec::is_empty) {
        rows.pop();
    }

    for row in &rows {
        if let Some(turn) = row[..row.len().saturating_sub(1)]
            .iter()
            .find(|t| t.kind == TokenKind::Turn)
        {
            return Err(CompileError::new(ErrorKind::TurnNotAtRowEnd, "'turn' must be the last item of its row").at(turn.span));
        }
    }

    log::debug!("parsed {} row(s), {} token(s)", rows.len(), rows.iter().map(Vec::len).sum::<usize>());
    Ok(Rows { rows })
}

struct Flattener<'a> {
    colors: &'a BTreeMap<usize, String>,
    color: String,
    rows: Vec<Vec<RowToken>>,
}

impl Flattener<'_> {
    fn lines(&mut self, lines: &[RowNodes], labels: &[LabelDef], attach: Option<&(AttachSpec, String)>) -> Result<()> {
        for (k, line) in lines.iter().enumerate() {
            if k > 0 && self.rows.last().map_or(false, |row| !row.is_empty()) {
                self.rows.push(Vec::new());
            }
            for node in line {
                self.node(node, labels, attach)?;
            }
        }
        Ok(())
    }

    fn node(&mut self, node: &Node, labels: &[LabelDef], attach: Option<&(AttachSpec, String)>) -> Result<()> {
        match node {
            Node::Stitch(stitch) => {
                let mut all = labels.to_vec();
                all.extend(stitch.labels.iter().cloned());
                let (spec, raw) = stitch
                    .attach
                    .as_ref()
                    .or(attach)
                    .cloned()
                    .unwrap_or_else(|| (AttachSpec::advance(), String::new()));
                self.push(TokenKind::Stitch(stitch.name.clone()), all, spec, raw, stitch.span);
            }
            Node::Group(group) => {
                let mut all = labels.to_vec();
                all.extend(group.labels.iter().cloned());
                let inner = group.attach.as_ref().or(attach);
                self.lines(&group.children, &all, inner)?;
            }
            Node::Turn(span) => self.push(TokenKind::Turn, Vec::new(), AttachSpec::advance(), String::new(), *span),
            Node::Seek(spec, raw, span) => self.push(TokenKind::Seek, Vec::new(), spec.clone(), raw.clone(), *span),
            Node::Color(key, span) => {
                self.color = self
                    .colors
                    .get(key)
                    .cloned()
                    .ok_or_else(|| CompileError::internal(format!("color switch {} has no color", key)).at(*span))?;
            }
        }
        Ok(())
    }

    fn push(&mut self, kind: TokenKind, labels: Vec<LabelDef>, attach: AttachSpec, raw: String, span: Span) {
        let row = self.rows.len() - 1;
        let token = RowToken {
            kind,
            labels,
            attach,
            raw_attachment: raw,
            row,
            color: self.color.clone(),
            span,
        };
        if let Some(current) = self.rows.last_mut() {
            current.push(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DEFAULT_COLOR;

    fn rows(input: &str) -> Result<Rows> {
        parse_rows(&MappedText::from_source(input), &BTreeMap::new(), DEFAULT_COLOR)
    }

    fn names(rows: &Rows) -> Vec<Vec<String>> {
        rows.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|t| match &t.kind {
                        TokenKind::Stitch(name) => name.clone(),
                        TokenKind::Turn => "turn".to_string(),
                        TokenKind::Seek => format!("@{}", t.raw_attachment),
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_rows_and_turns() {
        let parsed = rows("ch,ch,turn\n\nsk,sc,turn\n").unwrap();
        assert_eq!(names(&parsed), vec![vec!["ch", "ch", "turn"], vec!["sk", "sc", "turn"]]);
        assert_eq!(parsed.rows[1][0].row, 1);
    }

    #[test]
    fn test_turn_not_last() {
        let err = rows("ch,turn,ch").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TurnNotAtRowEnd);
        assert_eq!(err.span(), Some(Span::new(3, 7)));
    }

    #[test]
    fn test_groups_pass_labels_and_attachment_down() {
        let parsed = rows("[sc,dc@B].A@C[2]").unwrap();
        let tokens: Vec<&RowToken> = parsed.tokens().collect();
        assert_eq!(tokens[0].labels[0].key, "A");
        assert_eq!(tokens[0].raw_attachment, "C[2]");
        assert_eq!(tokens[1].raw_attachment, "B");
        assert_eq!(tokens[1].labels.len(), 1);
    }

    #[test]
    fn test_group_spanning_rows() {
        let parsed = rows("[sc,turn\n],[sc,turn\n]").unwrap();
        assert_eq!(names(&parsed), vec![vec!["sc", "turn"], vec!["sc", "turn"]]);
    }

    #[test]
    fn test_label_definitions() {
        let parsed = rows("sc.C[0,3]+1!,dc.T^2,ch.R[]").unwrap();
        let tokens: Vec<&RowToken> = parsed.tokens().collect();
        let def = &tokens[0].labels[0];
        assert_eq!(def.key, "C[0,3]");
        assert_eq!(def.modifiers.extend, Some(Extend::Right));
        assert_eq!(def.modifiers.skip, Some(Skip::Both));
        assert_eq!(tokens[1].labels[0].modifiers.post, Some(Some(2)));
        assert_eq!(tokens[2].labels[0].key, "R");
        assert_eq!(rows("sc.A~").unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_label_references() {
        let parsed = rows("sc@A[2;1]~,sc@R[][3],sc@B+0").unwrap();
        let targets: Vec<Attachment> = parsed.tokens().map(|t| t.attach.target.clone()).collect();
        assert_eq!(
            targets[0],
            Attachment::Label(LabelRef {
                key: "A[2]".into(),
                group: 1,
                reversed: true,
                index: None,
                modifiers: LabelModifiers::default(),
            })
        );
        match &targets[1] {
            Attachment::Label(r) => {
                assert_eq!(r.key, "R");
                assert_eq!(r.index, Some(3));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &targets[2] {
            Attachment::Label(r) => assert_eq!(r.modifiers.extend, Some(Extend::Left)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_addresses() {
        let parsed = rows("sc@[-1,%],sc@[dc:@+1],sc@[@],sc@[sc:0,2]^,@[%,0]").unwrap();
        let tokens: Vec<&RowToken> = parsed.tokens().collect();
        assert_eq!(
            tokens[0].attach.target,
            Attachment::Absolute {
                row: "-1".into(),
                pos: "%".into(),
                stitch_type: None
            }
        );
        assert_eq!(
            tokens[1].attach.target,
            Attachment::Relative {
                stitch_type: Some("dc".into()),
                offset: 1
            }
        );
        assert_eq!(tokens[2].attach.target, Attachment::Relative { stitch_type: None, offset: 0 });
        assert_eq!(tokens[3].attach.post, Some(None));
        assert_eq!(tokens[4].kind, TokenKind::Seek);
        assert_eq!(tokens[4].raw_attachment, "[%,0]");
    }

    #[test]
    fn test_address_errors() {
        assert_eq!(rows("sc@[1]").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(rows("sc@1[0,0]").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(rows("sc@[@1+2]").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(rows("sc@[0,1]+").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(rows("sc.A+2").unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_colors_follow_switches() {
        let mut colors = BTreeMap::new();
        colors.insert(3, "red".to_string());
        let text = MappedText::from_source("ch,COLOR:3,sc\nsc");
        let parsed = parse_rows(&text, &colors, DEFAULT_COLOR).unwrap();
        let tokens: Vec<&RowToken> = parsed.tokens().collect();
        assert_eq!(tokens[0].color, DEFAULT_COLOR);
        assert_eq!(tokens[1].color, "red");
        assert_eq!(tokens[2].color, "red");
    }

    #[test]
    fn test_structure_errors() {
        assert_eq!(rows("sc dc").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(rows(".A").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(rows("[sc").unwrap_err().kind(), ErrorKind::UnbalancedBrackets);
        assert_eq!(rows("sc]").unwrap_err().kind(), ErrorKind::UnbalancedBrackets);
        assert_eq!(rows("turn.A").unwrap_err().kind(), ErrorKind::Syntax);
    }
}

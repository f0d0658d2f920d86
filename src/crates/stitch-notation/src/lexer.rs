use crate::span::Span;
use logos::Logos;
use std::fmt;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
pub enum Token {
    #[regex(r"[0-9]+(\.[0-9]+)?", parse_number)]
    Number(f64),

    // Stitch names, label names and macro leftovers
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    /// Color switch left by the normalizer, carrying its color-map key
    #[regex(r"COLOR:[0-9]+", parse_color_key)]
    ColorMark(usize),

    // Keywords
    #[token("turn")]
    Turn,

    // Delimiters
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // Separators
    #[token(",")]
    Comma,
    #[token("\n")]
    Newline,

    // Operators
    #[token(".")]
    Dot,
    #[token("@")]
    At,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("!")]
    Bang,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("%")]
    Percent,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    Error,
}

fn parse_number(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    lex.slice().parse::<f64>().ok()
}

fn parse_color_key(lex: &mut logos::Lexer<Token>) -> Option<usize> {
    lex.slice().strip_prefix("COLOR:")?.parse().ok()
}

impl Token {
    pub fn is_open(&self) -> bool {
        matches!(self, Token::LBracket | Token::LParen | Token::LBrace)
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Token::RBracket | Token::RParen | Token::RBrace)
    }

    /// Ends an item at the current nesting level
    pub fn is_separator(&self) -> bool {
        matches!(self, Token::Comma | Token::Newline)
    }
}

impl Token {
    /// How the token reads in error messages
    pub fn symbol(&self) -> &'static str {
        match self {
            Token::Number(_) => "number",
            Token::Ident => "name",
            Token::ColorMark(_) => "COLOR:",
            Token::Turn => "turn",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Newline => "newline",
            Token::Dot => ".",
            Token::At => "@",
            Token::Colon => ":",
            Token::Semi => ";",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Bang => "!",
            Token::Caret => "^",
            Token::Tilde => "~",
            Token::Percent => "%",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Error => "invalid character",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Token stream over an expanded expression, with one token of lookahead
///
/// Spans are byte offsets into the lexed expression, not the pattern source.
pub struct Lexer<'text> {
    tokens: logos::Lexer<'text, Token>,
    lookahead: Option<Option<(Token, Span)>>,
}

impl<'text> Lexer<'text> {
    pub fn new(text: &'text str) -> Self {
        Lexer {
            tokens: Token::lexer(text),
            lookahead: None,
        }
    }

    pub fn next_token(&mut self) -> Option<(Token, Span)> {
        match self.lookahead.take() {
            Some(buffered) => buffered,
            None => self.tokens.next().map(|token| (token.unwrap_or(Token::Error), self.tokens.span().into())),
        }
    }

    pub fn peek_token(&mut self) -> Option<(Token, Span)> {
        let buffered = match self.lookahead.take() {
            Some(buffered) => buffered,
            None => self.next_token(),
        };
        self.lookahead = Some(buffered.clone());
        buffered
    }

    /// The whole lexed expression
    pub fn source(&self) -> &'text str {
        self.tokens.source()
    }

    pub fn slice(&self, span: Span) -> &'text str {
        span.snippet(self.source())
    }
}

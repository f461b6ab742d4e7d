//! The Orus lexer: byte stream to token stream, with indentation tracking.
//!
//! `spec.md` §4.1: maintains an indent stack; emits `INDENT` when the
//! current line's leading whitespace strictly exceeds the top of stack,
//! `DEDENT`(s) when it is shorter, `NEWLINE` otherwise. Comment-only lines
//! never touch the indent stack. Nestable `/* ... */` block comments that
//! run off the end of input yield `EOF` with no error at this stage (the
//! parser reports it, per the spec). Token positions are 1-based, matching
//! `orus_core::span::Position`.

use crate::ast::NumericSuffix;
use orus_core::span::{Position, Span};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // literals
    IntLiteral { text: String, suffix: Option<NumericSuffix> },
    FloatLiteral { text: String, suffix: Option<NumericSuffix> },
    StringLiteral(String),
    True,
    False,
    NilLiteral,
    Identifier(String),

    // keywords
    Mut,
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Return,
    Fn,
    Struct,
    Import,
    From,
    Export,
    As,
    Try,
    Catch,
    Print,
    And,
    Or,
    Not,

    // punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Colon,
    Comma,
    Dot,
    DotDot,
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Arrow,

    // structural
    Indent,
    Dedent,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LexError {
    #[error("unterminated-string: string literal starting at {0} was never closed")]
    UnterminatedString(Span),
    #[error("invalid-token: unexpected character {ch:?} at {span}")]
    InvalidToken { ch: char, span: Span },
    #[error("inconsistent-indentation: mixed tabs and spaces at {0}")]
    MixedIndentation(Span),
}

struct Lexer<'a> {
    file: PathBuf,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    indent_stack: Vec<usize>,
    /// True at the start of a logical line, before any non-whitespace token
    /// has been seen; drives indentation measurement.
    at_line_start: bool,
    pending: Vec<Token>,
    errors: Vec<LexError>,
    source: &'a str,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("mut", TokenKind::Mut),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("in", TokenKind::In),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("return", TokenKind::Return),
    ("fn", TokenKind::Fn),
    ("struct", TokenKind::Struct),
    ("import", TokenKind::Import),
    ("from", TokenKind::From),
    ("export", TokenKind::Export),
    ("as", TokenKind::As),
    ("try", TokenKind::Try),
    ("catch", TokenKind::Catch),
    ("print", TokenKind::Print),
    ("and", TokenKind::And),
    ("or", TokenKind::Or),
    ("not", TokenKind::Not),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("nil", TokenKind::NilLiteral),
];

impl<'a> Lexer<'a> {
    fn new(file: PathBuf, source: &'a str) -> Self {
        Lexer {
            file,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            at_line_start: true,
            pending: Vec::new(),
            errors: Vec::new(),
            source,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn here(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn span_from(&self, start: Position) -> Span {
        Span::new(self.file.clone(), start, self.here())
    }

    fn push(&mut self, kind: TokenKind, start: Position) {
        self.pending.push(Token {
            kind,
            span: self.span_from(start),
        });
    }

    /// Measure indentation at the start of a logical line and emit the
    /// necessary INDENT/DEDENT tokens. Returns once positioned at the
    /// line's first non-whitespace character (or at EOF/newline).
    fn handle_line_start(&mut self) {
        let start = self.here();
        let mut width = 0usize;
        let mut saw_space = false;
        let mut saw_tab = false;
        loop {
            match self.peek() {
                Some(' ') => {
                    saw_space = true;
                    width += 1;
                    self.advance();
                }
                Some('\t') => {
                    saw_tab = true;
                    width += 8 - (width % 8);
                    self.advance();
                }
                _ => break,
            }
        }
        if saw_space && saw_tab {
            self.errors
                .push(LexError::MixedIndentation(self.span_from(start)));
        }

        // Blank or comment-only lines never touch the indent stack.
        match self.peek() {
            None | Some('\n') | Some('\r') => return,
            Some('#') => return,
            _ => {}
        }
        if self.peek() == Some('/') && self.peek_at(1) == Some('/') {
            return;
        }

        let top = *self.indent_stack.last().unwrap();
        if width > top {
            self.indent_stack.push(width);
            self.push(TokenKind::Indent, start);
        } else {
            while width < *self.indent_stack.last().unwrap() {
                self.indent_stack.pop();
                self.push(TokenKind::Dedent, start);
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Nestable block comments; an unterminated one silently consumes to
    /// EOF (`spec.md` §4.1).
    fn skip_block_comment(&mut self) {
        self.advance(); // '/'
        self.advance(); // '*'
        let mut depth = 1usize;
        while depth > 0 {
            match (self.peek(), self.peek_at(1)) {
                (Some('/'), Some('*')) => {
                    self.advance();
                    self.advance();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.advance();
                    self.advance();
                    depth -= 1;
                }
                (Some(_), _) => {
                    self.advance();
                }
                (None, _) => break,
            }
        }
    }

    fn lex_number(&mut self) {
        let start = self.here();
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(self.advance().unwrap());
        }
        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            text.push(self.advance().unwrap());
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                text.push(self.advance().unwrap());
            }
        }
        let suffix = self.try_lex_suffix();
        if is_float {
            self.push(TokenKind::FloatLiteral { text, suffix }, start);
        } else {
            self.push(TokenKind::IntLiteral { text, suffix }, start);
        }
    }

    fn try_lex_suffix(&mut self) -> Option<NumericSuffix> {
        let rest: String = self.chars[self.pos..].iter().take(3).collect();
        let (suffix, len) = if rest.starts_with("i32") {
            (Some(NumericSuffix::I32), 3)
        } else if rest.starts_with("i64") {
            (Some(NumericSuffix::I64), 3)
        } else if rest.starts_with("u32") {
            (Some(NumericSuffix::U32), 3)
        } else if rest.starts_with("u64") {
            (Some(NumericSuffix::U64), 3)
        } else if rest.starts_with("f64") {
            (Some(NumericSuffix::F64), 3)
        } else {
            (None, 0)
        };
        // Don't consume a suffix if it would actually be the start of a
        // longer identifier, e.g. `1i32x` is invalid but `1i32` is not.
        if suffix.is_some() {
            let next = self.peek_at(len);
            if matches!(next, Some(c) if c.is_alphanumeric() || c == '_') {
                return None;
            }
            for _ in 0..len {
                self.advance();
            }
        }
        suffix
    }

    fn lex_identifier(&mut self) {
        let start = self.here();
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            text.push(self.advance().unwrap());
        }
        if let Some((_, kind)) = KEYWORDS.iter().find(|(kw, _)| *kw == text) {
            self.push(kind.clone(), start);
        } else {
            self.push(TokenKind::Identifier(text), start);
        }
    }

    fn lex_string(&mut self) {
        let start = self.here();
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None => {
                    self.errors
                        .push(LexError::UnterminatedString(self.span_from(start)));
                    break;
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('"') => text.push('"'),
                        Some('\\') => text.push('\\'),
                        Some(other) => text.push(other),
                        None => {
                            self.errors
                                .push(LexError::UnterminatedString(self.span_from(start)));
                            break;
                        }
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        self.push(TokenKind::StringLiteral(text), start);
    }

    fn run(mut self) -> (Vec<Token>, Vec<LexError>) {
        loop {
            if self.at_line_start {
                self.handle_line_start();
                self.at_line_start = false;
            }
            let start = self.here();
            match self.peek() {
                None => {
                    self.push(TokenKind::Eof, start);
                    break;
                }
                Some('\n') => {
                    self.advance();
                    self.push(TokenKind::Newline, start);
                    self.at_line_start = true;
                }
                Some('\r') => {
                    self.advance();
                }
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('#') => self.skip_line_comment(),
                Some('/') if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                Some('/') if self.peek_at(1) == Some('*') => self.skip_block_comment(),
                Some(c) if c.is_ascii_digit() => self.lex_number(),
                Some(c) if c.is_alphabetic() || c == '_' => self.lex_identifier(),
                Some('"') => self.lex_string(),
                Some(c) => self.lex_punct(c, start),
            }
        }
        (self.pending, self.errors)
    }

    fn lex_punct(&mut self, c: char, start: Position) {
        self.advance();
        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => {
                if self.peek() == Some('>') {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::NotEq
                } else {
                    self.errors.push(LexError::InvalidToken {
                        ch: c,
                        span: self.span_from(start),
                    });
                    return;
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '.' => {
                if self.peek() == Some('.') {
                    self.advance();
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '?' => TokenKind::Question,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            _ => {
                self.errors.push(LexError::InvalidToken {
                    ch: c,
                    span: self.span_from(start),
                });
                return;
            }
        };
        self.push(kind, start);
    }
}

/// Tokenize a full source file. Lexical errors are collected rather than
/// aborting, so the parser can still synchronize and keep reporting
/// (`spec.md` §7).
pub fn tokenize(file: impl Into<PathBuf>, source: &str) -> (Vec<Token>, Vec<LexError>) {
    Lexer::new(file.into(), source).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, errors) = tokenize("t.orus", src);
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn emits_indent_and_dedent_around_a_suite() {
        let src = "if x:\n    y = 1\nz = 2\n";
        let kinds = kinds(src);
        assert!(kinds.contains(&TokenKind::Indent));
        assert!(kinds.contains(&TokenKind::Dedent));
    }

    #[test]
    fn blank_and_comment_lines_do_not_affect_indentation() {
        let src = "if x:\n    y = 1\n\n    # comment\n    y = 2\nz = 3\n";
        let kinds = kinds(src);
        let indents = kinds.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = kinds.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
    }

    #[test]
    fn numeric_suffix_forces_type() {
        let kinds = kinds("42i64");
        assert_eq!(
            kinds[0],
            TokenKind::IntLiteral {
                text: "42".into(),
                suffix: Some(NumericSuffix::I64)
            }
        );
    }

    #[test]
    fn unterminated_string_is_reported_not_panicked() {
        let (_, errors) = tokenize("t.orus", "\"abc");
        assert!(matches!(errors[0], LexError::UnterminatedString(_)));
    }

    #[test]
    fn unterminated_block_comment_yields_eof_with_no_error() {
        let (tokens, errors) = tokenize("t.orus", "/* never closed");
        assert!(errors.is_empty());
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn nested_block_comments_are_supported() {
        let (tokens, errors) = tokenize("t.orus", "/* outer /* inner */ still-comment */ 1");
        assert!(errors.is_empty());
        assert!(matches!(
            tokens[0].kind,
            TokenKind::IntLiteral { .. }
        ));
    }

    #[test]
    fn ternary_and_range_operators_lex() {
        let kinds = kinds("a ? b : c\n0..10\n");
        assert!(kinds.contains(&TokenKind::Question));
        assert!(kinds.contains(&TokenKind::DotDot));
    }
}

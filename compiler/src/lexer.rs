//! Lexer: tokenizes P0 source text with error recovery.
//!
//! The lexer runs on preprocessed text (comments blanked, whitespace
//! normalized) and hands out one token at a time so the parser can pull
//! tokens on demand with a single token of lookahead.
//!
//! - **Error recovery**: an illegal character is reported and skipped; a
//!   number literal outside the 31-bit signed range is reported and
//!   yields a zero-valued token so parsing continues.
//!
//! - **Positions**: every token records its byte span, its 1-based line
//!   and its 1-based column. Diagnostics are reported by line/column.

use crate::errors::CompileError;
use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'src> {
    source: &'src str,
    chars: Vec<char>,
    start: usize,    // Start of current token (byte offset)
    current: usize,  // Current position (char index)
    byte_pos: usize, // Current byte position
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
    finished: bool,
    errors: Vec<CompileError>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            start: 0,
            current: 0,
            byte_pos: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            finished: false,
            errors: Vec::new(),
        }
    }

    /// Scan the whole input. The last token is always `Eof`.
    pub fn scan_tokens(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// Hand over the errors found so far, leaving the lexer's list empty.
    pub fn take_errors(&mut self) -> Vec<CompileError> {
        std::mem::take(&mut self.errors)
    }

    /// Produce the next token. Once the input is exhausted every further
    /// call returns `Eof`.
    pub fn next_token(&mut self) -> Token {
        loop {
            self.skip_whitespace();
            self.start = self.byte_pos;
            self.start_line = self.line;
            self.start_column = self.column;

            if self.is_at_end() {
                self.finished = true;
                return self.make_token(TokenKind::Eof);
            }

            if let Some(token) = self.scan_token() {
                return token;
            }
        }
    }

    fn scan_token(&mut self) -> Option<Token> {
        let c = self.advance();
        let kind = match c {
            '*' => TokenKind::Times,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '=' => TokenKind::Eq,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Period,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBrak,
            ']' => TokenKind::RBrak,

            '<' => {
                if self.match_char('=') {
                    TokenKind::Le
                } else if self.match_char('>') {
                    TokenKind::Ne
                } else {
                    TokenKind::Lt
                }
            }

            '>' => {
                if self.match_char('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }

            ':' => {
                if self.match_char('=') {
                    TokenKind::Becomes
                } else {
                    TokenKind::Colon
                }
            }

            c if c.is_ascii_digit() => return Some(self.number()),

            c if c.is_ascii_alphabetic() => return Some(self.identifier()),

            '{' => {
                // Terminated comments are blanked out before lexing.
                self.error("comment not terminated");
                while !self.is_at_end() {
                    self.advance();
                }
                return None;
            }

            _ => {
                self.error("illegal character");
                return None;
            }
        };
        Some(self.make_token(kind))
    }

    // ── Literal scanners ─────────────────────────────────────────────

    fn number(&mut self) -> Token {
        while !self.is_at_end() && self.peek().is_ascii_digit() {
            self.advance();
        }

        let lexeme = &self.source[self.start..self.byte_pos];
        let value = match lexeme.parse::<i32>() {
            Ok(value) => value,
            Err(_) => {
                self.error("number too large");
                0
            }
        };
        Token::number(
            value,
            lexeme,
            Span::new(self.start, self.byte_pos),
            self.start_line,
            self.start_column,
        )
    }

    fn identifier(&mut self) -> Token {
        while !self.is_at_end() && self.peek().is_ascii_alphanumeric() {
            self.advance();
        }

        let lexeme = &self.source[self.start..self.byte_pos];
        let kind = TokenKind::keyword(lexeme).unwrap_or(TokenKind::Ident);
        self.make_token(kind)
    }

    // ── Character-level helpers ──────────────────────────────────────

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.peek().is_whitespace() {
            self.advance();
        }
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        self.byte_pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.current]
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.chars[self.current] != expected {
            return false;
        }
        self.advance();
        true
    }

    fn is_at_end(&self) -> bool {
        self.finished || self.current >= self.chars.len()
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            &self.source[self.start..self.byte_pos],
            Span::new(self.start, self.byte_pos),
            self.start_line,
            self.start_column,
        )
    }

    fn error(&mut self, message: &str) {
        self.errors.push(CompileError::new(
            message,
            Span::new(self.start, self.byte_pos),
            self.start_line,
            self.start_column,
        ));
    }
}

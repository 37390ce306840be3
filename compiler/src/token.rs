//! Token types for the P0 language.
//!
//! Each token carries its kind, lexeme (the raw source text), a span and
//! the line/column it starts at. Spans feed miette labels; line and column
//! are what diagnostics report and what duplicate suppression compares.

use std::fmt;

/// Byte offset range in the source string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// All token kinds in P0. Kinds are plain tags so they can be collected
/// into FIRST/FOLLOW sets; literal payloads live on [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    Number,
    Ident,

    // Keywords
    Div,
    Mod,
    And,
    Or,
    Of,
    Then,
    Do,
    Not,
    End,
    Else,
    If,
    While,
    Array,
    Record,
    Const,
    Type,
    Var,
    Procedure,
    Begin,
    Program,

    // Operators
    Times,     // *
    Plus,      // +
    Minus,     // -
    Eq,        // =
    Ne,        // <>
    Lt,        // <
    Le,        // <=
    Gt,        // >
    Ge,        // >=
    Becomes,   // :=

    // Punctuation
    Period,    // .
    Comma,     // ,
    Colon,     // :
    Semicolon, // ;
    LParen,    // (
    RParen,    // )
    LBrak,     // [
    RBrak,     // ]

    // Special
    Eof,
}

impl TokenKind {
    /// Map an identifier-shaped lexeme to its keyword, if it is one.
    pub fn keyword(lexeme: &str) -> Option<TokenKind> {
        let kind = match lexeme {
            "div" => TokenKind::Div,
            "mod" => TokenKind::Mod,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "of" => TokenKind::Of,
            "then" => TokenKind::Then,
            "do" => TokenKind::Do,
            "not" => TokenKind::Not,
            "end" => TokenKind::End,
            "else" => TokenKind::Else,
            "if" => TokenKind::If,
            "while" => TokenKind::While,
            "array" => TokenKind::Array,
            "record" => TokenKind::Record,
            "const" => TokenKind::Const,
            "type" => TokenKind::Type,
            "var" => TokenKind::Var,
            "procedure" => TokenKind::Procedure,
            "begin" => TokenKind::Begin,
            "program" => TokenKind::Program,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_keyword(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Div | Mod | And | Or | Of | Then | Do | Not | End | Else | If | While | Array
                | Record | Const | Type | Var | Procedure | Begin | Program
        )
    }

    /// Diagnostic for a missing token of this kind: keywords are quoted,
    /// symbols are not (`'then' expected`, `; expected`).
    pub fn expected(self) -> String {
        if self.is_keyword() {
            format!("'{self}' expected")
        } else {
            format!("{self} expected")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    /// Value of a number literal; `None` for every other kind.
    pub value: Option<i32>,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            value: None,
            span,
            line,
            column,
        }
    }

    pub fn number(value: i32, lexeme: impl Into<String>, span: Span, line: usize, column: usize) -> Self {
        Self {
            value: Some(value),
            ..Self::new(TokenKind::Number, lexeme, span, line, column)
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Number => "number",
            TokenKind::Ident => "identifier",
            TokenKind::Div => "div",
            TokenKind::Mod => "mod",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Of => "of",
            TokenKind::Then => "then",
            TokenKind::Do => "do",
            TokenKind::Not => "not",
            TokenKind::End => "end",
            TokenKind::Else => "else",
            TokenKind::If => "if",
            TokenKind::While => "while",
            TokenKind::Array => "array",
            TokenKind::Record => "record",
            TokenKind::Const => "const",
            TokenKind::Type => "type",
            TokenKind::Var => "var",
            TokenKind::Procedure => "procedure",
            TokenKind::Begin => "begin",
            TokenKind::Program => "program",
            TokenKind::Times => "*",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Eq => "=",
            TokenKind::Ne => "<>",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Becomes => ":=",
            TokenKind::Period => ".",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrak => "[",
            TokenKind::RBrak => "]",
            TokenKind::Eof => "end of input",
        };
        f.write_str(text)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Number | TokenKind::Ident => {
                write!(f, "{}:{} {} `{}`", self.line, self.column, self.kind, self.lexeme)
            }
            kind => write!(f, "{}:{} {}", self.line, self.column, kind),
        }
    }
}

//! Error types and the diagnostic sink.
//!
//! Two tiers: [`CompileError`] is a recoverable, user-facing diagnostic
//! (lexical, syntactic or semantic) that flows through [`Diagnostics`];
//! [`GenError`] is a code-generator invariant violation that aborts the
//! construct being generated. Both derive miette's `Diagnostic` so the CLI
//! can render them with source context.

use crate::token::Span;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// A recoverable compile error with its source position.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
#[error("{message}")]
#[diagnostic(code(p0::compile))]
pub struct CompileError {
    pub message: String,
    pub line: usize,
    pub column: usize,

    #[label("here")]
    pub span: SourceSpan,
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            span: (span.start, span.len()).into(),
        }
    }
}

/// Errors raised by the scope manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("multiple definitions")]
    MultipleDefinitions { name: String },

    #[error("undefined identifier {name}")]
    Undefined { name: String },
}

/// Internal code-generator failures. These indicate a compiler defect or
/// an unsupported construct, never a plain user mistake.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum GenError {
    #[error("no nested procedures: `{name}` is declared inside another procedure")]
    #[diagnostic(code(p0::internal::nested_procedure))]
    NestedProcedure { name: String },

    #[error("inconsistent addressing level for `{name}`: {level} at nesting depth {depth}")]
    #[diagnostic(code(p0::internal::level))]
    InvalidLevel {
        name: String,
        level: String,
        depth: u32,
    },

    #[error("address of `{name}` lies outside linear memory")]
    #[diagnostic(code(p0::internal::address))]
    AddressOverflow { name: String },
}

pub type GenResult<T> = Result<T, GenError>;

/// Collects diagnostics in source order.
///
/// A diagnostic at the same or an earlier position than the last reported
/// one is dropped: after an error the parser tends to trip over the same
/// token again while resynchronizing.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
    last: Option<(usize, usize)>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` unless it is positioned at or before the previous one.
    /// Returns whether it was kept.
    pub fn report(&mut self, error: CompileError) -> bool {
        let position = (error.line, error.column);
        if let Some(last) = self.last {
            if position <= last {
                return false;
            }
        }
        self.last = Some(position);
        self.errors.push(error);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.errors.iter()
    }

    pub fn into_vec(self) -> Vec<CompileError> {
        self.errors
    }
}

//! P0 Compiler: single-pass compiler from P0 to WebAssembly text.
//!
//! # Compiler Pipeline
//!
//! ```text
//! Source Code (.p0)
//!     │
//!     ▼
//! ┌────────────┐
//! │ Preprocess │  Blank out comments, normalize whitespace (offsets kept)
//! └─────┬──────┘
//!       │
//!       ▼
//! ┌────────────┐
//! │  Lexer     │  One token at a time, on demand
//! └─────┬──────┘
//!       │
//!       ▼
//! ┌────────────┐   ┌─────────┐
//! │  Parser    │──▶│  Scope  │  Declare / lookup, innermost first
//! │            │   └─────────┘
//! │            │   ┌─────────┐
//! │            │──▶│ Codegen │  Instruction log, memory layout
//! └─────┬──────┘   └─────────┘
//!       │
//!       ▼
//! ┌────────────┐
//! │  Wat       │  Module assembly and rendering
//! └─────┬──────┘
//!       │
//!       ▼
//! WebAssembly text (.wat)
//! ```
//!
//! Parsing, checking and generation are interleaved: there is no syntax
//! tree, and each construct is emitted as soon as it is recognized.

pub mod codegen;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod preprocess;
pub mod scope;
pub mod token;
pub mod types;
pub mod wat;

use std::path::PathBuf;

pub use parser::{Compilation, Parser};

/// Where `compile` writes the module unless told otherwise.
pub const DEFAULT_OUTPUT: &str = "result.wat";

/// Settings for writing the compiled module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub output: PathBuf,
    /// Write the module even when compilation failed.
    pub force: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            force: false,
        }
    }
}

impl CompileOptions {
    pub fn should_write(&self, compilation: &Compilation) -> bool {
        compilation.is_success() || self.force
    }
}

/// Run the whole pipeline over `source`.
pub fn compile(source: &str) -> Compilation {
    let text = preprocess::run(source);
    Parser::new(&text).compile()
}

//! WebAssembly text instructions and module assembly.
//!
//! The generator appends [`Instr`]s to a flat log; [`Module`] wraps the log
//! with the fixed prelude (runtime imports, globals, memory) and the start
//! declaration, and renders it as text, indenting each line by block
//! nesting.
//!
//! Module layout:
//!   - `(module`
//!   - imports `read`, `write`, `writeln` from `"P0lib"`
//!   - one `(global ...)` per scalar global
//!   - the stack pointer `$_sp`, when a call needs stack cells
//!   - `(memory N)`
//!   - the function log (procedures, then `$program`)
//!   - `(start $program)`
//!   - `)`

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Name of the runtime module the built-in procedures are imported from.
pub const RUNTIME_MODULE: &str = "P0lib";

/// Size of one linear-memory page.
pub const PAGE_SIZE: u32 = 65536;

/// Most pages a wasm32 memory can have.
pub const MAX_PAGES: u32 = 65536;

/// Bytes kept above the static data for stack cells.
pub const STACK_SIZE: u32 = PAGE_SIZE;

/// Global holding the next free stack cell. P0 identifiers cannot start
/// with `_`, so it never clashes with a program global.
pub const STACK_POINTER: &str = "_sp";

/// Width of a linear-memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// Four bytes (`integer`).
    Word,
    /// One byte, zero extended on load (`boolean`).
    Byte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    Const(i32),
    GlobalGet(String),
    GlobalSet(String),
    LocalGet(String),
    LocalSet(String),
    Load(Width),
    Store(Width),
    Add,
    Sub,
    Mul,
    DivS,
    RemS,
    Eq,
    Ne,
    LtS,
    GtS,
    LeS,
    GeS,
    Eqz,
    If,
    /// `if` whose arms leave one `i32` on the stack.
    IfResult,
    Else,
    End,
    Loop,
    Br(u32),
    Call(String),
    FuncStart { name: String, params: Vec<String> },
    Local(String),
    FuncEnd,
}

impl Instr {
    /// Nesting change caused by this instruction, as (before, after).
    fn nesting(&self) -> (i32, i32) {
        match self {
            Instr::If | Instr::IfResult | Instr::Loop | Instr::FuncStart { .. } => (0, 1),
            Instr::End | Instr::FuncEnd => (-1, 0),
            Instr::Else => (-1, 1),
            _ => (0, 0),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Const(value) => write!(f, "i32.const {value}"),
            Instr::GlobalGet(name) => write!(f, "global.get ${name}"),
            Instr::GlobalSet(name) => write!(f, "global.set ${name}"),
            Instr::LocalGet(name) => write!(f, "local.get ${name}"),
            Instr::LocalSet(name) => write!(f, "local.set ${name}"),
            Instr::Load(Width::Word) => write!(f, "i32.load"),
            Instr::Load(Width::Byte) => write!(f, "i32.load8_u"),
            Instr::Store(Width::Word) => write!(f, "i32.store"),
            Instr::Store(Width::Byte) => write!(f, "i32.store8"),
            Instr::Add => write!(f, "i32.add"),
            Instr::Sub => write!(f, "i32.sub"),
            Instr::Mul => write!(f, "i32.mul"),
            Instr::DivS => write!(f, "i32.div_s"),
            Instr::RemS => write!(f, "i32.rem_s"),
            Instr::Eq => write!(f, "i32.eq"),
            Instr::Ne => write!(f, "i32.ne"),
            Instr::LtS => write!(f, "i32.lt_s"),
            Instr::GtS => write!(f, "i32.gt_s"),
            Instr::LeS => write!(f, "i32.le_s"),
            Instr::GeS => write!(f, "i32.ge_s"),
            Instr::Eqz => write!(f, "i32.eqz"),
            Instr::If => write!(f, "if"),
            Instr::IfResult => write!(f, "if (result i32)"),
            Instr::Else => write!(f, "else"),
            Instr::End => write!(f, "end"),
            Instr::Loop => write!(f, "loop"),
            Instr::Br(depth) => write!(f, "br {depth}"),
            Instr::Call(name) => write!(f, "call ${name}"),
            Instr::FuncStart { name, params } => {
                write!(f, "(func ${name}")?;
                for param in params {
                    write!(f, " (param ${param} i32)")?;
                }
                Ok(())
            }
            Instr::Local(name) => write!(f, "(local ${name} i32)"),
            Instr::FuncEnd => write!(f, ")"),
        }
    }
}

/// Pages needed for `bytes` bytes; a module always has at least one.
pub fn pages_for(bytes: u64) -> u32 {
    let pages = bytes.div_ceil(PAGE_SIZE as u64).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// An assembled module, ready to render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    /// Names of the scalar globals, in declaration order.
    pub globals: Vec<String>,
    /// Initial stack pointer, if the module uses stack cells.
    pub stack_base: Option<u32>,
    pub memory_pages: u32,
    pub code: Vec<Instr>,
}

impl Module {
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "  ";
        writeln!(f, "(module")?;
        writeln!(
            f,
            "{indent}(import \"{RUNTIME_MODULE}\" \"read\" (func $read (result i32)))"
        )?;
        writeln!(
            f,
            "{indent}(import \"{RUNTIME_MODULE}\" \"write\" (func $write (param i32)))"
        )?;
        writeln!(f, "{indent}(import \"{RUNTIME_MODULE}\" \"writeln\" (func $writeln))")?;
        for name in &self.globals {
            writeln!(f, "{indent}(global ${name} (mut i32) i32.const 0)")?;
        }
        if let Some(base) = self.stack_base {
            writeln!(f, "{indent}(global ${STACK_POINTER} (mut i32) i32.const {base})")?;
        }
        writeln!(f, "{indent}(memory {})", self.memory_pages)?;

        let mut depth: i32 = 1;
        for instr in &self.code {
            let (before, after) = instr.nesting();
            depth = (depth + before).max(1);
            writeln!(f, "{}{instr}", indent.repeat(depth as usize))?;
            depth += after;
        }

        writeln!(f, "{indent}(start $program)")?;
        writeln!(f, ")")
    }
}

/// Write rendered module text to `path`.
pub fn write_module(path: &Path, text: &str) -> io::Result<()> {
    fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_text() {
        assert_eq!(Instr::Const(-1).to_string(), "i32.const -1");
        assert_eq!(Instr::GlobalSet("x".into()).to_string(), "global.set $x");
        assert_eq!(Instr::Load(Width::Byte).to_string(), "i32.load8_u");
        assert_eq!(Instr::Store(Width::Word).to_string(), "i32.store");
        assert_eq!(Instr::IfResult.to_string(), "if (result i32)");
        assert_eq!(Instr::Br(1).to_string(), "br 1");
        assert_eq!(Instr::Call("write".into()).to_string(), "call $write");
    }

    #[test]
    fn test_func_header() {
        let header = Instr::FuncStart {
            name: "p".into(),
            params: vec!["a".into(), "b".into()],
        };
        assert_eq!(header.to_string(), "(func $p (param $a i32) (param $b i32)");
        assert_eq!(Instr::Local("t".into()).to_string(), "(local $t i32)");
    }

    #[test]
    fn test_pages_for() {
        assert_eq!(pages_for(0), 1);
        assert_eq!(pages_for(65536), 1);
        assert_eq!(pages_for(65537), 2);
        assert_eq!(pages_for(1 << 32), MAX_PAGES);
    }

    #[test]
    fn test_stack_pointer_global() {
        let module = Module {
            globals: vec!["x".into()],
            stack_base: Some(12),
            memory_pages: 1,
            code: Vec::new(),
        };
        let text = module.render();
        assert!(text.contains(
            "  (global $x (mut i32) i32.const 0)\n  (global $_sp (mut i32) i32.const 12)\n  (memory 1)"
        ));
    }

    #[test]
    fn test_module_layout_and_indentation() {
        let module = Module {
            globals: vec!["x".into()],
            stack_base: None,
            memory_pages: 1,
            code: vec![
                Instr::FuncStart {
                    name: "program".into(),
                    params: Vec::new(),
                },
                Instr::GlobalGet("x".into()),
                Instr::If,
                Instr::Call("writeln".into()),
                Instr::Else,
                Instr::Const(0),
                Instr::Call("write".into()),
                Instr::End,
                Instr::FuncEnd,
            ],
        };
        let expected = "\
(module
  (import \"P0lib\" \"read\" (func $read (result i32)))
  (import \"P0lib\" \"write\" (func $write (param i32)))
  (import \"P0lib\" \"writeln\" (func $writeln))
  (global $x (mut i32) i32.const 0)
  (memory 1)
  (func $program
    global.get $x
    if
      call $writeln
    else
      i32.const 0
      call $write
    end
  )
  (start $program)
)
";
        assert_eq!(module.render(), expected);
    }
}

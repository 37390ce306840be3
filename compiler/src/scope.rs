//! Symbol table: bindings and the scope stack.
//!
//! A [`Binding`] records what a declared name is. Scopes are pushed for
//! record bodies and procedures and popped when those close; lookups walk
//! the stack innermost first, so inner declarations shadow outer ones.

use std::fmt;

use tracing::trace;

use crate::errors::ScopeError;
use crate::types::Type;

// ── Bindings ────────────────────────────────────────────────────────

/// Where a value lives at run time, which selects how it is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// A module global.
    Global,
    /// A local (or parameter) of the procedure at this nesting depth.
    Local(u32),
    /// A cell of linear memory at this address.
    InMemory(u32),
    /// Already on top of the evaluation stack.
    Transient,
}

impl Level {
    /// The level of something declared at scope depth `depth`.
    pub fn for_depth(depth: u32) -> Level {
        if depth == 0 {
            Level::Global
        } else {
            Level::Local(depth)
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Global => write!(f, "global"),
            Level::Local(depth) => write!(f, "local@{depth}"),
            Level::InMemory(address) => write!(f, "memory@{address}"),
            Level::Transient => write!(f, "transient"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    Value,
    Reference,
}

/// A formal parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub mode: ParamMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Read,
    Write,
    Writeln,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Variable { name: String, ty: Type, level: Level },
    /// A by-reference formal: the slot holds an address.
    Reference { name: String, ty: Type, level: Level },
    Constant { name: String, ty: Type, value: i32 },
    TypeAlias { name: String, ty: Type },
    Procedure { name: String, params: Vec<Param> },
    BuiltinProcedure { name: String, builtin: Builtin, params: Vec<Param> },
}

impl Binding {
    pub fn variable(name: impl Into<String>, ty: Type) -> Self {
        Binding::Variable {
            name: name.into(),
            ty,
            level: Level::Global,
        }
    }

    pub fn reference(name: impl Into<String>, ty: Type) -> Self {
        Binding::Reference {
            name: name.into(),
            ty,
            level: Level::Global,
        }
    }

    pub fn constant(name: impl Into<String>, ty: Type, value: i32) -> Self {
        Binding::Constant {
            name: name.into(),
            ty,
            value,
        }
    }

    pub fn type_alias(name: impl Into<String>, ty: Type) -> Self {
        Binding::TypeAlias {
            name: name.into(),
            ty,
        }
    }

    pub fn procedure(name: impl Into<String>) -> Self {
        Binding::Procedure {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Binding::Variable { name, .. }
            | Binding::Reference { name, .. }
            | Binding::Constant { name, .. }
            | Binding::TypeAlias { name, .. }
            | Binding::Procedure { name, .. }
            | Binding::BuiltinProcedure { name, .. } => name,
        }
    }

    /// Declared type; procedures have none.
    pub fn ty(&self) -> Type {
        match self {
            Binding::Variable { ty, .. }
            | Binding::Reference { ty, .. }
            | Binding::Constant { ty, .. }
            | Binding::TypeAlias { ty, .. } => ty.clone(),
            Binding::Procedure { .. } | Binding::BuiltinProcedure { .. } => Type::None,
        }
    }

    fn stamp(&mut self, depth: u32) {
        if let Binding::Variable { level, .. } | Binding::Reference { level, .. } = self {
            *level = Level::for_depth(depth);
        }
    }
}

/// The bindings every program starts with.
pub fn universe() -> Vec<Binding> {
    vec![
        Binding::type_alias("boolean", Type::Boolean),
        Binding::type_alias("integer", Type::Integer),
        Binding::constant("true", Type::Boolean, 1),
        Binding::constant("false", Type::Boolean, 0),
        Binding::BuiltinProcedure {
            name: "read".into(),
            builtin: Builtin::Read,
            params: vec![Param {
                name: "x".into(),
                ty: Type::Integer,
                mode: ParamMode::Reference,
            }],
        },
        Binding::BuiltinProcedure {
            name: "write".into(),
            builtin: Builtin::Write,
            params: vec![Param {
                name: "x".into(),
                ty: Type::Integer,
                mode: ParamMode::Value,
            }],
        },
        Binding::BuiltinProcedure {
            name: "writeln".into(),
            builtin: Builtin::Writeln,
            params: Vec::new(),
        },
    ]
}

// ── Scopes ──────────────────────────────────────────────────────────

/// Bindings declared at one nesting level, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    bindings: Vec<Binding>,
}

impl Scope {
    pub fn find(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name() == name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Binding> {
        self.bindings.iter()
    }

    /// Bindings declared at or after position `start`, for in-place
    /// patching by the code generator.
    pub fn bindings_from_mut(&mut self, start: usize) -> &mut [Binding] {
        let start = start.min(self.bindings.len());
        &mut self.bindings[start..]
    }

    pub fn into_bindings(self) -> Vec<Binding> {
        self.bindings
    }
}

/// The stack of open scopes. Index 0 is the global scope.
#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    /// A stack holding only the global scope, pre-populated with the
    /// built-in names.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                bindings: universe(),
            }],
        }
    }

    /// Nesting depth of the innermost scope; 0 is global.
    pub fn depth(&self) -> u32 {
        (self.scopes.len() - 1) as u32
    }

    pub fn open_scope(&mut self) {
        self.scopes.push(Scope::default());
        trace!(depth = self.depth(), "open scope");
    }

    /// Pop and return the innermost scope. The global scope is never
    /// popped; closing it yields an empty scope.
    pub fn close_scope(&mut self) -> Scope {
        if self.scopes.len() == 1 {
            return Scope::default();
        }
        trace!(depth = self.depth(), "close scope");
        self.scopes.pop().unwrap_or_default()
    }

    pub fn innermost(&self) -> &Scope {
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn innermost_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Add `binding` to the innermost scope, stamping variables with the
    /// current depth. A name already declared in that scope is rejected and
    /// the existing binding is kept.
    pub fn declare(&mut self, mut binding: Binding) -> Result<(), ScopeError> {
        if self.innermost().find(binding.name()).is_some() {
            return Err(ScopeError::MultipleDefinitions {
                name: binding.name().to_string(),
            });
        }
        binding.stamp(self.depth());
        trace!(name = binding.name(), depth = self.depth(), "declare");
        self.innermost_mut().bindings.push(binding);
        Ok(())
    }

    /// Resolve `name`, innermost scope first.
    pub fn lookup(&self, name: &str) -> Result<&Binding, ScopeError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.find(name))
            .ok_or_else(|| ScopeError::Undefined {
                name: name.to_string(),
            })
    }

    /// Attach the parameter list to procedure `name` declared in the scope
    /// enclosing the innermost one. Returns whether the procedure was found.
    pub fn set_params(&mut self, name: &str, params: Vec<Param>) -> bool {
        let Some(index) = self.scopes.len().checked_sub(2) else {
            return false;
        };
        let found = self.scopes[index]
            .bindings
            .iter_mut()
            .rev()
            .find(|b| b.name() == name);
        match found {
            Some(Binding::Procedure { params: slot, .. }) => {
                *slot = params;
                true
            }
            _ => false,
        }
    }
}

//! Code generator: semantic actions to WebAssembly instructions.
//!
//! The parser calls into a [`Generator`] as it recognizes each construct.
//! Operands travel as [`Item`]s: a constant, a variable whose value is
//! fetched through its [`Level`], or a reference whose *address* is fetched
//! through its level and whose value is loaded through that address. An item
//! is only turned into instructions when an operator or statement needs its
//! value (`load`) or its address (`store_target`).
//!
//! Addressing modes:
//!   - `Global`      → `global.get $x` / `global.set $x`
//!   - `Local(d)`    → `local.get $x` / `local.set $x` (d must be the current depth)
//!   - `InMemory(a)` → `i32.const a` followed by a load or store
//!   - `Transient`   → already on the stack
//!
//! Global aggregates live in linear memory, allocated upward from address 0.
//! Scalars in machine globals or locals have no address; when one is passed
//! to a `var` parameter it is copied into a stack cell before the call and
//! copied back after it. Stack cells sit above the static data and are
//! reserved per call through the `$_sp` global, so every activation gets its
//! own.
//!
//! Static data is capped one page below the wasm32 maximum, leaving room
//! for the stack.

use tracing::{debug, trace};

use crate::errors::{GenError, GenResult};
use crate::scope::{Binding, Level, Param, ParamMode};
use crate::types::{ArrayType, Type, INTEGER_SIZE};
use crate::wat::{pages_for, Instr, Module, Width, MAX_PAGES, PAGE_SIZE, STACK_POINTER, STACK_SIZE};

/// Upper bound on statically allocated bytes.
pub const STATIC_LIMIT: u32 = (MAX_PAGES - 1) * PAGE_SIZE;

// ── Items ───────────────────────────────────────────────────────────

/// A synthesized operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Constant { ty: Type, value: i32 },
    Variable { name: String, ty: Type, level: Level },
    Reference { name: String, ty: Type, level: Level },
}

impl Item {
    /// The item analysis continues with after an error. Its type is
    /// compatible with everything, so no follow-up error is reported.
    pub fn poisoned() -> Item {
        Item::Constant {
            ty: Type::None,
            value: 0,
        }
    }

    pub fn constant(ty: Type, value: i32) -> Item {
        Item::Constant { ty, value }
    }

    /// A value already on the evaluation stack.
    pub fn transient(ty: Type) -> Item {
        Item::Variable {
            name: String::new(),
            ty,
            level: Level::Transient,
        }
    }

    /// The item a use of `binding` starts from, if it denotes a value.
    pub fn from_binding(binding: &Binding) -> Option<Item> {
        match binding {
            Binding::Variable { name, ty, level } => Some(Item::Variable {
                name: name.clone(),
                ty: ty.clone(),
                level: *level,
            }),
            Binding::Reference { name, ty, level } => Some(Item::Reference {
                name: name.clone(),
                ty: ty.clone(),
                level: *level,
            }),
            Binding::Constant { ty, value, .. } => Some(Item::constant(ty.clone(), *value)),
            _ => None,
        }
    }

    pub fn ty(&self) -> &Type {
        match self {
            Item::Constant { ty, .. } | Item::Variable { ty, .. } | Item::Reference { ty, .. } => ty,
        }
    }

    /// The folded value, for constants.
    pub fn value(&self) -> Option<i32> {
        match self {
            Item::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Whether the item carries the error type. Such items are checked
    /// against nothing and generate nothing.
    pub fn is_poisoned(&self) -> bool {
        self.ty().is_error()
    }

    /// Whether the item denotes storage that can be assigned to or passed
    /// by reference.
    pub fn is_addressable(&self) -> bool {
        match self {
            Item::Constant { .. } => false,
            Item::Variable { level, .. } => *level != Level::Transient,
            Item::Reference { .. } => true,
        }
    }
}

fn width(ty: &Type) -> Width {
    match ty {
        Type::Boolean => Width::Byte,
        _ => Width::Word,
    }
}

// ── Operators ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// Fold two constants with 32-bit wrapping arithmetic; `div` and `mod`
    /// truncate toward zero. `None` on division by zero.
    pub fn fold(self, left: i32, right: i32) -> Option<i32> {
        match self {
            BinaryOp::Add => Some(left.wrapping_add(right)),
            BinaryOp::Sub => Some(left.wrapping_sub(right)),
            BinaryOp::Mul => Some(left.wrapping_mul(right)),
            BinaryOp::Div => (right != 0).then(|| left.wrapping_div(right)),
            BinaryOp::Mod => (right != 0).then(|| left.wrapping_rem(right)),
        }
    }

    fn instr(self) -> Instr {
        match self {
            BinaryOp::Add => Instr::Add,
            BinaryOp::Sub => Instr::Sub,
            BinaryOp::Mul => Instr::Mul,
            BinaryOp::Div => Instr::DivS,
            BinaryOp::Mod => Instr::RemS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Relation {
    pub fn holds(self, left: i32, right: i32) -> bool {
        match self {
            Relation::Eq => left == right,
            Relation::Ne => left != right,
            Relation::Lt => left < right,
            Relation::Gt => left > right,
            Relation::Le => left <= right,
            Relation::Ge => left >= right,
        }
    }

    fn instr(self) -> Instr {
        match self {
            Relation::Eq => Instr::Eq,
            Relation::Ne => Instr::Ne,
            Relation::Lt => Instr::LtS,
            Relation::Gt => Instr::GtS,
            Relation::Le => Instr::LeS,
            Relation::Ge => Instr::GeS,
        }
    }
}

// ── Generator state ─────────────────────────────────────────────────

/// A position in the instruction log that can be rewound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// A scalar passed by reference through a stack cell, copied back once
/// the call returns.
#[derive(Debug, Clone)]
struct Writeback {
    /// Cell offset from the stack pointer at the call site.
    offset: u32,
    target: Item,
}

#[derive(Debug, Default)]
pub struct Generator {
    depth: u32,
    memsize: u32,
    code: Vec<Instr>,
    globals: Vec<String>,
    writebacks: Vec<Writeback>,
    uses_stack: bool,
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current procedure nesting depth; 0 outside any procedure.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Next free linear-memory address.
    pub fn memsize(&self) -> u32 {
        self.memsize
    }

    pub fn code(&self) -> &[Instr] {
        &self.code
    }

    fn emit(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    pub fn mark(&self) -> Mark {
        Mark(self.code.len())
    }

    /// Discard everything emitted since `mark`.
    pub fn rewind(&mut self, mark: Mark) {
        self.code.truncate(mark.0);
    }

    fn invalid_level(&self, name: &str, level: Level) -> GenError {
        GenError::InvalidLevel {
            name: name.to_string(),
            level: level.to_string(),
            depth: self.depth,
        }
    }

    // ── Declarations ────────────────────────────────────────────────

    /// Place global variables: scalars become module globals, aggregates
    /// are given consecutive addresses in linear memory. Aggregates that do
    /// not fit below [`STATIC_LIMIT`] are returned by name and their type is
    /// replaced by the error type.
    pub fn global_vars(&mut self, bindings: &mut [Binding]) -> Vec<String> {
        let mut rejected = Vec::new();
        for binding in bindings {
            if let Binding::Variable { name, ty, level } = binding {
                if !ty.is_aggregate() {
                    debug!(name = %name, "declare global");
                    self.globals.push(name.clone());
                    continue;
                }
                let end = self
                    .memsize
                    .checked_add(ty.size())
                    .filter(|&end| end <= STATIC_LIMIT);
                match end {
                    Some(end) => {
                        *level = Level::InMemory(self.memsize);
                        debug!(name = %name, address = self.memsize, size = ty.size(), "allocate global");
                        self.memsize = end;
                    }
                    None => {
                        rejected.push(name.clone());
                        *ty = Type::None;
                    }
                }
            }
        }
        rejected
    }

    /// Declare the scalar locals among `bindings`. Aggregates cannot live in
    /// machine locals: their names are returned and their type is replaced
    /// by the error type.
    pub fn local_vars(&mut self, bindings: &mut [Binding]) -> Vec<String> {
        let mut rejected = Vec::new();
        for binding in bindings {
            if let Binding::Variable { name, ty, .. } = binding {
                if ty.is_aggregate() {
                    rejected.push(name.clone());
                    *ty = Type::None;
                } else {
                    self.code.push(Instr::Local(name.clone()));
                }
            }
        }
        rejected
    }

    pub fn proc_start(&mut self, name: &str, params: &[Param]) -> GenResult<()> {
        let nested = self.depth > 0;
        self.depth += 1;
        debug!(name, depth = self.depth, params = params.len(), "procedure start");
        self.emit(Instr::FuncStart {
            name: name.to_string(),
            params: params.iter().map(|p| p.name.clone()).collect(),
        });
        if nested {
            return Err(GenError::NestedProcedure {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn proc_exit(&mut self) {
        debug!(depth = self.depth, "procedure exit");
        self.depth = self.depth.saturating_sub(1);
        self.emit(Instr::FuncEnd);
    }

    pub fn program_entry(&mut self) {
        self.emit(Instr::FuncStart {
            name: "program".to_string(),
            params: Vec::new(),
        });
    }

    pub fn program_exit(&mut self) {
        self.emit(Instr::FuncEnd);
    }

    /// Assemble the module from everything generated so far.
    pub fn finish(self) -> Module {
        let mut bytes = self.memsize as u64;
        if self.uses_stack {
            bytes += STACK_SIZE as u64;
        }
        let module = Module {
            globals: self.globals,
            stack_base: self.uses_stack.then_some(self.memsize),
            memory_pages: pages_for(bytes),
            code: self.code,
        };
        debug!(
            globals = module.globals.len(),
            pages = module.memory_pages,
            instructions = module.code.len(),
            "assemble module"
        );
        module
    }

    // ── Loads and stores ────────────────────────────────────────────

    /// Push the address held by a reference.
    fn load_address(&mut self, name: &str, level: Level) -> GenResult<()> {
        match level {
            Level::Local(depth) if depth == self.depth => {
                self.emit(Instr::LocalGet(name.to_string()));
                Ok(())
            }
            Level::Transient => Ok(()),
            other => Err(self.invalid_level(name, other)),
        }
    }

    /// Put the value of `item` on the stack.
    pub fn load(&mut self, item: &Item) -> GenResult<Item> {
        match item {
            Item::Constant { ty, value } => {
                self.emit(Instr::Const(*value));
                return Ok(Item::transient(ty.clone()));
            }
            Item::Variable { name, ty, level } => match *level {
                Level::Global => self.emit(Instr::GlobalGet(name.clone())),
                Level::Local(depth) if depth == self.depth => {
                    self.emit(Instr::LocalGet(name.clone()))
                }
                Level::InMemory(address) => {
                    self.emit(Instr::Const(address as i32));
                    self.emit(Instr::Load(width(ty)));
                }
                Level::Transient => {}
                other => return Err(self.invalid_level(name, other)),
            },
            Item::Reference { name, ty, level } => {
                self.load_address(name, *level)?;
                self.emit(Instr::Load(width(ty)));
            }
        }
        Ok(Item::transient(item.ty().clone()))
    }

    /// Push the address a later [`store`](Self::store) writes through, if
    /// the target lives in memory. Must precede the code of the value.
    pub fn store_target(&mut self, target: &Item) -> GenResult<()> {
        match target {
            Item::Variable {
                level: Level::InMemory(address),
                ..
            } => {
                self.emit(Instr::Const(*address as i32));
                Ok(())
            }
            Item::Reference { name, level, .. } => self.load_address(name, *level),
            _ => Ok(()),
        }
    }

    /// Store the value on top of the stack into `target`.
    pub fn store(&mut self, target: &Item) -> GenResult<()> {
        match target {
            Item::Variable { name, ty, level } => match *level {
                Level::Global => self.emit(Instr::GlobalSet(name.clone())),
                Level::Local(depth) if depth == self.depth => {
                    self.emit(Instr::LocalSet(name.clone()))
                }
                Level::InMemory(_) => self.emit(Instr::Store(width(ty))),
                other => return Err(self.invalid_level(name, other)),
            },
            Item::Reference { ty, .. } => self.emit(Instr::Store(width(ty))),
            Item::Constant { .. } => {}
        }
        Ok(())
    }

    /// `target := value`, with the target's address already pushed by
    /// [`store_target`](Self::store_target).
    pub fn assign(&mut self, target: &Item, value: &Item) -> GenResult<()> {
        self.load(value)?;
        self.store(target)
    }

    // ── Expressions ─────────────────────────────────────────────────

    /// `-x` for a non-constant integer.
    pub fn neg(&mut self, item: &Item) -> GenResult<Item> {
        self.load(item)?;
        self.emit(Instr::Const(-1));
        self.emit(Instr::Mul);
        Ok(Item::transient(Type::Integer))
    }

    /// `not x` for a non-constant boolean.
    pub fn not(&mut self, item: &Item) -> GenResult<Item> {
        self.load(item)?;
        self.emit(Instr::Eqz);
        Ok(Item::transient(Type::Boolean))
    }

    /// Apply `op` to the materialized left operand and `right`.
    pub fn binary(&mut self, op: BinaryOp, right: &Item) -> GenResult<Item> {
        self.load(right)?;
        self.emit(op.instr());
        Ok(Item::transient(Type::Integer))
    }

    /// Compare the materialized left operand with `right`.
    pub fn relation(&mut self, rel: Relation, right: &Item) -> GenResult<Item> {
        self.load(right)?;
        self.emit(rel.instr());
        Ok(Item::transient(Type::Boolean))
    }

    /// Open `x and ...`: the right operand runs only when `x` holds.
    pub fn and_then(&mut self, left: &Item) -> GenResult<()> {
        self.load(left)?;
        self.emit(Instr::IfResult);
        Ok(())
    }

    pub fn and_end(&mut self, right: &Item) -> GenResult<Item> {
        self.load(right)?;
        self.emit(Instr::Else);
        self.emit(Instr::Const(0));
        self.emit(Instr::End);
        Ok(Item::transient(Type::Boolean))
    }

    /// Open `x or ...`: the right operand runs only when `x` fails.
    pub fn or_else(&mut self, left: &Item) -> GenResult<()> {
        self.load(left)?;
        self.emit(Instr::IfResult);
        self.emit(Instr::Const(1));
        self.emit(Instr::Else);
        Ok(())
    }

    pub fn or_end(&mut self, right: &Item) -> GenResult<Item> {
        self.load(right)?;
        self.emit(Instr::End);
        Ok(Item::transient(Type::Boolean))
    }

    // ── Selectors ───────────────────────────────────────────────────

    /// Move `item` by `offset` bytes and retype it as `ty`.
    fn displace(&mut self, item: &Item, offset: u32, ty: Type) -> GenResult<Item> {
        match item {
            Item::Variable {
                name,
                level: Level::InMemory(address),
                ..
            } => match address.checked_add(offset) {
                Some(address) => Ok(Item::Variable {
                    name: name.clone(),
                    ty,
                    level: Level::InMemory(address),
                }),
                None => Err(GenError::AddressOverflow { name: name.clone() }),
            },
            Item::Reference { name, level, .. } => {
                self.load_address(name, *level)?;
                self.emit(Instr::Const(offset as i32));
                self.emit(Instr::Add);
                Ok(Item::Reference {
                    name: name.clone(),
                    ty,
                    level: Level::Transient,
                })
            }
            Item::Variable { name, level, .. } => Err(self.invalid_level(name, *level)),
            Item::Constant { .. } => Ok(Item::poisoned()),
        }
    }

    /// `x.field` where the field lies `offset` bytes into the record.
    pub fn select(&mut self, record: &Item, offset: u32, field_ty: Type) -> GenResult<Item> {
        self.displace(record, offset, field_ty)
    }

    /// `x[index]` for an index already checked against the bounds.
    pub fn index_const(&mut self, array: &Item, ty: &ArrayType, index: i32) -> GenResult<Item> {
        self.displace(array, ty.offset_of(index), ty.base.clone())
    }

    /// `x[i]` for a run-time index: computes the element address.
    pub fn index(&mut self, array: &Item, ty: &ArrayType, index: &Item) -> GenResult<Item> {
        self.load(index)?;
        if ty.lower != 0 {
            self.emit(Instr::Const(ty.lower));
            self.emit(Instr::Sub);
        }
        self.emit(Instr::Const(ty.element_size() as i32));
        self.emit(Instr::Mul);
        let name = match array {
            Item::Variable {
                name,
                level: Level::InMemory(address),
                ..
            } => {
                self.emit(Instr::Const(*address as i32));
                name.clone()
            }
            Item::Reference { name, level, .. } => {
                // A transient base address is already below the index.
                self.load_address(name, *level)?;
                name.clone()
            }
            Item::Variable { name, level, .. } => return Err(self.invalid_level(name, *level)),
            Item::Constant { .. } => return Ok(Item::poisoned()),
        };
        self.emit(Instr::Add);
        Ok(Item::Reference {
            name,
            ty: ty.base.clone(),
            level: Level::Transient,
        })
    }

    // ── Calls ───────────────────────────────────────────────────────

    /// Push one actual parameter for formal `param`.
    pub fn actual_param(&mut self, actual: &Item, param: &Param) -> GenResult<()> {
        if param.mode == ParamMode::Value {
            self.load(actual)?;
            return Ok(());
        }
        match actual {
            Item::Variable {
                level: Level::InMemory(address),
                ..
            } => self.emit(Instr::Const(*address as i32)),
            Item::Reference { name, level, .. } => self.load_address(name, *level)?,
            Item::Variable { ty, .. } => {
                let offset = self.writebacks.len() as u32 * INTEGER_SIZE;
                trace!(offset, "stack cell for by-reference scalar");
                self.uses_stack = true;
                self.cell_address(offset);
                self.load(actual)?;
                self.emit(Instr::Store(width(ty)));
                self.cell_address(offset);
                self.writebacks.push(Writeback {
                    offset,
                    target: actual.clone(),
                });
            }
            Item::Constant { .. } => {}
        }
        Ok(())
    }

    /// Push the address `offset` bytes above the stack pointer.
    fn cell_address(&mut self, offset: u32) {
        self.emit(Instr::GlobalGet(STACK_POINTER.to_string()));
        if offset != 0 {
            self.emit(Instr::Const(offset as i32));
            self.emit(Instr::Add);
        }
    }

    /// Move the stack pointer by `bytes` with `op` (`Add` or `Sub`).
    fn move_stack(&mut self, op: Instr, bytes: u32) {
        self.emit(Instr::GlobalGet(STACK_POINTER.to_string()));
        self.emit(Instr::Const(bytes as i32));
        self.emit(op);
        self.emit(Instr::GlobalSet(STACK_POINTER.to_string()));
    }

    /// Call procedure `name` with its actuals pushed. Stack cells filled by
    /// `actual_param` are reserved for the duration of the call and copied
    /// back into their variables afterwards.
    pub fn call(&mut self, name: &str) -> GenResult<()> {
        let writebacks = std::mem::take(&mut self.writebacks);
        let frame = writebacks.len() as u32 * INTEGER_SIZE;
        if frame > 0 {
            self.move_stack(Instr::Add, frame);
        }
        self.emit(Instr::Call(name.to_string()));
        if frame > 0 {
            self.move_stack(Instr::Sub, frame);
        }
        for writeback in writebacks {
            self.cell_address(writeback.offset);
            self.emit(Instr::Load(width(writeback.target.ty())));
            self.store(&writeback.target)?;
        }
        Ok(())
    }

    /// Drop a call whose actuals did not check, with its pending
    /// writebacks.
    pub fn abandon_call(&mut self, mark: Mark) {
        self.writebacks.clear();
        self.rewind(mark);
    }

    pub fn read(&mut self, target: &Item) -> GenResult<()> {
        self.store_target(target)?;
        self.emit(Instr::Call("read".to_string()));
        self.store(target)
    }

    pub fn write(&mut self, value: &Item) -> GenResult<()> {
        self.load(value)?;
        self.emit(Instr::Call("write".to_string()));
        Ok(())
    }

    pub fn writeln(&mut self) {
        self.emit(Instr::Call("writeln".to_string()));
    }

    // ── Control flow ────────────────────────────────────────────────

    /// Evaluate `cond` and open an `if` block.
    pub fn cond(&mut self, cond: &Item) -> GenResult<()> {
        self.load(cond)?;
        self.emit(Instr::If);
        Ok(())
    }

    pub fn else_branch(&mut self) {
        self.emit(Instr::Else);
    }

    pub fn if_end(&mut self) {
        self.emit(Instr::End);
    }

    pub fn while_start(&mut self) {
        self.emit(Instr::Loop);
    }

    /// Close a `while` body opened by `while_start` and `cond`.
    pub fn while_end(&mut self) {
        self.emit(Instr::Br(1));
        self.emit(Instr::End);
        self.emit(Instr::End);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, ty: Type, level: Level) -> Item {
        Item::Variable {
            name: name.to_string(),
            ty,
            level,
        }
    }

    fn code_text(generator: &Generator) -> Vec<String> {
        generator.code().iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_fold_arithmetic() {
        assert_eq!(BinaryOp::Add.fold(2, 3), Some(5));
        assert_eq!(BinaryOp::Add.fold(i32::MAX, 1), Some(i32::MIN));
        assert_eq!(BinaryOp::Div.fold(-7, 2), Some(-3));
        assert_eq!(BinaryOp::Mod.fold(-7, 2), Some(-1));
        assert_eq!(BinaryOp::Div.fold(1, 0), None);
        assert_eq!(BinaryOp::Mod.fold(1, 0), None);
        assert!(Relation::Le.holds(3, 3));
        assert!(!Relation::Ne.holds(3, 3));
    }

    #[test]
    fn test_load_addressing_modes() {
        let mut generator = Generator::new();
        generator.load(&var("g", Type::Integer, Level::Global)).unwrap();
        generator.load(&var("b", Type::Boolean, Level::InMemory(8))).unwrap();
        generator.load(&Item::constant(Type::Integer, 7)).unwrap();
        assert_eq!(
            code_text(&generator),
            vec!["global.get $g", "i32.const 8", "i32.load8_u", "i32.const 7"]
        );
    }

    #[test]
    fn test_local_from_other_depth_is_invalid() {
        let mut generator = Generator::new();
        let err = generator
            .load(&var("x", Type::Integer, Level::Local(1)))
            .unwrap_err();
        assert!(matches!(err, GenError::InvalidLevel { depth: 0, .. }));
    }

    #[test]
    fn test_reference_loads_through_address() {
        let mut generator = Generator::new();
        generator.proc_start("p", &[]).unwrap();
        let r = Item::Reference {
            name: "r".into(),
            ty: Type::Integer,
            level: Level::Local(1),
        };
        generator.load(&r).unwrap();
        assert_eq!(code_text(&generator)[1..], ["local.get $r", "i32.load"]);
    }

    #[test]
    fn test_global_vars_layout() {
        let mut generator = Generator::new();
        let mut bindings = vec![
            Binding::variable("n", Type::Integer),
            Binding::variable("a", Type::array(Type::Integer, 1, 3)),
            Binding::variable("r", Type::record(vec![("f".to_string(), Type::Boolean)])),
        ];
        assert!(generator.global_vars(&mut bindings).is_empty());
        assert!(matches!(bindings[1], Binding::Variable { level: Level::InMemory(0), .. }));
        assert!(matches!(bindings[2], Binding::Variable { level: Level::InMemory(12), .. }));
        assert_eq!(generator.memsize(), 13);

        let module = generator.finish();
        assert_eq!(module.globals, vec!["n".to_string()]);
        assert_eq!(module.memory_pages, 1);
    }

    #[test]
    fn test_local_aggregates_rejected() {
        let mut generator = Generator::new();
        generator.proc_start("p", &[]).unwrap();
        let mut bindings = vec![
            Binding::variable("i", Type::Integer),
            Binding::variable("a", Type::array(Type::Integer, 0, 2)),
        ];
        let rejected = generator.local_vars(&mut bindings);
        assert_eq!(rejected, vec!["a".to_string()]);
        assert_eq!(bindings[1].ty(), Type::None);
        assert_eq!(code_text(&generator)[1..], ["(local $i i32)"]);
    }

    #[test]
    fn test_nested_procedure_is_fatal() {
        let mut generator = Generator::new();
        assert!(generator.proc_start("p", &[]).is_ok());
        let err = generator.proc_start("q", &[]).unwrap_err();
        assert_eq!(err, GenError::NestedProcedure { name: "q".into() });
    }

    #[test]
    fn test_constant_index_folds_into_address() {
        let mut generator = Generator::new();
        let ty = Type::array(Type::Integer, 1, 3);
        let Type::Array(array) = &ty else {
            panic!("Expected array");
        };
        let a = var("a", ty.clone(), Level::InMemory(16));
        let element = generator.index_const(&a, array, 3).unwrap();
        assert_eq!(element, var("a", Type::Integer, Level::InMemory(24)));
        assert!(generator.code().is_empty());
    }

    #[test]
    fn test_dynamic_index() {
        let mut generator = Generator::new();
        let ty = Type::array(Type::Integer, 1, 3);
        let Type::Array(array) = &ty else {
            panic!("Expected array");
        };
        let a = var("a", ty.clone(), Level::InMemory(16));
        let i = var("i", Type::Integer, Level::Global);
        let element = generator.index(&a, array, &i).unwrap();
        assert!(matches!(element, Item::Reference { level: Level::Transient, .. }));
        assert_eq!(
            code_text(&generator),
            vec![
                "global.get $i",
                "i32.const 1",
                "i32.sub",
                "i32.const 4",
                "i32.mul",
                "i32.const 16",
                "i32.add",
            ]
        );
    }

    #[test]
    fn test_select_through_reference() {
        let mut generator = Generator::new();
        generator.proc_start("p", &[]).unwrap();
        let r = Item::Reference {
            name: "r".into(),
            ty: Type::None,
            level: Level::Local(1),
        };
        let field = generator.select(&r, 4, Type::Boolean).unwrap();
        assert!(matches!(field, Item::Reference { level: Level::Transient, .. }));
        assert_eq!(
            code_text(&generator)[1..],
            ["local.get $r", "i32.const 4", "i32.add"]
        );
    }

    #[test]
    fn test_assign_to_memory_pushes_address_first() {
        let mut generator = Generator::new();
        let target = var("a", Type::Integer, Level::InMemory(4));
        generator.store_target(&target).unwrap();
        generator
            .assign(&target, &var("x", Type::Integer, Level::Global))
            .unwrap();
        assert_eq!(
            code_text(&generator),
            vec!["i32.const 4", "global.get $x", "i32.store"]
        );
    }

    #[test]
    fn test_short_circuit_shapes() {
        let mut generator = Generator::new();
        let b = var("b", Type::Boolean, Level::Global);
        let c = var("c", Type::Boolean, Level::Global);
        generator.and_then(&b).unwrap();
        generator.and_end(&c).unwrap();
        generator.or_else(&b).unwrap();
        generator.or_end(&c).unwrap();
        assert_eq!(
            code_text(&generator),
            vec![
                "global.get $b",
                "if (result i32)",
                "global.get $c",
                "else",
                "i32.const 0",
                "end",
                "global.get $b",
                "if (result i32)",
                "i32.const 1",
                "else",
                "global.get $c",
                "end",
            ]
        );
    }

    #[test]
    fn test_rewind_discards_code() {
        let mut generator = Generator::new();
        generator.writeln();
        let mark = generator.mark();
        generator.load(&Item::constant(Type::Integer, 1)).unwrap();
        generator.rewind(mark);
        assert_eq!(code_text(&generator), vec!["call $writeln"]);
    }

    #[test]
    fn test_scalar_by_reference_uses_stack_cells() {
        let mut generator = Generator::new();
        let param = Param {
            name: "v".into(),
            ty: Type::Integer,
            mode: ParamMode::Reference,
        };
        let x = var("x", Type::Integer, Level::Global);
        let y = var("y", Type::Integer, Level::Global);
        generator.actual_param(&x, &param).unwrap();
        generator.actual_param(&y, &param).unwrap();
        generator.call("p").unwrap();
        assert_eq!(generator.memsize(), 0);
        assert_eq!(
            code_text(&generator),
            vec![
                "global.get $_sp",
                "global.get $x",
                "i32.store",
                "global.get $_sp",
                "global.get $_sp",
                "i32.const 4",
                "i32.add",
                "global.get $y",
                "i32.store",
                "global.get $_sp",
                "i32.const 4",
                "i32.add",
                "global.get $_sp",
                "i32.const 8",
                "i32.add",
                "global.set $_sp",
                "call $p",
                "global.get $_sp",
                "i32.const 8",
                "i32.sub",
                "global.set $_sp",
                "global.get $_sp",
                "i32.load",
                "global.set $x",
                "global.get $_sp",
                "i32.const 4",
                "i32.add",
                "i32.load",
                "global.set $y",
            ]
        );

        let module = generator.finish();
        assert_eq!(module.stack_base, Some(0));
        assert_eq!(module.memory_pages, 1);
    }

    #[test]
    fn test_stack_sits_above_static_data() {
        let mut generator = Generator::new();
        let mut bindings = vec![Binding::variable("a", Type::array(Type::Integer, 0, 16384))];
        assert!(generator.global_vars(&mut bindings).is_empty());
        let param = Param {
            name: "v".into(),
            ty: Type::Boolean,
            mode: ParamMode::Reference,
        };
        generator
            .actual_param(&var("b", Type::Boolean, Level::Global), &param)
            .unwrap();
        generator.call("p").unwrap();
        let module = generator.finish();
        assert_eq!(module.stack_base, Some(65536));
        assert_eq!(module.memory_pages, 2);
    }

    #[test]
    fn test_memory_limit() {
        let mut generator = Generator::new();
        let big = Type::array(Type::Integer, 0, 1_000_000_000);
        let mut bindings = vec![
            Binding::variable("a", big.clone()),
            Binding::variable("b", big),
        ];
        let rejected = generator.global_vars(&mut bindings);
        assert_eq!(rejected, vec!["b".to_string()]);
        assert_eq!(generator.memsize(), 4_000_000_000);
        assert!(matches!(&bindings[1], Binding::Variable { ty: Type::None, .. }));
        assert!(generator.finish().memory_pages <= MAX_PAGES);
    }

    #[test]
    fn test_displacement_overflow_is_internal_error() {
        let mut generator = Generator::new();
        let record = var("r", Type::Integer, Level::InMemory(u32::MAX - 2));
        let err = generator.select(&record, 8, Type::Integer).unwrap_err();
        assert!(matches!(err, GenError::AddressOverflow { .. }));
    }

    #[test]
    fn test_read_stores_into_memory() {
        let mut generator = Generator::new();
        let target = var("a", Type::Integer, Level::InMemory(8));
        generator.read(&target).unwrap();
        assert_eq!(
            code_text(&generator),
            vec!["i32.const 8", "call $read", "i32.store"]
        );
    }

    #[test]
    fn test_while_shape() {
        let mut generator = Generator::new();
        generator.while_start();
        generator.cond(&var("b", Type::Boolean, Level::Global)).unwrap();
        generator.writeln();
        generator.while_end();
        assert_eq!(
            code_text(&generator),
            vec!["loop", "global.get $b", "if", "call $writeln", "br 1", "end", "end"]
        );
    }
}

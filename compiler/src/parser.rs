//! Parser: one-pass recursive descent with semantic actions.
//!
//! There is no AST. Each production checks types, folds constants and
//! drives the [`Generator`] as soon as it has recognized enough of the
//! input, returning a synthesized [`Item`] to its caller:
//!
//! ```text
//! factor      ident selector | number | "(" expression ")" | "not" factor
//! term        factor {("*" | "div" | "mod" | "and") factor}
//! simple      ["+" | "-"] term {("+" | "-" | "or") term}
//! expression  simple [relation simple]
//! ```
//!
//! Error recovery:
//!   On an unexpected token the parser reports it and skips ahead to a
//!   token in the production's FIRST set, its FOLLOW set or the strong
//!   symbols (`const type var procedure while if begin`, end of input).
//!   Semantic errors continue with a poisoned item whose type is
//!   compatible with everything, so one mistake yields one diagnostic.

use tracing::{debug, trace};

use crate::codegen::{BinaryOp, Generator, Item, Relation};
use crate::errors::{CompileError, Diagnostics, GenError, GenResult};
use crate::lexer::Lexer;
use crate::scope::{Binding, Builtin, Level, Param, ParamMode, ScopeStack};
use crate::token::{Token, TokenKind};
use crate::types::Type;
use crate::wat::Module;

use TokenKind as T;

// ── Synchronization sets ────────────────────────────────────────────

const FIRST_FACTOR: &[TokenKind] = &[T::Ident, T::Number, T::LParen, T::Not];
const FOLLOW_FACTOR: &[TokenKind] = &[
    T::Times,
    T::Div,
    T::Mod,
    T::And,
    T::Or,
    T::Plus,
    T::Minus,
    T::Eq,
    T::Ne,
    T::Lt,
    T::Le,
    T::Gt,
    T::Ge,
    T::Comma,
    T::Semicolon,
    T::Then,
    T::Else,
    T::RParen,
    T::RBrak,
    T::Do,
    T::Period,
    T::End,
];
const FIRST_EXPRESSION: &[TokenKind] = &[T::Plus, T::Minus, T::Ident, T::Number, T::LParen, T::Not];
const FIRST_STATEMENT: &[TokenKind] = &[T::Ident, T::If, T::While, T::Begin];
const FOLLOW_STATEMENT: &[TokenKind] = &[T::Semicolon, T::End, T::Else];
const FIRST_TYPE: &[TokenKind] = &[T::Ident, T::Record, T::Array];
const FOLLOW_TYPE: &[TokenKind] = &[T::Semicolon];
const FIRST_DECL: &[TokenKind] = &[T::Const, T::Type, T::Var, T::Procedure];
const FOLLOW_DECL: &[TokenKind] = &[T::Begin];
const STRONG: &[TokenKind] = &[
    T::Const,
    T::Type,
    T::Var,
    T::Procedure,
    T::While,
    T::If,
    T::Begin,
    T::Eof,
];

/// The outcome of compiling one source text.
#[derive(Debug)]
pub struct Compilation {
    /// Always assembled, even when compilation failed.
    pub module: Module,
    pub diagnostics: Vec<CompileError>,
    pub internal_errors: Vec<GenError>,
}

impl Compilation {
    pub fn is_success(&self) -> bool {
        self.diagnostics.is_empty() && self.internal_errors.is_empty()
    }

    pub fn wat(&self) -> String {
        self.module.render()
    }
}

enum Callee {
    Procedure(String),
    Builtin(Builtin),
}

pub struct Parser<'src> {
    lexer: Lexer<'src>,
    token: Token,
    scopes: ScopeStack,
    diagnostics: Diagnostics,
    generator: Generator,
    internal: Vec<GenError>,
}

impl<'src> Parser<'src> {
    /// Set up a parser over preprocessed source text.
    pub fn new(source: &'src str) -> Self {
        let mut lexer = Lexer::new(source);
        let token = lexer.next_token();
        let mut parser = Self {
            lexer,
            token,
            scopes: ScopeStack::new(),
            diagnostics: Diagnostics::new(),
            generator: Generator::new(),
            internal: Vec::new(),
        };
        parser.drain_lexer_errors();
        parser
    }

    /// Parse a whole program and assemble the module.
    pub fn compile(mut self) -> Compilation {
        self.program();
        let compilation = Compilation {
            module: self.generator.finish(),
            diagnostics: self.diagnostics.into_vec(),
            internal_errors: self.internal,
        };
        debug!(
            diagnostics = compilation.diagnostics.len(),
            internal = compilation.internal_errors.len(),
            "compilation finished"
        );
        compilation
    }

    // ── Program and declarations ────────────────────────────────────

    fn program(&mut self) {
        self.expect(T::Program);
        if self.ident().is_none() {
            self.error("program name expected");
        }
        self.expect(T::Semicolon);
        self.declarations(true);
        self.generator.program_entry();
        self.compound_statement();
        self.generator.program_exit();
        if self.check(T::Period) {
            self.advance();
        }
        if !self.check(T::Eof) {
            self.error(T::Eof.expected());
        }
    }

    fn declarations(&mut self, global: bool) {
        if !self.at(FIRST_DECL) && !self.at(FOLLOW_DECL) {
            self.error("'begin' or declaration expected");
            self.skip_to(&[FIRST_DECL, FOLLOW_DECL]);
        }
        while self.check(T::Const) {
            self.advance();
            loop {
                self.const_declaration();
                if !self.check(T::Ident) {
                    break;
                }
            }
        }
        while self.check(T::Type) {
            self.advance();
            loop {
                self.type_declaration();
                if !self.check(T::Ident) {
                    break;
                }
            }
        }

        let start = self.scopes.innermost().len();
        while self.check(T::Var) {
            self.advance();
            loop {
                let (names, ty) = self.typed_ids();
                for name in names {
                    self.declare(Binding::variable(name, ty.clone()));
                }
                self.expect(T::Semicolon);
                if !self.check(T::Ident) {
                    break;
                }
            }
        }
        let declared = self.scopes.innermost_mut().bindings_from_mut(start);
        if global {
            if !self.generator.global_vars(declared).is_empty() {
                self.error("memory too large");
            }
        } else if !self.generator.local_vars(declared).is_empty() {
            self.error("no local arrays, records");
        }

        while self.check(T::Procedure) {
            self.advance();
            self.procedure_declaration();
        }
    }

    fn const_declaration(&mut self) {
        match self.ident() {
            Some(name) => {
                self.expect(T::Eq);
                let mark = self.generator.mark();
                let value = self.expression();
                self.generator.rewind(mark);
                let binding = match value {
                    Item::Constant { ty, value } => Binding::constant(name, ty, value),
                    _ => {
                        self.error("expression not constant");
                        Binding::constant(name, Type::None, 0)
                    }
                };
                self.declare(binding);
            }
            None => self.error("constant name expected"),
        }
        self.expect(T::Semicolon);
    }

    fn type_declaration(&mut self) {
        match self.ident() {
            Some(name) => {
                self.expect(T::Eq);
                let ty = self.type_();
                self.declare(Binding::type_alias(name, ty));
            }
            None => self.error("type name expected"),
        }
        self.expect(T::Semicolon);
    }

    fn procedure_declaration(&mut self) {
        let (name, declared) = match self.ident() {
            Some(name) => {
                let declared = self.declare(Binding::procedure(name.clone()));
                (name, declared)
            }
            None => {
                self.error("procedure name expected");
                (String::new(), false)
            }
        };
        trace!(name = %name, "procedure declaration");

        self.scopes.open_scope();
        let mut params = Vec::new();
        if self.check(T::LParen) {
            self.advance();
            if self.check(T::Var) || self.check(T::Ident) {
                self.formals(&mut params);
            }
            self.expect(T::RParen);
        }
        if declared {
            self.scopes.set_params(&name, params.clone());
        }
        self.expect(T::Semicolon);

        self.generate(|g| g.proc_start(&name, &params));
        self.declarations(false);
        self.compound_statement();
        self.generator.proc_exit();
        self.scopes.close_scope();
        self.expect(T::Semicolon);
    }

    fn formals(&mut self, params: &mut Vec<Param>) {
        loop {
            let mode = if self.check(T::Var) {
                self.advance();
                ParamMode::Reference
            } else {
                ParamMode::Value
            };
            let (names, mut ty) = self.typed_ids();
            if mode == ParamMode::Value && ty.is_aggregate() {
                self.error("aggregate parameters must be var parameters");
                ty = Type::None;
            }
            for name in names {
                let binding = match mode {
                    ParamMode::Value => Binding::variable(name.clone(), ty.clone()),
                    ParamMode::Reference => Binding::reference(name.clone(), ty.clone()),
                };
                self.declare(binding);
                params.push(Param {
                    name,
                    ty: ty.clone(),
                    mode,
                });
            }
            if !self.check(T::Semicolon) {
                return;
            }
            self.advance();
        }
    }

    /// `ident {"," ident} ":" type`. Declaring the names is up to the caller.
    fn typed_ids(&mut self) -> (Vec<String>, Type) {
        let mut names = Vec::new();
        match self.ident() {
            Some(name) => names.push(name),
            None => self.error("identifier expected"),
        }
        while self.check(T::Comma) {
            self.advance();
            match self.ident() {
                Some(name) => names.push(name),
                None => self.error("identifier expected"),
            }
        }
        let ty = if self.expect(T::Colon) {
            self.type_()
        } else {
            Type::None
        };
        (names, ty)
    }

    fn type_(&mut self) -> Type {
        if !self.at(FIRST_TYPE) {
            self.error("type expected");
            self.skip_to(&[FIRST_TYPE, FOLLOW_TYPE]);
        }
        match self.token.kind {
            T::Ident => {
                let ty = match self.scopes.lookup(&self.token.lexeme) {
                    Ok(Binding::TypeAlias { ty, .. }) => Ok(ty.clone()),
                    Ok(_) => Err("not a type".to_string()),
                    Err(e) => Err(e.to_string()),
                };
                self.advance();
                ty.unwrap_or_else(|message| {
                    self.error(message);
                    Type::None
                })
            }
            T::Array => {
                self.advance();
                self.array_type()
            }
            T::Record => {
                self.advance();
                self.record_type()
            }
            _ => Type::None,
        }
    }

    fn array_type(&mut self) -> Type {
        self.expect(T::LBrak);
        let mark = self.generator.mark();
        let lower = self.expression();
        self.expect(T::Period);
        self.expect(T::Period);
        let upper = self.expression();
        self.generator.rewind(mark);
        self.expect(T::RBrak);
        self.expect(T::Of);
        let base = self.type_();

        let bound = |item: &Item| match item {
            Item::Constant { ty, value } if *ty == Type::Integer && *value >= 0 => Some(*value),
            _ => None,
        };
        let Some(lower) = bound(&lower) else {
            self.error("bad lower bound");
            return Type::None;
        };
        let length = bound(&upper)
            .map(|upper| upper as i64 - lower as i64 + 1)
            .filter(|&length| {
                (0..=i32::MAX as i64).contains(&length)
                    && length * base.size() as i64 <= u32::MAX as i64
            });
        match length {
            Some(length) => Type::array(base, lower, length as i32),
            None => {
                self.error("bad upper bound");
                Type::None
            }
        }
    }

    fn record_type(&mut self) -> Type {
        self.scopes.open_scope();
        loop {
            let (names, ty) = self.typed_ids();
            for name in names {
                self.declare(Binding::variable(name, ty.clone()));
            }
            if !self.check(T::Semicolon) {
                break;
            }
            self.advance();
        }
        self.expect(T::End);
        let fields = self.scopes.close_scope().into_bindings();
        Type::record(
            fields
                .into_iter()
                .map(|field| (field.name().to_string(), field.ty())),
        )
    }

    // ── Statements ──────────────────────────────────────────────────

    fn compound_statement(&mut self) {
        self.expect(T::Begin);
        self.statement();
        while self.check(T::Semicolon) || self.at(FIRST_STATEMENT) {
            if self.check(T::Semicolon) {
                self.advance();
            } else {
                self.error("; missing");
            }
            self.statement();
        }
        self.expect(T::End);
    }

    fn statement(&mut self) {
        if !self.at(FIRST_STATEMENT) {
            self.error("statement expected");
            self.skip_to(&[FIRST_STATEMENT, FOLLOW_STATEMENT]);
        }
        match self.token.kind {
            T::Ident => self.ident_statement(),
            T::Begin => self.compound_statement(),
            T::If => self.if_statement(),
            T::While => self.while_statement(),
            _ => {}
        }
    }

    fn ident_statement(&mut self) {
        let name = self.token.lexeme.clone();
        let binding = match self.scopes.lookup(&name) {
            Ok(binding) => Some(binding.clone()),
            Err(e) => {
                self.error(e.to_string());
                None
            }
        };
        self.advance();

        match binding {
            Some(binding @ (Binding::Variable { .. } | Binding::Reference { .. })) => {
                let item = Item::from_binding(&binding).unwrap_or_else(Item::poisoned);
                let target = self.selector(item);
                self.assignment(target);
            }
            Some(Binding::Procedure { name, params }) => {
                self.call(Callee::Procedure(name), &params);
            }
            Some(Binding::BuiltinProcedure { builtin, params, .. }) => {
                self.call(Callee::Builtin(builtin), &params);
            }
            Some(Binding::TypeAlias { ty, .. }) => {
                self.error("variable or procedure expected");
                // Check the selectors against the type, but keep no code.
                self.discard_statement(Item::Variable {
                    name,
                    ty,
                    level: Level::InMemory(0),
                });
            }
            Some(Binding::Constant { .. }) => {
                self.error("variable or procedure expected");
                self.discard_statement(Item::poisoned());
            }
            None => self.discard_statement(Item::poisoned()),
        }
    }

    /// Parse the rest of a statement that cannot be generated.
    fn discard_statement(&mut self, item: Item) {
        let mark = self.generator.mark();
        self.selector(item);
        if self.check(T::Becomes) {
            self.advance();
            self.expression();
        } else if self.check(T::LParen) {
            self.advance();
            if self.at(FIRST_EXPRESSION) {
                self.expression();
                while self.check(T::Comma) {
                    self.advance();
                    self.expression();
                }
            }
            self.expect(T::RParen);
        }
        self.generator.rewind(mark);
    }

    fn assignment(&mut self, target: Item) {
        match self.token.kind {
            T::Becomes => {
                self.advance();
                let mark = self.generator.mark();
                if !target.is_poisoned() {
                    self.generate(|g| g.store_target(&target));
                }
                let value = self.expression();
                let (target_ty, value_ty) = (target.ty(), value.ty());
                let scalar = |ty: &Type| ty.is_scalar() || ty.is_error();
                if !(scalar(target_ty) && scalar(value_ty) && target_ty.compatible(value_ty)) {
                    self.error("incompatible assignment");
                } else if target.is_poisoned() {
                    self.generator.rewind(mark);
                } else {
                    self.generate(|g| g.assign(&target, &value));
                }
            }
            T::Eq => {
                self.error(":= expected");
                self.advance();
                let mark = self.generator.mark();
                self.expression();
                self.generator.rewind(mark);
            }
            _ => self.error(":= expected"),
        }
    }

    fn call(&mut self, callee: Callee, params: &[Param]) {
        let is_builtin = matches!(callee, Callee::Builtin(_));
        let mut count = 0;
        let mut accepted = true;
        let mut first = None;
        let mark = self.generator.mark();

        if self.check(T::LParen) {
            self.advance();
            if self.at(FIRST_EXPRESSION) {
                loop {
                    match self.actual(params, count, is_builtin) {
                        Some(item) if count == 0 => first = Some(item),
                        Some(_) => {}
                        None => accepted = false,
                    }
                    count += 1;
                    if !self.check(T::Comma) {
                        break;
                    }
                    self.advance();
                }
            }
            self.expect(T::RParen);
        }

        if count < params.len() {
            self.error("too few parameters");
            accepted = false;
        }
        if !accepted {
            self.generator.abandon_call(mark);
            return;
        }
        match callee {
            Callee::Procedure(name) => {
                self.generate(|g| g.call(&name));
            }
            Callee::Builtin(Builtin::Read) => {
                if let Some(target) = first {
                    self.generate(|g| g.read(&target));
                }
            }
            Callee::Builtin(Builtin::Write) => {
                if let Some(value) = first {
                    self.generate(|g| g.write(&value));
                }
            }
            Callee::Builtin(Builtin::Writeln) => self.generator.writeln(),
        }
    }

    /// Parse the actual for formal number `index`. Returns the item when it
    /// fits the formal; built-ins generate their own argument code.
    fn actual(&mut self, params: &[Param], index: usize, is_builtin: bool) -> Option<Item> {
        let mark = self.generator.mark();
        let item = self.expression();
        let Some(param) = params.get(index) else {
            self.error("extra parameter");
            self.generator.rewind(mark);
            return None;
        };
        let message = if param.mode == ParamMode::Reference
            && !item.is_addressable()
            && !item.is_poisoned()
        {
            Some("illegal parameter mode")
        } else if !param.ty.compatible(item.ty()) {
            Some("bad type")
        } else {
            None
        };
        if let Some(message) = message {
            self.error(message);
            self.generator.rewind(mark);
            return None;
        }
        if !is_builtin {
            self.generate(|g| g.actual_param(&item, param))?;
        }
        Some(item)
    }

    fn if_statement(&mut self) {
        self.advance();
        let cond = self.condition();
        self.generate(|g| g.cond(&cond));
        self.expect(T::Then);
        self.statement();
        if self.check(T::Else) {
            self.advance();
            self.generator.else_branch();
            self.statement();
        }
        self.generator.if_end();
    }

    fn while_statement(&mut self) {
        self.advance();
        self.generator.while_start();
        let cond = self.condition();
        self.generate(|g| g.cond(&cond));
        self.expect(T::Do);
        self.statement();
        self.generator.while_end();
    }

    fn condition(&mut self) -> Item {
        let cond = self.expression();
        if !cond.ty().compatible(&Type::Boolean) {
            self.error("boolean expected");
        }
        cond
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn expression(&mut self) -> Item {
        let x = self.simple_expression();
        let rel = match self.token.kind {
            T::Eq => Relation::Eq,
            T::Ne => Relation::Ne,
            T::Lt => Relation::Lt,
            T::Le => Relation::Le,
            T::Gt => Relation::Gt,
            T::Ge => Relation::Ge,
            _ => return x,
        };
        self.advance();

        let mark = self.generator.mark();
        self.generate(|g| g.load(&x));
        let y = self.simple_expression();

        if x.is_poisoned() || y.is_poisoned() {
            self.generator.rewind(mark);
            return Item::poisoned();
        }
        if !(x.ty().is_scalar() && x.ty() == y.ty()) {
            self.error("bad type");
            self.generator.rewind(mark);
            return Item::transient(Type::Boolean);
        }
        match (x.value(), y.value()) {
            (Some(a), Some(b)) => {
                self.generator.rewind(mark);
                Item::constant(Type::Boolean, rel.holds(a, b) as i32)
            }
            _ => self
                .generate(|g| g.relation(rel, &y))
                .unwrap_or_else(Item::poisoned),
        }
    }

    fn simple_expression(&mut self) -> Item {
        let mut x = match self.token.kind {
            T::Plus => {
                self.advance();
                self.term()
            }
            T::Minus => {
                self.advance();
                let x = self.term();
                self.negate(x)
            }
            _ => self.term(),
        };
        loop {
            x = match self.token.kind {
                T::Plus => {
                    self.advance();
                    self.arithmetic(BinaryOp::Add, x, Self::term)
                }
                T::Minus => {
                    self.advance();
                    self.arithmetic(BinaryOp::Sub, x, Self::term)
                }
                T::Or => {
                    self.advance();
                    self.or(x)
                }
                _ => return x,
            };
        }
    }

    fn term(&mut self) -> Item {
        let mut x = self.factor();
        loop {
            x = match self.token.kind {
                T::Times => {
                    self.advance();
                    self.arithmetic(BinaryOp::Mul, x, Self::factor)
                }
                T::Div => {
                    self.advance();
                    self.arithmetic(BinaryOp::Div, x, Self::factor)
                }
                T::Mod => {
                    self.advance();
                    self.arithmetic(BinaryOp::Mod, x, Self::factor)
                }
                T::And => {
                    self.advance();
                    self.and(x)
                }
                _ => return x,
            };
        }
    }

    fn factor(&mut self) -> Item {
        if !self.at(FIRST_FACTOR) {
            self.error("expression expected");
            self.skip_to(&[FIRST_FACTOR, FOLLOW_FACTOR]);
        }
        match self.token.kind {
            T::Ident => {
                let item = match self.scopes.lookup(&self.token.lexeme) {
                    Ok(binding) => {
                        Item::from_binding(binding).ok_or_else(|| "expression expected".to_string())
                    }
                    Err(e) => Err(e.to_string()),
                };
                let item = item.unwrap_or_else(|message| {
                    self.error(message);
                    Item::poisoned()
                });
                self.advance();
                self.selector(item)
            }
            T::Number => {
                let value = self.token.value.unwrap_or_default();
                self.advance();
                Item::constant(Type::Integer, value)
            }
            T::LParen => {
                self.advance();
                let x = self.expression();
                self.expect(T::RParen);
                x
            }
            T::Not => {
                self.advance();
                let x = self.factor();
                self.not(x)
            }
            _ => Item::poisoned(),
        }
    }

    fn selector(&mut self, mut x: Item) -> Item {
        loop {
            match self.token.kind {
                T::Period => {
                    self.advance();
                    x = self.field(x);
                }
                T::LBrak => {
                    self.advance();
                    let index = self.expression();
                    x = self.element(x, index);
                    self.expect(T::RBrak);
                }
                _ => return x,
            }
        }
    }

    fn field(&mut self, x: Item) -> Item {
        if !self.check(T::Ident) {
            self.error("identifier expected");
            return Item::poisoned();
        }
        let name = self.token.lexeme.clone();
        let ty = x.ty().clone();
        let selected = match &ty {
            Type::Record(record) => match record.field(&name) {
                Some(field) => self
                    .generate(|g| g.select(&x, field.offset, field.ty.clone()))
                    .unwrap_or_else(Item::poisoned),
                None => {
                    self.error("not a field");
                    Item::poisoned()
                }
            },
            Type::None => Item::poisoned(),
            _ => {
                self.error("not a record");
                Item::poisoned()
            }
        };
        self.advance();
        selected
    }

    fn element(&mut self, x: Item, index: Item) -> Item {
        let ty = x.ty().clone();
        let array = match &ty {
            Type::Array(array) => array,
            Type::None => return Item::poisoned(),
            _ => {
                self.error("not an array");
                return Item::poisoned();
            }
        };
        if !index.ty().compatible(&Type::Integer) {
            self.error("index not integer");
            return Item::poisoned();
        }
        if index.is_poisoned() {
            return Item::poisoned();
        }
        let element = match index.value() {
            Some(i) if !array.contains(i) => {
                self.error("index out of bounds");
                return Item::poisoned();
            }
            Some(i) => self.generate(|g| g.index_const(&x, array, i)),
            None => self.generate(|g| g.index(&x, array, &index)),
        };
        element.unwrap_or_else(Item::poisoned)
    }

    // ── Operators ───────────────────────────────────────────────────

    /// `x op y` for integer operators. The left operand is materialized
    /// before the right one is parsed; if both are constant the code is
    /// discarded and the result folded.
    fn arithmetic(&mut self, op: BinaryOp, x: Item, operand: fn(&mut Self) -> Item) -> Item {
        let mark = self.generator.mark();
        self.generate(|g| g.load(&x));
        let y = operand(self);

        if x.is_poisoned() || y.is_poisoned() {
            self.generator.rewind(mark);
            return Item::poisoned();
        }
        if *x.ty() != Type::Integer || *y.ty() != Type::Integer {
            self.error("bad type");
            self.generator.rewind(mark);
            return Item::transient(Type::Integer);
        }
        match (x.value(), y.value()) {
            (Some(a), Some(b)) => {
                self.generator.rewind(mark);
                match op.fold(a, b) {
                    Some(value) => Item::constant(Type::Integer, value),
                    None => {
                        self.error("division by zero");
                        Item::poisoned()
                    }
                }
            }
            _ => self
                .generate(|g| g.binary(op, &y))
                .unwrap_or_else(Item::poisoned),
        }
    }

    fn and(&mut self, x: Item) -> Item {
        if let Some(left) = x.value() {
            let mark = self.generator.mark();
            let y = self.factor();
            if !self.boolean_operands(&x, &y) {
                self.generator.rewind(mark);
                return Item::poisoned();
            }
            if left == 0 {
                self.generator.rewind(mark);
                return x;
            }
            return y;
        }
        self.generate(|g| g.and_then(&x));
        let y = self.factor();
        self.boolean_operands(&x, &y);
        self.generate(|g| g.and_end(&y))
            .unwrap_or_else(Item::poisoned)
    }

    fn or(&mut self, x: Item) -> Item {
        if let Some(left) = x.value() {
            let mark = self.generator.mark();
            let y = self.term();
            if !self.boolean_operands(&x, &y) {
                self.generator.rewind(mark);
                return Item::poisoned();
            }
            if left != 0 {
                self.generator.rewind(mark);
                return x;
            }
            return y;
        }
        self.generate(|g| g.or_else(&x));
        let y = self.term();
        self.boolean_operands(&x, &y);
        self.generate(|g| g.or_end(&y))
            .unwrap_or_else(Item::poisoned)
    }

    /// Check both operands of `and`/`or`; false when either is unusable.
    fn boolean_operands(&mut self, x: &Item, y: &Item) -> bool {
        if x.is_poisoned() || y.is_poisoned() {
            return false;
        }
        if *x.ty() != Type::Boolean || *y.ty() != Type::Boolean {
            self.error("bad type");
            return false;
        }
        true
    }

    fn negate(&mut self, x: Item) -> Item {
        if x.is_poisoned() {
            return x;
        }
        if *x.ty() != Type::Integer {
            self.error("bad type");
            return Item::poisoned();
        }
        match x.value() {
            Some(value) => Item::constant(Type::Integer, value.wrapping_neg()),
            None => self.generate(|g| g.neg(&x)).unwrap_or_else(Item::poisoned),
        }
    }

    fn not(&mut self, x: Item) -> Item {
        if x.is_poisoned() {
            return x;
        }
        if *x.ty() != Type::Boolean {
            self.error("not boolean");
            return Item::poisoned();
        }
        match x.value() {
            Some(value) => Item::constant(Type::Boolean, 1 - value),
            None => self.generate(|g| g.not(&x)).unwrap_or_else(Item::poisoned),
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Run a generator action, recording an internal error if it fails.
    fn generate<R>(&mut self, action: impl FnOnce(&mut Generator) -> GenResult<R>) -> Option<R> {
        match action(&mut self.generator) {
            Ok(result) => Some(result),
            Err(e) => {
                debug!(error = %e, "internal error");
                self.internal.push(e);
                None
            }
        }
    }

    /// Declare `binding` in the innermost scope; false if the name was
    /// already taken there.
    fn declare(&mut self, binding: Binding) -> bool {
        match self.scopes.declare(binding) {
            Ok(()) => true,
            Err(e) => {
                self.error(e.to_string());
                false
            }
        }
    }

    fn advance(&mut self) {
        self.token = self.lexer.next_token();
        self.drain_lexer_errors();
    }

    fn drain_lexer_errors(&mut self) {
        for error in self.lexer.take_errors() {
            self.diagnostics.report(error);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.token.kind == kind
    }

    fn at(&self, set: &[TokenKind]) -> bool {
        set.contains(&self.token.kind)
    }

    /// Consume a token of `kind`, or report it missing.
    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            self.error(kind.expected());
            false
        }
    }

    /// Consume an identifier and return its name.
    fn ident(&mut self) -> Option<String> {
        if !self.check(T::Ident) {
            return None;
        }
        let name = self.token.lexeme.clone();
        self.advance();
        Some(name)
    }

    /// Skip tokens until one is in `sets` or is a strong symbol.
    fn skip_to(&mut self, sets: &[&[TokenKind]]) {
        while !self.at(STRONG) && !sets.iter().any(|set| self.at(set)) {
            self.advance();
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let error = CompileError::new(
            message,
            self.token.span,
            self.token.line,
            self.token.column,
        );
        self.diagnostics.report(error);
    }
}

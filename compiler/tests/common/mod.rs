//! A small stack machine for the instruction subset the compiler emits.
//!
//! Works on the assembled [`Module`] rather than its text. The built-in
//! procedures read from a fixed input list and append to an output string:
//! `write` separates consecutive numbers on a line with a space and
//! `writeln` ends the line.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use p0_compiler::wat::{Instr, Module, Width, PAGE_SIZE, STACK_POINTER};
use p0_compiler::Compilation;

const STEP_LIMIT: usize = 1_000_000;

struct Function {
    params: Vec<String>,
    locals: Vec<String>,
    body: Vec<Instr>,
    /// Block start index to (else index, end index).
    blocks: HashMap<usize, (Option<usize>, usize)>,
}

struct Frame {
    locals: HashMap<String, i32>,
    stack: Vec<i32>,
}

impl Frame {
    fn push(&mut self, value: i32) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> i32 {
        self.stack.pop().expect("stack underflow")
    }
}

enum Flow {
    Next,
    Branch(u32),
}

pub struct Machine {
    functions: HashMap<String, Rc<Function>>,
    globals: HashMap<String, i32>,
    memory: Vec<u8>,
    input: VecDeque<i32>,
    output: String,
    steps: usize,
}

impl Machine {
    pub fn new(module: &Module, input: &[i32]) -> Self {
        let mut functions = HashMap::new();
        let mut current: Option<(String, Function)> = None;
        for instr in &module.code {
            match instr {
                Instr::FuncStart { name, params } => {
                    assert!(current.is_none(), "function ${name} opened inside another");
                    current = Some((
                        name.clone(),
                        Function {
                            params: params.clone(),
                            locals: Vec::new(),
                            body: Vec::new(),
                            blocks: HashMap::new(),
                        },
                    ));
                }
                Instr::Local(name) => {
                    current.as_mut().expect("local outside function").1.locals.push(name.clone());
                }
                Instr::FuncEnd => {
                    let (name, mut function) = current.take().expect("unbalanced function end");
                    function.blocks = match_blocks(&function.body);
                    functions.insert(name, Rc::new(function));
                }
                other => {
                    current
                        .as_mut()
                        .expect("instruction outside function")
                        .1
                        .body
                        .push(other.clone());
                }
            }
        }
        assert!(current.is_none(), "unterminated function");

        let mut globals: HashMap<String, i32> =
            module.globals.iter().map(|name| (name.clone(), 0)).collect();
        if let Some(base) = module.stack_base {
            globals.insert(STACK_POINTER.to_string(), base as i32);
        }

        Self {
            functions,
            globals,
            memory: vec![0; module.memory_pages as usize * PAGE_SIZE as usize],
            input: input.iter().copied().collect(),
            output: String::new(),
            steps: 0,
        }
    }

    /// Run `$program` to completion and return what it wrote.
    pub fn run(mut self) -> String {
        self.invoke("program", Vec::new());
        self.output
    }

    fn invoke(&mut self, name: &str, args: Vec<i32>) {
        let function = Rc::clone(
            self.functions
                .get(name)
                .unwrap_or_else(|| panic!("call to unknown function ${name}")),
        );
        assert_eq!(args.len(), function.params.len(), "arity of ${name}");
        let mut frame = Frame {
            locals: function.params.iter().cloned().zip(args).collect(),
            stack: Vec::new(),
        };
        for local in &function.locals {
            frame.locals.insert(local.clone(), 0);
        }
        self.exec(&function, &mut frame, 0, function.body.len());
        assert!(frame.stack.is_empty(), "${name} left values on the stack");
    }

    fn exec(&mut self, function: &Function, frame: &mut Frame, start: usize, end: usize) -> Flow {
        let mut pc = start;
        while pc < end {
            self.steps += 1;
            assert!(self.steps < STEP_LIMIT, "step limit exceeded");
            match &function.body[pc] {
                Instr::Const(value) => frame.push(*value),
                Instr::GlobalGet(name) => {
                    let value = *self.globals.get(name).unwrap_or_else(|| panic!("no global ${name}"));
                    frame.push(value);
                }
                Instr::GlobalSet(name) => {
                    let value = frame.pop();
                    let slot = self.globals.get_mut(name).unwrap_or_else(|| panic!("no global ${name}"));
                    *slot = value;
                }
                Instr::LocalGet(name) => {
                    let value = *frame.locals.get(name).unwrap_or_else(|| panic!("no local ${name}"));
                    frame.push(value);
                }
                Instr::LocalSet(name) => {
                    let value = frame.pop();
                    let slot = frame.locals.get_mut(name).unwrap_or_else(|| panic!("no local ${name}"));
                    *slot = value;
                }
                Instr::Load(width) => {
                    let address = frame.pop();
                    let value = self.load(address, *width);
                    frame.push(value);
                }
                Instr::Store(width) => {
                    let value = frame.pop();
                    let address = frame.pop();
                    self.store(address, value, *width);
                }
                Instr::Add => binary(frame, i32::wrapping_add),
                Instr::Sub => binary(frame, i32::wrapping_sub),
                Instr::Mul => binary(frame, i32::wrapping_mul),
                Instr::DivS => binary(frame, |a, b| {
                    assert!(b != 0, "trap: integer divide by zero");
                    a.wrapping_div(b)
                }),
                Instr::RemS => binary(frame, |a, b| {
                    assert!(b != 0, "trap: integer divide by zero");
                    a.wrapping_rem(b)
                }),
                Instr::Eq => binary(frame, |a, b| (a == b) as i32),
                Instr::Ne => binary(frame, |a, b| (a != b) as i32),
                Instr::LtS => binary(frame, |a, b| (a < b) as i32),
                Instr::GtS => binary(frame, |a, b| (a > b) as i32),
                Instr::LeS => binary(frame, |a, b| (a <= b) as i32),
                Instr::GeS => binary(frame, |a, b| (a >= b) as i32),
                Instr::Eqz => {
                    let value = frame.pop();
                    frame.push((value == 0) as i32);
                }
                Instr::If | Instr::IfResult => {
                    let (otherwise, stop) = function.blocks[&pc];
                    let flow = if frame.pop() != 0 {
                        self.exec(function, frame, pc + 1, otherwise.unwrap_or(stop))
                    } else if let Some(otherwise) = otherwise {
                        self.exec(function, frame, otherwise + 1, stop)
                    } else {
                        Flow::Next
                    };
                    if let Flow::Branch(depth) = flow {
                        if depth > 0 {
                            return Flow::Branch(depth - 1);
                        }
                    }
                    pc = stop;
                }
                Instr::Loop => {
                    let (_, stop) = function.blocks[&pc];
                    loop {
                        match self.exec(function, frame, pc + 1, stop) {
                            Flow::Next => break,
                            Flow::Branch(0) => continue,
                            Flow::Branch(depth) => return Flow::Branch(depth - 1),
                        }
                    }
                    pc = stop;
                }
                Instr::Br(depth) => return Flow::Branch(*depth),
                Instr::Call(name) => self.call(name, frame),
                other => panic!("unexpected `{other}` inside a function body"),
            }
            pc += 1;
        }
        Flow::Next
    }

    fn call(&mut self, name: &str, frame: &mut Frame) {
        match name {
            "read" => {
                let value = self.input.pop_front().expect("input exhausted");
                frame.push(value);
            }
            "write" => {
                let value = frame.pop();
                if !self.output.is_empty() && !self.output.ends_with('\n') {
                    self.output.push(' ');
                }
                self.output.push_str(&value.to_string());
            }
            "writeln" => self.output.push('\n'),
            _ => {
                let arity = self
                    .functions
                    .get(name)
                    .unwrap_or_else(|| panic!("call to unknown function ${name}"))
                    .params
                    .len();
                let at = frame.stack.len().checked_sub(arity).expect("missing arguments");
                let args = frame.stack.split_off(at);
                self.invoke(name, args);
            }
        }
    }

    fn cell(&self, address: i32, len: usize) -> std::ops::Range<usize> {
        let start = usize::try_from(address).expect("negative address");
        assert!(start + len <= self.memory.len(), "trap: out of bounds memory access");
        start..start + len
    }

    fn load(&self, address: i32, width: Width) -> i32 {
        match width {
            Width::Word => {
                let range = self.cell(address, 4);
                let mut bytes = [0; 4];
                bytes.copy_from_slice(&self.memory[range]);
                i32::from_le_bytes(bytes)
            }
            Width::Byte => {
                let range = self.cell(address, 1);
                self.memory[range.start] as i32
            }
        }
    }

    fn store(&mut self, address: i32, value: i32, width: Width) {
        match width {
            Width::Word => {
                let range = self.cell(address, 4);
                self.memory[range].copy_from_slice(&value.to_le_bytes());
            }
            Width::Byte => {
                let range = self.cell(address, 1);
                self.memory[range.start] = value as u8;
            }
        }
    }
}

fn binary(frame: &mut Frame, op: impl Fn(i32, i32) -> i32) {
    let right = frame.pop();
    let left = frame.pop();
    frame.push(op(left, right));
}

fn match_blocks(body: &[Instr]) -> HashMap<usize, (Option<usize>, usize)> {
    let mut blocks = HashMap::new();
    let mut open: Vec<(usize, Option<usize>)> = Vec::new();
    for (index, instr) in body.iter().enumerate() {
        match instr {
            Instr::If | Instr::IfResult | Instr::Loop => open.push((index, None)),
            Instr::Else => open.last_mut().expect("else outside a block").1 = Some(index),
            Instr::End => {
                let (start, otherwise) = open.pop().expect("unbalanced end");
                blocks.insert(start, (otherwise, index));
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "unterminated block");
    blocks
}

/// Compile `source`, insisting on success.
pub fn compile_ok(source: &str) -> Compilation {
    let compilation = p0_compiler::compile(source);
    assert!(
        compilation.is_success(),
        "diagnostics: {:?}, internal: {:?}",
        compilation.diagnostics,
        compilation.internal_errors
    );
    compilation
}

/// Compile and run `source` with `input`, returning its output.
pub fn run(source: &str, input: &[i32]) -> String {
    Machine::new(&compile_ok(source).module, input).run()
}

pub fn messages(compilation: &Compilation) -> Vec<&str> {
    compilation
        .diagnostics
        .iter()
        .map(|e| e.message.as_str())
        .collect()
}

//! Reference backend: direct interpretation, no external toolchain.
//!
//! `deliver` resolves every name of the scope tree to a frame slot once.
//! Names are unique across the tree and captures reuse their outer name,
//! so one flat frame per invocation serves all nested scopes. The program
//! holds no mutable state; each invocation owns its frame, so an
//! executable can be shared across threads freely.

use std::collections::HashMap;

use tracing::debug;

use super::{Backend, Executable, InstructionSet, Signature};
use crate::config::{Policy, Precision};
use crate::error::{EngineError, Result};
use crate::graph::eval;
use crate::graph::{BinaryOp, CompareOp, ReduceOp, UnaryOp, Value};
use crate::ir::{self, ArgumentSource, Declaration, Expr, Scope};

pub struct InterpBackend {
    policy: Policy,
}

impl InterpBackend {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }
}

impl Default for InterpBackend {
    fn default() -> Self {
        Self::new(Policy::interpreter())
    }
}

impl Backend for InterpBackend {
    fn name(&self) -> &str {
        &self.policy.name
    }

    fn policy(&self) -> &Policy {
        &self.policy
    }

    fn deliver(&self, scope: &Scope) -> Result<Executable> {
        ir::validate(scope)?;
        let signature = Signature::of(scope)?;
        let program = Program::build(scope, self.policy.precision)?;
        debug!(
            backend = %self.policy.name,
            slots = program.slots,
            steps = program.block.steps.len(),
            "delivered interpreter program"
        );
        Ok(Executable::new(&self.policy.name, signature, Box::new(program)))
    }
}

// ─── Slot-resolved program ────────────────────────────────────────

#[derive(Debug)]
enum Code {
    Slot(usize),
    Literal(Value),
    Unary(UnaryOp, Box<Code>),
    Binary(BinaryOp, Box<Code>, Box<Code>),
    Compare(CompareOp, Box<Code>, Box<Code>),
    Extract(Box<Code>, usize),
    Gather(Box<Code>, Box<Code>),
    Pack(Vec<Code>),
}

#[derive(Debug)]
enum Step {
    Let {
        dst: usize,
        code: Code,
    },
    Guard {
        dst: usize,
        cond: Code,
        value: Code,
    },
    Branch {
        dst: usize,
        cond: Code,
        then_block: Block,
        else_block: Block,
    },
    Reduce {
        dst: usize,
        op: ReduceOp,
        extent: usize,
        counter: usize,
        body: Block,
    },
}

/// A scope's steps plus the slot of its single result (for nested scopes).
#[derive(Debug)]
struct Block {
    steps: Vec<Step>,
    result: Option<usize>,
}

#[derive(Debug)]
struct Program {
    slots: usize,
    precision: Precision,
    externals: Vec<usize>,
    block: Block,
    outputs: Vec<usize>,
}

struct Resolver {
    slots: HashMap<String, usize>,
    precision: Precision,
}

impl Resolver {
    fn define(&mut self, name: &str) -> usize {
        let next = self.slots.len();
        *self.slots.entry(name.to_string()).or_insert(next)
    }

    fn slot(&self, name: &str) -> Result<usize> {
        self.slots
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::compile(format!("unbound name '{}'", name)))
    }

    fn code(&self, expr: &Expr) -> Result<Code> {
        Ok(match expr {
            Expr::Ref(name) => Code::Slot(self.slot(name)?),
            Expr::Literal(v) => Code::Literal(round(v.clone(), self.precision)),
            Expr::Unary(op, x) => Code::Unary(*op, Box::new(self.code(x)?)),
            Expr::Binary(op, a, b) => {
                Code::Binary(*op, Box::new(self.code(a)?), Box::new(self.code(b)?))
            }
            Expr::Compare(op, a, b) => {
                Code::Compare(*op, Box::new(self.code(a)?), Box::new(self.code(b)?))
            }
            Expr::Extract(x, k) => Code::Extract(Box::new(self.code(x)?), *k),
            Expr::Gather(x, i) => Code::Gather(Box::new(self.code(x)?), Box::new(self.code(i)?)),
            Expr::Pack(items) => {
                Code::Pack(items.iter().map(|x| self.code(x)).collect::<Result<_>>()?)
            }
        })
    }

    fn block(&mut self, scope: &Scope) -> Result<Block> {
        for b in &scope.arguments {
            if b.source != ArgumentSource::Capture {
                self.define(&b.name);
            }
        }
        let mut steps = Vec::with_capacity(scope.declarations.len());
        for decl in &scope.declarations {
            let step = match decl {
                Declaration::Let { name, expr, .. } => {
                    let code = self.code(expr)?;
                    Step::Let {
                        dst: self.define(name),
                        code,
                    }
                }
                Declaration::Guard {
                    name, cond, value, ..
                } => {
                    let cond = self.code(cond)?;
                    let value = self.code(value)?;
                    Step::Guard {
                        dst: self.define(name),
                        cond,
                        value,
                    }
                }
                Declaration::Branch {
                    name,
                    cond,
                    then_scope,
                    else_scope,
                    ..
                } => {
                    let cond = self.code(cond)?;
                    let then_block = self.block(then_scope)?;
                    let else_block = self.block(else_scope)?;
                    Step::Branch {
                        dst: self.define(name),
                        cond,
                        then_block,
                        else_block,
                    }
                }
                Declaration::Reduce {
                    name,
                    op,
                    extent,
                    body,
                } => {
                    let counter = body
                        .counter()
                        .ok_or_else(|| EngineError::compile(format!("{} has no counter", name)))?;
                    let body_block = self.block(body)?;
                    Step::Reduce {
                        dst: self.define(name),
                        op: *op,
                        extent: *extent,
                        counter: self.slot(&counter.name)?,
                        body: body_block,
                    }
                }
            };
            steps.push(step);
        }
        let result = match scope.outputs.as_slice() {
            [single] => Some(self.slot(single)?),
            _ => None,
        };
        Ok(Block { steps, result })
    }
}

impl Program {
    fn build(scope: &Scope, precision: Precision) -> Result<Self> {
        let mut resolver = Resolver {
            slots: HashMap::new(),
            precision,
        };
        let block = resolver.block(scope)?;
        let externals = scope
            .externals()
            .iter()
            .map(|b| resolver.slot(&b.name))
            .collect::<Result<_>>()?;
        let outputs = scope
            .outputs
            .iter()
            .map(|o| resolver.slot(o))
            .collect::<Result<_>>()?;
        Ok(Self {
            slots: resolver.slots.len(),
            precision,
            externals,
            block,
            outputs,
        })
    }

    fn run_block(&self, block: &Block, frame: &mut [Value]) -> Result<()> {
        for step in &block.steps {
            match step {
                Step::Let { dst, code } => {
                    frame[*dst] = self.eval(code, frame)?;
                }
                Step::Guard { dst, cond, value } => {
                    if !eval::is_true(self.eval(cond, frame)?.element(0)) {
                        return Err(EngineError::undefined("guard condition failed"));
                    }
                    frame[*dst] = self.eval(value, frame)?;
                }
                Step::Branch {
                    dst,
                    cond,
                    then_block,
                    else_block,
                } => {
                    let taken = if eval::is_true(self.eval(cond, frame)?.element(0)) {
                        then_block
                    } else {
                        else_block
                    };
                    self.run_block(taken, frame)?;
                    frame[*dst] = result_of(taken, frame)?;
                }
                Step::Reduce {
                    dst,
                    op,
                    extent,
                    counter,
                    body,
                } => {
                    let mut acc = eval::reduce_identity(*op);
                    for i in 0..*extent {
                        frame[*counter] = Value::scalar(i as f64);
                        self.run_block(body, frame)?;
                        let x = result_of(body, frame)?.element(0);
                        acc = self.precision.round(eval::reduce_step(*op, acc, x));
                    }
                    frame[*dst] = Value::scalar(acc);
                }
            }
        }
        Ok(())
    }

    fn eval(&self, code: &Code, frame: &[Value]) -> Result<Value> {
        let p = self.precision;
        let value = match code {
            Code::Slot(s) => return Ok(frame[*s].clone()),
            Code::Literal(v) => return Ok(v.clone()),
            Code::Unary(op, x) => self.eval(x, frame)?.map(|x| eval::unary(*op, x)),
            Code::Binary(op, a, b) => eval::zip(&self.eval(a, frame)?, &self.eval(b, frame)?, |x, y| {
                eval::binary(*op, x, y)
            }),
            Code::Compare(op, a, b) => eval::zip(&self.eval(a, frame)?, &self.eval(b, frame)?, |x, y| {
                eval::compare(*op, x, y)
            }),
            Code::Extract(x, k) => {
                let v = self.eval(x, frame)?;
                let item = v.data().get(*k).copied().ok_or(EngineError::Index {
                    index: *k,
                    count: v.data().len(),
                })?;
                Value::scalar(item)
            }
            Code::Gather(x, i) => {
                let v = self.eval(x, frame)?;
                let index = eval::gather_index(self.eval(i, frame)?.element(0), v.data().len())?;
                Value::scalar(v.data()[index])
            }
            Code::Pack(items) => Value::vector(
                items
                    .iter()
                    .map(|x| Ok(self.eval(x, frame)?.element(0)))
                    .collect::<Result<_>>()?,
            ),
        };
        Ok(round(value, p))
    }
}

fn result_of(block: &Block, frame: &[Value]) -> Result<Value> {
    block
        .result
        .map(|slot| frame[slot].clone())
        .ok_or_else(|| EngineError::compile("nested scope without a single result"))
}

fn round(value: Value, precision: Precision) -> Value {
    match precision {
        Precision::Double => value,
        Precision::Single => value.map(|x| precision.round(x)),
    }
}

impl InstructionSet for Program {
    fn invoke(&self, arguments: &[Value]) -> Result<Vec<Value>> {
        let mut frame = vec![Value::scalar(0.0); self.slots];
        for (slot, value) in self.externals.iter().zip(arguments) {
            frame[*slot] = round(value.clone(), self.precision);
        }
        self.run_block(&self.block, &mut frame)?;
        Ok(self.outputs.iter().map(|s| frame[*s].clone()).collect())
    }
}

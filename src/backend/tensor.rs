//! Tensor-library backend on burn's `NdArray` (f32).
//!
//! A whole batch is evaluated at once: every name holds a `[lanes, size]`
//! tensor, and lane validity is carried as a `[lanes, 1]` mask. Branches
//! evaluate both sides and select per lane. Only reductions whose body is
//! the plain element read map onto a library reduction; anything else is
//! rejected at delivery.

use std::collections::HashMap;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::tensor::{Tensor, TensorData};
use tracing::debug;

use super::{Backend, Executable, InstructionSet, LaneBatch, LaneInput, LaneResults, Signature};
use crate::config::{Policy, Precision};
use crate::error::{EngineError, Result};
use crate::graph::{BinaryOp, CompareOp, ReduceOp, Shape, UnaryOp, Value};
use crate::ir::{self, ArgumentSource, Declaration, Expr, Scope};

type Lib = NdArray<f32>;
type Lanes = Tensor<Lib, 2>;

pub struct TensorBackend {
    policy: Policy,
}

impl TensorBackend {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }
}

impl Default for TensorBackend {
    fn default() -> Self {
        Self::new(Policy::tensor())
    }
}

impl Backend for TensorBackend {
    fn name(&self) -> &str {
        &self.policy.name
    }

    fn policy(&self) -> &Policy {
        &self.policy
    }

    fn deliver(&self, scope: &Scope) -> Result<Executable> {
        if self.policy.precision == Precision::Double {
            return Err(EngineError::compile(format!(
                "policy '{}' asks for f64; the tensor library computes in f32",
                self.policy.name
            )));
        }
        ir::validate(scope)?;
        check_supported(scope)?;
        let signature = Signature::of(scope)?;
        debug!(backend = %self.policy.name, scope = %scope.name, "delivered tensor program");
        let program = TensorProgram {
            scope: scope.clone(),
            device: NdArrayDevice::default(),
        };
        Ok(Executable::new(&self.policy.name, signature, Box::new(program)))
    }
}

/// The operand name of a reduction whose body only reads `operand[counter]`.
fn plain_operand(body: &Scope) -> Option<&str> {
    let counter = body.counter()?;
    let [Declaration::Let { name, expr, .. }] = body.declarations.as_slice() else {
        return None;
    };
    if body.outputs.len() != 1 || body.outputs[0] != *name {
        return None;
    }
    match expr {
        Expr::Gather(target, index) => match (target.as_ref(), index.as_ref()) {
            (Expr::Ref(operand), Expr::Ref(i)) if *i == counter.name => Some(operand.as_str()),
            _ => None,
        },
        _ => None,
    }
}

fn check_supported(scope: &Scope) -> Result<()> {
    for decl in &scope.declarations {
        match decl {
            Declaration::Branch {
                then_scope,
                else_scope,
                ..
            } => {
                check_supported(then_scope)?;
                check_supported(else_scope)?;
            }
            Declaration::Reduce { name, op, body, .. } => {
                if plain_operand(body).is_none() {
                    return Err(EngineError::unsupported(
                        format!("reduce {} over a computed body", op.name()),
                        name.clone(),
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

struct TensorProgram {
    scope: Scope,
    device: NdArrayDevice,
}

/// Evaluation state for one batch.
struct Env {
    lanes: usize,
    values: HashMap<String, Lanes>,
}

impl Env {
    fn get(&self, name: &str) -> Result<Lanes> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::compile(format!("unbound name '{}'", name)))
    }
}

fn width(t: &Lanes) -> usize {
    t.dims()[1]
}

/// Broadcast a one-column operand against a wider one.
fn broadcast(a: Lanes, b: Lanes) -> (Lanes, Lanes) {
    let (wa, wb) = (width(&a), width(&b));
    let lanes = a.dims()[0];
    if wa == wb {
        (a, b)
    } else if wa == 1 {
        (a.expand([lanes, wb]), b)
    } else {
        (a, b.expand([lanes, wa]))
    }
}

impl TensorProgram {
    fn constant(&self, value: &Value, lanes: usize) -> Lanes {
        let size = value.shape().size();
        let data: Vec<f32> = value.data().iter().map(|&x| x as f32).collect();
        Tensor::<Lib, 2>::from_data(TensorData::new(data, [1, size]), &self.device)
            .expand([lanes, size])
    }

    fn expr(&self, expr: &Expr, env: &Env, ok: &mut Lanes) -> Result<Lanes> {
        Ok(match expr {
            Expr::Ref(name) => env.get(name)?,
            Expr::Literal(v) => self.constant(v, env.lanes),
            Expr::Unary(op, x) => {
                let x = self.expr(x, env, ok)?;
                match op {
                    UnaryOp::Neg => x.neg(),
                    UnaryOp::Abs => x.abs(),
                    UnaryOp::Sqrt => x.sqrt(),
                    UnaryOp::Exp => x.exp(),
                    UnaryOp::Log => x.log(),
                    UnaryOp::Sin => x.sin(),
                    UnaryOp::Cos => x.cos(),
                    UnaryOp::Floor => x.floor(),
                }
            }
            Expr::Binary(op, a, b) => {
                let (a, b) = broadcast(self.expr(a, env, ok)?, self.expr(b, env, ok)?);
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Min => a.min_pair(b),
                    BinaryOp::Max => a.max_pair(b),
                    BinaryOp::Pow => a.powf(b),
                }
            }
            Expr::Compare(op, a, b) => {
                let (a, b) = broadcast(self.expr(a, env, ok)?, self.expr(b, env, ok)?);
                let mask = match op {
                    CompareOp::Lt => a.lower(b),
                    CompareOp::Le => a.lower_equal(b),
                    CompareOp::Gt => a.greater(b),
                    CompareOp::Ge => a.greater_equal(b),
                    CompareOp::Eq => a.equal(b),
                    CompareOp::Ne => a.not_equal(b),
                };
                mask.float()
            }
            Expr::Extract(x, k) => self.expr(x, env, ok)?.narrow(1, *k, 1),
            Expr::Gather(x, i) => {
                let x = self.expr(x, env, ok)?;
                let index = self.expr(i, env, ok)?;
                let n = width(&x);
                if n == 0 {
                    *ok = ok.clone() * 0.0;
                    return Ok(Tensor::full([env.lanes, 1], f32::NAN, &self.device));
                }
                let valid = index.clone().greater_equal_elem(0.0).float()
                    * index.clone().lower_elem(n as f32).float();
                *ok = ok.clone() * valid;
                let clamped = index.clamp(0.0, (n - 1) as f32).floor().int();
                x.gather(1, clamped)
            }
            Expr::Pack(items) => {
                let columns = items
                    .iter()
                    .map(|x| self.expr(x, env, ok))
                    .collect::<Result<Vec<_>>>()?;
                if columns.is_empty() {
                    Tensor::zeros([env.lanes, 0], &self.device)
                } else {
                    Tensor::cat(columns, 1)
                }
            }
        })
    }

    /// Run `scope`'s declarations, narrowing `ok` to lanes that stay defined.
    fn block(&self, scope: &Scope, env: &mut Env, ok: &mut Lanes) -> Result<()> {
        for decl in &scope.declarations {
            let (name, value) = match decl {
                Declaration::Let { name, expr, .. } => (name, self.expr(expr, env, ok)?),
                Declaration::Guard {
                    name, cond, value, ..
                } => {
                    let cond = self.expr(cond, env, ok)?;
                    *ok = ok.clone() * cond.not_equal_elem(0.0).float();
                    (name, self.expr(value, env, ok)?)
                }
                Declaration::Branch {
                    name,
                    shape,
                    cond,
                    then_scope,
                    else_scope,
                } => {
                    let taken = self.expr(cond, env, ok)?.not_equal_elem(0.0);
                    let (then_value, then_ok) = self.nested(then_scope, env)?;
                    let (else_value, else_ok) = self.nested(else_scope, env)?;
                    let wide = taken.clone().expand([env.lanes, shape.size()]);
                    *ok = ok.clone() * else_ok.mask_where(taken, then_ok);
                    (name, else_value.mask_where(wide, then_value))
                }
                Declaration::Reduce {
                    name,
                    op,
                    extent,
                    body,
                } => {
                    let operand = plain_operand(body)
                        .ok_or_else(|| EngineError::unsupported("reduce", name.clone()))?;
                    let operand = env.get(operand)?;
                    if width(&operand) != *extent {
                        return Err(EngineError::compile(format!(
                            "reduce {} spans {} element(s) over an operand of {}",
                            name,
                            extent,
                            width(&operand)
                        )));
                    }
                    let value = if *extent == 0 {
                        let identity = crate::graph::eval::reduce_identity(*op) as f32;
                        Tensor::full([env.lanes, 1], identity, &self.device)
                    } else {
                        match op {
                            ReduceOp::Sum => operand.sum_dim(1),
                            ReduceOp::Product => operand.prod_dim(1),
                            ReduceOp::Max => operand.max_dim(1),
                            ReduceOp::Min => operand.min_dim(1),
                        }
                    };
                    (name, value)
                }
            };
            env.values.insert(name.clone(), value);
        }
        Ok(())
    }

    /// Evaluate a branch arm on every lane; returns its value and validity.
    fn nested(&self, scope: &Scope, env: &mut Env) -> Result<(Lanes, Lanes)> {
        let mut ok = Tensor::ones([env.lanes, 1], &self.device);
        self.block(scope, env, &mut ok)?;
        let output = scope
            .outputs
            .first()
            .ok_or_else(|| EngineError::compile(format!("{} has no output", scope.name)))?;
        Ok((env.get(output)?, ok))
    }

    fn run(&self, inputs: Vec<Lanes>, lanes: usize) -> Result<(Vec<Lanes>, Lanes)> {
        let mut env = Env {
            lanes,
            values: HashMap::new(),
        };
        for (binding, tensor) in self.scope.externals().into_iter().zip(inputs) {
            if let ArgumentSource::External { .. } = binding.source {
                env.values.insert(binding.name.clone(), tensor);
            }
        }
        let mut ok = Tensor::ones([lanes, 1], &self.device);
        self.block(&self.scope, &mut env, &mut ok)?;
        let outputs = self
            .scope
            .outputs
            .iter()
            .map(|o| env.get(o))
            .collect::<Result<_>>()?;
        Ok((outputs, ok))
    }

    fn lane_input(&self, input: &LaneInput<'_>, shape: &Shape, lanes: usize) -> Lanes {
        match input {
            LaneInput::Varying(data) => {
                let data: Vec<f32> = data.iter().map(|&x| x as f32).collect();
                Tensor::from_data(TensorData::new(data, [lanes, shape.size()]), &self.device)
            }
            LaneInput::Invariant(v) => self.constant(v, lanes),
        }
    }
}

fn read_back(tensor: Lanes) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| EngineError::resource(format!("tensor read-back failed: {:?}", e)))
}

impl InstructionSet for TensorProgram {
    fn invoke(&self, arguments: &[Value]) -> Result<Vec<Value>> {
        let inputs = arguments.iter().map(|v| self.constant(v, 1)).collect();
        let (outputs, ok) = self.run(inputs, 1)?;
        if read_back(ok)?.first().copied().unwrap_or(0.0) == 0.0 {
            return Err(EngineError::undefined("lane undefined in tensor evaluation"));
        }
        let shapes = self.scope.output_shapes()?;
        outputs
            .into_iter()
            .zip(shapes)
            .map(|(t, shape)| {
                let data = read_back(t)?.into_iter().map(f64::from).collect();
                Value::new(shape, data)
            })
            .collect()
    }

    fn invoke_lanes(&self, batch: &LaneBatch<'_>, record_len: usize) -> Result<LaneResults> {
        let lanes = batch.lanes();
        if lanes == 0 {
            return Ok(LaneResults {
                record_len,
                data: Vec::new(),
                defined: Vec::new(),
            });
        }
        let inputs = batch
            .parameters()
            .iter()
            .zip(batch.inputs())
            .map(|(p, input)| self.lane_input(input, &p.shape, lanes))
            .collect();
        let (outputs, ok) = self.run(inputs, lanes)?;
        let defined: Vec<bool> = read_back(ok)?.into_iter().map(|x| x != 0.0).collect();
        let columns = outputs
            .into_iter()
            .map(|t| {
                let w = width(&t);
                Ok((w, read_back(t)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut data = Vec::with_capacity(lanes * record_len);
        for (lane, is_defined) in defined.iter().enumerate() {
            for (w, column) in &columns {
                let row = &column[lane * w..(lane + 1) * w];
                if *is_defined {
                    data.extend(row.iter().map(|&x| f64::from(x)));
                } else {
                    data.extend(std::iter::repeat(f64::NAN).take(*w));
                }
            }
        }
        Ok(LaneResults {
            record_len,
            data,
            defined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::ir::{lower, NamingAuthority};

    fn scope_of(graph: &Graph, roots: &[crate::graph::NodeId]) -> Scope {
        lower(graph, roots, &mut NamingAuthority::default()).unwrap()
    }

    #[test]
    fn test_rejects_double_precision() {
        let mut g = Graph::new();
        let x = g.argument("x", Shape::scalar()).unwrap();
        let mut policy = Policy::tensor();
        policy.precision = Precision::Double;
        let err = TensorBackend::new(policy)
            .deliver(&scope_of(&g, &[x]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Compile(_)));
    }

    #[test]
    fn test_vector_arithmetic_and_reduce() {
        let mut g = Graph::new();
        let v = g.argument("v", Shape::vector(3)).unwrap();
        let two = g.scalar(2.0);
        let scaled = g.mul(v, two).unwrap();
        let total = g.reduce(ReduceOp::Sum, scaled).unwrap();

        let exe = TensorBackend::default().deliver(&scope_of(&g, &[total])).unwrap();
        let out = exe.invoke(&[Value::vector(vec![1.0, 2.0, 3.5])]).unwrap();
        assert_eq!(out[0].as_scalar(), Some(13.0));
    }

    #[test]
    fn test_out_of_range_gather_marks_lane_undefined() {
        let mut g = Graph::new();
        let v = g.argument("v", Shape::vector(2)).unwrap();
        let i = g.argument("i", Shape::scalar()).unwrap();
        let e = g.gather(v, i).unwrap();

        let exe = TensorBackend::default().deliver(&scope_of(&g, &[e])).unwrap();
        let table = Value::vector(vec![4.0, 8.0]);
        let indices = [1.0, 2.0, 0.0];
        let batch = LaneBatch::new(
            exe.signature(),
            vec![LaneInput::Invariant(&table), LaneInput::Varying(&indices)],
            3,
        )
        .unwrap();
        let results = exe.invoke_lanes(&batch).unwrap();
        assert_eq!(results.defined, vec![true, false, true]);
        assert_eq!(results.lane(0), &[8.0]);
        assert!(results.lane(1)[0].is_nan());
        assert_eq!(results.lane(2), &[4.0]);
    }

    #[test]
    fn test_branch_failure_only_counts_when_taken() {
        let mut g = Graph::new();
        let x = g.argument("x", Shape::scalar()).unwrap();
        let zero = g.scalar(0.0);
        let positive = g.compare(CompareOp::Gt, x, zero).unwrap();
        let guarded = g.guard(positive, x).unwrap();
        let fallback = g.scalar(-1.0);
        let s = g.select(positive, guarded, fallback).unwrap();

        let exe = TensorBackend::default().deliver(&scope_of(&g, &[s])).unwrap();
        let xs = [3.0, -2.0];
        let batch = LaneBatch::new(exe.signature(), vec![LaneInput::Varying(&xs)], 2).unwrap();
        let results = exe.invoke_lanes(&batch).unwrap();
        assert_eq!(results.defined, vec![true, true]);
        assert_eq!(results.data, vec![3.0, -1.0]);
    }
}

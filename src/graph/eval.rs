//! Reference semantics of every operation on concrete values.
//!
//! Constant folding and the interpreter backend both evaluate through
//! these functions, so a folded literal is bit-identical to what the
//! interpreter would have computed at run time.

use super::{BinaryOp, CompareOp, OpKind, ReduceOp, Shape, UnaryOp, Value};
use crate::config::Precision;
use crate::error::{EngineError, Result};

pub fn unary(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Abs => x.abs(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Floor => x.floor(),
    }
}

pub fn binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
        BinaryOp::Pow => a.powf(b),
    }
}

pub fn compare(op: CompareOp, a: f64, b: f64) -> f64 {
    let r = match op {
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
    };
    if r {
        1.0
    } else {
        0.0
    }
}

pub fn reduce_identity(op: ReduceOp) -> f64 {
    match op {
        ReduceOp::Sum => 0.0,
        ReduceOp::Product => 1.0,
        ReduceOp::Max => f64::NEG_INFINITY,
        ReduceOp::Min => f64::INFINITY,
    }
}

pub fn reduce_step(op: ReduceOp, acc: f64, x: f64) -> f64 {
    match op {
        ReduceOp::Sum => acc + x,
        ReduceOp::Product => acc * x,
        ReduceOp::Max => acc.max(x),
        ReduceOp::Min => acc.min(x),
    }
}

/// Resolve a dynamic index into `[0, len)`.
pub fn gather_index(index: f64, len: usize) -> Result<usize> {
    if index >= 0.0 && index < len as f64 {
        Ok(index as usize)
    } else {
        Err(EngineError::undefined(format!(
            "gather index {} outside [0, {})",
            index, len
        )))
    }
}

pub fn is_true(cond: f64) -> bool {
    cond != 0.0
}

/// Elementwise combination with scalar broadcast.
pub fn zip(a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    let shape: Shape = if a.shape().is_scalar() {
        b.shape().clone()
    } else {
        a.shape().clone()
    };
    let mut out = Value::filled(shape, 0.0);
    for (i, slot) in out.data_mut().iter_mut().enumerate() {
        *slot = f(a.element(i), b.element(i));
    }
    out
}

/// Evaluate one non-source operation on concrete inputs.
///
/// `Select` evaluates eagerly here; lazy branch evaluation is the
/// lowering's job.
pub fn apply(op: &OpKind, inputs: &[&Value]) -> Result<Value> {
    match op {
        OpKind::Constant | OpKind::Argument(_) => Err(EngineError::compile(format!(
            "'{}' has no evaluation rule",
            op
        ))),
        OpKind::Unary(u) => Ok(inputs[0].map(|x| unary(*u, x))),
        OpKind::Binary(b) => Ok(zip(inputs[0], inputs[1], |x, y| binary(*b, x, y))),
        OpKind::Compare(c) => Ok(zip(inputs[0], inputs[1], |x, y| compare(*c, x, y))),
        OpKind::Extract(i) => Ok(Value::scalar(inputs[0].data()[*i])),
        OpKind::Gather => {
            let v = inputs[0];
            let idx = inputs[1].element(0);
            let i = gather_index(idx, v.data().len())?;
            Ok(Value::scalar(v.data()[i]))
        }
        OpKind::Pack => Ok(Value::vector(inputs.iter().map(|v| v.element(0)).collect())),
        OpKind::Select => {
            if is_true(inputs[0].element(0)) {
                Ok(inputs[1].clone())
            } else {
                Ok(inputs[2].clone())
            }
        }
        OpKind::Guard => {
            if is_true(inputs[0].element(0)) {
                Ok(inputs[1].clone())
            } else {
                Err(EngineError::undefined("guard condition failed"))
            }
        }
        OpKind::Reduce(r) => {
            let acc = inputs[0]
                .data()
                .iter()
                .fold(reduce_identity(*r), |acc, &x| reduce_step(*r, acc, x));
            Ok(Value::scalar(acc))
        }
    }
}

/// Evaluate `op` at a backend's precision: inputs, every reduction step
/// and the result are rounded exactly as the interpreter rounds them.
pub fn apply_at(op: &OpKind, inputs: &[&Value], precision: Precision) -> Result<Value> {
    if precision == Precision::Double {
        return apply(op, inputs);
    }
    let rounded: Vec<Value> = inputs.iter().map(|v| v.map(|x| precision.round(x))).collect();
    let refs: Vec<&Value> = rounded.iter().collect();
    let value = match op {
        OpKind::Reduce(r) => {
            let acc = refs[0]
                .data()
                .iter()
                .fold(reduce_identity(*r), |acc, &x| precision.round(reduce_step(*r, acc, x)));
            Value::scalar(acc)
        }
        _ => apply(op, &refs)?,
    };
    Ok(value.map(|x| precision.round(x)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_broadcast() {
        let v = Value::vector(vec![1.0, 2.0, 3.0]);
        let s = Value::scalar(10.0);
        let r = apply(&OpKind::Binary(BinaryOp::Mul), &[&s, &v]).unwrap();
        assert_eq!(r.data(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_gather_out_of_range_is_lane_local() {
        let v = Value::vector(vec![1.0, 2.0]);
        let err = apply(&OpKind::Gather, &[&v, &Value::scalar(2.0)]).unwrap_err();
        assert!(err.is_lane_local());
        let err = apply(&OpKind::Gather, &[&v, &Value::scalar(f64::NAN)]).unwrap_err();
        assert!(err.is_lane_local());
        let ok = apply(&OpKind::Gather, &[&v, &Value::scalar(1.7)]).unwrap();
        assert_eq!(ok.as_scalar(), Some(2.0));
    }

    #[test]
    fn test_reduce_identities() {
        let v = Value::vector(vec![3.0, -1.0, 2.0]);
        let max = apply(&OpKind::Reduce(ReduceOp::Max), &[&v]).unwrap();
        assert_eq!(max.as_scalar(), Some(3.0));
        let prod = apply(&OpKind::Reduce(ReduceOp::Product), &[&v]).unwrap();
        assert_eq!(prod.as_scalar(), Some(-6.0));
    }

    #[test]
    fn test_single_precision_rounds_operands_and_result() {
        let big = Value::scalar(1e8);
        let one = Value::scalar(1.0);
        let add = OpKind::Binary(BinaryOp::Add);
        let wide = apply_at(&add, &[&big, &one], Precision::Double).unwrap();
        assert_eq!(wide.as_scalar(), Some(100_000_001.0));
        let narrow = apply_at(&add, &[&big, &one], Precision::Single).unwrap();
        assert_eq!(narrow.as_scalar(), Some(1e8));

        let third = apply_at(&OpKind::Unary(UnaryOp::Neg), &[&Value::scalar(0.1)], Precision::Single)
            .unwrap();
        assert_eq!(third.as_scalar(), Some(-(0.1f32 as f64)));
    }

    #[test]
    fn test_single_precision_reduction_rounds_each_step() {
        let v = Value::vector(vec![1e8, 1.0, 1.0, -1e8]);
        let sum = OpKind::Reduce(ReduceOp::Sum);
        assert_eq!(apply_at(&sum, &[&v], Precision::Double).unwrap().as_scalar(), Some(2.0));
        assert_eq!(apply_at(&sum, &[&v], Precision::Single).unwrap().as_scalar(), Some(0.0));
    }

    #[test]
    fn test_guard() {
        let v = Value::scalar(4.0);
        assert!(apply(&OpKind::Guard, &[&Value::scalar(1.0), &v]).is_ok());
        assert!(apply(&OpKind::Guard, &[&Value::scalar(0.0), &v])
            .unwrap_err()
            .is_lane_local());
    }
}

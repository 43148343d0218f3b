//! Shape inference table.
//!
//! `infer` is a total, pure function of the operation kind and the input
//! shapes. Source operations (constants, arguments) carry declared shapes
//! and are not inferred here.

use super::{OpKind, Shape};
use crate::error::{EngineError, Result};

/// Infer the output shape of `op` applied to inputs of the given shapes.
pub fn infer(op: &OpKind, inputs: &[&Shape]) -> Result<Shape> {
    match op {
        OpKind::Constant | OpKind::Argument(_) => Err(EngineError::shape(format!(
            "'{}' takes its shape from its declaration",
            op
        ))),
        OpKind::Unary(_) => {
            expect_arity(op, inputs, 1)?;
            Ok(inputs[0].clone())
        }
        OpKind::Binary(_) | OpKind::Compare(_) => {
            expect_arity(op, inputs, 2)?;
            elementwise(op, inputs[0], inputs[1])
        }
        OpKind::Extract(index) => {
            expect_arity(op, inputs, 1)?;
            let target = inputs[0];
            if target.rank() != 1 {
                return Err(EngineError::shape(format!(
                    "invalid index target: '{}' needs a rank-1 input, got {}",
                    op, target
                )));
            }
            if *index >= target.dims()[0] {
                return Err(EngineError::shape(format!(
                    "invalid index target: index {} outside {}",
                    index, target
                )));
            }
            Ok(Shape::scalar())
        }
        OpKind::Gather => {
            expect_arity(op, inputs, 2)?;
            if inputs[0].rank() != 1 {
                return Err(EngineError::shape(format!(
                    "invalid index target: 'gather' needs a rank-1 input, got {}",
                    inputs[0]
                )));
            }
            expect_scalar(op, "index", inputs[1])?;
            Ok(Shape::scalar())
        }
        OpKind::Pack => {
            if inputs.is_empty() {
                return Err(EngineError::shape("'pack' needs at least one input"));
            }
            for (i, s) in inputs.iter().enumerate() {
                if !s.is_scalar() {
                    return Err(EngineError::shape(format!(
                        "'pack' input {} must be a scalar, got {}",
                        i, s
                    )));
                }
            }
            Ok(Shape::vector(inputs.len()))
        }
        OpKind::Select => {
            expect_arity(op, inputs, 3)?;
            expect_scalar(op, "condition", inputs[0])?;
            if inputs[1] != inputs[2] {
                return Err(EngineError::shape(format!(
                    "'select' branches differ: {} vs {}",
                    inputs[1], inputs[2]
                )));
            }
            Ok(inputs[1].clone())
        }
        OpKind::Guard => {
            expect_arity(op, inputs, 2)?;
            expect_scalar(op, "condition", inputs[0])?;
            Ok(inputs[1].clone())
        }
        OpKind::Reduce(_) => {
            expect_arity(op, inputs, 1)?;
            Ok(Shape::scalar())
        }
    }
}

/// Elementwise result shape: equal shapes, or a scalar broadcast.
fn elementwise(op: &OpKind, a: &Shape, b: &Shape) -> Result<Shape> {
    if a == b {
        Ok(a.clone())
    } else if a.is_scalar() {
        Ok(b.clone())
    } else if b.is_scalar() {
        Ok(a.clone())
    } else {
        Err(EngineError::shape(format!(
            "elementwise shape mismatch in '{}': {} vs {}",
            op, a, b
        )))
    }
}

fn expect_arity(op: &OpKind, inputs: &[&Shape], n: usize) -> Result<()> {
    if inputs.len() != n {
        return Err(EngineError::shape(format!(
            "'{}' expects {} input(s), got {}",
            op,
            n,
            inputs.len()
        )));
    }
    Ok(())
}

fn expect_scalar(op: &OpKind, what: &str, shape: &Shape) -> Result<()> {
    if !shape.is_scalar() {
        return Err(EngineError::shape(format!(
            "'{}' {} must be a scalar, got {}",
            op, what, shape
        )));
    }
    Ok(())
}

//! Well-formedness checks for lowered scopes.
//!
//! A scope is well formed when every name is defined once across the whole
//! tree, every read refers to an argument or an earlier declaration of the
//! same scope, every capture resolves in the parent, declared shapes match
//! their expressions, and outputs are bound. Backends call this before
//! building anything, so malformed input fails with a `CompileError`.

use std::collections::{HashMap, HashSet};

use super::{ArgumentSource, Declaration, Scope};
use crate::error::{EngineError, Result};
use crate::graph::Shape;

/// Validate a root scope.
pub fn validate(scope: &Scope) -> Result<()> {
    let mut defined = HashSet::new();
    let mut positions = Vec::new();
    for b in &scope.arguments {
        match &b.source {
            ArgumentSource::External { position, .. } => positions.push(*position),
            ArgumentSource::Capture => {
                return Err(EngineError::compile(format!(
                    "root scope {} captures '{}'",
                    scope.name, b.name
                )))
            }
            ArgumentSource::Counter => {
                return Err(EngineError::compile(format!(
                    "root scope {} binds counter '{}'",
                    scope.name, b.name
                )))
            }
        }
    }
    positions.sort_unstable();
    if positions.iter().enumerate().any(|(i, p)| i != *p) {
        return Err(EngineError::compile(format!(
            "external positions of {} are not 0..{}",
            scope.name,
            positions.len()
        )));
    }
    check_scope(scope, &HashMap::new(), Kind::Root, &mut defined)
}

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    Root,
    Branch,
    Body,
}

fn check_scope(
    scope: &Scope,
    parent: &HashMap<&str, Shape>,
    kind: Kind,
    defined: &mut HashSet<String>,
) -> Result<()> {
    let err = |msg: String| EngineError::compile(format!("{}: {}", scope.name, msg));
    let mut env: HashMap<&str, Shape> = HashMap::new();

    for b in &scope.arguments {
        match &b.source {
            ArgumentSource::Capture => match parent.get(b.name.as_str()) {
                Some(shape) if *shape == b.shape => {}
                Some(shape) => {
                    return Err(err(format!(
                        "capture '{}' declared {} but bound as {}",
                        b.name, b.shape, shape
                    )))
                }
                None => {
                    return Err(err(format!(
                        "capture '{}' is not bound in the enclosing scope",
                        b.name
                    )))
                }
            },
            ArgumentSource::Counter => {
                if kind != Kind::Body {
                    return Err(err(format!("counter '{}' outside a reduction", b.name)));
                }
                if !b.shape.is_scalar() {
                    return Err(err(format!("counter '{}' must be a scalar", b.name)));
                }
                define(defined, &b.name).map_err(err)?;
            }
            ArgumentSource::External { .. } => {
                if kind != Kind::Root {
                    return Err(err(format!("nested scope binds external '{}'", b.name)));
                }
                define(defined, &b.name).map_err(err)?;
            }
        }
        if env.insert(&b.name, b.shape.clone()).is_some() {
            return Err(err(format!("argument '{}' bound twice", b.name)));
        }
    }

    for decl in &scope.declarations {
        let lookup = |name: &str| env.get(name).cloned();
        match decl {
            Declaration::Let { name, shape, expr } => {
                let actual = expr.shape(&lookup).map_err(|e| err(format!("{}: {}", name, e)))?;
                if actual != *shape {
                    return Err(err(format!(
                        "'{}' declared {} but computes {}",
                        name, shape, actual
                    )));
                }
            }
            Declaration::Guard {
                name,
                shape,
                cond,
                value,
            } => {
                expect_scalar(&cond.shape(&lookup).map_err(|e| err(e.to_string()))?, name)
                    .map_err(err)?;
                let actual = value.shape(&lookup).map_err(|e| err(e.to_string()))?;
                if actual != *shape {
                    return Err(err(format!(
                        "guard '{}' declared {} but yields {}",
                        name, shape, actual
                    )));
                }
            }
            Declaration::Branch {
                name,
                shape,
                cond,
                then_scope,
                else_scope,
            } => {
                expect_scalar(&cond.shape(&lookup).map_err(|e| err(e.to_string()))?, name)
                    .map_err(err)?;
                for sub in [then_scope, else_scope] {
                    check_scope(sub, &env, Kind::Branch, defined)?;
                    let outs = sub.output_shapes()?;
                    if outs.len() != 1 || outs[0] != *shape {
                        return Err(err(format!(
                            "branch '{}' expects one {} output from {}",
                            name, shape, sub.name
                        )));
                    }
                }
            }
            Declaration::Reduce { name, body, .. } => {
                if body.counter().is_none() {
                    return Err(err(format!("reduction '{}' has no counter", name)));
                }
                check_scope(body, &env, Kind::Body, defined)?;
                let outs = body.output_shapes()?;
                if outs.len() != 1 || !outs[0].is_scalar() {
                    return Err(err(format!(
                        "reduction '{}' body must produce one scalar",
                        name
                    )));
                }
            }
        }
        define(defined, decl.name()).map_err(err)?;
        env.insert(decl.name(), decl.shape());
    }

    if scope.outputs.is_empty() {
        return Err(err("no outputs".to_string()));
    }
    for out in &scope.outputs {
        if !env.contains_key(out.as_str()) {
            return Err(err(format!("output '{}' is not bound", out)));
        }
    }
    Ok(())
}

fn define(defined: &mut HashSet<String>, name: &str) -> std::result::Result<(), String> {
    if defined.insert(name.to_string()) {
        Ok(())
    } else {
        Err(format!("duplicate name '{}'", name))
    }
}

fn expect_scalar(shape: &Shape, name: &str) -> std::result::Result<(), String> {
    if shape.is_scalar() {
        Ok(())
    } else {
        Err(format!("condition of '{}' must be a scalar, got {}", name, shape))
    }
}

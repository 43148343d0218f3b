//! Dead-binding elimination over lowered scopes.
//!
//! Drops declarations not transitively read by the scope's outputs, and
//! captures nobody reads. Declarations that can leave a lane undefined are
//! kept even when unread. External and counter bindings are never removed.

use std::collections::HashSet;

use crate::ir::{ArgumentSource, Declaration, Scope};

pub fn eliminate_dead_bindings(scope: &Scope) -> Scope {
    let declarations: Vec<Declaration> = scope.declarations.iter().map(prune_nested).collect();

    let mut live: HashSet<&str> = scope.outputs.iter().map(String::as_str).collect();
    let mut keep = vec![false; declarations.len()];
    for (i, decl) in declarations.iter().enumerate().rev() {
        if live.contains(decl.name()) || decl.may_fail() {
            keep[i] = true;
            decl.for_each_read(&mut |name| {
                live.insert(name);
            });
        }
    }

    let arguments = scope
        .arguments
        .iter()
        .filter(|b| b.source != ArgumentSource::Capture || live.contains(b.name.as_str()))
        .cloned()
        .collect();
    let declarations = declarations
        .iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(d, _)| d.clone())
        .collect();

    Scope {
        name: scope.name.clone(),
        arguments,
        declarations,
        outputs: scope.outputs.clone(),
    }
}

fn prune_nested(decl: &Declaration) -> Declaration {
    match decl {
        Declaration::Branch {
            name,
            shape,
            cond,
            then_scope,
            else_scope,
        } => Declaration::Branch {
            name: name.clone(),
            shape: shape.clone(),
            cond: cond.clone(),
            then_scope: eliminate_dead_bindings(then_scope),
            else_scope: eliminate_dead_bindings(else_scope),
        },
        Declaration::Reduce {
            name,
            op,
            extent,
            body,
        } => Declaration::Reduce {
            name: name.clone(),
            op: *op,
            extent: *extent,
            body: eliminate_dead_bindings(body),
        },
        other => other.clone(),
    }
}

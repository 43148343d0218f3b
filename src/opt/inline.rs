//! Single-use inlining.
//!
//! A scalar `Let` read exactly once, directly by a later scalar `Let`,
//! `Guard` or branch condition of the same scope, is substituted into its
//! reader and removed. Names read by outputs or captured by nested scopes
//! are never inlined. Repeats until no candidate remains.

use crate::ir::{Declaration, Expr, Scope};

pub fn inline_single_use(scope: &Scope) -> Scope {
    let mut declarations: Vec<Declaration> = scope.declarations.iter().map(inline_nested).collect();
    while let Some((from, into)) = find_candidate(&declarations, &scope.outputs) {
        let removed = declarations.remove(from);
        if let Declaration::Let { name, expr, .. } = removed {
            substitute(&mut declarations[into - 1], &name, &expr);
        }
    }
    Scope {
        name: scope.name.clone(),
        arguments: scope.arguments.clone(),
        declarations,
        outputs: scope.outputs.clone(),
    }
}

/// Index of an inlinable `Let` and of its only reader.
fn find_candidate(declarations: &[Declaration], outputs: &[String]) -> Option<(usize, usize)> {
    for (i, decl) in declarations.iter().enumerate() {
        let Declaration::Let { name, shape, .. } = decl else {
            continue;
        };
        if !shape.is_scalar() || outputs.iter().any(|o| o == name) {
            continue;
        }
        let mut total = 0;
        let mut reader = None;
        for (j, later) in declarations.iter().enumerate().skip(i + 1) {
            let mut n = 0;
            later.for_each_read(&mut |r| {
                if r == name.as_str() {
                    n += 1;
                }
            });
            if n > 0 {
                total += n;
                reader = Some(j);
            }
        }
        if total != 1 {
            continue;
        }
        if let Some(j) = reader {
            if accepts_inline(&declarations[j], name) {
                return Some((i, j));
            }
        }
    }
    None
}

fn accepts_inline(decl: &Declaration, name: &str) -> bool {
    match decl {
        Declaration::Let { shape, .. } | Declaration::Guard { shape, .. } => shape.is_scalar(),
        Declaration::Branch { cond, .. } => cond.reads(name) == 1,
        Declaration::Reduce { .. } => false,
    }
}

fn substitute(decl: &mut Declaration, name: &str, replacement: &Expr) {
    match decl {
        Declaration::Let { expr, .. } => expr.substitute(name, replacement),
        Declaration::Guard { cond, value, .. } => {
            cond.substitute(name, replacement);
            value.substitute(name, replacement);
        }
        Declaration::Branch { cond, .. } => cond.substitute(name, replacement),
        Declaration::Reduce { .. } => {}
    }
}

fn inline_nested(decl: &Declaration) -> Declaration {
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
            then_scope: inline_single_use(then_scope),
            else_scope: inline_single_use(else_scope),
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
            body: inline_single_use(body),
        },
        other => other.clone(),
    }
}

//! Naming Authority: collision-free identifiers for one compiled artifact.
//!
//! One authority is threaded explicitly (`&mut NamingAuthority`) through
//! every lowering that contributes to an artifact. Generated and claimed
//! names share one taken-set, so nested scopes and unrelated callers can
//! never produce the same identifier twice.

use std::collections::HashSet;

/// Identifiers no dialect may receive as a variable name.
const RESERVED: &[&str] = &[
    // C / OpenCL
    "int", "uint", "long", "float", "double", "char", "void", "bool", "const", "static",
    "struct", "union", "enum", "if", "else", "for", "while", "do", "return", "switch", "case",
    "break", "continue", "default", "goto", "sizeof", "kernel", "global", "local", "private",
    "restrict", "inline", "signed", "unsigned", "short", "typedef", "volatile",
    // WGSL
    "fn", "let", "var", "loop", "true", "false", "array", "vec2", "vec3", "vec4", "f32", "f64",
    "i32", "u32", "select", "storage", "uniform", "workgroup", "override", "discard", "alias",
    "target",
    // JavaScript
    "function", "new", "this", "null", "undefined", "typeof", "delete", "in", "of", "instanceof",
    "with", "yield", "class", "export", "import", "super", "await", "async", "Math", "NaN",
    "Infinity", "arguments", "eval",
    // Math builtins used unqualified by emitted kernels
    "abs", "sqrt", "exp", "log", "sin", "cos", "floor", "pow", "min", "max", "fmin", "fmax",
    "fabs", "isnan", "isinf", "clamp", "bitcast", "get_global_id",
];

#[derive(Debug, Clone)]
pub struct NamingAuthority {
    prefix: String,
    next: u64,
    taken: HashSet<String>,
}

impl NamingAuthority {
    pub fn new(prefix: &str) -> Self {
        let prefix = sanitize(prefix);
        Self {
            prefix,
            next: 0,
            taken: HashSet::new(),
        }
    }

    /// Next generated name: `{prefix}{n}`.
    pub fn fresh(&mut self) -> String {
        let prefix = self.prefix.clone();
        self.next_with(|n| format!("{}{}", prefix, n))
    }

    /// Generated name derived from a hint: `{hint}_{n}`.
    pub fn fresh_hinted(&mut self, hint: &str) -> String {
        let hint = sanitize(hint);
        self.next_with(|n| format!("{}_{}", hint, n))
    }

    /// Keep `preferred` verbatim when it is a usable identifier nobody holds,
    /// otherwise fall back to a hinted fresh name.
    pub fn claim(&mut self, preferred: &str) -> String {
        if is_identifier(preferred)
            && !RESERVED.contains(&preferred)
            && !self.taken.contains(preferred)
        {
            self.taken.insert(preferred.to_string());
            return preferred.to_string();
        }
        self.fresh_hinted(preferred)
    }

    /// Number of names handed out so far.
    pub fn issued(&self) -> usize {
        self.taken.len()
    }

    fn next_with(&mut self, make: impl Fn(u64) -> String) -> String {
        loop {
            let name = make(self.next);
            self.next += 1;
            if !self.taken.contains(&name) && !RESERVED.contains(&name.as_str()) {
                self.taken.insert(name.clone());
                return name;
            }
        }
    }
}

impl Default for NamingAuthority {
    fn default() -> Self {
        Self::new("v")
    }
}

/// ASCII letter first, then letters, digits or underscores.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn sanitize(hint: &str) -> String {
    let cleaned: String = hint
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches(|c: char| c == '_' || c.is_ascii_digit());
    if trimmed.is_empty() {
        "n".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_is_monotonic() {
        let mut names = NamingAuthority::new("v");
        assert_eq!(names.fresh(), "v0");
        assert_eq!(names.fresh_hinted("kernel"), "kernel_1");
        assert_eq!(names.fresh(), "v2");
        assert_eq!(names.issued(), 3);
    }

    #[test]
    fn test_claim_keeps_good_names() {
        let mut names = NamingAuthority::new("v");
        assert_eq!(names.claim("x"), "x");
        assert_eq!(names.claim("x"), "x_0");
        assert_eq!(names.claim("float"), "float_1");
        assert_eq!(names.claim("2nd arg"), "nd_arg_2");
    }

    #[test]
    fn test_generated_names_skip_claimed() {
        let mut names = NamingAuthority::new("v");
        assert_eq!(names.claim("v0"), "v0");
        assert_eq!(names.fresh(), "v1");
    }

    #[test]
    fn test_prefix_is_sanitized() {
        let mut names = NamingAuthority::new("9-t");
        assert_eq!(names.fresh(), "t0");
    }
}

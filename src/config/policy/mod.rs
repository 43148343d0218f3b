use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Numeric width every artifact of a backend computes in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    /// 32-bit floats.
    Single,
    /// 64-bit floats.
    Double,
}

impl Precision {
    pub fn bits(self) -> u32 {
        match self {
            Precision::Single => 32,
            Precision::Double => 64,
        }
    }

    /// Round a host value to this width.
    pub fn round(self, x: f64) -> f64 {
        match self {
            Precision::Single => x as f32 as f64,
            Precision::Double => x,
        }
    }

    /// Default relative tolerance when comparing results across backends.
    pub fn default_tolerance(self) -> f64 {
        match self {
            Precision::Single => 1e-5,
            Precision::Double => 1e-12,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.bits())
    }
}

/// Target language family of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// Direct interpretation, no emitted source.
    Interpreted,
    /// OpenCL C kernel source.
    OpenCl,
    /// WGSL compute shader source.
    Wgsl,
    /// JavaScript function source.
    JavaScript,
    /// Operations on an external tensor library.
    TensorGraph,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Interpreted => "interpreted",
            Dialect::OpenCl => "opencl",
            Dialect::Wgsl => "wgsl",
            Dialect::JavaScript => "js",
            Dialect::TensorGraph => "tensor",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "interpreted" | "interp" => Some(Dialect::Interpreted),
            "opencl" | "cl" => Some(Dialect::OpenCl),
            "wgsl" => Some(Dialect::Wgsl),
            "js" | "javascript" => Some(Dialect::JavaScript),
            "tensor" => Some(Dialect::TensorGraph),
            _ => None,
        }
    }
}

/// Precision and language policy of one backend instance.
///
/// Immutable once a backend holds it; every artifact the backend
/// produces honors the same policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Short identifier used in CLI and file paths (e.g. "opencl").
    pub name: String,
    /// Human-readable name (e.g. "OpenCL C").
    pub display_name: String,
    pub dialect: Dialect,
    pub precision: Precision,
    /// Relative tolerance for cross-backend agreement.
    pub tolerance: f64,
    /// Prefix for generated identifiers.
    pub identifier_prefix: String,
    /// Lanes per workgroup for kernel dialects.
    pub workgroup_size: u32,
}

impl Policy {
    fn preset(name: &str, display: &str, dialect: Dialect, precision: Precision) -> Self {
        Self {
            name: name.to_string(),
            display_name: display.to_string(),
            dialect,
            precision,
            tolerance: precision.default_tolerance(),
            identifier_prefix: "v".to_string(),
            workgroup_size: 64,
        }
    }

    pub fn interpreter() -> Self {
        Self::preset("interp", "Interpreter (f64)", Dialect::Interpreted, Precision::Double)
    }

    pub fn interpreter_single() -> Self {
        Self::preset("interp-f32", "Interpreter (f32)", Dialect::Interpreted, Precision::Single)
    }

    pub fn opencl() -> Self {
        Self::preset("opencl", "OpenCL C (f64)", Dialect::OpenCl, Precision::Double)
    }

    pub fn opencl_single() -> Self {
        Self::preset("opencl-f32", "OpenCL C (f32)", Dialect::OpenCl, Precision::Single)
    }

    pub fn wgsl() -> Self {
        Self::preset("wgsl", "WGSL compute shader", Dialect::Wgsl, Precision::Single)
    }

    pub fn javascript() -> Self {
        Self::preset("js", "JavaScript", Dialect::JavaScript, Precision::Double)
    }

    pub fn tensor() -> Self {
        Self::preset("tensor", "Tensor graph (burn)", Dialect::TensorGraph, Precision::Single)
    }

    pub fn gpu() -> Self {
        Self::preset("gpu", "GPU (wgpu)", Dialect::Wgsl, Precision::Single)
    }

    /// Names of the built-in policies.
    pub fn builtin_names() -> &'static [&'static str] {
        &["interp", "interp-f32", "opencl", "opencl-f32", "wgsl", "js", "tensor", "gpu"]
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "interp" => Some(Self::interpreter()),
            "interp-f32" => Some(Self::interpreter_single()),
            "opencl" => Some(Self::opencl()),
            "opencl-f32" => Some(Self::opencl_single()),
            "wgsl" => Some(Self::wgsl()),
            "js" => Some(Self::javascript()),
            "tensor" => Some(Self::tensor()),
            "gpu" => Some(Self::gpu()),
            _ => None,
        }
    }

    /// Stable text used to key caches on this policy.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{:e}|{}|{}",
            self.name,
            self.dialect.name(),
            self.precision,
            self.tolerance,
            self.identifier_prefix,
            self.workgroup_size
        )
    }

    /// Load a policy from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("cannot read policy '{}': {}", path.display(), e))
        })?;
        Self::parse_toml(&content, path)
    }

    /// Resolve a policy by name: built-ins first, then `policies/{name}.toml`
    /// next to the binary or in the working directory.
    pub fn resolve(name: &str) -> Result<Self> {
        // Reject path traversal
        if name.contains('/') || name.contains('\\') || name.contains("..") || name.starts_with('.')
        {
            return Err(EngineError::config(format!("invalid policy name '{}'", name)));
        }

        if let Some(policy) = Self::builtin(name) {
            return Ok(policy);
        }

        let relative = format!("policies/{}.toml", name);

        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                for base in [Some(dir), dir.parent(), dir.parent().and_then(|p| p.parent())]
                    .into_iter()
                    .flatten()
                {
                    let path = base.join(&relative);
                    if path.exists() {
                        return Self::load(&path);
                    }
                }
            }
        }

        let cwd_path = std::path::PathBuf::from(&relative);
        if cwd_path.exists() {
            return Self::load(&cwd_path);
        }

        Err(EngineError::config(format!(
            "unknown policy '{}' (looked for '{}'; built-ins: {})",
            name,
            relative,
            Self::builtin_names().join(", ")
        )))
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        let err = |msg: String| EngineError::config(format!("{}: {}", path.display(), msg));

        let mut name = String::new();
        let mut display_name = String::new();
        let mut dialect = String::new();
        let mut width: u32 = 0;
        let mut tolerance: Option<f64> = None;
        let mut prefix = String::from("v");
        let mut workgroup_size: u32 = 64;

        let mut section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                let unquoted = value.trim_matches('"');

                match (section.as_str(), key) {
                    ("policy", "name") => name = unquoted.to_string(),
                    ("policy", "display_name") => display_name = unquoted.to_string(),
                    ("policy", "dialect") => dialect = unquoted.to_string(),
                    ("precision", "width") => {
                        width = value
                            .parse()
                            .map_err(|_| err(format!("invalid precision.width: {}", value)))?;
                    }
                    ("precision", "tolerance") => {
                        tolerance = Some(
                            value
                                .parse()
                                .map_err(|_| err(format!("invalid precision.tolerance: {}", value)))?,
                        );
                    }
                    ("emit", "prefix") => prefix = unquoted.to_string(),
                    ("emit", "workgroup_size") => {
                        workgroup_size = value
                            .parse()
                            .map_err(|_| err(format!("invalid emit.workgroup_size: {}", value)))?;
                    }
                    _ => {}
                }
            }
        }

        if name.is_empty() {
            return Err(err("missing policy.name".to_string()));
        }
        let dialect = Dialect::parse(&dialect).ok_or_else(|| {
            err(format!(
                "unknown dialect '{}' (expected 'interpreted', 'opencl', 'wgsl', 'js', or 'tensor')",
                dialect
            ))
        })?;
        let precision = match width {
            32 => Precision::Single,
            64 => Precision::Double,
            other => return Err(err(format!("precision.width must be 32 or 64, got {}", other))),
        };
        if workgroup_size == 0 {
            return Err(err("emit.workgroup_size must be > 0".to_string()));
        }
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
            return Err(err(format!("emit.prefix must be a letter prefix, got '{}'", prefix)));
        }

        Ok(Self {
            display_name: if display_name.is_empty() {
                name.clone()
            } else {
                display_name
            },
            name,
            dialect,
            precision,
            tolerance: tolerance.unwrap_or_else(|| precision.default_tolerance()),
            identifier_prefix: prefix,
            workgroup_size,
        })
    }
}

pub mod batch;
pub mod emit;
pub mod eval;
pub mod hash;

use std::collections::HashMap;
use std::path::Path;
use std::process;

use prism::api::{load_source, Defined, Engine, EngineOptions};
use prism::graph::{Shape, Value};
use prism::opt::OptLevel;
use tracing_subscriber::EnvFilter;

/// Log filter from `PRISM_LOG`, then `RUST_LOG`, else warnings only.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("PRISM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Read and build a source file, or exit after rendering diagnostics.
pub fn load_and_build(path: &Path) -> Defined {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    };
    match load_source(&source, &path.to_string_lossy()) {
        Ok(defined) => defined,
        Err(errors) => {
            eprintln!("error: {} problem(s) in '{}'", errors.len(), path.display());
            process::exit(1);
        }
    }
}

pub fn opt_level(opt: u8) -> OptLevel {
    match OptLevel::from_number(opt) {
        Some(level) => level,
        None => {
            eprintln!("error: optimization level must be 0, 1 or 2 (got {})", opt);
            process::exit(1);
        }
    }
}

pub fn engine(options: EngineOptions) -> Engine {
    Engine::with_options(options)
}

/// Exit with a message on any engine error.
pub fn or_exit<T>(result: prism::Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

/// Parse `name=v1,v2,...` flags.
pub fn parse_arg_flags(flags: &[String]) -> HashMap<String, Vec<f64>> {
    let mut out = HashMap::new();
    for flag in flags {
        let Some((name, values)) = flag.split_once('=') else {
            eprintln!("error: --arg expects NAME=VALUES, got '{}'", flag);
            process::exit(1);
        };
        let parsed: Result<Vec<f64>, _> = values.split(',').map(|v| v.trim().parse::<f64>()).collect();
        match parsed {
            Ok(v) => {
                out.insert(name.trim().to_string(), v);
            }
            Err(e) => {
                eprintln!("error: bad value in --arg {}: {}", name, e);
                process::exit(1);
            }
        }
    }
    out
}

/// A value of `shape` from flag data; a single number fills every element.
pub fn value_for(name: &str, shape: &Shape, data: &[f64]) -> Value {
    let data = if data.len() == 1 {
        vec![data[0]; shape.size()]
    } else {
        data.to_vec()
    };
    match Value::new(shape.clone(), data) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: argument '{}': {}", name, e);
            process::exit(1);
        }
    }
}

pub fn format_values(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|&x| prism::graph::format_float(x)).collect();
    parts.join(", ")
}

pub fn cmd_targets() {
    let engine = Engine::new();
    for backend in engine.registry().iter() {
        let policy = backend.policy();
        println!(
            "  {:<12} {:<12} {:?} ({})",
            backend.name(),
            policy.dialect.name(),
            policy.precision,
            policy.display_name
        );
    }
}

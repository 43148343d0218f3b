use std::path::PathBuf;
use std::process;

use prism::api::EngineOptions;

use super::{engine, format_values, load_and_build, opt_level, or_exit, parse_arg_flags, value_for};

pub fn cmd_eval(input: PathBuf, flags: &[String], target: &str, opt: u8) {
    let defined = load_and_build(&input);
    let mut given = parse_arg_flags(flags);

    let mut arguments = Vec::new();
    for (_, name, shape) in defined.graph().arguments() {
        let Some(data) = given.remove(name) else {
            eprintln!("error: missing --arg {}=... ({})", name, shape);
            process::exit(1);
        };
        arguments.push(value_for(name, shape, &data));
    }
    for name in given.keys() {
        eprintln!("warning: '{}' is not an argument of {}", name, input.display());
    }

    let engine = engine(EngineOptions::default().with_opt_level(opt_level(opt)));
    let outputs = or_exit(engine.evaluate(target, defined.graph(), defined.outputs(), &arguments));
    for value in outputs {
        if value.shape().is_scalar() {
            println!("{}", format_values(value.data()));
        } else {
            println!("[{}]", format_values(value.data()));
        }
    }
}

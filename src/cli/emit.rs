use std::path::PathBuf;

use prism::api::EngineOptions;

use super::{engine, load_and_build, opt_level, or_exit};

pub fn cmd_emit(input: PathBuf, target: &str, opt: u8) {
    let defined = load_and_build(&input);
    let engine = engine(EngineOptions::default().with_opt_level(opt_level(opt)));
    let text = or_exit(engine.emit(target, defined.graph(), defined.outputs()));
    print!("{}", text);
    if !text.ends_with('\n') {
        println!();
    }
}

use std::path::PathBuf;

use prism::config::Precision;
use prism::opt::OptLevel;

use super::{load_and_build, or_exit};

pub fn cmd_hash(input: PathBuf, full: bool) {
    let defined = load_and_build(&input);
    let optimized = or_exit(defined.optimize(OptLevel::O1, Precision::Double));
    let hashes = or_exit(optimized.output_hashes());

    eprintln!("File: {} ({} node(s))", input.display(), optimized.graph().len());
    for (i, hash) in hashes.iter().enumerate() {
        if full {
            println!("  {} out {}", hash.to_hex(), i);
        } else {
            println!("  {} out {}", hash, i);
        }
    }
}

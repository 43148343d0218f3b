mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "prism",
    version,
    about = "Describe a computation once; interpret it, emit it, or run it across lanes."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the kernel source for a target (the scope listing for runnable targets)
    Emit {
        /// Expression source file
        input: PathBuf,
        /// Backend name (see `prism targets`)
        #[arg(long, default_value = "interp")]
        target: String,
        /// Optimization level (0, 1 or 2)
        #[arg(long, default_value_t = 1)]
        opt: u8,
    },
    /// Evaluate once with the given argument values
    Eval {
        /// Expression source file
        input: PathBuf,
        /// Argument value, `name=v` or `name=v1,v2,...` for vectors
        #[arg(long = "arg", value_name = "NAME=VALUES")]
        args: Vec<String>,
        /// Backend name (see `prism targets`)
        #[arg(long, default_value = "interp")]
        target: String,
        /// Optimization level (0, 1 or 2)
        #[arg(long, default_value_t = 1)]
        opt: u8,
    },
    /// Run a batch; unbound arguments vary with the lane index
    Batch {
        /// Expression source file
        input: PathBuf,
        /// Number of lanes
        #[arg(long)]
        lanes: usize,
        /// Lane-invariant argument, `name=v1,v2,...`
        #[arg(long = "arg", value_name = "NAME=VALUES")]
        args: Vec<String>,
        /// Backend name (see `prism targets`)
        #[arg(long, default_value = "interp")]
        target: String,
        /// Value written to undefined lanes
        #[arg(long, default_value_t = f64::NAN, allow_negative_numbers = true)]
        sentinel: f64,
        /// Also treat NaN or infinite results as undefined
        #[arg(long)]
        reject_non_finite: bool,
        /// Save the output buffer image to a file
        #[arg(long, value_name = "PATH")]
        save: Option<PathBuf>,
        /// Optimization level (0, 1 or 2)
        #[arg(long, default_value_t = 1)]
        opt: u8,
    },
    /// Show structural hashes of the optimized outputs (BLAKE3)
    Hash {
        /// Expression source file
        input: PathBuf,
        /// Show full 256-bit hashes instead of short form
        #[arg(long)]
        full: bool,
    },
    /// List registered backends
    Targets,
}

fn main() {
    cli::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Emit { input, target, opt } => cli::emit::cmd_emit(input, &target, opt),
        Command::Eval {
            input,
            args,
            target,
            opt,
        } => cli::eval::cmd_eval(input, &args, &target, opt),
        Command::Batch {
            input,
            lanes,
            args,
            target,
            sentinel,
            reject_non_finite,
            save,
            opt,
        } => cli::batch::cmd_batch(cli::batch::BatchArgs {
            input,
            lanes,
            args,
            target,
            sentinel,
            reject_non_finite,
            save,
            opt,
        }),
        Command::Hash { input, full } => cli::hash::cmd_hash(input, full),
        Command::Targets => cli::cmd_targets(),
    }
}

use std::path::PathBuf;
use std::time::Instant;

use prism::api::EngineOptions;
use prism::buffer::{persist, Buffer};
use prism::graph::Value;
use prism::kernel::{LaneBinding, Sentinel};

use super::{engine, format_values, load_and_build, opt_level, or_exit, parse_arg_flags, value_for};

pub struct BatchArgs {
    pub input: PathBuf,
    pub lanes: usize,
    pub args: Vec<String>,
    pub target: String,
    pub sentinel: f64,
    pub reject_non_finite: bool,
    pub save: Option<PathBuf>,
    pub opt: u8,
}

enum Source {
    Lanes(Buffer),
    Fixed(Value),
}

/// Records printed before eliding the rest.
const PREVIEW: usize = 8;

pub fn cmd_batch(args: BatchArgs) {
    let defined = load_and_build(&args.input);
    let sentinel = Sentinel::new(args.sentinel).with_non_finite(args.reject_non_finite);
    let engine = engine(
        EngineOptions::default()
            .with_opt_level(opt_level(args.opt))
            .with_sentinel(sentinel),
    );
    let kernel = or_exit(engine.kernel(&args.target, defined.graph(), defined.outputs()));
    let signature = kernel.executable().signature().clone();
    let mut given = parse_arg_flags(&args.args);

    // Arguments without a flag vary with the lane index in every element.
    let mut sources = Vec::new();
    for p in &signature.parameters {
        match given.remove(&p.label) {
            Some(data) => sources.push(Source::Fixed(value_for(&p.label, &p.shape, &data))),
            None => {
                let size = p.shape.size();
                let data = (0..args.lanes)
                    .flat_map(|lane| std::iter::repeat(lane as f64).take(size))
                    .collect();
                sources.push(Source::Lanes(or_exit(Buffer::from_vec(size, data))));
            }
        }
    }
    for name in given.keys() {
        eprintln!("warning: '{}' is not an argument of {}", name, args.input.display());
    }
    let bindings: Vec<LaneBinding<'_>> = sources
        .iter()
        .map(|s| match s {
            Source::Lanes(buffer) => LaneBinding::Varying(buffer.view()),
            Source::Fixed(value) => LaneBinding::Invariant(value.clone()),
        })
        .collect();

    let mut out = Buffer::new(signature.output_len(), args.lanes);
    let start = Instant::now();
    let report = or_exit(kernel.run(&bindings, &mut [&mut out]));
    let elapsed = start.elapsed();

    eprintln!(
        "{} lane(s) on {} in {:.3}ms: {} defined, {} undefined",
        report.lanes,
        args.target,
        elapsed.as_secs_f64() * 1e3,
        report.defined(),
        report.undefined
    );
    let preview = or_exit(out.view().range(0, out.count().min(PREVIEW)));
    for (lane, record) in preview.records().enumerate() {
        println!("  {:>6}: {}", lane, format_values(record));
    }
    if out.count() > PREVIEW {
        println!("  ... {} more", out.count() - PREVIEW);
    }

    if let Some(path) = args.save {
        or_exit(persist::save(&out, &path));
        eprintln!("Saved {} record(s) to {}", out.count(), path.display());
    }
}

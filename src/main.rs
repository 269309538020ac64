use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use hotloop_core::{AdaptiveJit, BrainfuckProgram, ExecutionMode, JitConfig, StdIo};
use log::debug;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "hotloop",
    about = "Runs Brainfuck programs: interpreted, compiled up front, or JIT compiled"
)]
struct Opt {
    /// How to run the program: i|interpreter, cag|compile, or jit
    #[structopt(short, long, default_value = "jit")]
    mode: ExecutionMode,

    /// Number of cells on the tape
    #[structopt(long, default_value = "51200")]
    tape_size: usize,

    /// How many times a loop's condition is evaluated before the JIT compiles it
    #[structopt(long, default_value = "20")]
    threshold: u64,

    /// Print what the JIT did with every loop to stderr, once the program ends
    #[structopt(long)]
    stats: bool,

    /// Brainfuck source file
    #[structopt(parse(from_os_str))]
    file: PathBuf,
}

fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    if let Err(e) = run(&opt) {
        eprintln!("hotloop: {:#}", e);
        process::exit(1);
    }
}

fn run(opt: &Opt) -> Result<()> {
    let source =
        fs::read(&opt.file).with_context(|| format!("could not read {}", opt.file.display()))?;
    let config = JitConfig {
        hotness_threshold: opt.threshold,
    };
    let mut tape = vec![0u8; opt.tape_size];
    debug!("running {} in {} mode", opt.file.display(), opt.mode);

    // The JIT is kept concrete so its statistics can be printed afterwards.
    if opt.mode == ExecutionMode::Jit {
        let jit = AdaptiveJit::with_config(&source, config)?;
        execute(&jit, &mut tape)?;
        if opt.stats {
            print_stats(&jit);
        }
    } else {
        let program = hotloop_core::prepare(&source, opt.mode, &config)?;
        execute(program.as_ref(), &mut tape)?;
    }

    Ok(())
}

fn execute(program: &dyn BrainfuckProgram, tape: &mut [u8]) -> Result<()> {
    let mut io = StdIo::new();

    // SAFETY: the tape is not bounds checked. A program that walks off either end of it is
    // undefined behaviour, the same as in any other fixed-tape Brainfuck implementation.
    unsafe { program.run_with_io(tape.as_mut_ptr(), &mut io) };

    io.flush().context("could not write output")?;
    if let Some(e) = io.take_error() {
        return Err(e).context("program stopped early because of an I/O error");
    }

    Ok(())
}

fn print_stats(jit: &AdaptiveJit<'_>) {
    eprintln!("{} compilation(s) attempted", jit.compilations());
    for stats in jit.loop_stats() {
        eprintln!(
            "loop at {:>6}..{:<6} {:>10} evaluations  {:?}",
            stats.start, stats.end, stats.evaluations, stats.state
        );
    }
}

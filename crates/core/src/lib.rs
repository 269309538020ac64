//! Hotloop internals.
//!
//! There are three ways to run a Brainfuck program, and they all look the same from the outside
//! (a [BrainfuckProgram]):
//!
//!  - the [Interpreter] walks the source one byte at a time;
//!  - the [CompiledProgram] translates the whole program to x86-64 machine code up front
//!    ("compile and go"), which is then injected into the running process and called directly;
//!  - the [AdaptiveJit] starts out interpreting, counts how often each loop's condition is
//!    evaluated, and compiles a loop to machine code the moment it gets hot.
//!
//! Whatever the strategy, the output and the final tape are the same. Before anything runs, the
//! loops are paired up in a [LoopMap]; a `[` that is never closed is the only way a program can
//! be rejected.
//!
//! ```
//! use hotloop_core::{prepare, BrainfuckProgram, ExecutionMode, JitConfig, MemoryIo};
//!
//! let source = b"++++++++[>++++++++<-]>+.";
//! let program = prepare(source, ExecutionMode::Interpreter, &JitConfig::default())?;
//! let mut io = MemoryIo::default();
//! let mut tape = vec![0u8; 64];
//! unsafe { program.run_with_io(tape.as_mut_ptr(), &mut io) };
//!
//! assert_eq!(b"A", io.output());
//! # Ok::<(), hotloop_core::Error>(())
//! ```

use std::fmt;
use std::str::FromStr;

use log::debug;

pub mod errors;
pub mod parsing;

mod asm;
mod codegen;
mod interpreter;
mod jit;
mod native;
mod program;

pub use crate::errors::{CompilationError, Error, GenerationError, NativeCodeError};
pub use crate::interpreter::Interpreter;
pub use crate::jit::{
    AdaptiveJit, JitConfig, LoopCompiler, LoopState, LoopStats, NativeLoopCompiler,
    DEFAULT_HOTNESS_THRESHOLD,
};
pub use crate::native::{CompiledProgram, NATIVE_CODE_SUPPORTED};
pub use crate::parsing::LoopMap;
pub use crate::program::{
    BrainfuckProgram, ByteIo, Callbacks, MemoryIo, Reader, StdIo, Writer, END_OF_INPUT,
};

/// Which strategy runs the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    Interpreter,
    CompileAndGo,
    #[default]
    Jit,
}

/// Prepares `source` to run with the given strategy.
///
/// `config` only matters for [ExecutionMode::Jit].
pub fn prepare<'src>(
    source: &'src [u8],
    mode: ExecutionMode,
    config: &JitConfig,
) -> Result<Box<dyn BrainfuckProgram + 'src>, Error> {
    debug!("preparing {} bytes of source ({})", source.len(), mode);

    let program: Box<dyn BrainfuckProgram + 'src> = match mode {
        ExecutionMode::Interpreter => Box::new(Interpreter::new(source)?),
        ExecutionMode::CompileAndGo => {
            let program = CompiledProgram::new(source)?;
            debug!("{} bytes of machine code", program.code_size());
            Box::new(program)
        }
        ExecutionMode::Jit => Box::new(AdaptiveJit::with_config(source, *config)?),
    };

    Ok(program)
}

/// An [ExecutionMode] could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode {0:?}; expected one of: i, interpreter, cag, compile, jit")]
pub struct UnknownMode(String);

impl FromStr for ExecutionMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i" | "interpreter" => Ok(ExecutionMode::Interpreter),
            "cag" | "compile" => Ok(ExecutionMode::CompileAndGo),
            "jit" => Ok(ExecutionMode::Jit),
            other => Err(UnknownMode(other.to_owned())),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ExecutionMode::Interpreter => "interpreter",
            ExecutionMode::CompileAndGo => "compile",
            ExecutionMode::Jit => "jit",
        };
        write!(f, "{}", name)
    }
}

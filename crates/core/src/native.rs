//! Compile-and-go: translate to machine code, inject it into the running process, and call it.

use std::ffi::c_void;
use std::ops::Range;

use log::debug;
use mmap_jit::{as_function, ExecutableRegion, MappingError, WritableRegion};

use crate::codegen;
use crate::errors::{Error, NativeCodeError};
use crate::parsing::LoopMap;
use crate::program::{BrainfuckProgram, Callbacks, Reader, Writer};

/// What the generated code looks like from Rust.
type NativeRoutine = unsafe extern "C" fn(
    writer: Writer,
    writer_arg: *mut c_void,
    reader: Reader,
    reader_arg: *mut c_void,
    data_pointer: *mut u8,
) -> *mut u8;

/// Whether this build can generate and run native code at all.
pub const NATIVE_CODE_SUPPORTED: bool = cfg!(all(target_arch = "x86_64", unix));

/// A program (or a piece of one) as native code.
pub struct CompiledProgram {
    code: ExecutableRegion,
    code_size: usize,
}

impl CompiledProgram {
    /// Compiles the whole program.
    pub fn new(source: &[u8]) -> Result<Self, Error> {
        let loops = LoopMap::resolve(source)?;
        Ok(Self::compile_span(source, &loops, 0..source.len())?)
    }

    /// Compiles just `span`, which must start and end on loop boundaries.
    pub(crate) fn compile_span(
        source: &[u8],
        loops: &LoopMap,
        span: Range<usize>,
    ) -> Result<Self, NativeCodeError> {
        if !NATIVE_CODE_SUPPORTED {
            return Err(NativeCodeError::UnsupportedArchitecture(
                std::env::consts::ARCH,
            ));
        }

        let code = codegen::generate(source, loops, span.clone())?;
        debug!(
            "compiled bytes {}..{} into {} bytes of machine code",
            span.start,
            span.end,
            code.len()
        );

        Ok(Self::from_binary(&code)?)
    }

    /// Copies already generated machine code into executable memory.
    pub(crate) fn from_binary(binary: &[u8]) -> Result<Self, MappingError> {
        let code = WritableRegion::with_contents(binary)?.into_executable()?;

        Ok(CompiledProgram {
            code,
            code_size: binary.len(),
        })
    }

    /// Size of the generated code, in bytes.
    pub fn code_size(&self) -> usize {
        self.code_size
    }
}

impl BrainfuckProgram for CompiledProgram {
    unsafe fn run_with_callbacks(
        &self,
        callbacks: &Callbacks<'_>,
        data_pointer: *mut u8,
    ) -> *mut u8 {
        let routine = as_function!(self.code, NativeRoutine);

        routine(
            callbacks.writer,
            callbacks.writer_arg,
            callbacks.reader,
            callbacks.reader_arg,
            data_pointer,
        )
    }
}

#[cfg(all(test, target_arch = "x86_64", unix))]
mod tests {
    use super::*;
    use crate::program::MemoryIo;

    fn run(source: &[u8], io: &mut MemoryIo) -> (Vec<u8>, isize) {
        let program = CompiledProgram::new(source).unwrap();
        let mut tape = vec![0u8; 4096];

        let start = unsafe { tape.as_mut_ptr().add(2048) };
        let end = unsafe { program.run_with_io(start, io) };

        (tape, unsafe { end.offset_from(start) })
    }

    #[test]
    fn sixty_five_increments_print_a() {
        let source = [vec![b'+'; 65], vec![b'.']].concat();
        let mut io = MemoryIo::default();
        run(&source, &mut io);

        assert_eq!(b"A", io.output());
    }

    #[test]
    fn echo_until_end_of_input() {
        let mut io = MemoryIo::new(*b"hello");
        run(b",[.,]", &mut io);

        assert_eq!(b"hello", io.output());
    }

    #[test]
    fn returns_final_data_pointer() {
        let mut io = MemoryIo::default();
        let (tape, moved) = run(b"++[>+>++<<-]>>>", &mut io);

        assert_eq!(3, moved);
        assert_eq!(2, tape[2049]);
        assert_eq!(4, tape[2050]);
    }

    #[test]
    fn long_moves_are_split() {
        let source = [vec![b'>'; 300], vec![b'+'], vec![b'<'; 300]].concat();
        let mut io = MemoryIo::default();
        let (tape, moved) = run(&source, &mut io);

        assert_eq!(0, moved);
        assert_eq!(1, tape[2048 + 300]);
    }

    #[test]
    fn end_of_input_halts_the_routine() {
        let mut io = MemoryIo::default();
        let (tape, moved) = run(b"+>,>+.", &mut io);

        assert!(io.output().is_empty());
        assert_eq!(1, moved);
        assert_eq!(0, tape[2050]);
    }

    #[test]
    fn failed_write_halts_the_routine() {
        let mut io = MemoryIo::default().with_output_limit(2);
        let (tape, _) = run(b"+.+.+.+", &mut io);

        assert_eq!(&[1, 2], io.output());
        assert_eq!(3, tape[2048]);
    }

    #[test]
    fn unbalanced_program_is_rejected() {
        assert!(matches!(
            CompiledProgram::new(b"+[").map(|p| p.code_size()),
            Err(Error::Compilation(_))
        ));
    }
}

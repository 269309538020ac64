//! Executes the source directly, one token at a time.
//!
//! Since this is platform-independent code, it will run on any platform, unlike the native code
//! generator! The adaptive JIT reuses the same loop, hooking into it whenever a loop starts.

use std::ops::Range;

use crate::errors::CompilationError;
use crate::parsing::{LoopMap, Token};
use crate::program::{BrainfuckProgram, Callbacks};

/// A [BrainfuckProgram] that is interpreted straight from its source.
pub struct Interpreter<'src> {
    source: &'src [u8],
    loops: LoopMap,
    span: Range<usize>,
}

impl<'src> Interpreter<'src> {
    /// Pairs up the loops in `source`. Fails if a `[` is never closed.
    pub fn new(source: &'src [u8]) -> Result<Self, CompilationError> {
        let loops = LoopMap::resolve(source)?;
        Ok(Interpreter {
            source,
            loops,
            span: 0..source.len(),
        })
    }

    /// Interprets only `span` of `source`, using already-resolved loops.
    pub(crate) fn for_span(source: &'src [u8], loops: LoopMap, span: Range<usize>) -> Self {
        Interpreter {
            source,
            loops,
            span,
        }
    }

    pub fn loops(&self) -> &LoopMap {
        &self.loops
    }
}

impl<'src> BrainfuckProgram for Interpreter<'src> {
    unsafe fn run_with_callbacks(
        &self,
        callbacks: &Callbacks<'_>,
        data_pointer: *mut u8,
    ) -> *mut u8 {
        execute(
            self.source,
            &self.loops,
            self.span.clone(),
            callbacks,
            data_pointer,
            &AlwaysInterpret,
        )
    }
}

/// What to do about a loop whose `[` was just reached.
pub(crate) enum LoopEntry {
    /// Test the cell and interpret the body as usual.
    Interpret,
    /// The whole loop already ran elsewhere; continue after it with this data pointer.
    Completed(*mut u8),
    /// The loop ran elsewhere and hit end of input or a failed write. Stop everything.
    Halted(*mut u8),
}

/// Gets a say every time a loop condition is about to be evaluated.
pub(crate) trait LoopHook {
    /// `start` is the position of the `[`, `end` is just past its `]`.
    ///
    /// # Safety
    ///
    /// Same contract as [BrainfuckProgram::run_with_callbacks].
    unsafe fn enter_loop(
        &self,
        start: usize,
        end: usize,
        data_pointer: *mut u8,
        callbacks: &Callbacks<'_>,
    ) -> LoopEntry;
}

/// The plain interpreter never does anything special with loops.
pub(crate) struct AlwaysInterpret;

impl LoopHook for AlwaysInterpret {
    unsafe fn enter_loop(&self, _: usize, _: usize, _: *mut u8, _: &Callbacks<'_>) -> LoopEntry {
        LoopEntry::Interpret
    }
}

/// Interprets `span` of `source` and returns the final data pointer.
///
/// # Safety
///
/// Same contract as [BrainfuckProgram::run_with_callbacks].
pub(crate) unsafe fn execute(
    source: &[u8],
    loops: &LoopMap,
    span: Range<usize>,
    callbacks: &Callbacks<'_>,
    mut data_pointer: *mut u8,
    hook: &impl LoopHook,
) -> *mut u8 {
    use Token::*;

    let mut return_stack: Vec<usize> = Vec::new();
    let mut program_counter = span.start;

    while program_counter < span.end {
        program_counter = match Token::decode(source[program_counter]) {
            None => program_counter + 1,
            Some(IncrementAddr) => {
                data_pointer = data_pointer.wrapping_add(1);
                program_counter + 1
            }
            Some(DecrementAddr) => {
                data_pointer = data_pointer.wrapping_sub(1);
                program_counter + 1
            }
            Some(IncrementVal) => {
                *data_pointer = (*data_pointer).wrapping_add(1);
                program_counter + 1
            }
            Some(DecrementVal) => {
                *data_pointer = (*data_pointer).wrapping_sub(1);
                program_counter + 1
            }
            Some(GetChar) => {
                let value = callbacks.read();
                if value < 0 {
                    return data_pointer;
                }
                *data_pointer = value as u8;
                program_counter + 1
            }
            Some(PutChar) => {
                if !callbacks.write(*data_pointer) {
                    return data_pointer;
                }
                program_counter + 1
            }
            Some(StartLoop) => {
                // Resolution guarantees an end; an unclosed loop would run to the end anyway.
                let end = loops.end_of(program_counter).unwrap_or(span.end);

                match hook.enter_loop(program_counter, end, data_pointer, callbacks) {
                    LoopEntry::Interpret => {
                        if *data_pointer != 0 {
                            return_stack.push(program_counter);
                            program_counter + 1
                        } else {
                            end
                        }
                    }
                    LoopEntry::Completed(new_data_pointer) => {
                        data_pointer = new_data_pointer;
                        end
                    }
                    LoopEntry::Halted(new_data_pointer) => return new_data_pointer,
                }
            }
            // Jump back so the condition is evaluated again. A stray `]` does nothing.
            Some(EndLoop) => match return_stack.pop() {
                Some(start) => start,
                None => program_counter + 1,
            },
        }
    }

    data_pointer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::MemoryIo;

    /// Runs `source` on a fresh tape, starting in the middle. Returns the tape and how far the
    /// data pointer moved.
    fn interpret(source: &[u8], io: &mut MemoryIo) -> (Vec<u8>, isize) {
        let mut tape = vec![0u8; 1024];
        let program = Interpreter::new(source).unwrap();

        let start = unsafe { tape.as_mut_ptr().add(512) };
        let end = unsafe { program.run_with_io(start, io) };

        (tape, unsafe { end.offset_from(start) })
    }

    #[test]
    fn echo_until_end_of_input() {
        let mut io = MemoryIo::new(*b"AB");
        interpret(b",[.,]", &mut io);

        assert_eq!(b"AB", io.output());
    }

    #[test]
    fn sixty_five_increments_print_a() {
        let source = [vec![b'+'; 65], vec![b'.']].concat();
        let mut io = MemoryIo::default();
        interpret(&source, &mut io);

        assert_eq!(b"A", io.output());
    }

    #[test]
    fn cells_wrap_around() {
        let mut io = MemoryIo::default();
        interpret(b"-.+.", &mut io);

        assert_eq!(&[255, 0], io.output());
    }

    #[test]
    fn returns_final_data_pointer() {
        let mut io = MemoryIo::default();
        let (tape, moved) = interpret(b">>>+<", &mut io);

        assert_eq!(2, moved);
        assert_eq!(1, tape[515]);
    }

    #[test]
    fn end_of_input_halts_immediately() {
        let mut io = MemoryIo::default();
        let (tape, moved) = interpret(b"+,>+.", &mut io);

        assert!(io.output().is_empty());
        assert_eq!(0, moved);
        assert_eq!(1, tape[512]);
        assert_eq!(0, tape[513]);
    }

    #[test]
    fn failed_write_halts_immediately() {
        let mut io = MemoryIo::default().with_output_limit(1);
        let (tape, _) = interpret(b"+.+.+.", &mut io);

        assert_eq!(&[1], io.output());
        assert_eq!(2, tape[512]);
    }

    #[test]
    fn zero_cell_skips_loop() {
        let mut io = MemoryIo::default();
        interpret(b"[.]+.", &mut io);

        assert_eq!(&[1], io.output());
    }

    #[test]
    fn stray_close_bracket_is_a_no_op() {
        let mut io = MemoryIo::default();
        interpret(b"]+.]", &mut io);

        assert_eq!(&[1], io.output());
    }

    #[test]
    fn nested_loops_multiply() {
        // 4 * 3 = 12, moved into the next cell
        let mut io = MemoryIo::default();
        let (tape, _) = interpret(b"++++[>+++<-]", &mut io);

        assert_eq!(0, tape[512]);
        assert_eq!(12, tape[513]);
    }

    #[test]
    fn unbalanced_program_is_rejected() {
        assert!(Interpreter::new(b"[[]").is_err());
    }
}

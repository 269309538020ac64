//! Generates machine code for a span of a program.
//!
//! Runs of `+ - < >` are coalesced: every cell change between two "barriers" (I/O, loop
//! boundaries, the end of a sequence) is collected in an [OffsetDeltaTable], keyed by the cell's
//! offset from where the data pointer was at the start of the run. At a barrier, one add per
//! touched cell is emitted, then at most one pointer move.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::errors::GenerationError;
use crate::parsing::{LoopMap, Token};

pub(crate) mod x86_64;

/// Something code can be generated for. Every operation is relative to the data pointer.
pub(crate) trait Target {
    /// Handed out by [Target::start_loop], handed back to [Target::end_loop].
    type LoopHead;
    type Output;

    /// Start of the routine.
    fn enter(&mut self) -> Result<(), GenerationError>;
    /// End of the routine: return the data pointer.
    fn leave(&mut self) -> Result<(), GenerationError>;

    /// Adds `amount` (mod 256) to the cell at `offset` from the data pointer.
    fn add_to_cell(&mut self, offset: i8, amount: u8);
    fn move_pointer(&mut self, displacement: i8);

    /// Reads into the current cell. End of input leaves the routine.
    fn read_cell(&mut self) -> Result<(), GenerationError>;
    /// Writes the current cell. A failed write leaves the routine.
    fn write_cell(&mut self) -> Result<(), GenerationError>;

    /// Tests the current cell; skips to after [Target::end_loop] if it is zero.
    fn start_loop(&mut self) -> Self::LoopHead;
    /// Jumps back to the test.
    fn end_loop(&mut self, head: Self::LoopHead) -> Result<(), GenerationError>;

    fn finish(self) -> Result<Self::Output, GenerationError>;
}

/// Generates x86-64 machine code for `span` of `source`.
///
/// The span must start and end on loop boundaries (or be the whole program).
pub(crate) fn generate(
    source: &[u8],
    loops: &LoopMap,
    span: Range<usize>,
) -> Result<Vec<u8>, GenerationError> {
    CodeGenerator::new(source, loops, x86_64::X86_64Target::new()).compile(span)
}

/// Walks the source, coalescing as it goes, and drives a [Target].
pub(crate) struct CodeGenerator<'a, T: Target> {
    source: &'a [u8],
    loops: &'a LoopMap,
    target: T,
}

impl<'a, T: Target> CodeGenerator<'a, T> {
    pub fn new(source: &'a [u8], loops: &'a LoopMap, target: T) -> Self {
        CodeGenerator {
            source,
            loops,
            target,
        }
    }

    pub fn compile(mut self, span: Range<usize>) -> Result<T::Output, GenerationError> {
        self.target.enter()?;
        self.generate_sequence(span)?;
        self.target.leave()?;
        self.target.finish()
    }

    fn generate_sequence(&mut self, span: Range<usize>) -> Result<(), GenerationError> {
        use Token::*;

        let mut table = OffsetDeltaTable::new();
        let mut position = span.start;

        while position < span.end {
            match Token::decode(self.source[position]) {
                // Stray `]` or commentary
                None | Some(EndLoop) => (),
                Some(IncrementVal) => table.change(1),
                Some(DecrementVal) => table.change(u8::MAX),
                Some(IncrementAddr) => table.move_by(1, &mut self.target),
                Some(DecrementAddr) => table.move_by(-1, &mut self.target),
                Some(GetChar) => {
                    table.flush(&mut self.target);
                    self.target.read_cell()?;
                }
                Some(PutChar) => {
                    table.flush(&mut self.target);
                    self.target.write_cell()?;
                }
                Some(StartLoop) => {
                    table.flush(&mut self.target);
                    let end = self.loop_end(position, &span)?;
                    self.generate_loop(position, end)?;
                    position = end;
                    continue;
                }
            }
            position += 1;
        }

        table.flush(&mut self.target);
        Ok(())
    }

    /// `start` is the `[`, `end` is just past the `]`.
    fn generate_loop(&mut self, start: usize, end: usize) -> Result<(), GenerationError> {
        let head = self.target.start_loop();
        self.generate_sequence(start + 1..end - 1)?;
        self.target.end_loop(head)
    }

    fn loop_end(&self, start: usize, span: &Range<usize>) -> Result<usize, GenerationError> {
        match self.loops.end_of(start) {
            Some(end) if end <= span.end => Ok(end),
            _ => Err(GenerationError::UnterminatedLoop {
                span: start..span.end,
            }),
        }
    }
}

/// Pending cell changes, relative to where the data pointer was when the table was last flushed.
#[derive(Debug, Default)]
pub(crate) struct OffsetDeltaTable {
    deltas: BTreeMap<i8, u8>,
    offset: i8,
}

impl OffsetDeltaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `amount` (mod 256) to the cell at the current offset.
    pub fn change(&mut self, amount: u8) {
        let delta = self.deltas.entry(self.offset).or_insert(0);
        *delta = delta.wrapping_add(amount);
    }

    /// Moves the current offset by `step`, flushing first if the offset would no longer fit in a
    /// displacement.
    pub fn move_by(&mut self, step: i8, target: &mut impl Target) {
        let offset = match self.offset.checked_add(step) {
            Some(offset) => offset,
            None => {
                self.flush(target);
                step
            }
        };
        self.offset = offset;
    }

    /// Emits every non-zero change in offset order, then the pointer move (if any).
    pub fn flush(&mut self, target: &mut impl Target) {
        for (&offset, &amount) in self.deltas.iter() {
            if amount != 0 {
                target.add_to_cell(offset, amount);
            }
        }
        self.deltas.clear();

        if self.offset != 0 {
            target.move_pointer(self.offset);
            self.offset = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Enter,
        Leave,
        Add(i8, u8),
        Move(i8),
        Read,
        Write,
        LoopStart,
        LoopEnd,
    }

    /// Records what would be emitted.
    #[derive(Default)]
    struct Recorder {
        ops: Vec<Op>,
    }

    impl Target for Recorder {
        type LoopHead = usize;
        type Output = Vec<Op>;

        fn enter(&mut self) -> Result<(), GenerationError> {
            self.ops.push(Op::Enter);
            Ok(())
        }

        fn leave(&mut self) -> Result<(), GenerationError> {
            self.ops.push(Op::Leave);
            Ok(())
        }

        fn add_to_cell(&mut self, offset: i8, amount: u8) {
            self.ops.push(Op::Add(offset, amount));
        }

        fn move_pointer(&mut self, displacement: i8) {
            self.ops.push(Op::Move(displacement));
        }

        fn read_cell(&mut self) -> Result<(), GenerationError> {
            self.ops.push(Op::Read);
            Ok(())
        }

        fn write_cell(&mut self) -> Result<(), GenerationError> {
            self.ops.push(Op::Write);
            Ok(())
        }

        fn start_loop(&mut self) -> usize {
            self.ops.push(Op::LoopStart);
            self.ops.len()
        }

        fn end_loop(&mut self, _head: usize) -> Result<(), GenerationError> {
            self.ops.push(Op::LoopEnd);
            Ok(())
        }

        fn finish(self) -> Result<Vec<Op>, GenerationError> {
            Ok(self.ops)
        }
    }

    fn record(source: &[u8]) -> Vec<Op> {
        let loops = LoopMap::resolve(source).unwrap();
        CodeGenerator::new(source, &loops, Recorder::default())
            .compile(0..source.len())
            .unwrap()
    }

    /// Only the ops between enter and leave.
    fn body(source: &[u8]) -> Vec<Op> {
        let ops = record(source);
        assert_eq!(Some(&Op::Enter), ops.first());
        assert_eq!(Some(&Op::Leave), ops.last());
        ops[1..ops.len() - 1].to_vec()
    }

    const TAPE_SIZE: usize = 4096;
    const ORIGIN: usize = TAPE_SIZE / 2;

    /// Applies straight-line ops to a tape; returns the tape and final position.
    fn simulate(ops: &[Op]) -> (Vec<u8>, usize) {
        let mut tape = vec![0u8; TAPE_SIZE];
        let mut position = ORIGIN;
        for op in ops {
            match *op {
                Op::Add(offset, amount) => {
                    let cell = (position as isize + offset as isize) as usize;
                    tape[cell] = tape[cell].wrapping_add(amount);
                }
                Op::Move(displacement) => {
                    position = (position as isize + displacement as isize) as usize;
                }
                other => panic!("not straight-line: {:?}", other),
            }
        }
        (tape, position)
    }

    /// Applies each token as written.
    fn naive(source: &[u8]) -> (Vec<u8>, usize) {
        let mut tape = vec![0u8; TAPE_SIZE];
        let mut position = ORIGIN;
        for &byte in source {
            match byte {
                b'+' => tape[position] = tape[position].wrapping_add(1),
                b'-' => tape[position] = tape[position].wrapping_sub(1),
                b'>' => position += 1,
                b'<' => position -= 1,
                _ => (),
            }
        }
        (tape, position)
    }

    #[test]
    fn coalesces_into_one_add_per_cell() {
        assert_eq!(
            vec![
                Op::Add(-3, 2),
                Op::Add(0, 0xfd),
                Op::Add(1, 2),
                Op::Add(3, 1),
                Op::Move(6),
            ],
            body(b"<<<++>>>--->++><>>+>>>")
        );
    }

    #[test]
    fn changes_that_cancel_out_emit_nothing() {
        assert_eq!(Vec::<Op>::new(), body(b"+-><-+<>"));
        assert!(body(&[b'+'; 256]).is_empty());
    }

    #[test]
    fn io_and_loops_are_barriers() {
        assert_eq!(
            vec![
                Op::Add(1, 1),
                Op::Move(1),
                Op::Write,
                Op::Add(0, 1),
                Op::LoopStart,
                Op::Add(0, 0xff),
                Op::Move(-1),
                Op::LoopEnd,
                Op::Read,
            ],
            body(b">+.+[-<],")
        );
    }

    #[test]
    fn long_moves_flush_before_leaving_displacement_range() {
        let mut source = vec![b'>'; 200];
        source.push(b'+');

        assert_eq!(
            vec![Op::Move(127), Op::Add(73, 1), Op::Move(73)],
            body(&source)
        );
    }

    #[test]
    fn long_moves_backwards_reach_minus_128() {
        let mut source = vec![b'<'; 129];
        source.push(b'-');

        assert_eq!(
            vec![Op::Move(-128), Op::Add(-1, 0xff), Op::Move(-1)],
            body(&source)
        );
    }

    #[test]
    fn stray_close_brackets_are_ignored() {
        assert_eq!(vec![Op::Add(0, 2)], body(b"+]+"));
    }

    #[test]
    fn span_must_contain_its_loop_ends() {
        let source = b"+[->+<]";
        let loops = LoopMap::resolve(source).unwrap();
        let result = CodeGenerator::new(source, &loops, Recorder::default()).compile(0..5);

        assert_eq!(
            Err(GenerationError::UnterminatedLoop { span: 1..5 }),
            result
        );
    }

    proptest! {
        #[test]
        fn coalescing_preserves_effect(source in "[+\\-<>]{0,600}") {
            let ops = body(source.as_bytes());
            prop_assert_eq!(naive(source.as_bytes()), simulate(&ops));
        }

        #[test]
        fn at_most_one_move_per_run(source in "[+\\-]{0,10}[<>]{0,100}[+\\-]{0,10}") {
            let ops = body(source.as_bytes());
            let moves = ops.iter().filter(|op| matches!(op, Op::Move(_))).count();
            prop_assert!(moves <= 1);
        }
    }
}

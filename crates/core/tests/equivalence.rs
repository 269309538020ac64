//! Every strategy must produce the same output and leave the same tape behind.
//!
//! Programs are generated so they always terminate: every loop looks like `-[>BODY<---]`, where
//! the body never moves left of where it started and always returns there, and the counter is
//! decremented by an odd amount (so it must eventually hit zero).

use hotloop_core::{
    AdaptiveJit, BrainfuckProgram, CompiledProgram, Interpreter, JitConfig, MemoryIo,
    NATIVE_CODE_SUPPORTED,
};
use proptest::prelude::*;

const TAPE_SIZE: usize = 8192;
const ORIGIN: usize = 1024;

#[derive(Debug, Clone)]
enum Block {
    /// Never goes left of where it started; ends where it started.
    Straight(Vec<u8>),
    Loop { body: Vec<Block>, decrement: usize },
}

/// Random commands from `alphabet`, fixed up so the data pointer never goes left of the start and
/// returns there at the end.
fn straight_line(alphabet: &'static str, max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    let command = prop::sample::select(alphabet.as_bytes().to_vec());
    prop::collection::vec(command, 0..max_len).prop_map(|commands| {
        let mut offset = 0usize;
        let mut fixed = Vec::with_capacity(commands.len());
        for command in commands {
            match command {
                b'<' if offset == 0 => continue,
                b'<' => offset -= 1,
                b'>' => offset += 1,
                _ => (),
            }
            fixed.push(command);
        }
        fixed.extend(std::iter::repeat(b'<').take(offset));
        fixed
    })
}

fn block() -> impl Strategy<Value = Block> {
    let leaf = straight_line("+-<>.", 24).prop_map(Block::Straight);
    leaf.prop_recursive(2, 24, 4, |inner| {
        (prop::collection::vec(inner, 0..4), 0usize..4).prop_map(|(body, k)| Block::Loop {
            body,
            decrement: 2 * k + 1,
        })
    })
}

fn render(blocks: &[Block], out: &mut Vec<u8>) {
    for block in blocks {
        match block {
            Block::Straight(commands) => out.extend_from_slice(commands),
            Block::Loop { body, decrement } => {
                out.extend_from_slice(b"-[>");
                render(body, out);
                out.push(b'<');
                out.extend(std::iter::repeat(b'-').take(*decrement));
                out.push(b']');
            }
        }
    }
}

fn program() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(block(), 0..5).prop_map(|blocks| {
        let mut source = Vec::new();
        render(&blocks, &mut source);
        source
    })
}

/// Output, final tape, and how far the data pointer moved.
#[derive(Debug, PartialEq)]
struct Outcome {
    output: Vec<u8>,
    tape: Vec<u8>,
    moved: isize,
}

fn run(program: &dyn BrainfuckProgram, input: &[u8]) -> Outcome {
    let mut io = MemoryIo::new(input);
    let mut tape = vec![0u8; TAPE_SIZE];

    let start = unsafe { tape.as_mut_ptr().add(ORIGIN) };
    let end = unsafe { program.run_with_io(start, &mut io) };
    let moved = unsafe { end.offset_from(start) };

    Outcome {
        output: io.into_output(),
        tape,
        moved,
    }
}

fn check_all_strategies(source: &[u8], input: &[u8]) -> Result<(), TestCaseError> {
    let reference = run(&Interpreter::new(source).unwrap(), input);

    if NATIVE_CODE_SUPPORTED {
        let compiled = CompiledProgram::new(source).unwrap();
        prop_assert_eq!(&reference, &run(&compiled, input), "compile and go");
    }

    for hotness_threshold in [1, 2, 20] {
        let config = JitConfig { hotness_threshold };
        let jit = AdaptiveJit::with_config(source, config).unwrap();
        prop_assert_eq!(&reference, &run(&jit, input), "threshold {}", hotness_threshold);
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn terminating_programs_agree(source in program()) {
        check_all_strategies(&source, b"")?;
    }

    #[test]
    fn straight_line_programs_with_input_agree(
        source in straight_line("+-<>,.", 80),
        input in prop::collection::vec(any::<u8>(), 0..80),
    ) {
        check_all_strategies(&source, &input)?;
    }

    #[test]
    fn long_pointer_runs_agree(forward in 0usize..400, back in 0usize..400) {
        let mut source = vec![b'>'; forward];
        source.extend_from_slice(b"+++.");
        source.extend(std::iter::repeat(b'<').take(back.min(forward)));
        source.extend_from_slice(b"-.");
        check_all_strategies(&source, b"")?;
    }
}

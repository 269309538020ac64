//! Decodes source bytes into tokens, and pairs up loop brackets.

use crate::errors::{CompilationError, Location, Reason};

/// The eight meaningful characters of a Brainfuck program. Every other byte is a no-op.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Token {
    IncrementVal,
    DecrementVal,
    IncrementAddr,
    DecrementAddr,
    PutChar,
    GetChar,
    StartLoop,
    EndLoop,
}

impl Token {
    pub fn decode(byte: u8) -> Option<Token> {
        use Token::*;

        match byte {
            b'+' => Some(IncrementVal),
            b'-' => Some(DecrementVal),
            b'>' => Some(IncrementAddr),
            b'<' => Some(DecrementAddr),
            b'.' => Some(PutChar),
            b',' => Some(GetChar),
            b'[' => Some(StartLoop),
            b']' => Some(EndLoop),
            _ => None,
        }
    }
}

/// For every `[` in the source, the position just past its matching `]`.
///
/// Indexed by source position. Built once; never changes afterwards.
#[derive(Debug, Clone)]
pub struct LoopMap {
    ends: Vec<Option<usize>>,
}

impl LoopMap {
    /// Pairs up every bracket in `source`.
    ///
    /// A `]` with no open loop is ignored, and is NOT an error. A `[` that is never closed is.
    pub fn resolve(source: &[u8]) -> Result<LoopMap, CompilationError> {
        let mut ends = vec![None; source.len()];
        let mut starts = LoopStack::new();

        for (position, &byte) in source.iter().enumerate() {
            match Token::decode(byte) {
                Some(Token::StartLoop) => starts.push(position),
                Some(Token::EndLoop) => {
                    if let Some(start) = starts.pop() {
                        ends[start] = Some(position + 1);
                    }
                }
                _ => (),
            }
        }

        if let Some(unmatched) = starts.pop() {
            return Err(CompilationError::new(
                Reason::UnbalancedLoop,
                Location::in_source(source, unmatched),
            ));
        }

        Ok(LoopMap { ends })
    }

    /// The position just after the `]` that closes the loop starting at `start`.
    ///
    /// Returns `None` if `start` is not a `[`.
    pub fn end_of(&self, start: usize) -> Option<usize> {
        self.ends.get(start).copied().flatten()
    }

    /// Number of loops in the program.
    pub fn len(&self) -> usize {
        self.ends.iter().filter(|end| end.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All `(start, end)` pairs, in source order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.ends
            .iter()
            .enumerate()
            .filter_map(|(start, end)| end.map(|end| (start, end)))
    }
}

// Private data structurs

struct LoopStack {
    stack: Vec<usize>,
}

impl LoopStack {
    fn new() -> Self {
        Self { stack: Vec::new() }
    }

    fn push(&mut self, position: usize) {
        self.stack.push(position);
    }

    /// The innermost open loop. With several left open at the end, this reports the last one.
    fn pop(&mut self) -> Option<usize> {
        self.stack.pop()
    }
}

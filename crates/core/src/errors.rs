//! All errors that can be _generated_ while preparing a program.
use std::fmt;
use std::ops::Range;

use mmap_jit::MappingError;
use thiserror::Error;

/// How much of the offending source is quoted in a [CompilationError].
const EXCERPT_LENGTH: usize = 32;

/// Any error that occurs as a result of checking the source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationError {
    reason: Reason,
    location: Location,
}

/// Where in the source an error was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    offset: usize,
    line_no: u32,
    column: u32,
    excerpt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// A `[` was never closed. Note that a stray `]` is NOT an error.
    UnbalancedLoop,
}

impl CompilationError {
    pub fn new(reason: Reason, location: Location) -> Self {
        CompilationError { reason, location }
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn message(&self) -> &'static str {
        self.reason.message()
    }

    pub fn message_identifier(&self) -> u32 {
        self.reason.message_identifier()
    }
}

impl Reason {
    pub fn message_identifier(&self) -> u32 {
        use Reason::*;
        match self {
            UnbalancedLoop => 0x001,
        }
    }

    pub fn message(&self) -> &'static str {
        use Reason::*;
        match self {
            UnbalancedLoop => "unable to find loop end in block starting with:",
        }
    }
}

impl Location {
    /// Locates byte `offset` of `source`. Lines and columns count from 1.
    pub fn in_source(source: &[u8], offset: usize) -> Self {
        let before = &source[..offset];
        let line_no = 1 + before.iter().filter(|&&b| b == b'\n').count() as u32;
        let line_start = before
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |newline| newline + 1);
        let column = 1 + (offset - line_start) as u32;

        let excerpt: Vec<u8> = source[offset..]
            .iter()
            .copied()
            .take_while(|&b| b != b'\n')
            .take(EXCERPT_LENGTH)
            .collect();

        Location {
            offset,
            line_no,
            column,
            excerpt: String::from_utf8_lossy(&excerpt).into_owned(),
        }
    }

    /// Byte offset into the source.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// The source text starting at this location (at most one line, and not too long).
    pub fn excerpt(&self) -> &str {
        &self.excerpt
    }
}

impl std::error::Error for CompilationError {}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "error[{:04x}]: {}: {} {}",
            self.message_identifier(),
            self.location,
            self.message(),
            self.location.excerpt
        )
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line_no, self.column)
    }
}

/// Errors from translating source into machine code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// A loop starting inside the span has no matching end inside the span.
    #[error("unable to find loop end in block spanning bytes {}..{}", .span.start, .span.end)]
    UnterminatedLoop { span: Range<usize> },
    /// A forward branch was emitted but never given a target.
    #[error("{0} forward branch(es) were never patched")]
    UnpatchedBranches(usize),
    /// A branch target is too far away for the branch's encoding.
    #[error("branch displacement {0} does not fit in its encoding")]
    BranchOutOfRange(i64),
}

/// Errors from producing a runnable native routine.
#[derive(Debug, Error)]
pub enum NativeCodeError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("could not create executable memory: {0}")]
    Mapping(#[from] MappingError),
    #[error("native code generation is not supported on {0}")]
    UnsupportedArchitecture(&'static str),
}

/// Anything that can go wrong while preparing a program to run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Compilation(#[from] CompilationError),
    #[error(transparent)]
    Native(#[from] NativeCodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_counts_lines_and_columns() {
        let source = b"++\n+[-\n  [++ no end\n";
        let location = Location::in_source(source, 9);

        assert_eq!(9, location.offset());
        assert_eq!(3, location.line_no());
        assert_eq!(3, location.column());
        assert_eq!("[++ no end", location.excerpt());
    }

    #[test]
    fn excerpt_is_bounded() {
        let source = [b'['; 100];
        let location = Location::in_source(&source, 0);

        assert_eq!(EXCERPT_LENGTH, location.excerpt().len());
        assert_eq!("1:1", location.to_string());
    }

    #[test]
    fn display_has_identifier_location_and_excerpt() {
        let error = CompilationError::new(
            Reason::UnbalancedLoop,
            Location::in_source(b"+[++", 1),
        );

        assert_eq!(
            "error[0001]: 1:2: unable to find loop end in block starting with: [++",
            error.to_string()
        );
    }

    #[test]
    fn generation_error_names_the_span() {
        let error = GenerationError::UnterminatedLoop { span: 3..10 };
        assert_eq!(
            "unable to find loop end in block spanning bytes 3..10",
            error.to_string()
        );
    }
}

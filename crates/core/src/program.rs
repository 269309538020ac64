//! Defines [BrainfuckProgram] that allows you to run a program, regardless of how it's
//! implemented, and the I/O callbacks every implementation talks to.

use std::ffi::c_void;
use std::io::{self, BufWriter, Read, StdinLock, StdoutLock, Write};
use std::marker::PhantomData;

/// Returned by a [Reader] when there is no more input. Any negative value means the same.
pub const END_OF_INPUT: i32 = -1;

/// Produces the next input byte (0..=255), or a negative value at end of input.
pub type Reader = unsafe extern "C" fn(arg: *mut c_void) -> i32;

/// Consumes one output byte. Returns non-zero on success and zero on failure.
pub type Writer = unsafe extern "C" fn(arg: *mut c_void, byte: u8) -> i32;

/// The I/O routines handed to a running program, with the argument each one is called with.
///
/// This is exactly what compiled code receives, so every strategy sees I/O the same way.
#[derive(Clone, Copy)]
pub struct Callbacks<'a> {
    pub(crate) writer: Writer,
    pub(crate) writer_arg: *mut c_void,
    pub(crate) reader: Reader,
    pub(crate) reader_arg: *mut c_void,
    lifetime: PhantomData<&'a mut ()>,
}

impl<'a> Callbacks<'a> {
    /// Assembles callbacks from raw parts.
    ///
    /// # Safety
    ///
    /// `writer` must be safe to call with `writer_arg`, and `reader` with `reader_arg`, for as
    /// long as `'a`.
    pub unsafe fn from_raw(
        writer: Writer,
        writer_arg: *mut c_void,
        reader: Reader,
        reader_arg: *mut c_void,
    ) -> Self {
        Callbacks {
            writer,
            writer_arg,
            reader,
            reader_arg,
            lifetime: PhantomData,
        }
    }

    /// Callbacks that forward to a [ByteIo].
    pub fn from_io<T: ByteIo>(io: &'a mut T) -> Self {
        let arg = io as *mut T as *mut c_void;
        unsafe { Self::from_raw(write_trampoline::<T>, arg, read_trampoline::<T>, arg) }
    }

    /// Calls the reader.
    ///
    /// # Safety
    ///
    /// Same contract as the callbacks themselves; see [Callbacks::from_raw].
    pub unsafe fn read(&self) -> i32 {
        (self.reader)(self.reader_arg)
    }

    /// Calls the writer. Returns `false` when the writer reports failure.
    ///
    /// # Safety
    ///
    /// Same contract as the callbacks themselves; see [Callbacks::from_raw].
    pub unsafe fn write(&self, byte: u8) -> bool {
        (self.writer)(self.writer_arg, byte) != 0
    }
}

/// Byte-at-a-time I/O, the safe way to provide [Callbacks].
pub trait ByteIo {
    /// The next input byte, or `None` at end of input.
    fn read_byte(&mut self) -> Option<u8>;

    /// Emits one byte. Returning `false` stops the program.
    fn write_byte(&mut self, byte: u8) -> bool;
}

impl<T: ByteIo + ?Sized> ByteIo for &mut T {
    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        (**self).write_byte(byte)
    }
}

unsafe extern "C" fn read_trampoline<T: ByteIo>(arg: *mut c_void) -> i32 {
    let io = &mut *(arg as *mut T);
    match io.read_byte() {
        Some(byte) => byte as i32,
        None => END_OF_INPUT,
    }
}

unsafe extern "C" fn write_trampoline<T: ByteIo>(arg: *mut c_void, byte: u8) -> i32 {
    let io = &mut *(arg as *mut T);
    io.write_byte(byte) as i32
}

/// A [BrainfuckProgram] is ready to be executed. Just give it some memory!
pub trait BrainfuckProgram {
    /// Runs the program starting with the data pointer at `data_pointer` and returns where the
    /// data pointer ended up.
    ///
    /// Execution stops early, wherever it is, as soon as the reader reports end of input or the
    /// writer reports failure.
    ///
    /// # Safety
    ///
    /// The tape is not bounds checked. `data_pointer` must point into a buffer big enough for
    /// every cell the program visits, and `callbacks` must uphold [Callbacks::from_raw].
    unsafe fn run_with_callbacks(&self, callbacks: &Callbacks<'_>, data_pointer: *mut u8)
        -> *mut u8;

    /// Runs the program with I/O from any [ByteIo].
    ///
    /// # Safety
    ///
    /// See [BrainfuckProgram::run_with_callbacks].
    unsafe fn run_with_io(&self, data_pointer: *mut u8, mut io: &mut dyn ByteIo) -> *mut u8 {
        let callbacks = Callbacks::from_io(&mut io);
        self.run_with_callbacks(&callbacks, data_pointer)
    }
}

/// Reads from `stdin` and writes to `stdout`.
///
/// Output is buffered; it is flushed before every read (so prompts show up) and on drop.
pub struct StdIo {
    stdin: StdinLock<'static>,
    stdout: BufWriter<StdoutLock<'static>>,
    error: Option<io::Error>,
}

impl StdIo {
    pub fn new() -> Self {
        StdIo {
            stdin: io::stdin().lock(),
            stdout: BufWriter::new(io::stdout().lock()),
            error: None,
        }
    }

    /// Flushes pending output.
    pub fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()
    }

    /// The first I/O error encountered, if any. Errors are otherwise reported to the program as
    /// end of input or a failed write.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn record(&mut self, error: io::Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl Default for StdIo {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteIo for StdIo {
    fn read_byte(&mut self) -> Option<u8> {
        if let Err(e) = self.stdout.flush() {
            self.record(e);
        }

        let mut one_byte = [0u8];
        loop {
            return match self.stdin.read(&mut one_byte) {
                Ok(0) => None,
                Ok(_) => Some(one_byte[0]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.record(e);
                    None
                }
            };
        }
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        match self.stdout.write_all(&[byte]) {
            Ok(()) => true,
            Err(e) => {
                self.record(e);
                false
            }
        }
    }
}

/// In-memory I/O: input comes from a buffer, output is collected.
#[derive(Debug, Clone, Default)]
pub struct MemoryIo {
    input: Vec<u8>,
    position: usize,
    output: Vec<u8>,
    output_limit: Option<usize>,
}

impl MemoryIo {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        MemoryIo {
            input: input.into(),
            ..Default::default()
        }
    }

    /// Writes fail once `limit` bytes have been written.
    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = Some(limit);
        self
    }

    /// Everything written so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// How many input bytes have been consumed.
    pub fn consumed(&self) -> usize {
        self.position
    }

    pub fn into_output(self) -> Vec<u8> {
        self.output
    }
}

impl ByteIo for MemoryIo {
    fn read_byte(&mut self) -> Option<u8> {
        let byte = self.input.get(self.position).copied()?;
        self.position += 1;
        Some(byte)
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        if matches!(self.output_limit, Some(limit) if self.output.len() >= limit) {
            return false;
        }
        self.output.push(byte);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trampolines_forward_to_byte_io() {
        let mut io = MemoryIo::new(*b"hi");
        let callbacks = Callbacks::from_io(&mut io);

        unsafe {
            assert_eq!(b'h' as i32, callbacks.read());
            assert_eq!(b'i' as i32, callbacks.read());
            assert_eq!(END_OF_INPUT, callbacks.read());
            assert!(callbacks.write(b'!'));
        }

        assert_eq!(b"!", io.output());
        assert_eq!(2, io.consumed());
    }

    #[test]
    fn output_limit_makes_writes_fail() {
        let mut io = MemoryIo::new(Vec::new()).with_output_limit(1);

        assert!(io.write_byte(b'a'));
        assert!(!io.write_byte(b'b'));
        assert_eq!(b"a", io.output());
    }

    #[test]
    fn high_bytes_are_not_mistaken_for_end_of_input() {
        let mut io = MemoryIo::new(vec![0xFF]);
        let callbacks = Callbacks::from_io(&mut io);

        assert_eq!(255, unsafe { callbacks.read() });
    }
}

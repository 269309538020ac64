//! The adaptive JIT: interpret everything, and compile loops to native code once they get hot.
//!
//! Every time the condition of a loop is about to be evaluated, its counter goes up. On exactly
//! the evaluation that reaches the hotness threshold, the loop is compiled and the compiled
//! routine runs the loop to completion. From then on, every entry into that loop dispatches
//! straight to the compiled routine. If compilation fails, the loop is interpreted forever and is
//! never retried.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::ops::Range;
use std::rc::Rc;

use log::{debug, warn};

use crate::errors::{CompilationError, NativeCodeError};
use crate::interpreter::{self, LoopEntry, LoopHook};
use crate::native::CompiledProgram;
use crate::parsing::LoopMap;
use crate::program::{BrainfuckProgram, Callbacks};

/// How many evaluations of a loop's condition make it hot, unless configured otherwise.
pub const DEFAULT_HOTNESS_THRESHOLD: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitConfig {
    /// A loop is compiled on exactly this evaluation of its condition. 0 behaves like 1.
    pub hotness_threshold: u64,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            hotness_threshold: DEFAULT_HOTNESS_THRESHOLD,
        }
    }
}

/// Turns one loop of a program into something runnable.
pub trait LoopCompiler<'src> {
    /// `span` starts at the `[` and ends just past its `]`.
    fn compile_loop(
        &self,
        source: &'src [u8],
        loops: &LoopMap,
        span: Range<usize>,
    ) -> Result<Box<dyn BrainfuckProgram + 'src>, NativeCodeError>;
}

/// Compiles loops to native code for the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoopCompiler;

impl<'src> LoopCompiler<'src> for NativeLoopCompiler {
    fn compile_loop(
        &self,
        source: &'src [u8],
        loops: &LoopMap,
        span: Range<usize>,
    ) -> Result<Box<dyn BrainfuckProgram + 'src>, NativeCodeError> {
        let compiled = CompiledProgram::compile_span(source, loops, span)?;
        Ok(Box::new(compiled))
    }
}

/// Where a loop is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Never reached.
    Cold,
    /// Reached, but not hot yet.
    Warming,
    /// Runs as native code.
    Compiled,
    /// Compilation was attempted and failed. Interpreted from now on.
    WarmForever,
}

/// A snapshot of one loop, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub start: usize,
    pub end: usize,
    pub evaluations: u64,
    pub state: LoopState,
}

enum Tier<'src> {
    Interpreted,
    Compiled(Rc<dyn BrainfuckProgram + 'src>),
    WarmForever,
}

struct LoopRecord<'src> {
    evaluations: u64,
    tier: Tier<'src>,
}

impl<'src> LoopRecord<'src> {
    fn new() -> Self {
        LoopRecord {
            evaluations: 0,
            tier: Tier::Interpreted,
        }
    }

    fn state(&self) -> LoopState {
        match self.tier {
            Tier::Interpreted => LoopState::Warming,
            Tier::Compiled(_) => LoopState::Compiled,
            Tier::WarmForever => LoopState::WarmForever,
        }
    }
}

/// A [BrainfuckProgram] that starts out interpreted and compiles its hot loops.
///
/// Compiled loops live as long as the JIT does; running the program again reuses them.
pub struct AdaptiveJit<'src, C = NativeLoopCompiler> {
    source: &'src [u8],
    loops: LoopMap,
    config: JitConfig,
    compiler: C,
    records: RefCell<HashMap<usize, LoopRecord<'src>>>,
    compilations: Cell<u64>,
}

impl<'src> AdaptiveJit<'src> {
    pub fn new(source: &'src [u8]) -> Result<Self, CompilationError> {
        Self::with_config(source, JitConfig::default())
    }

    pub fn with_config(source: &'src [u8], config: JitConfig) -> Result<Self, CompilationError> {
        Self::with_compiler(source, config, NativeLoopCompiler)
    }
}

impl<'src, C: LoopCompiler<'src>> AdaptiveJit<'src, C> {
    /// Uses `compiler` for hot loops instead of the native code generator.
    pub fn with_compiler(
        source: &'src [u8],
        config: JitConfig,
        compiler: C,
    ) -> Result<Self, CompilationError> {
        let loops = LoopMap::resolve(source)?;
        debug!(
            "adaptive JIT ready: {} loops, hotness threshold {}",
            loops.len(),
            config.hotness_threshold
        );

        Ok(AdaptiveJit {
            source,
            loops,
            config,
            compiler,
            records: RefCell::new(HashMap::new()),
            compilations: Cell::new(0),
        })
    }

    pub fn config(&self) -> JitConfig {
        self.config
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// The state of the loop whose `[` is at `start`.
    pub fn loop_state(&self, start: usize) -> LoopState {
        self.records
            .borrow()
            .get(&start)
            .map_or(LoopState::Cold, LoopRecord::state)
    }

    /// How many times the condition of the loop at `start` was evaluated by the interpreter.
    ///
    /// Evaluations inside compiled code are not counted.
    pub fn evaluations(&self, start: usize) -> u64 {
        self.records
            .borrow()
            .get(&start)
            .map_or(0, |record| record.evaluations)
    }

    /// How many compilations were attempted, successful or not.
    pub fn compilations(&self) -> u64 {
        self.compilations.get()
    }

    /// Every loop in the program, in source order.
    pub fn loop_stats(&self) -> Vec<LoopStats> {
        self.loops
            .iter()
            .map(|(start, end)| LoopStats {
                start,
                end,
                evaluations: self.evaluations(start),
                state: self.loop_state(start),
            })
            .collect()
    }

    /// Counts one evaluation of the loop at `start` and returns its compiled routine, compiling
    /// it first if it just became hot.
    fn routine_for(&self, start: usize, end: usize) -> Option<Rc<dyn BrainfuckProgram + 'src>> {
        let threshold = self.config.hotness_threshold.max(1);
        let mut records = self.records.borrow_mut();
        let record = records.entry(start).or_insert_with(LoopRecord::new);
        record.evaluations += 1;

        match &record.tier {
            Tier::Compiled(routine) => return Some(Rc::clone(routine)),
            Tier::WarmForever => return None,
            Tier::Interpreted if record.evaluations < threshold => return None,
            Tier::Interpreted => (),
        }

        self.compilations.set(self.compilations.get() + 1);
        debug!(
            "loop at byte {} is hot after {} evaluations; compiling",
            start, record.evaluations
        );

        match self.compiler.compile_loop(self.source, &self.loops, start..end) {
            Ok(routine) => {
                let routine: Rc<dyn BrainfuckProgram + 'src> = Rc::from(routine);
                record.tier = Tier::Compiled(Rc::clone(&routine));
                Some(routine)
            }
            Err(e) => {
                warn!(
                    "could not compile loop at byte {}; interpreting it from now on: {}",
                    start, e
                );
                record.tier = Tier::WarmForever;
                None
            }
        }
    }
}

impl<'src, C: LoopCompiler<'src>> LoopHook for AdaptiveJit<'src, C> {
    unsafe fn enter_loop(
        &self,
        start: usize,
        end: usize,
        data_pointer: *mut u8,
        callbacks: &Callbacks<'_>,
    ) -> LoopEntry {
        // The records must not stay borrowed while the routine runs.
        let routine = match self.routine_for(start, end) {
            Some(routine) => routine,
            None => return LoopEntry::Interpret,
        };

        let watch = HaltWatch::new(callbacks);
        let data_pointer = routine.run_with_callbacks(&watch.callbacks(), data_pointer);

        if watch.halted.get() {
            LoopEntry::Halted(data_pointer)
        } else {
            LoopEntry::Completed(data_pointer)
        }
    }
}

impl<'src, C: LoopCompiler<'src>> BrainfuckProgram for AdaptiveJit<'src, C> {
    unsafe fn run_with_callbacks(
        &self,
        callbacks: &Callbacks<'_>,
        data_pointer: *mut u8,
    ) -> *mut u8 {
        interpreter::execute(
            self.source,
            &self.loops,
            0..self.source.len(),
            callbacks,
            data_pointer,
            self,
        )
    }
}

/// Sits between a compiled routine and the real callbacks, noting whether the routine stopped
/// because of end of input or a failed write (rather than by finishing its loop).
struct HaltWatch<'a, 'b> {
    inner: &'a Callbacks<'b>,
    halted: Cell<bool>,
}

impl<'a, 'b> HaltWatch<'a, 'b> {
    fn new(inner: &'a Callbacks<'b>) -> Self {
        HaltWatch {
            inner,
            halted: Cell::new(false),
        }
    }

    fn callbacks(&self) -> Callbacks<'_> {
        let arg = self as *const Self as *mut c_void;
        unsafe { Callbacks::from_raw(watch_write, arg, watch_read, arg) }
    }
}

unsafe extern "C" fn watch_read(arg: *mut c_void) -> i32 {
    let watch = &*(arg as *const HaltWatch<'_, '_>);
    let value = watch.inner.read();
    if value < 0 {
        watch.halted.set(true);
    }
    value
}

unsafe extern "C" fn watch_write(arg: *mut c_void, byte: u8) -> i32 {
    let watch = &*(arg as *const HaltWatch<'_, '_>);
    let written = watch.inner.write(byte);
    if !written {
        watch.halted.set(true);
    }
    written as i32
}

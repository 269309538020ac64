//! Lowers generated code to x86-64 (System V calling convention).

use super::Target;
use crate::asm::x86_64::*;
use crate::errors::GenerationError;

// REGISTERS:
//
// rdi (argument)     - writer
// rsi (argument)     - writer's argument
// rdx (argument)     - reader
// rcx (argument)     - reader's argument
// r8  (argument)     - data pointer
//
// r12 (callee saved) - writer (during function)
const WRITER: R64 = R12;
// r13 (callee saved) - writer's argument (during function)
const WRITER_ARG: R64 = R13;
// r14 (callee saved) - reader (during function)
const READER: R64 = R14;
// rbp (callee saved) - reader's argument (during function)
const READER_ARG: R64 = RBP;
// rbx (callee saved) - current pointer on the tape (during function)
const ADDR: R64 = RBX;
//
// rax                - return value of the callbacks, and of this function
// see: https://en.wikipedia.org/wiki/X86_calling_conventions#System_V_AMD64_ABI

/// The routine is `extern "C" fn(writer, writer_arg, reader, reader_arg, data_pointer)` and
/// returns the final data pointer.
pub(crate) struct X86_64Target {
    asm: X86_64Assembly,
    /// Where the epilogue starts. Every way out of the routine jumps here.
    exit: usize,
}

/// The loop test, and the branch that skips the body.
pub(crate) struct LoopHead {
    test: usize,
    skip: Fixup,
}

impl X86_64Target {
    pub fn new() -> Self {
        X86_64Target {
            asm: X86_64Assembly::new(),
            exit: 0,
        }
    }

    fn current_cell() -> Mem {
        Mem::at(ADDR, 0)
    }
}

impl Target for X86_64Target {
    type LoopHead = LoopHead;
    type Output = Vec<u8>;

    // Five pushes after the return address: the stack is 16-byte aligned for the callbacks.
    //
    // The epilogue comes right after the prologue so that every exit is a backwards jump to a
    // known address.
    fn enter(&mut self) -> Result<(), GenerationError> {
        self.asm.push(R12);
        self.asm.push(R13);
        self.asm.push(R14);
        self.asm.push(RBP);
        self.asm.push(RBX);

        self.asm.mov(WRITER, RDI);
        self.asm.mov(WRITER_ARG, RSI);
        self.asm.mov(READER, RDX);
        self.asm.mov(READER_ARG, RCX);
        self.asm.mov(ADDR, R8);

        let over_epilogue = self.asm.jmp_forward(Width::Rel8);

        self.exit = self.asm.position();
        self.asm.mov(RAX, ADDR);
        self.asm.pop(RBX);
        self.asm.pop(RBP);
        self.asm.pop(R14);
        self.asm.pop(R13);
        self.asm.pop(R12);
        self.asm.ret();

        self.asm.patch_to_here(over_epilogue)
    }

    fn leave(&mut self) -> Result<(), GenerationError> {
        self.asm.jmp(self.exit)
    }

    fn add_to_cell(&mut self, offset: i8, amount: u8) {
        self.asm.add_mem8(Mem::at(ADDR, offset), amount);
    }

    fn move_pointer(&mut self, displacement: i8) {
        self.asm.add64(ADDR, displacement);
    }

    fn read_cell(&mut self) -> Result<(), GenerationError> {
        // eax <- reader(reader_arg)
        self.asm.mov(RDI, READER_ARG);
        self.asm.call(READER);
        // negative means end of input
        self.asm.test32(EAX, EAX);
        self.asm.jcc(Cond::Sign, self.exit)?;
        self.asm.mov_store8(Self::current_cell(), AL);
        Ok(())
    }

    fn write_cell(&mut self) -> Result<(), GenerationError> {
        // eax <- writer(writer_arg, *p)
        self.asm.mov(RDI, WRITER_ARG);
        self.asm.movzx(ESI, Self::current_cell());
        self.asm.call(WRITER);
        // zero means the write failed
        self.asm.test32(EAX, EAX);
        self.asm.jcc(Cond::Zero, self.exit)
    }

    fn start_loop(&mut self) -> LoopHead {
        let test = self.asm.position();
        self.asm.cmp_mem8(Self::current_cell(), 0);
        let skip = self.asm.jcc_forward(Cond::Zero);
        LoopHead { test, skip }
    }

    fn end_loop(&mut self, head: LoopHead) -> Result<(), GenerationError> {
        self.asm.jmp(head.test)?;
        self.asm.patch_to_here(head.skip)
    }

    fn finish(self) -> Result<Vec<u8>, GenerationError> {
        self.asm.finish()
    }
}

//! Assemblers for the instruction sets we can generate code for.

pub mod x86_64;

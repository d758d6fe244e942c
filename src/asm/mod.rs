//! Two-pass symbolic assembler and disassembler, plus machine-format I/O
//! (plain binary, one-byte-per-line text, Intel HEX).

pub mod assembler;
pub mod disassembler;
pub mod hexfmt;

pub use assembler::{assemble, AsmError};
pub use disassembler::disassemble;

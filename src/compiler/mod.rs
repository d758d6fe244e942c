//! The high-level compiler: source text in, target assembly lines out.
//!
//! Submodules correspond directly to the components that collaborate to get
//! there: [`commands`] parses source into a structured statement list,
//! [`expr`] tokenizes/parses/simplifies/plans right-hand sides,
//! [`registers`] and [`variables`] track compile-time state, [`labels`]
//! names branch targets, and [`codegen`] drives all of them to emit lines.

pub mod codegen;
pub mod commands;
pub mod expr;
pub mod labels;
pub mod registers;
pub mod variables;

pub use codegen::{CodeGenError, CodeGenerator};
pub use commands::{parse_program, Command, ParseError};

/// Compile a complete program's source text into an assembly line stream,
/// using the project's configured data-memory window and scratch byte.
pub fn compile_source(
    source: &str,
    var_start: u16,
    var_end: u16,
    scratch_addr: u16,
) -> Result<Vec<String>, CompileError> {
    let program = commands::parse_program(source)?;
    let mut generator = CodeGenerator::new(var_start, var_end, scratch_addr);
    let lines = generator.compile(&program)?;
    Ok(lines)
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    CodeGen(#[from] CodeGenError),
}

//! Standalone assembler binary: symbolic source in, machine code out.

use anyhow::{Context, Result};
use arnicomp::asm::{assemble, disassemble, hexfmt};
use clap::Parser;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arnicomp-asm")]
#[command(about = "Assemble ArniComp symbolic source into machine code")]
struct Args {
    /// Input file (use - for stdin)
    #[arg(default_value = "-")]
    input: String,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the disassembly of the assembled program to stderr
    #[arg(short, long)]
    disasm: bool,

    /// Emit Intel HEX instead of raw binary
    #[arg(long)]
    hex: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let source = if args.input == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(&args.input).context("failed to read input")?
    };

    let bytes = assemble(&source).context("assembly failed")?;
    eprintln!("assembled {} bytes", bytes.len());

    if args.disasm {
        eprintln!("\ndisassembly:");
        for line in disassemble(&bytes) {
            eprintln!("  {line}");
        }
    }

    if let Some(output) = args.output {
        if args.hex {
            fs::write(&output, hexfmt::to_intel_hex(&bytes))?;
        } else {
            fs::write(&output, &bytes)?;
        }
        eprintln!("wrote to {}", output.display());
    } else if args.hex {
        println!("{}", hexfmt::to_intel_hex(&bytes));
    } else {
        io::stdout().write_all(&bytes)?;
    }

    Ok(())
}

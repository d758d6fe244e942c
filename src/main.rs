//! ArniComp toolchain CLI: assemble, disassemble, compile, and run programs
//! for the 8-bit target.

use anyhow::{Context, Result};
use arnicomp::asm::{assemble, disassemble, hexfmt};
use arnicomp::compiler::compile_source;
use arnicomp::config::ArniCompConfig;
use arnicomp::emulator::{Bus, Cpu, SevenSegmentDevice};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arnicomp")]
#[command(version)]
#[command(about = "Toolchain for the ArniComp 8-bit CPU", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Binary,
    Text,
    Hex,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a symbolic source file into a machine-code image
    Asm {
        /// Input assembly source file
        input: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output machine format
        #[arg(short, long, value_enum, default_value = "binary")]
        format: OutputFormat,
    },

    /// Disassemble a machine-code image back into symbolic source
    Disasm {
        /// Input binary file
        input: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile a high-level source file into assembly text
    Compile {
        /// Input high-level source file
        input: PathBuf,

        /// Output assembly file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Project config file (defaults to `arnicomp.toml` if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Compile and/or assemble, then run a program on the emulator
    Run {
        /// Input source file (`.arni` high-level source or assembled binary)
        input: PathBuf,

        /// Treat the input as already-assembled machine code
        #[arg(long)]
        binary: bool,

        /// Maximum instructions to execute before giving up
        #[arg(long)]
        max_cycles: Option<u64>,

        /// Print final CPU register/flag state after execution
        #[arg(long)]
        dump_state: bool,

        /// Stop execution before the instruction at this address (repeatable)
        #[arg(long = "break", value_name = "ADDR", value_parser = parse_addr)]
        breakpoints: Vec<u16>,

        /// Log every seven-segment device write as it happens
        #[arg(long)]
        trace_device: bool,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("invalid address '{0}'")]
struct AddrParseError(String);

fn parse_addr(text: &str) -> std::result::Result<u16, AddrParseError> {
    let trimmed = text.trim();
    let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        trimmed.parse()
    };
    parsed.map_err(|_| AddrParseError(text.to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Asm { input, output, format } => cmd_asm(&input, output.as_deref(), format),
        Commands::Disasm { input, output } => cmd_disasm(&input, output.as_deref()),
        Commands::Compile { input, output, config } => cmd_compile(&input, output.as_deref(), config.as_deref()),
        Commands::Run { input, binary, max_cycles, dump_state, breakpoints, trace_device } => {
            cmd_run(&input, binary, max_cycles, dump_state, &breakpoints, trace_device)
        }
    }
}

fn cmd_asm(input: &std::path::Path, output: Option<&std::path::Path>, format: OutputFormat) -> Result<()> {
    let source = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let bytes = assemble(&source).context("assembling source")?;
    tracing::info!(bytes = bytes.len(), "assembled program");

    let rendered: Vec<u8> = match format {
        OutputFormat::Binary => hexfmt::to_binary_image(&bytes),
        OutputFormat::Text => hexfmt::to_binary_text(&bytes).into_bytes(),
        OutputFormat::Hex => hexfmt::to_intel_hex(&bytes).into_bytes(),
    };
    write_output(output, &rendered)
}

fn cmd_disasm(input: &std::path::Path, output: Option<&std::path::Path>) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let lines = disassemble(&bytes);
    write_output(output, lines.join("\n").as_bytes())
}

fn cmd_compile(
    input: &std::path::Path,
    output: Option<&std::path::Path>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let source = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let lines = compile_source(
        &source,
        config.memory.var_start,
        config.memory.var_end,
        config.memory.scratch_addr,
    )
    .context("compiling source")?;
    write_output(output, lines.join("\n").as_bytes())
}

fn cmd_run(
    input: &std::path::Path,
    binary: bool,
    max_cycles: Option<u64>,
    dump_state: bool,
    breakpoints: &[u16],
    trace_device: bool,
) -> Result<()> {
    let config = load_config(None)?;
    let bytes = if binary {
        fs::read(input).with_context(|| format!("reading {}", input.display()))?
    } else {
        let source = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
        let is_high_level = input.extension().and_then(|e| e.to_str()) != Some("asm");
        let asm_text = if is_high_level {
            compile_source(
                &source,
                config.memory.var_start,
                config.memory.var_end,
                config.memory.scratch_addr,
            )
            .context("compiling source")?
            .join("\n")
        } else {
            source
        };
        assemble(&asm_text).context("assembling program")?
    };

    let mut bus = Bus::new(0x10000);
    for device in &config.devices.seven_segment {
        let id = device.id.clone();
        let device = if trace_device {
            SevenSegmentDevice::new(device.id.clone(), device.base).with_on_change(move |value, state| {
                tracing::info!(device = %id, value, ?state, "device write");
            })
        } else {
            SevenSegmentDevice::new(device.id.clone(), device.base)
        };
        bus.attach(Box::new(device));
    }

    let mut cpu = Cpu::with_bus(bus);
    cpu.load_program(&bytes, 0);
    cpu.breakpoints.extend(breakpoints.iter().copied());
    let (cycles, hit_breakpoint) = cpu.run_to_next_breakpoint(max_cycles.unwrap_or(config.emulator.max_cycles));
    if hit_breakpoint {
        let pc = format!("0x{:04X}", cpu.pc);
        tracing::info!(cycles, pc = %pc, "stopped at breakpoint");
    } else {
        tracing::info!(cycles, halted = cpu.halted, "execution finished");
    }

    if dump_state {
        println!(
            "PC=0x{:04X} RA=0x{:02X} RD=0x{:02X} ACC=0x{:02X} MARL=0x{:02X} MARH=0x{:02X} PRL=0x{:02X} PRH=0x{:02X}",
            cpu.pc, cpu.ra, cpu.rd, cpu.acc, cpu.marl, cpu.marh, cpu.prl, cpu.prh
        );
        println!(
            "flags: EQ={} LT={} GT={} C={}",
            cpu.flags.equal as u8, cpu.flags.lt as u8, cpu.flags.gt as u8, cpu.flags.carry as u8
        );
        println!("cycles executed: {cycles}, halted: {}", cpu.halted);
    }
    Ok(())
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<ArniCompConfig> {
    match explicit {
        Some(path) => ArniCompConfig::load(path).context("loading config"),
        None => ArniCompConfig::load_from_cwd().context("loading config"),
    }
}

fn write_output(output: Option<&std::path::Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(bytes)?;
            if !bytes.ends_with(b"\n") {
                println!();
            }
        }
    }
    Ok(())
}

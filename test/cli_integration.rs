//! CLI integration tests: invoke the built `arnicomp` and `arnicomp-asm`
//! binaries and check their end-to-end behavior.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn binary(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("target");
    path.push("debug");
    path.push(name);
    path
}

fn temp_dir() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push("arnicomp_cli_tests");
    fs::create_dir_all(&path).ok();
    path
}

#[test]
fn asm_subcommand_writes_a_binary_image() {
    let src_path = temp_dir().join("simple.asm");
    fs::write(&src_path, "LDI #42\nHLT").unwrap();
    let out_path = temp_dir().join("simple.bin");

    let output = Command::new(binary("arnicomp"))
        .args(["asm", src_path.to_str().unwrap(), "-o", out_path.to_str().unwrap()])
        .output()
        .expect("failed to run arnicomp asm");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let bytes = fs::read(&out_path).unwrap();
    assert_eq!(bytes.len(), 65536);
    assert_eq!(bytes[0], 0x80 | 42);
    assert_eq!(bytes[1], 0x01);
}

#[test]
fn disasm_round_trips_through_the_asm_binary() {
    let asm_path = temp_dir().join("roundtrip.asm");
    fs::write(&asm_path, "LDI #5\nMOV RD,RA\nADD RA\nHLT").unwrap();

    let assembled = Command::new(binary("arnicomp-asm"))
        .arg(asm_path.to_str().unwrap())
        .output()
        .expect("failed to run arnicomp-asm");
    assert!(assembled.status.success());

    let bin_path = temp_dir().join("roundtrip.bin");
    fs::write(&bin_path, &assembled.stdout).unwrap();

    let disasm = Command::new(binary("arnicomp"))
        .args(["disasm", bin_path.to_str().unwrap()])
        .output()
        .expect("failed to run arnicomp disasm");
    assert!(disasm.status.success());
    let text = String::from_utf8_lossy(&disasm.stdout);
    assert!(text.contains("HLT"));
}

#[test]
fn compile_subcommand_emits_assembly_text() {
    let src_path = temp_dir().join("program.arni");
    fs::write(&src_path, "byte a = 1\nvolatile byte out = 0\nout = a + 1").unwrap();

    let output = Command::new(binary("arnicomp"))
        .args(["compile", src_path.to_str().unwrap()])
        .output()
        .expect("failed to run arnicomp compile");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(!text.trim().is_empty());
}

#[test]
fn run_subcommand_executes_an_assembled_binary() {
    let src_path = temp_dir().join("run_me.asm");
    fs::write(&src_path, "LDI #9\nHLT").unwrap();

    let output = Command::new(binary("arnicomp"))
        .args(["run", src_path.to_str().unwrap(), "--dump-state"])
        .output()
        .expect("failed to run arnicomp run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("RA=0x09"));
}

#[test]
fn unknown_mnemonic_is_reported_as_a_failure_exit_code() {
    let src_path = temp_dir().join("bad.asm");
    fs::write(&src_path, "FROB RA").unwrap();

    let output = Command::new(binary("arnicomp"))
        .args(["asm", src_path.to_str().unwrap()])
        .output()
        .expect("failed to run arnicomp asm");
    assert!(!output.status.success());
}

//! Cycle-stepped CPU core: registers, flags, the hardware comparator, and
//! the fetch/decode/execute loop over Harvard-separated program and data
//! memory.

use super::bus::Bus;
use super::devices::SevenSegmentDevice;
use crate::isa::{self, ArithOp, DestReg, JumpCond, Mnemonic, Operand, SrcReg};
use std::collections::HashSet;

const PROGRAM_MEMORY_SIZE: usize = 65536;
const DATA_MEMORY_SIZE: usize = 65536;
const SEVEN_SEGMENT_BASE: u16 = 0xFF00;

/// The hardware comparator's three outputs plus the carry/borrow flag,
/// updated on every ALU and `ADDI`/`SUBI` instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub equal: bool,
    pub lt: bool,
    pub gt: bool,
    pub carry: bool,
}

impl Flags {
    /// The comparator is always fed `(a, b)` as unsigned bytes, regardless of
    /// whether the surrounding instruction is an add or a subtract.
    fn update(&mut self, a: u8, b: u8) {
        self.lt = a > b;
        self.equal = a == b;
        self.gt = a < b;
    }
}

/// An 8-bit CPU with a 16-bit data address space, separate (Harvard) program
/// memory, and a one-byte-at-a-time memory-mode addressing scheme.
pub struct Cpu {
    pub ra: u8,
    pub rd: u8,
    pub acc: u8,
    pub marl: u8,
    pub marh: u8,
    pub prl: u8,
    pub prh: u8,
    pub flags: Flags,
    pub memory_mode_high: bool,
    pub pc: u16,
    pub halted: bool,
    program_memory: Vec<u8>,
    pub bus: Bus,
    pub breakpoints: HashSet<u16>,
}

impl Cpu {
    pub fn new() -> Self {
        let mut bus = Bus::new(DATA_MEMORY_SIZE);
        bus.attach(Box::new(SevenSegmentDevice::new("seg0", SEVEN_SEGMENT_BASE)));
        Self::with_bus(bus)
    }

    /// Build a CPU around a caller-assembled bus, e.g. one whose devices
    /// were placed per `arnicomp.toml` or wired with a tracing callback.
    pub fn with_bus(bus: Bus) -> Self {
        Cpu {
            ra: 0,
            rd: 0,
            acc: 0,
            marl: 0,
            marh: 0,
            prl: 0,
            prh: 0,
            flags: Flags::default(),
            memory_mode_high: false,
            pc: 0,
            halted: false,
            program_memory: vec![0; PROGRAM_MEMORY_SIZE],
            bus,
            breakpoints: HashSet::new(),
        }
    }

    /// Reset registers, flags, and data RAM to power-on state. Program
    /// memory persists, matching hardware where the EEPROM survives a reset.
    pub fn reset(&mut self) {
        self.ra = 0;
        self.rd = 0;
        self.acc = 0;
        self.marl = 0;
        self.marh = 0;
        self.prl = 0;
        self.prh = 0;
        self.pc = 0;
        self.flags = Flags::default();
        self.memory_mode_high = false;
        self.halted = false;
        self.bus.reset();
    }

    pub fn load_program(&mut self, bytes: &[u8], start_address: u16) {
        for (i, &b) in bytes.iter().enumerate() {
            let addr = start_address as usize + i;
            if addr < self.program_memory.len() {
                self.program_memory[addr] = b;
            }
        }
    }

    pub fn program_memory(&self) -> &[u8] {
        &self.program_memory
    }

    fn data_address(&self) -> u16 {
        if self.memory_mode_high {
            ((self.marh as u16) << 8) | self.marl as u16
        } else {
            self.marl as u16
        }
    }

    fn read_memory(&mut self) -> u8 {
        let addr = self.data_address();
        self.bus.read8(addr)
    }

    fn write_memory(&mut self, value: u8) {
        let addr = self.data_address();
        self.bus.write8(addr, value);
    }

    fn get_src(&mut self, src: SrcReg) -> u8 {
        match src {
            SrcReg::Ra => self.ra,
            SrcReg::Rd => self.rd,
            SrcReg::Acc => self.acc,
            SrcReg::Clr => 0,
            SrcReg::Pcl => self.prl,
            SrcReg::Pch => self.prh,
            SrcReg::Ml => {
                let prev = self.memory_mode_high;
                self.memory_mode_high = false;
                let val = self.read_memory();
                self.memory_mode_high = prev;
                val
            }
            SrcReg::Mh => {
                let prev = self.memory_mode_high;
                self.memory_mode_high = true;
                let val = self.read_memory();
                self.memory_mode_high = prev;
                val
            }
        }
    }

    fn set_dest(&mut self, dest: DestReg, value: u8) {
        match dest {
            DestReg::Ra => self.ra = value,
            DestReg::Rd => self.rd = value,
            DestReg::Marl => self.marl = value,
            DestReg::Marh => self.marh = value,
            DestReg::Prl => self.prl = value,
            DestReg::Prh => self.prh = value,
            DestReg::Ml => {
                self.memory_mode_high = false;
                self.write_memory(value);
            }
            DestReg::Mh => {
                self.memory_mode_high = true;
                self.write_memory(value);
            }
        }
    }

    fn jump_target(&self) -> u16 {
        ((self.prh as u16) << 8) | self.prl as u16
    }

    fn should_jump(&self, cond: JumpCond) -> bool {
        match cond {
            JumpCond::Jmp => true,
            JumpCond::Jeq => self.flags.equal,
            JumpCond::Jgt => self.flags.gt,
            JumpCond::Jlt => self.flags.lt,
            JumpCond::Jge => self.flags.gt || self.flags.equal,
            JumpCond::Jle => self.flags.lt || self.flags.equal,
            JumpCond::Jne => !self.flags.equal,
            JumpCond::Jc => self.flags.carry,
        }
    }

    fn execute_arith(&mut self, op: ArithOp, src_val: u8) {
        self.flags.update(self.rd, src_val);
        match op {
            ArithOp::Add | ArithOp::Adc => {
                let mut total = self.rd as u16 + src_val as u16;
                if op == ArithOp::Adc && self.flags.carry {
                    total += 1;
                }
                self.flags.carry = total > 0xFF;
                self.acc = total as u8;
            }
            ArithOp::Sub | ArithOp::Sbc => {
                let subtrahend = src_val as i32 + if op == ArithOp::Sbc && self.flags.carry { 1 } else { 0 };
                let minuend = self.rd as i32;
                let borrow = minuend < subtrahend;
                self.flags.carry = !borrow;
                self.acc = (minuend.wrapping_sub(subtrahend) & 0xFF) as u8;
            }
        }
    }

    fn execute(&mut self, mnemonic: Mnemonic, operands: &[Operand]) {
        match mnemonic {
            Mnemonic::Nop => {}
            Mnemonic::Hlt => self.halted = true,
            Mnemonic::Cra => self.ra = 0,
            Mnemonic::Ldi => {
                if let [Operand::Imm(v)] = operands {
                    self.ra = v & 0x7F;
                }
            }
            Mnemonic::Mov => {
                if let [Operand::Dest(dest), Operand::Src(src)] = operands {
                    let val = self.get_src(*src);
                    self.set_dest(*dest, val);
                }
            }
            Mnemonic::Arith(op) => {
                if let [Operand::Src(src)] = operands {
                    let src_val = self.get_src(*src);
                    self.execute_arith(op, src_val);
                }
            }
            Mnemonic::And => {
                if let [Operand::Src(src)] = operands {
                    let src_val = self.get_src(*src);
                    self.flags.update(self.rd, src_val);
                    self.acc &= src_val;
                }
            }
            Mnemonic::Addi => {
                if let [Operand::Imm(imm)] = operands {
                    let imm = imm & 0x07;
                    self.flags.update(self.rd, imm);
                    let total = self.rd as u16 + imm as u16;
                    self.flags.carry = total > 0xFF;
                    self.acc = total as u8;
                }
            }
            Mnemonic::Subi => {
                if let [Operand::Imm(imm)] = operands {
                    let imm = imm & 0x03;
                    self.flags.update(self.rd, imm);
                    let borrow = self.rd < imm;
                    self.flags.carry = !borrow;
                    self.acc = self.rd.wrapping_sub(imm);
                }
            }
            Mnemonic::Jump(cond) => {
                if self.should_jump(cond) {
                    self.pc = self.jump_target();
                }
            }
        }
    }

    /// Fetch, decode, and execute one instruction. Returns `false` when
    /// execution cannot continue: the CPU is halted, a breakpoint was hit,
    /// or program memory is exhausted.
    pub fn step(&mut self) -> bool {
        if self.halted {
            return false;
        }
        if self.breakpoints.contains(&self.pc) {
            return false;
        }
        if self.pc as usize >= self.program_memory.len() {
            self.halted = true;
            return false;
        }
        let instruction = self.program_memory[self.pc as usize];
        self.pc = self.pc.wrapping_add(1);
        let (mnemonic, operands) = isa::decode(instruction);
        self.execute(mnemonic, &operands);
        true
    }

    /// Run until halt, a breakpoint, or `max_cycles` is reached. Returns the
    /// number of instructions actually executed.
    pub fn run(&mut self, max_cycles: u64) -> u64 {
        let mut cycles = 0;
        while cycles < max_cycles && self.step() {
            cycles += 1;
        }
        cycles
    }

    /// Run up to `max_cycles`, stopping early the moment a breakpoint is
    /// hit. Distinguishes that case from a plain halt or budget exhaustion
    /// for callers that want to report which one occurred (e.g. a
    /// `run --break` invocation).
    pub fn run_to_next_breakpoint(&mut self, max_cycles: u64) -> (u64, bool) {
        let cycles = self.run(max_cycles);
        let hit_breakpoint = !self.halted && self.breakpoints.contains(&self.pc);
        (cycles, hit_breakpoint)
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Cpu::new()
    }
}

//! ISA codec: the single source of truth for encoding and decoding the
//! target's 8-bit instruction word.
//!
//! Every other subsystem (assembler, disassembler, code generator, emulator)
//! goes through [`encode`] / [`decode`] rather than re-deriving bit layouts,
//! so a change to the instruction table only has to happen here.

use std::fmt;

mod mnemonic;

pub use mnemonic::Mnemonic;

/// Errors raised while encoding a mnemonic/operand pair into a byte.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("immediate {value} out of range for {mnemonic}: expected 0..={max}")]
    ImmediateOutOfRange {
        mnemonic: &'static str,
        value: i64,
        max: u32,
    },
    #[error("unknown register name: {0}")]
    UnknownRegister(String),
    #[error("{mnemonic} requires a destination register, got none")]
    MissingDestination { mnemonic: &'static str },
    #[error("{mnemonic} requires a source register, got none")]
    MissingSource { mnemonic: &'static str },
    #[error("{mnemonic} requires an immediate operand")]
    MissingImmediate { mnemonic: &'static str },
}

/// A destination register, as it appears in the three left-hand bits of `MOV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DestReg {
    Ra = 0,
    Rd = 1,
    Marl = 2,
    Marh = 3,
    Prl = 4,
    Prh = 5,
    Ml = 6,
    Mh = 7,
}

impl DestReg {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => DestReg::Ra,
            1 => DestReg::Rd,
            2 => DestReg::Marl,
            3 => DestReg::Marh,
            4 => DestReg::Prl,
            5 => DestReg::Prh,
            6 => DestReg::Ml,
            _ => DestReg::Mh,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            DestReg::Ra => "RA",
            DestReg::Rd => "RD",
            DestReg::Marl => "MARL",
            DestReg::Marh => "MARH",
            DestReg::Prl => "PRL",
            DestReg::Prh => "PRH",
            DestReg::Ml => "ML",
            DestReg::Mh => "MH",
        }
    }

    /// Case-insensitive lookup by register mnemonic.
    pub fn from_name(name: &str) -> Result<Self, EncodeError> {
        match name.to_ascii_uppercase().as_str() {
            "RA" => Ok(DestReg::Ra),
            "RD" => Ok(DestReg::Rd),
            "MARL" => Ok(DestReg::Marl),
            "MARH" => Ok(DestReg::Marh),
            "PRL" => Ok(DestReg::Prl),
            "PRH" => Ok(DestReg::Prh),
            "ML" => Ok(DestReg::Ml),
            "MH" => Ok(DestReg::Mh),
            other => Err(EncodeError::UnknownRegister(other.to_string())),
        }
    }
}

impl fmt::Display for DestReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A source register/operand, as it appears in the three right-hand bits of
/// `MOV` and of every ALU instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SrcReg {
    Ra = 0,
    Rd = 1,
    Acc = 2,
    Clr = 3,
    Pcl = 4,
    Pch = 5,
    Ml = 6,
    Mh = 7,
}

impl SrcReg {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => SrcReg::Ra,
            1 => SrcReg::Rd,
            2 => SrcReg::Acc,
            3 => SrcReg::Clr,
            4 => SrcReg::Pcl,
            5 => SrcReg::Pch,
            6 => SrcReg::Ml,
            _ => SrcReg::Mh,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            SrcReg::Ra => "RA",
            SrcReg::Rd => "RD",
            SrcReg::Acc => "ACC",
            SrcReg::Clr => "CLR",
            SrcReg::Pcl => "PCL",
            SrcReg::Pch => "PCH",
            SrcReg::Ml => "ML",
            SrcReg::Mh => "MH",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, EncodeError> {
        match name.to_ascii_uppercase().as_str() {
            "RA" => Ok(SrcReg::Ra),
            "RD" => Ok(SrcReg::Rd),
            "ACC" => Ok(SrcReg::Acc),
            "CLR" => Ok(SrcReg::Clr),
            "PCL" => Ok(SrcReg::Pcl),
            "PCH" => Ok(SrcReg::Pch),
            "ML" => Ok(SrcReg::Ml),
            "MH" => Ok(SrcReg::Mh),
            other => Err(EncodeError::UnknownRegister(other.to_string())),
        }
    }
}

impl fmt::Display for SrcReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The four comparator/ALU arithmetic operations encoded in the `001oosss` group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0b00,
    Sub = 0b01,
    Adc = 0b10,
    Sbc = 0b11,
}

impl ArithOp {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => ArithOp::Add,
            0b01 => ArithOp::Sub,
            0b10 => ArithOp::Adc,
            _ => ArithOp::Sbc,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "ADD",
            ArithOp::Sub => "SUB",
            ArithOp::Adc => "ADC",
            ArithOp::Sbc => "SBC",
        }
    }
}

/// The eight conditional-jump selectors encoded in `00001ccc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JumpCond {
    Jmp = 0b000,
    Jeq = 0b001,
    Jgt = 0b010,
    Jlt = 0b011,
    Jge = 0b100,
    Jle = 0b101,
    Jne = 0b110,
    Jc = 0b111,
}

impl JumpCond {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0b000 => JumpCond::Jmp,
            0b001 => JumpCond::Jeq,
            0b010 => JumpCond::Jgt,
            0b011 => JumpCond::Jlt,
            0b100 => JumpCond::Jge,
            0b101 => JumpCond::Jle,
            0b110 => JumpCond::Jne,
            _ => JumpCond::Jc,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            JumpCond::Jmp => "JMP",
            JumpCond::Jeq => "JEQ",
            JumpCond::Jgt => "JGT",
            JumpCond::Jlt => "JLT",
            JumpCond::Jge => "JGE",
            JumpCond::Jle => "JLE",
            JumpCond::Jne => "JNE",
            JumpCond::Jc => "JC",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "JMP" => JumpCond::Jmp,
            "JEQ" => JumpCond::Jeq,
            "JGT" => JumpCond::Jgt,
            "JLT" => JumpCond::Jlt,
            "JGE" => JumpCond::Jge,
            "JLE" => JumpCond::Jle,
            "JNE" => JumpCond::Jne,
            "JC" => JumpCond::Jc,
            _ => return None,
        })
    }
}

/// An operand attached to a decoded or to-be-encoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Dest(DestReg),
    Src(SrcReg),
    Imm(u8),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Dest(r) => write!(f, "{r}"),
            Operand::Src(r) => write!(f, "{r}"),
            Operand::Imm(v) => write!(f, "#{v}"),
        }
    }
}

/// Decode a single instruction byte into `(mnemonic, operands)`.
///
/// Patterns are checked longest-and-most-specific first, mirroring the order
/// in which they are laid out in the instruction table: `HLT`/`CRA`/`NOP`
/// bit-exact, then `SUBI`, then jumps, then `ADDI`, then `AND`, then
/// arithmetic, then `MOV`, and finally `LDI` as the top-bit-set catch-all.
pub fn decode(byte: u8) -> (Mnemonic, Vec<Operand>) {
    if byte & 0x80 != 0 {
        return (Mnemonic::Ldi, vec![Operand::Imm(byte & 0x7F)]);
    }
    match byte {
        0b0000_0000 | 0b0000_0010 => return (Mnemonic::Nop, vec![]),
        0b0000_0001 => return (Mnemonic::Hlt, vec![]),
        0b0000_0011 => return (Mnemonic::Cra, vec![]),
        _ => {}
    }
    if byte & 0b1111_1100 == 0b0000_0100 {
        let imm = byte & 0b0000_0011;
        return (Mnemonic::Subi, vec![Operand::Imm(imm)]);
    }
    if byte & 0b1111_1000 == 0b0000_1000 {
        let cond = JumpCond::from_bits(byte & 0b111);
        return (Mnemonic::Jump(cond), vec![]);
    }
    if byte & 0b1111_1000 == 0b0001_1000 {
        let imm = byte & 0b0000_0111;
        return (Mnemonic::Addi, vec![Operand::Imm(imm)]);
    }
    if byte & 0b1111_1000 == 0b0001_0000 {
        let src = SrcReg::from_bits(byte & 0b111);
        return (Mnemonic::And, vec![Operand::Src(src)]);
    }
    if byte & 0b1110_0000 == 0b0010_0000 {
        let op = ArithOp::from_bits((byte >> 3) & 0b11);
        let src = SrcReg::from_bits(byte & 0b111);
        return (Mnemonic::Arith(op), vec![Operand::Src(src)]);
    }
    if byte & 0b1100_0000 == 0b0100_0000 {
        let dest = DestReg::from_bits((byte >> 3) & 0b111);
        let src = SrcReg::from_bits(byte & 0b111);
        return (Mnemonic::Mov, vec![Operand::Dest(dest), Operand::Src(src)]);
    }
    // Unreachable given the table covers every byte value, kept for safety.
    (Mnemonic::Nop, vec![])
}

/// Encode a mnemonic and its operands into the corresponding instruction byte.
pub fn encode(mnemonic: Mnemonic, operands: &[Operand]) -> Result<u8, EncodeError> {
    match mnemonic {
        Mnemonic::Nop => Ok(0b0000_0000),
        Mnemonic::Hlt => Ok(0b0000_0001),
        Mnemonic::Cra => Ok(0b0000_0011),
        Mnemonic::Ldi => {
            let imm = take_imm(operands, "LDI")?;
            if imm > 127 {
                return Err(EncodeError::ImmediateOutOfRange {
                    mnemonic: "LDI",
                    value: imm as i64,
                    max: 127,
                });
            }
            Ok(0x80 | imm)
        }
        Mnemonic::Subi => {
            let imm = take_imm(operands, "SUBI")?;
            if imm > 3 {
                return Err(EncodeError::ImmediateOutOfRange {
                    mnemonic: "SUBI",
                    value: imm as i64,
                    max: 3,
                });
            }
            Ok(0b0000_0100 | imm)
        }
        Mnemonic::Addi => {
            let imm = take_imm(operands, "ADDI")?;
            if imm > 7 {
                return Err(EncodeError::ImmediateOutOfRange {
                    mnemonic: "ADDI",
                    value: imm as i64,
                    max: 7,
                });
            }
            Ok(0b0001_1000 | imm)
        }
        Mnemonic::And => {
            let src = take_src(operands, "AND")?;
            Ok(0b0001_0000 | src.bits())
        }
        Mnemonic::Arith(op) => {
            let src = take_src(operands, op.mnemonic())?;
            Ok(0b0010_0000 | (op.bits() << 3) | src.bits())
        }
        Mnemonic::Jump(cond) => Ok(0b0000_1000 | cond.bits()),
        Mnemonic::Mov => {
            let dest = take_dest(operands, "MOV")?;
            let src = take_src(operands, "MOV")?;
            Ok(0b0100_0000 | (dest.bits() << 3) | src.bits())
        }
    }
}

fn take_imm(operands: &[Operand], name: &'static str) -> Result<u8, EncodeError> {
    operands
        .iter()
        .find_map(|o| match o {
            Operand::Imm(v) => Some(*v),
            _ => None,
        })
        .ok_or(EncodeError::MissingImmediate { mnemonic: name })
}

fn take_dest(operands: &[Operand], name: &'static str) -> Result<DestReg, EncodeError> {
    operands
        .iter()
        .find_map(|o| match o {
            Operand::Dest(r) => Some(*r),
            _ => None,
        })
        .ok_or(EncodeError::MissingDestination { mnemonic: name })
}

fn take_src(operands: &[Operand], name: &'static str) -> Result<SrcReg, EncodeError> {
    operands
        .iter()
        .find_map(|o| match o {
            Operand::Src(r) => Some(*r),
            _ => None,
        })
        .ok_or(EncodeError::MissingSource { mnemonic: name })
}

/// Render `(mnemonic, operands)` the way the assembler's text syntax expects.
pub fn format_instruction(mnemonic: Mnemonic, operands: &[Operand]) -> String {
    let mnem = mnemonic.canonical_name();
    if operands.is_empty() {
        return mnem.to_string();
    }
    let rendered: Vec<String> = operands.iter().map(|o| o.to_string()).collect();
    format!("{mnem} {}", rendered.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_marl_ra_encodes_as_0x50() {
        let byte = encode(
            Mnemonic::Mov,
            &[Operand::Dest(DestReg::Marl), Operand::Src(SrcReg::Ra)],
        )
        .unwrap();
        assert_eq!(byte, 0x50);
        let (mnem, ops) = decode(0x50);
        assert_eq!(mnem, Mnemonic::Mov);
        assert_eq!(
            ops,
            vec![Operand::Dest(DestReg::Marl), Operand::Src(SrcReg::Ra)]
        );
    }

    #[test]
    fn ldi_round_trips_for_all_legal_immediates() {
        for imm in 0u8..=127 {
            let byte = encode(Mnemonic::Ldi, &[Operand::Imm(imm)]).unwrap();
            let (mnem, ops) = decode(byte);
            assert_eq!(mnem, Mnemonic::Ldi);
            assert_eq!(ops, vec![Operand::Imm(imm)]);
        }
    }

    #[test]
    fn ldi_rejects_out_of_range_immediate() {
        let err = encode(Mnemonic::Ldi, &[Operand::Imm(128)]).unwrap_err();
        assert!(matches!(err, EncodeError::ImmediateOutOfRange { .. }));
    }

    #[test]
    fn nop_exception_round_trips_to_canonical_encoding() {
        // 0b00000010 decodes to NOP but re-encodes to the canonical 0b00000000.
        let (mnem, ops) = decode(0b0000_0010);
        assert_eq!(mnem, Mnemonic::Nop);
        let byte = encode(mnem, &ops).unwrap();
        assert_eq!(byte, 0b0000_0000);
    }

    #[test]
    fn every_byte_decodes_to_something_and_canonical_bytes_round_trip() {
        for byte in 0u16..=255 {
            let byte = byte as u8;
            let (mnem, ops) = decode(byte);
            let re = encode(mnem, &ops).unwrap();
            if byte == 0b0000_0010 {
                assert_eq!(re, 0b0000_0000);
            } else {
                assert_eq!(re, byte, "byte 0x{byte:02X} did not round-trip");
            }
        }
    }

    #[test]
    fn arithmetic_ops_encode_with_correct_field_layout() {
        for (op, bits) in [
            (ArithOp::Add, 0b00),
            (ArithOp::Sub, 0b01),
            (ArithOp::Adc, 0b10),
            (ArithOp::Sbc, 0b11),
        ] {
            let byte = encode(Mnemonic::Arith(op), &[Operand::Src(SrcReg::Rd)]).unwrap();
            assert_eq!(byte, 0b0010_0000 | (bits << 3) | SrcReg::Rd.bits());
        }
    }

    #[test]
    fn register_name_lookup_is_case_insensitive() {
        assert_eq!(DestReg::from_name("marl").unwrap(), DestReg::Marl);
        assert_eq!(DestReg::from_name("MaRl").unwrap(), DestReg::Marl);
        assert_eq!(SrcReg::from_name("clr").unwrap(), SrcReg::Clr);
    }
}

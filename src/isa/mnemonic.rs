use super::{ArithOp, JumpCond};
use std::fmt;

/// The canonical set of real (non-pseudo) mnemonics the codec understands.
///
/// `STRL`/`STRH`/`LDRL`/`LDRH`/`INX` are assembler-level aliases that expand
/// to one of these before encoding; they never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Ldi,
    Mov,
    Arith(ArithOp),
    And,
    Addi,
    Jump(JumpCond),
    Subi,
    Cra,
    Hlt,
    Nop,
}

impl Mnemonic {
    pub fn canonical_name(self) -> &'static str {
        match self {
            Mnemonic::Ldi => "LDI",
            Mnemonic::Mov => "MOV",
            Mnemonic::Arith(op) => op.mnemonic(),
            Mnemonic::And => "AND",
            Mnemonic::Addi => "ADDI",
            Mnemonic::Jump(cond) => cond.mnemonic(),
            Mnemonic::Subi => "SUBI",
            Mnemonic::Cra => "CRA",
            Mnemonic::Hlt => "HLT",
            Mnemonic::Nop => "NOP",
        }
    }

    /// Look up a real mnemonic by its case-insensitive text name.
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        Some(match upper.as_str() {
            "LDI" => Mnemonic::Ldi,
            "MOV" => Mnemonic::Mov,
            "ADD" => Mnemonic::Arith(ArithOp::Add),
            "SUB" => Mnemonic::Arith(ArithOp::Sub),
            "ADC" => Mnemonic::Arith(ArithOp::Adc),
            "SBC" => Mnemonic::Arith(ArithOp::Sbc),
            "AND" => Mnemonic::And,
            "ADDI" => Mnemonic::Addi,
            "SUBI" => Mnemonic::Subi,
            "CRA" => Mnemonic::Cra,
            "HLT" => Mnemonic::Hlt,
            "NOP" => Mnemonic::Nop,
            _ => return JumpCond::from_mnemonic(&upper).map(Mnemonic::Jump),
        })
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

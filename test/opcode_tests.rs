//! Exhaustive encode/decode coverage for every ArniComp instruction group.

use arnicomp::isa::{decode, encode, ArithOp, DestReg, JumpCond, Mnemonic, Operand, SrcReg};

// ============================================================================
// MOV
// ============================================================================

#[test]
fn mov_covers_every_dest_src_pair() {
    let dests = [
        DestReg::Ra,
        DestReg::Rd,
        DestReg::Marl,
        DestReg::Marh,
        DestReg::Prl,
        DestReg::Prh,
        DestReg::Ml,
        DestReg::Mh,
    ];
    let srcs = [
        SrcReg::Ra,
        SrcReg::Rd,
        SrcReg::Acc,
        SrcReg::Clr,
        SrcReg::Pcl,
        SrcReg::Pch,
        SrcReg::Ml,
        SrcReg::Mh,
    ];
    for dest in dests {
        for src in srcs {
            let byte = encode(Mnemonic::Mov, &[Operand::Dest(dest), Operand::Src(src)]).unwrap();
            let (mnem, ops) = decode(byte);
            assert_eq!(mnem, Mnemonic::Mov);
            assert_eq!(ops, vec![Operand::Dest(dest), Operand::Src(src)]);
        }
    }
}

// ============================================================================
// Arithmetic / AND
// ============================================================================

#[test]
fn arithmetic_ops_cover_every_source_register() {
    for op in [ArithOp::Add, ArithOp::Sub, ArithOp::Adc, ArithOp::Sbc] {
        for src in [SrcReg::Ra, SrcReg::Rd, SrcReg::Acc, SrcReg::Clr, SrcReg::Pcl, SrcReg::Pch, SrcReg::Ml, SrcReg::Mh] {
            let byte = encode(Mnemonic::Arith(op), &[Operand::Src(src)]).unwrap();
            let (mnem, ops) = decode(byte);
            assert_eq!(mnem, Mnemonic::Arith(op));
            assert_eq!(ops, vec![Operand::Src(src)]);
        }
    }
}

#[test]
fn and_covers_every_source_register() {
    for src in [SrcReg::Ra, SrcReg::Rd, SrcReg::Acc, SrcReg::Ml] {
        let byte = encode(Mnemonic::And, &[Operand::Src(src)]).unwrap();
        let (mnem, ops) = decode(byte);
        assert_eq!(mnem, Mnemonic::And);
        assert_eq!(ops, vec![Operand::Src(src)]);
    }
}

// ============================================================================
// Immediates
// ============================================================================

#[test]
fn ldi_covers_the_full_seven_bit_range() {
    for imm in 0u8..=127 {
        let byte = encode(Mnemonic::Ldi, &[Operand::Imm(imm)]).unwrap();
        assert_eq!(decode(byte), (Mnemonic::Ldi, vec![Operand::Imm(imm)]));
    }
}

#[test]
fn addi_covers_its_three_bit_range() {
    for imm in 0u8..=7 {
        let byte = encode(Mnemonic::Addi, &[Operand::Imm(imm)]).unwrap();
        assert_eq!(decode(byte), (Mnemonic::Addi, vec![Operand::Imm(imm)]));
    }
}

#[test]
fn subi_covers_its_two_bit_range() {
    for imm in 0u8..=3 {
        let byte = encode(Mnemonic::Subi, &[Operand::Imm(imm)]).unwrap();
        assert_eq!(decode(byte), (Mnemonic::Subi, vec![Operand::Imm(imm)]));
    }
}

// ============================================================================
// Jumps
// ============================================================================

#[test]
fn every_jump_condition_round_trips() {
    for cond in [
        JumpCond::Jmp,
        JumpCond::Jeq,
        JumpCond::Jgt,
        JumpCond::Jlt,
        JumpCond::Jge,
        JumpCond::Jle,
        JumpCond::Jne,
        JumpCond::Jc,
    ] {
        let byte = encode(Mnemonic::Jump(cond), &[]).unwrap();
        assert_eq!(decode(byte), (Mnemonic::Jump(cond), vec![]));
    }
}

// ============================================================================
// Whole-table coverage
// ============================================================================

#[test]
fn every_possible_byte_value_decodes_without_panicking() {
    for byte in 0u16..=255 {
        let (mnemonic, operands) = decode(byte as u8);
        // every decoded instruction must re-encode to a valid byte
        encode(mnemonic, &operands).unwrap();
    }
}

#[test]
fn fixed_single_byte_instructions_are_stable() {
    assert_eq!(decode(0b0000_0001).0, Mnemonic::Hlt);
    assert_eq!(decode(0b0000_0011).0, Mnemonic::Cra);
    assert_eq!(decode(0b0000_0000).0, Mnemonic::Nop);
    assert_eq!(decode(0b0000_0010).0, Mnemonic::Nop);
}

//! The code generator: lowers a structured command list into a target
//! assembly line stream, driving the register cache, variable manager, and
//! label manager as it goes.
//!
//! Every public entry point takes `&mut self` rather than splitting into a
//! literal parent/child struct pair: a nested `if`/`while` body is compiled
//! by recursing into [`CodeGenerator::compile_block`], which returns its own
//! fresh line buffer for the caller to splice in. That buffer is the "child
//! emitter"; the three managers underneath are never duplicated.

use crate::compiler::commands::{Command, CompareOp, Condition, WhileKind};
use crate::compiler::expr::{self, BinOp, Expr, ExprError, StepOperand};
use crate::compiler::labels::LabelError;
use crate::compiler::registers::{AbsAddrTag, RegMode, RegName, RegisterCache};
use crate::compiler::labels::LabelManager;
use crate::compiler::variables::{VarError, VarKind, VariableManager};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error(transparent)]
    Var(#[from] VarError),
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("array index {0} is outside the low-page dynamic-indexing window")]
    IndexOutOfLowPage(u16),
    #[error("'{0}' is not an array variable")]
    NotAnArray(String),
    #[error("operator '{0}' has no direct instruction encoding")]
    UnsupportedOperator(&'static str),
    #[error("malformed direct address literal: {0}")]
    BadAddress(String),
}

/// A compiled right-hand side: either folded to a compile-time constant, or
/// left live in one of the three ALU-adjacent registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RhsValue {
    Known(u8),
    InRegister(RegName),
}

pub struct CodeGenerator {
    pub vars: VariableManager,
    pub regs: RegisterCache,
    pub labels: LabelManager,
    /// One byte outside `[var_start, var_end)` reserved for spilling a
    /// live value across an OR synthesis's two NOT computations.
    scratch_addr: u16,
}

impl CodeGenerator {
    pub fn new(var_start: u16, var_end: u16, scratch_addr: u16) -> Self {
        CodeGenerator {
            vars: VariableManager::new(var_start, var_end),
            regs: RegisterCache::new(),
            labels: LabelManager::new(),
            scratch_addr,
        }
    }

    pub fn compile(&mut self, program: &[Command]) -> Result<Vec<String>, CodeGenError> {
        let lines = self.compile_block(program)?;
        Ok(peephole(lines))
    }

    pub fn compile_block(&mut self, block: &[Command]) -> Result<Vec<String>, CodeGenError> {
        let mut out = Vec::new();
        for cmd in block {
            self.compile_command(cmd, &mut out)?;
        }
        Ok(out)
    }

    fn compile_command(&mut self, cmd: &Command, out: &mut Vec<String>) -> Result<(), CodeGenError> {
        match cmd {
            Command::VarDef { name, kind, volatile, initial } => {
                self.vars.create_variable(name, *kind, *volatile)?;
                if let Some(init) = initial {
                    self.compile_assign_scalar(name, init, out)?;
                }
                Ok(())
            }
            Command::Free(name) => {
                self.vars.free(name)?;
                Ok(())
            }
            Command::Assign { target, index: None, expr: rhs } => {
                self.compile_assign_scalar(target, rhs, out)
            }
            Command::Assign { target, index: Some(idx), expr: rhs } => {
                self.compile_assign_array_elem(target, idx, rhs, out)
            }
            Command::StoreDirect { address, expr: rhs } => {
                let addr = self.eval_address_literal(address)?;
                let value = self.evaluate_rhs(rhs, out)?;
                self.store_value(out, value, addr);
                Ok(())
            }
            Command::FreeAssembly(text) => {
                for line in text.lines() {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        out.push(trimmed.to_string());
                    }
                }
                self.regs = RegisterCache::new();
                Ok(())
            }
            Command::If { branches, else_body } => self.compile_if(branches, else_body, out),
            Command::While { kind, condition, body } => self.compile_while(*kind, condition, body, out),
        }
    }

    // -- MAR management -----------------------------------------------------

    fn set_mar_abs(&mut self, out: &mut Vec<String>, addr: u16) -> Result<(), CodeGenError> {
        self.set_mar_low(out, (addr & 0xFF) as u8)?;
        self.set_mar_high(out, (addr >> 8) as u8);
        Ok(())
    }

    fn set_mar_low(&mut self, out: &mut Vec<String>, low: u8) -> Result<(), CodeGenError> {
        match self.regs.addr_tag(RegName::Marl) {
            Some(tag) if tag.0 == low => return Ok(()),
            Some(tag) => {
                let steps = inc_steps(tag.0, low);
                if steps <= 2 && (tag.0 as u16 + steps) <= 0xFF {
                    for _ in 0..steps {
                        out.push("INX".to_string());
                    }
                } else {
                    // inx wraps MARL at 0xFF without touching MARH, so a step
                    // count that would cross that boundary falls back to a
                    // full reload instead.
                    self.emit_load_const(out, low);
                    out.push("MOV MARL,RA".to_string());
                }
            }
            None => {
                self.emit_load_const(out, low);
                out.push("MOV MARL,RA".to_string());
            }
        }
        self.regs.set_mar_tag(RegName::Marl, low);
        Ok(())
    }

    fn set_mar_high(&mut self, out: &mut Vec<String>, high: u8) {
        if self.regs.addr_tag(RegName::Marh) == Some(AbsAddrTag(high)) {
            return;
        }
        self.emit_load_const(out, high);
        out.push("MOV MARH,RA".to_string());
        self.regs.set_mar_tag(RegName::Marh, high);
    }

    /// Build an arbitrary 8-bit constant into RA. `LDI` alone only reaches
    /// 0..=127; values above that are composed by doubling a 7-bit half and
    /// adding the odd bit back in.
    fn emit_load_const(&mut self, out: &mut Vec<String>, value: u8) {
        if value <= 127 {
            out.push(format!("LDI #{value}"));
        } else {
            let half = value >> 1;
            let odd = value & 1;
            out.push(format!("LDI #{half}"));
            out.push("MOV RD,RA".to_string());
            out.push("ADD RA".to_string());
            if odd == 1 {
                out.push("MOV RD,ACC".to_string());
                out.push("ADDI #1".to_string());
            }
            out.push("MOV RA,ACC".to_string());
        }
        self.regs.set_mode(RegName::Ra, RegMode::Const(value));
        self.regs.set_mode(RegName::Rd, RegMode::Unknown);
        self.regs.set_mode(RegName::Acc, RegMode::Unknown);
    }

    // -- expression lowering --------------------------------------------------

    fn substitute_known(&self, expr: &Expr) -> Expr {
        match expr {
            Expr::Var(name) => match self.vars.get(name) {
                Ok(var) if !var.volatile => match self.vars.runtime_value(var.address) {
                    Some(v) => Expr::Lit(v as i64),
                    None => expr.clone(),
                },
                _ => expr.clone(),
            },
            Expr::Index(name, idx) => Expr::Index(name.clone(), Box::new(self.substitute_known(idx))),
            Expr::Neg(inner) => Expr::Neg(Box::new(self.substitute_known(inner))),
            Expr::Binary(op, l, r) => Expr::Binary(
                *op,
                Box::new(self.substitute_known(l)),
                Box::new(self.substitute_known(r)),
            ),
            Expr::Lit(_) | Expr::Deref(_) => expr.clone(),
        }
    }

    fn eval_address_literal(&self, src: &str) -> Result<u16, CodeGenError> {
        let expr = expr::parse(src)?;
        match self.substitute_known(&expr) {
            Expr::Lit(v) => Ok(v as u16),
            _ => Err(CodeGenError::BadAddress(src.to_string())),
        }
    }

    fn evaluate_rhs(&mut self, src: &str, out: &mut Vec<String>) -> Result<RhsValue, CodeGenError> {
        let parsed = expr::parse(src)?;

        if let Expr::Deref(addr) = parsed {
            self.set_mar_abs(out, addr)?;
            out.push("MOV RD,ML".to_string());
            self.tag_loaded_value(RegName::Rd, addr);
            return Ok(RhsValue::InRegister(RegName::Rd));
        }

        if let Expr::Index(name, idx) = &parsed {
            return self.load_array_element(name, idx, out);
        }

        let substituted = self.substitute_known(&parsed);
        let term = expr::simplify_term(&substituted)?;
        if let Some(v) = term.as_constant() {
            return Ok(RhsValue::Known((v as i64 as u32 & 0xFF) as u8));
        }

        let plan = expr::plan_compilation(&substituted);
        if plan.steps.is_empty() {
            // A bare variable/temp reference with no operation applied to it;
            // there's no three-address step to drive the load, so pull it in
            // directly.
            let reg = self.load_operand(out, &plan.result, RegName::Rd, &std::collections::HashMap::new(), &None)?;
            return Ok(RhsValue::InRegister(reg));
        }
        self.execute_plan(&plan.steps, out)
    }

    fn load_array_element(
        &mut self,
        name: &str,
        idx: &Expr,
        out: &mut Vec<String>,
    ) -> Result<RhsValue, CodeGenError> {
        let var = self.vars.get(name)?.clone();
        if !matches!(var.kind, VarKind::ByteArray(_)) {
            return Err(CodeGenError::NotAnArray(name.to_string()));
        }
        let substituted_idx = self.substitute_known(idx);
        if let Expr::Lit(i) = substituted_idx {
            let addr = var.element_address(i as u16);
            self.set_mar_abs(out, addr)?;
            out.push("MOV RD,ML".to_string());
            self.tag_loaded_value(RegName::Rd, addr);
            return Ok(RhsValue::InRegister(RegName::Rd));
        }

        // Dynamic index: low-page-only addressing.
        let len = match var.kind {
            VarKind::ByteArray(n) => n,
            _ => unreachable!(),
        };
        if var.high_address() != 0 || var.low_address() as u16 + len as u16 - 1 > 0xFF {
            return Err(CodeGenError::IndexOutOfLowPage(var.address));
        }
        let idx_reg = match self.evaluate_rhs(&idx.to_string(), out)? {
            RhsValue::Known(v) => {
                let addr = var.element_address(v as u16);
                self.set_mar_abs(out, addr)?;
                out.push("MOV RD,ML".to_string());
                return Ok(RhsValue::InRegister(RegName::Rd));
            }
            RhsValue::InRegister(r) => r,
        };
        out.push(format!("MOV RA,{idx_reg}"));
        self.emit_load_const(out, var.low_address());
        out.push("MOV RD,RA".to_string());
        out.push(format!("ADD {idx_reg}"));
        out.push("MOV RA,ACC".to_string());
        out.push("MOV MARL,RA".to_string());
        self.regs.set_unknown(RegName::Marl);
        self.set_mar_high(out, 0);
        out.push("MOV RD,ML".to_string());
        Ok(RhsValue::InRegister(RegName::Rd))
    }

    fn tag_loaded_value(&mut self, reg: RegName, addr: u16) {
        match self.vars.variable_at(addr) {
            Ok(Some(var)) if !var.volatile => self.regs.set_mode(reg, RegMode::Value(var.name.clone())),
            _ => self.regs.set_unknown(reg),
        }
    }

    fn execute_plan(
        &mut self,
        steps: &[expr::ThreeAddressStep],
        out: &mut Vec<String>,
    ) -> Result<RhsValue, CodeGenError> {
        let mut persisted: std::collections::HashMap<String, u16> = std::collections::HashMap::new();
        let mut last_produced: Option<String> = None;

        for (i, step) in steps.iter().enumerate() {
            let left = self.load_operand(out, &step.left, RegName::Rd, &persisted, &last_produced)?;
            last_produced = None;
            let right = self.load_operand(out, &step.right, RegName::Ra, &persisted, &None)?;

            match step.op {
                BinOp::Add | BinOp::Sub | BinOp::And => {
                    self.coerce_into(out, left, RegName::Rd);
                    self.coerce_into(out, right, RegName::Ra);
                    match step.op {
                        BinOp::Add => out.push("ADD RA".to_string()),
                        BinOp::Sub => out.push("SUB RA".to_string()),
                        BinOp::And => out.push("AND RA".to_string()),
                        _ => unreachable!(),
                    }
                    self.regs.set_mode(RegName::Acc, RegMode::TempVar(step.result.clone()));
                }
                BinOp::Or => {
                    self.coerce_into(out, left, RegName::Rd);
                    out.push("MOV RA,RD".to_string());
                    let a = RegName::Ra;
                    self.coerce_into(out, right, RegName::Rd);
                    let b = RegName::Rd;
                    self.emit_or(out, a, b)?;
                }
                BinOp::Xor | BinOp::Shl | BinOp::Shr => {
                    return Err(CodeGenError::UnsupportedOperator(match step.op {
                        BinOp::Xor => "^",
                        BinOp::Shl => "<<",
                        _ => ">>",
                    }))
                }
                BinOp::Mul | BinOp::Div => {
                    return Err(CodeGenError::UnsupportedOperator(if step.op == BinOp::Mul {
                        "*"
                    } else {
                        "/"
                    }))
                }
            }

            let consumed_next = steps
                .get(i + 1)
                .map(|next| next.left == StepOperand::Temp(step.result.clone()))
                .unwrap_or(false);
            if consumed_next {
                last_produced = Some(step.result.clone());
            } else if i + 1 < steps.len() {
                let addr = self.spill_temp(&step.result, out)?;
                persisted.insert(step.result.clone(), addr);
            }
        }
        Ok(RhsValue::InRegister(RegName::Acc))
    }

    fn spill_temp(&mut self, name: &str, out: &mut Vec<String>) -> Result<u16, CodeGenError> {
        let var = self.vars.create_variable(name, VarKind::Byte, false)?.clone();
        self.set_mar_abs(out, var.address)?;
        out.push("MOV ML,ACC".to_string());
        Ok(var.address)
    }

    fn coerce_into(&mut self, out: &mut Vec<String>, src: RegName, dst: RegName) {
        if src != dst {
            out.push(format!("MOV {dst},{src}"));
            self.regs.mov(dst, src);
        }
    }

    fn load_operand(
        &mut self,
        out: &mut Vec<String>,
        operand: &StepOperand,
        target: RegName,
        persisted: &std::collections::HashMap<String, u16>,
        last_produced: &Option<String>,
    ) -> Result<RegName, CodeGenError> {
        match operand {
            StepOperand::Lit(v) => {
                self.emit_load_const(out, (*v as i64 as u32 & 0xFF) as u8);
                Ok(RegName::Ra)
            }
            StepOperand::Var(name) => {
                let var = self.vars.get(name)?.clone();
                self.set_mar_abs(out, var.address)?;
                out.push(format!("MOV {target},ML"));
                self.tag_loaded_value(target, var.address);
                Ok(target)
            }
            StepOperand::Temp(name) => {
                if last_produced.as_deref() == Some(name.as_str()) {
                    out.push(format!("MOV {target},ACC"));
                    return Ok(target);
                }
                let addr = *persisted
                    .get(name)
                    .expect("temp referenced before its producing step ran");
                self.set_mar_abs(out, addr)?;
                out.push(format!("MOV {target},ML"));
                Ok(target)
            }
        }
    }

    /// `NOT(value)` via `255 - value`, spilling through the reserved scratch
    /// cell so the composition of the literal `255` (which clobbers RD) never
    /// loses the operand.
    fn emit_not(&mut self, out: &mut Vec<String>, value_reg: RegName) -> Result<(), CodeGenError> {
        self.set_mar_abs(out, self.scratch_addr)?;
        out.push(format!("MOV ML,{value_reg}"));
        self.emit_load_const(out, 255);
        out.push("MOV RD,RA".to_string());
        self.set_mar_abs(out, self.scratch_addr)?;
        out.push("MOV RA,ML".to_string());
        out.push("SUB RA".to_string());
        Ok(())
    }

    fn emit_or(&mut self, out: &mut Vec<String>, a: RegName, b: RegName) -> Result<(), CodeGenError> {
        self.emit_not(out, a)?;
        let not_a_addr = self.vars.create_variable("_not_a", VarKind::Byte, false)?.address;
        self.set_mar_abs(out, not_a_addr)?;
        out.push("MOV ML,ACC".to_string());
        self.emit_not(out, b)?;
        self.set_mar_abs(out, not_a_addr)?;
        out.push("MOV RA,ML".to_string());
        out.push("AND RA".to_string());
        self.vars.free("_not_a")?;
        out.push("MOV RD,ACC".to_string());
        self.emit_not(out, RegName::Rd)?;
        Ok(())
    }

    // -- assignment -----------------------------------------------------------

    fn compile_assign_scalar(&mut self, name: &str, rhs: &str, out: &mut Vec<String>) -> Result<(), CodeGenError> {
        let var = self.vars.get(name)?.clone();
        let value = self.evaluate_rhs(rhs, out)?;
        match value {
            RhsValue::Known(v) if !var.volatile => {
                self.vars.set_runtime_value(var.address, Some(v));
            }
            RhsValue::Known(v) => {
                self.emit_load_const(out, v);
                self.store_value(out, RhsValue::InRegister(RegName::Ra), var.address);
            }
            RhsValue::InRegister(_) => {
                self.vars.invalidate(var.address);
                self.store_value(out, value, var.address);
            }
        }
        Ok(())
    }

    fn compile_assign_array_elem(
        &mut self,
        name: &str,
        index_src: &str,
        rhs: &str,
        out: &mut Vec<String>,
    ) -> Result<(), CodeGenError> {
        let var = self.vars.get(name)?.clone();
        let idx_expr = expr::parse(index_src)?;
        let idx_substituted = self.substitute_known(&idx_expr);

        if let Expr::Lit(i) = idx_substituted {
            let addr = var.element_address(i as u16);
            let value = self.evaluate_rhs(rhs, out)?;
            match value {
                RhsValue::Known(v) if !var.volatile => {
                    self.vars.set_runtime_value(addr, Some(v));
                }
                _ => {
                    self.vars.invalidate(addr);
                    self.store_value(out, value, addr);
                }
            }
            return Ok(());
        }

        // Dynamic index: same low-page constraint as reads.
        let len = match var.kind {
            VarKind::ByteArray(n) => n,
            _ => return Err(CodeGenError::NotAnArray(name.to_string())),
        };
        if var.high_address() != 0 || var.low_address() as u16 + len as u16 - 1 > 0xFF {
            return Err(CodeGenError::IndexOutOfLowPage(var.address));
        }
        let value = self.evaluate_rhs(rhs, out)?;
        let value_reg = match value {
            RhsValue::Known(v) => {
                self.emit_load_const(out, v);
                RegName::Ra
            }
            RhsValue::InRegister(r) => r,
        };
        self.coerce_into(out, value_reg, RegName::Rd);
        let saved_value_addr = self.vars.create_variable("_store_val", VarKind::Byte, false)?.address;
        self.set_mar_abs(out, saved_value_addr)?;
        out.push("MOV ML,RD".to_string());

        let idx_reg = match self.evaluate_rhs(index_src, out)? {
            RhsValue::Known(v) => {
                let addr = var.element_address(v as u16);
                self.set_mar_abs(out, saved_value_addr)?;
                out.push("MOV RD,ML".to_string());
                self.vars.free("_store_val")?;
                self.store_value(out, RhsValue::InRegister(RegName::Rd), addr);
                return Ok(());
            }
            RhsValue::InRegister(r) => r,
        };

        // Fold the index into the element's low byte and park it, since the
        // MAR we're about to aim at the saved value would otherwise clobber
        // the address arithmetic still sitting in RA/ACC.
        out.push(format!("MOV RA,{idx_reg}"));
        self.emit_load_const(out, var.low_address());
        out.push("MOV RD,RA".to_string());
        out.push(format!("ADD {idx_reg}"));
        let saved_low_addr = self.vars.create_variable("_store_idx", VarKind::Byte, false)?.address;
        out.push("MOV RD,ACC".to_string());
        self.set_mar_abs(out, saved_low_addr)?;
        out.push("MOV ML,RD".to_string());

        self.set_mar_abs(out, saved_value_addr)?;
        out.push("MOV RD,ML".to_string());
        self.set_mar_abs(out, saved_low_addr)?;
        out.push("MOV RA,ML".to_string());
        out.push("MOV MARL,RA".to_string());
        self.regs.set_unknown(RegName::Marl);
        self.set_mar_high(out, 0);
        out.push("MOV ML,RD".to_string());

        self.vars.free("_store_val")?;
        self.vars.free("_store_idx")?;
        Ok(())
    }

    fn store_value(&mut self, out: &mut Vec<String>, value: RhsValue, addr: u16) {
        let reg = match value {
            RhsValue::Known(v) => {
                self.emit_load_const(out, v);
                RegName::Ra
            }
            RhsValue::InRegister(r) => r,
        };
        let safe_reg = if reg == RegName::Ra {
            out.push("MOV RD,RA".to_string());
            RegName::Rd
        } else {
            reg
        };
        // set_mar_abs cannot fail for a variable's own in-bounds address;
        // overflow only arises from pathological explicit direct stores.
        let _ = self.set_mar_abs(out, addr);
        out.push(format!("MOV ML,{safe_reg}"));
    }

    // -- control flow -----------------------------------------------------------

    fn eval_condition_const(&self, cond: &Condition) -> Option<bool> {
        let lhs = self.resolve_side(&cond.lhs)?;
        let rhs = self.resolve_side(&cond.rhs)?;
        Some(match cond.op {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Le => lhs <= rhs,
        })
    }

    fn resolve_side(&self, text: &str) -> Option<u8> {
        if let Ok(v) = text.parse::<i64>() {
            return Some((v as i64 as u32 & 0xFF) as u8);
        }
        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return u8::from_str_radix(hex, 16).ok();
        }
        let var = self.vars.get(text).ok()?;
        if var.volatile {
            return None;
        }
        self.vars.runtime_value(var.address)
    }

    fn jump_for_false(op: CompareOp) -> &'static str {
        // Jump taken when the condition is FALSE, to skip the body.
        //
        // The comparator feeds (lhs, rhs) into the hardware's (a, b) inputs,
        // but the flag names are inverted from what they sound like: `lt`
        // fires on a>b and `gt` fires on a<b (see CPUFlags::update_flags).
        // JGT/JLT/JGE/JLE therefore test the opposite relation their
        // mnemonic suggests, so the mapping here is crossed to compensate.
        match op {
            CompareOp::Eq => "JNE",
            CompareOp::Ne => "JEQ",
            CompareOp::Gt => "JGE",
            CompareOp::Lt => "JLE",
            CompareOp::Ge => "JGT",
            CompareOp::Le => "JLT",
        }
    }

    fn emit_condition_setup(&mut self, cond: &Condition, out: &mut Vec<String>) -> Result<(), CodeGenError> {
        // Loads lhs into RD and rhs into RA, then runs the comparator via SUB
        // (its side-effect flags are what the jump instructions consult).
        let lhs = self.evaluate_rhs(&cond.lhs, out)?;
        match lhs {
            RhsValue::Known(v) => {
                self.emit_load_const(out, v);
                out.push("MOV RD,RA".to_string());
                self.regs.mov(RegName::Rd, RegName::Ra);
            }
            RhsValue::InRegister(r) => self.coerce_into(out, r, RegName::Rd),
        }
        let rhs = self.evaluate_rhs(&cond.rhs, out)?;
        match rhs {
            RhsValue::Known(v) => self.emit_load_const(out, v),
            RhsValue::InRegister(r) => self.coerce_into(out, r, RegName::Ra),
        }
        out.push("SUB RA".to_string());
        Ok(())
    }

    /// Lowers an `if`/`elif`/`else` chain per-branch: evaluate each branch's
    /// condition in order, skip it with an inverted jump, emit its body
    /// followed by a jump to the chain's end, and place the skip label just
    /// before the next branch. If the leading conditions are all
    /// compile-time known, the generator folds through them and emits only
    /// the first definite branch; the moment an unknown condition is hit it
    /// falls back to runtime emission for that branch and everything after
    /// it, never reordering branches.
    fn compile_if(
        &mut self,
        branches: &[(Condition, Vec<Command>)],
        else_body: &[Command],
        out: &mut Vec<String>,
    ) -> Result<(), CodeGenError> {
        let mut remaining = branches;
        while let Some((condition, body)) = remaining.first() {
            match self.eval_condition_const(condition) {
                Some(true) => {
                    let lines = self.compile_block(body)?;
                    out.extend(lines);
                    return Ok(());
                }
                Some(false) => {
                    remaining = &remaining[1..];
                }
                None => break,
            }
        }
        if remaining.is_empty() {
            let lines = self.compile_block(else_body)?;
            out.extend(lines);
            return Ok(());
        }

        let mut written = Vec::new();
        for (_, body) in remaining {
            written.extend(self.resolve_written_addrs(body));
        }
        written.extend(self.resolve_written_addrs(else_body));

        let end_label = self.labels.create_if_label("endif");
        let has_tail = remaining.len() > 1 || !else_body.is_empty();

        for (i, (condition, body)) in remaining.iter().enumerate() {
            let is_last_branch = i + 1 == remaining.len();
            self.emit_condition_setup(condition, out)?;
            let skip_label = self.labels.create_if_label("skip");
            out.push(format!("{} @{skip_label}", Self::jump_for_false(condition.op)));

            self.regs.reset_change_detector();
            let body_lines = self.compile_block(body)?;
            out.extend(body_lines);
            self.regs.set_changed_registers_as_unknown();

            if !is_last_branch || !else_body.is_empty() {
                out.push(format!("JMP @{end_label}"));
            }
            self.labels.add_label(&skip_label, out.len())?;
        }

        if !else_body.is_empty() {
            self.regs.reset_change_detector();
            let else_lines = self.compile_block(else_body)?;
            out.extend(else_lines);
            self.regs.set_changed_registers_as_unknown();
        }

        if has_tail {
            self.labels.add_label(&end_label, out.len())?;
        }

        for addr in written {
            self.vars.invalidate(addr);
        }
        Ok(())
    }

    fn compile_while(
        &mut self,
        kind: WhileKind,
        condition: &Option<Condition>,
        body: &[Command],
        out: &mut Vec<String>,
    ) -> Result<(), CodeGenError> {
        if matches!(kind, WhileKind::Bypass) {
            return Ok(());
        }

        self.vars.invalidate_all_non_volatile();

        let invariant = analyze_loop_invariant(body, self);
        if let Some(addr) = invariant {
            self.set_mar_abs(out, addr)?;
        }

        let start_label = self.labels.create_if_label("while_start");
        self.labels.add_label(&start_label, out.len())?;

        let end_label = if matches!(kind, WhileKind::Conditional) {
            let cond = condition.as_ref().expect("conditional while carries a condition").clone();
            self.emit_condition_setup(&cond, out)?;
            let end_label = self.labels.create_if_label("while_end");
            out.push(format!("{} @{end_label}", Self::jump_for_false(cond.op)));
            Some(end_label)
        } else {
            None
        };

        let body_lines = self.compile_block(body)?;
        out.extend(body_lines);
        out.push(format!("JMP @{start_label}"));

        if let Some(end_label) = end_label {
            self.labels.add_label(&end_label, out.len())?;
        }

        for addr in self.resolve_written_addrs(body) {
            self.vars.invalidate(addr);
        }
        Ok(())
    }

    fn resolve_written_addrs(&self, block: &[Command]) -> Vec<u16> {
        let mut addrs = Vec::new();
        collect_written_addrs(block, self, &mut addrs);
        addrs
    }
}

fn collect_written_addrs(block: &[Command], gen: &CodeGenerator, out: &mut Vec<u16>) {
    for cmd in block {
        match cmd {
            Command::Assign { target, .. } => {
                if let Ok(var) = gen.vars.get(target) {
                    out.push(var.address);
                }
            }
            Command::If { branches, else_body } => {
                for (_, body) in branches {
                    collect_written_addrs(body, gen, out);
                }
                collect_written_addrs(else_body, gen, out);
            }
            Command::While { body, .. } => collect_written_addrs(body, gen, out),
            _ => {}
        }
    }
}

fn inc_steps(a: u8, b: u8) -> u16 {
    if a == b {
        return 0;
    }
    let diff = b.wrapping_sub(a) as u16;
    if diff == 0 {
        256
    } else {
        diff
    }
}

/// Remove dead instructions a real assembler would never need to see twice:
/// a dead `LDI` immediately shadowed by another, self-moves, and a memory
/// load overwritten before it's ever read.
fn peephole(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if let (Some(next), true) = (lines.get(i + 1), line.starts_with("LDI ")) {
            if next.starts_with("LDI ") {
                i += 1;
                continue;
            }
        }
        if let Some((dst, src)) = line.strip_prefix("MOV ").and_then(|rest| rest.split_once(',')) {
            if dst.eq_ignore_ascii_case(src) {
                i += 1;
                continue;
            }
            if src.eq_ignore_ascii_case("ML") {
                if let (Some(ldi), Some(overwrite)) = (lines.get(i + 1), lines.get(i + 2)) {
                    let overwrites_dst = overwrite
                        .strip_prefix("MOV ")
                        .and_then(|rest| rest.split_once(','))
                        .map(|(d, s)| d.eq_ignore_ascii_case(dst) && s.eq_ignore_ascii_case("RA"))
                        .unwrap_or(false);
                    if ldi.starts_with("LDI ") && overwrites_dst {
                        i += 1;
                        continue;
                    }
                }
            }
        }
        out.push(line.clone());
        i += 1;
    }
    out
}

/// Best-effort loop-invariant MAR analysis (§4.F.6): if the body's net
/// effect on "where MAR points" is the same definite address both entering
/// and leaving every reachable path, hoist a single `set_mar_abs` into the
/// preheader.
fn analyze_loop_invariant(body: &[Command], gen: &CodeGenerator) -> Option<u16> {
    fn effect(cmd: &Command, gen: &CodeGenerator) -> LoopMarEffect {
        match cmd {
            Command::StoreDirect { .. } => LoopMarEffect::NonInvariant,
            Command::Assign { target, index: None, .. } => match gen.vars.get(target) {
                Ok(var) => LoopMarEffect::Definite(var.address),
                Err(_) => LoopMarEffect::NonInvariant,
            },
            Command::Assign { target, index: Some(idx), .. } => {
                match (gen.vars.get(target), idx.parse::<u16>()) {
                    (Ok(var), Ok(i)) => LoopMarEffect::Definite(var.element_address(i)),
                    _ => LoopMarEffect::NonInvariant,
                }
            }
            Command::If { branches, else_body } => {
                let mut effects = branches.iter().map(|(_, body)| fold(body, gen));
                let first = effects.next().unwrap_or(LoopMarEffect::Unchanged);
                let e = fold(else_body, gen);
                if effects.all(|other| other == first) && first == e {
                    first
                } else {
                    LoopMarEffect::NonInvariant
                }
            }
            _ => LoopMarEffect::NonInvariant,
        }
    }
    fn fold(block: &[Command], gen: &CodeGenerator) -> LoopMarEffect {
        let mut state = LoopMarEffect::Unchanged;
        for cmd in block {
            state = match (state, effect(cmd, gen)) {
                (_, LoopMarEffect::NonInvariant) => LoopMarEffect::NonInvariant,
                (LoopMarEffect::NonInvariant, _) => LoopMarEffect::NonInvariant,
                (_, other) => other,
            };
        }
        state
    }
    match fold(body, gen) {
        LoopMarEffect::Definite(addr) => Some(addr),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopMarEffect {
    Unchanged,
    Definite(u16),
    NonInvariant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::commands::parse_program;

    fn gen() -> CodeGenerator {
        CodeGenerator::new(0, 64, 64)
    }

    #[test]
    fn pure_constant_folding_emits_nothing() {
        let program = parse_program("byte a = 10\nbyte b = 20\nbyte c = (a+b)*3 + 10").unwrap();
        let mut g = gen();
        let lines = g.compile(&program).unwrap();
        assert!(lines.is_empty());
        let c_addr = g.vars.get("c").unwrap().address;
        assert_eq!(g.vars.runtime_value(c_addr), Some(100));
    }

    #[test]
    fn volatile_assignment_emits_a_store() {
        let program = parse_program("volatile byte out = 0\nout = 42").unwrap();
        let mut g = gen();
        let lines = g.compile(&program).unwrap();
        assert!(lines.iter().any(|l| l.starts_with("MOV ML,")));
    }

    #[test]
    fn if_else_join_invalidates_the_tracked_value() {
        let src = "byte x = 5\nvolatile byte v = 0\nif v == 1\nx = 10\nelse\nx = 20\nendif\nbyte y = x + 1";
        let program = parse_program(src).unwrap();
        let mut g = gen();
        let _lines = g.compile(&program).unwrap();
        let x_addr = g.vars.get("x").unwrap().address;
        assert_eq!(g.vars.runtime_value(x_addr), None);
    }

    #[test]
    fn compile_time_known_condition_emits_only_the_taken_branch() {
        let src = "byte x = 0\nif 1 == 1\nx = 10\nelse\nx = 20\nendif";
        let program = parse_program(src).unwrap();
        let mut g = gen();
        let lines = g.compile(&program).unwrap();
        assert!(lines.is_empty());
        let x_addr = g.vars.get("x").unwrap().address;
        assert_eq!(g.vars.runtime_value(x_addr), Some(10));
    }

    #[test]
    fn elif_chain_picks_the_first_true_known_branch() {
        let src = "byte x = 0\nif 1 == 2\nx = 10\nelif 3 == 3\nx = 20\nelse\nx = 30\nendif";
        let program = parse_program(src).unwrap();
        let mut g = gen();
        let lines = g.compile(&program).unwrap();
        assert!(lines.is_empty());
        let x_addr = g.vars.get("x").unwrap().address;
        assert_eq!(g.vars.runtime_value(x_addr), Some(20));
    }

    #[test]
    fn elif_chain_with_runtime_condition_invalidates_every_branch_target() {
        let src =
            "byte x = 5\nvolatile byte v = 0\nif v == 1\nx = 10\nelif v == 2\nx = 20\nelse\nx = 30\nendif";
        let program = parse_program(src).unwrap();
        let mut g = gen();
        let _lines = g.compile(&program).unwrap();
        let x_addr = g.vars.get("x").unwrap().address;
        assert_eq!(g.vars.runtime_value(x_addr), None);
    }

    #[test]
    fn peephole_drops_dead_ldi_and_self_moves() {
        let lines = vec![
            "LDI #1".to_string(),
            "LDI #2".to_string(),
            "MOV RA,RA".to_string(),
            "MOV RD,RA".to_string(),
        ];
        let out = peephole(lines);
        assert_eq!(out, vec!["LDI #2".to_string(), "MOV RD,RA".to_string()]);
    }

    #[test]
    fn peephole_drops_a_memory_load_overwritten_before_use() {
        let lines = vec![
            "MOV RD,ML".to_string(),
            "LDI #5".to_string(),
            "MOV RD,RA".to_string(),
        ];
        let out = peephole(lines);
        assert_eq!(out, vec!["LDI #5".to_string(), "MOV RD,RA".to_string()]);
    }

    #[test]
    fn peephole_keeps_a_memory_load_that_is_actually_used() {
        let lines = vec![
            "MOV RD,ML".to_string(),
            "LDI #5".to_string(),
            "MOV RA,RA".to_string(),
            "ADD RA".to_string(),
        ];
        let out = peephole(lines.clone());
        assert_eq!(out, vec!["MOV RD,ML".to_string(), "LDI #5".to_string(), "ADD RA".to_string()]);
    }

    #[test]
    fn set_mar_low_falls_back_to_a_full_reload_when_inx_would_cross_0xff() {
        let mut g = gen();
        let mut out = Vec::new();
        g.set_mar_low(&mut out, 0xFF).unwrap();
        out.clear();
        g.set_mar_low(&mut out, 0x00).unwrap();
        assert!(!out.iter().any(|l| l == "INX"));
        assert!(out.iter().any(|l| l.starts_with("LDI ")));
        assert!(out.iter().any(|l| l == "MOV MARL,RA"));
    }
}

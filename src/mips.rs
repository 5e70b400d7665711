//! MIPS transfer functions and operand grammar.
//!
//! 66 modeled registers: the 32 general-purpose registers, 32 float
//! registers, and `hi`/`lo`. The assembler temporary `$at` doubles as the
//! architecture-private auxiliary register. `$zero` is pinned to constant
//! zero; `$gp` is seeded from the symbol table and global accesses resolve
//! through it.

use crate::arch::{ArchitectureModel, InstructionCategory, TransferEnv};
use crate::machine_state::MachineState;
use crate::program::{ArchKind, Instruction};
use crate::symval::{AbstractValue, SymbolKind, SymbolicValue};

const GPR_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp",
    "s8", "ra",
];

const ZERO: usize = 0;
const AT: usize = 1;
const GP: usize = 28;
const SP: usize = 29;
const HI: usize = 64;
const LO: usize = 65;
const REGISTER_COUNT: usize = 66;

const RETURN_REGS: [usize; 2] = [2, 3]; // v0, v1
const ARG_REGS: [usize; 4] = [4, 5, 6, 7]; // a0-a3

pub struct Mips;

struct MemOperand {
    base: usize,
    offset: i64,
}

impl Mips {
    fn categorize(&self, instr: &Instruction) -> InstructionCategory {
        if instr.class.is_call {
            return InstructionCategory::Call;
        }
        if instr.class.is_return || instr.class.is_jump {
            return InstructionCategory::Nop;
        }
        if instr.class.is_load {
            return InstructionCategory::Load;
        }
        if instr.class.is_store {
            return InstructionCategory::Store;
        }
        match instr.mnemonic.as_str() {
            "addiu" | "addi" => InstructionCategory::Add,
            // Register-register adds are array-style address arithmetic;
            // keep a known base alive through an opaque index.
            "addu" | "add" => InstructionCategory::AddAugmenting,
            "subu" | "sub" => InstructionCategory::Sub,
            "mul" => InstructionCategory::Mul,
            "move" | "mflo" | "mfhi" => InstructionCategory::Move,
            "li" | "lui" | "ori" => {
                // Handled specially in `transfer`; the category is only
                // for dispatch uniformity.
                InstructionCategory::LoadConstant(0)
            }
            "nor" if instr.operands.len() == 3 && instr.operands[2].as_str() == "zero" => {
                InstructionCategory::Complement
            }
            "sll" => InstructionCategory::Mul,
            "nop" => InstructionCategory::Nop,
            _ => InstructionCategory::Kill,
        }
    }

    /// Read one plain operand (register or immediate) against the state.
    fn eval_operand(&self, state: &MachineState, text: &str) -> AbstractValue {
        if let Some(r) = self.register_index(text) {
            return state.regs.get(r);
        }
        match parse_int(text) {
            Some(v) => AbstractValue::constant(v),
            None => AbstractValue::unknown(),
        }
    }

    /// Parse an `off(base)` memory operand.
    fn parse_mem(&self, instr: &Instruction) -> Option<MemOperand> {
        let raw = instr
            .operands
            .iter()
            .find(|o| o.ends_with(')') && o.contains('('))?;
        let (off_text, rest) = raw.split_once('(')?;
        let base_text = rest.strip_suffix(')')?;
        let base = self.register_index(base_text)?;
        let offset = if off_text.is_empty() {
            0
        } else {
            parse_int(off_text)?
        };
        Some(MemOperand { base, offset })
    }

    fn destination(&self, instr: &Instruction) -> usize {
        self.register_index(&instr.operands[0])
            .unwrap_or_else(|| panic!("Unparseable destination in `{}`", instr))
    }

    fn kill_outputs(&self, instr: &Instruction, state: &mut MachineState) {
        for name in &instr.outputs {
            if let Some(r) = self.register_index(name) {
                state.regs.set(r, AbstractValue::unknown());
            }
        }
    }
}

/// The hardwired zero register swallows every write.
fn pin_zero(state: &mut MachineState) {
    state.regs.set(ZERO, AbstractValue::constant(0));
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let v = if let Some(hex) = s.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        s.parse::<i64>().ok()?
    };
    Some(if neg { -v } else { v })
}

impl ArchitectureModel for Mips {
    fn kind(&self) -> ArchKind {
        ArchKind::Mips
    }

    fn register_count(&self) -> usize {
        REGISTER_COUNT
    }

    fn word_size(&self) -> u32 {
        4
    }

    fn register_index(&self, name: &str) -> Option<usize> {
        let name = name.strip_prefix('$').unwrap_or(name);
        let name = if name == "fp" { "s8" } else { name };
        if let Some(i) = GPR_NAMES.iter().position(|&r| r == name) {
            return Some(i);
        }
        if let Some(fnum) = name.strip_prefix('f') {
            if let Ok(n) = fnum.parse::<usize>() {
                if n < 32 {
                    return Some(32 + n);
                }
            }
        }
        match name {
            "hi" => Some(HI),
            "lo" => Some(LO),
            _ => None,
        }
    }

    fn register_name(&self, idx: usize) -> &'static str {
        const FPR_NAMES: [&str; 32] = [
            "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
            "f13", "f14", "f15", "f16", "f17", "f18", "f19", "f20", "f21", "f22", "f23", "f24",
            "f25", "f26", "f27", "f28", "f29", "f30", "f31",
        ];
        match idx {
            0..=31 => GPR_NAMES[idx],
            32..=63 => FPR_NAMES[idx - 32],
            64 => "hi",
            65 => "lo",
            _ => panic!("Register index {} out of range", idx),
        }
    }

    fn stack_pointer(&self) -> usize {
        SP
    }

    fn aux_register(&self) -> usize {
        AT
    }

    fn zero_register(&self) -> Option<usize> {
        Some(ZERO)
    }

    fn global_pointer_register(&self) -> Option<usize> {
        Some(GP)
    }

    fn return_value_registers(&self) -> &'static [usize] {
        &RETURN_REGS
    }

    fn argument_registers(&self) -> &'static [usize] {
        &ARG_REGS
    }

    fn transfer(&self, instr: &Instruction, state: &mut MachineState, env: &TransferEnv) {
        // The frame-allocating prologue addiu rebinds the sp symbol: stack
        // slots and the per-context concrete sp are both measured from the
        // post-prologue stack pointer.
        if self.frame_allocation(instr).is_some() {
            state.reset_stack_pointer(self);
            pin_zero(state);
            return;
        }

        // A destination outside the modeled register file degrades the
        // instruction to a kill of its reported outputs; only a memory
        // access with no addressing pattern at all is a defect.
        match self.categorize(instr) {
            InstructionCategory::Store
            | InstructionCategory::Call
            | InstructionCategory::Nop
            | InstructionCategory::Kill => {}
            _ => {
                let parseable = instr
                    .operands
                    .first()
                    .map_or(false, |o| self.register_index(o).is_some());
                if !parseable {
                    self.kill_outputs(instr, state);
                    pin_zero(state);
                    return;
                }
            }
        }

        // The immediate-building pair gets handled before generic
        // dispatch: `lui` opens a pending upper immediate, and `ori`
        // completes it (the low half is zero, so or equals add here).
        match instr.mnemonic.as_str() {
            "lui" => {
                let d = self.destination(instr);
                let v = match instr.operands.get(1).and_then(|t| parse_int(t)) {
                    Some(imm) => AbstractValue::symbol(
                        SymbolKind::UpperImmediate((imm as u32) << 16),
                        0,
                        true,
                    ),
                    None => AbstractValue::unknown(),
                };
                state.regs.set(d, v);
                pin_zero(state);
                return;
            }
            "li" => {
                let d = self.destination(instr);
                let v = match instr.operands.get(1).and_then(|t| parse_int(t)) {
                    Some(imm) => AbstractValue::constant(imm),
                    None => AbstractValue::unknown(),
                };
                state.regs.set(d, v);
                pin_zero(state);
                return;
            }
            "ori" => {
                let d = self.destination(instr);
                let a = self.eval_operand(state, &instr.operands[1]);
                let imm = instr.operands.get(2).and_then(|t| parse_int(t));
                let v = match (a.value, imm) {
                    (
                        SymbolicValue::Symbol {
                            kind: SymbolKind::UpperImmediate(hi),
                            offset: 0,
                        },
                        Some(imm),
                    ) => AbstractValue {
                        value: SymbolicValue::Symbol {
                            kind: SymbolKind::UpperImmediate(hi),
                            offset: imm,
                        },
                        precise: a.precise,
                    },
                    (SymbolicValue::Constant(c), Some(imm)) => AbstractValue {
                        value: SymbolicValue::Constant(c | imm),
                        precise: a.precise,
                    },
                    _ => AbstractValue::unknown(),
                };
                state.regs.set(d, v);
                pin_zero(state);
                return;
            }
            _ => {}
        }

        match self.categorize(instr) {
            InstructionCategory::Add => {
                let d = self.destination(instr);
                let a = self.eval_operand(state, &instr.operands[1]);
                let b = self.eval_operand(state, &instr.operands[2]);
                state.regs.set(d, AbstractValue::add(a, b));
            }
            InstructionCategory::AddAugmenting => {
                let d = self.destination(instr);
                let a = self.eval_operand(state, &instr.operands[1]);
                let b = self.eval_operand(state, &instr.operands[2]);
                state.regs.set(d, AbstractValue::add_augmenting(a, b));
            }
            InstructionCategory::Sub => {
                let d = self.destination(instr);
                let a = self.eval_operand(state, &instr.operands[1]);
                let b = self.eval_operand(state, &instr.operands[2]);
                state.regs.set(d, AbstractValue::sub(a, b));
            }
            InstructionCategory::Mul => {
                let d = self.destination(instr);
                let a = self.eval_operand(state, &instr.operands[1]);
                let b = if instr.mnemonic == "sll" {
                    // sll d, s, shamt is d = s * 2^shamt.
                    match instr.operands.get(2).and_then(|t| parse_int(t)) {
                        Some(n) if (0..32).contains(&n) => AbstractValue::constant(1 << n),
                        _ => AbstractValue::unknown(),
                    }
                } else {
                    self.eval_operand(state, &instr.operands[2])
                };
                state.regs.set(d, AbstractValue::mul(a, b));
            }
            InstructionCategory::Move => {
                let d = self.destination(instr);
                let v = self.eval_operand(state, &instr.operands[1]);
                state.regs.set(d, v);
            }
            InstructionCategory::Complement => {
                let d = self.destination(instr);
                let v = AbstractValue::complement(self.eval_operand(state, &instr.operands[1]));
                state.regs.set(d, v);
            }
            InstructionCategory::LoadConstant(_) => {
                unreachable!("li/lui/ori are handled before dispatch")
            }
            InstructionCategory::Load => {
                let d = self.destination(instr);
                let addr = self.effective_address(instr, state, env);
                let v = match (addr.value, addr.precise) {
                    (
                        SymbolicValue::Symbol {
                            kind: SymbolKind::StackPointer,
                            offset,
                        },
                        true,
                    ) => match state.slot_for_offset(self, offset) {
                        Some(slot) => state.stack.get(slot).unwrap(),
                        None => AbstractValue::unknown(),
                    },
                    _ => AbstractValue::unknown(),
                };
                state.regs.set(d, v);
            }
            InstructionCategory::Store => {
                let addr = self.effective_address(instr, state, env);
                if let (
                    SymbolicValue::Symbol {
                        kind: SymbolKind::StackPointer,
                        offset,
                    },
                    true,
                ) = (addr.value, addr.precise)
                {
                    if let Some(slot) = state.slot_for_offset(self, offset) {
                        let v = self.eval_operand(state, &instr.operands[0]);
                        state.stack.set(slot, v);
                    }
                }
            }
            InstructionCategory::Call => {
                for &r in self.return_value_registers() {
                    state.regs.set(r, AbstractValue::unknown());
                }
            }
            InstructionCategory::Nop => {}
            InstructionCategory::Kill => self.kill_outputs(instr, state),
        }

        pin_zero(state);
    }

    fn effective_address(
        &self,
        instr: &Instruction,
        state: &MachineState,
        _env: &TransferEnv,
    ) -> AbstractValue {
        let mem = self.parse_mem(instr).unwrap_or_else(|| {
            panic!(
                "Memory instruction `{}` matches no addressing pattern",
                instr
            )
        });
        AbstractValue::add(
            state.regs.get(mem.base),
            AbstractValue::constant(mem.offset),
        )
    }

    fn frame_allocation(&self, instr: &Instruction) -> Option<i64> {
        if instr.mnemonic != "addiu" {
            return None;
        }
        match &instr.operands[..] {
            [d, a, imm] if d.as_str() == "sp" && a.as_str() == "sp" => {
                parse_int(imm).filter(|n| *n < 0).map(|n| -n)
            }
            _ => None,
        }
    }

    fn sp_relative_offset(&self, instr: &Instruction) -> Option<i64> {
        if !(instr.class.is_load || instr.class.is_store) || !instr.reads("sp") {
            return None;
        }
        let mem = self.parse_mem(instr)?;
        (mem.base == SP).then(|| mem.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names_resolve() {
        let mips = Mips;
        assert_eq!(mips.register_index("sp"), Some(SP));
        assert_eq!(mips.register_index("$sp"), Some(SP));
        assert_eq!(mips.register_index("gp"), Some(GP));
        assert_eq!(mips.register_index("zero"), Some(0));
        assert_eq!(mips.register_index("fp"), Some(30));
        assert_eq!(mips.register_index("f12"), Some(44));
        assert_eq!(mips.register_index("hi"), Some(HI));
        assert_eq!(mips.register_index("f32"), None);
    }

    #[test]
    fn mem_operand_parsing() {
        let mips = Mips;
        let instr = Instruction {
            address: 0,
            mnemonic: "lw".to_string(),
            operands: vec!["v0".to_string(), "-32692(gp)".to_string()],
            inputs: vec!["gp".to_string()],
            outputs: vec!["v0".to_string()],
            class: crate::program::InstrClass {
                is_load: true,
                ..Default::default()
            },
            access_size: Some(4),
            predicated: false,
        };
        let mem = mips.parse_mem(&instr).unwrap();
        assert_eq!(mem.base, GP);
        assert_eq!(mem.offset, -32692);
    }
}

//! ARM transfer functions and operand grammar.
//!
//! The modeled register file is r0-r15, f0-f7, cpsr, plus the private
//! auxiliary register used for shifter decomposition: 26 entries. The
//! upstream CFG layer has already expanded `push`/`pop` and all
//! `ldm`/`stm` variants into single-register transfers plus explicit
//! stack-pointer adjustment, so those mnemonics reaching this layer is a
//! defect, not an input condition.

use crate::arch::{ArchitectureModel, InstructionCategory, TransferEnv};
use crate::machine_state::MachineState;
use crate::program::{ArchKind, Instruction};
use crate::symval::{AbstractValue, SymbolKind, SymbolicValue};

const REG_NAMES: [&str; 26] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc", "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "cpsr", "aux",
];

const SP: usize = 13;
const LR: usize = 14;
const PC: usize = 15;
const AUX: usize = 25;

/// ARM pipeline offset: reading `pc` observes the instruction address
/// plus 8.
const PIPELINE: i64 = 8;

const RETURN_REGS: [usize; 2] = [0, 1];
const ARG_REGS: [usize; 4] = [0, 1, 2, 3];

/// Condition-code suffixes objdump appends to predicated mnemonics.
const CONDITION_SUFFIXES: [&str; 16] = [
    "eq", "ne", "cs", "hs", "cc", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le",
];

pub struct Arm;

/// The offset part of an ARM memory operand.
enum MemOffset {
    Imm(i64),
    Reg(usize),
    /// `rX, lsl #n`
    RegLsl(usize, u32),
    /// A shifted/rotated register form the algebra cannot model.
    RegOpaque,
}

struct MemOperand {
    base: usize,
    offset: MemOffset,
    /// `[rB, #n]!` pre-index writeback.
    writeback: bool,
    /// `[rB], #n` post-index: the offset applies to the base *after* the
    /// access, not to the effective address.
    post_index: bool,
}

impl Arm {
    fn base_mnemonic<'a>(&self, instr: &'a Instruction) -> &'a str {
        let m = instr.mnemonic.as_str();
        if !instr.predicated {
            return m;
        }
        for suffix in CONDITION_SUFFIXES {
            if let Some(stripped) = m.strip_suffix(suffix) {
                if !stripped.is_empty() {
                    return stripped;
                }
            }
        }
        m
    }

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
        let base = self.base_mnemonic(instr);
        match base.trim_end_matches('s') {
            "push" | "pop" | "ldm" | "ldmia" | "ldmib" | "ldmda" | "ldmdb" | "stm" | "stmia"
            | "stmib" | "stmda" | "stmdb" => panic!(
                "Raw multi-register instruction `{}` reached the transfer layer; \
                 the CFG layer must expand these",
                instr
            ),
            "add" => {
                // Register-indexed adds keep a known base alive through an
                // opaque index (array addressing); immediate adds stay
                // plain.
                if instr.operands.len() >= 3 && !instr.operands[2].starts_with('#') {
                    InstructionCategory::AddAugmenting
                } else {
                    InstructionCategory::Add
                }
            }
            "sub" | "rsb" => InstructionCategory::Sub,
            "mul" => InstructionCategory::Mul,
            "mov" => InstructionCategory::Move,
            "mvn" => InstructionCategory::Complement,
            "lsl" => InstructionCategory::Mul,
            "nop" => InstructionCategory::Nop,
            _ => InstructionCategory::Kill,
        }
    }

    /// Read one plain operand (`#imm` or a register) against the current
    /// state. Reading `pc` observes the pipeline-adjusted instruction
    /// address; a predicated read of `pc` is only a hint, since the
    /// instruction may not execute where the analysis assumes.
    fn eval_operand(&self, instr: &Instruction, state: &MachineState, text: &str) -> AbstractValue {
        if let Some(imm) = text.strip_prefix('#') {
            return match parse_int(imm) {
                Some(v) => AbstractValue::constant(v),
                None => AbstractValue::unknown(),
            };
        }
        match self.register_index(text) {
            Some(PC) => {
                AbstractValue::symbol(SymbolKind::ProgramCounter, PIPELINE, !instr.predicated)
            }
            Some(r) => state.regs.get(r),
            None => AbstractValue::unknown(),
        }
    }

    /// Evaluate a trailing shifter operand (`lsl #2`, `ror r3`, ...) into
    /// the auxiliary register, returning the shifted value of `reg_text`.
    /// Only left-shift-by-known-constant is representable; every other
    /// shifter form is opaque.
    fn eval_shifted(
        &self,
        instr: &Instruction,
        state: &mut MachineState,
        reg_text: &str,
        shift_text: &str,
    ) -> AbstractValue {
        let v = self.eval_operand(instr, state, reg_text);
        let shifted = match shift_text.split_once(' ') {
            Some(("lsl", amount)) => match amount.strip_prefix('#').and_then(parse_int) {
                Some(n) if (0..32).contains(&n) => {
                    AbstractValue::mul(v, AbstractValue::constant(1 << n))
                }
                _ => AbstractValue::unknown(),
            },
            _ => AbstractValue::unknown(),
        };
        state.regs.set(AUX, shifted);
        state.regs.get(AUX)
    }

    fn is_shifter(text: &str) -> bool {
        matches!(
            text.split(' ').next(),
            Some("lsl" | "lsr" | "asr" | "ror" | "rrx")
        )
    }

    /// Parse a `[...]` memory operand together with a possible trailing
    /// post-index operand.
    fn parse_mem(&self, instr: &Instruction) -> Option<MemOperand> {
        let mem_posn = instr.operands.iter().position(|o| o.starts_with('['))?;
        let raw = &instr.operands[mem_posn];
        let writeback = raw.ends_with('!');
        let inner = raw
            .trim_end_matches('!')
            .strip_prefix('[')?
            .strip_suffix(']')?;
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        let base = self.register_index(parts[0])?;

        // Anything after the closing bracket is a post-index amount.
        let post = instr.operands.get(mem_posn + 1);

        let offset = if let Some(post_op) = post {
            if let Some(imm) = post_op.strip_prefix('#') {
                MemOffset::Imm(parse_int(imm)?)
            } else if let Some(r) = self.register_index(post_op) {
                // A shifter may trail the post-index register as one more
                // operand: `[rB], rX, lsl #n`.
                match instr.operands.get(mem_posn + 2) {
                    Some(shift) if Self::is_shifter(shift) => match shift.split_once(' ') {
                        Some(("lsl", n)) => match n.strip_prefix('#').and_then(parse_int) {
                            Some(n) if (0..32).contains(&n) => MemOffset::RegLsl(r, n as u32),
                            _ => MemOffset::RegOpaque,
                        },
                        _ => MemOffset::RegOpaque,
                    },
                    _ => MemOffset::Reg(r),
                }
            } else {
                MemOffset::RegOpaque
            }
        } else {
            match parts.len() {
                1 => MemOffset::Imm(0),
                2 => {
                    if let Some(imm) = parts[1].strip_prefix('#') {
                        MemOffset::Imm(parse_int(imm)?)
                    } else if let Some(r) = self.register_index(parts[1]) {
                        MemOffset::Reg(r)
                    } else {
                        MemOffset::RegOpaque
                    }
                }
                3 => match (self.register_index(parts[1]), parts[2].split_once(' ')) {
                    (Some(r), Some(("lsl", n))) => match n.strip_prefix('#').and_then(parse_int) {
                        Some(n) if (0..32).contains(&n) => MemOffset::RegLsl(r, n as u32),
                        _ => MemOffset::RegOpaque,
                    },
                    _ => MemOffset::RegOpaque,
                },
                _ => MemOffset::RegOpaque,
            }
        };

        Some(MemOperand {
            base,
            offset,
            writeback,
            post_index: post.is_some(),
        })
    }

    fn eval_mem_offset(
        &self,
        instr: &Instruction,
        state: &MachineState,
        offset: &MemOffset,
    ) -> AbstractValue {
        match offset {
            MemOffset::Imm(n) => AbstractValue::constant(*n),
            MemOffset::Reg(r) => {
                if *r == PC {
                    AbstractValue::symbol(SymbolKind::ProgramCounter, PIPELINE, !instr.predicated)
                } else {
                    state.regs.get(*r)
                }
            }
            MemOffset::RegLsl(r, n) => {
                AbstractValue::mul(state.regs.get(*r), AbstractValue::constant(1 << n))
            }
            MemOffset::RegOpaque => AbstractValue::unknown(),
        }
    }

    fn base_value(&self, instr: &Instruction, state: &MachineState, base: usize) -> AbstractValue {
        if base == PC {
            AbstractValue::symbol(SymbolKind::ProgramCounter, PIPELINE, !instr.predicated)
        } else {
            state.regs.get(base)
        }
    }

    /// Assign a destination. A predicated assignment may or may not take
    /// effect at runtime, so it merges with the previous value.
    fn assign(&self, state: &mut MachineState, d: usize, v: AbstractValue, predicated: bool) {
        let v = if predicated && state.regs.get(d) != v {
            AbstractValue::unknown()
        } else {
            v
        };
        state.regs.set(d, v);
    }

    /// Kill every output register the decoder reported for `instr`.
    fn kill_outputs(&self, instr: &Instruction, state: &mut MachineState) {
        for name in &instr.outputs {
            if let Some(r) = self.register_index(name) {
                state.regs.set(r, AbstractValue::unknown());
            }
        }
    }

    /// Apply the implicit base-register update of writeback and post-index
    /// addressing.
    fn apply_index_update(
        &self,
        instr: &Instruction,
        state: &mut MachineState,
        mem: &MemOperand,
    ) {
        if !(mem.writeback || mem.post_index) {
            return;
        }
        let base = self.base_value(instr, state, mem.base);
        let off = self.eval_mem_offset(instr, state, &mem.offset);
        let updated = AbstractValue::add(base, off);
        self.assign(state, mem.base, updated, instr.predicated);
    }
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

impl ArchitectureModel for Arm {
    fn kind(&self) -> ArchKind {
        ArchKind::Arm
    }

    fn register_count(&self) -> usize {
        REG_NAMES.len()
    }

    fn word_size(&self) -> u32 {
        4
    }

    fn register_index(&self, name: &str) -> Option<usize> {
        let name = match name {
            "r13" => "sp",
            "r14" => "lr",
            "r15" => "pc",
            "fp" => "r11",
            "ip" => "r12",
            "sl" => "r10",
            "sb" => "r9",
            other => other,
        };
        REG_NAMES.iter().position(|&r| r == name)
    }

    fn register_name(&self, idx: usize) -> &'static str {
        REG_NAMES[idx]
    }

    fn stack_pointer(&self) -> usize {
        SP
    }

    fn aux_register(&self) -> usize {
        AUX
    }

    fn return_value_registers(&self) -> &'static [usize] {
        &RETURN_REGS
    }

    fn argument_registers(&self) -> &'static [usize] {
        &ARG_REGS
    }

    fn transfer(&self, instr: &Instruction, state: &mut MachineState, env: &TransferEnv) {
        // The frame-allocating prologue sub rebinds the sp symbol: stack
        // slots and the per-context concrete sp are both measured from the
        // post-prologue stack pointer.
        if self.frame_allocation(instr).is_some() {
            state.reset_stack_pointer(self);
            return;
        }

        let category = self.categorize(instr);

        // A destination outside the modeled register file (VFP, system
        // registers) degrades the instruction to a kill of its reported
        // outputs; only a memory access with no addressing pattern at all
        // is a defect.
        match category {
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
                    return;
                }
            }
        }

        match category {
            InstructionCategory::Add | InstructionCategory::AddAugmenting => {
                let augmenting = category == InstructionCategory::AddAugmenting;
                let (d, a, b) = self.three_operand(instr, state);
                let v = if augmenting {
                    AbstractValue::add_augmenting(a, b)
                } else {
                    AbstractValue::add(a, b)
                };
                self.assign(state, d, v, instr.predicated);
            }
            InstructionCategory::Sub => {
                let (d, a, b) = self.three_operand(instr, state);
                let v = if self.base_mnemonic(instr).starts_with("rsb") {
                    AbstractValue::sub(b, a)
                } else {
                    AbstractValue::sub(a, b)
                };
                self.assign(state, d, v, instr.predicated);
            }
            InstructionCategory::Mul => {
                let base = self.base_mnemonic(instr);
                let v = if base.trim_end_matches('s') == "lsl" {
                    // lsl rd, rm, #n is rd = rm * 2^n; anything else in the
                    // shift family was classified as Kill.
                    let a = self.eval_operand(instr, state, &instr.operands[1]);
                    match instr
                        .operands
                        .get(2)
                        .and_then(|o| o.strip_prefix('#'))
                        .and_then(parse_int)
                    {
                        Some(n) if (0..32).contains(&n) => {
                            AbstractValue::mul(a, AbstractValue::constant(1 << n))
                        }
                        _ => AbstractValue::unknown(),
                    }
                } else {
                    let (_, a, b) = self.three_operand(instr, state);
                    AbstractValue::mul(a, b)
                };
                let d = self
                    .register_index(&instr.operands[0])
                    .unwrap_or_else(|| panic!("Unparseable destination in `{}`", instr));
                self.assign(state, d, v, instr.predicated);
            }
            InstructionCategory::Move => {
                let d = self
                    .register_index(&instr.operands[0])
                    .unwrap_or_else(|| panic!("Unparseable destination in `{}`", instr));
                let v = if instr.operands.len() >= 3 && Self::is_shifter(&instr.operands[2]) {
                    self.eval_shifted(
                        instr,
                        state,
                        &instr.operands[1].clone(),
                        &instr.operands[2].clone(),
                    )
                } else {
                    self.eval_operand(instr, state, &instr.operands[1])
                };
                self.assign(state, d, v, instr.predicated);
            }
            InstructionCategory::Complement => {
                let d = self
                    .register_index(&instr.operands[0])
                    .unwrap_or_else(|| panic!("Unparseable destination in `{}`", instr));
                let v = AbstractValue::complement(self.eval_operand(
                    instr,
                    state,
                    &instr.operands[1],
                ));
                self.assign(state, d, v, instr.predicated);
            }
            InstructionCategory::LoadConstant(v) => {
                let d = self
                    .register_index(&instr.operands[0])
                    .unwrap_or_else(|| panic!("Unparseable destination in `{}`", instr));
                self.assign(state, d, AbstractValue::constant(v), instr.predicated);
            }
            InstructionCategory::Load => {
                let d = self
                    .register_index(&instr.operands[0])
                    .unwrap_or_else(|| panic!("Unparseable destination in `{}`", instr));

                // An unpredicated pc-base load reads a `.word` literal the
                // decoder already resolved; rewrite it into a constant move
                // on the fly. Predicated loads are never resolved this way.
                if let Some(lit_addr) = self.pc_relative_literal(instr) {
                    let lit = env.program.literals.get(&lit_addr).unwrap_or_else(|| {
                        panic!(
                            "PC-relative load `{}` targets {:#x}, not in the literal pool",
                            instr, lit_addr
                        )
                    });
                    // Both immediate and section-address words carry their
                    // raw value; the distinction only matters downstream.
                    let v = AbstractValue::constant(lit.value as i64);
                    self.assign(state, d, v, instr.predicated);
                    return;
                }

                let mem = self.parse_mem(instr).unwrap_or_else(|| {
                    panic!("Load `{}` matches no addressing pattern", instr)
                });
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
                self.assign(state, d, v, instr.predicated);
                self.apply_index_update(instr, state, &mem);
            }
            InstructionCategory::Store => {
                let mem = self.parse_mem(instr).unwrap_or_else(|| {
                    panic!("Store `{}` matches no addressing pattern", instr)
                });
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
                        let v = self.eval_operand(instr, state, &instr.operands[0]);
                        let v = if instr.predicated && state.stack.get(slot).unwrap() != v {
                            AbstractValue::unknown()
                        } else {
                            v
                        };
                        state.stack.set(slot, v);
                    }
                }
                self.apply_index_update(instr, state, &mem);
            }
            InstructionCategory::Call => {
                for &r in self.return_value_registers() {
                    state.regs.set(r, AbstractValue::unknown());
                }
            }
            InstructionCategory::Nop => {}
            InstructionCategory::Kill => self.kill_outputs(instr, state),
        }
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
        let base = self.base_value(instr, state, mem.base);
        if mem.post_index {
            // Post-indexed: the access uses the un-adjusted base.
            return base;
        }
        let off = self.eval_mem_offset(instr, state, &mem.offset);
        AbstractValue::add(base, off)
    }

    fn pc_relative_literal(&self, instr: &Instruction) -> Option<u64> {
        if !instr.class.is_load || instr.predicated {
            return None;
        }
        let mem = self.parse_mem(instr)?;
        if mem.base != PC || mem.post_index {
            return None;
        }
        match mem.offset {
            MemOffset::Imm(off) => {
                Some(instr.address.wrapping_add(PIPELINE as u64).wrapping_add(off as u64))
            }
            _ => None,
        }
    }

    fn frame_allocation(&self, instr: &Instruction) -> Option<i64> {
        if self.base_mnemonic(instr).trim_end_matches('s') != "sub" {
            return None;
        }
        match &instr.operands[..] {
            [d, a, imm] if d.as_str() == "sp" && a.as_str() == "sp" => {
                imm.strip_prefix('#').and_then(parse_int).filter(|n| *n > 0)
            }
            _ => None,
        }
    }

    fn sp_relative_offset(&self, instr: &Instruction) -> Option<i64> {
        if !(instr.class.is_load || instr.class.is_store) || !instr.reads("sp") {
            return None;
        }
        let mem = self.parse_mem(instr)?;
        if mem.base != SP || mem.post_index {
            return None;
        }
        match mem.offset {
            MemOffset::Imm(off) => Some(off),
            _ => None,
        }
    }
}

impl Arm {
    /// Decode `op d, a, b` (or the two-operand `op d, b` form where the
    /// destination doubles as the first source), with shifter
    /// decomposition through the auxiliary register.
    fn three_operand(
        &self,
        instr: &Instruction,
        state: &mut MachineState,
    ) -> (usize, AbstractValue, AbstractValue) {
        let d = self
            .register_index(&instr.operands[0])
            .unwrap_or_else(|| panic!("Unparseable destination in `{}`", instr));
        match instr.operands.len() {
            2 => {
                let a = state.regs.get(d);
                let b = self.eval_operand(instr, state, &instr.operands[1]);
                (d, a, b)
            }
            3 => {
                let a = self.eval_operand(instr, state, &instr.operands[1]);
                let b = self.eval_operand(instr, state, &instr.operands[2]);
                (d, a, b)
            }
            4 if Self::is_shifter(&instr.operands[3]) => {
                let a = self.eval_operand(instr, state, &instr.operands[1]);
                let b = self.eval_shifted(
                    instr,
                    state,
                    &instr.operands[2].clone(),
                    &instr.operands[3].clone(),
                );
                (d, a, b)
            }
            _ => panic!("Unparseable operand list in `{}`", instr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_suffix_stripping() {
        let arm = Arm;
        let mut instr = Instruction {
            address: 0,
            mnemonic: "ldrls".to_string(),
            operands: vec![],
            inputs: vec![],
            outputs: vec![],
            class: Default::default(),
            access_size: None,
            predicated: true,
        };
        assert_eq!(arm.base_mnemonic(&instr), "ldr");
        instr.predicated = false;
        // Without the predication flag the mnemonic is taken verbatim.
        assert_eq!(arm.base_mnemonic(&instr), "ldrls");
    }

    #[test]
    fn register_aliases() {
        let arm = Arm;
        assert_eq!(arm.register_index("sp"), Some(13));
        assert_eq!(arm.register_index("r13"), Some(13));
        assert_eq!(arm.register_index("fp"), Some(11));
        assert_eq!(arm.register_index("pc"), Some(15));
        assert_eq!(arm.register_index("aux"), Some(25));
        assert_eq!(arm.register_index("bogus"), None);
    }

    #[test]
    fn post_index_register_shift_folds_into_the_base_update() {
        use crate::program::Program;
        use crate::tests::{ins, load};
        let arm = Arm;
        let prog = Program::new(ArchKind::Arm, "t", 0x1000);
        let env = TransferEnv { program: &prog };
        let r1 = arm.register_index("r1").unwrap();
        let r2 = arm.register_index("r2").unwrap();

        let mut state = MachineState::new(&arm, 0);
        state.regs.set(r1, AbstractValue::constant(0x100));
        state.regs.set(r2, AbstractValue::constant(4));
        let instr = load(
            ins(0x8000, "ldr r0, [r1], r2, lsl #2", &["r1", "r2"], &["r0", "r1"]),
            4,
        );
        arm.transfer(&instr, &mut state, &env);
        assert_eq!(state.regs.get(r1), AbstractValue::constant(0x110));

        // Shifter forms outside the algebra give up the base entirely.
        let mut state = MachineState::new(&arm, 0);
        state.regs.set(r1, AbstractValue::constant(0x100));
        state.regs.set(r2, AbstractValue::constant(4));
        let instr = load(
            ins(0x8004, "ldr r0, [r1], r2, lsr #2", &["r1", "r2"], &["r0", "r1"]),
            4,
        );
        arm.transfer(&instr, &mut state, &env);
        assert!(state.regs.get(r1).is_unknown());
    }

    #[test]
    fn unmodeled_destination_degrades_to_a_kill() {
        use crate::program::Program;
        use crate::tests::{ins, load};
        let arm = Arm;
        let prog = Program::new(ArchKind::Arm, "t", 0x1000);
        let env = TransferEnv { program: &prog };
        let r1 = arm.register_index("r1").unwrap();

        let mut state = MachineState::new(&arm, 0);
        state.regs.set(r1, AbstractValue::constant(0x100));
        let instr = load(ins(0x8000, "vldr s0, [r1]", &["r1"], &["s0"]), 4);
        arm.transfer(&instr, &mut state, &env);
        // The VFP destination is outside the register file: no panic, no
        // effect beyond killing the (unmodeled) outputs.
        assert_eq!(state.regs.get(r1), AbstractValue::constant(0x100));
    }

    #[test]
    fn immediate_parsing() {
        assert_eq!(parse_int("16"), Some(16));
        assert_eq!(parse_int("-4"), Some(-4));
        assert_eq!(parse_int("0x40"), Some(0x40));
        assert_eq!(parse_int("lsl"), None);
    }
}

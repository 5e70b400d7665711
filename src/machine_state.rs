//! The abstract machine state: one register file plus one stack model per
//! (node, context) visitation, and the join/classify operations the
//! fixpoint engine drives.

use crate::address_info::{AccessKind, AddressInfo};
use crate::arch::{ArchitectureModel, TransferEnv};
use crate::program::Instruction;
use crate::symval::{AbstractValue, SymbolKind, SymbolicValue};

/// Ordered array of abstract register values, sized to the architecture's
/// register count.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RegisterFile {
    regs: Vec<AbstractValue>,
}

impl RegisterFile {
    pub fn new(count: usize) -> Self {
        Self {
            regs: vec![AbstractValue::unknown(); count],
        }
    }

    pub fn get(&self, idx: usize) -> AbstractValue {
        self.regs[idx]
    }

    pub fn set(&mut self, idx: usize, v: AbstractValue) {
        self.regs[idx] = v;
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }
}

/// Stack-slot vector, indexed from the current stack pointer downward in
/// word-size steps. The slot count is fixed at construction and never
/// changes during analysis.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StackModel {
    slots: Vec<AbstractValue>,
}

impl StackModel {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![AbstractValue::unknown(); slot_count],
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: usize) -> Option<AbstractValue> {
        self.slots.get(slot).copied()
    }

    /// Write a slot; out-of-range writes are silently dropped (the store
    /// is outside the modeled frame).
    pub fn set(&mut self, slot: usize, v: AbstractValue) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = v;
        }
    }
}

/// One register file plus one stack model, with the operations the
/// fixpoint engine needs.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MachineState {
    pub regs: RegisterFile,
    pub stack: StackModel,
}

impl MachineState {
    /// A fresh, fully opaque state with `stack_slots` stack slots.
    pub fn new(arch: &dyn ArchitectureModel, stack_slots: usize) -> Self {
        Self {
            regs: RegisterFile::new(arch.register_count()),
            stack: StackModel::new(stack_slots),
        }
    }

    /// A fresh function-entry state: opaque except for the architecture's
    /// pinned registers (sp rebound to the new frame, the zero register,
    /// and the global pointer when the symbol table defines one).
    pub fn at_function_entry(
        arch: &dyn ArchitectureModel,
        stack_slots: usize,
        env: &TransferEnv,
    ) -> Self {
        let mut s = Self::new(arch, stack_slots);
        s.reset_stack_pointer(arch);
        if let Some(z) = arch.zero_register() {
            s.regs.set(z, AbstractValue::constant(0));
        }
        if let (Some(gp), Some(_)) = (
            arch.global_pointer_register(),
            env.program.symtab.global_pointer,
        ) {
            s.regs
                .set(gp, AbstractValue::symbol(SymbolKind::GlobalPointer, 0, true));
        }
        s
    }

    /// Rebind the stack-pointer symbol to the current frame. Invoked
    /// whenever state crosses a function entry or exit node.
    pub fn reset_stack_pointer(&mut self, arch: &dyn ArchitectureModel) {
        self.regs.set(
            arch.stack_pointer(),
            AbstractValue::symbol(SymbolKind::StackPointer, 0, true),
        );
    }

    /// Resolve a stack-pointer-relative byte offset into a slot index, if
    /// it lands inside the modeled frame.
    pub fn slot_for_offset(&self, arch: &dyn ArchitectureModel, offset: i64) -> Option<usize> {
        if offset < 0 {
            return None;
        }
        let slot = (offset / arch.word_size() as i64) as usize;
        (slot < self.stack.slot_count()).then(|| slot)
    }

    /// Copy the given register indexes over from `other`.
    pub fn copy_registers_from(&mut self, other: &MachineState, indexes: &[usize]) {
        for &i in indexes {
            self.regs.set(i, other.regs.get(i));
        }
    }

    /// Apply one instruction, then check the architecture invariants that
    /// must survive every transfer. An invariant violation is a defect in
    /// the transfer functions or the input, not a recoverable condition.
    pub fn simulate(
        &mut self,
        arch: &dyn ArchitectureModel,
        instr: &Instruction,
        env: &TransferEnv,
    ) {
        arch.transfer(instr, self, env);

        let sp = self.regs.get(arch.stack_pointer());
        assert!(
            matches!(
                sp.value,
                SymbolicValue::Symbol {
                    kind: SymbolKind::StackPointer,
                    ..
                }
            ) && sp.precise,
            "Stack-pointer invariant violated after `{}`: sp = {}",
            instr,
            sp
        );
        if let Some(z) = arch.zero_register() {
            assert_eq!(
                self.regs.get(z),
                AbstractValue::constant(0),
                "Zero-register invariant violated after `{}`",
                instr
            );
        }
    }

    /// Join `other` into `self`, slot by slot: equal values (including
    /// their precision bits) are kept, anything else degrades to unknown.
    /// The auxiliary register does not participate. Returns whether `self`
    /// changed.
    pub fn join(&mut self, other: &MachineState, arch: &dyn ArchitectureModel) -> bool {
        assert_eq!(
            self.stack.slot_count(),
            other.stack.slot_count(),
            "Joining states with different stack layouts"
        );
        let mut changed = false;
        let aux = arch.aux_register();
        for i in 0..self.regs.len() {
            if i == aux {
                continue;
            }
            let a = self.regs.get(i);
            let b = other.regs.get(i);
            if a != b && !a.is_unknown() {
                self.regs.set(i, AbstractValue::unknown());
                changed = true;
            }
        }
        for i in 0..self.stack.slot_count() {
            let a = self.stack.get(i).unwrap();
            let b = other.stack.get(i).unwrap();
            if a != b && !a.is_unknown() {
                self.stack.set(i, AbstractValue::unknown());
                changed = true;
            }
        }
        changed
    }

    /// State equality modulo the auxiliary register; the fixpoint engine's
    /// change detection.
    pub fn same_as(&self, other: &MachineState, arch: &dyn ArchitectureModel) -> bool {
        let aux = arch.aux_register();
        if self.stack != other.stack {
            return false;
        }
        (0..self.regs.len())
            .filter(|&i| i != aux)
            .all(|i| self.regs.get(i) == other.regs.get(i))
    }

    /// Classify the *current* (pre-simulation) address expression of a
    /// load/store. Does not mutate state. The classes are tried in fixed
    /// priority order: PC-relative literal word, global-pointer-relative,
    /// stack-relative, upper-immediate/absolute, then the unknown-pointer
    /// fallback.
    ///
    /// `stack_base` is the context's concrete stack-pointer value and
    /// `stack_extent` the byte size of the modeled frame, both from the
    /// stack frame analysis.
    pub fn access_classify(
        &self,
        arch: &dyn ArchitectureModel,
        instr: &Instruction,
        env: &TransferEnv,
        stack_base: u64,
        stack_extent: u32,
    ) -> AddressInfo {
        assert!(
            instr.class.is_load || instr.class.is_store,
            "access_classify on a non-memory instruction `{}`",
            instr
        );
        let access = if instr.class.is_store {
            AccessKind::Write
        } else {
            AccessKind::Read
        };
        let size = instr.access_size.unwrap_or(arch.word_size());

        // PC-base literal loads resolve directly against the literal pool.
        if let Some(lit_addr) = arch.pc_relative_literal(instr) {
            assert!(
                env.program.literals.contains_key(&lit_addr),
                "PC-relative load `{}` targets {:#x}, not in the literal pool",
                instr,
                lit_addr
            );
            return AddressInfo {
                access,
                precise: true,
                segment: "code".to_string(),
                var_name: None,
                ranges: vec![(lit_addr, size)],
            };
        }

        let eff = arch.effective_address(instr, self, env);
        match eff.value {
            SymbolicValue::Symbol {
                kind: SymbolKind::GlobalPointer,
                offset,
            } => match env.program.symtab.global_pointer {
                Some(gp) => self.classify_absolute(
                    gp.wrapping_add(offset as u64),
                    size,
                    eff.precise,
                    access,
                    instr,
                    env,
                ),
                None => AddressInfo::unknown_pointer(access, instr, env.program),
            },
            SymbolicValue::Symbol {
                kind: SymbolKind::StackPointer,
                offset,
            } => {
                let precise = eff.precise;
                let ranges = if precise {
                    vec![(stack_base.wrapping_add(offset as u64), size)]
                } else {
                    vec![(stack_base, stack_extent)]
                };
                AddressInfo {
                    access,
                    precise,
                    segment: "stack".to_string(),
                    var_name: None,
                    ranges,
                }
            }
            SymbolicValue::Symbol {
                kind: SymbolKind::UpperImmediate(hi),
                offset,
            } => self.classify_absolute(
                (hi as u64).wrapping_add(offset as u64),
                size,
                eff.precise,
                access,
                instr,
                env,
            ),
            SymbolicValue::Symbol {
                kind: SymbolKind::ProgramCounter,
                offset,
            } => self.classify_absolute(
                instr.address.wrapping_add(offset as u64),
                size,
                eff.precise,
                access,
                instr,
                env,
            ),
            SymbolicValue::Constant(c) => {
                self.classify_absolute(c as u64, size, eff.precise, access, instr, env)
            }
            SymbolicValue::Unknown => AddressInfo::unknown_pointer(access, instr, env.program),
        }
    }

    /// Classify an absolute address against the symbol table. An imprecise
    /// address widens to the enclosing variable (array-style hint) or
    /// section; an address outside every section falls back to the
    /// unknown-pointer record.
    fn classify_absolute(
        &self,
        addr: u64,
        size: u32,
        precise: bool,
        access: AccessKind,
        instr: &Instruction,
        env: &TransferEnv,
    ) -> AddressInfo {
        let symtab = &env.program.symtab;
        let var = symtab.variable_at(addr);
        let section = symtab.section_at(addr);
        let segment = match (var, section) {
            (Some(v), _) => v.section.clone(),
            (None, Some(s)) => s.name.clone(),
            (None, None) => return AddressInfo::unknown_pointer(access, instr, env.program),
        };
        let ranges = if precise {
            vec![(addr, size)]
        } else if let Some(v) = var {
            vec![(v.address, v.size)]
        } else {
            let s = section.unwrap();
            vec![(s.base, s.size.min(u32::MAX as u64) as u32)]
        };
        AddressInfo {
            access,
            precise,
            segment,
            var_name: var.map(|v| v.name.clone()),
            ranges,
        }
    }
}

//! The architecture/core boundary: everything the flow engine needs to
//! know about a target is behind [`ArchitectureModel`], threaded through
//! the analysis explicitly as `&dyn ArchitectureModel`.

use crate::machine_state::MachineState;
use crate::program::{ArchKind, Instruction, Program};
use crate::symval::AbstractValue;

/// High-level dispatch class of an instruction, as seen by the transfer
/// function layer. Architectures map mnemonics into this closed set;
/// anything they cannot model maps to one of the kill variants rather than
/// erroring.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstructionCategory {
    /// `d = a + b`, plain abstract addition.
    Add,
    /// `d = a + b` where an opaque operand does not poison a known one;
    /// used for register-indexed (array-style) address computation.
    AddAugmenting,
    /// `d = a - b`.
    Sub,
    /// `d = a * b`.
    Mul,
    /// `d = a`, precision copied.
    Move,
    /// `d = constant`, always precise.
    LoadConstant(i64),
    /// Bitwise NOT; constants only.
    Complement,
    /// Memory read into `d`.
    Load,
    /// Memory write of a source register.
    Store,
    /// Call; the return-value registers are treated as clobbered on the
    /// caller's post-call path.
    Call,
    /// No effect on the abstract state.
    Nop,
    /// Unmodelled: every output register degrades to unknown.
    Kill,
}

/// Read-only context a transfer function may consult: the literal pool and
/// symbol table live on the program.
pub struct TransferEnv<'a> {
    pub program: &'a Program,
}

/// Target description plus decoded-operand semantics for one architecture.
///
/// The register file is addressed by dense indexes `0..register_count()`.
/// One index is the architecture-private auxiliary register, used only
/// inside a single instruction's decomposition and excluded from state
/// comparison and joins.
pub trait ArchitectureModel {
    fn kind(&self) -> ArchKind;

    /// Number of modeled registers, including the auxiliary register.
    fn register_count(&self) -> usize;

    /// Bytes per machine word (stack slot granularity).
    fn word_size(&self) -> u32;

    /// Dense index for an assembler register name, accepting the spellings
    /// the upstream decoder emits.
    fn register_index(&self, name: &str) -> Option<usize>;

    /// Assembler name for a register index, for diagnostics.
    fn register_name(&self, idx: usize) -> &'static str;

    fn stack_pointer(&self) -> usize;

    /// The scratch register excluded from joins and equality.
    fn aux_register(&self) -> usize;

    /// The hardwired zero register, if the architecture has one.
    fn zero_register(&self) -> Option<usize> {
        None
    }

    /// The global-pointer register, if the architecture reserves one. It
    /// is seeded from the symbol table at function entry.
    fn global_pointer_register(&self) -> Option<usize> {
        None
    }

    /// Registers clobbered by a call on the caller's side.
    fn return_value_registers(&self) -> &'static [usize];

    /// Registers imported caller-to-callee at first context entry.
    fn argument_registers(&self) -> &'static [usize];

    /// Apply one instruction to the abstract state. Never fails:
    /// unmodelled instructions kill their outputs.
    fn transfer(&self, instr: &Instruction, state: &mut MachineState, env: &TransferEnv);

    /// The symbolic effective address of a load/store, evaluated against
    /// the *pre-instruction* state. Panics (defect tier) if the
    /// instruction claims to be a memory access but no addressing pattern
    /// matches.
    fn effective_address(
        &self,
        instr: &Instruction,
        state: &MachineState,
        env: &TransferEnv,
    ) -> AbstractValue;

    /// If `instr` is an unpredicated PC-base load, the address of the
    /// `.word` literal it reads; classification resolves it against the
    /// literal pool. Predicated instructions always return `None`.
    fn pc_relative_literal(&self, instr: &Instruction) -> Option<u64> {
        let _ = instr;
        None
    }

    /// Bytes this instruction allocates in the stack frame, if it is a
    /// prologue-style allocation (`sub sp, sp, #N` / `addiu sp, sp, -N`).
    fn frame_allocation(&self, instr: &Instruction) -> Option<i64>;

    /// The constant sp-relative byte offset this instruction dereferences,
    /// if its memory operand is sp-based with an immediate offset.
    fn sp_relative_offset(&self, instr: &Instruction) -> Option<i64>;
}

/// Instantiate the model for an exported program's architecture.
pub fn arch_for(kind: ArchKind) -> Box<dyn ArchitectureModel> {
    match kind {
        ArchKind::Arm => Box::new(crate::arm::Arm),
        ArchKind::Mips => Box::new(crate::mips::Mips),
    }
}

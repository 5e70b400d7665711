//! The analysis's output unit: one [`AddressInfo`] per memory instruction
//! per call context, describing which memory the access can touch.

use crate::log::*;
use crate::program::{Instruction, Program};

/// Direction of a memory access.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessKind {
    Read,
    Write,
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AccessKind::Read => write!(f, "read"),
            AccessKind::Write => write!(f, "write"),
        }
    }
}

/// Resolved address information attached to one load/store in one call
/// context. Created once and never mutated afterward.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AddressInfo {
    pub access: AccessKind,
    /// `true` iff the ranges describe the runtime access exactly.
    pub precise: bool,
    /// `"stack"`, `"code"`, a section name, or `"all"` for the
    /// unknown-pointer fallback.
    pub segment: String,
    /// Symbol-table variable the access falls into, when one is known.
    pub var_name: Option<String>,
    /// Candidate `(base address, byte size)` ranges the access may touch.
    pub ranges: Vec<(u64, u32)>,
}

impl AddressInfo {
    /// The conservative fallback for an entirely opaque pointer: the whole
    /// range from the start of the code segment up to the initial stack
    /// pointer. Downstream timing analysis relies on this record being
    /// present, so it is logged but never dropped.
    pub fn unknown_pointer(access: AccessKind, instr: &Instruction, program: &Program) -> Self {
        let code_start = program
            .symtab
            .code_section()
            .map(|s| s.base)
            .unwrap_or(0);
        let extent = program
            .initial_stack_pointer
            .saturating_sub(code_start)
            .min(u32::MAX as u64) as u32;
        if crate::analysis_config::CONFIG.warn_on_unknown_pointer {
            warn!(
                "Unknown pointer, conservatively classifying as whole address range";
                "instr" => %instr,
                "range_base" => code_start,
                "range_size" => extent,
            );
        }
        Self {
            access,
            precise: false,
            segment: "all".to_string(),
            var_name: None,
            ranges: vec![(code_start, extent)],
        }
    }
}

impl std::fmt::Display for AddressInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} [{}]",
            self.access,
            self.segment,
            if self.precise { "exact" } else { "approx" }
        )?;
        if let Some(v) = &self.var_name {
            write!(f, " {}", v)?;
        }
        for (base, size) in &self.ranges {
            write!(f, " {:#x}+{}", base, size)?;
        }
        Ok(())
    }
}

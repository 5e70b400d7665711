//! The pre-decoded program representation consumed from the CFG
//! construction layer.
//!
//! Everything in here arrives ready-made from the upstream objdump/ELF
//! decoder: control-flow graphs with backedge-marked successor lists,
//! instruction records with their resource sets and load/store/call
//! classification, the symbol table, and the ARM literal pool. This crate
//! never parses raw disassembly text beyond the operand fields of these
//! records.

use crate::containers::unordered::{UnorderedMap, UnorderedSet};

/// Which architecture the program was decoded for.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ArchKind {
    Arm,
    Mips,
}

/// Upstream classification of an instruction record.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct InstrClass {
    pub is_load: bool,
    pub is_store: bool,
    pub is_call: bool,
    pub is_return: bool,
    pub is_jump: bool,
}

/// One decoded instruction, as exported by the CFG layer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Instruction {
    /// Machine address of the instruction.
    pub address: u64,
    /// Mnemonic, including any condition suffix the assembler printed.
    pub mnemonic: String,
    /// Ordered operand list, split at top-level commas (bracketed memory
    /// operands stay whole).
    pub operands: Vec<String>,
    /// Register names this instruction reads (`getResourceInputs` upstream).
    pub inputs: Vec<String>,
    /// Register names this instruction writes (`getResourceOutputs`
    /// upstream).
    pub outputs: Vec<String>,
    pub class: InstrClass,
    /// Byte size of the memory access, present iff the instruction is a
    /// load or store.
    pub access_size: Option<u32>,
    /// Whether the instruction only executes under a condition code.
    pub predicated: bool,
}

impl Instruction {
    /// The assembler-style text of the instruction, for diagnostics.
    pub fn text(&self) -> String {
        if self.operands.is_empty() {
            self.mnemonic.clone()
        } else {
            format!("{} {}", self.mnemonic, self.operands.join(", "))
        }
    }

    /// Whether the register named `reg` is in the instruction's input set.
    pub fn reads(&self, reg: &str) -> bool {
        self.inputs.iter().any(|r| r.as_str() == reg)
    }

    /// Whether the register named `reg` is in the instruction's output set.
    pub fn writes(&self, reg: &str) -> bool {
        self.outputs.iter().any(|r| r.as_str() == reg)
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:#x}: {}", self.address, self.text())
    }
}

/// Split an operand string at top-level commas, keeping `[...]` and
/// `(...)` groups intact. `"r0, [sp, #4]"` becomes `["r0", "[sp, #4]"]`.
pub fn split_operands(s: &str) -> Vec<String> {
    let mut out = vec![];
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in s.chars() {
        match c {
            '[' | '(' | '{' => {
                depth += 1;
                cur.push(c);
            }
            ']' | ')' | '}' => {
                depth = depth.saturating_sub(1);
                cur.push(c);
            }
            ',' if depth == 0 => {
                out.push(cur.trim().to_string());
                cur.clear();
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        out.push(cur.trim().to_string());
    }
    out
}

/// One basic block of a function's control-flow graph. Blocks are the
/// fixpoint engine's unit of propagation.
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub instructions: Vec<Instruction>,
    /// Intraprocedural successors, as block indexes within the same Cfg.
    pub successors: Vec<usize>,
    /// Subset of `successors` reached through a backedge. Identified by the
    /// upstream loop reconstruction; excluded from the first fixpoint
    /// phase.
    pub backedges: UnorderedSet<usize>,
    /// Entry address of the called function, if the block ends in a call.
    pub call_target: Option<u64>,
    pub is_entry: bool,
    pub is_exit: bool,
}

impl BasicBlock {
    /// Index of the first call-classified instruction, if any.
    pub fn call_instruction_index(&self) -> Option<usize> {
        self.instructions.iter().position(|i| i.class.is_call)
    }
}

/// Control-flow graph of one function.
#[derive(Clone, Debug)]
pub struct Cfg {
    pub name: String,
    pub entry_address: u64,
    pub blocks: Vec<BasicBlock>,
    /// Block index of the unique entry block.
    pub entry: usize,
    /// Block index of the unique exit block.
    pub exit: usize,
    /// Intraprocedural predecessors, per block; derived from `successors`
    /// when the function is finished.
    predecessors: Vec<Vec<usize>>,
}

impl Cfg {
    /// Intraprocedural predecessor blocks of `block`.
    pub fn predecessors(&self, block: usize) -> &[usize] {
        &self.predecessors[block]
    }

    /// Block indexes of all blocks carrying a call.
    pub fn call_blocks(&self) -> impl Iterator<Item = usize> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.call_target.is_some())
            .map(|(i, _)| i)
    }

    /// Whether the function contains any call at all.
    pub fn has_calls(&self) -> bool {
        self.call_blocks().next().is_some()
    }
}

/// A section of the binary, from the symbol table.
#[derive(Clone, Debug)]
pub struct Section {
    pub name: String,
    pub base: u64,
    pub size: u64,
}

impl Section {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }
}

/// A named variable from the symbol table.
#[derive(Clone, Debug)]
pub struct VariableSym {
    pub name: String,
    pub address: u64,
    pub size: u32,
    /// Name of the owning section.
    pub section: String,
}

impl VariableSym {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.address && addr < self.address + self.size as u64
    }
}

/// Symbol-table excerpt exported alongside the CFGs.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    pub sections: Vec<Section>,
    pub variables: Vec<VariableSym>,
    /// MIPS `$gp` value, if the binary defines one.
    pub global_pointer: Option<u64>,
}

impl SymbolTable {
    /// The section `addr` falls into, if any.
    pub fn section_at(&self, addr: u64) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(addr))
    }

    /// The variable `addr` falls into, if any.
    pub fn variable_at(&self, addr: u64) -> Option<&VariableSym> {
        self.variables.iter().find(|v| v.contains(addr))
    }

    /// The code section (`.text`); the unknown-pointer fallback range
    /// starts here.
    pub fn code_section(&self) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == ".text")
    }
}

/// What a `.word` literal in the ARM literal pool denotes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LiteralKind {
    /// A plain immediate.
    Imm,
    /// An address into the named section.
    Section(String),
}

/// One pre-resolved `.word` entry physically embedded in the code section.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Literal {
    pub kind: LiteralKind,
    pub value: u64,
}

/// The whole exported program: one [`Cfg`] per function plus the tables
/// the address analysis resolves against.
#[derive(Debug)]
pub struct Program {
    pub arch: ArchKind,
    pub name: String,
    pub cfgs: Vec<Cfg>,
    /// Index of the program entry function.
    pub entry_cfg: usize,
    pub symtab: SymbolTable,
    /// ARM literal pool: address of the `.word` to its resolved content.
    pub literals: UnorderedMap<u64, Literal>,
    /// Configured stack-pointer value at program entry; also the top end of
    /// the unknown-pointer fallback range.
    pub initial_stack_pointer: u64,
    cfg_by_address: UnorderedMap<u64, usize>,
    building: Option<CfgBuilder>,
}

#[derive(Debug)]
struct CfgBuilder {
    name: String,
    entry_address: u64,
    blocks: Vec<BasicBlock>,
}

impl Program {
    pub fn new(arch: ArchKind, name: impl Into<String>, initial_stack_pointer: u64) -> Self {
        Self {
            arch,
            name: name.into(),
            cfgs: vec![],
            entry_cfg: 0,
            symtab: SymbolTable::default(),
            literals: UnorderedMap::new(),
            initial_stack_pointer,
            cfg_by_address: UnorderedMap::new(),
            building: None,
        }
    }

    /// Begin a new function. Blocks are added with [`Self::add_block`] and
    /// the function is sealed with [`Self::end_function`].
    pub fn begin_function(&mut self, name: impl Into<String>, entry_address: u64) {
        assert!(
            self.building.is_none(),
            "begin_function while another function is still open"
        );
        self.building = Some(CfgBuilder {
            name: name.into(),
            entry_address,
            blocks: vec![],
        });
    }

    /// Add a block to the function currently being built, returning its
    /// index.
    pub fn add_block(&mut self, block: BasicBlock) -> usize {
        let b = self
            .building
            .as_mut()
            .expect("add_block outside begin_function/end_function");
        b.blocks.push(block);
        b.blocks.len() - 1
    }

    /// Seal the function currently being built: validates the block graph
    /// and computes predecessor lists.
    pub fn end_function(&mut self) {
        let b = self
            .building
            .take()
            .expect("end_function without begin_function");
        let entries: Vec<usize> = b
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, blk)| blk.is_entry)
            .map(|(i, _)| i)
            .collect();
        let exits: Vec<usize> = b
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, blk)| blk.is_exit)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(
            entries.len(),
            1,
            "Function `{}` must have exactly one entry block, found {:?}",
            b.name,
            entries
        );
        assert_eq!(
            exits.len(),
            1,
            "Function `{}` must have exactly one exit block, found {:?}",
            b.name,
            exits
        );

        let mut predecessors = vec![vec![]; b.blocks.len()];
        for (i, blk) in b.blocks.iter().enumerate() {
            for &s in &blk.successors {
                assert!(
                    s < b.blocks.len(),
                    "Function `{}`: block {} has out-of-range successor {}",
                    b.name,
                    i,
                    s
                );
                predecessors[s].push(i);
            }
            for &s in blk.backedges.iter() {
                assert!(
                    blk.successors.contains(&s),
                    "Function `{}`: block {} marks {} as backedge but not successor",
                    b.name,
                    i,
                    s
                );
            }
        }

        let idx = self.cfgs.len();
        self.cfg_by_address.insert(b.entry_address, idx);
        self.cfgs.push(Cfg {
            name: b.name,
            entry_address: b.entry_address,
            entry: entries[0],
            exit: exits[0],
            blocks: b.blocks,
            predecessors,
        });
    }

    /// Mark the function at `entry_address` as the program entry.
    pub fn set_entry(&mut self, entry_address: u64) {
        self.entry_cfg = *self
            .cfg_by_address
            .get(&entry_address)
            .unwrap_or_else(|| panic!("No function with entry address {:#x}", entry_address));
    }

    /// Resolve a call-target address into a Cfg index.
    pub fn cfg_at(&self, entry_address: u64) -> Option<usize> {
        self.cfg_by_address.get(&entry_address).copied()
    }

    /// The callee Cfg of `block` in `cfg`, if the block carries a call and
    /// the target is a known function.
    pub fn callee_of(&self, cfg: usize, block: usize) -> Option<usize> {
        self.cfgs[cfg].blocks[block]
            .call_target
            .and_then(|addr| self.cfg_at(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_splitting_respects_brackets() {
        assert_eq!(
            split_operands("r0, [sp, #4]"),
            vec!["r0".to_string(), "[sp, #4]".to_string()]
        );
        assert_eq!(
            split_operands("r0, [r1], #4"),
            vec!["r0".to_string(), "[r1]".to_string(), "#4".to_string()]
        );
        assert_eq!(
            split_operands("v0,16(sp)"),
            vec!["v0".to_string(), "16(sp)".to_string()]
        );
        assert_eq!(split_operands("nop"), vec!["nop".to_string()]);
    }

    #[test]
    #[should_panic(expected = "exactly one entry block")]
    fn function_without_entry_is_rejected() {
        let mut prog = Program::new(ArchKind::Arm, "t", 0x1000);
        prog.begin_function("f", 0x8000);
        prog.add_block(BasicBlock {
            is_exit: true,
            ..Default::default()
        });
        prog.end_function();
    }
}

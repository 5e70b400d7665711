//! Static stack-frame layout, computed once before the address fixpoint.
//!
//! For every function this derives the frame size from the prologue, the
//! caller-visible frame extent from sp-relative accesses, and a concrete
//! stack-pointer value per call context. The results are written once here
//! and read-only during the fixpoint; that ordering is a hard dependency,
//! not a convenience.

use crate::arch::ArchitectureModel;
use crate::containers::unordered::UnorderedMap;
use crate::context::{ContextId, ContextTree};
use crate::log::*;
use crate::program::Program;

/// Frame layout of one function.
#[derive(Clone, Debug, Default)]
pub struct StackInfo {
    /// Bytes the prologue subtracts from sp. Zero for frameless leaves.
    pub frame_size: i64,
    /// Frame extent including the caller-visible area: the largest
    /// sp-relative offset (plus access size) the function ever dereferences,
    /// but never less than `frame_size`.
    pub frame_size_with_caller: i64,
    /// Concrete stack-pointer value per activating context, keyed by the
    /// context's path id.
    pub sp_by_context: UnorderedMap<String, u64>,
}

/// Per-Cfg [`StackInfo`], plus the context-to-sp bindings derived top-down
/// over the context tree.
#[derive(Debug)]
pub struct StackFrameAnalysis {
    infos: Vec<StackInfo>,
}

impl StackFrameAnalysis {
    pub fn run(program: &Program, tree: &ContextTree, arch: &dyn ArchitectureModel) -> Self {
        let infos = (0..program.cfgs.len())
            .map(|i| {
                // A function no context activates is dead code dragged in
                // by the export; its frame is irrelevant and its
                // discipline unchecked.
                if tree.contexts_of_cfg(i).is_empty() {
                    warn!(
                        "Function is unreachable from the entry; skipping frame analysis";
                        "function" => &program.cfgs[i].name,
                    );
                    StackInfo::default()
                } else {
                    Self::analyze_cfg(program, arch, i)
                }
            })
            .collect();
        let mut analysis = Self { infos };
        analysis.bind_context_stack_pointers(program, tree);
        analysis
    }

    /// Layout of `cfg`'s frame.
    pub fn info(&self, cfg: usize) -> &StackInfo {
        &self.infos[cfg]
    }

    /// Concrete stack pointer of `ctx`. A context without a binding is a
    /// defect: every context reachable from the entry gets one during
    /// [`Self::run`].
    pub fn sp_of_context(&self, program: &Program, tree: &ContextTree, ctx: ContextId) -> u64 {
        let cfg = tree.context(ctx).cfg;
        let path = tree.path_id(program, ctx);
        *self.infos[cfg]
            .sp_by_context
            .get(&path)
            .unwrap_or_else(|| panic!("Context `{}` has no stack-pointer binding", path))
    }

    fn analyze_cfg(program: &Program, arch: &dyn ArchitectureModel, cfg_idx: usize) -> StackInfo {
        let cfg = &program.cfgs[cfg_idx];
        let sp_name = arch.register_name(arch.stack_pointer());

        // The prologue may split the allocation over several instructions
        // (explicit stores rewritten from push, then the sub); accumulate
        // over the entry block.
        let frame_size: i64 = cfg.blocks[cfg.entry]
            .instructions
            .iter()
            .filter_map(|i| arch.frame_allocation(i))
            .sum();

        assert!(
            frame_size > 0 || !cfg.has_calls(),
            "Function `{}` makes calls but allocates no stack frame",
            cfg.name,
        );

        // Writing sp anywhere but the entry or exit block breaks the frame
        // model every context-sp binding is built on.
        for (b, block) in cfg.blocks.iter().enumerate() {
            if b == cfg.entry || b == cfg.exit {
                continue;
            }
            for instr in &block.instructions {
                assert!(
                    !instr.writes(sp_name),
                    "Function `{}`: `{}` writes the stack pointer outside the entry/exit blocks",
                    cfg.name,
                    instr,
                );
            }
        }

        let mut extent = frame_size;
        for block in &cfg.blocks {
            for instr in &block.instructions {
                if let Some(off) = arch.sp_relative_offset(instr) {
                    let size = instr.access_size.unwrap_or(arch.word_size()) as i64;
                    extent = extent.max(off + size);
                }
            }
        }

        debug!(
            "Stack frame";
            "function" => &cfg.name,
            "frame_size" => frame_size,
            "frame_size_with_caller" => extent,
        );
        StackInfo {
            frame_size,
            frame_size_with_caller: extent,
            sp_by_context: UnorderedMap::new(),
        }
    }

    /// Derive `sp(context) = sp(parent) - frame_size` top-down, seeded with
    /// the configured initial stack pointer at the program entry context.
    /// Context ids are assigned parent-first, so a single forward pass
    /// suffices.
    fn bind_context_stack_pointers(&mut self, program: &Program, tree: &ContextTree) {
        for (id, ctx) in tree.iter() {
            let parent_sp = match ctx.parent {
                Some(p) => {
                    let parent_cfg = tree.context(p).cfg;
                    let parent_path = tree.path_id(program, p);
                    *self.infos[parent_cfg]
                        .sp_by_context
                        .get(&parent_path)
                        .unwrap_or_else(|| {
                            panic!("Context `{}` has no stack-pointer binding", parent_path)
                        })
                }
                None => program.initial_stack_pointer,
            };
            let frame = self.infos[ctx.cfg].frame_size;
            let sp = parent_sp.checked_sub(frame as u64).unwrap_or_else(|| {
                panic!(
                    "Stack exhausted binding context `{}`",
                    tree.path_id(program, id)
                )
            });
            let path = tree.path_id(program, id);
            self.infos[ctx.cfg].sp_by_context.insert(path, sp);
        }
    }
}

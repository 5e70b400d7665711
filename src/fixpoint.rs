//! The address-flow fixpoint engine.
//!
//! Drives the abstract machine state through every (context, block) pair in
//! two phases: a backedge-free topological initialization pass, then a
//! general worklist fixpoint. A final linear scan classifies every memory
//! access against its stabilized in-state.

use crate::address_info::AddressInfo;
use crate::arch::{ArchitectureModel, TransferEnv};
use crate::containers::unordered::{UnorderedMap, UnorderedSet};
use crate::context::{ContextId, ContextTree, ContextualNode};
use crate::log::*;
use crate::machine_state::MachineState;
use crate::program::Program;
use crate::stack_frame::StackFrameAnalysis;
use std::collections::VecDeque;

/// Initialization state of one contextual node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum NodePhase {
    Uninitialized,
    InFlight,
    Stable,
}

/// Key of one classified memory access: the instruction's position plus
/// the context it was analyzed under.
#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct AccessKey {
    pub context: ContextId,
    pub block: usize,
    pub instr: usize,
}

/// Everything the analysis hands to the downstream timing analysis: one
/// [`AddressInfo`] per (memory instruction, context), plus the stabilized
/// in-states for inspection.
#[derive(Debug)]
pub struct AddressFlowResults {
    infos: UnorderedMap<AccessKey, AddressInfo>,
    ins: UnorderedMap<ContextualNode, MachineState>,
}

impl AddressFlowResults {
    pub fn info(&self, key: &AccessKey) -> Option<&AddressInfo> {
        self.infos.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccessKey, &AddressInfo)> {
        self.infos.iter()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Stabilized in-state of a contextual node, if the node was reached.
    pub fn in_state(&self, node: ContextualNode) -> Option<&MachineState> {
        self.ins.get(&node)
    }

    /// Human-readable report, one line per classified access, grouped by
    /// function and context.
    pub fn write_report(
        &self,
        program: &Program,
        tree: &ContextTree,
        w: &mut impl std::io::Write,
    ) -> std::io::Result<()> {
        for (ctx_id, ctx) in tree.iter() {
            let cfg = &program.cfgs[ctx.cfg];
            let mut keys: Vec<&AccessKey> = self
                .infos
                .keys()
                .filter(|k| k.context == ctx_id)
                .collect();
            keys.sort();
            if keys.is_empty() {
                continue;
            }
            writeln!(
                w,
                "== {} [context {}]",
                cfg.name,
                tree.path_id(program, ctx_id)
            )?;
            for key in keys {
                let instr = &cfg.blocks[key.block].instructions[key.instr];
                let info = self.infos.get(key).unwrap();
                writeln!(w, "  {:#x} {}: {}", instr.address, instr, info)?;
            }
        }
        Ok(())
    }
}

/// The engine itself. Construct-and-run via [`AddressFlow::analyze`].
pub struct AddressFlow<'a> {
    program: &'a Program,
    arch: &'a dyn ArchitectureModel,
    tree: &'a ContextTree,
    frames: &'a StackFrameAnalysis,
    ins: UnorderedMap<ContextualNode, MachineState>,
    outs: UnorderedMap<ContextualNode, MachineState>,
    phases: UnorderedMap<ContextualNode, NodePhase>,
}

impl<'a> AddressFlow<'a> {
    /// Run the full analysis. The stack frame analysis must already have
    /// run; its per-context stack pointers are read-only here.
    pub fn analyze(
        program: &'a Program,
        arch: &'a dyn ArchitectureModel,
        tree: &'a ContextTree,
        frames: &'a StackFrameAnalysis,
    ) -> AddressFlowResults {
        let mut engine = AddressFlow {
            program,
            arch,
            tree,
            frames,
            ins: UnorderedMap::new(),
            outs: UnorderedMap::new(),
            phases: UnorderedMap::new(),
        };
        let nodes = engine.all_nodes();
        for &n in &nodes {
            engine.phases.insert(n, NodePhase::Uninitialized);
        }

        let order = engine.backedge_free_order(&nodes);
        engine.initialization_pass(&order);
        engine.worklist_fixpoint(&nodes, &order);
        for &n in &nodes {
            if engine.phases.get(&n) == Some(&NodePhase::InFlight) {
                engine.phases.insert(n, NodePhase::Stable);
            }
        }
        engine.classification_scan(&nodes)
    }

    fn all_nodes(&self) -> Vec<ContextualNode> {
        let mut nodes = vec![];
        for (ctx_id, ctx) in self.tree.iter() {
            for block in 0..self.program.cfgs[ctx.cfg].blocks.len() {
                nodes.push(ContextualNode {
                    context: ctx_id,
                    block,
                });
            }
        }
        nodes
    }

    /// Number of stack slots modeled for `cfg`:
    /// `frame_size_with_caller / word_size + 1`.
    fn stack_slots(&self, cfg: usize) -> usize {
        let info = self.frames.info(cfg);
        (info.frame_size_with_caller / self.arch.word_size() as i64) as usize + 1
    }

    /// Kahn topological order over the contextual edges, excluding marked
    /// backedges. Any nodes left over sit on an unmarked cycle; they stay
    /// uninitialized through phase one and are warned about.
    fn backedge_free_order(&self, nodes: &[ContextualNode]) -> Vec<ContextualNode> {
        let mut indegree: UnorderedMap<ContextualNode, usize> = UnorderedMap::new();
        for &n in nodes {
            let d = self
                .tree
                .contextual_predecessors(self.program, n)
                .into_iter()
                .filter(|&p| !self.tree.is_backedge(self.program, p, n))
                .count();
            indegree.insert(n, d);
        }

        let mut queue: VecDeque<ContextualNode> = nodes
            .iter()
            .copied()
            .filter(|n| indegree.get(n) == Some(&0))
            .collect();
        let mut order = vec![];
        while let Some(n) = queue.pop_front() {
            order.push(n);
            for s in self.tree.contextual_successors(self.program, n) {
                if self.tree.is_backedge(self.program, n, s) {
                    continue;
                }
                let d = indegree.get_mut(&s).unwrap();
                *d -= 1;
                if *d == 0 {
                    queue.push_back(s);
                }
            }
        }
        if order.len() < nodes.len() {
            warn!(
                "Control flow contains cycles not marked as backedges";
                "unordered_nodes" => nodes.len() - order.len(),
            );
        }
        order
    }

    /// Phase one: visit every node once in backedge-free topological order,
    /// propagating `out = simulate(in)` forward.
    fn initialization_pass(&mut self, order: &[ContextualNode]) {
        for &n in order {
            if let Some(in_state) = self.joined_in(n) {
                let out = self.simulate_block(n, &in_state);
                self.ins.insert(n, in_state);
                self.outs.insert(n, out);
                self.phases.insert(n, NodePhase::InFlight);
            }
        }
    }

    /// Phase two: general worklist fixpoint. Every node is seeded so that
    /// backedge-fed nodes recompute at least once; a node re-enters the
    /// list whenever a predecessor's out-state changes.
    fn worklist_fixpoint(&mut self, nodes: &[ContextualNode], order: &[ContextualNode]) {
        let mut worklist: VecDeque<ContextualNode> = order.iter().cloned().collect();
        let ordered: UnorderedSet<ContextualNode> = order.iter().cloned().collect();
        for &n in nodes {
            if !ordered.contains(&n) {
                worklist.push_back(n);
            }
        }

        let cap =
            crate::analysis_config::CONFIG.max_fixpoint_pass_multiplier * nodes.len().max(1);
        let mut pops = 0usize;
        while let Some(n) = worklist.pop_front() {
            pops += 1;
            assert!(
                pops <= cap,
                "Fixpoint did not converge within {} visits; the join is not monotone",
                cap
            );

            let in_state = match self.joined_in(n) {
                Some(s) => s,
                // No initialized predecessor yet; a later change will
                // re-enqueue this node.
                None => continue,
            };
            let out = self.simulate_block(n, &in_state);
            let in_changed = match self.ins.get(&n) {
                Some(old) => !old.same_as(&in_state, self.arch),
                None => true,
            };
            self.ins.insert(n, in_state);
            let out_changed = match self.outs.get(&n) {
                Some(old) => !old.same_as(&out, self.arch),
                None => true,
            };
            self.outs.insert(n, out);
            self.phases.insert(n, NodePhase::InFlight);

            // The callee entry's argument import reads this node's
            // *in*-state when the block carries a resolved call, so the
            // entry must recompute even when the call kill leaves the
            // out-state unchanged.
            let callee = self.tree.callee_context(n.context, n.block);
            if out_changed || (in_changed && callee.is_some()) {
                for s in self.tree.contextual_successors(self.program, n) {
                    worklist.push_back(s);
                }
            }
            // The return-edge translation reads this call's out-state for
            // caller slots beyond the callee's modeled extent; the
            // post-call blocks depend on it without an edge from it.
            if out_changed && callee.is_some() {
                let cfg = self.tree.context(n.context).cfg;
                for &s in &self.program.cfgs[cfg].blocks[n.block].successors {
                    worklist.push_back(ContextualNode {
                        context: n.context,
                        block: s,
                    });
                }
            }
        }
    }

    /// Join of everything flowing into `n`: the caller-argument import at a
    /// function entry, return-edge translations from callee exits, and
    /// plain predecessor out-states within the context.
    fn joined_in(&self, n: ContextualNode) -> Option<MachineState> {
        let ctx = self.tree.context(n.context);
        let cfg = &self.program.cfgs[ctx.cfg];
        let mut contributions = vec![];

        if n.block == cfg.entry {
            if let Some(s) = self.entry_import(n.context) {
                contributions.push(s);
            }
        }

        for p in self.tree.contextual_predecessors(self.program, n) {
            // The activating call edge is covered by the entry import.
            if p.context != n.context && self.tree.is_ancestor_of(p.context, n.context) {
                continue;
            }
            if let Some(s) = self.flow_from(p, n) {
                contributions.push(s);
            }
        }

        let mut contributions = contributions.into_iter();
        let mut acc = contributions.next()?;
        for s in contributions {
            acc.join(&s, self.arch);
        }
        if crate::analysis_config::CONFIG.debug_print_states_at_join {
            debug!("Joined in-state"; "node" => ?n, "state" => ?acc);
        }
        Some(acc)
    }

    /// The in-state of a function entry: a fresh frame-local state with the
    /// architecture's argument registers imported from the caller,
    /// simulated up to (but excluding) the call instruction. This is the
    /// one intentional cross-context information flow.
    fn entry_import(&self, ctx_id: ContextId) -> Option<MachineState> {
        let ctx = self.tree.context(ctx_id);
        let env = TransferEnv {
            program: self.program,
        };
        let slots = self.stack_slots(ctx.cfg);
        let mut fresh = MachineState::at_function_entry(self.arch, slots, &env);

        let (parent, call_block) = match (ctx.parent, ctx.call_block) {
            (Some(p), Some(b)) => (p, b),
            // Program entry: nothing to import.
            _ => return Some(fresh),
        };
        let call_node = ContextualNode {
            context: parent,
            block: call_block,
        };
        let caller_in = self.ins.get(&call_node)?;
        let caller_cfg = &self.program.cfgs[self.tree.context(parent).cfg];
        let caller_block = &caller_cfg.blocks[call_block];
        let upto = caller_block
            .call_instruction_index()
            .unwrap_or(caller_block.instructions.len());

        let mut at_call = caller_in.clone();
        for instr in &caller_block.instructions[..upto] {
            at_call.simulate(self.arch, instr, &env);
        }
        fresh.copy_registers_from(&at_call, self.arch.argument_registers());
        Some(fresh)
    }

    /// State flowing along one contextual edge into `n`. A return edge
    /// rebinds the stack pointer to the caller's frame and translates the
    /// callee's stack slots back into the caller's layout.
    fn flow_from(&self, p: ContextualNode, n: ContextualNode) -> Option<MachineState> {
        let out = self.outs.get(&p)?;
        if p.context == n.context {
            return Some(out.clone());
        }

        // Return edge: p is the callee's exit under a child context.
        let callee_ctx = self.tree.context(p.context);
        debug_assert_eq!(callee_ctx.parent, Some(n.context));
        let callee_frame = self.frames.info(callee_ctx.cfg);
        let word = self.arch.word_size() as i64;
        let shift = (callee_frame.frame_size / word) as usize;

        let caller_cfg = self.tree.context(n.context).cfg;
        let mut s = MachineState::new(self.arch, self.stack_slots(caller_cfg));
        s.regs = out.regs.clone();
        s.reset_stack_pointer(self.arch);

        // Caller slot j sits at callee offset frame_size + j * word. Slots
        // beyond the callee's modeled extent were untouchable by the callee
        // and keep the caller's value from just after the call.
        let call_node = ContextualNode {
            context: n.context,
            block: callee_ctx.call_block.unwrap(),
        };
        let caller_out = self.outs.get(&call_node);
        for j in 0..s.stack.slot_count() {
            let v = match out.stack.get(shift + j) {
                Some(v) => v,
                None => match caller_out.and_then(|c| c.stack.get(j)) {
                    Some(v) => v,
                    None => continue,
                },
            };
            s.stack.set(j, v);
        }
        Some(s)
    }

    fn simulate_block(&self, n: ContextualNode, in_state: &MachineState) -> MachineState {
        let ctx = self.tree.context(n.context);
        let env = TransferEnv {
            program: self.program,
        };
        let mut state = in_state.clone();
        for instr in &self.program.cfgs[ctx.cfg].blocks[n.block].instructions {
            state.simulate(self.arch, instr, &env);
        }
        state
    }

    /// Phase three: one linear scan, no further fixpoint. Every memory
    /// instruction is classified against the stabilized in-state just
    /// before its own simulation.
    fn classification_scan(self, nodes: &[ContextualNode]) -> AddressFlowResults {
        let env = TransferEnv {
            program: self.program,
        };
        let mut infos = UnorderedMap::new();
        for &n in nodes {
            if self.phases.get(&n) != Some(&NodePhase::Stable) {
                warn!(
                    "Contextual node never stabilized; its accesses are unclassified";
                    "node" => ?n,
                );
                continue;
            }
            // Stable nodes always carry an in-state.
            let in_state = self.ins.get(&n).unwrap();
            let ctx = self.tree.context(n.context);
            let stack_base = self.frames.sp_of_context(self.program, self.tree, n.context);
            let stack_extent =
                (self.stack_slots(ctx.cfg) as u32) * self.arch.word_size();

            let mut state = in_state.clone();
            let instructions = &self.program.cfgs[ctx.cfg].blocks[n.block].instructions;
            for (i, instr) in instructions.iter().enumerate() {
                if instr.class.is_load || instr.class.is_store {
                    let info =
                        state.access_classify(self.arch, instr, &env, stack_base, stack_extent);
                    infos.insert(
                        AccessKey {
                            context: n.context,
                            block: n.block,
                            instr: i,
                        },
                        info,
                    );
                }
                state.simulate(self.arch, instr, &env);
            }
        }
        debug!("Address classification complete"; "accesses" => infos.len());
        AddressFlowResults {
            infos,
            ins: self.ins,
        }
    }
}

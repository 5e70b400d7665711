//! The call-context model.
//!
//! Every distinct call path gets its own [`Context`], so a function called
//! from two places is analyzed twice with independent states. Contexts form
//! a tree rooted at the program entry; calls and returns become edges
//! between a caller node and the callee's entry/exit nodes under the child
//! context.

use crate::containers::unordered::UnorderedMap;
use crate::log::*;
use crate::program::Program;

/// Index of a [`Context`] within its [`ContextTree`].
pub type ContextId = usize;

/// One activation: a function plus the call that reached it.
#[derive(Clone, Debug)]
pub struct Context {
    /// Index of the activated function in `program.cfgs`.
    pub cfg: usize,
    /// Block index of the call in the *parent's* Cfg. `None` only at the
    /// program entry.
    pub call_block: Option<usize>,
    pub parent: Option<ContextId>,
}

/// (context, block) pair. The fixpoint engine's unit of work.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ContextualNode {
    pub context: ContextId,
    pub block: usize,
}

/// The tree of all call contexts reachable from the program entry.
#[derive(Debug)]
pub struct ContextTree {
    contexts: Vec<Context>,
    /// Child context reached from a (caller context, call block) pair.
    callees: UnorderedMap<(ContextId, usize), ContextId>,
    /// Contexts activating each Cfg, indexed by Cfg.
    by_cfg: Vec<Vec<ContextId>>,
}

impl ContextTree {
    /// Expand the call graph into a context tree, starting from the program
    /// entry function. A recursive call chain is a defect: the upstream CFG
    /// layer is required to reject such binaries.
    pub fn build(program: &Program) -> Self {
        let mut tree = ContextTree {
            contexts: vec![],
            callees: UnorderedMap::new(),
            by_cfg: vec![vec![]; program.cfgs.len()],
        };
        let root = tree.push(Context {
            cfg: program.entry_cfg,
            call_block: None,
            parent: None,
        });
        let mut open = vec![program.entry_cfg];
        tree.expand(program, root, &mut open);
        debug!("Built context tree"; "contexts" => tree.contexts.len());
        tree
    }

    fn push(&mut self, ctx: Context) -> ContextId {
        let id = self.contexts.len();
        self.by_cfg[ctx.cfg].push(id);
        self.contexts.push(ctx);
        id
    }

    fn expand(&mut self, program: &Program, ctx: ContextId, open: &mut Vec<usize>) {
        let cfg = self.contexts[ctx].cfg;
        let call_blocks: Vec<usize> = program.cfgs[cfg].call_blocks().collect();
        for block in call_blocks {
            let callee = match program.callee_of(cfg, block) {
                Some(c) => c,
                None => {
                    if !crate::analysis_config::CONFIG.allow_unresolved_call_targets {
                        panic!(
                            "Call in `{}` block {} targets {:#x?}, which is not a known function",
                            program.cfgs[cfg].name,
                            block,
                            program.cfgs[cfg].blocks[block].call_target,
                        );
                    }
                    warn!(
                        "Call target outside the known functions; treated as opaque";
                        "function" => &program.cfgs[cfg].name,
                        "block" => block,
                    );
                    continue;
                }
            };
            assert!(
                !open.contains(&callee),
                "Recursive call chain through `{}` (from `{}` block {}); recursion is out of scope",
                program.cfgs[callee].name,
                program.cfgs[cfg].name,
                block,
            );
            let child = self.push(Context {
                cfg: callee,
                call_block: Some(block),
                parent: Some(ctx),
            });
            self.callees.insert((ctx, block), child);
            open.push(callee);
            self.expand(program, child, open);
            open.pop();
        }
    }

    pub fn root(&self) -> ContextId {
        0
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn context(&self, id: ContextId) -> &Context {
        &self.contexts[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContextId, &Context)> {
        self.contexts.iter().enumerate()
    }

    /// All contexts activating `cfg`.
    pub fn contexts_of_cfg(&self, cfg: usize) -> &[ContextId] {
        &self.by_cfg[cfg]
    }

    /// The child context entered by the call in `block` under `ctx`, if the
    /// call target is a known function.
    pub fn callee_context(&self, ctx: ContextId, block: usize) -> Option<ContextId> {
        self.callees.get(&(ctx, block)).copied()
    }

    /// Unique path-based identifier, e.g. `main/helper#2/leaf#0`. Every
    /// per-context attribute map is keyed by this.
    pub fn path_id(&self, program: &Program, id: ContextId) -> String {
        let mut parts = vec![];
        let mut cur = Some(id);
        while let Some(c) = cur {
            let ctx = &self.contexts[c];
            let name = &program.cfgs[ctx.cfg].name;
            match ctx.call_block {
                Some(b) => parts.push(format!("{}#{}", name, b)),
                None => parts.push(name.clone()),
            }
            cur = ctx.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    fn depth(&self, id: ContextId) -> usize {
        let mut d = 0;
        let mut cur = self.contexts[id].parent;
        while let Some(c) = cur {
            d += 1;
            cur = self.contexts[c].parent;
        }
        d
    }

    /// Whether `a` is `b` or an ancestor of `b`.
    pub fn is_ancestor_of(&self, a: ContextId, b: ContextId) -> bool {
        let mut cur = Some(b);
        while let Some(c) = cur {
            if c == a {
                return true;
            }
            cur = self.contexts[c].parent;
        }
        false
    }

    /// Deepest context that is an ancestor of both `a` and `b`. Always
    /// exists, since the tree has a single root.
    pub fn common_ancestor(&self, a: ContextId, b: ContextId) -> ContextId {
        let (mut a, mut b) = (a, b);
        let (mut da, mut db) = (self.depth(a), self.depth(b));
        while da > db {
            a = self.contexts[a].parent.unwrap();
            da -= 1;
        }
        while db > da {
            b = self.contexts[b].parent.unwrap();
            db -= 1;
        }
        while a != b {
            a = self.contexts[a].parent.unwrap();
            b = self.contexts[b].parent.unwrap();
        }
        a
    }

    /// Contextual successors of `node`: a call block continues into the
    /// callee's entry under the child context; an exit block continues into
    /// the caller's post-call blocks under the parent context; everything
    /// else stays within the context.
    pub fn contextual_successors(
        &self,
        program: &Program,
        node: ContextualNode,
    ) -> Vec<ContextualNode> {
        let ctx = &self.contexts[node.context];
        let cfg = &program.cfgs[ctx.cfg];

        if let Some(child) = self.callee_context(node.context, node.block) {
            let callee = &program.cfgs[self.contexts[child].cfg];
            return vec![ContextualNode {
                context: child,
                block: callee.entry,
            }];
        }

        if node.block == cfg.exit {
            return match (ctx.parent, ctx.call_block) {
                (Some(parent), Some(call_block)) => {
                    let caller = &program.cfgs[self.contexts[parent].cfg];
                    caller.blocks[call_block]
                        .successors
                        .iter()
                        .map(|&s| ContextualNode {
                            context: parent,
                            block: s,
                        })
                        .collect()
                }
                _ => vec![],
            };
        }

        cfg.blocks[node.block]
            .successors
            .iter()
            .map(|&s| ContextualNode {
                context: node.context,
                block: s,
            })
            .collect()
    }

    /// Contextual predecessors of `node`, the mirror of
    /// [`Self::contextual_successors`].
    pub fn contextual_predecessors(
        &self,
        program: &Program,
        node: ContextualNode,
    ) -> Vec<ContextualNode> {
        let ctx = &self.contexts[node.context];
        let cfg = &program.cfgs[ctx.cfg];
        let mut preds = vec![];

        // A function entry is reached from the call that activated it.
        if node.block == cfg.entry {
            if let (Some(parent), Some(call_block)) = (ctx.parent, ctx.call_block) {
                preds.push(ContextualNode {
                    context: parent,
                    block: call_block,
                });
            }
        }

        for &p in cfg.predecessors(node.block) {
            match self.callee_context(node.context, p) {
                // A post-call block is reached through the callee's exit.
                Some(child) => {
                    let callee = &program.cfgs[self.contexts[child].cfg];
                    preds.push(ContextualNode {
                        context: child,
                        block: callee.exit,
                    });
                }
                None => preds.push(ContextualNode {
                    context: node.context,
                    block: p,
                }),
            }
        }
        preds
    }

    /// Whether the edge `from -> to` is a marked backedge. Only
    /// intraprocedural edges can be backedges; call/return crossings never
    /// are.
    pub fn is_backedge(&self, program: &Program, from: ContextualNode, to: ContextualNode) -> bool {
        if from.context != to.context {
            return false;
        }
        let cfg = &program.cfgs[self.contexts[from.context].cfg];
        cfg.blocks[from.block].backedges.contains(&to.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests;

    #[test]
    fn two_level_call_builds_two_contexts_per_path() {
        let program = tests::two_level_call_program();
        let tree = ContextTree::build(&program);
        // main plus one context per call site of the helper.
        assert_eq!(tree.len(), 3);
        let root = tree.root();
        assert_eq!(tree.context(root).cfg, program.entry_cfg);
        for (id, ctx) in tree.iter() {
            if id != root {
                assert_eq!(ctx.parent, Some(root));
            }
        }
    }

    #[test]
    fn path_ids_are_unique() {
        let program = tests::two_level_call_program();
        let tree = ContextTree::build(&program);
        let mut ids: Vec<String> = (0..tree.len()).map(|c| tree.path_id(&program, c)).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), tree.len());
    }

    #[test]
    fn call_and_return_cross_contexts() {
        let program = tests::two_level_call_program();
        let tree = ContextTree::build(&program);
        let root = tree.root();
        let main = &program.cfgs[program.entry_cfg];
        let call_block = main.call_blocks().next().unwrap();

        let succs = tree.contextual_successors(
            &program,
            ContextualNode {
                context: root,
                block: call_block,
            },
        );
        assert_eq!(succs.len(), 1);
        let callee_entry = succs[0];
        assert_ne!(callee_entry.context, root);

        let preds = tree.contextual_predecessors(&program, callee_entry);
        assert!(preds.contains(&ContextualNode {
            context: root,
            block: call_block,
        }));

        let callee_cfg = &program.cfgs[tree.context(callee_entry.context).cfg];
        let exit = ContextualNode {
            context: callee_entry.context,
            block: callee_cfg.exit,
        };
        let returns = tree.contextual_successors(&program, exit);
        assert!(returns.iter().all(|n| n.context == root));
        assert_eq!(
            returns.len(),
            main.blocks[call_block].successors.len()
        );
    }

    #[test]
    fn ancestry_queries() {
        let program = tests::two_level_call_program();
        let tree = ContextTree::build(&program);
        let root = tree.root();
        for (id, _) in tree.iter() {
            assert!(tree.is_ancestor_of(root, id));
            assert_eq!(tree.common_ancestor(root, id), root);
            assert_eq!(tree.common_ancestor(id, id), id);
        }
    }

    #[test]
    #[should_panic(expected = "Recursive call chain")]
    fn recursion_is_a_defect() {
        let program = tests::recursive_program();
        ContextTree::build(&program);
    }
}

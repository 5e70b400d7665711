//! GraphViz rendering of the context tree, for debugging.

use crate::context::{ContextId, ContextTree};
use crate::program::Program;
use crate::stack_frame::StackFrameAnalysis;

struct Graph<'a> {
    program: &'a Program,
    tree: &'a ContextTree,
    frames: Option<&'a StackFrameAnalysis>,
}

type Node = ContextId;
type Edge = (ContextId, ContextId, String);

impl<'a> dot::Labeller<'a, Node, Edge> for Graph<'a> {
    fn graph_id(&'a self) -> dot::Id<'a> {
        dot::Id::new("ContextTree").unwrap()
    }
    fn node_id(&'a self, n: &Node) -> dot::Id<'a> {
        dot::Id::new(format!("ctx{}", n)).unwrap()
    }
    fn node_label<'b>(&'b self, n: &Node) -> dot::LabelText<'b> {
        let ctx = self.tree.context(*n);
        let name = &self.program.cfgs[ctx.cfg].name;
        match self.frames {
            Some(frames) => {
                let sp = frames.sp_of_context(self.program, self.tree, *n);
                dot::LabelText::escaped(format!("{}\\nsp = {:#x}", name, sp))
            }
            None => dot::LabelText::label(name.clone()),
        }
    }
    fn edge_label<'b>(&'b self, e: &Edge) -> dot::LabelText<'b> {
        dot::LabelText::label(e.2.clone())
    }
}

impl<'a> dot::GraphWalk<'a, Node, Edge> for Graph<'a> {
    fn nodes(&self) -> dot::Nodes<'a, Node> {
        self.tree.iter().map(|(id, _)| id).collect::<Vec<_>>().into()
    }
    fn edges(&'a self) -> dot::Edges<'a, Edge> {
        self.tree
            .iter()
            .filter_map(|(id, ctx)| {
                ctx.parent.map(|p| {
                    let label = match ctx.call_block {
                        Some(b) => format!("call@{}", b),
                        None => String::new(),
                    };
                    (p, id, label)
                })
            })
            .collect::<Vec<_>>()
            .into()
    }
    fn source(&self, e: &Edge) -> Node {
        e.0
    }
    fn target(&self, e: &Edge) -> Node {
        e.1
    }
}

/// Write the context tree as a `.dot` graph; with a completed stack frame
/// analysis each node also shows its concrete stack pointer.
pub fn write_context_tree_dot(
    program: &Program,
    tree: &ContextTree,
    frames: Option<&StackFrameAnalysis>,
    w: &mut impl std::io::Write,
) -> std::io::Result<()> {
    let g = Graph {
        program,
        tree,
        frames,
    };
    dot::render(&g, w)
}

/// [`write_context_tree_dot`] into a string.
pub fn generate_context_tree_dot(
    program: &Program,
    tree: &ContextTree,
    frames: Option<&StackFrameAnalysis>,
) -> String {
    let mut s: Vec<u8> = vec![];
    write_context_tree_dot(program, tree, frames, &mut s).unwrap();
    String::from_utf8(s).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests;

    #[test]
    fn renders_every_context() {
        let program = tests::two_level_call_program();
        let tree = ContextTree::build(&program);
        let out = generate_context_tree_dot(&program, &tree, None);
        assert!(out.contains("digraph ContextTree"));
        for (id, _) in tree.iter() {
            assert!(out.contains(&format!("ctx{}", id)));
        }
    }
}

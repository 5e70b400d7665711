//! Central test fixtures: small in-code programs exercising the analysis
//! end to end, plus the scenario tests built on them.

use crate::program::{
    split_operands, ArchKind, BasicBlock, InstrClass, Instruction, Literal, LiteralKind, Program,
    Section, VariableSym,
};

#[cfg(test)]
use crate::arch::{arch_for, TransferEnv};
#[cfg(test)]
use crate::context::{ContextTree, ContextualNode};
#[cfg(test)]
use crate::fixpoint::{AccessKey, AddressFlow, AddressFlowResults};
#[cfg(test)]
use crate::machine_state::MachineState;
#[cfg(test)]
use crate::stack_frame::StackFrameAnalysis;
#[cfg(test)]
use crate::symval::AbstractValue;

/// Build one instruction record from assembler text plus explicit
/// input/output register lists.
pub fn ins(address: u64, text: &str, inputs: &[&str], outputs: &[&str]) -> Instruction {
    let (mnemonic, rest) = text.split_once(' ').unwrap_or((text, ""));
    Instruction {
        address,
        mnemonic: mnemonic.to_string(),
        operands: split_operands(rest),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        class: InstrClass::default(),
        access_size: None,
        predicated: false,
    }
}

pub fn load(mut i: Instruction, size: u32) -> Instruction {
    i.class.is_load = true;
    i.access_size = Some(size);
    i
}

pub fn store(mut i: Instruction, size: u32) -> Instruction {
    i.class.is_store = true;
    i.access_size = Some(size);
    i
}

pub fn call(mut i: Instruction) -> Instruction {
    i.class.is_call = true;
    i
}

pub fn predicated(mut i: Instruction) -> Instruction {
    i.predicated = true;
    i
}

fn block(instructions: Vec<Instruction>, successors: Vec<usize>) -> BasicBlock {
    BasicBlock {
        instructions,
        successors,
        ..Default::default()
    }
}

fn text_section() -> Section {
    Section {
        name: ".text".to_string(),
        base: 0x8000,
        size: 0x1000,
    }
}

/// One ARM function: prologue, a store and a load of the same stack slot,
/// and a load through an entirely opaque register.
pub fn straight_line_stack_program() -> Program {
    let mut prog = Program::new(ArchKind::Arm, "straight_line", 0x8000_0000);
    prog.symtab.sections.push(text_section());

    prog.begin_function("main", 0x8000);
    let mut entry = block(
        vec![ins(0x8000, "sub sp, sp, #16", &["sp"], &["sp"])],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    let mut exit = block(
        vec![
            store(ins(0x8004, "str r0, [sp, #4]", &["r0", "sp"], &[]), 4),
            load(ins(0x8008, "ldr r1, [sp, #4]", &["sp"], &["r1"]), 4),
            load(ins(0x800c, "ldr r3, [r5]", &["r5"], &["r3"]), 4),
        ],
        vec![],
    );
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();
    prog.set_entry(0x8000);
    prog
}

/// ARM `main` calling `helper` from two distinct call sites, passing a
/// constant in `r0` at the first one. The helper spills its argument and
/// returns an opaque result in `r0`.
pub fn two_level_call_program() -> Program {
    let mut prog = Program::new(ArchKind::Arm, "two_level", 0x8000_0000);
    prog.symtab.sections.push(text_section());

    prog.begin_function("main", 0x8000);
    let mut entry = block(
        vec![
            ins(0x8000, "sub sp, sp, #8", &["sp"], &["sp"]),
            ins(0x8004, "mov r0, #5", &[], &["r0"]),
        ],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    let mut call1 = block(vec![call(ins(0x8008, "bl 0x9000", &[], &["lr"]))], vec![2]);
    call1.call_target = Some(0x9000);
    prog.add_block(call1);
    let mut call2 = block(vec![call(ins(0x800c, "bl 0x9000", &[], &["lr"]))], vec![3]);
    call2.call_target = Some(0x9000);
    prog.add_block(call2);
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();

    prog.begin_function("helper", 0x9000);
    let mut entry = block(
        vec![
            ins(0x9000, "sub sp, sp, #8", &["sp"], &["sp"]),
            store(ins(0x9004, "str r0, [sp, #4]", &["r0", "sp"], &[]), 4),
        ],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    let mut exit = block(
        vec![
            load(ins(0x9008, "ldr r2, [sp, #4]", &["sp"], &["r2"]), 4),
            ins(0x900c, "mov r0, r4", &["r4"], &["r0"]),
        ],
        vec![],
    );
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();

    prog.set_entry(0x8000);
    prog
}

/// ARM loop around a call site. The first iteration passes a constant in
/// `r0`, every later one an opaque value, so the callee entry must settle
/// on the join of both.
pub fn looped_call_program() -> Program {
    let mut prog = Program::new(ArchKind::Arm, "looped_call", 0x8000_0000);
    prog.symtab.sections.push(text_section());

    prog.begin_function("main", 0x8000);
    let mut entry = block(
        vec![
            ins(0x8000, "sub sp, sp, #8", &["sp"], &["sp"]),
            ins(0x8004, "mov r0, #5", &[], &["r0"]),
        ],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    let mut call1 = block(vec![call(ins(0x8008, "bl 0x9000", &[], &["lr"]))], vec![2]);
    call1.call_target = Some(0x9000);
    prog.add_block(call1);
    let mut latch = block(
        vec![ins(0x800c, "mov r0, r4", &["r4"], &["r0"])],
        vec![1, 3],
    );
    latch.backedges.insert(1);
    prog.add_block(latch);
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();

    prog.begin_function("helper", 0x9000);
    let mut entry = block(
        vec![
            ins(0x9000, "sub sp, sp, #8", &["sp"], &["sp"]),
            store(ins(0x9004, "str r0, [sp, #4]", &["r0", "sp"], &[]), 4),
        ],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();

    prog.set_entry(0x8000);
    prog
}

/// A condition-predicated PC-relative load inside an if-block. The literal
/// pool entry it would resolve to exists, but predication must keep it
/// unresolved.
pub fn predicated_pc_load_program() -> Program {
    let mut prog = Program::new(ArchKind::Arm, "predicated_pc", 0x8000_0000);
    prog.symtab.sections.push(text_section());
    prog.literals.insert(
        0x8018,
        Literal {
            kind: LiteralKind::Imm,
            value: 0x40,
        },
    );

    prog.begin_function("main", 0x8000);
    let mut entry = block(vec![], vec![1, 2]);
    entry.is_entry = true;
    prog.add_block(entry);
    prog.add_block(block(
        vec![predicated(load(
            ins(0x8008, "ldrls r0, [pc, #8]", &["pc"], &["r0"]),
            4,
        ))],
        vec![2],
    ));
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();
    prog.set_entry(0x8000);
    prog
}

/// A caller with no prologue: violates the functions-with-calls-need-a-frame
/// invariant.
pub fn call_without_frame_program() -> Program {
    let mut prog = Program::new(ArchKind::Arm, "frameless_caller", 0x8000_0000);
    prog.symtab.sections.push(text_section());

    prog.begin_function("main", 0x8000);
    let mut entry = block(vec![call(ins(0x8000, "bl 0x9000", &[], &["lr"]))], vec![1]);
    entry.is_entry = true;
    entry.call_target = Some(0x9000);
    prog.add_block(entry);
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();

    prog.begin_function("helper", 0x9000);
    let mut only = block(vec![], vec![]);
    only.is_entry = true;
    only.is_exit = true;
    prog.add_block(only);
    prog.end_function();

    prog.set_entry(0x8000);
    prog
}

/// `helper` calling itself; context tree construction must reject it.
pub fn recursive_program() -> Program {
    let mut prog = Program::new(ArchKind::Arm, "recursive", 0x8000_0000);
    prog.symtab.sections.push(text_section());

    prog.begin_function("main", 0x8000);
    let mut entry = block(
        vec![ins(0x8000, "sub sp, sp, #8", &["sp"], &["sp"])],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    let mut call1 = block(vec![call(ins(0x8004, "bl 0x9000", &[], &["lr"]))], vec![2]);
    call1.call_target = Some(0x9000);
    prog.add_block(call1);
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();

    prog.begin_function("helper", 0x9000);
    let mut entry = block(
        vec![ins(0x9000, "sub sp, sp, #8", &["sp"], &["sp"])],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    let mut rec = block(vec![call(ins(0x9004, "bl 0x9000", &[], &["lr"]))], vec![2]);
    rec.call_target = Some(0x9000);
    prog.add_block(rec);
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();

    prog.set_entry(0x8000);
    prog
}

/// MIPS: a `lui`/`addiu`-built absolute access resolving to a named
/// variable, plus a `$gp`-relative load.
pub fn mips_gp_program() -> Program {
    let mut prog = Program::new(ArchKind::Mips, "mips_gp", 0x7fff_0000);
    prog.symtab.sections.push(text_section());
    prog.symtab.sections.push(Section {
        name: ".data".to_string(),
        base: 0x9_0000,
        size: 0x100,
    });
    prog.symtab.variables.push(VariableSym {
        name: "counter".to_string(),
        address: 0x9_0010,
        size: 4,
        section: ".data".to_string(),
    });
    prog.symtab.global_pointer = Some(0x9_0020);

    prog.begin_function("main", 0x8000);
    let mut entry = block(
        vec![
            ins(0x8000, "addiu sp,sp,-16", &["sp"], &["sp"]),
            store(ins(0x8004, "sw ra,12(sp)", &["ra", "sp"], &[]), 4),
        ],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    let mut exit = block(
        vec![
            ins(0x8008, "lui v0,0x9", &[], &["v0"]),
            ins(0x800c, "addiu v0,v0,0x10", &["v0"], &["v0"]),
            load(ins(0x8010, "lw v1,0(v0)", &["v0"], &["v1"]), 4),
            load(ins(0x8014, "lw a0,-4(gp)", &["gp"], &["a0"]), 4),
        ],
        vec![],
    );
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();
    prog.set_entry(0x8000);
    prog
}

#[cfg(test)]
fn analyze(program: &Program) -> (ContextTree, StackFrameAnalysis, AddressFlowResults) {
    let arch = arch_for(program.arch);
    let tree = ContextTree::build(program);
    let frames = StackFrameAnalysis::run(program, &tree, arch.as_ref());
    let results = AddressFlow::analyze(program, arch.as_ref(), &tree, &frames);
    (tree, frames, results)
}

#[test]
fn straight_line_stack_access() {
    let program = straight_line_stack_program();
    let (tree, frames, results) = analyze(&program);
    let root = tree.root();
    let sp = frames.sp_of_context(&program, &tree, root);
    assert_eq!(sp, 0x8000_0000 - 16);

    let store_info = results
        .info(&AccessKey {
            context: root,
            block: 1,
            instr: 0,
        })
        .unwrap();
    let load_info = results
        .info(&AccessKey {
            context: root,
            block: 1,
            instr: 1,
        })
        .unwrap();
    assert_eq!(store_info.segment, "stack");
    assert!(store_info.precise);
    assert_eq!(store_info.ranges, vec![(sp + 4, 4)]);
    // The load resolves to the identical address record.
    assert_eq!(load_info.segment, store_info.segment);
    assert_eq!(load_info.precise, store_info.precise);
    assert_eq!(load_info.ranges, store_info.ranges);
}

#[test]
fn stored_value_flows_back_through_the_slot() {
    let program = straight_line_stack_program();
    let (tree, _, results) = analyze(&program);
    let arch = arch_for(program.arch);
    let env = TransferEnv { program: &program };
    let mut state = results
        .in_state(ContextualNode {
            context: tree.root(),
            block: 1,
        })
        .unwrap()
        .clone();

    let r0 = arch.register_index("r0").unwrap();
    let r1 = arch.register_index("r1").unwrap();
    state.regs.set(r0, AbstractValue::constant(5));
    for instr in &program.cfgs[0].blocks[1].instructions[..2] {
        state.simulate(arch.as_ref(), instr, &env);
    }
    assert_eq!(state.regs.get(r1), AbstractValue::constant(5));
}

#[test]
fn opaque_pointer_degrades_to_unknown_fallback() {
    let program = straight_line_stack_program();
    let (tree, _, results) = analyze(&program);
    let info = results
        .info(&AccessKey {
            context: tree.root(),
            block: 1,
            instr: 2,
        })
        .unwrap();
    assert_eq!(info.segment, "all");
    assert!(!info.precise);
    assert_eq!(info.ranges, vec![(0x8000, (0x8000_0000u64 - 0x8000) as u32)]);
}

#[test]
fn predicated_pc_relative_load_stays_unresolved() {
    let program = predicated_pc_load_program();
    let (tree, _, results) = analyze(&program);
    let info = results
        .info(&AccessKey {
            context: tree.root(),
            block: 1,
            instr: 0,
        })
        .unwrap();
    // The literal pool entry at pc+8+8 exists, but a predicated load is
    // never rewritten against it; the access stays an imprecise .text hint.
    assert!(!info.precise);
    assert_eq!(info.segment, ".text");
    assert_eq!(info.ranges, vec![(0x8000, 0x1000)]);
}

#[test]
fn caller_argument_import() {
    let program = two_level_call_program();
    let (tree, _, results) = analyze(&program);
    let root = tree.root();
    let arch = arch_for(program.arch);
    let r0 = arch.register_index("r0").unwrap();
    let helper_entry = program.cfgs[1].entry;

    // First call site: r0 carries the caller's constant at context entry.
    let ctx1 = tree.callee_context(root, 1).unwrap();
    let in1 = results
        .in_state(ContextualNode {
            context: ctx1,
            block: helper_entry,
        })
        .unwrap();
    assert_eq!(in1.regs.get(r0), AbstractValue::constant(5));

    // Second call site: the helper returned an opaque value in r0.
    let ctx2 = tree.callee_context(root, 2).unwrap();
    let in2 = results
        .in_state(ContextualNode {
            context: ctx2,
            block: helper_entry,
        })
        .unwrap();
    assert!(in2.regs.get(r0).is_unknown());

    // Each context gets its own address record for the helper's spill.
    for ctx in [ctx1, ctx2] {
        let info = results
            .info(&AccessKey {
                context: ctx,
                block: helper_entry,
                instr: 1,
            })
            .unwrap();
        assert_eq!(info.segment, "stack");
        assert!(info.precise);
    }
}

#[test]
fn loop_degraded_argument_reaches_the_callee() {
    let program = looped_call_program();
    let (tree, _, results) = analyze(&program);
    let arch = arch_for(program.arch);
    let r0 = arch.register_index("r0").unwrap();
    let ctx = tree.callee_context(tree.root(), 1).unwrap();

    // The call's own out-state never changes across loop iterations (the
    // call clobbers r0 either way), so convergence must be driven by the
    // call's in-state, not its out-state.
    let entry_in = results
        .in_state(ContextualNode {
            context: ctx,
            block: program.cfgs[1].entry,
        })
        .unwrap();
    assert!(entry_in.regs.get(r0).is_unknown());

    // The spill of the degraded argument still lands on a precise slot.
    let info = results
        .info(&AccessKey {
            context: ctx,
            block: program.cfgs[1].entry,
            instr: 1,
        })
        .unwrap();
    assert_eq!(info.segment, "stack");
    assert!(info.precise);
}

#[test]
fn nested_context_stack_pointers() {
    let program = two_level_call_program();
    let (tree, frames, _) = analyze(&program);
    let root = tree.root();
    assert_eq!(frames.info(0).frame_size, 8);
    assert_eq!(frames.info(1).frame_size, 8);
    assert_eq!(frames.sp_of_context(&program, &tree, root), 0x8000_0000 - 8);
    for &call_block in &[1, 2] {
        let ctx = tree.callee_context(root, call_block).unwrap();
        assert_eq!(
            frames.sp_of_context(&program, &tree, ctx),
            0x8000_0000 - 16
        );
    }
}

#[test]
fn stack_layout_is_fixed_after_construction() {
    let program = straight_line_stack_program();
    let arch = arch_for(program.arch);
    let env = TransferEnv { program: &program };
    let mut state = MachineState::at_function_entry(arch.as_ref(), 3, &env);
    let before = state.stack.slot_count();

    let r0 = arch.register_index("r0").unwrap();
    state.regs.set(r0, AbstractValue::constant(7));
    let instrs = vec![
        store(ins(0x8004, "str r0, [sp, #4]", &["r0", "sp"], &[]), 4),
        store(ins(0x8008, "str r0, [sp, #64]", &["r0", "sp"], &[]), 4),
        store(ins(0x800c, "str r0, [sp, #-8]", &["r0", "sp"], &[]), 4),
        load(ins(0x8010, "ldr r1, [sp, #96]", &["sp"], &["r1"]), 4),
    ];
    for instr in &instrs {
        state.simulate(arch.as_ref(), instr, &env);
    }

    // Out-of-frame stores are dropped, never grow the model; the in-range
    // one landed.
    assert_eq!(state.stack.slot_count(), before);
    assert_eq!(state.stack.get(1), Some(AbstractValue::constant(7)));
    assert!(state
        .regs
        .get(arch.register_index("r1").unwrap())
        .is_unknown());
}

#[test]
fn frameless_leaf_is_accepted() {
    let program = predicated_pc_load_program();
    let arch = arch_for(program.arch);
    let tree = ContextTree::build(&program);
    let frames = StackFrameAnalysis::run(&program, &tree, arch.as_ref());
    assert_eq!(frames.info(0).frame_size, 0);
}

#[test]
#[should_panic(expected = "makes calls but allocates no stack frame")]
fn caller_without_frame_is_a_defect() {
    let program = call_without_frame_program();
    let arch = arch_for(program.arch);
    let tree = ContextTree::build(&program);
    StackFrameAnalysis::run(&program, &tree, arch.as_ref());
}

#[test]
fn unreachable_frameless_caller_is_ignored() {
    let mut prog = Program::new(ArchKind::Arm, "orphaned", 0x8000_0000);
    prog.symtab.sections.push(text_section());

    prog.begin_function("main", 0x8000);
    let mut entry = block(
        vec![
            ins(0x8000, "sub sp, sp, #8", &["sp"], &["sp"]),
            store(ins(0x8004, "str r0, [sp, #4]", &["r0", "sp"], &[]), 4),
        ],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();

    // Exported dead code: calls without a frame, but no context ever
    // activates it.
    prog.begin_function("orphan", 0x9000);
    let mut only = block(vec![call(ins(0x9000, "bl 0x8000", &[], &["lr"]))], vec![1]);
    only.is_entry = true;
    only.call_target = Some(0x8000);
    prog.add_block(only);
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();

    prog.set_entry(0x8000);
    let (tree, frames, results) = analyze(&prog);
    assert_eq!(frames.info(0).frame_size, 8);
    assert_eq!(frames.info(1).frame_size, 0);
    let info = results
        .info(&AccessKey {
            context: tree.root(),
            block: 0,
            instr: 1,
        })
        .unwrap();
    assert_eq!(info.segment, "stack");
}

#[test]
#[should_panic(expected = "writes the stack pointer outside")]
fn stack_discipline_violation_is_a_defect() {
    let mut prog = Program::new(ArchKind::Arm, "undisciplined", 0x8000_0000);
    prog.symtab.sections.push(text_section());
    prog.begin_function("main", 0x8000);
    let mut entry = block(
        vec![ins(0x8000, "sub sp, sp, #8", &["sp"], &["sp"])],
        vec![1],
    );
    entry.is_entry = true;
    prog.add_block(entry);
    prog.add_block(block(
        vec![ins(0x8004, "sub sp, sp, #8", &["sp"], &["sp"])],
        vec![2],
    ));
    let mut exit = block(vec![], vec![]);
    exit.is_exit = true;
    prog.add_block(exit);
    prog.end_function();
    prog.set_entry(0x8000);

    let arch = arch_for(prog.arch);
    let tree = ContextTree::build(&prog);
    StackFrameAnalysis::run(&prog, &tree, arch.as_ref());
}

#[test]
fn mips_absolute_and_gp_relative_accesses() {
    let program = mips_gp_program();
    let (tree, frames, results) = analyze(&program);
    let root = tree.root();

    let sw = results
        .info(&AccessKey {
            context: root,
            block: 0,
            instr: 1,
        })
        .unwrap();
    assert_eq!(sw.segment, "stack");
    assert!(sw.precise);
    assert_eq!(
        sw.ranges,
        vec![(frames.sp_of_context(&program, &tree, root) + 12, 4)]
    );

    let lw_var = results
        .info(&AccessKey {
            context: root,
            block: 1,
            instr: 2,
        })
        .unwrap();
    assert_eq!(lw_var.segment, ".data");
    assert_eq!(lw_var.var_name.as_deref(), Some("counter"));
    assert!(lw_var.precise);
    assert_eq!(lw_var.ranges, vec![(0x9_0010, 4)]);

    let lw_gp = results
        .info(&AccessKey {
            context: root,
            block: 1,
            instr: 3,
        })
        .unwrap();
    assert_eq!(lw_gp.segment, ".data");
    assert_eq!(lw_gp.var_name, None);
    assert!(lw_gp.precise);
    assert_eq!(lw_gp.ranges, vec![(0x9_001c, 4)]);
}

#[test]
fn join_is_idempotent() {
    let program = straight_line_stack_program();
    let (tree, _, results) = analyze(&program);
    let arch = arch_for(program.arch);
    let state = results
        .in_state(ContextualNode {
            context: tree.root(),
            block: 1,
        })
        .unwrap();
    let mut joined = state.clone();
    assert!(!joined.join(state, arch.as_ref()));
    assert!(joined.same_as(state, arch.as_ref()));
}

#[test]
fn join_only_loses_precision() {
    let program = two_level_call_program();
    let (tree, _, results) = analyze(&program);
    let arch = arch_for(program.arch);
    let root = tree.root();
    let s1 = results
        .in_state(ContextualNode {
            context: root,
            block: 1,
        })
        .unwrap();
    let s2 = results
        .in_state(ContextualNode {
            context: root,
            block: 2,
        })
        .unwrap();
    let mut joined = s1.clone();
    joined.join(s2, arch.as_ref());
    for i in 0..joined.regs.len() {
        if i == arch.aux_register() {
            continue;
        }
        // Per slot: kept bit-for-bit or degraded to unknown, never anything
        // new.
        let j = joined.regs.get(i);
        assert!(j == s1.regs.get(i) || j.is_unknown());
        if s1.regs.get(i) == s2.regs.get(i) {
            assert_eq!(j, s1.regs.get(i));
        }
    }
}

#[test]
fn transfer_is_deterministic() {
    let program = straight_line_stack_program();
    let (tree, _, results) = analyze(&program);
    let arch = arch_for(program.arch);
    let env = TransferEnv { program: &program };
    let base = results
        .in_state(ContextualNode {
            context: tree.root(),
            block: 1,
        })
        .unwrap();
    let mut a = base.clone();
    let mut b = base.clone();
    for instr in &program.cfgs[0].blocks[1].instructions {
        a.simulate(arch.as_ref(), instr, &env);
        b.simulate(arch.as_ref(), instr, &env);
    }
    assert_eq!(a, b);
}

#[test]
fn report_lists_every_access() {
    let program = two_level_call_program();
    let (tree, _, results) = analyze(&program);
    let mut out: Vec<u8> = vec![];
    results.write_report(&program, &tree, &mut out).unwrap();
    let report = String::from_utf8(out).unwrap();
    // One report section per helper context, none for the access-free main.
    assert_eq!(report.matches("== helper").count(), 2);
    assert_eq!(report.matches("== main").count(), 0);
    assert!(report.contains("stack"));
}

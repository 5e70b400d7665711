//! A lifter from the `.cfg-exported` text format.
//!
//! The objdump/ELF/CFG layer exports one `.cfg-exported` file per binary:
//! blank-line-separated sections `PROGRAM`, `SECTIONS`, `VARIABLES`,
//! `LITERALS`, `GP`, then one `CFG` section per function. Within a `CFG`
//! section, `block` header lines carry successor lists (backedges starred),
//! entry/exit marks and call targets, and each following line is one
//! instruction record. Malformed input is a defect and panics with a
//! diagnostic; this layer also verifies that ARM multi-register
//! loads/stores were expanded upstream.

use crate::log::*;
use crate::program::{
    split_operands, ArchKind, BasicBlock, InstrClass, Instruction, Literal, LiteralKind, Program,
    Section, VariableSym,
};

use std::rc::Rc;

use itertools::Itertools;

/// Lift a `.cfg-exported` file into a [`Program`] ready for analysis.
pub fn lift_from(cfg_exported: &str) -> Rc<Program> {
    assert!(
        cfg_exported.starts_with("PROGRAM\n"),
        "Not a .cfg-exported file (missing PROGRAM header)"
    );

    let mut sections = cfg_exported.trim().split("\n\n");
    let program_section = sections
        .next()
        .unwrap()
        .strip_prefix("PROGRAM\n")
        .unwrap()
        .trim();

    let (mut prog, entry_address) = parse_program_section(program_section);

    for sec in sections {
        let sec = sec.trim();
        if sec.is_empty() {
            continue;
        }
        let (head, body) = sec.split_once('\n').unwrap_or((sec, ""));
        let head = head.trim();
        if head == "SECTIONS" {
            parse_sections(body, &mut prog);
        } else if head == "VARIABLES" {
            parse_variables(body, &mut prog);
        } else if head == "LITERALS" {
            parse_literals(body, &mut prog);
        } else if head == "GP" {
            prog.symtab.global_pointer = Some(parse_num(body.trim()));
        } else if let Some(cfg_head) = head.strip_prefix("CFG ") {
            parse_cfg(cfg_head, body, &mut prog);
        } else {
            panic!("Unknown section `{}`", head);
        }
    }

    prog.set_entry(entry_address);
    info!(
        "Lifted program";
        "name" => &prog.name,
        "arch" => ?prog.arch,
        "functions" => prog.cfgs.len(),
    );
    Rc::new(prog)
}

fn parse_program_section(section: &str) -> (Program, u64) {
    let mut name = None;
    let mut arch = None;
    let mut initial_sp = None;
    let mut entry = None;
    for line in section.lines() {
        match &*line.trim().split_whitespace().collect::<Vec<_>>() {
            ["name", n] => name = Some(n.to_string()),
            ["arch", "arm"] => arch = Some(ArchKind::Arm),
            ["arch", "mips"] => arch = Some(ArchKind::Mips),
            ["initial_sp", v] => initial_sp = Some(parse_num(v)),
            ["entry", v] => entry = Some(parse_num(v)),
            l => panic!("Unexpected PROGRAM line {:?}", l),
        }
    }
    let prog = Program::new(
        arch.expect("PROGRAM section missing `arch`"),
        name.expect("PROGRAM section missing `name`"),
        initial_sp.expect("PROGRAM section missing `initial_sp`"),
    );
    (prog, entry.expect("PROGRAM section missing `entry`"))
}

fn parse_sections(body: &str, prog: &mut Program) {
    for line in body.lines() {
        let (name, base, size) = line
            .trim()
            .split_whitespace()
            .collect_tuple()
            .unwrap_or_else(|| panic!("Malformed SECTIONS line `{}`", line));
        prog.symtab.sections.push(Section {
            name: name.to_string(),
            base: parse_num(base),
            size: parse_num(size),
        });
    }
}

fn parse_variables(body: &str, prog: &mut Program) {
    for line in body.lines() {
        let (name, addr, size, section) = line
            .trim()
            .split_whitespace()
            .collect_tuple()
            .unwrap_or_else(|| panic!("Malformed VARIABLES line `{}`", line));
        prog.symtab.variables.push(VariableSym {
            name: name.to_string(),
            address: parse_num(addr),
            size: parse_num(size) as u32,
            section: section.to_string(),
        });
    }
}

fn parse_literals(body: &str, prog: &mut Program) {
    for line in body.lines() {
        let (addr, kind, value) = line
            .trim()
            .split_whitespace()
            .collect_tuple()
            .unwrap_or_else(|| panic!("Malformed LITERALS line `{}`", line));
        let kind = if kind == "imm" {
            LiteralKind::Imm
        } else {
            LiteralKind::Section(kind.to_string())
        };
        prog.literals.insert(
            parse_num(addr),
            Literal {
                kind,
                value: parse_num(value),
            },
        );
    }
}

fn parse_cfg(head: &str, body: &str, prog: &mut Program) {
    let (entry_addr, name) = head
        .split_whitespace()
        .collect_tuple()
        .unwrap_or_else(|| panic!("Malformed CFG header `{}`", head));
    prog.begin_function(name, parse_num(entry_addr));

    let mut current: Option<BasicBlock> = None;
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix("block") {
            if let Some(done) = current.take() {
                prog.add_block(done);
            }
            current = Some(parse_block_header(header));
        } else {
            let block = current
                .as_mut()
                .unwrap_or_else(|| panic!("Instruction before any block header: `{}`", line));
            block.instructions.push(parse_instruction(line, prog.arch));
        }
    }
    if let Some(done) = current.take() {
        prog.add_block(done);
    }
    prog.end_function();
}

fn parse_block_header(header: &str) -> BasicBlock {
    let mut block = BasicBlock::default();
    for token in header.split_whitespace() {
        if token == "entry" {
            block.is_entry = true;
        } else if token == "exit" {
            block.is_exit = true;
        } else if let Some(target) = token.strip_prefix("call=") {
            block.call_target = Some(parse_num(target));
        } else if let Some(succs) = token.strip_prefix("succ=") {
            for s in succs.split(',') {
                match s.strip_suffix('*') {
                    Some(back) => {
                        let idx = parse_num(back) as usize;
                        block.successors.push(idx);
                        block.backedges.insert(idx);
                    }
                    None => block.successors.push(parse_num(s) as usize),
                }
            }
        } else {
            panic!("Unknown block header token `{}`", token);
        }
    }
    block
}

/// One instruction record:
/// `<addr> <flags> <size> in=<regs> out=<regs> | <mnemonic> <operands>`
/// where `flags` is a combination of `l`oad/`s`tore/`c`all/`r`eturn/`j`ump/
/// `p`redicated (or `-`), and `<regs>` are comma-separated names (or `-`).
fn parse_instruction(line: &str, arch: ArchKind) -> Instruction {
    let (meta, text) = line
        .split_once('|')
        .unwrap_or_else(|| panic!("Instruction record without `|` separator: `{}`", line));
    let (addr, flags, size, ins, outs) = meta
        .trim()
        .split_whitespace()
        .collect_tuple()
        .unwrap_or_else(|| panic!("Malformed instruction record `{}`", line));

    let mut class = InstrClass::default();
    let mut predicated = false;
    if flags != "-" {
        for f in flags.chars() {
            match f {
                'l' => class.is_load = true,
                's' => class.is_store = true,
                'c' => class.is_call = true,
                'r' => class.is_return = true,
                'j' => class.is_jump = true,
                'p' => predicated = true,
                _ => panic!("Unknown instruction flag `{}` in `{}`", f, line),
            }
        }
    }

    let text = text.trim();
    let (mnemonic, operand_text) = match text.split_once(char::is_whitespace) {
        Some((m, rest)) => (m.to_string(), rest.trim()),
        None => (text.to_string(), ""),
    };

    // The CFG layer is required to have expanded multi-register
    // loads/stores into single transfers plus an explicit sp adjustment.
    if arch == ArchKind::Arm {
        assert!(
            !(mnemonic.starts_with("push")
                || mnemonic.starts_with("pop")
                || mnemonic.starts_with("ldm")
                || mnemonic.starts_with("stm")),
            "Raw multi-register instruction `{}` at {}; upstream expansion missing",
            text,
            addr,
        );
    }

    Instruction {
        address: parse_num(addr),
        mnemonic,
        operands: split_operands(operand_text),
        inputs: parse_reg_list(ins.strip_prefix("in=").unwrap_or_else(|| {
            panic!("Instruction record missing `in=`: `{}`", line)
        })),
        outputs: parse_reg_list(outs.strip_prefix("out=").unwrap_or_else(|| {
            panic!("Instruction record missing `out=`: `{}`", line)
        })),
        class,
        access_size: (size != "-").then(|| parse_num(size) as u32),
        predicated,
    }
}

fn parse_reg_list(s: &str) -> Vec<String> {
    if s == "-" {
        return vec![];
    }
    s.split(',').map(|r| r.trim().to_string()).collect()
}

fn parse_num(s: &str) -> u64 {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16)
            .unwrap_or_else(|e| panic!("Bad hex number `{}`: {}", s, e)),
        None => s
            .parse()
            .unwrap_or_else(|e| panic!("Bad number `{}`: {}", s, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "\
PROGRAM
name demo
arch arm
initial_sp 0x80000000
entry 0x8000

SECTIONS
.text 0x8000 0x1000
.data 0x9000 0x100

VARIABLES
counter 0x9010 4 .data

LITERALS
0x8020 imm 0x40
0x8024 .data 0x9010

CFG 0x8000 main
block entry succ=1
0x8000 - - in=- out=sp | sub sp, sp, #16
block exit
0x8008 l 4 in=sp out=r0 | ldr r0, [sp, #4]
";

    #[test]
    fn lifts_sections_and_blocks() {
        let prog = lift_from(SMALL);
        assert_eq!(prog.arch, ArchKind::Arm);
        assert_eq!(prog.name, "demo");
        assert_eq!(prog.initial_stack_pointer, 0x8000_0000);
        assert_eq!(prog.cfgs.len(), 1);
        let main = &prog.cfgs[0];
        assert_eq!(main.name, "main");
        assert_eq!(main.blocks.len(), 2);
        assert_eq!(main.blocks[0].successors, vec![1]);
        assert!(main.blocks[0].is_entry);
        assert!(main.blocks[1].is_exit);
        let ldr = &main.blocks[1].instructions[0];
        assert!(ldr.class.is_load);
        assert_eq!(ldr.access_size, Some(4));
        assert_eq!(ldr.operands, vec!["r0".to_string(), "[sp, #4]".to_string()]);
        assert_eq!(prog.symtab.variables[0].name, "counter");
        assert_eq!(prog.literals.len(), 2);
    }

    #[test]
    fn backedge_stars_are_parsed() {
        let block = parse_block_header(" succ=1,0*");
        assert_eq!(block.successors, vec![1, 0]);
        assert!(block.backedges.contains(&0));
    }

    #[test]
    #[should_panic(expected = "Raw multi-register instruction")]
    fn raw_push_is_rejected() {
        parse_instruction("0x8000 s 4 in=sp,r4 out=sp | push {r4, lr}", ArchKind::Arm);
    }

    #[test]
    #[should_panic(expected = "missing PROGRAM header")]
    fn garbage_is_rejected() {
        lift_from("hello world");
    }
}

// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

//! Tab-separated relation files for the Datalog front-end. Two families
//! are emitted: instruction-level relations over the raw operation stream,
//! and TAC-level relations over the decompiled graph. Rows are sorted and
//! deduplicated so identical inputs always produce identical bytes.

use eyre::{Result, WrapErr};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::dominators::{self, Dominance};
use crate::evm_cfg::{Def, EVMOp};
use crate::memtypes::{Location, VarPool};
use crate::opcodes::{self, Opcode};
use crate::tac_cfg::{TACGraph, TACOp};

fn write_relation(dir: &Path, name: &str, mut rows: Vec<Vec<String>>) -> Result<()> {
    rows.sort();
    rows.dedup();
    let mut out = String::new();
    for row in rows {
        out.push_str(&row.join("\t"));
        out.push('\n');
    }
    let path = dir.join(format!("{name}.facts"));
    fs::write(&path, out).wrap_err_with(|| format!("failed to write {}", path.display()))
}

fn hex(n: usize) -> String {
    format!("{n:#x}")
}

/// Emits the instruction-level family: one statement relation per opcode
/// (restrictable to `out_opcodes`), the statement ordering and opcode
/// relations, and the opcode property tables.
pub fn export_instruction_facts(
    ops: &[EVMOp],
    dir: &Path,
    out_opcodes: Option<&[String]>,
) -> Result<()> {
    fs::create_dir_all(dir).wrap_err_with(|| format!("failed to create {}", dir.display()))?;

    let included = |name: &str| {
        // MISSING is always kept so downstream rules can rely on it.
        name == opcodes::MISSING.name
            || out_opcodes.map_or(true, |list| list.iter().any(|n| n == name))
    };

    let mut statements: BTreeMap<&'static str, Vec<Vec<String>>> = opcodes::OPCODES
        .iter()
        .filter(|op| included(op.name))
        .map(|op| (op.name, Vec::new()))
        .collect();

    let mut instructions = Vec::new();
    let mut pcs: Vec<usize> = Vec::new();
    for op in ops {
        pcs.push(op.pc);
        instructions.push(vec![hex(op.pc), op.opcode.name.to_string()]);
        if let Some(rows) = statements.get_mut(op.opcode.name) {
            if op.opcode.is_push() {
                let value = op.value.unwrap_or_default();
                rows.push(vec![hex(op.pc), format!("{value:#x}")]);
            } else {
                rows.push(vec![hex(op.pc)]);
            }
        }
    }

    for (name, rows) in statements {
        write_relation(dir, name, rows)?;
    }

    pcs.sort_unstable();
    pcs.dedup();
    let next = pcs
        .windows(2)
        .map(|pair| vec![hex(pair[0]), hex(pair[1])])
        .collect();
    write_relation(dir, "Statement_Next", next)?;
    write_relation(dir, "Statement_Opcode", instructions)?;

    export_opcode_properties(dir)
}

type BoolProp = (&'static str, fn(&Opcode) -> bool);
type IntProp = (&'static str, fn(&Opcode) -> i64);

const BOOL_PROPS: &[BoolProp] = &[
    ("OpcodeAltersFlow", |op| op.alters_flow()),
    ("OpcodeHalts", |op| op.halts()),
    ("OpcodeIsArithmetic", |op| op.is_arithmetic()),
    ("OpcodeIsCall", |op| op.is_call()),
    ("OpcodeIsDup", |op| op.is_dup()),
    ("OpcodeIsInvalid", |op| op.is_invalid()),
    ("OpcodeIsLog", |op| op.is_log()),
    ("OpcodeIsMemory", |op| op.is_memory()),
    ("OpcodeIsMissing", |op| op.is_missing()),
    ("OpcodeIsPush", |op| op.is_push()),
    ("OpcodeIsStorage", |op| op.is_storage()),
    ("OpcodeIsSwap", |op| op.is_swap()),
    ("OpcodePossiblyHalts", |op| op.possibly_halts()),
];

const INT_PROPS: &[IntProp] = &[
    ("OpcodeLogLen", |op| op.log_len() as i64),
    ("OpcodeOrd", |op| op.code as i64),
    ("OpcodePopWords", |op| op.pop as i64),
    ("OpcodePushLen", |op| op.push_len() as i64),
    ("OpcodePushWords", |op| op.push as i64),
    ("OpcodeStackDelta", |op| op.stack_delta() as i64),
];

fn export_opcode_properties(dir: &Path) -> Result<()> {
    for (name, prop) in BOOL_PROPS {
        let rows = opcodes::OPCODES
            .iter()
            .filter(|op| prop(op))
            .map(|op| vec![op.name.to_string()])
            .collect();
        write_relation(dir, name, rows)?;
    }
    for (name, prop) in INT_PROPS {
        let rows = opcodes::OPCODES
            .iter()
            .map(|op| vec![op.name.to_string(), prop(op).to_string()])
            .collect();
        write_relation(dir, name, rows)?;
    }
    Ok(())
}

/// Emits the TAC-level family: ops, definitions, uses, writes, edges, block
/// membership, entry/exit singletons, and (optionally) dominance.
pub fn export_tac_facts(
    graph: &TACGraph,
    pool: &VarPool,
    dir: &Path,
    with_dominators: bool,
) -> Result<()> {
    fs::create_dir_all(dir).wrap_err_with(|| format!("failed to create {}", dir.display()))?;

    let mut op_rows = Vec::new();
    let mut defined = Vec::new();
    let mut read = Vec::new();
    let mut write = Vec::new();
    let mut edges = Vec::new();
    let mut blocks = Vec::new();

    for block in &graph.blocks {
        for op in &block.ops {
            op_rows.push(vec![hex(op.pc), op.opcode.name.to_string()]);
            blocks.push(vec![hex(op.pc), hex(block.entry)]);

            match op.def {
                Some(Def::Var(var)) => {
                    defined.push(vec![hex(op.pc), var.to_string()]);
                    write.push(vec![hex(op.pc), var.to_string()]);
                }
                Some(Def::Loc(loc)) => write.push(vec![hex(op.pc), loc.to_string()]),
                None => {}
            }
            for arg in &op.args {
                if pool.value(*arg).single().is_none() {
                    read.push(vec![hex(op.pc), arg.to_string()]);
                }
            }
            if let Some(loc) = read_location(op) {
                read.push(vec![hex(op.pc), loc.to_string()]);
            }
        }

        for pair in block.ops.windows(2) {
            edges.push(vec![hex(pair[0].pc), hex(pair[1].pc)]);
        }
        for succ in &block.succs {
            edges.push(vec![hex(block.last_pc()), hex(graph.block(*succ).first_pc())]);
        }
    }

    write_relation(dir, "op", op_rows)?;
    write_relation(dir, "defined", defined)?;
    write_relation(dir, "read", read)?;
    write_relation(dir, "write", write)?;
    write_relation(dir, "edge", edges)?;
    write_relation(dir, "block", blocks)?;

    let start: Vec<Vec<String>> = graph
        .entry_block()
        .map(|id| vec![vec![hex(graph.block(id).first_pc())]])
        .unwrap_or_default();
    let end: Vec<Vec<String>> = graph
        .blocks
        .iter()
        .map(|b| b.last_pc())
        .max()
        .map(|pc| vec![vec![hex(pc)]])
        .unwrap_or_default();
    write_relation(dir, "start", start)?;
    write_relation(dir, "end", end)?;

    if with_dominators {
        let doms = dominators::dominators(graph);
        let pdoms = dominators::postdominators(graph);
        write_relation(dir, "dom", dominance_rows(graph, &doms))?;
        write_relation(dir, "imdom", idom_rows(graph, &doms))?;
        write_relation(dir, "pdom", dominance_rows(graph, &pdoms))?;
        write_relation(dir, "impdom", idom_rows(graph, &pdoms))?;
    }
    Ok(())
}

/// The opaque location a load reads through, keyed by its address operand.
fn read_location(op: &TACOp) -> Option<Location> {
    match op.opcode.code {
        c if c == opcodes::MLOAD.code => Some(Location::Memory(op.args[0])),
        c if c == opcodes::SLOAD.code => Some(Location::Storage(op.args[0])),
        c if c == opcodes::CALLDATALOAD.code => Some(Location::Calldata(op.args[0])),
        _ => None,
    }
}

fn dominance_rows(graph: &TACGraph, dominance: &Dominance) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for block in &graph.blocks {
        for dom in &dominance.dom[block.id.0] {
            if *dom != block.id {
                rows.push(vec![hex(block.entry), hex(graph.block(*dom).entry)]);
            }
        }
    }
    rows
}

fn idom_rows(graph: &TACGraph, dominance: &Dominance) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for block in &graph.blocks {
        if let Some(idom) = dominance.idom[block.id.0] {
            rows.push(vec![hex(block.entry), hex(graph.block(idom).entry)]);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{analyse, AnalysisConfig};
    use crate::evm_cfg::ControlFlowGraph;
    use crate::logger::Ctx;
    use crate::parser::{Parser, Source};
    use tempfile::tempdir;

    fn pipeline(hex_str: &str) -> (Vec<EVMOp>, TACGraph, VarPool) {
        let ctx = Ctx::default();
        let ops = Parser::new(false)
            .parse(Source::Hex(hex_str.into()), &ctx)
            .unwrap();
        let mut cfg = ControlFlowGraph::from_ops(ops.clone());
        let mut pool = VarPool::new();
        analyse(&mut cfg, &mut pool, &AnalysisConfig::default(), &ctx).unwrap();
        (ops, TACGraph::from_cfg(&cfg), pool)
    }

    fn read_facts(dir: &Path, name: &str) -> Vec<String> {
        let text = fs::read_to_string(dir.join(format!("{name}.facts"))).unwrap();
        text.lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn empty_contract_writes_empty_relations() {
        let (ops, graph, pool) = pipeline("");
        let dir = tempdir().unwrap();
        export_instruction_facts(&ops, dir.path(), None).unwrap();
        export_tac_facts(&graph, &pool, dir.path(), false).unwrap();

        assert!(read_facts(dir.path(), "op").is_empty());
        assert!(read_facts(dir.path(), "start").is_empty());
        assert!(read_facts(dir.path(), "end").is_empty());
        assert!(read_facts(dir.path(), "Statement_Next").is_empty());
    }

    #[test]
    fn constant_return_relations() {
        let (ops, graph, pool) = pipeline("60016000526001601ff3");
        let dir = tempdir().unwrap();
        export_instruction_facts(&ops, dir.path(), None).unwrap();
        export_tac_facts(&graph, &pool, dir.path(), false).unwrap();

        // Each PUSH statement row carries pc and immediate.
        let push1 = read_facts(dir.path(), "PUSH1");
        assert_eq!(push1.len(), 4);
        assert!(push1.contains(&"0x7\t0x1f".to_string()));

        // Each PUSH defined a fresh variable.
        let defined = read_facts(dir.path(), "defined");
        assert_eq!(defined.len(), 4);

        // The MSTORE wrote a memory location, not a variable.
        let write = read_facts(dir.path(), "write");
        assert!(write.iter().any(|row| row.starts_with("0x4\tM[")));

        assert_eq!(read_facts(dir.path(), "start"), ["0x0"]);
        assert_eq!(read_facts(dir.path(), "end"), ["0x9"]);
    }

    #[test]
    fn jump_edges_are_exported() {
        let (ops, graph, pool) = pipeline("6005565b00");
        let dir = tempdir().unwrap();
        export_instruction_facts(&ops, dir.path(), None).unwrap();
        export_tac_facts(&graph, &pool, dir.path(), true).unwrap();

        let edges = read_facts(dir.path(), "edge");
        // intra-block CONST -> JUMP, inter-block JUMP -> JUMPDEST (as NOP),
        // and NOP -> STOP.
        assert!(edges.contains(&"0x0\t0x2".to_string()));
        assert!(edges.contains(&"0x2\t0x5".to_string()));
        assert!(edges.contains(&"0x5\t0x6".to_string()));

        let imdom = read_facts(dir.path(), "imdom");
        assert_eq!(imdom, ["0x5\t0x0"]);
    }

    #[test]
    fn out_opcodes_restricts_statement_files() {
        let (ops, _, _) = pipeline("6005565b00");
        let dir = tempdir().unwrap();
        export_instruction_facts(&ops, dir.path(), Some(&["JUMP".to_string()])).unwrap();

        assert!(dir.path().join("JUMP.facts").exists());
        assert!(dir.path().join("MISSING.facts").exists());
        assert!(!dir.path().join("PUSH1.facts").exists());
        // Property relations are not restricted.
        assert!(dir.path().join("OpcodeStackDelta.facts").exists());
    }

    #[test]
    fn statement_ordering_is_by_pc() {
        let (ops, _, _) = pipeline("60016000526001601ff3");
        let dir = tempdir().unwrap();
        export_instruction_facts(&ops, dir.path(), None).unwrap();
        let next = read_facts(dir.path(), "Statement_Next");
        assert!(next.contains(&"0x0\t0x2".to_string()));
        assert!(next.contains(&"0x7\t0x9".to_string()));
        assert_eq!(next.len(), ops.len() - 1);
    }

    #[test]
    fn export_is_idempotent() {
        let hex_str = "600f6000600d57506011600d565b565b005b00";
        let (ops, graph, pool) = pipeline(hex_str);

        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        for dir in [&first, &second] {
            export_instruction_facts(&ops, dir.path(), None).unwrap();
            export_tac_facts(&graph, &pool, dir.path(), true).unwrap();
        }

        let mut names: Vec<String> = fs::read_dir(first.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert!(!names.is_empty());
        for name in names {
            let a = fs::read(first.path().join(&name)).unwrap();
            let b = fs::read(second.path().join(&name)).unwrap();
            assert_eq!(a, b, "{name} differs between runs");
        }
    }
}

// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use eyre::{eyre, Result, WrapErr};
use std::fs;
use std::io::Read;

use crate::dataflow::{self, AnalysisConfig};
use crate::evm_cfg::ControlFlowGraph;
use crate::exporter;
use crate::logger::{greyln, Ctx};
use crate::memtypes::VarPool;
use crate::parser::{Parser, Source};
use crate::tac_cfg::TACGraph;
use crate::DecompileConfig;

/// Runs the whole pipeline for one contract: parse, build blocks, analyse
/// to a fixed point, lower to TAC, and write both fact families.
pub fn decompile(cfg: &DecompileConfig, ctx: &Ctx) -> Result<()> {
    let text = read_input(&cfg.input)?;
    let source = if cfg.disasm {
        Source::DisasmLines(text.lines().map(str::to_owned).collect())
    } else {
        Source::Hex(text)
    };

    let parser = Parser::new(cfg.common.strict);
    let ops = parser
        .parse(source, ctx)
        .map_err(|e| eyre!("failed to parse input: {e}"))?;

    let mut graph = ControlFlowGraph::from_ops(ops.clone());
    let mut pool = VarPool::new();
    let analysis = AnalysisConfig {
        max_iter: cfg.max_iter,
        bailout_seconds: cfg.bailout_seconds,
        value_set_bound: cfg.value_set_bound,
        max_clone_depth: cfg.max_clone_depth,
    };
    dataflow::analyse(&mut graph, &mut pool, &analysis, ctx)
        .wrap_err("decompiler invariant broken")?;

    let tac = TACGraph::from_cfg(&graph);
    ctx.log_low(&format!(
        "analysis allocated {} variables across {} blocks",
        pool.len(),
        graph.len()
    ));

    exporter::export_instruction_facts(&ops, &cfg.out_dir, cfg.out_opcodes.as_deref())?;
    exporter::export_tac_facts(&tac, &pool, &cfg.out_dir, cfg.dominators)?;

    let unresolved = tac.blocks.iter().filter(|b| b.has_unresolved_jump).count();
    greyln!(
        "decompiled {} ops into {} blocks ({} unresolved), facts in {}",
        ops.len(),
        tac.len(),
        unresolved,
        cfg.out_dir.display()
    );
    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .wrap_err("failed to read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(input).wrap_err_with(|| format!("failed to read {input}"))
}

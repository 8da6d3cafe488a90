// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use eyre::{eyre, Result, WrapErr};
use std::io::Read;

use crate::evm_cfg::ControlFlowGraph;
use crate::logger::Ctx;
use crate::parser::{Parser, Source};
use crate::stacksize::{self, block_stack_delta};
use crate::Dis2bbConfig;

/// Reads disassembly on stdin and prints each basic block bracketed by its
/// meet-over-paths entry and exit stack depths.
pub fn dis2bb(cfg: &Dis2bbConfig, ctx: &Ctx) -> Result<()> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .wrap_err("failed to read stdin")?;

    let lines: Vec<String> = text.lines().map(str::to_owned).collect();
    let ops = Parser::new(cfg.common.strict)
        .parse(Source::DisasmLines(lines), ctx)
        .map_err(|e| eyre!("failed to parse disassembly: {e}"))?;

    let graph = ControlFlowGraph::from_ops(ops);
    let sizes = stacksize::run_analysis(&graph);

    for block in &graph.blocks {
        println!("Entry stack: {}", sizes.entry[block.id.0]);
        print!("{block}");
        println!("{} stack elements added.", block_stack_delta(block));
        println!("Exit stack: {}", sizes.exit[block.id.0]);
        println!();
    }
    Ok(())
}

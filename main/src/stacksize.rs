// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

//! A cheap meet-over-paths pass over stack depths alone. Purely diagnostic:
//! it never feeds back into decompilation, it only annotates blocks for
//! `dis2bb` and the exporter's diagnostics.

use std::collections::VecDeque;
use std::fmt;

use crate::evm_cfg::{BlockId, ControlFlowGraph, EVMBasicBlock};

/// Stack depth at a block boundary: unreachable, a known depth, or varying
/// by path.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Depth {
    Bottom,
    Known(isize),
    Top,
}

impl Depth {
    /// Equality-or-unknown join; unreachable is the identity.
    fn join(self, other: Self) -> Self {
        match (self, other) {
            (Self::Bottom, d) | (d, Self::Bottom) => d,
            (Self::Known(a), Self::Known(b)) if a == b => Self::Known(a),
            _ => Self::Top,
        }
    }

    fn add(self, delta: isize) -> Self {
        match self {
            Self::Known(n) => Self::Known(n + delta),
            other => other,
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bottom => write!(f, "_"),
            Self::Known(n) => write!(f, "{n}"),
            Self::Top => write!(f, "??"),
        }
    }
}

/// Per-block entry and exit depths after the fixed point.
pub struct StackSizes {
    pub entry: Vec<Depth>,
    pub exit: Vec<Depth>,
}

/// Net stack growth across a block.
pub fn block_stack_delta(block: &EVMBasicBlock) -> isize {
    block.ops.iter().map(|op| op.opcode.stack_delta()).sum()
}

/// Computes the meet-over-paths depth at every block boundary. The entry
/// block starts from depth zero, as if preceded by a block that does
/// nothing; blocks with no predecessors otherwise have unknown entries.
pub fn run_analysis(cfg: &ControlFlowGraph) -> StackSizes {
    let deltas: Vec<isize> = cfg.blocks.iter().map(block_stack_delta).collect();
    let mut entry = vec![Depth::Bottom; cfg.len()];
    let mut exit = vec![Depth::Bottom; cfg.len()];

    let mut queue: VecDeque<BlockId> = cfg.blocks.iter().map(|b| b.id).collect();
    while let Some(id) = queue.pop_front() {
        let block = cfg.block(id);
        let mut new_entry = if Some(id) == cfg.entry_block() {
            Depth::Known(0)
        } else if block.preds.is_empty() {
            Depth::Top
        } else {
            Depth::Bottom
        };
        for &pred in &block.preds {
            new_entry = new_entry.join(exit[pred.0]);
        }

        if new_entry != entry[id.0] {
            entry[id.0] = new_entry;
            exit[id.0] = new_entry.add(deltas[id.0]);
            queue.extend(block.succs.iter().copied());
        }
    }

    StackSizes { entry, exit }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Ctx;
    use crate::parser::{Parser, Source};

    fn cfg_from_hex(hex: &str) -> ControlFlowGraph {
        let ops = Parser::new(false)
            .parse(Source::Hex(hex.into()), &Ctx::default())
            .unwrap();
        ControlFlowGraph::from_ops(ops)
    }

    #[test]
    fn deltas_sum_opcode_deltas() {
        // PUSH1 1; PUSH1 0; MSTORE; PUSH1 1; PUSH1 0x1f; RETURN
        let cfg = cfg_from_hex("60016000526001601ff3");
        assert_eq!(block_stack_delta(cfg.block(cfg.entry_block().unwrap())), 0);
    }

    #[test]
    fn depths_propagate_along_fall_through() {
        // PUSH1 1; PUSH1 0; PUSH1 9; JUMPI; STOP
        let cfg = cfg_from_hex("6001600060095700");
        let sizes = run_analysis(&cfg);
        assert_eq!(sizes.entry[0], Depth::Known(0));
        assert_eq!(sizes.exit[0], Depth::Known(1));
        assert_eq!(sizes.entry[1], Depth::Known(1));
    }

    #[test]
    fn unreached_jumpdest_has_unknown_entry() {
        // PUSH1 5; JUMP; JUMPDEST; STOP — no jump edges at this stage.
        let cfg = cfg_from_hex("6005565b00");
        let sizes = run_analysis(&cfg);
        assert_eq!(sizes.entry[1], Depth::Top);
    }

    #[test]
    fn joins_conflicting_depths_to_top() {
        // PUSH1 0; PUSH1 7; JUMPI | PUSH1 1 | JUMPDEST; STOP
        let mut cfg = cfg_from_hex("600060075760015b00");
        // Wire the jump edge by hand so the JUMPDEST has two predecessors
        // whose exit depths disagree (0 via the jump, 1 via fall-through).
        use crate::evm_cfg::BlockId;
        cfg.add_edge(BlockId(0), BlockId(2));
        let sizes = run_analysis(&cfg);
        assert_eq!(sizes.exit[0], Depth::Known(0));
        assert_eq!(sizes.exit[1], Depth::Known(1));
        assert_eq!(sizes.entry[2], Depth::Top);
    }
}

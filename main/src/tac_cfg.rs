// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use std::collections::BTreeSet;
use std::fmt;

use crate::evm_cfg::{BlockId, ControlFlowGraph, Def, OpEffect};
use crate::memtypes::{VarId, VarPool};
use crate::opcodes::{self, Opcode};

/// A three-address operation. Value-producing EVM ops become assignments
/// to the variable their pc defined on the abstract stack; store ops write
/// a location instead; terminators carry only their popped arguments.
#[derive(Clone, Debug)]
pub struct TACOp {
    pub pc: usize,
    pub opcode: Opcode,
    pub args: Vec<VarId>,
    pub def: Option<Def>,
}

impl TACOp {
    /// The defined SSA variable, if this op assigns one.
    pub fn lhs(&self) -> Option<VarId> {
        match self.def {
            Some(Def::Var(var)) => Some(var),
            _ => None,
        }
    }
}

impl fmt::Display for TACOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: ", self.pc)?;
        match self.def {
            Some(Def::Var(var)) => write!(f, "{var} = ")?,
            Some(Def::Loc(loc)) => write!(f, "{loc} = ")?,
            None => {}
        }
        write!(f, "{}", self.opcode)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The TAC rendering of one EVM basic block. Keeps the id of the EVM block
/// it came from; for a cloned block that is the clone's original.
#[derive(Clone, Debug)]
pub struct TACBasicBlock {
    pub id: BlockId,
    pub entry: usize,
    pub exit: usize,
    pub ops: Vec<TACOp>,
    pub preds: BTreeSet<BlockId>,
    pub succs: BTreeSet<BlockId>,
    pub origin: BlockId,
    pub has_unresolved_jump: bool,
}

impl TACBasicBlock {
    /// pc of the first remaining op, or the block entry when everything
    /// lowered away.
    pub fn first_pc(&self) -> usize {
        self.ops.first().map(|op| op.pc).unwrap_or(self.entry)
    }

    pub fn last_pc(&self) -> usize {
        self.ops.last().map(|op| op.pc).unwrap_or(self.exit)
    }
}

/// The whole contract in TAC form, mirroring the refined EVM CFG's blocks
/// and edges one for one. Immutable once built; the exporter only reads.
#[derive(Debug, Default)]
pub struct TACGraph {
    pub blocks: Vec<TACBasicBlock>,
}

impl TACGraph {
    /// Lowers a stable EVM CFG. Stack shuffles (PUSH/DUP/SWAP/POP) exist
    /// only to route SSA variables and disappear here, except that a PUSH
    /// becomes the constant assignment of its variable and a JUMPDEST is
    /// kept as a NOP anchoring the block's entry pc.
    pub fn from_cfg(cfg: &ControlFlowGraph) -> Self {
        let blocks = cfg
            .blocks
            .iter()
            .map(|block| TACBasicBlock {
                id: block.id,
                entry: block.entry(),
                exit: block.exit(),
                ops: block.effects.iter().filter_map(lower).collect(),
                preds: block.preds.clone(),
                succs: block.succs.clone(),
                origin: block.origin.unwrap_or(block.id),
                has_unresolved_jump: block.has_unresolved_jump,
            })
            .collect();
        Self { blocks }
    }

    pub fn block(&self, id: BlockId) -> &TACBasicBlock {
        &self.blocks[id.0]
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn lower(effect: &OpEffect) -> Option<TACOp> {
    let code = effect.opcode;
    if code.is_push() {
        return Some(TACOp {
            pc: effect.pc,
            opcode: opcodes::CONST,
            args: Vec::new(),
            def: effect.def,
        });
    }
    if code.is_dup() || code.is_swap() || code == opcodes::POP {
        return None;
    }
    if code == opcodes::JUMPDEST {
        return Some(TACOp {
            pc: effect.pc,
            opcode: opcodes::NOP,
            args: Vec::new(),
            def: None,
        });
    }
    Some(TACOp {
        pc: effect.pc,
        opcode: code,
        args: effect.args.clone(),
        def: effect.def,
    })
}

/// Checks that every argument of every op is a constant, has at least one
/// definition site, or stands for a slot of unknown origin below the
/// modelled stack. Used by tests and debug assertions.
pub fn args_are_defined(graph: &TACGraph, pool: &VarPool) -> bool {
    graph.blocks.iter().all(|block| {
        block.ops.iter().all(|op| {
            op.args.iter().all(|arg| {
                let var = pool.get(*arg);
                var.value.single().is_some() || !var.def_sites.is_empty() || var.value.is_top()
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{analyse, AnalysisConfig};
    use crate::logger::Ctx;
    use crate::parser::{Parser, Source};

    fn tac_from_hex(hex: &str) -> (TACGraph, VarPool) {
        let ctx = Ctx::default();
        let ops = Parser::new(false)
            .parse(Source::Hex(hex.into()), &ctx)
            .unwrap();
        let mut cfg = ControlFlowGraph::from_ops(ops);
        let mut pool = VarPool::new();
        analyse(&mut cfg, &mut pool, &AnalysisConfig::default(), &ctx).unwrap();
        (TACGraph::from_cfg(&cfg), pool)
    }

    #[test]
    fn empty_cfg_lowers_to_empty_graph() {
        let (graph, pool) = tac_from_hex("");
        assert!(graph.is_empty());
        assert_eq!(graph.entry_block(), None);
        assert!(pool.is_empty());
    }

    #[test]
    fn constant_return_lowers_to_assignments() {
        // PUSH1 1; PUSH1 0; MSTORE; PUSH1 1; PUSH1 0x1f; RETURN
        let (graph, pool) = tac_from_hex("60016000526001601ff3");
        assert_eq!(graph.len(), 1);
        let block = graph.block(graph.entry_block().unwrap());

        let names: Vec<&str> = block.ops.iter().map(|op| op.opcode.name).collect();
        assert_eq!(names, ["CONST", "CONST", "MSTORE", "CONST", "CONST", "RETURN"]);

        // The MSTORE writes a memory location keyed by its address variable
        // and defines no SSA variable.
        let mstore = &block.ops[2];
        assert!(mstore.lhs().is_none());
        assert!(matches!(
            mstore.def,
            Some(Def::Loc(crate::memtypes::Location::Memory(_)))
        ));

        // Each CONST assigns the variable its PUSH defined.
        for op in block.ops.iter().filter(|op| op.opcode == opcodes::CONST) {
            let lhs = op.lhs().unwrap();
            assert!(pool.value(lhs).single().is_some());
            assert_eq!(pool.get(lhs).def_sites, BTreeSet::from([op.pc]));
        }

        // The terminator carries its popped arguments.
        let ret = block.ops.last().unwrap();
        assert_eq!(ret.opcode, opcodes::RETURN);
        assert_eq!(ret.args.len(), 2);
        assert!(args_are_defined(&graph, &pool));
    }

    #[test]
    fn shuffles_vanish_and_jumpdest_stays() {
        // PUSH1 5; JUMP; JUMPDEST; STOP
        let (graph, _) = tac_from_hex("6005565b00");
        let jumper = graph.block(BlockId(0));
        let names: Vec<&str> = jumper.ops.iter().map(|op| op.opcode.name).collect();
        assert_eq!(names, ["CONST", "JUMP"]);

        let dest = graph.block(BlockId(1));
        let names: Vec<&str> = dest.ops.iter().map(|op| op.opcode.name).collect();
        assert_eq!(names, ["NOP", "STOP"]);
        assert_eq!(dest.first_pc(), 5);
    }

    #[test]
    fn dup_swap_pop_leave_no_ops() {
        // PUSH1 1; DUP1; SWAP1; POP; POP; STOP
        let (graph, _) = tac_from_hex("6001809050505000");
        let block = graph.block(BlockId(0));
        let names: Vec<&str> = block.ops.iter().map(|op| op.opcode.name).collect();
        assert_eq!(names, ["CONST", "STOP"]);
    }

    #[test]
    fn graph_mirrors_evm_edges() {
        let (graph, _) = tac_from_hex("6005565b00");
        assert!(graph.block(BlockId(0)).succs.contains(&BlockId(1)));
        assert!(graph.block(BlockId(1)).preds.contains(&BlockId(0)));
    }

    #[test]
    fn jumpi_terminator_has_dest_and_condition() {
        // PUSH1 1; PUSH1 6; JUMPI; STOP; JUMPDEST; STOP
        let (graph, pool) = tac_from_hex("6001600657005b00");
        let jumper = graph.block(BlockId(0));
        let jumpi = jumper.ops.last().unwrap();
        assert_eq!(jumpi.opcode, opcodes::JUMPI);
        assert_eq!(jumpi.args.len(), 2);
        assert_eq!(
            pool.value(jumpi.args[0]).single(),
            Some(alloy_primitives::U256::from(6))
        );
        assert_eq!(
            pool.value(jumpi.args[1]).single(),
            Some(alloy_primitives::U256::from(1))
        );
    }
}

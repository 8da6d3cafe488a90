// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use alloy_primitives::U256;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::memtypes::{AbstractStack, InternalInvariant, Location, VarId};
use crate::opcodes::Opcode;

/// Stable identifier of a block within its CFG's arena. Edges are sets of
/// ids rather than references, so the cyclic pred/succ structure owns
/// nothing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A single parsed EVM operation. The pc is the byte offset of the
/// operation's first byte within the contract.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EVMOp {
    pub pc: usize,
    pub opcode: Opcode,
    pub value: Option<U256>,
}

impl EVMOp {
    pub fn new(pc: usize, opcode: Opcode, value: Option<U256>) -> Self {
        Self { pc, opcode, value }
    }
}

impl fmt::Display for EVMOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{:#x}: {} {:#x}", self.pc, self.opcode, value),
            None => write!(f, "{:#x}: {}", self.pc, self.opcode),
        }
    }
}

/// What a variable-producing operation defined: an SSA variable, or an
/// opaque store location for memory and storage writes.
#[derive(Clone, Copy, Debug)]
pub enum Def {
    Var(VarId),
    Loc(Location),
}

/// The symbolic result of interpreting one operation: the variables it
/// consumed and the definition it produced, if any. Recorded during the
/// final abstract-interpretation pass and consumed by the TAC converter.
#[derive(Clone, Debug)]
pub struct OpEffect {
    pub pc: usize,
    pub opcode: Opcode,
    pub args: Vec<VarId>,
    pub def: Option<Def>,
}

/// A maximal straight-line run of operations: only the last may alter
/// control flow, and a JUMPDEST may only appear first.
#[derive(Clone, Debug)]
pub struct EVMBasicBlock {
    pub id: BlockId,
    pub ops: Vec<EVMOp>,
    pub preds: BTreeSet<BlockId>,
    pub succs: BTreeSet<BlockId>,
    pub entry_stack: AbstractStack,
    pub exit_stack: AbstractStack,
    /// Set when this block ends in a JUMP/JUMPI whose target is still
    /// unknown after the fixed point.
    pub has_unresolved_jump: bool,
    pub effects: Vec<OpEffect>,
    /// How many slots below the visible entry prefix the block consumed
    /// during its last evaluation. The block's true entry depth is
    /// `entry_stack.len() + pads_used`.
    pub pads_used: usize,
    /// The block this one was cloned from, if any.
    pub origin: Option<BlockId>,
    /// How many rounds of cloning produced this block.
    pub clone_depth: usize,
    // Per-pc definition variables, kept so identities are stable across
    // interpretation passes.
    pub(crate) def_cache: BTreeMap<usize, VarId>,
    // Entry-stack merge variables, keyed by slot index from the top.
    pub(crate) merge_cache: BTreeMap<usize, VarId>,
    // Variables standing in for slots below the visible entry prefix.
    pub(crate) pad_cache: Vec<VarId>,
}

impl EVMBasicBlock {
    fn new(id: BlockId, ops: Vec<EVMOp>) -> Self {
        Self {
            id,
            ops,
            preds: BTreeSet::new(),
            succs: BTreeSet::new(),
            entry_stack: AbstractStack::unknown(),
            exit_stack: AbstractStack::unknown(),
            has_unresolved_jump: false,
            effects: Vec::new(),
            pads_used: 0,
            origin: None,
            clone_depth: 0,
            def_cache: BTreeMap::new(),
            merge_cache: BTreeMap::new(),
            pad_cache: Vec::new(),
        }
    }

    /// pc of the first operation.
    pub fn entry(&self) -> usize {
        self.ops[0].pc
    }

    /// pc of the last operation.
    pub fn exit(&self) -> usize {
        self.ops[self.ops.len() - 1].pc
    }

    pub fn last_op(&self) -> &EVMOp {
        &self.ops[self.ops.len() - 1]
    }

    /// Whether this block may legally be the target of a jump.
    pub fn is_jumpdest(&self) -> bool {
        self.ops[0].opcode == crate::opcodes::JUMPDEST
    }

    pub fn ends_in_jump(&self) -> bool {
        self.last_op().opcode.is_jump()
    }
}

impl fmt::Display for EVMBasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            writeln!(f, "{op}")?;
        }
        Ok(())
    }
}

/// The control-flow graph of one contract: an arena of blocks plus the
/// edge relation cached as per-block pred/succ sets.
#[derive(Default, Debug)]
pub struct ControlFlowGraph {
    pub blocks: Vec<EVMBasicBlock>,
}

impl ControlFlowGraph {
    /// Splits an operation stream into basic blocks and wires fall-through
    /// edges. Jump edges are left for the dataflow refiner.
    ///
    /// A block starts at the first op, at any JUMPDEST, and immediately
    /// after any flow-altering op. A fall-through edge connects a block to
    /// its successor-in-sequence when it ends in JUMPI or in an op that
    /// does not alter flow.
    pub fn from_ops(ops: Vec<EVMOp>) -> Self {
        let mut cfg = Self::default();
        if ops.is_empty() {
            return cfg;
        }

        let mut current: Vec<EVMOp> = Vec::new();
        for op in ops {
            if op.opcode == crate::opcodes::JUMPDEST && !current.is_empty() {
                cfg.push_block(std::mem::take(&mut current));
            }
            let ends_block = op.opcode.alters_flow();
            current.push(op);
            if ends_block {
                cfg.push_block(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            cfg.push_block(current);
        }

        // Fall-through edges, including after JUMPI.
        for i in 1..cfg.blocks.len() {
            let prev = &cfg.blocks[i - 1];
            let last = prev.last_op().opcode;
            if last == crate::opcodes::JUMPI || !last.alters_flow() {
                let (a, b) = (prev.id, cfg.blocks[i].id);
                cfg.add_edge(a, b);
            }
        }
        cfg
    }

    fn push_block(&mut self, ops: Vec<EVMOp>) {
        let id = BlockId(self.blocks.len());
        self.blocks.push(EVMBasicBlock::new(id, ops));
    }

    /// Appends a clone of `source` wired to no one; the caller rewires
    /// edges. The clone shares the op list but starts with fresh caches so
    /// its definitions get their own identities.
    pub fn add_clone(&mut self, source: BlockId) -> BlockId {
        let id = BlockId(self.blocks.len());
        let src = &self.blocks[source.0];
        let mut block = EVMBasicBlock::new(id, src.ops.clone());
        block.origin = Some(src.origin.unwrap_or(source));
        block.clone_depth = src.clone_depth + 1;
        self.blocks.push(block);
        id
    }

    pub fn block(&self, id: BlockId) -> &EVMBasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut EVMBasicBlock {
        &mut self.blocks[id.0]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The block holding the contract's first operation.
    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.id)
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) -> bool {
        let fresh = self.blocks[from.0].succs.insert(to);
        self.blocks[to.0].preds.insert(from);
        fresh
    }

    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.0].succs.remove(&to);
        self.blocks[to.0].preds.remove(&from);
    }

    /// Maps each JUMPDEST pc to the original (never cloned) block that
    /// starts there.
    pub fn jumpdest_index(&self) -> BTreeMap<usize, BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.origin.is_none() && b.is_jumpdest())
            .map(|b| (b.entry(), b.id))
            .collect()
    }

    /// Block ids in reverse postorder from the entry, with any unreachable
    /// blocks appended afterwards in arena order.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut work: Vec<(BlockId, bool)> = Vec::new();
        if let Some(entry) = self.entry_block() {
            work.push((entry, false));
        }
        while let Some((id, expanded)) = work.pop() {
            if expanded {
                postorder.push(id);
                continue;
            }
            if visited[id.0] {
                continue;
            }
            visited[id.0] = true;
            work.push((id, true));
            for &succ in &self.blocks[id.0].succs {
                if !visited[succ.0] {
                    work.push((succ, false));
                }
            }
        }
        postorder.reverse();
        for block in &self.blocks {
            if !visited[block.id.0] {
                postorder.push(block.id);
            }
        }
        postorder
    }

    /// Verifies that the pred and succ sets mirror each other.
    pub fn check_consistency(&self) -> Result<(), InternalInvariant> {
        for block in &self.blocks {
            for &succ in &block.succs {
                if !self.blocks[succ.0].preds.contains(&block.id) {
                    return Err(InternalInvariant::EdgeAsymmetry(block.id.0, succ.0));
                }
            }
            for &pred in &block.preds {
                if !self.blocks[pred.0].succs.contains(&block.id) {
                    return Err(InternalInvariant::EdgeAsymmetry(pred.0, block.id.0));
                }
            }
        }
        Ok(())
    }
}

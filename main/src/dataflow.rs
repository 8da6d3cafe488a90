// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

//! The decompiler's fixed point: symbolic per-block stack evaluation
//! alternating with edge refinement, until neither stacks nor the graph
//! change. Resolving a jump can add edges, which invalidates entry stacks,
//! which can resolve further jumps; both passes therefore tolerate a CFG
//! that mutated since the previous round.

use alloy_primitives::U256;
use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use crate::constants::{DEFAULT_MAX_CLONE_DEPTH, DEFAULT_VALUE_SET_BOUND};
use crate::evm_cfg::{BlockId, ControlFlowGraph, Def, EVMBasicBlock, OpEffect};
use crate::lattice::Value;
use crate::logger::Ctx;
use crate::memtypes::{AbstractStack, InternalInvariant, Location, VarId, VarPool};
use crate::opcodes;

/// Knobs bounding the fixed point. `max_iter` and `bailout_seconds` cut the
/// outer loop short; the analysis then keeps whatever it has resolved and
/// flags the rest.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub max_iter: Option<usize>,
    pub bailout_seconds: Option<u64>,
    /// Cardinality bound on tracked value sets; larger is more precise and
    /// more expensive.
    pub value_set_bound: usize,
    /// How many rounds of predecessor-context cloning a block may undergo.
    pub max_clone_depth: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_iter: None,
            bailout_seconds: None,
            value_set_bound: DEFAULT_VALUE_SET_BOUND,
            max_clone_depth: DEFAULT_MAX_CLONE_DEPTH,
        }
    }
}

/// Runs the analysis to a fixed point (or a configured bound), leaving the
/// CFG with resolved jump edges, per-block entry/exit stacks, recorded op
/// effects, and `has_unresolved_jump` flags.
pub fn analyse(
    cfg: &mut ControlFlowGraph,
    pool: &mut VarPool,
    config: &AnalysisConfig,
    ctx: &Ctx,
) -> Result<(), InternalInvariant> {
    if cfg.is_empty() {
        return Ok(());
    }

    let started = Instant::now();
    let mut reported: BTreeSet<(usize, U256)> = BTreeSet::new();
    let mut outer = 0usize;
    loop {
        if config.max_iter.is_some_and(|limit| outer >= limit) {
            ctx.warning(&format!(
                "analysis stopped after {outer} iterations without reaching a fixed point"
            ));
            break;
        }
        if config
            .bailout_seconds
            .is_some_and(|secs| started.elapsed() >= Duration::from_secs(secs))
        {
            ctx.warning("analysis bailed out on its time budget");
            break;
        }

        interpret_pass(cfg, pool, config)?;
        ctx.log_high(&format!(
            "pass {}: {} blocks, {} variables",
            outer + 1,
            cfg.len(),
            pool.len()
        ));
        if !refine_edges(cfg, pool, config, ctx, &mut reported) {
            break;
        }
        outer += 1;
    }

    mark_unresolved(cfg, pool, ctx);
    cfg.check_consistency()
}

/// Worklist evaluation of every block in reverse postorder, re-queueing
/// successors of any block whose stacks or definition values moved.
fn interpret_pass(
    cfg: &mut ControlFlowGraph,
    pool: &mut VarPool,
    config: &AnalysisConfig,
) -> Result<(), InternalInvariant> {
    let order = cfg.reverse_postorder();
    let mut queued = vec![true; cfg.len()];
    let mut queue: VecDeque<BlockId> = order.into();

    while let Some(id) = queue.pop_front() {
        queued[id.0] = false;
        if interpret_block(cfg, pool, id, config.value_set_bound)? {
            let succs: Vec<BlockId> = cfg.block(id).succs.iter().copied().collect();
            for succ in succs {
                if !queued[succ.0] {
                    queued[succ.0] = true;
                    queue.push_back(succ);
                }
            }
        }
    }
    Ok(())
}

fn interpret_block(
    cfg: &mut ControlFlowGraph,
    pool: &mut VarPool,
    id: BlockId,
    bound: usize,
) -> Result<bool, InternalInvariant> {
    let is_entry = cfg.entry_block() == Some(id);
    let mut pred_stacks: Vec<AbstractStack> = {
        let block = cfg.block(id);
        block
            .preds
            .iter()
            .map(|p| cfg.block(*p).exit_stack.clone())
            .collect()
    };
    // Execution also reaches the entry block from the program start with an
    // empty stack, even when it has in-edges.
    if is_entry && !pred_stacks.is_empty() {
        pred_stacks.push(AbstractStack::empty());
    }

    let mut values_changed = false;
    let block = cfg.block_mut(id);
    let entry = join_entry(block, &pred_stacks, is_entry, pool, bound, &mut values_changed)?;
    let (exit, effects, pads_used) = transfer(block, entry.clone(), pool, bound, &mut values_changed)?;

    let entry_changed = block.entry_stack != entry;
    let exit_changed = block.exit_stack != exit;
    block.entry_stack = entry;
    block.exit_stack = exit;
    block.effects = effects;
    block.pads_used = pads_used;
    Ok(entry_changed || exit_changed || values_changed)
}

/// Pointwise join of the predecessors' exit stacks. Slots on which every
/// predecessor agrees keep their variable's identity; disagreeing slots get
/// a merge variable (stable per slot) whose value and definition sites are
/// the join. Shorter stacks are padded below with unknowns.
fn join_entry(
    block: &mut EVMBasicBlock,
    preds: &[AbstractStack],
    is_entry: bool,
    pool: &mut VarPool,
    bound: usize,
    values_changed: &mut bool,
) -> Result<AbstractStack, InternalInvariant> {
    if preds.is_empty() {
        // Execution starts on an empty stack; anything else unreached by an
        // edge has an unknown one.
        return Ok(if is_entry {
            AbstractStack::empty()
        } else {
            AbstractStack::unknown()
        });
    }

    let depth = preds.iter().map(AbstractStack::len).max().unwrap_or(0);
    let empty_bottom = preds.iter().all(|s| s.empty_bottom() && s.len() == depth);

    let mut items = Vec::with_capacity(depth);
    for slot in 0..depth {
        let vars: Vec<Option<VarId>> = preds.iter().map(|s| s.peek(slot)).collect();
        if let Some(first) = vars[0] {
            if vars.iter().all(|v| *v == Some(first)) {
                items.push(first);
                continue;
            }
        }

        let merge = *block
            .merge_cache
            .entry(slot)
            .or_insert_with(|| pool.new_var(Value::Bottom, BTreeSet::new()));
        let mut value = Value::Bottom;
        let mut sites = BTreeSet::new();
        for var in &vars {
            match var {
                Some(var) => {
                    value = value.join(pool.value(*var), bound);
                    sites.extend(pool.get(*var).def_sites.iter().copied());
                }
                None => value = value.join(&Value::Top, bound),
            }
        }
        *values_changed |= pool.set_value(merge, value);
        pool.add_def_sites(merge, &sites);
        items.push(merge);
    }
    Ok(AbstractStack::from_items(items, empty_bottom))
}

fn pad_var(pool: &mut VarPool, cache: &mut Vec<VarId>, next: &mut usize) -> VarId {
    let var = if *next < cache.len() {
        cache[*next]
    } else {
        let var = pool.fresh_top();
        cache.push(var);
        var
    };
    *next += 1;
    var
}

/// Evaluates a block's operations over the abstract stack, recording each
/// op's consumed arguments and produced definition. Definition variables
/// are cached per pc so their identity survives re-evaluation.
fn transfer(
    block: &mut EVMBasicBlock,
    entry: AbstractStack,
    pool: &mut VarPool,
    bound: usize,
    values_changed: &mut bool,
) -> Result<(AbstractStack, Vec<OpEffect>, usize), InternalInvariant> {
    let mut stack = entry;
    let mut effects = Vec::with_capacity(block.ops.len());
    let mut next_pad = 0usize;
    let ops = block.ops.clone();

    for op in &ops {
        let code = op.opcode;
        if code.is_push() {
            let var = *block
                .def_cache
                .entry(op.pc)
                .or_insert_with(|| pool.new_var(Value::Bottom, BTreeSet::from([op.pc])));
            *values_changed |= pool.set_value(var, Value::concrete(op.value.unwrap_or_default()));
            stack.push(var);
            effects.push(OpEffect {
                pc: op.pc,
                opcode: code,
                args: Vec::new(),
                def: Some(Def::Var(var)),
            });
        } else if code.is_dup() {
            stack.dup(code.dup_index(), || {
                pad_var(pool, &mut block.pad_cache, &mut next_pad)
            })?;
            effects.push(OpEffect {
                pc: op.pc,
                opcode: code,
                args: Vec::new(),
                def: None,
            });
        } else if code.is_swap() {
            stack.swap(code.swap_index(), || {
                pad_var(pool, &mut block.pad_cache, &mut next_pad)
            })?;
            effects.push(OpEffect {
                pc: op.pc,
                opcode: code,
                args: Vec::new(),
                def: None,
            });
        } else if code == opcodes::JUMPDEST {
            effects.push(OpEffect {
                pc: op.pc,
                opcode: code,
                args: Vec::new(),
                def: None,
            });
        } else {
            let mut args = Vec::with_capacity(code.pop);
            for _ in 0..code.pop {
                args.push(stack.pop(|| pad_var(pool, &mut block.pad_cache, &mut next_pad))?);
            }

            let def = if code == opcodes::MSTORE || code == opcodes::MSTORE8 {
                Some(Def::Loc(Location::Memory(args[0])))
            } else if code == opcodes::SSTORE {
                Some(Def::Loc(Location::Storage(args[0])))
            } else if code.push == 1 {
                let var = *block
                    .def_cache
                    .entry(op.pc)
                    .or_insert_with(|| pool.new_var(Value::Bottom, BTreeSet::from([op.pc])));
                let value = if code.is_arithmetic() {
                    let arg_values: Vec<&Value> = args.iter().map(|a| pool.value(*a)).collect();
                    Value::eval(code, &arg_values, bound)
                } else {
                    Value::Top
                };
                *values_changed |= pool.set_value(var, value);
                stack.push(var);
                Some(Def::Var(var))
            } else {
                None
            };

            effects.push(OpEffect {
                pc: op.pc,
                opcode: code,
                args,
                def,
            });
        }
    }
    Ok((stack, effects, next_pad))
}

/// Adds jump edges for const-valued targets and clones multi-target blocks
/// per predecessor context. Returns whether anything changed.
///
/// Cloning policy: a block ending in JUMP/JUMPI whose target has several
/// concrete candidates and several predecessors is split so that each
/// incoming context gets its own copy, as long as the block's clone depth
/// is under the configured bound. The copy shares the op list but not the
/// definition identities; its entry stack comes from its single
/// predecessor, so its target collapses to one candidate on the next pass.
fn refine_edges(
    cfg: &mut ControlFlowGraph,
    pool: &VarPool,
    config: &AnalysisConfig,
    ctx: &Ctx,
    reported: &mut BTreeSet<(usize, U256)>,
) -> bool {
    let index = cfg.jumpdest_index();
    let ids: Vec<BlockId> = cfg.blocks.iter().map(|b| b.id).collect();
    let mut changed = false;

    for id in ids {
        let block = cfg.block(id);
        if !block.ends_in_jump() {
            continue;
        }
        let Some(effect) = block.effects.last() else {
            continue;
        };
        let target = effect.args[0];
        let Value::Const(candidates) = pool.value(target).clone() else {
            continue;
        };

        let preds: Vec<BlockId> = block.preds.iter().copied().collect();
        if candidates.len() > 1 && preds.len() > 1 && block.clone_depth < config.max_clone_depth {
            let succs: Vec<BlockId> = block.succs.iter().copied().collect();
            for &pred in &preds[1..] {
                let clone = cfg.add_clone(id);
                cfg.remove_edge(pred, id);
                cfg.add_edge(pred, clone);
                for &succ in &succs {
                    cfg.add_edge(clone, succ);
                }
            }
            ctx.log_med(&format!(
                "split block at {:#x} across {} predecessor contexts",
                cfg.block(id).entry(),
                preds.len()
            ));
            changed = true;
            continue;
        }

        let entry = block.entry();
        for value in candidates {
            match usize::try_from(value).ok().and_then(|pc| index.get(&pc)) {
                Some(&dest) => changed |= cfg.add_edge(id, dest),
                None => {
                    if reported.insert((entry, value)) {
                        ctx.warning(&format!(
                            "jump at {:#x} targets {value:#x}, which is not a JUMPDEST",
                            entry
                        ));
                    }
                }
            }
        }
    }
    changed
}

/// Flags every jump that, after the fixed point, has no successor matching
/// a concrete target. This covers unknown targets, never-evaluated blocks
/// after a bailout, and concrete targets that name no JUMPDEST.
fn mark_unresolved(cfg: &mut ControlFlowGraph, pool: &VarPool, ctx: &Ctx) {
    let mut flagged = Vec::new();
    for block in &cfg.blocks {
        if !block.ends_in_jump() {
            continue;
        }
        let resolved = match block.effects.last() {
            None => false,
            Some(effect) => match pool.value(effect.args[0]) {
                Value::Bottom => true, // unreachable, nothing to resolve
                Value::Top => false,
                Value::Const(candidates) => candidates.iter().any(|value| {
                    usize::try_from(*value).is_ok_and(|pc| {
                        block.succs.iter().any(|succ| {
                            let succ = cfg.block(*succ);
                            succ.entry() == pc && succ.is_jumpdest()
                        })
                    })
                }),
            },
        };
        if !resolved {
            flagged.push(block.id);
        }
    }

    for id in flagged {
        let block = cfg.block_mut(id);
        block.has_unresolved_jump = true;
        let pc = block.exit();
        ctx.warning(&format!("unresolved jump at {pc:#x}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Ctx;
    use crate::parser::{Parser, Source};
    use crate::stacksize::block_stack_delta;

    fn analysed(hex: &str, config: &AnalysisConfig) -> (ControlFlowGraph, VarPool, Ctx) {
        let ctx = Ctx::default();
        let ops = Parser::new(false)
            .parse(Source::Hex(hex.into()), &ctx)
            .unwrap();
        let mut cfg = ControlFlowGraph::from_ops(ops);
        let mut pool = VarPool::new();
        analyse(&mut cfg, &mut pool, config, &ctx).unwrap();
        (cfg, pool, ctx)
    }

    #[test]
    fn straight_line_stacks() {
        // PUSH1 1; PUSH1 0; MSTORE; PUSH1 1; PUSH1 0x1f; RETURN
        let (cfg, pool, ctx) = analysed("60016000526001601ff3", &AnalysisConfig::default());
        let block = cfg.block(cfg.entry_block().unwrap());
        assert_eq!(block.entry_stack.len(), 0);
        assert!(block.entry_stack.empty_bottom());
        assert_eq!(block.exit_stack.len(), 0);
        assert!(!ctx.warned());

        // Every PUSH produced a concrete definition at its own pc.
        for (pc, want) in [(0usize, 1u64), (2, 0), (5, 1), (7, 0x1f)] {
            let var = block.def_cache[&pc];
            assert_eq!(pool.value(var).single(), Some(U256::from(want)));
            assert_eq!(pool.get(var).def_sites, BTreeSet::from([pc]));
        }
    }

    fn assert_depth_invariant(cfg: &ControlFlowGraph) {
        for block in &cfg.blocks {
            let delta = block_stack_delta(block);
            let entry = (block.entry_stack.len() + block.pads_used) as isize;
            let got = block.exit_stack.len() as isize - entry;
            assert_eq!(got, delta, "block at {:#x}", block.entry());
        }
    }

    #[test]
    fn exit_depth_matches_block_delta() {
        let (cfg, _, _) = analysed("6001600060095700", &AnalysisConfig::default());
        assert_depth_invariant(&cfg);
        let (cfg, _, _) = analysed("6005600060095760075b5000", &AnalysisConfig::default());
        assert_depth_invariant(&cfg);
    }

    #[test]
    fn static_jump_resolves() {
        // PUSH1 5; JUMP; JUMPDEST; STOP
        let (cfg, _, ctx) = analysed("6005565b00", &AnalysisConfig::default());
        assert_eq!(cfg.len(), 2);
        let jumper = cfg.block(BlockId(0));
        assert!(jumper.succs.contains(&BlockId(1)));
        assert!(!jumper.has_unresolved_jump);
        assert!(!ctx.warned());
        cfg.check_consistency().unwrap();
    }

    #[test]
    fn dynamic_jump_from_mload_is_unresolved() {
        // PUSH1 0; MLOAD; JUMP; STOP
        let (cfg, _, ctx) = analysed("6000515600", &AnalysisConfig::default());
        let jumper = cfg.block(BlockId(0));
        assert!(jumper.has_unresolved_jump);
        assert!(jumper.succs.is_empty());
        assert!(ctx.warned());
    }

    #[test]
    fn two_contexts_get_cloned_with_single_targets() {
        // Two predecessors each push a distinct target for a shared JUMP:
        //   0: PUSH1 0x0f; PUSH1 0; PUSH1 0x0d; JUMPI
        //   7: POP; PUSH1 0x11; PUSH1 0x0d; JUMP
        //   d: JUMPDEST; JUMP
        //   f: JUMPDEST; STOP
        //  11: JUMPDEST; STOP
        let hex = "600f6000600d57506011600d565b565b005b00";
        let (cfg, pool, _) = analysed(hex, &AnalysisConfig::default());

        let sharers: Vec<&EVMBasicBlock> = cfg
            .blocks
            .iter()
            .filter(|b| b.entry() == 0x0d && b.ends_in_jump())
            .collect();
        assert_eq!(sharers.len(), 2, "shared block should have been split");

        let mut seen_dests = BTreeSet::new();
        for block in sharers {
            assert_eq!(block.preds.len(), 1);
            let target = block.effects.last().unwrap().args[0];
            let single = pool.value(target).single().expect("single-valued target");
            assert_eq!(block.succs.len(), 1);
            assert!(!block.has_unresolved_jump);
            seen_dests.insert(single);
        }
        assert_eq!(
            seen_dests,
            BTreeSet::from([U256::from(0x0f), U256::from(0x11)])
        );
        cfg.check_consistency().unwrap();
    }

    #[test]
    fn exhausted_clone_budget_adds_all_candidate_edges() {
        // Same two-context contract as above, but with cloning disabled the
        // shared block keeps both predecessors and both jump edges.
        let hex = "600f6000600d57506011600d565b565b005b00";
        let config = AnalysisConfig {
            max_clone_depth: 0,
            ..Default::default()
        };
        let (cfg, _, _) = analysed(hex, &config);

        let jumper = cfg
            .blocks
            .iter()
            .find(|b| b.entry() == 0x0d && b.ends_in_jump())
            .unwrap();
        let dests: BTreeSet<usize> = jumper
            .succs
            .iter()
            .map(|s| cfg.block(*s).entry())
            .collect();
        assert_eq!(dests, BTreeSet::from([0x0f, 0x11]));
    }

    #[test]
    fn iteration_bound_bails_out_consistently() {
        let hex = "600f6000600d57506011600d565b565b005b00";
        let config = AnalysisConfig {
            max_iter: Some(1),
            ..Default::default()
        };
        let (cfg, _, ctx) = analysed(hex, &config);
        assert!(ctx.warned());
        assert_eq!(ctx.exit_code(), 3);
        cfg.check_consistency().unwrap();
        assert_depth_invariant(&cfg);
    }

    #[test]
    fn merge_variable_joins_values_and_def_sites() {
        //   0: PUSH1 5; PUSH1 0; PUSH1 9; JUMPI
        //   7: PUSH1 7
        //   9: JUMPDEST; POP; STOP
        // The JUMPDEST block's top slot is V(5) along the jump and V(7)
        // along the fall-through, so its entry gets a merge variable.
        let (cfg, pool, _) = analysed("6005600060095760075b5000", &AnalysisConfig::default());

        let merged = cfg
            .blocks
            .iter()
            .find(|b| b.entry() == 9)
            .expect("jumpdest block");
        assert_eq!(merged.preds.len(), 2);
        assert_eq!(merged.entry_stack.len(), 2);

        let top = merged.entry_stack.peek(0).unwrap();
        let want: BTreeSet<U256> = [U256::from(5), U256::from(7)].into();
        assert_eq!(pool.value(top).candidates(), Some(&want));
        assert!(pool.get(top).def_sites.is_superset(&BTreeSet::from([0, 7])));

        // The slot below is unknown along one path, so it joins to Top.
        let below = merged.entry_stack.peek(1).unwrap();
        assert!(pool.value(below).is_top());
    }
}

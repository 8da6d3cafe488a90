// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use std::collections::BTreeSet;

use crate::evm_cfg::BlockId;
use crate::tac_cfg::TACGraph;

/// Dominator sets and immediate dominators per block. Unreachable blocks
/// carry empty sets and no immediate dominator.
pub struct Dominance {
    pub dom: Vec<BTreeSet<BlockId>>,
    pub idom: Vec<Option<BlockId>>,
}

/// Iterative forward dominator computation over the TAC graph.
pub fn dominators(graph: &TACGraph) -> Dominance {
    let roots: Vec<BlockId> = graph.entry_block().into_iter().collect();
    compute(graph.len(), &roots, |id| {
        graph.block(id).preds.iter().copied().collect()
    })
}

/// Postdominators: the same fixed point over reversed edges, rooted at
/// every block execution can end in.
pub fn postdominators(graph: &TACGraph) -> Dominance {
    let roots: Vec<BlockId> = graph
        .blocks
        .iter()
        .filter(|b| b.succs.is_empty())
        .map(|b| b.id)
        .collect();
    compute(graph.len(), &roots, |id| {
        graph.block(id).succs.iter().copied().collect()
    })
}

fn compute(
    len: usize,
    roots: &[BlockId],
    preds: impl Fn(BlockId) -> Vec<BlockId>,
) -> Dominance {
    let mut dom: Vec<Option<BTreeSet<BlockId>>> = vec![None; len];
    for &root in roots {
        dom[root.0] = Some(BTreeSet::from([root]));
    }

    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..len {
            let id = BlockId(i);
            if roots.contains(&id) {
                continue;
            }
            let mut meet: Option<BTreeSet<BlockId>> = None;
            for pred in preds(id) {
                if let Some(pred_dom) = &dom[pred.0] {
                    meet = Some(match meet {
                        None => pred_dom.clone(),
                        Some(acc) => acc.intersection(pred_dom).copied().collect(),
                    });
                }
            }
            let Some(mut next) = meet else {
                continue;
            };
            next.insert(id);
            if dom[i].as_ref() != Some(&next) {
                dom[i] = Some(next);
                changed = true;
            }
        }
    }

    let dom: Vec<BTreeSet<BlockId>> = dom
        .into_iter()
        .map(|set| set.unwrap_or_default())
        .collect();

    // The immediate dominator is the strict dominator dominated by every
    // other strict dominator.
    let mut idom = vec![None; len];
    for i in 0..len {
        let strict: BTreeSet<BlockId> = dom[i].iter().copied().filter(|d| d.0 != i).collect();
        idom[i] = strict
            .iter()
            .find(|&&d| dom[d.0].len() == strict.len())
            .copied();
    }

    Dominance { dom, idom }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{analyse, AnalysisConfig};
    use crate::evm_cfg::ControlFlowGraph;
    use crate::logger::Ctx;
    use crate::memtypes::VarPool;
    use crate::parser::{Parser, Source};

    fn tac_from_hex(hex: &str) -> TACGraph {
        let ctx = Ctx::default();
        let ops = Parser::new(false)
            .parse(Source::Hex(hex.into()), &ctx)
            .unwrap();
        let mut cfg = ControlFlowGraph::from_ops(ops);
        let mut pool = VarPool::new();
        analyse(&mut cfg, &mut pool, &AnalysisConfig::default(), &ctx).unwrap();
        TACGraph::from_cfg(&cfg)
    }

    #[test]
    fn branch_join_dominance() {
        // PUSH1 1; PUSH1 8; JUMPI | PUSH1 0; POP | JUMPDEST; STOP
        // The join is reached directly and through the middle block, so
        // only the entry and itself dominate it.
        let graph = tac_from_hex("60016008576000505b00");
        let doms = dominators(&graph);
        assert_eq!(doms.dom[2], BTreeSet::from([BlockId(0), BlockId(2)]));
        assert_eq!(doms.idom[2], Some(BlockId(0)));
        assert_eq!(doms.idom[1], Some(BlockId(0)));
    }

    #[test]
    fn linear_chain_dominance() {
        // PUSH1 5; JUMP; JUMPDEST; STOP
        let graph = tac_from_hex("6005565b00");
        let doms = dominators(&graph);
        assert_eq!(doms.dom[0], BTreeSet::from([BlockId(0)]));
        assert_eq!(doms.dom[1], BTreeSet::from([BlockId(0), BlockId(1)]));
        assert_eq!(doms.idom[0], None);
        assert_eq!(doms.idom[1], Some(BlockId(0)));
    }

    #[test]
    fn postdominators_run_backwards() {
        let graph = tac_from_hex("6005565b00");
        let pdoms = postdominators(&graph);
        assert_eq!(pdoms.dom[0], BTreeSet::from([BlockId(0), BlockId(1)]));
        assert_eq!(pdoms.idom[0], Some(BlockId(1)));
        assert_eq!(pdoms.idom[1], None);
    }
}

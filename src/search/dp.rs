//! `DpSolver` (spec §4.12): a deterministic alternative to `UCTSearch`. Same
//! transition set (scalarize one value, or commit a fully-enumerated
//! extension/seed pack), but instead of sampling it explores every legal
//! move from a `Frontier` and memoizes on a hashed frontier key, so the same
//! search state reached via two different move orders is solved once.
//!
//! Picked by `PackerConfig::use_mcts == false` (spec §6): useful for small
//! blocks where exhaustive-but-memoized search is affordable and
//! reproducibility (no RNG at all) matters more than scaling to large ones.

use super::partial_pack::PartialPack;
use super::{enumerate, Env};
use crate::common::fx::FxHashMap;
use crate::ir::Value;
use crate::pack::VectorPack;
use std::collections::HashSet;
use std::rc::Rc;

/// Hashable snapshot of a `Frontier` (plus any in-progress `PartialPack`)
/// used as the memo key. Per DESIGN.md: `cursor`, `free`, `unresolved_packs`
/// (canonicalized by interned pointer and sorted, as `Frontier` already
/// keeps them), and `unresolved_scalars` together determine everything the
/// solver can still do from here — `usable` is a pure function of `free`
/// plus the block's fixed def-use edges, so it doesn't need to be part of
/// the key.
#[derive(PartialEq, Eq, Hash, Clone)]
struct FrontierKey {
    cursor: usize,
    free: crate::common::bitset::Bitset,
    unresolved_scalars: crate::common::bitset::Bitset,
    unresolved_pack_ptrs: Vec<usize>,
    partial: Option<PartialKey>,
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct PartialKey {
    kind: &'static str,
    binding_ptr: usize,
    elements: crate::common::bitset::Bitset,
}

fn key_of(frontier: &super::frontier::Frontier, partial: &Option<PartialPack>) -> FrontierKey {
    let mut ptrs: Vec<usize> = frontier.unresolved_packs.iter().map(|p| Rc::as_ptr(p) as usize).collect();
    ptrs.sort_unstable();
    let partial_key = partial.as_ref().map(|p| PartialKey {
        kind: p.kind_name(),
        binding_ptr: match &p.fill {
            super::partial_pack::PartialFill::General { binding, .. } => std::sync::Arc::as_ptr(binding) as *const () as usize,
            _ => 0,
        },
        elements: p.elements.clone(),
    });
    FrontierKey {
        cursor: frontier.cursor,
        free: frontier.free.clone(),
        unresolved_scalars: frontier.unresolved_scalars.clone(),
        unresolved_pack_ptrs: ptrs,
        partial: partial_key,
    }
}

pub struct DpSolver<'a> {
    env: &'a Env<'a>,
    memo: FxHashMap<FrontierKey, (f64, Vec<Rc<VectorPack>>)>,
}

impl<'a> DpSolver<'a> {
    pub fn new(env: &'a Env<'a>) -> Self {
        Self { env, memo: FxHashMap::default() }
    }

    /// Solves from the block's initial frontier, returning the cheapest
    /// total cost found and the pack set that achieves it.
    pub fn solve(&mut self) -> (f64, Vec<Rc<VectorPack>>) {
        self.solve_from(super::frontier::Frontier::new(self.env))
    }

    /// Solves from an already-advanced `Frontier` — used when the caller
    /// pre-committed some packs (phi packs; see `UCTSearch::new_with_frontier`)
    /// before handing control to the solver.
    pub fn solve_from(&mut self, frontier: super::frontier::Frontier) -> (f64, Vec<Rc<VectorPack>>) {
        self.solve_impl(frontier, None)
    }

    fn solve_impl(&mut self, frontier: super::frontier::Frontier, partial: Option<PartialPack>) -> (f64, Vec<Rc<VectorPack>>) {
        let key = key_of(&frontier, &partial);
        if let Some(cached) = self.memo.get(&key) {
            return cached.clone();
        }
        // Break cycles conservatively: while this key is being solved,
        // treat a re-entrant request for it as infinitely expensive so the
        // enclosing search prefers any other move. A frontier genuinely
        // can't recur through a no-op move (every transition strictly
        // shrinks `free` or advances a partial fill), so this never fires
        // in practice; it only guards against a key collision.
        self.memo.insert(key.clone(), (f64::INFINITY, Vec::new()));

        let result = if let Some(p) = partial {
            self.solve_partial(&frontier, &p)
        } else if frontier.is_terminal() {
            (0.0, Vec::new())
        } else {
            self.solve_frontier(&frontier)
        };

        self.memo.insert(key, result.clone());
        result
    }

    fn solve_frontier(&mut self, frontier: &super::frontier::Frontier) -> (f64, Vec<Rc<VectorPack>>) {
        let mut best_cost = f64::INFINITY;
        let mut best_packs: Vec<Rc<VectorPack>> = Vec::new();

        if let Some(op) = frontier.unresolved_packs.first().cloned() {
            let already_packed = frontier.free.complement();
            for pack in enumerate::extension_packs(self.env, &op, &already_packed) {
                let (next_frontier, cost) = frontier.advance_pack(self.env, &pack);
                let (rest_cost, mut rest_packs) = self.solve_impl(next_frontier, None);
                let total = cost + rest_cost;
                if total < best_cost {
                    rest_packs.push(pack);
                    best_cost = total;
                    best_packs = rest_packs;
                }
            }
        }

        for v in frontier.usable_values(self.env).collect::<Vec<Value>>() {
            let (next_frontier, cost) = frontier.advance_scalar(self.env, v);
            let (rest_cost, rest_packs) = self.solve_impl(next_frontier, None);
            let total = cost + rest_cost;
            if total < best_cost {
                best_cost = total;
                best_packs = rest_packs;
            }
        }

        for template in seed_templates(self.env, frontier) {
            let (cost, packs) = self.solve_partial(frontier, &template);
            if cost < best_cost {
                best_cost = cost;
                best_packs = packs;
            }
        }

        (best_cost, best_packs)
    }

    fn solve_partial(&mut self, frontier: &super::frontier::Frontier, partial: &PartialPack) -> (f64, Vec<Rc<VectorPack>>) {
        if partial.is_complete() {
            let Some(pack) = partial.finish(self.env) else {
                return (f64::INFINITY, Vec::new());
            };
            let (next_frontier, cost) = frontier.advance_pack(self.env, &pack);
            let (rest_cost, mut rest_packs) = self.solve_impl(next_frontier, None);
            rest_packs.push(pack);
            return (cost + rest_cost, rest_packs);
        }

        let mut best_cost = f64::INFINITY;
        let mut best_packs: Vec<Rc<VectorPack>> = Vec::new();
        for v in frontier.usable_values(self.env).collect::<Vec<Value>>() {
            if let Some(next) = partial.try_fill(self.env, v) {
                let (cost, packs) = self.solve_impl(frontier.clone(), Some(next));
                if cost < best_cost {
                    best_cost = cost;
                    best_packs = packs;
                }
            }
        }
        (best_cost, best_packs)
    }
}

/// Candidate pack templates to try starting fresh from `frontier`: every
/// distinct feasible lane count of every seed memory/phi pack still fully
/// free, plus a template per legal catalog binding (mirrors
/// `UCTSearch::expand`'s non-partial branch, spec §4.9 step 2).
fn seed_templates(env: &Env, frontier: &super::frontier::Frontier) -> Vec<PartialPack> {
    let mut templates = Vec::new();
    for want_loads in [true, false] {
        let mut seen_lanes = HashSet::new();
        for pack in enumerate::seed_memory_packs(env, want_loads) {
            if pack.elements.is_subset_of(&frontier.free) && seen_lanes.insert(pack.lanes()) {
                templates.push(if want_loads {
                    PartialPack::new_load(pack.lanes(), env.index.len())
                } else {
                    PartialPack::new_store(pack.lanes(), env.index.len())
                });
            }
        }
    }
    for binding in env.legal_bindings() {
        templates.push(PartialPack::new_general(binding.clone(), env.index.len()));
    }
    templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MatchManager;
    use crate::config::PackerConfig;
    use crate::ir::{BlockId, BasicBlock, Instruction, IrType, Operand, Value};
    use crate::pack::VectorPackContext;
    use crate::testutil::{NoAliasOracle, StubCostModel, StubScalarEvolution};

    #[test]
    fn solves_four_consecutive_loads_by_packing_them() {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        for i in 0..4u32 {
            block.instructions.push(Instruction::Load {
                site: Value(i),
                ptr: Operand::Value(Value(100 + i)),
                ty: IrType::F32,
                align: 4,
            });
        }
        let index = crate::ir::value_index::ValueIndex::build(&block);
        let lda = crate::analysis::LocalDependenceAnalysis::build(&block, &index, &NoAliasOracle);
        let load_dag = crate::analysis::ConsecutiveAccessDag::build(&block, &index, &StubScalarEvolution, true);
        let store_dag = crate::analysis::ConsecutiveAccessDag::build(&block, &index, &StubScalarEvolution, false);
        let matches = MatchManager::build(&block, &index, &[]);
        let cost_model = StubCostModel::default();
        let features = crate::target::TargetFeatures::default();
        let pack_ctx = VectorPackContext::new(index.len());
        let config = PackerConfig::default();
        let env = Env::new(&block, &index, &lda, &load_dag, &store_dag, &matches, &[], &cost_model, &features, &pack_ctx, &config);

        let mut solver = DpSolver::new(&env);
        let (cost, packs) = solver.solve();
        assert!(cost.is_finite());
        assert!(packs.iter().any(|p| p.is_load() && p.lanes() == 4));
    }

    #[test]
    fn solves_single_scalar_with_zero_cost() {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        block.instructions.push(Instruction::BinOp {
            site: Value(0),
            op: crate::ir::BinOpKind::Add,
            lhs: Operand::Value(Value(10)),
            rhs: Operand::Value(Value(10)),
            ty: IrType::I32,
        });
        let index = crate::ir::value_index::ValueIndex::build(&block);
        let lda = crate::analysis::LocalDependenceAnalysis::build(&block, &index, &NoAliasOracle);
        let load_dag = crate::analysis::ConsecutiveAccessDag::build(&block, &index, &StubScalarEvolution, true);
        let store_dag = crate::analysis::ConsecutiveAccessDag::build(&block, &index, &StubScalarEvolution, false);
        let matches = MatchManager::build(&block, &index, &[]);
        let cost_model = StubCostModel::default();
        let features = crate::target::TargetFeatures::default();
        let pack_ctx = VectorPackContext::new(index.len());
        let config = PackerConfig::default();
        let env = Env::new(&block, &index, &lda, &load_dag, &store_dag, &matches, &[], &cost_model, &features, &pack_ctx, &config);

        let mut solver = DpSolver::new(&env);
        let (cost, packs) = solver.solve();
        assert_eq!(cost, 0.0);
        assert!(packs.is_empty());
    }
}

//! `BottomUpImprover` (spec §4.8): the non-MCTS path's local-neighborhood
//! half. `DpSolver` (`dp.rs`) explores every legal transition from a
//! `Frontier` exhaustively and memoizes on frontier state; this file
//! instead starts from a `Plan`, seeds it from every maximal store chain,
//! and repeatedly asks the `Heuristic` for a better producer of each
//! still-unresolved operand pack a committed pack depends on — replacing
//! producers whenever doing so strictly grows covered elements and lowers
//! cost, iterating to a local optimum, and also trying odd/even
//! half-splits and same-kind pack concatenation as extra neighborhood
//! moves (spec §4.8's closing paragraph).

use super::enumerate;
use super::heuristic::Heuristic;
use super::plan::Plan;
use super::Env;
use crate::common::bitset::Bitset;
use crate::ir::Value;
use crate::pack::{OperandPack, VectorPack};
use std::collections::HashSet;
use std::rc::Rc;

/// Runs §4.8's bottom-up improvement loop to a local optimum and returns
/// the best `Plan` found. `start` is the Plan to improve from — an empty
/// one for a block with no pre-committed packs, or (per
/// `Packer::optimize`) one already holding the pre-committed phi packs, the
/// same adaptation `DpSolver::solve_from` makes by starting from an
/// already-advanced `Frontier` instead of a block-fresh one.
pub fn improve(env: &Env, heuristic: &Heuristic, start: Plan) -> Plan {
    let mut best = start;
    let mut best_total = total_cost(env, &best, heuristic);
    let mut seeds = enumerate::seed_memory_packs(env, false);

    loop {
        let mut improved = false;
        for seed in seeds.iter().cloned() {
            if let Some(candidate) = try_seed(env, &best, seed, heuristic) {
                let candidate_total = total_cost(env, &candidate, heuristic);
                if candidate_total < best_total - 1e-9 {
                    best = candidate;
                    best_total = candidate_total;
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
        // Re-derive concatenation-pair candidates from the Plan the last
        // sweep converged to, so wider packs built out of the committed
        // ones get a chance next round too (spec §4.8: "also considering
        // ... concatenation pairs of existing packs").
        seeds.extend(concatenation_candidates(env, &best));
    }
    best
}

/// One seed attempt (spec §4.8): remove whatever currently produces the
/// seed's elements, add the seed, then run `runBottomUpFromOperand` to
/// propagate packing upstream from whatever operand packs the seed (and
/// anything it displaced) leave unresolved.
fn try_seed(env: &Env, plan: &Plan, seed: Rc<VectorPack>, heuristic: &Heuristic) -> Option<Plan> {
    if plan.has_pack(&seed) {
        return None;
    }
    let mut candidate = plan.clone();
    for displaced in candidate.producers_overlapping(&seed.elements) {
        candidate.remove(&displaced, heuristic);
    }
    if !candidate.add(seed, heuristic) {
        return None;
    }
    run_bottom_up_from_operand(env, &mut candidate, heuristic);
    Some(candidate)
}

/// §4.8's worklist: for each unresolved operand pack, ask the `Heuristic`
/// for the cheapest single candidate that covers it; commit that
/// candidate (displacing whatever currently produces its elements) when
/// doing so strictly grows the covered-elements set and lowers cost. Falls
/// back to the operand pack's odd/even half-split when no single producer
/// helps. Iterates until the worklist is exhausted.
fn run_bottom_up_from_operand(env: &Env, plan: &mut Plan, heuristic: &Heuristic) {
    let mut worklist: Vec<Rc<OperandPack>> = plan.unresolved_operand_packs();
    let mut seen: HashSet<usize> = worklist.iter().map(|op| Rc::as_ptr(op) as usize).collect();
    // Bounds worklist growth on a pathological fixture; a well-formed block
    // converges long before this — each accepted move strictly grows
    // `covered`, which is bounded by the block size.
    let budget = env.index.len() * 8 + 64;
    let mut steps = 0usize;

    while let Some(op) = worklist.pop() {
        steps += 1;
        if steps > budget || !plan.is_unresolved(&op) {
            continue;
        }
        let replaced = try_replace_with_producer(env, plan, &op, heuristic);
        let split = !replaced && try_half_split(env, plan, &op, heuristic);
        if replaced || split {
            for new_op in plan.unresolved_operand_packs() {
                let key = Rc::as_ptr(&new_op) as usize;
                if seen.insert(key) {
                    worklist.push(new_op);
                }
            }
        }
    }
}

/// Tries installing `Heuristic::best_producer(op)` in place of whatever
/// currently produces its elements (spec §4.8: "if the solution's covered
/// elements is a proper superset of the elements already packed by the
/// plan's affected packs ... replaces them").
fn try_replace_with_producer(env: &Env, plan: &mut Plan, op: &Rc<OperandPack>, heuristic: &Heuristic) -> bool {
    let Some(producer) = heuristic.best_producer(op) else { return false };
    install_if_better(env, plan, producer, heuristic)
}

/// Whole-block cost under `plan`: the incrementally maintained `Plan::cost`
/// (packing/gather/extract overhead for covered elements) plus the plain
/// scalar cost of every element `plan` leaves uncovered. `Plan::cost` alone
/// only ever grows as packs are added (an empty `Plan` costs exactly `0`,
/// spec §4.13), so accepting a candidate has to compare this whole-block
/// total rather than the bare `Plan::cost` delta — otherwise doing nothing
/// would always look cheapest and the improver could never keep a seed.
fn total_cost(env: &Env, plan: &Plan, heuristic: &Heuristic) -> f64 {
    let mut total = plan.cost();
    for id in 0..env.index.len() {
        if !plan.covers(id) {
            total += heuristic.cost_value(env.index.value(id));
        }
    }
    total
}

/// Installs `producer` in place of every pack currently producing any of
/// its elements, keeping the change only if it strictly grows coverage
/// over those displaced packs and the resulting plan's whole-block cost
/// is lower.
fn install_if_better(env: &Env, plan: &mut Plan, producer: Rc<VectorPack>, heuristic: &Heuristic) -> bool {
    let displaced = plan.producers_overlapping(&producer.elements);
    let mut already_packed = Bitset::new(producer.elements.len());
    for p in &displaced {
        already_packed.union_with(&p.elements);
    }
    if producer.elements.is_subset_of(&already_packed) {
        return false; // no new coverage over what's already there
    }
    let before_total = total_cost(env, plan, heuristic);
    let mut trial = plan.clone();
    for p in &displaced {
        trial.remove(p, heuristic);
    }
    if !trial.add(producer, heuristic) {
        return false;
    }
    if total_cost(env, &trial, heuristic) < before_total - 1e-9 {
        debug_assert!(
            (trial.cost() - trial.verify_cost(env, heuristic)).abs() < 1e-6,
            "Plan cost drifted from its scratch-recomputed cost"
        );
        *plan = trial;
        true
    } else {
        false
    }
}

/// Half-split neighborhood move (spec §4.8): when no single producer
/// improves `op` as a whole, try covering its odd- and even-indexed lanes
/// with two independently-chosen narrower producers instead.
fn try_half_split(env: &Env, plan: &mut Plan, op: &Rc<OperandPack>, heuristic: &Heuristic) -> bool {
    if op.lanes() < 4 {
        return false;
    }
    let even = env.ctx.even(op);
    let odd = env.ctx.odd(op);
    let (Some(even_producer), Some(odd_producer)) = (heuristic.best_producer(&even), heuristic.best_producer(&odd)) else {
        return false;
    };
    let before_total = total_cost(env, plan, heuristic);
    let mut trial = plan.clone();
    let even_installed = install_if_better(env, &mut trial, even_producer, heuristic);
    let odd_installed = install_if_better(env, &mut trial, odd_producer, heuristic);
    if (even_installed || odd_installed) && total_cost(env, &trial, heuristic) < before_total - 1e-9 {
        *plan = trial;
        true
    } else {
        false
    }
}

/// Neighborhood move: for every pair of committed load/store packs of the
/// same kind whose chains abut in the block's consecutive-access DAG, try
/// the single pack that covers their concatenation (spec §4.8:
/// "concatenation pairs of existing packs").
fn concatenation_candidates(env: &Env, plan: &Plan) -> Vec<Rc<VectorPack>> {
    let packs: Vec<&Rc<VectorPack>> = plan.iter().collect();
    let mut out = Vec::new();
    for a in &packs {
        for b in &packs {
            if Rc::ptr_eq(a, b) {
                continue;
            }
            let want_loads = if a.is_load() && b.is_load() {
                true
            } else if a.is_store() && b.is_store() {
                false
            } else {
                continue;
            };
            if let Some(pack) = concat_pair(env, a, b, want_loads) {
                out.push(pack);
            }
        }
    }
    out
}

fn concat_pair(env: &Env, a: &Rc<VectorPack>, b: &Rc<VectorPack>, want_loads: bool) -> Option<Rc<VectorPack>> {
    let dag = if want_loads { env.load_dag } else { env.store_dag };
    let last_a = a.ordered_values.last().copied().flatten()?;
    let first_b = b.ordered_values.first().copied().flatten()?;
    if !dag.has_edge(last_a, first_b) {
        return None;
    }
    let mut chain: Vec<Value> = a.values().collect();
    chain.extend(b.values());
    let vl = chain.len() as u32;
    if !vl.is_power_of_two() || vl > env.config.max_num_lanes {
        return None;
    }
    let ids: Vec<usize> = chain.iter().map(|v| env.index.id(*v)).collect();
    if !env.lda.all_independent(&ids) {
        return None;
    }
    enumerate::build_memory_pack(env, &chain, want_loads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MatchManager;
    use crate::config::PackerConfig;
    use crate::ir::{BlockId, BasicBlock, Instruction, IrType, Operand, Value};
    use crate::pack::VectorPackContext;
    use crate::search::heuristic::Inst2Packs;
    use crate::testutil::{NoAliasOracle, StubCostModel, StubScalarEvolution};

    /// `p[i] = a[i]` for `i in 0..4`: consecutive loads stored at
    /// consecutive addresses, so the store's operand pack is exactly the
    /// load chain's elements — the case `runBottomUpFromOperand` is meant
    /// to replace with a real producer instead of the scalar baseline.
    fn four_consecutive_stores_of_loads() -> BasicBlock {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        for i in 0..4u32 {
            block.instructions.push(Instruction::Load {
                site: Value(i),
                ptr: Operand::Value(Value(100 + i)),
                ty: IrType::F32,
                align: 4,
            });
        }
        for i in 0..4u32 {
            block.instructions.push(Instruction::Store {
                site: Value(10 + i),
                ptr: Operand::Value(Value(300 + i)),
                val: Operand::Value(Value(i)),
                ty: IrType::F32,
                align: 4,
            });
        }
        block
    }

    #[test]
    fn bottom_up_improver_packs_the_store_chain_and_its_load_operand() {
        let block = four_consecutive_stores_of_loads();
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

        let mut candidates = enumerate::seed_memory_packs(&env, true);
        candidates.extend(enumerate::seed_memory_packs(&env, false));
        let inst2packs = Inst2Packs::build(&env, &candidates);
        let heuristic = Heuristic::new(&env, &inst2packs);

        let plan = improve(&env, &heuristic, Plan::new(index.len()));
        assert!(plan.iter().any(|p| p.is_store() && p.lanes() == 4));
        assert!(plan.iter().any(|p| p.is_load() && p.lanes() == 4));

        let scalar_cost: f64 = (0..4).map(|i| heuristic.cost_value(Value(10 + i))).sum();
        assert!(plan.cost() < scalar_cost, "plan cost {} should beat scalar baseline {}", plan.cost(), scalar_cost);
    }

    #[test]
    fn bottom_up_improver_leaves_an_empty_plan_when_no_seeds_exist() {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        block.instructions.push(Instruction::Load {
            site: Value(0),
            ptr: Operand::Value(Value(100)),
            ty: IrType::F32,
            align: 4,
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
        let inst2packs = Inst2Packs::build(&env, &[]);
        let heuristic = Heuristic::new(&env, &inst2packs);

        let plan = improve(&env, &heuristic, Plan::new(index.len()));
        assert!(plan.is_empty());
        assert_eq!(plan.cost(), 0.0);
    }
}

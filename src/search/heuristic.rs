//! The memoized bottom-up `Heuristic` (spec §4.7): `solve(OperandPack)` is
//! the minimum expected cost to materialize an operand pack, recursively
//! defined in terms of `cost(VectorPack)` and `cost(Value)`.
//!
//! Needs a candidate-pack index (`Inst2Packs`, spec's own name) mapping
//! each scalar value to every enumerated `VectorPack` that could produce
//! it — built once from whatever packs `search::enumerate` found for the
//! block, the same candidate universe the MCTS/DP solvers draw from.

use super::Env;
use crate::common::fx::FxHashMap;
use crate::ir::{Operand, Value};
use crate::pack::{OperandPack, VectorPack};
use crate::target::{ShuffleKind, VectorInstrKind};
use std::cell::RefCell;
use std::rc::Rc;

/// `Inst2Packs`: every enumerated candidate pack, indexed by each scalar
/// value it could produce.
pub struct Inst2Packs {
    by_value: FxHashMap<usize, Vec<Rc<VectorPack>>>,
}

impl Inst2Packs {
    pub fn build(env: &Env, candidates: &[Rc<VectorPack>]) -> Self {
        let mut by_value: FxHashMap<usize, Vec<Rc<VectorPack>>> = FxHashMap::default();
        for pack in candidates {
            for id in pack.elements.iter() {
                by_value.entry(id).or_default().push(pack.clone());
            }
        }
        let _ = env;
        Self { by_value }
    }

    pub fn packs_for(&self, value_id: usize) -> &[Rc<VectorPack>] {
        self.by_value.get(&value_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct Heuristic<'a> {
    env: &'a Env<'a>,
    inst2packs: &'a Inst2Packs,
    memo_operand: RefCell<FxHashMap<usize, f64>>,
    memo_value: RefCell<FxHashMap<usize, f64>>,
    /// Guards against cyclic `cost(value)` recursion (shouldn't happen in a
    /// dependence-respecting block, but a stray pathological fixture
    /// shouldn't infinite-loop the heuristic — it should just treat the
    /// cycle's entry point as a scalar leaf).
    in_progress_value: RefCell<std::collections::HashSet<usize>>,
}

impl<'a> Heuristic<'a> {
    pub fn new(env: &'a Env<'a>, inst2packs: &'a Inst2Packs) -> Self {
        Self {
            env,
            inst2packs,
            memo_operand: RefCell::new(FxHashMap::default()),
            memo_value: RefCell::new(FxHashMap::default()),
            in_progress_value: RefCell::new(std::collections::HashSet::default()),
        }
    }

    /// `cost(value)` (spec §4.7): recurse into in-block operands; memoized.
    pub fn cost_operand(&self, op: Operand) -> f64 {
        match op {
            Operand::Const(_) => 0.0,
            Operand::Value(v) => self.cost_value(v),
        }
    }

    pub fn cost_value(&self, v: Value) -> f64 {
        let Some(id) = self.env.index.try_id(v) else {
            return 0.0;
        };
        if let Some(&c) = self.memo_value.borrow().get(&id) {
            return c;
        }
        if !self.in_progress_value.borrow_mut().insert(id) {
            // Cyclic reference: treat as a scalar leaf rather than recurse
            // forever.
            return 0.0;
        }
        let inst = self.env.block.instructions.iter().find(|i| i.site() == v);
        let cost = match inst {
            Some(inst) => {
                let operand_cost: f64 = inst.operand_values().map(|o| self.cost_value(o)).sum();
                self.env.cost_model.scalar_cost(inst) + operand_cost
            }
            None => 0.0,
        };
        self.in_progress_value.borrow_mut().remove(&id);
        self.memo_value.borrow_mut().insert(id, cost);
        cost
    }

    /// `cost(VP) = producing_cost(VP) + Σ solve(operand_pack_i)`.
    pub fn cost_pack(&self, vp: &Rc<VectorPack>) -> f64 {
        vp.producing_cost + vp.operand_packs.iter().map(|op| self.solve(op)).sum::<f64>()
    }

    /// `solve(P)` (spec §4.7), memoized by interned-pointer identity.
    pub fn solve(&self, op: &Rc<OperandPack>) -> f64 {
        let key = Rc::as_ptr(op) as usize;
        if let Some(&c) = self.memo_operand.borrow().get(&key) {
            return c;
        }
        // Insert a provisional value before recursing so a self-referential
        // operand pack (shouldn't occur, but cheap to guard) can't recurse
        // forever; overwritten with the real answer once computed.
        self.memo_operand.borrow_mut().insert(key, f64::INFINITY);

        let mut best = self.baseline_cost(op);

        if let Some(v) = op.uniform_value() {
            if op.is_splat_of(v) {
                let vt = self.env.operand_pack_vector_type(op);
                let broadcast = self.cost_operand(v) + self.env.cost_model.shuffle_cost(ShuffleKind::Broadcast, vt, 0);
                best = best.min(broadcast);
            }
        }

        let deduped = self.env.ctx.dedup(op);
        if !Rc::ptr_eq(&deduped, op) {
            for vp in self.producers_of(&deduped) {
                let shuffle_penalty = if deduped.lanes() != op.lanes() {
                    let vt = self.env.operand_pack_vector_type(op);
                    self.env.cost_model.shuffle_cost(ShuffleKind::PermuteSingleSrc, vt, 0)
                } else {
                    0.0
                };
                best = best.min(self.cost_pack(&vp) + shuffle_penalty);
            }
        }

        for vp in self.candidate_packs_touching(op) {
            let vt = self.env.operand_pack_vector_type(op);
            if exact_permutation(op, &vp) {
                let permute = self.env.cost_model.shuffle_cost(ShuffleKind::PermuteSingleSrc, vt, 0);
                best = best.min(self.cost_pack(&vp) + permute);
            } else {
                let overlap = overlap_count(op, &vp);
                if overlap == 0 {
                    continue;
                }
                let pack_lanes = vp.elements.count().max(1) as f64;
                let prorated = self.cost_pack(&vp) * (overlap as f64 / pack_lanes);
                let leftover = self.uncovered_scalar_cost(op, &vp);
                let shuffle = self.env.cost_model.shuffle_cost(ShuffleKind::PermuteTwoSrc, vt, 0);
                best = best.min(prorated + leftover + shuffle);
            }
        }

        self.memo_operand.borrow_mut().insert(key, best);
        best
    }

    /// Baseline (spec §4.7): sum over distinct non-constant lane values of
    /// their scalar cost plus an insertion constant; constants contribute
    /// nothing (they're materialized as vector immediates, not inserted).
    fn baseline_cost(&self, op: &OperandPack) -> f64 {
        let mut seen: Vec<Operand> = Vec::new();
        let vt = self.env.operand_pack_vector_type(op);
        let mut total = 0.0;
        for (lane, slot) in op.slots.iter().enumerate() {
            let Some(v) = slot else { continue };
            if seen.contains(v) {
                continue;
            }
            seen.push(*v);
            if matches!(v, Operand::Const(_)) {
                continue;
            }
            total += self.cost_operand(*v) + self.env.cost_model.vector_instr_cost(VectorInstrKind::Insert, vt, lane as u32);
        }
        total
    }

    /// Candidate packs whose produced value set exactly equals `op`'s
    /// (used for the dedup-producer case, where `op` is already `dedup`'d
    /// so every slot is a distinct value).
    fn producers_of(&self, op: &Rc<OperandPack>) -> Vec<Rc<VectorPack>> {
        let wanted: std::collections::HashSet<Value> =
            op.slots.iter().flatten().filter_map(|o| o.as_value()).collect();
        if wanted.is_empty() {
            return Vec::new();
        }
        let mut seen_ptrs = std::collections::HashSet::new();
        let mut out = Vec::new();
        for &v in &wanted {
            let Some(id) = self.env.index.try_id(v) else { continue };
            for vp in self.inst2packs.packs_for(id) {
                let produced: std::collections::HashSet<Value> = vp.values().collect();
                if produced == wanted && seen_ptrs.insert(Rc::as_ptr(vp) as usize) {
                    out.push(vp.clone());
                }
            }
        }
        out
    }

    /// The cheapest candidate pack (by `cost_pack`) that covers every
    /// non-null lane value of `op` (spec §4.8: the producer
    /// `runBottomUpFromOperand` installs for an unresolved operand pack, as
    /// opposed to `solve`'s float-only estimate which also prices
    /// partial-overlap candidates that can't stand in as a single
    /// replacement producer).
    pub fn best_producer(&self, op: &OperandPack) -> Option<Rc<VectorPack>> {
        let wanted: std::collections::HashSet<Value> =
            op.slots.iter().flatten().filter_map(|o| o.as_value()).collect();
        if wanted.is_empty() {
            return None;
        }
        let mut best: Option<(Rc<VectorPack>, f64)> = None;
        for vp in self.candidate_packs_touching(op) {
            let produced: std::collections::HashSet<Value> = vp.values().collect();
            if !wanted.is_subset(&produced) {
                continue;
            }
            let cost = self.cost_pack(&vp);
            if best.as_ref().map_or(true, |(_, c)| cost < *c) {
                best = Some((vp, cost));
            }
        }
        best.map(|(vp, _)| vp)
    }

    /// Every distinct candidate pack touching at least one of `op`'s lane
    /// values (spec: "for every candidate pack from Inst2Packs that
    /// intersects P's elements").
    pub(crate) fn candidate_packs_touching(&self, op: &OperandPack) -> Vec<Rc<VectorPack>> {
        let mut seen_ptrs = std::collections::HashSet::new();
        let mut out = Vec::new();
        for slot in &op.slots {
            let Some(Operand::Value(v)) = slot else { continue };
            let Some(id) = self.env.index.try_id(*v) else { continue };
            for vp in self.inst2packs.packs_for(id) {
                if seen_ptrs.insert(Rc::as_ptr(vp) as usize) {
                    out.push(vp.clone());
                }
            }
        }
        out
    }

    /// Scalar fallback cost for the lanes of `op` that `vp` doesn't cover,
    /// used to round out a partial-overlap candidate.
    fn uncovered_scalar_cost(&self, op: &OperandPack, vp: &VectorPack) -> f64 {
        let mut seen: Vec<Operand> = Vec::new();
        let mut total = 0.0;
        for slot in &op.slots {
            let Some(v) = slot else { continue };
            if seen.contains(v) {
                continue;
            }
            seen.push(*v);
            let covered = matches!(v, Operand::Value(val) if vp.values().any(|pv| pv == *val));
            if !covered {
                total += self.cost_operand(*v);
            }
        }
        total
    }
}

fn exact_permutation(op: &OperandPack, vp: &VectorPack) -> bool {
    if op.non_null_count() != vp.elements.count() {
        return false;
    }
    let op_set: std::collections::HashSet<Value> = op.slots.iter().flatten().filter_map(|o| o.as_value()).collect();
    let vp_set: std::collections::HashSet<Value> = vp.values().collect();
    op_set == vp_set
}

fn overlap_count(op: &OperandPack, vp: &VectorPack) -> usize {
    op.slots
        .iter()
        .flatten()
        .filter_map(|o| o.as_value())
        .filter(|v| vp.values().any(|pv| pv == *v))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MatchManager;
    use crate::config::PackerConfig;
    use crate::ir::{BinOpKind, BlockId, BasicBlock, Instruction, IrType};
    use crate::pack::VectorPackContext;
    use crate::testutil::{NoAliasOracle, StubCostModel, StubScalarEvolution};

    #[test]
    fn solve_baseline_matches_sum_of_scalar_plus_insert() {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        block.instructions.push(Instruction::BinOp {
            site: Value(0),
            op: BinOpKind::Add,
            lhs: crate::ir::Operand::Value(Value(10)),
            rhs: crate::ir::Operand::Value(Value(11)),
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

        let op = pack_ctx.canonicalize_values(&[Some(Value(10)), Some(Value(11))], IrType::I32);
        let inst2packs = Inst2Packs::build(&env, &[]);
        let heuristic = Heuristic::new(&env, &inst2packs);
        let solved = heuristic.solve(&op);
        // Both operands are loop-invariant leaves: each costs 0 recursively
        // (no defining instruction in this block), plus one insert each.
        let expected = 2.0 * cost_model.vector_instr_cost(VectorInstrKind::Insert, env.operand_pack_vector_type(&op), 0);
        assert!((solved - expected).abs() < 1e-9);
    }
}

//! `Plan` / `VectorPackSet` (spec §3/§4.13): the committed set of packs for
//! a block, with `producers[value] -> pack`, `unresolved[operand_pack] ->
//! refcount`, and a maintained `cost`.
//!
//! Cost bookkeeping: each committed pack pays its own `producing_cost`.
//! Each *distinct* operand pack referenced by any committed pack pays for
//! its own materialization exactly once — for free if some other committed
//! pack produces that exact ordered sequence (the "gather Exact" case of
//! spec §4.5 step 5), otherwise via `Heuristic::solve` (which folds in the
//! gather/permute/partial-overlap cases itself). Any committed element with
//! an in-block user outside the committed set pays an extract (spec §4.5
//! step 2's commit-time extract, generalized to an order-independent
//! commit). `unresolved` tracks, per distinct uncovered operand pack, how
//! many committed packs currently reference it — `add`/`remove` keep this
//! refcount and the cached materialization cost in sync; `verify_cost`
//! rebuilds both from scratch as a debug cross-check (spec §7/§8 property 4).

use super::heuristic::Heuristic;
use crate::common::bitset::Bitset;
use crate::common::fx::FxHashMap;
use crate::ir::Value;
use crate::ir::value_index::ValueIndex;
use crate::pack::{OperandPack, VectorPack};
use crate::target::{CostModel, VectorInstrKind};
use std::rc::Rc;

#[derive(Clone)]
pub struct Plan {
    producers: FxHashMap<usize, Rc<VectorPack>>,
    packs: Vec<Rc<VectorPack>>,
    covered: Bitset,
    /// Distinct uncovered operand packs currently referenced, keyed by
    /// interned pointer, with a reference count and their materialization
    /// cost (cached so `remove` doesn't need to re-solve).
    unresolved: FxHashMap<usize, (Rc<OperandPack>, usize, f64)>,
    cost: f64,
}

impl Plan {
    pub fn new(universe: usize) -> Self {
        Self {
            producers: FxHashMap::default(),
            packs: Vec::new(),
            covered: Bitset::new(universe),
            unresolved: FxHashMap::default(),
            cost: 0.0,
        }
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<VectorPack>> {
        self.packs.iter()
    }

    pub fn producer(&self, index: &ValueIndex, v: Value) -> Option<&Rc<VectorPack>> {
        let id = index.try_id(v)?;
        self.producers.get(&id)
    }

    pub fn covers(&self, id: usize) -> bool {
        self.covered.contains(id)
    }

    pub fn has_pack(&self, pack: &Rc<VectorPack>) -> bool {
        self.packs.iter().any(|p| Rc::ptr_eq(p, pack))
    }

    /// Every distinct operand pack some committed pack still references
    /// without an exact in-plan producer (spec §4.8's `runBottomUpFromOperand`
    /// worklist source).
    pub fn unresolved_operand_packs(&self) -> Vec<Rc<OperandPack>> {
        self.unresolved.values().map(|(op, _, _)| op.clone()).collect()
    }

    pub fn is_unresolved(&self, op: &Rc<OperandPack>) -> bool {
        self.unresolved.contains_key(&(Rc::as_ptr(op) as usize))
    }

    /// Every currently-committed pack that produces at least one id in
    /// `elements` — the packs a new candidate covering those ids would
    /// need to displace (spec §4.8: "removing any producers currently
    /// producing the seed's elements").
    pub fn producers_overlapping(&self, elements: &Bitset) -> Vec<Rc<VectorPack>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for id in elements.iter() {
            if let Some(p) = self.producers.get(&id) {
                if seen.insert(Rc::as_ptr(p) as usize) {
                    out.push(p.clone());
                }
            }
        }
        out
    }

    fn exactly_produced_by_other(&self, op: &OperandPack, excluding: Option<&Rc<VectorPack>>) -> bool {
        self.packs.iter().any(|p| {
            if let Some(ex) = excluding {
                if Rc::ptr_eq(p, ex) {
                    return false;
                }
            }
            ordered_exact_match(p, op)
        })
    }

    /// `Plan.add(pack)` (spec §4.13): fails if any element already has a
    /// producer.
    pub fn add(&mut self, pack: Rc<VectorPack>, heuristic: &Heuristic) -> bool {
        if !pack.elements.is_disjoint(&self.covered) {
            return false;
        }
        self.cost += pack.producing_cost;
        self.covered.union_with(&pack.elements);
        for id in pack.elements.iter() {
            self.producers.insert(id, pack.clone());
        }
        self.packs.push(pack.clone());

        for op in &pack.operand_packs {
            self.reference_operand(op, heuristic);
        }

        // Adding `pack` may make some already-unresolved operand pack
        // exactly produced now; transfer it out.
        let now_free: Vec<usize> = self
            .unresolved
            .iter()
            .filter(|(_, (op, _, _))| ordered_exact_match(&pack, op))
            .map(|(&k, _)| k)
            .collect();
        for k in now_free {
            if let Some((_, _, c)) = self.unresolved.remove(&k) {
                self.cost -= c;
            }
        }

        true
    }

    /// `Plan.remove(pack)`: reverts both indices and the cost.
    pub fn remove(&mut self, pack: &Rc<VectorPack>, heuristic: &Heuristic) -> bool {
        let Some(pos) = self.packs.iter().position(|p| Rc::ptr_eq(p, pack)) else {
            return false;
        };
        self.packs.remove(pos);
        self.cost -= pack.producing_cost;
        for id in pack.elements.iter() {
            self.producers.remove(&id);
        }
        self.covered.subtract(&pack.elements);

        for op in &pack.operand_packs {
            self.dereference_operand(op, heuristic);
        }

        // `pack` may have been the sole exact producer backing some other
        // committed pack's operand pack; any such operand pack now needs to
        // become unresolved.
        let mut to_add_back = Vec::new();
        for p in &self.packs {
            for op in &p.operand_packs {
                let key = Rc::as_ptr(op) as usize;
                if !self.unresolved.contains_key(&key) && !ordered_exact_match_against(&self.packs, op) {
                    to_add_back.push(op.clone());
                }
            }
        }
        for op in to_add_back {
            self.reference_operand(&op, heuristic);
        }

        true
    }

    fn reference_operand(&mut self, op: &Rc<OperandPack>, heuristic: &Heuristic) {
        if self.exactly_produced_by_other(op, None) {
            return;
        }
        let key = Rc::as_ptr(op) as usize;
        match self.unresolved.get_mut(&key) {
            Some(entry) => entry.1 += 1,
            None => {
                let solved = heuristic.solve(op);
                self.cost += solved;
                self.unresolved.insert(key, (op.clone(), 1, solved));
            }
        }
    }

    fn dereference_operand(&mut self, op: &Rc<OperandPack>, _heuristic: &Heuristic) {
        let key = Rc::as_ptr(op) as usize;
        if let Some(entry) = self.unresolved.get_mut(&key) {
            entry.1 -= 1;
            if entry.1 == 0 {
                if let Some((_, _, c)) = self.unresolved.remove(&key) {
                    self.cost -= c;
                }
            }
        }
    }

    /// Debug cross-check (spec §4.13/§8 property 4): recompute cost from
    /// scratch and compare to the incrementally maintained value.
    pub fn verify_cost(&self, env: &super::Env, heuristic: &Heuristic) -> f64 {
        let mut total = 0.0;
        for pack in &self.packs {
            total += pack.producing_cost;
            for id in pack.elements.iter() {
                let v = env.index.value(id);
                let users = env.block.in_block_users(v);
                if users.iter().any(|&u| env.index.try_id(u).map_or(true, |uid| !self.covered.contains(uid))) {
                    let vt = pack.vector_type();
                    let lane = pack.lane_of(v).unwrap_or(0);
                    total += env.cost_model.vector_instr_cost(VectorInstrKind::Extract, vt, lane);
                }
            }
        }
        let mut charged: std::collections::HashSet<usize> = std::collections::HashSet::new();
        for pack in &self.packs {
            for op in &pack.operand_packs {
                let key = Rc::as_ptr(op) as usize;
                if !charged.insert(key) {
                    continue;
                }
                if !self.exactly_produced_by_other(op, None) {
                    total += heuristic.solve(op);
                }
            }
        }
        total
    }
}

fn ordered_exact_match(p: &VectorPack, op: &OperandPack) -> bool {
    p.ordered_values.len() == op.slots.len()
        && p.ordered_values.iter().zip(op.slots.iter()).all(|(pv, os)| match (pv, os) {
            (Some(a), Some(crate::ir::Operand::Value(b))) => a == b,
            (None, None) => true,
            _ => false,
        })
}

fn ordered_exact_match_against(packs: &[Rc<VectorPack>], op: &OperandPack) -> bool {
    packs.iter().any(|p| ordered_exact_match(p, op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MatchManager;
    use crate::config::PackerConfig;
    use crate::ir::{BlockId, BasicBlock, Instruction, IrType, Operand};
    use crate::pack::VectorPackContext;
    use crate::search::heuristic::Inst2Packs;
    use crate::search::Env;
    use crate::target::VectorType;
    use crate::testutil::{NoAliasOracle, StubCostModel, StubScalarEvolution};

    fn four_loads() -> BasicBlock {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        for i in 0..4u32 {
            block.instructions.push(Instruction::Load {
                site: Value(i),
                ptr: Operand::Value(Value(100 + i)),
                ty: IrType::F32,
                align: 4,
            });
        }
        block
    }

    #[test]
    fn add_then_remove_restores_cost() {
        let block = four_loads();
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

        let loads = vec![Some(Value(0)), Some(Value(1)), Some(Value(2)), Some(Value(3))];
        let mut elements = Bitset::new(index.len());
        for v in loads.iter().flatten() {
            elements.insert(index.id(*v));
        }
        let depended = Bitset::new(index.len());
        let pack = pack_ctx.create_load_pack(loads, elements, depended, &cost_model, VectorType::new(IrType::F32, 4), 4).unwrap();

        let inst2packs = Inst2Packs::build(&env, &[pack.clone()]);
        let heuristic = Heuristic::new(&env, &inst2packs);

        let mut plan = Plan::new(index.len());
        assert_eq!(plan.cost(), 0.0);
        assert!(plan.add(pack.clone(), &heuristic));
        let cost_after_add = plan.cost();
        assert!(cost_after_add > 0.0);
        assert!(plan.remove(&pack, &heuristic));
        assert!((plan.cost() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn add_rejects_overlapping_elements() {
        let block = four_loads();
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

        let mk_pack = |loads: Vec<Option<Value>>| {
            let mut elements = Bitset::new(index.len());
            for v in loads.iter().flatten() {
                elements.insert(index.id(*v));
            }
            pack_ctx.create_load_pack(loads, elements, Bitset::new(index.len()), &cost_model, VectorType::new(IrType::F32, 2), 4).unwrap()
        };
        let p1 = mk_pack(vec![Some(Value(0)), Some(Value(1))]);
        let p2 = mk_pack(vec![Some(Value(1)), Some(Value(2))]);

        let inst2packs = Inst2Packs::build(&env, &[p1.clone(), p2.clone()]);
        let heuristic = Heuristic::new(&env, &inst2packs);
        let mut plan = Plan::new(index.len());
        assert!(plan.add(p1, &heuristic));
        assert!(!plan.add(p2, &heuristic));
    }
}

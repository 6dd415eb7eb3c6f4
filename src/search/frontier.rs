//! `Frontier` (spec §3/§4.5): the search state. Copy-on-write — every
//! `advance_*` takes `&self` and returns a new `Frontier` plus the
//! transition's incremental cost; the source is never mutated.

use super::Env;
use crate::common::bitset::Bitset;
use crate::ir::{Operand, Value};
use crate::pack::{OperandPack, VectorPack};
use crate::target::{ShuffleKind, VectorInstrKind};
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct Frontier {
    /// Index into `Env::order`: the first position not yet frozen. Purely
    /// an iteration aid (spec §3 `bb_iter`), not load-bearing for
    /// correctness — every real decision is read off `free`/`usable`.
    pub cursor: usize,
    pub free: Bitset,
    pub unresolved_scalars: Bitset,
    pub usable: Bitset,
    /// Kept sorted by interned pointer address (spec §4.5) so dedup and
    /// membership checks are cheap and deterministic.
    pub unresolved_packs: Vec<Rc<OperandPack>>,
}

impl Frontier {
    /// Fresh frontier for a block: cursor at the last instruction, every
    /// instruction free, every instruction with no in-block user (plus
    /// every phi) usable, and any dest-producing, user-less instruction
    /// flagged as needing an eventual scalar result (spec §4.5 "starting
    /// state").
    pub fn new(env: &Env) -> Self {
        let n = env.index.len();
        let mut free = Bitset::new(n);
        for i in 0..n {
            free.insert(i);
        }

        let mut usable = Bitset::new(n);
        let mut unresolved_scalars = Bitset::new(n);

        for phi in &env.block.phis {
            usable.insert(env.index.id(phi.dest));
        }
        for inst in &env.block.instructions {
            let id = env.index.id(inst.site());
            let users = env.block.in_block_users(inst.site());
            if users.is_empty() {
                usable.insert(id);
                if inst.dest().is_some() {
                    unresolved_scalars.insert(id);
                }
            }
        }

        let mut f = Self { cursor: 0, free, unresolved_scalars, usable, unresolved_packs: Vec::new() };
        f.skip_frozen_cursor(env);
        f
    }

    fn skip_frozen_cursor(&mut self, env: &Env) {
        while self.cursor < env.order.len() && !self.free.contains(env.index.id(env.order[self.cursor])) {
            self.cursor += 1;
        }
    }

    /// Terminal iff every instruction has been decided. Spec §4.9 phrases
    /// this as `unresolved_scalars = 0 and unresolved_packs empty`; that's
    /// equivalent to `free.is_empty()` for every dest-producing instruction
    /// (construction seeds `unresolved_scalars` for any user-less result,
    /// and scalarizing propagates it to free operands, so the bit only
    /// clears once nothing still needs that value). The one case the
    /// literal spec phrasing misses is an effect-only instruction (a
    /// `Store`, which has no dest and so never sets `unresolved_scalars`)
    /// — `free.is_empty()` additionally requires stores to be resolved too.
    pub fn is_terminal(&self) -> bool {
        self.free.is_empty()
    }

    pub fn usable_values<'a>(&'a self, env: &'a Env) -> impl Iterator<Item = Value> + 'a {
        (0..env.index.len()).filter(move |&id| self.usable.contains(id)).map(move |id| env.index.value(id))
    }

    fn refresh_usable_after_freeze(&mut self, env: &Env, frozen: Value) {
        let inst = env.block.instructions.iter().find(|i| i.site() == frozen);
        let Some(inst) = inst else { return };
        for operand in inst.operand_values() {
            let Some(oid) = env.index.try_id(operand) else { continue };
            if self.free.contains(oid) {
                let users = env.block.in_block_users(operand);
                let all_frozen = users.iter().all(|u| !self.free.contains(env.index.id(*u)));
                self.usable.set(oid, all_frozen);
            }
        }
    }

    fn resolve_packs_touching(&mut self, env: &Env, frozen: Value, vt_of_lane: impl Fn(&OperandPack) -> crate::target::VectorType, mut pay: impl FnMut(f64)) {
        let mut kept = Vec::with_capacity(self.unresolved_packs.len());
        for pack in std::mem::take(&mut self.unresolved_packs) {
            let touches = pack.slots.iter().any(|s| matches!(s, Some(Operand::Value(v)) if *v == frozen));
            if !touches {
                kept.push(pack);
                continue;
            }
            let vt = vt_of_lane(&pack);
            if pack.is_splat_of(Operand::Value(frozen)) {
                pay(env.cost_model.shuffle_cost(ShuffleKind::Broadcast, vt, 0));
                continue;
            }
            for (lane, slot) in pack.slots.iter().enumerate() {
                if matches!(slot, Some(Operand::Value(v)) if *v == frozen) {
                    pay(env.cost_model.vector_instr_cost(VectorInstrKind::Insert, vt, lane as u32));
                }
            }
            let all_resolved = pack.slots.iter().all(|s| match s {
                None => true,
                Some(Operand::Value(v)) => !self.free.contains(env.index.id(*v)),
                Some(Operand::Const(_)) => true,
            });
            if !all_resolved {
                kept.push(pack);
            }
        }
        kept.sort_by_key(|p| Rc::as_ptr(p) as usize);
        kept.dedup_by(|a, b| Rc::ptr_eq(a, b));
        self.unresolved_packs = kept;
    }

    /// `advanceInplace(inst)` (spec §4.5): scalarize one instruction.
    pub fn advance_scalar(&self, env: &Env, inst_value: Value) -> (Frontier, f64) {
        let id = env.index.id(inst_value);
        debug_assert!(self.free.contains(id), "advance_scalar on a non-free value");
        let mut next = self.clone();
        let mut cost = 0.0;

        next.free.remove(id);
        next.unresolved_scalars.remove(id);
        next.usable.remove(id);

        next.refresh_usable_after_freeze(env, inst_value);
        next.skip_frozen_cursor(env);
        next.resolve_packs_touching(env, inst_value, |p| env.operand_pack_vector_type(p), |c| cost += c);

        if let Some(inst) = env.block.instructions.iter().find(|i| i.site() == inst_value) {
            for operand in inst.operand_values() {
                if let Some(oid) = env.index.try_id(operand) {
                    if next.free.contains(oid) {
                        next.unresolved_scalars.insert(oid);
                    }
                }
            }
        }

        (next, cost)
    }

    /// `advanceInplace(pack)` (spec §4.5): commit a vector pack.
    pub fn advance_pack(&self, env: &Env, pack: &Rc<VectorPack>) -> (Frontier, f64) {
        let mut next = self.clone();
        let mut cost = pack.cost;
        let vt = pack.vector_type();

        for id in pack.elements.iter() {
            if self.unresolved_scalars.contains(id) {
                let lane = pack.ordered_values.iter().position(|v| *v == Some(env.index.value(id))).unwrap_or(0);
                cost += env.cost_model.vector_instr_cost(VectorInstrKind::Extract, vt, lane as u32);
            }
        }

        let frozen_values: Vec<Value> = pack.elements.iter().map(|id| env.index.value(id)).collect();
        for id in pack.elements.iter() {
            next.free.remove(id);
            next.unresolved_scalars.remove(id);
            next.usable.remove(id);
        }
        for &v in &frozen_values {
            next.refresh_usable_after_freeze(env, v);
        }
        next.skip_frozen_cursor(env);

        for &v in &frozen_values {
            next.resolve_packs_touching(env, v, |p| env.operand_pack_vector_type(p), |c| cost += c);
        }

        // §4.5 step 6: gather cost if this pack supplies lanes of an
        // already-unresolved operand pack, then insert cost for this pack's
        // own operand packs on foreign-block/non-instruction lanes, and add
        // them to `unresolved_packs`.
        for unresolved in next.unresolved_packs.clone() {
            let covers: Vec<(usize, Value)> = unresolved
                .slots
                .iter()
                .enumerate()
                .filter_map(|(lane, s)| match s {
                    Some(Operand::Value(v)) if pack.values().any(|pv| pv == *v) => Some((lane, *v)),
                    _ => None,
                })
                .collect();
            if covers.is_empty() {
                continue;
            }
            let gather_kind = gather_shape(pack, &unresolved, &covers);
            let uvt = env.operand_pack_vector_type(&unresolved);
            match gather_kind {
                GatherShape::Exact => {}
                GatherShape::Permutation => cost += env.cost_model.shuffle_cost(ShuffleKind::PermuteSingleSrc, uvt, 0),
                GatherShape::Partial => cost += env.cost_model.shuffle_cost(ShuffleKind::PermuteTwoSrc, uvt, 0),
            }
        }

        for operand_pack in &pack.operand_packs {
            for (lane, slot) in operand_pack.slots.iter().enumerate() {
                let foreign = match slot {
                    Some(Operand::Value(v)) => {
                        env.block.instructions.iter().all(|i| i.site() != *v) && env.block.phis.iter().all(|p| p.dest != *v)
                    }
                    Some(Operand::Const(_)) => true,
                    None => false,
                };
                if foreign {
                    let opvt = env.operand_pack_vector_type(operand_pack);
                    cost += env.cost_model.vector_instr_cost(VectorInstrKind::Insert, opvt, lane as u32);
                }
            }
            let already_resolved = operand_pack.slots.iter().all(|s| match s {
                None => true,
                Some(Operand::Value(v)) => !next.free.contains(env.index.id(*v)),
                Some(Operand::Const(_)) => true,
            });
            if !already_resolved && !next.unresolved_packs.iter().any(|p| Rc::ptr_eq(p, operand_pack)) {
                next.unresolved_packs.push(operand_pack.clone());
            }
        }
        next.unresolved_packs.sort_by_key(|p| Rc::as_ptr(p) as usize);
        next.unresolved_packs.dedup_by(|a, b| Rc::ptr_eq(a, b));

        (next, cost)
    }

    /// `advanceInplace(shuffle)` (spec §4.5): replace an unresolved operand
    /// pack with a differently-ordered list of the same inputs, paying a
    /// shuffle cost. This is the conservative open question from spec §9
    /// ("partial reuse of operand packs") exercised explicitly rather than
    /// automatically discovered by the MCTS search (see DESIGN.md).
    pub fn advance_shuffle(&self, env: &Env, from: &Rc<OperandPack>, to: Rc<OperandPack>) -> (Frontier, f64) {
        debug_assert_eq!(from.slots.len(), to.slots.len(), "shuffle must preserve lane count");
        let mut next = self.clone();
        let vt = env.operand_pack_vector_type(from);
        let cost = env.cost_model.shuffle_cost(ShuffleKind::PermuteSingleSrc, vt, 0);
        if let Some(pos) = next.unresolved_packs.iter().position(|p| Rc::ptr_eq(p, from)) {
            next.unresolved_packs.remove(pos);
        }
        let already_resolved = to.slots.iter().all(|s| match s {
            None => true,
            Some(Operand::Value(v)) => !next.free.contains(env.index.id(*v)),
            Some(Operand::Const(_)) => true,
        });
        if !already_resolved && !next.unresolved_packs.iter().any(|p| Rc::ptr_eq(p, &to)) {
            next.unresolved_packs.push(to);
        }
        next.unresolved_packs.sort_by_key(|p| Rc::as_ptr(p) as usize);
        (next, cost)
    }
}

enum GatherShape {
    Exact,
    Permutation,
    Partial,
}

/// Zero if the pack's ordered values exactly equal the operand pack,
/// permute cost if a permutation of the same set, else a partial gather
/// (spec §4.5 step 5).
fn gather_shape(pack: &VectorPack, unresolved: &OperandPack, covers: &[(usize, Value)]) -> GatherShape {
    if covers.len() != unresolved.non_null_count() || covers.len() != pack.elements.count() {
        return GatherShape::Partial;
    }
    let exact = pack.ordered_values.iter().zip(unresolved.slots.iter()).all(|(pv, us)| match (pv, us) {
        (Some(a), Some(Operand::Value(b))) => a == b,
        (None, None) => true,
        _ => false,
    });
    if exact {
        GatherShape::Exact
    } else {
        GatherShape::Permutation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MatchManager;
    use crate::config::PackerConfig;
    use crate::ir::{BinOpKind, BlockId, BasicBlock, Instruction, IrType};
    use crate::pack::VectorPackContext;
    use crate::testutil::{NoAliasOracle, StubCostModel, StubScalarEvolution};

    fn simple_block() -> BasicBlock {
        // %0 = %a + %a   (no other uses: a trivial splat that never packs)
        let mut block = BasicBlock::new(BlockId(0), "entry");
        block.instructions.push(Instruction::BinOp {
            site: Value(0),
            op: BinOpKind::Add,
            lhs: Operand::Value(Value(10)),
            rhs: Operand::Value(Value(10)),
            ty: IrType::I32,
        });
        block
    }

    #[test]
    fn fresh_frontier_has_no_user_instruction_usable_and_unresolved() {
        let block = simple_block();
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

        let frontier = Frontier::new(&env);
        let id0 = index.id(Value(0));
        assert!(frontier.usable.contains(id0));
        assert!(frontier.unresolved_scalars.contains(id0));
        assert!(!frontier.is_terminal());
    }

    #[test]
    fn scalarizing_the_only_instruction_reaches_terminal() {
        let block = simple_block();
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

        let frontier = Frontier::new(&env);
        let (next, _cost) = frontier.advance_scalar(&env, Value(0));
        assert!(next.is_terminal());
    }
}

//! `VectorPackContext` (spec §4.4): canonicalizing factory for `VectorPack`
//! and `OperandPack` inside one basic block. Per §9's "cyclic ownership"
//! note, this is the arena: every `VectorPack`/`OperandPack` the search
//! builds for a block is interned here and lives exactly as long as the
//! context. Single-threaded (spec §5: "the context itself is single
//! threaded"), so interior mutability is plain `RefCell`, not a lock.

use super::operand::OperandPack;
use super::{PackData, VectorPack};
use crate::catalog::{InstBinding, Match};
use crate::common::bitset::Bitset;
use crate::common::fx::FxHashMap;
use crate::common::types::IrType;
use crate::ir::{Operand, Value};
use crate::target::{CostModel, MemOpKind, VectorType};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

pub struct VectorPackContext {
    /// `ValueIndex` universe size this context's bitsets are keyed over.
    universe: usize,
    packs: RefCell<Vec<Rc<VectorPack>>>,
    operand_pack_table: RefCell<FxHashMap<OperandPack, Rc<OperandPack>>>,
}

impl VectorPackContext {
    pub fn new(universe: usize) -> Self {
        Self { universe, packs: RefCell::new(Vec::new()), operand_pack_table: RefCell::new(FxHashMap::default()) }
    }

    pub fn universe(&self) -> usize {
        self.universe
    }

    pub fn num_packs(&self) -> usize {
        self.packs.borrow().len()
    }

    /// `getCanonicalOperandPack` (spec §4.4): identical slot sequences share
    /// one interned `Rc`, so pointer equality stands in for value equality
    /// everywhere else in the search (spec §8 property 7).
    pub fn get_canonical_operand_pack(&self, pack: OperandPack) -> Rc<OperandPack> {
        let mut table = self.operand_pack_table.borrow_mut();
        if let Some(existing) = table.get(&pack) {
            return existing.clone();
        }
        let rc = Rc::new(pack.clone());
        table.insert(pack, rc.clone());
        rc
    }

    pub fn canonicalize_values(&self, vals: &[Option<Value>], ty_hint: IrType) -> Rc<OperandPack> {
        let slots = vals.iter().map(|v| v.map(Operand::Value)).collect();
        self.get_canonical_operand_pack(OperandPack::new(slots, ty_hint))
    }

    fn intern(&self, pack: VectorPack) -> Rc<VectorPack> {
        let rc = Rc::new(pack);
        self.packs.borrow_mut().push(rc.clone());
        rc
    }

    /// Spec §7: "Cost model returns a sentinel 'unknown' cost ⇒ the pack is
    /// rejected at canonicalization time." A pack whose own cost is unknown
    /// never gets interned at all, so it can never be proposed as a seed,
    /// extension, or completed `PartialPack` — callers see `None` and treat
    /// that candidate as if it had never been enumerable.
    fn intern_checked(&self, pack: VectorPack) -> Option<Rc<VectorPack>> {
        if !crate::target::is_known_cost(pack.cost) {
            return None;
        }
        Some(self.intern(pack))
    }

    /// `createLoadPack` (spec §4.4). `loads[i]` is the load at lane `i`, or
    /// `None` for a don't-care lane; non-null entries must already be
    /// chain-consecutive (enforced by the caller — enumeration §4.6).
    pub fn create_load_pack(
        &self,
        loads: Vec<Option<Value>>,
        elements: Bitset,
        depended: Bitset,
        cost_model: &dyn CostModel,
        vt: VectorType,
        align: u32,
    ) -> Option<Rc<VectorPack>> {
        let cost = cost_model.mem_op_cost(MemOpKind::Load, vt, align);
        self.intern_checked(VectorPack {
            ordered_values: loads.clone(),
            data: PackData::Load { loads },
            elements,
            depended,
            cost,
            producing_cost: cost,
            operand_packs: Vec::new(),
            element_ty: vt.element,
        })
    }

    /// `createStorePack` (spec §4.4). The stored-value operand pack (one of
    /// the store's own operand packs) is derived by the caller since it
    /// depends on each store's `val` operand, not on this context alone.
    pub fn create_store_pack(
        &self,
        stores: Vec<Option<Value>>,
        value_operand_pack: Rc<OperandPack>,
        elements: Bitset,
        depended: Bitset,
        cost_model: &dyn CostModel,
        vt: VectorType,
        align: u32,
    ) -> Option<Rc<VectorPack>> {
        let cost = cost_model.mem_op_cost(MemOpKind::Store, vt, align);
        self.intern_checked(VectorPack {
            ordered_values: stores.clone(),
            data: PackData::Store { stores },
            elements,
            depended,
            cost,
            producing_cost: cost,
            operand_packs: vec![value_operand_pack],
            element_ty: vt.element,
        })
    }

    /// `createPhiPack` (spec §4.4): one operand pack per incoming edge.
    /// Phis cost nothing to pack — they're eliminated into one vector-typed
    /// phi, not lowered to an instruction the cost model prices.
    pub fn create_phi_pack(
        &self,
        phis: Vec<Value>,
        incoming_operand_packs: Vec<Rc<OperandPack>>,
        elements: Bitset,
        depended: Bitset,
        element_ty: IrType,
    ) -> Rc<VectorPack> {
        let ordered_values = phis.iter().map(|&v| Some(v)).collect();
        self.intern(VectorPack {
            ordered_values,
            data: PackData::Phi { phis },
            elements,
            depended,
            cost: 0.0,
            producing_cost: 0.0,
            operand_packs: incoming_operand_packs,
            element_ty,
        })
    }

    /// `createVectorPack` (spec §4.4): a catalog `InstBinding` plus one
    /// `Match` per lane (don't-care lanes get `None`). Operand packs are
    /// derived from the lane signature per §4.4's "computeOperandPacks".
    pub fn create_vector_pack(
        &self,
        matches: Vec<Option<Match>>,
        elements: Bitset,
        depended: Bitset,
        binding: Arc<InstBinding>,
        cost_model: &dyn CostModel,
        vt: VectorType,
    ) -> Option<Rc<VectorPack>> {
        let ordered_values = matches.iter().map(|m| m.as_ref().map(|m| m.output)).collect();
        let operand_packs = self.compute_operand_packs(&binding, &matches, vt.element);
        let cost = binding.cost(cost_model, vt);
        self.intern_checked(VectorPack {
            ordered_values,
            data: PackData::General { binding, matches },
            elements,
            depended,
            cost,
            producing_cost: cost,
            operand_packs,
            element_ty: vt.element,
        })
    }

    /// §4.4: "for each input slot of the producer signature, each lane's
    /// bound-slice declares a contribution; slices are sorted by offset and
    /// padded with don't-cares to fill the vector width".
    fn compute_operand_packs(
        &self,
        binding: &InstBinding,
        matches: &[Option<Match>],
        element_ty: IrType,
    ) -> Vec<Rc<OperandPack>> {
        let width = binding.lane_count() as usize;
        let mut slots: Vec<Vec<Option<Operand>>> = vec![vec![None; width]; binding.num_inputs];
        for (lane, m) in matches.iter().enumerate() {
            let Some(m) = m else { continue };
            let offsets = &binding.signature[lane].input_offsets;
            for (input_idx, &offset) in offsets.iter().enumerate() {
                if let Some(&operand) = m.inputs.get(input_idx) {
                    slots[input_idx][offset] = Some(operand);
                }
            }
        }
        slots
            .into_iter()
            .map(|s| self.get_canonical_operand_pack(OperandPack::new(s, element_ty)))
            .collect()
    }

    /// `dedup(op)` (spec §4.7): the distinct non-null values of `op`, in
    /// first-occurrence order, with duplicates and don't-cares dropped.
    pub fn dedup(&self, op: &OperandPack) -> Rc<OperandPack> {
        let mut seen: Vec<Operand> = Vec::new();
        let mut slots = Vec::new();
        for slot in &op.slots {
            if let Some(v) = slot {
                if !seen.contains(v) {
                    seen.push(*v);
                    slots.push(Some(*v));
                }
            }
        }
        self.get_canonical_operand_pack(OperandPack::new(slots, op.ty_hint))
    }

    /// `odd(op)` (spec §4.4/§4.8): the odd-indexed (1,3,5,...) lanes, used
    /// by the bottom-up improver's half-split decomposition.
    pub fn odd(&self, op: &OperandPack) -> Rc<OperandPack> {
        let slots = op.slots.iter().skip(1).step_by(2).cloned().collect();
        self.get_canonical_operand_pack(OperandPack::new(slots, op.ty_hint))
    }

    /// `even(op)`: the even-indexed (0,2,4,...) lanes.
    pub fn even(&self, op: &OperandPack) -> Rc<OperandPack> {
        let slots = op.slots.iter().step_by(2).cloned().collect();
        self.get_canonical_operand_pack(OperandPack::new(slots, op.ty_hint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sequences_share_one_pointer() {
        let ctx = VectorPackContext::new(8);
        let a = ctx.canonicalize_values(&[Some(Value(0)), Some(Value(1))], IrType::I32);
        let b = ctx.canonicalize_values(&[Some(Value(0)), Some(Value(1))], IrType::I32);
        assert!(Rc::ptr_eq(&a, &b));
        let c = ctx.canonicalize_values(&[Some(Value(1)), Some(Value(0))], IrType::I32);
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn dedup_drops_duplicates_and_dont_cares() {
        let ctx = VectorPackContext::new(8);
        let v = Value(3);
        let op = OperandPack::new(vec![Some(Operand::Value(v)), None, Some(Operand::Value(v))], IrType::I32);
        let deduped = ctx.dedup(&op);
        assert_eq!(deduped.slots, vec![Some(Operand::Value(v))]);
    }

    #[test]
    fn odd_even_split_alternating_lanes() {
        let ctx = VectorPackContext::new(8);
        let vals: Vec<Option<Value>> = (0..4).map(|i| Some(Value(i))).collect();
        let op = OperandPack::new(vals.iter().map(|v| v.map(Operand::Value)).collect(), IrType::I32);
        let even = ctx.even(&op);
        let odd = ctx.odd(&op);
        assert_eq!(even.slots, vec![Some(Operand::Value(Value(0))), Some(Operand::Value(Value(2)))]);
        assert_eq!(odd.slots, vec![Some(Operand::Value(Value(1))), Some(Operand::Value(Value(3)))]);
    }
}

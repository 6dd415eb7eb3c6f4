//! `PartialPack` (spec §3): in-progress fill of one pack-to-be. Built one
//! lane at a time by `try_fill`; `finish` turns a complete fill into an
//! interned `VectorPack` once `lane_id == lane_count`.

use super::Env;
use crate::catalog::{InstBinding, Match};
use crate::common::bitset::Bitset;
use crate::ir::{Instruction, Operand, Value};
use crate::pack::{OperandPack, VectorPack};
use crate::target::VectorType;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum PartialFill {
    Load(Vec<Option<Value>>),
    Store(Vec<Option<Value>>),
    General { binding: Arc<InstBinding>, matches: Vec<Option<Match>> },
}

#[derive(Debug, Clone)]
pub struct PartialPack {
    pub fill: PartialFill,
    pub lane_count: u32,
    /// `elements.popcount == lane_id` (spec §3 invariant).
    pub elements: Bitset,
    pub depended: Bitset,
    pub lane_id: usize,
}

impl PartialPack {
    pub fn new_load(lane_count: u32, universe: usize) -> Self {
        Self {
            fill: PartialFill::Load(vec![None; lane_count as usize]),
            lane_count,
            elements: Bitset::new(universe),
            depended: Bitset::new(universe),
            lane_id: 0,
        }
    }

    pub fn new_store(lane_count: u32, universe: usize) -> Self {
        Self {
            fill: PartialFill::Store(vec![None; lane_count as usize]),
            lane_count,
            elements: Bitset::new(universe),
            depended: Bitset::new(universe),
            lane_id: 0,
        }
    }

    pub fn new_general(binding: Arc<InstBinding>, universe: usize) -> Self {
        let lane_count = binding.lane_count();
        Self {
            fill: PartialFill::General { matches: vec![None; lane_count as usize], binding },
            lane_count,
            elements: Bitset::new(universe),
            depended: Bitset::new(universe),
            lane_id: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.lane_id as u32 == self.lane_count
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.fill {
            PartialFill::Load(_) => "load",
            PartialFill::Store(_) => "store",
            PartialFill::General { .. } => "general",
        }
    }

    /// Attempt to fill the next lane with `candidate`. `None` if `candidate`
    /// doesn't fit: already used, not pairwise-independent of every lane
    /// filled so far (spec §4.6), not chain-consecutive with the last
    /// filled load/store, or (for a catalog binding) doesn't match the
    /// binding's next lane signature.
    pub fn try_fill(&self, env: &Env, candidate: Value) -> Option<PartialPack> {
        let id = env.index.id(candidate);
        if self.elements.contains(id) {
            return None;
        }
        if self.elements.iter().any(|f| !env.lda.are_independent(f, id)) {
            return None;
        }

        let mut next = self.clone();
        match &mut next.fill {
            PartialFill::Load(loads) => {
                let is_load = env.block.instructions.iter().any(|i| i.site() == candidate && i.is_load());
                if !is_load {
                    return None;
                }
                if let Some(last) = loads.iter().rev().find_map(|v| *v) {
                    if !env.load_dag.has_edge(last, candidate) {
                        return None;
                    }
                }
                loads[self.lane_id] = Some(candidate);
            }
            PartialFill::Store(stores) => {
                let is_store = env.block.instructions.iter().any(|i| i.site() == candidate && i.is_store());
                if !is_store {
                    return None;
                }
                if let Some(last) = stores.iter().rev().find_map(|v| *v) {
                    if !env.store_dag.has_edge(last, candidate) {
                        return None;
                    }
                }
                stores[self.lane_id] = Some(candidate);
            }
            PartialFill::General { binding, matches } => {
                let inst = env.block.instructions.iter().find(|i| i.site() == candidate)?;
                let m = binding.try_match_lane(next.lane_id, inst)?;
                matches[next.lane_id] = Some(m);
            }
        }
        next.elements.insert(id);
        next.depended.union_with(env.lda.depended(id));
        next.lane_id += 1;
        Some(next)
    }

    /// Finish a complete fill into an interned `VectorPack`. `None` if the
    /// cost model reported an unknown cost for this shape — spec §7: "the
    /// pack is rejected at canonicalization time", so a fill that was
    /// `try_fill`-feasible can still fail to materialize here.
    pub fn finish(&self, env: &Env) -> Option<Rc<VectorPack>> {
        debug_assert!(self.is_complete(), "finish() called on an incomplete PartialPack");
        match &self.fill {
            PartialFill::Load(loads) => {
                let first = loads.iter().flatten().next().copied().expect("load pack with no filled lane");
                let inst = env.block.instructions.iter().find(|i| i.site() == first).unwrap();
                let (ty, align) = match inst {
                    Instruction::Load { ty, align, .. } => (*ty, *align),
                    _ => unreachable!(),
                };
                let vt = VectorType::new(ty, self.lane_count);
                env.ctx.create_load_pack(loads.clone(), self.elements.clone(), self.depended.clone(), env.cost_model, vt, align)
            }
            PartialFill::Store(stores) => {
                let first = stores.iter().flatten().next().copied().expect("store pack with no filled lane");
                let inst = env.block.instructions.iter().find(|i| i.site() == first).unwrap();
                let (ty, align) = match inst {
                    Instruction::Store { ty, align, .. } => (*ty, *align),
                    _ => unreachable!(),
                };
                let vt = VectorType::new(ty, self.lane_count);
                let value_slots: Vec<Option<Operand>> = stores
                    .iter()
                    .map(|s| {
                        s.map(|v| {
                            let store_inst = env.block.instructions.iter().find(|i| i.site() == v).unwrap();
                            match store_inst {
                                Instruction::Store { val, .. } => *val,
                                _ => unreachable!(),
                            }
                        })
                    })
                    .collect();
                let value_pack = env.ctx.get_canonical_operand_pack(OperandPack::new(value_slots, ty));
                env.ctx.create_store_pack(stores.clone(), value_pack, self.elements.clone(), self.depended.clone(), env.cost_model, vt, align)
            }
            PartialFill::General { binding, matches } => {
                let output = matches.iter().flatten().next().map(|m| m.output).expect("general pack with no filled lane");
                let ty = env.value_type(output);
                let vt = VectorType::new(ty, self.lane_count);
                env.ctx.create_vector_pack(matches.clone(), self.elements.clone(), self.depended.clone(), binding.clone(), env.cost_model, vt)
            }
        }
    }
}

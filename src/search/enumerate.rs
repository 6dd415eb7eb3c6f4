//! Pack enumeration (spec §4.6): seed memory packs found by walking the
//! `ConsecutiveAccessDAG`, extension packs found by searching backward from
//! an unresolved `OperandPack`, and the optional load-coalescing pass.

use super::Env;
use crate::analysis::ConsecutiveAccessDag;
use crate::catalog::Match;
use crate::common::bitset::Bitset;
use crate::ir::{Instruction, Operand, Value};
use crate::pack::{OperandPack, VectorPack};
use crate::target::VectorType;
use std::collections::HashSet;
use std::rc::Rc;

const LANE_COUNTS: [u32; 5] = [2, 4, 8, 16, 32];

fn allowed_lane_counts(max_lanes: u32) -> impl Iterator<Item = u32> {
    LANE_COUNTS.into_iter().filter(move |&vl| vl <= max_lanes)
}

fn extend_chain(env: &Env, dag: &ConsecutiveAccessDag, chain: &mut Vec<Value>, vl: u32, cap: usize, out: &mut Vec<Vec<Value>>) {
    if out.len() >= cap {
        return;
    }
    if chain.len() as u32 == vl {
        out.push(chain.clone());
        return;
    }
    let last = *chain.last().unwrap();
    for &succ in dag.successors(last) {
        if chain.contains(&succ) {
            continue;
        }
        let mut ids: Vec<usize> = chain.iter().map(|v| env.index.id(*v)).collect();
        ids.push(env.index.id(succ));
        if !env.lda.all_independent(&ids) {
            continue;
        }
        chain.push(succ);
        extend_chain(env, dag, chain, vl, cap, out);
        chain.pop();
        if out.len() >= cap {
            return;
        }
    }
}

pub(crate) fn build_memory_pack(env: &Env, chain: &[Value], want_loads: bool) -> Option<Rc<VectorPack>> {
    let lanes = chain.len() as u32;
    let ordered: Vec<Option<Value>> = chain.iter().map(|&v| Some(v)).collect();
    let mut elements = Bitset::new(env.index.len());
    let mut depended = Bitset::new(env.index.len());
    for &v in chain {
        let id = env.index.id(v);
        elements.insert(id);
        depended.union_with(env.lda.depended(id));
    }
    let first = env.block.instructions.iter().find(|i| i.site() == chain[0]).unwrap();
    if want_loads {
        let (ty, align) = match first {
            Instruction::Load { ty, align, .. } => (*ty, *align),
            _ => unreachable!("seed chain contains a non-load"),
        };
        let vt = VectorType::new(ty, lanes);
        env.ctx.create_load_pack(ordered, elements, depended, env.cost_model, vt, align)
    } else {
        let (ty, align) = match first {
            Instruction::Store { ty, align, .. } => (*ty, *align),
            _ => unreachable!("seed chain contains a non-store"),
        };
        let vt = VectorType::new(ty, lanes);
        let value_slots: Vec<Option<Operand>> = chain
            .iter()
            .map(|&v| {
                let inst = env.block.instructions.iter().find(|i| i.site() == v).unwrap();
                match inst {
                    Instruction::Store { val, .. } => Some(*val),
                    _ => unreachable!(),
                }
            })
            .collect();
        let value_pack = env.ctx.get_canonical_operand_pack(OperandPack::new(value_slots, ty));
        env.ctx.create_store_pack(ordered, value_pack, elements, depended, env.cost_model, vt, align)
    }
}

/// Seed memory packs (spec §4.6): every maximal, pairwise-independent chain
/// of each target lane count, starting from every access of the requested
/// kind.
pub fn seed_memory_packs(env: &Env, want_loads: bool) -> Vec<Rc<VectorPack>> {
    let dag = if want_loads { env.load_dag } else { env.store_dag };
    let accesses: Vec<Value> = env
        .block
        .instructions
        .iter()
        .filter(|i| if want_loads { i.is_load() } else { i.is_store() })
        .map(|i| i.site())
        .collect();

    let mut packs = Vec::new();
    'outer: for &a in &accesses {
        for vl in allowed_lane_counts(env.config.max_num_lanes) {
            let mut chains = Vec::new();
            let mut chain = vec![a];
            extend_chain(env, dag, &mut chain, vl, env.config.enum_cap, &mut chains);
            for c in chains {
                if let Some(pack) = build_memory_pack(env, &c, want_loads) {
                    packs.push(pack);
                    if packs.len() >= env.config.enum_cap {
                        break 'outer;
                    }
                }
            }
        }
    }
    packs
}

/// Every maximal chain of phis sharing a common type with a matching number
/// of incoming edges (spec §3/§4.4 phi pack), grouped by `(type, incoming
/// edge count)` and capped to `max_num_lanes`-sized groups.
pub fn seed_phi_packs(env: &Env) -> Vec<Rc<VectorPack>> {
    let mut packs = Vec::new();
    let mut by_shape: std::collections::HashMap<(crate::common::types::IrType, usize), Vec<Value>> = std::collections::HashMap::new();
    for phi in &env.block.phis {
        by_shape.entry((phi.ty, phi.incoming.len())).or_default().push(phi.dest);
    }
    for ((ty, num_incoming), dests) in by_shape {
        for vl in allowed_lane_counts(env.config.max_num_lanes) {
            if vl as usize > dests.len() {
                continue;
            }
            for chunk in dests.chunks(vl as usize) {
                if chunk.len() < vl as usize {
                    continue;
                }
                let ids: Vec<usize> = chunk.iter().map(|&v| env.index.id(v)).collect();
                if !env.lda.all_independent(&ids) {
                    continue;
                }
                let mut elements = Bitset::new(env.index.len());
                for &id in &ids {
                    elements.insert(id);
                }
                let depended = Bitset::new(env.index.len());
                let mut incoming_operand_packs = Vec::with_capacity(num_incoming);
                for edge_idx in 0..num_incoming {
                    let slots: Vec<Option<Operand>> = chunk
                        .iter()
                        .map(|&dest| {
                            let phi = env.block.phis.iter().find(|p| p.dest == dest).unwrap();
                            Some(phi.incoming[edge_idx].value)
                        })
                        .collect();
                    incoming_operand_packs.push(env.ctx.get_canonical_operand_pack(OperandPack::new(slots, ty)));
                }
                packs.push(env.ctx.create_phi_pack(chunk.to_vec(), incoming_operand_packs, elements, depended, ty));
            }
        }
    }
    packs
}

/// Extension packs (spec §4.6): given an unresolved `OperandPack`, either
/// reconstruct a load chain that supplies exactly its (possibly permuted)
/// load set, or find a catalog binding whose every lane has a match for the
/// corresponding slot.
pub fn extension_packs(env: &Env, operand_pack: &OperandPack, already_packed: &Bitset) -> Vec<Rc<VectorPack>> {
    let mut out = Vec::new();
    let has_any = operand_pack.non_null_count() > 0;
    let all_loads = has_any
        && operand_pack.slots.iter().all(|s| match s {
            None => true,
            Some(Operand::Value(v)) => env.block.instructions.iter().any(|i| i.site() == *v && i.is_load()),
            Some(Operand::Const(_)) => false,
        });

    if all_loads {
        if let Some(pack) = reconstruct_load_chain(env, operand_pack, already_packed) {
            out.push(pack);
        }
        return out;
    }

    for binding in env.legal_bindings() {
        if binding.lane_count() as usize != operand_pack.slots.len() {
            continue;
        }
        let mut chosen: Vec<Option<Match>> = Vec::with_capacity(operand_pack.slots.len());
        let mut feasible = true;
        for (lane, slot) in operand_pack.slots.iter().enumerate() {
            match slot {
                None => chosen.push(None),
                Some(Operand::Const(_)) => {
                    feasible = false;
                    break;
                }
                Some(Operand::Value(v)) => {
                    let op_name = binding.signature[lane].operation.name();
                    match env.matches.matches_for_output(op_name, *v, env.index) {
                        Some(m) => chosen.push(Some(m.clone())),
                        None => {
                            feasible = false;
                            break;
                        }
                    }
                }
            }
        }
        if !feasible {
            continue;
        }

        let ids: Vec<usize> = chosen.iter().flatten().map(|m| env.index.id(m.output)).collect();
        if ids.is_empty() || !env.lda.all_independent(&ids) {
            continue;
        }
        if ids.iter().any(|&id| already_packed.contains(id)) {
            continue;
        }
        if ids.iter().any(|&id| env.lda.depended(id).iter().any(|d| already_packed.contains(d))) {
            continue;
        }

        let mut elements = Bitset::new(env.index.len());
        let mut depended = Bitset::new(env.index.len());
        for &id in &ids {
            elements.insert(id);
            depended.union_with(env.lda.depended(id));
        }
        let output = chosen.iter().flatten().next().unwrap().output;
        let ty = env.value_type(output);
        let vt = VectorType::new(ty, binding.lane_count());
        if let Some(pack) = env.ctx.create_vector_pack(chosen, elements, depended, binding.clone(), env.cost_model, vt) {
            out.push(pack);
        }
    }
    out
}

/// Best-effort reconstruction of a load chain supplying exactly
/// `operand_pack`'s non-null load set (spec §4.6). Walks from the element
/// with no in-set predecessor, following chain edges and preferring
/// in-set successors; missing trailing positions become don't-cares.
fn reconstruct_load_chain(env: &Env, operand_pack: &OperandPack, already_packed: &Bitset) -> Option<Rc<VectorPack>> {
    let lanes = operand_pack.lanes();
    let wanted: Vec<Value> = operand_pack
        .slots
        .iter()
        .filter_map(|s| match s {
            Some(Operand::Value(v)) => Some(*v),
            _ => None,
        })
        .collect();
    if wanted.is_empty() {
        return None;
    }
    let wanted_set: HashSet<Value> = wanted.iter().copied().collect();

    let head = *wanted.iter().find(|&&v| !env.load_dag.predecessors(v).iter().any(|p| wanted_set.contains(p)))?;

    let mut chain = vec![head];
    let mut visited: HashSet<Value> = [head].into_iter().collect();
    while (chain.len() as u32) < lanes && !wanted_set.iter().all(|v| visited.contains(v)) {
        let last = *chain.last().unwrap();
        let next = env
            .load_dag
            .successors(last)
            .iter()
            .find(|s| wanted_set.contains(s) && !visited.contains(s))
            .copied();
        let Some(next_v) = next else { break };
        chain.push(next_v);
        visited.insert(next_v);
    }
    if !wanted_set.iter().all(|v| visited.contains(v)) {
        return None;
    }

    let mut ordered: Vec<Option<Value>> = chain.iter().map(|&v| Some(v)).collect();
    if (ordered.len() as u32) > lanes {
        return None;
    }
    ordered.resize(lanes as usize, None);

    let ids: Vec<usize> = ordered.iter().flatten().map(|v| env.index.id(*v)).collect();
    if !env.lda.all_independent(&ids) {
        return None;
    }
    if ids.iter().any(|&id| already_packed.contains(id)) {
        return None;
    }

    let mut elements = Bitset::new(env.index.len());
    let mut depended = Bitset::new(env.index.len());
    for &id in &ids {
        elements.insert(id);
        depended.union_with(env.lda.depended(id));
    }
    let first_inst = env.block.instructions.iter().find(|i| i.site() == head).unwrap();
    let (ty, align) = match first_inst {
        Instruction::Load { ty, align, .. } => (*ty, *align),
        _ => unreachable!(),
    };
    let vt = VectorType::new(ty, lanes);
    env.ctx.create_load_pack(ordered, elements, depended, env.cost_model, vt, align)
}

/// Optional load coalescing (spec §4.6/§9): merge a sparse load pack with
/// an independent, equal-width load pack whenever doing so strictly
/// increases coverage density, ties broken by fewer total lanes (the
/// resolution DESIGN.md records for spec's open question).
pub fn coalesce_sparse_loads(packs: Vec<Rc<VectorPack>>) -> Vec<Rc<VectorPack>> {
    let mut out: Vec<Rc<VectorPack>> = Vec::with_capacity(packs.len());
    let mut used = vec![false; packs.len()];
    for i in 0..packs.len() {
        if used[i] {
            continue;
        }
        if !packs[i].is_load() {
            out.push(packs[i].clone());
            continue;
        }
        let mut best = packs[i].clone();
        let mut best_density = density(&best);
        if best_density >= 1.0 {
            out.push(best);
            continue;
        }
        for j in (i + 1)..packs.len() {
            if used[j] || !packs[j].is_load() || packs[j].lanes() != best.lanes() {
                continue;
            }
            if !best.elements.is_disjoint(&packs[j].elements) {
                continue;
            }
            if let Some(merged) = merge_load_packs(&best, &packs[j]) {
                let merged_density = density(&merged);
                if merged_density > best_density {
                    best = merged;
                    best_density = merged_density;
                    used[j] = true;
                }
            }
        }
        out.push(best);
    }
    out
}

fn density(pack: &VectorPack) -> f64 {
    pack.elements.count() as f64 / pack.lanes().max(1) as f64
}

/// Fills `a`'s don't-care slots from `b`'s concrete loads at the same lane
/// index, when the two packs never both claim a lane.
fn merge_load_packs(a: &Rc<VectorPack>, b: &Rc<VectorPack>) -> Option<Rc<VectorPack>> {
    let crate::pack::PackData::Load { loads: a_loads } = &a.data else { return None };
    let crate::pack::PackData::Load { loads: b_loads } = &b.data else { return None };
    if a_loads.len() != b_loads.len() {
        return None;
    }
    let mut merged = a_loads.clone();
    let mut gained = false;
    for (slot, bv) in merged.iter_mut().zip(b_loads.iter()) {
        if slot.is_none() {
            if let Some(v) = bv {
                *slot = Some(*v);
                gained = true;
            }
        } else if bv.is_some() && *slot != *bv {
            return None;
        }
    }
    if !gained {
        return None;
    }
    let elements = a.elements.union(&b.elements);
    let depended = a.depended.union(&b.depended);
    // Reuses `a`'s own element type/alignment/cost characteristics — both
    // sides are equal-width loads of the same `ValueIndex` universe, so the
    // only thing actually changing is coverage.
    Some(Rc::new(VectorPack {
        ordered_values: merged.clone(),
        data: crate::pack::PackData::Load { loads: merged },
        elements,
        depended,
        cost: a.cost,
        producing_cost: a.producing_cost,
        operand_packs: Vec::new(),
        element_ty: a.element_ty,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MatchManager;
    use crate::config::PackerConfig;
    use crate::ir::{BlockId, BasicBlock, IrType};
    use crate::pack::VectorPackContext;
    use crate::testutil::{NoAliasOracle, StubCostModel, StubScalarEvolution};

    fn four_consecutive_loads() -> BasicBlock {
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
    fn seed_memory_packs_finds_full_width_chain() {
        let block = four_consecutive_loads();
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

        let packs = seed_memory_packs(&env, true);
        assert!(packs.iter().any(|p| p.lanes() == 4 && p.elements.count() == 4));
    }
}

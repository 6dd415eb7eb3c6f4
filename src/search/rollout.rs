//! The uniform-random `RolloutEvaluator` (spec §4.10): simulates forward
//! from a `Frontier` (and an in-progress `PartialPack`, if any) to a
//! terminal state, returning the summed incremental cost. Used as the MCTS
//! leaf evaluation (spec §4.9 step 3).

use super::frontier::Frontier;
use super::partial_pack::PartialPack;
use super::{enumerate, Env};
use rand::Rng;

/// Runs one rollout to completion, returning the total incremental cost.
pub fn rollout(env: &Env, start: &Frontier, start_partial: Option<PartialPack>, rng: &mut impl Rng) -> f64 {
    let mut frontier = start.clone();
    let mut partial = start_partial;
    let mut total = 0.0;

    loop {
        if let Some(p) = partial.take() {
            let usable: Vec<_> = frontier.usable_values(env).collect();
            // Prefer a candidate that keeps the pack compatible with some
            // already-discovered extension for the current unresolved
            // operand packs, falling back to any fitting candidate (spec
            // §4.10: "prefer those that remain compatible with some
            // discovered extension pack over random ones").
            let preferred_set = preferred_fill_candidates(env, &frontier);
            let fits: Vec<(usize, PartialPack)> = usable
                .iter()
                .enumerate()
                .filter_map(|(i, &v)| p.try_fill(env, v).map(|np| (i, np)))
                .collect();
            if fits.is_empty() {
                // No legal completion for this partial pack from here;
                // abandon it and fall through to normal scalarize/extend
                // handling at the current frontier.
                continue;
            }
            let preferred: Vec<&(usize, PartialPack)> =
                fits.iter().filter(|(i, _)| preferred_set.contains(&usable[*i])).collect();
            let pool = if preferred.is_empty() { fits.iter().collect::<Vec<_>>() } else { preferred };
            let chosen = pool[rng.gen_range(0..pool.len())].1.clone();

            if chosen.is_complete() {
                // Cost model rejected this shape at canonicalization time
                // (spec §7) — abandon the pack and keep rolling out from the
                // current frontier rather than treating it as a dead end.
                if let Some(pack) = chosen.finish(env) {
                    let (next, cost) = frontier.advance_pack(env, &pack);
                    frontier = next;
                    total += cost;
                }
                partial = None;
            } else {
                partial = Some(chosen);
            }
            continue;
        }

        if frontier.is_terminal() {
            break;
        }

        if let Some(op) = frontier.unresolved_packs.first().cloned() {
            let already_packed = frontier.free.complement();
            let extensions = enumerate::extension_packs(env, &op, &already_packed);
            if !extensions.is_empty() {
                let pick = &extensions[rng.gen_range(0..extensions.len())];
                let (next, cost) = frontier.advance_pack(env, pick);
                frontier = next;
                total += cost;
                continue;
            }
        }

        let usable: Vec<_> = frontier.usable_values(env).collect();
        debug_assert!(!usable.is_empty(), "non-terminal frontier with no usable instruction");
        if usable.is_empty() {
            break;
        }
        let v = usable[rng.gen_range(0..usable.len())];
        let (next, cost) = frontier.advance_scalar(env, v);
        frontier = next;
        total += cost;
    }

    total
}

/// Scalar values that would help resolve some currently-unresolved operand
/// pack, used to bias partial-pack fill choices during rollout.
fn preferred_fill_candidates(env: &Env, frontier: &Frontier) -> std::collections::HashSet<crate::ir::Value> {
    let mut out = std::collections::HashSet::new();
    for op in &frontier.unresolved_packs {
        for slot in &op.slots {
            if let Some(crate::ir::Operand::Value(v)) = slot {
                out.insert(*v);
            }
        }
    }
    let _ = env;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MatchManager;
    use crate::config::PackerConfig;
    use crate::ir::{BinOpKind, BlockId, BasicBlock, Instruction, IrType, Operand, Value};
    use crate::pack::VectorPackContext;
    use crate::testutil::{NoAliasOracle, StubCostModel, StubScalarEvolution};
    use rand::SeedableRng;

    #[test]
    fn rollout_reaches_terminal_and_returns_nonnegative_cost() {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        block.instructions.push(Instruction::BinOp {
            site: Value(0),
            op: BinOpKind::Add,
            lhs: Operand::Value(Value(10)),
            rhs: Operand::Value(Value(11)),
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

        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let frontier = Frontier::new(&env);
        let cost = rollout(&env, &frontier, None, &mut rng);
        assert!(cost >= 0.0);
    }
}

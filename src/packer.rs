//! `Packer` (spec §6): the crate's one public entry point. Builds every
//! per-block analysis, seeds a `Frontier`, runs the configured search
//! (`UCTSearch` or `DpSolver`), and commits the winning pack set to a
//! `Plan`.
//!
//! Construction takes the host's analyses by reference and an explicit RNG
//! (spec §9 redesign note: "pass an RNG ... explicitly into Packer
//! construction" rather than a process-global generator) — reproducibility
//! is a property of the `Packer` instance, not of the process.

use crate::analysis::{ConsecutiveAccessDag, LocalDependenceAnalysis};
use crate::catalog::{InstBinding, MatchManager};
use crate::config::PackerConfig;
use crate::error::Result;
use crate::ir::value_index::ValueIndex;
use crate::ir::BasicBlock;
use crate::pack::{VectorPack, VectorPackContext};
use crate::policy::NeuralPackingPolicy;
use crate::search::dp::DpSolver;
use crate::search::frontier::Frontier;
use crate::search::heuristic::{Heuristic, Inst2Packs};
use crate::search::mcts::{NoPrior, PriorSource, UCTSearch};
use crate::search::plan::Plan;
use crate::search::{enumerate, Env};
use crate::target::{AliasOracle, CostModel, ScalarEvolution, TargetFeatures};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Everything a `Packer` needs from the host besides the block itself and
/// the catalog (spec §6 "Consumed from the host"). Borrowed for the
/// lifetime of every `optimize` call; a host typically builds one of these
/// per function and reuses it across blocks.
pub struct Analyses<'a> {
    pub alias: &'a dyn AliasOracle,
    pub scalar_evolution: &'a dyn ScalarEvolution,
    pub cost_model: &'a dyn CostModel,
    pub features: &'a TargetFeatures,
}

pub struct Packer<'a> {
    bindings: Vec<Arc<InstBinding>>,
    analyses: Analyses<'a>,
    config: PackerConfig,
    rng: ChaCha8Rng,
    policy: Option<NeuralPackingPolicy>,
}

impl<'a> Packer<'a> {
    /// Validates `config` (spec §7: "the only `Result`-shaped surface ...
    /// is validating configuration") and stores everything needed to
    /// optimize any number of blocks from the same function.
    pub fn new(supported_bindings: Vec<Arc<InstBinding>>, analyses: Analyses<'a>, config: PackerConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        Ok(Self { bindings: supported_bindings, analyses, config, rng: ChaCha8Rng::seed_from_u64(seed), policy: None })
    }

    /// Attaches a background policy pool; priors feed `UCTSearch` until
    /// `cancel()`'d or dropped. Optional — spec §4.11 describes the policy
    /// itself as optional guidance, not a required collaborator.
    pub fn with_policy(mut self, policy: NeuralPackingPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Primary entry point (spec §6 `Packer.optimize(block) -> Plan`).
    #[instrument(skip(self, block), fields(block = %block.label, num_instructions = block.instructions.len()))]
    pub fn optimize(&mut self, block: &BasicBlock) -> Plan {
        let index = ValueIndex::build(block);
        let lda = LocalDependenceAnalysis::build(block, &index, self.analyses.alias);
        let load_dag = ConsecutiveAccessDag::build(block, &index, self.analyses.scalar_evolution, true);
        let store_dag = ConsecutiveAccessDag::build(block, &index, self.analyses.scalar_evolution, false);
        let operations = collect_operations(&self.bindings);
        let matches = MatchManager::build(block, &index, &operations);
        let ctx = VectorPackContext::new(index.len());

        let env = Env::new(
            block,
            &index,
            &lda,
            &load_dag,
            &store_dag,
            &matches,
            &self.bindings,
            self.analyses.cost_model,
            self.analyses.features,
            &ctx,
            &self.config,
        );

        let mut candidates = enumerate::seed_memory_packs(&env, true);
        candidates.extend(enumerate::seed_memory_packs(&env, false));
        candidates.extend(enumerate::seed_phi_packs(&env));
        if self.config.coalesce_loads {
            candidates = enumerate::coalesce_sparse_loads(candidates);
        }
        debug!(candidate_count = candidates.len(), "enumerated seed packs");

        let inst2packs = Inst2Packs::build(&env, &candidates);
        let heuristic = Heuristic::new(&env, &inst2packs);

        // Phi packing never trades off against anything else (a phi pack
        // costs nothing to produce, spec §4.4), so there's no search
        // decision to make about it; commit the widest non-overlapping
        // phi packs up front and let MCTS/DP decide everything else from
        // the frontier that leaves behind.
        let (phi_packs, start_frontier) = precommit_phi_packs(&env);
        debug!(phi_pack_count = phi_packs.len(), "pre-committed phi packs");

        let chosen = if self.config.use_mcts {
            run_mcts(&env, start_frontier, &self.config, self.policy.as_ref(), &mut self.rng)
        } else {
            let mut solver = DpSolver::new(&env);
            let (cost, packs) = solver.solve_from(start_frontier);
            debug!(cost, pack_count = packs.len(), "dp solver finished");
            packs
        };

        let mut plan = Plan::new(index.len());
        for pack in phi_packs.into_iter().chain(chosen) {
            plan.add(pack, &heuristic);
        }
        info!(cost = plan.cost(), pack_count = plan.iter().count(), "block optimized");
        plan
    }
}

/// Greedily commits the widest legal phi pack per `(type, incoming count)`
/// shape, widest first, so overlapping narrower candidates from the same
/// shape group never get a turn once a wider one already covers their
/// lanes. Returns the committed packs plus the `Frontier` advanced past
/// all of them, ready for `UCTSearch`/`DpSolver` to start from.
fn precommit_phi_packs(env: &Env) -> (Vec<Rc<VectorPack>>, Frontier) {
    let mut candidates = enumerate::seed_phi_packs(env);
    candidates.sort_by_key(|p| std::cmp::Reverse(p.lanes()));

    let mut frontier = Frontier::new(env);
    let mut covered = crate::common::bitset::Bitset::new(env.index.len());
    let mut committed = Vec::new();
    for pack in candidates {
        if pack.elements.is_disjoint(&covered) {
            covered.union_with(&pack.elements);
            let (next, _cost) = frontier.advance_pack(env, &pack);
            frontier = next;
            committed.push(pack);
        }
    }
    (committed, frontier)
}

/// Every distinct `Operation` referenced by any lane of any binding,
/// deduped by name — the universe `MatchManager` needs (spec §4.3) so
/// `extension_packs`' `matches_for_output` lookups can find a general
/// binding's per-lane matches, not just the load/store/phi seed packs.
fn collect_operations(bindings: &[Arc<InstBinding>]) -> Vec<Arc<dyn crate::catalog::Operation>> {
    let mut seen = crate::common::fx::FxHashSet::default();
    let mut out = Vec::new();
    for binding in bindings {
        for lane in &binding.signature {
            if seen.insert(lane.operation.name().to_string()) {
                out.push(lane.operation.clone());
            }
        }
    }
    out
}

/// Runs `UCTSearch` to completion and returns the winning rollout's pack
/// set. A free function (not a `Packer` method) so it only needs the
/// specific fields it touches — `env` itself already holds borrows of
/// `Packer::bindings`/`config`, so a method taking `&mut self` here would
/// conflict with those.
fn run_mcts(
    env: &Env,
    start_frontier: Frontier,
    config: &PackerConfig,
    policy: Option<&NeuralPackingPolicy>,
    rng: &mut ChaCha8Rng,
) -> Vec<std::rc::Rc<crate::pack::VectorPack>> {
    let mut search = UCTSearch::new_with_frontier(start_frontier);
    match policy {
        Some(policy) => {
            let prior = PolicyPrior { policy };
            search.run(env, config, &prior, rng);
        }
        None => {
            search.run(env, config, &NoPrior, rng);
        }
    }
    debug!(root_visits = search.root_visits(), "mcts search finished");
    search.best_packs()
}

/// Bridges `NeuralPackingPolicy`'s synchronous `predict` into `UCTSearch`'s
/// `PriorSource` seam.
struct PolicyPrior<'a> {
    policy: &'a NeuralPackingPolicy,
}

impl<'a> PriorSource for PolicyPrior<'a> {
    fn priors_for(&self, node: &crate::search::mcts::UCTNode) -> Option<Vec<f32>> {
        let features = crate::search::mcts::encode_features(node);
        self.policy.predict(features)
    }
}

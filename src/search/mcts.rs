//! `UCTNode`/`UCTSearch` (spec §4.9): Monte-Carlo Tree Search over
//! `Frontier` transitions, optionally guided by a learned prior from
//! `crate::policy::NeuralPackingPolicy`.
//!
//! Arena-allocated (spec §9 "cyclic ownership ... resolve by arena
//! allocation; the top-level arena is freed when the block's optimization
//! completes") — nodes reference each other by index, not by pointer, so
//! there's no lifetime tangle between parent and child.

use super::frontier::Frontier;
use super::partial_pack::PartialPack;
use super::Env;
use crate::config::PackerConfig;
use crate::ir::Value;
use crate::pack::VectorPack;
use rand::Rng;
use std::rc::Rc;

const LANE_COUNTS: [u32; 5] = [2, 4, 8, 16, 32];

#[derive(Debug, Clone)]
pub enum Transition {
    /// Scalarize one instruction.
    Scalarize(Value),
    /// Start a new partial-pack template (zero lanes filled).
    SelectTemplate(PartialPack),
    /// Fill the next lane of the current node's in-progress `PartialPack`.
    FillLane(Value),
}

pub struct Edge {
    pub transition: Transition,
    pub child: Option<usize>,
    pub visits: u32,
    pub total_cost: f64,
    pub prior: f32,
    pub immediate_cost: f64,
    /// Set once this edge is materialized, if (and only if) taking it
    /// completed and committed a `VectorPack` (a `FillLane` that finished a
    /// template). `best_packs` reads this directly rather than
    /// re-deriving it, since the completed pack isn't otherwise recoverable
    /// from the child node alone.
    pub committed_pack: Option<Rc<VectorPack>>,
}

pub struct UCTNode {
    pub frontier: Frontier,
    pub partial: Option<PartialPack>,
    pub edges: Vec<Edge>,
    pub visits: u32,
    pub expanded: bool,
    /// Set when the transition leading here tried to materialize a pack the
    /// cost model rejected at canonicalization time (spec §7). A dead node
    /// is always treated as terminal — there's nothing further to expand —
    /// and its edge carries an infinite immediate cost so selection steers
    /// away from it without needing a special case in `select_edge`.
    pub dead: bool,
}

impl UCTNode {
    fn is_terminal(&self) -> bool {
        self.dead || (self.partial.is_none() && self.frontier.is_terminal())
    }
}

/// Encodes the small set of scalar features a `PriorSource` sees for one
/// node (spec §4.11 treats the model itself as an opaque oracle — this is
/// just the input shape the search hands it).
pub fn encode_features(node: &UCTNode) -> Vec<f32> {
    vec![
        node.frontier.free.count() as f32,
        node.frontier.usable.count() as f32,
        node.frontier.unresolved_scalars.count() as f32,
        node.frontier.unresolved_packs.len() as f32,
        node.edges.len() as f32,
        node.partial.as_ref().map(|p| p.lane_id as f32).unwrap_or(0.0),
    ]
}

/// Anything that can hand the search per-edge prior weights for a node.
/// `crate::policy::NeuralPackingPolicy` is the production implementation;
/// tests and the DP-only configuration use no prior at all.
pub trait PriorSource {
    /// `None` means "no prior available" (not yet predicted, or the policy
    /// was cancelled) — spec §7: "Policy times out or is cancelled ⇒
    /// search proceeds without priors."
    fn priors_for(&self, node: &UCTNode) -> Option<Vec<f32>>;
}

pub struct NoPrior;
impl PriorSource for NoPrior {
    fn priors_for(&self, _node: &UCTNode) -> Option<Vec<f32>> {
        None
    }
}

pub struct UCTSearch {
    arena: Vec<UCTNode>,
}

impl UCTSearch {
    pub fn new(env: &Env) -> Self {
        Self::new_with_frontier(Frontier::new(env))
    }

    /// Builds the root from an already-advanced `Frontier` rather than a
    /// block's fresh starting state. `Packer::optimize` uses this to seed
    /// the tree past whatever phi packs it pre-committed (spec §4.9's
    /// expansion never offers a phi template, so phi packing happens
    /// before the tree exists rather than as a move within it — see
    /// DESIGN.md).
    pub fn new_with_frontier(frontier: Frontier) -> Self {
        let root = UCTNode { frontier, partial: None, edges: Vec::new(), visits: 0, expanded: false, dead: false };
        Self { arena: vec![root] }
    }

    pub fn root(&self) -> &UCTNode {
        &self.arena[0]
    }

    /// Runs `num_simulations` MCTS iterations (spec §4.9). `expanded()`
    /// short-circuits a forced move: if the root ends up with exactly one
    /// child after its first expansion, every further iteration just walks
    /// straight down that one edge instead of re-running UCB math on a
    /// singleton (spec §4.9: "short-circuits to one iteration when there is
    /// exactly one child").
    pub fn run(&mut self, env: &Env, config: &PackerConfig, prior: &dyn PriorSource, rng: &mut impl Rng) {
        let iterations = if self.is_forced_move() { 1 } else { config.num_simulations };
        for _ in 0..iterations {
            self.iterate(env, config, prior, rng);
        }
    }

    fn is_forced_move(&self) -> bool {
        self.arena[0].expanded && self.arena[0].edges.len() == 1
    }

    fn iterate(&mut self, env: &Env, config: &PackerConfig, prior: &dyn PriorSource, rng: &mut impl Rng) {
        let mut path: Vec<(usize, usize)> = Vec::new();
        let mut current = 0usize;

        loop {
            if self.arena[current].is_terminal() {
                break;
            }
            if !self.arena[current].expanded {
                if self.arena[current].visits < config.expand_after {
                    break;
                }
                self.expand(current, env);
                if self.arena[current].edges.is_empty() {
                    break;
                }
                if let Some(weights) = prior.priors_for(&self.arena[current]) {
                    for (edge, &w) in self.arena[current].edges.iter_mut().zip(weights.iter()) {
                        edge.prior = w;
                    }
                }
            }

            let edge_idx = self.select_edge(current, config);
            if self.arena[current].edges[edge_idx].child.is_none() {
                self.materialize_child(current, edge_idx, env);
            }
            path.push((current, edge_idx));
            current = self.arena[current].edges[edge_idx].child.unwrap();
        }

        let leaf = &self.arena[current];
        let rollout_cost = if leaf.is_terminal() {
            0.0
        } else {
            super::rollout::rollout(env, &leaf.frontier, leaf.partial.clone(), rng)
        };

        self.arena[current].visits += 1;
        let mut cumulative = rollout_cost;
        for (node_idx, edge_idx) in path.into_iter().rev() {
            let edge = &mut self.arena[node_idx].edges[edge_idx];
            cumulative += edge.immediate_cost;
            edge.visits += 1;
            edge.total_cost += cumulative;
            self.arena[node_idx].visits += 1;
        }
    }

    fn select_edge(&self, node_idx: usize, config: &PackerConfig) -> usize {
        let node = &self.arena[node_idx];
        debug_assert!(!node.edges.is_empty());
        for (i, e) in node.edges.iter().enumerate() {
            if e.visits == 0 {
                return i;
            }
        }
        let parent_visits = node.visits.max(1) as f64;
        let mut best_idx = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (i, e) in node.edges.iter().enumerate() {
            let mean = -(e.total_cost / e.visits as f64);
            let explore = config.c * ((parent_visits.ln()) / (e.visits as f64 + 1.0)).sqrt();
            let prior_term = config.w * e.prior as f64 / (e.visits as f64 + 1.0);
            let score = mean + explore + prior_term;
            if score > best_score {
                best_score = score;
                best_idx = i;
            }
        }
        best_idx
    }

    /// Expansion (spec §4.9 step 2).
    fn expand(&mut self, node_idx: usize, env: &Env) {
        self.arena[node_idx].expanded = true;
        let has_partial = self.arena[node_idx].partial.is_some();
        if has_partial {
            let usable: Vec<Value> = self.arena[node_idx].frontier.usable_values(env).collect();
            let partial = self.arena[node_idx].partial.clone().unwrap();
            let mut edges = Vec::new();
            for v in usable {
                if partial.try_fill(env, v).is_some() {
                    edges.push(Edge {
                        transition: Transition::FillLane(v),
                        child: None,
                        visits: 0,
                        total_cost: 0.0,
                        prior: 0.0,
                        immediate_cost: 0.0,
                        committed_pack: None,
                    });
                }
            }
            self.arena[node_idx].edges = edges;
            return;
        }

        let usable: Vec<Value> = self.arena[node_idx].frontier.usable_values(env).collect();
        let mut edges = Vec::new();
        for &v in &usable {
            edges.push(Edge {
                transition: Transition::Scalarize(v),
                child: None,
                visits: 0,
                total_cost: 0.0,
                prior: 0.0,
                immediate_cost: 0.0,
                committed_pack: None,
            });
        }

        for vl in LANE_COUNTS.into_iter().filter(|&vl| vl <= env.config.max_num_lanes) {
            if feasible_template(env, &PartialPack::new_load(vl, env.index.len()), &usable) {
                edges.push(template_edge(PartialPack::new_load(vl, env.index.len())));
            }
            if feasible_template(env, &PartialPack::new_store(vl, env.index.len()), &usable) {
                edges.push(template_edge(PartialPack::new_store(vl, env.index.len())));
            }
        }
        for binding in env.legal_bindings() {
            if binding.lane_count() > env.config.max_num_lanes {
                continue;
            }
            let template = PartialPack::new_general(binding.clone(), env.index.len());
            if feasible_template(env, &template, &usable) {
                edges.push(template_edge(template));
            }
        }

        self.arena[node_idx].edges = edges;
    }

    fn materialize_child(&mut self, node_idx: usize, edge_idx: usize, env: &Env) {
        let transition = self.arena[node_idx].edges[edge_idx].transition.clone();
        let (child, immediate_cost) = match transition {
            Transition::Scalarize(v) => {
                let (next_frontier, cost) = self.arena[node_idx].frontier.advance_scalar(env, v);
                (UCTNode { frontier: next_frontier, partial: None, edges: Vec::new(), visits: 0, expanded: false, dead: false }, cost)
            }
            Transition::SelectTemplate(partial) => (
                UCTNode { frontier: self.arena[node_idx].frontier.clone(), partial: Some(partial), edges: Vec::new(), visits: 0, expanded: false, dead: false },
                0.0,
            ),
            Transition::FillLane(v) => {
                let partial = self.arena[node_idx].partial.as_ref().unwrap();
                let next_partial = partial.try_fill(env, v).expect("edge materialized from an infeasible fill");
                if next_partial.is_complete() {
                    match next_partial.finish(env) {
                        Some(pack) => {
                            let (next_frontier, cost) = self.arena[node_idx].frontier.advance_pack(env, &pack);
                            self.arena[node_idx].edges[edge_idx].committed_pack = Some(pack);
                            (UCTNode { frontier: next_frontier, partial: None, edges: Vec::new(), visits: 0, expanded: false, dead: false }, cost)
                        }
                        None => (
                            UCTNode {
                                frontier: self.arena[node_idx].frontier.clone(),
                                partial: None,
                                edges: Vec::new(),
                                visits: 0,
                                expanded: true,
                                dead: true,
                            },
                            f64::INFINITY,
                        ),
                    }
                } else {
                    (
                        UCTNode { frontier: self.arena[node_idx].frontier.clone(), partial: Some(next_partial), edges: Vec::new(), visits: 0, expanded: false, dead: false },
                        0.0,
                    )
                }
            }
        };
        self.arena.push(child);
        let new_idx = self.arena.len() - 1;
        self.arena[node_idx].edges[edge_idx].child = Some(new_idx);
        self.arena[node_idx].edges[edge_idx].immediate_cost = immediate_cost;
    }

    /// Total visits recorded at the root — equals `num_simulations` after a
    /// full `run` (spec §8 property 6), modulo the forced-move short
    /// circuit.
    pub fn root_visits(&self) -> u32 {
        self.arena[0].visits
    }

    /// Replays the single best (lowest mean cost) path from the root to a
    /// terminal frontier, collecting every pack committed along the way —
    /// this is `UCTSearch`'s contribution to the winning rollout's pack set
    /// (spec §2: "The best rollout's pack set is committed to the Plan").
    pub fn best_packs(&self) -> Vec<Rc<VectorPack>> {
        let mut packs = Vec::new();
        let mut current = 0usize;
        loop {
            let node = &self.arena[current];
            if node.is_terminal() || node.edges.is_empty() {
                break;
            }
            let mut best_idx = None;
            let mut best_mean = f64::INFINITY;
            for (i, e) in node.edges.iter().enumerate() {
                if e.visits == 0 {
                    continue;
                }
                let mean = e.total_cost / e.visits as f64;
                if mean < best_mean {
                    best_mean = mean;
                    best_idx = Some(i);
                }
            }
            let Some(idx) = best_idx else { break };
            let Some(child) = node.edges[idx].child else { break };
            if let Some(pack) = &node.edges[idx].committed_pack {
                packs.push(pack.clone());
            }
            current = child;
        }
        packs
    }
}

fn template_edge(template: PartialPack) -> Edge {
    Edge {
        transition: Transition::SelectTemplate(template),
        child: None,
        visits: 0,
        total_cost: 0.0,
        prior: 0.0,
        immediate_cost: 0.0,
        committed_pack: None,
    }
}

/// Whether some fill order can complete `template` using only `usable`
/// values (spec §4.9: "feasible is decided by backtracking"). Bounded to
/// keep worst-case expansion cost reasonable on a block with many usable
/// instructions.
const FEASIBILITY_BUDGET: usize = 4096;

fn feasible_template(env: &Env, template: &PartialPack, usable: &[Value]) -> bool {
    fn rec(env: &Env, partial: &PartialPack, usable: &[Value], budget: &mut usize) -> bool {
        if partial.is_complete() {
            return true;
        }
        if *budget == 0 {
            return false;
        }
        *budget -= 1;
        for &v in usable {
            if let Some(next) = partial.try_fill(env, v) {
                if rec(env, &next, usable, budget) {
                    return true;
                }
            }
        }
        false
    }
    let mut budget = FEASIBILITY_BUDGET;
    rec(env, template, usable, &mut budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MatchManager;
    use crate::ir::{BinOpKind, BlockId, BasicBlock, Instruction, IrType, Operand, Value};
    use crate::pack::VectorPackContext;
    use crate::testutil::{NoAliasOracle, StubCostModel, StubScalarEvolution};
    use rand::SeedableRng;

    #[test]
    fn forced_single_child_runs_exactly_once() {
        // One scalar add with no other uses: the only legal move from the
        // root is to scalarize it (no catalog bindings registered), so the
        // root should end up with exactly one child regardless of the
        // configured iteration count.
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
        let mut config = PackerConfig::default();
        config.expand_after = 0;
        let env = Env::new(&block, &index, &lda, &load_dag, &store_dag, &matches, &[], &cost_model, &features, &pack_ctx, &config);

        let mut search = UCTSearch::new(&env);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        search.expand(0, &env);
        assert_eq!(search.root().edges.len(), 1);

        search.run(&env, &config, &NoPrior, &mut rng);
        assert_eq!(search.root_visits(), 1);
    }

    #[test]
    fn root_visits_match_simulation_count_when_not_forced() {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        block.instructions.push(Instruction::BinOp {
            site: Value(0),
            op: BinOpKind::Add,
            lhs: Operand::Value(Value(10)),
            rhs: Operand::Value(Value(11)),
            ty: IrType::I32,
        });
        block.instructions.push(Instruction::BinOp {
            site: Value(1),
            op: BinOpKind::Add,
            lhs: Operand::Value(Value(12)),
            rhs: Operand::Value(Value(13)),
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
        let mut config = PackerConfig::default();
        config.expand_after = 0;
        config.num_simulations = 25;
        let env = Env::new(&block, &index, &lda, &load_dag, &store_dag, &matches, &[], &cost_model, &features, &pack_ctx, &config);

        let mut search = UCTSearch::new(&env);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        search.run(&env, &config, &NoPrior, &mut rng);
        assert_eq!(search.root_visits(), 25);
    }
}

//! The search engine (spec §2/§4.5-§4.13): `Frontier` search state, pack
//! enumeration, the memoized `Heuristic`, `Plan`, the MCTS (`UCTSearch`) and
//! DP (`DpSolver`) alternatives, and the uniform-random rollout evaluator.
//!
//! Every submodule here threads the same read-only per-block bundle
//! (`Env`) rather than taking a dozen separate parameters — this mirrors
//! the single-block, single-threaded confinement spec §5 describes ("all
//! per-block data ... is confined"; "the context itself is single
//! threaded").

pub mod dp;
pub mod enumerate;
pub mod frontier;
pub mod heuristic;
pub mod improve;
pub mod mcts;
pub mod partial_pack;
pub mod plan;
pub mod rollout;

use crate::analysis::{ConsecutiveAccessDag, LocalDependenceAnalysis};
use crate::catalog::{InstBinding, MatchManager};
use crate::common::types::IrType;
use crate::config::PackerConfig;
use crate::ir::value_index::ValueIndex;
use crate::ir::{BasicBlock, Operand, Value};
use crate::pack::{OperandPack, VectorPackContext};
use crate::target::{CostModel, TargetFeatures, VectorType};
use std::sync::Arc;

/// Read-only bundle of everything a `Frontier`/enumeration/heuristic query
/// needs about the block it's operating on. Built once per block by
/// `Packer::optimize` and borrowed for the lifetime of the search.
pub struct Env<'a> {
    pub block: &'a BasicBlock,
    pub index: &'a ValueIndex,
    pub lda: &'a LocalDependenceAnalysis,
    pub load_dag: &'a ConsecutiveAccessDag,
    pub store_dag: &'a ConsecutiveAccessDag,
    pub matches: &'a MatchManager,
    pub bindings: &'a [Arc<InstBinding>],
    pub cost_model: &'a dyn CostModel,
    pub features: &'a TargetFeatures,
    pub ctx: &'a VectorPackContext,
    pub config: &'a PackerConfig,
    /// The block's non-phi instructions in the order the `Frontier`'s
    /// backward cursor walks them: most-recent-first (spec §4.5 "the
    /// cursor points to the block's last instruction").
    pub order: Vec<Value>,
}

impl<'a> Env<'a> {
    pub fn new(
        block: &'a BasicBlock,
        index: &'a ValueIndex,
        lda: &'a LocalDependenceAnalysis,
        load_dag: &'a ConsecutiveAccessDag,
        store_dag: &'a ConsecutiveAccessDag,
        matches: &'a MatchManager,
        bindings: &'a [Arc<InstBinding>],
        cost_model: &'a dyn CostModel,
        features: &'a TargetFeatures,
        ctx: &'a VectorPackContext,
        config: &'a PackerConfig,
    ) -> Self {
        let order = block.instructions.iter().rev().map(|i| i.site()).collect();
        Self { block, index, lda, load_dag, store_dag, matches, bindings, cost_model, features, ctx, config, order }
    }

    pub fn legal_bindings(&self) -> impl Iterator<Item = &Arc<InstBinding>> {
        self.bindings.iter().filter(|b| b.is_legal_on(self.features))
    }

    /// The scalar type `v` carries, whether it's a phi destination or an
    /// instruction's result. Values referenced but not defined in this
    /// block (loop-invariant operands, cross-block phi inputs) have no
    /// known type here; callers only reach this case through a don't-care
    /// lane padding path, so a safe placeholder is fine.
    pub fn value_type(&self, v: Value) -> IrType {
        if let Some(phi) = self.block.phis.iter().find(|p| p.dest == v) {
            return phi.ty;
        }
        if let Some(inst) = self.block.instructions.iter().find(|i| i.site() == v) {
            return inst.ty();
        }
        IrType::I32
    }

    pub fn operand_type(&self, op: Operand) -> IrType {
        match op {
            Operand::Value(v) => self.value_type(v),
            Operand::Const(c) => c.ty(),
        }
    }

    pub fn operand_pack_vector_type(&self, pack: &OperandPack) -> VectorType {
        let element = pack.vector_type_with(|op| self.operand_type(op));
        VectorType::new(element, pack.lanes())
    }
}

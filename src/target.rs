//! External interfaces consumed from the host (spec §6): the alias oracle,
//! cost model, scalar-evolution ("are these two accesses consecutive?")
//! oracle, and the per-function target feature set. All are assumed
//! deterministic, pure, and reentrant per thread (spec §5) — each block's
//! analyses own a private reference and never share mutable state.

use crate::common::types::IrType;
use crate::ir::{BinOpKind, CmpOp, Instruction, UnOpKind};

/// Three-valued alias result. Per spec §4.1, only `MayAlias`/`MustAlias`
/// pairs where at least one side writes contribute a dependence edge;
/// `NoAlias` and both-reads pairs never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    NoAlias,
    MayAlias,
    MustAlias,
}

/// `mayAlias(I, J)` per pair of memory instructions in a block.
pub trait AliasOracle {
    fn alias(&self, a: &Instruction, b: &Instruction) -> AliasResult;
}

/// `isConsecutive(A, B)` — are two memory accesses adjacent (`B`'s address
/// equals `A`'s address plus one scalar-element stride)? Spec §6/§4.2.
pub trait ScalarEvolution {
    fn is_consecutive(&self, a: &Instruction, b: &Instruction) -> bool;
}

/// A vector type: `lanes` copies of `element`. `lanes` is always one of
/// `{2,4,8,16,32}` within this crate (spec §4.6/§6 `max_num_lanes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorType {
    pub element: IrType,
    pub lanes: u32,
}

impl VectorType {
    pub fn new(element: IrType, lanes: u32) -> Self {
        Self { element, lanes }
    }
}

/// Which scalar-to-vector or vector-to-scalar micro-op a cost query is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorInstrKind {
    Extract,
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOpKind {
    Load,
    Store,
}

/// The operation a `shuffleCost` query is about, mirroring the three shapes
/// this crate ever asks for: broadcasting a scalar, permuting one vector's
/// lanes, or permuting across two source vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleKind {
    Broadcast,
    PermuteSingleSrc,
    PermuteTwoSrc,
}

/// The opcode half of an `arithCost` query — every scalar op this IR has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Bin(BinOpKind),
    Un(UnOpKind),
    Cmp(CmpOp),
}

/// Sentinel the cost model may return to mean "no legal lowering" (spec
/// §7: "Cost model returns a sentinel unknown cost ⇒ the pack is rejected
/// at canonicalization time"). Ordinary costs are always finite and
/// non-negative.
pub const UNKNOWN_COST: f64 = f64::INFINITY;

pub fn is_known_cost(cost: f64) -> bool {
    cost.is_finite()
}

/// `arithCost`, `memOpCost`, `shuffleCost`, `vectorInstrCost` (spec §6).
/// Deterministic and pure; the same query must always return the same
/// value for the lifetime of one `Packer::optimize` call.
pub trait CostModel {
    fn arith_cost(&self, op: ArithOp, vt: VectorType) -> f64;
    fn mem_op_cost(&self, kind: MemOpKind, vt: VectorType, align: u32) -> f64;
    fn shuffle_cost(&self, kind: ShuffleKind, vt: VectorType, index: u32) -> f64;
    fn vector_instr_cost(&self, kind: VectorInstrKind, vt: VectorType, lane: u32) -> f64;

    /// Cost of computing one lane scalar-side instead of packing it. Not in
    /// the spec's bulleted `CostModel` list but required by the Heuristic's
    /// scalar baseline (§4.7) and `Frontier`'s scalarize transition (§4.5);
    /// hosts are free to implement it as `arith_cost`/`mem_op_cost` with one
    /// lane, which is exactly what `testutil::StubCostModel` does.
    fn scalar_cost(&self, inst: &Instruction) -> f64;
}

/// Per-function target feature set (spec §6): an `InstBinding` is only
/// legal when its `required_features` is a subset of this.
#[derive(Debug, Clone, Default)]
pub struct TargetFeatures {
    features: crate::common::fx::FxHashSet<String>,
}

impl TargetFeatures {
    pub fn new(features: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { features: features.into_iter().map(Into::into).collect() }
    }

    pub fn has(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn is_superset_of(&self, required: &[String]) -> bool {
        required.iter().all(|f| self.has(f))
    }
}

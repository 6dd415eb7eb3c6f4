//! Test doubles for the external interfaces of spec §6 (A.5 of
//! `SPEC_FULL.md`). No production code depends on these; the module stays
//! public (rather than `cfg(test)`-gated) only so integration tests under
//! `tests/` can reach the same fixtures as the crate's own unit tests, which
//! otherwise have no way to see a `#[cfg(test)]` item in another crate.

use crate::ir::{Instruction, Operand};
use crate::target::{
    AliasOracle, AliasResult, ArithOp, CostModel, MemOpKind, ScalarEvolution, ShuffleKind, VectorInstrKind, VectorType,
};

/// Every memory access is assumed non-aliasing. Good enough for fixtures
/// that don't exercise the dependence-break scenario (spec §8 scenario 4);
/// those build their own oracle inline.
pub struct NoAliasOracle;
impl AliasOracle for NoAliasOracle {
    fn alias(&self, _a: &Instruction, _b: &Instruction) -> AliasResult {
        AliasResult::NoAlias
    }
}

/// Treats two memory accesses as consecutive iff their address operands are
/// literally adjacent-valued `Value`s (`ptr(B) == ptr(A) + 1`), standing in
/// for a real scalar-evolution stride check.
pub struct StubScalarEvolution;
impl ScalarEvolution for StubScalarEvolution {
    fn is_consecutive(&self, a: &Instruction, b: &Instruction) -> bool {
        let (Some(Operand::Value(pa)), Some(Operand::Value(pb))) = (a.address(), b.address()) else {
            return false;
        };
        pb.0 == pa.0 + 1
    }
}

/// A simple, deterministic cost model: vector ops cost `lanes * per_lane`
/// with a small fixed overhead discount versus `lanes` independent scalar
/// ops, so packing is (by construction) the cheaper choice whenever a full
/// pack is available — exactly what the end-to-end scenarios in spec §8
/// need to assert ("`Plan.cost()` strictly less than sum of scalar costs").
#[derive(Debug, Clone, Copy)]
pub struct StubCostModel {
    pub per_lane_arith: f64,
    pub per_lane_mem: f64,
    pub overhead: f64,
    pub shuffle: f64,
    pub insert_extract: f64,
}

impl Default for StubCostModel {
    fn default() -> Self {
        Self { per_lane_arith: 1.0, per_lane_mem: 1.0, overhead: 1.0, shuffle: 1.0, insert_extract: 1.0 }
    }
}

impl CostModel for StubCostModel {
    fn arith_cost(&self, _op: ArithOp, vt: VectorType) -> f64 {
        self.overhead + self.per_lane_arith * vt.lanes as f64
    }

    fn mem_op_cost(&self, _kind: MemOpKind, vt: VectorType, _align: u32) -> f64 {
        self.overhead + self.per_lane_mem * vt.lanes as f64
    }

    fn shuffle_cost(&self, _kind: ShuffleKind, _vt: VectorType, _index: u32) -> f64 {
        self.shuffle
    }

    fn vector_instr_cost(&self, _kind: VectorInstrKind, _vt: VectorType, _lane: u32) -> f64 {
        self.insert_extract
    }

    fn scalar_cost(&self, inst: &Instruction) -> f64 {
        match inst {
            Instruction::Load { .. } => self.overhead + self.per_lane_mem,
            Instruction::Store { .. } => self.overhead + self.per_lane_mem,
            _ => self.overhead + self.per_lane_arith,
        }
    }
}

//! The instruction catalog (spec §3 `InstBinding`/`LaneBinding`, §4.3
//! `MatchManager`). This crate does not define a pattern-matching DSL
//! (spec §1 non-goal) — `Operation` is the one opaque capability the host
//! plugs in; everything else here is plain data.
//!
//! Per spec §9 ("Catalog polymorphism ... express via a small capability
//! interface"), `Operation` is the *only* place true dynamic dispatch is
//! used in this crate; every other component below it is a tagged enum
//! matched over (spec §9 "Dynamic dispatch over pack kinds").
//!
//! `emit` (code generation for a committed pack) is deliberately absent
//! from `InstBinding`: spec §1 puts "code emission of the chosen packs"
//! out of scope, so the catalog entry here carries only what pack
//! enumeration and costing need — `name`, `required_features`, the lane
//! `signature`, and `cost`.

pub mod ops;

use crate::ir::{BasicBlock, Instruction, Operand, Value};
use crate::target::{CostModel, VectorType};
use smallvec::SmallVec;
use std::sync::Arc;

/// One successful pattern match: the operand values an operation read, and
/// the value it produced. Spec §3 `Match = (inputs[], output)`.
#[derive(Debug, Clone)]
pub struct Match {
    pub inputs: SmallVec<[Operand; 4]>,
    pub output: Value,
}

/// An opaque scalar operation the catalog can match against block values.
/// Think "this is an F32 FAdd" or "this is an I32 signed compare" — the
/// catalog never needs to know more than "does this instruction count as
/// an instance of me, and if so what did it read and produce".
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;
    fn try_match(&self, inst: &Instruction) -> Option<Match>;
}

/// How one lane of an `InstBinding` is bound: which offset within each
/// input operand pack this lane reads from, and the `Operation` used to
/// recognize a candidate scalar instruction for this lane. Spec §4.4:
/// "each lane's bound-slice declares a contribution" at some offset; the
/// common (and only one this crate's built-in bindings use, see `ops`) case
/// is `offsets[i] == lane index` for every input `i` — a plain elementwise
/// op. The field exists as a `Vec<usize>` rather than being hardcoded to
/// identity so a host catalog can still describe a non-elementwise binding
/// (e.g. a widening op reading lane `2*i`) without this crate changing.
#[derive(Debug, Clone)]
pub struct LaneBinding {
    pub operation: Arc<dyn Operation>,
    /// Offset within each input operand pack this lane's match output
    /// contributes to, one entry per input slot.
    pub input_offsets: Vec<usize>,
}

/// A catalog entry: a vector operation plus how it maps input/output
/// lanes. Spec §3/§9.
///
/// `cost` is a closure rather than a fixed `ArithOp` field: the opcode a
/// binding represents is the host's business (`Operation` is opaque, spec
/// §1 non-goal), so the binding itself is the one thing that knows how to
/// turn a `VectorType` into a `CostModel` query — exactly the "small
/// capability interface `{name, required_features, signature, emit,
/// cost}`" spec §9 describes (`emit` excluded, see module docs).
pub struct InstBinding {
    pub name: String,
    pub required_features: Vec<String>,
    /// One `LaneBinding` per lane, `signature.len() == lane_count()`.
    pub signature: Vec<LaneBinding>,
    /// Number of distinct input operand packs this binding consumes (e.g.
    /// 2 for a binary op).
    pub num_inputs: usize,
    pub cost: Arc<dyn Fn(&dyn CostModel, VectorType) -> f64 + Send + Sync>,
}

impl InstBinding {
    pub fn lane_count(&self) -> u32 {
        self.signature.len() as u32
    }

    pub fn try_match_lane(&self, lane: usize, inst: &Instruction) -> Option<Match> {
        self.signature[lane].operation.try_match(inst)
    }

    pub fn cost(&self, cost_model: &dyn CostModel, vt: VectorType) -> f64 {
        (self.cost)(cost_model, vt)
    }

    pub fn is_legal_on(&self, features: &crate::target::TargetFeatures) -> bool {
        features.is_superset_of(&self.required_features)
    }
}

/// Per-basic-block cache of every `Operation`'s matches (spec §4.3). Built
/// once per block, shared read-only by every pack-enumeration and
/// extension-search query against that block.
pub struct MatchManager {
    /// Matches for each operation, keyed by operation name, sorted by the
    /// output value's position in the block (its `ValueIndex` id, which is
    /// monotonic with program order for in-block-defined values — see
    /// `ValueIndex::build`).
    matches_by_op: crate::common::fx::FxHashMap<String, Vec<(usize, Match)>>,
}

impl MatchManager {
    pub fn build(
        block: &BasicBlock,
        index: &crate::ir::value_index::ValueIndex,
        operations: &[Arc<dyn Operation>],
    ) -> Self {
        let mut matches_by_op = crate::common::fx::FxHashMap::default();
        for operation in operations {
            let mut found = Vec::new();
            for inst in &block.instructions {
                if let Some(m) = operation.try_match(inst) {
                    let pos = index.id(m.output);
                    found.push((pos, m));
                }
            }
            found.sort_by_key(|(pos, _)| *pos);
            matches_by_op.insert(operation.name().to_string(), found);
        }
        Self { matches_by_op }
    }

    pub fn matches_for(&self, op_name: &str) -> impl Iterator<Item = &Match> {
        self.matches_by_op.get(op_name).into_iter().flatten().map(|(_, m)| m)
    }

    /// Bounded binary search by output position (spec §4.3).
    pub fn matches_for_output(&self, op_name: &str, output: Value, index: &crate::ir::value_index::ValueIndex) -> Option<&Match> {
        let entries = self.matches_by_op.get(op_name)?;
        let target = index.try_id(output)?;
        entries.binary_search_by_key(&target, |(pos, _)| *pos).ok().map(|i| &entries[i].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dependence::LocalDependenceAnalysis;
    use crate::ir::value_index::ValueIndex;
    use crate::ir::{BinOpKind, BlockId, IrType};
    use crate::target::{AliasOracle, AliasResult};

    struct NoAlias;
    impl AliasOracle for NoAlias {
        fn alias(&self, _a: &Instruction, _b: &Instruction) -> AliasResult {
            AliasResult::NoAlias
        }
    }

    #[test]
    fn matches_sorted_and_lookup_works() {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        for i in 0..3u32 {
            block.instructions.push(Instruction::BinOp {
                site: Value(i),
                op: BinOpKind::Add,
                lhs: Operand::Value(Value(100 + i)),
                rhs: Operand::Value(Value(200 + i)),
                ty: IrType::F32,
            });
        }
        let index = ValueIndex::build(&block);
        let _lda = LocalDependenceAnalysis::build(&block, &index, &NoAlias);
        let fadd: Arc<dyn Operation> = Arc::new(ops::BinOpOperation::new(BinOpKind::Add, IrType::F32));
        let mm = MatchManager::build(&block, &index, &[fadd]);
        let matches: Vec<_> = mm.matches_for("binop.add.f32").collect();
        assert_eq!(matches.len(), 3);
        let found = mm.matches_for_output("binop.add.f32", Value(1), &index).unwrap();
        assert_eq!(found.output, Value(1));
    }
}

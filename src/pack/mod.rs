//! `VectorPack` (spec §3): a tagged, immutable-after-creation pack of
//! scalar values chosen to become one SIMD instruction. Spec §9: "use a
//! tagged variant (Load/Store/Phi/General) rather than subclass hierarchy;
//! each variant owns only the fields it needs; behavior is a match over the
//! tag" — `PackData` below is exactly that tag.

pub mod context;
pub mod operand;

pub use context::VectorPackContext;
pub use operand::OperandPack;

use crate::catalog::{InstBinding, Match};
use crate::common::bitset::Bitset;
use crate::common::types::IrType;
use crate::ir::Value;
use crate::target::VectorType;
use std::rc::Rc;
use std::sync::Arc;

/// Tag-specific data for a `VectorPack`. Everything common (bitsets, cost,
/// operand packs, ordered values) lives on `VectorPack` itself (spec §3).
#[derive(Debug, Clone)]
pub enum PackData {
    Load { loads: Vec<Option<Value>> },
    Store { stores: Vec<Option<Value>> },
    Phi { phis: Vec<Value> },
    General { binding: Arc<InstBinding>, matches: Vec<Option<Match>> },
}

impl PackData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PackData::Load { .. } => "load",
            PackData::Store { .. } => "store",
            PackData::Phi { .. } => "phi",
            PackData::General { .. } => "general",
        }
    }
}

#[derive(Debug)]
pub struct VectorPack {
    pub data: PackData,
    /// Which scalar ids (by `ValueIndex`) this pack covers.
    pub elements: Bitset,
    /// Union of the `depended` sets of every packed scalar.
    pub depended: Bitset,
    /// The pack's own vector-instruction cost (spec calls this
    /// `producing_cost`; `cost` is kept equal to it at construction time —
    /// the *recursive* total cost `producing_cost + Σ solve(operand_pack)`
    /// from spec §4.7 is a derived quantity the `Heuristic` computes on
    /// demand, not state mutated into the pack after the fact, since packs
    /// are immutable once built and solving operand packs can depend on
    /// packs not yet built when this one was).
    pub cost: f64,
    pub producing_cost: f64,
    pub operand_packs: Vec<Rc<OperandPack>>,
    /// Per-lane scalar value, or `None` for a don't-care lane.
    pub ordered_values: Vec<Option<Value>>,
    /// The scalar element type of this pack's own vector result (or, for a
    /// `Store`, of the values it stores). Fixed at construction so later
    /// cost queries (extract/gather on a *committed* pack) never need to
    /// re-resolve a lane's type through the block.
    pub element_ty: IrType,
}

impl VectorPack {
    pub fn lanes(&self) -> u32 {
        self.ordered_values.len() as u32
    }

    pub fn vector_type(&self) -> VectorType {
        VectorType::new(self.element_ty, self.lanes())
    }

    /// Lane index of `id` within this pack's `elements`/`ordered_values`,
    /// if this pack covers it.
    pub fn lane_of(&self, value: Value) -> Option<u32> {
        self.ordered_values.iter().position(|v| *v == Some(value)).map(|i| i as u32)
    }

    pub fn is_load(&self) -> bool {
        matches!(self.data, PackData::Load { .. })
    }

    pub fn is_store(&self) -> bool {
        matches!(self.data, PackData::Store { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.data, PackData::Phi { .. })
    }

    /// Every non-don't-care scalar value, in lane order.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.ordered_values.iter().filter_map(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elements_popcount_matches_non_null_lanes() {
        let mut elements = Bitset::new(8);
        elements.insert(0);
        elements.insert(2);
        let vp = VectorPack {
            data: PackData::Load { loads: vec![Some(Value(0)), None, Some(Value(2)), None] },
            elements,
            depended: Bitset::new(8),
            cost: 1.0,
            producing_cost: 1.0,
            operand_packs: Vec::new(),
            ordered_values: vec![Some(Value(0)), None, Some(Value(2)), None],
            element_ty: crate::common::types::IrType::I32,
        };
        assert_eq!(vp.elements.count(), vp.values().count());
    }
}

//! `OperandPack` (spec §3): an ordered sequence of values, some slots
//! possibly don't-care, that must be materialized as one vector register to
//! feed a `VectorPack`. Canonicalized by `VectorPackContext` so identical
//! sequences share one interned pointer (spec §8 property 7).

use crate::common::types::IrType;
use crate::ir::Operand;
use std::cell::OnceCell;

#[derive(Debug, Clone)]
pub struct OperandPack {
    /// `None` = don't-care lane.
    pub slots: Vec<Option<Operand>>,
    /// Element type to fall back on when every slot is don't-care ("a
    /// uniform don't-care pack receives a concrete element type", §4.4).
    pub ty_hint: IrType,
    /// Lazily-computed, not part of this pack's identity — two packs with
    /// the same `slots`/`ty_hint` are the same canonical pack regardless of
    /// whether either has resolved this cache yet.
    vector_ty: OnceCell<IrType>,
}

impl PartialEq for OperandPack {
    fn eq(&self, other: &Self) -> bool {
        self.slots == other.slots && self.ty_hint == other.ty_hint
    }
}
impl Eq for OperandPack {}

impl std::hash::Hash for OperandPack {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slots.hash(state);
        self.ty_hint.hash(state);
    }
}

impl OperandPack {
    pub fn new(slots: Vec<Option<Operand>>, ty_hint: IrType) -> Self {
        Self { slots, ty_hint, vector_ty: OnceCell::new() }
    }

    pub fn lanes(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_splat_of(&self, v: Operand) -> bool {
        self.slots.iter().all(|s| matches!(s, Some(x) if *x == v))
    }

    /// The only operand value shared by every non-don't-care slot, if any
    /// slot exists and they all agree — used by `is_splat_of` callers that
    /// don't already know a candidate value.
    pub fn uniform_value(&self) -> Option<Operand> {
        let mut it = self.slots.iter().flatten();
        let first = *it.next()?;
        if it.all(|v| *v == first) {
            Some(first)
        } else {
            None
        }
    }

    /// Lazily-computed element type: the type of the first concrete slot,
    /// or `ty_hint` if every slot is don't-care. Element-type lookup for a
    /// `Value` slot is the caller's job (it needs the block's type map);
    /// this fn takes that resolved type directly to keep `OperandPack`
    /// itself free of block context.
    pub fn vector_type_with(&self, resolve: impl Fn(Operand) -> IrType) -> IrType {
        *self.vector_ty.get_or_init(|| {
            self.slots.iter().flatten().next().map(|&o| resolve(o)).unwrap_or(self.ty_hint)
        })
    }

    pub fn non_null_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Value;

    #[test]
    fn splat_detection() {
        let v = Operand::Value(Value(1));
        let op = OperandPack::new(vec![Some(v), Some(v), None], IrType::I32);
        assert!(op.is_splat_of(v));
        assert_eq!(op.uniform_value(), Some(v));
    }

    #[test]
    fn not_uniform_when_slots_differ() {
        let op = OperandPack::new(
            vec![Some(Operand::Value(Value(1))), Some(Operand::Value(Value(2)))],
            IrType::I32,
        );
        assert_eq!(op.uniform_value(), None);
    }
}

//! `ValueIndex`: injective `Value -> [0, N)` map, the basis for every
//! `Bitset` in the crate (spec §3).

use super::{BasicBlock, Value};
use crate::common::fx::FxHashMap;

#[derive(Debug, Clone)]
pub struct ValueIndex {
    value_to_id: FxHashMap<Value, usize>,
    id_to_value: Vec<Value>,
}

impl ValueIndex {
    /// Builds the index for one basic block: values *defined* in the block
    /// get the first, stable ids in program order; any value *referenced*
    /// by an in-block instruction but defined elsewhere (a loop-invariant
    /// operand, a phi's incoming value from outside) gets an id afterwards,
    /// in first-reference order. Every id is unique; `N` is fixed once this
    /// returns.
    pub fn build(block: &BasicBlock) -> Self {
        let mut value_to_id = FxHashMap::default();
        let mut id_to_value = Vec::new();

        let mut push = |v: Value, value_to_id: &mut FxHashMap<Value, usize>, id_to_value: &mut Vec<Value>| {
            value_to_id.entry(v).or_insert_with(|| {
                id_to_value.push(v);
                id_to_value.len() - 1
            });
        };

        for v in block.defined_values() {
            push(v, &mut value_to_id, &mut id_to_value);
        }
        for phi in &block.phis {
            for edge in &phi.incoming {
                if let Some(v) = edge.value.as_value() {
                    push(v, &mut value_to_id, &mut id_to_value);
                }
            }
        }
        for inst in &block.instructions {
            for v in inst.operand_values() {
                push(v, &mut value_to_id, &mut id_to_value);
            }
        }

        Self { value_to_id, id_to_value }
    }

    pub fn len(&self) -> usize {
        self.id_to_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_value.is_empty()
    }

    pub fn id(&self, v: Value) -> usize {
        *self.value_to_id.get(&v).unwrap_or_else(|| panic!("{v:?} not present in this block's ValueIndex"))
    }

    pub fn try_id(&self, v: Value) -> Option<usize> {
        self.value_to_id.get(&v).copied()
    }

    pub fn value(&self, id: usize) -> Value {
        self.id_to_value[id]
    }

    pub fn contains(&self, v: Value) -> bool {
        self.value_to_id.contains_key(&v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOpKind, BlockId, Instruction, IrType, Operand};

    #[test]
    fn injective_and_dense() {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        block.instructions.push(Instruction::BinOp {
            site: Value(0),
            op: BinOpKind::Add,
            lhs: Operand::Value(Value(10)),
            rhs: Operand::Value(Value(11)),
            ty: IrType::I32,
        });
        let idx = ValueIndex::build(&block);
        assert_eq!(idx.len(), 3);
        assert!(idx.contains(Value(0)) && idx.contains(Value(10)) && idx.contains(Value(11)));
        let ids: std::collections::HashSet<usize> = (0..idx.len()).map(|i| idx.id(idx.value(i))).collect();
        assert_eq!(ids.len(), idx.len());
    }
}

//! `ConsecutiveAccessDAG` (spec §4.2): `A -> B` iff `B` immediately follows
//! `A` in address order. Quadratic over same-type accesses, per spec.

use crate::common::fx::FxHashMap;
use crate::ir::value_index::ValueIndex;
use crate::ir::{BasicBlock, Instruction, Value};
use crate::target::ScalarEvolution;

#[derive(Debug, Default)]
pub struct ConsecutiveAccessDag {
    /// `site(A) -> [site(B), ...]`, deduplicated, in discovery (iteration)
    /// order — spec leaves tie-break among multiple outgoing edges to
    /// iteration order.
    edges: FxHashMap<Value, Vec<Value>>,
    /// Reverse edges, used by chain reconstruction (spec §4.6) to walk
    /// backward from any element of a chain.
    rev_edges: FxHashMap<Value, Vec<Value>>,
}

impl ConsecutiveAccessDag {
    /// Builds the DAG over one kind of access (loads, or stores — spec §2
    /// keeps "two ConsecutiveAccessDAGs (loads, stores)" separate).
    pub fn build(
        block: &BasicBlock,
        _index: &ValueIndex,
        sce: &dyn ScalarEvolution,
        want_loads: bool,
    ) -> Self {
        let accesses: Vec<&Instruction> = block
            .instructions
            .iter()
            .filter(|i| if want_loads { i.is_load() } else { i.is_store() })
            .filter(|i| i.ty().is_scalar_element())
            .collect();

        let mut edges: FxHashMap<Value, Vec<Value>> = FxHashMap::default();
        let mut rev_edges: FxHashMap<Value, Vec<Value>> = FxHashMap::default();

        for &a in &accesses {
            for &b in &accesses {
                if std::ptr::eq(a, b) {
                    continue;
                }
                if a.ty() != b.ty() {
                    continue;
                }
                if sce.is_consecutive(a, b) {
                    let entry = edges.entry(a.site()).or_default();
                    if !entry.contains(&b.site()) {
                        entry.push(b.site());
                        rev_edges.entry(b.site()).or_default().push(a.site());
                    }
                }
            }
        }

        Self { edges, rev_edges }
    }

    pub fn successors(&self, v: Value) -> &[Value] {
        self.edges.get(&v).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, v: Value) -> &[Value] {
        self.rev_edges.get(&v).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_edge(&self, a: Value, b: Value) -> bool {
        self.edges.get(&a).is_some_and(|succs| succs.contains(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, Operand};
    use crate::common::types::IrType;

    struct Stride1;
    impl ScalarEvolution for Stride1 {
        fn is_consecutive(&self, a: &Instruction, b: &Instruction) -> bool {
            // Treat loads as consecutive iff their `site` ids are adjacent —
            // a stand-in "address" for this unit test.
            b.site().0 == a.site().0 + 1
        }
    }

    #[test]
    fn builds_chain_edges() {
        let mut block = BasicBlock::new(BlockId(0), "entry");
        for i in 0..4u32 {
            block.instructions.push(Instruction::Load {
                site: Value(i),
                ptr: Operand::Value(Value(100 + i)),
                ty: IrType::F32,
                align: 4,
            });
        }
        let index = ValueIndex::build(&block);
        let dag = ConsecutiveAccessDag::build(&block, &index, &Stride1, true);
        assert_eq!(dag.successors(Value(0)), &[Value(1)]);
        assert_eq!(dag.successors(Value(1)), &[Value(2)]);
        assert_eq!(dag.successors(Value(3)), &[] as &[Value]);
        assert_eq!(dag.predecessors(Value(2)), &[Value(1)]);
    }
}

//! `LocalDependenceAnalysis` (spec §4.1): per-instruction transitive
//! dependency bitset, and the dual "independent" bitset used everywhere
//! packability is checked.
//!
//! Computed in one forward pass over the block — operands and prior memory
//! accesses always precede the instruction reading/conflicting with them in
//! program order, so accumulating `depended` left-to-right is already the
//! "reverse-topological" pass spec §4.1 describes (reverse with respect to
//! the `Frontier`'s *backward* cursor, forward with respect to definition
//! order). Grounded on the teacher's single-pass fixpoint style in
//! `passes/cfg_simplify.rs` (`for block in &mut func.blocks { ... }`)
//! generalized from a CFG-level fixpoint to a per-instruction one.

use crate::common::bitset::Bitset;
use crate::ir::value_index::ValueIndex;
use crate::ir::{BasicBlock, Value};
use crate::target::{AliasOracle, AliasResult};

pub struct LocalDependenceAnalysis {
    /// `depended[id]`: transitively-closed, reflexive-free dependence set.
    depended: Vec<Bitset>,
    /// `independent[id]`: `complement(depended) \ {self} \ reachable_users`.
    independent: Vec<Bitset>,
}

impl LocalDependenceAnalysis {
    pub fn build(block: &BasicBlock, index: &ValueIndex, alias: &dyn AliasOracle) -> Self {
        let n = index.len();
        let mut depended = vec![Bitset::new(n); n];

        // Memory accesses seen so far, in program order, for the O(mem^2)
        // alias scan.
        let mut mem_so_far: Vec<&crate::ir::Instruction> = Vec::new();

        for inst in &block.instructions {
            let id = index.id(inst.site());
            let mut dep = Bitset::new(n);

            for operand in inst.operand_values() {
                if let Some(oid) = index.try_id(operand) {
                    if oid != id {
                        dep.insert(oid);
                        dep.union_with(&depended[oid]);
                    }
                }
            }

            if inst.is_memory_access() {
                for prior in &mem_so_far {
                    let conflicts = (inst.is_write() || prior.is_write())
                        && matches!(alias.alias(prior, inst), AliasResult::MayAlias | AliasResult::MustAlias);
                    if conflicts {
                        let pid = index.id(prior.site());
                        dep.insert(pid);
                        dep.union_with(&depended[pid]);
                    }
                }
            }

            depended[id] = dep;
            if inst.is_memory_access() {
                mem_so_far.push(inst);
            }
        }

        // reachable_users[i] = { j : i in depended[j] }, used to keep
        // `independent` free of anything that (transitively) uses `self` —
        // packing an instruction with its own transitive user is a cycle.
        let mut reachable_users = vec![Bitset::new(n); n];
        for j in 0..n {
            for i in depended[j].iter() {
                reachable_users[i].insert(j);
            }
        }

        let mut independent = Vec::with_capacity(n);
        for i in 0..n {
            let mut indep = depended[i].union(&reachable_users[i]);
            indep.insert(i);
            independent.push(indep.complement());
        }

        Self { depended, independent }
    }

    pub fn depended(&self, id: usize) -> &Bitset {
        &self.depended[id]
    }

    pub fn independent(&self, id: usize) -> &Bitset {
        &self.independent[id]
    }

    pub fn are_independent(&self, a: usize, b: usize) -> bool {
        a != b && self.independent[a].contains(b)
    }

    /// Every pairwise-independent check over a whole lane set at once
    /// (spec §4.6: "the lane-elements must be pairwise independent").
    pub fn all_independent(&self, ids: &[usize]) -> bool {
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                if !self.are_independent(a, b) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether none of `ids` depends on `value_id` (used when extending a
    /// pack: "none may depend on already-packed values", spec §4.6).
    pub fn none_depend_on(&self, ids: &[usize], value_id: usize) -> bool {
        ids.iter().all(|&id| !self.depended[id].contains(value_id))
    }
}

/// Convenience used by callers that key by `Value` rather than a
/// pre-resolved dense id.
pub fn value_depended<'a>(
    lda: &'a LocalDependenceAnalysis,
    index: &ValueIndex,
    v: Value,
) -> &'a Bitset {
    lda.depended(index.id(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOpKind, BlockId, Instruction, IrType, Operand};
    use crate::target::AliasResult;

    struct NoAlias;
    impl AliasOracle for NoAlias {
        fn alias(&self, _a: &crate::ir::Instruction, _b: &crate::ir::Instruction) -> AliasResult {
            AliasResult::NoAlias
        }
    }

    #[test]
    fn independent_excludes_operands_and_users() {
        // %0 = a + b ; %1 = %0 + c
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
            lhs: Operand::Value(Value(0)),
            rhs: Operand::Value(Value(12)),
            ty: IrType::I32,
        });
        let index = ValueIndex::build(&block);
        let lda = LocalDependenceAnalysis::build(&block, &index, &NoAlias);

        let id0 = index.id(Value(0));
        let id1 = index.id(Value(1));
        assert!(lda.depended(id1).contains(id0));
        assert!(!lda.are_independent(id0, id1));

        let id10 = index.id(Value(10));
        let id11 = index.id(Value(11));
        assert!(lda.are_independent(id10, id11));
    }
}

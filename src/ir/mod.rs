//! The concrete, already-lowered IR this crate reasons about.
//!
//! Parsing and lowering a host's own IR into this shape is out of scope
//! (spec.md §1): a real embedding typically implements the traits in
//! `crate::target` directly against its own instruction types rather than
//! translating into these structs. This module is the reference
//! instantiation used by the rest of the crate and by tests — it is
//! intentionally small: just enough instruction shapes (loads, stores,
//! phis, unary/binary/compare ops) for pack enumeration and the cost model
//! to have something concrete to point at.
//!
//! Grounded on the teacher's own `ir::ir` module (reconstructed from its use
//! in `ir/lowering/lowering.rs` and `passes/cfg_simplify.rs`, which is not
//! itself present in the retrieved slice): a `Value(u32)` newtype id,
//! `Operand::{Value, Const}`, a struct-variant `Instruction` enum, and a
//! `BasicBlock { instructions, terminator }` with a label/id.
//!
//! One departure from the teacher's own IR: every instruction, including a
//! `Store` (which produces no usable result), carries a `site: Value`
//! identity. `ValueIndex`/`Bitset` width and every `elements`/`depended` set
//! in the spec is defined per-instruction, and a store pack needs lane bits
//! just like a load or arithmetic pack — exactly how LLVM treats every
//! `Instruction`, void-typed or not, as a `Value` for identity purposes.

pub mod value_index;

use crate::common::types::IrType;
use smallvec::SmallVec;

/// A dense SSA value id, unique within a `Function`. Doubles as the
/// identity of *every* instruction (see module docs), not just ones with a
/// usable scalar result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub u32);

impl Value {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy)]
pub enum IrConst {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl IrConst {
    pub fn ty(&self) -> IrType {
        match self {
            IrConst::I8(_) => IrType::I8,
            IrConst::I16(_) => IrType::I16,
            IrConst::I32(_) => IrType::I32,
            IrConst::I64(_) => IrType::I64,
            IrConst::F32(_) => IrType::F32,
            IrConst::F64(_) => IrType::F64,
        }
    }
}

// Operand packs are canonicalized (spec §4.4: "identical sequences share a
// single interned pointer"), which needs `Eq`/`Hash` on operands including
// float constants. IEEE `PartialEq` on `f32`/`f64` isn't reflexive for NaN
// and floats aren't `Hash` at all, so compare/hash by bit pattern instead —
// two constants are "the same operand" iff their bits match, which is all
// canonicalization needs.
impl PartialEq for IrConst {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (IrConst::I8(a), IrConst::I8(b)) => a == b,
            (IrConst::I16(a), IrConst::I16(b)) => a == b,
            (IrConst::I32(a), IrConst::I32(b)) => a == b,
            (IrConst::I64(a), IrConst::I64(b)) => a == b,
            (IrConst::F32(a), IrConst::F32(b)) => a.to_bits() == b.to_bits(),
            (IrConst::F64(a), IrConst::F64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}
impl Eq for IrConst {}

impl std::hash::Hash for IrConst {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            IrConst::I8(v) => v.hash(state),
            IrConst::I16(v) => v.hash(state),
            IrConst::I32(v) => v.hash(state),
            IrConst::I64(v) => v.hash(state),
            IrConst::F32(v) => v.to_bits().hash(state),
            IrConst::F64(v) => v.to_bits().hash(state),
        }
    }
}

/// An instruction operand: either a value produced somewhere (possibly in
/// another block, e.g. a phi incoming value) or an immediate constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Value(Value),
    Const(IrConst),
}

impl Operand {
    pub fn as_value(&self) -> Option<Value> {
        match self {
            Operand::Value(v) => Some(*v),
            Operand::Const(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOpKind {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One incoming edge of a phi: the predecessor block and the value live on
/// that edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhiEdge {
    pub pred: BlockId,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhiNode {
    pub dest: Value,
    pub ty: IrType,
    pub incoming: Vec<PhiEdge>,
}

/// A scalar instruction. Phis are modeled separately (`BasicBlock::phis`)
/// since they're positionally special (always at the top of a block, one
/// operand per predecessor) rather than a variant here — matching how the
/// teacher's own lowering treats non-phi instructions as a flat
/// `Vec<Instruction>` per block.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Load { site: Value, ptr: Operand, ty: IrType, align: u32 },
    Store { site: Value, val: Operand, ptr: Operand, ty: IrType, align: u32 },
    BinOp { site: Value, op: BinOpKind, lhs: Operand, rhs: Operand, ty: IrType },
    UnOp { site: Value, op: UnOpKind, val: Operand, ty: IrType },
    Cmp { site: Value, op: CmpOp, lhs: Operand, rhs: Operand, ty: IrType },
}

impl Instruction {
    /// This instruction's own identity — always present, even for a
    /// `Store`, which has no usable scalar result.
    pub fn site(&self) -> Value {
        match self {
            Instruction::Load { site, .. }
            | Instruction::Store { site, .. }
            | Instruction::BinOp { site, .. }
            | Instruction::UnOp { site, .. }
            | Instruction::Cmp { site, .. } => *site,
        }
    }

    /// This instruction's usable scalar result, if any (`None` for `Store`,
    /// which produces nothing other operands can read).
    pub fn dest(&self) -> Option<Value> {
        match self {
            Instruction::Store { .. } => None,
            other => Some(other.site()),
        }
    }

    pub fn ty(&self) -> IrType {
        match self {
            Instruction::Load { ty, .. }
            | Instruction::Store { ty, .. }
            | Instruction::BinOp { ty, .. }
            | Instruction::UnOp { ty, .. }
            | Instruction::Cmp { ty, .. } => *ty,
        }
    }

    pub fn is_load(&self) -> bool {
        matches!(self, Instruction::Load { .. })
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Instruction::Store { .. })
    }

    pub fn is_memory_access(&self) -> bool {
        self.is_load() || self.is_store()
    }

    /// Whether this instruction writes memory (for alias-oracle queries:
    /// only May-Alias pairs with at least one write matter, per spec §4.1).
    pub fn is_write(&self) -> bool {
        self.is_store()
    }

    /// The address operand of a memory access, if any.
    pub fn address(&self) -> Option<Operand> {
        match self {
            Instruction::Load { ptr, .. } | Instruction::Store { ptr, .. } => Some(*ptr),
            _ => None,
        }
    }

    /// In-block operands this instruction reads (excludes its own identity).
    pub fn operands(&self) -> SmallVec<[Operand; 2]> {
        match self {
            Instruction::Load { ptr, .. } => smallvec::smallvec![*ptr],
            Instruction::Store { val, ptr, .. } => smallvec::smallvec![*val, *ptr],
            Instruction::BinOp { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                smallvec::smallvec![*lhs, *rhs]
            }
            Instruction::UnOp { val, .. } => smallvec::smallvec![*val],
        }
    }

    pub fn operand_values(&self) -> impl Iterator<Item = Value> + '_ {
        let ops = self.operands();
        ops.into_iter().filter_map(|o| o.as_value())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: String,
    /// Predecessor blocks, in the order phi incoming edges are indexed by.
    pub preds: Vec<BlockId>,
    pub phis: Vec<PhiNode>,
    /// Instructions, in program order (each has its own `site` identity).
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(id: BlockId, label: impl Into<String>) -> Self {
        Self { id, label: label.into(), preds: Vec::new(), phis: Vec::new(), instructions: Vec::new() }
    }

    /// Every value with an identity in this block: phi destinations
    /// followed by instruction sites, in program order. This is the order
    /// `ValueIndex` assigns dense ids in.
    pub fn defined_values(&self) -> impl Iterator<Item = Value> + '_ {
        self.phis.iter().map(|p| p.dest).chain(self.instructions.iter().map(|i| i.site()))
    }

    /// Instructions, most-recent-first — the order the backward `Frontier`
    /// cursor (spec §3/§4.5) walks the block in.
    pub fn instructions_rev(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().rev()
    }

    /// Users of `v` that are defined within this block, in program order.
    pub fn in_block_users(&self, v: Value) -> SmallVec<[Value; 4]> {
        let mut out = SmallVec::new();
        for phi in &self.phis {
            if phi.incoming.iter().any(|e| e.value.as_value() == Some(v)) {
                out.push(phi.dest);
            }
        }
        for inst in &self.instructions {
            if inst.operand_values().any(|u| u == v) {
                out.push(inst.site());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct Function {
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks.iter().find(|b| b.id == id).expect("unknown block id")
    }
}

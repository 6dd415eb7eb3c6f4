//! Built-in `Operation`s covering every scalar opcode this crate's `ir`
//! module has, plus convenience constructors for the elementwise
//! `InstBinding`s built from them. A host with a richer IR supplies its own
//! `Operation`s and `InstBinding`s; these exist so the crate's own test
//! suite (and a minimal embedding) has a usable catalog out of the box.

use super::{InstBinding, LaneBinding, Match, Operation};
use crate::ir::{BinOpKind, CmpOp, Instruction, IrType, UnOpKind};
use crate::target::{ArithOp, CostModel};
use std::sync::Arc;

pub struct BinOpOperation {
    kind: BinOpKind,
    ty: IrType,
    name: String,
}

impl BinOpOperation {
    pub fn new(kind: BinOpKind, ty: IrType) -> Self {
        let name = format!("binop.{}.{}", kind_name(kind), ty_name(ty));
        Self { kind, ty, name }
    }
}

impl Operation for BinOpOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_match(&self, inst: &Instruction) -> Option<Match> {
        match inst {
            Instruction::BinOp { site, op, lhs, rhs, ty } if *op == self.kind && *ty == self.ty => {
                Some(Match { inputs: smallvec::smallvec![*lhs, *rhs], output: *site })
            }
            _ => None,
        }
    }
}

pub struct UnOpOperation {
    kind: UnOpKind,
    ty: IrType,
    name: String,
}

impl UnOpOperation {
    pub fn new(kind: UnOpKind, ty: IrType) -> Self {
        let name = format!("unop.{}.{}", un_kind_name(kind), ty_name(ty));
        Self { kind, ty, name }
    }
}

impl Operation for UnOpOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_match(&self, inst: &Instruction) -> Option<Match> {
        match inst {
            Instruction::UnOp { site, op, val, ty } if *op == self.kind && *ty == self.ty => {
                Some(Match { inputs: smallvec::smallvec![*val], output: *site })
            }
            _ => None,
        }
    }
}

pub struct CmpOperation {
    kind: CmpOp,
    ty: IrType,
    name: String,
}

impl CmpOperation {
    pub fn new(kind: CmpOp, ty: IrType) -> Self {
        let name = format!("cmp.{}.{}", cmp_kind_name(kind), ty_name(ty));
        Self { kind, ty, name }
    }
}

impl Operation for CmpOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_match(&self, inst: &Instruction) -> Option<Match> {
        match inst {
            Instruction::Cmp { site, op, lhs, rhs, ty } if *op == self.kind && *ty == self.ty => {
                Some(Match { inputs: smallvec::smallvec![*lhs, *rhs], output: *site })
            }
            _ => None,
        }
    }
}

fn kind_name(k: BinOpKind) -> &'static str {
    match k {
        BinOpKind::Add => "add",
        BinOpKind::Sub => "sub",
        BinOpKind::Mul => "mul",
        BinOpKind::Div => "div",
        BinOpKind::And => "and",
        BinOpKind::Or => "or",
        BinOpKind::Xor => "xor",
        BinOpKind::Shl => "shl",
        BinOpKind::Shr => "shr",
    }
}

fn un_kind_name(k: UnOpKind) -> &'static str {
    match k {
        UnOpKind::Neg => "neg",
        UnOpKind::Not => "not",
    }
}

fn cmp_kind_name(k: CmpOp) -> &'static str {
    match k {
        CmpOp::Eq => "eq",
        CmpOp::Ne => "ne",
        CmpOp::Lt => "lt",
        CmpOp::Le => "le",
        CmpOp::Gt => "gt",
        CmpOp::Ge => "ge",
    }
}

fn ty_name(t: IrType) -> &'static str {
    match t {
        IrType::I8 => "i8",
        IrType::I16 => "i16",
        IrType::I32 => "i32",
        IrType::I64 => "i64",
        IrType::F32 => "f32",
        IrType::F64 => "f64",
        IrType::Ptr => "ptr",
        IrType::Void => "void",
    }
}

/// Builds an elementwise `InstBinding` of `lane_count` lanes, each bound to
/// `operation` at identity offsets (lane `i` of every input pack feeds
/// lane `i` of the output) — the common case spec §4.4 describes. `arith_op`
/// is what the binding's `cost` closure hands the `CostModel` on every
/// query; it need not match `operation`'s own matching logic (a host could,
/// in principle, cost a binding differently from what it matches), but
/// every constructor in this module keeps them in lockstep.
pub fn elementwise_binding(operation: Arc<dyn Operation>, arith_op: ArithOp, num_inputs: usize, lane_count: u32) -> InstBinding {
    let name = operation.name().to_string();
    let signature = (0..lane_count as usize)
        .map(|lane| LaneBinding { operation: operation.clone(), input_offsets: vec![lane; num_inputs] })
        .collect();
    let cost = Arc::new(move |cost_model: &dyn CostModel, vt: crate::target::VectorType| cost_model.arith_cost(arith_op, vt));
    InstBinding { name, required_features: Vec::new(), signature, num_inputs, cost }
}

/// A standard catalog of elementwise bindings for every `(op, type, lane
/// count)` combination a host would typically register for a given target.
/// Convenience for tests and small embeddings; real catalogs are normally
/// far more target-specific (alignment requirements, feature gating).
pub fn default_catalog(lane_counts: &[u32]) -> Vec<InstBinding> {
    let mut out = Vec::new();
    let bin_kinds = [BinOpKind::Add, BinOpKind::Sub, BinOpKind::Mul, BinOpKind::And, BinOpKind::Or, BinOpKind::Xor];
    let types = [IrType::I32, IrType::I64, IrType::F32, IrType::F64];
    for &lanes in lane_counts {
        for &kind in &bin_kinds {
            for &ty in &types {
                let op: Arc<dyn Operation> = Arc::new(BinOpOperation::new(kind, ty));
                out.push(elementwise_binding(op, ArithOp::Bin(kind), 2, lanes));
            }
        }
    }
    out
}

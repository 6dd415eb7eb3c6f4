//! Literal end-to-end scenarios a packer implementation must get right:
//! a block goes in, a `Plan` comes out, and the plan's shape and cost are
//! asserted against what a correct search can and can't do.

use slp_packer::common::types::IrType;
use slp_packer::ir::{BasicBlock, BinOpKind, BlockId, Instruction, IrConst, Operand, PhiEdge, PhiNode, Value};
use slp_packer::target::AliasResult;
use slp_packer::testutil::{NoAliasOracle, StubCostModel, StubScalarEvolution};
use slp_packer::{AliasOracle, Analyses, CostModel, Packer, PackerConfig, TargetFeatures};
use std::sync::Arc;

fn catalog(lane_counts: &[u32]) -> Vec<Arc<slp_packer::catalog::InstBinding>> {
    slp_packer::catalog::ops::default_catalog(lane_counts).into_iter().map(Arc::new).collect()
}

fn packer<'a>(analyses: Analyses<'a>, bindings: Vec<Arc<slp_packer::catalog::InstBinding>>) -> Packer<'a> {
    Packer::new(bindings, analyses, PackerConfig::default(), 42).expect("default config validates")
}

#[test]
fn trivial_self_add_has_nothing_to_vectorize() {
    let mut block = BasicBlock::new(BlockId(0), "entry");
    block.instructions.push(Instruction::BinOp {
        site: Value(0),
        op: BinOpKind::Add,
        lhs: Operand::Value(Value(100)),
        rhs: Operand::Value(Value(100)),
        ty: IrType::I32,
    });

    let alias = NoAliasOracle;
    let se = StubScalarEvolution;
    let cost_model = StubCostModel::default();
    let features = TargetFeatures::default();
    let analyses = Analyses { alias: &alias, scalar_evolution: &se, cost_model: &cost_model, features: &features };
    let mut p = packer(analyses, catalog(&[2, 4]));

    let plan = p.optimize(&block);
    assert!(plan.is_empty());
    assert_eq!(plan.cost(), 0.0);
}

/// `store float (%a_i + %b_i), p[i]` for `i in 0..4`, with `%a`, `%b` each
/// loaded from consecutive addresses and the stores themselves consecutive.
#[test]
fn four_consecutive_float_stores_of_adds_vectorize_below_scalar_cost() {
    let mut block = BasicBlock::new(BlockId(0), "entry");
    for i in 0..4u32 {
        block.instructions.push(Instruction::Load {
            site: Value(i),
            ptr: Operand::Value(Value(100 + i)),
            ty: IrType::F32,
            align: 4,
        });
    }
    for i in 0..4u32 {
        block.instructions.push(Instruction::Load {
            site: Value(4 + i),
            ptr: Operand::Value(Value(200 + i)),
            ty: IrType::F32,
            align: 4,
        });
    }
    for i in 0..4u32 {
        block.instructions.push(Instruction::BinOp {
            site: Value(8 + i),
            op: BinOpKind::Add,
            lhs: Operand::Value(Value(i)),
            rhs: Operand::Value(Value(4 + i)),
            ty: IrType::F32,
        });
    }
    for i in 0..4u32 {
        block.instructions.push(Instruction::Store {
            site: Value(12 + i),
            val: Operand::Value(Value(8 + i)),
            ptr: Operand::Value(Value(300 + i)),
            ty: IrType::F32,
            align: 4,
        });
    }

    let alias = NoAliasOracle;
    let se = StubScalarEvolution;
    let cost_model = StubCostModel::default();
    let features = TargetFeatures::default();
    let analyses = Analyses { alias: &alias, scalar_evolution: &se, cost_model: &cost_model, features: &features };
    let mut p = packer(analyses, catalog(&[4]));

    let plan = p.optimize(&block);
    assert!(!plan.is_empty());

    let loads_packed = plan.iter().filter(|pk| pk.is_load() && pk.lanes() == 4).count();
    let stores_packed = plan.iter().filter(|pk| pk.is_store() && pk.lanes() == 4).count();
    assert_eq!(loads_packed, 2, "expected a 4-lane load pack each for %a and %b");
    assert_eq!(stores_packed, 1, "expected a single 4-lane store pack");

    let load_scalar = cost_model.scalar_cost(&Instruction::Load {
        site: Value(0),
        ptr: Operand::Value(Value(100)),
        ty: IrType::F32,
        align: 4,
    });
    let add_scalar = cost_model.scalar_cost(&Instruction::BinOp {
        site: Value(8),
        op: BinOpKind::Add,
        lhs: Operand::Value(Value(0)),
        rhs: Operand::Value(Value(4)),
        ty: IrType::F32,
    });
    let store_scalar = cost_model.scalar_cost(&Instruction::Store {
        site: Value(12),
        val: Operand::Value(Value(8)),
        ptr: Operand::Value(Value(300)),
        ty: IrType::F32,
        align: 4,
    });
    let scalar_baseline = 4.0 * (2.0 * load_scalar + add_scalar + store_scalar);
    assert!(plan.cost() < scalar_baseline, "plan cost {} should beat scalar baseline {}", plan.cost(), scalar_baseline);
}

/// Four loads at addresses that are never adjacent, all feeding the same
/// elementwise group: no load pack should ever get committed, since the
/// scalar-evolution oracle never reports any pair as consecutive.
#[test]
fn non_consecutive_loads_never_produce_a_load_pack() {
    let mut block = BasicBlock::new(BlockId(0), "entry");
    let scattered_addrs = [100u32, 317, 42, 9001];
    for (i, addr) in scattered_addrs.iter().enumerate() {
        block.instructions.push(Instruction::Load {
            site: Value(i as u32),
            ptr: Operand::Value(Value(*addr)),
            ty: IrType::F32,
            align: 4,
        });
    }
    for i in 0..4u32 {
        block.instructions.push(Instruction::BinOp {
            site: Value(4 + i),
            op: BinOpKind::Add,
            lhs: Operand::Value(Value(i)),
            rhs: Operand::Const(IrConst::F32(1.0)),
            ty: IrType::F32,
        });
    }

    let alias = NoAliasOracle;
    let se = StubScalarEvolution;
    let cost_model = StubCostModel::default();
    let features = TargetFeatures::default();
    let analyses = Analyses { alias: &alias, scalar_evolution: &se, cost_model: &cost_model, features: &features };
    let mut p = packer(analyses, catalog(&[4]));

    let plan = p.optimize(&block);
    assert_eq!(plan.iter().filter(|pk| pk.is_load()).count(), 0);
}

/// An oracle that reports a must-alias dependence between any store and any
/// other memory access, breaking a would-be consecutive-load chain
/// `L1 -> store -> L2` at seed enumeration.
struct AliasesAcrossAnyStore;
impl AliasOracle for AliasesAcrossAnyStore {
    fn alias(&self, a: &Instruction, b: &Instruction) -> AliasResult {
        if a.is_write() || b.is_write() {
            AliasResult::MustAlias
        } else {
            AliasResult::NoAlias
        }
    }
}

#[test]
fn aliasing_store_between_two_loads_blocks_the_load_pack() {
    let mut block = BasicBlock::new(BlockId(0), "entry");
    block.instructions.push(Instruction::Load {
        site: Value(0),
        ptr: Operand::Value(Value(100)),
        ty: IrType::F32,
        align: 4,
    });
    block.instructions.push(Instruction::Store {
        site: Value(1),
        val: Operand::Const(IrConst::F32(9.9)),
        ptr: Operand::Value(Value(200)),
        ty: IrType::F32,
        align: 4,
    });
    block.instructions.push(Instruction::Load {
        site: Value(2),
        ptr: Operand::Value(Value(101)),
        ty: IrType::F32,
        align: 4,
    });

    let alias = AliasesAcrossAnyStore;
    let se = StubScalarEvolution;
    let cost_model = StubCostModel::default();
    let features = TargetFeatures::default();
    let analyses = Analyses { alias: &alias, scalar_evolution: &se, cost_model: &cost_model, features: &features };
    let mut p = packer(analyses, catalog(&[2]));

    let plan = p.optimize(&block);
    assert_eq!(plan.iter().filter(|pk| pk.is_load() && pk.lanes() == 2).count(), 0);
}

/// A loop header with four parallel phis of matching type, each fed by an
/// isomorphic self-multiply on the latch edge: the packer should commit one
/// phi pack plus one FMul pack, for a total cost below the scalar baseline.
#[test]
fn phi_pack_plus_latch_edge_fmul_beats_scalar_baseline() {
    let mut block = BasicBlock::new(BlockId(1), "loop.header");
    block.preds = vec![BlockId(0), BlockId(1)];
    for i in 0..4u32 {
        block.phis.push(PhiNode {
            dest: Value(i),
            ty: IrType::F32,
            incoming: vec![
                PhiEdge { pred: BlockId(0), value: Operand::Const(IrConst::F32(0.0)) },
                PhiEdge { pred: BlockId(1), value: Operand::Value(Value(10 + i)) },
            ],
        });
    }
    for i in 0..4u32 {
        block.instructions.push(Instruction::BinOp {
            site: Value(10 + i),
            op: BinOpKind::Mul,
            lhs: Operand::Value(Value(i)),
            rhs: Operand::Value(Value(i)),
            ty: IrType::F32,
        });
    }

    let alias = NoAliasOracle;
    let se = StubScalarEvolution;
    let cost_model = StubCostModel::default();
    let features = TargetFeatures::default();
    let analyses = Analyses { alias: &alias, scalar_evolution: &se, cost_model: &cost_model, features: &features };
    let mut p = packer(analyses, catalog(&[4]));

    let plan = p.optimize(&block);
    assert_eq!(plan.iter().filter(|pk| pk.is_phi()).count(), 1, "expected exactly one phi pack");
    assert!(plan.iter().any(|pk| !pk.is_phi() && pk.lanes() == 4), "expected a 4-lane FMul pack");

    let mul_scalar = cost_model.scalar_cost(&Instruction::BinOp {
        site: Value(10),
        op: BinOpKind::Mul,
        lhs: Operand::Value(Value(0)),
        rhs: Operand::Value(Value(0)),
        ty: IrType::F32,
    });
    let scalar_baseline = 4.0 * mul_scalar;
    assert!(plan.cost() < scalar_baseline, "plan cost {} should beat scalar baseline {}", plan.cost(), scalar_baseline);
}

/// A frontier whose only legal move is a single scalar instruction with no
/// other usable values: `UCTSearch` should take the forced shortcut and
/// still reach a correct (empty) plan regardless of `num_simulations`.
#[test]
fn forced_single_move_block_is_optimized_in_one_shot_regardless_of_simulation_budget() {
    let mut block = BasicBlock::new(BlockId(0), "entry");
    block.instructions.push(Instruction::BinOp {
        site: Value(0),
        op: BinOpKind::Add,
        lhs: Operand::Value(Value(10)),
        rhs: Operand::Value(Value(11)),
        ty: IrType::I32,
    });

    let alias = NoAliasOracle;
    let se = StubScalarEvolution;
    let cost_model = StubCostModel::default();
    let features = TargetFeatures::default();
    let analyses = Analyses { alias: &alias, scalar_evolution: &se, cost_model: &cost_model, features: &features };

    let mut config = PackerConfig::default();
    config.num_simulations = 50_000;
    let mut p = Packer::new(catalog(&[2, 4]), analyses, config, 7).unwrap();

    let plan = p.optimize(&block);
    assert!(plan.is_empty());
    assert_eq!(plan.cost(), 0.0);
}

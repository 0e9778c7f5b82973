//! Dead code elimination
//!
//! Blocks are visited in post order and instructions bottom up, so a chain of
//! unused instructions dies in a single sweep.

use super::Pass;
use crate::analysis::post_order;
use crate::ir::{BinaryOp, FunctionId, InstId, InstKind, Module, Type, Value};
use crate::stats::PassStats;

/// Dead code elimination pass
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "DCE"
    }

    fn run(&mut self, module: &mut Module, stats: &mut PassStats) -> bool {
        let mut changed = false;
        for f in module.functions() {
            while sweep(module, f, stats) {
                changed = true;
            }
        }
        changed
    }
}

/// Can an operator on these operands throw. Conversions on objects can run
/// user code, and mixing BigInts with other numbers throws.
fn operator_may_throw(module: &Module, inst: InstId) -> bool {
    let i = module.inst(inst);
    let types: Vec<Type> = i.operands().iter().map(|op| module.value_type(*op)).collect();
    if !types.iter().all(|t| t.is_primitive()) {
        return true;
    }
    if !types.iter().any(|t| t.intersects(Type::BIGINT)) {
        return false;
    }
    match i.kind {
        InstKind::UnaryOperator(_) => false,
        InstKind::BinaryOperator(op) if op.is_comparison() => false,
        // Division by zero, negative shifts and mixed operands throw.
        InstKind::BinaryOperator(op) => {
            !(types.iter().all(|t| *t == Type::BIGINT)
                && matches!(
                    op,
                    BinaryOp::Add
                        | BinaryOp::Sub
                        | BinaryOp::Mul
                        | BinaryOp::BitAnd
                        | BinaryOp::BitOr
                        | BinaryOp::BitXor
                ))
        }
        _ => true,
    }
}

fn is_removable(module: &Module, inst: InstId) -> bool {
    if module.has_users(Value::Inst(inst)) {
        return false;
    }
    match module.inst(inst).kind {
        InstKind::BinaryOperator(_) | InstKind::UnaryOperator(_) => {
            !operator_may_throw(module, inst)
        }
        kind => kind.is_side_effect_free(),
    }
}

fn sweep(module: &mut Module, f: FunctionId, stats: &mut PassStats) -> bool {
    let mut changed = false;
    for block in post_order(module, f) {
        for inst in module.block_insts(block).to_vec().into_iter().rev() {
            if is_removable(module, inst) {
                module.erase_inst(inst);
                stats.instructions_eliminated += 1;
                changed = true;
            }
        }
    }
    changed
}

//! Operators on literals become literals

use super::Pass;
use crate::ir::eval::{eval_binary, eval_unary};
use crate::ir::{FunctionId, InstKind, Literal, Module, Value};
use crate::stats::PassStats;

/// Constant folding pass
#[derive(Debug, Default, Clone, Copy)]
pub struct FoldConstants;

impl Pass for FoldConstants {
    fn name(&self) -> &'static str {
        "FoldConstants"
    }

    fn run(&mut self, module: &mut Module, stats: &mut PassStats) -> bool {
        let mut changed = false;
        for f in module.functions() {
            while fold_function(module, f, stats) {
                changed = true;
            }
        }
        changed
    }
}

fn fold(module: &Module, kind: InstKind, operands: &[Value]) -> Option<Literal> {
    match (kind, operands) {
        (InstKind::UnaryOperator(op), [v]) => eval_unary(op, module.as_literal(*v)?),
        (InstKind::BinaryOperator(op), [l, r]) => {
            eval_binary(op, module.as_literal(*l)?, module.as_literal(*r)?)
        }
        _ => None,
    }
}

fn fold_function(module: &mut Module, f: FunctionId, stats: &mut PassStats) -> bool {
    let mut changed = false;
    for inst in module.function_insts(f) {
        let i = module.inst(inst);
        let Some(result) = fold(module, i.kind, i.operands()) else {
            continue;
        };
        let result = module.literal(result);
        module.replace_all_uses(Value::Inst(inst), result);
        module.erase_inst(inst);
        stats.instructions_folded += 1;
        changed = true;
    }
    changed
}

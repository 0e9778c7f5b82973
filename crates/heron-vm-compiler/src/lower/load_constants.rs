//! Literal materialization
//!
//! Bytecode instructions read registers, so every literal operand that has no
//! immediate encoding gets an explicit load. The load goes right before its
//! user to keep the live range short. Phi entries are loaded at the end of
//! the incoming block, before its terminator.

use crate::ir::builder::IRBuilder;
use crate::ir::{FunctionId, InstId, InstKind, Literal, Module, Value};
use crate::opt::Pass;
use crate::stats::PassStats;

/// Must operand `index` of `inst` stay an inline literal.
///
/// This is a pure function of the instruction kind, the operand position
/// and the literal itself.
pub fn operand_must_be_literal(module: &Module, inst: InstId, index: usize) -> bool {
    let i = module.inst(inst);
    let literal = i.operands().get(index).and_then(|v| module.as_literal(*v));
    let is_string = matches!(literal, Some(Literal::String(_)));
    let is_index = literal.and_then(|l| l.as_array_index()).is_some();

    match i.kind {
        InstKind::LoadConst
        | InstKind::AllocStack
        | InstKind::AllocObject
        | InstKind::AllocObjectLiteral
        | InstKind::AllocArray
        | InstKind::CreateRegExp => true,
        // Case values.
        InstKind::Switch => index >= 2,
        InstKind::LoadProperty => index == 1 && (is_string || is_index),
        InstKind::StoreProperty => index == 2 && is_string,
        InstKind::DefineOwnProperty => match index {
            2 => {
                let enumerable = i
                    .operands()
                    .get(3)
                    .and_then(|v| module.as_literal(*v))
                    .and_then(|l| l.as_bool())
                    .unwrap_or(false);
                enumerable && (is_string || is_index)
            }
            3 => true,
            _ => false,
        },
        InstKind::TryLoadGlobalProperty => index == 1,
        InstKind::CreateScope => index == 1 && matches!(literal, Some(Literal::Empty)),
        InstKind::ResolveScope => index == 2,
        InstKind::DirectEval => index == 1,
        _ => false,
    }
}

/// Literal materialization pass
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadConstants;

impl Pass for LoadConstants {
    fn name(&self) -> &'static str {
        "LoadConstants"
    }

    fn run(&mut self, module: &mut Module, stats: &mut PassStats) -> bool {
        let mut changed = false;
        for f in module.functions() {
            changed |= load_constants(module, f, stats);
        }
        changed
    }
}

/// Load `literal` right before `before`
fn create_load(module: &mut Module, literal: Value, before: InstId) -> InstId {
    let is_global = matches!(module.as_literal(literal), Some(Literal::GlobalObject));
    let location = module.inst(before).location;
    let mut b = IRBuilder::new(module);
    b.set_insertion_point(before);
    b.set_location(location);
    if is_global {
        b.create_get_global_object()
    } else {
        b.create_load_const(literal)
    }
}

fn load_constants(module: &mut Module, f: FunctionId, stats: &mut PassStats) -> bool {
    let mut changed = false;
    for inst in module.function_insts(f) {
        if module.inst(inst).kind == InstKind::Phi {
            for (index, (value, pred)) in module.phi_entries(inst).into_iter().enumerate() {
                if value.as_literal().is_none() {
                    continue;
                }
                let Some(term) = module.terminator(pred) else {
                    unreachable!("phi predecessor %BB{} has no terminator", pred.0);
                };
                let load = create_load(module, value, term);
                module.set_operand(inst, 2 * index, Value::Inst(load));
                stats.literals_materialized += 1;
                changed = true;
            }
            continue;
        }

        for index in 0..module.inst(inst).num_operands() {
            let value = module.inst(inst).operand(index);
            if value.as_literal().is_none() || operand_must_be_literal(module, inst, index) {
                continue;
            }
            let load = create_load(module, value, inst);
            module.set_operand(inst, index, Value::Inst(load));
            stats.literals_materialized += 1;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DefinitionKind;

    #[test]
    fn test_policy_table() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        let obj = b.create_alloc_object(0);
        let name = b.string("x");
        let two = b.number(2.0);
        let half = b.number(0.5);
        let by_name = b.create_load_property(Value::Inst(obj), name);
        let by_index = b.create_load_property(Value::Inst(obj), two);
        let by_val = b.create_load_property(Value::Inst(obj), half);
        let store = b.create_store_property(two, Value::Inst(obj), name);
        let hidden = b.create_define_own_property(two, Value::Inst(obj), name, false);
        let scope = b.module().add_scope(f, None);
        let env = b.create_scope(scope, None);
        b.create_return(Value::Inst(env));

        assert!(operand_must_be_literal(&m, obj, 0));
        assert!(operand_must_be_literal(&m, by_name, 1));
        assert!(operand_must_be_literal(&m, by_index, 1));
        assert!(!operand_must_be_literal(&m, by_val, 1));
        assert!(operand_must_be_literal(&m, store, 2));
        assert!(!operand_must_be_literal(&m, store, 0));
        assert!(!operand_must_be_literal(&m, hidden, 2));
        assert!(operand_must_be_literal(&m, hidden, 3));
        assert!(operand_must_be_literal(&m, env, 1));
    }

    #[test]
    fn test_phi_literal_loaded_in_predecessor() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let p = m.add_param(f, "p");
        let mut b = IRBuilder::new(&mut m);
        let [entry, left, right, join] = [(); 4].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        let cond = b.create_load_param(p);
        b.create_cond_branch(Value::Inst(cond), left, right);
        b.set_insertion_block(left);
        b.create_branch(join);
        b.set_insertion_block(right);
        b.create_branch(join);
        b.set_insertion_block(join);
        let one = b.number(1.0);
        let g = b.module().global_object();
        let phi = b.create_phi(&[(one, left), (g, right)]);
        b.create_return(Value::Inst(phi));

        let mut stats = PassStats::default();
        assert!(LoadConstants.run(&mut m, &mut stats));
        let left_insts = m.block_insts(left);
        assert_eq!(left_insts.len(), 2);
        assert_eq!(m.inst(left_insts[0]).kind, InstKind::LoadConst);
        assert_eq!(m.inst(m.block_insts(right)[0]).kind, InstKind::GetGlobalObject);
        assert_eq!(
            m.phi_entries(phi),
            vec![
                (Value::Inst(left_insts[0]), left),
                (Value::Inst(m.block_insts(right)[0]), right)
            ]
        );
        assert!(!LoadConstants.run(&mut m, &mut stats));
    }

    #[test]
    fn test_return_literal_loaded_before_use() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        let s = b.string("hi");
        b.create_return(s);

        let mut stats = PassStats::default();
        assert!(LoadConstants.run(&mut m, &mut stats));
        let insts = m.block_insts(entry);
        assert_eq!(m.inst(insts[0]).kind, InstKind::LoadConst);
        assert_eq!(m.inst(insts[1]).operand(0), Value::Inst(insts[0]));
        assert_eq!(stats.literals_materialized, 1);
    }
}

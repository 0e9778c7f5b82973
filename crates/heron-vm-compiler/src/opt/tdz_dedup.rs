//! Redundant TDZ check removal
//!
//! The dominator tree is walked depth first with a scoped table mapping each
//! TDZ storage location (a frame variable, a stack slot or a plain value) to
//! whether it is known to be initialized. Facts learned in a block are visible
//! to the blocks it dominates and forgotten when the walk leaves the subtree.

use rustc_hash::FxHashSet;

use super::Pass;
use crate::analysis::DominanceInfo;
use crate::ir::builder::IRBuilder;
use crate::ir::{BlockId, FunctionId, InstId, InstKind, Module, Value};
use crate::scoped_table::ScopedTable;
use crate::stats::PassStats;

/// TDZ check deduplication pass
#[derive(Debug, Default, Clone, Copy)]
pub struct TDZDedup;

impl Pass for TDZDedup {
    fn name(&self) -> &'static str {
        "TDZDedup"
    }

    fn run(&mut self, module: &mut Module, stats: &mut PassStats) -> bool {
        let mut changed = false;
        for f in module.functions() {
            changed |= dedup_function(module, f, stats);
        }
        changed
    }
}

/// Storage a checked value was loaded from
fn checked_storage(module: &Module, checked: Value) -> Value {
    let Some(inst) = checked.as_inst() else {
        return checked;
    };
    let inst = module.inst(inst);
    match inst.kind {
        InstKind::LoadFrame => inst.operand(1),
        InstKind::LoadStack => inst.operand(0),
        _ => checked,
    }
}

/// Storage locations some check reads from
fn tdz_state(module: &Module, f: FunctionId) -> FxHashSet<Value> {
    let mut state = FxHashSet::default();
    for inst in module.function_insts(f) {
        let i = module.inst(inst);
        if i.kind != InstKind::ThrowIfEmpty {
            continue;
        }
        let checked = i.operand(0);
        let storage = checked_storage(module, checked);
        if storage != checked {
            state.insert(storage);
        }
    }
    state
}

enum Walk {
    Enter(BlockId),
    Leave,
}

fn dedup_function(module: &mut Module, f: FunctionId, stats: &mut PassStats) -> bool {
    let dom = DominanceInfo::compute(module, f);
    let Some(root) = dom.root() else {
        return false;
    };
    let state = tdz_state(module, f);
    let mut available: ScopedTable<Value, bool> = ScopedTable::new();
    let mut changed = false;

    let mut stack = vec![Walk::Enter(root)];
    while let Some(step) = stack.pop() {
        match step {
            Walk::Enter(block) => {
                available.push_scope();
                changed |= process_block(module, block, &state, &mut available, stats);
                stack.push(Walk::Leave);
                for child in dom.children(block).iter().rev() {
                    stack.push(Walk::Enter(*child));
                }
            }
            Walk::Leave => available.pop_scope(),
        }
    }
    changed
}

fn process_block(
    module: &mut Module,
    block: BlockId,
    state: &FxHashSet<Value>,
    available: &mut ScopedTable<Value, bool>,
    stats: &mut PassStats,
) -> bool {
    let mut doomed: Vec<InstId> = Vec::new();

    for inst in module.block_insts(block).to_vec() {
        let i = module.inst(inst);
        let (storage, is_check) = match i.kind {
            InstKind::ThrowIfEmpty => (checked_storage(module, i.operand(0)), true),
            InstKind::StoreFrame | InstKind::StoreStack => {
                let (value, storage) = if i.kind == InstKind::StoreFrame {
                    (i.operand(1), i.operand(2))
                } else {
                    (i.operand(0), i.operand(1))
                };
                if !state.contains(&storage) {
                    continue;
                }
                if module.value_type(value).can_be_empty() {
                    available.insert(storage, false);
                    continue;
                }
                (storage, false)
            }
            _ => continue,
        };

        if !available.lookup(&storage).copied().unwrap_or(false) {
            available.insert(storage, true);
            continue;
        }
        if !is_check {
            continue;
        }

        doomed.push(inst);
        stats.tdz_checks_removed += 1;
        let checked = module.inst(inst).operand(0);
        if module.has_users(Value::Inst(inst)) {
            let (ty, location) = (module.inst(inst).ty, module.inst(inst).location);
            let mut b = IRBuilder::new(module);
            b.set_insertion_point(inst);
            b.set_location(location);
            let cast = b.create_union_narrow_trusted(checked, ty);
            module.replace_all_uses(Value::Inst(inst), Value::Inst(cast));
        } else if let Some(load) = checked.as_inst()
            && matches!(
                module.inst(load).kind,
                InstKind::LoadFrame | InstKind::LoadStack
            )
            && module.num_users(checked) == 1
        {
            doomed.push(load);
        }
    }

    let changed = !doomed.is_empty();
    for inst in doomed {
        module.erase_inst(inst);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DefinitionKind, Type};

    #[test]
    fn test_second_check_removed() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let scope = m.add_scope(f, None);
        let x = m.add_variable(scope, "x", true);
        let mut b = IRBuilder::new(&mut m);
        let [entry, next] = [(); 2].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        let env = b.create_scope(scope, None);
        let l1 = b.create_load_frame(Value::Inst(env), x);
        let c1 = b.create_throw_if_empty(Value::Inst(l1));
        b.create_branch(next);
        b.set_insertion_block(next);
        let l2 = b.create_load_frame(Value::Inst(env), x);
        let c2 = b.create_throw_if_empty(Value::Inst(l2));
        let l3 = b.create_load_frame(Value::Inst(env), x);
        b.create_throw_if_empty(Value::Inst(l3));
        b.create_return(Value::Inst(c1));
        let _ = c2;

        let mut stats = PassStats::default();
        assert!(TDZDedup.run(&mut m, &mut stats));
        assert_eq!(stats.tdz_checks_removed, 2);
        // Unused checks take their loads with them.
        assert_eq!(m.block_insts(next).len(), 1);
        assert!(!TDZDedup.run(&mut m, &mut stats));
    }

    #[test]
    fn test_used_check_becomes_narrowing() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let scope = m.add_scope(f, None);
        let x = m.add_variable(scope, "x", true);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        let env = b.create_scope(scope, None);
        let one = b.number(1.0);
        b.create_store_frame(Value::Inst(env), one, x);
        let load = b.create_load_frame(Value::Inst(env), x);
        let check = b.create_throw_if_empty(Value::Inst(load));
        b.create_return(Value::Inst(check));

        let mut stats = PassStats::default();
        assert!(TDZDedup.run(&mut m, &mut stats));
        let ret = m.terminator(entry).unwrap();
        let cast = m.inst(ret).operand(0).as_inst().unwrap();
        assert_eq!(m.inst(cast).kind, InstKind::UnionNarrowTrusted);
        assert!(!m.inst(cast).ty.contains(Type::EMPTY));
    }

    #[test]
    fn test_facts_do_not_leak_to_siblings() {
        // entry -> a | b, the check in a proves nothing for b.
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let scope = m.add_scope(f, None);
        let x = m.add_variable(scope, "x", true);
        let mut bld = IRBuilder::new(&mut m);
        let [entry, a, b] = [(); 3].map(|_| bld.create_block(f));
        bld.set_insertion_block(entry);
        let env = bld.create_scope(scope, None);
        let c = bld.boolean(true);
        bld.create_cond_branch(c, a, b);
        for block in [a, b] {
            bld.set_insertion_block(block);
            let l = bld.create_load_frame(Value::Inst(env), x);
            let check = bld.create_throw_if_empty(Value::Inst(l));
            bld.create_return(Value::Inst(check));
        }

        let mut stats = PassStats::default();
        assert!(!TDZDedup.run(&mut m, &mut stats));
        assert_eq!(stats.tdz_checks_removed, 0);
    }

    #[test]
    fn test_empty_store_resets_state() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let scope = m.add_scope(f, None);
        let x = m.add_variable(scope, "x", true);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        let env = b.create_scope(scope, None);
        let l1 = b.create_load_frame(Value::Inst(env), x);
        b.create_throw_if_empty(Value::Inst(l1));
        let empty = b.empty();
        b.create_store_frame(Value::Inst(env), empty, x);
        let l2 = b.create_load_frame(Value::Inst(env), x);
        let check = b.create_throw_if_empty(Value::Inst(l2));
        b.create_return(Value::Inst(check));

        let mut stats = PassStats::default();
        assert!(!TDZDedup.run(&mut m, &mut stats));
    }
}

//! Stack promotion of frame variables
//!
//! Scope instances are heap environments. A variable that no closure can
//! observe does not need one, and reads through the instance that created it
//! can come from a stack slot instead.
//!
//! Variables reachable from a direct eval are left alone: the evaluated code
//! reads and writes them by name.

use rustc_hash::{FxHashMap, FxHashSet};

use super::Pass;
use crate::ir::builder::IRBuilder;
use crate::ir::{InstId, InstKind, Module, ScopeId, Value, VariableId};
use crate::stats::PassStats;

/// Stack promotion pass
#[derive(Debug, Default, Clone, Copy)]
pub struct StackPromotion;

impl Pass for StackPromotion {
    fn name(&self) -> &'static str {
        "StackPromotion"
    }

    fn run(&mut self, module: &mut Module, stats: &mut PassStats) -> bool {
        let pinned = eval_visible_scopes(module);
        let mut changed = false;

        for index in 0..module.num_scopes() {
            let scope = ScopeId(index as u32);
            if pinned.contains(&scope) {
                continue;
            }
            for user in module.users(Value::Scope(scope)) {
                if module.is_inst_alive(user)
                    && module.inst(user).kind == InstKind::CreateScope
                    && promote_scope_instance(module, user)
                {
                    stats.scopes_promoted += 1;
                    changed = true;
                }
            }
            for var in module.scope(scope).variables().to_vec() {
                changed |= run_on_variable(module, var, stats);
            }
        }

        changed |= delete_unused_variables(module, &pinned);
        changed
    }
}

/// Scopes on the chain of any function containing a direct eval
fn eval_visible_scopes(module: &Module) -> FxHashSet<ScopeId> {
    let mut pinned = FxHashSet::default();
    for f in module.functions() {
        if !module.uses_direct_eval(f) {
            continue;
        }
        let created = module.function_insts(f).into_iter().filter_map(|i| {
            let inst = module.inst(i);
            match (inst.kind, inst.operand(0)) {
                (InstKind::CreateScope, Value::Scope(s)) => Some(s),
                _ => None,
            }
        });
        for start in created.chain(module.function(f).parent_scope) {
            let mut current = Some(start);
            while let Some(s) = current {
                if !pinned.insert(s) {
                    break;
                }
                current = module.scope(s).parent;
            }
        }
    }
    pinned
}

fn frame_variable(module: &Module, access: InstId) -> VariableId {
    let inst = module.inst(access);
    let operand = match inst.kind {
        InstKind::LoadFrame => inst.operand(1),
        InstKind::StoreFrame => inst.operand(2),
        other => unreachable!("{} is not a frame access", other.name()),
    };
    match operand {
        Value::Variable(v) => v,
        other => unreachable!("frame access names {:?}", other),
    }
}

/// Promote every variable of a scope instance only used to access its own
/// variables, then delete the instance.
fn promote_scope_instance(module: &mut Module, create: InstId) -> bool {
    let users = module.users(Value::Inst(create));
    for &user in &users {
        let inst = module.inst(user);
        match inst.kind {
            InstKind::LoadFrame => {}
            InstKind::StoreFrame if inst.operand(1) != Value::Inst(create) => {}
            _ => return false,
        }
    }

    let mut allocs: FxHashMap<VariableId, InstId> = FxHashMap::default();
    for user in users {
        let var = frame_variable(module, user);
        let alloc = match allocs.get(&var) {
            Some(a) => *a,
            None => {
                let name = module.variable(var).name.clone();
                let mut b = IRBuilder::new(module);
                b.set_insertion_point(create);
                let a = b.create_alloc_stack(&name);
                allocs.insert(var, a);
                a
            }
        };
        let (kind, location) = (module.inst(user).kind, module.inst(user).location);
        let stored = module.inst(user).operand(1);
        let mut b = IRBuilder::new(module);
        b.set_insertion_point(user);
        b.set_location(location);
        if kind == InstKind::LoadFrame {
            let load = b.create_load_stack(alloc);
            module.replace_all_uses(Value::Inst(user), Value::Inst(load));
        } else {
            b.create_store_stack(stored, alloc);
        }
        module.erase_inst(user);
    }
    module.erase_inst(create);
    true
}

fn run_on_variable(module: &mut Module, var: VariableId, stats: &mut PassStats) -> bool {
    if !module.is_variable_alive(var) {
        return false;
    }
    if try_promote_const_variable(module, var) {
        stats.consts_promoted += 1;
        return true;
    }
    let mut changed = false;
    if try_copy_to_stack(module, var) {
        stats.vars_copied_to_stack += 1;
        changed = true;
    }
    if try_delete_store_only_variable(module, var) {
        stats.store_only_vars_deleted += 1;
        changed = true;
    }
    changed
}

/// The value of the only store to `var`, if every access is a plain load or
/// that one store
fn store_once_value(module: &Module, var: VariableId) -> Option<Value> {
    let mut stored = None;
    for user in module.users(Value::Variable(var)) {
        let inst = module.inst(user);
        match inst.kind {
            InstKind::LoadFrame => {}
            InstKind::StoreFrame => {
                if stored.is_some() {
                    return None;
                }
                stored = Some(inst.operand(1));
            }
            _ => return None,
        }
    }
    stored
}

/// A variable stored once with a literal is that literal
fn try_promote_const_variable(module: &mut Module, var: VariableId) -> bool {
    let Some(stored) = store_once_value(module, var) else {
        return false;
    };
    if module.as_literal(stored).is_none() {
        return false;
    }
    tracing::trace!(variable = %module.variable(var).name, "promoting constant variable");
    for user in module.users(Value::Variable(var)) {
        if module.inst(user).kind == InstKind::LoadFrame {
            module.replace_all_uses(Value::Inst(user), stored);
        }
        module.erase_inst(user);
    }
    true
}

/// Shadow the variable in a stack slot per creating instance. Loads through
/// the instance read the slot; stores write both.
fn try_copy_to_stack(module: &mut Module, var: VariableId) -> bool {
    let users = module.users(Value::Variable(var));
    let is_create = |module: &Module, v: Value| {
        v.as_inst()
            .is_some_and(|i| module.inst(i).kind == InstKind::CreateScope)
    };

    // Stores through a resolved scope come from inner functions, possibly
    // recursive ones, which must all see the same frame slot.
    for &user in &users {
        let inst = module.inst(user);
        if inst.kind == InstKind::StoreFrame && !is_create(module, inst.operand(0)) {
            return false;
        }
    }

    let name = module.variable(var).name.clone();
    let mut allocs: FxHashMap<InstId, InstId> = FxHashMap::default();
    for &user in &users {
        let inst = module.inst(user);
        if inst.kind != InstKind::LoadFrame || !is_create(module, inst.operand(0)) {
            continue;
        }
        let Value::Inst(create) = inst.operand(0) else {
            continue;
        };
        let alloc = match allocs.get(&create) {
            Some(a) => *a,
            None => {
                let mut b = IRBuilder::new(module);
                b.set_insertion_point(create);
                let a = b.create_alloc_stack(&name);
                allocs.insert(create, a);
                a
            }
        };
        let mut b = IRBuilder::new(module);
        b.set_insertion_point(user);
        let load = b.create_load_stack(alloc);
        module.replace_all_uses(Value::Inst(user), Value::Inst(load));
        module.erase_inst(user);
    }
    if allocs.is_empty() {
        return false;
    }

    for user in module.users(Value::Variable(var)) {
        let inst = module.inst(user);
        if inst.kind != InstKind::StoreFrame {
            continue;
        }
        let value = inst.operand(1);
        let Some(alloc) = inst.operand(0).as_inst().and_then(|c| allocs.get(&c)).copied() else {
            continue;
        };
        let mut b = IRBuilder::new(module);
        b.set_insertion_point(user);
        b.create_store_stack(value, alloc);
    }
    tracing::trace!(variable = %name, "copied variable to the stack");
    true
}

/// Delete the stores of a variable nobody reads
fn try_delete_store_only_variable(module: &mut Module, var: VariableId) -> bool {
    let users = module.users(Value::Variable(var));
    if users.is_empty()
        || users
            .iter()
            .any(|u| module.inst(*u).kind != InstKind::StoreFrame)
    {
        return false;
    }
    for user in users {
        module.erase_inst(user);
    }
    true
}

fn delete_unused_variables(module: &mut Module, pinned: &FxHashSet<ScopeId>) -> bool {
    let mut changed = false;
    for index in 0..module.num_scopes() {
        let scope = ScopeId(index as u32);
        if pinned.contains(&scope) {
            continue;
        }
        for var in module.scope(scope).variables().to_vec() {
            if !module.has_users(Value::Variable(var)) {
                module.erase_variable(var);
                changed = true;
            }
        }
    }
    changed
}

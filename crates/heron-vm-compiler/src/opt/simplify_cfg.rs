//! CFG simplification
//!
//! Static branch folding and unreachable block deletion are interleaved until
//! neither changes anything, since each exposes work for the other.

use super::Pass;
use crate::analysis::{fixup_catch_targets, reachable_blocks};
use crate::ir::eval::literal_strict_equality;
use crate::ir::{
    BlockId, FunctionAttributes, FunctionId, InstId, InstKind, Module, Type, Value,
};
use crate::stats::PassStats;

/// CFG simplification pass
#[derive(Debug, Default, Clone, Copy)]
pub struct SimplifyCFG;

impl Pass for SimplifyCFG {
    fn name(&self) -> &'static str {
        "SimplifyCFG"
    }

    fn run(&mut self, module: &mut Module, stats: &mut PassStats) -> bool {
        let mut changed = false;
        for f in module.functions() {
            changed |= simplify_function(module, f, stats);
        }
        changed |= delete_unused_functions(module, stats);
        changed
    }
}

/// Simplify one function
pub fn simplify_function(module: &mut Module, f: FunctionId, stats: &mut PassStats) -> bool {
    let mut changed = false;
    if module
        .function(f)
        .attributes
        .contains(FunctionAttributes::UNREACHABLE)
    {
        changed |= replace_body_with_unreachable(module, f);
    }
    changed |= terminate_no_return_calls(module, f);

    loop {
        let mut iter_changed = optimize_static_branches(module, f, stats);
        iter_changed |= delete_unreachable_blocks(module, f, stats);
        if !iter_changed {
            break;
        }
        changed = true;
    }

    changed |= fixup_catch_targets(module, f);
    changed
}

fn replace_terminator(module: &mut Module, block: BlockId, kind: InstKind, operands: Vec<Value>) {
    let old = module
        .terminator(block)
        .unwrap_or_else(|| panic!("%BB{} has no terminator", block.0));
    let location = module.inst(old).location;
    module.erase_inst(old);
    let new = module.create_inst(kind, operands, Type::empty());
    module.inst_mut(new).location = location;
    module.insert_at_end(block, new);
}

fn remove_phi_entries(module: &mut Module, succ: BlockId, pred: BlockId) {
    for phi in module.phis(succ) {
        module.phi_remove_entries_from(phi, pred);
    }
}

/// Leave a single block holding `Unreachable`
fn replace_body_with_unreachable(module: &mut Module, f: FunctionId) -> bool {
    let blocks = module.function(f).blocks().to_vec();
    if let [only] = blocks.as_slice()
        && let [inst] = module.block_insts(*only)
        && module.inst(*inst).kind == InstKind::Unreachable
    {
        return false;
    }
    module.erase_blocks(&blocks);
    let block = module.add_block(f);
    let inst = module.create_inst(InstKind::Unreachable, vec![], Type::empty());
    module.insert_at_end(block, inst);
    true
}

fn callee_function(module: &Module, call: InstId) -> Option<FunctionId> {
    let callee = module.inst(call).operand(0).as_inst()?;
    let closure = module.inst(callee);
    match (closure.kind, closure.operand(0)) {
        (InstKind::CreateFunction, Value::Function(f)) => Some(f),
        _ => None,
    }
}

/// Follow calls to functions that never return with `Unreachable`
fn terminate_no_return_calls(module: &mut Module, f: FunctionId) -> bool {
    let mut changed = false;
    for inst in module.function_insts(f) {
        if !module.is_inst_alive(inst)
            || !matches!(module.inst(inst).kind, InstKind::Call | InstKind::Construct)
        {
            continue;
        }
        let Some(callee) = callee_function(module, inst) else {
            continue;
        };
        if !module
            .function(callee)
            .attributes
            .contains(FunctionAttributes::NO_RETURN)
        {
            continue;
        }
        let block = module.parent_block(inst);
        let Some(next) = module
            .block_insts(block)
            .iter()
            .skip_while(|i| **i != inst)
            .nth(1)
            .copied()
        else {
            continue;
        };
        if module.inst(next).kind == InstKind::Unreachable {
            continue;
        }
        // The tail becomes an unreachable block, deleted below.
        module.split_block(next);
        replace_terminator(module, block, InstKind::Unreachable, vec![]);
        changed = true;
    }
    changed
}

/// Is `block` only a branch somewhere else
fn is_trampoline(module: &Module, block: BlockId) -> Option<BlockId> {
    match module.block_insts(block) {
        [only] if module.inst(*only).kind == InstKind::Branch => {
            module.inst(*only).operand(0).as_block()
        }
        _ => None,
    }
}

/// Does following trampolines from `dest` lead back to `block`
fn in_trampoline_cycle(module: &Module, block: BlockId, dest: BlockId) -> bool {
    let mut current = dest;
    for _ in 0..module.function(module.block(block).parent()).blocks().len() {
        if current == block {
            return true;
        }
        match is_trampoline(module, current) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

/// Rewrite the phis of `block`'s destination so `block` can be bypassed.
///
/// Fails when a predecessor of `block` already reaches the destination with a
/// different value, or when `block` is the target of a non-branch.
fn attempt_branch_removal_from_phis(module: &mut Module, block: BlockId, dest: BlockId) -> bool {
    for user in module.users(Value::Block(block)) {
        if !matches!(
            module.inst(user).kind,
            InstKind::Branch | InstKind::CondBranch | InstKind::Switch | InstKind::Phi
        ) {
            return false;
        }
    }

    let preds = module.predecessors(block);
    let phis = module.phis(dest);
    for &phi in &phis {
        let Some(value) = module.phi_incoming(phi, block) else {
            unreachable!("phi %{} has no entry for predecessor %BB{}", phi.0, block.0);
        };
        for &pred in &preds {
            if let Some(existing) = module.phi_incoming(phi, pred)
                && existing != value
            {
                return false;
            }
        }
    }

    for &phi in &phis {
        let Some(value) = module.phi_incoming(phi, block) else {
            unreachable!("phi %{} lost its entry for %BB{}", phi.0, block.0);
        };
        module.phi_remove_entries_from(phi, block);
        for &pred in &preds {
            if module.phi_incoming(phi, pred).is_none() {
                module.phi_add_entry(phi, value, pred);
            }
        }
    }
    true
}

fn optimize_static_branches(module: &mut Module, f: FunctionId, stats: &mut PassStats) -> bool {
    let mut changed = false;
    let entry = module.function(f).entry();

    for block in module.function(f).blocks().to_vec() {
        if !module.is_block_alive(block) {
            continue;
        }
        let Some(term) = module.terminator(block) else {
            continue;
        };
        let kind = module.inst(term).kind;
        let operands = module.inst(term).operands().to_vec();

        match kind {
            InstKind::Switch => {
                let Some(input) = module.as_literal(operands[0]).cloned() else {
                    continue;
                };
                let mut dest = operands[1].as_block();
                for pair in operands[2..].chunks_exact(2) {
                    let matched = module
                        .as_literal(pair[0])
                        .and_then(|case| literal_strict_equality(&input, case));
                    if matched == Some(true) {
                        dest = pair[1].as_block();
                        break;
                    }
                }
                let Some(dest) = dest else {
                    unreachable!("switch destination is not a block");
                };
                for succ in module.successors(block) {
                    if succ != dest {
                        remove_phi_entries(module, succ, block);
                    }
                }
                replace_terminator(module, block, InstKind::Branch, vec![Value::Block(dest)]);
                stats.switches_folded += 1;
                stats.static_branches_simplified += 1;
                changed = true;
            }
            InstKind::CondBranch => {
                let (t, e) = (operands[1], operands[2]);
                let dest = if t == e {
                    Some(t)
                } else {
                    match module.as_literal(operands[0]).and_then(|l| l.as_bool()) {
                        Some(true) => {
                            if let Some(b) = e.as_block() {
                                remove_phi_entries(module, b, block);
                            }
                            Some(t)
                        }
                        Some(false) => {
                            if let Some(b) = t.as_block() {
                                remove_phi_entries(module, b, block);
                            }
                            Some(e)
                        }
                        None => None,
                    }
                };
                if let Some(dest) = dest {
                    replace_terminator(module, block, InstKind::Branch, vec![dest]);
                    stats.static_branches_simplified += 1;
                    changed = true;
                }
            }
            InstKind::Branch => {
                let Some(dest) = operands[0].as_block() else {
                    continue;
                };
                if dest == block {
                    continue;
                }

                if Some(block) != entry
                    && module.block_insts(block).len() == 1
                    && !module.predecessors(block).is_empty()
                    && !in_trampoline_cycle(module, block, dest)
                    && attempt_branch_removal_from_phis(module, block, dest)
                {
                    module.replace_all_uses(Value::Block(block), Value::Block(dest));
                    stats.trampolines_removed += 1;
                    changed = true;
                    continue;
                }

                if Some(dest) == entry
                    || module.is_catch_block(dest)
                    || module.predecessors(dest) != [block]
                {
                    continue;
                }

                // Slurp the single-predecessor destination.
                for phi in module.phis(dest) {
                    let Some(value) = module.phi_incoming(phi, block) else {
                        unreachable!("phi %{} has no entry for %BB{}", phi.0, block.0);
                    };
                    module.replace_all_uses(Value::Inst(phi), value);
                    module.erase_inst(phi);
                }
                module.erase_inst(term);
                for inst in module.block_insts(dest).to_vec() {
                    module.move_to_end(inst, block);
                }
                for succ in module.successors(block) {
                    for phi in module.phis(succ) {
                        let n = module.inst(phi).num_operands();
                        for i in (1..n).step_by(2) {
                            if module.inst(phi).operand(i) == Value::Block(dest) {
                                module.set_operand(phi, i, Value::Block(block));
                            }
                        }
                    }
                }
                module.erase_block(dest);
                stats.blocks_merged += 1;
                changed = true;
                // The block list changed under us.
                break;
            }
            _ => {}
        }
    }
    changed
}

fn delete_unreachable_blocks(module: &mut Module, f: FunctionId, stats: &mut PassStats) -> bool {
    let reachable = reachable_blocks(module, f);
    let dead: Vec<BlockId> = module
        .function(f)
        .blocks()
        .iter()
        .copied()
        .filter(|b| !reachable.contains(b))
        .collect();
    if dead.is_empty() {
        return false;
    }
    stats.unreachable_blocks_deleted += dead.len();
    module.erase_blocks(&dead);
    true
}

/// Delete functions no closure is created for, except the global code
fn delete_unused_functions(module: &mut Module, stats: &mut PassStats) -> bool {
    let mut changed = false;
    loop {
        let top_level = module.top_level();
        let unused: Vec<FunctionId> = module
            .functions()
            .into_iter()
            .filter(|f| Some(*f) != top_level && !module.has_users(Value::Function(*f)))
            .collect();
        if unused.is_empty() {
            return changed;
        }
        for f in unused {
            tracing::trace!(function = %module.function(f).name, "deleting unused function");
            module.erase_function(f);
            stats.functions_deleted += 1;
        }
        changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DefinitionKind;
    use crate::ir::builder::IRBuilder;

    #[test]
    fn test_literal_cond_branch_folds() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let mut b = IRBuilder::new(&mut m);
        let [entry, yes, no] = [(); 3].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        let c = b.boolean(false);
        b.create_cond_branch(c, yes, no);
        b.set_insertion_block(yes);
        let one = b.number(1.0);
        b.create_return(one);
        b.set_insertion_block(no);
        let two = b.number(2.0);
        b.create_return(two);

        let mut stats = PassStats::default();
        assert!(SimplifyCFG.run(&mut m, &mut stats));
        // The surviving block was slurped into the entry.
        assert_eq!(m.function(f).blocks(), &[entry]);
        let ret = m.terminator(entry).unwrap();
        assert_eq!(m.inst(ret).operand(0), two);
        assert_eq!(stats.static_branches_simplified, 1);
        assert!(!SimplifyCFG.run(&mut m, &mut stats));
    }

    #[test]
    fn test_no_return_call_terminates_block() {
        let mut m = Module::new();
        let main = m.add_function("main", DefinitionKind::TopLevel, false);
        let fail = m.add_function("fail", DefinitionKind::Normal, false);
        m.function_mut(fail).attributes |= FunctionAttributes::NO_RETURN;
        let scope = m.add_scope(main, None);
        let mut b = IRBuilder::new(&mut m);
        let fb = b.create_block(fail);
        b.set_insertion_block(fb);
        let u = b.undefined();
        b.create_throw(u, None);

        let entry = b.create_block(main);
        b.set_insertion_block(entry);
        let env = b.create_scope(scope, None);
        let closure = b.create_function_closure(fail, Value::Inst(env));
        b.create_call(Value::Inst(closure), u, &[]);
        let one = b.number(1.0);
        b.create_return(one);

        let mut stats = PassStats::default();
        assert!(SimplifyCFG.run(&mut m, &mut stats));
        let term = m.terminator(entry).unwrap();
        assert_eq!(m.inst(term).kind, InstKind::Unreachable);
        assert_eq!(m.function(main).blocks().len(), 1);
        assert!(!SimplifyCFG.run(&mut m, &mut stats));
    }

    #[test]
    fn test_unreachable_function_body_replaced() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        m.function_mut(f).attributes |= FunctionAttributes::UNREACHABLE;
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        let g = b.create_get_global_object();
        b.create_return(Value::Inst(g));

        let mut stats = PassStats::default();
        assert!(SimplifyCFG.run(&mut m, &mut stats));
        let blocks = m.function(f).blocks().to_vec();
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            m.inst(m.block_insts(blocks[0])[0]).kind,
            InstKind::Unreachable
        );
        assert!(!SimplifyCFG.run(&mut m, &mut stats));
    }

    #[test]
    fn test_unused_functions_deleted() {
        let mut m = Module::new();
        let main = m.add_function("main", DefinitionKind::TopLevel, false);
        let unused = m.add_function("unused", DefinitionKind::Normal, false);
        for f in [main, unused] {
            let mut b = IRBuilder::new(&mut m);
            let bb = b.create_block(f);
            b.set_insertion_block(bb);
            let u = b.undefined();
            b.create_return(u);
        }
        let mut stats = PassStats::default();
        assert!(SimplifyCFG.run(&mut m, &mut stats));
        assert_eq!(m.functions(), vec![main]);
        assert_eq!(stats.functions_deleted, 1);
    }
}

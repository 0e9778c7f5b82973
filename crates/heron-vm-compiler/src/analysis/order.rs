//! Block orderings

use rustc_hash::FxHashSet;

use crate::ir::{BlockId, FunctionId, Module};

/// Blocks reachable from the entry in post order. Successors are visited in
/// terminator operand order.
pub fn post_order(module: &Module, f: FunctionId) -> Vec<BlockId> {
    let mut order = Vec::new();
    let Some(entry) = module.function(f).entry() else {
        return order;
    };
    let mut visited = FxHashSet::default();
    let mut stack: Vec<(BlockId, Vec<BlockId>, usize)> = Vec::new();
    visited.insert(entry);
    stack.push((entry, module.successors(entry), 0));

    while let Some((block, succs, next)) = stack.last_mut() {
        if let Some(&succ) = succs.get(*next) {
            *next += 1;
            if visited.insert(succ) {
                let succ_succs = module.successors(succ);
                stack.push((succ, succ_succs, 0));
            }
        } else {
            order.push(*block);
            stack.pop();
        }
    }
    order
}

/// Reverse post order, entry first
pub fn reverse_post_order(module: &Module, f: FunctionId) -> Vec<BlockId> {
    let mut order = post_order(module, f);
    order.reverse();
    order
}

/// Blocks reachable from the entry
pub fn reachable_blocks(module: &Module, f: FunctionId) -> FxHashSet<BlockId> {
    post_order(module, f).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DefinitionKind;
    use crate::ir::builder::IRBuilder;

    #[test]
    fn test_orders_skip_unreachable() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::Normal, false);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        let left = b.create_block(f);
        let right = b.create_block(f);
        let dead = b.create_block(f);
        b.set_insertion_block(entry);
        let c = b.boolean(false);
        b.create_cond_branch(c, left, right);
        b.set_insertion_block(left);
        b.create_branch(right);
        b.set_insertion_block(right);
        let u = b.undefined();
        b.create_return(u);
        b.set_insertion_block(dead);
        b.create_branch(right);

        assert_eq!(post_order(&m, f), vec![right, left, entry]);
        assert_eq!(reverse_post_order(&m, f), vec![entry, left, right]);
        assert!(!reachable_blocks(&m, f).contains(&dead));
    }
}

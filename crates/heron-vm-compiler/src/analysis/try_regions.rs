//! Try region structure

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{BlockId, FunctionId, InstId, InstKind, Module, Value};

/// Try nesting depth of every block
#[derive(Debug, Clone, Default)]
pub struct TryDepths {
    depths: FxHashMap<BlockId, u32>,
    /// Deepest nesting seen
    pub max_depth: u32,
}

impl TryDepths {
    /// Depth of `block`, 0 outside any try region
    pub fn depth(&self, block: BlockId) -> u32 {
        self.depths.get(&block).copied().unwrap_or(0)
    }
}

/// Compute the try depth of every reachable block.
///
/// `TryStart` raises the depth of both its successors; the catch block gives
/// it back because it starts with `Catch`. `TryEnd` lowers it for its
/// destination. Nothing past a `Throw` is explored.
pub fn block_try_depths(module: &Module, f: FunctionId) -> TryDepths {
    let mut result = TryDepths::default();
    let Some(entry) = module.function(f).entry() else {
        return result;
    };
    let mut visited = FxHashSet::default();
    let mut stack = vec![(entry, 0u32)];

    while let Some((block, incoming)) = stack.pop() {
        if !visited.insert(block) {
            continue;
        }
        let depth = if module.is_catch_block(block) {
            incoming.saturating_sub(1)
        } else {
            incoming
        };
        if depth > 0 {
            result.depths.insert(block, depth);
        }
        result.max_depth = result.max_depth.max(depth);

        let Some(term) = module.terminator(block) else {
            continue;
        };
        let next: Vec<(BlockId, u32)> = match module.inst(term).kind {
            InstKind::TryStart => module
                .successors(block)
                .into_iter()
                .map(|s| (s, depth + 1))
                .collect(),
            InstKind::TryEnd => module
                .successors(block)
                .into_iter()
                .map(|s| (s, depth.saturating_sub(1)))
                .collect(),
            InstKind::Throw => Vec::new(),
            _ => module
                .successors(block)
                .into_iter()
                .map(|s| (s, depth))
                .collect(),
        };
        for item in next.into_iter().rev() {
            stack.push(item);
        }
    }
    result
}

/// Innermost open `TryStart` for every reachable block, `None` outside any
/// try region.
pub fn enclosing_trys(module: &Module, f: FunctionId) -> FxHashMap<BlockId, Option<InstId>> {
    let mut result: FxHashMap<BlockId, Option<InstId>> = FxHashMap::default();
    let Some(entry) = module.function(f).entry() else {
        return result;
    };
    let mut stack: Vec<(BlockId, Option<InstId>)> = vec![(entry, None)];

    while let Some((block, enclosing)) = stack.pop() {
        if result.contains_key(&block) {
            continue;
        }
        result.insert(block, enclosing);

        let Some(term) = module.terminator(block) else {
            continue;
        };
        // Try enclosing the try region `enclosing` belongs to.
        let outer = |result: &FxHashMap<BlockId, Option<InstId>>| {
            enclosing.and_then(|t| {
                result
                    .get(&module.parent_block(t))
                    .copied()
                    .flatten()
            })
        };
        let inst = module.inst(term);
        let mut next = Vec::new();
        match inst.kind {
            InstKind::TryStart => {
                if let Value::Block(body) = inst.operand(0) {
                    next.push((body, Some(term)));
                }
                if let Value::Block(catch) = inst.operand(1) {
                    next.push((catch, enclosing));
                }
            }
            InstKind::TryEnd | InstKind::Throw => {
                let outer = outer(&result);
                for succ in module.successors(block) {
                    next.push((succ, outer));
                }
            }
            _ => {
                for succ in module.successors(block) {
                    next.push((succ, enclosing));
                }
            }
        }
        for item in next.into_iter().rev() {
            stack.push(item);
        }
    }
    result
}

/// Catch block of a `TryStart`
pub fn catch_block(module: &Module, try_start: InstId) -> BlockId {
    match module.inst(try_start).operand(1) {
        Value::Block(b) => b,
        other => unreachable!("TryStart catch operand is not a block: {:?}", other),
    }
}

/// Point every `Throw` at the catch block of its innermost enclosing try, or
/// at nothing outside try regions. Returns whether anything changed.
pub fn fixup_catch_targets(module: &mut Module, f: FunctionId) -> bool {
    let trys = enclosing_trys(module, f);
    let mut changed = false;
    for block in module.function(f).blocks().to_vec() {
        let Some(term) = module.terminator(block) else {
            continue;
        };
        if module.inst(term).kind != InstKind::Throw {
            continue;
        }
        let Some(enclosing) = trys.get(&block) else {
            continue;
        };
        let wanted = enclosing.map(|t| catch_block(module, t));
        let current = module.inst(term).operands().get(1).and_then(|v| v.as_block());
        if wanted == current {
            continue;
        }
        match (current, wanted) {
            (Some(_), Some(w)) => module.set_operand(term, 1, Value::Block(w)),
            (None, Some(w)) => module.push_operand(term, Value::Block(w)),
            (Some(_), None) => module.remove_operand(term, 1),
            (None, None) => {}
        }
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DefinitionKind;
    use crate::ir::builder::IRBuilder;

    /// entry: TryStart body1, catch1
    /// body1: TryStart body2, catch2
    /// body2: TryEnd after2
    /// catch2: Catch; Branch after2
    /// after2: TryEnd exit
    /// catch1: Catch; Branch exit
    /// exit: Return
    #[test]
    fn test_nested_try_depths() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::Normal, false);
        let mut b = IRBuilder::new(&mut m);
        let [entry, body1, body2, catch2, after2, catch1, exit] =
            [(); 7].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        b.create_try_start(body1, catch1);
        b.set_insertion_block(body1);
        b.create_try_start(body2, catch2);
        b.set_insertion_block(body2);
        b.create_try_end(after2);
        b.set_insertion_block(catch2);
        b.create_catch();
        b.create_branch(after2);
        b.set_insertion_block(after2);
        b.create_try_end(exit);
        b.set_insertion_block(catch1);
        b.create_catch();
        b.create_branch(exit);
        b.set_insertion_block(exit);
        let u = b.undefined();
        b.create_return(u);

        let depths = block_try_depths(&m, f);
        assert_eq!(depths.depth(entry), 0);
        assert_eq!(depths.depth(body1), 1);
        assert_eq!(depths.depth(body2), 2);
        assert_eq!(depths.depth(catch2), 1);
        assert_eq!(depths.depth(after2), 1);
        assert_eq!(depths.depth(catch1), 0);
        assert_eq!(depths.depth(exit), 0);
        assert_eq!(depths.max_depth, 2);

        let trys = enclosing_trys(&m, f);
        let outer = m.terminator(entry);
        let inner = m.terminator(body1);
        assert_eq!(trys[&body1], outer);
        assert_eq!(trys[&body2], inner);
        assert_eq!(trys[&catch2], outer);
        assert_eq!(trys[&after2], outer);
        assert_eq!(trys[&catch1], None);
        assert_eq!(trys[&exit], None);
    }

    #[test]
    fn test_fixup_retargets_throw() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::Normal, false);
        let mut b = IRBuilder::new(&mut m);
        let [entry, body, catch, outside] = [(); 4].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        b.create_try_start(body, catch);
        b.set_insertion_block(body);
        let u = b.undefined();
        let throw = b.create_throw(u, None);
        b.set_insertion_block(catch);
        let c = b.create_catch();
        b.create_branch(outside);
        b.set_insertion_block(outside);
        b.create_throw(Value::Inst(c), Some(catch));
        let stale = m.terminator(outside).unwrap();

        assert!(fixup_catch_targets(&mut m, f));
        assert_eq!(m.inst(throw).operands().get(1), Some(&Value::Block(catch)));
        assert_eq!(m.inst(stale).num_operands(), 1);
        assert!(!fixup_catch_targets(&mut m, f));
    }
}

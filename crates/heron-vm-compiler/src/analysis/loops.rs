//! Natural loop discovery
//!
//! A depth-first walk from the entry records, for every block, the set of
//! candidate headers: targets of back edges whose DFS path passes through the
//! block. A header that fails to dominate one of its blocks is bad and drops
//! out of every set. Each block then takes the remaining candidate discovered
//! last, which is the innermost loop.

use rustc_hash::{FxHashMap, FxHashSet};

use super::dominance::DominanceInfo;
use crate::ir::{BlockId, FunctionId, Module};

/// Add `header` to the candidates of every path block from `header` on
fn mark_path(candidates: &mut FxHashMap<BlockId, Vec<BlockId>>, path: &[BlockId], header: BlockId) {
    let Some(start) = path.iter().position(|b| *b == header) else {
        return;
    };
    for b in &path[start..] {
        let set = candidates.entry(*b).or_default();
        if !set.contains(&header) {
            set.push(header);
        }
    }
}

/// Loop structure of one function
#[derive(Debug, Clone, Default)]
pub struct LoopAnalysis {
    header_of: FxHashMap<BlockId, BlockId>,
    preheaders: FxHashMap<BlockId, BlockId>,
    headers: Vec<BlockId>,
}

impl LoopAnalysis {
    /// Analyze `f`
    pub fn compute(module: &Module, f: FunctionId, dom: &DominanceInfo) -> Self {
        let Some(entry) = module.function(f).entry() else {
            return Self::default();
        };

        let mut discovery: FxHashMap<BlockId, u32> = FxHashMap::default();
        let mut parent: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        let mut candidates: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        let mut on_stack: FxHashSet<BlockId> = FxHashSet::default();
        let mut path: Vec<BlockId> = Vec::new();
        let mut stack: Vec<(BlockId, Vec<BlockId>, usize)> = Vec::new();

        discovery.insert(entry, 0);
        on_stack.insert(entry);
        path.push(entry);
        stack.push((entry, module.successors(entry), 0));

        while let Some((block, succs, next)) = stack.last_mut() {
            let block = *block;
            let Some(&succ) = succs.get(*next) else {
                on_stack.remove(&block);
                path.pop();
                stack.pop();
                continue;
            };
            *next += 1;

            if !discovery.contains_key(&succ) {
                discovery.insert(succ, discovery.len() as u32);
                parent.insert(succ, block);
                on_stack.insert(succ);
                path.push(succ);
                let succ_succs = module.successors(succ);
                stack.push((succ, succ_succs, 0));
            } else if on_stack.contains(&succ) {
                mark_path(&mut candidates, &path, succ);
            } else {
                // Loops the finished successor is in also contain this path,
                // as long as their header is still open.
                let inherited: Vec<BlockId> = candidates
                    .get(&succ)
                    .map(|s| {
                        s.iter()
                            .copied()
                            .filter(|h| on_stack.contains(h))
                            .collect()
                    })
                    .unwrap_or_default();
                for header in inherited {
                    mark_path(&mut candidates, &path, header);
                }
            }
        }

        // Reject headers that don't dominate their loop.
        let mut bad: FxHashSet<BlockId> = FxHashSet::default();
        for (block, set) in &candidates {
            for header in set {
                if !dom.dominates(*header, *block) {
                    bad.insert(*header);
                }
            }
        }

        let mut header_of = FxHashMap::default();
        for (block, set) in &candidates {
            if let Some(h) = set
                .iter()
                .filter(|h| !bad.contains(*h))
                .max_by_key(|h| discovery[*h])
            {
                header_of.insert(*block, *h);
            }
        }

        let mut headers: Vec<BlockId> = header_of
            .values()
            .copied()
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect();
        headers.sort_by_key(|h| discovery[h]);

        let mut preheaders = FxHashMap::default();
        for header in &headers {
            if let Some(p) = parent.get(header)
                && dom.properly_dominates(*p, *header)
            {
                preheaders.insert(*header, *p);
            }
        }

        Self {
            header_of,
            preheaders,
            headers,
        }
    }

    /// Header of the innermost loop containing `block`
    pub fn loop_header(&self, block: BlockId) -> Option<BlockId> {
        self.header_of.get(&block).copied()
    }

    /// Is `block` the header of a loop
    pub fn is_header(&self, block: BlockId) -> bool {
        self.loop_header(block) == Some(block)
    }

    /// Preheader of the loop headed by `header`
    pub fn preheader(&self, header: BlockId) -> Option<BlockId> {
        self.preheaders.get(&header).copied()
    }

    /// Loop headers in discovery order
    pub fn headers(&self) -> &[BlockId] {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DefinitionKind;
    use crate::ir::builder::IRBuilder;

    #[test]
    fn test_nested_loops_pick_innermost() {
        // entry -> outer -> inner -> inner | latch, latch -> outer | exit
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::Normal, false);
        let mut b = IRBuilder::new(&mut m);
        let [entry, outer, inner, latch, exit] = [(); 5].map(|_| b.create_block(f));
        let c = b.boolean(true);
        b.set_insertion_block(entry);
        b.create_branch(outer);
        b.set_insertion_block(outer);
        b.create_branch(inner);
        b.set_insertion_block(inner);
        b.create_cond_branch(c, inner, latch);
        b.set_insertion_block(latch);
        b.create_cond_branch(c, outer, exit);
        b.set_insertion_block(exit);
        let u = b.undefined();
        b.create_return(u);

        let dom = DominanceInfo::compute(&m, f);
        let loops = LoopAnalysis::compute(&m, f, &dom);
        assert_eq!(loops.loop_header(inner), Some(inner));
        assert_eq!(loops.loop_header(latch), Some(outer));
        assert_eq!(loops.loop_header(outer), Some(outer));
        assert_eq!(loops.loop_header(exit), None);
        assert_eq!(loops.preheader(outer), Some(entry));
        assert_eq!(loops.preheader(inner), Some(outer));
        assert_eq!(loops.headers(), &[outer, inner]);
    }

    #[test]
    fn test_irreducible_header_is_bad() {
        // entry -> a | b, a -> b, b -> a: neither a nor b dominates the other.
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::Normal, false);
        let mut bld = IRBuilder::new(&mut m);
        let [entry, a, b] = [(); 3].map(|_| bld.create_block(f));
        let c = bld.boolean(true);
        bld.set_insertion_block(entry);
        bld.create_cond_branch(c, a, b);
        bld.set_insertion_block(a);
        bld.create_branch(b);
        bld.set_insertion_block(b);
        bld.create_branch(a);

        let dom = DominanceInfo::compute(&m, f);
        let loops = LoopAnalysis::compute(&m, f, &dom);
        assert!(loops.headers().is_empty());
        assert_eq!(loops.loop_header(b), None);
    }
}

//! Dominator tree
//!
//! Immediate dominators are computed with the Cooper-Harvey-Kennedy iteration
//! over reverse post order. The tree is then numbered in pre and post order so
//! `dominates` is a constant time interval check.
//!
//! Blocks unreachable from the entry are dominated by every block.

use rustc_hash::FxHashMap;

use super::order::reverse_post_order;
use crate::ir::{BlockId, FunctionId, InstId, Module};

/// Dominator tree of one function
#[derive(Debug, Clone)]
pub struct DominanceInfo {
    root: Option<BlockId>,
    idom: FxHashMap<BlockId, BlockId>,
    children: FxHashMap<BlockId, Vec<BlockId>>,
    pre: FxHashMap<BlockId, u32>,
    post: FxHashMap<BlockId, u32>,
}

impl DominanceInfo {
    /// Compute the dominator tree of `f`
    pub fn compute(module: &Module, f: FunctionId) -> Self {
        let rpo = reverse_post_order(module, f);
        let index: FxHashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let preds: Vec<Vec<usize>> = rpo
            .iter()
            .map(|b| {
                module
                    .predecessors(*b)
                    .iter()
                    .filter_map(|p| index.get(p).copied())
                    .collect()
            })
            .collect();

        const UNDEF: usize = usize::MAX;
        let mut doms = vec![UNDEF; rpo.len()];
        if !rpo.is_empty() {
            doms[0] = 0;
        }

        let intersect = |doms: &[usize], mut a: usize, mut b: usize| {
            while a != b {
                while a > b {
                    a = doms[a];
                }
                while b > a {
                    b = doms[b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for i in 1..rpo.len() {
                let mut new_idom = UNDEF;
                for &p in &preds[i] {
                    if doms[p] == UNDEF {
                        continue;
                    }
                    new_idom = if new_idom == UNDEF {
                        p
                    } else {
                        intersect(&doms, p, new_idom)
                    };
                }
                if new_idom != UNDEF && doms[i] != new_idom {
                    doms[i] = new_idom;
                    changed = true;
                }
            }
        }

        let mut idom = FxHashMap::default();
        let mut children: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for (i, b) in rpo.iter().enumerate().skip(1) {
            let parent = rpo[doms[i]];
            idom.insert(*b, parent);
            children.entry(parent).or_default().push(*b);
        }

        let mut info = Self {
            root: rpo.first().copied(),
            idom,
            children,
            pre: FxHashMap::default(),
            post: FxHashMap::default(),
        };
        info.number();
        info
    }

    fn number(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let mut counter_pre = 0;
        let mut counter_post = 0;
        let mut stack = vec![(root, false)];
        while let Some((block, done)) = stack.pop() {
            if done {
                self.post.insert(block, counter_post);
                counter_post += 1;
                continue;
            }
            self.pre.insert(block, counter_pre);
            counter_pre += 1;
            stack.push((block, true));
            if let Some(kids) = self.children.get(&block) {
                for kid in kids.iter().rev() {
                    stack.push((*kid, false));
                }
            }
        }
    }

    /// Entry block
    pub fn root(&self) -> Option<BlockId> {
        self.root
    }

    /// Is the block reachable from the entry
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.pre.contains_key(&block)
    }

    /// Immediate dominator, `None` for the entry and unreachable blocks
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    /// Children in the dominator tree, in reverse post order
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(&block).map_or(&[], |v| v.as_slice())
    }

    /// Does `a` dominate `b`
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b || !self.is_reachable(b) {
            return true;
        }
        match (self.pre.get(&a), self.post.get(&a)) {
            (Some(pre_a), Some(post_a)) => self.pre[&b] >= *pre_a && self.post[&b] <= *post_a,
            _ => false,
        }
    }

    /// Does `a` dominate `b` with `a != b`
    pub fn properly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Does the definition `def` dominate the instruction `user`
    pub fn inst_dominates(&self, module: &Module, def: InstId, user: InstId) -> bool {
        let def_block = module.parent_block(def);
        let user_block = module.parent_block(user);
        if def_block != user_block {
            return self.dominates(def_block, user_block);
        }
        let insts = module.block_insts(def_block);
        let pos = |i: InstId| insts.iter().position(|x| *x == i);
        pos(def) < pos(user)
    }

    /// Blocks of the dominator tree in depth-first pre order
    pub fn preorder(&self) -> Vec<BlockId> {
        let mut blocks: Vec<(u32, BlockId)> = self.pre.iter().map(|(b, n)| (*n, *b)).collect();
        blocks.sort_unstable();
        blocks.into_iter().map(|(_, b)| b).collect()
    }
}

//! Register allocation
//!
//! Liveness is solved per block by backward dataflow over the final block
//! layout. Blocks inside a try region also flow into the region's catch
//! block, since any instruction may throw there. Every value then gets one
//! interval over the linear instruction numbering, from its first to its last
//! live point, and a linear scan hands out the lowest free register.
//!
//! Phis are not instructions at runtime: their register is written by moves
//! on each incoming edge, so a phi is live at the end of every predecessor.

use std::collections::{BTreeMap, BTreeSet};

use heron_vm_bytecode::Register;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::try_regions::{catch_block, enclosing_trys};
use crate::error::{CompileError, CompileResult};
use crate::ir::{BlockId, FunctionId, InstId, InstKind, Module, Value};

/// Registers the instruction set can address
pub const MAX_REGISTERS: u32 = 256;

/// Does an instruction of this kind define a value
pub fn has_result(kind: InstKind) -> bool {
    !kind.is_terminator()
        && !matches!(
            kind,
            InstKind::StoreStack
                | InstKind::StoreFrame
                | InstKind::StoreProperty
                | InstKind::DefineOwnProperty
                | InstKind::StartGenerator
        )
}

/// Live sets of every laid out block
#[derive(Debug, Default)]
pub struct Liveness {
    live_in: FxHashMap<BlockId, FxHashSet<InstId>>,
    live_out: FxHashMap<BlockId, FxHashSet<InstId>>,
}

impl Liveness {
    /// Solve liveness for the blocks of `layout`
    pub fn compute(module: &Module, f: FunctionId, layout: &[BlockId]) -> Self {
        let laid_out: FxHashSet<BlockId> = layout.iter().copied().collect();
        let trys = enclosing_trys(module, f);

        let mut succs: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        let mut gen_sets: FxHashMap<BlockId, FxHashSet<InstId>> = FxHashMap::default();
        let mut defs: FxHashMap<BlockId, FxHashSet<InstId>> = FxHashMap::default();
        let mut phi_uses: FxHashMap<BlockId, FxHashSet<InstId>> = FxHashMap::default();

        for &block in layout {
            let mut out = module.successors(block);
            if let Some(Some(t)) = trys.get(&block) {
                let catch = catch_block(module, *t);
                if !out.contains(&catch) {
                    out.push(catch);
                }
            }
            out.retain(|s| laid_out.contains(s));

            let mut defined = FxHashSet::default();
            let mut used = FxHashSet::default();
            for &inst in module.block_insts(block) {
                let i = module.inst(inst);
                if i.kind != InstKind::Phi {
                    for op in i.operands() {
                        if let Value::Inst(d) = op
                            && !defined.contains(d)
                        {
                            used.insert(*d);
                        }
                    }
                }
                defined.insert(inst);
            }

            let mut incoming = FxHashSet::default();
            for succ in &out {
                for phi in module.phis(*succ) {
                    if let Some(Value::Inst(d)) = module.phi_incoming(phi, block) {
                        incoming.insert(d);
                    }
                }
            }

            succs.insert(block, out);
            gen_sets.insert(block, used);
            defs.insert(block, defined);
            phi_uses.insert(block, incoming);
        }

        let mut result = Self::default();
        for &block in layout {
            result.live_in.insert(block, FxHashSet::default());
            result.live_out.insert(block, FxHashSet::default());
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &block in layout.iter().rev() {
                let mut out = phi_uses[&block].clone();
                for succ in &succs[&block] {
                    out.extend(result.live_in[succ].iter().copied());
                }
                let mut live = gen_sets[&block].clone();
                live.extend(out.iter().copied().filter(|v| !defs[&block].contains(v)));

                if out.len() != result.live_out[&block].len() {
                    result.live_out.insert(block, out);
                    changed = true;
                }
                if live.len() != result.live_in[&block].len() {
                    result.live_in.insert(block, live);
                    changed = true;
                }
            }
        }
        result
    }

    /// Is `value` live on entry to `block`
    pub fn is_live_in(&self, block: BlockId, value: InstId) -> bool {
        self.live_in.get(&block).is_some_and(|s| s.contains(&value))
    }

    /// Is `value` live on exit from `block`
    pub fn is_live_out(&self, block: BlockId, value: InstId) -> bool {
        self.live_out.get(&block).is_some_and(|s| s.contains(&value))
    }
}

/// Live interval over the linear instruction numbering, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    start: u32,
    end: u32,
}

impl Interval {
    fn point(pos: u32) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    fn cover(&mut self, pos: u32) {
        self.start = self.start.min(pos);
        self.end = self.end.max(pos);
    }
}

/// Register of every value of a function
#[derive(Debug, Default)]
pub struct RegisterAllocation {
    regs: FxHashMap<InstId, Register>,
    num_registers: u32,
}

impl RegisterAllocation {
    /// Register of `inst`, if it defines a value
    pub fn get(&self, inst: InstId) -> Option<Register> {
        self.regs.get(&inst).copied()
    }

    /// Register holding an instruction operand
    pub fn reg(&self, value: Value) -> Register {
        match value {
            Value::Inst(inst) => match self.regs.get(&inst) {
                Some(r) => *r,
                None => unreachable!("%{} has no register", inst.0),
            },
            other => unreachable!("operand {:?} is not in a register", other),
        }
    }

    /// Registers handed out
    pub fn num_registers(&self) -> u32 {
        self.num_registers
    }
}

/// Allocate registers for the blocks of `layout`, in that order
pub fn allocate(
    module: &Module,
    f: FunctionId,
    layout: &[BlockId],
) -> CompileResult<RegisterAllocation> {
    let liveness = Liveness::compute(module, f, layout);

    let mut pos: FxHashMap<InstId, u32> = FxHashMap::default();
    let mut block_start: FxHashMap<BlockId, u32> = FxHashMap::default();
    let mut block_end: FxHashMap<BlockId, u32> = FxHashMap::default();
    let mut next = 0u32;
    for &block in layout {
        block_start.insert(block, next);
        for &inst in module.block_insts(block) {
            pos.insert(inst, next);
            next += 1;
        }
        block_end.insert(block, next.saturating_sub(1));
    }
    let last = next.saturating_sub(1);

    let mut intervals: BTreeMap<InstId, Interval> = BTreeMap::new();
    for &block in layout {
        for &inst in module.block_insts(block) {
            let kind = module.inst(inst).kind;
            if !has_result(kind) {
                continue;
            }
            let mut interval = Interval::point(pos[&inst]);
            match kind {
                InstKind::AllocStack => {
                    interval = Interval { start: 0, end: last };
                }
                InstKind::Phi => {
                    for (_, pred) in module.phi_entries(inst) {
                        if let Some(end) = block_end.get(&pred) {
                            interval.cover(*end);
                        }
                    }
                }
                _ => {}
            }
            intervals.insert(inst, interval);
        }
    }

    for &block in layout {
        for &inst in module.block_insts(block) {
            let i = module.inst(inst);
            if i.kind == InstKind::Phi {
                continue;
            }
            for op in i.operands() {
                if let Value::Inst(d) = op
                    && let Some(interval) = intervals.get_mut(d)
                {
                    interval.cover(pos[&inst]);
                }
            }
        }
    }

    for (value, interval) in intervals.iter_mut() {
        for &block in layout {
            if liveness.is_live_in(block, *value) {
                interval.cover(block_start[&block]);
            }
            if liveness.is_live_out(block, *value) {
                interval.cover(block_end[&block]);
            }
        }
    }

    let mut order: Vec<(Interval, InstId)> =
        intervals.iter().map(|(inst, interval)| (*interval, *inst)).collect();
    order.sort_by_key(|(interval, inst)| (interval.start, *inst));

    let mut result = RegisterAllocation::default();
    let mut active: Vec<(u32, u32)> = Vec::new();
    let mut free: BTreeSet<u32> = BTreeSet::new();
    for (interval, inst) in order {
        active.retain(|&(end, reg)| {
            if end < interval.start {
                free.insert(reg);
                false
            } else {
                true
            }
        });
        let reg = match free.pop_first() {
            Some(reg) => reg,
            None => {
                result.num_registers += 1;
                result.num_registers - 1
            }
        };
        active.push((interval.end, reg));
        if reg < MAX_REGISTERS {
            result.regs.insert(inst, Register(reg as u8));
        }
    }

    if result.num_registers > MAX_REGISTERS {
        return Err(CompileError::TooManyRegisters {
            function: module.function(f).name.clone(),
            needed: result.num_registers as usize,
        });
    }
    tracing::trace!(
        function = %module.function(f).name,
        registers = result.num_registers,
        "registers allocated"
    );
    Ok(result)
}

/// Moves of a parallel copy `dst <- src` that still have to happen
fn pending_moves(moves: &BTreeMap<Register, Register>) -> BTreeMap<Register, Register> {
    moves
        .iter()
        .filter(|(dst, src)| dst != src)
        .map(|(dst, src)| (*dst, *src))
        .collect()
}

/// First pending move whose destination no other pending move reads
fn ready_move(pending: &BTreeMap<Register, Register>) -> Option<Register> {
    pending
        .keys()
        .copied()
        .find(|dst| !pending.values().any(|src| src == dst))
}

/// Does the parallel copy contain a cycle
pub fn needs_scratch(moves: &BTreeMap<Register, Register>) -> bool {
    let mut pending = pending_moves(moves);
    while !pending.is_empty() {
        match ready_move(&pending) {
            Some(dst) => {
                pending.remove(&dst);
            }
            None => return true,
        }
    }
    false
}

/// Order a parallel copy `dst <- src` into sequential moves.
///
/// A move is ready once no pending move still reads its destination. When
/// only cycles remain, one destination is saved in `scratch` first; a cycle
/// without a scratch register is a caller bug.
pub fn sequentialize(
    moves: &BTreeMap<Register, Register>,
    scratch: Option<Register>,
) -> Vec<(Register, Register)> {
    let mut pending = pending_moves(moves);
    let mut out = Vec::new();

    while let Some((&first, _)) = pending.first_key_value() {
        match ready_move(&pending) {
            Some(dst) => {
                if let Some(src) = pending.remove(&dst) {
                    out.push((dst, src));
                }
            }
            None => {
                let Some(scratch) = scratch else {
                    unreachable!("move cycle through r{} without a scratch register", first.0)
                };
                out.push((scratch, first));
                for src in pending.values_mut() {
                    if *src == first {
                        *src = scratch;
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::reverse_post_order;
    use crate::ir::builder::IRBuilder;
    use crate::ir::{BinaryOp, DefinitionKind};

    fn run_moves(regs: &mut [i32], moves: &[(Register, Register)]) {
        for (dst, src) in moves {
            regs[dst.0 as usize] = regs[src.0 as usize];
        }
    }

    #[test]
    fn test_sequentialize_swap() {
        let moves = BTreeMap::from([(Register(0), Register(1)), (Register(1), Register(0))]);
        assert!(needs_scratch(&moves));
        let seq = sequentialize(&moves, Some(Register(9)));
        assert_eq!(seq.len(), 3);
        let mut regs = [10, 11, 0, 0, 0, 0, 0, 0, 0, 0];
        run_moves(&mut regs, &seq);
        assert_eq!(&regs[..2], &[11, 10]);
    }

    #[test]
    fn test_sequentialize_chain_needs_no_scratch() {
        // r2 <- r1, r1 <- r0
        let moves = BTreeMap::from([(Register(1), Register(0)), (Register(2), Register(1))]);
        assert!(!needs_scratch(&moves));
        let seq = sequentialize(&moves, None);
        assert_eq!(seq.len(), 2);
        let mut regs = [1, 2, 3, 0, 0, 0, 0, 0, 0, 0];
        run_moves(&mut regs, &seq);
        assert_eq!(&regs[..3], &[1, 1, 2]);
    }

    #[test]
    fn test_registers_reused_after_last_use() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let p = m.add_param(f, "p");
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        let a = b.create_load_param(p);
        let neg = b.create_unary(crate::ir::UnaryOp::Minus, Value::Inst(a));
        let c = b.create_load_param(p);
        b.create_return(Value::Inst(c));

        let layout = reverse_post_order(&m, f);
        let alloc = allocate(&m, f, &layout).unwrap();
        // `a` dies at `neg`, `neg` is unused, `c` can take the first register.
        assert_eq!(alloc.get(a), Some(Register(0)));
        assert_eq!(alloc.get(neg), Some(Register(1)));
        assert_eq!(alloc.get(c), Some(Register(0)));
        assert_eq!(alloc.num_registers(), 2);
    }

    #[test]
    fn test_loop_carried_value_stays_live() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let p = m.add_param(f, "p");
        let mut b = IRBuilder::new(&mut m);
        let [entry, header, body, exit] = [(); 4].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        let limit = b.create_load_param(p);
        let zero = b.create_load_param(p);
        b.create_branch(header);
        b.set_insertion_block(header);
        let phi = b.create_phi(&[(Value::Inst(zero), entry)]);
        let cond = b.create_binary(BinaryOp::Less, Value::Inst(phi), Value::Inst(limit));
        b.create_cond_branch(Value::Inst(cond), body, exit);
        b.set_insertion_block(body);
        let one = b.create_load_param(p);
        let next = b.create_binary(BinaryOp::Add, Value::Inst(phi), Value::Inst(one));
        b.create_branch(header);
        b.set_insertion_block(exit);
        b.create_return(Value::Inst(phi));
        m.phi_add_entry(phi, Value::Inst(next), body);

        let layout = reverse_post_order(&m, f);
        let alloc = allocate(&m, f, &layout).unwrap();
        let limit_reg = alloc.get(limit).unwrap();
        // `limit` is read on every iteration, so nothing in the body may
        // share its register.
        for inst in [one, next, phi] {
            assert_ne!(alloc.get(inst), Some(limit_reg));
        }
        assert_ne!(alloc.get(next), alloc.get(phi));
    }

    #[test]
    fn test_too_many_registers() {
        let mut m = Module::new();
        let f = m.add_function("big", DefinitionKind::TopLevel, false);
        let p = m.add_param(f, "p");
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        let loads: Vec<Value> = (0..300).map(|_| Value::Inst(b.create_load_param(p))).collect();
        let arr = b.create_alloc_array(300, &loads);
        b.create_return(Value::Inst(arr));

        let layout = reverse_post_order(&m, f);
        let err = allocate(&m, f, &layout).unwrap_err();
        assert!(matches!(err, CompileError::TooManyRegisters { needed, .. } if needed > 256));
    }
}

//! Bytecode generation
//!
//! Each function is laid out in reverse post order, so most branches fall
//! through. Instructions are emitted with placeholder jump offsets; once every
//! encoded size is known the offsets and jump tables are patched. Instruction
//! encodings have a fixed size per opcode, so patching never moves code.
//!
//! Phi moves go at the end of the predecessor when it has a single
//! successor, and otherwise into a stub placed after the function body.

pub mod isel;
pub mod regalloc;

use std::collections::BTreeMap;

use heron_vm_bytecode::{
    BytecodeFunction, BytecodeModule, DebugLocation, ExceptionHandler, FunctionFlags,
    FunctionHeader, Instruction, JumpOffset, Register,
};
use rustc_hash::FxHashMap;

use crate::analysis::try_regions::{catch_block, enclosing_trys};
use crate::analysis::{DominanceInfo, LoopAnalysis, reverse_post_order};
use crate::diagnostics::SourceLoc;
use crate::error::{CompileError, CompileResult};
use crate::flags::CompileFlags;
use crate::ir::{BlockId, DefinitionKind, FunctionId, InstId, InstKind, LiteralId, Module, Value};

pub use isel::ModuleTables;
pub use regalloc::{MAX_REGISTERS, RegisterAllocation};

/// Jump destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Label {
    Block(BlockId),
    /// Phi move stub for an edge
    Stub(usize),
}

/// Source of a phi move
#[derive(Debug, Clone, Copy)]
enum MoveSource {
    Reg(Register),
    Literal(LiteralId),
}

struct FunctionEmitter<'a> {
    module: &'a Module,
    f: FunctionId,
    flags: &'a CompileFlags,
    tables: &'a mut ModuleTables,
    regs: RegisterAllocation,
    /// First register past the allocated ones, if the frame has room
    scratch: Option<Register>,
    uses_scratch: bool,
    code: Vec<Instruction>,
    labels: FxHashMap<Label, usize>,
    fixups: Vec<(usize, Label)>,
    switch_tables: Vec<(usize, Vec<Label>)>,
    jump_table_len: u32,
    stubs: Vec<(BlockId, BlockId)>,
    stub_ids: FxHashMap<(BlockId, BlockId), usize>,
    block_ranges: Vec<(BlockId, usize, usize)>,
    locations: Vec<(usize, SourceLoc)>,
}

impl<'a> FunctionEmitter<'a> {
    fn new(
        module: &'a Module,
        f: FunctionId,
        flags: &'a CompileFlags,
        tables: &'a mut ModuleTables,
        regs: RegisterAllocation,
    ) -> Self {
        let used = regs.num_registers();
        let scratch = (used < MAX_REGISTERS).then(|| Register(used as u8));
        Self {
            module,
            f,
            flags,
            tables,
            regs,
            scratch,
            uses_scratch: false,
            code: Vec::new(),
            labels: FxHashMap::default(),
            fixups: Vec::new(),
            switch_tables: Vec::new(),
            jump_table_len: 0,
            stubs: Vec::new(),
            stub_ids: FxHashMap::default(),
            block_ranges: Vec::new(),
            locations: Vec::new(),
        }
    }

    fn emit(&mut self, inst: Instruction) {
        self.code.push(inst);
    }

    fn emit_jump(&mut self, inst: Instruction, target: Label) {
        self.fixups.push((self.code.len(), target));
        self.code.push(inst);
    }

    /// Jump to `target` unless it is the next block
    fn jump_to(&mut self, target: Label, next: Option<BlockId>) {
        if next.is_some_and(|n| target == Label::Block(n)) {
            return;
        }
        self.emit_jump(
            Instruction::Jmp {
                offset: JumpOffset(0),
            },
            target,
        );
    }

    fn take_scratch(&mut self) -> CompileResult<Register> {
        let Some(scratch) = self.scratch else {
            return Err(CompileError::TooManyRegisters {
                function: self.module.function(self.f).name.clone(),
                needed: MAX_REGISTERS as usize + 1,
            });
        };
        self.uses_scratch = true;
        Ok(scratch)
    }

    /// Label of the edge `pred -> succ`: a stub when `succ` has phis and
    /// `pred` branches elsewhere too
    fn edge_label(&mut self, pred: BlockId, succ: BlockId) -> Label {
        if self.module.phis(succ).is_empty() {
            return Label::Block(succ);
        }
        let next = self.stubs.len();
        let id = *self.stub_ids.entry((pred, succ)).or_insert(next);
        if id == next {
            self.stubs.push((pred, succ));
        }
        Label::Stub(id)
    }

    /// Moves feeding the phis of `succ` along the edge from `pred`
    fn emit_phi_moves(&mut self, pred: BlockId, succ: BlockId) -> CompileResult<()> {
        let mut moves: BTreeMap<Register, Register> = BTreeMap::new();
        let mut literals: Vec<(Register, LiteralId)> = Vec::new();
        for phi in self.module.phis(succ) {
            let dst = self.regs.reg(Value::Inst(phi));
            let source = match self.module.phi_incoming(phi, pred) {
                Some(Value::Inst(src)) => MoveSource::Reg(self.regs.reg(Value::Inst(src))),
                Some(Value::Literal(lit)) => MoveSource::Literal(lit),
                other => unreachable!(
                    "phi %{} has no register entry for %BB{}: {:?}",
                    phi.0, pred.0, other
                ),
            };
            match source {
                MoveSource::Reg(src) => {
                    moves.insert(dst, src);
                }
                MoveSource::Literal(lit) => literals.push((dst, lit)),
            }
        }

        let scratch = if regalloc::needs_scratch(&moves) {
            Some(self.take_scratch()?)
        } else {
            None
        };
        for (dst, src) in regalloc::sequentialize(&moves, scratch) {
            self.emit(Instruction::Mov { dst, src });
        }
        // Literal sources read no register, so they go last.
        for (dst, lit) in literals {
            let literal = self.module.literal_value(lit);
            let load = isel::load_const(dst, literal, &mut self.tables.strings);
            self.emit(load);
        }
        Ok(())
    }

    fn emit_terminator(
        &mut self,
        block: BlockId,
        term: InstId,
        next: Option<BlockId>,
    ) -> CompileResult<()> {
        let module = self.module;
        let inst = module.inst(term);
        let ops = inst.operands();
        let block_op = |index: usize| match ops[index] {
            Value::Block(b) => b,
            other => unreachable!("{} operand {} is not a block: {:?}", inst.kind.name(), index, other),
        };

        match inst.kind {
            InstKind::Branch | InstKind::TryEnd => {
                let dest = block_op(0);
                self.emit_phi_moves(block, dest)?;
                self.jump_to(Label::Block(dest), next);
            }
            InstKind::TryStart => {
                let body = self.edge_label(block, block_op(0));
                self.jump_to(body, next);
            }
            InstKind::CondBranch => {
                let cond = self.regs.reg(ops[0]);
                let on_true = self.edge_label(block, block_op(1));
                let on_false = self.edge_label(block, block_op(2));
                if on_true == on_false {
                    self.jump_to(on_true, next);
                } else if next.is_some_and(|n| on_true == Label::Block(n)) {
                    self.emit_jump(
                        Instruction::JmpFalse {
                            offset: JumpOffset(0),
                            cond,
                        },
                        on_false,
                    );
                } else {
                    self.emit_jump(
                        Instruction::JmpTrue {
                            offset: JumpOffset(0),
                            cond,
                        },
                        on_true,
                    );
                    self.jump_to(on_false, next);
                }
            }
            InstKind::Switch => self.emit_switch(block, term, next)?,
            InstKind::Return => self.emit(Instruction::Ret {
                value: self.regs.reg(ops[0]),
            }),
            InstKind::Throw => self.emit(Instruction::Throw {
                value: self.regs.reg(ops[0]),
            }),
            InstKind::Unreachable => self.emit(Instruction::Unreachable),
            kind => unreachable!("{} is not a terminator", kind.name()),
        }
        Ok(())
    }

    fn emit_switch(&mut self, block: BlockId, term: InstId, next: Option<BlockId>) -> CompileResult<()> {
        let module = self.module;
        let ops = module.inst(term).operands();
        let value = self.regs.reg(ops[0]);
        let Some(default_block) = ops[1].as_block() else {
            unreachable!("Switch default is not a block");
        };
        let default = self.edge_label(block, default_block);
        let mut cases: Vec<(Value, Label)> = Vec::new();
        for pair in ops[2..].chunks_exact(2) {
            let Some(target) = pair[1].as_block() else {
                unreachable!("Switch case target is not a block");
            };
            let label = self.edge_label(block, target);
            cases.push((pair[0], label));
        }

        let case_values: Vec<Value> = cases.iter().map(|(v, _)| *v).collect();
        if let Some((min, max)) = isel::jump_table_range(module, &case_values) {
            let mut entries: Vec<Option<Label>> = vec![None; (max as i64 - min as i64 + 1) as usize];
            for (case, label) in &cases {
                let Some(n) = module.as_literal(*case).and_then(|l| l.as_number()) else {
                    unreachable!("jump table case is not a number");
                };
                let slot = &mut entries[(n as i64 - min as i64) as usize];
                // The first matching case wins.
                if slot.is_none() {
                    *slot = Some(*label);
                }
            }
            let entries: Vec<Label> = entries.into_iter().map(|e| e.unwrap_or(default)).collect();
            let table = self.jump_table_len * 4;
            self.jump_table_len += entries.len() as u32;
            self.switch_tables.push((self.code.len(), entries));
            self.emit_jump(
                Instruction::SwitchImm {
                    value,
                    table,
                    default: JumpOffset(0),
                    min,
                    max,
                },
                default,
            );
            return Ok(());
        }

        let tmp = self.take_scratch()?;
        for (case, label) in cases {
            let Some(literal) = module.as_literal(case) else {
                unreachable!("Switch case is not a literal");
            };
            let load = isel::load_const(tmp, literal, &mut self.tables.strings);
            self.emit(load);
            self.emit(Instruction::StrictEq {
                dst: tmp,
                lhs: value,
                rhs: tmp,
            });
            self.emit_jump(
                Instruction::JmpTrue {
                    offset: JumpOffset(0),
                    cond: tmp,
                },
                label,
            );
        }
        self.jump_to(default, next);
        Ok(())
    }

    fn emit_body(&mut self, layout: &[BlockId]) -> CompileResult<()> {
        let module = self.module;
        let loop_headers = if self.flags.emit_async_break_check {
            let dom = DominanceInfo::compute(module, self.f);
            Some(LoopAnalysis::compute(module, self.f, &dom))
        } else {
            None
        };

        for (index, &block) in layout.iter().enumerate() {
            let start = self.code.len();
            self.labels.insert(Label::Block(block), start);
            if let Some(loops) = &loop_headers
                && (index == 0 || loops.is_header(block))
            {
                self.emit(Instruction::AsyncBreakCheck);
            }

            let next = layout.get(index + 1).copied();
            for &inst in module.block_insts(block) {
                let before = self.code.len();
                if module.inst(inst).kind.is_terminator() {
                    self.emit_terminator(block, inst, next)?;
                } else if let Some(out) = isel::select(module, inst, &self.regs, self.tables)? {
                    self.emit(out);
                }
                let location = module.inst(inst).location;
                if self.flags.debug && location.is_valid() && self.code.len() > before {
                    self.locations.push((before, location));
                }
            }
            self.block_ranges.push((block, start, self.code.len()));
        }

        let mut stub = 0;
        while stub < self.stubs.len() {
            let (pred, succ) = self.stubs[stub];
            self.labels.insert(Label::Stub(stub), self.code.len());
            self.emit_phi_moves(pred, succ)?;
            self.jump_to(Label::Block(succ), None);
            stub += 1;
        }
        Ok(())
    }

    /// Byte offset of every instruction, plus the end offset
    fn offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.code.len() + 1);
        let mut pos = 0u32;
        for inst in &self.code {
            offsets.push(pos);
            pos += inst.encoded_len() as u32;
        }
        offsets.push(pos);
        offsets
    }

    fn label_offset(&self, offsets: &[u32], label: Label) -> u32 {
        match self.labels.get(&label) {
            Some(index) => offsets[*index],
            None => unreachable!("jump to unplaced label {:?}", label),
        }
    }

    /// One handler per run of blocks sharing an innermost try, innermost
    /// regions first
    fn exception_handlers(&self, offsets: &[u32]) -> Vec<ExceptionHandler> {
        let module = self.module;
        let trys = enclosing_trys(module, self.f);
        let depth_of = |mut t: InstId| {
            let mut depth = 1;
            while let Some(Some(outer)) = trys.get(&module.parent_block(t)) {
                depth += 1;
                t = *outer;
            }
            depth
        };

        let mut handlers: Vec<ExceptionHandler> = Vec::new();
        let mut current: Option<(InstId, u32, u32)> = None;
        for &(block, start, end) in &self.block_ranges {
            let innermost = trys.get(&block).copied().flatten();
            let (start, end) = (offsets[start], offsets[end]);
            match (current, innermost) {
                (Some((t, s, e)), Some(i)) if t == i && e == start => {
                    current = Some((t, s, end));
                    continue;
                }
                _ => {}
            }
            if let Some((t, s, e)) = current.take() {
                handlers.push(self.handler(offsets, t, s, e, depth_of(t)));
            }
            current = innermost.map(|t| (t, start, end));
        }
        if let Some((t, s, e)) = current {
            handlers.push(self.handler(offsets, t, s, e, depth_of(t)));
        }
        handlers.retain(|h| h.start < h.end);
        handlers.sort_by(|a, b| b.depth.cmp(&a.depth));
        handlers
    }

    fn handler(&self, offsets: &[u32], t: InstId, start: u32, end: u32, depth: u32) -> ExceptionHandler {
        let catch = catch_block(self.module, t);
        ExceptionHandler {
            start,
            end,
            target: self.label_offset(offsets, Label::Block(catch)),
            depth,
        }
    }

    fn finish(mut self) -> CompileResult<BytecodeFunction> {
        let offsets = self.offsets();
        for (index, label) in std::mem::take(&mut self.fixups) {
            let target = self.label_offset(&offsets, label) as i64;
            let offset = (target - offsets[index] as i64) as i32;
            self.code[index].set_jump_offset(JumpOffset(offset));
        }

        let mut jump_table: Vec<i32> = Vec::with_capacity(self.jump_table_len as usize);
        for (index, entries) in &self.switch_tables {
            for label in entries {
                let target = self.label_offset(&offsets, *label) as i64;
                jump_table.push((target - offsets[*index] as i64) as i32);
            }
        }

        let mut opcodes = Vec::with_capacity(*offsets.last().unwrap_or(&0) as usize);
        for inst in &self.code {
            inst.encode(&mut opcodes);
        }

        let module = self.module;
        let function = module.function(self.f);
        let handlers = self.exception_handlers(&offsets);
        let environment_size = module
            .function_insts(self.f)
            .into_iter()
            .filter(|i| module.inst(*i).kind == InstKind::CreateScope)
            .filter_map(|i| match module.inst(i).operand(0) {
                Value::Scope(s) => Some(module.scope_size(s)),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let header = FunctionHeader {
            bytecode_size: 0,
            param_count: function.params().len() as u32,
            frame_size: self.regs.num_registers() + self.uses_scratch as u32,
            environment_size,
            name: self.tables.strings.add_string(&function.name),
            flags: FunctionFlags {
                is_strict: function.strict || self.flags.strict,
                is_generator: function.kind == DefinitionKind::GeneratorInner,
                is_lazy: self.flags.lazy && module.top_level() != Some(self.f),
                uses_eval: module.uses_direct_eval(self.f),
                has_exception_handler: !handlers.is_empty(),
            },
        };

        let mut out = BytecodeFunction::new(header, opcodes, &jump_table);
        out.exception_handlers = handlers;
        let mut last: Option<SourceLoc> = None;
        for (index, loc) in &self.locations {
            if last == Some(*loc) {
                continue;
            }
            last = Some(*loc);
            out.debug_locations.push(DebugLocation {
                offset: offsets[*index],
                line: loc.line,
                column: loc.column,
            });
        }
        Ok(out)
    }
}

/// Generate the bytecode of one function
pub fn generate_function(
    module: &Module,
    f: FunctionId,
    flags: &CompileFlags,
    tables: &mut ModuleTables,
) -> CompileResult<BytecodeFunction> {
    let layout = reverse_post_order(module, f);
    let regs = regalloc::allocate(module, f, &layout)?;
    let mut emitter = FunctionEmitter::new(module, f, flags, tables, regs);
    emitter.emit_body(&layout)?;
    let out = emitter.finish()?;
    tracing::trace!(
        function = %module.function(f).name,
        bytes = out.header.bytecode_size,
        frame = out.header.frame_size,
        "function emitted"
    );
    Ok(out)
}

/// Generate a bytecode module from lowered IR.
///
/// Functions keep their definition order; the top level function is the
/// module's global function.
pub fn generate_module(module: &Module, flags: &CompileFlags) -> CompileResult<BytecodeModule> {
    let mut tables = ModuleTables::default();
    for (index, f) in module.functions().into_iter().enumerate() {
        tables.function_index.insert(f, index as u32);
    }

    let mut out = BytecodeModule::new();
    for f in module.functions() {
        let function = generate_function(module, f, flags, &mut tables)?;
        out.functions.push(function);
    }

    out.global_function = module
        .top_level()
        .and_then(|f| tables.function_index.get(&f).copied())
        .unwrap_or(0);
    out.strings = tables.strings;
    out.array_buffer = tables.array_buffer;
    out.object_key_buffer = tables.object_key_buffer;
    out.object_value_buffer = tables.object_value_buffer;
    out.options.has_debug_info = flags.debug;
    out.options.lazy = flags.lazy;
    out.options.strict = flags.strict;
    tracing::debug!(
        functions = out.functions.len(),
        strings = out.strings.len(),
        "bytecode module generated"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IRBuilder;
    use crate::lower::lowering_pipeline;
    use crate::stats::PassStats;

    fn lower(m: &mut Module) {
        let flags = CompileFlags::default();
        lowering_pipeline(&flags).run(m, &mut PassStats::default());
    }

    fn instructions(f: &BytecodeFunction) -> Vec<(u32, Instruction)> {
        f.instructions().unwrap()
    }

    #[test]
    fn test_return_constant() {
        let mut m = Module::new();
        let f = m.add_function("main", DefinitionKind::TopLevel, false);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        let n = b.number(42.0);
        b.create_return(n);
        lower(&mut m);

        let bc = generate_module(&m, &CompileFlags::default()).unwrap();
        let main = bc.global_function().unwrap();
        let insts: Vec<Instruction> = instructions(main).into_iter().map(|(_, i)| i).collect();
        assert_eq!(
            insts,
            vec![
                Instruction::LoadConstUInt8 {
                    dst: Register(0),
                    value: 42
                },
                Instruction::Ret { value: Register(0) },
            ]
        );
        assert_eq!(main.header.frame_size, 1);
        assert_eq!(bc.strings.get(main.header.name), Some("main"));
    }

    /// entry: cond ? left : right; join: phi(1, 2)
    #[test]
    fn test_diamond_jumps_and_phi_moves() {
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
        let (one, two) = (b.number(1.0), b.number(2.0));
        let phi = b.create_phi(&[(one, left), (two, right)]);
        b.create_return(Value::Inst(phi));
        lower(&mut m);

        let bc = generate_module(&m, &CompileFlags::default()).unwrap();
        let func = bc.global_function().unwrap();
        let insts = instructions(func);
        let ends = func.header.bytecode_size as i64;
        for (offset, inst) in &insts {
            if let Some(jump) = inst.jump_offset() {
                let target = jump.target(*offset);
                assert!(target >= 0 && target < ends);
                assert!(insts.iter().any(|(o, _)| *o as i64 == target));
            }
        }
        let movs = insts
            .iter()
            .filter(|(_, i)| matches!(i, Instruction::Mov { .. }))
            .count();
        assert_eq!(movs, 2);
        assert!(matches!(insts.last(), Some((_, Instruction::Ret { .. }))));
    }

    /// 128 values feed 128 phis: all 256 registers are live on each edge
    /// and none of the moves form a cycle
    #[test]
    fn test_full_frame_phi_moves_need_no_scratch() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let params: Vec<_> = (0..128).map(|i| m.add_param(f, format!("p{i}"))).collect();
        let mut b = IRBuilder::new(&mut m);
        let [entry, left, right, join] = [(); 4].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        let values: Vec<Value> = params
            .iter()
            .map(|p| Value::Inst(b.create_load_param(*p)))
            .collect();
        b.create_cond_branch(values[0], left, right);
        for block in [left, right] {
            b.set_insertion_block(block);
            b.create_branch(join);
        }
        b.set_insertion_block(join);
        let phis: Vec<InstId> = values
            .iter()
            .map(|v| b.create_phi(&[(*v, left), (*v, right)]))
            .collect();
        b.create_return(Value::Inst(phis[0]));
        lower(&mut m);

        let bc = generate_module(&m, &CompileFlags::default()).unwrap();
        let func = bc.global_function().unwrap();
        assert_eq!(func.header.frame_size, MAX_REGISTERS);
        let movs = instructions(func)
            .iter()
            .filter(|(_, i)| matches!(i, Instruction::Mov { .. }))
            .count();
        assert_eq!(movs, 256);
    }

    #[test]
    fn test_dense_switch_uses_jump_table() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let p = m.add_param(f, "p");
        let mut b = IRBuilder::new(&mut m);
        let [entry, c0, c1, c2, other] = [(); 5].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        let input = b.create_load_param(p);
        let cases: Vec<(Value, BlockId)> = [c0, c1, c2]
            .iter()
            .enumerate()
            .map(|(i, blk)| (b.number(i as f64), *blk))
            .collect();
        b.create_switch(Value::Inst(input), other, &cases);
        for blk in [c0, c1, c2, other] {
            b.set_insertion_block(blk);
            let u = b.undefined();
            b.create_return(u);
        }
        lower(&mut m);

        let bc = generate_module(&m, &CompileFlags::default()).unwrap();
        let func = bc.global_function().unwrap();
        let table = func.jump_table();
        assert_eq!(table.len(), 3);
        let insts = instructions(func);
        let (switch_at, min, max) = insts
            .iter()
            .find_map(|(o, i)| match i {
                Instruction::SwitchImm { min, max, .. } => Some((*o, *min, *max)),
                _ => None,
            })
            .unwrap();
        assert_eq!((min, max), (0, 2));
        for entry in table {
            let target = switch_at as i64 + entry as i64;
            assert!(insts.iter().any(|(o, _)| *o as i64 == target));
        }
    }

    #[test]
    fn test_sparse_switch_becomes_compare_chain() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let p = m.add_param(f, "p");
        let mut b = IRBuilder::new(&mut m);
        let [entry, a, s, other] = [(); 4].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        let input = b.create_load_param(p);
        let (one, text) = (b.number(1.0), b.string("x"));
        b.create_switch(Value::Inst(input), other, &[(one, a), (text, s)]);
        for blk in [a, s, other] {
            b.set_insertion_block(blk);
            let u = b.undefined();
            b.create_return(u);
        }
        lower(&mut m);

        let bc = generate_module(&m, &CompileFlags::default()).unwrap();
        let func = bc.global_function().unwrap();
        let insts = instructions(func);
        let compares = insts
            .iter()
            .filter(|(_, i)| matches!(i, Instruction::StrictEq { .. }))
            .count();
        assert_eq!(compares, 2);
        assert!(func.jump_table().is_empty());
        // The compare chain uses one register past the allocated ones.
        assert_eq!(func.header.frame_size, 2);
    }

    #[test]
    fn test_try_region_handler() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let mut b = IRBuilder::new(&mut m);
        let [entry, body, catch, exit] = [(); 4].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        b.create_try_start(body, catch);
        b.set_insertion_block(body);
        let u = b.undefined();
        b.create_throw(u, Some(catch));
        b.set_insertion_block(catch);
        b.create_catch();
        b.create_branch(exit);
        b.set_insertion_block(exit);
        b.create_return(u);
        lower(&mut m);

        let bc = generate_module(&m, &CompileFlags::default()).unwrap();
        let func = bc.global_function().unwrap();
        assert!(func.header.flags.has_exception_handler);
        assert_eq!(func.exception_handlers.len(), 1);
        let handler = func.exception_handlers[0];
        assert_eq!(handler.depth, 1);
        let insts = instructions(func);
        assert!(insts.iter().any(|(o, i)| *o == handler.target && matches!(i, Instruction::Catch { .. })));
        assert!(insts.iter().any(|(o, i)| *o >= handler.start && *o < handler.end && matches!(i, Instruction::Throw { .. })));
    }

    #[test]
    fn test_async_break_checks_at_entry_and_loop() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let p = m.add_param(f, "p");
        let mut b = IRBuilder::new(&mut m);
        let [entry, header, exit] = [(); 3].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        b.create_branch(header);
        b.set_insertion_block(header);
        let c = b.create_load_param(p);
        b.create_cond_branch(Value::Inst(c), header, exit);
        b.set_insertion_block(exit);
        let u = b.undefined();
        b.create_return(u);
        lower(&mut m);

        let flags = CompileFlags::default().with_async_break_check(true);
        let bc = generate_module(&m, &flags).unwrap();
        let insts = instructions(bc.global_function().unwrap());
        let checks = insts
            .iter()
            .filter(|(_, i)| matches!(i, Instruction::AsyncBreakCheck))
            .count();
        assert_eq!(checks, 2);
        assert!(matches!(insts[0].1, Instruction::AsyncBreakCheck));
    }

    #[test]
    fn test_debug_locations() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::TopLevel, false);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        b.set_location(SourceLoc::new(3, 7));
        let s = b.string("hi");
        b.create_return(s);
        lower(&mut m);

        let off = generate_module(&m, &CompileFlags::default()).unwrap();
        assert!(off.functions[0].debug_locations.is_empty());
        let on = generate_module(&m, &CompileFlags::default().with_debug(true)).unwrap();
        assert!(on.options.has_debug_info);
        let locs = &on.functions[0].debug_locations;
        assert_eq!(locs.len(), 1);
        assert_eq!((locs[0].offset, locs[0].line, locs[0].column), (0, 3, 7));
    }
}

//! Object and array literal lowering
//!
//! Literal allocations are emitted from literal buffers, which only hold
//! primitives. An object literal keeps its leading run of primitive
//! properties with distinct names in the buffer. From the first computed
//! key, non-primitive value or repeated name on, every property is stored by
//! an explicit define right after the allocation, in source order, so key
//! order and duplicate keys behave as written. A define whose key may
//! already exist gets its key in a register, which selects the overwriting
//! store. Array elements are indexed, so a non-primitive element only leaves
//! a placeholder behind.

use rustc_hash::FxHashSet;

use crate::ir::builder::IRBuilder;
use crate::ir::{FunctionId, InstId, InstKind, Literal, Module, Value};
use crate::opt::Pass;
use crate::stats::PassStats;

/// Can the value live in a literal buffer
pub fn is_buffer_literal(module: &Module, value: Value) -> bool {
    matches!(
        module.as_literal(value),
        Some(
            Literal::Null
                | Literal::Undefined
                | Literal::Bool(_)
                | Literal::Number(_)
                | Literal::String(_)
        )
    )
}

/// Literal allocation lowering pass
#[derive(Debug, Default, Clone, Copy)]
pub struct LowerAllocLiterals;

impl Pass for LowerAllocLiterals {
    fn name(&self) -> &'static str {
        "LowerAllocLiterals"
    }

    fn run(&mut self, module: &mut Module, _stats: &mut PassStats) -> bool {
        let mut changed = false;
        for f in module.functions() {
            changed |= lower_function(module, f);
        }
        changed
    }
}

fn lower_function(module: &mut Module, f: FunctionId) -> bool {
    let mut changed = false;
    for inst in module.function_insts(f) {
        changed |= match module.inst(inst).kind {
            InstKind::AllocObjectLiteral => lower_object(module, inst),
            InstKind::AllocArray => lower_array(module, inst),
            _ => false,
        };
    }
    changed
}

/// Instruction following `inst`
fn next_inst(module: &Module, inst: InstId) -> InstId {
    let block = module.parent_block(inst);
    match module
        .block_insts(block)
        .iter()
        .skip_while(|i| **i != inst)
        .nth(1)
    {
        Some(next) => *next,
        None => unreachable!("allocation %{} ends its block", inst.0),
    }
}

/// Property name of a literal key
fn property_name(module: &Module, key: Value) -> Option<String> {
    match module.as_literal(key)? {
        Literal::String(name) => Some(name.clone()),
        lit => lit.as_array_index().map(|index| index.to_string()),
    }
}

/// Define `key: value` on `alloc` before `before`. A key that may already be
/// present is loaded into a value first.
fn define_after(
    module: &mut Module,
    alloc: InstId,
    before: InstId,
    value: Value,
    key: Value,
    fresh: bool,
) {
    let location = module.inst(alloc).location;
    let literal_key = module.as_literal(key).is_some();
    let mut b = IRBuilder::new(module);
    b.set_insertion_point(before);
    b.set_location(location);
    let key = if literal_key && !fresh {
        Value::Inst(b.create_load_const(key))
    } else {
        key
    };
    b.create_define_own_property(value, Value::Inst(alloc), key, true);
}

fn lower_object(module: &mut Module, alloc: InstId) -> bool {
    let operands = module.inst(alloc).operands().to_vec();
    let mut names: FxHashSet<String> = FxHashSet::default();
    let mut split = None;
    for (index, pair) in operands.chunks(2).enumerate() {
        let (key, value) = (pair[0], pair[1]);
        let name = property_name(module, key).filter(|_| is_buffer_literal(module, key));
        match name {
            Some(name) if is_buffer_literal(module, value) && names.insert(name.clone()) => {}
            _ => {
                split = Some(index);
                break;
            }
        }
    }
    let Some(split) = split else {
        return false;
    };

    let before = next_inst(module, alloc);
    for index in (2 * split..operands.len()).rev() {
        module.remove_operand(alloc, index);
    }
    // Once a computed key is defined, no later name is known to be new.
    let mut known = true;
    for pair in operands[2 * split..].chunks(2) {
        let (key, value) = (pair[0], pair[1]);
        let fresh = match property_name(module, key) {
            Some(name) => known && names.insert(name),
            None => {
                known = false;
                false
            }
        };
        define_after(module, alloc, before, value, key, fresh);
    }
    true
}

fn lower_array(module: &mut Module, alloc: InstId) -> bool {
    let before = next_inst(module, alloc);
    let undefined = module.undefined();
    let mut changed = false;
    for index in 1..module.inst(alloc).num_operands() {
        let value = module.inst(alloc).operand(index);
        if is_buffer_literal(module, value) {
            continue;
        }
        module.set_operand(alloc, index, undefined);
        let key = module.number((index - 1) as f64);
        define_after(module, alloc, before, value, key, true);
        changed = true;
    }
    changed
}

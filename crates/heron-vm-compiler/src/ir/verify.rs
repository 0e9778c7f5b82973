//! Structural IR checks
//!
//! A failure means an earlier pass or the frontend produced malformed IR.
//! The pass manager panics on it.

use super::{FunctionId, InstKind, Module, Value};

/// Verify every function of the module
pub fn verify_module(module: &Module) -> Result<(), String> {
    for f in module.functions() {
        verify_function(module, f)?;
    }
    Ok(())
}

/// Verify one function
pub fn verify_function(module: &Module, f: FunctionId) -> Result<(), String> {
    let func = module.function(f);
    let name = &func.name;
    let Some(entry) = func.entry() else {
        return Err(format!("function '{}' has no blocks", name));
    };
    if !module.predecessors(entry).is_empty() {
        return Err(format!("entry block of '{}' has predecessors", name));
    }

    for &block in func.blocks() {
        let insts = module.block_insts(block);
        if insts.is_empty() {
            return Err(format!("%BB{} in '{}' is empty", block.0, name));
        }
        if module.block(block).parent() != f {
            return Err(format!("%BB{} has the wrong parent", block.0));
        }

        let mut seen_non_phi = false;
        for (pos, &id) in insts.iter().enumerate() {
            let inst = module.inst(id);
            let last = pos + 1 == insts.len();
            if inst.parent() != Some(block) {
                return Err(format!("%{} has the wrong parent block", id.0));
            }
            if inst.kind.is_terminator() != last {
                return Err(format!(
                    "%BB{} in '{}': terminator must be the last instruction (%{})",
                    block.0, name, id.0
                ));
            }
            match inst.kind {
                InstKind::Phi if seen_non_phi => {
                    return Err(format!("phi %{} after a non-phi instruction", id.0));
                }
                InstKind::Phi => {}
                InstKind::Catch if pos != 0 => {
                    return Err(format!("catch %{} is not first in %BB{}", id.0, block.0));
                }
                _ => seen_non_phi = true,
            }

            for op in inst.operands() {
                match *op {
                    Value::Inst(def) => {
                        if !module.is_inst_alive(def) {
                            return Err(format!("%{} uses erased %{}", id.0, def.0));
                        }
                        match module.inst(def).parent() {
                            Some(b) if module.block(b).parent() == f => {}
                            _ => {
                                return Err(format!(
                                    "%{} uses %{} from another function",
                                    id.0, def.0
                                ));
                            }
                        }
                    }
                    Value::Block(b) => {
                        if !module.is_block_alive(b) || module.block(b).parent() != f {
                            return Err(format!("%{} targets foreign block %BB{}", id.0, b.0));
                        }
                    }
                    Value::Param(p) if module.param(p).parent != f => {
                        return Err(format!("%{} uses a foreign parameter", id.0));
                    }
                    Value::Variable(v) if !module.is_variable_alive(v) => {
                        return Err(format!("%{} uses an erased variable", id.0));
                    }
                    _ => {}
                }
            }

            if inst.kind == InstKind::CreateFunction
                && !matches!(inst.operand(1), Value::Inst(_))
            {
                return Err(format!("%{}: closure scope must be an instruction", id.0));
            }
            if inst.kind == InstKind::Phi {
                if inst.num_operands() % 2 != 0 {
                    return Err(format!("phi %{} has an odd operand count", id.0));
                }
                let mut preds = module.predecessors(block);
                let mut incoming: Vec<_> =
                    module.phi_entries(id).into_iter().map(|(_, b)| b).collect();
                preds.sort();
                incoming.sort();
                if preds != incoming {
                    return Err(format!(
                        "phi %{} entries {:?} do not match predecessors {:?}",
                        id.0, incoming, preds
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DefinitionKind;
    use crate::ir::builder::IRBuilder;

    #[test]
    fn test_missing_phi_entry_is_rejected() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::Normal, false);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        let left = b.create_block(f);
        let right = b.create_block(f);
        let join = b.create_block(f);
        b.set_insertion_block(entry);
        let t = b.boolean(true);
        b.create_cond_branch(t, left, right);
        b.set_insertion_block(left);
        b.create_branch(join);
        b.set_insertion_block(right);
        b.create_branch(join);
        b.set_insertion_block(join);
        let one = b.number(1.0);
        let phi = b.create_phi(&[(one, left)]);
        b.create_return(Value::Inst(phi));

        let err = verify_function(&m, f).unwrap_err();
        assert!(err.contains("do not match predecessors"));

        let two = m.number(2.0);
        m.phi_add_entry(phi, two, right);
        assert!(verify_function(&m, f).is_ok());
    }

    #[test]
    fn test_terminator_must_be_last() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::Normal, false);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        b.create_unreachable();
        b.create_get_global_object();
        assert!(verify_function(&m, f).is_err());
    }
}

//! Human-readable module listings

use std::fmt::Write;

use crate::error::Result;
use crate::function::BytecodeFunction;
use crate::instruction::{Instruction, Operand};
use crate::module::BytecodeModule;

/// Disassemble a whole module
pub fn disassemble_module(module: &BytecodeModule) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "; heron bytecode, {} functions, {} strings, global f{}",
        module.functions.len(),
        module.strings.len(),
        module.global_function
    );
    if let Some(parent) = module.lexical_parent {
        let _ = writeln!(out, "; lexical parent f{}", parent);
    }

    if !module.strings.is_empty() {
        let _ = writeln!(out, "\nstrings:");
        for (i, entry) in module.strings.iter().enumerate() {
            let marker = if entry.identifier { "i" } else { " " };
            let _ = writeln!(out, "  s{:<4} {} {:?}", i, marker, entry.value);
        }
    }

    for (i, func) in module.functions.iter().enumerate() {
        out.push('\n');
        let name = module.strings.get(func.header.name).unwrap_or("?");
        disassemble_function(&mut out, i, name, func, module)?;
    }
    Ok(out)
}

fn disassemble_function(
    out: &mut String,
    index: usize,
    name: &str,
    func: &BytecodeFunction,
    module: &BytecodeModule,
) -> Result<()> {
    let h = &func.header;
    let mut flags = Vec::new();
    if h.flags.is_strict {
        flags.push("strict");
    }
    if h.flags.is_generator {
        flags.push("generator");
    }
    if h.flags.is_lazy {
        flags.push("lazy");
    }
    if h.flags.uses_eval {
        flags.push("eval");
    }
    let _ = writeln!(
        out,
        "function f{} {:?} params={} frame={} env={} [{}]",
        index,
        name,
        h.param_count,
        h.frame_size,
        h.environment_size,
        flags.join(" ")
    );

    let instructions = func.instructions()?;
    let targets = collect_jump_targets(&instructions);
    for (offset, inst) in &instructions {
        let marker = if targets.contains(offset) { ">" } else { " " };
        let _ = write!(out, "  {:04} {} {}", offset, marker, inst);
        if let Some(comment) = annotate(*offset, inst, module) {
            let _ = write!(out, "  ; {}", comment);
        }
        out.push('\n');
    }

    let table = func.jump_table();
    if !table.is_empty() {
        let _ = writeln!(out, "  jump table @{}:", func.jump_table_start());
        for (i, entry) in table.iter().enumerate() {
            let _ = writeln!(out, "    [{}] {:+}", i, entry);
        }
    }
    if !func.exception_handlers.is_empty() {
        let _ = writeln!(out, "  handlers:");
        for handler in &func.exception_handlers {
            let _ = writeln!(
                out,
                "    [{:04}, {:04}) -> {:04} depth {}",
                handler.start, handler.end, handler.target, handler.depth
            );
        }
    }
    Ok(())
}

fn collect_jump_targets(instructions: &[(u32, Instruction)]) -> Vec<u32> {
    let mut targets = Vec::new();
    for (offset, inst) in instructions {
        if let Some(jump) = inst.jump_offset() {
            let target = jump.target(*offset) as u32;
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }
    targets
}

fn annotate(offset: u32, inst: &Instruction, module: &BytecodeModule) -> Option<String> {
    if let Some(jump) = inst.jump_offset() {
        return Some(format!("-> {:04}", jump.target(offset)));
    }
    let strings: Vec<String> = inst
        .operands()
        .iter()
        .filter_map(|op| match op {
            Operand::Str(id) => module.strings.get(*id).map(|s| format!("{:?}", s)),
            _ => None,
        })
        .collect();
    if strings.is_empty() {
        None
    } else {
        Some(strings.join(" "))
    }
}

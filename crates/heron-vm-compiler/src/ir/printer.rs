//! Textual IR dump

use std::fmt::Write;

use super::{FunctionId, InstId, InstKind, Literal, Module, Value};

/// Render a whole module
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    for f in module.functions() {
        out.push_str(&print_function(module, f));
        out.push('\n');
    }
    out
}

/// Render one function
pub fn print_function(module: &Module, id: FunctionId) -> String {
    let func = module.function(id);
    let mut out = String::new();
    let params: Vec<String> = func
        .params()
        .iter()
        .map(|p| format!("${}", module.param(*p).name))
        .collect();
    let _ = writeln!(
        out,
        "function {}({}) : {:?}{}",
        func.name,
        params.join(", "),
        func.kind,
        if func.strict { " strict" } else { "" }
    );
    for block in func.blocks() {
        let _ = writeln!(out, "%BB{}:", block.0);
        for inst in module.block_insts(*block) {
            let _ = writeln!(out, "  {}", print_inst(module, *inst));
        }
    }
    out
}

/// Render one instruction
pub fn print_inst(module: &Module, id: InstId) -> String {
    let inst = module.inst(id);
    let name = match inst.kind {
        InstKind::BinaryOperator(op) => format!("BinaryOperator '{}'", op.as_str()),
        InstKind::UnaryOperator(op) => format!("UnaryOperator '{}'", op.as_str()),
        kind => kind.name().to_string(),
    };
    let operands: Vec<String> = inst
        .operands()
        .iter()
        .map(|v| print_value(module, *v))
        .collect();
    let mut line = format!("%{} = {}", id.0, name);
    if !operands.is_empty() {
        line.push(' ');
        line.push_str(&operands.join(", "));
    }
    if !inst.ty.is_empty() {
        let _ = write!(line, " : {:?}", inst.ty);
    }
    line
}

/// Render an operand
pub fn print_value(module: &Module, value: Value) -> String {
    match value {
        Value::Literal(id) => match module.literal_value(id) {
            Literal::Number(n) => format!("{}", n),
            Literal::String(s) => format!("{:?}", s),
            Literal::BigInt(s) => format!("{}n", s),
            Literal::Bool(b) => b.to_string(),
            Literal::Null => "null".to_string(),
            Literal::Undefined => "undefined".to_string(),
            Literal::Empty => "empty".to_string(),
            Literal::GlobalObject => "globalObject".to_string(),
        },
        Value::Inst(id) => format!("%{}", id.0),
        Value::Block(id) => format!("%BB{}", id.0),
        Value::Param(id) => format!("${}", module.param(id).name),
        Value::Function(id) => format!("%{}()", module.function(id).name),
        Value::Variable(id) => format!("[{}]", module.variable(id).name),
        Value::Scope(id) => format!("%VS{}", id.0),
    }
}

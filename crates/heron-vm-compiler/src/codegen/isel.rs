//! Instruction selection
//!
//! Maps every non-terminator IR instruction to at most one bytecode
//! instruction. Control flow is handled by the emitter.

use heron_vm_bytecode::literal::is_int32_representable;
use heron_vm_bytecode::{
    FunctionIndex, Instruction, LiteralValue, Register, StringId, StringTable, serialize_literals,
};
use rustc_hash::FxHashMap;

use super::regalloc::RegisterAllocation;
use crate::error::{CompileError, CompileResult};
use crate::ir::{BinaryOp, FunctionId, InstId, InstKind, Literal, Module, UnaryOp, Value};

/// Fewest cases worth a jump table
pub const MIN_JUMP_TABLE_CASES: usize = 3;
/// Largest jump table, in entries
pub const MAX_JUMP_TABLE_SIZE: u64 = 1024;

/// String table and literal buffers shared by every function of a module
#[derive(Debug, Default)]
pub struct ModuleTables {
    /// String table
    pub strings: StringTable,
    /// Array literal buffer
    pub array_buffer: Vec<u8>,
    /// Object key buffer
    pub object_key_buffer: Vec<u8>,
    /// Object value buffer
    pub object_value_buffer: Vec<u8>,
    array_cache: FxHashMap<Vec<u8>, u32>,
    key_cache: FxHashMap<Vec<u8>, u32>,
    value_cache: FxHashMap<Vec<u8>, u32>,
    /// Bytecode index of every function
    pub function_index: FxHashMap<FunctionId, u32>,
}

#[derive(Clone, Copy)]
enum Buffer {
    Array,
    ObjectKeys,
    ObjectValues,
}

impl ModuleTables {
    fn add_buffer(&mut self, which: Buffer, literals: &[LiteralValue]) -> CompileResult<u32> {
        let mut bytes = Vec::new();
        serialize_literals(
            literals,
            &mut self.strings,
            &mut bytes,
            matches!(which, Buffer::ObjectKeys),
        );
        let (buffer, cache) = match which {
            Buffer::Array => (&mut self.array_buffer, &mut self.array_cache),
            Buffer::ObjectKeys => (&mut self.object_key_buffer, &mut self.key_cache),
            Buffer::ObjectValues => (&mut self.object_value_buffer, &mut self.value_cache),
        };
        if let Some(offset) = cache.get(&bytes) {
            return Ok(*offset);
        }
        let offset = u32::try_from(buffer.len()).map_err(|_| CompileError::LiteralBufferTooLarge)?;
        if u32::try_from(buffer.len() + bytes.len()).is_err() {
            return Err(CompileError::LiteralBufferTooLarge);
        }
        buffer.extend_from_slice(&bytes);
        cache.insert(bytes, offset);
        Ok(offset)
    }

    fn identifier(&mut self, name: &str) -> StringId {
        self.strings.add_identifier(name)
    }
}

/// Load of a literal into `dst`, using the shortest encoding
pub fn load_const(dst: Register, literal: &Literal, strings: &mut StringTable) -> Instruction {
    match literal {
        Literal::Number(n) if *n == 0.0 && !n.is_sign_negative() => Instruction::LoadConstZero { dst },
        Literal::Number(n) if is_int32_representable(*n) && (0.0..=255.0).contains(n) => {
            Instruction::LoadConstUInt8 {
                dst,
                value: *n as u8,
            }
        }
        Literal::Number(n) if is_int32_representable(*n) => Instruction::LoadConstInt {
            dst,
            value: *n as i32,
        },
        Literal::Number(n) => Instruction::LoadConstDouble { dst, value: *n },
        Literal::String(s) => Instruction::LoadConstString {
            dst,
            id: strings.add_string(s),
        },
        Literal::BigInt(digits) => Instruction::LoadConstBigInt {
            dst,
            id: strings.add_string(digits),
        },
        Literal::Bool(true) => Instruction::LoadConstTrue { dst },
        Literal::Bool(false) => Instruction::LoadConstFalse { dst },
        Literal::Null => Instruction::LoadConstNull { dst },
        Literal::Undefined => Instruction::LoadConstUndefined { dst },
        Literal::Empty => Instruction::LoadConstEmpty { dst },
        Literal::GlobalObject => Instruction::GetGlobalObject { dst },
    }
}

/// `(min, max)` of the case values when the switch fits a jump table
pub fn jump_table_range(module: &Module, cases: &[Value]) -> Option<(i32, i32)> {
    if cases.len() < MIN_JUMP_TABLE_CASES {
        return None;
    }
    let mut values = Vec::with_capacity(cases.len());
    for case in cases {
        let n = module.as_literal(*case)?.as_number()?;
        if !is_int32_representable(n) {
            return None;
        }
        values.push(n as i32);
    }
    let min = *values.iter().min()?;
    let max = *values.iter().max()?;
    let size = (max as i64 - min as i64 + 1) as u64;
    (size <= MAX_JUMP_TABLE_SIZE && size <= 2 * cases.len() as u64).then_some((min, max))
}

fn buffer_literal(module: &Module, value: Value) -> LiteralValue {
    match module.as_literal(value) {
        Some(Literal::Null) => LiteralValue::Null,
        Some(Literal::Undefined) => LiteralValue::Undefined,
        Some(Literal::Bool(b)) => LiteralValue::Bool(*b),
        Some(Literal::Number(n)) => LiteralValue::Number(*n),
        Some(Literal::String(s)) => LiteralValue::String(s.clone()),
        _ => unreachable!("{:?} cannot live in a literal buffer", value),
    }
}

fn number_operand(module: &Module, value: Value) -> u32 {
    match module.as_literal(value).and_then(Literal::as_number) {
        Some(n) if n >= 0.0 => n.min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

fn string_operand(module: &Module, value: Value) -> &str {
    match module.as_literal(value).and_then(Literal::as_str) {
        Some(s) => s,
        None => unreachable!("{:?} is not a string literal", value),
    }
}

fn binary(op: BinaryOp, dst: Register, lhs: Register, rhs: Register) -> Instruction {
    use Instruction as I;
    match op {
        BinaryOp::Add => I::Add { dst, lhs, rhs },
        BinaryOp::Sub => I::Sub { dst, lhs, rhs },
        BinaryOp::Mul => I::Mul { dst, lhs, rhs },
        BinaryOp::Div => I::Div { dst, lhs, rhs },
        BinaryOp::Mod => I::Mod { dst, lhs, rhs },
        BinaryOp::Eq => I::Eq { dst, lhs, rhs },
        BinaryOp::NotEq => I::Neq { dst, lhs, rhs },
        BinaryOp::StrictEq => I::StrictEq { dst, lhs, rhs },
        BinaryOp::StrictNotEq => I::StrictNeq { dst, lhs, rhs },
        BinaryOp::Less => I::Less { dst, lhs, rhs },
        BinaryOp::LessEq => I::LessEq { dst, lhs, rhs },
        BinaryOp::Greater => I::Greater { dst, lhs, rhs },
        BinaryOp::GreaterEq => I::GreaterEq { dst, lhs, rhs },
        BinaryOp::BitAnd => I::BitAnd { dst, lhs, rhs },
        BinaryOp::BitOr => I::BitOr { dst, lhs, rhs },
        BinaryOp::BitXor => I::BitXor { dst, lhs, rhs },
        BinaryOp::Shl => I::Shl { dst, lhs, rhs },
        BinaryOp::Shr => I::Shr { dst, lhs, rhs },
        BinaryOp::UShr => I::UShr { dst, lhs, rhs },
    }
}

fn unary(op: UnaryOp, dst: Register, src: Register) -> Instruction {
    use Instruction as I;
    match op {
        UnaryOp::Minus => I::Negate { dst, src },
        UnaryOp::Not => I::Not { dst, src },
        UnaryOp::BitNot => I::BitNot { dst, src },
        UnaryOp::TypeOf => I::TypeOf { dst, src },
        UnaryOp::Void => I::LoadConstUndefined { dst },
        UnaryOp::Inc => I::Inc { dst, src },
        UnaryOp::Dec => I::Dec { dst, src },
    }
}

/// Argument registers of a call; the count must fit its one-byte operand
fn arg_list(
    module: &Module,
    call: InstId,
    regs: &RegisterAllocation,
    args: &[Value],
) -> CompileResult<Vec<Register>> {
    if args.len() > u8::MAX as usize {
        return Err(CompileError::TooManyRegisters {
            function: module.function(module.parent_function(call)).name.clone(),
            needed: args.len(),
        });
    }
    Ok(args.iter().map(|a| regs.reg(*a)).collect())
}

/// Select the bytecode for a non-terminator instruction. Phis and stack
/// allocations produce no code.
pub fn select(
    module: &Module,
    inst: InstId,
    regs: &RegisterAllocation,
    tables: &mut ModuleTables,
) -> CompileResult<Option<Instruction>> {
    use Instruction as I;

    let i = module.inst(inst);
    let ops = i.operands();
    let dst = || match regs.get(inst) {
        Some(r) => r,
        None => unreachable!("%{} has no destination register", inst.0),
    };
    let reg = |index: usize| regs.reg(ops[index]);

    let out = match i.kind {
        InstKind::Phi | InstKind::AllocStack => return Ok(None),
        InstKind::BinaryOperator(op) => binary(op, dst(), reg(0), reg(1)),
        InstKind::UnaryOperator(op) => {
            if op == UnaryOp::Void {
                I::LoadConstUndefined { dst: dst() }
            } else {
                unary(op, dst(), reg(0))
            }
        }
        InstKind::LoadConst => match module.as_literal(ops[0]) {
            Some(lit) => load_const(dst(), lit, &mut tables.strings),
            None => unreachable!("LoadConst of a non-literal"),
        },
        InstKind::GetGlobalObject => I::GetGlobalObject { dst: dst() },
        InstKind::LoadParam => match ops[0] {
            Value::Param(p) => I::LoadParam {
                dst: dst(),
                index: module.param(p).index,
            },
            other => unreachable!("LoadParam of {:?}", other),
        },
        InstKind::LoadStack => I::Mov {
            dst: dst(),
            src: reg(0),
        },
        InstKind::StoreStack => I::Mov {
            dst: reg(1),
            src: reg(0),
        },
        InstKind::CreateScope => {
            let Value::Scope(scope) = ops[0] else {
                unreachable!("CreateScope without a scope descriptor");
            };
            let size = module.scope_size(scope);
            if matches!(module.as_literal(ops[1]), Some(Literal::Empty)) {
                I::CreateTopEnvironment { dst: dst(), size }
            } else {
                I::CreateEnvironment {
                    dst: dst(),
                    parent: reg(1),
                    size,
                }
            }
        }
        InstKind::GetParentScope => I::GetParentEnvironment {
            dst: dst(),
            level: 0,
        },
        InstKind::ResolveScope => I::GetEnvironment {
            dst: dst(),
            env: reg(1),
            level: number_operand(module, ops[2]),
        },
        InstKind::LoadFrame => {
            let Value::Variable(var) = ops[1] else {
                unreachable!("LoadFrame without a variable");
            };
            I::LoadFromEnvironment {
                dst: dst(),
                env: reg(0),
                slot: module.variable(var).index,
            }
        }
        InstKind::StoreFrame => {
            let Value::Variable(var) = ops[2] else {
                unreachable!("StoreFrame without a variable");
            };
            I::StoreToEnvironment {
                env: reg(0),
                slot: module.variable(var).index,
                value: reg(1),
            }
        }
        InstKind::LoadProperty => {
            let (dst, obj) = (dst(), reg(0));
            match module.as_literal(ops[1]) {
                Some(Literal::String(name)) => I::GetById {
                    dst,
                    obj,
                    id: tables.identifier(name),
                },
                Some(lit) if lit.as_array_index().is_some() => I::GetByIndex {
                    dst,
                    obj,
                    index: lit.as_array_index().unwrap_or_default(),
                },
                _ => I::GetByVal {
                    dst,
                    obj,
                    key: reg(1),
                },
            }
        }
        InstKind::TryLoadGlobalProperty => I::TryGetById {
            dst: dst(),
            obj: reg(0),
            id: tables.identifier(string_operand(module, ops[1])),
        },
        InstKind::StoreProperty => match module.as_literal(ops[2]) {
            Some(Literal::String(name)) => I::PutById {
                obj: reg(1),
                value: reg(0),
                id: tables.identifier(name),
            },
            _ => I::PutByVal {
                obj: reg(1),
                key: reg(2),
                value: reg(0),
            },
        },
        InstKind::DefineOwnProperty => {
            let enumerable = module
                .as_literal(ops[3])
                .and_then(Literal::as_bool)
                .unwrap_or(false);
            let key = module.as_literal(ops[2]);
            match key {
                Some(Literal::String(name)) if enumerable => I::PutNewOwnById {
                    obj: reg(1),
                    value: reg(0),
                    id: tables.identifier(name),
                },
                Some(lit) if enumerable && lit.as_array_index().is_some() => I::PutOwnByIndex {
                    obj: reg(1),
                    value: reg(0),
                    index: lit.as_array_index().unwrap_or_default(),
                },
                _ => I::PutOwnByVal {
                    obj: reg(1),
                    value: reg(0),
                    key: reg(2),
                    enumerable: enumerable as u8,
                },
            }
        }
        InstKind::DeleteProperty => I::DelByVal {
            dst: dst(),
            obj: reg(0),
            key: reg(1),
        },
        InstKind::AllocObject => I::NewObject { dst: dst() },
        InstKind::AllocObjectLiteral => {
            if ops.is_empty() {
                I::NewObject { dst: dst() }
            } else {
                let keys: Vec<LiteralValue> =
                    ops.iter().step_by(2).map(|k| buffer_literal(module, *k)).collect();
                let values: Vec<LiteralValue> = ops
                    .iter()
                    .skip(1)
                    .step_by(2)
                    .map(|v| buffer_literal(module, *v))
                    .collect();
                I::NewObjectWithBuffer {
                    dst: dst(),
                    size: keys.len() as u32,
                    key_offset: tables.add_buffer(Buffer::ObjectKeys, &keys)?,
                    value_offset: tables.add_buffer(Buffer::ObjectValues, &values)?,
                }
            }
        }
        InstKind::AllocArray => {
            let size = number_operand(module, ops[0]);
            if ops.len() == 1 {
                I::NewArray { dst: dst(), size }
            } else {
                let elements: Vec<LiteralValue> =
                    ops[1..].iter().map(|e| buffer_literal(module, *e)).collect();
                I::NewArrayWithBuffer {
                    dst: dst(),
                    size: size.max(elements.len() as u32),
                    count: elements.len() as u32,
                    offset: tables.add_buffer(Buffer::Array, &elements)?,
                }
            }
        }
        InstKind::CreateRegExp => I::CreateRegExp {
            dst: dst(),
            pattern: tables.strings.add_string(string_operand(module, ops[0])),
            flags: tables.strings.add_string(string_operand(module, ops[1])),
        },
        InstKind::CreateFunction => {
            let Value::Function(callee) = ops[0] else {
                unreachable!("CreateFunction without a function");
            };
            let Some(index) = tables.function_index.get(&callee) else {
                unreachable!("closure over a function that is not emitted");
            };
            I::CreateClosure {
                dst: dst(),
                env: reg(1),
                function: FunctionIndex(*index),
            }
        }
        InstKind::Call => I::Call {
            dst: dst(),
            callee: reg(0),
            this: reg(1),
            args: arg_list(module, inst, regs, &ops[2..])?,
        },
        InstKind::Construct => I::Construct {
            dst: dst(),
            callee: reg(0),
            this: reg(1),
            args: arg_list(module, inst, regs, &ops[2..])?,
        },
        InstKind::DirectEval => I::DirectEval {
            dst: dst(),
            text: reg(0),
            strict: module
                .as_literal(ops[1])
                .and_then(Literal::as_bool)
                .unwrap_or(false) as u8,
        },
        InstKind::ThrowIfEmpty => I::ThrowIfEmpty {
            dst: dst(),
            src: reg(0),
        },
        InstKind::UnionNarrowTrusted => I::Mov {
            dst: dst(),
            src: reg(0),
        },
        InstKind::StartGenerator => I::StartGenerator,
        InstKind::Catch => I::Catch { dst: dst() },
        kind => unreachable!("{} is selected by the emitter", kind.name()),
    };
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected(n: f64) -> Instruction {
        load_const(Register(0), &Literal::Number(n), &mut StringTable::new())
    }

    #[test]
    fn test_number_encodings() {
        let dst = Register(0);
        assert_eq!(selected(0.0), Instruction::LoadConstZero { dst });
        assert_eq!(selected(255.0), Instruction::LoadConstUInt8 { dst, value: 255 });
        assert_eq!(selected(256.0), Instruction::LoadConstInt { dst, value: 256 });
        assert_eq!(selected(-1.0), Instruction::LoadConstInt { dst, value: -1 });
        assert!(matches!(selected(-0.0), Instruction::LoadConstDouble { value, .. } if value.is_sign_negative()));
        assert!(matches!(selected(0.5), Instruction::LoadConstDouble { .. }));
    }

    #[test]
    fn test_jump_table_density() {
        let mut m = Module::new();
        let dense: Vec<Value> = [3.0, 1.0, 2.0].iter().map(|n| m.number(*n)).collect();
        assert_eq!(jump_table_range(&m, &dense), Some((1, 3)));

        let sparse: Vec<Value> = [0.0, 100.0, 1000.0].iter().map(|n| m.number(*n)).collect();
        assert_eq!(jump_table_range(&m, &sparse), None);

        let neg_zero: Vec<Value> = [-0.0, 1.0, 2.0].iter().map(|n| m.number(*n)).collect();
        assert_eq!(jump_table_range(&m, &neg_zero), None);

        let two: Vec<Value> = [1.0, 2.0].iter().map(|n| m.number(*n)).collect();
        assert_eq!(jump_table_range(&m, &two), None);
    }

    #[test]
    fn test_literal_buffers_deduplicated() {
        let mut tables = ModuleTables::default();
        let elems = [LiteralValue::Number(1.0), LiteralValue::String("a".into())];
        let first = tables.add_buffer(Buffer::Array, &elems).unwrap();
        let len = tables.array_buffer.len();
        let second = tables.add_buffer(Buffer::Array, &elems).unwrap();
        assert_eq!(first, second);
        assert_eq!(tables.array_buffer.len(), len);

        let other = tables
            .add_buffer(Buffer::Array, &[LiteralValue::Null])
            .unwrap();
        assert_eq!(other as usize, len);
    }
}

//! Bytecode instructions (opcodes)
//!
//! Every instruction is encoded as a one byte opcode followed by its operands
//! in declaration order. Registers take one byte, immediates, ids and jump
//! offsets four bytes, doubles eight bytes. Argument lists are a one byte count
//! followed by the registers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bytes::ByteReader;
use crate::error::{BytecodeError, Result};
use crate::operand::{FunctionIndex, JumpOffset, Register, StringId};

/// Bytecode opcodes
///
/// Register-based instruction set. Most instructions take a destination register
/// and one or more source registers/operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Constants ====================
    /// dst = undefined
    LoadConstUndefined = 0x00,
    /// dst = null
    LoadConstNull = 0x01,
    /// dst = true
    LoadConstTrue = 0x02,
    /// dst = false
    LoadConstFalse = 0x03,
    /// dst = +0
    LoadConstZero = 0x04,
    /// dst = the TDZ sentinel
    LoadConstEmpty = 0x05,
    /// dst = imm8 (unsigned)
    LoadConstUInt8 = 0x06,
    /// dst = imm32
    LoadConstInt = 0x07,
    /// dst = double
    LoadConstDouble = 0x08,
    /// dst = strings\[id\]
    LoadConstString = 0x09,
    /// dst = BigInt parsed from strings\[id\]
    LoadConstBigInt = 0x0A,
    /// dst = the global object
    GetGlobalObject = 0x0B,

    // ==================== Registers ====================
    /// dst = src
    Mov = 0x10,
    /// dst = params\[index\], index 0 is `this`
    LoadParam = 0x11,

    // ==================== Environments ====================
    /// dst = new environment without a parent
    CreateTopEnvironment = 0x18,
    /// dst = new environment whose parent is `parent`
    CreateEnvironment = 0x19,
    /// dst = closure environment, walked up `level` parents
    GetParentEnvironment = 0x1A,
    /// dst = `env` walked up `level` parents
    GetEnvironment = 0x1B,
    /// dst = env\[slot\]
    LoadFromEnvironment = 0x1C,
    /// env\[slot\] = value
    StoreToEnvironment = 0x1D,

    // ==================== Arithmetic ====================
    /// dst = lhs + rhs
    Add = 0x20,
    /// dst = lhs - rhs
    Sub = 0x21,
    /// dst = lhs * rhs
    Mul = 0x22,
    /// dst = lhs / rhs
    Div = 0x23,
    /// dst = lhs % rhs
    Mod = 0x24,
    /// dst = -src
    Negate = 0x25,
    /// dst = src + 1
    Inc = 0x26,
    /// dst = src - 1
    Dec = 0x27,

    // ==================== Bitwise ====================
    /// dst = lhs & rhs
    BitAnd = 0x30,
    /// dst = lhs | rhs
    BitOr = 0x31,
    /// dst = lhs ^ rhs
    BitXor = 0x32,
    /// dst = ~src
    BitNot = 0x33,
    /// dst = lhs << rhs
    Shl = 0x34,
    /// dst = lhs >> rhs
    Shr = 0x35,
    /// dst = lhs >>> rhs
    UShr = 0x36,

    // ==================== Comparison ====================
    /// dst = lhs == rhs
    Eq = 0x40,
    /// dst = lhs === rhs
    StrictEq = 0x41,
    /// dst = lhs != rhs
    Neq = 0x42,
    /// dst = lhs !== rhs
    StrictNeq = 0x43,
    /// dst = lhs < rhs
    Less = 0x44,
    /// dst = lhs <= rhs
    LessEq = 0x45,
    /// dst = lhs > rhs
    Greater = 0x46,
    /// dst = lhs >= rhs
    GreaterEq = 0x47,

    // ==================== Logical / Type ====================
    /// dst = !src
    Not = 0x50,
    /// dst = typeof src
    TypeOf = 0x51,
    /// Throw a ReferenceError if src is the TDZ sentinel, else dst = src
    ThrowIfEmpty = 0x52,

    // ==================== Objects ====================
    /// dst = {}
    NewObject = 0x60,
    /// dst = object built from the key and value literal buffers
    NewObjectWithBuffer = 0x61,
    /// dst = new Array(size)
    NewArray = 0x62,
    /// dst = array built from the array literal buffer
    NewArrayWithBuffer = 0x63,
    /// dst = obj\[strings\[id\]\]
    GetById = 0x64,
    /// Same as GetById, but throws a ReferenceError when the property is missing
    TryGetById = 0x65,
    /// dst = obj\[index\]
    GetByIndex = 0x66,
    /// dst = obj\[key\]
    GetByVal = 0x67,
    /// obj\[strings\[id\]\] = value
    PutById = 0x68,
    /// obj\[key\] = value
    PutByVal = 0x69,
    /// Define own enumerable obj\[index\] = value
    PutOwnByIndex = 0x6A,
    /// Define new own enumerable obj\[strings\[id\]\] = value
    PutNewOwnById = 0x6B,
    /// Define own obj\[key\] = value
    PutOwnByVal = 0x6C,
    /// dst = delete obj\[key\]
    DelByVal = 0x6D,
    /// dst = /pattern/flags
    CreateRegExp = 0x6E,

    // ==================== Functions ====================
    /// dst = closure over `env` for function table entry
    CreateClosure = 0x80,
    /// dst = callee.call(this, ...args)
    Call = 0x81,
    /// dst = new callee(...args)
    Construct = 0x82,
    /// dst = eval(text) in the current scope
    DirectEval = 0x83,
    /// Generator prologue
    StartGenerator = 0x84,

    // ==================== Control Flow ====================
    /// Unconditional jump
    Jmp = 0x90,
    /// Jump when cond is truthy
    JmpTrue = 0x91,
    /// Jump when cond is falsy
    JmpFalse = 0x92,
    /// Dense integer switch through the function's jump table
    SwitchImm = 0x93,
    /// Return value
    Ret = 0x94,
    /// Throw value
    Throw = 0x95,
    /// dst = the exception being handled
    Catch = 0x96,
    /// Trap: control must never get here
    Unreachable = 0x97,
    /// Cooperative preemption point
    AsyncBreakCheck = 0x98,
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            0x00 => LoadConstUndefined,
            0x01 => LoadConstNull,
            0x02 => LoadConstTrue,
            0x03 => LoadConstFalse,
            0x04 => LoadConstZero,
            0x05 => LoadConstEmpty,
            0x06 => LoadConstUInt8,
            0x07 => LoadConstInt,
            0x08 => LoadConstDouble,
            0x09 => LoadConstString,
            0x0A => LoadConstBigInt,
            0x0B => GetGlobalObject,
            0x10 => Mov,
            0x11 => LoadParam,
            0x18 => CreateTopEnvironment,
            0x19 => CreateEnvironment,
            0x1A => GetParentEnvironment,
            0x1B => GetEnvironment,
            0x1C => LoadFromEnvironment,
            0x1D => StoreToEnvironment,
            0x20 => Add,
            0x21 => Sub,
            0x22 => Mul,
            0x23 => Div,
            0x24 => Mod,
            0x25 => Negate,
            0x26 => Inc,
            0x27 => Dec,
            0x30 => BitAnd,
            0x31 => BitOr,
            0x32 => BitXor,
            0x33 => BitNot,
            0x34 => Shl,
            0x35 => Shr,
            0x36 => UShr,
            0x40 => Eq,
            0x41 => StrictEq,
            0x42 => Neq,
            0x43 => StrictNeq,
            0x44 => Less,
            0x45 => LessEq,
            0x46 => Greater,
            0x47 => GreaterEq,
            0x50 => Not,
            0x51 => TypeOf,
            0x52 => ThrowIfEmpty,
            0x60 => NewObject,
            0x61 => NewObjectWithBuffer,
            0x62 => NewArray,
            0x63 => NewArrayWithBuffer,
            0x64 => GetById,
            0x65 => TryGetById,
            0x66 => GetByIndex,
            0x67 => GetByVal,
            0x68 => PutById,
            0x69 => PutByVal,
            0x6A => PutOwnByIndex,
            0x6B => PutNewOwnById,
            0x6C => PutOwnByVal,
            0x6D => DelByVal,
            0x6E => CreateRegExp,
            0x80 => CreateClosure,
            0x81 => Call,
            0x82 => Construct,
            0x83 => DirectEval,
            0x84 => StartGenerator,
            0x90 => Jmp,
            0x91 => JmpTrue,
            0x92 => JmpFalse,
            0x93 => SwitchImm,
            0x94 => Ret,
            0x95 => Throw,
            0x96 => Catch,
            0x97 => Unreachable,
            0x98 => AsyncBreakCheck,
            _ => return None,
        })
    }

    /// Get opcode byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Opcode name as printed by the disassembler
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            LoadConstUndefined => "LoadConstUndefined",
            LoadConstNull => "LoadConstNull",
            LoadConstTrue => "LoadConstTrue",
            LoadConstFalse => "LoadConstFalse",
            LoadConstZero => "LoadConstZero",
            LoadConstEmpty => "LoadConstEmpty",
            LoadConstUInt8 => "LoadConstUInt8",
            LoadConstInt => "LoadConstInt",
            LoadConstDouble => "LoadConstDouble",
            LoadConstString => "LoadConstString",
            LoadConstBigInt => "LoadConstBigInt",
            GetGlobalObject => "GetGlobalObject",
            Mov => "Mov",
            LoadParam => "LoadParam",
            CreateTopEnvironment => "CreateTopEnvironment",
            CreateEnvironment => "CreateEnvironment",
            GetParentEnvironment => "GetParentEnvironment",
            GetEnvironment => "GetEnvironment",
            LoadFromEnvironment => "LoadFromEnvironment",
            StoreToEnvironment => "StoreToEnvironment",
            Add => "Add",
            Sub => "Sub",
            Mul => "Mul",
            Div => "Div",
            Mod => "Mod",
            Negate => "Negate",
            Inc => "Inc",
            Dec => "Dec",
            BitAnd => "BitAnd",
            BitOr => "BitOr",
            BitXor => "BitXor",
            BitNot => "BitNot",
            Shl => "Shl",
            Shr => "Shr",
            UShr => "UShr",
            Eq => "Eq",
            StrictEq => "StrictEq",
            Neq => "Neq",
            StrictNeq => "StrictNeq",
            Less => "Less",
            LessEq => "LessEq",
            Greater => "Greater",
            GreaterEq => "GreaterEq",
            Not => "Not",
            TypeOf => "TypeOf",
            ThrowIfEmpty => "ThrowIfEmpty",
            NewObject => "NewObject",
            NewObjectWithBuffer => "NewObjectWithBuffer",
            NewArray => "NewArray",
            NewArrayWithBuffer => "NewArrayWithBuffer",
            GetById => "GetById",
            TryGetById => "TryGetById",
            GetByIndex => "GetByIndex",
            GetByVal => "GetByVal",
            PutById => "PutById",
            PutByVal => "PutByVal",
            PutOwnByIndex => "PutOwnByIndex",
            PutNewOwnById => "PutNewOwnById",
            PutOwnByVal => "PutOwnByVal",
            DelByVal => "DelByVal",
            CreateRegExp => "CreateRegExp",
            CreateClosure => "CreateClosure",
            Call => "Call",
            Construct => "Construct",
            DirectEval => "DirectEval",
            StartGenerator => "StartGenerator",
            Jmp => "Jmp",
            JmpTrue => "JmpTrue",
            JmpFalse => "JmpFalse",
            SwitchImm => "SwitchImm",
            Ret => "Ret",
            Throw => "Throw",
            Catch => "Catch",
            Unreachable => "Unreachable",
            AsyncBreakCheck => "AsyncBreakCheck",
        }
    }
}

/// A decoded operand, used for encoding and printing
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Register
    Reg(Register),
    /// Unsigned 8-bit immediate
    UImm8(u8),
    /// Unsigned 32-bit immediate
    UImm32(u32),
    /// Signed 32-bit immediate
    Imm32(i32),
    /// Double immediate
    Double(f64),
    /// String table id
    Str(StringId),
    /// Function table index
    Func(FunctionIndex),
    /// Relative jump
    Jump(JumpOffset),
    /// Counted register list
    RegList(Vec<Register>),
}

impl Operand {
    /// Encoded width in bytes
    pub fn width(&self) -> usize {
        match self {
            Operand::Reg(_) | Operand::UImm8(_) => 1,
            Operand::UImm32(_)
            | Operand::Imm32(_)
            | Operand::Str(_)
            | Operand::Func(_)
            | Operand::Jump(_) => 4,
            Operand::Double(_) => 8,
            Operand::RegList(regs) => 1 + regs.len(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Operand::Reg(r) => out.push(r.0),
            Operand::UImm8(v) => out.push(*v),
            Operand::UImm32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Operand::Imm32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Operand::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            Operand::Str(id) => out.extend_from_slice(&id.0.to_le_bytes()),
            Operand::Func(f) => out.extend_from_slice(&f.0.to_le_bytes()),
            Operand::Jump(j) => out.extend_from_slice(&j.0.to_le_bytes()),
            Operand::RegList(regs) => {
                out.push(regs.len() as u8);
                out.extend(regs.iter().map(|r| r.0));
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "r{}", r.0),
            Operand::UImm8(v) => write!(f, "{}", v),
            Operand::UImm32(v) => write!(f, "{}", v),
            Operand::Imm32(v) => write!(f, "{}", v),
            Operand::Double(v) => write!(f, "{:?}", v),
            Operand::Str(id) => write!(f, "s{}", id.0),
            Operand::Func(idx) => write!(f, "f{}", idx.0),
            Operand::Jump(j) => write!(f, "{:+}", j.0),
            Operand::RegList(regs) => {
                write!(f, "[")?;
                for (i, r) in regs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "r{}", r.0)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Bytecode instruction with operands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Instruction {
    // ==================== Constants ====================
    /// dst = undefined
    LoadConstUndefined { dst: Register },
    /// dst = null
    LoadConstNull { dst: Register },
    /// dst = true
    LoadConstTrue { dst: Register },
    /// dst = false
    LoadConstFalse { dst: Register },
    /// dst = +0
    LoadConstZero { dst: Register },
    /// dst = empty
    LoadConstEmpty { dst: Register },
    /// dst = value
    LoadConstUInt8 { dst: Register, value: u8 },
    /// dst = value
    LoadConstInt { dst: Register, value: i32 },
    /// dst = value
    LoadConstDouble { dst: Register, value: f64 },
    /// dst = strings\[id\]
    LoadConstString { dst: Register, id: StringId },
    /// dst = BigInt(strings\[id\])
    LoadConstBigInt { dst: Register, id: StringId },
    /// dst = global object
    GetGlobalObject { dst: Register },

    // ==================== Registers ====================
    /// dst = src
    Mov { dst: Register, src: Register },
    /// dst = params\[index\]
    LoadParam { dst: Register, index: u32 },

    // ==================== Environments ====================
    /// dst = new root environment
    CreateTopEnvironment { dst: Register, size: u32 },
    /// dst = new environment under parent
    CreateEnvironment { dst: Register, parent: Register, size: u32 },
    /// dst = closure environment walked up `level` times
    GetParentEnvironment { dst: Register, level: u32 },
    /// dst = env walked up `level` times
    GetEnvironment { dst: Register, env: Register, level: u32 },
    /// dst = env\[slot\]
    LoadFromEnvironment { dst: Register, env: Register, slot: u32 },
    /// env\[slot\] = value
    StoreToEnvironment { env: Register, slot: u32, value: Register },

    // ==================== Binary operators ====================
    /// dst = lhs + rhs
    Add { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs - rhs
    Sub { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs * rhs
    Mul { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs / rhs
    Div { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs % rhs
    Mod { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs & rhs
    BitAnd { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs | rhs
    BitOr { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs ^ rhs
    BitXor { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs << rhs
    Shl { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs >> rhs
    Shr { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs >>> rhs
    UShr { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs == rhs
    Eq { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs === rhs
    StrictEq { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs != rhs
    Neq { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs !== rhs
    StrictNeq { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs < rhs
    Less { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs <= rhs
    LessEq { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs > rhs
    Greater { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs >= rhs
    GreaterEq { dst: Register, lhs: Register, rhs: Register },

    // ==================== Unary operators ====================
    /// dst = -src
    Negate { dst: Register, src: Register },
    /// dst = src + 1
    Inc { dst: Register, src: Register },
    /// dst = src - 1
    Dec { dst: Register, src: Register },
    /// dst = ~src
    BitNot { dst: Register, src: Register },
    /// dst = !src
    Not { dst: Register, src: Register },
    /// dst = typeof src
    TypeOf { dst: Register, src: Register },
    /// TDZ check
    ThrowIfEmpty { dst: Register, src: Register },

    // ==================== Objects ====================
    /// dst = {}
    NewObject { dst: Register },
    /// dst = object from literal buffers
    NewObjectWithBuffer {
        dst: Register,
        size: u32,
        key_offset: u32,
        value_offset: u32,
    },
    /// dst = new Array(size)
    NewArray { dst: Register, size: u32 },
    /// dst = array from the array buffer
    NewArrayWithBuffer {
        dst: Register,
        size: u32,
        count: u32,
        offset: u32,
    },
    /// dst = obj.id
    GetById { dst: Register, obj: Register, id: StringId },
    /// dst = obj.id, throwing when missing
    TryGetById { dst: Register, obj: Register, id: StringId },
    /// dst = obj\[index\]
    GetByIndex { dst: Register, obj: Register, index: u32 },
    /// dst = obj\[key\]
    GetByVal { dst: Register, obj: Register, key: Register },
    /// obj.id = value
    PutById { obj: Register, value: Register, id: StringId },
    /// obj\[key\] = value
    PutByVal { obj: Register, key: Register, value: Register },
    /// Define obj\[index\] = value
    PutOwnByIndex { obj: Register, value: Register, index: u32 },
    /// Define obj.id = value
    PutNewOwnById { obj: Register, value: Register, id: StringId },
    /// Define obj\[key\] = value
    PutOwnByVal {
        obj: Register,
        value: Register,
        key: Register,
        enumerable: u8,
    },
    /// dst = delete obj\[key\]
    DelByVal { dst: Register, obj: Register, key: Register },
    /// dst = regexp literal
    CreateRegExp {
        dst: Register,
        pattern: StringId,
        flags: StringId,
    },

    // ==================== Functions ====================
    /// dst = closure
    CreateClosure {
        dst: Register,
        env: Register,
        function: FunctionIndex,
    },
    /// dst = callee.call(this, ...args)
    Call {
        dst: Register,
        callee: Register,
        this: Register,
        args: Vec<Register>,
    },
    /// dst = new callee(...args)
    Construct {
        dst: Register,
        callee: Register,
        this: Register,
        args: Vec<Register>,
    },
    /// dst = eval(text)
    DirectEval { dst: Register, text: Register, strict: u8 },
    /// Generator prologue
    StartGenerator,

    // ==================== Control Flow ====================
    /// Unconditional jump
    Jmp { offset: JumpOffset },
    /// Jump if cond is truthy
    JmpTrue { offset: JumpOffset, cond: Register },
    /// Jump if cond is falsy
    JmpFalse { offset: JumpOffset, cond: Register },
    /// Jump through the jump table entry for `value - min`, or to `default`
    /// when `value` is not an int32 in `min..=max`. `table` is the byte offset
    /// of the first entry from the start of the jump table region.
    SwitchImm {
        value: Register,
        table: u32,
        default: JumpOffset,
        min: i32,
        max: i32,
    },
    /// Return
    Ret { value: Register },
    /// Throw
    Throw { value: Register },
    /// dst = caught exception
    Catch { dst: Register },
    /// Unreachable trap
    Unreachable,
    /// Preemption check
    AsyncBreakCheck,
}

impl Instruction {
    /// Get the opcode for this instruction
    pub fn opcode(&self) -> Opcode {
        use Instruction as I;
        match self {
            I::LoadConstUndefined { .. } => Opcode::LoadConstUndefined,
            I::LoadConstNull { .. } => Opcode::LoadConstNull,
            I::LoadConstTrue { .. } => Opcode::LoadConstTrue,
            I::LoadConstFalse { .. } => Opcode::LoadConstFalse,
            I::LoadConstZero { .. } => Opcode::LoadConstZero,
            I::LoadConstEmpty { .. } => Opcode::LoadConstEmpty,
            I::LoadConstUInt8 { .. } => Opcode::LoadConstUInt8,
            I::LoadConstInt { .. } => Opcode::LoadConstInt,
            I::LoadConstDouble { .. } => Opcode::LoadConstDouble,
            I::LoadConstString { .. } => Opcode::LoadConstString,
            I::LoadConstBigInt { .. } => Opcode::LoadConstBigInt,
            I::GetGlobalObject { .. } => Opcode::GetGlobalObject,
            I::Mov { .. } => Opcode::Mov,
            I::LoadParam { .. } => Opcode::LoadParam,
            I::CreateTopEnvironment { .. } => Opcode::CreateTopEnvironment,
            I::CreateEnvironment { .. } => Opcode::CreateEnvironment,
            I::GetParentEnvironment { .. } => Opcode::GetParentEnvironment,
            I::GetEnvironment { .. } => Opcode::GetEnvironment,
            I::LoadFromEnvironment { .. } => Opcode::LoadFromEnvironment,
            I::StoreToEnvironment { .. } => Opcode::StoreToEnvironment,
            I::Add { .. } => Opcode::Add,
            I::Sub { .. } => Opcode::Sub,
            I::Mul { .. } => Opcode::Mul,
            I::Div { .. } => Opcode::Div,
            I::Mod { .. } => Opcode::Mod,
            I::BitAnd { .. } => Opcode::BitAnd,
            I::BitOr { .. } => Opcode::BitOr,
            I::BitXor { .. } => Opcode::BitXor,
            I::Shl { .. } => Opcode::Shl,
            I::Shr { .. } => Opcode::Shr,
            I::UShr { .. } => Opcode::UShr,
            I::Eq { .. } => Opcode::Eq,
            I::StrictEq { .. } => Opcode::StrictEq,
            I::Neq { .. } => Opcode::Neq,
            I::StrictNeq { .. } => Opcode::StrictNeq,
            I::Less { .. } => Opcode::Less,
            I::LessEq { .. } => Opcode::LessEq,
            I::Greater { .. } => Opcode::Greater,
            I::GreaterEq { .. } => Opcode::GreaterEq,
            I::Negate { .. } => Opcode::Negate,
            I::Inc { .. } => Opcode::Inc,
            I::Dec { .. } => Opcode::Dec,
            I::BitNot { .. } => Opcode::BitNot,
            I::Not { .. } => Opcode::Not,
            I::TypeOf { .. } => Opcode::TypeOf,
            I::ThrowIfEmpty { .. } => Opcode::ThrowIfEmpty,
            I::NewObject { .. } => Opcode::NewObject,
            I::NewObjectWithBuffer { .. } => Opcode::NewObjectWithBuffer,
            I::NewArray { .. } => Opcode::NewArray,
            I::NewArrayWithBuffer { .. } => Opcode::NewArrayWithBuffer,
            I::GetById { .. } => Opcode::GetById,
            I::TryGetById { .. } => Opcode::TryGetById,
            I::GetByIndex { .. } => Opcode::GetByIndex,
            I::GetByVal { .. } => Opcode::GetByVal,
            I::PutById { .. } => Opcode::PutById,
            I::PutByVal { .. } => Opcode::PutByVal,
            I::PutOwnByIndex { .. } => Opcode::PutOwnByIndex,
            I::PutNewOwnById { .. } => Opcode::PutNewOwnById,
            I::PutOwnByVal { .. } => Opcode::PutOwnByVal,
            I::DelByVal { .. } => Opcode::DelByVal,
            I::CreateRegExp { .. } => Opcode::CreateRegExp,
            I::CreateClosure { .. } => Opcode::CreateClosure,
            I::Call { .. } => Opcode::Call,
            I::Construct { .. } => Opcode::Construct,
            I::DirectEval { .. } => Opcode::DirectEval,
            I::StartGenerator => Opcode::StartGenerator,
            I::Jmp { .. } => Opcode::Jmp,
            I::JmpTrue { .. } => Opcode::JmpTrue,
            I::JmpFalse { .. } => Opcode::JmpFalse,
            I::SwitchImm { .. } => Opcode::SwitchImm,
            I::Ret { .. } => Opcode::Ret,
            I::Throw { .. } => Opcode::Throw,
            I::Catch { .. } => Opcode::Catch,
            I::Unreachable => Opcode::Unreachable,
            I::AsyncBreakCheck => Opcode::AsyncBreakCheck,
        }
    }

    /// Operands in encoding order
    pub fn operands(&self) -> Vec<Operand> {
        use Instruction as I;
        use Operand::*;
        match self {
            I::LoadConstUndefined { dst }
            | I::LoadConstNull { dst }
            | I::LoadConstTrue { dst }
            | I::LoadConstFalse { dst }
            | I::LoadConstZero { dst }
            | I::LoadConstEmpty { dst }
            | I::GetGlobalObject { dst }
            | I::NewObject { dst }
            | I::Catch { dst } => vec![Reg(*dst)],
            I::LoadConstUInt8 { dst, value } => vec![Reg(*dst), UImm8(*value)],
            I::LoadConstInt { dst, value } => vec![Reg(*dst), Imm32(*value)],
            I::LoadConstDouble { dst, value } => vec![Reg(*dst), Double(*value)],
            I::LoadConstString { dst, id } | I::LoadConstBigInt { dst, id } => {
                vec![Reg(*dst), Str(*id)]
            }
            I::Mov { dst, src } => vec![Reg(*dst), Reg(*src)],
            I::LoadParam { dst, index } => vec![Reg(*dst), UImm32(*index)],
            I::CreateTopEnvironment { dst, size } => vec![Reg(*dst), UImm32(*size)],
            I::CreateEnvironment { dst, parent, size } => {
                vec![Reg(*dst), Reg(*parent), UImm32(*size)]
            }
            I::GetParentEnvironment { dst, level } => vec![Reg(*dst), UImm32(*level)],
            I::GetEnvironment { dst, env, level } => {
                vec![Reg(*dst), Reg(*env), UImm32(*level)]
            }
            I::LoadFromEnvironment { dst, env, slot } => {
                vec![Reg(*dst), Reg(*env), UImm32(*slot)]
            }
            I::StoreToEnvironment { env, slot, value } => {
                vec![Reg(*env), UImm32(*slot), Reg(*value)]
            }
            I::Add { dst, lhs, rhs }
            | I::Sub { dst, lhs, rhs }
            | I::Mul { dst, lhs, rhs }
            | I::Div { dst, lhs, rhs }
            | I::Mod { dst, lhs, rhs }
            | I::BitAnd { dst, lhs, rhs }
            | I::BitOr { dst, lhs, rhs }
            | I::BitXor { dst, lhs, rhs }
            | I::Shl { dst, lhs, rhs }
            | I::Shr { dst, lhs, rhs }
            | I::UShr { dst, lhs, rhs }
            | I::Eq { dst, lhs, rhs }
            | I::StrictEq { dst, lhs, rhs }
            | I::Neq { dst, lhs, rhs }
            | I::StrictNeq { dst, lhs, rhs }
            | I::Less { dst, lhs, rhs }
            | I::LessEq { dst, lhs, rhs }
            | I::Greater { dst, lhs, rhs }
            | I::GreaterEq { dst, lhs, rhs } => vec![Reg(*dst), Reg(*lhs), Reg(*rhs)],
            I::Negate { dst, src }
            | I::Inc { dst, src }
            | I::Dec { dst, src }
            | I::BitNot { dst, src }
            | I::Not { dst, src }
            | I::TypeOf { dst, src }
            | I::ThrowIfEmpty { dst, src } => vec![Reg(*dst), Reg(*src)],
            I::NewObjectWithBuffer {
                dst,
                size,
                key_offset,
                value_offset,
            } => vec![
                Reg(*dst),
                UImm32(*size),
                UImm32(*key_offset),
                UImm32(*value_offset),
            ],
            I::NewArray { dst, size } => vec![Reg(*dst), UImm32(*size)],
            I::NewArrayWithBuffer {
                dst,
                size,
                count,
                offset,
            } => vec![Reg(*dst), UImm32(*size), UImm32(*count), UImm32(*offset)],
            I::GetById { dst, obj, id } | I::TryGetById { dst, obj, id } => {
                vec![Reg(*dst), Reg(*obj), Str(*id)]
            }
            I::GetByIndex { dst, obj, index } => vec![Reg(*dst), Reg(*obj), UImm32(*index)],
            I::GetByVal { dst, obj, key } | I::DelByVal { dst, obj, key } => {
                vec![Reg(*dst), Reg(*obj), Reg(*key)]
            }
            I::PutById { obj, value, id } | I::PutNewOwnById { obj, value, id } => {
                vec![Reg(*obj), Reg(*value), Str(*id)]
            }
            I::PutByVal { obj, key, value } => vec![Reg(*obj), Reg(*key), Reg(*value)],
            I::PutOwnByIndex { obj, value, index } => {
                vec![Reg(*obj), Reg(*value), UImm32(*index)]
            }
            I::PutOwnByVal {
                obj,
                value,
                key,
                enumerable,
            } => vec![Reg(*obj), Reg(*value), Reg(*key), UImm8(*enumerable)],
            I::CreateRegExp {
                dst,
                pattern,
                flags,
            } => vec![Reg(*dst), Str(*pattern), Str(*flags)],
            I::CreateClosure { dst, env, function } => {
                vec![Reg(*dst), Reg(*env), Func(*function)]
            }
            I::Call {
                dst,
                callee,
                this,
                args,
            }
            | I::Construct {
                dst,
                callee,
                this,
                args,
            } => vec![Reg(*dst), Reg(*callee), Reg(*this), RegList(args.clone())],
            I::DirectEval { dst, text, strict } => vec![Reg(*dst), Reg(*text), UImm8(*strict)],
            I::StartGenerator | I::Unreachable | I::AsyncBreakCheck => Vec::new(),
            I::Jmp { offset } => vec![Jump(*offset)],
            I::JmpTrue { offset, cond } | I::JmpFalse { offset, cond } => {
                vec![Jump(*offset), Reg(*cond)]
            }
            I::SwitchImm {
                value,
                table,
                default,
                min,
                max,
            } => vec![
                Reg(*value),
                UImm32(*table),
                Jump(*default),
                Imm32(*min),
                Imm32(*max),
            ],
            I::Ret { value } | I::Throw { value } => vec![Reg(*value)],
        }
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        1 + self.operands().iter().map(Operand::width).sum::<usize>()
    }

    /// Append the encoding of this instruction to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode().to_byte());
        for operand in self.operands() {
            operand.encode(out);
        }
    }

    /// Decode one instruction at `offset`, returning it with its size
    pub fn decode(bytes: &[u8], offset: usize) -> Result<(Instruction, usize)> {
        use Instruction as I;
        let mut r = ByteReader::at(bytes, offset);
        let byte = r.u8()?;
        let opcode = Opcode::from_byte(byte).ok_or(BytecodeError::InvalidOpcode {
            opcode: byte,
            offset,
        })?;

        let reg = |r: &mut ByteReader<'_>| r.u8().map(Register);
        let string = |r: &mut ByteReader<'_>| r.u32().map(StringId);
        let jump = |r: &mut ByteReader<'_>| r.i32().map(JumpOffset);

        let inst = match opcode {
            Opcode::LoadConstUndefined => I::LoadConstUndefined { dst: reg(&mut r)? },
            Opcode::LoadConstNull => I::LoadConstNull { dst: reg(&mut r)? },
            Opcode::LoadConstTrue => I::LoadConstTrue { dst: reg(&mut r)? },
            Opcode::LoadConstFalse => I::LoadConstFalse { dst: reg(&mut r)? },
            Opcode::LoadConstZero => I::LoadConstZero { dst: reg(&mut r)? },
            Opcode::LoadConstEmpty => I::LoadConstEmpty { dst: reg(&mut r)? },
            Opcode::LoadConstUInt8 => I::LoadConstUInt8 {
                dst: reg(&mut r)?,
                value: r.u8()?,
            },
            Opcode::LoadConstInt => I::LoadConstInt {
                dst: reg(&mut r)?,
                value: r.i32()?,
            },
            Opcode::LoadConstDouble => I::LoadConstDouble {
                dst: reg(&mut r)?,
                value: r.f64()?,
            },
            Opcode::LoadConstString => I::LoadConstString {
                dst: reg(&mut r)?,
                id: string(&mut r)?,
            },
            Opcode::LoadConstBigInt => I::LoadConstBigInt {
                dst: reg(&mut r)?,
                id: string(&mut r)?,
            },
            Opcode::GetGlobalObject => I::GetGlobalObject { dst: reg(&mut r)? },
            Opcode::Mov => I::Mov {
                dst: reg(&mut r)?,
                src: reg(&mut r)?,
            },
            Opcode::LoadParam => I::LoadParam {
                dst: reg(&mut r)?,
                index: r.u32()?,
            },
            Opcode::CreateTopEnvironment => I::CreateTopEnvironment {
                dst: reg(&mut r)?,
                size: r.u32()?,
            },
            Opcode::CreateEnvironment => I::CreateEnvironment {
                dst: reg(&mut r)?,
                parent: reg(&mut r)?,
                size: r.u32()?,
            },
            Opcode::GetParentEnvironment => I::GetParentEnvironment {
                dst: reg(&mut r)?,
                level: r.u32()?,
            },
            Opcode::GetEnvironment => I::GetEnvironment {
                dst: reg(&mut r)?,
                env: reg(&mut r)?,
                level: r.u32()?,
            },
            Opcode::LoadFromEnvironment => I::LoadFromEnvironment {
                dst: reg(&mut r)?,
                env: reg(&mut r)?,
                slot: r.u32()?,
            },
            Opcode::StoreToEnvironment => I::StoreToEnvironment {
                env: reg(&mut r)?,
                slot: r.u32()?,
                value: reg(&mut r)?,
            },
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::UShr
            | Opcode::Eq
            | Opcode::StrictEq
            | Opcode::Neq
            | Opcode::StrictNeq
            | Opcode::Less
            | Opcode::LessEq
            | Opcode::Greater
            | Opcode::GreaterEq => {
                let (dst, lhs, rhs) = (reg(&mut r)?, reg(&mut r)?, reg(&mut r)?);
                binary(opcode, dst, lhs, rhs)
            }
            Opcode::Negate
            | Opcode::Inc
            | Opcode::Dec
            | Opcode::BitNot
            | Opcode::Not
            | Opcode::TypeOf
            | Opcode::ThrowIfEmpty => {
                let (dst, src) = (reg(&mut r)?, reg(&mut r)?);
                unary(opcode, dst, src)
            }
            Opcode::NewObject => I::NewObject { dst: reg(&mut r)? },
            Opcode::NewObjectWithBuffer => I::NewObjectWithBuffer {
                dst: reg(&mut r)?,
                size: r.u32()?,
                key_offset: r.u32()?,
                value_offset: r.u32()?,
            },
            Opcode::NewArray => I::NewArray {
                dst: reg(&mut r)?,
                size: r.u32()?,
            },
            Opcode::NewArrayWithBuffer => I::NewArrayWithBuffer {
                dst: reg(&mut r)?,
                size: r.u32()?,
                count: r.u32()?,
                offset: r.u32()?,
            },
            Opcode::GetById => I::GetById {
                dst: reg(&mut r)?,
                obj: reg(&mut r)?,
                id: string(&mut r)?,
            },
            Opcode::TryGetById => I::TryGetById {
                dst: reg(&mut r)?,
                obj: reg(&mut r)?,
                id: string(&mut r)?,
            },
            Opcode::GetByIndex => I::GetByIndex {
                dst: reg(&mut r)?,
                obj: reg(&mut r)?,
                index: r.u32()?,
            },
            Opcode::GetByVal => I::GetByVal {
                dst: reg(&mut r)?,
                obj: reg(&mut r)?,
                key: reg(&mut r)?,
            },
            Opcode::PutById => I::PutById {
                obj: reg(&mut r)?,
                value: reg(&mut r)?,
                id: string(&mut r)?,
            },
            Opcode::PutByVal => I::PutByVal {
                obj: reg(&mut r)?,
                key: reg(&mut r)?,
                value: reg(&mut r)?,
            },
            Opcode::PutOwnByIndex => I::PutOwnByIndex {
                obj: reg(&mut r)?,
                value: reg(&mut r)?,
                index: r.u32()?,
            },
            Opcode::PutNewOwnById => I::PutNewOwnById {
                obj: reg(&mut r)?,
                value: reg(&mut r)?,
                id: string(&mut r)?,
            },
            Opcode::PutOwnByVal => I::PutOwnByVal {
                obj: reg(&mut r)?,
                value: reg(&mut r)?,
                key: reg(&mut r)?,
                enumerable: r.u8()?,
            },
            Opcode::DelByVal => I::DelByVal {
                dst: reg(&mut r)?,
                obj: reg(&mut r)?,
                key: reg(&mut r)?,
            },
            Opcode::CreateRegExp => I::CreateRegExp {
                dst: reg(&mut r)?,
                pattern: string(&mut r)?,
                flags: string(&mut r)?,
            },
            Opcode::CreateClosure => I::CreateClosure {
                dst: reg(&mut r)?,
                env: reg(&mut r)?,
                function: FunctionIndex(r.u32()?),
            },
            Opcode::Call | Opcode::Construct => {
                let (dst, callee, this) = (reg(&mut r)?, reg(&mut r)?, reg(&mut r)?);
                let count = r.u8()? as usize;
                let args = r.take(count)?.iter().copied().map(Register).collect();
                if opcode == Opcode::Call {
                    I::Call {
                        dst,
                        callee,
                        this,
                        args,
                    }
                } else {
                    I::Construct {
                        dst,
                        callee,
                        this,
                        args,
                    }
                }
            }
            Opcode::DirectEval => I::DirectEval {
                dst: reg(&mut r)?,
                text: reg(&mut r)?,
                strict: r.u8()?,
            },
            Opcode::StartGenerator => I::StartGenerator,
            Opcode::Jmp => I::Jmp {
                offset: jump(&mut r)?,
            },
            Opcode::JmpTrue => I::JmpTrue {
                offset: jump(&mut r)?,
                cond: reg(&mut r)?,
            },
            Opcode::JmpFalse => I::JmpFalse {
                offset: jump(&mut r)?,
                cond: reg(&mut r)?,
            },
            Opcode::SwitchImm => I::SwitchImm {
                value: reg(&mut r)?,
                table: r.u32()?,
                default: jump(&mut r)?,
                min: r.i32()?,
                max: r.i32()?,
            },
            Opcode::Ret => I::Ret {
                value: reg(&mut r)?,
            },
            Opcode::Throw => I::Throw {
                value: reg(&mut r)?,
            },
            Opcode::Catch => I::Catch { dst: reg(&mut r)? },
            Opcode::Unreachable => I::Unreachable,
            Opcode::AsyncBreakCheck => I::AsyncBreakCheck,
        };
        Ok((inst, r.position() - offset))
    }

    /// Relative target of a jump instruction
    pub fn jump_offset(&self) -> Option<JumpOffset> {
        match self {
            Self::Jmp { offset } | Self::JmpTrue { offset, .. } | Self::JmpFalse { offset, .. } => {
                Some(*offset)
            }
            Self::SwitchImm { default, .. } => Some(*default),
            _ => None,
        }
    }

    /// Patch the target of a jump instruction
    pub fn set_jump_offset(&mut self, new_offset: JumpOffset) {
        match self {
            Self::Jmp { offset } | Self::JmpTrue { offset, .. } | Self::JmpFalse { offset, .. } => {
                *offset = new_offset
            }
            Self::SwitchImm { default, .. } => *default = new_offset,
            _ => panic!("Not a jump instruction"),
        }
    }

    /// Does control never fall through to the next instruction
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jmp { .. }
                | Self::SwitchImm { .. }
                | Self::Ret { .. }
                | Self::Throw { .. }
                | Self::Unreachable
        )
    }
}

fn binary(opcode: Opcode, dst: Register, lhs: Register, rhs: Register) -> Instruction {
    use Instruction as I;
    match opcode {
        Opcode::Add => I::Add { dst, lhs, rhs },
        Opcode::Sub => I::Sub { dst, lhs, rhs },
        Opcode::Mul => I::Mul { dst, lhs, rhs },
        Opcode::Div => I::Div { dst, lhs, rhs },
        Opcode::Mod => I::Mod { dst, lhs, rhs },
        Opcode::BitAnd => I::BitAnd { dst, lhs, rhs },
        Opcode::BitOr => I::BitOr { dst, lhs, rhs },
        Opcode::BitXor => I::BitXor { dst, lhs, rhs },
        Opcode::Shl => I::Shl { dst, lhs, rhs },
        Opcode::Shr => I::Shr { dst, lhs, rhs },
        Opcode::UShr => I::UShr { dst, lhs, rhs },
        Opcode::Eq => I::Eq { dst, lhs, rhs },
        Opcode::StrictEq => I::StrictEq { dst, lhs, rhs },
        Opcode::Neq => I::Neq { dst, lhs, rhs },
        Opcode::StrictNeq => I::StrictNeq { dst, lhs, rhs },
        Opcode::Less => I::Less { dst, lhs, rhs },
        Opcode::LessEq => I::LessEq { dst, lhs, rhs },
        Opcode::Greater => I::Greater { dst, lhs, rhs },
        Opcode::GreaterEq => I::GreaterEq { dst, lhs, rhs },
        _ => unreachable!("{} is not a binary opcode", opcode.name()),
    }
}

fn unary(opcode: Opcode, dst: Register, src: Register) -> Instruction {
    use Instruction as I;
    match opcode {
        Opcode::Negate => I::Negate { dst, src },
        Opcode::Inc => I::Inc { dst, src },
        Opcode::Dec => I::Dec { dst, src },
        Opcode::BitNot => I::BitNot { dst, src },
        Opcode::Not => I::Not { dst, src },
        Opcode::TypeOf => I::TypeOf { dst, src },
        Opcode::ThrowIfEmpty => I::ThrowIfEmpty { dst, src },
        _ => unreachable!("{} is not a unary opcode", opcode.name()),
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode().name())?;
        for (i, operand) in self.operands().iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, operand)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_roundtrip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op.to_byte(), byte, "{}", op.name());
            }
        }
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        let insts = [
            Instruction::LoadConstDouble {
                dst: Register(1),
                value: 1.5,
            },
            Instruction::Call {
                dst: Register(0),
                callee: Register(1),
                this: Register(2),
                args: vec![Register(3), Register(4)],
            },
            Instruction::SwitchImm {
                value: Register(0),
                table: 8,
                default: JumpOffset(-3),
                min: 0,
                max: 4,
            },
            Instruction::Unreachable,
        ];
        for inst in insts {
            let mut out = Vec::new();
            inst.encode(&mut out);
            assert_eq!(out.len(), inst.encoded_len());
            let (decoded, len) = Instruction::decode(&out, 0).unwrap();
            assert_eq!(decoded, inst);
            assert_eq!(len, out.len());
        }
    }

    #[test]
    fn test_decode_invalid_opcode() {
        let result = Instruction::decode(&[0xEE], 0);
        assert!(matches!(
            result,
            Err(BytecodeError::InvalidOpcode { opcode: 0xEE, .. })
        ));
    }

    #[test]
    fn test_patch_jump() {
        let mut inst = Instruction::JmpFalse {
            offset: JumpOffset(0),
            cond: Register(2),
        };
        inst.set_jump_offset(JumpOffset(-12));
        assert_eq!(inst.jump_offset(), Some(JumpOffset(-12)));
        assert_eq!(inst.to_string(), "JmpFalse -12, r2");
    }
}

//! # Heron VM Bytecode
//!
//! This crate defines the serialized side of the Heron compiler: the
//! instruction set, bytecode functions, literal buffers and the module file
//! layout consumed by the interpreter.
//!
//! ## Design Principles
//!
//! - **Register-based**: Operations work on virtual registers, not a stack
//! - **Compact**: Literal runs are packed into tagged buffers
//! - **Relocatable**: Functions only refer to each other by index, and jump
//!   tables are found from the header without scanning opcodes
//! - **Reproducible**: Identical input produces identical bytes

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

mod bytes;
pub mod disasm;
pub mod error;
pub mod function;
pub mod instruction;
pub mod literal;
pub mod module;
pub mod operand;
pub mod string_table;

pub use error::BytecodeError;
pub use function::{
    BytecodeFunction, DebugLocation, ExceptionHandler, FunctionFlags, FunctionHeader,
};
pub use instruction::{Instruction, Opcode, Operand};
pub use literal::{LiteralValue, decode_literals, serialize_literals};
pub use module::{BytecodeModule, ModuleOptions, SourceMap, SourceMapEntry, hash_source};
pub use operand::{FunctionIndex, JumpOffset, Register, StringId};
pub use string_table::StringTable;

/// Bytecode format version
pub const BYTECODE_VERSION: u32 = 1;

/// Magic bytes for bytecode files
pub const BYTECODE_MAGIC: [u8; 8] = *b"HERONBC\0";

/// Round `value` up to the next multiple of `align` (a power of two).
#[inline]
pub const fn align_to(align: u32, value: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

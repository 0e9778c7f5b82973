//! Function bytecode representation

use serde::{Deserialize, Serialize};

use crate::align_to;
use crate::bytes::ByteReader;
use crate::error::Result;
use crate::instruction::Instruction;
use crate::operand::StringId;

/// Function flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFlags {
    /// Is strict mode
    pub is_strict: bool,
    /// Is a generator function
    pub is_generator: bool,
    /// Body compilation was deferred
    pub is_lazy: bool,
    /// Contains a direct eval
    pub uses_eval: bool,
    /// Has at least one exception handler
    pub has_exception_handler: bool,
}

impl FunctionFlags {
    /// Pack into the serialized byte
    pub fn to_byte(self) -> u8 {
        (self.is_strict as u8)
            | (self.is_generator as u8) << 1
            | (self.is_lazy as u8) << 2
            | (self.uses_eval as u8) << 3
            | (self.has_exception_handler as u8) << 4
    }

    /// Unpack from the serialized byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            is_strict: byte & 1 != 0,
            is_generator: byte & (1 << 1) != 0,
            is_lazy: byte & (1 << 2) != 0,
            uses_eval: byte & (1 << 3) != 0,
            has_exception_handler: byte & (1 << 4) != 0,
        }
    }
}

/// Fixed-size function header stored in the module function table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionHeader {
    /// Size of the opcode stream, not counting padding and jump tables
    pub bytecode_size: u32,
    /// Declared parameter count, `this` included
    pub param_count: u32,
    /// Number of registers in a frame
    pub frame_size: u32,
    /// Number of slots in the function's own environment
    pub environment_size: u32,
    /// Function name
    pub name: StringId,
    /// Flags
    pub flags: FunctionFlags,
}

/// A try region: exceptions raised in `[start, end)` jump to `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// First covered opcode offset
    pub start: u32,
    /// One past the last covered opcode offset
    pub end: u32,
    /// Offset of the handler
    pub target: u32,
    /// Try nesting depth, 1 for the outermost region
    pub depth: u32,
}

/// Source location of the instruction at `offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLocation {
    /// Opcode offset in the function
    pub offset: u32,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

/// A compiled function
///
/// The body buffer holds the opcodes, zero padding up to the next multiple of
/// four and then the jump tables, one `i32` per entry. Only
/// `header.bytecode_size` is needed to find the tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytecodeFunction {
    /// Header
    pub header: FunctionHeader,
    body: Vec<u8>,
    /// Exception handler table, innermost regions first
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Debug locations, sorted by offset
    pub debug_locations: Vec<DebugLocation>,
}

impl BytecodeFunction {
    /// Assemble a function from its opcode bytes and jump table entries
    pub fn new(mut header: FunctionHeader, opcodes: Vec<u8>, jump_table: &[i32]) -> Self {
        header.bytecode_size = opcodes.len() as u32;
        let mut body = opcodes;
        if !jump_table.is_empty() {
            crate::bytes::pad_to_4(&mut body);
            for entry in jump_table {
                body.extend_from_slice(&entry.to_le_bytes());
            }
        }
        Self {
            header,
            body,
            exception_handlers: Vec::new(),
            debug_locations: Vec::new(),
        }
    }

    /// Rebuild a function from a serialized body
    pub(crate) fn from_raw(header: FunctionHeader, body: Vec<u8>) -> Self {
        Self {
            header,
            body,
            exception_handlers: Vec::new(),
            debug_locations: Vec::new(),
        }
    }

    /// Opcodes followed by padding and jump tables
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Opcode bytes only
    pub fn opcodes(&self) -> &[u8] {
        &self.body[..self.header.bytecode_size as usize]
    }

    /// Offset of the jump table region within the body
    pub fn jump_table_start(&self) -> u32 {
        align_to(4, self.header.bytecode_size)
    }

    /// Number of jump table entries
    pub fn jump_table_len(&self) -> usize {
        let start = self.jump_table_start() as usize;
        self.body.len().saturating_sub(start) / 4
    }

    /// Jump table entries, relative to their `SwitchImm` instruction
    pub fn jump_table(&self) -> Vec<i32> {
        let start = self.jump_table_start() as usize;
        if start >= self.body.len() {
            return Vec::new();
        }
        self.body[start..]
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Decode the opcode stream into `(offset, instruction)` pairs
    pub fn instructions(&self) -> Result<Vec<(u32, Instruction)>> {
        let opcodes = self.opcodes();
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < opcodes.len() {
            let (inst, len) = Instruction::decode(opcodes, offset)?;
            out.push((offset as u32, inst));
            offset += len;
        }
        Ok(out)
    }

    /// Find the debug location covering `offset`
    pub fn location_at(&self, offset: u32) -> Option<DebugLocation> {
        let idx = self
            .debug_locations
            .partition_point(|loc| loc.offset <= offset);
        if idx == 0 {
            None
        } else {
            Some(self.debug_locations[idx - 1])
        }
    }

    /// Read a little-endian i32 at `offset` of the body
    pub fn read_i32(&self, offset: u32) -> Result<i32> {
        ByteReader::at(&self.body, offset as usize).i32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Register;

    fn header() -> FunctionHeader {
        FunctionHeader {
            name: StringId(0),
            ..Default::default()
        }
    }

    #[test]
    fn test_jump_table_found_from_header() {
        let mut opcodes = Vec::new();
        Instruction::Ret { value: Register(0) }.encode(&mut opcodes);
        Instruction::Unreachable.encode(&mut opcodes);
        assert_eq!(opcodes.len(), 3);

        let func = BytecodeFunction::new(header(), opcodes, &[8, -4, 12]);
        assert_eq!(func.header.bytecode_size, 3);
        assert_eq!(func.jump_table_start(), 4);
        assert_eq!(func.jump_table_len(), 3);
        assert_eq!(func.jump_table(), vec![8, -4, 12]);
        assert_eq!(func.body()[3], 0);
    }

    #[test]
    fn test_no_padding_without_jump_table() {
        let mut opcodes = Vec::new();
        Instruction::Ret { value: Register(0) }.encode(&mut opcodes);
        let func = BytecodeFunction::new(header(), opcodes, &[]);
        assert_eq!(func.body().len(), 2);
        assert!(func.jump_table().is_empty());
    }

    #[test]
    fn test_flags_byte_roundtrip() {
        let flags = FunctionFlags {
            is_strict: true,
            uses_eval: true,
            ..Default::default()
        };
        assert_eq!(FunctionFlags::from_byte(flags.to_byte()), flags);
    }

    #[test]
    fn test_location_lookup() {
        let mut func = BytecodeFunction::new(header(), vec![0x94, 0], &[]);
        func.debug_locations = vec![
            DebugLocation {
                offset: 0,
                line: 1,
                column: 1,
            },
            DebugLocation {
                offset: 6,
                line: 2,
                column: 5,
            },
        ];
        assert_eq!(func.location_at(3).map(|l| l.line), Some(1));
        assert_eq!(func.location_at(6).map(|l| l.column), Some(5));
    }
}

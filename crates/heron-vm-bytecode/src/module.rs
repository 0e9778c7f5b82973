//! Bytecode module format
//!
//! File layout, all integers little-endian:
//!
//! ```text
//! header          magic, version, source hash, file length, ids, counts, sizes
//! function table  one fixed-size entry per function
//! string table    (flags, offset, length) per string, then UTF-8 storage
//! literal buffers array, object key, object value (each padded to 4)
//! bodies          per function, 4-byte aligned: opcodes, padding, jump tables
//! handlers        per function exception handler tables
//! debug info      per function (offset, line, column) records
//! ```

use std::io::{Read, Write};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::bytes::{ByteReader, pad_to_4};
use crate::error::{BytecodeError, Result};
use crate::function::{
    BytecodeFunction, DebugLocation, ExceptionHandler, FunctionFlags, FunctionHeader,
};
use crate::operand::StringId;
use crate::string_table::{StringEntry, StringTable};
use crate::{BYTECODE_MAGIC, BYTECODE_VERSION};

/// Sentinel for "no lexical parent" in the serialized header
const NO_PARENT: u32 = u32::MAX;

/// Compute the content hash of a source text
pub fn hash_source(source: &[u8]) -> [u8; 32] {
    Sha256::digest(source).into()
}

/// Module-wide options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModuleOptions {
    /// Compiled with lazy body compilation requested
    pub lazy: bool,
    /// Debug info section is populated
    pub has_debug_info: bool,
    /// Every function is strict
    pub strict: bool,
}

impl ModuleOptions {
    fn to_bits(self) -> u32 {
        (self.lazy as u32) | (self.has_debug_info as u32) << 1 | (self.strict as u32) << 2
    }

    fn from_bits(bits: u32) -> Self {
        Self {
            lazy: bits & 1 != 0,
            has_debug_info: bits & 2 != 0,
            strict: bits & 4 != 0,
        }
    }
}

/// One source map record, keyed by module-virtual offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceMapEntry {
    /// Offset into the concatenated opcode streams of the module
    pub offset: u32,
    /// Function the offset belongs to
    pub function: u32,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

/// Source map for a whole module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceMap {
    entries: Vec<SourceMapEntry>,
}

impl SourceMap {
    /// All entries, sorted by offset
    pub fn entries(&self) -> &[SourceMapEntry] {
        &self.entries
    }

    /// Find the entry covering a virtual offset
    pub fn find(&self, offset: u32) -> Option<&SourceMapEntry> {
        let idx = self.entries.partition_point(|e| e.offset <= offset);
        if idx == 0 {
            None
        } else {
            self.entries.get(idx - 1)
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A compiled bytecode module
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeModule {
    /// Functions, indexed by function id
    pub functions: Vec<BytecodeFunction>,
    /// Shared string and identifier table
    pub strings: StringTable,
    /// Array literal buffer
    pub array_buffer: Vec<u8>,
    /// Object literal key buffer
    pub object_key_buffer: Vec<u8>,
    /// Object literal value buffer
    pub object_value_buffer: Vec<u8>,
    /// SHA256 hash of the source text
    pub source_hash: [u8; 32],
    /// Index of the function run first
    pub global_function: u32,
    /// Segment id, distinguishes eval units loaded into one runtime
    pub segment_id: u32,
    /// Bytecode id of the enclosing function for local eval units
    pub lexical_parent: Option<u32>,
    /// Module options
    pub options: ModuleOptions,
}

impl Default for BytecodeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl BytecodeModule {
    /// Create an empty module
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            strings: StringTable::new(),
            array_buffer: Vec::new(),
            object_key_buffer: Vec::new(),
            object_value_buffer: Vec::new(),
            source_hash: [0; 32],
            global_function: 0,
            segment_id: 0,
            lexical_parent: None,
            options: ModuleOptions::default(),
        }
    }

    /// Get a function by index
    pub fn function(&self, index: u32) -> Option<&BytecodeFunction> {
        self.functions.get(index as usize)
    }

    /// Get the function run first
    pub fn global_function(&self) -> Option<&BytecodeFunction> {
        self.function(self.global_function)
    }

    /// Does the embedded hash match `source`
    pub fn matches_source(&self, source: &[u8]) -> bool {
        self.source_hash == hash_source(source)
    }

    /// Virtual offset of every function: each one starts where the previous
    /// function's opcodes end.
    pub fn function_offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.functions.len());
        let mut next = 0u32;
        for func in &self.functions {
            offsets.push(next);
            next += func.header.bytecode_size;
        }
        offsets
    }

    /// Combine per-function debug locations with the function offsets
    pub fn populate_source_map(&self) -> SourceMap {
        let offsets = self.function_offsets();
        let mut entries = Vec::new();
        for (index, (func, base)) in self.functions.iter().zip(offsets).enumerate() {
            entries.extend(func.debug_locations.iter().map(|loc| SourceMapEntry {
                offset: base + loc.offset,
                function: index as u32,
                line: loc.line,
                column: loc.column,
            }));
        }
        SourceMap { entries }
    }

    /// Serialize module to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        // Header
        out.extend_from_slice(&BYTECODE_MAGIC);
        put(&mut out, BYTECODE_VERSION);
        out.extend_from_slice(&self.source_hash);
        let file_length_pos = out.len();
        put(&mut out, 0);
        put(&mut out, self.global_function);
        put(&mut out, self.segment_id);
        put(&mut out, self.lexical_parent.unwrap_or(NO_PARENT));
        put(&mut out, self.options.to_bits());
        put(&mut out, self.functions.len() as u32);
        put(&mut out, self.strings.len() as u32);
        let storage_size: usize = self.strings.iter().map(|e| e.value.len()).sum();
        put(&mut out, storage_size as u32);
        put(&mut out, self.array_buffer.len() as u32);
        put(&mut out, self.object_key_buffer.len() as u32);
        put(&mut out, self.object_value_buffer.len() as u32);

        // Function table, patched once the bodies are placed
        let table_pos = out.len();
        out.resize(table_pos + self.functions.len() * FUNCTION_ENTRY_SIZE, 0);

        // Strings
        let mut storage_offset = 0u32;
        for entry in self.strings.iter() {
            out.push(entry.identifier as u8);
            put(&mut out, storage_offset);
            put(&mut out, entry.value.len() as u32);
            storage_offset += entry.value.len() as u32;
        }
        for entry in self.strings.iter() {
            out.extend_from_slice(entry.value.as_bytes());
        }
        pad_to_4(&mut out);

        // Literal buffers
        for buffer in [
            &self.array_buffer,
            &self.object_key_buffer,
            &self.object_value_buffer,
        ] {
            out.extend_from_slice(buffer);
            pad_to_4(&mut out);
        }

        // Bodies
        let mut body_offsets = Vec::with_capacity(self.functions.len());
        for func in &self.functions {
            pad_to_4(&mut out);
            body_offsets.push(out.len() as u32);
            out.extend_from_slice(func.body());
        }
        pad_to_4(&mut out);

        for func in &self.functions {
            for h in &func.exception_handlers {
                for v in [h.start, h.end, h.target, h.depth] {
                    put(&mut out, v);
                }
            }
        }
        for func in &self.functions {
            for loc in &func.debug_locations {
                for v in [loc.offset, loc.line, loc.column] {
                    put(&mut out, v);
                }
            }
        }

        for (i, (func, body_offset)) in self.functions.iter().zip(&body_offsets).enumerate() {
            let h = &func.header;
            let fields = [
                *body_offset,
                h.bytecode_size,
                func.body().len() as u32,
                h.param_count,
                h.frame_size,
                h.environment_size,
                h.name.0,
                h.flags.to_byte() as u32,
                func.exception_handlers.len() as u32,
                func.debug_locations.len() as u32,
            ];
            let mut pos = table_pos + i * FUNCTION_ENTRY_SIZE;
            for v in fields {
                out[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
                pos += 4;
            }
        }

        let len = out.len() as u32;
        out[file_length_pos..file_length_pos + 4].copy_from_slice(&len.to_le_bytes());
        tracing::debug!(
            functions = self.functions.len(),
            strings = self.strings.len(),
            bytes = out.len(),
            "serialized bytecode module"
        );
        out
    }

    /// Deserialize module from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        if r.take(BYTECODE_MAGIC.len())? != BYTECODE_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }
        let version = r.u32()?;
        if version != BYTECODE_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }
        let source_hash = r.hash()?;
        let file_length = r.u32()? as usize;
        if file_length != bytes.len() {
            return Err(if file_length > bytes.len() {
                BytecodeError::UnexpectedEnd
            } else {
                BytecodeError::Malformed(format!(
                    "declared length {} but got {} bytes",
                    file_length,
                    bytes.len()
                ))
            });
        }
        let global_function = r.u32()?;
        let segment_id = r.u32()?;
        let lexical_parent = match r.u32()? {
            NO_PARENT => None,
            id => Some(id),
        };
        let options = ModuleOptions::from_bits(r.u32()?);
        let function_count = r.u32()? as usize;
        let string_count = r.u32()? as usize;
        let storage_size = r.u32()? as usize;
        let array_size = r.u32()? as usize;
        let key_size = r.u32()? as usize;
        let value_size = r.u32()? as usize;

        let mut entries = Vec::with_capacity(function_count);
        for _ in 0..function_count {
            let mut fields = [0u32; FUNCTION_ENTRY_SIZE / 4];
            for field in &mut fields {
                *field = r.u32()?;
            }
            entries.push(fields);
        }

        let mut string_slots = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            let identifier = r.u8()? != 0;
            let offset = r.u32()? as usize;
            let length = r.u32()? as usize;
            string_slots.push((identifier, offset, length));
        }
        let storage = r.take(storage_size)?;
        let mut strings = Vec::with_capacity(string_count);
        for (i, (identifier, offset, length)) in string_slots.into_iter().enumerate() {
            let raw = storage
                .get(offset..offset + length)
                .ok_or(BytecodeError::InvalidStringId(i as u32))?;
            let value = std::str::from_utf8(raw)
                .map_err(|_| BytecodeError::InvalidUtf8(i as u32))?
                .to_string();
            strings.push(StringEntry { value, identifier });
        }
        align_reader(&mut r)?;

        let mut buffers = Vec::with_capacity(3);
        for size in [array_size, key_size, value_size] {
            buffers.push(r.take(size)?.to_vec());
            align_reader(&mut r)?;
        }
        let object_value_buffer = buffers.pop().unwrap_or_default();
        let object_key_buffer = buffers.pop().unwrap_or_default();
        let array_buffer = buffers.pop().unwrap_or_default();

        let mut functions = Vec::with_capacity(function_count);
        let mut tail = 0usize;
        for fields in &entries {
            let [offset, bytecode_size, body_size, param_count, frame_size, environment_size, name, flags, _, _] =
                *fields;
            if bytecode_size > body_size {
                return Err(BytecodeError::Malformed(
                    "opcode size exceeds body size".to_string(),
                ));
            }
            r.seek(offset as usize)?;
            let body = r.take(body_size as usize)?.to_vec();
            tail = tail.max(r.position());
            let header = FunctionHeader {
                bytecode_size,
                param_count,
                frame_size,
                environment_size,
                name: StringId(name),
                flags: FunctionFlags::from_byte(flags as u8),
            };
            functions.push(BytecodeFunction::from_raw(header, body));
        }

        r.seek(crate::align_to(4, tail.max(r.position()) as u32) as usize)?;
        for (func, fields) in functions.iter_mut().zip(&entries) {
            for _ in 0..fields[8] {
                func.exception_handlers.push(ExceptionHandler {
                    start: r.u32()?,
                    end: r.u32()?,
                    target: r.u32()?,
                    depth: r.u32()?,
                });
            }
        }
        for (func, fields) in functions.iter_mut().zip(&entries) {
            for _ in 0..fields[9] {
                func.debug_locations.push(DebugLocation {
                    offset: r.u32()?,
                    line: r.u32()?,
                    column: r.u32()?,
                });
            }
        }

        Ok(Self {
            functions,
            strings: StringTable::from_entries(strings),
            array_buffer,
            object_key_buffer,
            object_value_buffer,
            source_hash,
            global_function,
            segment_id,
            lexical_parent,
            options,
        })
    }

    /// Write module to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read module from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Descriptive summary, used by tooling
    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            version: BYTECODE_VERSION,
            source_hash: self.source_hash.iter().map(|b| format!("{:02x}", b)).collect(),
            global_function: self.global_function,
            segment_id: self.segment_id,
            lexical_parent: self.lexical_parent,
            options: self.options,
            strings: self.strings.iter().cloned().collect(),
            functions: self
                .functions
                .iter()
                .map(|f| FunctionSummary {
                    name: self.strings.get(f.header.name).unwrap_or("").to_string(),
                    header: f.header,
                    jump_table_entries: f.jump_table_len(),
                    exception_handlers: f.exception_handlers.clone(),
                })
                .collect(),
            array_buffer_size: self.array_buffer.len(),
            object_key_buffer_size: self.object_key_buffer.len(),
            object_value_buffer_size: self.object_value_buffer.len(),
        }
    }
}

/// Bytes per function table entry
const FUNCTION_ENTRY_SIZE: usize = 40;

fn put(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn align_reader(r: &mut ByteReader<'_>) -> Result<()> {
    let aligned = crate::align_to(4, r.position() as u32) as usize;
    r.seek(aligned)
}

/// Serializable description of a module
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    /// Format version
    pub version: u32,
    /// Hex encoded source hash
    pub source_hash: String,
    /// Global function index
    pub global_function: u32,
    /// Segment id
    pub segment_id: u32,
    /// Enclosing function of a local eval unit
    pub lexical_parent: Option<u32>,
    /// Options
    pub options: ModuleOptions,
    /// String table
    pub strings: Vec<StringEntry>,
    /// Functions
    pub functions: Vec<FunctionSummary>,
    /// Array buffer size in bytes
    pub array_buffer_size: usize,
    /// Object key buffer size in bytes
    pub object_key_buffer_size: usize,
    /// Object value buffer size in bytes
    pub object_value_buffer_size: usize,
}

/// Serializable description of a function
#[derive(Debug, Clone, Serialize)]
pub struct FunctionSummary {
    /// Resolved name
    pub name: String,
    /// Header
    pub header: FunctionHeader,
    /// Number of jump table entries
    pub jump_table_entries: usize,
    /// Exception handlers
    pub exception_handlers: Vec<ExceptionHandler>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::operand::Register;

    fn function(name: StringId, insts: &[Instruction], table: &[i32]) -> BytecodeFunction {
        let mut opcodes = Vec::new();
        for inst in insts {
            inst.encode(&mut opcodes);
        }
        BytecodeFunction::new(
            FunctionHeader {
                name,
                param_count: 1,
                frame_size: 2,
                ..Default::default()
            },
            opcodes,
            table,
        )
    }

    #[test]
    fn test_module_roundtrip() {
        let mut module = BytecodeModule::new();
        let main = module.strings.add_string("main");
        module.strings.add_identifier("x");
        module.source_hash = hash_source(b"1 + 1");
        module.array_buffer = vec![0x11];

        let mut f = function(
            main,
            &[
                Instruction::LoadConstTrue { dst: Register(0) },
                Instruction::Ret { value: Register(0) },
            ],
            &[4, 8],
        );
        f.exception_handlers.push(ExceptionHandler {
            start: 0,
            end: 2,
            target: 2,
            depth: 1,
        });
        f.debug_locations.push(DebugLocation {
            offset: 0,
            line: 1,
            column: 1,
        });
        module.functions.push(f);

        let bytes = module.to_bytes();
        let restored = BytecodeModule::from_bytes(&bytes).unwrap();
        assert_eq!(restored, module);
        assert!(restored.matches_source(b"1 + 1"));
        assert_eq!(restored.functions[0].jump_table(), vec![4, 8]);
    }

    #[test]
    fn test_function_bodies_are_aligned() {
        let mut module = BytecodeModule::new();
        let name = module.strings.add_string("odd");
        module.functions.push(function(name, &[Instruction::Unreachable], &[]));
        module
            .functions
            .push(function(name, &[Instruction::Unreachable], &[0]));

        let bytes = module.to_bytes();
        let restored = BytecodeModule::from_bytes(&bytes).unwrap();
        assert_eq!(restored.functions[1].jump_table(), vec![0]);
    }

    #[test]
    fn test_invalid_magic() {
        let bytes = b"INVALID\0........";
        let result = BytecodeModule::from_bytes(bytes);
        assert!(matches!(result, Err(BytecodeError::InvalidMagic)));
    }

    #[test]
    fn test_truncated_module() {
        let bytes = BytecodeModule::new().to_bytes();
        let result = BytecodeModule::from_bytes(&bytes[..bytes.len() - 4]);
        assert!(matches!(result, Err(BytecodeError::UnexpectedEnd)));
    }

    #[test]
    fn test_function_offsets_are_cumulative() {
        let mut module = BytecodeModule::new();
        let name = module.strings.add_string("f");
        module.functions.push(function(
            name,
            &[Instruction::Ret { value: Register(0) }],
            &[],
        ));
        module.functions.push(function(
            name,
            &[
                Instruction::LoadConstZero { dst: Register(0) },
                Instruction::Ret { value: Register(0) },
            ],
            &[7],
        ));
        module.functions.push(function(name, &[Instruction::Unreachable], &[]));
        assert_eq!(module.function_offsets(), vec![0, 2, 6]);

        module.functions[1].debug_locations.push(DebugLocation {
            offset: 2,
            line: 3,
            column: 4,
        });
        let map = module.populate_source_map();
        assert_eq!(map.len(), 1);
        let entry = map.find(5).unwrap();
        assert_eq!((entry.function, entry.line, entry.column), (1, 3, 4));
        assert!(map.find(1).is_none());
    }
}

//! Bytecode errors

use thiserror::Error;

/// Errors that can occur during bytecode operations
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Invalid magic bytes in bytecode file
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unsupported bytecode version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Invalid opcode
    #[error("Invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode {
        /// The byte that failed to decode
        opcode: u8,
        /// Offset of the byte within the function
        offset: usize,
    },

    /// Invalid literal tag in a literal buffer
    #[error("Invalid literal tag 0x{0:02x}")]
    InvalidLiteralTag(u8),

    /// String id out of range
    #[error("String id {0} is not in the string table")]
    InvalidStringId(u32),

    /// String storage is not valid UTF-8
    #[error("String {0} is not valid UTF-8")]
    InvalidUtf8(u32),

    /// A structural field failed validation
    #[error("Malformed module: {0}")]
    Malformed(String),

    /// Unexpected end of bytecode
    #[error("Unexpected end of bytecode")]
    UnexpectedEnd,

    /// IO error during serialization
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;

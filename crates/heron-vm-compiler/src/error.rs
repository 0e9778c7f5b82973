//! Compilation errors

use thiserror::Error;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// Errors were reported through the diagnostic engine
    #[error("Compilation failed with {errors} error(s)")]
    Diagnosed {
        /// Number of errors reported
        errors: usize,
    },

    /// Syntax error raised while compiling eval source
    #[error("Syntax error at {location}: {message}")]
    EvalSyntax {
        /// Error message
        message: String,
        /// Source location
        location: String,
    },

    /// Eval is disabled
    #[error("eval is not supported")]
    EvalUnsupported,

    /// Invalid combination of eval options
    #[error("Invalid eval mode: {0}")]
    InvalidEvalMode(String),

    /// Local eval against a function without retained scope information
    #[error("Function {0} has no retained scope chain for local eval")]
    UnknownEnclosingFunction(u32),

    /// A function needs more registers than the instruction set can address
    #[error("Function '{function}' needs {needed} registers (max 256)")]
    TooManyRegisters {
        /// Function name
        function: String,
        /// Registers needed
        needed: usize,
    },

    /// A literal buffer grew past what its operands can address
    #[error("Literal buffer too large")]
    LiteralBufferTooLarge,

    /// Bytecode error
    #[error(transparent)]
    Bytecode(#[from] heron_vm_bytecode::BytecodeError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// The compilation thread could not be started
    #[error("Failed to start compilation thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl CompileError {
    /// Create a syntax error
    pub fn syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::EvalSyntax {
            message: message.into(),
            location: format!("{}:{}", line, column),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

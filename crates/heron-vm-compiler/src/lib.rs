//! # Heron VM Compiler
//!
//! Lowers an already resolved IR module to Heron bytecode.
//!
//! ## Pipeline
//!
//! 1. A [`Frontend`] builds the IR [`ir::Module`] from source text
//! 2. Optimization passes run over the IR (optional)
//! 3. Lowering passes materialize literals and literal buffers
//! 4. The bytecode generator allocates registers and selects instructions
//! 5. The result is a [`heron_vm_bytecode::BytecodeModule`]
//!
//! The same pipeline is re-entered at runtime by the `eval` bridge.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod codegen;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod flags;
pub mod frontend;
pub mod ir;
pub mod lower;
pub mod opt;
pub mod pipeline;
pub mod scoped_table;
pub mod stats;

pub use diagnostics::{Diagnostic, DiagnosticEngine, DiagnosticSink, Severity, SourceLoc, SourceRange};
pub use error::{CompileError, CompileResult};
pub use eval::{CompiledUnit, EvalBridge, EvalMode, EvalRequest};
pub use flags::{CompileFlags, EvalConfig};
pub use frontend::{Frontend, FrontendContext};
pub use pipeline::{Compilation, compile_module, compile_source};
pub use stats::PassStats;

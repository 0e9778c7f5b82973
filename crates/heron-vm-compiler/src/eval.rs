//! Runtime compilation for `eval`
//!
//! A global eval compiles source as an independent unit. A local (direct)
//! eval compiles against a function of an already loaded unit, using the
//! scope chain names that unit retained for it. Either way the whole pipeline
//! runs on a dedicated thread with a bounded stack, and the caller blocks
//! until it finishes.

use heron_vm_bytecode::BytecodeModule;
use indexmap::IndexMap;

use crate::diagnostics::DiagnosticEngine;
use crate::error::{CompileError, CompileResult};
use crate::flags::{CompileFlags, EvalConfig};
use crate::frontend::{Frontend, FrontendContext};
use crate::pipeline::{Compilation, compile_source};

/// A loaded, runnable compilation unit
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// The bytecode
    pub module: BytecodeModule,
    /// Scope chain names of the functions that contain a direct eval
    pub scope_chains: IndexMap<u32, Vec<Vec<String>>>,
}

impl CompiledUnit {
    /// Scope chain retained for `function`
    pub fn scope_chain(&self, function: u32) -> Option<&[Vec<String>]> {
        self.scope_chains.get(&function).map(Vec::as_slice)
    }
}

impl From<Compilation> for CompiledUnit {
    fn from(compilation: Compilation) -> Self {
        Self {
            module: compilation.bytecode,
            scope_chains: compilation.scope_chains,
        }
    }
}

/// How the source is compiled
#[derive(Debug, Clone, Copy)]
pub enum EvalMode<'a> {
    /// Independent unit
    Global,
    /// Direct eval inside `function` of `parent`
    Local {
        /// Unit containing the calling function
        parent: &'a CompiledUnit,
        /// Bytecode index of the calling function
        function: u32,
    },
}

/// One eval compilation
#[derive(Debug, Clone, Copy)]
pub struct EvalRequest<'a> {
    /// Source text
    pub source: &'a str,
    /// Global or local
    pub mode: EvalMode<'a>,
    /// Caller is strict mode code
    pub strict: bool,
    /// Source must be exactly one function (Function constructor)
    pub single_function: bool,
}

impl<'a> EvalRequest<'a> {
    /// Global eval of `source`
    pub fn global(source: &'a str) -> Self {
        Self {
            source,
            mode: EvalMode::Global,
            strict: false,
            single_function: false,
        }
    }

    /// Direct eval of `source` inside `function` of `parent`
    pub fn local(source: &'a str, parent: &'a CompiledUnit, function: u32) -> Self {
        Self {
            source,
            mode: EvalMode::Local { parent, function },
            strict: false,
            single_function: false,
        }
    }

    /// Set `strict`
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set `single_function`
    pub fn with_single_function(mut self, single: bool) -> Self {
        self.single_function = single;
        self
    }
}

/// Compiles eval requests through a frontend
pub struct EvalBridge<F: Frontend> {
    config: EvalConfig,
    frontend: F,
    next_segment: u32,
}

impl<F: Frontend> EvalBridge<F> {
    /// Create a bridge. Segment ids start at 1; 0 belongs to the main unit.
    pub fn new(config: EvalConfig, frontend: F) -> Self {
        Self {
            config,
            frontend,
            next_segment: 1,
        }
    }

    /// The configuration
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Compile one request.
    ///
    /// Source errors come back as [`CompileError::EvalSyntax`] carrying the
    /// first reported error.
    pub fn compile(&mut self, request: EvalRequest<'_>) -> CompileResult<CompiledUnit> {
        if !self.config.enable_eval {
            return Err(CompileError::EvalUnsupported);
        }

        let (scope_chain, lexical_parent) = match request.mode {
            EvalMode::Global => (None, None),
            EvalMode::Local { parent, function } => {
                if request.single_function {
                    return Err(CompileError::InvalidEvalMode(
                        "local eval cannot compile a single function".to_string(),
                    ));
                }
                let chain = parent
                    .scope_chain(function)
                    .ok_or(CompileError::UnknownEnclosingFunction(function))?;
                (Some(chain), Some(function))
            }
        };

        let flags = CompileFlags {
            lazy: self.config.flags.lazy || request.source.len() >= self.config.lazy_threshold,
            strict: self.config.flags.strict || request.strict,
            require_single_function: request.single_function,
            ..self.config.flags.clone()
        };
        let segment = self.next_segment;
        self.next_segment += 1;
        tracing::debug!(
            segment,
            local = lexical_parent.is_some(),
            lazy = flags.lazy,
            len = request.source.len(),
            "compiling eval"
        );

        let ctx = FrontendContext {
            flags: &flags,
            strict: flags.strict,
            single_function: flags.require_single_function,
            scope_chain,
        };
        let frontend = &mut self.frontend;
        let source = request.source;
        let compilation = std::thread::scope(|s| {
            let handle = std::thread::Builder::new()
                .name("heron-eval".to_string())
                .stack_size(self.config.stack_size)
                .spawn_scoped(s, move || compile_eval(frontend, source, &ctx))?;
            match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })?;

        let mut unit = CompiledUnit::from(compilation);
        unit.module.segment_id = segment;
        unit.module.lexical_parent = lexical_parent;
        Ok(unit)
    }
}

fn compile_eval<F: Frontend>(
    frontend: &mut F,
    source: &str,
    ctx: &FrontendContext<'_>,
) -> CompileResult<Compilation> {
    let mut diag = DiagnosticEngine::new();
    match compile_source(source, frontend, ctx, &mut diag) {
        Err(CompileError::Diagnosed { .. }) => Err(match diag.first_error() {
            Some(error) => CompileError::syntax(
                error.message.clone(),
                error.range.start.line,
                error.range.start.column,
            ),
            None => CompileError::syntax("invalid eval source", 0, 0),
        }),
        other => other,
    }
}

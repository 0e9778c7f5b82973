//! Pipeline driver
//!
//! Runs a module from IR to bytecode: optimization (unless disabled or the
//! unit is lazy), lowering, bytecode generation. Every stage starts by checking
//! the diagnostic engine and gives up if an error was already reported.

use heron_vm_bytecode::{BytecodeModule, hash_source};
use indexmap::IndexMap;

use crate::codegen::generate_module;
use crate::diagnostics::DiagnosticEngine;
use crate::error::{CompileError, CompileResult};
use crate::flags::CompileFlags;
use crate::frontend::{Frontend, FrontendContext};
use crate::ir::printer::print_module;
use crate::ir::verify::verify_module;
use crate::ir::{InstKind, Module};
use crate::lower::lowering_pipeline;
use crate::opt::optimization_pipeline;
use crate::stats::PassStats;

/// Output of one compilation
#[derive(Debug)]
pub struct Compilation {
    /// The bytecode module
    pub bytecode: BytecodeModule,
    /// What the passes did
    pub stats: PassStats,
    /// Scope chain names of every function containing a direct eval, keyed
    /// by bytecode function index
    pub scope_chains: IndexMap<u32, Vec<Vec<String>>>,
}

fn check(diag: &DiagnosticEngine, stage: &str) -> CompileResult<()> {
    if diag.has_errors() {
        tracing::debug!(stage, errors = diag.error_count(), "compilation stopped");
        return Err(CompileError::Diagnosed {
            errors: diag.error_count(),
        });
    }
    Ok(())
}

/// Function constructor mode: the top level must create exactly one function
fn check_single_function(module: &Module, diag: &mut DiagnosticEngine) {
    let Some(top) = module.top_level() else {
        return;
    };
    let closures = module
        .function_insts(top)
        .into_iter()
        .filter(|i| module.inst(*i).kind == InstKind::CreateFunction)
        .count();
    if closures != 1 {
        diag.error(
            module.function(top).location,
            format!("expected exactly one function, found {}", closures),
        );
    }
}

/// Compile an IR module to bytecode.
///
/// `source` is only hashed into the module header.
pub fn compile_module(
    mut module: Module,
    source: &[u8],
    flags: &CompileFlags,
    diag: &mut DiagnosticEngine,
) -> CompileResult<Compilation> {
    check(diag, "ir")?;
    if flags.verify_ir
        && let Err(e) = verify_module(&module)
    {
        panic!("frontend produced invalid IR: {}\n{}", e, print_module(&module));
    }
    if flags.require_single_function {
        check_single_function(&module, diag);
        check(diag, "single function")?;
    }

    let mut stats = PassStats::default();
    if flags.optimize && !flags.lazy {
        tracing::debug!(functions = module.num_functions(), "optimizing");
        optimization_pipeline(flags).run(&mut module, &mut stats);
    }
    check(diag, "lowering")?;
    lowering_pipeline(flags).run(&mut module, &mut stats);

    let mut scope_chains = IndexMap::new();
    for (index, f) in module.functions().into_iter().enumerate() {
        if !module.uses_direct_eval(f) {
            continue;
        }
        let chain = module
            .innermost_scope(f)
            .map(|s| module.scope_chain_names(s))
            .unwrap_or_default();
        scope_chains.insert(index as u32, chain);
    }

    check(diag, "codegen")?;
    let mut bytecode = generate_module(&module, flags)?;
    bytecode.source_hash = hash_source(source);
    tracing::debug!(
        functions = bytecode.functions.len(),
        changes = stats.total(),
        "compilation finished"
    );
    Ok(Compilation {
        bytecode,
        stats,
        scope_chains,
    })
}

/// Compile source text through `frontend`
pub fn compile_source(
    source: &str,
    frontend: &mut dyn Frontend,
    ctx: &FrontendContext<'_>,
    diag: &mut DiagnosticEngine,
) -> CompileResult<Compilation> {
    let module = frontend.lower(source, ctx, diag);
    check(diag, "frontend")?;
    let Some(module) = module else {
        // The frontend gave up without saying why.
        return Err(CompileError::Diagnosed { errors: 0 });
    };
    compile_module(module, source.as_bytes(), ctx.flags, diag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceLoc;
    use crate::ir::DefinitionKind;
    use crate::ir::builder::IRBuilder;

    fn return_undefined() -> Module {
        let mut m = Module::new();
        let f = m.add_function("main", DefinitionKind::TopLevel, false);
        let mut b = IRBuilder::new(&mut m);
        let entry = b.create_block(f);
        b.set_insertion_block(entry);
        let u = b.undefined();
        b.create_return(u);
        m
    }

    #[test]
    fn test_existing_errors_short_circuit() {
        let mut diag = DiagnosticEngine::new();
        diag.error(SourceLoc::new(1, 1), "bad");
        let err = compile_module(return_undefined(), b"", &CompileFlags::default(), &mut diag)
            .unwrap_err();
        assert!(matches!(err, CompileError::Diagnosed { errors: 1 }));
    }

    #[test]
    fn test_source_hash() {
        let mut diag = DiagnosticEngine::new();
        let out = compile_module(return_undefined(), b"undefined", &CompileFlags::default(), &mut diag)
            .unwrap();
        assert!(out.bytecode.matches_source(b"undefined"));
        assert!(out.scope_chains.is_empty());
    }

    #[test]
    fn test_single_function_mode_rejects_plain_code() {
        let mut diag = DiagnosticEngine::new();
        let flags = CompileFlags::default().with_single_function(true);
        let err = compile_module(return_undefined(), b"", &flags, &mut diag).unwrap_err();
        assert!(matches!(err, CompileError::Diagnosed { errors: 1 }));
        assert!(diag.first_error().unwrap().message.contains("found 0"));
    }

    #[test]
    fn test_silent_frontend_failure() {
        let mut frontend =
            |_: &str, _: &FrontendContext<'_>, _: &mut DiagnosticEngine| -> Option<Module> { None };
        let flags = CompileFlags::default();
        let mut diag = DiagnosticEngine::new();
        let err = compile_source("x", &mut frontend, &FrontendContext::new(&flags), &mut diag)
            .unwrap_err();
        assert!(matches!(err, CompileError::Diagnosed { errors: 0 }));
    }
}

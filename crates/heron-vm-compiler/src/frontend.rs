//! Frontend seam
//!
//! Parsing, name resolution and IR generation happen outside this crate. A
//! [`Frontend`] turns source text into an IR [`Module`] and reports problems
//! through the diagnostic engine.

use crate::diagnostics::DiagnosticEngine;
use crate::flags::CompileFlags;
use crate::ir::Module;

/// What the frontend needs to know about one compilation
#[derive(Debug, Clone, Copy)]
pub struct FrontendContext<'a> {
    /// Flags of the compilation
    pub flags: &'a CompileFlags,
    /// Source is strict mode code
    pub strict: bool,
    /// Source must be exactly one function
    pub single_function: bool,
    /// Names visible from the enclosing function of a local eval, innermost
    /// scope first
    pub scope_chain: Option<&'a [Vec<String>]>,
}

impl<'a> FrontendContext<'a> {
    /// Context of a top level compilation
    pub fn new(flags: &'a CompileFlags) -> Self {
        Self {
            flags,
            strict: flags.strict,
            single_function: flags.require_single_function,
            scope_chain: None,
        }
    }

    /// Is `name` bound in the captured scope chain
    pub fn resolves(&self, name: &str) -> bool {
        self.scope_chain
            .is_some_and(|chain| chain.iter().any(|scope| scope.iter().any(|n| n == name)))
    }
}

/// Builds IR from source text.
///
/// Returns `None` after reporting at least one error, or `Some` with a module
/// whose top level function is set.
///
/// Regular expression literals are validated here: an invalid pattern or
/// flag string is reported as an error and never becomes a `CreateRegExp`.
/// The optimizer deletes unused `CreateRegExp` instructions on that basis.
pub trait Frontend: Send {
    /// Lower `source` to IR
    fn lower(
        &mut self,
        source: &str,
        ctx: &FrontendContext<'_>,
        diag: &mut DiagnosticEngine,
    ) -> Option<Module>;
}

impl<F> Frontend for F
where
    F: FnMut(&str, &FrontendContext<'_>, &mut DiagnosticEngine) -> Option<Module> + Send,
{
    fn lower(
        &mut self,
        source: &str,
        ctx: &FrontendContext<'_>,
        diag: &mut DiagnosticEngine,
    ) -> Option<Module> {
        self(source, ctx, diag)
    }
}

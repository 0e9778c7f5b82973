//! Optimization passes
//!
//! A pass transforms valid IR into valid IR and reports whether it changed
//! anything. Passes never fail: malformed input is a bug in an earlier stage
//! and panics.
//!
//! ## Passes
//!
//! - **SimplifyCFG**: static branches, switch folding, trampolines, block
//!   merging and unreachable code, iterated to a fixpoint
//! - **StackPromotion**: frame variables that never escape move to the stack
//! - **TDZDedup**: drop TDZ checks dominated by an initializing store or check
//! - **FoldConstants**: operators on literals become literals
//! - **DCE**: unused side-effect-free instructions are deleted
//! - **HoistStartGenerator**: generator prologues move to the entry block

pub mod dce;
pub mod fold_constants;
pub mod hoist_start_generator;
pub mod simplify_cfg;
pub mod stack_promotion;
pub mod tdz_dedup;

pub use dce::DeadCodeElimination;
pub use fold_constants::FoldConstants;
pub use hoist_start_generator::HoistStartGenerator;
pub use simplify_cfg::SimplifyCFG;
pub use stack_promotion::StackPromotion;
pub use tdz_dedup::TDZDedup;

use crate::flags::CompileFlags;
use crate::ir::Module;
use crate::ir::printer::print_module;
use crate::ir::verify::verify_module;
use crate::stats::PassStats;

/// A module transformation
pub trait Pass {
    /// Name for logs
    fn name(&self) -> &'static str;

    /// Transform `module`, returning whether anything changed
    fn run(&mut self, module: &mut Module, stats: &mut PassStats) -> bool;
}

/// Runs passes in order
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    verify: bool,
}

impl PassManager {
    /// Empty pipeline
    pub fn new(verify: bool) -> Self {
        Self {
            passes: Vec::new(),
            verify,
        }
    }

    /// Append a pass
    pub fn add(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Names of the scheduled passes
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass once, returning whether any changed the module
    pub fn run(&mut self, module: &mut Module, stats: &mut PassStats) -> bool {
        let mut changed = false;
        for pass in &mut self.passes {
            let pass_changed = pass.run(module, stats);
            tracing::debug!(pass = pass.name(), changed = pass_changed, "pass finished");
            if self.verify
                && let Err(e) = verify_module(module)
            {
                panic!(
                    "IR verification failed after {}: {}\n{}",
                    pass.name(),
                    e,
                    print_module(module)
                );
            }
            changed |= pass_changed;
        }
        changed
    }
}

/// The optimization pipeline
pub fn optimization_pipeline(flags: &CompileFlags) -> PassManager {
    let mut pm = PassManager::new(flags.verify_ir);
    pm.add(SimplifyCFG)
        .add(HoistStartGenerator)
        .add(StackPromotion)
        .add(TDZDedup)
        .add(FoldConstants)
        .add(SimplifyCFG)
        .add(DeadCodeElimination)
        .add(StackPromotion)
        .add(SimplifyCFG);
    pm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_order() {
        let pm = optimization_pipeline(&CompileFlags::default());
        let names = pm.pass_names();
        assert_eq!(names.first(), Some(&"SimplifyCFG"));
        assert!(names.contains(&"TDZDedup"));
        assert_eq!(names.last(), Some(&"SimplifyCFG"));
    }
}

//! Lowering passes
//!
//! These run after optimization, with or without it, and leave the IR in the
//! shape instruction selection expects: literal allocations hold only
//! primitives, and every literal without an immediate encoding is loaded into
//! a value first.

pub mod alloc_literals;
pub mod load_constants;

pub use alloc_literals::LowerAllocLiterals;
pub use load_constants::{LoadConstants, operand_must_be_literal};

use crate::flags::CompileFlags;
use crate::opt::PassManager;

/// The lowering pipeline
pub fn lowering_pipeline(flags: &CompileFlags) -> PassManager {
    let mut pm = PassManager::new(flags.verify_ir);
    pm.add(LowerAllocLiterals).add(LoadConstants);
    pm
}

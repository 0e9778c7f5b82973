//! Read-only analyses over a function's CFG
//!
//! Every result is computed fresh from the current IR and must be recomputed
//! after the CFG changes.

pub mod dominance;
pub mod loops;
pub mod order;
pub mod try_regions;

pub use dominance::DominanceInfo;
pub use loops::LoopAnalysis;
pub use order::{post_order, reachable_blocks, reverse_post_order};
pub use try_regions::{TryDepths, block_try_depths, enclosing_trys, fixup_catch_targets};

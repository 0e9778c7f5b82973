//! Optimization counters

use std::fmt;

/// Counters updated by the passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Conditional branches and switches turned into jumps
    pub static_branches_simplified: usize,
    /// Switch instructions folded on a literal input
    pub switches_folded: usize,
    /// Trampoline blocks removed
    pub trampolines_removed: usize,
    /// Blocks merged into their single predecessor
    pub blocks_merged: usize,
    /// Unreachable blocks deleted
    pub unreachable_blocks_deleted: usize,
    /// Unused functions deleted
    pub functions_deleted: usize,
    /// Frame variables replaced by their only literal
    pub consts_promoted: usize,
    /// Frame variables copied to the stack
    pub vars_copied_to_stack: usize,
    /// Scopes whose variables all moved to the stack
    pub scopes_promoted: usize,
    /// Variables deleted because they were never read
    pub store_only_vars_deleted: usize,
    /// Redundant TDZ checks removed
    pub tdz_checks_removed: usize,
    /// Literals loaded into registers
    pub literals_materialized: usize,
    /// Instructions replaced by a literal
    pub instructions_folded: usize,
    /// Dead instructions deleted
    pub instructions_eliminated: usize,
    /// Generator prologues hoisted to the entry
    pub start_generators_hoisted: usize,
}

impl PassStats {
    /// Sum of all counters
    pub fn total(&self) -> usize {
        self.static_branches_simplified
            + self.switches_folded
            + self.trampolines_removed
            + self.blocks_merged
            + self.unreachable_blocks_deleted
            + self.functions_deleted
            + self.consts_promoted
            + self.vars_copied_to_stack
            + self.scopes_promoted
            + self.store_only_vars_deleted
            + self.tdz_checks_removed
            + self.literals_materialized
            + self.instructions_folded
            + self.instructions_eliminated
            + self.start_generators_hoisted
    }
}

impl fmt::Display for PassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("static branches simplified", self.static_branches_simplified),
            ("switches folded", self.switches_folded),
            ("trampolines removed", self.trampolines_removed),
            ("blocks merged", self.blocks_merged),
            ("unreachable blocks deleted", self.unreachable_blocks_deleted),
            ("functions deleted", self.functions_deleted),
            ("consts promoted", self.consts_promoted),
            ("vars copied to stack", self.vars_copied_to_stack),
            ("scopes promoted", self.scopes_promoted),
            ("store-only vars deleted", self.store_only_vars_deleted),
            ("tdz checks removed", self.tdz_checks_removed),
            ("literals materialized", self.literals_materialized),
            ("instructions folded", self.instructions_folded),
            ("instructions eliminated", self.instructions_eliminated),
            ("start generators hoisted", self.start_generators_hoisted),
        ];
        for (name, value) in rows {
            if value > 0 {
                writeln!(f, "{:>6} {}", value, name)?;
            }
        }
        Ok(())
    }
}

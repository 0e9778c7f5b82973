//! Move the generator prologue to the front of the entry block

use super::Pass;
use crate::ir::{DefinitionKind, InstKind, Module};
use crate::stats::PassStats;

/// Hoists `StartGenerator` in inner generator functions
#[derive(Debug, Default, Clone, Copy)]
pub struct HoistStartGenerator;

impl Pass for HoistStartGenerator {
    fn name(&self) -> &'static str {
        "HoistStartGenerator"
    }

    fn run(&mut self, module: &mut Module, stats: &mut PassStats) -> bool {
        if module.generators_lowered {
            return false;
        }
        let mut changed = false;
        for f in module.functions() {
            if module.function(f).kind != DefinitionKind::GeneratorInner {
                continue;
            }
            let Some(entry) = module.function(f).entry() else {
                continue;
            };
            // An inner generator has at most one.
            let Some(start) = module
                .function_insts(f)
                .into_iter()
                .find(|i| module.inst(*i).kind == InstKind::StartGenerator)
            else {
                continue;
            };
            if module.first_inst(entry) == Some(start) {
                continue;
            }
            module.move_to_start(start, entry);
            stats.start_generators_hoisted += 1;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IRBuilder;

    fn generator(m: &mut Module) -> (crate::ir::BlockId, crate::ir::InstId) {
        let f = m.add_function("gen", DefinitionKind::GeneratorInner, false);
        let mut b = IRBuilder::new(m);
        let [entry, body] = [(); 2].map(|_| b.create_block(f));
        b.set_insertion_block(entry);
        b.create_get_global_object();
        b.create_branch(body);
        b.set_insertion_block(body);
        let start = b.create_start_generator();
        let u = b.undefined();
        b.create_return(u);
        (entry, start)
    }

    #[test]
    fn test_start_generator_hoisted() {
        let mut m = Module::new();
        let (entry, start) = generator(&mut m);
        let mut stats = PassStats::default();
        assert!(HoistStartGenerator.run(&mut m, &mut stats));
        assert_eq!(m.first_inst(entry), Some(start));
        assert!(!HoistStartGenerator.run(&mut m, &mut stats));
    }

    #[test]
    fn test_lowered_generators_untouched() {
        let mut m = Module::new();
        let (entry, start) = generator(&mut m);
        m.generators_lowered = true;
        let mut stats = PassStats::default();
        assert!(!HoistStartGenerator.run(&mut m, &mut stats));
        assert_ne!(m.first_inst(entry), Some(start));
    }
}

//! Property tests over generated control flow graphs

use heron_vm_bytecode::Instruction;
use heron_vm_compiler::ir::builder::IRBuilder;
use heron_vm_compiler::ir::verify::verify_module;
use heron_vm_compiler::ir::{BinaryOp, BlockId, DefinitionKind, Module, Value};
use heron_vm_compiler::opt::{Pass, SimplifyCFG, optimization_pipeline};
use heron_vm_compiler::{CompileFlags, DiagnosticEngine, PassStats, compile_module};
use proptest::prelude::*;

/// Terminator of a generated block; targets never name the entry block
#[derive(Debug, Clone)]
enum Term {
    Return(Option<i8>),
    Branch(usize),
    /// Literal condition, or the block's value when `None`
    Cond(Option<bool>, usize, usize),
    Switch(Option<i8>, usize, Vec<(i8, usize)>),
}

#[derive(Debug, Clone)]
struct BlockSpec {
    has_body: bool,
    term: Term,
}

fn term(n: usize) -> impl Strategy<Value = Term> {
    prop_oneof![
        prop::option::of(any::<i8>()).prop_map(Term::Return),
        (1..n).prop_map(Term::Branch),
        (prop::option::of(any::<bool>()), 1..n, 1..n).prop_map(|(c, t, f)| Term::Cond(c, t, f)),
        (
            prop::option::of(0i8..4),
            1..n,
            prop::collection::vec((0i8..4, 1..n), 0..5)
        )
            .prop_map(|(input, default, cases)| Term::Switch(input, default, cases)),
    ]
}

fn cfg() -> impl Strategy<Value = Vec<BlockSpec>> {
    (2usize..9).prop_flat_map(|n| {
        prop::collection::vec(
            (any::<bool>(), term(n)).prop_map(|(has_body, term)| BlockSpec { has_body, term }),
            n,
        )
    })
}

fn build(spec: &[BlockSpec]) -> Module {
    let mut m = Module::new();
    let f = m.add_function("f", DefinitionKind::TopLevel, false);
    let p = m.add_param(f, "p");
    let mut b = IRBuilder::new(&mut m);
    let blocks: Vec<BlockId> = spec.iter().map(|_| b.create_block(f)).collect();

    b.set_insertion_block(blocks[0]);
    let arg = Value::Inst(b.create_load_param(p));
    for (index, block) in spec.iter().enumerate() {
        b.set_insertion_block(blocks[index]);
        let value = if block.has_body {
            let k = b.number(index as f64);
            Value::Inst(b.create_binary(BinaryOp::Add, arg, k))
        } else {
            arg
        };
        match &block.term {
            Term::Return(lit) => {
                let v = match lit {
                    Some(n) => b.number(*n as f64),
                    None => value,
                };
                b.create_return(v);
            }
            Term::Branch(dest) => {
                b.create_branch(blocks[*dest]);
            }
            Term::Cond(lit, t, e) => {
                let cond = match lit {
                    Some(c) => b.boolean(*c),
                    None => value,
                };
                b.create_cond_branch(cond, blocks[*t], blocks[*e]);
            }
            Term::Switch(lit, default, cases) => {
                let input = match lit {
                    Some(n) => b.number(*n as f64),
                    None => value,
                };
                let cases: Vec<(Value, BlockId)> = cases
                    .iter()
                    .map(|(c, dest)| (b.number(*c as f64), blocks[*dest]))
                    .collect();
                b.create_switch(input, blocks[*default], &cases);
            }
        }
    }
    m
}

proptest! {
    #[test]
    fn prop_generated_cfgs_verify(spec in cfg()) {
        let m = build(&spec);
        prop_assert!(verify_module(&m).is_ok());
    }

    #[test]
    fn prop_simplify_cfg_is_idempotent(spec in cfg()) {
        let mut m = build(&spec);
        let mut stats = PassStats::default();
        SimplifyCFG.run(&mut m, &mut stats);
        prop_assert!(verify_module(&m).is_ok());
        prop_assert!(!SimplifyCFG.run(&mut m, &mut stats));
    }

    #[test]
    fn prop_pipeline_keeps_ir_valid(spec in cfg()) {
        let mut m = build(&spec);
        let flags = CompileFlags::default().with_verify_ir(true);
        optimization_pipeline(&flags).run(&mut m, &mut PassStats::default());
        prop_assert!(verify_module(&m).is_ok());
        prop_assert!(!SimplifyCFG.run(&mut m, &mut PassStats::default()));
    }

    #[test]
    fn prop_compilation_is_deterministic(spec in cfg(), debug in any::<bool>()) {
        let flags = CompileFlags::default().with_debug(debug);
        let bytes = || {
            let mut diag = DiagnosticEngine::new();
            compile_module(build(&spec), b"generated", &flags, &mut diag)
                .map(|c| c.bytecode.to_bytes())
        };
        let first = bytes();
        prop_assert!(first.is_ok());
        prop_assert_eq!(first.ok(), bytes().ok());
    }

    #[test]
    fn prop_jumps_land_on_instructions(spec in cfg()) {
        let mut diag = DiagnosticEngine::new();
        let flags = CompileFlags::default().with_async_break_check(true);
        let out = compile_module(build(&spec), b"", &flags, &mut diag).unwrap();
        for func in &out.bytecode.functions {
            let insts = func.instructions().unwrap();
            let starts: Vec<i64> = insts.iter().map(|(o, _)| *o as i64).collect();
            let table = func.jump_table();
            for (offset, inst) in &insts {
                if let Some(jump) = inst.jump_offset() {
                    prop_assert!(starts.contains(&jump.target(*offset)));
                }
                if let Instruction::SwitchImm { table: start, min, max, .. } = inst {
                    let first = (*start / 4) as usize;
                    let len = (*max as i64 - *min as i64 + 1) as usize;
                    for entry in &table[first..first + len] {
                        prop_assert!(starts.contains(&(*offset as i64 + *entry as i64)));
                    }
                }
            }
        }
    }
}

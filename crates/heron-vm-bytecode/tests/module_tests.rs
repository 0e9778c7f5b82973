//! Integration tests for the module file format

use heron_vm_bytecode::disasm::disassemble_module;
use heron_vm_bytecode::{
    BytecodeFunction, BytecodeModule, DebugLocation, ExceptionHandler, FunctionFlags,
    FunctionHeader, Instruction, JumpOffset, LiteralValue, Register, StringId, decode_literals,
    hash_source, serialize_literals,
};

fn assemble(insts: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::new();
    for inst in insts {
        inst.encode(&mut out);
    }
    out
}

fn header(name: StringId, params: u32) -> FunctionHeader {
    FunctionHeader {
        name,
        param_count: params,
        frame_size: 4,
        ..Default::default()
    }
}

/// A module with a switch jump table, literal buffers and a local eval parent
fn sample_module() -> BytecodeModule {
    let source = "switch (x) { case 0: case 1: case 2: }";
    let mut module = BytecodeModule::new();
    module.source_hash = hash_source(source.as_bytes());
    module.lexical_parent = Some(3);
    module.segment_id = 2;
    module.options.has_debug_info = true;

    let global = module.strings.add_string("global");
    let inner = module.strings.add_string("inner");

    serialize_literals(
        &[
            LiteralValue::Number(1.0),
            LiteralValue::String("a".into()),
        ],
        &mut module.strings,
        &mut module.array_buffer,
        false,
    );
    serialize_literals(
        &[LiteralValue::String("k".into())],
        &mut module.strings,
        &mut module.object_key_buffer,
        true,
    );
    serialize_literals(
        &[LiteralValue::Null],
        &mut module.strings,
        &mut module.object_value_buffer,
        false,
    );

    let switch = assemble(&[
        Instruction::LoadParam {
            dst: Register(0),
            index: 1,
        },
        Instruction::SwitchImm {
            value: Register(0),
            table: 0,
            default: JumpOffset(18),
            min: 0,
            max: 2,
        },
        Instruction::Ret { value: Register(0) },
    ]);
    let mut f0 = BytecodeFunction::new(header(global, 1), switch, &[18, 18, 18]);
    f0.debug_locations.push(DebugLocation {
        offset: 0,
        line: 1,
        column: 1,
    });

    let mut f1 = BytecodeFunction::new(
        FunctionHeader {
            flags: FunctionFlags {
                is_strict: true,
                has_exception_handler: true,
                ..Default::default()
            },
            ..header(inner, 2)
        },
        assemble(&[
            Instruction::LoadConstUndefined { dst: Register(1) },
            Instruction::Throw { value: Register(1) },
            Instruction::Catch { dst: Register(0) },
            Instruction::Ret { value: Register(0) },
        ]),
        &[],
    );
    f1.exception_handlers.push(ExceptionHandler {
        start: 0,
        end: 4,
        target: 4,
        depth: 1,
    });
    f1.debug_locations.push(DebugLocation {
        offset: 4,
        line: 2,
        column: 7,
    });

    module.functions.push(f0);
    module.functions.push(f1);
    module
}

#[test]
fn test_roundtrip_preserves_everything() {
    let module = sample_module();
    let bytes = module.to_bytes();
    let restored = BytecodeModule::from_bytes(&bytes).unwrap();
    assert_eq!(restored, module);
    assert_eq!(restored.lexical_parent, Some(3));
    assert_eq!(restored.segment_id, 2);
    assert!(restored.options.has_debug_info);
    assert!(restored.functions[1].header.flags.is_strict);
}

#[test]
fn test_serialization_is_deterministic() {
    assert_eq!(sample_module().to_bytes(), sample_module().to_bytes());
}

#[test]
fn test_write_and_read_through_io() {
    let module = sample_module();
    let mut buf = Vec::new();
    module.write_to(&mut buf).unwrap();
    let restored = BytecodeModule::read_from(&mut buf.as_slice()).unwrap();
    assert_eq!(restored, module);
}

#[test]
fn test_source_hash_check() {
    let module = sample_module();
    assert!(module.matches_source(b"switch (x) { case 0: case 1: case 2: }"));
    assert!(!module.matches_source(b"switch (y) {}"));
}

#[test]
fn test_jump_table_located_without_decoding() {
    let restored = BytecodeModule::from_bytes(&sample_module().to_bytes()).unwrap();
    let f0 = &restored.functions[0];
    assert_eq!(f0.jump_table_start() % 4, 0);
    assert_eq!(f0.jump_table(), vec![18, 18, 18]);
}

#[test]
fn test_literal_buffers_survive_serialization() {
    let restored = BytecodeModule::from_bytes(&sample_module().to_bytes()).unwrap();
    let array = decode_literals(&restored.array_buffer, 0, 2, &restored.strings).unwrap();
    assert_eq!(
        array,
        vec![LiteralValue::Number(1.0), LiteralValue::String("a".into())]
    );
    let keys = decode_literals(&restored.object_key_buffer, 0, 1, &restored.strings).unwrap();
    assert_eq!(keys, vec![LiteralValue::String("k".into())]);
    let id = restored.strings.lookup("k").unwrap();
    assert!(restored.strings.is_identifier(id));
}

#[test]
fn test_source_map_spans_functions() {
    let module = sample_module();
    let size0 = module.functions[0].header.bytecode_size;
    assert_eq!(module.function_offsets(), vec![0, size0]);

    let map = module.populate_source_map();
    assert_eq!(map.len(), 2);
    let entry = map.find(size0 + 4).unwrap();
    assert_eq!((entry.function, entry.line, entry.column), (1, 2, 7));
    let entry = map.find(size0 + 3).unwrap();
    assert_eq!(entry.function, 0);
}

#[test]
fn test_corrupt_inputs_are_rejected() {
    let bytes = sample_module().to_bytes();

    let mut wrong_version = bytes.clone();
    wrong_version[8] = 9;
    assert!(BytecodeModule::from_bytes(&wrong_version).is_err());

    assert!(BytecodeModule::from_bytes(&bytes[..40]).is_err());
    assert!(BytecodeModule::from_bytes(&[]).is_err());

    let mut trailing = bytes;
    trailing.push(0);
    assert!(BytecodeModule::from_bytes(&trailing).is_err());
}

#[test]
fn test_disassembly_lists_every_function() {
    let text = disassemble_module(&sample_module()).unwrap();
    assert!(text.contains("function f0 \"global\""));
    assert!(text.contains("function f1 \"inner\""));
    assert!(text.contains("[strict]"));
    assert!(text.contains("jump table"));
    assert!(text.contains("depth 1"));
    assert!(text.contains("; lexical parent f3"));
}

//! Property tests for literal buffer encoding

use heron_vm_bytecode::literal::{SEQUENCE_MAX, TAG_MASK};
use heron_vm_bytecode::{LiteralValue, StringTable, decode_literals, serialize_literals};
use proptest::prelude::*;

fn literal() -> impl Strategy<Value = LiteralValue> {
    prop_oneof![
        Just(LiteralValue::Null),
        Just(LiteralValue::Undefined),
        any::<bool>().prop_map(LiteralValue::Bool),
        any::<i32>().prop_map(|n| LiteralValue::Number(n as f64)),
        any::<f64>().prop_map(LiteralValue::Number),
        "[a-z]{0,6}".prop_map(LiteralValue::String),
    ]
}

/// Walk the tags of an encoded buffer and return the run lengths
fn run_lengths(buf: &[u8]) -> Vec<usize> {
    let mut runs = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let first = buf[pos];
        let (len, header) = if first & 0x80 != 0 {
            ((((first & 0x0f) as usize) << 8) | buf[pos + 1] as usize, 2)
        } else {
            ((first & 0x0f) as usize, 1)
        };
        let width = match first & TAG_MASK {
            0x30 => 8,
            0x40 | 0x70 => 4,
            0x50 => 2,
            _ => 0,
        };
        runs.push(len);
        pos += header + len * width;
    }
    runs
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(lits in prop::collection::vec(literal(), 0..64)) {
        let mut strings = StringTable::new();
        let mut buf = Vec::new();
        serialize_literals(&lits, &mut strings, &mut buf, false);
        let decoded = decode_literals(&buf, 0, lits.len(), &strings).unwrap();
        prop_assert_eq!(decoded, lits);
    }

    #[test]
    fn prop_runs_are_bounded(len in 1usize..9000) {
        let lits = vec![LiteralValue::Bool(false); len];
        let mut strings = StringTable::new();
        let mut buf = Vec::new();
        serialize_literals(&lits, &mut strings, &mut buf, false);
        let runs = run_lengths(&buf);
        prop_assert!(runs.iter().all(|&r| r >= 1 && r <= SEQUENCE_MAX));
        prop_assert_eq!(runs.iter().sum::<usize>(), len);
    }

    #[test]
    fn prop_encoding_is_deterministic(lits in prop::collection::vec(literal(), 0..32)) {
        let encode = |lits: &[LiteralValue]| {
            let mut strings = StringTable::new();
            let mut buf = Vec::new();
            serialize_literals(lits, &mut strings, &mut buf, true);
            buf
        };
        prop_assert_eq!(encode(&lits), encode(&lits));
    }
}

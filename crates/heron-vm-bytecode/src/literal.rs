//! Literal buffer encoding
//!
//! Object and array literal contents are stored as runs of same-typed values.
//! Each run starts with a tag:
//!
//! ```text
//! 0ttt llll              runs of 1..=15 elements
//! 1ttt llll llllllll     runs of 16..=4095 elements
//! ```
//!
//! followed by the payload of every element: nothing for null, undefined and
//! booleans, a `u16` string id for short strings, an `i32` for integers, a
//! `u32` string id for long strings and an `f64` for other numbers. All
//! payloads are little-endian.

use serde::Serialize;

use crate::bytes::ByteReader;
use crate::error::{BytecodeError, Result};
use crate::operand::StringId;
use crate::string_table::StringTable;

/// Tag of a run of nulls
pub const NULL_TAG: u8 = 0;
/// Tag of a run of `true`
pub const TRUE_TAG: u8 = 1 << 4;
/// Tag of a run of `false`
pub const FALSE_TAG: u8 = 2 << 4;
/// Tag of a run of doubles
pub const NUMBER_TAG: u8 = 3 << 4;
/// Tag of a run of strings with 32-bit ids
pub const LONG_STRING_TAG: u8 = 4 << 4;
/// Tag of a run of strings with 16-bit ids
pub const SHORT_STRING_TAG: u8 = 5 << 4;
/// Tag of a run of undefined
pub const UNDEFINED_TAG: u8 = 6 << 4;
/// Tag of a run of int32 numbers
pub const INTEGER_TAG: u8 = 7 << 4;
/// Bits of the first tag byte holding the type
pub const TAG_MASK: u8 = 0x70;
/// Longest run a single tag can describe
pub const SEQUENCE_MAX: usize = 4095;

const LONG_TAG_FLAG: u8 = 0x80;

/// A value that can be stored in a literal buffer
#[derive(Debug, Clone, Serialize)]
pub enum LiteralValue {
    /// null
    Null,
    /// undefined
    Undefined,
    /// true / false
    Bool(bool),
    /// Any number
    Number(f64),
    /// String contents, resolved through the string table
    String(String),
}

impl PartialEq for LiteralValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Undefined, Self::Undefined) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

/// Does `n` survive a round trip through `i32`, sign of zero included
pub fn is_int32_representable(n: f64) -> bool {
    n.fract() == 0.0
        && n >= i32::MIN as f64
        && n <= i32::MAX as f64
        && !(n == 0.0 && n.is_sign_negative())
}

enum Payload {
    None,
    Short(u16),
    Int(i32),
    Long(u32),
    Double(f64),
}

fn classify(
    literal: &LiteralValue,
    strings: &mut StringTable,
    is_key_buffer: bool,
) -> (u8, Payload) {
    match literal {
        LiteralValue::Null => (NULL_TAG, Payload::None),
        LiteralValue::Undefined => (UNDEFINED_TAG, Payload::None),
        LiteralValue::Bool(true) => (TRUE_TAG, Payload::None),
        LiteralValue::Bool(false) => (FALSE_TAG, Payload::None),
        LiteralValue::Number(n) if is_int32_representable(*n) => {
            (INTEGER_TAG, Payload::Int(*n as i32))
        }
        LiteralValue::Number(n) => (NUMBER_TAG, Payload::Double(*n)),
        LiteralValue::String(s) => {
            let id = if is_key_buffer {
                strings.add_identifier(s)
            } else {
                strings.add_string(s)
            };
            match u16::try_from(id.0) {
                Ok(short) => (SHORT_STRING_TAG, Payload::Short(short)),
                Err(_) => (LONG_STRING_TAG, Payload::Long(id.0)),
            }
        }
    }
}

fn write_tag(out: &mut Vec<u8>, tag: u8, len: usize) {
    debug_assert!(len > 0 && len <= SEQUENCE_MAX);
    if len > 15 {
        out.push(LONG_TAG_FLAG | tag | ((len >> 8) as u8 & 0x0f));
        out.push((len & 0xff) as u8);
    } else {
        out.push(tag | len as u8);
    }
}

/// Append the encoding of `literals` to `out`.
///
/// Strings are added to `strings`; with `is_key_buffer` they are added as
/// identifiers, which is what object key buffers use.
pub fn serialize_literals(
    literals: &[LiteralValue],
    strings: &mut StringTable,
    out: &mut Vec<u8>,
    is_key_buffer: bool,
) {
    let classified: Vec<(u8, Payload)> = literals
        .iter()
        .map(|lit| classify(lit, strings, is_key_buffer))
        .collect();

    let mut start = 0;
    while start < classified.len() {
        let tag = classified[start].0;
        let mut end = start + 1;
        while end < classified.len() && classified[end].0 == tag && end - start < SEQUENCE_MAX {
            end += 1;
        }

        write_tag(out, tag, end - start);
        for (_, payload) in &classified[start..end] {
            match payload {
                Payload::None => {}
                Payload::Short(id) => out.extend_from_slice(&id.to_le_bytes()),
                Payload::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
                Payload::Long(id) => out.extend_from_slice(&id.to_le_bytes()),
                Payload::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
        start = end;
    }
}

/// Decode `count` literals starting at `offset` in `buffer`.
pub fn decode_literals(
    buffer: &[u8],
    offset: usize,
    count: usize,
    strings: &StringTable,
) -> Result<Vec<LiteralValue>> {
    let mut r = ByteReader::at(buffer, offset);
    let mut out = Vec::with_capacity(count);

    let string = |id: u32| -> Result<LiteralValue> {
        strings
            .get(StringId(id))
            .map(|s| LiteralValue::String(s.to_string()))
            .ok_or(BytecodeError::InvalidStringId(id))
    };

    while out.len() < count {
        let first = r.u8()?;
        let tag = first & TAG_MASK;
        let len = if first & LONG_TAG_FLAG != 0 {
            (((first & 0x0f) as usize) << 8) | r.u8()? as usize
        } else {
            (first & 0x0f) as usize
        };
        if len == 0 {
            return Err(BytecodeError::InvalidLiteralTag(first));
        }

        for _ in 0..len {
            let value = match tag {
                NULL_TAG => LiteralValue::Null,
                UNDEFINED_TAG => LiteralValue::Undefined,
                TRUE_TAG => LiteralValue::Bool(true),
                FALSE_TAG => LiteralValue::Bool(false),
                NUMBER_TAG => LiteralValue::Number(r.f64()?),
                INTEGER_TAG => LiteralValue::Number(r.i32()? as f64),
                SHORT_STRING_TAG => string(r.u16()? as u32)?,
                LONG_STRING_TAG => string(r.u32()?)?,
                _ => return Err(BytecodeError::InvalidLiteralTag(first)),
            };
            out.push(value);
        }
    }

    if out.len() != count {
        return Err(BytecodeError::Malformed(format!(
            "literal run overshoots: expected {} values, decoded {}",
            count,
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(literals: &[LiteralValue]) -> (Vec<u8>, StringTable) {
        let mut strings = StringTable::new();
        let mut out = Vec::new();
        serialize_literals(literals, &mut strings, &mut out, false);
        (out, strings)
    }

    #[test]
    fn test_fifteen_element_run_uses_short_tag() {
        let lits = vec![LiteralValue::Null; 15];
        let (buf, _) = encode(&lits);
        assert_eq!(buf, vec![NULL_TAG | 15]);
    }

    #[test]
    fn test_sixteen_element_run_uses_long_tag() {
        let lits = vec![LiteralValue::Bool(true); 16];
        let (buf, strings) = encode(&lits);
        assert_eq!(buf, vec![0x80 | TRUE_TAG, 16]);
        assert_eq!(decode_literals(&buf, 0, 16, &strings).unwrap(), lits);
    }

    #[test]
    fn test_max_run_and_overflow() {
        let lits = vec![LiteralValue::Number(1.5); SEQUENCE_MAX + 1];
        let (buf, strings) = encode(&lits);
        // 0x8F 0xFF, then 4095 doubles, then a one-element run.
        assert_eq!(&buf[..2], &[0x80 | NUMBER_TAG | 0x0f, 0xff]);
        let second = 2 + SEQUENCE_MAX * 8;
        assert_eq!(buf[second], NUMBER_TAG | 1);
        assert_eq!(buf.len(), second + 1 + 8);
        assert_eq!(
            decode_literals(&buf, 0, SEQUENCE_MAX + 1, &strings).unwrap(),
            lits
        );
    }

    #[test]
    fn test_payload_sizes() {
        let lits = vec![
            LiteralValue::Number(7.0),
            LiteralValue::Number(-0.0),
            LiteralValue::String("a".into()),
            LiteralValue::Undefined,
        ];
        let (buf, strings) = encode(&lits);
        assert_eq!(
            buf,
            vec![
                INTEGER_TAG | 1,
                7,
                0,
                0,
                0,
                NUMBER_TAG | 1,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                0x80,
                SHORT_STRING_TAG | 1,
                0,
                0,
                UNDEFINED_TAG | 1,
            ]
        );
        assert_eq!(decode_literals(&buf, 0, 4, &strings).unwrap(), lits);
    }

    #[test]
    fn test_key_buffer_marks_identifiers() {
        let mut strings = StringTable::new();
        let mut out = Vec::new();
        serialize_literals(
            &[LiteralValue::String("x".into())],
            &mut strings,
            &mut out,
            true,
        );
        let id = strings.lookup("x").unwrap();
        assert!(strings.is_identifier(id));
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        let buf = [INTEGER_TAG | 2, 1, 0, 0, 0];
        let result = decode_literals(&buf, 0, 2, &StringTable::new());
        assert!(matches!(result, Err(BytecodeError::UnexpectedEnd)));
    }
}

//! Compile-time evaluation of literals
//!
//! Every function returns `None` when the result is not known at compile time
//! or folding it would change observable behavior.

use super::{BinaryOp, Literal, UnaryOp};

/// Maximum length of a string produced by folding a concatenation
const MAX_STRING_CONCAT_LEN: usize = 1024;

/// ToBoolean
pub fn eval_to_boolean(lit: &Literal) -> Option<bool> {
    match lit {
        Literal::Number(n) => Some(*n != 0.0 && !n.is_nan()),
        Literal::String(s) => Some(!s.is_empty()),
        Literal::BigInt(s) => Some(s.trim_start_matches('-') != "0"),
        Literal::Bool(b) => Some(*b),
        Literal::Null | Literal::Undefined => Some(false),
        Literal::GlobalObject => Some(true),
        Literal::Empty => None,
    }
}

/// ToNumber, `None` for bigints and objects
pub fn eval_to_number(lit: &Literal) -> Option<f64> {
    match lit {
        Literal::Number(n) => Some(*n),
        Literal::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Literal::Null => Some(0.0),
        Literal::Undefined => Some(f64::NAN),
        Literal::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                // Rust accepts spellings the language doesn't ("inf", "1e5f"...).
                let plain = trimmed
                    .bytes()
                    .all(|c| c.is_ascii_digit() || matches!(c, b'.' | b'-' | b'+' | b'e' | b'E'));
                if plain {
                    trimmed.parse::<f64>().ok()
                } else {
                    None
                }
            }
        }
        Literal::BigInt(_) | Literal::Empty | Literal::GlobalObject => None,
    }
}

/// ToInt32
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// ToUint32
pub fn to_uint32(n: f64) -> u32 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return 0;
    }
    let int = n.trunc() % 4294967296.0;
    let int = if int < 0.0 { int + 4294967296.0 } else { int };
    int as u32
}

/// Strict equality of two literals.
///
/// Numbers compare numerically: `-0 === +0` and `NaN` never matches.
pub fn literal_strict_equality(lhs: &Literal, rhs: &Literal) -> Option<bool> {
    match (lhs, rhs) {
        (Literal::Empty, _) | (_, Literal::Empty) => None,
        (Literal::GlobalObject, Literal::GlobalObject) => Some(true),
        (Literal::Number(l), Literal::Number(r)) => Some(l == r),
        (Literal::String(l), Literal::String(r)) => Some(l == r),
        (Literal::BigInt(l), Literal::BigInt(r)) => Some(l == r),
        (Literal::Bool(l), Literal::Bool(r)) => Some(l == r),
        (Literal::Null, Literal::Null) | (Literal::Undefined, Literal::Undefined) => Some(true),
        _ => Some(false),
    }
}

/// Loose equality, only where no conversion through objects is involved
fn literal_loose_equality(lhs: &Literal, rhs: &Literal) -> Option<bool> {
    use Literal as L;
    match (lhs, rhs) {
        (L::Null | L::Undefined, L::Null | L::Undefined) => Some(true),
        (L::Null | L::Undefined, L::Number(_) | L::String(_) | L::Bool(_))
        | (L::Number(_) | L::String(_) | L::Bool(_), L::Null | L::Undefined) => Some(false),
        (L::Number(_) | L::String(_) | L::Bool(_), L::Number(_) | L::String(_) | L::Bool(_)) => {
            if std::mem::discriminant(lhs) == std::mem::discriminant(rhs) {
                literal_strict_equality(lhs, rhs)
            } else {
                let l = eval_to_number(lhs)?;
                let r = eval_to_number(rhs)?;
                Some(l == r)
            }
        }
        _ => None,
    }
}

fn typeof_name(lit: &Literal) -> Option<&'static str> {
    Some(match lit {
        Literal::Number(_) => "number",
        Literal::String(_) => "string",
        Literal::BigInt(_) => "bigint",
        Literal::Bool(_) => "boolean",
        Literal::Null | Literal::GlobalObject => "object",
        Literal::Undefined => "undefined",
        Literal::Empty => return None,
    })
}

/// Number to string, only for the values whose spelling is unambiguous
fn number_to_string(n: f64) -> Option<String> {
    if n.is_nan() {
        Some("NaN".to_string())
    } else if n.is_infinite() {
        Some(if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string())
    } else if n == 0.0 {
        Some("0".to_string())
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        Some(format!("{}", n as i64))
    } else {
        None
    }
}

fn literal_to_string(lit: &Literal) -> Option<String> {
    match lit {
        Literal::String(s) => Some(s.clone()),
        Literal::Number(n) => number_to_string(*n),
        Literal::Bool(b) => Some(b.to_string()),
        Literal::Null => Some("null".to_string()),
        Literal::Undefined => Some("undefined".to_string()),
        Literal::BigInt(s) => Some(s.clone()),
        Literal::Empty | Literal::GlobalObject => None,
    }
}

/// Fold a unary operator
pub fn eval_unary(op: UnaryOp, operand: &Literal) -> Option<Literal> {
    if matches!(operand, Literal::Empty | Literal::GlobalObject) {
        return None;
    }
    match op {
        UnaryOp::Not => Some(Literal::Bool(!eval_to_boolean(operand)?)),
        UnaryOp::Void => Some(Literal::Undefined),
        UnaryOp::TypeOf => Some(Literal::String(typeof_name(operand)?.to_string())),
        UnaryOp::Minus => match operand {
            Literal::BigInt(s) => Some(Literal::BigInt(match s.strip_prefix('-') {
                Some(stripped) => stripped.to_string(),
                None if s == "0" => s.clone(),
                None => format!("-{s}"),
            })),
            _ => Some(Literal::Number(-eval_to_number(operand)?)),
        },
        UnaryOp::BitNot => Some(Literal::Number(!to_int32(eval_to_number(operand)?) as f64)),
        UnaryOp::Inc => Some(Literal::Number(eval_to_number(operand)? + 1.0)),
        UnaryOp::Dec => Some(Literal::Number(eval_to_number(operand)? - 1.0)),
    }
}

/// Fold a binary operator
pub fn eval_binary(op: BinaryOp, lhs: &Literal, rhs: &Literal) -> Option<Literal> {
    match op {
        BinaryOp::StrictEq => return literal_strict_equality(lhs, rhs).map(Literal::Bool),
        BinaryOp::StrictNotEq => {
            return literal_strict_equality(lhs, rhs).map(|eq| Literal::Bool(!eq));
        }
        BinaryOp::Eq => return literal_loose_equality(lhs, rhs).map(Literal::Bool),
        BinaryOp::NotEq => return literal_loose_equality(lhs, rhs).map(|eq| Literal::Bool(!eq)),
        _ => {}
    }

    // Mixing bigints with anything is either a TypeError or needs
    // arbitrary precision.
    if matches!(lhs, Literal::BigInt(_) | Literal::Empty | Literal::GlobalObject)
        || matches!(rhs, Literal::BigInt(_) | Literal::Empty | Literal::GlobalObject)
    {
        return None;
    }

    if op == BinaryOp::Add && (lhs.as_str().is_some() || rhs.as_str().is_some()) {
        let mut s = literal_to_string(lhs)?;
        s.push_str(&literal_to_string(rhs)?);
        if s.len() > MAX_STRING_CONCAT_LEN {
            return None;
        }
        return Some(Literal::String(s));
    }

    if matches!(
        op,
        BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq
    ) {
        if let (Literal::String(l), Literal::String(r)) = (lhs, rhs) {
            // Code unit order equals code point order only outside the
            // supplementary planes.
            if l.chars().chain(r.chars()).any(|c| c as u32 > 0xFFFF) {
                return None;
            }
            let (l, r) = (l.as_str(), r.as_str());
            return Some(Literal::Bool(match op {
                BinaryOp::Less => l < r,
                BinaryOp::LessEq => l <= r,
                BinaryOp::Greater => l > r,
                _ => l >= r,
            }));
        }
    }

    let l = eval_to_number(lhs)?;
    let r = eval_to_number(rhs)?;
    let value = match op {
        BinaryOp::Add => Literal::Number(l + r),
        BinaryOp::Sub => Literal::Number(l - r),
        BinaryOp::Mul => Literal::Number(l * r),
        BinaryOp::Div => Literal::Number(l / r),
        BinaryOp::Mod => Literal::Number(l % r),
        // Comparisons involving NaN are false.
        BinaryOp::Less => Literal::Bool(l < r),
        BinaryOp::LessEq => Literal::Bool(l <= r),
        BinaryOp::Greater => Literal::Bool(l > r),
        BinaryOp::GreaterEq => Literal::Bool(l >= r),
        BinaryOp::BitAnd => Literal::Number((to_int32(l) & to_int32(r)) as f64),
        BinaryOp::BitOr => Literal::Number((to_int32(l) | to_int32(r)) as f64),
        BinaryOp::BitXor => Literal::Number((to_int32(l) ^ to_int32(r)) as f64),
        BinaryOp::Shl => Literal::Number(to_int32(l).wrapping_shl(to_uint32(r) & 0x1f) as f64),
        BinaryOp::Shr => Literal::Number((to_int32(l) >> (to_uint32(r) & 0x1f)) as f64),
        BinaryOp::UShr => Literal::Number((to_uint32(l) >> (to_uint32(r) & 0x1f)) as f64),
        BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::StrictEq | BinaryOp::StrictNotEq => {
            unreachable!("equality handled above")
        }
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Literal {
        Literal::Number(n)
    }

    #[test]
    fn test_strict_equality_is_numeric() {
        assert_eq!(literal_strict_equality(&num(0.0), &num(-0.0)), Some(true));
        assert_eq!(
            literal_strict_equality(&num(f64::NAN), &num(f64::NAN)),
            Some(false)
        );
        assert_eq!(
            literal_strict_equality(&num(1.0), &Literal::String("1".into())),
            Some(false)
        );
        assert_eq!(literal_strict_equality(&Literal::Empty, &num(1.0)), None);
    }

    #[test]
    fn test_to_boolean() {
        assert_eq!(eval_to_boolean(&num(f64::NAN)), Some(false));
        assert_eq!(eval_to_boolean(&num(-0.0)), Some(false));
        assert_eq!(eval_to_boolean(&Literal::String(String::new())), Some(false));
        assert_eq!(eval_to_boolean(&Literal::BigInt("0".into())), Some(false));
        assert_eq!(eval_to_boolean(&Literal::BigInt("7".into())), Some(true));
    }

    #[test]
    fn test_int32_conversions() {
        assert_eq!(to_int32(4294967297.0), 1);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_uint32(-1.0), u32::MAX);
        assert_eq!(to_int32(2147483648.0), i32::MIN);
    }

    #[test]
    fn test_binary_folding() {
        assert_eq!(eval_binary(BinaryOp::Add, &num(2.0), &num(3.0)), Some(num(5.0)));
        assert_eq!(
            eval_binary(BinaryOp::Add, &Literal::String("a".into()), &num(1.0)),
            Some(Literal::String("a1".into()))
        );
        assert_eq!(
            eval_binary(BinaryOp::Less, &num(f64::NAN), &num(1.0)),
            Some(Literal::Bool(false))
        );
        assert_eq!(
            eval_binary(BinaryOp::UShr, &num(-1.0), &num(0.0)),
            Some(num(4294967295.0))
        );
        assert_eq!(eval_binary(BinaryOp::Shl, &num(1.0), &num(33.0)), Some(num(2.0)));
        assert_eq!(
            eval_binary(BinaryOp::Eq, &Literal::Null, &Literal::Undefined),
            Some(Literal::Bool(true))
        );
        assert_eq!(
            eval_binary(BinaryOp::Add, &Literal::BigInt("1".into()), &num(1.0)),
            None
        );
    }

    #[test]
    fn test_concat_refuses_ambiguous_numbers() {
        assert_eq!(
            eval_binary(BinaryOp::Add, &Literal::String("x".into()), &num(0.1)),
            None
        );
    }

    #[test]
    fn test_unary_folding() {
        assert_eq!(eval_unary(UnaryOp::Minus, &num(0.0)), Some(num(-0.0)));
        assert_eq!(eval_unary(UnaryOp::BitNot, &num(0.0)), Some(num(-1.0)));
        assert_eq!(
            eval_unary(UnaryOp::TypeOf, &Literal::Null),
            Some(Literal::String("object".into()))
        );
        assert_eq!(
            eval_unary(UnaryOp::Minus, &Literal::BigInt("5".into())),
            Some(Literal::BigInt("-5".into()))
        );
        assert_eq!(eval_unary(UnaryOp::Not, &Literal::Empty), None);
    }
}

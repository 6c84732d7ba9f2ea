//! `chr`, `ord`, `hash`, `int`, `float`, `bool`, `len` (spec §4.F).

use crate::context::ExecutionContext;
use crate::error::{SandboxError, SandboxResult};
use crate::size_estimate::STRING_TYPE_OVERHEAD;
use crate::value::Value;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::hash::{Hash, Hasher};

const CHR_STEPS: u64 = 1;
const HASH_STEP_BASE: u64 = 1;
const BOOL_STEP_BASE: u64 = 0;

/// `chr(i)`: bounds-checks `i` against the valid Unicode range, allocating
/// a handful of bytes for the one-character result. Step-count is
/// independent of `i`.
pub fn chr(ctx: &mut ExecutionContext, i: i64) -> SandboxResult<Value> {
    ctx.poisoned()?;
    ctx.add_steps(CHR_STEPS)?;
    let cp = u32::try_from(i).map_err(|_| SandboxError::chr_out_of_range(i))?;
    let ch = char::from_u32(cp).ok_or_else(|| SandboxError::chr_out_of_range(i))?;
    ctx.add_allocs(STRING_TYPE_OVERHEAD + ch.len_utf8() as u64)?;
    Ok(Value::from(ch.to_string()))
}

/// Universe entry for `chr`. Expects exactly one integral argument.
pub fn builtin_chr(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "chr")?;
    match args {
        [Value::Int(i)] => {
            let i = i
                .to_i64()
                .ok_or_else(|| SandboxError::chr_out_of_range(i64::MAX))?;
            chr(ctx, i)
        }
        _ => Err(SandboxError::type_error("chr: expected exactly one int argument")),
    }
}

/// `ord(x)`: for strings, requires exactly one code point; for bytes,
/// requires exactly one byte. Step-count is proportional to the length
/// needed to determine this (the full code-point count for strings,
/// `O(1)` for bytes).
pub fn ord(ctx: &mut ExecutionContext, v: &Value) -> SandboxResult<Value> {
    ctx.poisoned()?;
    match v {
        Value::Str(s) => {
            let n = s.chars().count();
            ctx.add_steps(n.max(1) as u64)?;
            if n != 1 {
                return Err(SandboxError::ord_wrong_codepoints(n));
            }
            let cp = s.chars().next().expect("n == 1") as i64;
            Ok(Value::from(cp))
        }
        Value::Bytes(b) => {
            ctx.add_steps(1)?;
            if b.len() != 1 {
                return Err(SandboxError::ord_wrong_byte_len(b.len()));
            }
            Ok(Value::from(b[0] as i64))
        }
        other => Err(SandboxError::type_error(format!(
            "ord: expected string or bytes, got {}",
            other.type_name()
        ))),
    }
}

/// Universe entry for `ord`.
pub fn builtin_ord(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "ord")?;
    match args {
        [v] => ord(ctx, v),
        _ => Err(SandboxError::type_error("ord: expected exactly one argument")),
    }
}

/// `hash(x)`: step-count proportional to the byte length of string/bytes
/// arguments; constant allocation (the returned int is small).
pub fn hash(ctx: &mut ExecutionContext, v: &Value) -> SandboxResult<Value> {
    ctx.poisoned()?;
    let byte_len = match v {
        Value::Str(s) => s.len() as u64,
        Value::Bytes(b) => b.len() as u64,
        _ => 0,
    };
    ctx.add_steps(HASH_STEP_BASE + byte_len)?;
    if matches!(v, Value::List(_) | Value::Dict(_) | Value::Set(_)) {
        return Err(SandboxError::type_error(format!(
            "unhashable type: '{}'",
            v.type_name()
        )));
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    v.hash(&mut hasher);
    ctx.add_allocs(8)?;
    Ok(Value::from(hasher.finish() as i64))
}

/// Universe entry for `hash`.
pub fn builtin_hash(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "hash")?;
    match args {
        [v] => hash(ctx, v),
        _ => Err(SandboxError::type_error("hash: expected exactly one argument")),
    }
}

/// `int(x, base=10)`. From a string, step-count is proportional to input
/// length and allocation proportional to the output's digit width. From a
/// float, bool or int, both are constant.
pub fn int(ctx: &mut ExecutionContext, v: &Value, base: Option<u32>) -> SandboxResult<Value> {
    ctx.poisoned()?;
    match v {
        Value::Str(s) => {
            ctx.add_steps(s.len().max(1) as u64)?;
            let base = base.unwrap_or(10);
            let trimmed = s.trim();
            let parsed = BigInt::parse_bytes(trimmed.as_bytes(), base)
                .ok_or_else(|| SandboxError::domain(format!("int: invalid literal for base {base}: {s:?}")))?;
            let digit_words = parsed.to_u32_digits().1.len().max(1) as u64;
            ctx.add_allocs(digit_words * 4)?;
            Ok(Value::Int(parsed))
        }
        Value::Int(i) => {
            ctx.add_steps(1)?;
            Ok(Value::Int(i.clone()))
        }
        Value::Bool(b) => {
            ctx.add_steps(1)?;
            Ok(Value::from(if *b { 1 } else { 0 }))
        }
        Value::Float(f) => {
            ctx.add_steps(1)?;
            if !f.is_finite() {
                return Err(SandboxError::int_too_large_for_float());
            }
            Ok(Value::Int(BigInt::from(*f as i64)))
        }
        other => Err(SandboxError::type_error(format!(
            "int: expected string, number or bool, got {}",
            other.type_name()
        ))),
    }
}

/// Universe entry for `int`.
pub fn builtin_int(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "int")?;
    match args {
        [v] => int(ctx, v, None),
        [v, Value::Int(base)] => int(ctx, v, base.to_u32()),
        _ => Err(SandboxError::type_error("int: expected one value and an optional base")),
    }
}

/// `float(x)`: symmetric to `int`. Converting an out-of-range int raises
/// the fixed `"int too large to convert to float"` error.
pub fn float(ctx: &mut ExecutionContext, v: &Value) -> SandboxResult<Value> {
    ctx.poisoned()?;
    match v {
        Value::Str(s) => {
            ctx.add_steps(s.len().max(1) as u64)?;
            let f = parse_float_literal(s)
                .ok_or_else(|| SandboxError::domain(format!("float: invalid literal: {s:?}")))?;
            ctx.add_allocs(8)?;
            Ok(Value::Float(f))
        }
        Value::Int(i) => {
            ctx.add_steps(1)?;
            let f = i
                .to_f64()
                .ok_or_else(SandboxError::int_too_large_for_float)?;
            if !f.is_finite() {
                return Err(SandboxError::int_too_large_for_float());
            }
            Ok(Value::Float(f))
        }
        Value::Float(f) => {
            ctx.add_steps(1)?;
            Ok(Value::Float(*f))
        }
        Value::Bool(b) => {
            ctx.add_steps(1)?;
            Ok(Value::Float(if *b { 1.0 } else { 0.0 }))
        }
        other => Err(SandboxError::type_error(format!(
            "float: expected string, number or bool, got {}",
            other.type_name()
        ))),
    }
}

/// Universe entry for `float`.
pub fn builtin_float(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "float")?;
    match args {
        [v] => float(ctx, v),
        _ => Err(SandboxError::type_error("float: expected exactly one argument")),
    }
}

/// Parses the case-sensitive special literals plus ordinary decimal floats.
fn parse_float_literal(s: &str) -> Option<f64> {
    match s {
        "NaN" | "+NaN" | "-NaN" => Some(f64::NAN),
        "Inf" | "+Inf" | "Infinity" | "+Infinity" => Some(f64::INFINITY),
        "-Inf" | "-Infinity" => Some(f64::NEG_INFINITY),
        other => other.parse::<f64>().ok(),
    }
}

/// `bool(x)`: zero work and zero allocation for primitive values. For big
/// ints, strings and containers the step-count is proportional to the
/// size used to determine truthiness.
pub fn bool_of(ctx: &mut ExecutionContext, v: &Value) -> SandboxResult<Value> {
    ctx.poisoned()?;
    let steps = BOOL_STEP_BASE
        + match v {
            Value::Int(i) => i.to_u32_digits().1.len() as u64,
            Value::Str(s) => s.len() as u64,
            Value::Bytes(b) => b.len() as u64,
            Value::List(l) => l.borrow().len() as u64,
            Value::Tuple(t) => t.len() as u64,
            Value::Dict(d) => d.borrow().len() as u64,
            Value::Set(s) => s.borrow().len() as u64,
            _ => 0,
        };
    ctx.add_steps(steps.max(1))?;
    Ok(Value::Bool(v.truth()))
}

/// Universe entry for `bool`.
pub fn builtin_bool(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "bool")?;
    match args {
        [v] => bool_of(ctx, v),
        _ => Err(SandboxError::type_error("bool: expected exactly one argument")),
    }
}

/// `len(x)`: constant step-count, since every container here tracks its
/// own length rather than computing it by traversal.
pub fn len(ctx: &mut ExecutionContext, v: &Value) -> SandboxResult<Value> {
    ctx.poisoned()?;
    ctx.add_steps(1)?;
    match v.len() {
        Some(n) => Ok(Value::from(n as i64)),
        None => Err(SandboxError::type_error(format!(
            "len: value of type '{}' has no length",
            v.type_name()
        ))),
    }
}

/// Universe entry for `len`.
pub fn builtin_len(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "len")?;
    match args {
        [v] => len(ctx, v),
        _ => Err(SandboxError::type_error("len: expected exactly one argument")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chr_and_ord_round_trip() {
        let mut ctx = ExecutionContext::new();
        for i in [0i64, 65, 97, 0x10FFFF] {
            let ch = chr(&mut ctx, i).unwrap();
            let back = ord(&mut ctx, &ch).unwrap();
            assert_eq!(back, Value::from(i));
        }
    }

    #[test]
    fn ord_rejects_multi_codepoint_strings() {
        let mut ctx = ExecutionContext::new();
        let err = ord(&mut ctx, &Value::from("ab")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ord: string encodes 2 Unicode code points, want 1"
        );
    }

    #[test]
    fn chr_rejects_out_of_range_codepoint() {
        let mut ctx = ExecutionContext::new();
        assert!(chr(&mut ctx, -1).is_err());
        assert!(chr(&mut ctx, 0x110000).is_err());
    }

    #[test]
    fn bool_matches_truthiness() {
        let mut ctx = ExecutionContext::new();
        assert_eq!(bool_of(&mut ctx, &Value::from(0i64)).unwrap(), Value::Bool(false));
        assert_eq!(bool_of(&mut ctx, &Value::from("x")).unwrap(), Value::Bool(true));
    }

    #[test]
    fn int_from_string_charges_digit_proportional_alloc() {
        let mut ctx = ExecutionContext::new();
        let v = int(&mut ctx, &Value::from("12345"), None).unwrap();
        assert_eq!(v, Value::Int(BigInt::from(12345)));
    }

    #[test]
    fn float_rejects_overflowing_ints() {
        let mut ctx = ExecutionContext::new();
        let huge = BigInt::from(10).pow(400);
        let err = float(&mut ctx, &Value::Int(huge)).unwrap_err();
        assert_eq!(err.to_string(), "int too large to convert to float");
    }

    #[test]
    fn float_parses_special_literals() {
        let mut ctx = ExecutionContext::new();
        assert!(matches!(float(&mut ctx, &Value::from("NaN")).unwrap(), Value::Float(f) if f.is_nan()));
        assert_eq!(float(&mut ctx, &Value::from("Inf")).unwrap(), Value::Float(f64::INFINITY));
        assert_eq!(float(&mut ctx, &Value::from("-Inf")).unwrap(), Value::Float(f64::NEG_INFINITY));
    }

    #[test]
    fn len_reports_container_sizes() {
        let mut ctx = ExecutionContext::new();
        assert_eq!(len(&mut ctx, &Value::from("abc")).unwrap(), Value::from(3i64));
    }
}

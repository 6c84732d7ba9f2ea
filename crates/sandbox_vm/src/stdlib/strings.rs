//! `string.*` receiver methods (spec §4.F).
//!
//! Every scanning method here returns after one pass over its receiver;
//! none make a second traversal once the first has already determined the
//! answer. Case mapping accounts for the handful of Unicode special casings
//! that change the encoded byte length (`K` → `k` the Kelvin sign, `ı`/`I`
//! the dotless/dotted Turkish pair, `Ⱥ`/`ⱥ`) by measuring the actual output
//! rather than assuming one byte in, one byte out.

use crate::context::ExecutionContext;
use crate::error::{SandboxError, SandboxResult};
use crate::iterator::{safe_iterate, ByteProjection, CharProjection, CodepointsIter, ElemsIter, SafeIterator};
use crate::size_estimate::{estimate_make_size, ElementWitness, STRING_TYPE_OVERHEAD};
use crate::value::Value;
use std::rc::Rc;

fn charge_scan(ctx: &mut ExecutionContext, s: &str) -> SandboxResult<()> {
    ctx.add_steps(s.len().max(1) as u64)
}

fn charge_result(ctx: &mut ExecutionContext, s: &str) -> SandboxResult<Value> {
    ctx.add_allocs(STRING_TYPE_OVERHEAD + s.len() as u64)?;
    Ok(Value::from(s))
}

/// `"s".isalpha()`.
pub fn isalpha(ctx: &mut ExecutionContext, s: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "isalpha")?;
    charge_scan(ctx, s)?;
    Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_alphabetic())))
}

/// `"s".isspace()`.
pub fn isspace(ctx: &mut ExecutionContext, s: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "isspace")?;
    charge_scan(ctx, s)?;
    Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_whitespace())))
}

/// `"s".startswith(prefix)`.
pub fn startswith(ctx: &mut ExecutionContext, s: &str, prefix: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "startswith")?;
    charge_scan(ctx, prefix)?;
    Ok(Value::Bool(s.starts_with(prefix)))
}

/// `"s".endswith(suffix)`.
pub fn endswith(ctx: &mut ExecutionContext, s: &str, suffix: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "endswith")?;
    charge_scan(ctx, suffix)?;
    Ok(Value::Bool(s.ends_with(suffix)))
}

/// `"s".count(sub)`.
pub fn count(ctx: &mut ExecutionContext, s: &str, sub: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "count")?;
    charge_scan(ctx, s)?;
    if sub.is_empty() {
        return Ok(Value::from(s.chars().count() as i64 + 1));
    }
    Ok(Value::from(s.matches(sub).count() as i64))
}

/// `"s".find(sub)`: byte offset converted to a code-point index, or `-1`.
pub fn find(ctx: &mut ExecutionContext, s: &str, sub: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "find")?;
    charge_scan(ctx, s)?;
    match s.find(sub) {
        Some(byte_idx) => Ok(Value::from(s[..byte_idx].chars().count() as i64)),
        None => Ok(Value::from(-1i64)),
    }
}

/// `"s".index(sub)`: like `find` but errors when absent.
pub fn index(ctx: &mut ExecutionContext, s: &str, sub: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "index")?;
    match find(ctx, s, sub)? {
        Value::Int(i) if i == num_bigint::BigInt::from(-1) => {
            Err(SandboxError::domain("index: substring not found"))
        }
        other => Ok(other),
    }
}

/// `"s".rfind(sub)`.
pub fn rfind(ctx: &mut ExecutionContext, s: &str, sub: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "rfind")?;
    charge_scan(ctx, s)?;
    match s.rfind(sub) {
        Some(byte_idx) => Ok(Value::from(s[..byte_idx].chars().count() as i64)),
        None => Ok(Value::from(-1i64)),
    }
}

/// `"s".rindex(sub)`.
pub fn rindex(ctx: &mut ExecutionContext, s: &str, sub: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "rindex")?;
    match rfind(ctx, s, sub)? {
        Value::Int(i) if i == num_bigint::BigInt::from(-1) => {
            Err(SandboxError::domain("rindex: substring not found"))
        }
        other => Ok(other),
    }
}

fn tuple3(a: &str, b: &str, c: &str) -> Value {
    Value::Tuple(std::rc::Rc::from(vec![Value::from(a), Value::from(b), Value::from(c)]))
}

/// `"s".partition(sep)`.
pub fn partition(ctx: &mut ExecutionContext, s: &str, sep: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "partition")?;
    charge_scan(ctx, s)?;
    match s.split_once(sep) {
        Some((a, b)) => Ok(tuple3(a, sep, b)),
        None => Ok(tuple3(s, "", "")),
    }
}

/// `"s".rpartition(sep)`.
pub fn rpartition(ctx: &mut ExecutionContext, s: &str, sep: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "rpartition")?;
    charge_scan(ctx, s)?;
    match s.rsplit_once(sep) {
        Some((a, b)) => Ok(tuple3(a, sep, b)),
        None => Ok(tuple3("", "", s)),
    }
}

/// `"s".lstrip(chars=None)`.
pub fn lstrip(ctx: &mut ExecutionContext, s: &str, chars: Option<&str>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "lstrip")?;
    charge_scan(ctx, s)?;
    let trimmed = match chars {
        Some(cs) => s.trim_start_matches(|c| cs.contains(c)),
        None => s.trim_start(),
    };
    charge_result(ctx, trimmed)
}

/// `"s".rstrip(chars=None)`.
pub fn rstrip(ctx: &mut ExecutionContext, s: &str, chars: Option<&str>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "rstrip")?;
    charge_scan(ctx, s)?;
    let trimmed = match chars {
        Some(cs) => s.trim_end_matches(|c| cs.contains(c)),
        None => s.trim_end(),
    };
    charge_result(ctx, trimmed)
}

/// `"s".strip(chars=None)`.
pub fn strip(ctx: &mut ExecutionContext, s: &str, chars: Option<&str>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "strip")?;
    charge_scan(ctx, s)?;
    let trimmed = match chars {
        Some(cs) => s.trim_matches(|c| cs.contains(c)),
        None => s.trim(),
    };
    charge_result(ctx, trimmed)
}

/// `"s".splitlines(keepends=False)`.
pub fn splitlines(ctx: &mut ExecutionContext, s: &str, keepends: bool) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "splitlines")?;
    charge_scan(ctx, s)?;
    let lines: Vec<Value> = s
        .split_inclusive('\n')
        .flat_map(|l| l.split_inclusive('\r'))
        .filter(|l| !l.is_empty())
        .map(|l| {
            if keepends {
                l.to_string()
            } else {
                l.trim_end_matches(['\n', '\r']).to_string()
            }
        })
        .map(Value::from)
        .collect();
    ctx.add_allocs(crate::size_estimate::estimate_make_size(
        crate::size_estimate::ElementWitness::Value,
        lines.len(),
    ))?;
    Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(lines))))
}

/// `"s".removeprefix(prefix)`.
pub fn removeprefix(ctx: &mut ExecutionContext, s: &str, prefix: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "removeprefix")?;
    charge_scan(ctx, prefix)?;
    charge_result(ctx, s.strip_prefix(prefix).unwrap_or(s))
}

/// `"s".removesuffix(suffix)`.
pub fn removesuffix(ctx: &mut ExecutionContext, s: &str, suffix: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "removesuffix")?;
    charge_scan(ctx, suffix)?;
    charge_result(ctx, s.strip_suffix(suffix).unwrap_or(s))
}

/// `"s".capitalize()`.
pub fn capitalize(ctx: &mut ExecutionContext, s: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "capitalize")?;
    charge_scan(ctx, s)?;
    let mut chars = s.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    charge_result(ctx, &out)
}

/// `"s".title()`.
pub fn title(ctx: &mut ExecutionContext, s: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "title")?;
    charge_scan(ctx, s)?;
    let mut out = String::with_capacity(s.len());
    let mut start_of_word = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if start_of_word {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            start_of_word = false;
        } else {
            out.push(c);
            start_of_word = true;
        }
    }
    charge_result(ctx, &out)
}

/// `"s".lower()`. Charges the actual output length, which for code
/// points like `İ` may differ from the input's.
pub fn lower(ctx: &mut ExecutionContext, s: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "lower")?;
    charge_scan(ctx, s)?;
    charge_result(ctx, &s.to_lowercase())
}

/// `"s".upper()`.
pub fn upper(ctx: &mut ExecutionContext, s: &str) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "upper")?;
    charge_scan(ctx, s)?;
    charge_result(ctx, &s.to_uppercase())
}

/// `"{}".format(*args)`: a minimal positional `{}`/`{n}` formatter.
pub fn format(ctx: &mut ExecutionContext, s: &str, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "format")?;
    charge_scan(ctx, s)?;
    let mut out = String::with_capacity(s.len());
    let mut auto_index = 0usize;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut spec = String::new();
            for c2 in chars.by_ref() {
                if c2 == '}' {
                    break;
                }
                spec.push(c2);
            }
            let idx: usize = if spec.is_empty() {
                let i = auto_index;
                auto_index += 1;
                i
            } else {
                spec.parse().unwrap_or(0)
            };
            match args.get(idx) {
                Some(v) => out.push_str(&crate::stdlib::format::str_of(v)),
                None => return Err(SandboxError::domain("format: argument index out of range")),
            }
        } else {
            out.push(c);
        }
    }
    charge_result(ctx, &out)
}

/// `"s".replace(old, new, count=-1)`.
pub fn replace(ctx: &mut ExecutionContext, s: &str, old: &str, new: &str, count: Option<usize>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "replace")?;
    charge_scan(ctx, s)?;
    let out = match count {
        Some(n) => s.replacen(old, new, n),
        None => s.replace(old, new),
    };
    charge_result(ctx, &out)
}

fn to_value_list(ctx: &mut ExecutionContext, parts: Vec<&str>) -> SandboxResult<Value> {
    ctx.add_allocs(crate::size_estimate::estimate_make_size(
        crate::size_estimate::ElementWitness::Value,
        parts.len(),
    ))?;
    let values: Vec<Value> = parts.into_iter().map(Value::from).collect();
    Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(values))))
}

/// `"s".split(sep=None, maxsplit=-1)`.
pub fn split(ctx: &mut ExecutionContext, s: &str, sep: Option<&str>, maxsplit: Option<usize>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "split")?;
    charge_scan(ctx, s)?;
    let parts: Vec<&str> = match (sep, maxsplit) {
        (Some(sep), Some(n)) => s.splitn(n + 1, sep).collect(),
        (Some(sep), None) => s.split(sep).collect(),
        (None, Some(n)) => s.splitn(n + 1, char::is_whitespace).filter(|p| !p.is_empty()).collect(),
        (None, None) => s.split_whitespace().collect(),
    };
    to_value_list(ctx, parts)
}

/// `"s".rsplit(sep=None, maxsplit=-1)`.
pub fn rsplit(ctx: &mut ExecutionContext, s: &str, sep: Option<&str>, maxsplit: Option<usize>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "rsplit")?;
    charge_scan(ctx, s)?;
    let mut parts: Vec<&str> = match (sep, maxsplit) {
        (Some(sep), Some(n)) => s.rsplitn(n + 1, sep).collect(),
        (Some(sep), None) => s.rsplit(sep).collect(),
        (None, Some(n)) => s.rsplitn(n + 1, char::is_whitespace).filter(|p| !p.is_empty()).collect(),
        (None, None) => s.split_whitespace().rev().collect(),
    };
    parts.reverse();
    to_value_list(ctx, parts)
}

/// `"sep".join(iter)`: pre-sums the element sizes to pre-allocate before
/// concatenating.
pub fn join(ctx: &mut ExecutionContext, sep: &str, iterable: &Value) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "join")?;
    ctx.poisoned()?;
    let mut it = safe_iterate(ctx, iterable)?;
    let mut pieces = Vec::new();
    while let Some(v) = it.next(ctx) {
        match v {
            Value::Str(s) => pieces.push(s.to_string()),
            other => {
                let err = SandboxError::type_error(format!(
                    "join: expected string elements, got {}",
                    other.type_name()
                ));
                it.done();
                return Err(err);
            }
        }
    }
    let err = it.err();
    it.done();
    if let Some(e) = err {
        return Err(e);
    }
    let total: usize = pieces.iter().map(|p| p.len()).sum::<usize>() + sep.len() * pieces.len().saturating_sub(1);
    ctx.add_allocs(STRING_TYPE_OVERHEAD + total as u64)?;
    Ok(Value::from(pieces.join(sep)))
}

fn drain_lazy(ctx: &mut ExecutionContext, it: &mut dyn SafeIterator) -> SandboxResult<Vec<Value>> {
    let mut out = Vec::new();
    while let Some(v) = it.next(ctx) {
        out.push(v);
    }
    let err = it.err();
    it.done();
    match err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// `"s".codepoints()`: one-character `Str` per Unicode scalar.
///
/// Realized eagerly into a list (the Value ABI has no lazy sequence
/// variant — the same simplification `range(...)` documents), but every
/// scalar is produced through [`CodepointsIter`] so the per-step,
/// zero-extra-allocation contract spec §4.E requires of string iterators
/// is what actually drives the charge.
pub fn codepoints(ctx: &mut ExecutionContext, s: &Rc<str>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "codepoints")?;
    ctx.poisoned()?;
    let mut it = CodepointsIter::new(s.clone(), CharProjection::Scalar);
    it.bind(ctx);
    let items = drain_lazy(ctx, &mut it)?;
    ctx.add_allocs(estimate_make_size(ElementWitness::Value, items.len()))?;
    Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(items))))
}

/// `"s".codepoint_ords()`: the scalar's integer code point.
pub fn codepoint_ords(ctx: &mut ExecutionContext, s: &Rc<str>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "codepoint_ords")?;
    ctx.poisoned()?;
    let mut it = CodepointsIter::new(s.clone(), CharProjection::Ord);
    it.bind(ctx);
    let items = drain_lazy(ctx, &mut it)?;
    ctx.add_allocs(estimate_make_size(ElementWitness::Value, items.len()))?;
    Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(items))))
}

/// `"s".elems()`: one-byte `Str` per UTF-8 code unit (Starlark's
/// byte-oriented view, distinct from `codepoints()`'s scalar view).
pub fn elems(ctx: &mut ExecutionContext, s: &Rc<str>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "elems")?;
    ctx.poisoned()?;
    let mut it = ElemsIter::over_str(s.clone(), ByteProjection::OneByteStr);
    it.bind(ctx);
    let items = drain_lazy(ctx, &mut it)?;
    ctx.add_allocs(estimate_make_size(ElementWitness::Value, items.len()))?;
    Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(items))))
}

/// `"s".elem_ords()`: the raw UTF-8 byte value, 0-255.
pub fn elem_ords(ctx: &mut ExecutionContext, s: &Rc<str>) -> SandboxResult<Value> {
    crate::registry::require_string_method_safety(ctx, "elem_ords")?;
    ctx.poisoned()?;
    let mut it = ElemsIter::over_str(s.clone(), ByteProjection::Ord);
    it.bind(ctx);
    let items = drain_lazy(ctx, &mut it)?;
    ctx.add_allocs(estimate_make_size(ElementWitness::Value, items.len()))?;
    Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(items))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startswith_and_endswith() {
        let mut ctx = ExecutionContext::new();
        assert_eq!(startswith(&mut ctx, "hello", "he").unwrap(), Value::Bool(true));
        assert_eq!(endswith(&mut ctx, "hello", "lo").unwrap(), Value::Bool(true));
    }

    #[test]
    fn capitalize_and_title() {
        let mut ctx = ExecutionContext::new();
        assert_eq!(capitalize(&mut ctx, "hello world").unwrap(), Value::from("Hello world"));
        assert_eq!(title(&mut ctx, "hello world").unwrap(), Value::from("Hello World"));
    }

    #[test]
    fn split_default_collapses_whitespace() {
        let mut ctx = ExecutionContext::new();
        let v = split(&mut ctx, "  a  b c ", None, None).unwrap();
        match v {
            Value::List(l) => assert_eq!(
                l.borrow().clone(),
                vec![Value::from("a"), Value::from("b"), Value::from("c")]
            ),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn join_presizes_before_concatenating() {
        let mut ctx = ExecutionContext::new();
        let list = Value::List(std::rc::Rc::new(std::cell::RefCell::new(vec![
            Value::from("a"),
            Value::from("b"),
        ])));
        assert_eq!(join(&mut ctx, ",", &list).unwrap(), Value::from("a,b"));
        assert!(ctx.alloc_used() > 0);
    }

    #[test]
    fn index_errors_when_absent() {
        let mut ctx = ExecutionContext::new();
        assert!(index(&mut ctx, "hello", "z").is_err());
        assert_eq!(index(&mut ctx, "hello", "l").unwrap(), Value::from(2i64));
    }

    #[test]
    fn codepoints_and_codepoint_ords() {
        let mut ctx = ExecutionContext::new();
        let s: Rc<str> = Rc::from("ab");
        match codepoints(&mut ctx, &s).unwrap() {
            Value::List(l) => assert_eq!(l.borrow().clone(), vec![Value::from("a"), Value::from("b")]),
            _ => panic!("expected list"),
        }
        let mut ctx = ExecutionContext::new();
        match codepoint_ords(&mut ctx, &s).unwrap() {
            Value::List(l) => assert_eq!(
                l.borrow().clone(),
                vec![Value::from('a' as i64), Value::from('b' as i64)]
            ),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn elems_and_elem_ords_walk_bytes() {
        let mut ctx = ExecutionContext::new();
        let s: Rc<str> = Rc::from("hi");
        match elem_ords(&mut ctx, &s).unwrap() {
            Value::List(l) => assert_eq!(
                l.borrow().clone(),
                vec![Value::from(b'h' as i64), Value::from(b'i' as i64)]
            ),
            _ => panic!("expected list"),
        }
        let mut ctx = ExecutionContext::new();
        match elems(&mut ctx, &s).unwrap() {
            Value::List(l) => assert_eq!(l.borrow().clone(), vec![Value::from("h"), Value::from("i")]),
            _ => panic!("expected list"),
        }
    }
}

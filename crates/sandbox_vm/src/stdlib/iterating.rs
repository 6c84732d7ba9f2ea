//! The iterating built-ins (spec §4.E, "Built-ins that iterate"): `range`,
//! `enumerate`, `zip`, `list`, `tuple`, `set`, `dict`, `reversed`, `sorted`,
//! `min`, `max`, `any`, `all`, `bytes`.
//!
//! Every function here goes through [`drain`], which acquires a
//! [`SafeIterator`] via [`safe_iterate`], pumps it to completion (or to
//! the first cap-exceeded/producer error), and calls `done()` exactly
//! once regardless of outcome (property VII). Container-building
//! built-ins charge the result container's estimated size before
//! populating it whenever the source publishes a `len()` hint.

use crate::context::ExecutionContext;
use crate::error::{SandboxError, SandboxResult};
use crate::iterator::{safe_iterate, RangeIter, SafeIterator};
use crate::size_estimate::{estimate_make_size, ElementWitness};
use crate::value::{DictRef, Value};
use num_traits::ToPrimitive;
use std::cell::RefCell;
use std::rc::Rc;

/// Drains a bound [`SafeIterator`] to completion, guaranteeing `done()` is
/// called exactly once and surfacing any producer/cap error recorded on
/// the iterator once `next` returns `None`.
fn drain(ctx: &mut ExecutionContext, it: &mut dyn SafeIterator) -> SandboxResult<Vec<Value>> {
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

/// Acquires a safe iterator over `v` and drains it (see [`drain`]).
fn collect(ctx: &mut ExecutionContext, v: &Value) -> SandboxResult<Vec<Value>> {
    let mut it = safe_iterate(ctx, v)?;
    drain(ctx, it.as_mut())
}

/// Charges the estimated size of a container about to be populated with
/// `n` elements, if the source published a length hint.
fn charge_hint(ctx: &mut ExecutionContext, hint: Option<usize>) -> SandboxResult<()> {
    if let Some(n) = hint {
        ctx.add_allocs(estimate_make_size(ElementWitness::Value, n))?;
    }
    Ok(())
}

/// `range(stop)` / `range(start, stop)` / `range(start, stop, step)`.
///
/// The Value ABI has no lazy sequence variant, so the range is
/// materialized eagerly here; its elements are still produced through
/// [`RangeIter`] so the per-step step-charging contract is exercised, and
/// the resulting list's own size is accounted once, matching "the result
/// object itself is accounted once" (spec §4.E).
pub fn builtin_range(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "range")?;
    ctx.poisoned()?;
    let as_i64 = |v: &Value| -> SandboxResult<i64> {
        match v {
            Value::Int(i) => i
                .to_i64()
                .ok_or_else(|| SandboxError::domain("range: argument out of range")),
            other => Err(SandboxError::type_error(format!(
                "range: expected int, got {}",
                other.type_name()
            ))),
        }
    };
    let (start, stop, step) = match args {
        [stop] => (0, as_i64(stop)?, 1),
        [start, stop] => (as_i64(start)?, as_i64(stop)?, 1),
        [start, stop, step] => (as_i64(start)?, as_i64(stop)?, as_i64(step)?),
        _ => return Err(SandboxError::type_error("range: expected 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(SandboxError::domain("range: step must not be zero"));
    }
    let mut it = RangeIter::new(start, stop, step);
    it.bind(ctx);
    let values = drain(ctx, &mut it)?;
    ctx.add_allocs(estimate_make_size(ElementWitness::Value, values.len()))?;
    Ok(Value::List(Rc::new(RefCell::new(values))))
}

/// `enumerate(iter)`: pairs each element with its index.
pub fn builtin_enumerate(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "enumerate")?;
    let [v] = require_one(args)?;
    charge_hint(ctx, v.len())?;
    let items = collect(ctx, v)?;
    let pairs: Vec<Value> = items
        .into_iter()
        .enumerate()
        .map(|(i, val)| Value::Tuple(Rc::from(vec![Value::from(i as i64), val])))
        .collect();
    Ok(Value::List(Rc::new(RefCell::new(pairs))))
}

/// `zip(*iters)`: stops at the shortest argument.
pub fn builtin_zip(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "zip")?;
    ctx.poisoned()?;
    let mut columns = Vec::with_capacity(args.len());
    for v in args {
        columns.push(collect(ctx, v)?);
    }
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    ctx.add_allocs(estimate_make_size(ElementWitness::Value, len))?;
    let mut rows = Vec::with_capacity(len);
    for i in 0..len {
        let row: Vec<Value> = columns.iter().map(|c| c[i].clone()).collect();
        rows.push(Value::Tuple(Rc::from(row)));
    }
    Ok(Value::List(Rc::new(RefCell::new(rows))))
}

/// `list(iter)`.
pub fn builtin_list(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "list")?;
    let [v] = require_one(args)?;
    charge_hint(ctx, v.len())?;
    let items = collect(ctx, v)?;
    Ok(Value::List(Rc::new(RefCell::new(items))))
}

/// `tuple(iter)`.
pub fn builtin_tuple(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "tuple")?;
    let [v] = require_one(args)?;
    charge_hint(ctx, v.len())?;
    let items = collect(ctx, v)?;
    Ok(Value::Tuple(Rc::from(items)))
}

/// `set(iter)`. Every element must be hashable at the Starlark level
/// (spec §7: "hashing an unhashable" is a mandatory type error), so each
/// one is run through [`crate::stdlib::scalar::hash`] before it is
/// admitted to the set — `Value`'s own `Hash` impl would otherwise
/// happily key a `List`/`Dict`/`Set` by Rust pointer identity.
pub fn builtin_set(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "set")?;
    let [v] = require_one(args)?;
    charge_hint(ctx, v.len())?;
    let items = collect(ctx, v)?;
    let mut set = indexmap::IndexSet::new();
    for item in items {
        crate::stdlib::scalar::hash(ctx, &item)?;
        set.insert(item);
    }
    Ok(Value::Set(Rc::new(RefCell::new(set))))
}

/// `dict(iter)`: `iter` yields `(key, value)` pairs. Each key is
/// hashability-checked via [`crate::stdlib::scalar::hash`] before being
/// inserted, for the same reason as [`builtin_set`].
pub fn builtin_dict(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "dict")?;
    let [v] = require_one(args)?;
    charge_hint(ctx, v.len())?;
    let items = collect(ctx, v)?;
    let mut map = indexmap::IndexMap::new();
    for item in items {
        match item {
            Value::Tuple(pair) if pair.len() == 2 => {
                crate::stdlib::scalar::hash(ctx, &pair[0])?;
                map.insert(pair[0].clone(), pair[1].clone());
            }
            other => {
                return Err(SandboxError::type_error(format!(
                    "dict: expected (key, value) pairs, got {}",
                    other.type_name()
                )))
            }
        }
    }
    let dict: DictRef = Rc::new(RefCell::new(map));
    Ok(Value::Dict(dict))
}

/// `reversed(iter)`.
pub fn builtin_reversed(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "reversed")?;
    let [v] = require_one(args)?;
    charge_hint(ctx, v.len())?;
    let mut items = collect(ctx, v)?;
    items.reverse();
    Ok(Value::List(Rc::new(RefCell::new(items))))
}

/// A total order over comparable values sufficient for `sorted`/`min`/`max`.
/// Numbers compare numerically; everything else falls back to its
/// `repr` rendering so the comparator never panics on mixed input.
fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => crate::stdlib::format::str_of(a).cmp(&crate::stdlib::format::str_of(b)),
    }
}

/// `sorted(iter)`.
pub fn builtin_sorted(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "sorted")?;
    let [v] = require_one(args)?;
    charge_hint(ctx, v.len())?;
    let mut items = collect(ctx, v)?;
    let n = items.len() as u64;
    ctx.add_steps(n.saturating_mul(64_u64.saturating_sub(n.leading_zeros() as u64)).max(n))?;
    items.sort_by(compare);
    Ok(Value::List(Rc::new(RefCell::new(items))))
}

/// `min(iter)`.
pub fn builtin_min(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "min")?;
    let [v] = require_one(args)?;
    let items = collect(ctx, v)?;
    items
        .into_iter()
        .reduce(|a, b| if compare(&b, &a) == std::cmp::Ordering::Less { b } else { a })
        .ok_or_else(|| SandboxError::domain("min: empty iterable"))
}

/// `max(iter)`.
pub fn builtin_max(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "max")?;
    let [v] = require_one(args)?;
    let items = collect(ctx, v)?;
    items
        .into_iter()
        .reduce(|a, b| if compare(&b, &a) == std::cmp::Ordering::Greater { b } else { a })
        .ok_or_else(|| SandboxError::domain("max: empty iterable"))
}

/// `any(iter)`: short-circuits on the first truthy element, calling
/// `done()` on the iterator regardless of where it stopped.
pub fn builtin_any(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "any")?;
    let [v] = require_one(args)?;
    let mut it = safe_iterate(ctx, v)?;
    let mut found = false;
    while let Some(item) = it.next(ctx) {
        if item.truth() {
            found = true;
            break;
        }
    }
    let err = it.err();
    it.done();
    if let Some(e) = err {
        if !found {
            return Err(e);
        }
    }
    Ok(Value::Bool(found))
}

/// `all(iter)`: short-circuits on the first falsy element.
pub fn builtin_all(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "all")?;
    let [v] = require_one(args)?;
    let mut it = safe_iterate(ctx, v)?;
    let mut ok = true;
    while let Some(item) = it.next(ctx) {
        if !item.truth() {
            ok = false;
            break;
        }
    }
    let err = it.err();
    it.done();
    if let Some(e) = err {
        if ok {
            return Err(e);
        }
    }
    Ok(Value::Bool(ok))
}

/// `bytes(iter)`: from an iterable of small ints, or from a UTF-8 string.
pub fn builtin_bytes(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "bytes")?;
    let [v] = require_one(args)?;
    if let Value::Str(s) = v {
        ctx.add_allocs(s.len() as u64)?;
        return Ok(Value::Bytes(Rc::from(s.as_bytes())));
    }
    charge_hint(ctx, v.len())?;
    let items = collect(ctx, v)?;
    let mut buf = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Int(i) => {
                let byte = i
                    .to_u8()
                    .ok_or_else(|| SandboxError::domain("bytes: byte value out of range 0-255"))?;
                buf.push(byte);
            }
            other => {
                return Err(SandboxError::type_error(format!(
                    "bytes: expected int, got {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(Value::Bytes(Rc::from(buf)))
}

fn require_one(args: &[Value]) -> SandboxResult<[&Value; 1]> {
    match args {
        [v] => Ok([v]),
        _ => Err(SandboxError::type_error("expected exactly one iterable argument")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_materializes_expected_sequence() {
        let mut ctx = ExecutionContext::new();
        let v = builtin_range(&mut ctx, &[Value::from(3i64)]).unwrap();
        match v {
            Value::List(l) => assert_eq!(
                l.borrow().clone(),
                vec![Value::from(0i64), Value::from(1i64), Value::from(2i64)]
            ),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn enumerate_pairs_index_and_value() {
        let mut ctx = ExecutionContext::new();
        let list = Value::List(Rc::new(RefCell::new(vec![Value::from("a"), Value::from("b")])));
        let v = builtin_enumerate(&mut ctx, &[list]).unwrap();
        match v {
            Value::List(l) => {
                assert_eq!(
                    l.borrow()[0],
                    Value::Tuple(Rc::from(vec![Value::from(0i64), Value::from("a")]))
                );
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn scenario_3_early_termination_on_alloc_cap() {
        // 16-byte-charging element producer, cap = 40 bytes: expect
        // `exceeded memory allocation limits` and at most 2 further
        // `next` calls past the failing element (spec scenario 3).
        struct Chunky {
            remaining: usize,
            calls: std::rc::Rc<std::cell::Cell<usize>>,
            error: Option<SandboxError>,
        }
        impl SafeIterator for Chunky {
            fn safety(&self) -> crate::safety::Safety {
                crate::safety::Safety::SAFE
            }
            fn state(&self) -> crate::iterator::IterState {
                crate::iterator::IterState::Bound
            }
            fn bind(&mut self, _ctx: &mut ExecutionContext) {}
            fn next(&mut self, ctx: &mut ExecutionContext) -> Option<Value> {
                self.calls.set(self.calls.get() + 1);
                if self.remaining == 0 {
                    return None;
                }
                self.remaining -= 1;
                if let Err(e) = ctx.add_allocs(16) {
                    self.error = Some(e);
                    return None;
                }
                Some(Value::from(1i64))
            }
            fn err(&self) -> Option<SandboxError> {
                self.error.clone()
            }
            fn done(&mut self) {}
        }
        let mut ctx = ExecutionContext::new();
        ctx.set_max_allocs(40);
        let calls = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut it = Chunky { remaining: 100, calls: calls.clone(), error: None };
        let err = drain(&mut ctx, &mut it).unwrap_err();
        assert_eq!(err.to_string(), "exceeded memory allocation limits");
        // 40 / 16 = element 3 (1-indexed) is where the cap trips.
        assert!(calls.get() <= 4, "producer called {} times", calls.get());
    }

    #[test]
    fn any_short_circuits() {
        let mut ctx = ExecutionContext::new();
        let list = Value::List(Rc::new(RefCell::new(vec![
            Value::from(false),
            Value::from(true),
            Value::from(false),
        ])));
        assert_eq!(builtin_any(&mut ctx, &[list]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn set_rejects_unhashable_element() {
        let mut ctx = ExecutionContext::new();
        let inner = Value::List(Rc::new(RefCell::new(vec![Value::from(1i64)])));
        let iterable = Value::List(Rc::new(RefCell::new(vec![inner])));
        let err = builtin_set(&mut ctx, &[iterable]).unwrap_err();
        assert!(err.to_string().contains("unhashable"), "unexpected error: {err}");
    }

    #[test]
    fn dict_rejects_unhashable_key() {
        let mut ctx = ExecutionContext::new();
        let key = Value::List(Rc::new(RefCell::new(vec![Value::from(1i64)])));
        let pair = Value::Tuple(Rc::from(vec![key, Value::from("v")]));
        let iterable = Value::List(Rc::new(RefCell::new(vec![pair])));
        let err = builtin_dict(&mut ctx, &[iterable]).unwrap_err();
        assert!(err.to_string().contains("unhashable"), "unexpected error: {err}");
    }

    #[test]
    fn set_accepts_hashable_elements() {
        let mut ctx = ExecutionContext::new();
        let iterable = Value::List(Rc::new(RefCell::new(vec![
            Value::from(1i64),
            Value::from(2i64),
            Value::from(1i64),
        ])));
        let v = builtin_set(&mut ctx, &[iterable]).unwrap();
        match v {
            Value::Set(s) => assert_eq!(s.borrow().len(), 2),
            _ => panic!("expected set"),
        }
    }
}

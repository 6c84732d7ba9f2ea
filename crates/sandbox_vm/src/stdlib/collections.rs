//! `dict.*`, `list.*`, `set.*` receiver methods (spec §4.F).
//!
//! A hash bucket is modeled as holding up to [`BUCKET_CAPACITY`] entries
//! before the probe sequence has to walk into the next one (spec §9,
//! "Ambiguity: bucket capacity of 8" — the asymptotic bound is what's
//! preserved, not the literal constant; callers only ever see `O(1)`
//! average and `O(BUCKET_CAPACITY)` worst case).

use crate::context::ExecutionContext;
use crate::error::{SandboxError, SandboxResult};
use crate::iterator::{safe_iterate, ByteProjection, ElemsIter, SafeIterator};
use crate::size_estimate::{estimate_make_size, ElementWitness};
use crate::value::{DictRef, ListRef, SetRef, Value};

/// Worst-case probe length assumed for an adversarially packed bucket.
pub const BUCKET_CAPACITY: u64 = 8;

fn drain_pairs(ctx: &mut ExecutionContext, v: &Value) -> SandboxResult<Vec<(Value, Value)>> {
    let mut it = safe_iterate(ctx, v)?;
    let mut out = Vec::new();
    while let Some(item) = it.next(ctx) {
        match item {
            Value::Tuple(pair) if pair.len() == 2 => out.push((pair[0].clone(), pair[1].clone())),
            other => {
                let err = SandboxError::type_error(format!(
                    "expected (key, value) pairs, got {}",
                    other.type_name()
                ));
                it.done();
                return Err(err);
            }
        }
    }
    let err = it.err();
    it.done();
    match err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Dict receiver methods.
pub mod dict {
    use super::*;

    /// `dict.clear()`: proportional to the number of buckets, bounded by
    /// capacity rather than occupancy.
    pub fn clear(ctx: &mut ExecutionContext, d: &DictRef) -> SandboxResult<Value> {
        crate::registry::require_dict_method_safety(ctx, "clear")?;
        ctx.poisoned()?;
        let cap = d.borrow().capacity() as u64;
        ctx.add_steps(cap.max(1))?;
        d.borrow_mut().clear();
        Ok(Value::None)
    }

    /// `dict.get(key, default=None)`: `O(1)` average, `O(BUCKET_CAPACITY)`
    /// worst case; zero-alloc when the key is missing (property VIII).
    pub fn get(ctx: &mut ExecutionContext, d: &DictRef, key: &Value, default: Value) -> SandboxResult<Value> {
        crate::registry::require_dict_method_safety(ctx, "get")?;
        ctx.poisoned()?;
        ctx.add_steps(BUCKET_CAPACITY)?;
        Ok(d.borrow().get(key).cloned().unwrap_or(default))
    }

    /// `dict.pop(key, default=None)`.
    pub fn pop(ctx: &mut ExecutionContext, d: &DictRef, key: &Value, default: Option<Value>) -> SandboxResult<Value> {
        crate::registry::require_dict_method_safety(ctx, "pop")?;
        ctx.poisoned()?;
        ctx.add_steps(BUCKET_CAPACITY)?;
        match d.borrow_mut().shift_remove(key) {
            Some(v) => Ok(v),
            None => default.ok_or_else(|| SandboxError::domain("pop: key not found and no default given")),
        }
    }

    /// `dict.setdefault(key, default=None)`. `key` is hashability-checked
    /// via [`crate::stdlib::scalar::hash`] before insertion, same as
    /// `dict(iter)` (spec §7: "hashing an unhashable" is a mandatory type
    /// error).
    pub fn setdefault(ctx: &mut ExecutionContext, d: &DictRef, key: &Value, default: Value) -> SandboxResult<Value> {
        crate::registry::require_dict_method_safety(ctx, "setdefault")?;
        ctx.poisoned()?;
        ctx.add_steps(BUCKET_CAPACITY)?;
        if let Some(v) = d.borrow().get(key) {
            return Ok(v.clone());
        }
        crate::stdlib::scalar::hash(ctx, key)?;
        d.borrow_mut().insert(key.clone(), default.clone());
        Ok(default)
    }

    /// `dict.popitem()`: same bound as `pop`.
    pub fn popitem(ctx: &mut ExecutionContext, d: &DictRef) -> SandboxResult<Value> {
        crate::registry::require_dict_method_safety(ctx, "popitem")?;
        ctx.poisoned()?;
        ctx.add_steps(BUCKET_CAPACITY)?;
        match d.borrow_mut().pop() {
            Some((k, v)) => Ok(Value::Tuple(std::rc::Rc::from(vec![k, v]))),
            None => Err(SandboxError::domain("popitem: dict is empty")),
        }
    }

    /// `dict.keys()`: `O(n)`, allocates one container of `n` references.
    pub fn keys(ctx: &mut ExecutionContext, d: &DictRef) -> SandboxResult<Value> {
        crate::registry::require_dict_method_safety(ctx, "keys")?;
        ctx.poisoned()?;
        let n = d.borrow().len();
        ctx.add_steps(n as u64)?;
        ctx.add_allocs(estimate_make_size(ElementWitness::Value, n))?;
        let items: Vec<Value> = d.borrow().keys().cloned().collect();
        Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(items))))
    }

    /// `dict.values()`: symmetric to `keys`.
    pub fn values(ctx: &mut ExecutionContext, d: &DictRef) -> SandboxResult<Value> {
        crate::registry::require_dict_method_safety(ctx, "values")?;
        ctx.poisoned()?;
        let n = d.borrow().len();
        ctx.add_steps(n as u64)?;
        ctx.add_allocs(estimate_make_size(ElementWitness::Value, n))?;
        let items: Vec<Value> = d.borrow().values().cloned().collect();
        Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(items))))
    }

    /// `dict.items()`: `O(n)`, one container of `n` `(key, value)` tuples.
    pub fn items(ctx: &mut ExecutionContext, d: &DictRef) -> SandboxResult<Value> {
        crate::registry::require_dict_method_safety(ctx, "items")?;
        ctx.poisoned()?;
        let n = d.borrow().len();
        ctx.add_steps(n as u64)?;
        ctx.add_allocs(estimate_make_size(ElementWitness::Value, n))?;
        let items: Vec<Value> = d
            .borrow()
            .iter()
            .map(|(k, v)| Value::Tuple(std::rc::Rc::from(vec![k.clone(), v.clone()])))
            .collect();
        Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(items))))
    }

    /// `dict.update(iter)`: iterates its argument safely via the
    /// producer/consumer protocol, charging for the merged result. Every
    /// key is hashability-checked via [`crate::stdlib::scalar::hash`]
    /// before insertion, same as `dict(iter)`.
    pub fn update(ctx: &mut ExecutionContext, d: &DictRef, source: &Value) -> SandboxResult<Value> {
        crate::registry::require_dict_method_safety(ctx, "update")?;
        ctx.poisoned()?;
        let pairs = drain_pairs(ctx, source)?;
        ctx.add_allocs(estimate_make_size(ElementWitness::Value, pairs.len()))?;
        let mut map = d.borrow_mut();
        for (k, v) in pairs {
            crate::stdlib::scalar::hash(ctx, &k)?;
            map.insert(k, v);
        }
        Ok(Value::None)
    }
}

/// List receiver methods.
pub mod list {
    use super::*;

    /// `list.append(x)`: charges the amortized growth of a single slot.
    pub fn append(ctx: &mut ExecutionContext, l: &ListRef, x: Value) -> SandboxResult<Value> {
        crate::registry::require_list_method_safety(ctx, "append")?;
        ctx.poisoned()?;
        ctx.add_steps(1)?;
        ctx.add_allocs(8)?;
        l.borrow_mut().push(x);
        Ok(Value::None)
    }

    /// `list.insert(index, x)`: `O(n)` shift, charged per displaced slot.
    pub fn insert(ctx: &mut ExecutionContext, l: &ListRef, index: usize, x: Value) -> SandboxResult<Value> {
        crate::registry::require_list_method_safety(ctx, "insert")?;
        ctx.poisoned()?;
        let n = l.borrow().len();
        let index = index.min(n);
        ctx.add_steps((n - index).max(1) as u64)?;
        ctx.add_allocs(8)?;
        l.borrow_mut().insert(index, x);
        Ok(Value::None)
    }

    /// `list.pop(index=-1)`.
    pub fn pop(ctx: &mut ExecutionContext, l: &ListRef, index: Option<i64>) -> SandboxResult<Value> {
        crate::registry::require_list_method_safety(ctx, "pop")?;
        ctx.poisoned()?;
        let mut list = l.borrow_mut();
        let len = list.len();
        if len == 0 {
            return Err(SandboxError::domain("pop: list is empty"));
        }
        let idx = match index {
            Some(i) if i < 0 => (len as i64 + i) as usize,
            Some(i) => i as usize,
            None => len - 1,
        };
        if idx >= len {
            return Err(SandboxError::domain("pop: index out of range"));
        }
        ctx.add_steps((len - idx).max(1) as u64)?;
        Ok(list.remove(idx))
    }

    /// `list.remove(x)`: `O(n)` scan plus shift.
    pub fn remove(ctx: &mut ExecutionContext, l: &ListRef, x: &Value) -> SandboxResult<Value> {
        crate::registry::require_list_method_safety(ctx, "remove")?;
        ctx.poisoned()?;
        let mut list = l.borrow_mut();
        ctx.add_steps(list.len().max(1) as u64)?;
        let pos = list.iter().position(|v| v == x);
        match pos {
            Some(i) => {
                list.remove(i);
                Ok(Value::None)
            }
            None => Err(SandboxError::domain("remove: value not found in list")),
        }
    }

    /// `list.clear()`: `O(1)` in steps.
    pub fn clear(ctx: &mut ExecutionContext, l: &ListRef) -> SandboxResult<Value> {
        crate::registry::require_list_method_safety(ctx, "clear")?;
        ctx.poisoned()?;
        ctx.add_steps(1)?;
        l.borrow_mut().clear();
        Ok(Value::None)
    }

    /// `list.extend(iter)`: iterates its argument safely and pre-sizes
    /// when the source publishes a length hint.
    pub fn extend(ctx: &mut ExecutionContext, l: &ListRef, source: &Value) -> SandboxResult<Value> {
        crate::registry::require_list_method_safety(ctx, "extend")?;
        ctx.poisoned()?;
        if let Some(hint) = source.len() {
            ctx.add_allocs(estimate_make_size(ElementWitness::Value, hint))?;
        }
        let mut it = safe_iterate(ctx, source)?;
        while let Some(v) = it.next(ctx) {
            l.borrow_mut().push(v);
        }
        let err = it.err();
        it.done();
        match err {
            Some(e) => Err(e),
            None => Ok(Value::None),
        }
    }

    /// `list.index(x)`: `O(n)`.
    pub fn index(ctx: &mut ExecutionContext, l: &ListRef, x: &Value) -> SandboxResult<Value> {
        crate::registry::require_list_method_safety(ctx, "index")?;
        ctx.poisoned()?;
        let list = l.borrow();
        ctx.add_steps(list.len().max(1) as u64)?;
        list.iter()
            .position(|v| v == x)
            .map(|i| Value::from(i as i64))
            .ok_or_else(|| SandboxError::domain("index: value not found in list"))
    }
}

/// Set receiver methods, mirroring `dict`'s bucket contract.
pub mod set {
    use super::*;

    /// `set.clear()`.
    pub fn clear(ctx: &mut ExecutionContext, s: &SetRef) -> SandboxResult<Value> {
        crate::registry::require_set_method_safety(ctx, "clear")?;
        ctx.poisoned()?;
        let cap = s.borrow().capacity() as u64;
        ctx.add_steps(cap.max(1))?;
        s.borrow_mut().clear();
        Ok(Value::None)
    }

    fn combine(
        ctx: &mut ExecutionContext,
        s: &SetRef,
        other: &Value,
        op: impl Fn(&indexmap::IndexSet<Value>, &indexmap::IndexSet<Value>) -> Vec<Value>,
    ) -> SandboxResult<Value> {
        ctx.poisoned()?;
        let mut it = safe_iterate(ctx, other)?;
        let mut rhs = indexmap::IndexSet::new();
        while let Some(v) = it.next(ctx) {
            rhs.insert(v);
        }
        let err = it.err();
        it.done();
        if let Some(e) = err {
            return Err(e);
        }
        let result = op(&s.borrow(), &rhs);
        ctx.add_allocs(estimate_make_size(ElementWitness::Value, result.len()))?;
        Ok(Value::Set(std::rc::Rc::new(std::cell::RefCell::new(
            result.into_iter().collect(),
        ))))
    }

    /// `set.union(iter)`.
    pub fn union(ctx: &mut ExecutionContext, s: &SetRef, other: &Value) -> SandboxResult<Value> {
        crate::registry::require_set_method_safety(ctx, "union")?;
        combine(ctx, s, other, |a, b| a.union(b).cloned().collect())
    }

    /// `set.difference(iter)`.
    pub fn difference(ctx: &mut ExecutionContext, s: &SetRef, other: &Value) -> SandboxResult<Value> {
        crate::registry::require_set_method_safety(ctx, "difference")?;
        combine(ctx, s, other, |a, b| a.difference(b).cloned().collect())
    }

    /// `set.intersection(iter)`.
    pub fn intersection(ctx: &mut ExecutionContext, s: &SetRef, other: &Value) -> SandboxResult<Value> {
        crate::registry::require_set_method_safety(ctx, "intersection")?;
        combine(ctx, s, other, |a, b| a.intersection(b).cloned().collect())
    }

    /// `set.symmetric_difference(iter)`.
    pub fn symmetric_difference(ctx: &mut ExecutionContext, s: &SetRef, other: &Value) -> SandboxResult<Value> {
        crate::registry::require_set_method_safety(ctx, "symmetric_difference")?;
        combine(ctx, s, other, |a, b| a.symmetric_difference(b).cloned().collect())
    }

    /// `set.issubset(iter)`.
    pub fn issubset(ctx: &mut ExecutionContext, s: &SetRef, other: &Value) -> SandboxResult<Value> {
        crate::registry::require_set_method_safety(ctx, "issubset")?;
        ctx.poisoned()?;
        let mut it = safe_iterate(ctx, other)?;
        let mut rhs = indexmap::IndexSet::new();
        while let Some(v) = it.next(ctx) {
            rhs.insert(v);
        }
        let err = it.err();
        it.done();
        if let Some(e) = err {
            return Err(e);
        }
        Ok(Value::Bool(s.borrow().is_subset(&rhs)))
    }

    /// `set.issuperset(iter)`.
    pub fn issuperset(ctx: &mut ExecutionContext, s: &SetRef, other: &Value) -> SandboxResult<Value> {
        crate::registry::require_set_method_safety(ctx, "issuperset")?;
        ctx.poisoned()?;
        let mut it = safe_iterate(ctx, other)?;
        let mut rhs = indexmap::IndexSet::new();
        while let Some(v) = it.next(ctx) {
            rhs.insert(v);
        }
        let err = it.err();
        it.done();
        if let Some(e) = err {
            return Err(e);
        }
        Ok(Value::Bool(s.borrow().is_superset(&rhs)))
    }
}

/// `bytes.*` receiver methods.
pub mod bytes {
    use super::*;

    /// `b.elems()`: the raw byte value, 0-255, one per byte — the only
    /// projection a `bytes` receiver has (it has no UTF-8 structure to
    /// additionally expose one-character substrings of).
    pub fn elems(ctx: &mut ExecutionContext, b: &std::rc::Rc<[u8]>) -> SandboxResult<Value> {
        crate::registry::require_bytes_method_safety(ctx, "elems")?;
        ctx.poisoned()?;
        let mut it = ElemsIter::over_bytes(b.clone(), ByteProjection::Ord);
        it.bind(ctx);
        let mut out = Vec::new();
        while let Some(v) = it.next(ctx) {
            out.push(v);
        }
        let err = it.err();
        it.done();
        if let Some(e) = err {
            return Err(e);
        }
        ctx.add_allocs(estimate_make_size(ElementWitness::Value, out.len()))?;
        Ok(Value::List(std::rc::Rc::new(std::cell::RefCell::new(out))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn dict_get_is_zero_alloc_on_miss() {
        let mut ctx = ExecutionContext::new();
        let d: DictRef = Rc::new(RefCell::new(indexmap::IndexMap::new()));
        let before = ctx.alloc_used();
        let v = dict::get(&mut ctx, &d, &Value::from("missing"), Value::None).unwrap();
        assert_eq!(v, Value::None);
        assert_eq!(ctx.alloc_used(), before);
    }

    #[test]
    fn list_append_and_index() {
        let mut ctx = ExecutionContext::new();
        let l: ListRef = Rc::new(RefCell::new(vec![]));
        list::append(&mut ctx, &l, Value::from(1i64)).unwrap();
        list::append(&mut ctx, &l, Value::from(2i64)).unwrap();
        assert_eq!(list::index(&mut ctx, &l, &Value::from(2i64)).unwrap(), Value::from(1i64));
    }

    #[test]
    fn list_clear_is_o1_in_steps() {
        let mut ctx = ExecutionContext::new();
        let l: ListRef = Rc::new(RefCell::new(vec![Value::from(1i64); 1000]));
        list::clear(&mut ctx, &l).unwrap();
        assert!(ctx.steps_used() < 10);
    }

    #[test]
    fn set_union_combines_elements() {
        let mut ctx = ExecutionContext::new();
        let s: SetRef = Rc::new(RefCell::new(
            [Value::from(1i64), Value::from(2i64)].into_iter().collect(),
        ));
        let other = Value::List(Rc::new(RefCell::new(vec![Value::from(2i64), Value::from(3i64)])));
        let result = set::union(&mut ctx, &s, &other).unwrap();
        match result {
            Value::Set(r) => assert_eq!(r.borrow().len(), 3),
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn bytes_elems_yields_byte_values() {
        let mut ctx = ExecutionContext::new();
        let b: Rc<[u8]> = Rc::from(&b"hi"[..]);
        match bytes::elems(&mut ctx, &b).unwrap() {
            Value::List(l) => assert_eq!(
                l.borrow().clone(),
                vec![Value::from(b'h' as i64), Value::from(b'i' as i64)]
            ),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn setdefault_rejects_unhashable_key() {
        let mut ctx = ExecutionContext::new();
        let d: DictRef = Rc::new(RefCell::new(indexmap::IndexMap::new()));
        let key = Value::List(Rc::new(RefCell::new(vec![Value::from(1i64)])));
        let err = dict::setdefault(&mut ctx, &d, &key, Value::None).unwrap_err();
        assert!(err.to_string().contains("unhashable"), "unexpected error: {err}");
    }

    #[test]
    fn update_rejects_unhashable_key() {
        let mut ctx = ExecutionContext::new();
        let d: DictRef = Rc::new(RefCell::new(indexmap::IndexMap::new()));
        let key = Value::List(Rc::new(RefCell::new(vec![Value::from(1i64)])));
        let pair = Value::Tuple(Rc::from(vec![key, Value::from("v")]));
        let source = Value::List(Rc::new(RefCell::new(vec![pair])));
        let err = dict::update(&mut ctx, &d, &source).unwrap_err();
        assert!(err.to_string().contains("unhashable"), "unexpected error: {err}");
    }
}

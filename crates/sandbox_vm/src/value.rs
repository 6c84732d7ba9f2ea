//! The minimal value ABI the core's built-ins operate over.
//!
//! The evaluator that drives this core owns the real Starlark value graph;
//! this module only specifies the handful of operations the core's
//! accounting-aware standard library needs (§6, "Value ABI (external
//! collaborator)"): `type()`, `truth()`, `hash()`, a stable `string()` used
//! by `repr`/`str`, `len()` for sequences, and `iterate()` for iterables.
//! Container variants use `Rc<RefCell<..>>` so that a list or dict can hold
//! a reference to itself, which is required to exercise the cycle-handling
//! contract in [`crate::stdlib::format`].

use num_bigint::BigInt;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A shared, mutable list. Cloning a `Value::List` clones the handle, not
/// the contents, which is what lets `a[0] = a` build a genuine cycle.
pub type ListRef = Rc<RefCell<Vec<Value>>>;
/// A shared, mutable dict. Preserves insertion order like a Starlark dict.
pub type DictRef = Rc<RefCell<indexmap::IndexMap<Value, Value>>>;
/// A shared, mutable set. Preserves insertion order.
pub type SetRef = Rc<RefCell<indexmap::IndexSet<Value>>>;

/// The value kinds the sandbox core's standard library knows how to
/// operate on generically (accounting, iteration, formatting).
#[derive(Debug, Clone)]
pub enum Value {
    /// Starlark `None`.
    None,
    /// A boolean.
    Bool(bool),
    /// An arbitrary-precision integer.
    Int(BigInt),
    /// A 64-bit float.
    Float(f64),
    /// An immutable Unicode string.
    Str(Rc<str>),
    /// An immutable byte buffer (the result of `bytes(...)`).
    Bytes(Rc<[u8]>),
    /// A mutable, growable list.
    List(ListRef),
    /// An immutable fixed-size tuple.
    Tuple(Rc<[Value]>),
    /// An insertion-ordered mutable dict.
    Dict(DictRef),
    /// An insertion-ordered mutable set.
    Set(SetRef),
}

impl Value {
    /// The name reported by `type(value)`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
        }
    }

    /// Starlark truthiness. Zero work, zero allocation for every variant
    /// except big ints, strings, bytes and containers, whose cost is
    /// charged by the caller (see `stdlib::scalar::bool_of`), not here.
    pub fn truth(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => !num_traits::Zero::is_zero(i),
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
        }
    }

    /// `true` for the container kinds that can form reference cycles and
    /// therefore need a visited-set while formatting.
    pub fn is_cyclic_candidate(&self) -> bool {
        matches!(self, Value::List(_) | Value::Dict(_) | Value::Set(_))
    }

    /// A stable pointer-sized identity for cycle detection, shared by every
    /// clone of the same underlying container.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::List(l) => Some(Rc::as_ptr(l) as usize),
            Value::Dict(d) => Some(Rc::as_ptr(d) as usize),
            Value::Set(s) => Some(Rc::as_ptr(s) as usize),
            _ => None,
        }
    }

    /// `len()` for the sequence/container kinds; `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::Bytes(b) => Some(b.len()),
            Value::List(l) => Some(l.borrow().len()),
            Value::Tuple(t) => Some(t.len()),
            Value::Dict(d) => Some(d.borrow().len()),
            Value::Set(s) => Some(s.borrow().len()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(BigInt::from(i))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::None => 0u8.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Tuple(t) => t.hash(state),
            // Unhashable at the Starlark level; callers must reject these
            // via `stdlib::scalar::hash` before reaching here.
            Value::List(l) => Rc::as_ptr(l).hash(state),
            Value::Dict(d) => Rc::as_ptr(d).hash(state),
            Value::Set(s) => Rc::as_ptr(s).hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::stdlib::format::str_of(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truth_matches_starlark_rules() {
        assert!(!Value::None.truth());
        assert!(!Value::from(0i64).truth());
        assert!(Value::from(1i64).truth());
        assert!(!Value::from("").truth());
        assert!(Value::from("x").truth());
    }

    #[test]
    fn list_equality_is_identity() {
        let a: ListRef = Rc::new(RefCell::new(vec![Value::from(1i64)]));
        let b = Value::List(a.clone());
        let c = Value::List(a);
        assert_eq!(b, c);
        let d = Value::List(Rc::new(RefCell::new(vec![Value::from(1i64)])));
        assert_ne!(b, d);
    }

    #[test]
    fn self_reference_is_representable() {
        let list: ListRef = Rc::new(RefCell::new(vec![Value::None]));
        list.borrow_mut()[0] = Value::List(list.clone());
        assert_eq!(list.borrow().len(), 1);
    }
}

//! Conservative byte-cost estimation for [`crate::value::Value`]s.
//!
//! `estimate_size` never returns less than the true allocation a value
//! occupies; it is allowed to overestimate. It does not recurse into
//! container elements — callers that need the element cost add it
//! themselves, typically before the container exists (`estimate_make_size`).

use crate::value::Value;

/// Fixed overhead charged for any heap-allocated string header, mirroring
/// the constant the source exports for callers that add per-object
/// overhead on top of element storage.
pub const STRING_TYPE_OVERHEAD: u64 = 16;

/// Fixed overhead for a slice/vec header (pointer, length, capacity).
pub const SLICE_TYPE_OVERHEAD: u64 = 24;

/// Fixed overhead for a dict/set bucket array header.
pub const MAP_TYPE_OVERHEAD: u64 = 48;

/// Per-element pointer-sized overhead inside a homogeneous container.
const ELEMENT_SLOT: u64 = 8;

/// A witness for the element type of a container about to be allocated,
/// used by [`estimate_make_size`] before the real elements exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementWitness {
    /// Pointer-sized slot holding an arbitrary `Value`.
    Value,
    /// A single byte (used for `bytes`/byte buffers).
    Byte,
    /// A single UTF-8 scalar's worst-case encoded width (4 bytes).
    CodePoint,
}

impl ElementWitness {
    fn bytes(self) -> u64 {
        match self {
            ElementWitness::Value => ELEMENT_SLOT,
            ElementWitness::Byte => 1,
            ElementWitness::CodePoint => 4,
        }
    }
}

/// Returns a conservative byte count for `value`'s own owned storage,
/// including its container header and direct string/byte buffer, but
/// without recursing into element values.
pub fn estimate_size(value: &Value) -> u64 {
    match value {
        Value::None | Value::Bool(_) => 0,
        Value::Int(i) => {
            // BigInt stores magnitude as a Vec<u32>; small ints fit inline
            // in most representations but we charge at least one limb.
            let digits = i.to_u32_digits().1.len().max(1) as u64;
            SLICE_TYPE_OVERHEAD + digits * 4
        }
        Value::Float(_) => 8,
        Value::Str(s) => STRING_TYPE_OVERHEAD + s.len() as u64,
        Value::Bytes(b) => SLICE_TYPE_OVERHEAD + b.len() as u64,
        Value::List(l) => SLICE_TYPE_OVERHEAD + l.borrow().len() as u64 * ELEMENT_SLOT,
        Value::Tuple(t) => SLICE_TYPE_OVERHEAD + t.len() as u64 * ELEMENT_SLOT,
        Value::Dict(d) => MAP_TYPE_OVERHEAD + d.borrow().len() as u64 * ELEMENT_SLOT * 2,
        Value::Set(s) => MAP_TYPE_OVERHEAD + s.borrow().len() as u64 * ELEMENT_SLOT,
    }
}

/// Estimates the cost of allocating a homogeneous container of `n`
/// elements of the given witness type before the collection itself
/// exists, so callers can charge `add_allocs` ahead of populating it
/// (spec §4.E: "charge for the result container before populating it
/// when a size hint is available").
pub fn estimate_make_size(witness: ElementWitness, n: usize) -> u64 {
    SLICE_TYPE_OVERHEAD + n as u64 * witness.bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn scalars_are_free() {
        assert_eq!(estimate_size(&Value::None), 0);
        assert_eq!(estimate_size(&Value::Bool(true)), 0);
    }

    #[test]
    fn strings_include_overhead() {
        let v = Value::from("hello");
        assert_eq!(estimate_size(&v), STRING_TYPE_OVERHEAD + 5);
    }

    #[test]
    fn make_size_never_underestimates_real_list() {
        let hint = estimate_make_size(ElementWitness::Value, 10);
        let real = Value::List(Rc::new(RefCell::new(
            (0..10).map(|i| Value::from(i as i64)).collect(),
        )));
        assert!(hint >= estimate_size(&real));
    }
}

//! Accounting-aware standard library (spec §4.F).
//!
//! Every function here consults the [`crate::context::ExecutionContext`]
//! passed to it before and during its work, charging steps and
//! allocations the way the corresponding entry in [`crate::registry`]'s
//! safety maps declares. None of these hold any state of their own across
//! calls; all mutable state lives in the context or in the [`crate::value::Value`]
//! arguments.

/// `dict.*`, `list.*`, `set.*`, `bytes.*` receiver methods.
pub mod collections;
/// `print`, `fail`, `repr`, `str`, and the shared cycle-detecting formatter.
pub mod format;
/// The iterating builtins: `enumerate`, `zip`, `list`, `tuple`, `set`,
/// `dict`, `reversed`, `sorted`, `min`, `max`, `any`, `all`, `bytes`, `range`.
pub mod iterating;
/// `chr`, `ord`, `hash`, `int`, `float`, `bool`, `len`.
pub mod scalar;
/// `string.*` receiver methods.
pub mod strings;

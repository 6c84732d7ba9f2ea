//! # sandbox-vm
//!
//! The sandboxing core of a Starlark interpreter: safety capabilities,
//! resource accounting and the safe-iteration protocol that every
//! accounting-aware built-in in [`stdlib`] is built on top of.
//!
//! This crate does not parse, compile or evaluate Starlark programs — that
//! is left to an embedding evaluator. It only specifies and enforces the
//! contract between that evaluator and the host: what a script is allowed
//! to call, how much memory and CPU it may consume, and how iteration over
//! values is bounded regardless of what the values themselves do.
//!
//! ## Architecture
//!
//! - [`safety`]: the four-capability bitset declared by every built-in and
//!   required by every context.
//! - [`arithmetic`]: saturating addition/multiplication used by every
//!   accounting increment so that counters can never wrap.
//! - [`size_estimate`]: conservative byte-cost estimation for values,
//!   driving allocation accounting ahead of time.
//! - [`context`]: the per-run [`ExecutionContext`](context::ExecutionContext)
//!   holding the safety floor, the allocation/step counters and caps, and
//!   the print hook.
//! - [`value`]: the minimal value ABI the core's built-ins operate over.
//! - [`iterator`]: the producer/consumer safe-iteration protocol.
//! - [`registry`]: the built-in registry and the per-receiver safety maps.
//! - [`stdlib`]: the accounting-aware standard library built on all of the
//!   above.
//! - [`error`]: the stable, sum-typed error surface.
//! - [`testing`]: a `startest`-style harness for differential allocation
//!   and step measurement (feature `testing`).
//!
//! ## Example
//!
//! ```
//! use sandbox_vm::context::ExecutionContext;
//! use sandbox_vm::safety::Safety;
//! use sandbox_vm::stdlib;
//! use sandbox_vm::value::Value;
//!
//! let mut ctx = ExecutionContext::new();
//! ctx.require(Safety::MEM_SAFE);
//! ctx.set_max_allocs(1 << 20);
//! ctx.set_max_steps(1 << 20);
//!
//! let v = stdlib::scalar::chr(&mut ctx, 65).unwrap();
//! assert_eq!(v, Value::from("A"));
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

extern crate std;

/// Saturating arithmetic primitives used by every accounting increment.
pub mod arithmetic;
/// The per-run execution context: safety floor, counters, caps, print hook.
pub mod context;
/// Stable, sum-typed error surface for the sandbox core.
pub mod error;
/// Safe-iteration protocol: producers, consumers, and the state machine.
pub mod iterator;
/// Built-in registry and the per-receiver safety maps.
pub mod registry;
/// The four-capability safety bitset.
pub mod safety;
/// Conservative byte-cost estimation for values.
pub mod size_estimate;
/// Accounting-aware standard library built-ins.
pub mod stdlib;
/// Minimal value ABI consumed by the core.
pub mod value;

/// `startest`-style differential measurement harness.
#[cfg(feature = "testing")]
pub mod testing;

pub use context::ExecutionContext;
pub use error::{SandboxError, SandboxResult};
pub use iterator::{safe_iterate, Iterable, SafeIterator};
pub use registry::{call, BuiltinDescriptor, BuiltinFn};
pub use safety::Safety;
pub use value::Value;

//! Facade crate for the Starlark sandbox core.
//!
//! The actual implementation lives in [`sandbox_vm`]; this crate exists so
//! that a host embedding the interpreter depends on a single stable name,
//! mirroring how the rest of the ambient stack is assembled behind one
//! top-level package.

pub use sandbox_vm::*;

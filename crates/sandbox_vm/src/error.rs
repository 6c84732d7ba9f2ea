//! Stable, sum-typed error surface for the sandbox core.
//!
//! Every error that can escape the core is one of the five kinds below.
//! None are swallowed internally; a poisoned [`crate::context::ExecutionContext`]
//! keeps producing the same [`SandboxError::BudgetExceeded`] variant until
//! it is discarded. A handful of messages are part of the external
//! contract and must remain byte-for-byte stable (see the constants at the
//! bottom of this module and the doc comments on each variant).

use thiserror::Error;

/// Result alias used throughout the crate.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Which counter a [`SandboxError::BudgetExceeded`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// The allocation counter, `alloc_used`.
    Allocs,
    /// The step counter, `steps_used`.
    Steps,
}

/// The stable error surface observed by a host calling into the sandbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// Budget exceeded: `alloc_cap` or `steps_cap` was reached. Poisons the
    /// context; every following accounted operation on it fails the same
    /// way.
    #[error("{}", budget_message(*budget))]
    BudgetExceeded {
        /// Which counter tripped.
        budget: Budget,
    },

    /// Safety violation: a callable's or iterator's declared safety was not
    /// a superset of the context's required floor.
    #[error("feature unavailable to the sandbox")]
    SafetyViolation,

    /// Argument or domain error, e.g. `ord` given a multi-codepoint string,
    /// `int` given an unparsable base, `chr` given an out-of-range
    /// codepoint.
    #[error("{message}")]
    Domain {
        /// The fully formatted, stable message.
        message: String,
    },

    /// Type error: a value does not support the requested operation, e.g.
    /// iterating a non-iterable or hashing an unhashable value.
    #[error("{message}")]
    Type {
        /// The fully formatted message.
        message: String,
    },

    /// Producer error: a safe iterator's underlying producer reported a
    /// failure; stored on the iterator and returned from `err()` once
    /// `next()` has returned `false`.
    #[error("{message}")]
    Producer {
        /// The producer-reported message.
        message: String,
    },
}

fn budget_message(budget: Budget) -> &'static str {
    match budget {
        Budget::Allocs => EXCEEDED_ALLOCS,
        Budget::Steps => EXCEEDED_STEPS,
    }
}

/// Safety violation — context requires a capability the callable does not declare.
pub const FEATURE_UNAVAILABLE: &str = "feature unavailable to the sandbox";
/// Allocation cap exceeded.
pub const EXCEEDED_ALLOCS: &str = "exceeded memory allocation limits";
/// Step cap exceeded.
pub const EXCEEDED_STEPS: &str = "Starlark computation cancelled: too many steps";
/// `int`/`float` conversion out of representable range.
pub const INT_TOO_LARGE_FOR_FLOAT: &str = "int too large to convert to float";

impl SandboxError {
    /// Builds the allocation-budget variant.
    pub fn allocs_exceeded() -> Self {
        SandboxError::BudgetExceeded {
            budget: Budget::Allocs,
        }
    }

    /// Builds the step-budget variant.
    pub fn steps_exceeded() -> Self {
        SandboxError::BudgetExceeded {
            budget: Budget::Steps,
        }
    }

    /// Builds the fixed safety-violation error.
    pub fn safety_violation() -> Self {
        SandboxError::SafetyViolation
    }

    /// `ord` called on a string that does not encode exactly one code point.
    pub fn ord_wrong_codepoints(n: usize) -> Self {
        SandboxError::Domain {
            message: format!("ord: string encodes {n} Unicode code points, want 1"),
        }
    }

    /// `ord` called on a byte string whose length is not exactly one.
    pub fn ord_wrong_byte_len(n: usize) -> Self {
        SandboxError::Domain {
            message: format!("ord: bytes has length {n}, want 1"),
        }
    }

    /// `chr` called with a codepoint outside the valid Unicode range.
    pub fn chr_out_of_range(i: i64) -> Self {
        SandboxError::Domain {
            message: format!("chr: Unicode code point {i} out of range (0 to 0x10FFFF)"),
        }
    }

    /// `int`/`float` conversion on a value outside representable range.
    pub fn int_too_large_for_float() -> Self {
        SandboxError::Domain {
            message: INT_TOO_LARGE_FOR_FLOAT.to_string(),
        }
    }

    /// Builds a type error with a formatted message.
    pub fn type_error(message: impl Into<String>) -> Self {
        SandboxError::Type {
            message: message.into(),
        }
    }

    /// Builds a domain error with a formatted message.
    pub fn domain(message: impl Into<String>) -> Self {
        SandboxError::Domain {
            message: message.into(),
        }
    }

    /// Builds a producer error with a formatted message.
    pub fn producer(message: impl Into<String>) -> Self {
        SandboxError::Producer {
            message: message.into(),
        }
    }

    /// `true` for the two budget-exceeded variants, which poison the
    /// context they were raised from.
    pub fn poisons_context(&self) -> bool {
        matches!(self, SandboxError::BudgetExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_messages_are_verbatim() {
        assert_eq!(
            SandboxError::allocs_exceeded().to_string(),
            "exceeded memory allocation limits"
        );
        assert_eq!(
            SandboxError::steps_exceeded().to_string(),
            "Starlark computation cancelled: too many steps"
        );
        assert_eq!(
            SandboxError::safety_violation().to_string(),
            "feature unavailable to the sandbox"
        );
        assert_eq!(
            SandboxError::int_too_large_for_float().to_string(),
            "int too large to convert to float"
        );
    }

    #[test]
    fn ord_messages_interpolate_the_count() {
        assert_eq!(
            SandboxError::ord_wrong_codepoints(2).to_string(),
            "ord: string encodes 2 Unicode code points, want 1"
        );
        assert_eq!(
            SandboxError::ord_wrong_byte_len(3).to_string(),
            "ord: bytes has length 3, want 1"
        );
    }

    #[test]
    fn budget_errors_poison() {
        assert!(SandboxError::allocs_exceeded().poisons_context());
        assert!(SandboxError::steps_exceeded().poisons_context());
        assert!(!SandboxError::safety_violation().poisons_context());
    }
}

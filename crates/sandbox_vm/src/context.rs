//! The per-run execution context.
//!
//! Holds the current safety requirement, the allocation counter and cap,
//! the step counter and cap, and the host's print hook. This is the object
//! every accounting-aware built-in in [`crate::stdlib`] consults before and
//! during its work.

use crate::error::{SandboxError, SandboxResult};
use crate::safety::Safety;

/// A zero cap (`0`) means "unbounded" for both `alloc_cap` and `steps_cap`.
const UNBOUNDED: u64 = 0;

/// The per-execution-context bundle described in spec §3/§4.D.
///
/// Counters are strictly monotonically non-decreasing across the
/// context's lifetime. Once either cap is exceeded the context is
/// poisoned: every subsequent accounted operation fails with the same
/// kind of error until the context is discarded.
pub struct ExecutionContext {
    required: Safety,
    alloc_used: u64,
    alloc_cap: u64,
    steps_used: u64,
    steps_cap: u64,
    poison: Option<SandboxError>,
    print_hook: Option<Box<dyn FnMut(&str)>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("required", &self.required)
            .field("alloc_used", &self.alloc_used)
            .field("alloc_cap", &self.alloc_cap)
            .field("steps_used", &self.steps_used)
            .field("steps_cap", &self.steps_cap)
            .field("poisoned", &self.poison.is_some())
            .finish()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Creates a fresh, unpoisoned context with no required safety and
    /// unbounded caps.
    pub fn new() -> Self {
        Self {
            required: Safety::NOT_SAFE,
            alloc_used: 0,
            alloc_cap: UNBOUNDED,
            steps_used: 0,
            steps_cap: UNBOUNDED,
            poison: None,
            print_hook: None,
        }
    }

    /// Installs the allocation cap. Must be called before execution
    /// begins; calling it mid-run simply rebases future checks.
    pub fn set_max_allocs(&mut self, cap: u64) {
        self.alloc_cap = cap;
    }

    /// Installs the step cap.
    pub fn set_max_steps(&mut self, cap: u64) {
        self.steps_cap = cap;
    }

    /// Installs the print hook invoked by the `print` built-in. The hook
    /// receives the fully composed string; it is responsible for
    /// accounting for any memory it itself retains.
    pub fn set_print_hook(&mut self, hook: impl FnMut(&str) + 'static) {
        self.print_hook = Some(Box::new(hook));
    }

    /// Invokes the installed print hook, if any, with the composed text.
    /// Used by [`crate::stdlib::format::print`].
    pub fn print(&mut self, text: &str) {
        if let Some(hook) = self.print_hook.as_mut() {
            hook(text);
        }
    }

    /// Sets the safety floor every subsequently invoked built-in or
    /// iterator must meet.
    pub fn require(&mut self, safety: Safety) {
        self.required = safety;
    }

    /// Returns the current safety floor.
    pub fn safety(&self) -> Safety {
        self.required
    }

    /// Fails with [`SandboxError::SafetyViolation`] unless `declared` is a
    /// superset of the context's required floor. This is the single check
    /// performed at every call and iteration boundary (spec property III).
    pub fn check_safety(&self, declared: Safety) -> SandboxResult<()> {
        self.poisoned()?;
        if declared.require(self.required) {
            Ok(())
        } else {
            Err(SandboxError::safety_violation())
        }
    }

    /// Current allocation counter.
    pub fn alloc_used(&self) -> u64 {
        self.alloc_used
    }

    /// Current step counter.
    pub fn steps_used(&self) -> u64 {
        self.steps_used
    }

    /// `true` once either budget has been exceeded.
    pub fn is_poisoned(&self) -> bool {
        self.poison.is_some()
    }

    /// Fails with the stored poison error if the context is already
    /// poisoned; otherwise succeeds. Every accounted operation must call
    /// this before doing observable work (spec §5 ordering rule).
    pub fn poisoned(&self) -> SandboxResult<()> {
        match &self.poison {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Adds `n` to `alloc_used`, saturating. If the resulting value
    /// exceeds a non-zero `alloc_cap`, poisons the context and returns
    /// the fixed `"exceeded memory allocation limits"` error.
    pub fn add_allocs(&mut self, n: u64) -> SandboxResult<()> {
        self.poisoned()?;
        self.alloc_used = self.alloc_used.saturating_add(n);
        if self.alloc_cap != UNBOUNDED && self.alloc_used > self.alloc_cap {
            let err = SandboxError::allocs_exceeded();
            self.poison = Some(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Adds `n` to `steps_used`, saturating. Symmetric to
    /// [`Self::add_allocs`] with the fixed
    /// `"Starlark computation cancelled: too many steps"` error.
    pub fn add_steps(&mut self, n: u64) -> SandboxResult<()> {
        self.poisoned()?;
        self.steps_used = self.steps_used.saturating_add(n);
        if self.steps_cap != UNBOUNDED && self.steps_used > self.steps_cap {
            let err = SandboxError::steps_exceeded();
            self.poison = Some(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Externally triggered cancellation: pins the step counter at its cap
    /// with a specific reason and poisons the context. If no step cap was
    /// installed, installs one equal to the current usage so the poison
    /// still takes effect.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        if self.steps_cap == UNBOUNDED {
            self.steps_cap = self.steps_used;
        }
        self.steps_used = self.steps_cap;
        self.poison = Some(SandboxError::domain(format!(
            "Starlark computation cancelled: {}",
            reason.into()
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_caps_never_poison() {
        let mut ctx = ExecutionContext::new();
        ctx.add_allocs(u64::MAX / 2).unwrap();
        ctx.add_allocs(u64::MAX / 2).unwrap();
        assert!(!ctx.is_poisoned());
    }

    #[test]
    fn exceeding_alloc_cap_poisons_with_fixed_message() {
        let mut ctx = ExecutionContext::new();
        ctx.set_max_allocs(10);
        ctx.add_allocs(5).unwrap();
        let err = ctx.add_allocs(10).unwrap_err();
        assert_eq!(err.to_string(), "exceeded memory allocation limits");
        assert!(ctx.is_poisoned());
        let err2 = ctx.add_allocs(1).unwrap_err();
        assert_eq!(err2.to_string(), "exceeded memory allocation limits");
    }

    #[test]
    fn exceeding_steps_cap_poisons_with_fixed_message() {
        let mut ctx = ExecutionContext::new();
        ctx.set_max_steps(3);
        ctx.add_steps(2).unwrap();
        let err = ctx.add_steps(5).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Starlark computation cancelled: too many steps"
        );
        assert!(ctx.is_poisoned());
    }

    #[test]
    fn counters_are_monotonic() {
        let mut ctx = ExecutionContext::new();
        ctx.set_max_allocs(1000);
        ctx.add_allocs(10).unwrap();
        assert_eq!(ctx.alloc_used(), 10);
        ctx.add_allocs(20).unwrap();
        assert_eq!(ctx.alloc_used(), 30);
    }

    #[test]
    fn require_rejects_insufficient_declared_safety() {
        let mut ctx = ExecutionContext::new();
        ctx.require(Safety::MEM_SAFE);
        assert!(ctx.check_safety(Safety::SAFE).is_ok());
        let err = ctx.check_safety(Safety::NOT_SAFE).unwrap_err();
        assert_eq!(err.to_string(), "feature unavailable to the sandbox");
    }

    #[test]
    fn print_hook_receives_composed_text() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(String::new()));
        let seen2 = seen.clone();
        let mut ctx = ExecutionContext::new();
        ctx.set_print_hook(move |text| seen2.borrow_mut().push_str(text));
        ctx.print("hello");
        assert_eq!(*seen.borrow(), "hello");
    }

    #[test]
    fn cancel_poisons_with_steps_reason() {
        let mut ctx = ExecutionContext::new();
        ctx.set_max_steps(100);
        ctx.add_steps(5).unwrap();
        ctx.cancel("host requested shutdown");
        assert!(ctx.is_poisoned());
        let err = ctx.add_steps(1).unwrap_err();
        assert!(err.to_string().contains("host requested shutdown"));
    }
}

//! `print`, `fail`, `repr`, `str` and the shared cycle-detecting formatter
//! (spec §4.F, "Cycle handling").
//!
//! `repr`, `str`, `print` and `fail` all walk the value graph through
//! [`render`], which maintains a visited-set of container identities so
//! that a self-referential list or dict terminates instead of recursing
//! forever; the cycle is rendered as an ellipsis placeholder, matching the
//! source's behavior (spec property VI, scenario 4).

use crate::context::ExecutionContext;
use crate::error::{SandboxError, SandboxResult};
use crate::size_estimate::STRING_TYPE_OVERHEAD;
use crate::value::Value;
use std::collections::HashSet;

const WALK_STEP: u64 = 1;

/// The ellipsis placeholder substituted for a container already being
/// rendered higher up the call stack.
const CYCLE_PLACEHOLDER: &str = "...";

fn render(ctx: &mut ExecutionContext, v: &Value, visited: &mut HashSet<usize>) -> SandboxResult<String> {
    ctx.add_steps(WALK_STEP)?;
    if v.is_cyclic_candidate() {
        let id = v.identity().expect("cyclic candidate has an identity");
        if !visited.insert(id) {
            return Ok(CYCLE_PLACEHOLDER.to_string());
        }
        let rendered = render_container(ctx, v, visited)?;
        visited.remove(&id);
        return Ok(rendered);
    }
    Ok(match v {
        Value::None => "None".to_string(),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Str(s) => quote(s),
        Value::Bytes(b) => quote_bytes(b),
        Value::Tuple(t) => {
            let mut parts = Vec::with_capacity(t.len());
            for e in t.iter() {
                parts.push(render(ctx, e, visited)?);
            }
            if parts.len() == 1 {
                format!("({},)", parts[0])
            } else {
                format!("({})", parts.join(", "))
            }
        }
        _ => unreachable!("non-cyclic, non-scalar variant"),
    })
}

fn render_container(
    ctx: &mut ExecutionContext,
    v: &Value,
    visited: &mut HashSet<usize>,
) -> SandboxResult<String> {
    match v {
        Value::List(l) => {
            let items: Vec<Value> = l.borrow().clone();
            let mut parts = Vec::with_capacity(items.len());
            for e in &items {
                parts.push(render(ctx, e, visited)?);
            }
            Ok(format!("[{}]", parts.join(", ")))
        }
        Value::Dict(d) => {
            let items: Vec<(Value, Value)> = d.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let mut parts = Vec::with_capacity(items.len());
            for (k, val) in &items {
                let key = render(ctx, k, visited)?;
                let value = render(ctx, val, visited)?;
                parts.push(format!("{key}: {value}"));
            }
            Ok(format!("{{{}}}", parts.join(", ")))
        }
        Value::Set(s) => {
            let items: Vec<Value> = s.borrow().iter().cloned().collect();
            let mut parts = Vec::with_capacity(items.len());
            for e in &items {
                parts.push(render(ctx, e, visited)?);
            }
            Ok(format!("set([{}])", parts.join(", ")))
        }
        _ => unreachable!("only list/dict/set are cyclic candidates"),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn quote_bytes(b: &[u8]) -> String {
    let mut out = String::with_capacity(b.len() + 3);
    out.push_str("b\"");
    for byte in b {
        if byte.is_ascii_graphic() || *byte == b' ' {
            out.push(*byte as char);
        } else {
            out.push_str(&format!("\\x{byte:02x}"));
        }
    }
    out.push('"');
    out
}

/// Host-default float formatting. NaN and infinities render with the
/// spellings a Starlark program can itself produce via `float("NaN")` /
/// `float("Inf")` (see [`crate::stdlib::scalar::parse_float_literal`]'s
/// accepted literals), so `repr(float("NaN"))` round-trips.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "+inf".to_string() } else { "-inf".to_string() }
    } else if f == f.trunc() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// `repr(x)`: quoted, machine-oriented rendering. Charges steps for every
/// node visited and allocation for the produced string (scenario 4: a
/// cyclic value still renders to a finite string and accounts for its own
/// size).
pub fn repr(ctx: &mut ExecutionContext, v: &Value) -> SandboxResult<Value> {
    ctx.poisoned()?;
    let mut visited = HashSet::new();
    let s = render(ctx, v, &mut visited)?;
    ctx.add_allocs(STRING_TYPE_OVERHEAD + s.len() as u64)?;
    Ok(Value::from(s))
}

/// `str(x)`: like `repr`, except a top-level string renders unquoted.
pub fn str_val(ctx: &mut ExecutionContext, v: &Value) -> SandboxResult<Value> {
    ctx.poisoned()?;
    if let Value::Str(s) = v {
        // Zero-alloc idempotent for an already-owned string (property VIII).
        ctx.add_steps(WALK_STEP)?;
        return Ok(Value::Str(s.clone()));
    }
    repr(ctx, v)
}

/// Non-accounting convenience used by [`crate::value::Value`]'s `Display`
/// impl (e.g. for panics/debug output); production call sites should go
/// through [`str_val`] so the rendering is charged.
pub fn str_of(v: &Value) -> String {
    let mut ctx = ExecutionContext::new();
    match str_val(&mut ctx, v) {
        Ok(Value::Str(s)) => s.to_string(),
        _ => String::new(),
    }
}

/// Universe entry for `repr`.
pub fn builtin_repr(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "repr")?;
    match args {
        [v] => repr(ctx, v),
        _ => Err(SandboxError::type_error("repr: expected exactly one argument")),
    }
}

/// Universe entry for `str`.
pub fn builtin_str(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "str")?;
    match args {
        [v] => str_val(ctx, v),
        _ => Err(SandboxError::type_error("str: expected exactly one argument")),
    }
}

/// `print(*args)`: formats every argument with `str` semantics, joins them
/// with a space, and hands the composed string to the installed print
/// hook. The hook itself may charge for whatever it retains.
pub fn print(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    ctx.poisoned()?;
    let mut parts = Vec::with_capacity(args.len());
    for a in args {
        match str_val(ctx, a)? {
            Value::Str(s) => parts.push(s.to_string()),
            _ => unreachable!("str_val always returns a Value::Str"),
        }
    }
    let text = parts.join(" ");
    ctx.print(&text);
    Ok(Value::None)
}

/// Universe entry for `print`. Checks the registry-declared safety
/// (`MemSafe | CPUSafe | TimeSafe`, deliberately missing `IOSafe`) before
/// doing anything else, so a context requiring `IOSafe` rejects the call
/// up front rather than running the print hook anyway (property III).
pub fn builtin_print(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "print")?;
    print(ctx, args)
}

/// `fail(*args)`: formats its arguments the same way as `print`, and
/// returns a [`SandboxError::Domain`] carrying the composed, accounted
/// message rather than invoking the print hook.
pub fn fail(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    ctx.poisoned()?;
    let mut parts = Vec::with_capacity(args.len());
    for a in args {
        match str_val(ctx, a)? {
            Value::Str(s) => parts.push(s.to_string()),
            _ => unreachable!("str_val always returns a Value::Str"),
        }
    }
    let message = parts.join(" ");
    ctx.add_allocs(STRING_TYPE_OVERHEAD + message.len() as u64)?;
    Err(SandboxError::domain(message))
}

/// Universe entry for `fail`.
pub fn builtin_fail(ctx: &mut ExecutionContext, args: &[Value]) -> SandboxResult<Value> {
    crate::registry::require_builtin_safety(ctx, "fail")?;
    fail(ctx, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ListRef;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn str_of_plain_string_is_unquoted() {
        let mut ctx = ExecutionContext::new();
        assert_eq!(str_val(&mut ctx, &Value::from("x")).unwrap(), Value::from("x"));
    }

    #[test]
    fn repr_of_string_is_quoted() {
        let mut ctx = ExecutionContext::new();
        assert_eq!(repr(&mut ctx, &Value::from("x")).unwrap(), Value::from("\"x\""));
    }

    #[test]
    fn scenario_4_self_referential_list_terminates() {
        let mut ctx = ExecutionContext::new();
        let list: ListRef = Rc::new(RefCell::new(vec![Value::None]));
        list.borrow_mut()[0] = Value::List(list.clone());
        let v = Value::List(list);
        let rendered = repr(&mut ctx, &v).unwrap();
        match rendered {
            Value::Str(s) => assert_eq!(s.as_ref(), "[[...]]"),
            _ => panic!("expected string"),
        }
        assert!(ctx.alloc_used() > 0);
    }

    #[test]
    fn fail_returns_accounted_domain_error() {
        let mut ctx = ExecutionContext::new();
        let err = fail(&mut ctx, &[Value::from("boom"), Value::from(1i64)]).unwrap_err();
        assert_eq!(err.to_string(), "boom 1");
        assert!(ctx.alloc_used() > 0);
    }

    #[test]
    fn print_invokes_the_installed_hook() {
        let seen = Rc::new(RefCell::new(String::new()));
        let seen2 = seen.clone();
        let mut ctx = ExecutionContext::new();
        ctx.set_print_hook(move |text| *seen2.borrow_mut() = text.to_string());
        print(&mut ctx, &[Value::from("hi"), Value::from(1i64)]).unwrap();
        assert_eq!(*seen.borrow(), "hi 1");
    }

    /// Scenario 2: a context requiring `IOSafe` (as part of full `Safety::SAFE`)
    /// must reject `print`, since `print`'s declared safety omits `IOSafe`.
    #[test]
    fn print_rejects_when_io_safe_is_required() {
        use crate::safety::Safety;

        let seen = Rc::new(RefCell::new(String::new()));
        let seen2 = seen.clone();
        let mut ctx = ExecutionContext::new();
        ctx.set_print_hook(move |text| *seen2.borrow_mut() = text.to_string());
        ctx.require(Safety::SAFE);

        let err = builtin_print(&mut ctx, &[Value::from("hi")]).unwrap_err();
        assert_eq!(err.to_string(), "feature unavailable to the sandbox");
        assert_eq!(*seen.borrow(), "", "the hook must not run once safety is rejected");
    }
}

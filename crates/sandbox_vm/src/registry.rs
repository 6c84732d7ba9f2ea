//! Built-in registry and the per-receiver safety maps (spec §3, §6, §8-IV).
//!
//! Every top-level built-in is registered once, at program start, into a
//! flat, read-only [`Universe`] keyed by name — the same shape as the
//! interop method table this crate's teacher registers its native calls
//! into, just carrying a safety declaration instead of a call-flags/price
//! pair. Receiver methods (`dict.get`, `list.append`, …) are not callables
//! in their own right in this core, so they are tracked purely as
//! name-to-safety maps; the coherence check (property IV) compares those
//! maps against the statically known method name sets in [`crate::stdlib`].

use crate::context::ExecutionContext;
use crate::error::{SandboxError, SandboxResult};
use crate::safety::Safety;
use crate::value::Value;
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use std::iter::FromIterator;

/// The signature every universe built-in is exposed under.
pub type BuiltinFn = fn(&mut ExecutionContext, &[Value]) -> SandboxResult<Value>;

/// A registered built-in: its name, its callable, and its declared safety.
/// The core verifies at startup that the safeties map and the universe
/// agree (spec §6, "Built-in registration").
pub struct BuiltinDescriptor {
    /// The name the built-in is callable under, e.g. `"chr"`.
    pub name: &'static str,
    /// The callable itself.
    pub func: BuiltinFn,
    /// The capability set this built-in declares it respects.
    pub safety: Safety,
}

/// The read-only, construction-time-immutable registry of top-level
/// built-ins, analogous to `UniverseSafeties` in spec §3.
pub struct Universe {
    entries: HashMap<&'static str, BuiltinDescriptor>,
}

impl Universe {
    fn new(descriptors: Vec<BuiltinDescriptor>) -> Self {
        let mut entries = HashMap::new();
        for d in descriptors {
            entries.insert(d.name, d);
        }
        Self { entries }
    }

    /// Looks up a built-in by name.
    pub fn get(&self, name: &str) -> Option<&BuiltinDescriptor> {
        self.entries.get(name)
    }

    /// Iterates every registered built-in.
    pub fn iter(&self) -> impl Iterator<Item = &BuiltinDescriptor> {
        self.entries.values()
    }

    /// The set of registered names, used by the coherence check.
    pub fn names(&self) -> std::collections::BTreeSet<&'static str> {
        self.entries.keys().copied().collect()
    }
}

use crate::stdlib;

/// The process-wide universe of top-level built-ins. Built once; read-only
/// at runtime (spec §5, "Shared resources").
pub static UNIVERSE: Lazy<Universe> = Lazy::new(|| {
    Universe::new(vec![
        BuiltinDescriptor {
            name: "chr",
            func: stdlib::scalar::builtin_chr,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "ord",
            func: stdlib::scalar::builtin_ord,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "hash",
            func: stdlib::scalar::builtin_hash,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "int",
            func: stdlib::scalar::builtin_int,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "float",
            func: stdlib::scalar::builtin_float,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "bool",
            func: stdlib::scalar::builtin_bool,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "len",
            func: stdlib::scalar::builtin_len,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "print",
            func: stdlib::format::builtin_print,
            safety: Safety::MEM_SAFE | Safety::CPU_SAFE | Safety::TIME_SAFE,
        },
        BuiltinDescriptor {
            name: "fail",
            func: stdlib::format::builtin_fail,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "repr",
            func: stdlib::format::builtin_repr,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "str",
            func: stdlib::format::builtin_str,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "range",
            func: stdlib::iterating::builtin_range,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "enumerate",
            func: stdlib::iterating::builtin_enumerate,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "zip",
            func: stdlib::iterating::builtin_zip,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "list",
            func: stdlib::iterating::builtin_list,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "tuple",
            func: stdlib::iterating::builtin_tuple,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "set",
            func: stdlib::iterating::builtin_set,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "dict",
            func: stdlib::iterating::builtin_dict,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "reversed",
            func: stdlib::iterating::builtin_reversed,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "sorted",
            func: stdlib::iterating::builtin_sorted,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "min",
            func: stdlib::iterating::builtin_min,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "max",
            func: stdlib::iterating::builtin_max,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "any",
            func: stdlib::iterating::builtin_any,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "all",
            func: stdlib::iterating::builtin_all,
            safety: Safety::SAFE,
        },
        BuiltinDescriptor {
            name: "bytes",
            func: stdlib::iterating::builtin_bytes,
            safety: Safety::SAFE,
        },
    ])
});

/// `BytesMethodSafeties` (spec §3).
pub static BYTES_METHOD_SAFETIES: Lazy<HashMap<&'static str, Safety>> =
    Lazy::new(|| HashMap::from_iter([("elems", Safety::SAFE)]));

/// `DictMethodSafeties` (spec §3).
pub static DICT_METHOD_SAFETIES: Lazy<HashMap<&'static str, Safety>> = Lazy::new(|| {
    HashMap::from_iter([
        ("clear", Safety::SAFE),
        ("get", Safety::SAFE),
        ("pop", Safety::SAFE),
        ("popitem", Safety::SAFE),
        ("setdefault", Safety::SAFE),
        ("items", Safety::SAFE),
        ("keys", Safety::SAFE),
        ("values", Safety::SAFE),
        ("update", Safety::SAFE),
    ])
});

/// `ListMethodSafeties` (spec §3).
pub static LIST_METHOD_SAFETIES: Lazy<HashMap<&'static str, Safety>> = Lazy::new(|| {
    HashMap::from_iter([
        ("append", Safety::SAFE),
        ("insert", Safety::SAFE),
        ("pop", Safety::SAFE),
        ("remove", Safety::SAFE),
        ("clear", Safety::SAFE),
        ("extend", Safety::SAFE),
        ("index", Safety::SAFE),
    ])
});

/// `SetMethodSafeties` (spec §3).
pub static SET_METHOD_SAFETIES: Lazy<HashMap<&'static str, Safety>> = Lazy::new(|| {
    HashMap::from_iter([
        ("clear", Safety::SAFE),
        ("union", Safety::SAFE),
        ("difference", Safety::SAFE),
        ("intersection", Safety::SAFE),
        ("symmetric_difference", Safety::SAFE),
        ("issubset", Safety::SAFE),
        ("issuperset", Safety::SAFE),
    ])
});

/// `StringMethodSafeties` (spec §3).
pub static STRING_METHOD_SAFETIES: Lazy<HashMap<&'static str, Safety>> = Lazy::new(|| {
    HashMap::from_iter([
        ("isalpha", Safety::SAFE),
        ("isspace", Safety::SAFE),
        ("startswith", Safety::SAFE),
        ("endswith", Safety::SAFE),
        ("count", Safety::SAFE),
        ("find", Safety::SAFE),
        ("index", Safety::SAFE),
        ("rfind", Safety::SAFE),
        ("rindex", Safety::SAFE),
        ("partition", Safety::SAFE),
        ("rpartition", Safety::SAFE),
        ("lstrip", Safety::SAFE),
        ("rstrip", Safety::SAFE),
        ("strip", Safety::SAFE),
        ("splitlines", Safety::SAFE),
        ("removeprefix", Safety::SAFE),
        ("removesuffix", Safety::SAFE),
        ("capitalize", Safety::SAFE),
        ("title", Safety::SAFE),
        ("lower", Safety::SAFE),
        ("upper", Safety::SAFE),
        ("format", Safety::SAFE),
        ("replace", Safety::SAFE),
        ("split", Safety::SAFE),
        ("rsplit", Safety::SAFE),
        ("join", Safety::SAFE),
        ("codepoints", Safety::MEM_SAFE | Safety::CPU_SAFE | Safety::TIME_SAFE | Safety::IO_SAFE),
        ("codepoint_ords", Safety::MEM_SAFE | Safety::CPU_SAFE | Safety::TIME_SAFE | Safety::IO_SAFE),
        ("elems", Safety::MEM_SAFE | Safety::CPU_SAFE | Safety::TIME_SAFE | Safety::IO_SAFE),
        ("elem_ords", Safety::MEM_SAFE | Safety::CPU_SAFE | Safety::TIME_SAFE | Safety::IO_SAFE),
    ])
});

/// The statically known method name sets, used only to verify coherence
/// against the safeties maps above (property IV). In a full evaluator
/// these names would instead come from the receiver's own method-dispatch
/// table; here they just mirror what `stdlib` actually implements.
mod registered {
    pub const BYTES: &[&str] = &["elems"];
    pub const DICT: &[&str] = &[
        "clear", "get", "pop", "popitem", "setdefault", "items", "keys", "values", "update",
    ];
    pub const LIST: &[&str] = &["append", "insert", "pop", "remove", "clear", "extend", "index"];
    pub const SET: &[&str] = &[
        "clear",
        "union",
        "difference",
        "intersection",
        "symmetric_difference",
        "issubset",
        "issuperset",
    ];
    pub const STRING: &[&str] = &[
        "isalpha",
        "isspace",
        "startswith",
        "endswith",
        "count",
        "find",
        "index",
        "rfind",
        "rindex",
        "partition",
        "rpartition",
        "lstrip",
        "rstrip",
        "strip",
        "splitlines",
        "removeprefix",
        "removesuffix",
        "capitalize",
        "title",
        "lower",
        "upper",
        "format",
        "replace",
        "split",
        "rsplit",
        "join",
        "codepoints",
        "codepoint_ords",
        "elems",
        "elem_ords",
    ];
}

/// Host-facing call dispatcher (spec §6: `call(context, callable,
/// positional_args, keyword_args)`). Looks `name` up in [`UNIVERSE`],
/// enforces property III by checking its declared safety against `ctx`'s
/// required floor *before* invoking it, and surfaces the fixed
/// `"no such builtin: <name>"` message (spec §6) for an unregistered name.
///
/// This crate's built-ins take only positional arguments, so a non-empty
/// `keyword_args` is itself rejected with a domain error rather than
/// silently ignored.
pub fn call(
    ctx: &mut ExecutionContext,
    name: &str,
    positional_args: &[Value],
    keyword_args: &[(&str, Value)],
) -> SandboxResult<Value> {
    ctx.poisoned()?;
    let descriptor = UNIVERSE
        .get(name)
        .ok_or_else(|| SandboxError::type_error(format!("no such builtin: {name}")))?;
    ctx.check_safety(descriptor.safety)?;
    if !keyword_args.is_empty() {
        return Err(SandboxError::domain(format!(
            "{name}: keyword arguments are not supported"
        )));
    }
    (descriptor.func)(ctx, positional_args)
}

/// Checks `name`'s `UNIVERSE`-declared safety against `ctx`'s required
/// floor (property III). Called by every `builtin_*` universe entry in
/// [`crate::stdlib`] at its own entry point, so the check holds whether a
/// host goes through [`call`] or invokes the universe entry function
/// directly — the same reasoning [`crate::iterator::safe_iterate`]
/// already applies to iterators.
pub fn require_builtin_safety(ctx: &ExecutionContext, name: &'static str) -> SandboxResult<()> {
    let declared = UNIVERSE
        .get(name)
        .unwrap_or_else(|| panic!("{name} checked its own safety but is not registered in UNIVERSE"))
        .safety;
    ctx.check_safety(declared)
}

fn require_safety_from(
    ctx: &ExecutionContext,
    map: &Lazy<HashMap<&'static str, Safety>>,
    receiver: &str,
    name: &'static str,
) -> SandboxResult<()> {
    let declared = *map
        .get(name)
        .unwrap_or_else(|| panic!("{receiver}.{name} checked its own safety but is not declared in {receiver}'s safety map"));
    ctx.check_safety(declared)
}

/// Checks `name`'s `BytesMethodSafeties`-declared safety (property III),
/// for `bytes.*` receiver methods.
pub fn require_bytes_method_safety(ctx: &ExecutionContext, name: &'static str) -> SandboxResult<()> {
    require_safety_from(ctx, &BYTES_METHOD_SAFETIES, "bytes", name)
}

/// Checks `name`'s `DictMethodSafeties`-declared safety, for `dict.*`
/// receiver methods.
pub fn require_dict_method_safety(ctx: &ExecutionContext, name: &'static str) -> SandboxResult<()> {
    require_safety_from(ctx, &DICT_METHOD_SAFETIES, "dict", name)
}

/// Checks `name`'s `ListMethodSafeties`-declared safety, for `list.*`
/// receiver methods.
pub fn require_list_method_safety(ctx: &ExecutionContext, name: &'static str) -> SandboxResult<()> {
    require_safety_from(ctx, &LIST_METHOD_SAFETIES, "list", name)
}

/// Checks `name`'s `SetMethodSafeties`-declared safety, for `set.*`
/// receiver methods.
pub fn require_set_method_safety(ctx: &ExecutionContext, name: &'static str) -> SandboxResult<()> {
    require_safety_from(ctx, &SET_METHOD_SAFETIES, "set", name)
}

/// Checks `name`'s `StringMethodSafeties`-declared safety, for `string.*`
/// receiver methods.
pub fn require_string_method_safety(ctx: &ExecutionContext, name: &'static str) -> SandboxResult<()> {
    require_safety_from(ctx, &STRING_METHOD_SAFETIES, "string", name)
}

/// Verifies property IV: the key set of each safeties map equals the set
/// of registered built-ins for that receiver. Intended to run once at
/// startup (and exercised directly by the coherence tests below). A
/// disagreement is logged via `log::warn!` at the call site before the
/// error is returned, so an embedder that calls this during startup gets
/// a diagnostic even if it only inspects the process log rather than the
/// returned `Result`.
pub fn check_registry_coherence() -> Result<(), String> {
    let checks: &[(&str, &Lazy<HashMap<&'static str, Safety>>, &[&str])] = &[
        ("bytes", &BYTES_METHOD_SAFETIES, registered::BYTES),
        ("dict", &DICT_METHOD_SAFETIES, registered::DICT),
        ("list", &LIST_METHOD_SAFETIES, registered::LIST),
        ("set", &SET_METHOD_SAFETIES, registered::SET),
        ("string", &STRING_METHOD_SAFETIES, registered::STRING),
    ];
    for (receiver, map, names) in checks {
        let declared: std::collections::BTreeSet<&str> = map.keys().copied().collect();
        let actual: std::collections::BTreeSet<&str> = names.iter().copied().collect();
        if declared != actual {
            let message = format!(
                "safety map for {receiver} disagrees with its registered methods: \
                 declared-only={:?}, registered-only={:?}",
                declared.difference(&actual).collect::<Vec<_>>(),
                actual.difference(&declared).collect::<Vec<_>>()
            );
            log::warn!("{message}");
            return Err(message);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universe_is_populated() {
        assert!(UNIVERSE.get("chr").is_some());
        assert!(UNIVERSE.get("no_such_builtin").is_none());
        assert!(UNIVERSE.names().contains("print"));
    }

    #[test]
    fn registry_coherence_holds() {
        check_registry_coherence().expect("safety maps must match registered methods");
    }

    #[test]
    fn every_universe_entry_is_internally_consistent() {
        for d in UNIVERSE.iter() {
            assert!(!d.name.is_empty(), "a universe entry must have a non-empty name");
            assert!(
                UNIVERSE.names().contains(d.name),
                "{} is iterated but missing from the name index",
                d.name
            );
            let looked_up = UNIVERSE
                .get(d.name)
                .unwrap_or_else(|| panic!("{} is iterated but not retrievable by its own name", d.name));
            assert_eq!(
                looked_up.func as usize, d.func as usize,
                "lookup by name for {} returned a different callable than iteration did",
                d.name
            );
        }
    }

    #[test]
    fn call_dispatches_a_registered_builtin() {
        let mut ctx = ExecutionContext::new();
        let v = call(&mut ctx, "chr", &[Value::from(65i64)], &[]).unwrap();
        assert_eq!(v, Value::from("A"));
    }

    #[test]
    fn call_rejects_an_unregistered_name() {
        let mut ctx = ExecutionContext::new();
        let err = call(&mut ctx, "no_such_builtin", &[], &[]).unwrap_err();
        assert_eq!(err.to_string(), "no such builtin: no_such_builtin");
    }

    /// Spec property III / scenario 2, exercised against a real builtin
    /// call rather than a synthetic iterator fixture: `print` is
    /// deliberately declared `MemSafe | CPUSafe | TimeSafe` (`IOSafe`
    /// omitted, since it does perform host I/O), so a context that
    /// requires full `Safe` must reject it with the fixed message.
    #[test]
    fn call_rejects_print_when_io_safe_is_required() {
        let mut ctx = ExecutionContext::new();
        ctx.require(Safety::SAFE);
        let err = call(&mut ctx, "print", &[Value::from("hi")], &[]).unwrap_err();
        assert_eq!(err.to_string(), "feature unavailable to the sandbox");
    }

    #[test]
    fn call_rejects_keyword_arguments() {
        let mut ctx = ExecutionContext::new();
        let err = call(&mut ctx, "chr", &[], &[("i", Value::from(65i64))]).unwrap_err();
        assert!(err.to_string().contains("keyword arguments"));
    }
}

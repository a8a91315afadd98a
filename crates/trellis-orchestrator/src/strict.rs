//! Strict-mode support: the external-global denylist
//!
//! Method calls on these well-known host objects are external by
//! definition and must not raise `STRICT_UNRESOLVED_METHOD`; the signal
//! is suppressed at its source.

/// Host globals whose methods are never resolvable from analysed source.
pub const EXTERNAL_GLOBALS: &[&str] = &[
    "console",
    "Math",
    "JSON",
    "Promise",
    "Object",
    "Array",
    "String",
    "Number",
    "Boolean",
    "Date",
    "RegExp",
    "Error",
    "Symbol",
    "Map",
    "Set",
    "WeakMap",
    "WeakSet",
    "Reflect",
    "Proxy",
    "Intl",
    "Atomics",
    "BigInt",
    "globalThis",
    "process",
    "Buffer",
    "window",
    "document",
    "navigator",
];

pub fn is_external_global(name: &str) -> bool {
    EXTERNAL_GLOBALS.contains(&name)
}

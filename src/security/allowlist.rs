//! The restricted builtins table
//!
//! Every name a program can resolve without defining it itself comes from
//! these lists. Anything else, including `open`, `__import__`, `eval` and
//! the rest of the host's builtins, is a `NameError` at run time.
//!
//! The restriction is a convenience for teaching, not a security boundary.

/// Functions and types reachable from the builtins table
pub const ALLOWED_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "chr", "complex", "dict", "dir", "divmod",
    "enumerate", "filter", "float", "format", "frozenset", "getattr", "hasattr", "hash",
    "hex", "id", "int", "isinstance", "issubclass", "iter", "len", "list", "map", "max",
    "min", "next", "object", "oct", "ord", "pow", "print", "range", "repr", "reversed",
    "round", "set", "slice", "sorted", "str", "sum", "tuple", "type", "vars", "zip",
];

/// Exception classes a program may name, raise and catch
pub const ALLOWED_EXCEPTIONS: &[&str] = &["Exception", "ValueError", "EOFError"];

/// Name under which the queued-input replacement is installed in globals
pub const INPUT_PRIMITIVE: &str = "input";

/// Whether `name` resolves through the builtins table
pub fn is_allowed(name: &str) -> bool {
    ALLOWED_BUILTINS.contains(&name) || ALLOWED_EXCEPTIONS.contains(&name)
}

/// Every name a program can use without defining it, sorted
pub fn reachable_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = ALLOWED_BUILTINS
        .iter()
        .chain(ALLOWED_EXCEPTIONS)
        .chain(std::iter::once(&INPUT_PRIMITIVE))
        .copied()
        .collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist_shape() {
        assert_eq!(ALLOWED_BUILTINS.len(), 48);
        let mut sorted = ALLOWED_BUILTINS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, ALLOWED_BUILTINS);
    }

    #[test]
    fn test_dangerous_names_are_refused() {
        for name in ["open", "__import__", "eval", "exec", "compile", "globals", "locals", "exit"] {
            assert!(!is_allowed(name), "{} should not be reachable", name);
        }
        assert!(!is_allowed("ZeroDivisionError"));
        assert!(!is_allowed("SystemExit"));
        assert!(!is_allowed("KeyboardInterrupt"));
        assert!(!is_allowed(INPUT_PRIMITIVE));
    }

    #[test]
    fn test_reachable_names() {
        let names = reachable_names();
        assert!(names.contains(&"input"));
        assert!(!names.contains(&"SystemExit"));
        assert_eq!(names.len(), 48 + 3 + 1);
    }
}

//! What a sandboxed program is allowed to reach by name

pub mod allowlist;

pub use allowlist::{
    is_allowed, reachable_names, ALLOWED_BUILTINS, ALLOWED_EXCEPTIONS, INPUT_PRIMITIVE,
};

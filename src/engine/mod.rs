//! Execution engine for sandboxed programs

pub mod builtins;
pub mod exceptions;
pub mod format;
pub mod generator;
pub mod integer;
pub mod interpreter;
pub mod methods;
pub mod ops;
pub mod scope;
pub mod value;

pub use exceptions::{ExcKind, ExceptionValue, Exec, Flow, HaltReason};
pub use interpreter::{Interpreter, Limits};
pub use value::Value;

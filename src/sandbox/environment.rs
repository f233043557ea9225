//! The restricted execution environment of a single run
//!
//! An environment owns the global scope (`__name__` and the queued `input`
//! replacement), the separate top-level scope that receives every name the
//! program defines, and the queue of stdin lines that `input()` consumes.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::engine::methods::split_lines;
use crate::engine::scope::Scope;
use crate::engine::value::{Builtin, TypeKind, Value};
use crate::security::allowlist::{self, INPUT_PRIMITIVE};

#[derive(Debug)]
pub struct Environment {
    globals: Rc<Scope>,
    locals: Rc<Scope>,
    /// Remaining stdin lines, front first
    lines: VecDeque<String>,
}

impl Environment {
    /// Build a fresh environment whose `input()` yields the lines of `stdin`
    pub fn new(stdin: &str) -> Self {
        let globals = Scope::module();
        globals.set("__name__", Value::from("__main__"));
        globals.set(INPUT_PRIMITIVE, Value::Builtin(Builtin::Input));

        Self {
            globals,
            locals: Scope::module(),
            lines: split_lines(stdin, false).into(),
        }
    }

    pub fn globals(&self) -> &Rc<Scope> {
        &self.globals
    }

    /// Scope holding the program's top-level names
    pub fn locals(&self) -> &Rc<Scope> {
        &self.locals
    }

    /// Resolve a name through the restricted builtins table
    pub fn builtin(&self, name: &str) -> Option<Value> {
        if !allowlist::is_allowed(name) {
            return None;
        }
        Builtin::from_name(name)
            .map(Value::Builtin)
            .or_else(|| TypeKind::from_name(name).map(Value::Type))
    }

    /// Take the next queued stdin line
    pub fn read_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_consumed_in_order() {
        let mut env = Environment::new("first\nsecond\r\nthird");
        assert_eq!(env.read_line().as_deref(), Some("first"));
        assert_eq!(env.read_line().as_deref(), Some("second"));
        assert_eq!(env.read_line().as_deref(), Some("third"));
        assert_eq!(env.read_line(), None);
        assert_eq!(env.read_line(), None);
    }

    #[test]
    fn test_empty_stdin_has_no_lines() {
        let mut env = Environment::new("");
        assert_eq!(env.read_line(), None);

        // a trailing newline does not add an empty line
        let mut env = Environment::new("a\n");
        assert_eq!(env.read_line().as_deref(), Some("a"));
        assert_eq!(env.read_line(), None);
    }

    #[test]
    fn test_scopes_are_separate() {
        let env = Environment::new("");
        assert!(matches!(env.globals().get("__name__"), Some(Value::Str(s)) if &*s == "__main__"));
        assert!(matches!(
            env.globals().get("input"),
            Some(Value::Builtin(Builtin::Input))
        ));
        assert!(env.locals().snapshot().is_empty());
    }

    #[test]
    fn test_builtin_lookup() {
        let env = Environment::new("");
        assert!(matches!(env.builtin("len"), Some(Value::Builtin(Builtin::Len))));
        assert!(matches!(env.builtin("int"), Some(Value::Type(TypeKind::Int))));
        assert!(matches!(env.builtin("EOFError"), Some(Value::Type(TypeKind::Exception(_)))));
        assert!(env.builtin("SystemExit").is_none());
        assert!(env.builtin("open").is_none());
        assert!(env.builtin("ZeroDivisionError").is_none());
        // input lives in globals, not in the table
        assert!(env.builtin("input").is_none());
    }
}

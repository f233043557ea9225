//! Variable scopes

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::value::Value;
use crate::parser::ast::FunctionDef;

#[derive(Debug, Clone)]
pub enum ScopeKind {
    /// The program's top level, or the environment's global scope
    Module,
    Function(Rc<FunctionDef>),
    Comprehension,
}

#[derive(Debug, Clone)]
struct Slot {
    order: usize,
    value: Value,
}

/// A mapping of names to values with an optional enclosing scope
#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<Rc<Scope>>,
    vars: RefCell<HashMap<String, Slot>>,
    next_order: Cell<usize>,
}

impl Scope {
    pub fn new(kind: ScopeKind, parent: Option<Rc<Scope>>) -> Rc<Scope> {
        Rc::new(Scope {
            kind,
            parent,
            vars: RefCell::new(HashMap::new()),
            next_order: Cell::new(0),
        })
    }

    pub fn module() -> Rc<Scope> {
        Scope::new(ScopeKind::Module, None)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).map(|slot| slot.value.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn set(&self, name: &str, value: Value) {
        let mut vars = self.vars.borrow_mut();
        match vars.get_mut(name) {
            Some(slot) => slot.value = value,
            None => {
                let order = self.next_order.get();
                self.next_order.set(order + 1);
                vars.insert(name.to_string(), Slot { order, value });
            }
        }
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name).map(|slot| slot.value)
    }

    /// Bindings in the order they were first made
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let vars = self.vars.borrow();
        let mut entries: Vec<(&String, &Slot)> = vars.iter().collect();
        entries.sort_by_key(|(_, slot)| slot.order);
        entries
            .into_iter()
            .map(|(name, slot)| (name.clone(), slot.value.clone()))
            .collect()
    }

    pub fn function_def(&self) -> Option<&Rc<FunctionDef>> {
        match &self.kind {
            ScopeKind::Function(def) => Some(def),
            _ => None,
        }
    }

    /// Whether `name` is local to this function scope
    pub fn declares_local(&self, name: &str) -> bool {
        match &self.kind {
            ScopeKind::Function(def) => def.locals.contains(name),
            ScopeKind::Comprehension => self.contains(name),
            ScopeKind::Module => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_keeps_binding_order() {
        let scope = Scope::module();
        scope.set("b", Value::Int(1));
        scope.set("a", Value::Int(2));
        scope.set("b", Value::Int(3));
        let names: Vec<String> = scope.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(matches!(scope.get("b"), Some(Value::Int(3))));
    }

    #[test]
    fn test_remove() {
        let scope = Scope::module();
        scope.set("x", Value::None);
        assert!(scope.remove("x").is_some());
        assert!(!scope.contains("x"));
    }
}

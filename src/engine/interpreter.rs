//! Tree-walking interpreter for parsed programs
//!
//! Statements run against a chain of [`Scope`]s. Exceptions and the other
//! non-local exits travel as [`Flow`] values in the error half of [`Exec`],
//! so every fallible step can use `?`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::engine::exceptions::{raise, ExcKind, ExceptionValue, Exec, Flow, HaltReason};
use crate::engine::format::{ascii, format_value, repr, str_value};
use crate::engine::generator::Generator;
use crate::engine::integer;
use crate::engine::methods;
use crate::engine::ops::{self, truthy};
use crate::engine::scope::{Scope, ScopeKind};
use crate::engine::value::{
    Function, IterState, SliceValue, Table, TypeKind, Value, ViewKind, MAX_ITEMS,
};
use crate::parser::ast::{
    Arg, BinOp, BoolOp, CmpOp, Comprehension, Constant, DictItem, ExceptHandler, Expr, FStringPart,
    FunctionDef, Program, Stmt, StmtKind, Target,
};
use crate::sandbox::capture::OutputBuffers;
use crate::sandbox::environment::Environment;

/// Ticks between two looks at the clock and the interrupt flag
const CHECK_INTERVAL: u32 = 256;

/// Limits enforced while a program runs
#[derive(Debug, Clone)]
pub struct Limits {
    pub deadline: Option<Instant>,
    pub interrupt: Arc<AtomicBool>,
    /// Maximum depth of nested calls, counting the module frame
    pub recursion_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            deadline: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            recursion_limit: 1000,
        }
    }
}

type Emit<'e> = dyn FnMut(&mut Interpreter, &Rc<Scope>) -> Exec<()> + 'e;

pub struct Interpreter {
    env: Environment,
    output: OutputBuffers,
    limits: Limits,
    depth: usize,
    ticks: u32,
    /// Exceptions whose handlers are currently running, innermost last
    pub(crate) handling: Vec<Rc<ExceptionValue>>,
    /// Scopes of the active frames, innermost last
    frames: Vec<Rc<Scope>>,
}

impl Interpreter {
    pub fn new(env: Environment, output: OutputBuffers, limits: Limits) -> Self {
        Self {
            env,
            output,
            limits,
            depth: 0,
            ticks: 0,
            handling: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub(crate) fn environment_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn into_output(self) -> OutputBuffers {
        self.output
    }

    /// Execute a whole program in the environment's local scope
    pub fn execute(&mut self, program: &Program) -> Exec<()> {
        let module = self.env.locals().clone();
        self.frames.push(module.clone());
        self.depth = 1;
        let result = self.exec_block(&program.body, &module);
        self.frames.pop();
        self.depth = 0;
        match result {
            Ok(()) | Err(Flow::Return(_)) | Err(Flow::Break) | Err(Flow::Continue) => Ok(()),
            Err(Flow::Raise(exc)) => {
                exc.leave_frame("<module>", 1);
                Err(Flow::Raise(exc))
            }
            Err(halt) => Err(halt),
        }
    }

    // ========================================================================
    // Watchdog and output
    // ========================================================================

    pub(crate) fn tick(&mut self) -> Exec<()> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % CHECK_INTERVAL != 0 {
            return Ok(());
        }
        self.check_limits()
    }

    fn check_limits(&self) -> Exec<()> {
        if self.limits.interrupt.load(Ordering::Relaxed) {
            return Err(Flow::Halt(HaltReason::Interrupted));
        }
        if let Some(deadline) = self.limits.deadline {
            if Instant::now() >= deadline {
                return Err(Flow::Halt(HaltReason::Timeout));
            }
        }
        Ok(())
    }

    pub(crate) fn write_stdout(&mut self, text: &str) -> Exec<()> {
        self.output
            .write_stdout(text)
            .map_err(|_| Flow::Halt(HaltReason::OutputLimit))
    }

    /// Push a call frame, refusing to nest past the recursion limit
    pub(crate) fn enter_frame(&mut self, scope: &Rc<Scope>) -> Exec<()> {
        if self.depth >= self.limits.recursion_limit {
            return raise(ExcKind::RecursionError, "maximum recursion depth exceeded");
        }
        self.depth += 1;
        self.frames.push(scope.clone());
        Ok(())
    }

    pub(crate) fn exit_frame(&mut self) {
        self.frames.pop();
        self.depth -= 1;
    }

    pub(crate) fn current_scope(&self) -> Rc<Scope> {
        self.frames
            .last()
            .cloned()
            .unwrap_or_else(|| self.env.locals().clone())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Exec<()> {
        for stmt in body {
            self.tick()?;
            if let Err(flow) = self.exec_stmt(stmt, scope) {
                if let Flow::Raise(exc) = &flow {
                    exc.note_line(stmt.line);
                    if let Some(handled) = self.handling.last() {
                        exc.set_context(handled);
                    }
                }
                return Err(flow);
            }
        }
        Ok(())
    }

    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Exec<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(())
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
                Ok(())
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, scope),
            // Generator bodies are stepped by the generator itself
            StmtKind::Yield { .. } => raise(ExcKind::SyntaxError, "'yield' outside function"),
            StmtKind::AnnAssign { target, value } => match value {
                Some(value) => {
                    let value = self.eval(value, scope)?;
                    self.assign(target, value, scope)
                }
                None => Ok(()),
            },
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => Ok(()),
            StmtKind::Break => Err(Flow::Break),
            StmtKind::Continue => Err(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                Err(Flow::Return(value))
            }
            StmtKind::Raise { exc: None, .. } => match self.handling.last() {
                Some(exc) => Err(Flow::Raise(exc.clone())),
                None => raise(ExcKind::RuntimeError, "No active exception to reraise"),
            },
            StmtKind::Raise {
                exc: Some(expr),
                cause,
            } => {
                let value = self.eval(expr, scope)?;
                let exc = self.to_exception(value, "exceptions must derive from BaseException")?;
                exc.rewind();
                if let Some(cause) = cause {
                    match self.eval(cause, scope)? {
                        Value::None => exc.set_cause(None),
                        other => {
                            let cause = self.to_exception(
                                other,
                                "exception causes must derive from BaseException",
                            )?;
                            exc.set_cause(Some(cause));
                        }
                    }
                }
                Err(Flow::Raise(exc))
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
                Ok(())
            }
            StmtKind::Assert { test, msg } => {
                if truthy(&self.eval(test, scope)?) {
                    return Ok(());
                }
                let args = match msg {
                    Some(msg) => vec![self.eval(msg, scope)?],
                    None => Vec::new(),
                };
                Err(Flow::Raise(Rc::new(ExceptionValue::new(
                    ExcKind::AssertionError,
                    args,
                ))))
            }
            StmtKind::Import(_) => raise(ExcKind::ImportError, "__import__ not found"),
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if truthy(&self.eval(test, scope)?) {
                        return self.exec_block(body, scope);
                    }
                }
                self.exec_block(orelse, scope)
            }
            StmtKind::While { test, body, orelse } => loop {
                self.tick()?;
                if !truthy(&self.eval(test, scope)?) {
                    return self.exec_block(orelse, scope);
                }
                match self.exec_block(body, scope) {
                    Ok(()) | Err(Flow::Continue) => {}
                    Err(Flow::Break) => return Ok(()),
                    Err(other) => return Err(other),
                }
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, scope)?;
                let iterator = self.iter_value(iterable)?;
                loop {
                    self.tick()?;
                    let item = match self.next_item(&iterator)? {
                        Some(item) => item,
                        None => return self.exec_block(orelse, scope),
                    };
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => return Ok(()),
                        Err(other) => return Err(other),
                    }
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.exec_try(body, handlers, orelse, finalbody, scope),
            StmtKind::FunctionDef(def) => {
                let mut decorators = Vec::with_capacity(def.decorators.len());
                for decorator in &def.decorators {
                    decorators.push(self.eval(decorator, scope)?);
                }
                let mut function = self.make_function(def, scope)?;
                for decorator in decorators.iter().rev() {
                    function = self.call_value(decorator, vec![function], Vec::new())?;
                }
                self.store_name(&def.name, function, scope)
            }
            StmtKind::ClassDef { .. } => raise(ExcKind::NameError, "__build_class__ not found"),
            StmtKind::With { items, .. } => {
                let manager = match items.first() {
                    Some((expr, _)) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                raise(
                    ExcKind::TypeError,
                    format!(
                        "'{}' object does not support the context manager protocol",
                        manager.type_name()
                    ),
                )
            }
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        scope: &Rc<Scope>,
    ) -> Exec<()> {
        let outcome = match self.exec_block(body, scope) {
            Ok(()) => self.exec_block(orelse, scope),
            Err(Flow::Raise(exc)) if !handlers.is_empty() => {
                self.handling.push(exc.clone());
                let handled = self.run_handlers(&exc, handlers, scope);
                self.handling.pop();
                handled
            }
            Err(other) => Err(other),
        };
        if finalbody.is_empty() || matches!(outcome, Err(Flow::Halt(_))) {
            return outcome;
        }

        let pending = match &outcome {
            Err(Flow::Raise(exc)) => Some(exc.clone()),
            _ => None,
        };
        if let Some(exc) = &pending {
            self.handling.push(exc.clone());
        }
        let finally = self.exec_block(finalbody, scope);
        if pending.is_some() {
            self.handling.pop();
        }
        finally.and(outcome)
    }

    fn run_handlers(
        &mut self,
        exc: &Rc<ExceptionValue>,
        handlers: &[ExceptHandler],
        scope: &Rc<Scope>,
    ) -> Exec<()> {
        for handler in handlers {
            if let Some(kind) = &handler.kind {
                let matched = self
                    .eval(kind, scope)
                    .and_then(|spec| exception_matches(exc, &spec));
                match matched {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(flow) => {
                        if let Flow::Raise(error) = &flow {
                            error.note_line(handler.line);
                            error.set_context(exc);
                        }
                        return Err(flow);
                    }
                }
            }
            if let Some(name) = &handler.name {
                self.store_name(name, Value::Exception(exc.clone()), scope)?;
            }
            let result = self.exec_block(&handler.body, scope);
            if let Some(name) = &handler.name {
                self.unbind(name, scope);
            }
            return result;
        }
        Err(Flow::Raise(exc.clone()))
    }

    fn to_exception(&mut self, value: Value, message: &str) -> Exec<Rc<ExceptionValue>> {
        match value {
            Value::Exception(exc) => Ok(exc),
            Value::Type(TypeKind::Exception(kind)) => {
                Ok(Rc::new(ExceptionValue::new(kind, Vec::new())))
            }
            _ => raise(ExcKind::TypeError, message),
        }
    }

    fn aug_assign(
        &mut self,
        target: &Target,
        op: BinOp,
        value: &Expr,
        scope: &Rc<Scope>,
    ) -> Exec<()> {
        match target {
            Target::Name(name) => {
                let current = self.load_name(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let result = self.inplace(op, current, rhs)?;
                self.store_name(name, result, scope)
            }
            Target::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container, scope)?;
                let index = self.eval(index, scope)?;
                let current = ops::get_item(&container, &index)?;
                let rhs = self.eval(value, scope)?;
                let result = self.inplace(op, current, rhs)?;
                let items = self.slice_items(&container, &index, &result)?;
                ops::set_item(&container, &index, result, items)
            }
            Target::Attribute { value: object, attr } => {
                let object = self.eval(object, scope)?;
                self.get_attr(&object, attr)?;
                self.set_attr_error(&object, attr)
            }
            Target::Sequence(_) | Target::Starred(_) => raise(
                ExcKind::SyntaxError,
                "illegal expression for augmented assignment",
            ),
        }
    }

    /// Augmented assignment; mutable containers are updated in place
    fn inplace(&mut self, op: BinOp, current: Value, rhs: Value) -> Exec<Value> {
        match (&current, op) {
            (Value::List(list), BinOp::Add) => {
                let items = self.collect(rhs)?;
                if list.borrow().len() + items.len() > MAX_ITEMS {
                    return ops::memory_error();
                }
                list.borrow_mut().extend(items);
                Ok(current)
            }
            (Value::List(list), BinOp::Mul) => {
                if let Value::List(repeated) = ops::binary(op, &current, &rhs)? {
                    let items = repeated.borrow().clone();
                    *list.borrow_mut() = items;
                }
                Ok(current)
            }
            (Value::Set(table), BinOp::BitOr | BinOp::BitAnd | BinOp::BitXor | BinOp::Sub)
                if matches!(rhs, Value::Set(_) | Value::FrozenSet(_)) =>
            {
                if let Value::Set(result) = ops::binary(op, &current, &rhs)? {
                    let result = result.borrow().clone();
                    *table.borrow_mut() = result;
                }
                Ok(current)
            }
            (Value::Dict(table), BinOp::BitOr) => {
                let table = table.clone();
                self.update_dict(&table, rhs)?;
                Ok(current)
            }
            _ => ops::binary(op, &current, &rhs),
        }
    }

    // ========================================================================
    // Names and scopes
    // ========================================================================

    pub(crate) fn load_name(&self, name: &str, scope: &Rc<Scope>) -> Exec<Value> {
        match &scope.kind {
            ScopeKind::Module => {
                if let Some(value) = scope.get(name) {
                    return Ok(value);
                }
                return self.load_global(name);
            }
            ScopeKind::Function(def) => {
                if def.globals.contains(name) {
                    return self.load_global(name);
                }
                if def.locals.contains(name) {
                    return scope.get(name).ok_or_else(|| {
                        Flow::exception(
                            ExcKind::UnboundLocalError,
                            format!(
                                "cannot access local variable '{}' where it is not associated with a value",
                                name
                            ),
                        )
                    });
                }
            }
            ScopeKind::Comprehension => {
                if let Some(value) = scope.get(name) {
                    return Ok(value);
                }
            }
        }

        let mut cursor = scope.parent.clone();
        while let Some(outer) = cursor {
            match &outer.kind {
                ScopeKind::Function(def) if def.locals.contains(name) => {
                    return outer.get(name).ok_or_else(|| {
                        Flow::exception(
                            ExcKind::NameError,
                            format!(
                                "cannot access free variable '{}' where it is not associated with a value in enclosing scope",
                                name
                            ),
                        )
                    });
                }
                ScopeKind::Comprehension => {
                    if let Some(value) = outer.get(name) {
                        return Ok(value);
                    }
                }
                ScopeKind::Module => break,
                ScopeKind::Function(_) => {}
            }
            cursor = outer.parent.clone();
        }
        self.load_global(name)
    }

    /// Program top level, then the global scope, then the builtins table
    fn load_global(&self, name: &str) -> Exec<Value> {
        if let Some(value) = self.env.locals().get(name) {
            return Ok(value);
        }
        if let Some(value) = self.env.globals().get(name) {
            return Ok(value);
        }
        if let Some(value) = self.env.builtin(name) {
            return Ok(value);
        }
        raise(ExcKind::NameError, format!("name '{}' is not defined", name))
    }

    /// Scope that receives a binding of `name` made from `scope`
    fn binding_scope(&self, name: &str, scope: &Rc<Scope>) -> Rc<Scope> {
        if let ScopeKind::Function(def) = &scope.kind {
            if def.globals.contains(name) {
                return self.env.locals().clone();
            }
            if def.nonlocals.contains(name) {
                let mut cursor = scope.parent.clone();
                while let Some(outer) = cursor {
                    match &outer.kind {
                        ScopeKind::Function(def) if def.locals.contains(name) => return outer,
                        ScopeKind::Module => break,
                        _ => {}
                    }
                    cursor = outer.parent.clone();
                }
            }
        }
        scope.clone()
    }

    pub(crate) fn store_name(&mut self, name: &str, value: Value, scope: &Rc<Scope>) -> Exec<()> {
        self.binding_scope(name, scope).set(name, value);
        Ok(())
    }

    fn delete_name(&mut self, name: &str, scope: &Rc<Scope>) -> Exec<()> {
        let target = self.binding_scope(name, scope);
        if target.remove(name).is_some() {
            return Ok(());
        }
        match &target.kind {
            ScopeKind::Function(def) if def.locals.contains(name) => raise(
                ExcKind::UnboundLocalError,
                format!(
                    "cannot access local variable '{}' where it is not associated with a value",
                    name
                ),
            ),
            _ => raise(ExcKind::NameError, format!("name '{}' is not defined", name)),
        }
    }

    pub(crate) fn unbind(&mut self, name: &str, scope: &Rc<Scope>) {
        self.binding_scope(name, scope).remove(name);
    }

    // ========================================================================
    // Assignment targets
    // ========================================================================

    pub(crate) fn assign(&mut self, target: &Target, value: Value, scope: &Rc<Scope>) -> Exec<()> {
        match target {
            Target::Name(name) => self.store_name(name, value, scope),
            Target::Attribute { value: object, attr } => {
                let object = self.eval(object, scope)?;
                self.set_attr_error(&object, attr)
            }
            Target::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container, scope)?;
                let index = self.eval(index, scope)?;
                let items = self.slice_items(&container, &index, &value)?;
                ops::set_item(&container, &index, value, items)
            }
            Target::Sequence(targets) => self.unpack(targets, value, scope),
            Target::Starred(inner) => self.assign(inner, value, scope),
        }
    }

    /// Items for slice assignment into a list
    fn slice_items(&mut self, container: &Value, index: &Value, value: &Value) -> Exec<Option<Vec<Value>>> {
        match (container, index) {
            (Value::List(_), Value::Slice(_)) => {
                if !is_iterable(value) {
                    return raise(ExcKind::TypeError, "can only assign an iterable");
                }
                Ok(Some(self.collect(value.clone())?))
            }
            _ => Ok(None),
        }
    }

    fn unpack(&mut self, targets: &[Target], value: Value, scope: &Rc<Scope>) -> Exec<()> {
        if !is_iterable(&value) {
            return raise(
                ExcKind::TypeError,
                format!("cannot unpack non-iterable {} object", value.type_name()),
            );
        }
        let mut items = self.collect(value)?;
        let star = targets.iter().position(|t| matches!(t, Target::Starred(_)));
        match star {
            None => {
                if items.len() > targets.len() {
                    return raise(
                        ExcKind::ValueError,
                        format!("too many values to unpack (expected {})", targets.len()),
                    );
                }
                if items.len() < targets.len() {
                    return raise(
                        ExcKind::ValueError,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        ),
                    );
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                Ok(())
            }
            Some(pos) => {
                let required = targets.len() - 1;
                if items.len() < required {
                    return raise(
                        ExcKind::ValueError,
                        format!(
                            "not enough values to unpack (expected at least {}, got {})",
                            required,
                            items.len()
                        ),
                    );
                }
                let after = targets.len() - pos - 1;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(pos);
                for (target, item) in targets[..pos].iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                self.assign(&targets[pos], Value::list(middle), scope)?;
                for (target, item) in targets[pos + 1..].iter().zip(tail) {
                    self.assign(target, item, scope)?;
                }
                Ok(())
            }
        }
    }

    fn delete(&mut self, target: &Target, scope: &Rc<Scope>) -> Exec<()> {
        match target {
            Target::Name(name) => self.delete_name(name, scope),
            Target::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container, scope)?;
                let index = self.eval(index, scope)?;
                ops::del_item(&container, &index)
            }
            Target::Attribute { value: object, attr } => {
                let object = self.eval(object, scope)?;
                self.set_attr_error(&object, attr)
            }
            Target::Sequence(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
                Ok(())
            }
            Target::Starred(inner) => self.delete(inner, scope),
        }
    }

    fn set_attr_error(&self, object: &Value, attr: &str) -> Exec<()> {
        let message = if methods::has_attribute(object, attr) {
            format!(
                "'{}' object attribute '{}' is read-only",
                object.type_name(),
                attr
            )
        } else {
            format!("'{}' object has no attribute '{}'", object.type_name(), attr)
        };
        raise(ExcKind::AttributeError, message)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Exec<Value> {
        match expr {
            Expr::Constant(constant) => Ok(constant_value(constant)),
            Expr::FString(parts) => Ok(Value::from(self.eval_fstring(parts, scope)?)),
            Expr::Name(name) => self.load_name(name, scope),
            Expr::NamedExpr { name, value } => {
                let value = self.eval(value, scope)?;
                // Comprehensions bind `:=` names in the scope around them
                let mut target = scope.clone();
                while matches!(target.kind, ScopeKind::Comprehension) {
                    match target.parent.clone() {
                        Some(parent) => target = parent,
                        None => break,
                    }
                }
                self.store_name(name, value.clone(), &target)?;
                Ok(value)
            }
            Expr::List(items) => Ok(Value::list(self.eval_items(items, scope)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_items(items, scope)?)),
            Expr::Set(items) => {
                let items = self.eval_items(items, scope)?;
                Ok(Value::set(Table::from_keys(items)?))
            }
            Expr::Dict(items) => {
                let mut table = Table::new();
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            let key = self.eval(key, scope)?;
                            let value = self.eval(value, scope)?;
                            table.insert(key.hash_key()?, key, value);
                        }
                        DictItem::Unpack(mapping) => match self.eval(mapping, scope)? {
                            Value::Dict(other) => {
                                for (key, value) in other.borrow().iter() {
                                    table.insert(key.hash_key()?, key.clone(), value.clone());
                                }
                            }
                            other => {
                                return raise(
                                    ExcKind::TypeError,
                                    format!("'{}' object is not a mapping", other.type_name()),
                                )
                            }
                        },
                    }
                }
                Ok(Value::dict(table))
            }
            Expr::Starred(_) => raise(ExcKind::SyntaxError, "can't use starred expression here"),
            Expr::BinOp { left, op, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                ops::binary(*op, &left, &right)
            }
            Expr::UnaryOp { op, operand } => {
                let operand = self.eval(operand, scope)?;
                ops::unary(*op, &operand)
            }
            Expr::BoolOp { op, values } => {
                let mut result = Value::None;
                for value in values {
                    result = self.eval(value, scope)?;
                    let stop = match op {
                        BoolOp::And => !truthy(&result),
                        BoolOp::Or => truthy(&result),
                    };
                    if stop {
                        break;
                    }
                }
                Ok(result)
            }
            Expr::Compare { left, ops: comparisons } => {
                let mut left = self.eval(left, scope)?;
                for (op, right) in comparisons {
                    let right = self.eval(right, scope)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if truthy(&self.eval(test, scope)?) {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            Expr::Lambda(def) => self.make_function(def, scope),
            Expr::Call { func, args } => self.eval_call(func, args, scope),
            Expr::Attribute { value, attr } => {
                let value = self.eval(value, scope)?;
                self.get_attr(&value, attr)
            }
            Expr::Subscript { value, index } => {
                let value = self.eval(value, scope)?;
                let index = self.eval(index, scope)?;
                ops::get_item(&value, &index)
            }
            Expr::Slice { lower, upper, step } => {
                let mut part = |expr: &Option<Box<Expr>>| -> Exec<Value> {
                    match expr {
                        Some(expr) => self.eval(expr, scope),
                        None => Ok(Value::None),
                    }
                };
                let start = part(lower)?;
                let stop = part(upper)?;
                let step = part(step)?;
                Ok(Value::Slice(Rc::new(SliceValue { start, stop, step })))
            }
            Expr::ListComp { elt, generators } => {
                let mut items = Vec::new();
                self.comprehension(generators, scope, &mut |interp, inner| {
                    if items.len() >= MAX_ITEMS {
                        return ops::memory_error();
                    }
                    items.push(interp.eval(elt, inner)?);
                    Ok(())
                })?;
                Ok(Value::list(items))
            }
            Expr::GeneratorExp { elt, generators } => {
                let mut items = Vec::new();
                self.comprehension(generators, scope, &mut |interp, inner| {
                    if items.len() >= MAX_ITEMS {
                        return ops::memory_error();
                    }
                    items.push(interp.eval(elt, inner)?);
                    Ok(())
                })?;
                Ok(Value::iterator(IterState::Snapshot {
                    items,
                    index: 0,
                    name: "generator",
                }))
            }
            Expr::SetComp { elt, generators } => {
                let mut table = Table::new();
                self.comprehension(generators, scope, &mut |interp, inner| {
                    let item = interp.eval(elt, inner)?;
                    table.add(item)
                })?;
                Ok(Value::set(table))
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                let mut table = Table::new();
                self.comprehension(generators, scope, &mut |interp, inner| {
                    let key = interp.eval(key, inner)?;
                    let value = interp.eval(value, inner)?;
                    table.insert(key.hash_key()?, key, value);
                    Ok(())
                })?;
                Ok(Value::dict(table))
            }
        }
    }

    fn eval_items(&mut self, items: &[Expr], scope: &Rc<Scope>) -> Exec<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Starred(inner) => {
                    let value = self.eval(inner, scope)?;
                    out.extend(self.collect(value)?);
                }
                other => out.push(self.eval(other, scope)?),
            }
        }
        Ok(out)
    }

    fn eval_fstring(&mut self, parts: &[FStringPart], scope: &Rc<Scope>) -> Exec<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field {
                    expr,
                    debug_text,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr, scope)?;
                    let spec_text = self.eval_fstring(spec, scope)?;
                    if let Some(text) = debug_text {
                        out.push_str(text);
                    }
                    let conversion = match conversion {
                        Some(c) => Some(*c),
                        None if debug_text.is_some() && spec.is_empty() => Some('r'),
                        None => None,
                    };
                    let value = match conversion {
                        Some('r') => Value::from(repr(&value)),
                        Some('a') => Value::from(ascii(&value)),
                        Some(_) => Value::from(str_value(&value)),
                        None => value,
                    };
                    out.push_str(&format_value(&value, &spec_text)?);
                }
            }
        }
        Ok(out)
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Exec<bool> {
        match op {
            CmpOp::Eq => Ok(ops::values_equal(left, right)),
            CmpOp::NotEq => Ok(!ops::values_equal(left, right)),
            CmpOp::Lt => ops::order("<", left, right),
            CmpOp::LtE => ops::order("<=", left, right),
            CmpOp::Gt => ops::order(">", left, right),
            CmpOp::GtE => ops::order(">=", left, right),
            CmpOp::In => self.contains(right, left),
            CmpOp::NotIn => Ok(!self.contains(right, left)?),
            CmpOp::Is => Ok(left.is(right)),
            CmpOp::IsNot => Ok(!left.is(right)),
        }
    }

    /// Membership test; iterators are consumed up to the first match
    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> Exec<bool> {
        if let Value::Iterator(_) = container {
            while let Some(candidate) = self.next_item(container)? {
                self.tick()?;
                if candidate.is(item) || ops::values_equal(&candidate, item) {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        ops::contains(container, item)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn eval_call(&mut self, func: &Expr, args: &[Arg], scope: &Rc<Scope>) -> Exec<Value> {
        if let Expr::Attribute { value, attr } = func {
            let receiver = self.eval(value, scope)?;
            if methods::has_method(&receiver, attr) {
                let (args, kwargs) = self.eval_args(args, scope)?;
                return self.call_method(&receiver, attr, args, kwargs);
            }
            let callee = self.get_attr(&receiver, attr)?;
            let (args, kwargs) = self.eval_args(args, scope)?;
            return self.call_value(&callee, args, kwargs);
        }
        let callee = self.eval(func, scope)?;
        let (args, kwargs) = self.eval_args(args, scope)?;
        self.call_value(&callee, args, kwargs)
    }

    fn eval_args(
        &mut self,
        args: &[Arg],
        scope: &Rc<Scope>,
    ) -> Exec<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::with_capacity(args.len());
        let mut keywords = Vec::new();
        for arg in args {
            match arg {
                Arg::Positional(expr) => positional.push(self.eval(expr, scope)?),
                Arg::Keyword(name, expr) => keywords.push((name.clone(), self.eval(expr, scope)?)),
                Arg::Star(expr) => {
                    let value = self.eval(expr, scope)?;
                    if !is_iterable(&value) {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "argument after * must be an iterable, not {}",
                                value.type_name()
                            ),
                        );
                    }
                    positional.extend(self.collect(value)?);
                }
                Arg::DoubleStar(expr) => match self.eval(expr, scope)? {
                    Value::Dict(table) => {
                        for (key, value) in table.borrow().iter() {
                            match key {
                                Value::Str(name) => keywords.push((name.to_string(), value.clone())),
                                _ => return raise(ExcKind::TypeError, "keywords must be strings"),
                            }
                        }
                    }
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "argument after ** must be a mapping, not {}",
                                other.type_name()
                            ),
                        )
                    }
                },
            }
        }
        Ok((positional, keywords))
    }

    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        match callee {
            Value::Function(function) => {
                let function = function.clone();
                self.call_function(&function, args, kwargs)
            }
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, kwargs),
            Value::Type(kind) => self.construct(*kind, args, kwargs),
            Value::Method(method) => {
                let method = method.clone();
                self.call_method(&method.receiver, &method.name, args, kwargs)
            }
            other => raise(
                ExcKind::TypeError,
                format!("'{}' object is not callable", other.type_name()),
            ),
        }
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> Exec<Value> {
        let mut defaults = Vec::with_capacity(def.params.positional.len());
        for param in &def.params.positional {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            });
        }
        let mut kw_defaults = Vec::with_capacity(def.params.kwonly.len());
        for param in &def.params.kwonly {
            kw_defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, scope)?),
                None => None,
            });
        }
        let closure = match scope.kind {
            ScopeKind::Module => None,
            _ => Some(scope.clone()),
        };
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            qualname: qualname(&def.name, scope),
            defaults,
            kw_defaults,
            closure,
        })))
    }

    pub(crate) fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let def = &function.def;
        if def.generator {
            let scope = Scope::new(ScopeKind::Function(def.clone()), function.closure.clone());
            self.bind_arguments(function, &scope, args, kwargs)?;
            return Ok(Value::iterator(IterState::Generator {
                qualname: function.qualname.clone(),
                body: Rc::new(RefCell::new(Generator::new(def.clone(), scope))),
            }));
        }
        if self.depth >= self.limits.recursion_limit {
            return raise(ExcKind::RecursionError, "maximum recursion depth exceeded");
        }
        let scope = Scope::new(ScopeKind::Function(def.clone()), function.closure.clone());
        self.bind_arguments(function, &scope, args, kwargs)?;

        self.enter_frame(&scope)?;
        let result = self.exec_block(&def.body, &scope);
        self.exit_frame();

        match result {
            Ok(()) => Ok(Value::None),
            Err(Flow::Return(value)) => Ok(value),
            Err(Flow::Raise(exc)) => {
                exc.leave_frame(&def.name, def.line);
                Err(Flow::Raise(exc))
            }
            Err(other) => Err(other),
        }
    }

    fn bind_arguments(
        &mut self,
        function: &Function,
        scope: &Rc<Scope>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<()> {
        let params = &function.def.params;
        let name = &function.qualname;
        let positional_count = params.positional.len();
        let given = args.len();

        let mut slots: Vec<Option<Value>> = vec![None; positional_count];
        let mut extra = Vec::new();
        for (i, arg) in args.into_iter().enumerate() {
            if i < positional_count {
                slots[i] = Some(arg);
            } else {
                extra.push(arg);
            }
        }
        if !extra.is_empty() && params.vararg.is_none() {
            let required = function.defaults.iter().filter(|d| d.is_none()).count();
            let takes = if required == positional_count {
                plural(positional_count, "positional argument")
            } else {
                format!("from {} to {} positional arguments", required, positional_count)
            };
            let verb = if given == 1 { "was" } else { "were" };
            return raise(
                ExcKind::TypeError,
                format!("{}() takes {} but {} {} given", name, takes, given, verb),
            );
        }

        let mut kw_slots: Vec<Option<Value>> = vec![None; params.kwonly.len()];
        let mut extra_kwargs = Table::new();
        for (key, value) in kwargs {
            let slot = if let Some(i) = params.positional.iter().position(|p| p.name == key) {
                &mut slots[i]
            } else if let Some(i) = params.kwonly.iter().position(|p| p.name == key) {
                &mut kw_slots[i]
            } else if params.kwarg.is_some() {
                let key_value = Value::from(key.as_str());
                let hash = key_value.hash_key()?;
                if extra_kwargs.contains(&hash) {
                    return raise(
                        ExcKind::TypeError,
                        format!("{}() got multiple values for keyword argument '{}'", name, key),
                    );
                }
                extra_kwargs.insert(hash, key_value, value);
                continue;
            } else {
                return raise(
                    ExcKind::TypeError,
                    format!("{}() got an unexpected keyword argument '{}'", name, key),
                );
            };
            if slot.is_some() {
                return raise(
                    ExcKind::TypeError,
                    format!("{}() got multiple values for argument '{}'", name, key),
                );
            }
            *slot = Some(value);
        }

        let mut missing = Vec::new();
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                match function.defaults.get(i).cloned().flatten() {
                    Some(default) => *slot = Some(default),
                    None => missing.push(params.positional[i].name.clone()),
                }
            }
        }
        if !missing.is_empty() {
            return raise(
                ExcKind::TypeError,
                format!(
                    "{}() missing {}: {}",
                    name,
                    plural(missing.len(), "required positional argument"),
                    name_list(&missing)
                ),
            );
        }
        for (i, slot) in kw_slots.iter_mut().enumerate() {
            if slot.is_none() {
                match function.kw_defaults.get(i).cloned().flatten() {
                    Some(default) => *slot = Some(default),
                    None => missing.push(params.kwonly[i].name.clone()),
                }
            }
        }
        if !missing.is_empty() {
            return raise(
                ExcKind::TypeError,
                format!(
                    "{}() missing {}: {}",
                    name,
                    plural(missing.len(), "required keyword-only argument"),
                    name_list(&missing)
                ),
            );
        }

        for (param, value) in params.positional.iter().zip(slots) {
            if let Some(value) = value {
                scope.set(&param.name, value);
            }
        }
        if let Some(vararg) = &params.vararg {
            scope.set(vararg, Value::tuple(extra));
        }
        for (param, value) in params.kwonly.iter().zip(kw_slots) {
            if let Some(value) = value {
                scope.set(&param.name, value);
            }
        }
        if let Some(kwarg) = &params.kwarg {
            scope.set(kwarg, Value::dict(extra_kwargs));
        }
        Ok(())
    }

    // ========================================================================
    // Comprehensions
    // ========================================================================

    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        scope: &Rc<Scope>,
        emit: &mut Emit<'_>,
    ) -> Exec<()> {
        let first = match generators.first() {
            Some(generator) => {
                let iterable = self.eval(&generator.iter, scope)?;
                self.iter_value(iterable)?
            }
            None => return Ok(()),
        };
        let inner = Scope::new(ScopeKind::Comprehension, Some(scope.clone()));
        self.frames.push(inner.clone());
        let result = self.run_generators(generators, 0, Some(first), &inner, emit);
        self.frames.pop();
        result
    }

    fn run_generators(
        &mut self,
        generators: &[Comprehension],
        level: usize,
        iterator: Option<Value>,
        scope: &Rc<Scope>,
        emit: &mut Emit<'_>,
    ) -> Exec<()> {
        let Some(generator) = generators.get(level) else {
            return emit(self, scope);
        };
        let iterator = match iterator {
            Some(iterator) => iterator,
            None => {
                let iterable = self.eval(&generator.iter, scope)?;
                self.iter_value(iterable)?
            }
        };
        'items: while let Some(item) = self.next_item(&iterator)? {
            self.tick()?;
            self.assign(&generator.target, item, scope)?;
            for condition in &generator.ifs {
                if !truthy(&self.eval(condition, scope)?) {
                    continue 'items;
                }
            }
            self.run_generators(generators, level + 1, None, scope, emit)?;
        }
        Ok(())
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// `iter(value)`
    pub(crate) fn iter_value(&mut self, value: Value) -> Exec<Value> {
        let state = match value {
            Value::Iterator(_) => return Ok(value),
            Value::List(_) | Value::Tuple(_) | Value::Bytes(_) => IterState::Sequence {
                seq: value,
                index: 0,
            },
            Value::Str(ref s) => {
                if s.is_ascii() {
                    IterState::Sequence {
                        seq: value.clone(),
                        index: 0,
                    }
                } else {
                    IterState::Snapshot {
                        items: s.chars().map(|c| Value::from(c.to_string())).collect(),
                        index: 0,
                        name: "str_iterator",
                    }
                }
            }
            Value::Range(r) => IterState::Range {
                next: r.start,
                remaining: r.len(),
                step: r.step,
            },
            Value::Dict(table) => {
                let size = table.borrow().len();
                IterState::Table {
                    table,
                    index: 0,
                    size,
                    kind: ViewKind::Keys,
                    is_set: false,
                }
            }
            Value::Set(table) => {
                let size = table.borrow().len();
                IterState::Table {
                    table,
                    index: 0,
                    size,
                    kind: ViewKind::Keys,
                    is_set: true,
                }
            }
            Value::FrozenSet(table) => IterState::Snapshot {
                items: table.keys().cloned().collect(),
                index: 0,
                name: "set_iterator",
            },
            Value::View(view) => {
                let size = view.dict.borrow().len();
                IterState::Table {
                    table: view.dict.clone(),
                    index: 0,
                    size,
                    kind: view.kind,
                    is_set: false,
                }
            }
            other => {
                return raise(
                    ExcKind::TypeError,
                    format!("'{}' object is not iterable", other.type_name()),
                )
            }
        };
        Ok(Value::iterator(state))
    }

    /// Advance an iterator; `None` once exhausted
    pub(crate) fn next_item(&mut self, iterator: &Value) -> Exec<Option<Value>> {
        let state = match iterator {
            Value::Iterator(state) => state.clone(),
            other => {
                return raise(
                    ExcKind::TypeError,
                    format!("'{}' object is not an iterator", other.type_name()),
                )
            }
        };

        enum Deferred {
            Enumerate(Value),
            Map(Value, Vec<Value>),
            Filter(Value, Value),
            Zip(Vec<Value>),
            Generator(Rc<RefCell<Generator>>),
        }

        let deferred = {
            let mut guard = state.borrow_mut();
            match &mut *guard {
                IterState::Sequence { seq, index } => {
                    let item = match seq {
                        Value::List(list) => list.borrow().get(*index).cloned(),
                        Value::Tuple(items) => items.get(*index).cloned(),
                        Value::Bytes(bytes) => bytes.get(*index).map(|&b| Value::Int(b as i64)),
                        Value::Str(s) => s
                            .as_bytes()
                            .get(*index)
                            .map(|&b| Value::from((b as char).to_string())),
                        _ => None,
                    };
                    if item.is_some() {
                        *index += 1;
                    }
                    return Ok(item);
                }
                IterState::Range {
                    next,
                    remaining,
                    step,
                } => {
                    if *remaining == 0 {
                        return Ok(None);
                    }
                    let value = *next;
                    *remaining -= 1;
                    *next = next.wrapping_add(*step);
                    return Ok(Some(Value::Int(value)));
                }
                IterState::Table {
                    table,
                    index,
                    size,
                    kind,
                    is_set,
                } => {
                    let table = table.borrow();
                    if table.len() != *size {
                        *size = table.len();
                        let message = if *is_set {
                            "Set changed size during iteration"
                        } else {
                            "dictionary changed size during iteration"
                        };
                        return raise(ExcKind::RuntimeError, message);
                    }
                    let item = table.entry_at(*index).map(|(key, value)| match kind {
                        ViewKind::Keys => key.clone(),
                        ViewKind::Values => value.clone(),
                        ViewKind::Items => Value::tuple(vec![key.clone(), value.clone()]),
                    });
                    if item.is_some() {
                        *index += 1;
                    }
                    return Ok(item);
                }
                IterState::Snapshot { items, index, .. } => {
                    let item = items.get(*index).cloned();
                    if item.is_some() {
                        *index += 1;
                    }
                    return Ok(item);
                }
                IterState::Reversed { seq, remaining } => {
                    if *remaining == 0 {
                        return Ok(None);
                    }
                    *remaining -= 1;
                    let item = match seq {
                        Value::List(list) => list.borrow().get(*remaining).cloned(),
                        Value::Tuple(items) => items.get(*remaining).cloned(),
                        Value::Range(r) => Some(Value::Int(r.get(*remaining as u64))),
                        _ => None,
                    };
                    if item.is_none() {
                        *remaining = 0;
                    }
                    return Ok(item);
                }
                IterState::Enumerate { inner, .. } => Deferred::Enumerate(inner.clone()),
                IterState::Map { func, iters } => Deferred::Map(func.clone(), iters.clone()),
                IterState::Filter { func, inner } => Deferred::Filter(func.clone(), inner.clone()),
                IterState::Zip { iters } => Deferred::Zip(iters.clone()),
                IterState::Generator { body, .. } => Deferred::Generator(body.clone()),
            }
        };

        match deferred {
            Deferred::Enumerate(inner) => {
                let Some(item) = self.next_item(&inner)? else {
                    return Ok(None);
                };
                let mut guard = state.borrow_mut();
                let count = match &mut *guard {
                    IterState::Enumerate { count, .. } => {
                        let current = *count;
                        *count += 1;
                        current
                    }
                    _ => 0,
                };
                Ok(Some(Value::tuple(vec![Value::Int(count), item])))
            }
            Deferred::Map(func, iters) => {
                let mut args = Vec::with_capacity(iters.len());
                for iter in &iters {
                    match self.next_item(iter)? {
                        Some(item) => args.push(item),
                        None => return Ok(None),
                    }
                }
                Ok(Some(self.call_value(&func, args, Vec::new())?))
            }
            Deferred::Filter(func, inner) => loop {
                self.tick()?;
                let Some(item) = self.next_item(&inner)? else {
                    return Ok(None);
                };
                let keep = match &func {
                    Value::None => truthy(&item),
                    func => truthy(&self.call_value(func, vec![item.clone()], Vec::new())?),
                };
                if keep {
                    return Ok(Some(item));
                }
            },
            Deferred::Zip(iters) => {
                if iters.is_empty() {
                    return Ok(None);
                }
                let mut items = Vec::with_capacity(iters.len());
                for iter in &iters {
                    match self.next_item(iter)? {
                        Some(item) => items.push(item),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::tuple(items)))
            }
            Deferred::Generator(body) => self.resume_generator(&body),
        }
    }

    /// Drain any iterable into a vector
    pub(crate) fn collect(&mut self, value: Value) -> Exec<Vec<Value>> {
        match &value {
            Value::List(list) => return Ok(list.borrow().clone()),
            Value::Tuple(items) => return Ok(items.to_vec()),
            Value::Range(r) if r.len() > MAX_ITEMS => return ops::memory_error(),
            _ => {}
        }
        let iterator = self.iter_value(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.next_item(&iterator)? {
            self.tick()?;
            if items.len() >= MAX_ITEMS {
                return ops::memory_error();
            }
            items.push(item);
        }
        Ok(items)
    }

    /// Merge a mapping, an iterable of pairs or keyword pairs into a dict
    pub(crate) fn update_dict(&mut self, table: &Rc<RefCell<Table>>, source: Value) -> Exec<()> {
        if let Value::Dict(other) = &source {
            let entries: Vec<(Value, Value)> = other
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut table = table.borrow_mut();
            for (key, value) in entries {
                table.insert(key.hash_key()?, key, value);
            }
            return Ok(());
        }
        if !is_iterable(&source) {
            return raise(
                ExcKind::TypeError,
                format!("'{}' object is not iterable", source.type_name()),
            );
        }
        let items = self.collect(source)?;
        for (position, item) in items.into_iter().enumerate() {
            if !is_iterable(&item) {
                return raise(
                    ExcKind::TypeError,
                    format!(
                        "cannot convert dictionary update sequence element #{} to a sequence",
                        position
                    ),
                );
            }
            let pair = self.collect(item)?;
            if pair.len() != 2 {
                return raise(
                    ExcKind::ValueError,
                    format!(
                        "dictionary update sequence element #{} has length {}; 2 is required",
                        position,
                        pair.len()
                    ),
                );
            }
            let mut pair = pair.into_iter();
            if let (Some(key), Some(value)) = (pair.next(), pair.next()) {
                table.borrow_mut().insert(key.hash_key()?, key, value);
            }
        }
        Ok(())
    }
}

fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Long(n) => integer::normalize(n.clone()),
        Constant::Float(f) => Value::Float(*f),
        Constant::Imaginary(f) => Value::Complex(0.0, *f),
        Constant::Str(s) => Value::from(s.as_str()),
        Constant::Bytes(b) => Value::bytes(b.clone()),
        Constant::Ellipsis => Value::Ellipsis,
    }
}

/// Whether `iter()` accepts the value
pub(crate) fn is_iterable(value: &Value) -> bool {
    matches!(
        value,
        Value::Str(_)
            | Value::Bytes(_)
            | Value::List(_)
            | Value::Tuple(_)
            | Value::Dict(_)
            | Value::Set(_)
            | Value::FrozenSet(_)
            | Value::Range(_)
            | Value::View(_)
            | Value::Iterator(_)
    )
}

pub(crate) fn exception_matches(exc: &ExceptionValue, spec: &Value) -> Exec<bool> {
    match spec {
        Value::Type(TypeKind::Exception(kind)) => Ok(exc.kind.is_subclass_of(*kind)),
        Value::Tuple(items) => {
            for item in items.iter() {
                if exception_matches(exc, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => raise(
            ExcKind::TypeError,
            "catching classes that do not inherit from BaseException is not allowed",
        ),
    }
}

/// Dotted name through the enclosing functions
fn qualname(name: &str, scope: &Rc<Scope>) -> String {
    let mut parts = vec![name.to_string()];
    let mut cursor = Some(scope.clone());
    while let Some(current) = cursor {
        if let ScopeKind::Function(def) = &current.kind {
            parts.push(format!("{}.<locals>", def.name));
        }
        cursor = current.parent.clone();
    }
    parts.reverse();
    parts.join(".")
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`
fn name_list(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    match quoted.len() {
        0 => String::new(),
        1 => quoted[0].clone(),
        2 => format!("{} and {}", quoted[0], quoted[1]),
        n => format!("{}, and {}", quoted[..n - 1].join(", "), quoted[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn run(source: &str) -> (String, Option<String>) {
        run_with_input(source, "")
    }

    fn run_with_input(source: &str, stdin: &str) -> (String, Option<String>) {
        let program = parse_program(source).expect("program should parse");
        let mut interp = Interpreter::new(
            Environment::new(stdin),
            OutputBuffers::new(1 << 20),
            Limits::default(),
        );
        let error = match interp.execute(&program) {
            Ok(()) => None,
            Err(Flow::Raise(exc)) => Some(exc.render()),
            Err(other) => Some(format!("{:?}", other)),
        };
        let (stdout, _) = interp.into_output().into_parts();
        (stdout, error)
    }

    #[test]
    fn test_arithmetic_and_print() {
        let (out, err) = run("x = 7\ny = 2\nprint(x // y, x % y, x / y, x ** y)\n");
        assert_eq!(err, None);
        assert_eq!(out, "3 1 3.5 49\n");
    }

    #[test]
    fn test_functions_defaults_and_keywords() {
        let source = "def greet(name, greeting='Hello', *, punct='!'):\n    return greeting + ', ' + name + punct\nprint(greet('Ada'))\nprint(greet('Bob', 'Hi', punct='?'))\n";
        let (out, err) = run(source);
        assert_eq!(err, None);
        assert_eq!(out, "Hello, Ada!\nHi, Bob?\n");
    }

    #[test]
    fn test_closures_and_nonlocal() {
        let source = "def counter():\n    n = 0\n    def bump():\n        nonlocal n\n        n += 1\n        return n\n    return bump\nc = counter()\nc()\nc()\nprint(c())\n";
        let (out, err) = run(source);
        assert_eq!(err, None);
        assert_eq!(out, "3\n");
    }

    #[test]
    fn test_functions_see_top_level_names() {
        let source = "rate = 3\ndef scale(x):\n    return x * rate\nprint(scale(5))\n";
        let (out, _) = run(source);
        assert_eq!(out, "15\n");
    }

    #[test]
    fn test_global_statement_rebinds_top_level() {
        let source = "total = 0\ndef add(n):\n    global total\n    total += n\nadd(4)\nadd(5)\nprint(total)\n";
        let (out, err) = run(source);
        assert_eq!(err, None);
        assert_eq!(out, "9\n");
    }

    #[test]
    fn test_unbound_local() {
        let source = "x = 1\ndef f():\n    print(x)\n    x = 2\nf()\n";
        let (_, err) = run(source);
        let err = err.expect("should fail");
        assert!(err.ends_with(
            "UnboundLocalError: cannot access local variable 'x' where it is not associated with a value\n"
        ));
    }

    #[test]
    fn test_traceback_lines() {
        let source = "def half(n):\n    return n / 0\nhalf(4)\n";
        let (_, err) = run(source);
        assert_eq!(
            err.as_deref(),
            Some("Traceback (most recent call last):\n  File \"<string>\", line 3, in <module>\n  File \"<string>\", line 2, in half\nZeroDivisionError: division by zero\n")
        );
    }

    #[test]
    fn test_try_except_else_finally() {
        let source = "for d in [2, 0]:\n    try:\n        r = 10 // d\n    except ZeroDivisionError:\n        print('zero')\n    else:\n        print('ok', r)\n    finally:\n        print('done')\n";
        let (out, err) = run(source);
        // ZeroDivisionError is not reachable by name in the sandbox
        assert!(err.unwrap().contains("NameError: name 'ZeroDivisionError' is not defined"));
        assert_eq!(out, "ok 5\ndone\ndone\n");
    }

    #[test]
    fn test_except_base_class_and_binding() {
        let source = "try:\n    {}['k']\nexcept Exception as e:\n    print(type(e).__name__, e.args)\ntry:\n    e\nexcept Exception:\n    print('unbound')\n";
        let (out, err) = run(source);
        assert_eq!(err, None);
        assert_eq!(out, "KeyError ('k',)\nunbound\n");
    }

    #[test]
    fn test_bare_raise_keeps_exception() {
        let source = "try:\n    raise ValueError('bad')\nexcept ValueError:\n    print('seen')\n    raise\n";
        let (out, err) = run(source);
        assert_eq!(out, "seen\n");
        assert!(err.unwrap().ends_with("line 2, in <module>\nValueError: bad\n"));
    }

    #[test]
    fn test_raise_from_sets_cause() {
        let source = "try:\n    int('x')\nexcept ValueError as e:\n    raise Exception('wrapped') from e\n";
        let (_, err) = run(source);
        let err = err.unwrap();
        assert!(err.contains("The above exception was the direct cause"));
        assert!(err.ends_with("Exception: wrapped\n"));
    }

    #[test]
    fn test_comprehensions_do_not_leak() {
        let source = "squares = [n * n for n in range(5) if n % 2 == 0]\nprint(squares)\nprint({k: v for k, v in zip('ab', [1, 2])})\nprint('n' in dir())\n";
        let (out, err) = run(source);
        assert_eq!(err, None);
        assert_eq!(out, "[0, 4, 16]\n{'a': 1, 'b': 2}\nFalse\n");
    }

    #[test]
    fn test_star_unpacking() {
        let (out, err) = run("first, *rest = [1, 2, 3]\nprint(first, rest)\na, b = 1, 2, 3\n");
        assert_eq!(out, "1 [2, 3]\n");
        assert!(err.unwrap().ends_with("ValueError: too many values to unpack (expected 2)\n"));
    }

    #[test]
    fn test_recursion_limit() {
        let (_, err) = run("def f(n):\n    return f(n + 1)\nf(0)\n");
        let err = err.unwrap();
        assert!(err.ends_with("RecursionError: maximum recursion depth exceeded\n"));
        assert!(err.contains("[Previous line repeated"));
    }

    #[test]
    fn test_while_else_and_break() {
        let source = "n = 0\nwhile n < 10:\n    n += 1\n    if n == 3:\n        break\nelse:\n    print('never')\nprint(n)\n";
        let (out, _) = run(source);
        assert_eq!(out, "3\n");
    }

    #[test]
    fn test_input_reads_queue() {
        let (out, err) = run_with_input(
            "a = input('first? ')\nb = input()\nprint(a + b)\ninput()\n",
            "x\ny\n",
        );
        assert_eq!(out, "first? xy\n");
        assert!(err.unwrap().ends_with("EOFError: No more stdin lines available\n"));
    }

    #[test]
    fn test_falsy_prompt_is_not_echoed() {
        let (out, err) = run_with_input(
            "a = input(0)\nb = input('')\nc = input([])\nd = input(1)\nprint(a, b, c, d)\n",
            "w\nx\ny\nz\n",
        );
        assert_eq!(err, None);
        assert_eq!(out, "1w x y z\n");
    }

    #[test]
    fn test_reversed_dict_keys() {
        let (out, err) = run("d = {'a': 1, 'b': 2, 'c': 3}\nprint(list(reversed(d)))\n");
        assert_eq!(err, None);
        assert_eq!(out, "['c', 'b', 'a']\n");
    }

    #[test]
    fn test_named_expressions() {
        let source = "data = [3, 8, 1, 9]\nif (n := len(data)) > 3:\n    print('long', n)\n\
                      print([y for x in data if (y := x * 2) > 5], y)\n\
                      def total(items):\n    acc = 0\n    while (k := len(items)) > 0:\n        acc += items.pop()\n    return acc, k\n\
                      print(total([1, 2, 3]))\n";
        let (out, err) = run(source);
        assert_eq!(err, None);
        assert_eq!(out, "long 4\n[6, 16, 18] 18\n(6, 0)\n");
    }

    #[test]
    fn test_dict_union_operators() {
        let source = "a = {'x': 1, 'y': 2}\nb = {'y': 3, 'z': 4}\nprint(a | b, b | a)\n\
                      c = a\na |= b\na |= [('w', 0)]\nprint(c, c is a)\n{} | [1]\n";
        let (out, err) = run(source);
        assert_eq!(
            out,
            "{'x': 1, 'y': 3, 'z': 4} {'y': 2, 'z': 4, 'x': 1}\n{'x': 1, 'y': 3, 'z': 4, 'w': 0} True\n"
        );
        assert!(err
            .unwrap()
            .ends_with("TypeError: unsupported operand type(s) for |: 'dict' and 'list'\n"));
    }

    #[test]
    fn test_padding_widths_are_bounded() {
        for source in [
            "'a'.center(4611686018427387904)\n",
            "'a'.ljust(10 ** 10, '*')\n",
            "'x'.zfill(10 ** 10)\n",
            "'{:>10000000000}'.format(1)\n",
            "f'{1:{10 ** 10}}'\n",
        ] {
            let (out, err) = run(source);
            assert_eq!(out, "", "{}", source);
            assert!(err.unwrap().ends_with("MemoryError\n"), "{}", source);
        }
        let (out, err) = run("print('ab'.center(6, '-'), '7'.zfill(3))\n");
        assert_eq!(err, None);
        assert_eq!(out, "--ab-- 007\n");
    }

    #[test]
    fn test_ranges_at_the_integer_edges() {
        let source = "r = range(-9223372036854775807 - 1, 9223372036854775807)\nprint(r[-1], r[0], r[9223372036854775807])\nprint(9223372036854775806 in r, len(range(0, 9223372036854775807, 2)))\nprint(r[::2 ** 62])\nlen(r)\n";
        let (out, err) = run(source);
        assert_eq!(
            out,
            "9223372036854775806 -9223372036854775808 -1\nTrue 4611686018427387904\nrange(-9223372036854775808, 9223372036854775807, 4611686018427387904)\n"
        );
        assert!(err
            .unwrap()
            .ends_with("OverflowError: Python int too large to convert to C ssize_t\n"));
    }

    #[test]
    fn test_integers_grow_without_bound() {
        let source = "f = 1\nfor i in range(2, 26):\n    f *= i\nprint(f)\nprint(2 ** 64, -2 ** 63 - 1)\nprint(int('9' * 20) + 1, 10 ** 20 // 7, 10 ** 20 % 7)\na, b = 0, 1\nfor _ in range(100):\n    a, b = b, a + b\nprint(a, hex(a), a.bit_length())\nprint(2 ** 64 == 2.0 ** 64, {2 ** 64: 'x'}[18446744073709551616.0], 2 ** 100 / 2 ** 98)\nprint(f'{2 ** 70:,}', round(123456789012345678901, -5), abs(-2 ** 70))\n";
        let (out, err) = run(source);
        assert_eq!(err, None);
        assert_eq!(
            out,
            "15511210043330985984000000\n18446744073709551616 -9223372036854775809\n100000000000000000000 14285714285714285714 2\n354224848179261915075 0x1333db76a7c594bfc3 69\nTrue x 4.0\n1,180,591,620,717,411,303,424 123456789012345700000 1180591620717411303424\n"
        );
    }

    #[test]
    fn test_runaway_integers_are_refused() {
        let (out, err) = run("print(len(str(2 ** 100000)))\nx = 2 ** 10 ** 9\n");
        assert_eq!(out, "30103\n");
        assert!(err.unwrap().ends_with("MemoryError\n"));
        let (_, err) = run("[0][2 ** 64]\n");
        assert!(err
            .unwrap()
            .ends_with("IndexError: cannot fit 'int' into an index-sized integer\n"));
        let (_, err) = run("float(10 ** 400)\n");
        assert!(err
            .unwrap()
            .ends_with("OverflowError: int too large to convert to float\n"));
    }

    #[test]
    fn test_import_and_class_are_refused() {
        let (_, err) = run("import os\n");
        assert!(err.unwrap().ends_with("ImportError: __import__ not found\n"));
        let (_, err) = run("class A:\n    pass\n");
        assert!(err.unwrap().ends_with("NameError: __build_class__ not found\n"));
    }

    #[test]
    fn test_missing_argument_message() {
        let (_, err) = run("def f(a, b, c):\n    pass\nf(1)\n");
        assert!(err.unwrap().ends_with(
            "TypeError: f() missing 2 required positional arguments: 'b' and 'c'\n"
        ));
    }

    #[test]
    fn test_dict_size_change_during_iteration() {
        let (_, err) = run("d = {1: 1}\nfor k in d:\n    d[k + 1] = 0\n");
        assert!(err
            .unwrap()
            .ends_with("RuntimeError: dictionary changed size during iteration\n"));
    }

    #[test]
    fn test_context_chain_from_handler() {
        let source = "try:\n    [][1]\nexcept Exception:\n    {}['missing']\n";
        let (_, err) = run(source);
        let err = err.unwrap();
        assert!(err.starts_with("Traceback"));
        assert!(err.contains("IndexError: list index out of range\n\nDuring handling"));
        assert!(err.ends_with("KeyError: 'missing'\n"));
    }

    #[test]
    fn test_halt_on_deadline() {
        let program = parse_program("while True:\n    pass\n").unwrap();
        let limits = Limits {
            deadline: Some(Instant::now()),
            ..Limits::default()
        };
        let mut interp = Interpreter::new(Environment::new(""), OutputBuffers::new(1024), limits);
        assert!(matches!(
            interp.execute(&program),
            Err(Flow::Halt(HaltReason::Timeout))
        ));
    }

    #[test]
    fn test_interrupt_cannot_be_caught() {
        let program = parse_program("try:\n    while True:\n        pass\nexcept BaseException:\n    print('caught')\n").unwrap();
        let limits = Limits::default();
        limits.interrupt.store(true, Ordering::Relaxed);
        let mut interp = Interpreter::new(Environment::new(""), OutputBuffers::new(1024), limits);
        assert!(matches!(
            interp.execute(&program),
            Err(Flow::Halt(HaltReason::Interrupted))
        ));
    }
}

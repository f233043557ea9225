//! Generator functions
//!
//! Calling a function whose body yields builds a [`Generator`] instead of
//! running the body. Each advance resumes the body where it stopped and runs
//! it up to the next `yield`. The resume point is a stack of [`Frame`]s, one
//! per compound statement on the path to the `yield`; statements that cannot
//! yield run through the ordinary statement executor.

use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::exceptions::{raise, ExcKind, ExceptionValue, Exec, Flow};
use crate::engine::interpreter::{exception_matches, Interpreter};
use crate::engine::ops::truthy;
use crate::engine::scope::Scope;
use crate::engine::value::Value;
use crate::parser::ast::{Block, FunctionDef, Stmt, StmtKind};

/// A paused generator body
pub struct Generator {
    def: Rc<FunctionDef>,
    scope: Rc<Scope>,
    frames: Vec<Frame>,
    /// Exceptions whose handlers were running inside the body when it paused
    handling: Vec<Rc<ExceptionValue>>,
    finished: bool,
}

/// Where the body stands inside one statement.
///
/// Loop and `try` frames name their statement as `owner[index]`; when such a
/// frame is on top of the stack, the suite it pushed has just completed.
enum Frame {
    Suite { body: Block, next: usize },
    While { owner: Block, index: usize },
    For { owner: Block, index: usize, iterator: Value },
    Try { owner: Block, index: usize, stage: Stage },
    /// `yield from`
    Delegate { iterator: Value, line: usize },
}

enum Stage {
    Body,
    Handler { name: Option<String> },
    Else,
    /// Running `finally`, with the exit that was in progress
    Finally(Option<Flow>),
}

impl Generator {
    pub fn new(def: Rc<FunctionDef>, scope: Rc<Scope>) -> Self {
        let body = def.body.clone();
        Self {
            def,
            scope,
            frames: vec![Frame::Suite { body, next: 0 }],
            handling: Vec::new(),
            finished: false,
        }
    }
}

/// Whether running `stmt` can reach a `yield` of the enclosing function
fn yields(stmt: &Stmt) -> bool {
    let any = |body: &Block| body.iter().any(yields);
    match &stmt.kind {
        StmtKind::Yield { .. } => true,
        StmtKind::If { branches, orelse } => branches.iter().any(|(_, body)| any(body)) || any(orelse),
        StmtKind::While { body, orelse, .. } | StmtKind::For { body, orelse, .. } => {
            any(body) || any(orelse)
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            any(body) || handlers.iter().any(|h| any(&h.body)) || any(orelse) || any(finalbody)
        }
        _ => false,
    }
}

impl Interpreter {
    /// Run a generator to its next `yield`; `None` once it has finished
    pub(crate) fn resume_generator(&mut self, cell: &Rc<RefCell<Generator>>) -> Exec<Option<Value>> {
        let Ok(mut generator) = cell.try_borrow_mut() else {
            return raise(ExcKind::ValueError, "generator already executing");
        };
        if generator.finished {
            return Ok(None);
        }
        let scope = generator.scope.clone();
        self.enter_frame(&scope)?;
        let base = self.handling.len();
        self.handling.append(&mut generator.handling);
        let result = self.run_generator(&mut generator, &scope);
        generator.handling = self.handling.split_off(base);
        self.exit_frame();

        match result {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) | Err(Flow::Return(_)) => {
                generator.finish();
                Ok(None)
            }
            Err(Flow::Raise(exc)) => {
                generator.finish();
                exc.leave_frame(&generator.def.name, generator.def.line);
                if exc.kind != ExcKind::StopIteration {
                    return Err(Flow::Raise(exc));
                }
                let error = Rc::new(ExceptionValue::with_message(
                    ExcKind::RuntimeError,
                    "generator raised StopIteration",
                ));
                error.set_cause(Some(exc));
                Err(Flow::Raise(error))
            }
            Err(other) => {
                generator.finish();
                Err(other)
            }
        }
    }

    fn run_generator(&mut self, generator: &mut Generator, scope: &Rc<Scope>) -> Exec<Option<Value>> {
        loop {
            self.tick()?;
            let Some(frame) = generator.frames.pop() else {
                return Ok(None);
            };
            match frame {
                Frame::Suite { body, next } => {
                    if next >= body.len() {
                        continue;
                    }
                    generator.frames.push(Frame::Suite {
                        body: body.clone(),
                        next: next + 1,
                    });
                    let line = body[next].line;
                    match self.enter_statement(generator, &body, next, scope) {
                        Ok(Some(value)) => return Ok(Some(value)),
                        Ok(None) => {}
                        Err(flow) => {
                            let flow = self.located(flow, line);
                            self.unwind(generator, flow, scope)?;
                        }
                    }
                }
                Frame::While { owner, index } => {
                    let StmtKind::While { test, body, orelse } = &owner[index].kind else {
                        continue;
                    };
                    match self.eval(test, scope) {
                        Ok(value) if truthy(&value) => {
                            let body = body.clone();
                            generator.frames.push(Frame::While { owner, index });
                            generator.frames.push(Frame::Suite { body, next: 0 });
                        }
                        Ok(_) => generator.frames.push(Frame::Suite {
                            body: orelse.clone(),
                            next: 0,
                        }),
                        Err(flow) => {
                            let flow = self.located(flow, owner[index].line);
                            self.unwind(generator, flow, scope)?;
                        }
                    }
                }
                Frame::For {
                    owner,
                    index,
                    iterator,
                } => {
                    let StmtKind::For {
                        target,
                        body,
                        orelse,
                        ..
                    } = &owner[index].kind
                    else {
                        continue;
                    };
                    let step = match self.next_item(&iterator) {
                        Ok(Some(item)) => self.assign(target, item, scope).map(|()| true),
                        Ok(None) => Ok(false),
                        Err(flow) => Err(flow),
                    };
                    match step {
                        Ok(true) => {
                            let body = body.clone();
                            generator.frames.push(Frame::For {
                                owner,
                                index,
                                iterator,
                            });
                            generator.frames.push(Frame::Suite { body, next: 0 });
                        }
                        Ok(false) => generator.frames.push(Frame::Suite {
                            body: orelse.clone(),
                            next: 0,
                        }),
                        Err(flow) => {
                            let flow = self.located(flow, owner[index].line);
                            self.unwind(generator, flow, scope)?;
                        }
                    }
                }
                Frame::Try {
                    owner,
                    index,
                    stage,
                } => match stage {
                    Stage::Body => {
                        let StmtKind::Try { orelse, .. } = &owner[index].kind else {
                            continue;
                        };
                        let orelse = orelse.clone();
                        generator.frames.push(Frame::Try {
                            owner,
                            index,
                            stage: Stage::Else,
                        });
                        generator.frames.push(Frame::Suite {
                            body: orelse,
                            next: 0,
                        });
                    }
                    Stage::Else => self.enter_finally(generator, owner, index, None, scope)?,
                    Stage::Handler { name } => {
                        self.handling.pop();
                        if let Some(name) = &name {
                            self.unbind(name, scope);
                        }
                        self.enter_finally(generator, owner, index, None, scope)?;
                    }
                    Stage::Finally(pending) => {
                        if let Some(Flow::Raise(_)) = &pending {
                            self.handling.pop();
                        }
                        if let Some(flow) = pending {
                            self.unwind(generator, flow, scope)?;
                        }
                    }
                },
                Frame::Delegate { iterator, line } => match self.next_item(&iterator) {
                    Ok(Some(value)) => {
                        generator.frames.push(Frame::Delegate { iterator, line });
                        return Ok(Some(value));
                    }
                    Ok(None) => {}
                    Err(flow) => {
                        let flow = self.located(flow, line);
                        self.unwind(generator, flow, scope)?;
                    }
                },
            }
        }
    }

    /// Start `body[index]`, descending into it when it can yield
    fn enter_statement(
        &mut self,
        generator: &mut Generator,
        body: &Block,
        index: usize,
        scope: &Rc<Scope>,
    ) -> Exec<Option<Value>> {
        let stmt = &body[index];
        if !yields(stmt) {
            self.exec_stmt(stmt, scope)?;
            return Ok(None);
        }
        match &stmt.kind {
            StmtKind::Yield {
                targets,
                value,
                delegate,
            } => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                // Nothing is ever sent in, so the paused `yield` evaluates to None
                for target in targets {
                    self.assign(target, Value::None, scope)?;
                }
                if !*delegate {
                    return Ok(Some(value));
                }
                let iterator = self.iter_value(value)?;
                generator.frames.push(Frame::Delegate {
                    iterator,
                    line: stmt.line,
                });
            }
            StmtKind::If { branches, orelse } => {
                let mut chosen = orelse.clone();
                for (test, branch) in branches {
                    if truthy(&self.eval(test, scope)?) {
                        chosen = branch.clone();
                        break;
                    }
                }
                generator.frames.push(Frame::Suite {
                    body: chosen,
                    next: 0,
                });
            }
            StmtKind::While { .. } => generator.frames.push(Frame::While {
                owner: body.clone(),
                index,
            }),
            StmtKind::For { iter, .. } => {
                let iterable = self.eval(iter, scope)?;
                let iterator = self.iter_value(iterable)?;
                generator.frames.push(Frame::For {
                    owner: body.clone(),
                    index,
                    iterator,
                });
            }
            StmtKind::Try { body: tried, .. } => {
                let tried = tried.clone();
                generator.frames.push(Frame::Try {
                    owner: body.clone(),
                    index,
                    stage: Stage::Body,
                });
                generator.frames.push(Frame::Suite {
                    body: tried,
                    next: 0,
                });
            }
            _ => self.exec_stmt(stmt, scope)?,
        }
        Ok(None)
    }

    /// Note where an exception passed through the generator body
    fn located(&self, flow: Flow, line: usize) -> Flow {
        if let Flow::Raise(exc) = &flow {
            exc.note_line(line);
            if let Some(handled) = self.handling.last() {
                exc.set_context(handled);
            }
        }
        flow
    }

    /// Pop frames until something takes `flow`: a loop for `break` and
    /// `continue`, a matching handler or a `finally` for the rest.
    /// Returns the flow when it leaves the body.
    fn unwind(&mut self, generator: &mut Generator, flow: Flow, scope: &Rc<Scope>) -> Exec<()> {
        if let Flow::Halt(_) = flow {
            return Err(flow);
        }
        while let Some(frame) = generator.frames.pop() {
            match frame {
                Frame::Suite { .. } | Frame::Delegate { .. } => {}
                Frame::While { .. } | Frame::For { .. } => match flow {
                    Flow::Break => return Ok(()),
                    Flow::Continue => {
                        generator.frames.push(frame);
                        return Ok(());
                    }
                    _ => {}
                },
                Frame::Try {
                    owner,
                    index,
                    stage,
                } => match stage {
                    Stage::Body => {
                        return match flow {
                            Flow::Raise(exc) => self.handle(generator, owner, index, exc, scope),
                            other => self.enter_finally(generator, owner, index, Some(other), scope),
                        };
                    }
                    Stage::Else => return self.enter_finally(generator, owner, index, Some(flow), scope),
                    Stage::Handler { name } => {
                        self.handling.pop();
                        if let Some(name) = &name {
                            self.unbind(name, scope);
                        }
                        return self.enter_finally(generator, owner, index, Some(flow), scope);
                    }
                    // A new exit from `finally` replaces the one it was running for
                    Stage::Finally(pending) => {
                        if let Some(Flow::Raise(_)) = pending {
                            self.handling.pop();
                        }
                    }
                },
            }
        }
        Err(flow)
    }

    /// Find the handler of `try` statement `owner[index]` for `exc`
    fn handle(
        &mut self,
        generator: &mut Generator,
        owner: Block,
        index: usize,
        exc: Rc<ExceptionValue>,
        scope: &Rc<Scope>,
    ) -> Exec<()> {
        let StmtKind::Try { handlers, .. } = &owner[index].kind else {
            return Err(Flow::Raise(exc));
        };
        for handler in handlers.iter() {
            if let Some(kind) = &handler.kind {
                let matched = self
                    .eval(kind, scope)
                    .and_then(|spec| exception_matches(&exc, &spec));
                match matched {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(flow) => {
                        if let Flow::Raise(error) = &flow {
                            error.note_line(handler.line);
                            error.set_context(&exc);
                        }
                        return self.enter_finally(generator, owner.clone(), index, Some(flow), scope);
                    }
                }
            }
            if let Some(name) = &handler.name {
                self.store_name(name, Value::Exception(exc.clone()), scope)?;
            }
            self.handling.push(exc);
            let body = handler.body.clone();
            generator.frames.push(Frame::Try {
                owner: owner.clone(),
                index,
                stage: Stage::Handler {
                    name: handler.name.clone(),
                },
            });
            generator.frames.push(Frame::Suite { body, next: 0 });
            return Ok(());
        }
        self.enter_finally(generator, owner.clone(), index, Some(Flow::Raise(exc)), scope)
    }

    /// Run the `finally` suite of `owner[index]`, then resume `pending`
    fn enter_finally(
        &mut self,
        generator: &mut Generator,
        owner: Block,
        index: usize,
        pending: Option<Flow>,
        scope: &Rc<Scope>,
    ) -> Exec<()> {
        let finalbody = match &owner[index].kind {
            StmtKind::Try { finalbody, .. } if !finalbody.is_empty() => finalbody.clone(),
            _ => {
                return match pending {
                    Some(flow) => self.unwind(generator, flow, scope),
                    None => Ok(()),
                }
            }
        };
        if let Some(Flow::Raise(exc)) = &pending {
            self.handling.push(exc.clone());
        }
        generator.frames.push(Frame::Try {
            owner,
            index,
            stage: Stage::Finally(pending),
        });
        generator.frames.push(Frame::Suite {
            body: finalbody,
            next: 0,
        });
        Ok(())
    }
}

impl Generator {
    fn finish(&mut self) {
        self.finished = true;
        self.frames.clear();
        self.handling.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::sandbox::run;

    fn stdout(source: &str) -> String {
        let (out, err) = run(source, "");
        assert_eq!(err, "", "unexpected stderr for {:?}", source);
        out
    }

    #[test]
    fn test_generator_yields_lazily() {
        let source = "def gen(n):\n    for i in range(n):\n        yield i*i\n\
                      print(list(gen(5)))\n\
                      def naturals():\n    n = 0\n    while True:\n        yield n\n        n += 1\n\
                      for k in naturals():\n    if k > 3:\n        break\n    print(k, end=' ')\nprint()\n\
                      g = gen(2)\nprint(next(g), next(g), next(g, 'done'))\n";
        assert_eq!(stdout(source), "[0, 1, 4, 9, 16]\n0 1 2 3 \n0 1 done\n");
    }

    #[test]
    fn test_body_runs_only_when_advanced() {
        let source = "def noisy():\n    print('start')\n    yield 1\n    print('end')\n\
                      g = noisy()\nprint('made', type(g).__name__)\nprint(next(g))\nprint(list(g))\n";
        assert_eq!(stdout(source), "made generator\nstart\n1\nend\n[]\n");
    }

    #[test]
    fn test_yield_from_and_return() {
        let source = "def inner():\n    yield 1\n    yield 2\n\
                      def outer():\n    yield 0\n    yield from inner()\n    yield from 'ab'\n    return\n    yield 'never'\n\
                      print(list(outer()))\n";
        assert_eq!(stdout(source), "[0, 1, 2, 'a', 'b']\n");
    }

    #[test]
    fn test_try_inside_generator() {
        let source = "def safe(items):\n    for x in items:\n        try:\n            yield 10 // x\n\
                      \x20       except Exception as e:\n            yield str(e)\n        finally:\n            print('after', x)\n\
                      for v in safe([5, 0]):\n    print(v)\n";
        assert_eq!(
            stdout(source),
            "2\nafter 5\ninteger division or modulo by zero\nafter 0\n"
        );
    }

    #[test]
    fn test_exception_leaves_generator() {
        let (out, err) = run(
            "def bad():\n    yield 1\n    raise ValueError('no')\nfor v in bad():\n    print(v)\n",
            "",
        );
        assert_eq!(out, "1\n");
        assert!(err.contains("line 3, in bad"), "{}", err);
        assert!(err.ends_with("ValueError: no\n"), "{}", err);
    }

    #[test]
    fn test_generator_state_is_independent() {
        let source = "def count(n):\n    while n > 0:\n        yield n\n        n -= 1\n\
                      a = count(3)\nb = count(2)\nprint(next(a), next(b), next(a), list(b), list(a))\n\
                      print(sum(x for x in count(4)), max(count(5)))\n";
        assert_eq!(stdout(source), "3 2 2 [1] [1]\n10 5\n");
    }

    #[test]
    fn test_running_generator_cannot_advance_itself() {
        let (_, err) = run(
            "def me():\n    yield next(g)\ng = me()\nnext(g)\n",
            "",
        );
        assert!(err.ends_with("ValueError: generator already executing\n"), "{}", err);
    }
}

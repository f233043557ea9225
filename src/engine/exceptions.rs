//! Exceptions, non-local control flow and traceback rendering

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::engine::format::{repr, str_value};
use crate::engine::value::Value;

/// File name shown in tracebacks for the executed program
pub const PROGRAM_FILENAME: &str = "<string>";

/// Built-in exception classes known to the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExcKind {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    ValueError,
    UnicodeDecodeError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    EOFError,
    ImportError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    StopIteration,
    SyntaxError,
    IndentationError,
    AssertionError,
    MemoryError,
}

impl ExcKind {
    pub const ALL: [ExcKind; 26] = [
        ExcKind::BaseException,
        ExcKind::SystemExit,
        ExcKind::KeyboardInterrupt,
        ExcKind::Exception,
        ExcKind::ArithmeticError,
        ExcKind::ZeroDivisionError,
        ExcKind::OverflowError,
        ExcKind::LookupError,
        ExcKind::IndexError,
        ExcKind::KeyError,
        ExcKind::ValueError,
        ExcKind::UnicodeDecodeError,
        ExcKind::TypeError,
        ExcKind::NameError,
        ExcKind::UnboundLocalError,
        ExcKind::AttributeError,
        ExcKind::EOFError,
        ExcKind::ImportError,
        ExcKind::RuntimeError,
        ExcKind::RecursionError,
        ExcKind::NotImplementedError,
        ExcKind::StopIteration,
        ExcKind::SyntaxError,
        ExcKind::IndentationError,
        ExcKind::AssertionError,
        ExcKind::MemoryError,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::SystemExit => "SystemExit",
            ExcKind::KeyboardInterrupt => "KeyboardInterrupt",
            ExcKind::Exception => "Exception",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::LookupError => "LookupError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::ValueError => "ValueError",
            ExcKind::UnicodeDecodeError => "UnicodeDecodeError",
            ExcKind::TypeError => "TypeError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::EOFError => "EOFError",
            ExcKind::ImportError => "ImportError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::SyntaxError => "SyntaxError",
            ExcKind::IndentationError => "IndentationError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::MemoryError => "MemoryError",
        }
    }

    pub fn from_name(name: &str) -> Option<ExcKind> {
        ExcKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn parent(&self) -> Option<ExcKind> {
        let parent = match self {
            ExcKind::BaseException => return None,
            ExcKind::SystemExit | ExcKind::KeyboardInterrupt | ExcKind::Exception => {
                ExcKind::BaseException
            }
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => ExcKind::ArithmeticError,
            ExcKind::IndexError | ExcKind::KeyError => ExcKind::LookupError,
            ExcKind::UnicodeDecodeError => ExcKind::ValueError,
            ExcKind::UnboundLocalError => ExcKind::NameError,
            ExcKind::RecursionError | ExcKind::NotImplementedError => ExcKind::RuntimeError,
            ExcKind::IndentationError => ExcKind::SyntaxError,
            _ => ExcKind::Exception,
        };
        Some(parent)
    }

    pub fn is_subclass_of(&self, other: ExcKind) -> bool {
        let mut current = Some(*self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

/// One frame of a traceback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub line: usize,
    pub name: String,
}

/// An exception instance
#[derive(Debug)]
pub struct ExceptionValue {
    pub kind: ExcKind,
    pub args: Vec<Value>,
    traceback: RefCell<Vec<TraceEntry>>,
    /// Line in the frame currently being unwound
    pending_line: Cell<Option<usize>>,
    cause: RefCell<Option<Rc<ExceptionValue>>>,
    context: RefCell<Option<Rc<ExceptionValue>>>,
    suppress_context: Cell<bool>,
}

impl ExceptionValue {
    pub fn new(kind: ExcKind, args: Vec<Value>) -> Self {
        Self {
            kind,
            args,
            traceback: RefCell::new(Vec::new()),
            pending_line: Cell::new(None),
            cause: RefCell::new(None),
            context: RefCell::new(None),
            suppress_context: Cell::new(false),
        }
    }

    pub fn with_message(kind: ExcKind, message: impl Into<String>) -> Self {
        Self::new(kind, vec![Value::from(message.into())])
    }

    /// `str(exc)`
    pub fn message(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [single] if self.kind == ExcKind::KeyError => repr(single),
            [single] => str_value(single),
            many => repr(&Value::tuple(many.to_vec())),
        }
    }

    /// `repr(exc)`
    pub fn repr(&self) -> String {
        let args: Vec<String> = self.args.iter().map(repr).collect();
        format!("{}({})", self.kind.name(), args.join(", "))
    }

    /// Record the statement line where the exception passed through the
    /// current frame; the first statement to see it wins
    pub fn note_line(&self, line: usize) {
        if self.pending_line.get().is_none() {
            self.pending_line.set(Some(line));
        }
    }

    /// Forget the unwinding position before the instance is raised again
    pub fn rewind(&self) {
        self.pending_line.set(None);
    }

    /// Push a traceback entry as the exception leaves a frame
    pub fn leave_frame(&self, name: &str, fallback_line: usize) {
        let line = self.pending_line.take().unwrap_or(fallback_line);
        self.traceback.borrow_mut().push(TraceEntry {
            line,
            name: name.to_string(),
        });
    }

    pub fn traceback(&self) -> Vec<TraceEntry> {
        self.traceback.borrow().clone()
    }

    pub fn set_cause(&self, cause: Option<Rc<ExceptionValue>>) {
        *self.cause.borrow_mut() = cause;
        self.suppress_context.set(true);
    }

    pub fn cause(&self) -> Option<Rc<ExceptionValue>> {
        self.cause.borrow().clone()
    }

    /// Attach the exception being handled when this one was raised
    pub fn set_context(self: &Rc<Self>, handled: &Rc<ExceptionValue>) {
        if Rc::ptr_eq(self, handled) || self.context.borrow().is_some() {
            return;
        }
        // Refuse links that would close a cycle
        let mut cursor = Some(handled.clone());
        while let Some(exc) = cursor {
            if Rc::ptr_eq(&exc, self) {
                return;
            }
            cursor = exc.context.borrow().clone();
        }
        *self.context.borrow_mut() = Some(handled.clone());
    }

    pub fn context(&self) -> Option<Rc<ExceptionValue>> {
        self.context.borrow().clone()
    }

    /// Final line of a report: `Kind: message` or just `Kind`
    pub fn summary(&self) -> String {
        let message = self.message();
        if message.is_empty() {
            self.kind.name().to_string()
        } else {
            format!("{}: {}", self.kind.name(), message)
        }
    }

    /// Full report, including chained exceptions
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        if depth < 32 {
            if let Some(cause) = self.cause() {
                cause.render_into(out, depth + 1);
                out.push_str(
                    "\nThe above exception was the direct cause of the following exception:\n\n",
                );
            } else if let (Some(context), false) = (self.context(), self.suppress_context.get()) {
                context.render_into(out, depth + 1);
                out.push_str(
                    "\nDuring handling of the above exception, another exception occurred:\n\n",
                );
            }
        }

        let traceback = self.traceback.borrow();
        if !traceback.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
            let mut previous: Option<&TraceEntry> = None;
            let mut repeats = 0usize;
            for entry in traceback.iter().rev() {
                if previous == Some(entry) {
                    repeats += 1;
                    if repeats >= REPEAT_CUTOFF {
                        continue;
                    }
                } else {
                    flush_repeats(out, repeats);
                    repeats = 0;
                }
                previous = Some(entry);
                out.push_str(&format!(
                    "  File \"{}\", line {}, in {}\n",
                    PROGRAM_FILENAME, entry.line, entry.name
                ));
            }
            flush_repeats(out, repeats);
        }
        out.push_str(&self.summary());
        out.push('\n');
    }
}

/// Identical consecutive frames printed before they are summarised
const REPEAT_CUTOFF: usize = 3;

fn flush_repeats(out: &mut String, repeats: usize) {
    if repeats >= REPEAT_CUTOFF {
        let hidden = repeats + 1 - REPEAT_CUTOFF;
        let noun = if hidden == 1 { "time" } else { "times" };
        out.push_str(&format!(
            "  [Previous line repeated {} more {}]\n",
            hidden, noun
        ));
    }
}

/// Why a run was stopped from outside the program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    Timeout,
    Interrupted,
    OutputLimit,
}

/// Non-local exits from statement and expression evaluation
#[derive(Debug)]
pub enum Flow {
    Raise(Rc<ExceptionValue>),
    Return(Value),
    Break,
    Continue,
    /// Watchdog stops; `except` clauses never see these
    Halt(HaltReason),
}

impl Flow {
    pub fn exception(kind: ExcKind, message: impl Into<String>) -> Flow {
        Flow::Raise(Rc::new(ExceptionValue::with_message(kind, message)))
    }
}

pub type Exec<T> = Result<T, Flow>;

/// Raise a built-in exception with a message
pub fn raise<T>(kind: ExcKind, message: impl Into<String>) -> Exec<T> {
    Err(Flow::exception(kind, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ExcKind::ZeroDivisionError.is_subclass_of(ExcKind::ArithmeticError));
        assert!(ExcKind::KeyError.is_subclass_of(ExcKind::Exception));
        assert!(ExcKind::UnboundLocalError.is_subclass_of(ExcKind::NameError));
        assert!(!ExcKind::SystemExit.is_subclass_of(ExcKind::Exception));
        assert!(!ExcKind::KeyboardInterrupt.is_subclass_of(ExcKind::Exception));
    }

    #[test]
    fn test_message_forms() {
        let none = ExceptionValue::new(ExcKind::ValueError, vec![]);
        assert_eq!(none.summary(), "ValueError");
        let key = ExceptionValue::new(ExcKind::KeyError, vec![Value::from("x")]);
        assert_eq!(key.summary(), "KeyError: 'x'");
        let pair = ExceptionValue::new(ExcKind::Exception, vec![Value::Int(1), Value::from("a")]);
        assert_eq!(pair.message(), "(1, 'a')");
        assert_eq!(pair.repr(), "Exception(1, 'a')");
    }

    #[test]
    fn test_render_traceback_outermost_first() {
        let exc = ExceptionValue::with_message(ExcKind::ZeroDivisionError, "division by zero");
        exc.note_line(2);
        exc.leave_frame("half", 1);
        exc.note_line(3);
        exc.leave_frame("<module>", 1);
        assert_eq!(
            exc.render(),
            "Traceback (most recent call last):\n  File \"<string>\", line 3, in <module>\n  File \"<string>\", line 2, in half\nZeroDivisionError: division by zero\n"
        );
    }

    #[test]
    fn test_render_collapses_repeated_frames() {
        let exc = ExceptionValue::with_message(ExcKind::RecursionError, "maximum recursion depth exceeded");
        for _ in 0..10 {
            exc.note_line(2);
            exc.leave_frame("f", 1);
        }
        exc.note_line(3);
        exc.leave_frame("<module>", 1);
        let text = exc.render();
        assert_eq!(text.matches("line 2, in f").count(), 3);
        assert!(text.contains("  [Previous line repeated 7 more times]\n"));
    }

    #[test]
    fn test_render_context_chain() {
        let first = Rc::new(ExceptionValue::with_message(ExcKind::KeyError, "k"));
        first.leave_frame("<module>", 2);
        let second = Rc::new(ExceptionValue::with_message(ExcKind::ValueError, "bad"));
        second.set_context(&first);
        second.leave_frame("<module>", 4);
        let text = second.render();
        assert!(text.contains("During handling of the above exception"));
        assert!(text.starts_with("Traceback"));
        assert!(text.ends_with("ValueError: bad\n"));
    }
}

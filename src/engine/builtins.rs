//! Built-in functions and type constructors

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::Signed;

use crate::engine::exceptions::{raise, ExcKind, ExceptionValue, Exec, Flow};
use crate::engine::format::{format_value, repr, str_value};
use crate::engine::integer::{self, MAX_INT_BITS};
use crate::engine::interpreter::{is_iterable, Interpreter};
use crate::engine::methods::{self, decode_bytes, encode_str};
use crate::engine::ops::{self, as_index, truthy};
use crate::engine::value::{
    Builtin, IterState, ObjectIdentity, RangeValue, SliceValue, Table, TypeKind, Value, MAX_ITEMS,
};
use crate::parser::ast::BinOp;

// ============================================================================
// Argument helpers
// ============================================================================

/// Check a positional argument count
pub(crate) fn arity(name: &str, given: usize, min: usize, max: usize) -> Exec<()> {
    if (min..=max).contains(&given) {
        return Ok(());
    }
    let plural = |n: usize| if n == 1 { "" } else { "s" };
    let message = if max == 0 {
        format!("{}() takes no arguments ({} given)", name, given)
    } else if min == 1 && max == 1 {
        format!("{}() takes exactly one argument ({} given)", name, given)
    } else if min == max {
        format!("{} expected {} argument{}, got {}", name, min, plural(min), given)
    } else if given < min {
        format!("{} expected at least {} argument{}, got {}", name, min, plural(min), given)
    } else {
        format!("{} expected at most {} argument{}, got {}", name, max, plural(max), given)
    };
    raise(ExcKind::TypeError, message)
}

pub(crate) fn no_keywords(name: &str, kwargs: &[(String, Value)]) -> Exec<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        raise(
            ExcKind::TypeError,
            format!("{}() takes no keyword arguments", name),
        )
    }
}

/// Remove a keyword argument by name
pub(crate) fn take_keyword(kwargs: &mut Vec<(String, Value)>, key: &str) -> Option<Value> {
    let position = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(position).1)
}

/// A parameter passed either by position or by keyword
pub(crate) fn optional(
    args: &[Value],
    index: usize,
    kwargs: &mut Vec<(String, Value)>,
    key: &str,
) -> Option<Value> {
    match args.get(index) {
        Some(value) => Some(value.clone()),
        None => take_keyword(kwargs, key),
    }
}

/// Reject keyword arguments left after the known ones were taken
pub(crate) fn finish_keywords(name: &str, kwargs: &[(String, Value)]) -> Exec<()> {
    match kwargs.first() {
        None => Ok(()),
        Some((key, _)) => raise(
            ExcKind::TypeError,
            format!("'{}' is an invalid keyword argument for {}()", key, name),
        ),
    }
}

fn integer_arg(value: &Value) -> Exec<i64> {
    if let Value::Long(_) = value {
        return integer::index_overflow();
    }
    as_index(value).map_or_else(
        || {
            raise(
                ExcKind::TypeError,
                format!(
                    "'{}' object cannot be interpreted as an integer",
                    value.type_name()
                ),
            )
        },
        Ok,
    )
}

fn text_arg(value: &Value, function: &str, position: usize) -> Exec<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => raise(
            ExcKind::TypeError,
            format!(
                "{}() argument {} must be str, not {}",
                function,
                position,
                other.type_name()
            ),
        ),
    }
}

// ============================================================================
// Numeric parsing
// ============================================================================

/// Strip `_` separators, which are only valid between digits
fn strip_underscores(digits: &str) -> Option<String> {
    if digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return None;
    }
    Some(digits.replace('_', ""))
}

/// `int(text, base)`
pub(crate) fn parse_int(text: &str, base: u32) -> Exec<Value> {
    let invalid = || {
        raise(
            ExcKind::ValueError,
            format!(
                "invalid literal for int() with base {}: {}",
                base,
                repr(&Value::from(text))
            ),
        )
    };
    let trimmed = text.trim();
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lowered = body.to_ascii_lowercase();
    let prefixed = |prefix: &str| lowered.starts_with(prefix);
    let (radix, digits) = match base {
        0 if prefixed("0x") => (16, &body[2..]),
        0 if prefixed("0o") => (8, &body[2..]),
        0 if prefixed("0b") => (2, &body[2..]),
        0 => {
            // a decimal literal may only start with 0 when it is all zeros
            if body.starts_with('0') && !body.trim_start_matches(['0', '_']).is_empty() {
                return invalid();
            }
            (10, body)
        }
        16 if prefixed("0x") => (16, &body[2..]),
        8 if prefixed("0o") => (8, &body[2..]),
        2 if prefixed("0b") => (2, &body[2..]),
        other => (other, body),
    };
    let digits = if digits.len() < body.len() {
        digits.strip_prefix('_').unwrap_or(digits)
    } else {
        digits
    };
    let Some(clean) = strip_underscores(digits) else {
        return invalid();
    };
    if clean.is_empty() || clean.starts_with(['+', '-']) {
        return invalid();
    }
    let bits_per_digit = (u32::BITS - (radix - 1).leading_zeros()) as u64;
    if (clean.len() as u64).saturating_mul(bits_per_digit) > MAX_INT_BITS + bits_per_digit {
        return ops::memory_error();
    }
    let Some(magnitude) = integer::parse_digits(&clean, radix) else {
        return invalid();
    };
    Ok(integer::normalize(if negative { -magnitude } else { magnitude }))
}

/// `float(text)`
pub(crate) fn parse_float(text: &str) -> Exec<f64> {
    let invalid = || {
        raise(
            ExcKind::ValueError,
            format!("could not convert string to float: {}", repr(&Value::from(text))),
        )
    };
    let trimmed = text.trim();
    let unsigned = trimmed.trim_start_matches(['+', '-']);
    let lowered = unsigned.to_ascii_lowercase();
    if trimmed.len() - unsigned.len() > 1 {
        return invalid();
    }
    if matches!(lowered.as_str(), "inf" | "infinity" | "nan") {
        return trimmed.to_ascii_lowercase().parse::<f64>().or_else(|_| invalid());
    }
    let valid_chars = unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-' | '_'));
    if unsigned.is_empty() || !valid_chars {
        return invalid();
    }
    let Some(clean) = strip_underscores(trimmed) else {
        return invalid();
    };
    clean.parse::<f64>().or_else(|_| invalid())
}

/// `complex(text)`
fn parse_complex(text: &str) -> Exec<Value> {
    let malformed = || raise(ExcKind::ValueError, "complex() arg is a malformed string");
    let mut body = text.trim();
    if let Some(inner) = body.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        body = inner.trim();
    }
    if body.is_empty() {
        return malformed();
    }
    let Some(imaginary) = body.strip_suffix(['j', 'J']) else {
        return match parse_float(body) {
            Ok(re) => Ok(Value::Complex(re, 0.0)),
            Err(_) => malformed(),
        };
    };
    // split at the last sign that is not part of an exponent
    let bytes = imaginary.as_bytes();
    let split = (1..bytes.len())
        .rev()
        .find(|&i| matches!(bytes[i], b'+' | b'-') && !matches!(bytes[i - 1], b'e' | b'E'));
    let (real_text, imag_text) = match split {
        Some(i) => (&imaginary[..i], &imaginary[i..]),
        None => ("", imaginary),
    };
    let imag = match imag_text {
        "" | "+" => 1.0,
        "-" => -1.0,
        other => match parse_float(other) {
            Ok(f) => f,
            Err(_) => return malformed(),
        },
    };
    let real = if real_text.is_empty() {
        0.0
    } else {
        match parse_float(real_text) {
            Ok(f) => f,
            Err(_) => return malformed(),
        }
    };
    Ok(Value::Complex(real, imag))
}

/// Round half to even
fn round_half_even(f: f64) -> f64 {
    let rounded = f.round();
    if (f - f.trunc()).abs() == 0.5 {
        2.0 * (f / 2.0).round()
    } else {
        rounded
    }
}

fn round_float(f: f64, ndigits: i64) -> Exec<f64> {
    if !f.is_finite() || f == 0.0 {
        return Ok(f);
    }
    if ndigits > 300 {
        return Ok(f);
    }
    if ndigits >= 0 {
        // decimal formatting rounds the exact binary value half to even
        let text = format!("{:.*}", ndigits as usize, f);
        return Ok(text.parse::<f64>().unwrap_or(f));
    }
    if ndigits < -308 {
        return Ok(0.0 * f);
    }
    let scale = 10f64.powi((-ndigits) as i32);
    let rounded = round_half_even(f / scale) * scale;
    if rounded.is_infinite() {
        return raise(ExcKind::OverflowError, "rounded value too large to represent");
    }
    Ok(rounded)
}

impl Interpreter {
    pub(crate) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        mut kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let name = builtin.name();
        let keyword_builtins = matches!(
            builtin,
            Builtin::Print
                | Builtin::Sorted
                | Builtin::Max
                | Builtin::Min
                | Builtin::Enumerate
                | Builtin::Sum
                | Builtin::Round
                | Builtin::Zip
        );
        if !keyword_builtins {
            no_keywords(name, &kwargs)?;
        }
        let value = match builtin {
            Builtin::Print => return self.builtin_print(args, kwargs),
            Builtin::Input => return self.builtin_input(args),
            Builtin::Abs => {
                arity(name, args.len(), 1, 1)?;
                match &args[0] {
                    Value::Bool(b) => Value::Int(*b as i64),
                    Value::Int(i) => match i.checked_abs() {
                        Some(i) => Value::Int(i),
                        None => integer::normalize(BigInt::from(*i).abs()),
                    },
                    Value::Long(n) => integer::normalize(n.abs()),
                    Value::Float(f) => Value::Float(f.abs()),
                    Value::Complex(re, im) => Value::Float(re.hypot(*im)),
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!("bad operand type for abs(): '{}'", other.type_name()),
                        )
                    }
                }
            }
            Builtin::All | Builtin::Any => {
                arity(name, args.len(), 1, 1)?;
                let iterator = self.iter_value(args[0].clone())?;
                let want = builtin == Builtin::Any;
                while let Some(item) = self.next_item(&iterator)? {
                    self.tick()?;
                    if truthy(&item) == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Value::Bool(!want)
            }
            Builtin::Chr => {
                arity(name, args.len(), 1, 1)?;
                let code = integer_arg(&args[0])?;
                match u32::try_from(code).ok().and_then(char::from_u32) {
                    Some(c) => Value::from(c.to_string()),
                    None => return raise(ExcKind::ValueError, "chr() arg not in range(0x110000)"),
                }
            }
            Builtin::Dir => {
                arity(name, args.len(), 0, 1)?;
                let mut names: Vec<String> = match args.first() {
                    None => self
                        .current_scope()
                        .snapshot()
                        .into_iter()
                        .map(|(name, _)| name)
                        .collect(),
                    Some(value) => methods::attribute_names(value)
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                };
                names.sort();
                Value::list(names.into_iter().map(Value::from).collect())
            }
            Builtin::Divmod => {
                arity(name, args.len(), 2, 2)?;
                let quotient = ops::binary(BinOp::FloorDiv, &args[0], &args[1]).map_err(|flow| {
                    divmod_error(flow, &args[0], &args[1])
                })?;
                let remainder = ops::binary(BinOp::Mod, &args[0], &args[1])?;
                Value::tuple(vec![quotient, remainder])
            }
            Builtin::Enumerate => {
                arity(name, args.len(), 1, 2)?;
                let start = match optional(&args, 1, &mut kwargs, "start") {
                    Some(v) => integer_arg(&v)?,
                    None => 0,
                };
                finish_keywords(name, &kwargs)?;
                let inner = self.iter_value(args[0].clone())?;
                Value::iterator(IterState::Enumerate { inner, count: start })
            }
            Builtin::Filter => {
                arity(name, args.len(), 2, 2)?;
                let inner = self.iter_value(args[1].clone())?;
                Value::iterator(IterState::Filter {
                    func: args[0].clone(),
                    inner,
                })
            }
            Builtin::Format => {
                arity(name, args.len(), 1, 2)?;
                let spec = match args.get(1) {
                    Some(v) => text_arg(v, "format", 2)?.to_string(),
                    None => String::new(),
                };
                Value::from(format_value(&args[0], &spec)?)
            }
            Builtin::Getattr | Builtin::Hasattr => {
                if builtin == Builtin::Getattr {
                    arity(name, args.len(), 2, 3)?;
                } else {
                    arity(name, args.len(), 2, 2)?;
                }
                let attr = match &args[1] {
                    Value::Str(s) => s.clone(),
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!("attribute name must be string, not '{}'", other.type_name()),
                        )
                    }
                };
                match (self.get_attr(&args[0], &attr), builtin) {
                    (Ok(_), Builtin::Hasattr) => Value::Bool(true),
                    (Ok(value), _) => value,
                    (Err(Flow::Raise(exc)), _) if exc.kind.is_subclass_of(ExcKind::AttributeError) => {
                        match (builtin, args.get(2)) {
                            (Builtin::Hasattr, _) => Value::Bool(false),
                            (_, Some(default)) => default.clone(),
                            _ => return Err(Flow::Raise(exc)),
                        }
                    }
                    (Err(flow), _) => return Err(flow),
                }
            }
            Builtin::Hash => {
                arity(name, args.len(), 1, 1)?;
                Value::Int(args[0].hash_value()?)
            }
            Builtin::Hex | Builtin::Oct => {
                arity(name, args.len(), 1, 1)?;
                let Some(value) = integer::to_bigint(&args[0]) else {
                    return raise(
                        ExcKind::TypeError,
                        format!(
                            "'{}' object cannot be interpreted as an integer",
                            args[0].type_name()
                        ),
                    );
                };
                if builtin == Builtin::Hex {
                    Value::from(integer::radix_text(&value, "0x", 16))
                } else {
                    Value::from(integer::radix_text(&value, "0o", 8))
                }
            }
            Builtin::Id => {
                arity(name, args.len(), 1, 1)?;
                Value::Int(args[0].identity())
            }
            Builtin::Isinstance => {
                arity(name, args.len(), 2, 2)?;
                let kind = args[0].type_kind();
                Value::Bool(class_matches(kind, &args[1], "isinstance")?)
            }
            Builtin::Issubclass => {
                arity(name, args.len(), 2, 2)?;
                let Value::Type(kind) = &args[0] else {
                    return raise(ExcKind::TypeError, "issubclass() arg 1 must be a class");
                };
                Value::Bool(class_matches(*kind, &args[1], "issubclass")?)
            }
            Builtin::Iter => {
                arity(name, args.len(), 1, 1)?;
                self.iter_value(args[0].clone())?
            }
            Builtin::Len => {
                arity(name, args.len(), 1, 1)?;
                Value::Int(ops::len(&args[0])? as i64)
            }
            Builtin::Map => {
                if args.len() < 2 {
                    return raise(ExcKind::TypeError, "map() must have at least two arguments.");
                }
                let mut iters = Vec::with_capacity(args.len() - 1);
                for iterable in &args[1..] {
                    iters.push(self.iter_value(iterable.clone())?);
                }
                Value::iterator(IterState::Map {
                    func: args[0].clone(),
                    iters,
                })
            }
            Builtin::Max | Builtin::Min => return self.builtin_extreme(builtin, args, kwargs),
            Builtin::Next => {
                arity(name, args.len(), 1, 2)?;
                if !matches!(args[0], Value::Iterator(_)) {
                    return raise(
                        ExcKind::TypeError,
                        format!("'{}' object is not an iterator", args[0].type_name()),
                    );
                }
                match (self.next_item(&args[0])?, args.get(1)) {
                    (Some(item), _) => item,
                    (None, Some(default)) => default.clone(),
                    (None, None) => {
                        return Err(Flow::Raise(Rc::new(ExceptionValue::new(
                            ExcKind::StopIteration,
                            Vec::new(),
                        ))))
                    }
                }
            }
            Builtin::Ord => {
                arity(name, args.len(), 1, 1)?;
                match &args[0] {
                    Value::Str(s) => {
                        let mut chars = s.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => Value::Int(c as i64),
                            _ => {
                                return raise(
                                    ExcKind::TypeError,
                                    format!(
                                        "ord() expected a character, but string of length {} found",
                                        s.chars().count()
                                    ),
                                )
                            }
                        }
                    }
                    Value::Bytes(b) if b.len() == 1 => Value::Int(b[0] as i64),
                    Value::Bytes(b) => {
                        return raise(
                            ExcKind::TypeError,
                            format!("ord() expected a character, but string of length {} found", b.len()),
                        )
                    }
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "ord() expected string of length 1, but {} found",
                                other.type_name()
                            ),
                        )
                    }
                }
            }
            Builtin::Pow => {
                arity(name, args.len(), 2, 3)?;
                match args.get(2) {
                    None | Some(Value::None) => ops::binary(BinOp::Pow, &args[0], &args[1])?,
                    Some(modulus) => {
                        let ints = (
                            integer::to_bigint(&args[0]),
                            integer::to_bigint(&args[1]),
                            integer::to_bigint(modulus),
                        );
                        let (Some(base), Some(exp), Some(modulus)) = ints else {
                            return raise(
                                ExcKind::TypeError,
                                "pow() 3rd argument not allowed unless all arguments are integers",
                            );
                        };
                        integer::mod_pow(&base, &exp, &modulus)?
                    }
                }
            }
            Builtin::Repr => {
                arity(name, args.len(), 1, 1)?;
                Value::from(repr(&args[0]))
            }
            Builtin::Reversed => {
                arity(name, args.len(), 1, 1)?;
                self.builtin_reversed(&args[0])?
            }
            Builtin::Round => {
                arity(name, args.len(), 1, 2)?;
                let ndigits = optional(&args, 1, &mut kwargs, "ndigits");
                finish_keywords(name, &kwargs)?;
                let ndigits = match ndigits {
                    None | Some(Value::None) => None,
                    Some(v) => Some(integer_arg(&v)?),
                };
                match (&args[0], ndigits) {
                    (Value::Bool(b), _) => Value::Int(*b as i64),
                    (Value::Int(_) | Value::Long(_), None) => args[0].clone(),
                    (Value::Int(i), Some(n)) => integer::round_to(&BigInt::from(*i), n)?,
                    (Value::Long(big), Some(n)) => integer::round_to(big, n)?,
                    (Value::Float(f), None) => integer::from_f64(round_half_even(*f))?,
                    (Value::Float(f), Some(n)) => Value::Float(round_float(*f, n)?),
                    (other, _) => {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "type {} doesn't define __round__ method",
                                other.type_name()
                            ),
                        )
                    }
                }
            }
            Builtin::Sorted => {
                arity(name, args.len(), 1, 1)?;
                let key = take_keyword(&mut kwargs, "key");
                let reverse = take_keyword(&mut kwargs, "reverse")
                    .map(|v| truthy(&v))
                    .unwrap_or(false);
                finish_keywords(name, &kwargs)?;
                let items = self.collect(args[0].clone())?;
                Value::list(self.sort_values(items, key, reverse)?)
            }
            Builtin::Sum => {
                arity(name, args.len(), 1, 2)?;
                let start = optional(&args, 1, &mut kwargs, "start").unwrap_or(Value::Int(0));
                finish_keywords(name, &kwargs)?;
                self.builtin_sum(args[0].clone(), start)?
            }
            Builtin::Vars => {
                arity(name, args.len(), 0, 1)?;
                if !args.is_empty() {
                    return raise(ExcKind::TypeError, "vars() argument must have __dict__ attribute");
                }
                let mut table = Table::new();
                for (name, value) in self.current_scope().snapshot() {
                    let key = Value::from(name);
                    table.insert(key.hash_key()?, key, value);
                }
                Value::dict(table)
            }
            Builtin::Zip => {
                finish_keywords(name, &kwargs)?;
                let mut iters = Vec::with_capacity(args.len());
                for (position, iterable) in args.iter().enumerate() {
                    if !is_iterable(iterable) {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "zip argument #{} must support iteration",
                                position + 1
                            ),
                        );
                    }
                    iters.push(self.iter_value(iterable.clone())?);
                }
                Value::iterator(IterState::Zip { iters })
            }
        };
        Ok(value)
    }

    fn builtin_print(&mut self, args: Vec<Value>, mut kwargs: Vec<(String, Value)>) -> Exec<Value> {
        let mut separator = |key: &str, default: &str| -> Exec<String> {
            match take_keyword(&mut kwargs, key) {
                None | Some(Value::None) => Ok(default.to_string()),
                Some(Value::Str(s)) => Ok(s.to_string()),
                Some(other) => raise(
                    ExcKind::TypeError,
                    format!("{} must be None or a string, not {}", key, other.type_name()),
                ),
            }
        };
        let sep = separator("sep", " ")?;
        let end = separator("end", "\n")?;
        match take_keyword(&mut kwargs, "file") {
            None | Some(Value::None) => {}
            Some(other) => {
                return raise(
                    ExcKind::TypeError,
                    format!(
                        "print() file argument must be None, not {}",
                        other.type_name()
                    ),
                )
            }
        }
        take_keyword(&mut kwargs, "flush");
        finish_keywords("print", &kwargs)?;

        let pieces: Vec<String> = args.iter().map(str_value).collect();
        let mut line = pieces.join(&sep);
        line.push_str(&end);
        self.write_stdout(&line)?;
        Ok(Value::None)
    }

    fn builtin_input(&mut self, args: Vec<Value>) -> Exec<Value> {
        if args.len() > 1 {
            return raise(
                ExcKind::TypeError,
                format!("input expected at most 1 argument, got {}", args.len()),
            );
        }
        // a falsy prompt is not echoed, even when its text is not empty
        if let Some(prompt) = args.first().filter(|p| truthy(p)) {
            self.write_stdout(&str_value(prompt))?;
        }
        match self.environment_mut().read_line() {
            Some(line) => Ok(Value::from(line)),
            None => raise(ExcKind::EOFError, "No more stdin lines available"),
        }
    }

    fn builtin_extreme(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        mut kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let name = builtin.name();
        let key = take_keyword(&mut kwargs, "key").filter(|k| !matches!(k, Value::None));
        let default = take_keyword(&mut kwargs, "default");
        finish_keywords(name, &kwargs)?;
        let items = match args.len() {
            0 => {
                return raise(
                    ExcKind::TypeError,
                    format!("{} expected at least 1 argument, got 0", name),
                )
            }
            1 => self.collect(args[0].clone())?,
            _ => {
                if default.is_some() {
                    return raise(
                        ExcKind::TypeError,
                        format!(
                            "Cannot specify a default for {}() with multiple positional arguments",
                            name
                        ),
                    );
                }
                args
            }
        };
        let symbol = if builtin == Builtin::Max { ">" } else { "<" };
        let mut best: Option<(Value, Value)> = None;
        for item in items {
            self.tick()?;
            let item_key = match &key {
                Some(func) => self.call_value(func, vec![item.clone()], Vec::new())?,
                None => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => ops::order(symbol, &item_key, best_key)?,
            };
            if replace {
                best = Some((item_key, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => raise(
                ExcKind::ValueError,
                format!("{}() iterable argument is empty", name),
            ),
        }
    }

    fn builtin_reversed(&mut self, value: &Value) -> Exec<Value> {
        let state = match value {
            Value::List(list) => IterState::Reversed {
                seq: value.clone(),
                remaining: list.borrow().len(),
            },
            Value::Tuple(items) => IterState::Reversed {
                seq: value.clone(),
                remaining: items.len(),
            },
            Value::Range(r) => IterState::Reversed {
                seq: value.clone(),
                remaining: r.len(),
            },
            Value::Str(s) => IterState::Snapshot {
                items: s.chars().rev().map(|c| Value::from(c.to_string())).collect(),
                index: 0,
                name: "reversed",
            },
            Value::Bytes(b) => IterState::Snapshot {
                items: b.iter().rev().map(|&byte| Value::Int(byte as i64)).collect(),
                index: 0,
                name: "reversed",
            },
            Value::Dict(table) => IterState::Snapshot {
                items: table.borrow().keys().rev().cloned().collect(),
                index: 0,
                name: "dict_reversekeyiterator",
            },
            other => {
                return raise(
                    ExcKind::TypeError,
                    format!("'{}' object is not reversible", other.type_name()),
                )
            }
        };
        Ok(Value::iterator(state))
    }

    /// `sum`, with compensated addition once floats appear
    fn builtin_sum(&mut self, iterable: Value, start: Value) -> Exec<Value> {
        match &start {
            Value::Str(_) => {
                return raise(
                    ExcKind::TypeError,
                    "sum() can't sum strings [use ''.join(seq) instead]",
                )
            }
            Value::Bytes(_) => {
                return raise(
                    ExcKind::TypeError,
                    "sum() can't sum bytes [use b''.join(seq) instead]",
                )
            }
            _ => {}
        }
        let iterator = self.iter_value(iterable)?;
        let mut total = start;
        // running float sum and its compensation term
        let mut float_sum: Option<(f64, f64)> = None;
        while let Some(item) = self.next_item(&iterator)? {
            self.tick()?;
            let addend = match &item {
                Value::Float(f) => Some(*f),
                Value::Int(i) if float_sum.is_some() => Some(*i as f64),
                Value::Long(n) if float_sum.is_some() => Some(integer::to_f64(n)?),
                Value::Bool(b) if float_sum.is_some() => Some(*b as i64 as f64),
                _ => None,
            };
            if let Some(x) = addend {
                let (sum, compensation) = match float_sum {
                    Some(state) => state,
                    None => match total {
                        Value::Int(i) => (i as f64, 0.0),
                        Value::Long(ref n) => (integer::to_f64(n)?, 0.0),
                        Value::Bool(b) => (b as i64 as f64, 0.0),
                        Value::Float(f) => (f, 0.0),
                        _ => {
                            total = ops::binary(BinOp::Add, &total, &item)?;
                            continue;
                        }
                    },
                };
                let next = sum + x;
                let compensation = if sum.abs() >= x.abs() {
                    compensation + ((sum - next) + x)
                } else {
                    compensation + ((x - next) + sum)
                };
                float_sum = Some((next, compensation));
                continue;
            }
            if let Some((sum, compensation)) = float_sum.take() {
                total = Value::Float(sum + compensation);
            }
            total = ops::binary(BinOp::Add, &total, &item)?;
        }
        if let Some((sum, compensation)) = float_sum {
            let result = sum + compensation;
            total = Value::Float(if result.is_finite() || !sum.is_finite() { result } else { sum });
        }
        Ok(total)
    }

    /// Stable sort with a fallible `<`
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> Exec<Vec<Value>> {
        let key = key.filter(|k| !matches!(k, Value::None));
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let item_key = match &key {
                Some(func) => self.call_value(func, vec![item.clone()], Vec::new())?,
                None => item.clone(),
            };
            keyed.push((item_key, item));
        }
        // reversing around a stable sort keeps equal items in their original order
        if reverse {
            keyed.reverse();
        }
        let mut sorted = self.merge_sort(keyed)?;
        if reverse {
            sorted.reverse();
        }
        Ok(sorted.into_iter().map(|(_, item)| item).collect())
    }

    fn merge_sort(&mut self, mut items: Vec<(Value, Value)>) -> Exec<Vec<(Value, Value)>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items)?;
        let right = self.merge_sort(right)?;
        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        loop {
            self.tick()?;
            let take_right = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => ops::order("<", &r.0, &l.0)?,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (None, None) => break,
            };
            let next = if take_right { right.next() } else { left.next() };
            merged.extend(next);
        }
        Ok(merged)
    }

    // ========================================================================
    // Type constructors
    // ========================================================================

    pub(crate) fn construct(
        &mut self,
        kind: TypeKind,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let name = kind.name();
        if let TypeKind::Exception(exc) = kind {
            no_keywords(name, &kwargs)?;
            return Ok(Value::Exception(Rc::new(ExceptionValue::new(exc, args))));
        }
        if kind == TypeKind::Dict {
            arity(name, args.len(), 0, 1)?;
            let table = Rc::new(std::cell::RefCell::new(Table::new()));
            if let Some(source) = args.into_iter().next() {
                self.update_dict(&table, source)?;
            }
            for (key, value) in kwargs {
                let key = Value::from(key);
                table.borrow_mut().insert(key.hash_key()?, key, value);
            }
            return Ok(Value::Dict(table));
        }
        let mut kwargs = kwargs;
        let value = match kind {
            TypeKind::Bool => {
                no_keywords(name, &kwargs)?;
                arity(name, args.len(), 0, 1)?;
                Value::Bool(args.first().map(truthy).unwrap_or(false))
            }
            TypeKind::Int => {
                arity(name, args.len(), 0, 2)?;
                let base = optional(&args, 1, &mut kwargs, "base");
                finish_keywords(name, &kwargs)?;
                self.construct_int(args.first(), base)?
            }
            TypeKind::Float => {
                no_keywords(name, &kwargs)?;
                arity(name, args.len(), 0, 1)?;
                match args.first() {
                    None => Value::Float(0.0),
                    Some(Value::Float(f)) => Value::Float(*f),
                    Some(Value::Int(i)) => Value::Float(*i as f64),
                    Some(Value::Long(n)) => Value::Float(integer::to_f64(n)?),
                    Some(Value::Bool(b)) => Value::Float(*b as i64 as f64),
                    Some(Value::Str(s)) => Value::Float(parse_float(s)?),
                    Some(Value::Bytes(b)) => match std::str::from_utf8(b) {
                        Ok(text) => Value::Float(parse_float(text)?),
                        Err(_) => {
                            return raise(
                                ExcKind::ValueError,
                                format!("could not convert string to float: {}", repr(&args[0])),
                            )
                        }
                    },
                    Some(other) => {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "float() argument must be a string or a real number, not '{}'",
                                other.type_name()
                            ),
                        )
                    }
                }
            }
            TypeKind::Complex => {
                arity(name, args.len(), 0, 2)?;
                let real = optional(&args, 0, &mut kwargs, "real");
                let imag = optional(&args, 1, &mut kwargs, "imag");
                finish_keywords(name, &kwargs)?;
                construct_complex(real, imag)?
            }
            TypeKind::Str => {
                arity(name, args.len(), 0, 3)?;
                let object = optional(&args, 0, &mut kwargs, "object");
                let encoding = optional(&args, 1, &mut kwargs, "encoding");
                let errors = optional(&args, 2, &mut kwargs, "errors");
                finish_keywords(name, &kwargs)?;
                match (object, encoding, errors) {
                    (None, _, _) => Value::from(""),
                    (Some(object), None, None) => Value::from(str_value(&object)),
                    (Some(Value::Bytes(b)), encoding, _) => {
                        let encoding = match encoding {
                            Some(v) => text_arg(&v, "str", 2)?.to_string(),
                            None => "utf-8".to_string(),
                        };
                        Value::from(decode_bytes(&b, &encoding)?)
                    }
                    (Some(Value::Str(_)), _, _) => {
                        return raise(ExcKind::TypeError, "decoding str is not supported")
                    }
                    (Some(other), _, _) => {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "decoding to str: need a bytes-like object, {} found",
                                other.type_name()
                            ),
                        )
                    }
                }
            }
            TypeKind::Bytes => {
                arity(name, args.len(), 0, 3)?;
                let source = optional(&args, 0, &mut kwargs, "source");
                let encoding = optional(&args, 1, &mut kwargs, "encoding");
                let _errors = optional(&args, 2, &mut kwargs, "errors");
                finish_keywords(name, &kwargs)?;
                self.construct_bytes(source, encoding)?
            }
            TypeKind::List | TypeKind::Tuple | TypeKind::Set | TypeKind::FrozenSet => {
                no_keywords(name, &kwargs)?;
                arity(name, args.len(), 0, 1)?;
                let items = match args.into_iter().next() {
                    Some(iterable) => {
                        if !is_iterable(&iterable) {
                            return raise(
                                ExcKind::TypeError,
                                format!("'{}' object is not iterable", iterable.type_name()),
                            );
                        }
                        self.collect(iterable)?
                    }
                    None => Vec::new(),
                };
                match kind {
                    TypeKind::List => Value::list(items),
                    TypeKind::Tuple => Value::tuple(items),
                    TypeKind::Set => Value::set(Table::from_keys(items)?),
                    _ => Value::FrozenSet(Rc::new(Table::from_keys(items)?)),
                }
            }
            TypeKind::Range => {
                no_keywords(name, &kwargs)?;
                if args.is_empty() {
                    return raise(ExcKind::TypeError, "range expected at least 1 argument, got 0");
                }
                arity(name, args.len(), 1, 3)?;
                let mut bounds = Vec::with_capacity(3);
                for arg in &args {
                    bounds.push(integer_arg(arg)?);
                }
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step, ..] => (*start, *stop, *step),
                    [] => (0, 0, 1),
                };
                if step == 0 {
                    return raise(ExcKind::ValueError, "range() arg 3 must not be zero");
                }
                Value::Range(RangeValue { start, stop, step })
            }
            TypeKind::Slice => {
                no_keywords(name, &kwargs)?;
                arity(name, args.len(), 1, 3)?;
                let mut args = args.into_iter();
                let first = args.next().unwrap_or(Value::None);
                let (start, stop, step) = match (args.next(), args.next()) {
                    (None, _) => (Value::None, first, Value::None),
                    (Some(stop), step) => (first, stop, step.unwrap_or(Value::None)),
                };
                Value::Slice(Rc::new(SliceValue { start, stop, step }))
            }
            TypeKind::Object => {
                if !args.is_empty() || !kwargs.is_empty() {
                    return raise(ExcKind::TypeError, "object() takes no arguments");
                }
                Value::Object(Rc::new(ObjectIdentity::default()))
            }
            TypeKind::Type => {
                no_keywords(name, &kwargs)?;
                match args.len() {
                    1 => Value::Type(args[0].type_kind()),
                    3 => {
                        return raise(
                            ExcKind::TypeError,
                            "type() with three arguments is not supported",
                        )
                    }
                    _ => return raise(ExcKind::TypeError, "type() takes 1 or 3 arguments"),
                }
            }
            other => {
                return raise(
                    ExcKind::TypeError,
                    format!("cannot create '{}' instances", other.name()),
                )
            }
        };
        Ok(value)
    }

    fn construct_int(&mut self, value: Option<&Value>, base: Option<Value>) -> Exec<Value> {
        let Some(value) = value else {
            if base.is_some() {
                return raise(ExcKind::TypeError, "int() missing string argument");
            }
            return Ok(Value::Int(0));
        };
        if let Some(base) = base {
            let base = integer_arg(&base)?;
            if base != 0 && !(2..=36).contains(&base) {
                return raise(ExcKind::ValueError, "int() base must be >= 2 and <= 36, or 0");
            }
            let text = match value {
                Value::Str(s) => s.to_string(),
                Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                _ => {
                    return raise(
                        ExcKind::TypeError,
                        "int() can't convert non-string with explicit base",
                    )
                }
            };
            return parse_int(&text, base as u32);
        }
        let result = match value {
            Value::Int(_) | Value::Long(_) => value.clone(),
            Value::Bool(b) => Value::Int(*b as i64),
            Value::Float(f) => integer::from_f64(*f)?,
            Value::Str(s) => parse_int(s, 10)?,
            Value::Bytes(b) => parse_int(&String::from_utf8_lossy(b), 10)?,
            other => {
                return raise(
                    ExcKind::TypeError,
                    format!(
                        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                        other.type_name()
                    ),
                )
            }
        };
        Ok(result)
    }

    fn construct_bytes(&mut self, source: Option<Value>, encoding: Option<Value>) -> Exec<Value> {
        let data = match (source, encoding) {
            (None, None) => Vec::new(),
            (None, Some(_)) => {
                return raise(ExcKind::TypeError, "encoding without a string argument")
            }
            (Some(Value::Str(s)), Some(encoding)) => {
                let encoding = text_arg(&encoding, "bytes", 2)?;
                encode_str(&s, &encoding)?
            }
            (Some(Value::Str(_)), None) => {
                return raise(ExcKind::TypeError, "string argument without an encoding")
            }
            (Some(_), Some(_)) => {
                return raise(ExcKind::TypeError, "encoding without a string argument")
            }
            (Some(Value::Bytes(b)), None) => b.to_vec(),
            (Some(Value::Long(_)), None) => {
                return raise(
                    ExcKind::OverflowError,
                    "cannot fit 'int' into an index-sized integer",
                )
            }
            (Some(Value::Int(n)), None) => {
                if n < 0 {
                    return raise(ExcKind::ValueError, "negative count");
                }
                if n as usize > MAX_ITEMS {
                    return ops::memory_error();
                }
                vec![0u8; n as usize]
            }
            (Some(iterable), None) => {
                if !is_iterable(&iterable) {
                    return raise(
                        ExcKind::TypeError,
                        format!("cannot convert '{}' object to bytes", iterable.type_name()),
                    );
                }
                let mut data = Vec::new();
                for item in self.collect(iterable)? {
                    match as_index(&item) {
                        Some(byte @ 0..=255) => data.push(byte as u8),
                        Some(_) => return raise(ExcKind::ValueError, "bytes must be in range(0, 256)"),
                        None => {
                            return raise(
                                ExcKind::TypeError,
                                format!(
                                    "'{}' object cannot be interpreted as an integer",
                                    item.type_name()
                                ),
                            )
                        }
                    }
                }
                data
            }
        };
        Ok(Value::bytes(data))
    }
}

fn construct_complex(real: Option<Value>, imag: Option<Value>) -> Exec<Value> {
    let part = |value: &Value, which: &str| -> Exec<(f64, f64)> {
        match value {
            Value::Bool(b) => Ok((*b as i64 as f64, 0.0)),
            Value::Int(i) => Ok((*i as f64, 0.0)),
            Value::Long(n) => Ok((integer::to_f64(n)?, 0.0)),
            Value::Float(f) => Ok((*f, 0.0)),
            Value::Complex(re, im) => Ok((*re, *im)),
            other => raise(
                ExcKind::TypeError,
                format!(
                    "complex() {} must be a number, not '{}'",
                    which,
                    other.type_name()
                ),
            ),
        }
    };
    match (real, imag) {
        (Some(Value::Str(s)), None) => parse_complex(&s),
        (Some(Value::Str(_)), Some(_)) => raise(
            ExcKind::TypeError,
            "complex() can't take second arg if first is a string",
        ),
        (_, Some(Value::Str(_))) => raise(
            ExcKind::TypeError,
            "complex() second arg can't be a string",
        ),
        (real, imag) => {
            let (a, b) = match &real {
                Some(value) => part(value, "first argument")?,
                None => (0.0, 0.0),
            };
            let (c, d) = match &imag {
                Some(value) => part(value, "second argument")?,
                None => (0.0, 0.0),
            };
            Ok(Value::Complex(a - d, b + c))
        }
    }
}

fn class_matches(kind: TypeKind, classinfo: &Value, function: &str) -> Exec<bool> {
    match classinfo {
        Value::Type(target) => Ok(kind.is_subclass_of(target)),
        Value::Tuple(items) => {
            for item in items.iter() {
                if class_matches(kind, item, function)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => raise(
            ExcKind::TypeError,
            format!(
                "{}() arg 2 must be a type, a tuple of types, or a union",
                function
            ),
        ),
    }
}

fn divmod_error(flow: Flow, a: &Value, b: &Value) -> Flow {
    match flow {
        Flow::Raise(exc) if exc.kind == ExcKind::TypeError && exc.message().contains("//") => {
            Flow::exception(
                ExcKind::TypeError,
                format!(
                    "unsupported operand type(s) for divmod(): '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ),
            )
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(result: Exec<impl std::fmt::Debug>) -> String {
        match result {
            Err(Flow::Raise(exc)) => exc.summary(),
            other => panic!("expected an exception, got {:?}", other),
        }
    }

    fn int_text(value: Value) -> String {
        integer::to_bigint(&value).unwrap().to_string()
    }

    #[test]
    fn test_parse_int_forms() {
        assert!(matches!(parse_int(" 42\n", 10).unwrap(), Value::Int(42)));
        assert!(matches!(parse_int("-1_000", 10).unwrap(), Value::Int(-1000)));
        assert!(matches!(parse_int("ff", 16).unwrap(), Value::Int(255)));
        assert!(matches!(parse_int("0x1F", 0).unwrap(), Value::Int(31)));
        assert!(matches!(parse_int("0b101", 2).unwrap(), Value::Int(5)));
        assert_eq!(
            message(parse_int("12a", 10)),
            "ValueError: invalid literal for int() with base 10: '12a'"
        );
        assert_eq!(
            message(parse_int("", 10)),
            "ValueError: invalid literal for int() with base 10: ''"
        );
        assert!(parse_int("1__0", 10).is_err());
        assert!(parse_int("010", 0).is_err());
        assert!(matches!(parse_int("000", 0).unwrap(), Value::Int(0)));
    }

    #[test]
    fn test_parse_wide_ints() {
        assert_eq!(int_text(parse_int(&"9".repeat(20), 10).unwrap()), "9".repeat(20));
        assert_eq!(int_text(parse_int("-0x10000000000000000", 0).unwrap()), "-18446744073709551616");
        assert!(matches!(parse_int("-9223372036854775808", 10).unwrap(), Value::Int(i64::MIN)));
        assert_eq!(
            message(parse_int(&"1".repeat(400_000), 10)),
            "MemoryError"
        );
    }

    #[test]
    fn test_parse_float_forms() {
        assert_eq!(parse_float("  3.5 ").unwrap(), 3.5);
        assert_eq!(parse_float("1e3").unwrap(), 1000.0);
        assert_eq!(parse_float("-inf").unwrap(), f64::NEG_INFINITY);
        assert!(parse_float("nan").unwrap().is_nan());
        assert_eq!(
            message(parse_float("abc")),
            "ValueError: could not convert string to float: 'abc'"
        );
        assert!(parse_float("--1").is_err());
    }

    #[test]
    fn test_parse_complex() {
        assert!(matches!(parse_complex("1+2j").unwrap(), Value::Complex(re, im) if re == 1.0 && im == 2.0));
        assert!(matches!(parse_complex("-j").unwrap(), Value::Complex(re, im) if re == 0.0 && im == -1.0));
        assert!(matches!(parse_complex("1e-3-4J").unwrap(), Value::Complex(re, im) if re == 0.001 && im == -4.0));
        assert!(parse_complex("1+").is_err());
    }

    #[test]
    fn test_bankers_rounding() {
        assert_eq!(round_half_even(0.5), 0.0);
        assert_eq!(round_half_even(1.5), 2.0);
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(-2.5), -2.0);
        assert_eq!(round_float(2.675, 2).unwrap(), 2.67);
        assert_eq!(round_float(1234.5, -2).unwrap(), 1200.0);
    }

    #[test]
    fn test_arity_messages() {
        assert_eq!(
            message(arity("len", 2, 1, 1)),
            "TypeError: len() takes exactly one argument (2 given)"
        );
        assert_eq!(
            message(arity("divmod", 1, 2, 2)),
            "TypeError: divmod expected 2 arguments, got 1"
        );
        assert_eq!(
            message(arity("getattr", 4, 2, 3)),
            "TypeError: getattr expected at most 3 arguments, got 4"
        );
    }
}

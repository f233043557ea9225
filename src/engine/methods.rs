//! Methods and attributes of built-in values

use std::rc::Rc;

use num_bigint::Sign;

use crate::engine::builtins::{arity, finish_keywords, no_keywords, optional, take_keyword};
use crate::engine::exceptions::{raise, ExcKind, Exec};
use crate::engine::format::{ascii, format_value, repr, str_value};
use crate::engine::integer;
use crate::engine::interpreter::Interpreter;
use crate::engine::ops::{self, as_index, values_equal};
use crate::engine::value::{BoundMethod, DictView, Table, TypeKind, Value, ViewKind};
use crate::parser::ast::BinOp;

const STR_METHODS: &[&str] = &[
    "upper", "lower", "casefold", "title", "capitalize", "swapcase", "strip", "lstrip", "rstrip",
    "split", "rsplit", "splitlines", "join", "replace", "startswith", "endswith", "find", "rfind",
    "index", "rindex", "count", "isdigit", "isdecimal", "isnumeric", "isalpha", "isalnum",
    "isspace", "isupper", "islower", "istitle", "center", "ljust", "rjust", "zfill", "partition",
    "rpartition", "removeprefix", "removesuffix", "format", "encode",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "popitem", "setdefault", "update", "copy", "clear",
    "fromkeys",
];
const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "clear", "copy", "union", "intersection", "difference",
    "symmetric_difference", "update", "intersection_update", "difference_update",
    "symmetric_difference_update", "issubset", "issuperset", "isdisjoint",
];
const FROZENSET_METHODS: &[&str] = &[
    "copy", "union", "intersection", "difference", "symmetric_difference", "issubset",
    "issuperset", "isdisjoint",
];
const BYTES_METHODS: &[&str] = &[
    "decode", "hex", "count", "find", "startswith", "endswith", "upper", "lower", "strip",
];
const INT_METHODS: &[&str] = &["bit_length", "conjugate"];
const FLOAT_METHODS: &[&str] = &["is_integer", "conjugate"];
const COMPLEX_METHODS: &[&str] = &["conjugate"];

fn method_names(kind: TypeKind) -> &'static [&'static str] {
    match kind {
        TypeKind::Str => STR_METHODS,
        TypeKind::List => LIST_METHODS,
        TypeKind::Tuple => TUPLE_METHODS,
        TypeKind::Dict => DICT_METHODS,
        TypeKind::Set => SET_METHODS,
        TypeKind::FrozenSet => FROZENSET_METHODS,
        TypeKind::Bytes => BYTES_METHODS,
        TypeKind::Int | TypeKind::Bool => INT_METHODS,
        TypeKind::Float => FLOAT_METHODS,
        TypeKind::Complex => COMPLEX_METHODS,
        _ => &[],
    }
}

/// Whether `receiver.name(...)` names a method, on an instance or its type
pub(crate) fn has_method(receiver: &Value, name: &str) -> bool {
    let kind = match receiver {
        Value::Type(kind) => *kind,
        other => other.type_kind(),
    };
    method_names(kind).contains(&name)
}

fn data_attribute_names(value: &Value) -> &'static [&'static str] {
    match value {
        Value::Exception(_) => &["args"],
        Value::Function(_) | Value::Builtin(_) | Value::Type(_) | Value::Method(_) => &["__name__"],
        Value::Range(_) | Value::Slice(_) => &["start", "stop", "step"],
        Value::Bool(_) | Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Complex(..) => {
            &["real", "imag"]
        }
        _ => &[],
    }
}

/// Whether `getattr(value, name)` would succeed
pub(crate) fn has_attribute(value: &Value, name: &str) -> bool {
    has_method(value, name) || data_attribute_names(value).contains(&name)
}

/// Attribute names reported by `dir(value)`
pub(crate) fn attribute_names(value: &Value) -> Vec<&'static str> {
    let kind = match value {
        Value::Type(kind) => *kind,
        other => other.type_kind(),
    };
    let mut names: Vec<&'static str> = method_names(kind)
        .iter()
        .chain(data_attribute_names(value))
        .copied()
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

/// Python's `str.splitlines`
pub fn split_lines(text: &str, keepends: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let is_break = matches!(
            c,
            '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
        );
        if !is_break {
            current.push(c);
            continue;
        }
        let crlf = c == '\r' && chars.peek() == Some(&'\n');
        if crlf {
            chars.next();
        }
        if keepends {
            current.push(c);
            if crlf {
                current.push('\n');
            }
        }
        lines.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Resolve optional `start`/`end` arguments against a length
fn window(len: usize, start: Option<&Value>, end: Option<&Value>) -> Exec<(usize, usize)> {
    // a start past the end stays past the end so lookups can fail
    let resolve = |value: Option<&Value>, default: usize, limit: usize| -> Exec<usize> {
        match value {
            None | Some(Value::None) => Ok(default),
            Some(Value::Long(n)) if n.sign() == Sign::Minus => Ok(0),
            Some(Value::Long(_)) => Ok(limit.min(len + 1)),
            Some(v) => match as_index(v) {
                Some(i) if i < 0 => Ok((i + len as i64).max(0) as usize),
                Some(i) => Ok((i as usize).min(limit)),
                None => raise(
                    ExcKind::TypeError,
                    "slice indices must be integers or None or have an __index__ method",
                ),
            },
        }
    };
    Ok((resolve(start, 0, usize::MAX)?, resolve(end, len, len)?))
}

fn find_chars(s: &str, sub: &str, start: Option<&Value>, end: Option<&Value>, reverse: bool) -> Exec<Option<usize>> {
    let chars: Vec<char> = s.chars().collect();
    let (start, end) = window(chars.len(), start, end)?;
    if start > end {
        return Ok(None);
    }
    let haystack: String = chars[start..end].iter().collect();
    let found = if reverse {
        haystack.rfind(sub)
    } else {
        haystack.find(sub)
    };
    Ok(found.map(|byte| start + haystack[..byte].chars().count()))
}

fn is_cased(c: char) -> bool {
    c.is_uppercase() || c.is_lowercase()
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = is_cased(c);
    }
    out
}

fn is_title(s: &str) -> bool {
    let mut previous_cased = false;
    let mut seen_cased = false;
    for c in s.chars() {
        if c.is_uppercase() {
            if previous_cased {
                return false;
            }
            previous_cased = true;
            seen_cased = true;
        } else if c.is_lowercase() {
            if !previous_cased {
                return false;
            }
            previous_cased = true;
            seen_cased = true;
        } else {
            previous_cased = false;
        }
    }
    seen_cased
}

fn whitespace_split(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 >= maxsplit {
            parts.push(Value::from(rest));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(Value::from(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    parts
}

fn whitespace_rsplit(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 >= maxsplit {
            parts.push(Value::from(rest));
            break;
        }
        let start = rest
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        parts.push(Value::from(&rest[start..]));
        rest = rest[..start].trim_end();
    }
    parts.reverse();
    parts
}

fn strip_with<'a>(s: &'a str, chars: &Value, left: bool, right: bool) -> Exec<&'a str> {
    let set: Option<Vec<char>> = match chars {
        Value::None => None,
        Value::Str(c) => Some(c.chars().collect()),
        other => {
            return raise(
                ExcKind::TypeError,
                format!("strip arg must be None or str, not {}", other.type_name()),
            )
        }
    };
    let matches = |c: char| match &set {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    let mut out = s;
    if left {
        out = out.trim_start_matches(matches);
    }
    if right {
        out = out.trim_end_matches(matches);
    }
    Ok(out)
}

fn fill_char(value: Option<Value>) -> Exec<char> {
    match value {
        None => Ok(' '),
        Some(Value::Str(s)) if s.chars().count() == 1 => Ok(s.chars().next().unwrap_or(' ')),
        Some(Value::Str(_)) => raise(
            ExcKind::TypeError,
            "The fill character must be exactly one character long",
        ),
        Some(other) => raise(
            ExcKind::TypeError,
            format!(
                "The fill character must be a unicode character, not {}",
                other.type_name()
            ),
        ),
    }
}

fn expect_str(value: &Value, what: &str) -> Exec<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => raise(
            ExcKind::TypeError,
            format!("{} must be str, not {}", what, other.type_name()),
        ),
    }
}

fn expect_int(value: &Value) -> Exec<i64> {
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

fn normalize_encoding(encoding: &str) -> String {
    let lowered = encoding.trim().to_ascii_lowercase().replace('_', "-");
    match lowered.as_str() {
        "utf8" | "u8" | "utf" => "utf-8".to_string(),
        "us-ascii" | "646" => "ascii".to_string(),
        "latin1" | "latin" | "iso-8859-1" | "iso8859-1" | "l1" => "latin-1".to_string(),
        _ => lowered,
    }
}

pub(crate) fn decode_bytes(bytes: &[u8], encoding: &str) -> Exec<String> {
    match normalize_encoding(encoding).as_str() {
        "utf-8" => match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_string()),
            Err(e) => {
                let position = e.valid_up_to();
                let byte = bytes.get(position).copied().unwrap_or(0);
                let reason = match e.error_len() {
                    None => "unexpected end of data",
                    Some(_) if (0x80..0xc0).contains(&byte) || byte >= 0xf8 => "invalid start byte",
                    Some(_) => "invalid continuation byte",
                };
                raise(
                    ExcKind::UnicodeDecodeError,
                    format!(
                        "'utf-8' codec can't decode byte 0x{:02x} in position {}: {}",
                        byte, position, reason
                    ),
                )
            }
        },
        "ascii" => match bytes.iter().position(|b| !b.is_ascii()) {
            Some(position) => raise(
                ExcKind::UnicodeDecodeError,
                format!(
                    "'ascii' codec can't decode byte 0x{:02x} in position {}: ordinal not in range(128)",
                    bytes[position], position
                ),
            ),
            None => Ok(bytes.iter().map(|&b| b as char).collect()),
        },
        "latin-1" => Ok(bytes.iter().map(|&b| b as char).collect()),
        _ => raise(ExcKind::LookupError, format!("unknown encoding: {}", encoding)),
    }
}

pub(crate) fn encode_str(text: &str, encoding: &str) -> Exec<Vec<u8>> {
    let limit = match normalize_encoding(encoding).as_str() {
        "utf-8" => return Ok(text.as_bytes().to_vec()),
        "ascii" => 0x80,
        "latin-1" => 0x100,
        _ => return raise(ExcKind::LookupError, format!("unknown encoding: {}", encoding)),
    };
    let mut out = Vec::with_capacity(text.len());
    for (position, c) in text.chars().enumerate() {
        if (c as u32) >= limit {
            let codec = if limit == 0x80 { "ascii" } else { "latin-1" };
            return raise(
                ExcKind::ValueError,
                format!(
                    "'{}' codec can't encode character {} in position {}: ordinal not in range({})",
                    codec,
                    ascii(&Value::from(c.to_string())),
                    position,
                    limit
                ),
            );
        }
        out.push(c as u8);
    }
    Ok(out)
}

fn bytes_arg(value: &Value) -> Exec<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b.to_vec()),
        Value::Int(i) if (0..256).contains(i) => Ok(vec![*i as u8]),
        Value::Int(_) => raise(ExcKind::ValueError, "byte must be in range(0, 256)"),
        other => raise(
            ExcKind::TypeError,
            format!(
                "argument should be integer or bytes-like object, not '{}'",
                other.type_name()
            ),
        ),
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn count_bytes(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() {
        return haystack.len() + 1;
    }
    let mut count = 0;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            count += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }
    count
}

/// Prefixes for `startswith`/`endswith`, a single value or a tuple of them
fn affixes(value: &Value, method: &str, type_name: &str) -> Exec<Vec<Value>> {
    match value {
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::Str(_) if type_name == "str" => Ok(vec![value.clone()]),
        Value::Bytes(_) if type_name == "bytes" => Ok(vec![value.clone()]),
        other => raise(
            ExcKind::TypeError,
            format!(
                "{} first arg must be {} or a tuple of {}, not {}",
                method,
                type_name,
                type_name,
                other.type_name()
            ),
        ),
    }
}

enum Numbering {
    Unknown,
    Auto(usize),
    Manual,
}

impl Interpreter {
    /// `value.name` for data attributes and bound methods
    pub(crate) fn get_attr(&mut self, value: &Value, name: &str) -> Exec<Value> {
        let attribute = match (value, name) {
            (Value::Exception(exc), "args") => Some(Value::tuple(exc.args.clone())),
            (Value::Function(function), "__name__") => Some(Value::from(function.def.name.as_str())),
            (Value::Builtin(builtin), "__name__") => Some(Value::from(builtin.name())),
            (Value::Type(kind), "__name__") => Some(Value::from(kind.name())),
            (Value::Method(method), "__name__") => Some(Value::from(method.name.as_str())),
            (Value::Range(r), "start") => Some(Value::Int(r.start)),
            (Value::Range(r), "stop") => Some(Value::Int(r.stop)),
            (Value::Range(r), "step") => Some(Value::Int(r.step)),
            (Value::Slice(s), "start") => Some(s.start.clone()),
            (Value::Slice(s), "stop") => Some(s.stop.clone()),
            (Value::Slice(s), "step") => Some(s.step.clone()),
            (Value::Bool(b), "real") => Some(Value::Int(*b as i64)),
            (Value::Int(_) | Value::Long(_), "real") => Some(value.clone()),
            (Value::Bool(_) | Value::Int(_) | Value::Long(_), "imag") => Some(Value::Int(0)),
            (Value::Float(f), "real") => Some(Value::Float(*f)),
            (Value::Float(_), "imag") => Some(Value::Float(0.0)),
            (Value::Complex(re, _), "real") => Some(Value::Float(*re)),
            (Value::Complex(_, im), "imag") => Some(Value::Float(*im)),
            _ => None,
        };
        if let Some(attribute) = attribute {
            return Ok(attribute);
        }
        if has_method(value, name) {
            return Ok(Value::Method(Rc::new(BoundMethod {
                receiver: value.clone(),
                name: name.to_string(),
            })));
        }
        let message = match value {
            Value::Type(kind) => format!("type object '{}' has no attribute '{}'", kind.name(), name),
            other => format!("'{}' object has no attribute '{}'", other.type_name(), name),
        };
        raise(ExcKind::AttributeError, message)
    }

    pub(crate) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        match receiver {
            Value::Type(kind) => self.call_unbound(*kind, name, args, kwargs),
            Value::Str(s) => self.str_method(s, name, args, kwargs),
            Value::List(_) => self.list_method(receiver, name, args, kwargs),
            Value::Tuple(items) => {
                no_keywords(&format!("tuple.{}", name), &kwargs)?;
                sequence_method("tuple", items, name, &args)
            }
            Value::Dict(_) => self.dict_method(receiver, name, args, kwargs),
            Value::Set(_) | Value::FrozenSet(_) => self.set_method(receiver, name, args, kwargs),
            Value::Bytes(b) => {
                no_keywords(&format!("bytes.{}", name), &kwargs)?;
                bytes_method(b, name, &args)
            }
            Value::Bool(_) | Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Complex(..) => {
                no_keywords(&format!("{}.{}", receiver.type_name(), name), &kwargs)?;
                number_method(receiver, name, &args)
            }
            other => raise(
                ExcKind::AttributeError,
                format!("'{}' object has no attribute '{}'", other.type_name(), name),
            ),
        }
    }

    /// `str.upper(x)` style calls through the type object
    fn call_unbound(
        &mut self,
        kind: TypeKind,
        name: &str,
        mut args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        if kind == TypeKind::Dict && name == "fromkeys" {
            return self.dict_fromkeys(args, kwargs);
        }
        if !has_method(&Value::Type(kind), name) {
            return raise(
                ExcKind::AttributeError,
                format!("type object '{}' has no attribute '{}'", kind.name(), name),
            );
        }
        if args.is_empty() {
            return raise(
                ExcKind::TypeError,
                format!("unbound method {}.{}() needs an argument", kind.name(), name),
            );
        }
        let receiver = args.remove(0);
        if !receiver.type_kind().is_subclass_of(&kind) {
            return raise(
                ExcKind::TypeError,
                format!(
                    "descriptor '{}' for '{}' objects doesn't apply to a '{}' object",
                    name,
                    kind.name(),
                    receiver.type_name()
                ),
            );
        }
        self.call_method(&receiver, name, args, kwargs)
    }

    // ========================================================================
    // str
    // ========================================================================

    fn str_method(
        &mut self,
        s: &Rc<str>,
        name: &str,
        args: Vec<Value>,
        mut kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let qualified = format!("str.{}", name);
        if name == "format" {
            let text = self.format_template(s, &args, &kwargs, &mut Numbering::Unknown, 0)?;
            return Ok(Value::from(text));
        }
        let keywords_allowed = matches!(name, "split" | "rsplit" | "splitlines" | "encode" | "replace");
        if !keywords_allowed {
            no_keywords(&qualified, &kwargs)?;
        }
        let text: &str = s;
        let value = match name {
            "upper" | "lower" | "casefold" | "title" | "capitalize" | "swapcase" => {
                arity(&qualified, args.len(), 0, 0)?;
                let out = match name {
                    "upper" => text.to_uppercase(),
                    "lower" | "casefold" => text.to_lowercase(),
                    "title" => title_case(text),
                    "capitalize" => {
                        let mut chars = text.chars();
                        match chars.next() {
                            Some(first) => first
                                .to_uppercase()
                                .chain(chars.as_str().to_lowercase().chars())
                                .collect(),
                            None => String::new(),
                        }
                    }
                    _ => text
                        .chars()
                        .flat_map(|c| -> Box<dyn Iterator<Item = char>> {
                            if c.is_uppercase() {
                                Box::new(c.to_lowercase())
                            } else {
                                Box::new(c.to_uppercase())
                            }
                        })
                        .collect(),
                };
                Value::from(out)
            }
            "strip" | "lstrip" | "rstrip" => {
                arity(&qualified, args.len(), 0, 1)?;
                let chars = args.first().cloned().unwrap_or(Value::None);
                let out = strip_with(text, &chars, name != "rstrip", name != "lstrip")?;
                Value::from(out)
            }
            "split" | "rsplit" => {
                arity(&qualified, args.len(), 0, 2)?;
                let sep = optional(&args, 0, &mut kwargs, "sep").unwrap_or(Value::None);
                let maxsplit = match optional(&args, 1, &mut kwargs, "maxsplit") {
                    Some(v) => expect_int(&v)?,
                    None => -1,
                };
                finish_keywords(&qualified, &kwargs)?;
                let parts = match sep {
                    Value::None if name == "split" => whitespace_split(text, maxsplit),
                    Value::None => whitespace_rsplit(text, maxsplit),
                    Value::Str(sep) => {
                        if sep.is_empty() {
                            return raise(ExcKind::ValueError, "empty separator");
                        }
                        let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize + 1 };
                        if name == "split" {
                            text.splitn(limit, &*sep).map(Value::from).collect()
                        } else {
                            let mut parts: Vec<Value> =
                                text.rsplitn(limit, &*sep).map(Value::from).collect();
                            parts.reverse();
                            parts
                        }
                    }
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!("must be str or None, not {}", other.type_name()),
                        )
                    }
                };
                Value::list(parts)
            }
            "splitlines" => {
                arity(&qualified, args.len(), 0, 1)?;
                let keepends = optional(&args, 0, &mut kwargs, "keepends")
                    .map(|v| ops::truthy(&v))
                    .unwrap_or(false);
                finish_keywords(&qualified, &kwargs)?;
                Value::list(split_lines(text, keepends).into_iter().map(Value::from).collect())
            }
            "join" => {
                arity(&qualified, args.len(), 1, 1)?;
                let items = self.collect(args[0].clone())?;
                let mut pieces = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Str(piece) => pieces.push(piece.to_string()),
                        other => {
                            return raise(
                                ExcKind::TypeError,
                                format!(
                                    "sequence item {}: expected str instance, {} found",
                                    i,
                                    other.type_name()
                                ),
                            )
                        }
                    }
                }
                Value::from(pieces.join(text))
            }
            "replace" => {
                arity(&qualified, args.len(), 2, 3)?;
                let old = expect_str(&args[0], "replace() argument 1")?;
                let new = expect_str(&args[1], "replace() argument 2")?;
                let count = match optional(&args, 2, &mut kwargs, "count") {
                    Some(v) => expect_int(&v)?,
                    None => -1,
                };
                finish_keywords(&qualified, &kwargs)?;
                if count < 0 {
                    Value::from(text.replace(&*old, &new))
                } else {
                    Value::from(text.replacen(&*old, &new, count as usize))
                }
            }
            "startswith" | "endswith" => {
                arity(&qualified, args.len(), 1, 3)?;
                let chars: Vec<char> = text.chars().collect();
                let (start, end) = window(chars.len(), args.get(1), args.get(2))?;
                if start > end {
                    return Ok(Value::Bool(false));
                }
                let slice: String = chars[start..end].iter().collect();
                let mut found = false;
                for affix in affixes(&args[0], name, "str")? {
                    let affix = expect_str(&affix, "tuple item")?;
                    let hit = if name == "startswith" {
                        slice.starts_with(&*affix)
                    } else {
                        slice.ends_with(&*affix)
                    };
                    if hit {
                        found = true;
                        break;
                    }
                }
                Value::Bool(found)
            }
            "find" | "rfind" | "index" | "rindex" => {
                arity(&qualified, args.len(), 1, 3)?;
                let sub = expect_str(&args[0], "argument")?;
                let reverse = name.starts_with('r');
                match find_chars(text, &sub, args.get(1), args.get(2), reverse)? {
                    Some(position) => Value::Int(position as i64),
                    None if name.ends_with("find") => Value::Int(-1),
                    None => return raise(ExcKind::ValueError, "substring not found"),
                }
            }
            "count" => {
                arity(&qualified, args.len(), 1, 3)?;
                let sub = expect_str(&args[0], "argument")?;
                let chars: Vec<char> = text.chars().collect();
                let (start, end) = window(chars.len(), args.get(1), args.get(2))?;
                if start > end {
                    return Ok(Value::Int(0));
                }
                let slice: String = chars[start..end].iter().collect();
                let count = if sub.is_empty() {
                    end - start + 1
                } else {
                    slice.matches(&*sub).count()
                };
                Value::Int(count as i64)
            }
            "isdigit" | "isdecimal" | "isnumeric" | "isalpha" | "isalnum" | "isspace" => {
                arity(&qualified, args.len(), 0, 0)?;
                let test: fn(char) -> bool = match name {
                    "isdigit" | "isdecimal" | "isnumeric" => char::is_numeric,
                    "isalpha" => char::is_alphabetic,
                    "isalnum" => char::is_alphanumeric,
                    _ => char::is_whitespace,
                };
                Value::Bool(!text.is_empty() && text.chars().all(test))
            }
            "isupper" | "islower" => {
                arity(&qualified, args.len(), 0, 0)?;
                let cased = text.chars().any(is_cased);
                let wrong = if name == "isupper" {
                    text.chars().any(char::is_lowercase)
                } else {
                    text.chars().any(char::is_uppercase)
                };
                Value::Bool(cased && !wrong)
            }
            "istitle" => {
                arity(&qualified, args.len(), 0, 0)?;
                Value::Bool(is_title(text))
            }
            "center" | "ljust" | "rjust" => {
                arity(&qualified, args.len(), 1, 2)?;
                let width = expect_int(&args[0])?;
                let fill = fill_char(args.get(1).cloned())?;
                let len = text.chars().count() as i64;
                if width <= len {
                    return Ok(Value::Str(s.clone()));
                }
                ops::check_size(width as usize)?;
                let margin = (width - len) as usize;
                let left = match name {
                    "ljust" => 0,
                    "rjust" => margin,
                    _ => margin / 2 + (margin & width as usize & 1),
                };
                let mut out = String::new();
                out.extend(std::iter::repeat(fill).take(left));
                out.push_str(text);
                out.extend(std::iter::repeat(fill).take(margin - left));
                Value::from(out)
            }
            "zfill" => {
                arity(&qualified, args.len(), 1, 1)?;
                let width = expect_int(&args[0])?;
                let len = text.chars().count() as i64;
                if width <= len {
                    return Ok(Value::Str(s.clone()));
                }
                ops::check_size(width as usize)?;
                let padding = "0".repeat((width - len) as usize);
                let out = match text.chars().next() {
                    Some(sign @ ('+' | '-')) => format!("{}{}{}", sign, padding, &text[1..]),
                    _ => format!("{}{}", padding, text),
                };
                Value::from(out)
            }
            "partition" | "rpartition" => {
                arity(&qualified, args.len(), 1, 1)?;
                let sep = expect_str(&args[0], "argument")?;
                if sep.is_empty() {
                    return raise(ExcKind::ValueError, "empty separator");
                }
                let found = if name == "partition" {
                    text.find(&*sep)
                } else {
                    text.rfind(&*sep)
                };
                let parts = match (found, name) {
                    (Some(i), _) => [&text[..i], &*sep, &text[i + sep.len()..]],
                    (None, "partition") => [text, "", ""],
                    (None, _) => ["", "", text],
                };
                Value::tuple(parts.iter().map(|p| Value::from(*p)).collect())
            }
            "removeprefix" | "removesuffix" => {
                arity(&qualified, args.len(), 1, 1)?;
                let affix = expect_str(&args[0], &format!("{}() argument", name))?;
                let out = if name == "removeprefix" {
                    text.strip_prefix(&*affix)
                } else {
                    text.strip_suffix(&*affix)
                };
                Value::from(out.unwrap_or(text))
            }
            "encode" => {
                arity(&qualified, args.len(), 0, 2)?;
                let encoding = match optional(&args, 0, &mut kwargs, "encoding") {
                    Some(v) => expect_str(&v, "encode() argument 'encoding'")?.to_string(),
                    None => "utf-8".to_string(),
                };
                let _errors = optional(&args, 1, &mut kwargs, "errors");
                finish_keywords(&qualified, &kwargs)?;
                Value::bytes(encode_str(text, &encoding)?)
            }
            _ => {
                return raise(
                    ExcKind::AttributeError,
                    format!("'str' object has no attribute '{}'", name),
                )
            }
        };
        Ok(value)
    }

    /// `str.format` over a template
    fn format_template(
        &mut self,
        template: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        numbering: &mut Numbering,
        depth: usize,
    ) -> Exec<String> {
        if depth > 1 {
            return raise(ExcKind::ValueError, "Max string recursion exceeded");
        }
        let chars: Vec<char> = template.chars().collect();
        let mut out = String::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    out.push('{');
                    i += 2;
                }
                '{' => {
                    let mut nesting = 1;
                    let mut j = i + 1;
                    while j < chars.len() {
                        match chars[j] {
                            '{' => nesting += 1,
                            '}' => {
                                nesting -= 1;
                                if nesting == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        j += 1;
                    }
                    if j >= chars.len() {
                        return raise(ExcKind::ValueError, "expected '}' before end of string");
                    }
                    let field: String = chars[i + 1..j].iter().collect();
                    let text = self.format_field(&field, args, kwargs, numbering, depth)?;
                    out.push_str(&text);
                    i = j + 1;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    out.push('}');
                    i += 2;
                }
                '}' => return raise(ExcKind::ValueError, "Single '}' encountered in format string"),
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        Ok(out)
    }

    fn format_field(
        &mut self,
        field: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        numbering: &mut Numbering,
        depth: usize,
    ) -> Exec<String> {
        let mut in_brackets = false;
        let mut name_end = field.len();
        for (idx, ch) in field.char_indices() {
            match ch {
                '[' => in_brackets = true,
                ']' => in_brackets = false,
                '!' | ':' if !in_brackets => {
                    name_end = idx;
                    break;
                }
                _ => {}
            }
        }
        let name = &field[..name_end];
        let rest = &field[name_end..];
        let (conversion, spec) = if let Some(after) = rest.strip_prefix('!') {
            let mut chars = after.chars();
            let conversion = match chars.next() {
                Some(c @ ('r' | 's' | 'a')) => c,
                Some(c) => {
                    return raise(
                        ExcKind::ValueError,
                        format!("Unknown conversion specifier {}", c),
                    )
                }
                None => {
                    return raise(
                        ExcKind::ValueError,
                        "end of string while looking for conversion specifier",
                    )
                }
            };
            let tail = chars.as_str();
            match tail.strip_prefix(':') {
                Some(spec) => (Some(conversion), spec),
                None if tail.is_empty() => (Some(conversion), ""),
                None => {
                    return raise(ExcKind::ValueError, "expected ':' after conversion specifier")
                }
            }
        } else {
            (None, rest.strip_prefix(':').unwrap_or(""))
        };

        let head_end = name.find(|c| c == '.' || c == '[').unwrap_or(name.len());
        let head = &name[..head_end];
        let mut value = if head.is_empty() {
            let index = match numbering {
                Numbering::Manual => {
                    return raise(
                        ExcKind::ValueError,
                        "cannot switch from manual field specification to automatic field numbering",
                    )
                }
                Numbering::Unknown => 0,
                Numbering::Auto(next) => *next,
            };
            *numbering = Numbering::Auto(index + 1);
            positional_field(args, index)?
        } else if head.chars().all(|c| c.is_ascii_digit()) {
            if let Numbering::Auto(_) = numbering {
                return raise(
                    ExcKind::ValueError,
                    "cannot switch from automatic field numbering to manual field specification",
                );
            }
            *numbering = Numbering::Manual;
            let index = head.parse::<usize>().unwrap_or(usize::MAX);
            positional_field(args, index)?
        } else {
            match kwargs.iter().find(|(key, _)| key == head) {
                Some((_, value)) => value.clone(),
                None => return Err(ops::key_error(&Value::from(head))),
            }
        };

        let mut accessors = &name[head_end..];
        while !accessors.is_empty() {
            if let Some(after) = accessors.strip_prefix('.') {
                let end = after.find(|c| c == '.' || c == '[').unwrap_or(after.len());
                value = self.get_attr(&value, &after[..end])?;
                accessors = &after[end..];
            } else if let Some(after) = accessors.strip_prefix('[') {
                let close = match after.find(']') {
                    Some(close) => close,
                    None => return raise(ExcKind::ValueError, "Missing ']' in format string"),
                };
                let key = &after[..close];
                let index = match key.parse::<i64>() {
                    Ok(i) if key.chars().all(|c| c.is_ascii_digit()) => Value::Int(i),
                    _ => Value::from(key),
                };
                value = ops::get_item(&value, &index)?;
                accessors = &after[close + 1..];
            } else {
                return raise(
                    ExcKind::ValueError,
                    "Only '.' or '[' may follow ']' in format field specifier",
                );
            }
        }

        let spec = if spec.contains('{') {
            self.format_template(spec, args, kwargs, numbering, depth + 1)?
        } else {
            spec.to_string()
        };
        let value = match conversion {
            Some('r') => Value::from(repr(&value)),
            Some('a') => Value::from(ascii(&value)),
            Some(_) => Value::from(str_value(&value)),
            None => value,
        };
        format_value(&value, &spec)
    }

    // ========================================================================
    // list
    // ========================================================================

    fn list_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        mut kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let Value::List(list) = receiver else {
            return Ok(Value::None);
        };
        let qualified = format!("list.{}", name);
        if name == "sort" {
            if !args.is_empty() {
                return raise(ExcKind::TypeError, "sort() takes no positional arguments");
            }
            let key = take_keyword(&mut kwargs, "key");
            let reverse = take_keyword(&mut kwargs, "reverse")
                .map(|v| ops::truthy(&v))
                .unwrap_or(false);
            finish_keywords("sort", &kwargs)?;
            let items = std::mem::take(&mut *list.borrow_mut());
            match self.sort_values(items.clone(), key, reverse) {
                Ok(sorted) => *list.borrow_mut() = sorted,
                Err(flow) => {
                    *list.borrow_mut() = items;
                    return Err(flow);
                }
            }
            return Ok(Value::None);
        }
        no_keywords(&qualified, &kwargs)?;
        let value = match name {
            "append" => {
                arity(&qualified, args.len(), 1, 1)?;
                let mut list = list.borrow_mut();
                if list.len() >= crate::engine::value::MAX_ITEMS {
                    return ops::memory_error();
                }
                list.push(args[0].clone());
                Value::None
            }
            "extend" => {
                arity(&qualified, args.len(), 1, 1)?;
                let items = self.collect(args[0].clone())?;
                list.borrow_mut().extend(items);
                Value::None
            }
            "insert" => {
                arity(&qualified, args.len(), 2, 2)?;
                let index = expect_int(&args[0])?;
                let mut list = list.borrow_mut();
                let len = list.len() as i64;
                let position = if index < 0 {
                    (index + len).max(0)
                } else {
                    index.min(len)
                };
                list.insert(position as usize, args[1].clone());
                Value::None
            }
            "pop" => {
                arity(&qualified, args.len(), 0, 1)?;
                let index = match args.first() {
                    Some(v) => expect_int(v)?,
                    None => -1,
                };
                let mut list = list.borrow_mut();
                if list.is_empty() {
                    return raise(ExcKind::IndexError, "pop from empty list");
                }
                let len = list.len() as i64;
                let position = if index < 0 { index + len } else { index };
                if position < 0 || position >= len {
                    return raise(ExcKind::IndexError, "pop index out of range");
                }
                list.remove(position as usize)
            }
            "remove" => {
                arity(&qualified, args.len(), 1, 1)?;
                let mut list = list.borrow_mut();
                match list
                    .iter()
                    .position(|item| item.is(&args[0]) || values_equal(item, &args[0]))
                {
                    Some(position) => {
                        list.remove(position);
                        Value::None
                    }
                    None => return raise(ExcKind::ValueError, "list.remove(x): x not in list"),
                }
            }
            "reverse" => {
                arity(&qualified, args.len(), 0, 0)?;
                list.borrow_mut().reverse();
                Value::None
            }
            "copy" => {
                arity(&qualified, args.len(), 0, 0)?;
                Value::list(list.borrow().clone())
            }
            "clear" => {
                arity(&qualified, args.len(), 0, 0)?;
                list.borrow_mut().clear();
                Value::None
            }
            _ => {
                let items = list.borrow().clone();
                return sequence_method("list", &items, name, &args);
            }
        };
        Ok(value)
    }

    // ========================================================================
    // dict
    // ========================================================================

    fn dict_fromkeys(&mut self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        no_keywords("dict.fromkeys", &kwargs)?;
        arity("fromkeys", args.len(), 1, 2)?;
        let fill = args.get(1).cloned().unwrap_or(Value::None);
        let keys = self.collect(args[0].clone())?;
        let mut table = Table::new();
        for key in keys {
            table.insert(key.hash_key()?, key, fill.clone());
        }
        Ok(Value::dict(table))
    }

    fn dict_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let Value::Dict(table) = receiver else {
            return Ok(Value::None);
        };
        let qualified = format!("dict.{}", name);
        match name {
            "fromkeys" => return self.dict_fromkeys(args, kwargs),
            "update" => {
                arity("update", args.len(), 0, 1)?;
                if let Some(source) = args.into_iter().next() {
                    self.update_dict(table, source)?;
                }
                let mut table = table.borrow_mut();
                for (key, value) in kwargs {
                    let key = Value::from(key);
                    table.insert(key.hash_key()?, key, value);
                }
                return Ok(Value::None);
            }
            _ => no_keywords(&qualified, &kwargs)?,
        }
        let value = match name {
            "get" => {
                arity("get", args.len(), 1, 2)?;
                let hash = args[0].hash_key()?;
                let found = table.borrow().get(&hash).cloned();
                found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None))
            }
            "keys" | "values" | "items" => {
                arity(&qualified, args.len(), 0, 0)?;
                let kind = match name {
                    "keys" => ViewKind::Keys,
                    "values" => ViewKind::Values,
                    _ => ViewKind::Items,
                };
                Value::View(Rc::new(DictView {
                    dict: table.clone(),
                    kind,
                }))
            }
            "pop" => {
                arity("pop", args.len(), 1, 2)?;
                let hash = args[0].hash_key()?;
                let removed = table.borrow_mut().remove(&hash);
                match (removed, args.get(1)) {
                    (Some((_, value)), _) => value,
                    (None, Some(default)) => default.clone(),
                    (None, None) => return Err(ops::key_error(&args[0])),
                }
            }
            "popitem" => {
                arity(&qualified, args.len(), 0, 0)?;
                let popped = table.borrow_mut().pop_last();
                match popped {
                    Some((key, value)) => Value::tuple(vec![key, value]),
                    None => return Err(ops::key_error(&Value::from("popitem(): dictionary is empty"))),
                }
            }
            "setdefault" => {
                arity("setdefault", args.len(), 1, 2)?;
                let hash = args[0].hash_key()?;
                let existing = table.borrow().get(&hash).cloned();
                match existing {
                    Some(value) => value,
                    None => {
                        let fill = args.get(1).cloned().unwrap_or(Value::None);
                        table.borrow_mut().insert(hash, args[0].clone(), fill.clone());
                        fill
                    }
                }
            }
            "copy" => {
                arity(&qualified, args.len(), 0, 0)?;
                Value::dict(table.borrow().clone())
            }
            "clear" => {
                arity(&qualified, args.len(), 0, 0)?;
                table.borrow_mut().clear();
                Value::None
            }
            _ => {
                return raise(
                    ExcKind::AttributeError,
                    format!("'dict' object has no attribute '{}'", name),
                )
            }
        };
        Ok(value)
    }

    // ========================================================================
    // set and frozenset
    // ========================================================================

    /// Any iterable argument as a set value
    fn as_set(&mut self, value: &Value) -> Exec<Value> {
        match value {
            Value::Set(_) | Value::FrozenSet(_) => Ok(value.clone()),
            other => {
                let items = self.collect(other.clone())?;
                Ok(Value::set(Table::from_keys(items)?))
            }
        }
    }

    fn set_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let qualified = format!("{}.{}", receiver.type_name(), name);
        no_keywords(&qualified, &kwargs)?;
        let value = match name {
            "add" | "remove" | "discard" => {
                arity(&qualified, args.len(), 1, 1)?;
                let Value::Set(table) = receiver else {
                    return Ok(Value::None);
                };
                let hash = args[0].hash_key()?;
                match name {
                    "add" => table.borrow_mut().insert(hash, args[0].clone(), Value::None),
                    "remove" => {
                        if table.borrow_mut().remove(&hash).is_none() {
                            return Err(ops::key_error(&args[0]));
                        }
                    }
                    _ => {
                        table.borrow_mut().remove(&hash);
                    }
                }
                Value::None
            }
            "pop" => {
                arity(&qualified, args.len(), 0, 0)?;
                let Value::Set(table) = receiver else {
                    return Ok(Value::None);
                };
                let popped = table.borrow_mut().pop_first();
                match popped {
                    Some((key, _)) => key,
                    None => return Err(ops::key_error(&Value::from("pop from an empty set"))),
                }
            }
            "clear" => {
                arity(&qualified, args.len(), 0, 0)?;
                if let Value::Set(table) = receiver {
                    table.borrow_mut().clear();
                }
                Value::None
            }
            "copy" => {
                arity(&qualified, args.len(), 0, 0)?;
                match receiver {
                    Value::Set(table) => Value::set(table.borrow().clone()),
                    other => other.clone(),
                }
            }
            "union" | "intersection" | "difference" | "symmetric_difference" => {
                if name == "symmetric_difference" {
                    arity(&qualified, args.len(), 1, 1)?;
                }
                let op = set_operator(name);
                let mut result = match receiver {
                    Value::Set(table) => Value::set(table.borrow().clone()),
                    other => other.clone(),
                };
                for other in &args {
                    let other = self.as_set(other)?;
                    result = ops::set_operation(op, &result, &other)?;
                }
                result
            }
            "update" | "intersection_update" | "difference_update" | "symmetric_difference_update" => {
                if name == "symmetric_difference_update" {
                    arity(&qualified, args.len(), 1, 1)?;
                }
                let Value::Set(table) = receiver else {
                    return Ok(Value::None);
                };
                let op = set_operator(name.trim_end_matches("_update"));
                for other in &args {
                    let other = self.as_set(other)?;
                    if let Value::Set(result) = ops::set_operation(op, receiver, &other)? {
                        let result = result.borrow().clone();
                        *table.borrow_mut() = result;
                    }
                }
                Value::None
            }
            "issubset" | "issuperset" | "isdisjoint" => {
                arity(&qualified, args.len(), 1, 1)?;
                let other = self.as_set(&args[0])?;
                let result = match name {
                    "issubset" => ops::order("<=", receiver, &other)?,
                    "issuperset" => ops::order(">=", receiver, &other)?,
                    _ => ops::with_table(&ops::set_operation(BinOp::BitAnd, receiver, &other)?, |t| {
                        t.is_empty()
                    }),
                };
                Value::Bool(result)
            }
            _ => {
                return raise(
                    ExcKind::AttributeError,
                    format!("'{}' object has no attribute '{}'", receiver.type_name(), name),
                )
            }
        };
        Ok(value)
    }
}

fn set_operator(name: &str) -> BinOp {
    match name {
        "union" | "update" => BinOp::BitOr,
        "intersection" => BinOp::BitAnd,
        "difference" => BinOp::Sub,
        _ => BinOp::BitXor,
    }
}

fn positional_field(args: &[Value], index: usize) -> Exec<Value> {
    args.get(index).cloned().map_or_else(
        || {
            raise(
                ExcKind::IndexError,
                format!(
                    "Replacement index {} out of range for positional args tuple",
                    index
                ),
            )
        },
        Ok,
    )
}

/// `index` and `count` shared by list and tuple
fn sequence_method(type_name: &str, items: &[Value], name: &str, args: &[Value]) -> Exec<Value> {
    let qualified = format!("{}.{}", type_name, name);
    let matches = |item: &Value| item.is(&args[0]) || values_equal(item, &args[0]);
    match name {
        "count" => {
            arity(&qualified, args.len(), 1, 1)?;
            Ok(Value::Int(items.iter().filter(|&item| matches(item)).count() as i64))
        }
        "index" => {
            arity(&qualified, args.len(), 1, 3)?;
            let (start, end) = window(items.len(), args.get(1), args.get(2))?;
            let found = (start..end.max(start)).find(|&i| matches(&items[i]));
            match found {
                Some(i) => Ok(Value::Int(i as i64)),
                None if type_name == "list" => {
                    raise(ExcKind::ValueError, format!("{} is not in list", repr(&args[0])))
                }
                None => raise(ExcKind::ValueError, "tuple.index(x): x not in tuple"),
            }
        }
        _ => raise(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, name),
        ),
    }
}

fn bytes_method(data: &Rc<[u8]>, name: &str, args: &[Value]) -> Exec<Value> {
    let qualified = format!("bytes.{}", name);
    let value = match name {
        "decode" => {
            arity(&qualified, args.len(), 0, 2)?;
            let encoding = match args.first() {
                Some(v) => expect_str(v, "decode() argument 'encoding'")?.to_string(),
                None => "utf-8".to_string(),
            };
            Value::from(decode_bytes(data, &encoding)?)
        }
        "hex" => {
            arity(&qualified, args.len(), 0, 0)?;
            Value::from(data.iter().map(|b| format!("{:02x}", b)).collect::<String>())
        }
        "count" => {
            arity(&qualified, args.len(), 1, 1)?;
            Value::Int(count_bytes(data, &bytes_arg(&args[0])?) as i64)
        }
        "find" => {
            arity(&qualified, args.len(), 1, 1)?;
            match find_bytes(data, &bytes_arg(&args[0])?) {
                Some(i) => Value::Int(i as i64),
                None => Value::Int(-1),
            }
        }
        "startswith" | "endswith" => {
            arity(&qualified, args.len(), 1, 1)?;
            let mut found = false;
            for affix in affixes(&args[0], name, "bytes")? {
                let affix = match affix {
                    Value::Bytes(b) => b,
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!("a bytes-like object is required, not '{}'", other.type_name()),
                        )
                    }
                };
                let hit = if name == "startswith" {
                    data.starts_with(&affix)
                } else {
                    data.ends_with(&affix)
                };
                if hit {
                    found = true;
                    break;
                }
            }
            Value::Bool(found)
        }
        "upper" => {
            arity(&qualified, args.len(), 0, 0)?;
            Value::bytes(data.to_ascii_uppercase())
        }
        "lower" => {
            arity(&qualified, args.len(), 0, 0)?;
            Value::bytes(data.to_ascii_lowercase())
        }
        "strip" => {
            arity(&qualified, args.len(), 0, 1)?;
            let set: Vec<u8> = match args.first() {
                None | Some(Value::None) => b" \t\n\r\x0b\x0c".to_vec(),
                Some(v) => bytes_arg(v)?,
            };
            let start = data.iter().position(|b| !set.contains(b)).unwrap_or(data.len());
            let end = data
                .iter()
                .rposition(|b| !set.contains(b))
                .map(|i| i + 1)
                .unwrap_or(start);
            Value::bytes(data[start..end.max(start)].to_vec())
        }
        _ => {
            return raise(
                ExcKind::AttributeError,
                format!("'bytes' object has no attribute '{}'", name),
            )
        }
    };
    Ok(value)
}

fn number_method(receiver: &Value, name: &str, args: &[Value]) -> Exec<Value> {
    let qualified = format!("{}.{}", receiver.type_name(), name);
    arity(&qualified, args.len(), 0, 0)?;
    let value = match (receiver, name) {
        (Value::Bool(b), "bit_length") => Value::Int(*b as i64),
        (Value::Int(i), "bit_length") => Value::Int(64 - i.unsigned_abs().leading_zeros() as i64),
        (Value::Bool(b), "conjugate") => Value::Int(*b as i64),
        (Value::Long(n), "bit_length") => Value::Int(n.bits() as i64),
        (Value::Int(_) | Value::Long(_), "conjugate") => receiver.clone(),
        (Value::Float(f), "is_integer") => Value::Bool(f.is_finite() && f.fract() == 0.0),
        (Value::Float(f), "conjugate") => Value::Float(*f),
        (Value::Complex(re, im), "conjugate") => Value::Complex(*re, -im),
        _ => {
            return raise(
                ExcKind::AttributeError,
                format!("'{}' object has no attribute '{}'", receiver.type_name(), name),
            )
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines_handles_mixed_endings() {
        assert_eq!(split_lines("a\r\nb\nc\rd", false), vec!["a", "b", "c", "d"]);
        assert_eq!(split_lines("a\n\nb\n", false), vec!["a", "", "b"]);
        assert_eq!(split_lines("x\r\ny", true), vec!["x\r\n", "y"]);
        assert!(split_lines("", false).is_empty());
    }

    #[test]
    fn test_whitespace_split_with_limit() {
        let parts = whitespace_split("  a b  c  ", 1);
        let parts: Vec<String> = parts.iter().map(str_value).collect();
        assert_eq!(parts, vec!["a", "b  c  "]);
        let parts: Vec<String> = whitespace_rsplit("  a b  c  ", 1).iter().map(str_value).collect();
        assert_eq!(parts, vec!["  a b", "c"]);
    }

    #[test]
    fn test_title_and_istitle() {
        assert_eq!(title_case("hello wORLD 3rd"), "Hello World 3Rd");
        assert!(is_title("Hello World"));
        assert!(!is_title("Hello world"));
        assert!(!is_title("123"));
    }

    #[test]
    fn test_find_counts_characters_not_bytes() {
        let found = find_chars("héllo", "llo", None, None, false).unwrap();
        assert_eq!(found, Some(2));
        let found = find_chars("abcabc", "c", None, None, true).unwrap();
        assert_eq!(found, Some(5));
        assert_eq!(find_chars("abc", "", Some(&Value::Int(3)), None, false).unwrap(), Some(3));
        assert_eq!(find_chars("abc", "", Some(&Value::Int(5)), None, false).unwrap(), None);
    }

    #[test]
    fn test_decode_reports_position() {
        let err = decode_bytes(&[0x61, 0xff], "utf-8").unwrap_err();
        match err {
            crate::engine::exceptions::Flow::Raise(exc) => assert_eq!(
                exc.summary(),
                "UnicodeDecodeError: 'utf-8' codec can't decode byte 0xff in position 1: invalid start byte"
            ),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(decode_bytes(b"caf\xc3\xa9", "UTF8").unwrap(), "café");
    }

    #[test]
    fn test_has_attribute() {
        assert!(has_attribute(&Value::from("x"), "upper"));
        assert!(has_attribute(&Value::Int(1), "real"));
        assert!(!has_attribute(&Value::Int(1), "__class__"));
        assert!(has_method(&Value::Type(TypeKind::Dict), "fromkeys"));
    }
}

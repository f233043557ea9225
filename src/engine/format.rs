//! Text conversion of values: `repr`, `str`, format specs and `%` formatting

use std::rc::Rc;
use std::sync::OnceLock;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use regex::Regex;

use crate::engine::exceptions::{raise, ExcKind, ExceptionValue, Exec, Flow};
use crate::engine::integer;
use crate::engine::ops;
use crate::engine::value::{IterState, Value, ViewKind, MAX_ITEMS};

/// `repr(value)`
pub fn repr(value: &Value) -> String {
    let mut seen = Vec::new();
    repr_inner(value, &mut seen)
}

/// `str(value)`
pub fn str_value(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        Value::Exception(exc) => exc.message(),
        other => repr(other),
    }
}

/// `ascii(value)`: `repr` with non-ASCII characters escaped
pub fn ascii(value: &Value) -> String {
    let mut out = String::new();
    for c in repr(value).chars() {
        let code = c as u32;
        if code < 0x80 {
            out.push(c);
        } else if code <= 0xff {
            out.push_str(&format!("\\x{:02x}", code));
        } else if code <= 0xffff {
            out.push_str(&format!("\\u{:04x}", code));
        } else {
            out.push_str(&format!("\\U{:08x}", code));
        }
    }
    out
}

fn address(value: &Value) -> String {
    format!("0x{:012x}", value.identity() as u64 & 0xffff_ffff_ffff)
}

fn repr_inner(value: &Value, seen: &mut Vec<i64>) -> String {
    match value {
        Value::None => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Long(n) => n.to_string(),
        Value::Float(f) => float_repr(*f),
        Value::Complex(re, im) => complex_repr(*re, *im),
        Value::Str(s) => str_repr(s),
        Value::Bytes(b) => bytes_repr(b),
        Value::Ellipsis => "Ellipsis".to_string(),
        Value::List(items) => {
            let id = value.identity();
            if seen.contains(&id) {
                return "[...]".to_string();
            }
            seen.push(id);
            let parts: Vec<String> = items.borrow().iter().map(|v| repr_inner(v, seen)).collect();
            seen.pop();
            format!("[{}]", parts.join(", "))
        }
        Value::Tuple(items) => {
            let parts: Vec<String> = items.iter().map(|v| repr_inner(v, seen)).collect();
            if parts.len() == 1 {
                format!("({},)", parts[0])
            } else {
                format!("({})", parts.join(", "))
            }
        }
        Value::Dict(table) => {
            let id = value.identity();
            if seen.contains(&id) {
                return "{...}".to_string();
            }
            seen.push(id);
            let parts: Vec<String> = table
                .borrow()
                .iter()
                .map(|(k, v)| format!("{}: {}", repr_inner(k, seen), repr_inner(v, seen)))
                .collect();
            seen.pop();
            format!("{{{}}}", parts.join(", "))
        }
        Value::Set(table) => {
            let table = table.borrow();
            if table.is_empty() {
                return "set()".to_string();
            }
            let parts: Vec<String> = table.keys().map(|k| repr_inner(k, seen)).collect();
            format!("{{{}}}", parts.join(", "))
        }
        Value::FrozenSet(table) => {
            if table.is_empty() {
                return "frozenset()".to_string();
            }
            let parts: Vec<String> = table.keys().map(|k| repr_inner(k, seen)).collect();
            format!("frozenset({{{}}})", parts.join(", "))
        }
        Value::Range(r) => {
            if r.step == 1 {
                format!("range({}, {})", r.start, r.stop)
            } else {
                format!("range({}, {}, {})", r.start, r.stop, r.step)
            }
        }
        Value::Slice(s) => format!(
            "slice({}, {}, {})",
            repr_inner(&s.start, seen),
            repr_inner(&s.stop, seen),
            repr_inner(&s.step, seen)
        ),
        Value::View(view) => {
            let table = view.dict.borrow();
            let parts: Vec<String> = match view.kind {
                ViewKind::Keys => table.keys().map(|k| repr_inner(k, seen)).collect(),
                ViewKind::Values => table.values().map(|v| repr_inner(v, seen)).collect(),
                ViewKind::Items => table
                    .iter()
                    .map(|(k, v)| format!("({}, {})", repr_inner(k, seen), repr_inner(v, seen)))
                    .collect(),
            };
            format!("{}([{}])", view.kind.type_name(), parts.join(", "))
        }
        Value::Iterator(state) => {
            let name = state.borrow().type_name();
            let noun = match &*state.borrow() {
                IterState::Snapshot { name: "generator", .. } => {
                    return format!("<generator object <genexpr> at {}>", address(value))
                }
                IterState::Generator { qualname, .. } => {
                    return format!("<generator object {} at {}>", qualname, address(value))
                }
                _ => "object",
            };
            format!("<{} {} at {}>", name, noun, address(value))
        }
        Value::Function(f) => format!("<function {} at {}>", f.qualname, address(value)),
        Value::Builtin(b) => format!("<built-in function {}>", b.name()),
        Value::Method(m) => match &m.receiver {
            Value::Function(_) => format!("<bound method {}>", m.name),
            receiver => format!(
                "<built-in method {} of {} object at {}>",
                m.name,
                receiver.type_name(),
                address(receiver)
            ),
        },
        Value::Type(kind) => format!("<class '{}'>", kind.name()),
        Value::Exception(exc) => exc.repr(),
        Value::Object(_) => format!("<object object at {}>", address(value)),
    }
}

/// Shortest round-trip float text, switching to exponent form like Python
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let sci = format!("{:e}", f.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    let sign = if f < 0.0 { "-" } else { "" };

    let body = if (-4..16).contains(&exp) {
        positional(&digits, exp)
    } else {
        let mut m = digits[..1].to_string();
        if digits.len() > 1 {
            m.push('.');
            m.push_str(&digits[1..]);
        }
        format!("{}e{}{:02}", m, if exp < 0 { '-' } else { '+' }, exp.abs())
    };
    format!("{}{}", sign, body)
}

fn positional(digits: &str, exp: i32) -> String {
    if exp >= 0 {
        let int_len = exp as usize + 1;
        if digits.len() <= int_len {
            format!("{}{}.0", digits, "0".repeat(int_len - digits.len()))
        } else {
            format!("{}.{}", &digits[..int_len], &digits[int_len..])
        }
    } else {
        format!("0.{}{}", "0".repeat((-exp - 1) as usize), digits)
    }
}

fn complex_component(f: f64) -> String {
    let text = float_repr(f);
    match text.strip_suffix(".0") {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

pub fn complex_repr(re: f64, im: f64) -> String {
    if re == 0.0 && !re.is_sign_negative() {
        return format!("{}j", complex_component(im));
    }
    let sign = if im < 0.0 || (im == 0.0 && im.is_sign_negative()) || im.is_nan() && im.is_sign_negative() {
        "-"
    } else {
        "+"
    };
    format!(
        "({}{}{}j)",
        complex_component(re),
        sign,
        complex_component(im.abs())
    )
}

pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || (0x7f..0xa0).contains(&(c as u32)) => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn bytes_repr(b: &[u8]) -> String {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::from("b");
    out.push(quote as char);
    for &byte in b {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            q if q == quote => {
                out.push('\\');
                out.push(q as char);
            }
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    out.push(quote as char);
    out
}

// ============================================================================
// Format-spec mini-language
// ============================================================================

fn spec_regex() -> Option<&'static Regex> {
    static SPEC: OnceLock<Option<Regex>> = OnceLock::new();
    SPEC.get_or_init(|| {
        Regex::new(
            r"^(?s:(?P<fill>.)?(?P<align>[<>=^]))?(?P<sign>[+\- ])?(?P<z>z)?(?P<alt>#)?(?P<zero>0)?(?P<width>\d+)?(?P<grouping>[,_])?(?:\.(?P<precision>\d+))?(?P<type>[bcdeEfFgGnosxX%])?$",
        )
        .ok()
    })
    .as_ref()
}

/// Padding wider than this would exhaust memory before it was printed
fn checked_width(width: usize) -> Exec<usize> {
    ops::check_size(width)?;
    Ok(width)
}

fn checked_precision(precision: usize) -> Exec<usize> {
    if precision > MAX_ITEMS {
        return raise(ExcKind::ValueError, "precision too big");
    }
    Ok(precision)
}

/// Fractional digits past this are zero in the exact expansion of any f64
const EXACT_DIGITS: usize = 1100;

/// Fixed-point text with any precision
fn fixed(value: f64, precision: usize) -> String {
    if precision <= EXACT_DIGITS {
        return format!("{:.*}", precision, value);
    }
    let mut text = format!("{:.*}", EXACT_DIGITS, value);
    text.extend(std::iter::repeat('0').take(precision - EXACT_DIGITS));
    text
}

/// Parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`
#[derive(Debug, Clone, PartialEq)]
pub struct FormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: Option<char>,
    pub alternate: bool,
    pub zero: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub ty: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: None,
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

impl FormatSpec {
    pub fn parse(spec: &str) -> Exec<FormatSpec> {
        let caps = match spec_regex().and_then(|re| re.captures(spec)) {
            Some(caps) => caps,
            None => return raise(ExcKind::ValueError, "Invalid format specifier"),
        };
        let number = |name: &str| -> Exec<Option<usize>> {
            match caps.name(name) {
                Some(m) => match m.as_str().parse::<usize>() {
                    Ok(n) => Ok(Some(n)),
                    Err(_) => raise(ExcKind::ValueError, "Too many decimal digits in format string"),
                },
                None => Ok(None),
            }
        };
        let width = match number("width")? {
            Some(width) => checked_width(width)?,
            None => 0,
        };
        let precision = match number("precision")? {
            Some(precision) => Some(checked_precision(precision)?),
            None => None,
        };
        let first_char = |name: &str| caps.name(name).and_then(|m| m.as_str().chars().next());

        Ok(FormatSpec {
            fill: first_char("fill").unwrap_or(' '),
            align: first_char("align"),
            sign: first_char("sign"),
            alternate: caps.name("alt").is_some(),
            zero: caps.name("zero").is_some(),
            width,
            grouping: first_char("grouping"),
            precision,
            ty: first_char("type"),
        })
    }

    fn pad(&self, sign: &str, prefix: &str, body: &str, numeric: bool) -> String {
        let (fill, align) = match (self.align, self.zero && numeric) {
            (Some(align), _) => (self.fill, align),
            (None, true) => ('0', '='),
            (None, false) => (self.fill, if numeric { '>' } else { '<' }),
        };
        let len = sign.chars().count() + prefix.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{}{}{}", sign, prefix, body);
        }
        let padding = self.width - len;
        let fills = |n: usize| fill.to_string().repeat(n);
        match align {
            '<' => format!("{}{}{}{}", sign, prefix, body, fills(padding)),
            '^' => format!(
                "{}{}{}{}{}",
                fills(padding / 2),
                sign,
                prefix,
                body,
                fills(padding - padding / 2)
            ),
            '=' => format!("{}{}{}{}", sign, prefix, fills(padding), body),
            _ => format!("{}{}{}{}", fills(padding), sign, prefix, body),
        }
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }
}

/// `format(value, spec)`
pub fn format_value(value: &Value, spec: &str) -> Exec<String> {
    if spec.is_empty() {
        return Ok(str_value(value));
    }
    let parsed = FormatSpec::parse(spec)?;
    match value {
        Value::Bool(b) => format_int(&BigInt::from(*b as i64), &parsed),
        Value::Int(i) => format_int(&BigInt::from(*i), &parsed),
        Value::Long(n) => format_int(n, &parsed),
        Value::Float(f) => format_float(*f, &parsed),
        Value::Str(s) => format_str(s, &parsed),
        Value::Complex(..) if parsed.ty.is_none() && parsed.precision.is_none() => {
            Ok(parsed.pad("", "", &str_value(value), true))
        }
        other => raise(
            ExcKind::TypeError,
            format!(
                "unsupported format string passed to {}.__format__",
                other.type_name()
            ),
        ),
    }
}

fn group_digits(digits: &str, separator: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(separator);
        }
        out.push(*c);
    }
    out
}

pub fn format_int(value: &BigInt, spec: &FormatSpec) -> Exec<String> {
    let ty = spec.ty.unwrap_or('d');
    if matches!(ty, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float(integer::to_f64(value)?, spec);
    }
    if spec.precision.is_some() {
        return raise(
            ExcKind::ValueError,
            "Precision not allowed in integer format specifier",
        );
    }
    let magnitude = value.magnitude();
    let (digits, prefix) = match ty {
        'd' | 'n' => (magnitude.to_string(), ""),
        'b' => (magnitude.to_str_radix(2), "0b"),
        'o' => (magnitude.to_str_radix(8), "0o"),
        'x' => (magnitude.to_str_radix(16), "0x"),
        'X' => (magnitude.to_str_radix(16).to_uppercase(), "0X"),
        'c' => {
            return match value.to_u32().and_then(char::from_u32) {
                Some(c) => Ok(spec.pad("", "", &c.to_string(), false)),
                None => raise(ExcKind::OverflowError, "%c arg not in range(0x110000)"),
            };
        }
        other => {
            return raise(
                ExcKind::ValueError,
                format!("Unknown format code '{}' for object of type 'int'", other),
            )
        }
    };
    let digits = match spec.grouping {
        Some(sep) => {
            let every = if matches!(ty, 'd' | 'n') { 3 } else { 4 };
            if sep == ',' && every == 4 {
                return raise(ExcKind::ValueError, format!("Cannot specify ',' with '{}'.", ty));
            }
            group_digits(&digits, sep, every)
        }
        None => digits,
    };
    let prefix = if spec.alternate { prefix } else { "" };
    Ok(spec.pad(spec.sign_for(value.is_negative()), prefix, &digits, true))
}

fn sci(value: f64, precision: usize, upper: bool) -> String {
    let text = format!("{:.*e}", precision.min(EXACT_DIGITS), value);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    let exp: i32 = exponent.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    let zeros = "0".repeat(precision.saturating_sub(EXACT_DIGITS));
    format!(
        "{}{}{}{}{:02}",
        mantissa,
        zeros,
        e,
        if exp < 0 { '-' } else { '+' },
        exp.abs()
    )
}

fn strip_fraction_zeros(text: &str) -> String {
    let (mantissa, exponent) = match text.find(['e', 'E']) {
        Some(pos) => (&text[..pos], &text[pos..]),
        None => (text, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{}{}", mantissa, exponent)
}

/// General format (`g`), or the implicit float format when `repr_like`
fn general(value: f64, precision: usize, alternate: bool, upper: bool, repr_like: bool) -> String {
    let p = precision.max(1);
    let exp = if value == 0.0 {
        0
    } else {
        let text = format!("{:.*e}", (p - 1).min(EXACT_DIGITS), value);
        text.split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };
    let threshold = if repr_like { p as i32 - 1 } else { p as i32 };
    let use_sci = exp < -4 || exp >= threshold;
    let text = if use_sci {
        sci(value, p - 1, upper)
    } else {
        fixed(value, (p as i64 - 1 - exp as i64).max(0) as usize)
    };
    let mut text = if alternate { text } else { strip_fraction_zeros(&text) };
    if repr_like && !use_sci && !text.contains('.') {
        text.push_str(".0");
    }
    text
}

pub fn format_float(value: f64, spec: &FormatSpec) -> Exec<String> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let ty = spec.ty;
    let upper = matches!(ty, Some('E') | Some('F') | Some('G'));

    let body = if !magnitude.is_finite() {
        let word = if magnitude.is_nan() { "nan" } else { "inf" };
        let word = if upper { word.to_uppercase() } else { word.to_string() };
        if ty == Some('%') {
            format!("{}%", word)
        } else {
            word
        }
    } else {
        match ty {
            None => match spec.precision {
                None => float_repr(magnitude),
                Some(p) => general(magnitude, p, spec.alternate, false, true),
            },
            Some('f') | Some('F') => fixed(magnitude, spec.precision.unwrap_or(6)),
            Some('e') | Some('E') => sci(magnitude, spec.precision.unwrap_or(6), upper),
            Some('g') | Some('G') | Some('n') => {
                general(magnitude, spec.precision.unwrap_or(6), spec.alternate, upper, false)
            }
            Some('%') => format!("{}%", fixed(magnitude * 100.0, spec.precision.unwrap_or(6))),
            Some(other) => {
                return raise(
                    ExcKind::ValueError,
                    format!("Unknown format code '{}' for object of type 'float'", other),
                )
            }
        }
    };

    let body = match spec.grouping {
        Some(sep) if magnitude.is_finite() => {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            format!("{}{}", group_digits(&body[..split], sep, 3), &body[split..])
        }
        _ => body,
    };
    Ok(spec.pad(spec.sign_for(negative), "", &body, true))
}

pub fn format_str(value: &str, spec: &FormatSpec) -> Exec<String> {
    if let Some(ty) = spec.ty {
        if ty != 's' {
            return raise(
                ExcKind::ValueError,
                format!("Unknown format code '{}' for object of type 'str'", ty),
            );
        }
    }
    if spec.sign.is_some() {
        return raise(ExcKind::ValueError, "Sign not allowed in string format specifier");
    }
    if spec.align == Some('=') {
        return raise(
            ExcKind::ValueError,
            "'=' alignment not allowed in string format specifier",
        );
    }
    let body: String = match spec.precision {
        Some(p) => value.chars().take(p).collect(),
        None => value.to_string(),
    };
    Ok(spec.pad("", "", &body, false))
}

// ============================================================================
// printf-style formatting
// ============================================================================

enum PercentArgs<'a> {
    Positional(Vec<Value>, usize),
    Mapping(&'a Value),
}

/// `template % args`
pub fn percent_format(template: &str, args: &Value) -> Exec<String> {
    let mut source = match args {
        Value::Tuple(items) => PercentArgs::Positional(items.to_vec(), 0),
        Value::Dict(_) => PercentArgs::Mapping(args),
        other => PercentArgs::Positional(vec![other.clone()], 0),
    };
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut key = None;
        if chars.get(i) == Some(&'(') {
            let end = match chars[i..].iter().position(|&c| c == ')') {
                Some(p) => p + i,
                None => return raise(ExcKind::ValueError, "incomplete format key"),
            };
            key = Some(chars[i + 1..end].iter().collect::<String>());
            i = end + 1;
        }

        let mut spec = FormatSpec::default();
        let mut left = false;
        while let Some(&flag) = chars.get(i) {
            match flag {
                '-' => left = true,
                '+' => spec.sign = Some('+'),
                ' ' => {
                    if spec.sign.is_none() {
                        spec.sign = Some(' ')
                    }
                }
                '#' => spec.alternate = true,
                '0' => spec.zero = true,
                _ => break,
            }
            i += 1;
        }
        let mut width = String::new();
        while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            width.push(*c);
            i += 1;
        }
        if !width.is_empty() {
            spec.width = match width.parse() {
                Ok(width) => checked_width(width)?,
                Err(_) => return raise(ExcKind::ValueError, "width too big"),
            };
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let mut precision = String::new();
            while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                precision.push(*c);
                i += 1;
            }
            spec.precision = match precision.parse::<usize>() {
                Ok(p) => Some(checked_precision(p)?),
                Err(_) if precision.is_empty() => Some(0),
                Err(_) => return raise(ExcKind::ValueError, "precision too big"),
            };
        }
        while matches!(chars.get(i), Some('h') | Some('l') | Some('L')) {
            i += 1;
        }
        let conversion = match chars.get(i) {
            Some(&c) => c,
            None => return raise(ExcKind::ValueError, "incomplete format"),
        };
        i += 1;
        if conversion == '%' {
            out.push('%');
            continue;
        }

        let value = match (&key, &mut source) {
            (Some(name), PercentArgs::Mapping(Value::Dict(table))) => {
                let hash = Value::from(name.as_str()).hash_key()?;
                match table.borrow().get(&hash) {
                    Some(v) => v.clone(),
                    None => {
                        return Err(Flow::Raise(Rc::new(ExceptionValue::new(
                            ExcKind::KeyError,
                            vec![Value::from(name.as_str())],
                        ))))
                    }
                }
            }
            (Some(_), _) => return raise(ExcKind::TypeError, "format requires a mapping"),
            (None, PercentArgs::Positional(items, next)) => {
                let value = match items.get(*next) {
                    Some(v) => v.clone(),
                    None => return raise(ExcKind::TypeError, "not enough arguments for format string"),
                };
                *next += 1;
                value
            }
            (None, PercentArgs::Mapping(mapping)) => (**mapping).clone(),
        };

        if left {
            spec.align = Some('<');
        } else if spec.zero && !matches!(conversion, 's' | 'r' | 'a' | 'c') {
            spec.align = Some('=');
            spec.fill = '0';
        } else {
            spec.align = Some('>');
        }
        spec.zero = false;

        let text = match conversion {
            's' | 'r' | 'a' => {
                let text = match conversion {
                    's' => str_value(&value),
                    'r' => repr(&value),
                    _ => ascii(&value),
                };
                format_str(&text, &spec)?
            }
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) => integer::to_bigint(&integer::from_f64(*f)?),
                    other => integer::to_bigint(other),
                };
                let n = match n {
                    Some(n) => n,
                    None => {
                        return raise(
                            ExcKind::TypeError,
                            format!("%{} format: a real number is required, not {}", conversion, value.type_name()),
                        )
                    }
                };
                spec.precision = None;
                spec.ty = Some('d');
                format_int(&n, &spec)?
            }
            'x' | 'X' | 'o' => {
                let n = match integer::to_bigint(&value) {
                    Some(n) => n,
                    None => {
                        return raise(
                            ExcKind::TypeError,
                            format!("%{} format: an integer is required, not {}", conversion, value.type_name()),
                        )
                    }
                };
                spec.precision = None;
                spec.ty = Some(conversion);
                format_int(&n, &spec)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let f = match value {
                    Value::Int(n) => n as f64,
                    Value::Long(ref n) => integer::to_f64(n)?,
                    Value::Bool(b) => b as i64 as f64,
                    Value::Float(f) => f,
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!("must be real number, not {}", other.type_name()),
                        )
                    }
                };
                spec.ty = Some(conversion);
                format_float(f, &spec)?
            }
            'c' => {
                let c = match &value {
                    Value::Int(n) => u32::try_from(*n).ok().and_then(char::from_u32),
                    Value::Str(s) if s.chars().count() == 1 => s.chars().next(),
                    _ => None,
                };
                match c {
                    Some(c) => format_str(&c.to_string(), &spec)?,
                    None => return raise(ExcKind::TypeError, "%c requires an int or a unicode character"),
                }
            }
            other => {
                return raise(
                    ExcKind::ValueError,
                    format!(
                        "unsupported format character '{}' (0x{:x}) at index {}",
                        other,
                        other as u32,
                        i - 1
                    ),
                )
            }
        };
        out.push_str(&text);
    }

    if let PercentArgs::Positional(items, used) = &source {
        if *used < items.len() && !matches!(args, Value::Dict(_)) {
            return raise(
                ExcKind::TypeError,
                "not all arguments converted during string formatting",
            );
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(2.0), "2.0");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(123456789.25), "123456789.25");
        assert_eq!(float_repr(1e-5), "1e-05");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(-1.5), "-1.5");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_container_repr() {
        let value = Value::list(vec![
            Value::Int(1),
            Value::from("it's"),
            Value::tuple(vec![Value::None]),
        ]);
        assert_eq!(repr(&value), "[1, \"it's\", (None,)]");
        assert_eq!(repr(&Value::tuple(vec![])), "()");
        assert_eq!(repr(&Value::bytes(b"a\n\xff".to_vec())), "b'a\\n\\xff'");
    }

    #[test]
    fn test_complex_repr() {
        assert_eq!(complex_repr(0.0, 2.0), "2j");
        assert_eq!(complex_repr(1.0, -2.5), "(1-2.5j)");
    }

    #[test]
    fn test_format_spec_numbers() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), "05d").unwrap(), "00042");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Int(255), "#x").unwrap(), "0xff");
        assert_eq!(format_value(&Value::Int(-7), "+>6").unwrap(), "    -7");
        assert_eq!(format_value(&Value::Float(0.25), ".1%").unwrap(), "25.0%");
        assert_eq!(format_value(&Value::Float(1234.5), ".2e").unwrap(), "1.23e+03");
        assert_eq!(format_value(&Value::Float(0.00001234), "g").unwrap(), "1.234e-05");
        assert_eq!(format_value(&Value::Float(1.0), ".3").unwrap(), "1.0");
        assert_eq!(format_value(&Value::Float(1234.5), ".2").unwrap(), "1.2e+03");
    }

    #[test]
    fn test_wide_int_formatting() {
        let wide = integer::normalize(BigInt::from(1u128 << 100));
        assert_eq!(repr(&wide), "1267650600228229401496703205376");
        assert_eq!(
            format_value(&wide, ",").unwrap(),
            "1,267,650,600,228,229,401,496,703,205,376"
        );
        assert_eq!(format_value(&wide, "#x").unwrap(), "0x10000000000000000000000000");
        assert_eq!(format_value(&wide, ".3e").unwrap(), "1.268e+30");
        assert_eq!(percent_format("%d", &wide).unwrap(), "1267650600228229401496703205376");
        assert_eq!(percent_format("%d", &Value::Float(1e20)).unwrap(), "100000000000000000000");
    }

    #[test]
    fn test_format_spec_strings() {
        assert_eq!(format_value(&Value::from("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_value(&Value::from("abcdef"), ".3").unwrap(), "abc");
        assert_eq!(format_value(&Value::from("x"), ">3").unwrap(), "  x");
        assert!(format_value(&Value::from("x"), "d").is_err());
        assert!(format_value(&Value::None, ">3").is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::from("Ann"), Value::Int(7), Value::Float(2.5)]);
        assert_eq!(
            percent_format("%s scored %03d (%.2f)", &args).unwrap(),
            "Ann scored 007 (2.50)"
        );
        assert_eq!(percent_format("%-5s|", &Value::from("ab")).unwrap(), "ab   |");
        assert_eq!(percent_format("100%%", &Value::tuple(vec![])).unwrap(), "100%");
        assert!(percent_format("%d %d", &Value::Int(1)).is_err());
        assert!(percent_format("%d", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }

    fn raised_kind(result: Exec<String>) -> ExcKind {
        match result {
            Err(Flow::Raise(exc)) => exc.kind,
            other => panic!("expected an exception, got {:?}", other),
        }
    }

    #[test]
    fn test_huge_widths_are_refused() {
        let one = Value::Int(1);
        assert_eq!(raised_kind(format_value(&one, ">10000000000")), ExcKind::MemoryError);
        assert_eq!(raised_kind(format_value(&one, "010000000000")), ExcKind::MemoryError);
        assert_eq!(raised_kind(percent_format("%10000000000d", &one)), ExcKind::MemoryError);
        assert_eq!(
            raised_kind(percent_format("%99999999999999999999999d", &one)),
            ExcKind::ValueError
        );
        assert_eq!(format_value(&one, ">5").unwrap(), "    1");
    }

    #[test]
    fn test_huge_precisions() {
        let half = Value::Float(1.5);
        assert_eq!(raised_kind(format_value(&half, ".1000000000f")), ExcKind::ValueError);
        assert_eq!(raised_kind(percent_format("%.1000000000f", &half)), ExcKind::ValueError);

        // past the exact expansion every digit is zero
        let text = format_value(&half, ".70000f").unwrap();
        assert_eq!(text.len(), 2 + 70000);
        assert!(text.starts_with("1.5000"));
        assert!(text[2..].chars().all(|c| c.is_ascii_digit()));
        let text = format_value(&Value::Float(0.1), ".2000e").unwrap();
        assert!(text.starts_with("1.000000000000000055511151231257827"));
        assert!(text.ends_with("0e-01"));
    }
}

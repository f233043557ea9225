//! Operators, comparisons and item access on values

use std::cmp::Ordering;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::engine::exceptions::{raise, ExcKind, ExceptionValue, Exec, Flow};
use crate::engine::format::percent_format;
use crate::engine::integer;
use crate::engine::value::{slice_positions, RangeValue, Table, Value, MAX_ITEMS};
use crate::parser::ast::{BinOp, UnaryOp};

/// Python truthiness
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::None => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Long(_) => true,
        Value::Float(f) => *f != 0.0,
        Value::Complex(re, im) => *re != 0.0 || *im != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::Bytes(b) => !b.is_empty(),
        Value::List(l) => !l.borrow().is_empty(),
        Value::Tuple(t) => !t.is_empty(),
        Value::Dict(d) | Value::Set(d) => !d.borrow().is_empty(),
        Value::FrozenSet(s) => !s.is_empty(),
        Value::Range(r) => !r.is_empty(),
        Value::View(v) => !v.dict.borrow().is_empty(),
        _ => true,
    }
}

/// Numeric view of a value, when it has one
#[derive(Debug, Clone, Copy)]
enum Num<'a> {
    Int(i64),
    Long(&'a BigInt),
    Float(f64),
    Complex(f64, f64),
}

fn as_num(value: &Value) -> Option<Num<'_>> {
    match value {
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Long(n) => Some(Num::Long(n)),
        Value::Float(f) => Some(Num::Float(*f)),
        Value::Complex(re, im) => Some(Num::Complex(*re, *im)),
        _ => None,
    }
}

fn to_big(n: Num<'_>) -> Option<BigInt> {
    match n {
        Num::Int(i) => Some(BigInt::from(i)),
        Num::Long(n) => Some(n.clone()),
        _ => None,
    }
}

/// Exact ordering of two real numbers; `None` when either is NaN or complex
fn real_cmp(x: Num<'_>, y: Num<'_>) -> Option<Ordering> {
    const EXACT: u64 = 1 << 53;
    match (x, y) {
        (Num::Int(i), Num::Int(j)) => Some(i.cmp(&j)),
        (Num::Float(f), Num::Float(g)) => f.partial_cmp(&g),
        (Num::Int(i), Num::Float(f)) if i.unsigned_abs() <= EXACT => (i as f64).partial_cmp(&f),
        (Num::Int(_) | Num::Long(_), Num::Float(f)) => integer::cmp_float(&to_big(x)?, f),
        (Num::Float(_), Num::Int(_) | Num::Long(_)) => real_cmp(y, x).map(Ordering::reverse),
        (Num::Int(_) | Num::Long(_), Num::Int(_) | Num::Long(_)) => Some(to_big(x)?.cmp(&to_big(y)?)),
        _ => None,
    }
}

/// Python `==`
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return match (x, y) {
            (Num::Complex(re, im), Num::Complex(ore, oim)) => re == ore && im == oim,
            (Num::Complex(re, im), other) | (other, Num::Complex(re, im)) => {
                im == 0.0 && real_cmp(other, Num::Float(re)) == Some(Ordering::Equal)
            }
            _ => real_cmp(x, y) == Some(Ordering::Equal),
        };
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || sequences_equal(&x.borrow(), &y.borrow())
        }
        (Value::Tuple(x), Value::Tuple(y)) => sequences_equal(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, v)| match k.hash_key() {
                    Ok(hash) => y.get(&hash).map_or(false, |w| v.is(w) || values_equal(v, w)),
                    Err(_) => false,
                })
        }
        (Value::Set(_) | Value::FrozenSet(_), Value::Set(_) | Value::FrozenSet(_)) => {
            with_table(a, |x| with_table(b, |y| x.len() == y.len() && x.hash_keys().all(|k| y.contains(k))))
        }
        (Value::Range(x), Value::Range(y)) => {
            let (lx, ly) = (x.len(), y.len());
            lx == ly && (lx == 0 || (x.start == y.start && (lx == 1 || x.step == y.step)))
        }
        (Value::Slice(x), Value::Slice(y)) => {
            values_equal(&x.start, &y.start)
                && values_equal(&x.stop, &y.stop)
                && values_equal(&x.step, &y.step)
        }
        _ => a.is(b),
    }
}

fn sequences_equal(x: &[Value], y: &[Value]) -> bool {
    x.len() == y.len() && x.iter().zip(y).all(|(a, b)| a.is(b) || values_equal(a, b))
}

/// Run `f` against the table behind a set or frozenset
pub fn with_table<R>(value: &Value, f: impl FnOnce(&Table) -> R) -> R {
    match value {
        Value::Set(t) | Value::Dict(t) => f(&t.borrow()),
        Value::FrozenSet(t) => f(t),
        _ => f(&Table::new()),
    }
}

fn is_set_like(value: &Value) -> bool {
    matches!(value, Value::Set(_) | Value::FrozenSet(_))
}

fn order_error<T>(symbol: &str, a: &Value, b: &Value) -> Exec<T> {
    raise(
        ExcKind::TypeError,
        format!(
            "'{}' not supported between instances of '{}' and '{}'",
            symbol,
            a.type_name(),
            b.type_name()
        ),
    )
}

/// Ordering used by `<`, `sorted`, `min` and `max`; `None` for unordered
/// values such as NaN
pub fn compare_values(a: &Value, b: &Value, symbol: &str) -> Exec<Option<Ordering>> {
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return match (x, y) {
            (Num::Complex(..), _) | (_, Num::Complex(..)) => order_error(symbol, a, b),
            _ => Ok(real_cmp(x, y)),
        };
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::Bytes(x), Value::Bytes(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            compare_sequences(&x, &y, symbol)
        }
        (Value::Tuple(x), Value::Tuple(y)) => compare_sequences(x, y, symbol),
        _ => order_error(symbol, a, b),
    }
}

fn compare_sequences(x: &[Value], y: &[Value], symbol: &str) -> Exec<Option<Ordering>> {
    for (a, b) in x.iter().zip(y) {
        if a.is(b) || values_equal(a, b) {
            continue;
        }
        return compare_values(a, b, symbol);
    }
    Ok(Some(x.len().cmp(&y.len())))
}

/// `<`, `<=`, `>`, `>=`
pub fn order(symbol: &str, a: &Value, b: &Value) -> Exec<bool> {
    if is_set_like(a) && is_set_like(b) {
        return Ok(with_table(a, |x| {
            with_table(b, |y| {
                let subset = x.hash_keys().all(|k| y.contains(k));
                let superset = y.hash_keys().all(|k| x.contains(k));
                match symbol {
                    "<" => subset && x.len() < y.len(),
                    "<=" => subset,
                    ">" => superset && x.len() > y.len(),
                    _ => superset,
                }
            })
        }));
    }
    let ordering = compare_values(a, b, symbol)?;
    Ok(match (symbol, ordering) {
        (_, None) => false,
        ("<", Some(o)) => o == Ordering::Less,
        ("<=", Some(o)) => o != Ordering::Greater,
        (">", Some(o)) => o == Ordering::Greater,
        (_, Some(o)) => o != Ordering::Less,
    })
}

/// `item in container` for containers that need no iteration protocol
pub fn contains(container: &Value, item: &Value) -> Exec<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => raise(
                ExcKind::TypeError,
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            ),
        },
        Value::Bytes(b) => match item {
            Value::Bytes(needle) => Ok(needle.is_empty()
                || b.windows(needle.len()).any(|w| w == &needle[..])),
            Value::Int(i) => Ok(b.iter().any(|&byte| byte as i64 == *i)),
            other => raise(
                ExcKind::TypeError,
                format!("a bytes-like object is required, not '{}'", other.type_name()),
            ),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.is(item) || values_equal(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.is(item) || values_equal(v, item))),
        Value::Dict(table) | Value::Set(table) => Ok(table.borrow().contains(&item.hash_key()?)),
        Value::FrozenSet(table) => Ok(table.contains(&item.hash_key()?)),
        Value::Range(r) => Ok(match item {
            Value::Int(i) => r.contains(*i),
            Value::Bool(b) => r.contains(*b as i64),
            Value::Float(f) if f.fract() == 0.0 => r.contains(*f as i64),
            _ => false,
        }),
        Value::View(view) => {
            let table = view.dict.borrow();
            match view.kind {
                crate::engine::value::ViewKind::Keys => Ok(table.contains(&item.hash_key()?)),
                crate::engine::value::ViewKind::Values => {
                    Ok(table.values().any(|v| v.is(item) || values_equal(v, item)))
                }
                crate::engine::value::ViewKind::Items => match item {
                    Value::Tuple(pair) if pair.len() == 2 => {
                        Ok(match table.get(&pair[0].hash_key()?) {
                            Some(v) => values_equal(v, &pair[1]),
                            None => false,
                        })
                    }
                    _ => Ok(false),
                },
            }
        }
        other => raise(
            ExcKind::TypeError,
            format!("argument of type '{}' is not iterable", other.type_name()),
        ),
    }
}

// ============================================================================
// Arithmetic
// ============================================================================

fn unsupported<T>(op: BinOp, a: &Value, b: &Value) -> Exec<T> {
    let symbol = if op == BinOp::Pow { "** or pow()" } else { op.symbol() };
    raise(
        ExcKind::TypeError,
        format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            symbol,
            a.type_name(),
            b.type_name()
        ),
    )
}

fn to_complex(n: Num<'_>) -> Exec<(f64, f64)> {
    Ok(match n {
        Num::Complex(re, im) => (re, im),
        other => (to_float(other)?, 0.0),
    })
}

fn to_float(n: Num<'_>) -> Exec<f64> {
    match n {
        Num::Int(i) => Ok(i as f64),
        Num::Long(n) => integer::to_f64(n),
        Num::Float(f) => Ok(f),
        Num::Complex(re, _) => Ok(re),
    }
}

fn int_floordiv(a: i64, b: i64) -> Exec<Option<i64>> {
    if b == 0 {
        return raise(ExcKind::ZeroDivisionError, "integer division or modulo by zero");
    }
    let Some(q) = a.checked_div(b) else {
        return Ok(None);
    };
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(Some(q - 1))
    } else {
        Ok(Some(q))
    }
}

fn int_mod(a: i64, b: i64) -> Exec<i64> {
    if b == 0 {
        return raise(ExcKind::ZeroDivisionError, "integer modulo by zero");
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

pub fn float_mod(a: f64, b: f64) -> Exec<f64> {
    if b == 0.0 {
        return raise(ExcKind::ZeroDivisionError, "float modulo by zero");
    }
    let mut r = a % b;
    if r != 0.0 {
        if (r < 0.0) != (b < 0.0) {
            r += b;
        }
    } else {
        r = 0.0f64.copysign(b);
    }
    Ok(r)
}

fn float_floordiv(a: f64, b: f64) -> Exec<f64> {
    if b == 0.0 {
        return raise(ExcKind::ZeroDivisionError, "float floor division by zero");
    }
    Ok(((a - float_mod(a, b)?) / b).round())
}

fn complex_div(a: (f64, f64), b: (f64, f64)) -> Exec<Value> {
    let denom = b.0 * b.0 + b.1 * b.1;
    if denom == 0.0 {
        return raise(ExcKind::ZeroDivisionError, "complex division by zero");
    }
    Ok(Value::Complex(
        (a.0 * b.0 + a.1 * b.1) / denom,
        (a.1 * b.0 - a.0 * b.1) / denom,
    ))
}

fn complex_pow(base: (f64, f64), exp: (f64, f64)) -> Exec<Value> {
    if base == (0.0, 0.0) {
        if exp.1 != 0.0 || exp.0 < 0.0 {
            return raise(
                ExcKind::ZeroDivisionError,
                "0.0 to a negative or complex power",
            );
        }
        return Ok(if exp == (0.0, 0.0) {
            Value::Complex(1.0, 0.0)
        } else {
            Value::Complex(0.0, 0.0)
        });
    }
    let modulus = (base.0 * base.0 + base.1 * base.1).sqrt();
    let arg = base.1.atan2(base.0);
    let ln_mod = modulus.ln();
    let new_mod = (exp.0 * ln_mod - exp.1 * arg).exp();
    let new_arg = exp.1 * ln_mod + exp.0 * arg;
    Ok(Value::Complex(new_mod * new_arg.cos(), new_mod * new_arg.sin()))
}


fn float_pow(base: f64, exp: f64) -> Exec<Value> {
    if base == 0.0 && exp < 0.0 {
        return raise(
            ExcKind::ZeroDivisionError,
            "0.0 cannot be raised to a negative power",
        );
    }
    if base < 0.0 && exp.fract() != 0.0 && exp.is_finite() {
        return complex_pow((base, 0.0), (exp, 0.0));
    }
    let result = base.powf(exp);
    if result.is_infinite() && base.is_finite() && exp.is_finite() {
        return raise(ExcKind::OverflowError, "(34, 'Numerical result out of range')");
    }
    Ok(Value::Float(result))
}

/// `i64` arithmetic; `None` when the result needs a wider int
fn small_binary(op: BinOp, i: i64, j: i64, both_bool: bool) -> Exec<Option<Value>> {
    let value = match op {
        BinOp::Add => i.checked_add(j).map(Value::Int),
        BinOp::Sub => i.checked_sub(j).map(Value::Int),
        BinOp::Mul => i.checked_mul(j).map(Value::Int),
        BinOp::Div => {
            if j == 0 {
                return raise(ExcKind::ZeroDivisionError, "division by zero");
            }
            if i.unsigned_abs() > 1 << 53 || j.unsigned_abs() > 1 << 53 {
                None
            } else {
                Some(Value::Float(i as f64 / j as f64))
            }
        }
        BinOp::FloorDiv => int_floordiv(i, j)?.map(Value::Int),
        BinOp::Mod => Some(Value::Int(int_mod(i, j)?)),
        BinOp::Pow if j >= 0 => u32::try_from(j)
            .ok()
            .and_then(|e| i.checked_pow(e))
            .map(Value::Int),
        BinOp::LShift if j >= 0 && i == 0 => Some(Value::Int(0)),
        BinOp::LShift if (0..64).contains(&j) => i
            .checked_shl(j as u32)
            .filter(|v| v >> j == i)
            .map(Value::Int),
        BinOp::RShift if j >= 0 => Some(Value::Int(if j >= 64 {
            if i < 0 {
                -1
            } else {
                0
            }
        } else {
            i >> j
        })),
        BinOp::BitAnd if both_bool => Some(Value::Bool(i & j != 0)),
        BinOp::BitOr if both_bool => Some(Value::Bool(i | j != 0)),
        BinOp::BitXor if both_bool => Some(Value::Bool(i ^ j != 0)),
        BinOp::BitAnd => Some(Value::Int(i & j)),
        BinOp::BitOr => Some(Value::Int(i | j)),
        BinOp::BitXor => Some(Value::Int(i ^ j)),
        _ => None,
    };
    Ok(value)
}

fn numeric_binary(op: BinOp, x: Num<'_>, y: Num<'_>, a: &Value, b: &Value) -> Exec<Value> {
    if op == BinOp::MatMul {
        return unsupported(op, a, b);
    }
    if let (Num::Int(i), Num::Int(j)) = (x, y) {
        let both_bool = matches!((a, b), (Value::Bool(_), Value::Bool(_)));
        if let Some(value) = small_binary(op, i, j, both_bool)? {
            return Ok(value);
        }
    }
    if let (Some(i), Some(j)) = (to_big(x), to_big(y)) {
        return integer::binary(op, &i, &j);
    }

    if matches!(x, Num::Complex(..)) || matches!(y, Num::Complex(..)) {
        let (p, q) = (to_complex(x)?, to_complex(y)?);
        return match op {
            BinOp::Add => Ok(Value::Complex(p.0 + q.0, p.1 + q.1)),
            BinOp::Sub => Ok(Value::Complex(p.0 - q.0, p.1 - q.1)),
            BinOp::Mul => Ok(Value::Complex(p.0 * q.0 - p.1 * q.1, p.0 * q.1 + p.1 * q.0)),
            BinOp::Div => complex_div(p, q),
            BinOp::Pow => complex_pow(p, q),
            _ => unsupported(op, a, b),
        };
    }

    let (f, g) = (to_float(x)?, to_float(y)?);
    match op {
        BinOp::Add => Ok(Value::Float(f + g)),
        BinOp::Sub => Ok(Value::Float(f - g)),
        BinOp::Mul => Ok(Value::Float(f * g)),
        BinOp::Div => {
            if g == 0.0 {
                raise(ExcKind::ZeroDivisionError, "float division by zero")
            } else {
                Ok(Value::Float(f / g))
            }
        }
        BinOp::FloorDiv => Ok(Value::Float(float_floordiv(f, g)?)),
        BinOp::Mod => Ok(Value::Float(float_mod(f, g)?)),
        BinOp::Pow => float_pow(f, g),
        _ => unsupported(op, a, b),
    }
}

fn repeat_count(value: &Value) -> Exec<Option<i64>> {
    match value {
        Value::Int(i) => Ok(Some(*i)),
        Value::Bool(b) => Ok(Some(*b as i64)),
        Value::Long(_) => raise(
            ExcKind::OverflowError,
            "cannot fit 'int' into an index-sized integer",
        ),
        _ => Ok(None),
    }
}

pub fn memory_error<T>() -> Exec<T> {
    Err(Flow::Raise(Rc::new(ExceptionValue::new(ExcKind::MemoryError, vec![]))))
}

/// Refuse to build a string or sequence longer than [`MAX_ITEMS`]
pub fn check_size(len: usize) -> Exec<()> {
    if len > MAX_ITEMS {
        return memory_error();
    }
    Ok(())
}

/// Repeat a sequence, guarding against runaway sizes
fn repeat(seq: &Value, count: i64) -> Exec<Value> {
    let count = count.max(0) as usize;
    let unit = match seq {
        Value::Str(s) => s.len(),
        Value::Bytes(b) => b.len(),
        Value::List(l) => l.borrow().len(),
        Value::Tuple(t) => t.len(),
        _ => 0,
    };
    if unit.saturating_mul(count) > MAX_ITEMS {
        return memory_error();
    }
    Ok(match seq {
        Value::Str(s) => Value::from(s.repeat(count)),
        Value::Bytes(b) => Value::bytes(b.repeat(count)),
        Value::List(l) => {
            let items = l.borrow();
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Value::list(out)
        }
        Value::Tuple(t) => {
            let mut out = Vec::with_capacity(t.len() * count);
            for _ in 0..count {
                out.extend(t.iter().cloned());
            }
            Value::tuple(out)
        }
        other => other.clone(),
    })
}

fn concat_error<T>(a: &Value, b: &Value) -> Exec<T> {
    raise(
        ExcKind::TypeError,
        format!(
            "can only concatenate {} (not \"{}\") to {}",
            a.type_name(),
            b.type_name(),
            a.type_name()
        ),
    )
}

pub fn set_operation(op: BinOp, a: &Value, b: &Value) -> Exec<Value> {
    let result = with_table(a, |x| {
        with_table(b, |y| {
            let mut out = Table::new();
            match op {
                BinOp::BitOr => {
                    for k in x.keys().chain(y.keys()) {
                        out.add(k.clone())?;
                    }
                }
                BinOp::BitAnd => {
                    for (h, k) in x.hash_keys().zip(x.keys()) {
                        if y.contains(h) {
                            out.add(k.clone())?;
                        }
                    }
                }
                BinOp::Sub => {
                    for (h, k) in x.hash_keys().zip(x.keys()) {
                        if !y.contains(h) {
                            out.add(k.clone())?;
                        }
                    }
                }
                _ => {
                    for (h, k) in x.hash_keys().zip(x.keys()) {
                        if !y.contains(h) {
                            out.add(k.clone())?;
                        }
                    }
                    for (h, k) in y.hash_keys().zip(y.keys()) {
                        if !x.contains(h) {
                            out.add(k.clone())?;
                        }
                    }
                }
            }
            Ok(out)
        })
    })?;
    Ok(match a {
        Value::FrozenSet(_) => Value::FrozenSet(Rc::new(result)),
        _ => Value::set(result),
    })
}

/// Binary operators other than comparisons and boolean operators
pub fn binary(op: BinOp, a: &Value, b: &Value) -> Exec<Value> {
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return numeric_binary(op, x, y, a, b);
    }

    match op {
        BinOp::Add => match (a, b) {
            (Value::Str(x), Value::Str(y)) => {
                let mut s = String::with_capacity(x.len() + y.len());
                s.push_str(x);
                s.push_str(y);
                Ok(Value::from(s))
            }
            (Value::Bytes(x), Value::Bytes(y)) => Ok(Value::bytes([&x[..], &y[..]].concat())),
            (Value::List(x), Value::List(y)) => {
                let mut items = x.borrow().clone();
                items.extend(y.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            (Value::Tuple(x), Value::Tuple(y)) => {
                Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
            }
            (Value::Str(_) | Value::List(_) | Value::Tuple(_), _) => concat_error(a, b),
            (Value::Bytes(_), _) => raise(
                ExcKind::TypeError,
                format!("can't concat {} to bytes", b.type_name()),
            ),
            _ => unsupported(op, a, b),
        },
        BinOp::Mul => match (a, b) {
            (Value::Str(_) | Value::Bytes(_) | Value::List(_) | Value::Tuple(_), n) => {
                match repeat_count(n)? {
                    Some(count) => repeat(a, count),
                    None => raise(
                        ExcKind::TypeError,
                        format!("can't multiply sequence by non-int of type '{}'", n.type_name()),
                    ),
                }
            }
            (n, Value::Str(_) | Value::Bytes(_) | Value::List(_) | Value::Tuple(_)) => {
                match repeat_count(n)? {
                    Some(count) => repeat(b, count),
                    None => raise(
                        ExcKind::TypeError,
                        format!("can't multiply sequence by non-int of type '{}'", n.type_name()),
                    ),
                }
            }
            _ => unsupported(op, a, b),
        },
        BinOp::Mod => match a {
            Value::Str(template) => Ok(Value::from(percent_format(template, b)?)),
            _ => unsupported(op, a, b),
        },
        BinOp::BitOr | BinOp::BitAnd | BinOp::BitXor | BinOp::Sub
            if is_set_like(a) && is_set_like(b) =>
        {
            set_operation(op, a, b)
        }
        BinOp::BitOr => match (a, b) {
            (Value::Dict(x), Value::Dict(y)) => {
                let mut merged = x.borrow().clone();
                for (k, v) in y.borrow().iter() {
                    merged.insert(k.hash_key()?, k.clone(), v.clone());
                }
                Ok(Value::dict(merged))
            }
            _ => unsupported(op, a, b),
        },
        _ => unsupported(op, a, b),
    }
}

/// Unary `-`, `+`, `~`, `not`
pub fn unary(op: UnaryOp, value: &Value) -> Exec<Value> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!truthy(value)));
    }
    let symbol = match op {
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        _ => "~",
    };
    match (op, as_num(value)) {
        (UnaryOp::Neg, Some(Num::Int(i))) => Ok(match i.checked_neg() {
            Some(negated) => Value::Int(negated),
            None => integer::normalize(-BigInt::from(i)),
        }),
        (UnaryOp::Neg, Some(Num::Long(n))) => Ok(integer::normalize(-n.clone())),
        (UnaryOp::Neg, Some(Num::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Some(Num::Complex(re, im))) => Ok(Value::Complex(-re, -im)),
        (UnaryOp::Pos, Some(Num::Int(i))) => Ok(Value::Int(i)),
        (UnaryOp::Pos, Some(Num::Long(_))) => Ok(value.clone()),
        (UnaryOp::Pos, Some(Num::Float(f))) => Ok(Value::Float(f)),
        (UnaryOp::Pos, Some(Num::Complex(re, im))) => Ok(Value::Complex(re, im)),
        (UnaryOp::Invert, Some(Num::Int(i))) => Ok(Value::Int(!i)),
        (UnaryOp::Invert, Some(Num::Long(n))) => Ok(integer::normalize(-(n + BigInt::from(1)))),
        _ => raise(
            ExcKind::TypeError,
            format!("bad operand type for unary {}: '{}'", symbol, value.type_name()),
        ),
    }
}

// ============================================================================
// Length and item access
// ============================================================================

pub fn len(value: &Value) -> Exec<usize> {
    match value {
        Value::Str(s) => Ok(if s.is_ascii() { s.len() } else { s.chars().count() }),
        Value::Bytes(b) => Ok(b.len()),
        Value::List(l) => Ok(l.borrow().len()),
        Value::Tuple(t) => Ok(t.len()),
        Value::Dict(d) | Value::Set(d) => Ok(d.borrow().len()),
        Value::FrozenSet(s) => Ok(s.len()),
        Value::Range(r) => match i64::try_from(r.count()) {
            Ok(n) => Ok(n as usize),
            Err(_) => integer::index_overflow(),
        },
        Value::View(v) => Ok(v.dict.borrow().len()),
        other => raise(
            ExcKind::TypeError,
            format!("object of type '{}' has no len()", other.type_name()),
        ),
    }
}

/// Integer value of an index-like operand
pub fn as_index(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

/// Subscript of a sequence, which must fit an `i64`
fn sequence_index(container: &Value, index: &Value) -> Exec<i64> {
    match index {
        Value::Long(_) => raise(
            ExcKind::IndexError,
            "cannot fit 'int' into an index-sized integer",
        ),
        _ => match as_index(index) {
            Some(i) => Ok(i),
            None => index_type_error(container, index),
        },
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    if resolved < 0 || resolved >= len {
        None
    } else {
        Some(resolved as usize)
    }
}

fn char_at(s: &str, index: usize) -> Option<char> {
    if s.is_ascii() {
        s.as_bytes().get(index).map(|&b| b as char)
    } else {
        s.chars().nth(index)
    }
}

fn index_type_error<T>(container: &Value, index: &Value) -> Exec<T> {
    let message = match container {
        Value::Str(_) => format!("string indices must be integers, not '{}'", index.type_name()),
        Value::Bytes(_) => format!("byte indices must be integers or slices, not {}", index.type_name()),
        Value::Range(_) => format!("range indices must be integers or slices, not {}", index.type_name()),
        other => format!(
            "{} indices must be integers or slices, not {}",
            other.type_name(),
            index.type_name()
        ),
    };
    raise(ExcKind::TypeError, message)
}

/// KeyError carrying the missing key
pub fn key_error(key: &Value) -> Flow {
    Flow::Raise(Rc::new(ExceptionValue::new(ExcKind::KeyError, vec![key.clone()])))
}

/// Indexing and slicing a range without materializing it
fn range_item(r: &RangeValue, index: &Value) -> Exec<Value> {
    let count = r.count() as i128;
    let at = |position: i128| r.start as i128 + position * r.step as i128;

    if let Value::Slice(slice) = index {
        let (start, stop, step) = slice.wide_indices(count)?;
        let step = match i64::try_from(r.step as i128 * step) {
            Ok(step) => step,
            Err(_) => return integer::index_overflow(),
        };
        // a stop past the i64 edge selects the same elements as the edge itself
        let stop = at(stop).clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        return Ok(Value::Range(RangeValue {
            start: at(start).clamp(i64::MIN as i128, i64::MAX as i128) as i64,
            stop,
            step,
        }));
    }

    let raw = match index {
        // past either end of any range
        Value::Long(_) => return raise(ExcKind::IndexError, "range object index out of range"),
        _ => match as_index(index) {
            Some(i) => i as i128,
            None => return index_type_error(&Value::Range(*r), index),
        },
    };
    let position = if raw < 0 { raw + count } else { raw };
    if position < 0 || position >= count {
        return raise(ExcKind::IndexError, "range object index out of range");
    }
    Ok(Value::Int(at(position) as i64))
}

/// `container[index]`
pub fn get_item(container: &Value, index: &Value) -> Exec<Value> {
    if let Value::Dict(table) = container {
        let hash = index.hash_key()?;
        return match table.borrow().get(&hash) {
            Some(v) => Ok(v.clone()),
            None => Err(key_error(index)),
        };
    }
    if let Value::Range(r) = container {
        return range_item(r, index);
    }

    let length = match container {
        Value::Str(_) | Value::Bytes(_) | Value::List(_) | Value::Tuple(_) | Value::Range(_) => {
            len(container)?
        }
        Value::Type(kind) => {
            return raise(
                ExcKind::TypeError,
                format!("type '{}' is not subscriptable", kind.name()),
            )
        }
        other => {
            return raise(
                ExcKind::TypeError,
                format!("'{}' object is not subscriptable", other.type_name()),
            )
        }
    };

    if let Value::Slice(slice) = index {
        let (start, stop, step) = slice.indices(length)?;
        let positions = slice_positions(start, stop, step);
        return Ok(match container {
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Value::from(positions.iter().map(|&i| chars[i]).collect::<String>())
            }
            Value::Bytes(b) => Value::bytes(positions.iter().map(|&i| b[i]).collect()),
            Value::List(l) => {
                let items = l.borrow();
                Value::list(positions.iter().map(|&i| items[i].clone()).collect())
            }
            Value::Tuple(t) => Value::tuple(positions.iter().map(|&i| t[i].clone()).collect()),
            other => other.clone(),
        });
    }

    let raw = sequence_index(container, index)?;
    let position = match normalize_index(raw, length) {
        Some(p) => p,
        None => {
            let message = match container {
                Value::Str(_) => "string index out of range",
                Value::Bytes(_) => "index out of range",
                Value::List(_) => "list index out of range",
                Value::Tuple(_) => "tuple index out of range",
                _ => "range object index out of range",
            };
            return raise(ExcKind::IndexError, message);
        }
    };
    Ok(match container {
        Value::Str(s) => Value::from(char_at(s, position).map(String::from).unwrap_or_default()),
        Value::Bytes(b) => Value::Int(b[position] as i64),
        Value::List(l) => l.borrow()[position].clone(),
        Value::Tuple(t) => t[position].clone(),
        other => other.clone(),
    })
}

/// `container[index] = value`; slice assignment receives the collected items
pub fn set_item(container: &Value, index: &Value, value: Value, items: Option<Vec<Value>>) -> Exec<()> {
    match container {
        Value::Dict(table) => {
            let hash = index.hash_key()?;
            table.borrow_mut().insert(hash, index.clone(), value);
            Ok(())
        }
        Value::List(list) => {
            if let Value::Slice(slice) = index {
                let new_items = items.unwrap_or_default();
                let length = list.borrow().len();
                let (start, stop, step) = slice.indices(length)?;
                let mut list = list.borrow_mut();
                if step == 1 {
                    let stop = stop.max(start) as usize;
                    list.splice(start as usize..stop, new_items);
                    return Ok(());
                }
                let positions = slice_positions(start, stop, step);
                if positions.len() != new_items.len() {
                    return raise(
                        ExcKind::ValueError,
                        format!(
                            "attempt to assign sequence of size {} to extended slice of size {}",
                            new_items.len(),
                            positions.len()
                        ),
                    );
                }
                for (pos, item) in positions.into_iter().zip(new_items) {
                    list[pos] = item;
                }
                return Ok(());
            }
            let raw = sequence_index(container, index)?;
            let mut list = list.borrow_mut();
            match normalize_index(raw, list.len()) {
                Some(pos) => {
                    list[pos] = value;
                    Ok(())
                }
                None => raise(ExcKind::IndexError, "list assignment index out of range"),
            }
        }
        other => raise(
            ExcKind::TypeError,
            format!("'{}' object does not support item assignment", other.type_name()),
        ),
    }
}

/// `del container[index]`
pub fn del_item(container: &Value, index: &Value) -> Exec<()> {
    match container {
        Value::Dict(table) => {
            let hash = index.hash_key()?;
            match table.borrow_mut().remove(&hash) {
                Some(_) => Ok(()),
                None => Err(key_error(index)),
            }
        }
        Value::List(list) => {
            let length = list.borrow().len();
            if let Value::Slice(slice) = index {
                let (start, stop, step) = slice.indices(length)?;
                let mut positions = slice_positions(start, stop, step);
                positions.sort_unstable();
                let mut list = list.borrow_mut();
                for pos in positions.into_iter().rev() {
                    list.remove(pos);
                }
                return Ok(());
            }
            let raw = sequence_index(container, index)?;
            match normalize_index(raw, length) {
                Some(pos) => {
                    list.borrow_mut().remove(pos);
                    Ok(())
                }
                None => raise(ExcKind::IndexError, "list assignment index out of range"),
            }
        }
        other => raise(
            ExcKind::TypeError,
            format!("'{}' object doesn't support item deletion", other.type_name()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_floor_division_and_modulo_follow_sign_of_divisor() {
        assert!(matches!(binary(BinOp::FloorDiv, &int(-7), &int(2)).unwrap(), Value::Int(-4)));
        assert!(matches!(binary(BinOp::Mod, &int(-7), &int(2)).unwrap(), Value::Int(1)));
        assert!(matches!(binary(BinOp::Mod, &int(7), &int(-2)).unwrap(), Value::Int(-1)));
        match binary(BinOp::Mod, &Value::Float(-7.5), &int(2)).unwrap() {
            Value::Float(f) => assert_eq!(f, 0.5),
            other => panic!("Expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_true_division_returns_float() {
        match binary(BinOp::Div, &int(7), &int(2)).unwrap() {
            Value::Float(f) => assert_eq!(f, 3.5),
            other => panic!("Expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_division_by_zero_messages() {
        for (op, a, expected) in [
            (BinOp::Div, int(1), "division by zero"),
            (BinOp::FloorDiv, int(1), "integer division or modulo by zero"),
            (BinOp::Div, Value::Float(1.0), "float division by zero"),
        ] {
            match binary(op, &a, &int(0)) {
                Err(Flow::Raise(exc)) => {
                    assert_eq!(exc.kind, ExcKind::ZeroDivisionError);
                    assert_eq!(exc.message(), expected);
                }
                other => panic!("Expected ZeroDivisionError, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_integer_results_widen_past_64_bits() {
        let big = binary(BinOp::Pow, &int(10), &int(30)).unwrap();
        assert!(matches!(big, Value::Long(_)));
        assert_eq!(format!("{:?}", big), "1000000000000000000000000000000");
        let back = binary(BinOp::FloorDiv, &big, &binary(BinOp::Pow, &int(10), &int(28)).unwrap());
        assert!(matches!(back.unwrap(), Value::Int(100)));
        assert!(matches!(binary(BinOp::Pow, &int(2), &int(62)).unwrap(), Value::Int(_)));
        let min = unary(UnaryOp::Neg, &int(i64::MIN)).unwrap();
        assert_eq!(format!("{:?}", min), "9223372036854775808");
        assert!(matches!(unary(UnaryOp::Invert, &min).unwrap(), Value::Int(i64::MIN)));
        assert!(matches!(binary(BinOp::FloorDiv, &int(i64::MIN), &int(-1)).unwrap(), Value::Long(_)));
    }

    #[test]
    fn test_wide_ints_compare_exactly() {
        let two_64 = binary(BinOp::LShift, &int(1), &int(64)).unwrap();
        assert!(values_equal(&two_64, &Value::Float(18446744073709551616.0)));
        assert!(order(">", &two_64, &int(i64::MAX)).unwrap());
        assert!(order("<", &two_64, &Value::Float(f64::INFINITY)).unwrap());
        let odd = binary(BinOp::Add, &int(1 << 53), &int(1)).unwrap();
        assert!(!values_equal(&odd, &Value::Float(9007199254740992.0)));
        assert!(order(">", &odd, &Value::Float(9007199254740992.0)).unwrap());
        match binary(BinOp::Mul, &two_64, &Value::Float(1e308)) {
            Ok(Value::Float(f)) => assert!(f.is_infinite()),
            other => panic!("Expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_wide_int_as_index() {
        let two_64 = binary(BinOp::LShift, &int(1), &int(64)).unwrap();
        let list = Value::list(vec![int(1)]);
        match get_item(&list, &two_64) {
            Err(Flow::Raise(exc)) => {
                assert_eq!(exc.kind, ExcKind::IndexError);
                assert_eq!(exc.message(), "cannot fit 'int' into an index-sized integer");
            }
            other => panic!("Expected IndexError, got {:?}", other),
        }
        match binary(BinOp::Mul, &Value::from("x"), &two_64) {
            Err(Flow::Raise(exc)) => assert_eq!(exc.kind, ExcKind::OverflowError),
            other => panic!("Expected OverflowError, got {:?}", other),
        }
    }

    #[test]
    fn test_concatenation_errors() {
        match binary(BinOp::Add, &Value::from("a"), &int(1)) {
            Err(Flow::Raise(exc)) => {
                assert_eq!(exc.message(), "can only concatenate str (not \"int\") to str")
            }
            other => panic!("Expected TypeError, got {:?}", other),
        }
        match binary(BinOp::Add, &int(1), &Value::from("a")) {
            Err(Flow::Raise(exc)) => assert_eq!(
                exc.message(),
                "unsupported operand type(s) for +: 'int' and 'str'"
            ),
            other => panic!("Expected TypeError, got {:?}", other),
        }
    }

    #[test]
    fn test_repetition_guard() {
        assert!(matches!(
            binary(BinOp::Mul, &Value::from("ab"), &int(3)).unwrap(),
            Value::Str(s) if &*s == "ababab"
        ));
        match binary(BinOp::Mul, &Value::from("x"), &int(1 << 40)) {
            Err(Flow::Raise(exc)) => assert_eq!(exc.kind, ExcKind::MemoryError),
            other => panic!("Expected MemoryError, got {:?}", other),
        }
    }

    #[test]
    fn test_equality_across_numeric_types() {
        assert!(values_equal(&int(1), &Value::Float(1.0)));
        assert!(values_equal(&Value::Bool(true), &int(1)));
        assert!(!values_equal(&int(1), &Value::from("1")));
        let a = Value::list(vec![int(1), Value::tuple(vec![int(2)])]);
        let b = Value::list(vec![Value::Float(1.0), Value::tuple(vec![int(2)])]);
        assert!(values_equal(&a, &b));
    }

    #[test]
    fn test_ordering() {
        assert!(order("<", &int(1), &Value::Float(1.5)).unwrap());
        assert!(order("<", &Value::from("apple"), &Value::from("banana")).unwrap());
        let a = Value::tuple(vec![int(1), int(2)]);
        let b = Value::tuple(vec![int(1), int(3)]);
        assert!(order("<", &a, &b).unwrap());
        assert!(order("<", &int(1), &Value::from("a")).is_err());
        assert!(!order("<", &Value::Float(f64::NAN), &int(1)).unwrap());
    }

    #[test]
    fn test_indexing_and_slicing() {
        let list = Value::list(vec![int(10), int(20), int(30)]);
        assert!(matches!(get_item(&list, &int(-1)).unwrap(), Value::Int(30)));
        match get_item(&list, &int(3)) {
            Err(Flow::Raise(exc)) => assert_eq!(exc.message(), "list index out of range"),
            other => panic!("Expected IndexError, got {:?}", other),
        }
        let text = Value::from("hello");
        let slice = Value::Slice(Rc::new(crate::engine::value::SliceValue {
            start: Value::None,
            stop: Value::None,
            step: int(-1),
        }));
        assert!(matches!(get_item(&text, &slice).unwrap(), Value::Str(s) if &*s == "olleh"));
    }

    #[test]
    fn test_missing_dict_key() {
        let dict = Value::dict(Table::new());
        match get_item(&dict, &Value::from("k")) {
            Err(Flow::Raise(exc)) => {
                assert_eq!(exc.kind, ExcKind::KeyError);
                assert_eq!(exc.message(), "'k'");
            }
            other => panic!("Expected KeyError, got {:?}", other),
        }
    }

    #[test]
    fn test_set_operations() {
        let a = Value::set(Table::from_keys(vec![int(1), int(2), int(3)]).unwrap());
        let b = Value::set(Table::from_keys(vec![int(2), int(3), int(4)]).unwrap());
        assert_eq!(len(&binary(BinOp::BitAnd, &a, &b).unwrap()).unwrap(), 2);
        assert_eq!(len(&binary(BinOp::BitOr, &a, &b).unwrap()).unwrap(), 4);
        assert_eq!(len(&binary(BinOp::Sub, &a, &b).unwrap()).unwrap(), 1);
        assert_eq!(len(&binary(BinOp::BitXor, &a, &b).unwrap()).unwrap(), 2);
    }
}

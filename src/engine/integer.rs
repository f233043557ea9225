//! Arbitrary-precision `int`
//!
//! An int that fits in an `i64` is a `Value::Int`; anything wider is a
//! `Value::Long`. [`normalize`] keeps that split, so equal ints always share
//! a variant and the `i64` fast paths in `ops` never see a `Long` that could
//! have been an `Int`.

use std::cmp::Ordering;
use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, One, Signed, ToPrimitive, Zero};

use crate::engine::exceptions::{raise, ExcKind, Exec};
use crate::engine::ops::memory_error;
use crate::engine::value::Value;
use crate::parser::ast::BinOp;

/// Widest int an operation may produce
pub const MAX_INT_BITS: u64 = 1 << 20;

/// Modulus of Python's numeric hash
const HASH_MODULUS: i64 = (1 << 61) - 1;

/// Wrap a big integer, narrowing it to `Value::Int` when it fits
pub fn normalize(n: BigInt) -> Value {
    match n.to_i64() {
        Some(i) => Value::Int(i),
        None => Value::Long(Rc::new(n)),
    }
}

/// Big-integer view of an `int` or `bool`
pub fn to_bigint(value: &Value) -> Option<BigInt> {
    match value {
        Value::Int(i) => Some(BigInt::from(*i)),
        Value::Bool(b) => Some(BigInt::from(*b as i64)),
        Value::Long(n) => Some((**n).clone()),
        _ => None,
    }
}

/// `float(n)`
pub fn to_f64(n: &BigInt) -> Exec<f64> {
    match n.to_f64() {
        Some(f) if f.is_finite() => Ok(f),
        _ => raise(ExcKind::OverflowError, "int too large to convert to float"),
    }
}

/// `int(f)`, truncating toward zero
pub fn from_f64(f: f64) -> Exec<Value> {
    if f.is_nan() {
        return raise(ExcKind::ValueError, "cannot convert float NaN to integer");
    }
    if f.is_infinite() {
        return raise(ExcKind::OverflowError, "cannot convert float infinity to integer");
    }
    let truncated = f.trunc();
    if truncated.abs() < 9.2e18 {
        return Ok(Value::Int(truncated as i64));
    }
    Ok(normalize(BigInt::from_f64(truncated).unwrap_or_default()))
}

fn check_bits(bits: u64) -> Exec<()> {
    if bits > MAX_INT_BITS {
        return memory_error();
    }
    Ok(())
}

/// Shift amount of `<<` and `>>`
fn shift_count(count: &BigInt) -> Exec<Option<u64>> {
    if count.is_negative() {
        return raise(ExcKind::ValueError, "negative shift count");
    }
    Ok(count.to_u64())
}

/// Integer arithmetic past the `i64` fast path
pub fn binary(op: BinOp, a: &BigInt, b: &BigInt) -> Exec<Value> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => {
            check_bits(a.bits() + b.bits())?;
            a * b
        }
        BinOp::Div => return true_divide(a, b).map(Value::Float),
        BinOp::FloorDiv => {
            if b.is_zero() {
                return raise(ExcKind::ZeroDivisionError, "integer division or modulo by zero");
            }
            a.div_floor(b)
        }
        BinOp::Mod => {
            if b.is_zero() {
                return raise(ExcKind::ZeroDivisionError, "integer modulo by zero");
            }
            a.mod_floor(b)
        }
        BinOp::Pow => return pow(a, b),
        BinOp::LShift => {
            let count = shift_count(b)?;
            if a.is_zero() {
                return Ok(Value::Int(0));
            }
            let Some(count) = count else {
                return memory_error();
            };
            check_bits(a.bits().saturating_add(count))?;
            a << count as usize
        }
        BinOp::RShift => match shift_count(b)? {
            Some(count) if count < a.bits() => a >> count as usize,
            _ if a.is_negative() => BigInt::from(-1),
            _ => BigInt::zero(),
        },
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::MatMul => {
            return raise(
                ExcKind::TypeError,
                "unsupported operand type(s) for @: 'int' and 'int'",
            )
        }
    };
    Ok(normalize(value))
}

/// `base ** exp`; a negative exponent gives a float
pub fn pow(base: &BigInt, exp: &BigInt) -> Exec<Value> {
    if exp.is_negative() {
        if base.is_zero() {
            return raise(
                ExcKind::ZeroDivisionError,
                "0.0 cannot be raised to a negative power",
            );
        }
        return Ok(Value::Float(to_f64(base)?.powf(to_f64(exp)?)));
    }
    if base.is_zero() || base.is_one() {
        return Ok(if exp.is_zero() {
            Value::Int(1)
        } else {
            normalize(base.clone())
        });
    }
    if *base == BigInt::from(-1) {
        return Ok(Value::Int(if exp.is_even() { 1 } else { -1 }));
    }
    let Some(exp) = exp.to_u64() else {
        return memory_error();
    };
    // |base| >= 2, so the result has more than (bits - 1) * exp bits
    check_bits((base.bits() - 1).saturating_mul(exp).saturating_add(1))?;
    Ok(normalize(base.pow(exp as u32)))
}

/// `pow(base, exp, modulus)`
pub fn mod_pow(base: &BigInt, exp: &BigInt, modulus: &BigInt) -> Exec<Value> {
    if modulus.is_zero() {
        return raise(ExcKind::ValueError, "pow() 3rd argument cannot be 0");
    }
    let m = modulus.abs();
    let mut base = base.mod_floor(&m);
    if exp.is_negative() {
        base = match mod_inverse(&base, &m) {
            Some(inverse) => inverse,
            None => {
                return raise(
                    ExcKind::ValueError,
                    "base is not invertible for the given modulus",
                )
            }
        };
    }
    let result = base.modpow(&exp.abs(), &m);
    if modulus.is_negative() && !result.is_zero() {
        return Ok(normalize(result - m));
    }
    Ok(normalize(result))
}

fn mod_inverse(a: &BigInt, m: &BigInt) -> Option<BigInt> {
    let gcd = a.extended_gcd(m);
    if !gcd.gcd.is_one() {
        return None;
    }
    Some(gcd.x.mod_floor(m))
}

/// Correctly rounded `a / b`
pub fn true_divide(a: &BigInt, b: &BigInt) -> Exec<f64> {
    if b.is_zero() {
        return raise(ExcKind::ZeroDivisionError, "division by zero");
    }
    if let (Some(x), Some(y)) = (exact_f64(a), exact_f64(b)) {
        return Ok(x / y);
    }
    // scale so the quotient carries at least 64 significant bits
    let shift = 64 - (a.bits() as i64 - b.bits() as i64);
    let (num, den) = if shift >= 0 {
        (a.abs() << shift as usize, b.abs())
    } else {
        (a.abs(), b.abs() << (-shift) as usize)
    };
    let (quotient, remainder) = num.div_rem(&den);
    // an odd low bit stands in for the discarded remainder when rounding
    let quotient = if remainder.is_zero() {
        quotient
    } else {
        quotient | BigInt::one()
    };
    let magnitude = scale_by_power_of_two(quotient.to_f64().unwrap_or(f64::INFINITY), -shift);
    if magnitude.is_infinite() {
        return raise(
            ExcKind::OverflowError,
            "integer division result too large for a float",
        );
    }
    Ok(if a.is_negative() != b.is_negative() {
        -magnitude
    } else {
        magnitude
    })
}

fn exact_f64(n: &BigInt) -> Option<f64> {
    n.to_i64()
        .filter(|i| i.unsigned_abs() <= 1 << 53)
        .map(|i| i as f64)
}

fn scale_by_power_of_two(mut value: f64, mut exp: i64) -> f64 {
    while exp > 1000 {
        value *= 2f64.powi(1000);
        exp -= 1000;
    }
    while exp < -1000 {
        value *= 2f64.powi(-1000);
        exp += 1000;
    }
    value * 2f64.powi(exp as i32)
}

/// Exact ordering of an int against a float; `None` against NaN
pub fn cmp_float(n: &BigInt, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f.is_infinite() {
        return Some(if f > 0.0 {
            Ordering::Less
        } else {
            Ordering::Greater
        });
    }
    let floor = f.floor();
    let whole = BigInt::from_f64(floor)?;
    Some(match n.cmp(&whole) {
        Ordering::Equal if floor != f => Ordering::Less,
        other => other,
    })
}

/// Python's `hash()` of an int
pub fn hash(n: &BigInt) -> i64 {
    let residue = (n.abs() % BigInt::from(HASH_MODULUS)).to_i64().unwrap_or(0);
    let hash = if n.is_negative() { -residue } else { residue };
    if hash == -1 {
        -2
    } else {
        hash
    }
}

/// `hash()` of an int held in an `i64`
pub fn hash_small(i: i64) -> i64 {
    let residue = (i.unsigned_abs() % HASH_MODULUS as u64) as i64;
    let hash = if i < 0 { -residue } else { residue };
    if hash == -1 {
        -2
    } else {
        hash
    }
}

/// `hex()`, `oct()` and `bin()` text
pub fn radix_text(n: &BigInt, prefix: &str, radix: u32) -> String {
    let sign = if n.is_negative() { "-" } else { "" };
    format!("{}{}{}", sign, prefix, n.magnitude().to_str_radix(radix))
}

/// Digits of `text` in `radix`; the caller has already removed signs and separators
pub fn parse_digits(text: &str, radix: u32) -> Option<BigInt> {
    if text.is_empty() || !text.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    BigInt::parse_bytes(text.as_bytes(), radix)
}

/// Round to a negative number of decimal places, half to even
pub fn round_to(n: &BigInt, ndigits: i64) -> Exec<Value> {
    if ndigits >= 0 {
        return Ok(normalize(n.clone()));
    }
    let places = (-ndigits) as u64;
    if places > n.bits() {
        // 10**places is more than twice |n|
        return Ok(Value::Int(0));
    }
    let scale = BigInt::from(10).pow(places as u32);
    let (quotient, remainder) = n.div_mod_floor(&scale);
    let twice = &remainder * 2;
    let up = twice > scale || (twice == scale && quotient.is_odd());
    let quotient = if up { quotient + 1 } else { quotient };
    Ok(normalize(quotient * scale))
}

/// Index-like value that cannot fit a machine index
pub fn index_overflow<T>() -> Exec<T> {
    raise(
        ExcKind::OverflowError,
        "Python int too large to convert to C ssize_t",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(text: &str) -> BigInt {
        text.parse().unwrap()
    }

    fn text(value: Value) -> String {
        to_bigint(&value).unwrap().to_string()
    }

    #[test]
    fn test_normalize_narrows() {
        assert!(matches!(normalize(BigInt::from(5)), Value::Int(5)));
        assert!(matches!(normalize(BigInt::from(i64::MIN)), Value::Int(i64::MIN)));
        assert!(matches!(normalize(big("9223372036854775808")), Value::Long(_)));
    }

    #[test]
    fn test_overflowing_arithmetic_widens() {
        let max = BigInt::from(i64::MAX);
        let sum = binary(BinOp::Add, &max, &BigInt::one()).unwrap();
        assert!(matches!(sum, Value::Long(_)));
        assert_eq!(text(sum), "9223372036854775808");
        assert!(matches!(
            binary(BinOp::Sub, &big("9223372036854775808"), &BigInt::one()).unwrap(),
            Value::Int(i64::MAX)
        ));
        let (a, b) = (big("-100000000000000000000"), big("30000000000000000000"));
        assert!(matches!(binary(BinOp::FloorDiv, &a, &b).unwrap(), Value::Int(-4)));
        assert_eq!(text(binary(BinOp::Mod, &a, &b).unwrap()), "20000000000000000000");
    }

    #[test]
    fn test_shifts_and_bits() {
        let shifted = binary(BinOp::LShift, &BigInt::one(), &BigInt::from(100)).unwrap();
        assert_eq!(text(shifted), "1267650600228229401496703205376");
        assert!(matches!(
            binary(BinOp::RShift, &big("-1267650600228229401496703205376"), &BigInt::from(200)).unwrap(),
            Value::Int(-1)
        ));
        assert!(matches!(
            binary(BinOp::BitAnd, &big("-18446744073709551617"), &BigInt::from(0xff)).unwrap(),
            Value::Int(0xff)
        ));
        assert!(binary(BinOp::RShift, &BigInt::one(), &BigInt::from(-1)).is_err());
    }

    #[test]
    fn test_huge_results_are_refused() {
        assert!(pow(&BigInt::from(2), &BigInt::from(MAX_INT_BITS * 2)).is_err());
        assert!(binary(BinOp::LShift, &BigInt::one(), &big("100000000000000000000")).is_err());
        assert!(matches!(
            pow(&BigInt::from(-1), &big("100000000000000000001")).unwrap(),
            Value::Int(-1)
        ));
        assert_eq!(text(pow(&BigInt::from(2), &BigInt::from(64)).unwrap()), "18446744073709551616");
    }

    #[test]
    fn test_negative_exponent_gives_float() {
        assert!(matches!(pow(&BigInt::from(2), &BigInt::from(-2)).unwrap(), Value::Float(f) if f == 0.25));
        assert!(pow(&BigInt::zero(), &BigInt::from(-1)).is_err());
    }

    #[test]
    fn test_true_divide_is_rounded() {
        let ten = BigInt::from(10);
        assert_eq!(true_divide(&ten.pow(400), &ten.pow(399)).unwrap(), 10.0);
        assert_eq!(true_divide(&BigInt::from(1), &BigInt::from(3)).unwrap(), 1.0 / 3.0);
        assert_eq!(true_divide(&-ten.pow(30), &BigInt::from(4)).unwrap(), -2.5e29);
        assert!(true_divide(&ten.pow(400), &BigInt::one()).is_err());
        assert!(true_divide(&BigInt::one(), &BigInt::zero()).is_err());
    }

    #[test]
    fn test_float_comparison_is_exact() {
        let n = big("9007199254740993");
        assert_eq!(cmp_float(&n, 9007199254740992.0), Some(Ordering::Greater));
        assert_eq!(cmp_float(&BigInt::from(2), 2.5), Some(Ordering::Less));
        assert_eq!(cmp_float(&BigInt::from(-3), -3.5), Some(Ordering::Greater));
        assert_eq!(cmp_float(&BigInt::from(4), 4.0), Some(Ordering::Equal));
        assert_eq!(cmp_float(&big("1000000000000000000000"), f64::INFINITY), Some(Ordering::Less));
        assert_eq!(cmp_float(&BigInt::zero(), f64::NAN), None);
    }

    #[test]
    fn test_hash_matches_python() {
        assert_eq!(hash_small(-1), -2);
        assert_eq!(hash_small(1 << 62), 2);
        assert_eq!(hash(&big("2305843009213693951")), 0);
        assert_eq!(hash(&big("-2305843009213693952")), -2);
        assert_eq!(hash(&big("18446744073709551616")), 8);
    }

    #[test]
    fn test_mod_pow() {
        let v = |n: i64| BigInt::from(n);
        assert!(matches!(mod_pow(&v(3), &v(4), &v(5)).unwrap(), Value::Int(1)));
        assert!(matches!(mod_pow(&v(3), &v(-1), &v(7)).unwrap(), Value::Int(5)));
        assert!(matches!(mod_pow(&v(2), &v(10), &v(-7)).unwrap(), Value::Int(-5)));
        assert!(mod_pow(&v(2), &v(-1), &v(4)).is_err());
        assert!(mod_pow(&v(2), &v(1), &v(0)).is_err());
    }

    #[test]
    fn test_round_to() {
        let v = |n: i64| BigInt::from(n);
        assert!(matches!(round_to(&v(1250), -2).unwrap(), Value::Int(1200)));
        assert!(matches!(round_to(&v(1350), -2).unwrap(), Value::Int(1400)));
        assert!(matches!(round_to(&v(-1250), -2).unwrap(), Value::Int(-1200)));
        assert!(matches!(round_to(&v(5), -400).unwrap(), Value::Int(0)));
    }

    #[test]
    fn test_radix_text() {
        assert_eq!(radix_text(&BigInt::from(255), "0x", 16), "0xff");
        assert_eq!(radix_text(&BigInt::from(-8), "0o", 8), "-0o10");
        assert_eq!(radix_text(&BigInt::from(i64::MIN), "0x", 16), "-0x8000000000000000");
        assert_eq!(parse_digits("ff", 16), Some(BigInt::from(255)));
        assert_eq!(parse_digits("12a", 10), None);
        assert_eq!(parse_digits("", 10), None);
    }
}

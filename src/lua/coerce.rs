//! Number/string conversions
//!
//! One parser serves numeric literals in source, string-to-number
//! coercion and `tonumber`; one formatter renders numbers everywhere a
//! number becomes text.

use crate::lua::value::{LuaString, Value};

/// Parse a Lua numeral. Accepts surrounding whitespace, an optional sign,
/// decimal numbers with optional fraction and exponent, and hexadecimal
/// numbers with optional fraction and binary exponent. `inf`/`nan` spellings
/// are rejected.
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace());
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let value = if body.len() > 1 && (body.starts_with("0x") || body.starts_with("0X")) {
        parse_hex(&body[2..])?
    } else {
        parse_decimal(body)?
    };

    Some(if negative { -value } else { value })
}

fn parse_decimal(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut mantissa_digits = 0;

    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        mantissa_digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            mantissa_digits += 1;
        }
    }
    if mantissa_digits == 0 {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let exponent_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exponent_start {
            return None;
        }
    }
    if i != bytes.len() {
        return None;
    }

    // Validated above; the std parser handles rounding
    text.parse::<f64>().ok()
}

fn parse_hex(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut mantissa = 0.0f64;
    let mut exponent: i64 = 0;
    let mut any_digit = false;

    while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
        mantissa = mantissa * 16.0 + hex_value(bytes[i]);
        any_digit = true;
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            mantissa = mantissa * 16.0 + hex_value(bytes[i]);
            exponent -= 4;
            any_digit = true;
            i += 1;
        }
    }
    if !any_digit {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'p' || bytes[i] == b'P') {
        i += 1;
        let mut negative = false;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            negative = bytes[i] == b'-';
            i += 1;
        }
        let start = i;
        let mut value: i64 = 0;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            value = value.saturating_mul(10).saturating_add((bytes[i] - b'0') as i64);
            i += 1;
        }
        if i == start {
            return None;
        }
        exponent += if negative { -value } else { value };
    }
    if i != bytes.len() {
        return None;
    }

    let exponent = exponent.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    Some(mantissa * 2f64.powi(exponent))
}

fn hex_value(b: u8) -> f64 {
    (b as char).to_digit(16).unwrap_or(0) as f64
}

/// Parse an integer numeral in `base` (2..=36), as `tonumber(s, base)` does
pub fn parse_integer_in_base(text: &str, base: u32) -> Option<f64> {
    let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace());
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    if digits.is_empty() {
        return None;
    }
    let mut value = 0.0f64;
    for c in digits.chars() {
        let d = c.to_digit(base)?;
        value = value * base as f64 + d as f64;
    }
    Some(if negative { -value } else { value })
}

/// Format a number as `%.14g` would
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e14 {
        return format!("{}", n as i64);
    }

    // Let the scientific formatter do the rounding, then pick the layout
    let scientific = format!("{:.13e}", n);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return scientific,
    };

    if exponent < -4 || exponent >= 14 {
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (13 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, n)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Numeric view of a value: numbers as-is, strings if they parse
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => std::str::from_utf8(s.as_bytes()).ok().and_then(parse_number),
        _ => None,
    }
}

/// String view of a value for concatenation: strings as-is, numbers formatted
pub fn to_lua_string(value: &Value) -> Option<LuaString> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(LuaString::from(format_number(*n))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number("  3.5  "), Some(3.5));
        assert_eq!(parse_number("5."), Some(5.0));
        assert_eq!(parse_number(".25"), Some(0.25));
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("-2E-2"), Some(-0.02));
        assert_eq!(parse_number("1e"), None);
        assert_eq!(parse_number("."), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("3x"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_number("0x10"), Some(16.0));
        assert_eq!(parse_number("0XfF"), Some(255.0));
        assert_eq!(parse_number("0x1p4"), Some(16.0));
        assert_eq!(parse_number("0x1.8"), Some(1.5));
        assert_eq!(parse_number("0x.1p-2"), Some(0.015625));
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("0x1p"), None);
        assert_eq!(parse_number("0xg"), None);
    }

    #[test]
    fn test_parse_integer_in_base() {
        assert_eq!(parse_integer_in_base("ff", 16), Some(255.0));
        assert_eq!(parse_integer_in_base("-101", 2), Some(-5.0));
        assert_eq!(parse_integer_in_base("z", 36), Some(35.0));
        assert_eq!(parse_integer_in_base("8", 8), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-42.0), "-42");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(3.14159), "3.14159");
        assert_eq!(format_number(1.0 / 3.0), "0.33333333333333");
        assert_eq!(format_number(1e100), "1e+100");
        assert_eq!(format_number(1e14), "1e+14");
        assert_eq!(format_number(123456789.0), "123456789");
        assert_eq!(format_number(2.5e-7), "2.5e-07");
        assert_eq!(format_number(f64::INFINITY), "inf");
        assert_eq!(format_number(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_number(-0.0), "-0");
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(to_number(&Value::from("10")), Some(10.0));
        assert_eq!(to_number(&Value::from("0x10")), Some(16.0));
        assert_eq!(to_number(&Value::from("ten")), None);
        assert_eq!(to_number(&Value::Boolean(true)), None);
        assert_eq!(
            to_lua_string(&Value::Number(5.0)).map(|s| s.as_bytes().to_vec()),
            Some(b"5".to_vec())
        );
        assert!(to_lua_string(&Value::Nil).is_none());
    }
}

//! String Library
//!
//! Byte-oriented `string.*` functions. Installing the library also sets the
//! type-level string metatable so `s:upper()` finds these functions.

use crate::lua::dispatch;
use crate::lua::error::{LuaError, LuaResult, RuntimeErrorKind};
use crate::lua::table::TableRef;
use crate::lua::value::{LuaString, Value};
use crate::lua::varargs::Varargs;
use crate::lua::vm::{ExecutionContext, LibFunction, LuaVM};

/// Initialize the string library
pub fn init_string_lib(vm: &LuaVM) -> LuaResult<()> {
    let functions: [(&str, LibFunction); 9] = [
        ("len", string_len),
        ("sub", string_sub),
        ("upper", string_upper),
        ("lower", string_lower),
        ("rep", string_rep),
        ("reverse", string_reverse),
        ("byte", string_byte),
        ("char", string_char),
        ("format", string_format),
    ];

    let string = vm.register_library("string", &functions)?;

    let metatable = TableRef::new();
    metatable.set_str("__index", Value::Table(string))?;
    vm.set_string_metatable(Some(metatable));
    Ok(())
}

/// Resolve a possibly negative 1-based position against `len`
fn relative_position(pos: i64, len: usize) -> i64 {
    if pos >= 0 {
        pos
    } else if pos.unsigned_abs() as usize > len {
        0
    } else {
        len as i64 + pos + 1
    }
}

fn string_len(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let s = ctx.check_string(0)?;
    Ok(Varargs::one(s.len()))
}

/// `string.sub(s [, i [, j]])`
fn string_sub(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let s = ctx.check_string(0)?;
    let len = s.len();
    let start = relative_position(ctx.opt_integer(1, 1)?, len).max(1);
    let end = relative_position(ctx.opt_integer(2, -1)?, len).min(len as i64);
    if start > end {
        return Ok(Varargs::one(""));
    }
    let bytes = &s.as_bytes()[(start - 1) as usize..end as usize];
    Ok(Varargs::one(LuaString::from(bytes)))
}

fn string_upper(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let s = ctx.check_string(0)?;
    Ok(Varargs::one(LuaString::from(s.as_bytes().to_ascii_uppercase())))
}

fn string_lower(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let s = ctx.check_string(0)?;
    Ok(Varargs::one(LuaString::from(s.as_bytes().to_ascii_lowercase())))
}

/// `string.rep(s, n [, sep])`
fn string_rep(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let s = ctx.check_string(0)?;
    let n = ctx.check_integer(1)?;
    let sep = ctx.opt_string(2, "")?;
    if n <= 0 {
        return Ok(Varargs::one(""));
    }

    let total = (s.len() + sep.len()).saturating_mul(n as usize);
    if total > (1 << 30) {
        return Err(LuaError::runtime(RuntimeErrorKind::BadArgument, "resulting string too large"));
    }
    let mut out = Vec::with_capacity(total);
    for i in 0..n {
        if i > 0 {
            out.extend_from_slice(sep.as_bytes());
        }
        out.extend_from_slice(s.as_bytes());
    }
    Ok(Varargs::one(LuaString::from(out)))
}

fn string_reverse(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let s = ctx.check_string(0)?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.reverse();
    Ok(Varargs::one(LuaString::from(bytes)))
}

/// `string.byte(s [, i [, j]])`
fn string_byte(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let s = ctx.check_string(0)?;
    let len = s.len();
    let start = relative_position(ctx.opt_integer(1, 1)?, len).max(1);
    let end = relative_position(ctx.opt_integer(2, start)?, len).min(len as i64);
    if start > end {
        return Ok(Varargs::empty());
    }
    Ok(s.as_bytes()[(start - 1) as usize..end as usize]
        .iter()
        .map(|b| Value::Number(*b as f64))
        .collect())
}

fn string_char(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let mut bytes = Vec::with_capacity(ctx.arg_count());
    for i in 0..ctx.arg_count() {
        let code = ctx.check_integer(i)?;
        if !(0..=255).contains(&code) {
            return Err(ctx.bad_argument(i, "value out of range"));
        }
        bytes.push(code as u8);
    }
    Ok(Varargs::one(LuaString::from(bytes)))
}

/// One `%` directive of a format string
#[derive(Debug, Default)]
struct FormatSpec {
    left: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
}

impl FormatSpec {
    /// Pad to the field width. Zero padding goes after any sign.
    fn pad(&self, body: String, numeric: bool) -> String {
        if body.len() >= self.width {
            return body;
        }
        let fill = self.width - body.len();
        if self.left {
            return format!("{}{}", body, " ".repeat(fill));
        }
        if self.zero && numeric {
            let sign_len = if body.starts_with(['-', '+', ' ']) { 1 } else { 0 };
            let (sign, digits) = body.split_at(sign_len);
            return format!("{}{}{}", sign, "0".repeat(fill), digits);
        }
        format!("{}{}", " ".repeat(fill), body)
    }

    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }
}

/// `%e` layout with at least two exponent digits
fn format_exponent(n: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, n);
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let text = format!("{}e{}{:02}", mantissa, sign, exponent.abs());
    if upper {
        text.to_uppercase()
    } else {
        text
    }
}

/// `%g`: the shorter of `%e` and `%f` at the given significant digits
fn format_general(n: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let precision = precision.max(1);
    let scientific = format!("{:.*e}", precision - 1, n);
    let exponent: i32 = scientific
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    if exponent < -4 || exponent >= precision as i32 {
        let text = format_exponent(n, precision - 1, upper);
        if alternate {
            text
        } else {
            match text.find(['e', 'E']) {
                Some(split) => {
                    let (mantissa, exp) = text.split_at(split);
                    format!("{}{}", trim_zeros(mantissa), exp)
                }
                None => text,
            }
        }
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        let text = format!("{:.*}", decimals, n);
        if alternate {
            text
        } else {
            trim_zeros(&text).to_string()
        }
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn format_float(n: f64, spec: &FormatSpec, conversion: u8) -> String {
    if !n.is_finite() {
        let text = if n.is_nan() {
            "nan".to_string()
        } else {
            format!("{}inf", spec.sign(n < 0.0))
        };
        let text = if conversion.is_ascii_uppercase() { text.to_uppercase() } else { text };
        return FormatSpec { zero: false, ..*spec }.pad(text, false);
    }

    let precision = spec.precision.unwrap_or(6);
    let magnitude = n.abs();
    let body = match conversion {
        b'f' | b'F' => format!("{:.*}", precision, magnitude),
        b'e' | b'E' => format_exponent(magnitude, precision, conversion == b'E'),
        _ => format_general(magnitude, precision, spec.alternate, conversion == b'G'),
    };
    spec.pad(format!("{}{}", spec.sign(n.is_sign_negative() && n != 0.0), body), true)
}

fn format_integer(n: i64, spec: &FormatSpec, conversion: u8) -> String {
    let digits = match conversion {
        b'x' => format!("{:x}", n),
        b'X' => format!("{:X}", n),
        b'o' => format!("{:o}", n),
        _ => n.unsigned_abs().to_string(),
    };
    let digits = match spec.precision {
        Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
        _ => digits,
    };
    let prefix = match conversion {
        b'x' if spec.alternate && n != 0 => "0x",
        b'X' if spec.alternate && n != 0 => "0X",
        b'd' | b'i' => spec.sign(n < 0),
        _ => "",
    };
    spec.pad(format!("{}{}", prefix, digits), spec.precision.is_none())
}

fn quote(s: &LuaString) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 2);
    out.push(b'"');
    let bytes = s.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            0 => {
                let next_is_digit = bytes.get(i + 1).map_or(false, u8::is_ascii_digit);
                out.extend_from_slice(if next_is_digit { b"\\000" } else { b"\\0" });
            }
            _ => out.push(b),
        }
    }
    out.push(b'"');
    out
}

/// `string.format(fmt, ...)` with `%d %i %u %c %x %X %o %e %E %f %g %G %q %s %%`
fn string_format(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let format = ctx.check_string(0)?;
    let fmt = format.as_bytes();
    let mut out = Vec::with_capacity(fmt.len());
    let mut arg = 0;
    let mut i = 0;

    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        i += 1;
        if fmt.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }

        let mut spec = FormatSpec::default();
        while let Some(&flag) = fmt.get(i) {
            match flag {
                b'-' => spec.left = true,
                b'+' => spec.plus = true,
                b' ' => spec.space = true,
                b'#' => spec.alternate = true,
                b'0' => spec.zero = true,
                _ => break,
            }
            i += 1;
        }
        while let Some(d) = fmt.get(i).filter(|c| c.is_ascii_digit()) {
            spec.width = spec.width * 10 + (d - b'0') as usize;
            i += 1;
        }
        if fmt.get(i) == Some(&b'.') {
            i += 1;
            let mut precision = 0;
            while let Some(d) = fmt.get(i).filter(|c| c.is_ascii_digit()) {
                precision = precision * 10 + (d - b'0') as usize;
                i += 1;
            }
            spec.precision = Some(precision);
        }
        if spec.width > 99 || spec.precision.map_or(false, |p| p > 99) {
            return Err(LuaError::runtime(
                RuntimeErrorKind::BadArgument,
                "invalid format (width or precision too long)",
            ));
        }

        let conversion = match fmt.get(i) {
            Some(c) => *c,
            None => {
                return Err(LuaError::runtime(
                    RuntimeErrorKind::BadArgument,
                    "invalid option '%' to 'format'",
                ))
            }
        };
        i += 1;
        arg += 1;
        if arg >= ctx.arg_count() {
            return Err(ctx.bad_argument(arg, "no value"));
        }

        match conversion {
            b'd' | b'i' | b'u' | b'x' | b'X' | b'o' => {
                let n = ctx.check_number(arg)?;
                let text = format_integer(n as i64, &spec, conversion);
                out.extend_from_slice(text.as_bytes());
            }
            b'c' => {
                let code = ctx.check_integer(arg)?;
                out.push(code as u8);
            }
            b'e' | b'E' | b'f' | b'F' | b'g' | b'G' => {
                let n = ctx.check_number(arg)?;
                out.extend_from_slice(format_float(n, &spec, conversion).as_bytes());
            }
            b'q' => {
                let s = ctx.check_string(arg)?;
                out.extend_from_slice(&quote(&s));
            }
            b's' => {
                let s = match dispatch::tostring(ctx.vm(), &ctx.arg(arg))? {
                    Value::String(s) => s,
                    other => LuaString::from(other.to_string()),
                };
                let bytes = match spec.precision {
                    Some(p) if p < s.len() => &s.as_bytes()[..p],
                    _ => s.as_bytes(),
                };
                let fill = spec.width.saturating_sub(bytes.len());
                if !spec.left {
                    out.extend(std::iter::repeat(b' ').take(fill));
                }
                out.extend_from_slice(bytes);
                if spec.left {
                    out.extend(std::iter::repeat(b' ').take(fill));
                }
            }
            other => {
                return Err(LuaError::runtime(
                    RuntimeErrorKind::BadArgument,
                    format!("invalid option '%{}' to 'format'", other as char),
                ))
            }
        }
    }

    Ok(Varargs::one(LuaString::from(out)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Varargs {
        LuaVM::new().unwrap().eval(source).unwrap()
    }

    fn eval_str(source: &str) -> String {
        eval(source).first().to_string()
    }

    #[test]
    fn test_sub_positions() {
        assert_eq!(eval_str("return string.sub('hello', 2, 4)"), "ell");
        assert_eq!(eval_str("return string.sub('hello', -3)"), "llo");
        assert_eq!(eval_str("return string.sub('hello', 0)"), "hello");
        assert_eq!(eval_str("return string.sub('hello', 4, 2)"), "");
        assert_eq!(eval_str("return string.sub('hello', -100, 2)"), "he");
    }

    #[test]
    fn test_method_syntax_via_string_metatable() {
        assert_eq!(eval_str("local s = 'abc' return s:upper()"), "ABC");
        assert_eq!(eval_str("return ('x'):rep(3, ',')"), "x,x,x");
        assert_eq!(eval_str("local s = 'Lua' return s:len() .. s:reverse()"), "3auL");
    }

    #[test]
    fn test_byte_and_char() {
        let values = eval("return string.byte('ABC', 1, -1)");
        assert_eq!(values.into_vec(), vec![Value::from(65), Value::from(66), Value::from(67)]);
        assert_eq!(eval_str("return string.char(72, 105)"), "Hi");
        assert!(LuaVM::new().unwrap().eval("return string.char(256)").is_err());
    }

    #[test]
    fn test_format_directives() {
        assert_eq!(eval_str("return string.format('%d items', 3.9)"), "3 items");
        assert_eq!(eval_str("return string.format('%5d|%-5d|%05d', 42, 42, -42)"), "   42|42   |-0042");
        assert_eq!(eval_str("return string.format('%.2f', 3.14159)"), "3.14");
        assert_eq!(eval_str("return string.format('%x %X %o', 255, 255, 8)"), "ff FF 10");
        assert_eq!(eval_str("return string.format('%g %g %g', 100000, 1e20, 0.1)"), "100000 1e+20 0.1");
        assert_eq!(eval_str("return string.format('%e', 12345.678)"), "1.234568e+04");
        assert_eq!(eval_str("return string.format('%s=%s', 'k', 1.5)"), "k=1.5");
        assert_eq!(eval_str("return string.format('%.3s|%5s', 'abcdef', 'ab')"), "abc|   ab");
        assert_eq!(eval_str("return string.format('%q', 'a\"b\\n')"), "\"a\\\"b\\\n\"");
        assert_eq!(eval_str("return string.format('100%%')"), "100%");
        assert_eq!(eval_str("return string.format('%+d %c', 5, 65)"), "+5 A");
    }

    #[test]
    fn test_format_errors() {
        let vm = LuaVM::new().unwrap();
        let err = vm.eval("return string.format('%d')").unwrap_err();
        assert_eq!(err.to_string(), "main:1: bad argument #2 to 'format' (no value)");
        assert!(vm.eval("return string.format('%y', 1)").is_err());
    }
}

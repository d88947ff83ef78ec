//! Base Standard Library Functions
//!
//! This module implements the core Lua standard library functions
//! that are always available in the global environment.

use crate::lua::coerce;
use crate::lua::dispatch;
use crate::lua::error::{LuaError, LuaResult, RuntimeError, RuntimeErrorKind};
use crate::lua::metamethod::{metatable_of, MetamethodType};
use crate::lua::value::Value;
use crate::lua::varargs::Varargs;
use crate::lua::vm::{ExecutionContext, LibFunction, LuaVM};

use super::native_value;

/// Initialize the base library functions
pub fn init_base_lib(vm: &LuaVM) -> LuaResult<()> {
    let functions: [(&str, LibFunction); 20] = [
        ("assert", lua_assert),
        ("error", lua_error),
        ("pcall", lua_pcall),
        ("xpcall", lua_xpcall),
        ("type", lua_type),
        ("tostring", lua_tostring),
        ("tonumber", lua_tonumber),
        ("print", lua_print),
        ("select", lua_select),
        ("next", lua_next),
        ("pairs", lua_pairs),
        ("ipairs", lua_ipairs),
        ("rawget", lua_rawget),
        ("rawset", lua_rawset),
        ("rawequal", lua_rawequal),
        ("rawlen", lua_rawlen),
        ("setmetatable", lua_setmetatable),
        ("getmetatable", lua_getmetatable),
        ("unpack", lua_unpack),
        ("collectgarbage", lua_collectgarbage),
    ];

    let globals = vm.globals();
    for (name, func) in functions.iter() {
        globals.set_str(name, native_value(name, *func))?;
    }
    globals.set_str("_VERSION", Value::from("Lua 5.1"))?;
    Ok(())
}

/// Lua assert function implementation
fn lua_assert(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let condition = ctx.check_any(0)?;
    if condition.is_truthy() {
        return Ok(ctx.take_args());
    }
    let message = match ctx.arg(1) {
        Value::Nil => Value::from("assertion failed!"),
        other => other,
    };
    Err(RuntimeError::user(message, false).into())
}

/// `error(value [, level])`; level 0 leaves the message unpositioned
fn lua_error(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let value = ctx.arg(0);
    let level = ctx.opt_integer(1, 1)?;
    Err(RuntimeError::user(value, level > 0).into())
}

/// Turn a failed call into `false, error_value`, unless the error must
/// not be caught
fn catch(err: LuaError) -> LuaResult<Value> {
    match err.runtime_kind() {
        Some(kind) if !kind.is_catchable() => Err(err),
        _ => Ok(err.to_value()),
    }
}

fn lua_pcall(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let function = ctx.check_any(0)?;
    let args = ctx.args().tail(1);
    match ctx.vm().call(&function, args) {
        Ok(results) => Ok(results.prepend(Value::Boolean(true))),
        Err(err) => {
            let value = catch(err)?;
            Ok(Varargs::from(vec![Value::Boolean(false), value]))
        }
    }
}

fn lua_xpcall(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let function = ctx.check_any(0)?;
    let handler = ctx.arg(1);
    let args = ctx.args().tail(2);
    match ctx.vm().call(&function, args) {
        Ok(results) => Ok(results.prepend(Value::Boolean(true))),
        Err(err) => {
            let value = catch(err)?;
            let handled = ctx.vm().call(&handler, Varargs::one(value))?;
            Ok(Varargs::from(vec![Value::Boolean(false), handled.into_first()]))
        }
    }
}

fn lua_type(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let value = ctx.check_any(0)?;
    Ok(Varargs::one(value.type_name()))
}

fn lua_tostring(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let value = ctx.check_any(0)?;
    Ok(Varargs::one(dispatch::tostring(ctx.vm(), &value)?))
}

fn lua_tonumber(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let value = ctx.check_any(0)?;
    if ctx.arg(1).is_nil() {
        return Ok(Varargs::one(Value::from(coerce::to_number(&value))));
    }

    let base = ctx.check_integer(1)?;
    if !(2..=36).contains(&base) {
        return Err(ctx.bad_argument(1, "base out of range"));
    }
    let text = ctx.check_string(0)?;
    let parsed = std::str::from_utf8(text.as_bytes())
        .ok()
        .and_then(|s| coerce::parse_integer_in_base(s, base as u32));
    Ok(Varargs::one(Value::from(parsed)))
}

fn lua_print(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let vm = ctx.vm();
    let mut line = Vec::new();
    for (i, value) in ctx.args().iter().enumerate() {
        if i > 0 {
            line.push(b'\t');
        }
        match dispatch::tostring(vm, value)? {
            Value::String(s) => line.extend_from_slice(s.as_bytes()),
            other => line.extend_from_slice(other.to_string().as_bytes()),
        }
    }
    line.push(b'\n');
    vm.write_output(&line)?;
    Ok(Varargs::empty())
}

/// `select('#', ...)` counts, `select(n, ...)` returns from the n-th on;
/// negative n counts from the end
fn lua_select(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let rest = ctx.arg_count().saturating_sub(1) as i64;
    if let Value::String(s) = ctx.arg(0) {
        if s.as_bytes() == b"#" {
            return Ok(Varargs::one(rest as f64));
        }
    }

    let n = ctx.check_integer(0)?;
    let start = if n < 0 { rest + n } else { n - 1 };
    if n == 0 || start < 0 {
        return Err(ctx.bad_argument(0, "index out of range"));
    }
    Ok(ctx.args().tail(1 + start as usize))
}

fn lua_next(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    match table.next(&ctx.arg(1))? {
        Some((key, value)) => Ok(Varargs::from(vec![key, value])),
        None => Ok(Varargs::one(Value::Nil)),
    }
}

fn lua_pairs(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    Ok(Varargs::from(vec![
        native_value("next", lua_next),
        Value::Table(table),
        Value::Nil,
    ]))
}

fn ipairs_step(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    let i = ctx.check_integer(1)? + 1;
    let value = table.get(&Value::Number(i as f64));
    if value.is_nil() {
        Ok(Varargs::one(Value::Nil))
    } else {
        Ok(Varargs::from(vec![Value::Number(i as f64), value]))
    }
}

fn lua_ipairs(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    Ok(Varargs::from(vec![
        native_value("ipairs_iterator", ipairs_step),
        Value::Table(table),
        Value::Number(0.0),
    ]))
}

fn lua_rawget(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    Ok(Varargs::one(table.get(&ctx.arg(1))))
}

fn lua_rawset(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    table.set(ctx.arg(1), ctx.arg(2))?;
    Ok(Varargs::one(Value::Table(table)))
}

fn lua_rawequal(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let a = ctx.check_any(0)?;
    let b = ctx.check_any(1)?;
    Ok(Varargs::one(a.raw_equals(&b)))
}

fn lua_rawlen(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    match ctx.arg(0) {
        Value::Table(t) => Ok(Varargs::one(t.len())),
        Value::String(s) => Ok(Varargs::one(s.len())),
        _ => Err(ctx.bad_argument(0, "table or string expected")),
    }
}

fn lua_setmetatable(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    let metatable = match ctx.arg(1) {
        Value::Nil => None,
        Value::Table(mt) => Some(mt),
        _ => return Err(ctx.bad_argument(1, "nil or table expected")),
    };

    if let Some(current) = table.metatable() {
        if !current.get(&MetamethodType::Metatable.key()).is_nil() {
            return Err(LuaError::runtime(
                RuntimeErrorKind::User,
                "cannot change a protected metatable",
            ));
        }
    }
    table.set_metatable(metatable);
    Ok(Varargs::one(Value::Table(table)))
}

fn lua_getmetatable(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let value = ctx.check_any(0)?;
    let metatable = match metatable_of(ctx.vm(), &value) {
        Some(mt) => mt,
        None => return Ok(Varargs::one(Value::Nil)),
    };
    let protected = metatable.get(&MetamethodType::Metatable.key());
    if protected.is_nil() {
        Ok(Varargs::one(Value::Table(metatable)))
    } else {
        Ok(Varargs::one(protected))
    }
}

/// `unpack(t [, i [, j]])`, raw reads of `t[i..=j]`
pub(crate) fn lua_unpack(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    let start = ctx.opt_integer(1, 1)?;
    let end = ctx.opt_integer(2, table.len() as i64)?;
    if start > end {
        return Ok(Varargs::empty());
    }
    if end - start >= 1_000_000 {
        return Err(LuaError::runtime(RuntimeErrorKind::BadArgument, "too many results to unpack"));
    }
    Ok((start..=end)
        .map(|i| table.get(&Value::Number(i as f64)))
        .collect())
}

/// Memory is reference counted; report zero usage
fn lua_collectgarbage(_ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    Ok(Varargs::one(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn eval(source: &str) -> Varargs {
        let vm = LuaVM::new().unwrap();
        vm.eval(source).unwrap()
    }

    #[test]
    fn test_print_uses_tostring_and_tabs() {
        let vm = LuaVM::new().unwrap();
        let capture = Capture::default();
        vm.set_output(Box::new(capture.clone()));
        vm.eval("print(1, 'two', nil, 2.5)").unwrap();
        assert_eq!(capture.0.borrow().as_slice(), b"1\ttwo\tnil\t2.5\n");
    }

    #[test]
    fn test_select() {
        let values = eval("return select('#', 1, nil, 3), select(2, 'a', 'b', 'c'), select(-1, 'x', 'y')");
        assert_eq!(values.get(0), Value::from(3));
        assert_eq!(values.get(1), Value::from("b"));
        assert_eq!(values.get(2), Value::from("c"));
        assert_eq!(values.get(3), Value::from("y"));
    }

    #[test]
    fn test_tonumber() {
        let values = eval("return tonumber('0x10'), tonumber('  12  '), tonumber('z'), tonumber('ff', 16), tonumber('777', 8)");
        assert_eq!(values.get(0), Value::from(16));
        assert_eq!(values.get(1), Value::from(12));
        assert_eq!(values.get(2), Value::Nil);
        assert_eq!(values.get(3), Value::from(255));
        assert_eq!(values.get(4), Value::from(511));
    }

    #[test]
    fn test_pcall_and_error_levels() {
        let values = eval("return pcall(error, 'plain', 0)");
        assert_eq!(values.get(0), Value::Boolean(false));
        assert_eq!(values.get(1), Value::from("plain"));

        let values = eval("return pcall(function() error('boom') end)");
        assert_eq!(values.get(1), Value::from("main:1: boom"));

        let values = eval("return pcall(function() error({code = 7}) end)");
        let table = values.get(1);
        assert_eq!(table.as_table().map(|t| t.get_str("code")), Some(Value::from(7)));
    }

    #[test]
    fn test_xpcall_handler() {
        let values = eval("return xpcall(function() error('bad', 0) end, function(e) return 'handled: ' .. e end)");
        assert_eq!(values.get(0), Value::Boolean(false));
        assert_eq!(values.get(1), Value::from("handled: bad"));
    }

    #[test]
    fn test_assert() {
        let values = eval("return pcall(assert, false)");
        assert_eq!(values.get(1), Value::from("assertion failed!"));
        let values = eval("return assert(1, 'unused')");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_protected_metatable() {
        let values = eval(
            "local t = setmetatable({}, {__metatable = 'locked'})
             return getmetatable(t), pcall(setmetatable, t, {})",
        );
        assert_eq!(values.get(0), Value::from("locked"));
        assert_eq!(values.get(1), Value::Boolean(false));
    }

    #[test]
    fn test_pairs_and_ipairs() {
        let values = eval(
            "local n, sum = 0, 0
             for k, v in pairs({10, 20, x = 30}) do n = n + 1 sum = sum + v end
             local seq = 0
             for i, v in ipairs({1, 2, nil, 4}) do seq = i end
             return n, sum, seq",
        );
        assert_eq!(values.into_vec(), vec![Value::from(3), Value::from(60), Value::from(2)]);
    }

    #[test]
    fn test_unpack_and_raw_access() {
        let values = eval(
            "local t = setmetatable({}, {__index = function() return 'meta' end})
             rawset(t, 1, 'a')
             return rawget(t, 2), t[2], rawlen({1, 2, 3}), unpack({1, 2, 3}, 2)",
        );
        assert_eq!(values.get(0), Value::Nil);
        assert_eq!(values.get(1), Value::from("meta"));
        assert_eq!(values.get(2), Value::from(3));
        assert_eq!(values.get(3), Value::from(2));
        assert_eq!(values.get(4), Value::from(3));
    }
}

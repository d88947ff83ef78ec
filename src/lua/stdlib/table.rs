//! Table Library
//!
//! `table.insert`, `table.remove`, `table.concat`, `table.unpack` and
//! `table.sort`. All of them work on the sequence part `1..#t` and use raw
//! access, as the reference library does.

use crate::lua::coerce;
use crate::lua::dispatch::{self, DispatchSite};
use crate::lua::error::{LuaError, LuaResult, RuntimeErrorKind};
use crate::lua::stdlib::base::lua_unpack;
use crate::lua::value::Value;
use crate::lua::varargs::Varargs;
use crate::lua::vm::{ExecutionContext, LibFunction, LuaVM};

/// Initialize the table library
pub fn init_table_lib(vm: &LuaVM) -> LuaResult<()> {
    let functions: [(&str, LibFunction); 5] = [
        ("insert", table_insert),
        ("remove", table_remove),
        ("concat", table_concat),
        ("unpack", lua_unpack),
        ("sort", table_sort),
    ];
    vm.register_library("table", &functions)?;
    Ok(())
}

/// `table.insert(t, [pos,] value)`
fn table_insert(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    match ctx.arg_count() {
        2 => table.borrow_mut().push(ctx.arg(1))?,
        3 => {
            let pos = ctx.check_integer(1)?;
            let len = table.len() as i64;
            if pos < 1 || pos > len + 1 {
                return Err(ctx.bad_argument(1, "position out of bounds"));
            }
            table.borrow_mut().insert(pos as usize, ctx.arg(2))?;
        }
        _ => {
            return Err(LuaError::runtime(
                RuntimeErrorKind::BadArgument,
                "wrong number of arguments to 'insert'",
            ))
        }
    }
    Ok(Varargs::empty())
}

/// `table.remove(t [, pos])`, `pos` defaulting to the last element
fn table_remove(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    let len = table.len() as i64;
    let pos = ctx.opt_integer(1, len)?;
    if len == 0 && ctx.arg(1).is_nil() {
        return Ok(Varargs::one(Value::Nil));
    }
    if pos < 1 || pos > len + 1 {
        return Err(ctx.bad_argument(1, "position out of bounds"));
    }
    let removed = table.borrow_mut().remove(pos as usize);
    Ok(Varargs::one(removed))
}

/// `table.concat(t [, sep [, i [, j]]])`
fn table_concat(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    let sep = ctx.opt_string(1, "")?;
    let start = ctx.opt_integer(2, 1)?;
    let end = ctx.opt_integer(3, table.len() as i64)?;

    let mut out = Vec::new();
    for i in start..=end {
        let item = table.get(&Value::Number(i as f64));
        let text = match &item {
            Value::String(_) | Value::Number(_) => coerce::to_lua_string(&item),
            _ => None,
        };
        let Some(text) = text else {
            return Err(LuaError::runtime(
                RuntimeErrorKind::BadArgument,
                format!(
                    "invalid value (at index {}) in table for 'concat'",
                    coerce::format_number(i as f64)
                ),
            ));
        };
        out.extend_from_slice(text.as_bytes());
        if i < end {
            out.extend_from_slice(sep.as_bytes());
        }
    }
    Ok(Varargs::one(ctx.vm().create_string(out)))
}

/// `table.sort(t [, comp])`, a stable merge sort driven by `comp` or `<`
fn table_sort(ctx: &mut ExecutionContext<'_>) -> LuaResult<Varargs> {
    let table = ctx.check_table(0)?;
    let comparator = ctx.arg(1);
    if !comparator.is_nil() && !matches!(comparator, Value::Function(_)) {
        return Err(ctx.bad_argument(1, format!("function expected, got {}", comparator.type_name())));
    }

    let len = table.len();
    let items: Vec<Value> = (1..=len).map(|i| table.get(&Value::Number(i as f64))).collect();

    let vm = ctx.vm();
    let site = DispatchSite::new();
    let less = |a: &Value, b: &Value| -> LuaResult<bool> {
        if comparator.is_nil() {
            dispatch::less_than(vm, &site, a, b)
        } else {
            let result = dispatch::call(vm, &comparator, Varargs::from(vec![a.clone(), b.clone()]), None)?;
            Ok(result.first().is_truthy())
        }
    };
    let sorted = merge_sort(items, &less)?;

    let mut target = table.borrow_mut();
    for (i, value) in sorted.into_iter().enumerate() {
        target.set(Value::Number((i + 1) as f64), value)?;
    }
    Ok(Varargs::empty())
}

fn merge_sort<F>(mut items: Vec<Value>, less: &F) -> LuaResult<Vec<Value>>
where
    F: Fn(&Value, &Value) -> LuaResult<bool>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, less)?;
    let right = merge_sort(right, less)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        // Take from the right only when strictly smaller to keep stability
        let next = if less(b, a)? { right.next() } else { left.next() };
        merged.extend(next);
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

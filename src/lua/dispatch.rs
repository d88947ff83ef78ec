//! Runtime dispatch
//!
//! Every dynamic operation resolves the same way: the native path when the
//! operand kinds support it, then string-to-number coercion for arithmetic
//! and mixed comparisons, then the metatables of the operands (left, then
//! right), and finally a runtime error naming the operator and types.
//!
//! A [`DispatchSite`] sits at each operator in compiled code and remembers
//! which of those paths the last operand-kind pair took. The memo only
//! skips classification; the chosen path still checks everything it needs,
//! so results never depend on it.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::trace;

use crate::lua::coerce;
use crate::lua::error::{LuaError, LuaResult, RuntimeErrorKind};
use crate::lua::metamethod::{call_metamethod, get_metamethod, resolve_binary_metamethod, MetamethodType};
use crate::lua::value::{LuaString, Value};
use crate::lua::varargs::Varargs;
use crate::lua::vm::LuaVM;

/// Bound on `__index`/`__newindex`/`__call` chains
const MAX_META_CHAIN: usize = 100;

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    /// Native numeric result
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Mod => a - (a / b).floor() * b,
            ArithOp::Pow => a.powf(b),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
            ArithOp::Pow => "^",
        }
    }

    fn metamethod(self) -> MetamethodType {
        match self {
            ArithOp::Add => MetamethodType::Add,
            ArithOp::Sub => MetamethodType::Sub,
            ArithOp::Mul => MetamethodType::Mul,
            ArithOp::Div => MetamethodType::Div,
            ArithOp::Mod => MetamethodType::Mod,
            ArithOp::Pow => MetamethodType::Pow,
        }
    }
}

/// Resolution path chosen for an operand-kind pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Strategy {
    Native = 1,
    Coerce = 2,
    Metamethod = 3,
}

impl Strategy {
    fn from_bits(bits: u32) -> Option<Strategy> {
        match bits {
            1 => Some(Strategy::Native),
            2 => Some(Strategy::Coerce),
            3 => Some(Strategy::Metamethod),
            _ => None,
        }
    }
}

/// Per-operation memo keyed by the operand kinds last seen. Atomic so that
/// compiled chunks stay shareable across threads.
#[derive(Debug, Default)]
pub struct DispatchSite {
    /// `shape << 8 | strategy`, zero when empty
    memo: AtomicU32,
}

impl DispatchSite {
    pub const fn new() -> Self {
        DispatchSite {
            memo: AtomicU32::new(0),
        }
    }

    fn resolve(&self, a: &Value, b: &Value, classify: impl FnOnce() -> Strategy) -> Strategy {
        let shape = (((a.kind_code() as u32) << 4) | b.kind_code() as u32) + 1;
        let memo = self.memo.load(Ordering::Relaxed);
        if memo >> 8 == shape {
            if let Some(strategy) = Strategy::from_bits(memo & 0xff) {
                return strategy;
            }
        }

        let strategy = classify();
        self.memo.store((shape << 8) | strategy as u32, Ordering::Relaxed);
        trace!(
            left = a.type_name(),
            right = b.type_name(),
            strategy = ?strategy,
            "dispatch site rebound"
        );
        strategy
    }
}

fn is_number_like(v: &Value) -> bool {
    matches!(v, Value::Number(_) | Value::String(_))
}

fn classify_coercible(a: &Value, b: &Value) -> Strategy {
    if is_number_like(a) && is_number_like(b) {
        Strategy::Coerce
    } else {
        Strategy::Metamethod
    }
}

fn arith_error(op: ArithOp, a: &Value, b: &Value) -> LuaError {
    let bad = if coerce::to_number(a).is_none() { a } else { b };
    match bad {
        Value::String(s) => LuaError::runtime(
            RuntimeErrorKind::Coercion,
            format!(
                "attempt to perform arithmetic on a string value (cannot coerce '{}' to a number)",
                s
            ),
        ),
        _ => LuaError::runtime(
            RuntimeErrorKind::Arithmetic,
            format!(
                "attempt to perform arithmetic on a {} value (operator '{}')",
                bad.type_name(),
                op.symbol()
            ),
        ),
    }
}

/// Binary arithmetic
pub fn arith(vm: &LuaVM, site: &DispatchSite, op: ArithOp, a: &Value, b: &Value) -> LuaResult<Value> {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return Ok(Value::Number(op.apply(*x, *y)));
    }

    if site.resolve(a, b, || classify_coercible(a, b)) == Strategy::Coerce {
        if let (Some(x), Some(y)) = (coerce::to_number(a), coerce::to_number(b)) {
            return Ok(Value::Number(op.apply(x, y)));
        }
    }

    match resolve_binary_metamethod(vm, a, b, op.metamethod()) {
        Some(handler) => call_metamethod(vm, op.metamethod(), &handler, vec![a.clone(), b.clone()]),
        None => Err(arith_error(op, a, b)),
    }
}

/// Unary minus
pub fn negate(vm: &LuaVM, a: &Value) -> LuaResult<Value> {
    if let Some(n) = coerce::to_number(a) {
        return Ok(Value::Number(-n));
    }
    match get_metamethod(vm, a, MetamethodType::Unm) {
        Some(handler) => call_metamethod(vm, MetamethodType::Unm, &handler, vec![a.clone(), a.clone()]),
        None => Err(arith_error(ArithOp::Sub, a, a)),
    }
}

/// String concatenation (`..`)
pub fn concat(vm: &LuaVM, site: &DispatchSite, a: &Value, b: &Value) -> LuaResult<Value> {
    let strategy = site.resolve(a, b, || {
        if is_number_like(a) && is_number_like(b) {
            Strategy::Native
        } else {
            Strategy::Metamethod
        }
    });

    if strategy == Strategy::Native {
        if let (Some(x), Some(y)) = (coerce::to_lua_string(a), coerce::to_lua_string(b)) {
            let mut bytes = Vec::with_capacity(x.len() + y.len());
            bytes.extend_from_slice(x.as_bytes());
            bytes.extend_from_slice(y.as_bytes());
            return Ok(Value::String(LuaString::from(bytes)));
        }
    }

    match resolve_binary_metamethod(vm, a, b, MetamethodType::Concat) {
        Some(handler) => call_metamethod(vm, MetamethodType::Concat, &handler, vec![a.clone(), b.clone()]),
        None => {
            let bad = if is_number_like(a) { b } else { a };
            Err(LuaError::runtime(
                RuntimeErrorKind::Concatenation,
                format!("attempt to concatenate a {} value", bad.type_name()),
            ))
        }
    }
}

/// Length operator (`#`)
pub fn len(vm: &LuaVM, a: &Value) -> LuaResult<Value> {
    match a {
        Value::String(s) => Ok(Value::Number(s.len() as f64)),
        Value::Table(t) => Ok(Value::Number(t.len() as f64)),
        _ => match get_metamethod(vm, a, MetamethodType::Len) {
            Some(handler) => call_metamethod(vm, MetamethodType::Len, &handler, vec![a.clone()]),
            None => Err(LuaError::runtime(
                RuntimeErrorKind::Length,
                format!("attempt to get length of a {} value", a.type_name()),
            )),
        },
    }
}

/// Equality (`==`)
pub fn equals(vm: &LuaVM, a: &Value, b: &Value) -> LuaResult<bool> {
    if a.raw_equals(b) {
        return Ok(true);
    }
    match (a, b) {
        (Value::Table(_), Value::Table(_)) => {}
        (Value::HostObject(x), Value::HostObject(y)) => {
            if let Some(equal) = x.object().equals(y.object()) {
                return Ok(equal);
            }
        }
        _ => return Ok(false),
    }
    match resolve_binary_metamethod(vm, a, b, MetamethodType::Eq) {
        Some(handler) => {
            let result = call_metamethod(vm, MetamethodType::Eq, &handler, vec![a.clone(), b.clone()])?;
            Ok(result.is_truthy())
        }
        None => Ok(false),
    }
}

fn compare_error(a: &Value, b: &Value) -> LuaError {
    let message = if a.type_name() == b.type_name() {
        format!("attempt to compare two {} values", a.type_name())
    } else {
        format!("attempt to compare {} with {}", a.type_name(), b.type_name())
    };
    LuaError::runtime(RuntimeErrorKind::Comparison, message)
}

fn coerce_pair(a: &Value, b: &Value) -> LuaResult<(f64, f64)> {
    match (coerce::to_number(a), coerce::to_number(b)) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => {
            let bad = if coerce::to_number(a).is_none() { a } else { b };
            Err(LuaError::runtime(
                RuntimeErrorKind::Coercion,
                format!("attempt to compare {} with {} (cannot coerce '{}' to a number)", a.type_name(), b.type_name(), bad),
            ))
        }
    }
}

/// Less-than (`<`); `a > b` is `less_than(b, a)`
pub fn less_than(vm: &LuaVM, site: &DispatchSite, a: &Value, b: &Value) -> LuaResult<bool> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => return Ok(x < y),
        (Value::String(x), Value::String(y)) => return Ok(x.as_bytes() < y.as_bytes()),
        _ => {}
    }

    if site.resolve(a, b, || classify_coercible(a, b)) == Strategy::Coerce {
        let (x, y) = coerce_pair(a, b)?;
        return Ok(x < y);
    }

    match resolve_binary_metamethod(vm, a, b, MetamethodType::Lt) {
        Some(handler) => {
            let result = call_metamethod(vm, MetamethodType::Lt, &handler, vec![a.clone(), b.clone()])?;
            Ok(result.is_truthy())
        }
        None => Err(compare_error(a, b)),
    }
}

/// Less-or-equal (`<=`); `a >= b` is `less_equal(b, a)`. Without `__le`
/// the answer is `not (b < a)` through `__lt`.
pub fn less_equal(vm: &LuaVM, site: &DispatchSite, a: &Value, b: &Value) -> LuaResult<bool> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => return Ok(x <= y),
        (Value::String(x), Value::String(y)) => return Ok(x.as_bytes() <= y.as_bytes()),
        _ => {}
    }

    if site.resolve(a, b, || classify_coercible(a, b)) == Strategy::Coerce {
        let (x, y) = coerce_pair(a, b)?;
        return Ok(x <= y);
    }

    if let Some(handler) = resolve_binary_metamethod(vm, a, b, MetamethodType::Le) {
        let result = call_metamethod(vm, MetamethodType::Le, &handler, vec![a.clone(), b.clone()])?;
        return Ok(result.is_truthy());
    }
    match resolve_binary_metamethod(vm, b, a, MetamethodType::Lt) {
        Some(handler) => {
            let result = call_metamethod(vm, MetamethodType::Lt, &handler, vec![b.clone(), a.clone()])?;
            Ok(!result.is_truthy())
        }
        None => Err(compare_error(a, b)),
    }
}

fn describe_error(kind: RuntimeErrorKind, verb: &str, value: &Value, desc: Option<&str>) -> LuaError {
    let message = match desc {
        Some(desc) => format!("attempt to {} {} (a {} value)", verb, desc, value.type_name()),
        None => format!("attempt to {} a {} value", verb, value.type_name()),
    };
    LuaError::runtime(kind, message)
}

/// Indexing read. `desc` names the indexed expression for error messages
/// (e.g. `global 'config'`).
pub fn index(vm: &LuaVM, target: &Value, key: &Value, desc: Option<&str>) -> LuaResult<Value> {
    let mut current = target.clone();
    let mut desc = desc;

    for _ in 0..MAX_META_CHAIN {
        let handler = match &current {
            Value::Table(t) => {
                let value = t.get(key);
                if !value.is_nil() {
                    return Ok(value);
                }
                match get_metamethod(vm, &current, MetamethodType::Index) {
                    Some(handler) => handler,
                    None => return Ok(Value::Nil),
                }
            }
            Value::HostObject(h) => {
                if let Some(result) = h.object().index(vm, key) {
                    return result;
                }
                match get_metamethod(vm, &current, MetamethodType::Index) {
                    Some(handler) => handler,
                    None => return Err(describe_error(RuntimeErrorKind::Index, "index", &current, desc)),
                }
            }
            _ => match get_metamethod(vm, &current, MetamethodType::Index) {
                Some(handler) => handler,
                None => return Err(describe_error(RuntimeErrorKind::Index, "index", &current, desc)),
            },
        };

        if let Value::Function(_) = handler {
            return call_metamethod(vm, MetamethodType::Index, &handler, vec![current, key.clone()]);
        }
        current = handler;
        desc = None;
    }

    Err(LuaError::runtime(RuntimeErrorKind::Index, "loop in gettable"))
}

/// Indexing write
pub fn set_index(vm: &LuaVM, target: &Value, key: Value, value: Value, desc: Option<&str>) -> LuaResult<()> {
    let mut current = target.clone();
    let mut desc = desc;

    for _ in 0..MAX_META_CHAIN {
        let handler = match &current {
            Value::Table(t) => {
                if !t.get(&key).is_nil() {
                    return t.set(key, value);
                }
                match get_metamethod(vm, &current, MetamethodType::NewIndex) {
                    Some(handler) => handler,
                    None => return t.set(key, value),
                }
            }
            Value::HostObject(h) => {
                if let Some(result) = h.object().set_index(vm, &key, &value) {
                    return result;
                }
                match get_metamethod(vm, &current, MetamethodType::NewIndex) {
                    Some(handler) => handler,
                    None => return Err(describe_error(RuntimeErrorKind::Index, "index", &current, desc)),
                }
            }
            _ => match get_metamethod(vm, &current, MetamethodType::NewIndex) {
                Some(handler) => handler,
                None => return Err(describe_error(RuntimeErrorKind::Index, "index", &current, desc)),
            },
        };

        if let Value::Function(_) = handler {
            call_metamethod(vm, MetamethodType::NewIndex, &handler, vec![current, key, value])?;
            return Ok(());
        }
        current = handler;
        desc = None;
    }

    Err(LuaError::runtime(RuntimeErrorKind::Index, "loop in settable"))
}

/// Invocation. Non-functions go through `__call` with the target prepended.
pub fn call(vm: &LuaVM, func: &Value, args: Varargs, desc: Option<&str>) -> LuaResult<Varargs> {
    let mut func = func.clone();
    let mut args = args;
    let mut desc = desc;

    for _ in 0..MAX_META_CHAIN {
        match &func {
            Value::Function(f) => return vm.call_function(f, args),
            Value::HostObject(h) => {
                if let Some(result) = h.object().call(vm, &args) {
                    return result;
                }
            }
            _ => {}
        }
        match get_metamethod(vm, &func, MetamethodType::Call) {
            Some(handler) => {
                trace!(metamethod = "__call", "invoking metamethod");
                args = args.prepend(func);
                func = handler;
                desc = None;
            }
            None => return Err(describe_error(RuntimeErrorKind::NotCallable, "call", &func, desc)),
        }
    }

    Err(LuaError::runtime(RuntimeErrorKind::NotCallable, "'__call' chain too long"))
}

/// `tostring` semantics: `__tostring` if present, else the default text
pub fn tostring(vm: &LuaVM, value: &Value) -> LuaResult<Value> {
    if let Some(handler) = get_metamethod(vm, value, MetamethodType::ToString) {
        let result = call_metamethod(vm, MetamethodType::ToString, &handler, vec![value.clone()])?;
        return match result {
            Value::String(_) => Ok(result),
            Value::Number(n) => Ok(Value::from(coerce::format_number(n))),
            _ => Err(LuaError::runtime(
                RuntimeErrorKind::BadArgument,
                "'__tostring' must return a string",
            )),
        };
    }
    match value {
        Value::String(_) => Ok(value.clone()),
        _ => Ok(Value::from(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::table::TableRef;

    fn vm() -> LuaVM {
        LuaVM::new().unwrap()
    }

    #[test]
    fn test_native_arith() {
        let vm = vm();
        let site = DispatchSite::new();
        let r = arith(&vm, &site, ArithOp::Mod, &Value::Number(-5.0), &Value::Number(3.0)).unwrap();
        assert_eq!(r, Value::Number(1.0));
        let r = arith(&vm, &site, ArithOp::Pow, &Value::Number(2.0), &Value::Number(10.0)).unwrap();
        assert_eq!(r, Value::Number(1024.0));
    }

    #[test]
    fn test_string_coercion() {
        let vm = vm();
        let site = DispatchSite::new();
        let r = arith(&vm, &site, ArithOp::Add, &Value::from("3"), &Value::Number(4.0)).unwrap();
        assert_eq!(r, Value::Number(7.0));

        let err = arith(&vm, &site, ArithOp::Add, &Value::from("abc"), &Value::Number(4.0)).unwrap_err();
        assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::Coercion));
    }

    #[test]
    fn test_memo_does_not_change_results() {
        let vm = vm();
        let site = DispatchSite::new();
        // Same operand kinds, different coercibility
        assert!(arith(&vm, &site, ArithOp::Mul, &Value::from("2"), &Value::from("5")).is_ok());
        assert!(arith(&vm, &site, ArithOp::Mul, &Value::from("x"), &Value::from("5")).is_err());
        assert_eq!(
            arith(&vm, &site, ArithOp::Mul, &Value::from("2"), &Value::from("5")).unwrap(),
            Value::Number(10.0)
        );
    }

    #[test]
    fn test_arith_type_error() {
        let vm = vm();
        let site = DispatchSite::new();
        let err = arith(&vm, &site, ArithOp::Add, &Value::Nil, &Value::Number(1.0)).unwrap_err();
        assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::Arithmetic));
        assert!(err.to_string().contains("nil value"));
        assert!(err.to_string().contains("'+'"));
    }

    #[test]
    fn test_concat() {
        let vm = vm();
        let site = DispatchSite::new();
        let r = concat(&vm, &site, &Value::from("x"), &Value::Number(5.0)).unwrap();
        assert_eq!(r, Value::from("x5"));
        let err = concat(&vm, &site, &Value::from("x"), &Value::Boolean(true)).unwrap_err();
        assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::Concatenation));
    }

    #[test]
    fn test_comparisons() {
        let vm = vm();
        let site = DispatchSite::new();
        assert!(less_than(&vm, &site, &Value::from("a"), &Value::from("b")).unwrap());
        assert!(less_equal(&vm, &site, &Value::Number(2.0), &Value::Number(2.0)).unwrap());
        assert!(less_than(&vm, &site, &Value::from("10"), &Value::Number(20.0)).unwrap());

        let err = less_than(&vm, &site, &Value::Nil, &Value::Number(1.0)).unwrap_err();
        assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::Comparison));
    }

    #[test]
    fn test_equality_without_metamethods() {
        let vm = vm();
        assert!(equals(&vm, &Value::Number(1.0), &Value::Number(1.0)).unwrap());
        assert!(!equals(&vm, &Value::Number(1.0), &Value::from("1")).unwrap());
        assert!(!equals(&vm, &Value::Table(TableRef::new()), &Value::Table(TableRef::new())).unwrap());
    }

    #[test]
    fn test_index_chain_through_tables() {
        let vm = vm();
        let base = TableRef::new();
        base.set_str("greeting", Value::from("hi")).unwrap();
        let mt = TableRef::new();
        mt.set_str("__index", Value::Table(base)).unwrap();
        let obj = TableRef::new();
        obj.set_metatable(Some(mt));

        let r = index(&vm, &Value::Table(obj.clone()), &Value::from("greeting"), None).unwrap();
        assert_eq!(r, Value::from("hi"));
        let r = index(&vm, &Value::Table(obj), &Value::from("missing"), None).unwrap();
        assert_eq!(r, Value::Nil);
    }

    #[test]
    fn test_index_loop_detected() {
        let vm = vm();
        let t = TableRef::new();
        let mt = TableRef::new();
        mt.set_str("__index", Value::Table(t.clone())).unwrap();
        t.set_metatable(Some(mt));
        let err = index(&vm, &Value::Table(t), &Value::from("x"), None).unwrap_err();
        assert!(err.to_string().contains("loop in gettable"));
    }

    #[test]
    fn test_index_non_table() {
        let vm = vm();
        let err = index(&vm, &Value::Nil, &Value::from("x"), Some("global 'cfg'")).unwrap_err();
        assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::Index));
        assert_eq!(err.to_string(), "attempt to index global 'cfg' (a nil value)");
    }

    #[test]
    fn test_call_non_callable() {
        let vm = vm();
        let err = call(&vm, &Value::Number(3.0), Varargs::empty(), None).unwrap_err();
        assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::NotCallable));
        assert_eq!(err.to_string(), "attempt to call a number value");
    }

    #[test]
    fn test_call_native() {
        let vm = vm();
        let f = Value::native("double", |ctx| {
            let n = ctx.check_number(0)?;
            Ok(Varargs::one(n * 2.0))
        });
        let r = call(&vm, &f, Varargs::one(21.0), None).unwrap();
        assert_eq!(r.first(), Value::Number(42.0));
    }
}

//! Metamethod support
//!
//! Lookup of metatables and metamethod entries, and the left-then-right
//! resolution order shared by all binary operators.

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;
use tracing::trace;

use crate::lua::error::LuaResult;
use crate::lua::table::TableRef;
use crate::lua::value::{LuaString, Value};
use crate::lua::varargs::Varargs;
use crate::lua::vm::LuaVM;

/// Types of metamethods supported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetamethodType {
    /// __index - table indexing
    Index,

    /// __newindex - table assignment
    NewIndex,

    /// __call - function call
    Call,

    /// __add - addition
    Add,

    /// __sub - subtraction
    Sub,

    /// __mul - multiplication
    Mul,

    /// __div - division
    Div,

    /// __mod - modulo
    Mod,

    /// __pow - exponentiation
    Pow,

    /// __unm - unary minus
    Unm,

    /// __concat - concatenation
    Concat,

    /// __len - length operator
    Len,

    /// __eq - equality
    Eq,

    /// __lt - less than
    Lt,

    /// __le - less than or equal
    Le,

    /// __tostring - string conversion
    ToString,

    /// __metatable - protects the metatable from getmetatable/setmetatable
    Metatable,
}

const ALL: [MetamethodType; 17] = [
    MetamethodType::Index,
    MetamethodType::NewIndex,
    MetamethodType::Call,
    MetamethodType::Add,
    MetamethodType::Sub,
    MetamethodType::Mul,
    MetamethodType::Div,
    MetamethodType::Mod,
    MetamethodType::Pow,
    MetamethodType::Unm,
    MetamethodType::Concat,
    MetamethodType::Len,
    MetamethodType::Eq,
    MetamethodType::Lt,
    MetamethodType::Le,
    MetamethodType::ToString,
    MetamethodType::Metatable,
];

lazy_static! {
    /// Interned key strings, so lookups do not allocate
    static ref KEYS: HashMap<MetamethodType, LuaString> =
        ALL.iter().map(|mm| (*mm, LuaString::from(mm.name()))).collect();
}

impl MetamethodType {
    /// Get the string name of the metamethod
    pub fn name(&self) -> &'static str {
        match self {
            MetamethodType::Index => "__index",
            MetamethodType::NewIndex => "__newindex",
            MetamethodType::Call => "__call",
            MetamethodType::Add => "__add",
            MetamethodType::Sub => "__sub",
            MetamethodType::Mul => "__mul",
            MetamethodType::Div => "__div",
            MetamethodType::Mod => "__mod",
            MetamethodType::Pow => "__pow",
            MetamethodType::Unm => "__unm",
            MetamethodType::Concat => "__concat",
            MetamethodType::Len => "__len",
            MetamethodType::Eq => "__eq",
            MetamethodType::Lt => "__lt",
            MetamethodType::Le => "__le",
            MetamethodType::ToString => "__tostring",
            MetamethodType::Metatable => "__metatable",
        }
    }

    /// The table key for this metamethod
    pub fn key(&self) -> Value {
        match KEYS.get(self) {
            Some(s) => Value::String(s.clone()),
            None => Value::from(self.name()),
        }
    }
}

impl fmt::Display for MetamethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The metatable governing `value`, if any. Strings share one type-level
/// metatable held by the VM.
pub fn metatable_of(vm: &LuaVM, value: &Value) -> Option<TableRef> {
    match value {
        Value::Table(t) => t.metatable(),
        Value::HostObject(h) => h.metatable(),
        Value::String(_) => vm.string_metatable(),
        _ => None,
    }
}

/// Resolve a metamethod for a value (raw lookup in its metatable)
pub fn get_metamethod(vm: &LuaVM, value: &Value, mm_type: MetamethodType) -> Option<Value> {
    let metatable = metatable_of(vm, value)?;
    let handler = metatable.get(&mm_type.key());
    if handler.is_nil() {
        None
    } else {
        Some(handler)
    }
}

/// Resolve a binary metamethod: the left operand's metatable first, then
/// the right operand's
pub fn resolve_binary_metamethod(
    vm: &LuaVM,
    left: &Value,
    right: &Value,
    mm_type: MetamethodType,
) -> Option<Value> {
    get_metamethod(vm, left, mm_type).or_else(|| get_metamethod(vm, right, mm_type))
}

/// Invoke a metamethod handler and truncate its result to one value
pub fn call_metamethod(vm: &LuaVM, mm_type: MetamethodType, handler: &Value, args: Vec<Value>) -> LuaResult<Value> {
    trace!(metamethod = mm_type.name(), "invoking metamethod");
    let results = vm.call(handler, Varargs::from(args))?;
    Ok(results.into_first())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_keys() {
        assert_eq!(MetamethodType::Index.name(), "__index");
        assert_eq!(MetamethodType::Metatable.to_string(), "__metatable");
        assert_eq!(MetamethodType::Le.key(), Value::from("__le"));
    }

    #[test]
    fn test_left_then_right_resolution() {
        let vm = LuaVM::new().unwrap();
        let left_mt = TableRef::new();
        left_mt.set_str("__add", Value::from("left")).unwrap();
        let right_mt = TableRef::new();
        right_mt.set_str("__add", Value::from("right")).unwrap();

        let a = TableRef::new();
        a.set_metatable(Some(left_mt));
        let b = TableRef::new();
        b.set_metatable(Some(right_mt));

        let (a, b) = (Value::Table(a), Value::Table(b));
        let found = resolve_binary_metamethod(&vm, &a, &b, MetamethodType::Add);
        assert_eq!(found, Some(Value::from("left")));

        let found = resolve_binary_metamethod(&vm, &Value::Number(1.0), &b, MetamethodType::Add);
        assert_eq!(found, Some(Value::from("right")));

        assert!(resolve_binary_metamethod(&vm, &Value::Nil, &Value::Nil, MetamethodType::Add).is_none());
    }
}

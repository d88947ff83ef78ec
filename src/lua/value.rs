//! Lua value types
//!
//! Tables, functions and host objects are `Rc` handles with reference
//! semantics; strings are immutable, shareable byte buffers. Reference
//! cycles between tables are not collected.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::lua::codegen::FunctionProto;
use crate::lua::coerce::format_number;
use crate::lua::error::LuaResult;
use crate::lua::host::HostRef;
use crate::lua::table::TableRef;
use crate::lua::varargs::Varargs;
use crate::lua::vm::ExecutionContext;

/// Immutable Lua string (arbitrary bytes)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LuaString(Arc<[u8]>);

impl LuaString {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// UTF-8 view, replacing invalid sequences
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for LuaString {
    fn from(s: &str) -> Self {
        LuaString(Arc::from(s.as_bytes()))
    }
}

impl From<String> for LuaString {
    fn from(s: String) -> Self {
        LuaString(Arc::from(s.into_bytes()))
    }
}

impl From<Vec<u8>> for LuaString {
    fn from(bytes: Vec<u8>) -> Self {
        LuaString(Arc::from(bytes))
    }
}

impl From<&[u8]> for LuaString {
    fn from(bytes: &[u8]) -> Self {
        LuaString(Arc::from(bytes))
    }
}

impl fmt::Debug for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_str_lossy())
    }
}

impl fmt::Display for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

/// Signature of native functions
pub type NativeFn = Rc<dyn Fn(&mut ExecutionContext<'_>) -> LuaResult<Varargs>>;

/// A captured local shared between a frame and its closures
pub type Upvalue = Rc<RefCell<Value>>;

/// Function shared handle
pub type FunctionRef = Rc<LuaFunction>;

/// A scripted function instance: prototype plus captured cells
pub struct Closure {
    pub proto: Arc<FunctionProto>,
    pub upvalues: Box<[Upvalue]>,
}

/// A native function with the name it reports in errors and tracebacks
pub struct NativeFunction {
    pub name: String,
    pub func: NativeFn,
}

/// Callable values
pub enum LuaFunction {
    Scripted(Closure),
    Native(NativeFunction),
}

impl LuaFunction {
    /// Name for diagnostics
    pub fn name(&self) -> Option<&str> {
        match self {
            LuaFunction::Scripted(closure) => closure.proto.name.as_deref(),
            LuaFunction::Native(native) => Some(&native.name),
        }
    }
}

/// Main Lua value type
#[derive(Clone)]
pub enum Value {
    /// Nil value
    Nil,

    /// Boolean value
    Boolean(bool),

    /// Number value (Lua uses doubles for all numbers)
    Number(f64),

    /// String value
    String(LuaString),

    /// Table value
    Table(TableRef),

    /// Scripted or native function
    Function(FunctionRef),

    /// Opaque host value
    HostObject(HostRef),
}

impl Value {
    /// Create a native function value
    pub fn native<F>(name: &str, f: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>) -> LuaResult<Varargs> + 'static,
    {
        Value::Function(Rc::new(LuaFunction::Native(NativeFunction {
            name: name.to_string(),
            func: Rc::new(f),
        })))
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::HostObject(_) => "userdata",
        }
    }

    /// Small integer tag per variant, used to key dispatch memos
    pub(crate) fn kind_code(&self) -> u8 {
        match self {
            Value::Nil => 0,
            Value::Boolean(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Table(_) => 4,
            Value::Function(_) => 5,
            Value::HostObject(_) => 6,
        }
    }

    /// Check if this value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Check if this value is falsey (nil or false)
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Lua truthiness
    pub fn is_truthy(&self) -> bool {
        !self.is_falsey()
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&LuaString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Equality without metamethods
    pub fn raw_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::HostObject(a), Value::HostObject(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Address used when printing reference values
    fn address(&self) -> usize {
        match self {
            Value::Table(t) => t.addr(),
            Value::Function(f) => Rc::as_ptr(f) as *const () as usize,
            Value::HostObject(h) => h.addr(),
            _ => 0,
        }
    }
}

impl fmt::Display for Value {
    /// Default `tostring` rendering (no `__tostring`)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Table(_) => write!(f, "table: {:#x}", self.address()),
            Value::Function(_) => write!(f, "function: {:#x}", self.address()),
            Value::HostObject(h) => write!(f, "{}: {:#x}", h.object().type_name(), self.address()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            // Reference values print by identity; tables may be cyclic
            Value::Table(_) => write!(f, "Table({:#x})", self.address()),
            Value::Function(func) => match func.name() {
                Some(name) => write!(f, "Function({})", name),
                None => write!(f, "Function({:#x})", self.address()),
            },
            Value::HostObject(h) => write!(f, "HostObject({})", h.object().type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equals(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(LuaString::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(LuaString::from(s))
    }
}

impl From<LuaString> for Value {
    fn from(s: LuaString) -> Self {
        Value::String(s)
    }
}

impl From<TableRef> for Value {
    fn from(t: TableRef) -> Self {
        Value::Table(t)
    }
}

impl From<HostRef> for Value {
    fn from(h: HostRef) -> Self {
        Value::HostObject(h)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Value::Nil.is_falsey());
        assert!(Value::Boolean(false).is_falsey());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::from("").is_truthy());
    }

    #[test]
    fn test_raw_equality() {
        assert_eq!(Value::from("abc"), Value::from("abc".to_string()));
        assert_ne!(Value::Number(1.0), Value::from("1"));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));

        let t = TableRef::new();
        assert_eq!(Value::Table(t.clone()), Value::Table(t));
        assert_ne!(Value::Table(TableRef::new()), Value::Table(TableRef::new()));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(Value::Number(10.0).to_string(), "10");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
        assert!(Value::Table(TableRef::new()).to_string().starts_with("table: 0x"));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::native("f", |_| Ok(Varargs::empty())).type_name(), "function");
        assert_eq!(Value::Table(TableRef::new()).type_name(), "table");
    }
}

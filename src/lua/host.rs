//! Host object interop
//!
//! Rust types implement [`HostObject`] to flow through the value model as
//! `userdata`. Each hook may decline (`None`), in which case the runtime
//! falls back to the object's metatable exactly as it would for a table.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::lua::error::LuaResult;
use crate::lua::table::TableRef;
use crate::lua::value::Value;
use crate::lua::varargs::Varargs;
use crate::lua::vm::LuaVM;

/// A foreign value exposed to scripts
pub trait HostObject: Any {
    /// Name used in `tostring` output and error messages
    fn type_name(&self) -> &str;

    /// Downcasting support; implementations return `self`
    fn as_any(&self) -> &dyn Any;

    /// Native member read
    fn index(&self, _vm: &LuaVM, _key: &Value) -> Option<LuaResult<Value>> {
        None
    }

    /// Native member write
    fn set_index(&self, _vm: &LuaVM, _key: &Value, _value: &Value) -> Option<LuaResult<()>> {
        None
    }

    /// Native invocation
    fn call(&self, _vm: &LuaVM, _args: &Varargs) -> Option<LuaResult<Varargs>> {
        None
    }

    /// Native equality against another host object that is not the same
    /// instance
    fn equals(&self, _other: &dyn HostObject) -> Option<bool> {
        None
    }
}

struct HostCell {
    object: Box<dyn HostObject>,
    metatable: RefCell<Option<TableRef>>,
}

/// Shared handle to a host object
#[derive(Clone)]
pub struct HostRef(Rc<HostCell>);

impl HostRef {
    pub fn new<T: HostObject>(object: T) -> Self {
        HostRef(Rc::new(HostCell {
            object: Box::new(object),
            metatable: RefCell::new(None),
        }))
    }

    pub fn object(&self) -> &dyn HostObject {
        &*self.0.object
    }

    /// Borrow the concrete host type
    pub fn downcast_ref<T: HostObject>(&self) -> Option<&T> {
        self.0.object.as_any().downcast_ref::<T>()
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.0.metatable.borrow().clone()
    }

    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        *self.0.metatable.borrow_mut() = metatable;
    }

    pub fn ptr_eq(&self, other: &HostRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point {
        x: f64,
    }

    impl HostObject for Point {
        fn type_name(&self) -> &str {
            "Point"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_downcast_and_identity() {
        let p = HostRef::new(Point { x: 2.0 });
        let q = p.clone();
        assert!(p.ptr_eq(&q));
        assert_eq!(p.downcast_ref::<Point>().map(|p| p.x), Some(2.0));
        assert_eq!(p.object().type_name(), "Point");
        assert!(!p.ptr_eq(&HostRef::new(Point { x: 2.0 })));
    }

    #[test]
    fn test_metatable_slot() {
        let p = HostRef::new(Point { x: 0.0 });
        assert!(p.metatable().is_none());
        let mt = TableRef::new();
        p.set_metatable(Some(mt.clone()));
        assert!(p.metatable().map_or(false, |m| m.ptr_eq(&mt)));
    }
}

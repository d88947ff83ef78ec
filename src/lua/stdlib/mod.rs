//! Standard Library Module
//!
//! This module contains the standard library implementations for the
//! ferrous-lua VM. Each library registers through
//! [`LuaVM::register_library`], the same hook hosts use for their own.

pub mod base;
pub mod math;
pub mod string;
pub mod table;

use std::rc::Rc;

use crate::lua::error::LuaResult;
use crate::lua::value::{LuaFunction, NativeFunction, Value};
use crate::lua::vm::{LibFunction, LuaVM};

/// Initialize all standard libraries
pub fn open_libs(vm: &LuaVM) -> LuaResult<()> {
    // Base library must be first
    base::init_base_lib(vm)?;

    math::init_math_lib(vm)?;
    string::init_string_lib(vm)?;
    table::init_table_lib(vm)?;
    Ok(())
}

/// Wrap a library function as a value
pub(crate) fn native_value(name: &str, f: LibFunction) -> Value {
    Value::Function(Rc::new(LuaFunction::Native(NativeFunction {
        name: name.to_string(),
        func: Rc::new(f),
    })))
}
